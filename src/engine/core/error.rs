//! Session error taxonomy.
//!
//! Configuration and probe errors fail a session before any output exists.
//! Encode and mux errors are fatal mid-stream; temp files are left on disk
//! for external cleanup. Copy ineligibility is not an error at all (see
//! `CopyVerdict`), and ack channel trouble is absorbed by the gate.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("unknown quality level '{0}'")]
    UnknownQualityLevel(String),

    #[error("malformed capability field '{field}': {value:?}")]
    MalformedCapability { field: String, value: String },

    #[error("cannot determine source properties: {0}")]
    SourceProbe(String),

    #[error("mux write failed (segment {segment}, stream {stream}, last pts {pts:?}): {detail}")]
    MuxWrite {
        segment: u32,
        stream: usize,
        pts: Option<i64>,
        detail: String,
    },

    #[error("encode failed (segment {segment}, stream {stream}, last pts {pts:?}): {detail}")]
    Encode {
        segment: u32,
        stream: usize,
        pts: Option<i64>,
        detail: String,
    },

    #[error("insufficient source data: produced {produced_secs:.3}s, needed {required_secs:.3}s")]
    DurationInsufficient {
        produced_secs: f64,
        required_secs: f64,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TranscodeError {
    pub fn malformed(field: &str, value: impl Into<String>) -> Self {
        TranscodeError::MalformedCapability {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TranscodeError::Io {
            path: path.into(),
            source,
        }
    }

    /// Raised before any output is produced
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TranscodeError::UnknownQualityLevel(_) | TranscodeError::MalformedCapability { .. }
        )
    }

    /// Mid-stream failures that leave temp files behind
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TranscodeError::MuxWrite { .. } | TranscodeError::Encode { .. } | TranscodeError::Io { .. }
        )
    }

    /// Distinguishes a bad source from an internal failure
    pub fn is_data_insufficient(&self) -> bool {
        matches!(self, TranscodeError::DurationInsufficient { .. })
    }
}

pub type TranscodeResult<T> = Result<T, TranscodeError>;
