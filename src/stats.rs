// Session statistics

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: Uuid,

    /// Local start time (RFC 3339)
    pub started_at: Option<String>,

    /// Finalized segment files, in index order
    pub segments: Vec<PathBuf>,

    pub first_segment: Option<u32>,

    pub last_segment: Option<u32>,

    /// Packets remuxed without decoding
    pub packets_copied: u64,

    /// Packets produced by an encoder
    pub packets_encoded: u64,

    /// Synthesized tail padding packets
    pub packets_filled: u64,

    /// Source packets past the output duration or on suppressed streams
    pub packets_dropped: u64,

    /// Payload bytes handed to the muxer
    pub bytes_written: u64,

    /// Seconds of output backed by source packets
    pub real_output_secs: f64,

    /// Seconds of output including tail padding
    pub output_secs: f64,

    pub wall_time_secs: f64,

    /// The ack channel went quiet and the gate stopped blocking
    pub ack_failed_open: bool,
}

impl SessionStats {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            started_at: Some(chrono::Local::now().to_rfc3339()),
            ..Default::default()
        }
    }

    pub fn record_segment(&mut self, index: u32, path: PathBuf) {
        self.first_segment.get_or_insert(index);
        self.last_segment = Some(index);
        self.segments.push(path);
    }

    pub fn segments_emitted(&self) -> usize {
        self.segments.len()
    }

    /// Output seconds per wall-clock second
    pub fn speed_multiple(&self) -> f64 {
        if self.wall_time_secs <= 0.0 {
            0.0
        } else {
            self.output_secs / self.wall_time_secs
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} segments, {} of output in {} ({:.1}x), {} written ({} copied / {} encoded / {} filler packets)",
            self.segments_emitted(),
            format_duration(self.output_secs),
            format_duration(self.wall_time_secs),
            self.speed_multiple(),
            format_bytes(self.bytes_written),
            self.packets_copied,
            self.packets_encoded,
            self.packets_filled,
        )
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize stats")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write stats file: {}", path.display()))?;
        Ok(())
    }
}

/// Format bytes as human-readable size
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format duration in seconds as human-readable time
pub fn format_duration(seconds: f64) -> String {
    let total_secs = seconds as u64;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}
