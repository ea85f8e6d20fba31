//! Boundary to the decode/encode/mux library.
//!
//! The orchestrator never touches codec internals; everything below the
//! packet level goes through [`MediaEngine`]. Handles are opaque indices
//! owned by the engine.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use super::core::{BitstreamFilter, MediaKind, Rational, StreamDecision, StreamMode};

/// A compressed packet. Timestamps are in `time_base` units.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    pub time_base: Rational,
    pub keyframe: bool,
    pub data: Vec<u8>,
}

impl Packet {
    /// Presentation time, or decode time when pts is unset, rescaled into `to`
    pub fn timestamp_in(&self, to: Rational) -> Option<i64> {
        self.pts
            .or(self.dts)
            .map(|t| Rational::rescale(t, self.time_base, to))
    }
}

/// A decoded picture or block of audio samples
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub duration: i64,
    pub time_base: Rational,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputHandle(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputHandle(pub usize);

/// One stream of the output mapping. Suppressed source streams never get one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputStream {
    pub output_index: usize,
    pub source_index: usize,
    pub kind: MediaKind,
    pub decision: StreamDecision,
    /// Volume multiplier for encoded audio; copy mode always carries 1.0
    pub gain: f64,
}

impl OutputStream {
    pub fn mode(&self) -> StreamMode {
        self.decision.mode()
    }
}

pub trait MediaEngine {
    fn open_input(&mut self, location: &str) -> Result<InputHandle>;

    /// Next packet in file order; `None` at end of input
    fn demux(&mut self, input: InputHandle) -> Result<Option<Packet>>;

    fn decode(&mut self, packet: &Packet) -> Result<Vec<Frame>>;

    /// Encode one frame for `stream`. `None` flushes delayed frames.
    fn encode(
        &mut self,
        stream: &OutputStream,
        frame: Option<&Frame>,
        force_keyframe: bool,
    ) -> Result<Vec<Packet>>;

    fn filter(&mut self, packet: Packet, filters: &[BitstreamFilter]) -> Result<Packet>;

    /// Minimal packet covering `[pts, pts + duration)` in `time_base`, if the
    /// stream's codec has a cheap way to produce one
    fn filler(
        &mut self,
        stream: &OutputStream,
        pts: i64,
        duration: i64,
        time_base: Rational,
    ) -> Result<Option<Packet>>;

    fn open_output(&mut self, path: &Path, streams: &[OutputStream]) -> Result<OutputHandle>;

    fn write_header(&mut self, output: OutputHandle) -> Result<()>;

    fn mux(&mut self, output: OutputHandle, packet: &Packet) -> Result<()>;

    fn flush(&mut self, output: OutputHandle) -> Result<()>;

    /// Writes the trailer and releases the file
    fn close_output(&mut self, output: OutputHandle) -> Result<()>;

    fn close_input(&mut self, input: InputHandle) -> Result<()>;
}
