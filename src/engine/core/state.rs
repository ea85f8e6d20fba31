use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::types::{OUTPUT_TIME_BASE, Rational};

/// Output file naming: `{base}-tmp.{ext}` while writing, `{base}-{index:05}.{ext}` once final
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentNaming {
    pub base: PathBuf,
    pub extension: String,
}

impl SegmentNaming {
    pub fn new(base: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            extension: extension.into(),
        }
    }

    pub fn temp_path(&self) -> PathBuf {
        self.with_suffix("tmp")
    }

    pub fn final_path(&self, index: u32) -> PathBuf {
        self.with_suffix(&format!("{:05}", index))
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut name = self.base.as_os_str().to_os_string();
        name.push(format!("-{}.{}", suffix, self.extension));
        PathBuf::from(name)
    }
}

/// Scheduler lifecycle; `Failed` is reachable from every state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Priming,
    Streaming,
    Rotating,
    Draining,
    Finished,
    Failed,
}

/// The live segment; mutated only by the scheduler
#[derive(Debug, Clone, Serialize)]
pub struct SegmentState {
    pub segment_index: u32,
    pub segment_length_ticks: i64,
    /// Always [`OUTPUT_TIME_BASE`]
    pub time_base: Rational,
    /// Output-relative start of the current segment
    pub segment_start_ticks: i64,
    /// Highest output-relative pts written so far
    pub last_output_pts: Option<i64>,
    /// Pts of the last packet handed to the muxer
    pub last_mux_pts: Option<i64>,
    pub output_path: PathBuf,
    pub force_next_keyframe: bool,
    /// Packets written into the current segment
    pub packets_in_segment: u64,
}

impl SegmentState {
    pub fn new(initial_index: u32, segment_seconds: f64, naming: &SegmentNaming) -> Self {
        Self {
            segment_index: initial_index,
            segment_length_ticks: OUTPUT_TIME_BASE.ticks_from_secs(segment_seconds).max(1),
            time_base: OUTPUT_TIME_BASE,
            segment_start_ticks: 0,
            last_output_pts: None,
            last_mux_pts: None,
            output_path: naming.temp_path(),
            force_next_keyframe: true,
            packets_in_segment: 0,
        }
    }

    /// End of the current segment in output ticks
    pub fn segment_end_ticks(&self) -> i64 {
        self.segment_start_ticks + self.segment_length_ticks
    }

    /// Whether `pts` (clamped to the output duration) has reached the boundary
    pub fn reached_boundary(&self, pts: i64, duration_ticks: i64) -> bool {
        pts.min(duration_ticks) - self.segment_start_ticks >= self.segment_length_ticks
    }

    /// Move to the next segment after the current file was finalized
    pub fn advance(&mut self, naming: &SegmentNaming) {
        self.segment_index += 1;
        self.segment_start_ticks += self.segment_length_ticks;
        self.output_path = naming.temp_path();
        self.force_next_keyframe = true;
        self.packets_in_segment = 0;
    }

    pub fn record_write(&mut self, pts: i64) {
        self.last_mux_pts = Some(pts);
        self.last_output_pts = Some(self.last_output_pts.map_or(pts, |p| p.max(pts)));
        self.packets_in_segment += 1;
    }
}
