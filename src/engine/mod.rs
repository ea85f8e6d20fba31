// Transcode engine - planning, segment scheduling and the media boundary

pub mod ack;
pub mod core;
pub mod hardware;
pub mod media;
pub mod probe;
pub mod progress;
pub mod scheduler;
pub mod session;
pub mod synthetic;
pub mod watchdog;

pub use ack::{AckGate, AckWindow};
pub use core::*;
pub use media::{Frame, InputHandle, MediaEngine, OutputHandle, OutputStream, Packet};
pub use probe::probe_source;
pub use progress::{HttpProgressSink, LogProgressSink, ProgressReporter, ProgressSample, ProgressSink};
pub use scheduler::SegmentScheduler;
pub use session::{Session, SessionOptions, StreamPlan};
pub use synthetic::SyntheticEngine;
