mod capability;
mod copy;
mod error;
mod log;
mod quality;
mod state;
mod types;

pub use capability::{
    AudioCapability, AudioCeilings, BitrateCeiling, CapabilityProfile, VideoCapability,
    parse_audio_ceilings,
};
pub use copy::{
    BitstreamFilter, CopyPlan, CopyThresholds, CopyVerdict, EncodeTarget, RejectReason,
    StreamCopyDecider, StreamDecision, StreamMode, VideoCopyContext,
};
pub use error::{TranscodeError, TranscodeResult};
pub use log::{DEFAULT_LOG_FILE, default_log_path, init_logging, write_debug_log};
pub use quality::{
    AudioTarget, LadderConfig, MotionEstimation, ParameterTable, QualityRequest, QualityTarget,
    ResolutionBreakpoint, Rung, VideoTarget, fit_within, reference_ladder,
};
pub use state::{SchedulerState, SegmentNaming, SegmentState};
pub use types::{
    AudioCodec, AudioProps, H264Profile, MediaKind, OUTPUT_TIME_BASE, Rational, SourceProbe,
    StreamDetail, StreamProps, VideoProps,
};
