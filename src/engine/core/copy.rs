//! Stream-copy eligibility.
//!
//! Each check is an ordered predicate; the first failing one rejects the
//! stream and later checks may assume earlier ones passed (codec-specific
//! checks run only after the codec family matched). A rejection is a normal
//! outcome that routes the stream to the encoder.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::capability::{BitrateCeiling, CapabilityProfile};
use super::quality::{AudioTarget, VideoTarget};
use super::types::{Rational, SourceProbe, StreamProps};

fn default_gain_min() -> f64 {
    0.95
}
fn default_gain_max() -> f64 {
    1.05
}
fn default_audio_bitrate_ratio() -> f64 {
    0.75
}
fn default_min_fps() -> f64 {
    3.0
}
fn default_max_fps() -> f64 {
    35.0
}
fn default_fps_ratio() -> f64 {
    0.9
}
fn default_sar_tolerance() -> f64 {
    0.05
}
fn default_height_ratio() -> f64 {
    0.8
}
fn default_bitrate_ratio() -> f64 {
    0.9
}
fn default_fps_correction_tolerance() -> f64 {
    0.5
}
fn default_untrusted_transports() -> Vec<String> {
    ["rtsp", "rtmp", "rtp", "udp", "mms"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Tolerances bounding how far a copied stream may drift from the ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyThresholds {
    #[serde(default = "default_gain_min")]
    pub gain_min: f64,
    #[serde(default = "default_gain_max")]
    pub gain_max: f64,
    /// Target audio bitrate must reach this share of the source bitrate
    #[serde(default = "default_audio_bitrate_ratio")]
    pub audio_bitrate_ratio: f64,
    #[serde(default = "default_min_fps")]
    pub min_fps: f64,
    #[serde(default = "default_max_fps")]
    pub max_fps: f64,
    #[serde(default = "default_fps_ratio")]
    pub fps_ratio: f64,
    #[serde(default = "default_sar_tolerance")]
    pub sar_tolerance: f64,
    #[serde(default = "default_height_ratio")]
    pub height_ratio: f64,
    #[serde(default = "default_bitrate_ratio")]
    pub bitrate_ratio: f64,
    /// fps gap between average and nominal rate that calls for correction
    #[serde(default = "default_fps_correction_tolerance")]
    pub fps_correction_tolerance: f64,
    #[serde(default = "default_untrusted_transports")]
    pub untrusted_transports: Vec<String>,
}

impl Default for CopyThresholds {
    fn default() -> Self {
        Self {
            gain_min: default_gain_min(),
            gain_max: default_gain_max(),
            audio_bitrate_ratio: default_audio_bitrate_ratio(),
            min_fps: default_min_fps(),
            max_fps: default_max_fps(),
            fps_ratio: default_fps_ratio(),
            sar_tolerance: default_sar_tolerance(),
            height_ratio: default_height_ratio(),
            bitrate_ratio: default_bitrate_ratio(),
            fps_correction_tolerance: default_fps_correction_tolerance(),
            untrusted_transports: default_untrusted_transports(),
        }
    }
}

/// Bitstream filters applied to copied packets, in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filter", rename_all = "snake_case")]
pub enum BitstreamFilter {
    /// Length-prefixed (MP4/MKV) to Annex B start codes
    Mp4ToAnnexB,
    /// Repairs SPS/PPS placement for segmenting consumers
    H264Fixup,
    /// Rewrites timestamps to the measured average rate
    FrameRateCorrection { fps: Rational },
}

impl BitstreamFilter {
    pub fn name(&self) -> &'static str {
        match self {
            BitstreamFilter::Mp4ToAnnexB => "h264_mp4toannexb",
            BitstreamFilter::H264Fixup => "h264_metadata",
            BitstreamFilter::FrameRateCorrection { .. } => "setts",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    CopyDisabled,
    GainAdjustment { gain: f64 },
    UntrustedTransport { scheme: String },
    CodecUnsupported { codec: String },
    BitrateAboveCeiling { bitrate: u64, ceiling: u64 },
    ChannelCount { channels: u32 },
    TargetBitrateTooLow { target: u64, source: u64 },
    SubtitleBurnIn,
    StillImage,
    SegmentBudgetExceeded { bytes_per_second: u64, budget: u64 },
    LevelAboveCeiling { level: i32, ceiling: i32 },
    ProfileAboveCeiling { profile: String, ceiling: String },
    FrameRateOutOfRange { fps: f64 },
    TargetFrameRateTooLow { target: f64, measured: f64 },
    NonSquarePixels { sar: f64 },
    TargetHeightTooLow { target: u32, source: u32 },
    NoVideoTarget,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::CopyDisabled => write!(f, "copy disabled by client"),
            RejectReason::GainAdjustment { gain } => write!(f, "gain {:.2} needs decoding", gain),
            RejectReason::UntrustedTransport { scheme } => {
                write!(f, "{} transport not trusted for remux", scheme)
            }
            RejectReason::CodecUnsupported { codec } => write!(f, "codec {} not supported", codec),
            RejectReason::BitrateAboveCeiling { bitrate, ceiling } => {
                write!(f, "bitrate {} above ceiling {}", bitrate, ceiling)
            }
            RejectReason::ChannelCount { channels } => {
                write!(f, "{} channels not copyable", channels)
            }
            RejectReason::TargetBitrateTooLow { target, source } => {
                write!(f, "target bitrate {} too low for source {}", target, source)
            }
            RejectReason::SubtitleBurnIn => write!(f, "subtitle burn-in pending"),
            RejectReason::StillImage => write!(f, "still image mode"),
            RejectReason::SegmentBudgetExceeded {
                bytes_per_second,
                budget,
            } => write!(
                f,
                "segment byte rate {}/s over budget {}/s",
                bytes_per_second, budget
            ),
            RejectReason::LevelAboveCeiling { level, ceiling } => {
                write!(f, "level {} above {}", level, ceiling)
            }
            RejectReason::ProfileAboveCeiling { profile, ceiling } => {
                write!(f, "profile {} above {}", profile, ceiling)
            }
            RejectReason::FrameRateOutOfRange { fps } => {
                write!(f, "average frame rate {:.3} out of range", fps)
            }
            RejectReason::TargetFrameRateTooLow { target, measured } => {
                write!(f, "target fps {:.3} below measured {:.3}", target, measured)
            }
            RejectReason::NonSquarePixels { sar } => write!(f, "sample aspect ratio {:.3}", sar),
            RejectReason::TargetHeightTooLow { target, source } => {
                write!(f, "target height {} too far below source {}", target, source)
            }
            RejectReason::NoVideoTarget => write!(f, "no video target resolved"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyPlan {
    pub codec: String,
    pub filters: Vec<BitstreamFilter>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum CopyVerdict {
    Accept(CopyPlan),
    Reject(RejectReason),
}

impl CopyVerdict {
    pub fn is_copy(&self) -> bool {
        matches!(self, CopyVerdict::Accept(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    Copy,
    Encode,
    Suppressed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EncodeTarget {
    Video(VideoTarget),
    Audio(AudioTarget),
}

/// Per-stream outcome of planning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum StreamDecision {
    Copy(CopyPlan),
    Encode(EncodeTarget),
    Suppressed,
}

impl StreamDecision {
    pub fn mode(&self) -> StreamMode {
        match self {
            StreamDecision::Copy(_) => StreamMode::Copy,
            StreamDecision::Encode(_) => StreamMode::Encode,
            StreamDecision::Suppressed => StreamMode::Suppressed,
        }
    }
}

/// Session flags the video decision depends on
#[derive(Debug, Clone, Default)]
pub struct VideoCopyContext {
    pub burn_subtitles: bool,
    pub subtitle_override: Option<PathBuf>,
    /// Album art or still image output
    pub still_image: bool,
    /// Bits per second of the audio muxed next to the video
    pub audio_bitrate: u64,
    /// Opt-in for the frame-rate correction filter
    pub fix_frame_rate: bool,
}

pub struct StreamCopyDecider<'a> {
    thresholds: &'a CopyThresholds,
}

impl<'a> StreamCopyDecider<'a> {
    pub fn new(thresholds: &'a CopyThresholds) -> Self {
        Self { thresholds }
    }

    pub fn decide_audio_copy(
        &self,
        profile: &CapabilityProfile,
        source: &SourceProbe,
        stream: &StreamProps,
        target_bitrate: u64,
        gain: &mut f64,
    ) -> bool {
        self.check_audio_copy(profile, source, stream, target_bitrate, gain)
            .is_copy()
    }

    /// On acceptance the staged `gain` is reset to neutral; copy cannot apply it.
    pub fn check_audio_copy(
        &self,
        profile: &CapabilityProfile,
        source: &SourceProbe,
        stream: &StreamProps,
        target_bitrate: u64,
        gain: &mut f64,
    ) -> CopyVerdict {
        let t = self.thresholds;

        if !(t.gain_min..=t.gain_max).contains(&*gain) {
            return CopyVerdict::Reject(RejectReason::GainAdjustment { gain: *gain });
        }

        if source.is_untrusted_transport(&t.untrusted_transports) {
            return CopyVerdict::Reject(RejectReason::UntrustedTransport {
                scheme: source.transport_scheme().unwrap_or_default(),
            });
        }

        if !profile.audio.allow_audio_copy {
            return CopyVerdict::Reject(RejectReason::CopyDisabled);
        }

        let Some(audio) = stream.audio() else {
            return CopyVerdict::Reject(RejectReason::CodecUnsupported {
                codec: stream.codec.clone(),
            });
        };

        match profile.audio.ceilings.ceiling(&audio.codec) {
            BitrateCeiling::Unsupported => {
                return CopyVerdict::Reject(RejectReason::CodecUnsupported {
                    codec: audio.codec.name().to_string(),
                });
            }
            BitrateCeiling::Max(ceiling) if stream.bitrate > ceiling => {
                return CopyVerdict::Reject(RejectReason::BitrateAboveCeiling {
                    bitrate: stream.bitrate,
                    ceiling,
                });
            }
            _ => {}
        }

        if !audio.codec.is_surround_passthrough() {
            if !(1..=2).contains(&audio.channels) {
                return CopyVerdict::Reject(RejectReason::ChannelCount {
                    channels: audio.channels,
                });
            }
            if (target_bitrate as f64) < t.audio_bitrate_ratio * stream.bitrate as f64 {
                return CopyVerdict::Reject(RejectReason::TargetBitrateTooLow {
                    target: target_bitrate,
                    source: stream.bitrate,
                });
            }
        }

        *gain = 1.0;
        CopyVerdict::Accept(CopyPlan {
            codec: stream.codec.clone(),
            filters: Vec::new(),
        })
    }

    pub fn decide_video_copy(
        &self,
        profile: &CapabilityProfile,
        source: &SourceProbe,
        stream: &StreamProps,
        target: Option<&VideoTarget>,
        context: &VideoCopyContext,
        measured_avg_fps: f64,
    ) -> bool {
        self.check_video_copy(profile, source, stream, target, context, measured_avg_fps)
            .is_copy()
    }

    pub fn check_video_copy(
        &self,
        profile: &CapabilityProfile,
        source: &SourceProbe,
        stream: &StreamProps,
        target: Option<&VideoTarget>,
        context: &VideoCopyContext,
        measured_avg_fps: f64,
    ) -> CopyVerdict {
        let t = self.thresholds;
        let caps = &profile.video;

        if !caps.allow_video_copy {
            return CopyVerdict::Reject(RejectReason::CopyDisabled);
        }

        if context.burn_subtitles || context.subtitle_override.is_some() {
            return CopyVerdict::Reject(RejectReason::SubtitleBurnIn);
        }

        if context.still_image {
            return CopyVerdict::Reject(RejectReason::StillImage);
        }

        if caps.max_segment_bytes_per_second > 0 {
            let bits = context.audio_bitrate + source.container_bitrate.max(stream.bitrate);
            let bytes_per_second = bits / 8;
            if bytes_per_second > caps.max_segment_bytes_per_second {
                return CopyVerdict::Reject(RejectReason::SegmentBudgetExceeded {
                    bytes_per_second,
                    budget: caps.max_segment_bytes_per_second,
                });
            }
        }

        let video = match stream.video() {
            Some(v) if stream.is_h264() => v,
            _ => {
                return CopyVerdict::Reject(RejectReason::CodecUnsupported {
                    codec: stream.codec.clone(),
                });
            }
        };

        if video.level > caps.level {
            return CopyVerdict::Reject(RejectReason::LevelAboveCeiling {
                level: video.level,
                ceiling: caps.level,
            });
        }
        match video.profile {
            Some(p) if p <= caps.profile => {}
            other => {
                return CopyVerdict::Reject(RejectReason::ProfileAboveCeiling {
                    profile: other.map(|p| p.to_string()).unwrap_or_else(|| "unknown".into()),
                    ceiling: caps.profile.to_string(),
                });
            }
        }

        if !(t.min_fps..=t.max_fps).contains(&measured_avg_fps) {
            return CopyVerdict::Reject(RejectReason::FrameRateOutOfRange {
                fps: measured_avg_fps,
            });
        }

        let Some(target) = target else {
            return CopyVerdict::Reject(RejectReason::NoVideoTarget);
        };

        let target_fps = target.frame_rate.as_f64();
        if target_fps < t.fps_ratio * measured_avg_fps {
            return CopyVerdict::Reject(RejectReason::TargetFrameRateTooLow {
                target: target_fps,
                measured: measured_avg_fps,
            });
        }

        let sar = video.sar();
        if (sar - 1.0).abs() > t.sar_tolerance && !caps.plays_anamorphic {
            return CopyVerdict::Reject(RejectReason::NonSquarePixels { sar });
        }

        if (target.height as f64) < t.height_ratio * video.height as f64 {
            return CopyVerdict::Reject(RejectReason::TargetHeightTooLow {
                target: target.height,
                source: video.height,
            });
        }

        let source_bitrate = source.estimated_bitrate(stream);
        if source_bitrate > 0 {
            if let Some(max_kbps) = target.bitrate_max_kbps {
                let target_bps = max_kbps as u64 * 1000;
                if (target_bps as f64) < t.bitrate_ratio * source_bitrate as f64 {
                    return CopyVerdict::Reject(RejectReason::TargetBitrateTooLow {
                        target: target_bps,
                        source: source_bitrate,
                    });
                }
            }
        }

        let mut filters = vec![BitstreamFilter::Mp4ToAnnexB, BitstreamFilter::H264Fixup];
        let nominal = video.nominal_fps.as_f64();
        if context.fix_frame_rate
            && nominal > 0.0
            && (measured_avg_fps - nominal).abs() > t.fps_correction_tolerance
        {
            filters.push(BitstreamFilter::FrameRateCorrection {
                fps: Rational::from_f64(measured_avg_fps),
            });
        }

        CopyVerdict::Accept(CopyPlan {
            codec: stream.codec.clone(),
            filters,
        })
    }
}
