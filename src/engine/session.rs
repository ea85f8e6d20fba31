//! Per-invocation transcode context.
//!
//! A `Session` is built once from the probe, the client capabilities and the
//! caller's options. It resolves the quality target, settles every stream's
//! copy/encode/suppress decision and fixes the output stream mapping. The
//! scheduler only reads it.

use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

use crate::config::Config;

use super::core::{
    CapabilityProfile, CopyVerdict, EncodeTarget, MediaKind, ParameterTable, QualityTarget,
    SegmentNaming, SourceProbe, StreamCopyDecider, StreamDecision, StreamMode, TranscodeError,
    TranscodeResult, VideoCopyContext,
};
use super::hardware;
use super::media::OutputStream;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Rung index or label, optionally suffixed `_max`
    pub quality: String,
    pub initial_segment: u32,
    pub output_base: PathBuf,
    pub burn_subtitles: bool,
    pub subtitle_override: Option<PathBuf>,
    pub still_image: bool,
    pub fix_frame_rate: bool,
    /// Audio volume multiplier requested by the caller
    pub gain: f64,
    /// Overrides the measured or reference CPU factor
    pub cpu_factor: Option<f64>,
    /// Stop after this many seconds of output
    pub duration_limit: Option<f64>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            quality: "5".to_string(),
            initial_segment: 0,
            output_base: PathBuf::from("media"),
            burn_subtitles: false,
            subtitle_override: None,
            still_image: false,
            fix_frame_rate: false,
            gain: 1.0,
            cpu_factor: None,
            duration_limit: None,
        }
    }
}

/// What happened to one source stream, for dry runs and logs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamPlan {
    pub source_index: usize,
    pub codec: String,
    pub kind: MediaKind,
    pub mode: StreamMode,
    pub output_index: Option<usize>,
    /// Why copy was rejected, when it was considered
    pub copy_rejected: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionPlan<'a> {
    pub id: Uuid,
    pub location: &'a str,
    pub quality_index: usize,
    pub open_ended: bool,
    pub cpu_factor: f64,
    pub audio_gain: f64,
    pub output_duration_secs: f64,
    pub target: &'a QualityTarget,
    pub encoder_args: Vec<String>,
    pub streams: &'a [StreamPlan],
    pub outputs: &'a [OutputStream],
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub options: SessionOptions,
    pub probe: SourceProbe,
    pub capability: CapabilityProfile,
    pub target: QualityTarget,
    pub cpu_factor: f64,
    /// Gain still to be applied; copy resets it to 1.0
    pub audio_gain: f64,
    pub outputs: Vec<OutputStream>,
    pub streams: Vec<StreamPlan>,
}

impl Session {
    pub fn prepare(
        probe: SourceProbe,
        capability: CapabilityProfile,
        options: SessionOptions,
        config: &Config,
    ) -> TranscodeResult<Self> {
        if probe.primary_video().is_none() && probe.primary_audio().is_none() {
            return Err(TranscodeError::SourceProbe(format!(
                "{} has no audio or video streams",
                probe.location
            )));
        }

        let cpu_factor = match options.cpu_factor {
            Some(f) => f.max(1.0),
            None if capability.auto_cpu_quality => hardware::cpu_quality_factor(),
            None => 1.0,
        };

        let table = ParameterTable::new(config.ladder.clone());
        let mut target = table.resolve_named(&options.quality, &probe, &capability, cpu_factor)?;

        let decider = StreamCopyDecider::new(&config.copy);
        let mut audio_gain = options.gain;
        let mut decisions: Vec<(StreamDecision, Option<String>)> =
            vec![(StreamDecision::Suppressed, None); probe.streams.len()];

        let audio_pos = probe
            .streams
            .iter()
            .position(|s| s.kind() == MediaKind::Audio);
        let video_pos = probe
            .streams
            .iter()
            .position(|s| s.kind() == MediaKind::Video);

        // Audio first: a copied audio track changes the video byte budget
        if let (Some(pos), Some(audio_target)) = (audio_pos, target.audio.clone()) {
            let stream = &probe.streams[pos];
            let verdict = decider.check_audio_copy(
                &capability,
                &probe,
                stream,
                audio_target.bitrate_bps(),
                &mut audio_gain,
            );
            decisions[pos] = match verdict {
                CopyVerdict::Accept(plan) => {
                    target.apply_audio_copy(stream);
                    (StreamDecision::Copy(plan), None)
                }
                CopyVerdict::Reject(reason) => (
                    StreamDecision::Encode(EncodeTarget::Audio(audio_target)),
                    Some(reason.to_string()),
                ),
            };
        }

        if let (Some(pos), Some(video_target)) = (video_pos, target.video.clone()) {
            let stream = &probe.streams[pos];
            let context = VideoCopyContext {
                burn_subtitles: options.burn_subtitles,
                subtitle_override: options.subtitle_override.clone(),
                still_image: options.still_image,
                audio_bitrate: target.audio.as_ref().map_or(0, |a| a.bitrate_bps()),
                fix_frame_rate: options.fix_frame_rate,
            };
            let measured_fps = stream.video().map_or(0.0, |v| v.measured_fps());
            let verdict = decider.check_video_copy(
                &capability,
                &probe,
                stream,
                Some(&video_target),
                &context,
                measured_fps,
            );
            decisions[pos] = match verdict {
                CopyVerdict::Accept(plan) => {
                    target.apply_video_copy(stream);
                    (StreamDecision::Copy(plan), None)
                }
                CopyVerdict::Reject(reason) => (
                    StreamDecision::Encode(EncodeTarget::Video(video_target)),
                    Some(reason.to_string()),
                ),
            };
        }

        let mut outputs = Vec::new();
        let mut streams = Vec::new();
        for (stream, (decision, rejected)) in probe.streams.iter().zip(decisions) {
            let mode = decision.mode();
            let output_index = if mode == StreamMode::Suppressed {
                None
            } else {
                let gain = match (&decision, stream.kind()) {
                    (StreamDecision::Encode(_), MediaKind::Audio) => audio_gain,
                    _ => 1.0,
                };
                outputs.push(OutputStream {
                    output_index: outputs.len(),
                    source_index: stream.index,
                    kind: stream.kind(),
                    decision,
                    gain,
                });
                Some(outputs.len() - 1)
            };

            tracing::info!(
                stream = stream.index,
                codec = %stream.codec,
                mode = ?mode,
                rejected = rejected.as_deref().unwrap_or("-"),
                "stream decision"
            );

            streams.push(StreamPlan {
                source_index: stream.index,
                codec: stream.codec.clone(),
                kind: stream.kind(),
                mode,
                output_index,
                copy_rejected: rejected,
            });
        }

        Ok(Self {
            id: Uuid::new_v4(),
            options,
            probe,
            capability,
            target,
            cpu_factor,
            audio_gain,
            outputs,
            streams,
        })
    }

    /// Output length in seconds; 0 when the source duration is unknown
    pub fn output_duration_secs(&self) -> f64 {
        let source = self.probe.duration_secs.max(0.0);
        match self.options.duration_limit {
            Some(limit) if source > 0.0 => limit.min(source),
            Some(limit) => limit,
            None => source,
        }
    }

    pub fn naming(&self, extension: &str) -> SegmentNaming {
        SegmentNaming::new(self.options.output_base.clone(), extension)
    }

    pub fn output_for_source(&self, source_index: usize) -> Option<&OutputStream> {
        self.outputs.iter().find(|o| o.source_index == source_index)
    }

    pub fn plan(&self) -> SessionPlan<'_> {
        SessionPlan {
            id: self.id,
            location: &self.probe.location,
            quality_index: self.target.quality_index,
            open_ended: self.target.open_ended,
            cpu_factor: self.cpu_factor,
            audio_gain: self.audio_gain,
            output_duration_secs: self.output_duration_secs(),
            target: &self.target,
            encoder_args: self.target.encoder_args(),
            streams: &self.streams,
            outputs: &self.outputs,
        }
    }
}
