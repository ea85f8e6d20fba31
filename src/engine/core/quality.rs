//! Quality ladder: maps a rung index plus source characteristics to concrete
//! encode parameters.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::capability::CapabilityProfile;
use super::error::{TranscodeError, TranscodeResult};
use super::types::{AudioCodec, Rational, SourceProbe, StreamProps};

/// x264 motion-estimation effort, cheapest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionEstimation {
    Dia,
    Hex,
    Umh,
    Esa,
}

impl MotionEstimation {
    pub fn as_str(&self) -> &'static str {
        match self {
            MotionEstimation::Dia => "dia",
            MotionEstimation::Hex => "hex",
            MotionEstimation::Umh => "umh",
            MotionEstimation::Esa => "esa",
        }
    }

    /// One step cheaper
    pub fn reduced(&self) -> Self {
        match self {
            MotionEstimation::Esa => MotionEstimation::Umh,
            MotionEstimation::Umh => MotionEstimation::Hex,
            _ => MotionEstimation::Dia,
        }
    }
}

impl fmt::Display for MotionEstimation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ladder rung
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rung {
    pub label: String,
    pub max_width: u32,
    pub max_height: u32,
    pub video_kbps: u32,
    pub crf: f64,
    pub motion_estimation: MotionEstimation,
    pub ref_frames: u32,
    /// Sub-pixel refinement effort (x264 subme)
    pub quality_compression: u32,
    pub max_fps: f64,
    /// Per stereo pair
    pub audio_kbps: u32,
}

#[allow(clippy::too_many_arguments)]
fn rung(
    label: &str,
    max_width: u32,
    max_height: u32,
    video_kbps: u32,
    crf: f64,
    motion_estimation: MotionEstimation,
    ref_frames: u32,
    quality_compression: u32,
    max_fps: f64,
    audio_kbps: u32,
) -> Rung {
    Rung {
        label: label.to_string(),
        max_width,
        max_height,
        video_kbps,
        crf,
        motion_estimation,
        ref_frames,
        quality_compression,
        max_fps,
        audio_kbps,
    }
}

/// The 13-rung reference ladder. Rung 0 is the thumbnail/minimal rung.
pub fn reference_ladder() -> Vec<Rung> {
    use MotionEstimation::*;
    vec![
        rung("thumb", 160, 90, 64, 30.0, Dia, 1, 1, 5.0, 48),
        rung("96kbps", 320, 240, 96, 28.0, Dia, 1, 2, 15.0, 48),
        rung("208kbps", 320, 240, 208, 26.0, Hex, 2, 4, 24.0, 64),
        rung("320kbps", 480, 360, 320, 25.0, Hex, 2, 5, 30.0, 64),
        rung("720kbps", 640, 480, 720, 24.0, Hex, 3, 6, 30.0, 96),
        rung("1.5mbps", 1280, 720, 1500, 23.0, Hex, 3, 6, 30.0, 128),
        rung("2mbps", 1280, 720, 2000, 22.0, Umh, 3, 7, 30.0, 128),
        rung("3mbps", 1280, 720, 3000, 21.0, Umh, 4, 7, 60.0, 128),
        rung("4mbps", 1920, 1080, 4000, 21.0, Umh, 4, 7, 60.0, 160),
        rung("8mbps", 1920, 1080, 8000, 20.0, Umh, 4, 8, 60.0, 192),
        rung("10mbps", 1920, 1080, 10000, 19.0, Umh, 5, 8, 60.0, 192),
        rung("12mbps", 1920, 1080, 12000, 18.0, Umh, 5, 9, 60.0, 256),
        rung("20mbps", 1920, 1080, 20000, 17.0, Esa, 6, 9, 60.0, 320),
    ]
}

/// Sources with fewer pixels than `max_width * max_height` get their bitrate
/// scaled by `bitrate_scale` on rungs at or above `scale_from_rung`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionBreakpoint {
    pub max_width: u32,
    pub max_height: u32,
    pub bitrate_scale: f64,
}

impl ResolutionBreakpoint {
    fn pixels(&self) -> u64 {
        self.max_width as u64 * self.max_height as u64
    }
}

fn default_scale_from_rung() -> usize {
    5
}

fn default_breakpoints() -> Vec<ResolutionBreakpoint> {
    vec![
        ResolutionBreakpoint {
            max_width: 640,
            max_height: 480,
            bitrate_scale: 0.5,
        },
        ResolutionBreakpoint {
            max_width: 1280,
            max_height: 720,
            bitrate_scale: 0.75,
        },
    ]
}

fn default_gop_seconds() -> f64 {
    5.0
}

fn default_fast_cpu_threshold() -> f64 {
    2.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderConfig {
    #[serde(default = "default_scale_from_rung")]
    pub scale_from_rung: usize,

    #[serde(default = "default_gop_seconds")]
    pub gop_seconds: f64,

    /// CPU factor at which motion search and reference frames are cut back
    #[serde(default = "default_fast_cpu_threshold")]
    pub fast_cpu_threshold: f64,

    #[serde(default = "default_breakpoints")]
    pub breakpoints: Vec<ResolutionBreakpoint>,

    /// Replaces the reference ladder when non-empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rungs: Vec<Rung>,
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            scale_from_rung: default_scale_from_rung(),
            gop_seconds: default_gop_seconds(),
            fast_cpu_threshold: default_fast_cpu_threshold(),
            breakpoints: default_breakpoints(),
            rungs: Vec::new(),
        }
    }
}

/// A parsed quality name: rung index plus the `_max` open-ended modifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityRequest {
    pub index: usize,
    pub open_ended: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoTarget {
    pub width: u32,
    pub height: u32,
    pub frame_rate: Rational,
    pub crf: f64,
    pub bitrate_min_kbps: u32,
    /// None = open-ended
    pub bitrate_max_kbps: Option<u32>,
    pub motion_estimation: MotionEstimation,
    pub ref_frames: u32,
    pub quality_compression: u32,
    pub gop_length: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTarget {
    pub codec_name: String,
    pub sample_rate: u32,
    pub channels: u32,
    pub bitrate_kbps: u32,
    pub profile: Option<String>,
}

impl AudioTarget {
    pub fn bitrate_bps(&self) -> u64 {
        self.bitrate_kbps as u64 * 1000
    }
}

/// Resolved per-session encode parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityTarget {
    pub quality_index: usize,
    pub open_ended: bool,
    pub video: Option<VideoTarget>,
    pub audio: Option<AudioTarget>,
}

impl QualityTarget {
    /// Copy mode supersedes the encode parameters of the audio stream
    pub fn apply_audio_copy(&mut self, source: &StreamProps) {
        let (channels, sample_rate) = source
            .audio()
            .map(|a| (a.channels, a.sample_rate))
            .unwrap_or((0, 0));
        self.audio = Some(AudioTarget {
            codec_name: source.codec.clone(),
            sample_rate,
            channels,
            bitrate_kbps: (source.bitrate / 1000) as u32,
            profile: None,
        });
    }

    /// Copy mode supersedes the encode parameters of the video stream
    pub fn apply_video_copy(&mut self, source: &StreamProps) {
        let (Some(video), Some(target)) = (source.video(), self.video.as_mut()) else {
            return;
        };
        target.width = video.width;
        target.height = video.height;
        if !video.nominal_fps.is_zero() {
            target.frame_rate = video.nominal_fps;
        }
        if source.bitrate > 0 {
            target.bitrate_max_kbps = Some((source.bitrate / 1000) as u32);
        }
    }

    /// ffmpeg-style argument rendering, used for dry runs and logs
    pub fn encoder_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(v) = &self.video {
            args.extend(["-c:v".to_string(), "libx264".to_string()]);
            args.extend(["-s".to_string(), format!("{}x{}", v.width, v.height)]);
            args.extend(["-r".to_string(), v.frame_rate.to_string()]);
            args.extend(["-crf".to_string(), format!("{:.1}", v.crf)]);
            if let Some(max) = v.bitrate_max_kbps {
                args.extend(["-maxrate".to_string(), format!("{}k", max)]);
                args.extend(["-bufsize".to_string(), format!("{}k", max * 2)]);
            }
            args.extend(["-minrate".to_string(), format!("{}k", v.bitrate_min_kbps)]);
            args.extend(["-me_method".to_string(), v.motion_estimation.to_string()]);
            args.extend(["-refs".to_string(), v.ref_frames.to_string()]);
            args.extend(["-subq".to_string(), v.quality_compression.to_string()]);
            args.extend(["-g".to_string(), v.gop_length.to_string()]);
        }

        if let Some(a) = &self.audio {
            args.extend(["-c:a".to_string(), audio_encoder_name(&a.codec_name)]);
            if let Some(profile) = &a.profile {
                args.extend(["-profile:a".to_string(), profile.clone()]);
            }
            args.extend(["-b:a".to_string(), format!("{}k", a.bitrate_kbps)]);
            args.extend(["-ar".to_string(), a.sample_rate.to_string()]);
            args.extend(["-ac".to_string(), a.channels.to_string()]);
        }

        args
    }
}

fn audio_encoder_name(codec: &str) -> String {
    match AudioCodec::from_name(codec) {
        AudioCodec::Mp3 => "libmp3lame".to_string(),
        other => other.name().to_string(),
    }
}

/// Fit `src` inside `max` without upscaling; both results even
pub fn fit_within(src_w: u32, src_h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if src_w == 0 || src_h == 0 {
        return (0, 0);
    }
    let max_w = max_w.max(2);
    let max_h = max_h.max(2);

    let scale = (max_w as f64 / src_w as f64)
        .min(max_h as f64 / src_h as f64)
        .min(1.0);

    let w = ((src_w as f64 * scale).round() as u32).min(src_w);
    let h = ((src_h as f64 * scale).round() as u32).min(src_h);
    (even_floor(w, src_w), even_floor(h, src_h))
}

fn even_floor(value: u32, source: u32) -> u32 {
    let even = value & !1;
    if even == 0 && source >= 2 { 2 } else { even }
}

pub struct ParameterTable {
    rungs: Vec<Rung>,
    config: LadderConfig,
}

impl ParameterTable {
    pub fn new(config: LadderConfig) -> Self {
        let rungs = if config.rungs.is_empty() {
            reference_ladder()
        } else {
            config.rungs.clone()
        };
        Self { rungs, config }
    }

    pub fn rungs(&self) -> &[Rung] {
        &self.rungs
    }

    /// Accepts an index ("7") or a label ("3mbps"), optionally suffixed `_max`
    pub fn parse_quality(&self, name: &str) -> TranscodeResult<QualityRequest> {
        let trimmed = name.trim();
        let (base, open_ended) = match trimmed.strip_suffix("_max") {
            Some(base) => (base, true),
            None => (trimmed, false),
        };

        let index = match base.parse::<usize>() {
            Ok(i) => Some(i),
            Err(_) => self
                .rungs
                .iter()
                .position(|r| r.label.eq_ignore_ascii_case(base)),
        };

        match index {
            Some(i) if i < self.rungs.len() => Ok(QualityRequest {
                index: i,
                open_ended,
            }),
            _ => Err(TranscodeError::UnknownQualityLevel(name.to_string())),
        }
    }

    pub fn resolve_named(
        &self,
        name: &str,
        probe: &SourceProbe,
        capability: &CapabilityProfile,
        cpu_factor: f64,
    ) -> TranscodeResult<QualityTarget> {
        let request = self.parse_quality(name)?;
        self.resolve(request, probe, capability, cpu_factor)
    }

    pub fn resolve(
        &self,
        request: QualityRequest,
        probe: &SourceProbe,
        capability: &CapabilityProfile,
        cpu_factor: f64,
    ) -> TranscodeResult<QualityTarget> {
        let rung = self
            .rungs
            .get(request.index)
            .ok_or_else(|| TranscodeError::UnknownQualityLevel(request.index.to_string()))?;

        let video = probe
            .primary_video()
            .map(|stream| self.resolve_video(request, rung, stream, capability, cpu_factor));
        let audio = probe
            .primary_audio()
            .map(|stream| self.resolve_audio(request, rung, stream, capability));

        tracing::debug!(
            rung = request.index,
            label = %rung.label,
            open_ended = request.open_ended,
            cpu_factor,
            "resolved quality target"
        );

        Ok(QualityTarget {
            quality_index: request.index,
            open_ended: request.open_ended,
            video,
            audio,
        })
    }

    /// Breakpoint applying to a source of `width x height`, if any
    fn breakpoint_for(&self, index: usize, width: u32, height: u32) -> Option<&ResolutionBreakpoint> {
        if index == 0 || index < self.config.scale_from_rung {
            return None;
        }
        let pixels = width as u64 * height as u64;
        let mut sorted: Vec<&ResolutionBreakpoint> = self.config.breakpoints.iter().collect();
        sorted.sort_by_key(|bp| bp.pixels());
        sorted.into_iter().find(|bp| pixels < bp.pixels())
    }

    fn resolve_video(
        &self,
        request: QualityRequest,
        rung: &Rung,
        stream: &StreamProps,
        capability: &CapabilityProfile,
        cpu_factor: f64,
    ) -> VideoTarget {
        let (src_w, src_h, src_fps) = stream
            .video()
            .map(|v| (v.width, v.height, v.nominal_fps))
            .unwrap_or((0, 0, Rational::new(0, 1)));

        let mut box_w = rung.max_width;
        let mut box_h = rung.max_height;
        let mut bitrate_scale = 1.0;

        if let Some(bp) = self.breakpoint_for(request.index, src_w, src_h) {
            box_w = box_w.min(bp.max_width);
            box_h = box_h.min(bp.max_height);
            bitrate_scale = bp.bitrate_scale;
        }

        let ceiling = capability.video.max_resolution_height;
        if ceiling > 0 {
            box_h = box_h.min(ceiling);
        }

        let (width, height) = fit_within(src_w, src_h, box_w, box_h);

        let frame_rate = if request.index == 0 {
            Rational::from_f64(rung.max_fps)
        } else if src_fps.is_zero() || src_fps.as_f64() > rung.max_fps {
            Rational::from_f64(rung.max_fps)
        } else {
            src_fps
        };

        let cpu_factor = cpu_factor.max(1.0);
        let crf = ((rung.crf * cpu_factor).min(51.0) * 10.0).round() / 10.0;

        let mut motion_estimation = rung.motion_estimation;
        let mut ref_frames = rung.ref_frames;
        let mut quality_compression = rung.quality_compression;
        if cpu_factor >= self.config.fast_cpu_threshold {
            motion_estimation = motion_estimation.reduced();
            ref_frames = ref_frames.min(2);
            quality_compression = quality_compression.saturating_sub(2).max(1);
        }

        let kbps = (rung.video_kbps as f64 * bitrate_scale).round() as u32;
        let gop_length = (frame_rate.as_f64() * self.config.gop_seconds).round().max(1.0) as u32;

        VideoTarget {
            width,
            height,
            frame_rate,
            crf,
            bitrate_min_kbps: kbps / 2,
            bitrate_max_kbps: if request.open_ended { None } else { Some(kbps) },
            motion_estimation,
            ref_frames,
            quality_compression,
            gop_length,
        }
    }

    fn resolve_audio(
        &self,
        request: QualityRequest,
        rung: &Rung,
        stream: &StreamProps,
        capability: &CapabilityProfile,
    ) -> AudioTarget {
        let codec = AudioCodec::from_name(&capability.audio.fallback_codec);
        let (src_channels, src_rate) = stream
            .audio()
            .map(|a| (a.channels, a.sample_rate))
            .unwrap_or((2, 48_000));

        let channels = if src_channels == 0 { 2 } else { src_channels }
            .min(codec.max_encode_channels());
        let sample_rate = if src_rate == 0 { 48_000 } else { src_rate.min(48_000) };

        let mut bitrate_kbps = rung.audio_kbps;
        if channels > 2 {
            bitrate_kbps = rung.audio_kbps * channels / 2;
        }
        if request.open_ended {
            let source_kbps = (stream.bitrate / 1000) as u32;
            bitrate_kbps = bitrate_kbps.max(source_kbps).min(640);
        }

        let profile = match codec {
            AudioCodec::Aac => Some("aac_low".to_string()),
            _ => None,
        };

        AudioTarget {
            codec_name: codec.name().to_string(),
            sample_rate,
            channels,
            bitrate_kbps,
            profile,
        }
    }
}

impl Default for ParameterTable {
    fn default() -> Self {
        Self::new(LadderConfig::default())
    }
}
