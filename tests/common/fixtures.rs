#![allow(dead_code)]

use ffseg::config::Config;
use ffseg::engine::{
    AudioCodec, AudioProps, CapabilityProfile, H264Profile, Rational, Session, SessionOptions,
    SourceProbe, StreamDetail, StreamProps, TranscodeResult, VideoProps,
};

pub const VIDEO_TIME_BASE: Rational = Rational::new(1, 90_000);
pub const AUDIO_TIME_BASE: Rational = Rational::new(1, 48_000);

pub struct VideoSpec {
    pub width: u32,
    pub height: u32,
    pub profile: H264Profile,
    pub level: i32,
    pub fps: Rational,
    pub sar: Rational,
    pub bitrate: u64,
}

pub fn video_stream(index: usize, spec: VideoSpec) -> StreamProps {
    StreamProps {
        index,
        codec: "h264".to_string(),
        bitrate: spec.bitrate,
        time_base: VIDEO_TIME_BASE,
        detail: StreamDetail::Video(VideoProps {
            width: spec.width,
            height: spec.height,
            sample_aspect_ratio: spec.sar,
            profile: Some(spec.profile),
            level: spec.level,
            nominal_fps: spec.fps,
            average_fps: spec.fps,
        }),
    }
}

pub fn audio_stream(index: usize, codec: AudioCodec, channels: u32, bitrate: u64) -> StreamProps {
    StreamProps {
        index,
        codec: codec.name().to_string(),
        bitrate,
        time_base: AUDIO_TIME_BASE,
        detail: StreamDetail::Audio(AudioProps {
            codec,
            channels,
            sample_rate: 48_000,
        }),
    }
}

pub fn subtitle_stream(index: usize) -> StreamProps {
    StreamProps {
        index,
        codec: "subrip".to_string(),
        bitrate: 0,
        time_base: Rational::new(1, 1000),
        detail: StreamDetail::Subtitle,
    }
}

pub fn source(location: &str, duration_secs: f64, streams: Vec<StreamProps>) -> SourceProbe {
    SourceProbe {
        location: location.to_string(),
        format_name: "mpegts".to_string(),
        duration_secs,
        size_bytes: 0,
        container_bitrate: 0,
        streams,
    }
}

/// 720p Baseline 3.0 at 24 fps, 1.5 Mbps, with 128k stereo AAC
pub fn baseline_720p(duration_secs: f64, sar: Rational) -> SourceProbe {
    source(
        "/media/clip.mp4",
        duration_secs,
        vec![
            video_stream(
                0,
                VideoSpec {
                    width: 1280,
                    height: 720,
                    profile: H264Profile::Baseline,
                    level: 30,
                    fps: Rational::new(24, 1),
                    sar,
                    bitrate: 1_500_000,
                },
            ),
            audio_stream(1, AudioCodec::Aac, 2, 128_000),
        ],
    )
}

/// 1080p High 4.1 at 25 fps, 6 Mbps, 5.1 AC3 and a subtitle track
pub fn hd_movie(duration_secs: f64) -> SourceProbe {
    source(
        "/media/movie.mkv",
        duration_secs,
        vec![
            video_stream(
                0,
                VideoSpec {
                    width: 1920,
                    height: 1080,
                    profile: H264Profile::High,
                    level: 41,
                    fps: Rational::new(25, 1),
                    sar: Rational::new(1, 1),
                    bitrate: 6_000_000,
                },
            ),
            audio_stream(1, AudioCodec::Ac3, 6, 448_000),
            subtitle_stream(2),
        ],
    )
}

pub fn caps(fields: &[&str]) -> CapabilityProfile {
    CapabilityProfile::parse_positional(fields).unwrap()
}

pub fn main_31_caps() -> CapabilityProfile {
    caps(&["main", "31", "720", "aac=0", "0", "0", "0"])
}

pub fn hd_caps() -> CapabilityProfile {
    caps(&["high", "41", "1080", "aac=0,ac3=0", "0", "0", "0"])
}

pub fn prepare(
    probe: SourceProbe,
    capability: CapabilityProfile,
    options: SessionOptions,
) -> TranscodeResult<Session> {
    Session::prepare(probe, capability, options, &Config::default())
}

pub fn options(quality: &str, output_base: std::path::PathBuf) -> SessionOptions {
    SessionOptions {
        quality: quality.to_string(),
        output_base,
        cpu_factor: Some(1.0),
        ..Default::default()
    }
}
