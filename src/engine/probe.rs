// Source probing using ffprobe

use anyhow::Context;
use serde::Deserialize;
use std::process::Command;

use super::core::{
    AudioCodec, AudioProps, H264Profile, Rational, SourceProbe, StreamDetail, StreamProps,
    TranscodeError, TranscodeResult, VideoProps,
};

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: usize,
    codec_type: Option<String>,
    codec_name: Option<String>,
    profile: Option<String>,
    level: Option<i32>,
    width: Option<u32>,
    height: Option<u32>,
    sample_aspect_ratio: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    bit_rate: Option<String>,
    time_base: Option<String>,
    channels: Option<u32>,
    sample_rate: Option<String>,
}

/// Run ffprobe against a path or URL
pub fn probe_source(location: &str) -> TranscodeResult<SourceProbe> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(location)
        .output()
        .context("Failed to execute ffprobe")
        .map_err(|e| TranscodeError::SourceProbe(format!("{:#}", e)))?;

    if !output.status.success() {
        return Err(TranscodeError::SourceProbe(format!(
            "ffprobe failed for {}: {}",
            location,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_ffprobe_json(location, &String::from_utf8_lossy(&output.stdout))
}

pub fn parse_ffprobe_json(location: &str, json: &str) -> TranscodeResult<SourceProbe> {
    let probe: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| TranscodeError::SourceProbe(format!("invalid ffprobe JSON: {}", e)))?;

    let format = probe.format.ok_or_else(|| {
        TranscodeError::SourceProbe(format!("no format section for {}", location))
    })?;

    let streams: Vec<StreamProps> = probe.streams.into_iter().map(convert_stream).collect();

    tracing::debug!(
        location,
        streams = streams.len(),
        duration = ?format.duration,
        "probed source"
    );

    Ok(SourceProbe {
        location: location.to_string(),
        format_name: format.format_name.unwrap_or_default(),
        duration_secs: parse_number(format.duration.as_deref()).unwrap_or(0.0),
        size_bytes: parse_number(format.size.as_deref()).unwrap_or(0.0) as u64,
        container_bitrate: parse_number(format.bit_rate.as_deref()).unwrap_or(0.0) as u64,
        streams,
    })
}

fn convert_stream(s: FfprobeStream) -> StreamProps {
    let codec = s.codec_name.clone().unwrap_or_else(|| "unknown".to_string());
    let time_base = s
        .time_base
        .as_deref()
        .and_then(Rational::parse)
        .unwrap_or(Rational::new(1, 90_000));
    let bitrate = parse_number(s.bit_rate.as_deref()).unwrap_or(0.0) as u64;

    let detail = match s.codec_type.as_deref() {
        Some("video") => StreamDetail::Video(VideoProps {
            width: s.width.unwrap_or(0),
            height: s.height.unwrap_or(0),
            sample_aspect_ratio: s
                .sample_aspect_ratio
                .as_deref()
                .and_then(parse_aspect)
                .unwrap_or(Rational::new(1, 1)),
            profile: s.profile.as_deref().and_then(H264Profile::from_name),
            level: s.level.filter(|l| *l > 0).unwrap_or(0),
            nominal_fps: parse_rate(s.r_frame_rate.as_deref()),
            average_fps: parse_rate(s.avg_frame_rate.as_deref()),
        }),
        Some("audio") => StreamDetail::Audio(AudioProps {
            codec: AudioCodec::from_name(&codec),
            channels: s.channels.unwrap_or(0),
            sample_rate: parse_number(s.sample_rate.as_deref()).unwrap_or(0.0) as u32,
        }),
        Some("subtitle") => StreamDetail::Subtitle,
        _ => StreamDetail::Data,
    };

    StreamProps {
        index: s.index,
        codec,
        bitrate,
        time_base,
        detail,
    }
}

fn parse_number(s: Option<&str>) -> Option<f64> {
    s?.trim().parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
}

/// "0/0" and missing rates come back as zero
fn parse_rate(s: Option<&str>) -> Rational {
    s.and_then(Rational::parse)
        .filter(|r| r.den != 0)
        .unwrap_or(Rational::new(0, 1))
}

/// ffprobe writes aspect ratios as "16:11"; "0:1" and "N/A" mean unknown
fn parse_aspect(s: &str) -> Option<Rational> {
    let (num, den) = s.split_once(':')?;
    let num: i64 = num.trim().parse().ok()?;
    let den: i64 = den.trim().parse().ok()?;
    if num <= 0 || den <= 0 {
        return None;
    }
    Some(Rational::new(num, den))
}
