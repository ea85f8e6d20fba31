//! Client-declared decode capabilities.
//!
//! Built once at session start, either from the positional argument list the
//! media server passes or from a TOML/JSON document, and never mutated after.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{TranscodeError, TranscodeResult};
use super::types::{AudioCodec, H264Profile};

/// Interpretation of a per-codec bitrate ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitrateCeiling {
    Unsupported,
    Unlimited,
    Max(u64),
}

impl BitrateCeiling {
    /// -1 (any negative) = unsupported, 0 = unlimited, >0 = ceiling in bits/s
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            r if r < 0 => BitrateCeiling::Unsupported,
            0 => BitrateCeiling::Unlimited,
            r => BitrateCeiling::Max(r as u64),
        }
    }
}

fn unsupported() -> i64 {
    -1
}

fn default_true() -> bool {
    true
}

fn default_fallback_codec() -> String {
    "aac".to_string()
}

/// Raw ceilings in bits per second, see [`BitrateCeiling::from_raw`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioCeilings {
    #[serde(default = "unsupported")]
    pub mp3: i64,
    #[serde(default = "unsupported")]
    pub aac: i64,
    #[serde(default = "unsupported")]
    pub ac3: i64,
    #[serde(default = "unsupported")]
    pub dts: i64,
    #[serde(default = "unsupported")]
    pub pcm: i64,
}

impl Default for AudioCeilings {
    fn default() -> Self {
        Self {
            mp3: 0,
            aac: 0,
            ac3: -1,
            dts: -1,
            pcm: -1,
        }
    }
}

impl AudioCeilings {
    fn none() -> Self {
        Self {
            mp3: -1,
            aac: -1,
            ac3: -1,
            dts: -1,
            pcm: -1,
        }
    }

    pub fn ceiling(&self, codec: &AudioCodec) -> BitrateCeiling {
        let raw = match codec {
            AudioCodec::Mp3 => self.mp3,
            AudioCodec::Aac => self.aac,
            AudioCodec::Ac3 => self.ac3,
            AudioCodec::Dts => self.dts,
            AudioCodec::Pcm => self.pcm,
            AudioCodec::Other(_) => -1,
        };
        BitrateCeiling::from_raw(raw)
    }

    fn slot_mut(&mut self, name: &str) -> Option<&mut i64> {
        match name {
            "mp3" => Some(&mut self.mp3),
            "aac" => Some(&mut self.aac),
            "ac3" => Some(&mut self.ac3),
            "dts" => Some(&mut self.dts),
            "pcm" => Some(&mut self.pcm),
            _ => None,
        }
    }
}

/// Parse `name=bitrate,name=bitrate,...`. Codecs not listed are unsupported.
pub fn parse_audio_ceilings(spec: &str) -> TranscodeResult<AudioCeilings> {
    let mut ceilings = AudioCeilings::none();

    for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, bitrate) = entry
            .split_once('=')
            .ok_or_else(|| TranscodeError::malformed("audio_ceilings", entry))?;

        let name = name.trim().to_ascii_lowercase();
        let value: i64 = bitrate
            .trim()
            .parse()
            .map_err(|_| TranscodeError::malformed("audio_ceilings", entry))?;

        let slot = ceilings
            .slot_mut(&name)
            .ok_or_else(|| TranscodeError::malformed("audio_ceilings", entry))?;
        *slot = value;
    }

    Ok(ceilings)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoCapability {
    pub profile: H264Profile,
    pub level: i32,
    /// 0 = no ceiling
    #[serde(default)]
    pub max_resolution_height: u32,
    #[serde(default = "default_true")]
    pub allow_video_copy: bool,
    /// 0 = no budget
    #[serde(default)]
    pub max_segment_bytes_per_second: u64,
    #[serde(default)]
    pub plays_anamorphic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioCapability {
    #[serde(default = "default_true")]
    pub allow_audio_copy: bool,
    #[serde(default = "default_fallback_codec")]
    pub fallback_codec: String,
    #[serde(default)]
    pub ceilings: AudioCeilings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityProfile {
    /// Measure the CPU quality factor instead of assuming reference hardware
    #[serde(default)]
    pub auto_cpu_quality: bool,
    pub video: VideoCapability,
    pub audio: AudioCapability,
}

impl Default for CapabilityProfile {
    fn default() -> Self {
        Self {
            auto_cpu_quality: false,
            video: VideoCapability {
                profile: H264Profile::High,
                level: 41,
                max_resolution_height: 1080,
                allow_video_copy: true,
                max_segment_bytes_per_second: 0,
                plays_anamorphic: false,
            },
            audio: AudioCapability {
                ceilings: AudioCeilings::default(),
                allow_audio_copy: true,
                fallback_codec: default_fallback_codec(),
            },
        }
    }
}

impl CapabilityProfile {
    /// Parse the positional argument list:
    ///
    /// `profile level max_height audio_ceilings max_segment_bytes_per_sec
    /// anamorphic auto_cpu_quality [allow_video_copy] [allow_audio_copy]
    /// [fallback_codec]`
    pub fn parse_positional<S: AsRef<str>>(args: &[S]) -> TranscodeResult<Self> {
        const REQUIRED: usize = 7;
        if args.len() < REQUIRED {
            return Err(TranscodeError::malformed(
                "arguments",
                format!("expected at least {} values, got {}", REQUIRED, args.len()),
            ));
        }
        let arg = |i: usize| args[i].as_ref().trim();

        let profile = H264Profile::from_name(arg(0))
            .ok_or_else(|| TranscodeError::malformed("profile", arg(0)))?;
        let level = parse_level(arg(1))?;
        let max_resolution_height: u32 = arg(2)
            .parse()
            .map_err(|_| TranscodeError::malformed("max_height", arg(2)))?;
        let ceilings = parse_audio_ceilings(arg(3))?;
        let max_segment_bytes_per_second: u64 = arg(4)
            .parse()
            .map_err(|_| TranscodeError::malformed("max_segment_bytes_per_second", arg(4)))?;
        let plays_anamorphic = parse_flag("anamorphic", arg(5))?;
        let auto_cpu_quality = parse_flag("auto_cpu_quality", arg(6))?;

        let allow_video_copy = match args.get(7) {
            Some(v) => parse_flag("allow_video_copy", v.as_ref())?,
            None => true,
        };
        let allow_audio_copy = match args.get(8) {
            Some(v) => parse_flag("allow_audio_copy", v.as_ref())?,
            None => true,
        };
        let fallback_codec = args
            .get(9)
            .map(|v| v.as_ref().trim().to_ascii_lowercase())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_fallback_codec);

        Ok(Self {
            video: VideoCapability {
                profile,
                level,
                max_resolution_height,
                allow_video_copy,
                max_segment_bytes_per_second,
                plays_anamorphic,
            },
            audio: AudioCapability {
                ceilings,
                allow_audio_copy,
                fallback_codec,
            },
            auto_cpu_quality,
        })
    }

    /// Load a capability document; `.json` files are JSON, anything else TOML
    pub fn load(path: &Path) -> TranscodeResult<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| TranscodeError::io(path, e))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        if is_json {
            serde_json::from_str(&contents)
                .map_err(|e| TranscodeError::malformed("document", e.to_string()))
        } else {
            toml::from_str(&contents)
                .map_err(|e| TranscodeError::malformed("document", e.to_string()))
        }
    }
}

/// "31" or "3.1" both mean level 3.1
fn parse_level(value: &str) -> TranscodeResult<i32> {
    if value.contains('.') {
        let level: f64 = value
            .parse()
            .map_err(|_| TranscodeError::malformed("level", value))?;
        return Ok((level * 10.0).round() as i32);
    }
    value
        .parse()
        .map_err(|_| TranscodeError::malformed("level", value))
}

fn parse_flag(field: &str, value: &str) -> TranscodeResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(TranscodeError::malformed(field, value)),
    }
}
