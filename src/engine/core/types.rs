use serde::{Deserialize, Serialize};
use std::fmt;

/// Rational number used for time bases and frame rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

/// MPEG-TS clock; every muxed timestamp is expressed in this base
pub const OUTPUT_TIME_BASE: Rational = Rational::new(1, 90_000);

impl Rational {
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// Approximate a float (e.g. a frame rate) with millesimal precision
    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() || value <= 0.0 {
            return Self::new(0, 1);
        }
        let scaled = (value * 1000.0).round() as i64;
        let divisor = gcd(scaled, 1000);
        Self::new(scaled / divisor, 1000 / divisor)
    }

    /// Parse a fraction like "30000/1001" or a plain number like "25"
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        match s.split_once('/') {
            Some((n, d)) => {
                let num: i64 = n.trim().parse().ok()?;
                let den: i64 = d.trim().parse().ok()?;
                if den == 0 {
                    return None;
                }
                Some(Self::new(num, den))
            }
            None => s.parse::<i64>().ok().map(|n| Self::new(n, 1)),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.num == 0 || self.den == 0
    }

    /// Convert `value` from time base `from` into time base `to`, rounding to nearest
    pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
        let n = value as i128 * from.num as i128 * to.den as i128;
        let d = from.den as i128 * to.num as i128;
        if d == 0 {
            return 0;
        }
        let q = n / d;
        let r = n % d;
        let rounded = if 2 * r.abs() >= d.abs() {
            q + n.signum() * d.signum()
        } else {
            q
        };
        rounded as i64
    }

    /// Seconds to ticks of this time base
    pub fn ticks_from_secs(&self, secs: f64) -> i64 {
        if self.num == 0 {
            return 0;
        }
        (secs * self.den as f64 / self.num as f64).round() as i64
    }

    /// Ticks of this time base to seconds
    pub fn secs_from_ticks(&self, ticks: i64) -> f64 {
        ticks as f64 * self.as_f64()
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.max(1)
}

/// H.264 profile, ordered by profile_idc (baseline < main < extended < high)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum H264Profile {
    Baseline,
    Main,
    Extended,
    High,
}

impl H264Profile {
    pub fn idc(&self) -> u32 {
        match self {
            H264Profile::Baseline => 66,
            H264Profile::Main => 77,
            H264Profile::Extended => 88,
            H264Profile::High => 100,
        }
    }

    /// Accepts ffprobe names ("Constrained Baseline", "High 10") and short names
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        if lower.contains("baseline") {
            Some(H264Profile::Baseline)
        } else if lower.starts_with("main") {
            Some(H264Profile::Main)
        } else if lower.starts_with("extended") {
            Some(H264Profile::Extended)
        } else if lower.starts_with("high") {
            Some(H264Profile::High)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            H264Profile::Baseline => "baseline",
            H264Profile::Main => "main",
            H264Profile::Extended => "extended",
            H264Profile::High => "high",
        }
    }
}

impl fmt::Display for H264Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audio codec families the capability profile can declare ceilings for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Mp3,
    Aac,
    Ac3,
    Dts,
    Pcm,
    Other(String),
}

impl AudioCodec {
    pub fn from_name(name: &str) -> Self {
        let lower = name.trim().to_ascii_lowercase();
        match lower.as_str() {
            "mp3" | "libmp3lame" => AudioCodec::Mp3,
            "aac" | "libfdk_aac" => AudioCodec::Aac,
            "ac3" => AudioCodec::Ac3,
            "dts" | "dca" => AudioCodec::Dts,
            s if s.starts_with("pcm") => AudioCodec::Pcm,
            _ => AudioCodec::Other(lower),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            AudioCodec::Mp3 => "mp3",
            AudioCodec::Aac => "aac",
            AudioCodec::Ac3 => "ac3",
            AudioCodec::Dts => "dts",
            AudioCodec::Pcm => "pcm",
            AudioCodec::Other(name) => name,
        }
    }

    /// Surround-capable codecs are copied with their channel layout intact
    pub fn is_surround_passthrough(&self) -> bool {
        matches!(self, AudioCodec::Ac3 | AudioCodec::Dts | AudioCodec::Pcm)
    }

    /// Highest channel count an encoder for this codec is asked to produce
    pub fn max_encode_channels(&self) -> u32 {
        match self {
            AudioCodec::Ac3 | AudioCodec::Dts | AudioCodec::Pcm => 6,
            _ => 2,
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Subtitle,
    Data,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoProps {
    pub width: u32,
    pub height: u32,
    pub sample_aspect_ratio: Rational,
    pub profile: Option<H264Profile>,
    /// Codec-defined units (H.264: 31 == level 3.1)
    pub level: i32,
    pub nominal_fps: Rational,
    pub average_fps: Rational,
}

impl VideoProps {
    /// Sample aspect ratio as a float; unknown (0/x) counts as square
    pub fn sar(&self) -> f64 {
        if self.sample_aspect_ratio.is_zero() {
            1.0
        } else {
            self.sample_aspect_ratio.as_f64()
        }
    }

    /// Average rate when known, nominal otherwise
    pub fn measured_fps(&self) -> f64 {
        if self.average_fps.is_zero() {
            self.nominal_fps.as_f64()
        } else {
            self.average_fps.as_f64()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioProps {
    pub codec: AudioCodec,
    pub channels: u32,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StreamDetail {
    Video(VideoProps),
    Audio(AudioProps),
    Subtitle,
    Data,
}

/// One elementary stream of the source as reported by the probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamProps {
    pub index: usize,
    pub codec: String,
    /// Bits per second, 0 when the demuxer does not know
    pub bitrate: u64,
    pub time_base: Rational,
    pub detail: StreamDetail,
}

impl StreamProps {
    pub fn kind(&self) -> MediaKind {
        match self.detail {
            StreamDetail::Video(_) => MediaKind::Video,
            StreamDetail::Audio(_) => MediaKind::Audio,
            StreamDetail::Subtitle => MediaKind::Subtitle,
            StreamDetail::Data => MediaKind::Data,
        }
    }

    pub fn video(&self) -> Option<&VideoProps> {
        match &self.detail {
            StreamDetail::Video(v) => Some(v),
            _ => None,
        }
    }

    pub fn audio(&self) -> Option<&AudioProps> {
        match &self.detail {
            StreamDetail::Audio(a) => Some(a),
            _ => None,
        }
    }

    pub fn is_h264(&self) -> bool {
        self.codec.eq_ignore_ascii_case("h264")
    }
}

/// Everything known about the input before the first packet is read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceProbe {
    /// Local path or URL
    pub location: String,
    pub format_name: String,
    pub duration_secs: f64,
    pub size_bytes: u64,
    /// Container-level bitrate in bits per second
    pub container_bitrate: u64,
    pub streams: Vec<StreamProps>,
}

impl SourceProbe {
    pub fn primary_video(&self) -> Option<&StreamProps> {
        self.streams.iter().find(|s| s.kind() == MediaKind::Video)
    }

    pub fn primary_audio(&self) -> Option<&StreamProps> {
        self.streams.iter().find(|s| s.kind() == MediaKind::Audio)
    }

    pub fn stream(&self, index: usize) -> Option<&StreamProps> {
        self.streams.iter().find(|s| s.index == index)
    }

    pub fn audio_bitrate_sum(&self) -> u64 {
        self.streams
            .iter()
            .filter(|s| s.kind() == MediaKind::Audio)
            .map(|s| s.bitrate)
            .sum()
    }

    /// URL scheme of the location ("rtsp", "http", ...) if it has one
    pub fn transport_scheme(&self) -> Option<String> {
        let (scheme, _) = self.location.split_once("://")?;
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(scheme.to_ascii_lowercase())
    }

    pub fn is_untrusted_transport(&self, untrusted: &[String]) -> bool {
        match self.transport_scheme() {
            Some(scheme) => untrusted.iter().any(|u| u.eq_ignore_ascii_case(&scheme)),
            None => false,
        }
    }

    /// Codec bitrate when reported, otherwise estimated from file size and
    /// duration minus the audio tracks
    pub fn estimated_bitrate(&self, stream: &StreamProps) -> u64 {
        if stream.bitrate > 0 {
            return stream.bitrate;
        }
        if self.size_bytes == 0 || self.duration_secs <= 0.0 {
            return 0;
        }
        let total = (self.size_bytes as f64 * 8.0 / self.duration_secs) as u64;
        total.saturating_sub(self.audio_bitrate_sum())
    }
}
