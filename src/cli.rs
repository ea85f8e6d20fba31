use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ffseg")]
#[command(about = "Segmented transcoder with stream copy and ack-paced output", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Append diagnostics to this file instead of ./ffseg.log
    #[arg(long, global = true, value_name = "FILE", conflicts_with = "log_stderr")]
    pub log_file: Option<PathBuf>,

    /// Write diagnostics to stderr instead of a log file
    #[arg(long, global = true)]
    pub log_stderr: bool,

    /// error, warn, info, debug or trace (overrides config)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Inputs shared by `plan` and `simulate`
#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Source file or URL
    pub source: String,

    /// Quality rung index or label, optionally suffixed `_max`
    #[arg(short, long, default_value = "5")]
    pub quality: String,

    /// Positional capability fields: profile level max_height audio_ceilings
    /// max_segment_bytes_per_sec anamorphic auto_cpu_quality [allow_video_copy]
    /// [allow_audio_copy] [fallback_codec]
    #[arg(long, num_args = 7..=10, value_name = "FIELD", conflicts_with = "caps_file")]
    pub caps: Option<Vec<String>>,

    /// Capability profile as TOML or JSON
    #[arg(long, value_name = "FILE")]
    pub caps_file: Option<PathBuf>,

    /// Read source properties from saved ffprobe JSON instead of running ffprobe
    #[arg(long, value_name = "FILE")]
    pub probe_json: Option<PathBuf>,

    /// Subtitles will be burned into the picture
    #[arg(long)]
    pub burn_subtitles: bool,

    /// External subtitle file to burn in
    #[arg(long, value_name = "FILE")]
    pub subtitle_file: Option<PathBuf>,

    /// Output is a still image (album art)
    #[arg(long)]
    pub still_image: bool,

    /// Allow the frame-rate correction filter on copied video
    #[arg(long)]
    pub fix_frame_rate: bool,

    /// Audio volume multiplier
    #[arg(long, default_value_t = 1.0)]
    pub gain: f64,

    /// Override the CPU quality factor (>= 1.0)
    #[arg(long)]
    pub cpu_factor: Option<f64>,

    /// Stop after this many seconds of output
    #[arg(long, value_name = "SECS")]
    pub duration: Option<f64>,

    /// Index of the first segment file
    #[arg(long, default_value_t = 0)]
    pub initial_segment: u32,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Probe a source and print its properties as JSON
    Probe {
        /// Path or URL of the source
        source: String,
    },

    /// Print the quality ladder
    Ladder,

    /// Resolve the quality target and stream decisions without writing output (dry run)
    Plan {
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Run a full segmented session against the synthetic media engine
    Simulate {
        #[command(flatten)]
        session: SessionArgs,

        /// Segment files are written as <BASE>-00000.<ext>, ...
        #[arg(long, default_value = "media", value_name = "BASE")]
        output_base: PathBuf,

        /// Consumer ack channel (host:port)
        #[arg(long, value_name = "ADDR")]
        ack: Option<String>,

        /// POST progress samples to this URL
        #[arg(long, value_name = "URL")]
        progress_url: Option<String>,

        /// Segment length in seconds (overrides config)
        #[arg(long, value_name = "SECS")]
        segment_seconds: Option<f64>,

        /// Segments allowed ahead of the last ack (overrides config)
        #[arg(long, value_name = "N")]
        lead_window: Option<u32>,

        /// Seconds of packets the source actually holds (defaults to the probed duration)
        #[arg(long, value_name = "SECS")]
        real_duration: Option<f64>,

        /// Write session statistics here as JSON
        #[arg(long, value_name = "FILE")]
        stats_json: Option<PathBuf>,

        /// Exit when the parent process goes away
        #[arg(long)]
        watch_parent: bool,
    },

    /// Show config status and location, or create default config if missing
    InitConfig,
}

pub fn parse() -> Cli {
    Cli::parse()
}
