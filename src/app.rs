use crate::cli::{Cli, Commands, SessionArgs};
use anyhow::{Context, Result};
use ffseg::config::Config;
use ffseg::engine::{
    self, AckGate, CapabilityProfile, HttpProgressSink, LogProgressSink, ParameterTable,
    ProgressSink, SegmentScheduler, Session, SessionOptions, SourceProbe, SyntheticEngine,
    TranscodeError,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

const WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);

pub fn run(cli: Cli) {
    let mut config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(2);
        }
    };

    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(file) = cli.log_file {
        config.logging.file = Some(file);
        config.logging.stderr = false;
    }
    if cli.log_stderr {
        config.logging.stderr = true;
    }
    let logging = config.logging.destination().and_then(|log_file| {
        engine::init_logging(log_file.as_deref(), config.logging.tracing_level())
    });
    if let Err(e) = logging {
        eprintln!("Warning: logging disabled: {:#}", e);
        let _ = engine::write_debug_log(&format!("logging setup failed: {:#}", e));
    }

    let result = match cli.command {
        Commands::Probe { source } => handle_probe(&source),
        Commands::Ladder => handle_ladder(&config),
        Commands::Plan { session } => handle_plan(&session, &config),
        Commands::Simulate {
            session,
            output_base,
            ack,
            progress_url,
            segment_seconds,
            lead_window,
            real_duration,
            stats_json,
            watch_parent,
        } => {
            if let Some(secs) = segment_seconds {
                config.segment.segment_seconds = secs;
            }
            if let Some(window) = lead_window {
                config.segment.lead_window = window;
            }
            handle_simulate(SimulateArgs {
                session,
                output_base,
                ack,
                progress_url,
                real_duration,
                stats_json,
                watch_parent,
                config,
            })
        }
        Commands::InitConfig => handle_init_config(),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(exit_code(&e));
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

/// 2 for bad requests, 3 when the source ran dry, 1 otherwise
fn exit_code(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<TranscodeError>() {
        Some(err) if err.is_configuration() => 2,
        Some(err) if err.is_data_insufficient() => 3,
        _ => 1,
    }
}

fn load_probe(args: &SessionArgs) -> Result<SourceProbe> {
    let probe = match &args.probe_json {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("Failed to read probe file: {}", path.display()))?;
            engine::probe::parse_ffprobe_json(&args.source, &json)?
        }
        None => engine::probe_source(&args.source)?,
    };
    Ok(probe)
}

fn load_capability(args: &SessionArgs) -> Result<CapabilityProfile> {
    let capability = match (&args.caps, &args.caps_file) {
        (Some(fields), _) => CapabilityProfile::parse_positional(fields.as_slice())?,
        (None, Some(path)) => CapabilityProfile::load(path)?,
        (None, None) => CapabilityProfile::default(),
    };
    Ok(capability)
}

fn build_session(args: &SessionArgs, output_base: PathBuf, config: &Config) -> Result<Session> {
    let probe = load_probe(args)?;
    let capability = load_capability(args)?;
    let options = SessionOptions {
        quality: args.quality.clone(),
        initial_segment: args.initial_segment,
        output_base,
        burn_subtitles: args.burn_subtitles || args.subtitle_file.is_some(),
        subtitle_override: args.subtitle_file.clone(),
        still_image: args.still_image,
        fix_frame_rate: args.fix_frame_rate,
        gain: args.gain,
        cpu_factor: args.cpu_factor,
        duration_limit: args.duration,
    };
    Ok(Session::prepare(probe, capability, options, config)?)
}

fn handle_probe(source: &str) -> Result<()> {
    let probe = engine::probe_source(source)?;
    println!("{}", serde_json::to_string_pretty(&probe)?);
    Ok(())
}

fn handle_ladder(config: &Config) -> Result<()> {
    let table = ParameterTable::new(config.ladder.clone());
    println!(
        "{:>3}  {:<8} {:>11} {:>7} {:>5} {:>5} {:>4} {:>5} {:>6}",
        "#", "label", "max size", "kbps", "crf", "me", "refs", "fps", "audio"
    );
    for (index, rung) in table.rungs().iter().enumerate() {
        println!(
            "{:>3}  {:<8} {:>11} {:>7} {:>5} {:>5} {:>4} {:>5} {:>6}",
            index,
            rung.label,
            format!("{}x{}", rung.max_width, rung.max_height),
            rung.video_kbps,
            rung.crf,
            rung.motion_estimation.as_str(),
            rung.ref_frames,
            rung.max_fps,
            rung.audio_kbps,
        );
    }
    Ok(())
}

fn handle_plan(args: &SessionArgs, config: &Config) -> Result<()> {
    let session = build_session(args, PathBuf::from("media"), config)?;
    println!("{}", serde_json::to_string_pretty(&session.plan())?);
    Ok(())
}

struct SimulateArgs {
    session: SessionArgs,
    output_base: PathBuf,
    ack: Option<String>,
    progress_url: Option<String>,
    real_duration: Option<f64>,
    stats_json: Option<PathBuf>,
    watch_parent: bool,
    config: Config,
}

fn handle_simulate(args: SimulateArgs) -> Result<()> {
    let SimulateArgs {
        session: session_args,
        output_base,
        ack,
        progress_url,
        real_duration,
        stats_json,
        watch_parent,
        config,
    } = args;

    if let Some(parent) = output_base.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
    }

    let session = build_session(&session_args, output_base, &config)?;

    let gate = match ack {
        Some(addr) => AckGate::connect(
            &addr,
            session.options.initial_segment,
            config.segment.lead_window,
        )?
        .with_failure_limit(config.segment.ack_failure_limit),
        None => AckGate::disabled(),
    };

    let sink: Box<dyn ProgressSink> = match progress_url {
        Some(url) => Box::new(HttpProgressSink::new(url)?),
        None => Box::new(LogProgressSink),
    };

    if watch_parent {
        if let Err(e) = engine::watchdog::spawn_parent_watchdog(WATCHDOG_INTERVAL) {
            tracing::warn!("parent watchdog not started: {}", e);
        }
    }

    let mut media = SyntheticEngine::new(session.probe.clone());
    if let Some(secs) = real_duration {
        media = media.with_real_duration(secs);
    }

    let mut scheduler =
        SegmentScheduler::new(&session, &config.segment, gate).with_progress_sink(sink);
    let stats = scheduler.run(&mut media)?;

    for path in &stats.segments {
        println!("{}", path.display());
    }
    println!("{}", stats.summary());

    if let Some(path) = stats_json {
        stats.save_json(&path)?;
    }
    Ok(())
}

fn handle_init_config() -> Result<()> {
    let path = Config::ensure_default()?;
    let cfg = Config::load_from(&path).context("Config exists but is invalid; fix or remove it")?;
    println!("Config loaded successfully from {}", path.display());
    println!("{}", toml::to_string_pretty(&cfg)?);
    Ok(())
}
