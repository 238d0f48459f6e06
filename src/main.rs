//! SynchroCap - synchronized multi-camera recorder
//!
//! Entry point for a single recording session: converge, schedule a common
//! start, record for the configured duration and print a per-camera report.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use synchrocap::recording::{CoordinatorEvent, WorkerOutcome};
use synchrocap::{Coordinator, RecorderConfig, ReferenceClock, SessionReport, SinkKind, SystemClock};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "synchrocap", version, about = "Record a synchronized multi-camera session")]
struct Args {
    /// Config file (default: <config_dir>/synchrocap/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the default config to the config path and exit
    #[arg(long)]
    init_config: bool,

    /// Seconds between scheduling and the common start
    #[arg(long, value_name = "SECS")]
    delay: Option<f64>,

    /// Recording length in seconds
    #[arg(long, value_name = "SECS")]
    duration: Option<f64>,

    /// Output format: raw (SRAW container) or mp4 (external encoder)
    #[arg(long, value_name = "raw|mp4")]
    format: Option<SinkKind>,

    /// Split raw output every N frames
    #[arg(long, value_name = "N")]
    frames_per_file: Option<u32>,

    /// Directory that receives the session folder
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "synchrocap=info,synchrocap_core=info".into()),
        )
        .init();

    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(RecorderConfig::path);

    if args.init_config {
        RecorderConfig::default()
            .save(&config_path)
            .with_context(|| format!("writing {}", config_path.display()))?;
        println!("Default config written to {}", config_path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = RecorderConfig::load_from(&config_path);
    apply_overrides(&mut config, &args);

    println!(
        "SynchroCap v{} ({}) - {} cameras, {} s after a {} s delay, {} output",
        synchrocap::VERSION,
        synchrocap::BUILD_DATE,
        config.devices.len(),
        config.duration_secs,
        config.start_delay_secs,
        config.output_format
    );

    let report = record(&config)?;
    print_report(&report);

    Ok(if report.all_completed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn apply_overrides(config: &mut RecorderConfig, args: &Args) {
    if let Some(delay) = args.delay {
        config.start_delay_secs = delay;
    }
    if let Some(duration) = args.duration {
        config.duration_secs = duration;
    }
    if let Some(format) = args.format {
        config.output_format = format;
    }
    if let Some(frames) = args.frames_per_file {
        config.frames_per_file = frames;
    }
    if let Some(dir) = &args.output_dir {
        config.output_root = dir.clone();
    }
}

fn record(config: &RecorderConfig) -> Result<SessionReport> {
    let clock: Arc<dyn ReferenceClock> = Arc::new(SystemClock);
    let slots = config.simulated_slots(&clock);
    let mut coordinator = Coordinator::new(config.coordinator_options(), clock);

    let events = coordinator.events();
    let printer = std::thread::Builder::new()
        .name("event-log".into())
        .spawn(move || {
            for event in events.iter() {
                match event {
                    CoordinatorEvent::StateChanged(state) => println!("  state: {state}"),
                    CoordinatorEvent::Converging { slaves, total } => {
                        println!("  waiting for PTP: {slaves}/{total} slaves")
                    }
                    CoordinatorEvent::ScheduleElapsed { serial, late_by_ns } => println!(
                        "  WARNING: cam{serial} start already passed by {:.3} ms",
                        late_by_ns as f64 / 1e6
                    ),
                    CoordinatorEvent::WorkerFinished(device) => {
                        println!("  cam{} stopped after {} frames", device.serial, device.frames)
                    }
                    CoordinatorEvent::SessionFinished(_) | CoordinatorEvent::Aborted { .. } => break,
                }
            }
        })
        .context("starting event printer")?;

    let schedule = coordinator
        .prepare(slots, config.session_plan())
        .context("preparing session")?;
    if let Some(dir) = coordinator.output_dir() {
        println!("Session directory: {}", dir.display());
    }
    info!(
        reference_target_ns = schedule.reference_target_ns,
        cameras = schedule.devices.len(),
        "Start scheduled"
    );

    coordinator.start().context("starting session")?;
    let report = coordinator.wait().context("waiting for session")?;

    if printer.join().is_err() {
        tracing::warn!("Event printer panicked");
    }
    Ok(report)
}

fn print_report(report: &SessionReport) {
    println!();
    println!("=== Session {} ===", report.output_dir.display());
    println!(
        "  created {}  format {}  duration {:.1} s",
        report.created_at.format("%Y-%m-%d %H:%M:%S"),
        report.sink,
        report.duration.as_secs_f64()
    );
    for device in &report.devices {
        let pct = if device.expected_frames > 0 {
            device.frames as f64 * 100.0 / device.expected_frames as f64
        } else {
            0.0
        };
        let outcome = match &device.outcome {
            WorkerOutcome::Completed => "ok".to_string(),
            WorkerOutcome::Aborted(failure) => format!("ABORTED: {failure}"),
        };
        println!(
            "  cam{}: {}/{} frames ({pct:.1}%) {outcome}",
            device.serial, device.frames, device.expected_frames
        );
        for failure in &device.teardown_failures {
            println!("    teardown: {failure}");
        }
    }
    println!("  total frames: {}", report.total_frames());
}
