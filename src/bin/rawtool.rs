//! rawtool - offline inspection of recorded sessions
//!
//! Exit codes: 0 success, 1 validation or encoding failure, 2 input error.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use synchrocap::toolkit::{self, ToolkitError, DEFAULT_TOLERANCE_MS};
use synchrocap::RecorderConfig;

const EXIT_FAIL: u8 = 1;
const EXIT_ERROR: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "rawtool", version, about = "Inspect, validate and re-encode SynchroCap sessions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a container file's header and frame list
    Dump {
        file: PathBuf,
        /// List every frame instead of the first and last ten
        #[arg(long)]
        all: bool,
    },
    /// Check container structure and frame logs of a session
    Validate { dir: PathBuf },
    /// Compare frame timestamps across cameras
    SyncCheck {
        dir: PathBuf,
        #[arg(long, default_value_t = 1.0)]
        threshold_ms: f64,
    },
    /// Find abnormal frame intervals in the frame logs
    Continuity {
        dir: PathBuf,
        /// Expected frame rate
        #[arg(long)]
        fps: f64,
        #[arg(long, default_value_t = DEFAULT_TOLERANCE_MS)]
        tolerance_ms: f64,
    },
    /// Export one BayerGR8 frame as PNG
    View {
        file: PathBuf,
        /// Frame position within the file
        #[arg(long, default_value_t = 0)]
        frame: usize,
        /// PNG path (default: <stem>_frame<index>.png next to the file)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Re-encode a camera's container files at a constant frame rate
    Encode {
        dir: PathBuf,
        #[arg(long)]
        serial: String,
        #[arg(long, default_value_t = 30.0)]
        fps: f64,
        /// Encoder program (default from config, usually ffmpeg)
        #[arg(long)]
        encoder: Option<String>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "synchrocap=warn,synchrocap_core=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Dump { file, all } => dump(&file, all),
        Command::Validate { dir } => validate(&dir),
        Command::SyncCheck { dir, threshold_ms } => sync_check(&dir, threshold_ms),
        Command::Continuity {
            dir,
            fps,
            tolerance_ms,
        } => continuity(&dir, fps, tolerance_ms),
        Command::View { file, frame, output } => view(&file, frame, output),
        Command::Encode {
            dir,
            serial,
            fps,
            encoder,
        } => encode(&dir, &serial, fps, encoder),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(if e.is_input_error() { EXIT_ERROR } else { EXIT_FAIL })
        }
    }
}

fn pass_or_fail(passed: bool) -> ExitCode {
    if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAIL)
    }
}

fn dump(file: &Path, all: bool) -> Result<ExitCode, ToolkitError> {
    let dump = toolkit::dump_container(file)?;
    print!("{}", dump.render(all));
    Ok(ExitCode::SUCCESS)
}

fn validate(dir: &Path) -> Result<ExitCode, ToolkitError> {
    let validation = toolkit::validate_session(dir)?;
    println!("{validation}");
    Ok(pass_or_fail(validation.is_valid()))
}

fn sync_check(dir: &Path, threshold_ms: f64) -> Result<ExitCode, ToolkitError> {
    let report = toolkit::sync_check(dir, threshold_ms)?;
    for serial in &report.skipped {
        eprintln!("Warning: no CSV for cam{serial}, skipping");
    }
    println!("{report}");
    Ok(pass_or_fail(report.passed()))
}

fn continuity(dir: &Path, fps: f64, tolerance_ms: f64) -> Result<ExitCode, ToolkitError> {
    let reports = toolkit::continuity(dir, fps, tolerance_ms)?;
    for report in &reports {
        println!("{report}");
        println!();
    }
    Ok(pass_or_fail(reports.iter().all(|r| !r.has_drops())))
}

fn view(file: &Path, position: usize, output: Option<PathBuf>) -> Result<ExitCode, ToolkitError> {
    let preview = toolkit::preview_frame(file, position)?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    println!("=== View: {name} ===");
    println!(
        "  FileHeader: {}x{} {}",
        preview.width(),
        preview.height(),
        preview.header.pixel_format
    );
    println!(
        "  Frame: index={}, timestamp_ns={}",
        preview.frame.frame_index, preview.frame.timestamp_ns
    );

    let png = output.unwrap_or_else(|| preview.default_png_path(file));
    let Some(image) = image::RgbImage::from_raw(preview.width(), preview.height(), preview.rgb.clone()) else {
        return Err(ToolkitError::InvalidArgument("decoded frame has the wrong size".to_string()));
    };
    if let Err(e) = image.save(&png) {
        eprintln!("Error: failed to save {}: {e}", png.display());
        return Ok(ExitCode::from(EXIT_FAIL));
    }
    println!("  Saved: {}", png.display());
    Ok(ExitCode::SUCCESS)
}

fn encode(dir: &Path, serial: &str, fps: f64, encoder: Option<String>) -> Result<ExitCode, ToolkitError> {
    let mut settings = RecorderConfig::load().encoder;
    if let Some(program) = encoder {
        settings.program = program;
        settings.program_args.clear();
    }

    let job = toolkit::plan_encode(dir, serial, fps)?;
    println!("{job}");
    println!("  Encoding...");
    job.run(&settings)?;
    println!("  Done.");
    Ok(ExitCode::SUCCESS)
}
