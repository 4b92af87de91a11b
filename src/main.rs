use ab_glyph::FontArc;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use webcam_detect::capture::{open_camera, Constraints, FacingMode};
use webcam_detect::config::{self, OverlayStyle};
use webcam_detect::detection::{CocoSsd, DetectOptions};
use webcam_detect::output::{NullSink, OutputSink, V4L2Output};
use webcam_detect::overlay::{load_font, Canvas, OverlayRenderer};
use webcam_detect::pipeline::{DetectionLoop, LoopError};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Webcam index used when no device matches the facing mode
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Preferred camera direction
    #[arg(long, value_enum, default_value_t = config::DEFAULT_FACING_MODE)]
    facing: FacingMode,

    /// Path to detection model (ONNX file)
    #[arg(long, default_value = config::DEFAULT_MODEL_PATH)]
    model: PathBuf,

    /// Display refresh rate the loop synchronizes to
    #[arg(long, default_value_t = config::DEFAULT_REFRESH_HZ)]
    refresh_hz: u32,

    /// Scale captured frames to this width
    #[arg(long, requires = "display_height")]
    display_width: Option<u32>,

    /// Scale captured frames to this height
    #[arg(long, requires = "display_width")]
    display_height: Option<u32>,

    /// Resize frames to a square of this size before inference
    #[arg(long)]
    inference_size: Option<u32>,

    /// Font used for labels (TTF/OTF)
    #[arg(long)]
    font: Option<PathBuf>,

    /// Output v4l2loopback device path
    /// If not provided, the overlay is drawn but not displayed anywhere
    #[arg(short, long)]
    output_device: Option<String>,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("webcam-detect starting");
    tracing::info!("Camera: {:?} (fallback index {})", args.facing, args.input_device);
    tracing::info!("Model: {}", args.model.display());
    tracing::info!("Refresh: {} Hz", args.refresh_hz);

    // Everything runs on one thread; inference and camera I/O sit off it
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;
    let local = tokio::task::LocalSet::new();

    local.block_on(&runtime, run(args))
}

async fn run(args: Args) -> Result<ExitCode> {
    let style = OverlayStyle::default();
    let (width, height) = config::DEFAULT_SURFACE_SIZE;

    let canvas = match resolve_font(args.font.as_deref())? {
        Some(font) => Canvas::new(width, height).with_font(font, style.font_px),
        None => {
            tracing::warn!("No font found, labels are drawn without text");
            Canvas::new(width, height)
        }
    };

    let sink: Box<dyn OutputSink<Canvas>> = match &args.output_device {
        Some(path) => Box::new(
            V4L2Output::new(path, args.output_width, args.output_height)
                .context("Failed to initialize v4l2loopback output")?,
        ),
        None => {
            tracing::info!("No output device given, overlay is not displayed");
            Box::new(NullSink)
        }
    };

    let mut constraints = Constraints::new(args.facing);
    if let (Some(width), Some(height)) = (args.display_width, args.display_height) {
        constraints = constraints.with_display_size(width, height);
    }

    let options = DetectOptions {
        input_size: args.inference_size.map(|size| (size, size)),
        ..DetectOptions::default()
    };

    let detection_loop = DetectionLoop::new(canvas, sink)
        .with_renderer(OverlayRenderer::new(style))
        .with_refresh_rate(args.refresh_hz);

    let handle = detection_loop.start(
        open_camera(constraints, args.input_device),
        CocoSsd::load(args.model.clone(), options),
    );

    let stopper = handle.stopper();
    tokio::task::spawn_local(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Ctrl+C received, stopping");
                stopper.stop();
            }
            Err(e) => tracing::warn!("Failed to listen for Ctrl+C: {}", e),
        }
    });
    tracing::info!("Press Ctrl+C to stop");

    match handle.join().await {
        Ok(summary) => {
            tracing::info!("Finished after {} detection cycles", summary.cycles);
            Ok(ExitCode::SUCCESS)
        }
        Err(LoopError::Task(e)) => {
            tracing::error!("Detection loop task failed: {}", e);
            Ok(ExitCode::FAILURE)
        }
        // Already reported by the loop's error sink
        Err(_) => Ok(ExitCode::FAILURE),
    }
}

fn resolve_font(explicit: Option<&Path>) -> Result<Option<FontArc>> {
    if let Some(path) = explicit {
        return load_font(path).map(Some);
    }

    match config::FONT_CANDIDATES
        .iter()
        .map(|candidate| Path::new(*candidate))
        .find(|path| path.is_file())
    {
        Some(path) => {
            tracing::debug!("Using font {}", path.display());
            load_font(path).map(Some)
        }
        None => Ok(None),
    }
}
