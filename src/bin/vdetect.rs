//! vdetect - object detection and counting over a video
//!
//! `preview` resolves the input video and prints its stream properties.
//! `detect` runs detection (or tracking) over every frame, overlays boxes and
//! per-class counts, encodes the result, prints a summary and optionally
//! saves a copy of the output before it is deleted.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use video_detector::{
    Annotator, AppConfig, BackendRegistry, CliPresenter, FrameProcessor, Inference, InputError,
    OverlayStyle, Session, SessionConfig, Upload,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve the input video and print its properties.
    Preview(InputArgs),
    /// Detect objects in every frame and encode an annotated video.
    Detect(DetectArgs),
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Video to process; the bundled default video is used when omitted.
    #[arg(long)]
    video: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DetectArgs {
    #[command(flatten)]
    input: InputArgs,
    /// Minimum detection confidence in [0, 1].
    #[arg(long)]
    confidence: Option<f32>,
    /// Plain per-frame detection instead of tracking.
    #[arg(long)]
    no_track: bool,
    /// Tracker configuration: bytetrack or botsort.
    #[arg(long)]
    tracker: Option<String>,
    /// Detector backend name.
    #[arg(long)]
    backend: Option<String>,
    /// ONNX model for the tract backend.
    #[arg(long)]
    model: Option<PathBuf>,
    /// JSON detection script for the replay backend.
    #[arg(long)]
    replay: Option<PathBuf>,
    /// Newline-separated class names (defaults to COCO).
    #[arg(long)]
    labels: Option<PathBuf>,
    /// TrueType font for labels and the count summary.
    #[arg(long)]
    font: Option<PathBuf>,
    /// Keep a copy of the annotated video here.
    #[arg(long)]
    save: Option<PathBuf>,
    /// UI mode: auto, plain, or pretty.
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Preview(args) => preview(args),
        Command::Detect(args) => detect(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(input) = err.downcast_ref::<InputError>() {
                eprintln!("error loading video: {}", input.message);
                return ExitCode::from(2);
            }
            eprintln!("Error: {:?}", err);
            ExitCode::from(1)
        }
    }
}

fn preview(args: InputArgs) -> Result<()> {
    let config = AppConfig::load()?;
    let session = Session::new(SessionConfig::from_app(&config)?, FrameProcessor::default());
    let preview = session.preview(upload_from(args.video.as_deref())?)?;

    println!("video: {}", preview.path.display());
    println!("source: {}", if preview.uploaded { "upload" } else { "default" });
    println!("resolution: {}x{}", preview.info.width, preview.info.height);
    println!("frame rate: {} fps", preview.info.frame_rate);
    match preview.info.frame_count {
        Some(count) => println!("frames: {}", count),
        None => println!("frames: unknown"),
    }
    Ok(())
}

fn detect(args: DetectArgs) -> Result<()> {
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let config = {
        let _stage = ui.stage("Load configuration");
        let mut config = AppConfig::load()?;
        apply_args(&mut config, &args);
        config.validate()?;
        config
    };

    let mut inference = {
        let _stage = ui.stage("Load detector");
        let mut inference = Inference::new(select_backend(&config)?);
        inference.warm_up()?;
        log::info!("detector backend: {}", inference.backend_name());
        inference
    };

    let annotator = Annotator::new(overlay_style(&config)?);
    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let session = Session::new(SessionConfig::from_app(&config)?, FrameProcessor::new(annotator))
        .with_cancel_flag(cancel);
    log::info!("session {} started", session.id());

    let upload = upload_from(args.input.video.as_deref())?;
    let mut presenter = CliPresenter::new(args.save.clone());
    let mut progress = ui.frames();
    let report = {
        let _stage = ui.stage("Detect objects");
        session.run(upload, &mut inference, &mut presenter, &mut progress)?
    };

    log::info!(
        "session {} finished: {} frames, {} detections",
        report.session_id,
        report.frames,
        report.class_ids.len()
    );
    Ok(())
}

fn upload_from(video: Option<&Path>) -> Result<Option<Upload>> {
    video.map(Upload::from_path).transpose()
}

fn apply_args(config: &mut AppConfig, args: &DetectArgs) {
    if let Some(confidence) = args.confidence {
        config.detection.confidence = confidence;
    }
    if let Some(tracker) = &args.tracker {
        config.tracking.tracker = tracker.clone();
    }
    if args.no_track {
        config.tracking.enabled = false;
    }
    if let Some(backend) = &args.backend {
        config.detection.backend = backend.clone();
    }
    if let Some(model) = &args.model {
        config.detection.model = Some(model.clone());
    }
    if let Some(replay) = &args.replay {
        config.detection.replay = Some(replay.clone());
    }
    if let Some(labels) = &args.labels {
        config.detection.labels = Some(labels.clone());
    }
    if let Some(font) = &args.font {
        config.overlay.font = Some(font.clone());
    }
}

fn select_backend(config: &AppConfig) -> Result<Box<dyn video_detector::DetectorBackend>> {
    BackendRegistry::from_settings(&config.detection)?.take(Some(&config.detection.backend))
}

fn overlay_style(config: &AppConfig) -> Result<OverlayStyle> {
    let style = OverlayStyle {
        font_scale: config.overlay.font_scale,
        thickness: config.overlay.thickness,
        ..OverlayStyle::default()
    };
    match &config.overlay.font {
        Some(path) => Ok(style.with_font(OverlayStyle::load_font(path)?)),
        None => Ok(style.with_font(OverlayStyle::bundled_font()?)),
    }
}
