//! safety_monitor - command-line front end for the detection pipeline
//!
//! Runs image and video uploads through the same boundary the dashboard uses,
//! streams annotated camera frames as multipart JPEG, and clears stored
//! artifacts. `--stub` swaps the model, cameras and video codec for synthetic
//! stand-ins so the pipeline can be exercised without hardware.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use safety_monitor::ingest::{SyntheticCameraOpener, SyntheticVideoCodec};
use safety_monitor::stream::CONTENT_TYPE;
use safety_monitor::{
    ApiError, CameraRegistry, CancelToken, DetectorSlot, MonitorConfig, RawPrediction,
    SafetyMonitor, ScriptedBackend, Upload,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Use a scripted detector, synthetic cameras and the raw video container.
    #[arg(long, global = true)]
    stub: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect PPE in still images and print the JSON responses.
    Detect {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Confidence threshold override in (0, 1].
        #[arg(long)]
        conf: Option<f32>,
        /// Print the aggregated statistics after the last image.
        #[arg(long)]
        stats: bool,
    },
    /// Annotate every frame of a video file.
    Video {
        file: PathBuf,
        #[arg(long)]
        conf: Option<f32>,
    },
    /// Stream annotated camera frames as multipart JPEG.
    Stream {
        /// Camera index (defaults to CAMERA_INDEX / config).
        #[arg(long)]
        camera: Option<u32>,
        /// Stop after this many frames.
        #[arg(long)]
        frames: Option<u64>,
        /// Output file; stdout when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Reset statistics and delete stored uploads and results.
    Reset,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = MonitorConfig::load()?;
    let default_filter = if config.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
    log::info!(
        "model={} camera={} uploads={} results={} debug={}",
        config.model_path.display(),
        config.camera_index,
        config.upload_folder.display(),
        config.results_folder.display(),
        config.debug
    );
    let monitor = build_monitor(config, args.stub)?;

    match args.command {
        Command::Detect {
            images,
            conf,
            stats,
        } => {
            for path in &images {
                let upload = read_upload(path, conf)?;
                let response = monitor.upload_image(upload).map_err(api_failure)?;
                println!("{}", serde_json::to_string_pretty(&response)?);
            }
            if stats {
                println!("{}", serde_json::to_string_pretty(&monitor.stats())?);
            }
        }
        Command::Video { file, conf } => {
            let upload = read_upload(&file, conf)?;
            let response = monitor.upload_video(upload).map_err(api_failure)?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Stream {
            camera,
            frames,
            out,
        } => {
            let cancel = CancelToken::new();
            let handler_token = cancel.clone();
            ctrlc::set_handler(move || handler_token.cancel())
                .context("error setting Ctrl-C handler")?;

            let mut session = match camera {
                Some(index) => monitor.open_stream_on(index).with_cancel_token(cancel),
                None => monitor.open_stream_with_cancel(cancel),
            };
            let mut sink: Box<dyn Write> = match &out {
                Some(path) => Box::new(std::io::BufWriter::new(
                    fs::File::create(path)
                        .with_context(|| format!("create {}", path.display()))?,
                )),
                None => Box::new(std::io::stdout().lock()),
            };
            log::info!("streaming {}", CONTENT_TYPE);

            let mut emitted = 0u64;
            for part in session.by_ref() {
                sink.write_all(&part)?;
                sink.flush()?;
                emitted += 1;
                if frames.is_some_and(|limit| emitted >= limit) {
                    break;
                }
            }
            if session.frames_emitted() == 0 {
                return Err(anyhow!(
                    "stream ended without frames: {:?}",
                    session.stop_reason()
                ));
            }
            log::info!(
                "stream finished: {} frames, {} skipped",
                session.frames_emitted(),
                session.frames_skipped()
            );
        }
        Command::Reset => {
            let response = monitor.reset_stats().map_err(api_failure)?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }
    Ok(())
}

fn build_monitor(config: MonitorConfig, stub: bool) -> Result<SafetyMonitor> {
    if !stub {
        return SafetyMonitor::from_config(config);
    }
    log::warn!("running with synthetic detector, cameras and video codec");
    let backend = ScriptedBackend::new(vec![
        RawPrediction::new([8.0, 8.0, 40.0, 40.0], 0.91, 2),
        RawPrediction::new([20.0, 12.0, 60.0, 44.0], 0.64, 0),
    ]);
    SafetyMonitor::with_components(
        config,
        DetectorSlot::preloaded(backend),
        Arc::new(SyntheticVideoCodec),
        CameraRegistry::new(SyntheticCameraOpener::default()),
    )
}

fn read_upload(path: &Path, conf: Option<f32>) -> Result<Upload> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("{} has no file name", path.display()))?;
    let mut upload = Upload::new(filename, bytes);
    upload.confidence_threshold = conf;
    Ok(upload)
}

fn api_failure(err: ApiError) -> anyhow::Error {
    anyhow!("{} ({})", err.body.error, err.http_status())
}
