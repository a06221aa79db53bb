//! camrec: record a camera to video with a per-frame timestamp ledger

use std::path::PathBuf;
use std::process::ExitCode;

use camrec::capture::{Camera, SyntheticCamera, V4l2Camera};
use camrec::display::{LogPreview, Preview};
use camrec::encoder::FfmpegEncoder;
use camrec::pipeline::ShutdownReason;
use camrec::utils::{self, OutputPaths};
use camrec::{Config, Session, SessionReport};
use clap::Parser;
use color_eyre::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "camrec")]
#[command(about = "Record camera frames to video with a per-frame timestamp ledger")]
#[command(version)]
struct Cli {
    /// Output base path; writes <OUTPUT>.mp4 and <OUTPUT>.txt
    output: PathBuf,

    /// Camera settings profile (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// V4L2 device path (default: auto-detect)
    #[arg(short, long)]
    device: Option<String>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Output video frame rate
    #[arg(long)]
    fps: Option<f64>,

    /// Stop after this many frames (external trigger count)
    #[arg(long)]
    max_frames: Option<u64>,

    /// Use the built-in test pattern instead of a camera
    #[arg(long)]
    synthetic: bool,

    /// Disable the preview
    #[arg(long)]
    no_preview: bool,
}

impl Cli {
    fn apply(&self, mut config: Config) -> Result<Config> {
        if let Some(device) = &self.device {
            config.camera.device = device.clone();
        }
        if let Some(width) = self.width {
            config.camera.width = width;
        }
        if let Some(height) = self.height {
            config.camera.height = height;
        }
        if let Some(fps) = self.fps {
            config.encoder.fps = fps;
        }
        if self.max_frames.is_some() {
            config.pipeline.max_frames = self.max_frames;
        }
        if self.no_preview {
            config.display.enabled = false;
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("camrec=info"));

    #[cfg(feature = "profiling")]
    {
        use tracing_subscriber::prelude::*;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_timer(tracing_subscriber::fmt::time::uptime()),
            )
            .with(tracing_tracy::TracyLayer::default())
            .init();
    }

    #[cfg(not(feature = "profiling"))]
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    let config = cli.apply(Config::load(cli.config.as_deref())?)?;

    let paths = OutputPaths::from_base(&cli.output);
    paths.prepare()?;
    info!("Video will be saved to: {}", paths.video.display());

    let session = Session::new(config.clone());

    let shutdown = session.shutdown();
    tokio::spawn(async move {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    info!("Interrupt received, stopping capture");
                    shutdown.trigger(ShutdownReason::UserRequested);
                }
                Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
            },
            _ = shutdown.wait() => {}
        }
    });

    info!("Press Ctrl-C to end recording and save video");
    let report =
        tokio::task::block_in_place(|| record(&session, &config, &paths, cli.synthetic))?;
    report.log_summary();

    info!("Done!");
    Ok(ExitCode::from(report.exit_code()))
}

fn record(
    session: &Session,
    config: &Config,
    paths: &OutputPaths,
    synthetic: bool,
) -> Result<SessionReport> {
    let camera: Box<dyn Camera> = if synthetic {
        Box::new(SyntheticCamera::new(
            config.camera.width,
            config.camera.height,
            config.encoder.fps,
        ))
    } else {
        let mut camera_config = config.camera.clone();
        if camera_config.device.is_empty() {
            camera_config.device = utils::auto_detect_device(camera_config.pixel_format)?;
        }
        Box::new(V4l2Camera::open(camera_config)?)
    };
    info!("Using camera: {}", camera.name());

    let encoder = FfmpegEncoder::open(
        &paths.video,
        &config.encoder,
        config.camera.width,
        config.camera.height,
    )?;

    #[cfg(feature = "sdl-preview")]
    let sdl_context = if config.display.enabled {
        Some(sdl2::init().map_err(|e| color_eyre::eyre::eyre!(e))?)
    } else {
        None
    };

    #[cfg(feature = "sdl-preview")]
    let mut preview: Box<dyn Preview> = match &sdl_context {
        Some(sdl) => {
            let height = config.display.height;
            let width = config.camera.width * height / config.camera.height.max(1);
            Box::new(camrec::display::Sdl2Preview::new(sdl, width, height)?)
        }
        None => Box::new(LogPreview::new()),
    };
    #[cfg(not(feature = "sdl-preview"))]
    let mut preview: Box<dyn Preview> = Box::new(LogPreview::new());

    let report = session.run(camera, encoder, Some(preview.as_mut()), &paths.ledger)?;
    Ok(report)
}
