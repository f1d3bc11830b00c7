//! Webcam Streaming Server
//!
//! Captures frames from a camera (or a synthetic test pattern) and streams
//! them as JPEG over WebSocket to every connected viewer.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use webcam_streamer::{
    broadcast::{BroadcastLoop, ClientRegistry},
    capture::{
        create_shared_buffer, CaptureConfig, CaptureLoop, CaptureStats, CaptureTiming, JpegEncoder,
        SharedCaptureConfig, TestPatternSource,
    },
    config::AppConfig,
    error::CaptureError,
    processing::{
        load_hats, HeadOverlay, SkinBlobHeadDetector, StandardProcessor, DEFAULT_MIN_CONTOUR_AREA,
    },
    web::WebServer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    /// Synthetic moving gradient
    TestPattern,
    /// Physical webcam
    Camera,
}

#[derive(Debug, Parser)]
#[command(name = "webcam-server", version, about = "Stream a webcam to WebSocket viewers")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Frame source
    #[arg(long, value_enum, default_value_t = SourceKind::Camera)]
    source: SourceKind,

    /// Camera device index
    #[arg(long)]
    camera_index: Option<u32>,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    write_config: bool,
}

fn build_processor(config: &AppConfig) -> StandardProcessor {
    let hats = match &config.capture.hats_dir {
        Some(dir) => match load_hats(dir) {
            Ok(hats) => hats,
            Err(e) => {
                tracing::warn!("Failed to load hats from {:?}: {}", dir, e);
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    let mut overlay = HeadOverlay::new(hats);
    overlay.register(
        "skin_blob",
        Box::new(SkinBlobHeadDetector::new(DEFAULT_MIN_CONTOUR_AREA)),
    );
    tracing::info!(
        "Head overlay ready: classifiers {:?}, hats {:?}",
        overlay.classifiers(),
        overlay.hat_names()
    );

    StandardProcessor::new(overlay)
}

fn start_capture(
    capture: &mut CaptureLoop,
    source: SourceKind,
    camera_index: u32,
    processor: StandardProcessor,
) -> std::result::Result<(), CaptureError> {
    let processor = Box::new(processor);
    let encoder = Box::new(JpegEncoder::new());

    match source {
        SourceKind::TestPattern => {
            capture.start(|| Ok(TestPatternSource::new()), processor, encoder)
        }
        #[cfg(feature = "camera")]
        SourceKind::Camera => capture.start(
            move || Ok(webcam_streamer::capture::CameraSource::new(camera_index)),
            processor,
            encoder,
        ),
        #[cfg(not(feature = "camera"))]
        SourceKind::Camera => Err(CaptureError::DeviceUnavailable(format!(
            "camera {} requested but built without the `camera` feature",
            camera_index
        ))),
    }
}

/// Join the capture thread without blocking a runtime worker
async fn stop_capture(mut capture: CaptureLoop) -> Result<CaptureStats> {
    tokio::task::spawn_blocking(move || {
        capture.stop();
        capture.stats()
    })
    .await
    .context("Capture shutdown task failed")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    tracing::info!("Starting webcam streaming server");

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path)?,
        None => AppConfig::load_default()?,
    };
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(index) = cli.camera_index {
        config.capture.camera_index = index;
    }
    config.validate()?;

    if cli.write_config {
        let path = cli
            .config
            .clone()
            .or_else(AppConfig::default_path)
            .context("No configuration path available")?;
        config.save_to_file(&path)?;
        tracing::info!("Configuration written to {:?}", path);
        return Ok(());
    }

    let capture_config = SharedCaptureConfig::new(
        CaptureConfig::from_settings(&config.capture),
        config.limits,
    );
    let buffer = create_shared_buffer();
    let registry = Arc::new(ClientRegistry::new(config.server.max_clients));

    // Open the device before binding so a missing camera fails fast
    let mut capture = CaptureLoop::new(
        capture_config.clone(),
        buffer.clone(),
        CaptureTiming {
            loop_delay: config.capture.loop_delay(),
            retry_delay: config.capture.retry_delay(),
        },
    );
    let processor = build_processor(&config);
    let (source, camera_index) = (cli.source, config.capture.camera_index);
    // A failed start drops the loop on the blocking thread as well
    let capture = tokio::task::spawn_blocking(move || {
        start_capture(&mut capture, source, camera_index, processor).map(|()| capture)
    })
    .await
    .context("Capture startup task failed")?
    .context("Failed to start capture")?;

    let (width, height) = capture_config.resolution();
    tracing::info!(
        "Capture running at {}x{}, quality {}",
        width,
        height,
        capture_config.quality()
    );

    let web_server = WebServer::new(
        config.server.clone(),
        capture_config.clone(),
        buffer.clone(),
        registry.clone(),
        capture.state_handle(),
    );
    let mut server = match web_server.start().await {
        Ok(server) => server,
        Err(e) => {
            stop_capture(capture).await?;
            return Err(e).context("Failed to start server");
        }
    };

    let mut broadcast = BroadcastLoop::spawn(
        buffer.clone(),
        registry.clone(),
        config.capture.broadcast_period(),
    );

    tracing::info!(
        "Streaming on ws://{}/ws - press Ctrl+C to stop",
        server.local_addr()
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
    }
    tracing::info!("Shutting down");

    let grace = config.server.shutdown_grace();

    server.stop_accepting();
    broadcast.stop().await;

    server.close_clients();
    if !registry.wait_until_empty(grace).await {
        tracing::warn!("{} clients still connected after {:?}", registry.len(), grace);
    }
    if let Err(e) = server.join(grace).await {
        tracing::warn!("Server shutdown: {}", e);
    }

    let stats = stop_capture(capture).await?;
    tracing::info!(
        "Stopped: {} frames captured, {} read failures, {} encode failures",
        stats.frames_captured,
        stats.read_failures,
        stats.encode_failures
    );

    Ok(())
}
