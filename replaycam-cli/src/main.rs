//! Headless demo: feed a synthetic camera into the pipeline, capture once,
//! write the buffered video to an MP4 file.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use replaycam_encoder::EncoderKind;
use replaycam_engine::{ChannelHost, Pipeline, PipelineHost, PipelineParts, SyntheticCamera};
use replaycam_gpu::TextureStore;
use replaycam_ipc::{CaptureConfig, PipelineEvent, SaveStatus};

const SAVE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "replaycam")]
#[command(about = "Capture the last few seconds of a synthetic camera to MP4")]
struct Cli {
    /// JSON capture configuration; missing fields take defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Destination MP4 file.
    #[arg(long, short, default_value = "replaycam.mp4")]
    output: PathBuf,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    #[arg(long)]
    fps: Option<u32>,

    /// Seconds to run the camera before capturing.
    #[arg(long, default_value = "3")]
    warmup_secs: f64,

    /// Encoder backend: synthetic or x264.
    #[arg(long, default_value = "synthetic")]
    encoder: EncoderKind,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "replaycam=info,replaycam_engine=debug,replaycam_encoder=debug,replaycam_mux=debug,replaycam_gpu=info".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<CaptureConfig> {
    let mut config = match cli.config {
        Some(ref path) => CaptureConfig::from_json_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => CaptureConfig::default(),
    };

    if let Some(width) = cli.width {
        config.width = width;
    }
    if let Some(height) = cli.height {
        config.height = height;
    }
    if let Some(fps) = cli.fps {
        config.frame_rate = fps;
    }

    config.validate().context("Invalid capture configuration")?;
    Ok(config)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    info!(
        width = config.width,
        height = config.height,
        frame_rate = config.frame_rate,
        encoder = %cli.encoder,
        "Starting replaycam"
    );

    let textures = TextureStore::new();
    let (parts, producer) = PipelineParts::software(&config, cli.encoder, &textures)
        .context("Failed to build pipeline")?;

    let (host, events) = ChannelHost::channel();
    let weak = Arc::downgrade(&host);
    let weak: Weak<dyn PipelineHost> = weak;
    let mut pipeline =
        Pipeline::spawn(config.clone(), parts, weak).context("Failed to start pipeline")?;
    let mut camera =
        SyntheticCamera::start(producer, config.width, config.height, config.frame_rate)
            .context("Failed to start camera")?;

    let warmup = Duration::from_secs_f64(cli.warmup_secs.max(0.0));
    info!("Warming up for {:.1}s", warmup.as_secs_f32());
    pump_events(&events, warmup)?;

    if !pipeline
        .click_capture(&cli.output)
        .context("Failed to request capture")?
    {
        bail!("Capture was not accepted");
    }
    let status = wait_for_save(&events)?;

    camera.stop();
    let metrics = pipeline.metrics();
    pipeline.shutdown().context("Failed to shut down pipeline")?;

    info!(
        rendered = metrics.frames_rendered,
        submitted = metrics.frames_submitted,
        paused = metrics.frames_paused,
        coalesced = metrics.frames_coalesced,
        "Pipeline finished"
    );

    if status != SaveStatus::Success.code() {
        let reason = SaveStatus::from_code(status).map_or("unknown status", |s| s.message());
        bail!("Save failed with status {}: {}", status, reason);
    }

    let size = std::fs::metadata(&cli.output)
        .with_context(|| format!("Saved file missing: {}", cli.output.display()))?
        .len();
    info!(path = %cli.output.display(), bytes = size, "Video saved");
    println!("{}", cli.output.display());
    Ok(())
}

/// Log events until `duration` elapsed.
fn pump_events(events: &Receiver<PipelineEvent>, duration: Duration) -> anyhow::Result<()> {
    let deadline = Instant::now() + duration;

    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(remaining) {
            Ok(event) => log_event(&event),
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => bail!("Pipeline stopped unexpectedly"),
        }
    }
    Ok(())
}

/// Wait for the save started by a capture click and return its status.
fn wait_for_save(events: &Receiver<PipelineEvent>) -> anyhow::Result<i32> {
    let deadline = Instant::now() + SAVE_TIMEOUT;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = match events.recv_timeout(remaining) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => bail!("Timed out waiting for the save"),
            Err(RecvTimeoutError::Disconnected) => bail!("Pipeline stopped during the save"),
        };

        match event {
            PipelineEvent::FileSaveComplete { status, .. } => return Ok(status),
            PipelineEvent::CaptureRejected { reason } => bail!("Capture rejected: {}", reason),
            other => log_event(&other),
        }
    }
}

fn log_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::StateChanged { previous, current } => {
            info!("State: {} -> {}", previous.name(), current.name())
        }
        PipelineEvent::BufferStatus { duration_usec } => {
            debug!(buffered_ms = duration_usec / 1000, "Buffer status")
        }
        PipelineEvent::Metrics(metrics) => debug!(
            fps = metrics.render_fps,
            submitted = metrics.frames_submitted,
            buffered_ms = metrics.buffered_usec / 1000,
            "Metrics"
        ),
        PipelineEvent::Error {
            recoverable,
            message,
        } => warn!(recoverable, "Pipeline error: {}", message),
        other => debug!(?other, "Event"),
    }
}
