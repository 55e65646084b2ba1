//! segplay Audio Player (segplay-ap) - command-line entry point
//!
//! Decodes one media file with symphonia and plays it through cpal using the
//! segmented ring-buffer playback driver. Exits at end of data or when the
//! optional duration limit elapses.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use segplay_ap::audio::{CpalEngine, SymphoniaPipeline};
use segplay_ap::playback::PlaybackListener;
use segplay_ap::{PlaybackConfig, PlaybackDriver};
use segplay_common::config::{resolve_config_path, TomlConfig, CONFIG_ENV_VAR};
use segplay_common::PlaybackEvent;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Poll interval of the main loop
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Command-line arguments for segplay-ap
#[derive(Parser, Debug)]
#[command(name = "segplay-ap")]
#[command(about = "Play an audio file through the segmented ring-buffer driver")]
#[command(version)]
struct Args {
    /// Audio file to play
    #[arg(required_unless_present = "list_devices")]
    file: Option<PathBuf>,

    /// Print output device names and exit
    #[arg(long)]
    list_devices: bool,

    /// Config file (overrides SEGPLAY_CONFIG and the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Start position in milliseconds
    #[arg(long)]
    seek_ms: Option<u64>,

    /// Output gain (overrides the config file)
    #[arg(long)]
    gain: Option<f32>,

    /// Output device name (default device if not found)
    #[arg(short, long, env = "SEGPLAY_DEVICE")]
    device: Option<String>,

    /// Stop after this many milliseconds of wall-clock playback
    #[arg(long)]
    duration_ms: Option<u64>,
}

/// Listener that only stores atomics; the main loop does the logging
#[derive(Default)]
struct ConsoleListener {
    position_ms: AtomicU64,
    ended: AtomicBool,
    upstream_failed: AtomicBool,
    failed: AtomicBool,
}

impl PlaybackListener for ConsoleListener {
    fn on_event(&self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::PositionUpdated { position } => {
                self.position_ms
                    .store(position.as_millis() as u64, Ordering::Relaxed);
            }
            PlaybackEvent::EndOfData { position } => {
                self.position_ms
                    .store(position.as_millis() as u64, Ordering::Relaxed);
                self.ended.store(true, Ordering::Release);
            }
            PlaybackEvent::UpstreamFailed { position } => {
                self.position_ms
                    .store(position.as_millis() as u64, Ordering::Relaxed);
                self.upstream_failed.store(true, Ordering::Release);
            }
            PlaybackEvent::SessionFailed => self.failed.store(true, Ordering::Release),
            PlaybackEvent::StateChanged { .. } => {}
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR);
    let toml_config = TomlConfig::load_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;

    // RUST_LOG wins over the config file level
    let level = &toml_config.logging.level;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("segplay_ap={level},segplay_common={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if args.list_devices {
        for name in CpalEngine::list_devices().context("Failed to list output devices")? {
            println!("{}", name);
        }
        return Ok(());
    }
    let file = args.file.as_deref().context("No audio file given")?;

    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }

    let mut playback_config =
        PlaybackConfig::from_toml(&toml_config).context("Invalid playback configuration")?;
    if let Some(gain) = args.gain {
        playback_config.gain = gain;
    }

    let device = args.device.clone().or(toml_config.output.device.clone());
    let engine = CpalEngine::new(device.as_deref(), toml_config.output.buffer_frames)
        .context("Failed to open audio output")?;
    let sample_format = engine
        .preferred_sample_format()
        .context("Failed to query output format")?;

    let pipeline = SymphoniaPipeline::open(file, sample_format)
        .with_context(|| format!("Failed to open {}", file.display()))?;
    if let Some(duration) = pipeline.duration() {
        info!("Track duration: {:.1}s", duration.as_secs_f64());
    }

    let listener = Arc::new(ConsoleListener::default());
    let driver = PlaybackDriver::new(
        playback_config,
        Box::new(pipeline),
        Box::new(engine),
        Arc::clone(&listener) as Arc<dyn PlaybackListener>,
    )
    .context("Failed to create playback driver")?;

    if let Some(ms) = args.seek_ms {
        driver
            .seek(Duration::from_millis(ms))
            .context("Initial seek failed")?;
    }
    driver.play().context("Failed to start playback")?;

    let started = Instant::now();
    let deadline = args.duration_ms.map(|ms| started + Duration::from_millis(ms));
    let mut last_report = started;

    loop {
        std::thread::sleep(POLL_INTERVAL);

        if listener.failed.load(Ordering::Acquire) {
            break;
        }
        if listener.upstream_failed.load(Ordering::Acquire) {
            error!(
                "Decoding stopped at {:.1}s",
                listener.position_ms.load(Ordering::Relaxed) as f64 / 1000.0
            );
            break;
        }
        if listener.ended.load(Ordering::Acquire) {
            info!(
                "End of data at {:.1}s",
                listener.position_ms.load(Ordering::Relaxed) as f64 / 1000.0
            );
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!("Duration limit reached");
            break;
        }
        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            info!(
                "Position: {:.1}s",
                listener.position_ms.load(Ordering::Relaxed) as f64 / 1000.0
            );
        }
    }

    let stats = driver.stats();
    info!(
        "Session stats: {} callbacks, {} glitches, {} bytes decoded, {} fill backoffs",
        stats.callback.callbacks,
        stats.callback.glitches,
        stats.fill.bytes_written,
        stats.fill.backoffs
    );
    if stats.callback.glitches > 0 {
        warn!("{} render glitches during playback", stats.callback.glitches);
    }

    driver.shutdown();

    if listener.failed.load(Ordering::Acquire) {
        bail!("Playback session failed");
    }
    if listener.upstream_failed.load(Ordering::Acquire) {
        bail!("Failed to decode {}", file.display());
    }
    Ok(())
}
