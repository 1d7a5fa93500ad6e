//! AMIX engine demo (amix-engine) - Main entry point
//!
//! Runs one scene against the simulated hardware backend so the mixing
//! engine and orchestrator can be exercised without a board.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use amix_common::config::{load_config, resolve_config_path, DemoConfig, CONFIG_ENV_VAR};
use amix_common::Channels;
use amix_engine::build_info;
use amix_engine::codec::{CodecRegistry, DecoderConfig};
use amix_engine::hw::{HardwareRegistry, HwConfig, HwType, SimulatedBackend};
use amix_engine::scene::{
    LocalPlaybackParams, LocalPlaybackScene, LoopbackParams, LoopbackScene, OrchestratorHandle, RawDataSource,
    Scene, SceneId, StreamSinkParams, StreamSinkScene, ToneGenerator, ToneParams,
};
use amix_engine::{MixEngine, SceneOrchestrator};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Which scene the demo runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DemoScene {
    /// Local playback of a generated stream
    Playback,
    /// Streamed sink fed with paced frames
    Sink,
    /// Capture looped back to the output
    Loopback,
    /// Tone only
    Tone,
}

/// Command-line arguments for amix-engine
#[derive(Parser, Debug)]
#[command(name = "amix-engine")]
#[command(about = "Audio mixing engine demo on simulated hardware")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Scene to run
    #[arg(short, long, value_enum, default_value = "playback", env = "AMIX_SCENE")]
    scene: DemoScene,

    /// Layer a tone over the scene once it is running
    #[arg(short, long)]
    tone: bool,

    /// Seconds to run before shutting down
    #[arg(short, long, default_value = "3", env = "AMIX_DURATION")]
    duration: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR);
    let config = load_config(config_path.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting AMIX engine {}", build_info::describe());
    match &config_path {
        Some(path) => info!("Config file: {}", path.display()),
        None => info!("No config file, using defaults"),
    }

    let demo = config.demo.clone();
    let engine = MixEngine::new(config.mix, CodecRegistry::with_builtin())
        .context("Failed to create mix engine")?;
    let backend = SimulatedBackend::new(demo.fifo_half_depth);
    let hardware = HardwareRegistry::new(Arc::new(backend));
    let orchestrator = SceneOrchestrator::spawn(engine, hardware);

    let (scene, feeder) = start_scene(&orchestrator.handle(), args.scene, &demo).await?;
    info!("Running {:?} as {}", args.scene, scene);

    if args.tone && args.scene != DemoScene::Tone {
        // let the main scene settle before layering
        tokio::time::sleep(Duration::from_millis(200)).await;
        match orchestrator.tone_play(tone_params(&demo)).await? {
            Some(tone) => info!("Tone overlay {}", tone),
            None => warn!("Scene {} refused the tone overlay", scene),
        }
    }

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.duration)) => {
            info!("Demo time elapsed");
        },
        _ = shutdown_signal() => {},
    }

    if let Some(feeder) = feeder {
        feeder.abort();
    }
    orchestrator.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

fn output_config(demo: &DemoConfig) -> HwConfig {
    HwConfig::output(HwType::I2s, demo.sample_rate, demo.channels)
}

fn tone_params(demo: &DemoConfig) -> ToneParams {
    ToneParams {
        source: Box::new(ToneGenerator::new(demo.sample_rate, demo.channels, demo.tone_hz, demo.tone_ms)),
        audio_type: demo.audio_type,
        decoder: DecoderConfig::new(demo.sample_rate, demo.channels),
        hw: output_config(demo),
        on_destroyed: Some(Box::new(|| info!("Tone finished"))),
    }
}

async fn start_scene(
    orchestrator: &OrchestratorHandle,
    scene: DemoScene,
    demo: &DemoConfig,
) -> Result<(SceneId, Option<JoinHandle<()>>)> {
    let decoder = DecoderConfig::new(demo.sample_rate, demo.channels);

    match scene {
        DemoScene::Playback => {
            let params = LocalPlaybackParams {
                source: Box::new(ToneGenerator::new(demo.sample_rate, demo.channels, 440, u32::MAX / 1000)),
                audio_type: demo.audio_type,
                decoder,
                hw: output_config(demo),
            };
            let id = orchestrator
                .create(|_| Ok(Box::new(LocalPlaybackScene::new(params)) as Box<dyn Scene>))
                .await
                .context("Failed to create playback scene")?;
            Ok((id, None))
        }
        DemoScene::Sink => {
            let params = StreamSinkParams {
                audio_type: demo.audio_type,
                decoder,
                hw: output_config(demo),
            };
            let id = orchestrator
                .create(|_| Ok(Box::new(StreamSinkScene::new(params)) as Box<dyn Scene>))
                .await
                .context("Failed to create sink scene")?;
            let feeder = tokio::spawn(feed_sink(orchestrator.clone(), id, demo.clone()));
            Ok((id, Some(feeder)))
        }
        DemoScene::Loopback => {
            let params = LoopbackParams {
                input: HwConfig::input(HwType::Pdm, demo.sample_rate, Channels::Mono),
                output: output_config(demo),
            };
            let id = orchestrator
                .create(|_| Ok(Box::new(LoopbackScene::new(params)) as Box<dyn Scene>))
                .await
                .context("Failed to create loopback scene")?;
            Ok((id, None))
        }
        DemoScene::Tone => {
            let id = orchestrator
                .tone_play(tone_params(demo))
                .await?
                .context("Tone refused with no main scene")?;
            Ok((id, None))
        }
    }
}

/// Deliver 10 ms PCM frames at the stream rate, every 20th one lost
async fn feed_sink(orchestrator: OrchestratorHandle, scene: SceneId, demo: DemoConfig) {
    let frame_bytes = (demo.sample_rate / 100) as usize * demo.channels.count() * 2;
    let mut source = ToneGenerator::new(demo.sample_rate, demo.channels, 660, u32::MAX / 1000);
    let mut ticker = tokio::time::interval(Duration::from_millis(10));
    let mut sent = 0u64;

    loop {
        ticker.tick().await;
        let mut frame = vec![0u8; frame_bytes];
        let n = source.read(&mut frame);
        frame.truncate(n);
        sent += 1;
        let valid = sent % 20 != 0;
        if !orchestrator.recv_encoded_data(scene, valid, frame) {
            break;
        }
    }
}

/// Resolves on Ctrl+C (or SIGTERM on unix)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
