//! cuedeck - play tracks from the command line
//!
//! Resolves each query with the direct-link provider, queues the results in
//! one playback session, and writes paced PCM (s16le) to a file or stdout.
//! Pipe stdout into a player, e.g.
//! `cuedeck song.mp3 | ffplay -f s16le -ar 48000 -ac 2 -`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cuedeck_common::{LoopMode, Platform, PlayerConfig, PlayerEvent, Requester};
use cuedeck_player::provider::DirectLinkProvider;
use cuedeck_player::sink::{AudioSink, PipeSink};
use cuedeck_player::transcode::FfmpegTranscoder;
use cuedeck_player::transport::{Destination, LocalTransport};
use cuedeck_player::{spawn_session, SessionServices};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for cuedeck
#[derive(Parser, Debug)]
#[command(name = "cuedeck")]
#[command(about = "Queue and play audio links or files")]
#[command(version)]
struct Args {
    /// Configuration file (overrides CUEDECK_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where to write PCM; `-` for stdout
    #[arg(short, long, default_value = "-")]
    output: String,

    /// Volume in percent
    #[arg(short, long)]
    volume: Option<i64>,

    /// Loop mode: none, track, queue
    #[arg(short, long = "loop", default_value = "none")]
    loop_mode: LoopMode,

    /// Pick queued tracks at random
    #[arg(short, long)]
    shuffle: bool,

    /// Named audio filter (see [transcode.filters])
    #[arg(short, long)]
    filter: Option<String>,

    /// Print player events as JSON lines on stderr
    #[arg(long)]
    json_events: bool,

    /// Links or file paths to play
    #[arg(required = true)]
    queries: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = PlayerConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;

    // Logs go to stderr; stdout may carry audio
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "cuedeck_player={level},cuedeck_common={level}",
                    level = config.logging.level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting cuedeck with {} queries", args.queries.len());

    let sink: Arc<dyn AudioSink> = if args.output == "-" {
        Arc::new(PipeSink::stdout(config.transcode.sample_rate, config.transcode.channels))
    } else {
        let file = tokio::fs::File::create(&args.output)
            .await
            .with_context(|| format!("Failed to create {}", args.output))?;
        Arc::new(PipeSink::new(
            Box::new(file),
            config.transcode.sample_rate,
            config.transcode.channels,
        ))
    };

    let provider = Arc::new(DirectLinkProvider::new());
    let services = SessionServices::new(
        provider.clone(),
        provider,
        Arc::new(LocalTransport::new()),
        Arc::new(FfmpegTranscoder::new(config.transcode.clone())),
    );

    let session = spawn_session(Destination::new("local", "default"), config, services, sink);
    let mut events = session.subscribe();

    if let Some(volume) = args.volume {
        session.set_volume(volume).await?;
    }
    session.set_loop(args.loop_mode).await?;
    session.set_shuffle(args.shuffle).await?;
    if args.filter.is_some() {
        session.set_filter(args.filter.clone()).await?;
    }

    let requester = Requester::new("cli", whoami());
    let mut queued = 0;
    for query in &args.queries {
        match session
            .add_track(query, Some(requester.clone()), Some(Platform::Direct))
            .await
        {
            Ok(outcome) => queued += outcome.tracks.len(),
            Err(e) => warn!("Skipping '{}': {}", query, e),
        }
    }
    if queued == 0 {
        anyhow::bail!("Nothing playable in the given queries");
    }

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping");
                let _ = session.stop().await;
                session.destroy().await.ok();
                break;
            }
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Missed {} player events", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if args.json_events {
                    match serde_json::to_string(&event) {
                        Ok(line) => eprintln!("{}", line),
                        Err(e) => warn!("Failed to encode event: {}", e),
                    }
                }

                match event {
                    PlayerEvent::TrackStarted { track, offset_ms, .. } => {
                        info!("Now playing '{}' (from {} ms)", track.title, offset_ms);
                    }
                    PlayerEvent::TrackFailed { track, error, .. } => {
                        error!("Could not play '{}': {}", track.title, error);
                    }
                    PlayerEvent::QueueEmpty { .. } => {
                        info!("Queue finished");
                        session.destroy().await.ok();
                        break;
                    }
                    PlayerEvent::SessionDestroyed { .. } => break,
                    _ => {}
                }
            }
        }
    }

    info!("Shutdown complete");
    Ok(())
}

fn whoami() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "local".to_string())
}
