//! Hindsight: dual-camera instant replay recorder

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use color_eyre::Result;
use tracing::{error, info, trace, warn};
use tracing_subscriber::EnvFilter;

use hindsight::capture::FeedFactory;
use hindsight::control::{self, Command, Outcome};
use hindsight::playback::{Playhead, PlayheadSampler};
use hindsight::session::ReplaySession;
use hindsight::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hindsight=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Hindsight launching...");

    // Load configuration
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("hindsight.toml"));
    hindsight::CONFIG.store(Arc::new(Config::load(Some(&path))?));
    let config = hindsight::CONFIG.load_full();

    let feeds = feed_factory(&config);
    let mut session = ReplaySession::start(Config::clone(&config), feeds)?;

    let playhead = Arc::new(Mutex::new(Playhead::new(
        config.retention(),
        config.playback.jump_back_secs,
    )));
    let sampler = PlayheadSampler::spawn(session.pair_handle(), playhead.clone(), config.playback.fps);

    let mut frames = sampler.frames();
    tokio::spawn(async move {
        while frames.changed().await.is_ok() {
            if let Some(frame) = frames.borrow_and_update().as_ref() {
                trace!(
                    "{} {:?} cam1={:?} cam2={:?}",
                    frame.label,
                    frame.view,
                    frame.timestamps[0],
                    frame.timestamps[1]
                );
            }
        }
    });

    let mut exports = Vec::new();
    let lines = spawn_stdin_reader()?;
    info!("Commands: play pause toggle view step speed reverse forward live seek export cams status quit");

    loop {
        let line = tokio::select! {
            line = lines.recv_async() => line,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        };
        let line = match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => line,
            // stdin closed
            Err(_) => break,
        };

        let cmd = match line.parse::<Command>() {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };

        let outcome = tokio::task::block_in_place(|| control::apply(cmd, &mut session, &playhead));
        match outcome {
            Ok(Outcome::Done(msg)) => info!("{}", msg),
            Ok(Outcome::Exporting(moment)) => {
                info!("Exporting 3 clips to {:?}", moment.dir);
                for handle in moment.exports {
                    exports.push(tokio::spawn(async move {
                        match handle.recv_async().await {
                            Ok(path) => info!("Clip saved: {:?}", path),
                            Err(e) => error!("Clip export failed: {}", e),
                        }
                    }));
                }
            }
            Ok(Outcome::Quit) => break,
            Err(e) => warn!("{}", e),
        }
    }

    sampler.stop();
    // let running exports finish reading the stores before they are removed
    for export in exports {
        let _ = export.await;
    }
    tokio::task::block_in_place(|| session.shutdown());
    info!("Hindsight shutting down");
    Ok(())
}

/// Blocking stdin lines forwarded to the async loop.
fn spawn_stdin_reader() -> Result<flume::Receiver<String>> {
    let (tx, rx) = flume::bounded(16);
    std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Failed to read command: {}", e);
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

#[cfg(feature = "v4l2")]
fn feed_factory(config: &Config) -> Arc<dyn FeedFactory> {
    Arc::new(hindsight::capture::V4l2Feeds::new(config.capture.clone()))
}

#[cfg(not(feature = "v4l2"))]
fn feed_factory(config: &Config) -> Arc<dyn FeedFactory> {
    info!("Built without v4l2, recording synthetic cameras");
    Arc::new(hindsight::capture::SyntheticFeeds::new(
        2,
        config.capture.width,
        config.capture.height,
        config.capture.write_fps * 2,
    ))
}
