//! Replay session: owns the storage root, both ring stores and their writers.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tracing::{info, instrument, warn};

use crate::capture::{CaptureWriter, FeedFactory, WriterSettings};
use crate::codec::{FrameCodec, JpegCodec};
use crate::export::{moment_window, spawn_export, ClipJob, ExportHandle, ViewMode};
use crate::pipeline::{combined_latest, combined_oldest, step_pair, RingStats, RingStore, StorageRoot};
use crate::utils::moment_stamp;
use crate::{Config, Error, Result};

/// The stores currently being recorded, published as one unit.
#[derive(Debug)]
pub struct StorePair {
    /// Device index feeding each slot
    pub cameras: [u32; 2],
    pub stores: [Arc<RingStore>; 2],
}

impl StorePair {
    /// Live edge both cameras can serve.
    pub fn live_edge(&self) -> Option<f64> {
        combined_latest(&self.stores[0], &self.stores[1])
    }

    pub fn oldest(&self) -> Option<f64> {
        combined_oldest(&self.stores[0], &self.stores[1])
    }

    pub fn step(&self, timestamp: f64, delta: i64) -> Option<f64> {
        step_pair(&self.stores[0], &self.stores[1], timestamp, delta)
    }
}

#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub cameras: [u32; 2],
    pub live: Option<f64>,
    pub oldest: Option<f64>,
    pub stats: [RingStats; 2],
}

/// The three clips launched by one export action.
pub struct Moment {
    pub dir: PathBuf,
    pub start: f64,
    pub end: f64,
    pub exports: Vec<ExportHandle>,
}

pub struct ReplaySession {
    config: Config,
    feeds: Arc<dyn FeedFactory>,
    codec: Arc<dyn FrameCodec>,
    pair: Arc<ArcSwap<StorePair>>,
    writers: Vec<CaptureWriter>,
    // dropped last so the stores are closed before the root goes away
    root: StorageRoot,
}

impl ReplaySession {
    /// Claim the buffer directory, pick two cameras and start recording.
    #[instrument(skip_all)]
    pub fn start(config: Config, feeds: Arc<dyn FeedFactory>) -> Result<Self> {
        let root = StorageRoot::claim(&config.buffer.dir)?;
        let cameras = pick_cameras(feeds.as_ref(), &config);
        let codec: Arc<dyn FrameCodec> = Arc::new(JpegCodec);

        let pair = build_pair(&root, &config, &codec, cameras)?;
        let mut session = Self {
            config,
            feeds,
            codec,
            pair: Arc::new(ArcSwap::from_pointee(pair)),
            writers: Vec::new(),
            root,
        };
        session.spawn_writers()?;
        info!(
            "Recording cameras {:?}, {} frames per store",
            cameras,
            session.config.ring_capacity()
        );
        Ok(session)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current store pair. Holders keep the stores alive but a swap closes
    /// them, after which they read as empty.
    pub fn stores(&self) -> Arc<StorePair> {
        self.pair.load_full()
    }

    /// Shared handle for consumers that must follow camera swaps.
    pub fn pair_handle(&self) -> Arc<ArcSwap<StorePair>> {
        self.pair.clone()
    }

    pub fn cameras(&self) -> [u32; 2] {
        self.pair.load().cameras
    }

    fn spawn_writers(&mut self) -> Result<()> {
        let pair = self.pair.load_full();
        let settings = WriterSettings {
            width: self.config.capture.width,
            height: self.config.capture.height,
            write_fps: self.config.capture.write_fps,
        };
        for (camera, store) in pair.cameras.iter().zip(pair.stores.iter()) {
            let writer =
                CaptureWriter::spawn(*camera, self.feeds.clone(), store.clone(), settings)?;
            self.writers.push(writer);
        }
        Ok(())
    }

    fn stop_writers(&mut self) {
        let timeout = Duration::from_millis(self.config.capture.stop_timeout_ms);
        for writer in &self.writers {
            writer.request_stop();
        }
        for writer in self.writers.drain(..) {
            let camera = writer.camera();
            if !writer.stop_and_wait(timeout) {
                warn!("Camera {} writer abandoned", camera);
            }
        }
    }

    /// Record from cameras `a` and `b` instead, discarding all history.
    #[instrument(skip(self))]
    pub fn swap_cameras(&mut self, a: u32, b: u32) -> Result<()> {
        if a == b {
            return Err(Error::Capture(format!("camera {} selected twice", a)));
        }
        for camera in [a, b] {
            if !self.feeds.probe(camera) {
                return Err(Error::Capture(format!("camera {} does not answer", camera)));
            }
        }

        self.stop_writers();
        let old = self.pair.load_full();
        for store in old.stores.iter() {
            store.close();
        }

        let pair = build_pair(&self.root, &self.config, &self.codec, [a, b])?;
        self.pair.store(Arc::new(pair));
        self.spawn_writers()?;
        info!("Now recording cameras {} and {}", a, b);
        Ok(())
    }

    /// Export the clip window ending at `playhead` in all three view modes.
    pub fn export_moment(&self, playhead: f64) -> Result<Moment> {
        let pair = self.pair.load_full();
        let live = pair
            .live_edge()
            .ok_or_else(|| Error::InvalidWindow("not enough buffered footage".into()))?;

        let export = &self.config.export;
        let (start, end) = moment_window(
            playhead,
            live,
            self.config.retention(),
            export.clip_secs,
            self.config.playback.fps,
        )?;

        let jobs = ViewMode::ALL
            .iter()
            .map(|&mode| {
                let job = ClipJob::new(pair.stores.clone(), start, end, mode, export);
                job.validate().map(|()| job)
            })
            .collect::<Result<Vec<_>>>()?;

        let stamp = moment_stamp(end);
        let dir = export.dir.join(format!("moment_{}", stamp));
        fs::create_dir_all(&dir)?;

        let exports = jobs
            .into_iter()
            .map(|job| {
                let path = dir.join(format!("clip_{}_{}.mp4", job.mode.tag(), stamp));
                spawn_export(job, path, export)
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Exporting {:.1} s moment {} to {:?}",
            end - start,
            stamp,
            dir
        );
        Ok(Moment {
            dir,
            start,
            end,
            exports,
        })
    }

    pub fn status(&self) -> SessionStatus {
        let pair = self.pair.load();
        SessionStatus {
            cameras: pair.cameras,
            live: pair.live_edge(),
            oldest: pair.oldest(),
            stats: [pair.stores[0].stats(), pair.stores[1].stats()],
        }
    }

    /// Stop recording and remove every buffered frame.
    pub fn shutdown(mut self) {
        self.stop_writers();
        for store in self.pair.load().stores.iter() {
            store.close();
        }
        info!("Session closed, buffer at {:?} removed", self.root.path());
    }
}

impl Drop for ReplaySession {
    fn drop(&mut self) {
        for writer in &self.writers {
            writer.request_stop();
        }
    }
}

/// First two cameras that answer a scan, else the configured pair.
fn pick_cameras(feeds: &dyn FeedFactory, config: &Config) -> [u32; 2] {
    let found = feeds.scan(config.capture.scan_range);
    info!("Cameras found: {:?}", found);
    match found.as_slice() {
        [a, b, ..] => [*a, *b],
        _ => {
            warn!(
                "Fewer than two cameras answered, using configured {:?}",
                config.capture.cameras
            );
            config.capture.cameras
        }
    }
}

fn build_pair(
    root: &StorageRoot,
    config: &Config,
    codec: &Arc<dyn FrameCodec>,
    cameras: [u32; 2],
) -> Result<StorePair> {
    let make = |label: &str| -> Result<Arc<RingStore>> {
        Ok(Arc::new(RingStore::create(
            root,
            label,
            config.ring_capacity(),
            config.buffer.jpeg_quality,
            codec.clone(),
        )?))
    };
    Ok(StorePair {
        cameras,
        stores: [make("0")?, make("1")?],
    })
}
