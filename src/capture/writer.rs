//! Per-camera producer thread feeding a ring store at the write cadence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use image::imageops::{self, FilterType};
use tracing::{debug, error, info, warn};

use crate::capture::decoder::decode_frame;
use crate::capture::feed::FeedFactory;
use crate::pipeline::RingStore;
use crate::utils::wall_clock_secs;

/// Pacing and sizing for one writer thread
#[derive(Debug, Clone, Copy)]
pub struct WriterSettings {
    pub width: u32,
    pub height: u32,
    pub write_fps: u32,
}

/// Handle to a running capture writer.
///
/// Stopping is cooperative: the thread checks its stop flag every iteration.
pub struct CaptureWriter {
    camera: u32,
    stop: Arc<AtomicBool>,
    exited: flume::Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureWriter {
    pub fn spawn(
        camera: u32,
        feeds: Arc<dyn FeedFactory>,
        store: Arc<RingStore>,
        settings: WriterSettings,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        // dropped when the thread returns, which disconnects `exited`
        let (exit_tx, exited) = flume::bounded::<()>(1);

        let flag = stop.clone();
        let handle = thread::Builder::new()
            .name(format!("capture-{}", camera))
            .spawn(move || {
                let _exit_tx = exit_tx;
                run_writer(camera, feeds.as_ref(), &store, settings, &flag);
            })?;

        info!("Capture writer started for camera {}", camera);
        Ok(Self {
            camera,
            stop,
            exited,
            handle: Some(handle),
        })
    }

    pub fn camera(&self) -> u32 {
        self.camera
    }

    /// Ask the thread to stop without waiting.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Signal stop and wait up to `timeout`. Returns false when the thread was
    /// abandoned still running.
    pub fn stop_and_wait(mut self, timeout: Duration) -> bool {
        self.request_stop();
        match self.exited.recv_timeout(timeout) {
            Err(flume::RecvTimeoutError::Timeout) => {
                warn!(
                    "Capture writer for camera {} did not stop within {:?}, abandoning it",
                    self.camera, timeout
                );
                self.handle.take();
                false
            }
            _ => {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        error!("Capture writer for camera {} panicked", self.camera);
                    }
                }
                info!("Capture writer for camera {} stopped", self.camera);
                true
            }
        }
    }
}

impl Drop for CaptureWriter {
    fn drop(&mut self) {
        self.request_stop();
    }
}

fn run_writer(
    camera: u32,
    feeds: &dyn FeedFactory,
    store: &RingStore,
    settings: WriterSettings,
    stop: &AtomicBool,
) {
    let mut feed = match feeds.open(camera) {
        Ok(feed) => feed,
        Err(e) => {
            error!("Camera {} did not open: {}", camera, e);
            return;
        }
    };

    let period = 1.0 / settings.write_fps.max(1) as f64;
    let mut next_write = wall_clock_secs();

    while !stop.load(Ordering::Relaxed) {
        let frame = match feed.capture_frame() {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Camera {} read failed: {}", camera, e);
                thread::sleep(Duration::from_millis(10));
                continue;
            }
        };
        let ts = wall_clock_secs();
        metrics::counter!("capture_frames_total").increment(1);
        metrics::histogram!("capture_latency_us")
            .record(frame.timestamp.elapsed().as_micros() as f64);

        if ts >= next_write {
            match decode_frame(&frame) {
                Ok(mut image) => {
                    if image.dimensions() != (settings.width, settings.height) {
                        image = imageops::resize(
                            &image,
                            settings.width,
                            settings.height,
                            FilterType::Triangle,
                        );
                    }
                    store.write(&image, ts);
                }
                Err(e) => debug!("Camera {} frame undecodable: {}", camera, e),
            }
            next_write += period;
        } else {
            metrics::counter!("capture_frames_skipped").increment(1);
        }

        thread::sleep(Duration::from_millis(1));
    }
}
