//! Clip extraction: sample both stores across a window at a fixed cadence,
//! compose each instant and stream the result to a sink.

pub mod avi;
pub mod compose;
#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_sink;
pub mod sink;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, info_span};

pub use compose::{compose, fit_within, ViewMode};
pub use sink::{open_with_fallback, ClipSink, MemorySink, SinkFormat};

use crate::pipeline::RingStore;
use crate::{Error, ExportConfig, Result};

/// One clip to render. Holds the stores only for reading.
#[derive(Debug, Clone)]
pub struct ClipJob {
    pub stores: [Arc<RingStore>; 2],
    pub start: f64,
    pub end: f64,
    /// Output frames per second of the clip
    pub cadence: f64,
    pub mode: ViewMode,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractSummary {
    pub frames: usize,
    /// Camera regions rendered black because no frame was available
    pub blank_regions: usize,
}

impl ClipJob {
    /// Job over `[start, end]` at the export cadence and canvas size.
    pub fn new(
        stores: [Arc<RingStore>; 2],
        start: f64,
        end: f64,
        mode: ViewMode,
        config: &ExportConfig,
    ) -> Self {
        Self {
            stores,
            start,
            end,
            cadence: config.fps.max(1) as f64,
            mode,
            width: config.width,
            height: config.height,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.start.is_finite() || !self.end.is_finite() {
            return Err(Error::InvalidWindow("window bounds must be finite".into()));
        }
        if self.end <= self.start {
            return Err(Error::InvalidWindow(format!(
                "end {:.3} is not after start {:.3}",
                self.end, self.start
            )));
        }
        if !(self.cadence.is_finite() && self.cadence > 0.0) {
            return Err(Error::InvalidWindow(format!("cadence {} is not positive", self.cadence)));
        }
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidWindow("empty canvas".into()));
        }
        Ok(())
    }

    /// Number of frames the clip will contain.
    pub fn frame_count(&self) -> usize {
        (((self.end - self.start) * self.cadence).round() as usize).max(1)
    }

    /// Sampling instant of frame `i`.
    pub fn sample_time(&self, i: usize) -> f64 {
        (self.start + (i + 1) as f64 / self.cadence).min(self.end)
    }
}

/// Render `job` into `sink`. The sink is left open for the caller to finish.
pub fn extract(job: &ClipJob, sink: &mut dyn ClipSink) -> Result<ExtractSummary> {
    job.validate()?;

    let total = job.frame_count();
    let mut blank_regions = 0usize;

    for i in 0..total {
        let t = job.sample_time(i);
        let mut sources = [None, None];
        for (camera, store) in job.stores.iter().enumerate() {
            if !job.mode.uses(camera) {
                continue;
            }
            sources[camera] = store.nearest(t).and_then(|r| store.load(&r));
            if sources[camera].is_none() {
                blank_regions += 1;
            }
        }

        let frame = compose(
            job.mode,
            sources[0].as_ref(),
            sources[1].as_ref(),
            job.width,
            job.height,
        );
        sink.write_frame(&frame)?;
    }

    metrics::counter!("export_frames_written", "mode" => job.mode.tag()).increment(total as u64);
    if blank_regions > 0 {
        debug!("{} blank regions in {:?} clip", blank_regions, job.mode);
    }
    Ok(ExtractSummary {
        frames: total,
        blank_regions,
    })
}

/// Completion of one background export.
///
/// Resolves once with the path actually written, which carries the fallback
/// extension when the primary container was unavailable.
pub struct ExportHandle {
    mode: ViewMode,
    requested: PathBuf,
    result: flume::Receiver<Result<PathBuf>>,
}

impl ExportHandle {
    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn requested_path(&self) -> &Path {
        &self.requested
    }

    /// Block until the job finishes.
    pub fn wait(self) -> Result<PathBuf> {
        self.result.recv().unwrap_or_else(|_| Err(lost()))
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<PathBuf>> {
        match self.result.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(flume::RecvTimeoutError::Timeout) => None,
            Err(flume::RecvTimeoutError::Disconnected) => Some(Err(lost())),
        }
    }

    /// Non-blocking poll.
    pub fn try_result(&self) -> Option<Result<PathBuf>> {
        match self.result.try_recv() {
            Ok(result) => Some(result),
            Err(flume::TryRecvError::Empty) => None,
            Err(flume::TryRecvError::Disconnected) => Some(Err(lost())),
        }
    }

    pub async fn recv_async(self) -> Result<PathBuf> {
        self.result.recv_async().await.unwrap_or_else(|_| Err(lost()))
    }
}

fn lost() -> Error {
    Error::Sink("export thread ended without a result".into())
}

/// Run `job` on its own thread, writing MP4 at `path` or the AVI fallback.
///
/// An invalid window is rejected here and no thread is started.
pub fn spawn_export(job: ClipJob, path: PathBuf, config: &ExportConfig) -> Result<ExportHandle> {
    job.validate()?;
    let (tx, rx) = flume::bounded(1);
    let handle = ExportHandle {
        mode: job.mode,
        requested: path.clone(),
        result: rx,
    };

    let quality = config.quality;
    let name = format!("export-{}", job.mode.tag());
    let worker_tx = tx.clone();
    let spawned = thread::Builder::new().name(name).spawn(move || {
        let _ = worker_tx.send(run_export(&job, &path, quality));
    });
    if let Err(e) = spawned {
        let _ = tx.send(Err(Error::Io(e)));
    }
    Ok(handle)
}

fn run_export(job: &ClipJob, path: &Path, quality: u8) -> Result<PathBuf> {
    let span = info_span!("export", mode = job.mode.tag());
    let _enter = span.enter();

    let result = write_clip(job, path, quality);
    if let Err(e) = &result {
        error!("Export of {:?} failed: {}", path, e);
    }
    result
}

fn write_clip(job: &ClipJob, path: &Path, quality: u8) -> Result<PathBuf> {
    let started = Instant::now();
    let fps = job.cadence.round().max(1.0) as u32;
    let mut sink = open_with_fallback(
        path,
        SinkFormat::Mp4,
        SinkFormat::MjpegAvi,
        fps,
        job.width,
        job.height,
        quality,
    )?;
    let summary = extract(job, sink.as_mut())?;
    let out = sink.finish()?;
    info!(
        "Exported {} frames ({} blank regions) to {:?} in {:?}",
        summary.frames,
        summary.blank_regions,
        out,
        started.elapsed()
    );
    Ok(out)
}

/// Window for a clip ending at the playhead.
///
/// Ends at `min(playhead, live)` and reaches back `clip_secs`, but never past
/// the start of the retention window. Windows shorter than one playback frame
/// are rejected.
pub fn moment_window(
    playhead: f64,
    live: f64,
    retention: f64,
    clip_secs: f64,
    playback_fps: u32,
) -> Result<(f64, f64)> {
    let end = playhead.min(live);
    let start = (end - clip_secs).max(live - retention);
    if start >= end - 1.0 / playback_fps.max(1) as f64 {
        return Err(Error::InvalidWindow(format!(
            "{:.0} s window unavailable at the playhead",
            clip_secs
        )));
    }
    Ok((start, end))
}
