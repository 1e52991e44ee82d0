//! Disk-backed, time-indexed ring buffer of encoded frames

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam::utils::CachePadded;
use image::RgbImage;
use tracing::{debug, info, instrument, trace, warn};

use super::retrieval::{nearest_index, step_index};
use super::storage::StorageRoot;
use crate::codec::FrameCodec;
use crate::utils::timestamp_micros;

/// One retained frame. Immutable once created.
#[derive(Debug, Clone)]
pub struct FrameRef {
    /// Capture time, seconds since the Unix epoch
    pub timestamp: f64,
    /// Encoded frame on disk, unique per reference
    pub storage_key: Arc<Path>,
    /// (width, height) of the raw frame
    pub dimensions: (u32, u32),
}

/// Bounded history of one camera.
///
/// The index mutex is the only critical section: encoding, decoding and file
/// I/O all happen outside it, so the producer's append never waits on a slow
/// reader and readers never wait on the encoder.
pub struct RingStore {
    label: String,
    dir: PathBuf,
    capacity: usize,
    quality: u8,
    codec: Arc<dyn FrameCodec>,

    /// Non-decreasing by timestamp; append at the tail, evict at the head
    index: Mutex<VecDeque<FrameRef>>,
    next_seq: AtomicU64,
    closed: AtomicBool,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicUsize,
    frames_dropped: AtomicUsize,
    frames_evicted: AtomicUsize,
    eviction_failures: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    pub frames_written: usize,
    pub frames_dropped: usize,
    pub frames_evicted: usize,
    pub eviction_failures: usize,
    pub len: usize,
    pub capacity: usize,
}

impl RingStore {
    /// Create the store for camera `label` under the storage root.
    pub fn create(
        root: &StorageRoot,
        label: &str,
        capacity: usize,
        quality: u8,
        codec: Arc<dyn FrameCodec>,
    ) -> io::Result<Self> {
        Self::with_dir(label, root.camera_dir(label), capacity, quality, codec)
    }

    /// Create a store backed by `dir`, purging any files already in it.
    #[instrument(skip(dir, codec))]
    pub fn with_dir(
        label: &str,
        dir: impl AsRef<Path>,
        capacity: usize,
        quality: u8,
        codec: Arc<dyn FrameCodec>,
    ) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut purged = 0usize;
        for entry in fs::read_dir(&dir)?.flatten() {
            let path = entry.path();
            if path.is_file() && fs::remove_file(&path).is_ok() {
                purged += 1;
            }
        }
        if purged > 0 {
            info!("Purged {} stale frames from {:?}", purged, dir);
        }

        let capacity = capacity.max(2);
        Ok(Self {
            label: label.to_string(),
            dir,
            capacity,
            quality: quality.min(100),
            codec,
            index: Mutex::new(VecDeque::with_capacity(capacity.min(1 << 16))),
            next_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            stats: CachePadded::new(Stats::default()),
        })
    }

    fn index(&self) -> MutexGuard<'_, VecDeque<FrameRef>> {
        // a panicking reader cannot leave the deque half-mutated
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn len(&self) -> usize {
        self.index().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Encode and append a frame, evicting the oldest one on overflow.
    ///
    /// Best effort: an encode or write failure drops the frame and leaves the
    /// store untouched. Writes to a closed store are ignored.
    pub fn write(&self, frame: &RgbImage, timestamp: f64) {
        if self.is_closed() {
            trace!("cam {}: write after close ignored", self.label);
            return;
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let bytes = match self.codec.encode(frame, self.quality) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.drop_frame(format_args!("encode failed: {}", e));
                return;
            }
        };

        let path = self.dir.join(format!(
            "{:020}-{:010}.{}",
            timestamp_micros(timestamp),
            seq,
            self.codec.extension()
        ));
        if let Err(e) = fs::write(&path, &bytes) {
            self.drop_frame(format_args!("write {:?} failed: {}", path, e));
            return;
        }

        let entry = FrameRef {
            timestamp,
            storage_key: Arc::from(path),
            dimensions: frame.dimensions(),
        };

        let evicted = {
            let mut index = self.index();
            if self.is_closed() {
                drop(index);
                let _ = fs::remove_file(&entry.storage_key);
                return;
            }
            index.push_back(entry);
            if index.len() > self.capacity {
                index.pop_front()
            } else {
                None
            }
        };

        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("ring_frames_written", "camera" => self.label.clone()).increment(1);

        if let Some(old) = evicted {
            self.stats.frames_evicted.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("ring_frames_evicted", "camera" => self.label.clone()).increment(1);
            // a leaked file beats an index that points at nothing
            if let Err(e) = fs::remove_file(&old.storage_key) {
                self.stats.eviction_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "cam {}: failed to remove evicted frame {:?}: {}",
                    self.label, old.storage_key, e
                );
            }
        }
    }

    fn drop_frame(&self, reason: std::fmt::Arguments<'_>) {
        self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("ring_frames_dropped", "camera" => self.label.clone()).increment(1);
        debug!("cam {}: frame dropped, {}", self.label, reason);
    }

    /// Entry closest to `timestamp`, see [`nearest_index`] for the tie policy.
    pub fn nearest(&self, timestamp: f64) -> Option<FrameRef> {
        let index = self.index();
        nearest_index(&index, timestamp).map(|pos| index[pos].clone())
    }

    /// Entry `delta` positions away from the one nearest `timestamp`, clamped.
    pub fn step(&self, timestamp: f64, delta: i64) -> Option<FrameRef> {
        let index = self.index();
        step_index(&index, timestamp, delta).map(|pos| index[pos].clone())
    }

    pub fn latest_timestamp(&self) -> Option<f64> {
        self.index().back().map(|r| r.timestamp)
    }

    pub fn oldest_timestamp(&self) -> Option<f64> {
        self.index().front().map(|r| r.timestamp)
    }

    /// Snapshot of the retained timestamps, oldest first.
    pub fn timestamps(&self) -> Vec<f64> {
        self.index().iter().map(|r| r.timestamp).collect()
    }

    /// Decode a referenced frame. `None` means "no frame available now":
    /// the file was evicted since the reference was taken, or it is unreadable.
    pub fn load(&self, frame: &FrameRef) -> Option<RgbImage> {
        let data = match fs::read(&frame.storage_key) {
            Ok(data) => data,
            Err(e) => {
                trace!("cam {}: {:?} unavailable: {}", self.label, frame.storage_key, e);
                return None;
            }
        };
        match self.codec.decode(&data) {
            Ok(image) => Some(image),
            Err(e) => {
                debug!("cam {}: {:?} undecodable: {}", self.label, frame.storage_key, e);
                None
            }
        }
    }

    /// Remove every frame and its file.
    pub fn clear(&self) {
        let drained: Vec<FrameRef> = self.index().drain(..).collect();
        let mut failed = 0usize;
        for entry in &drained {
            match fs::remove_file(&entry.storage_key) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(_) => failed += 1,
            }
        }
        if failed > 0 {
            warn!("cam {}: {} frame files could not be removed", self.label, failed);
        }
        debug!("cam {}: cleared {} frames", self.label, drained.len());
    }

    /// Stop accepting writes, drop every frame and remove the directory.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.clear();
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("cam {}: failed to remove {:?}: {}", self.label, self.dir, e),
        }
        info!("cam {}: ring store closed", self.label);
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            frames_written: self.stats.frames_written.load(Ordering::Relaxed),
            frames_dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
            frames_evicted: self.stats.frames_evicted.load(Ordering::Relaxed),
            eviction_failures: self.stats.eviction_failures.load(Ordering::Relaxed),
            len: self.len(),
            capacity: self.capacity,
        }
    }
}

impl Drop for RingStore {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for RingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingStore")
            .field("label", &self.label)
            .field("dir", &self.dir)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JpegCodec;
    use crate::{Error, Result};
    use bytes::Bytes;
    use image::Rgb;

    fn frame(shade: u8) -> RgbImage {
        RgbImage::from_pixel(8, 6, Rgb([shade, shade, shade]))
    }

    fn store(dir: &Path, capacity: usize) -> RingStore {
        RingStore::with_dir("t", dir.join("cam_t"), capacity, 80, Arc::new(JpegCodec)).unwrap()
    }

    struct FailingCodec;

    impl FrameCodec for FailingCodec {
        fn encode(&self, _: &RgbImage, _: u8) -> Result<Bytes> {
            Err(Error::Codec("disk full".into()))
        }
        fn decode(&self, _: &[u8]) -> Result<RgbImage> {
            Err(Error::Codec("nope".into()))
        }
        fn extension(&self) -> &'static str {
            "bin"
        }
    }

    #[test]
    fn capacity_is_clamped_to_two() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(store(dir.path(), 0).capacity(), 2);
    }

    #[test]
    fn overflow_evicts_oldest_and_its_file() {
        let dir = tempfile::tempdir().unwrap();
        let ring = store(dir.path(), 4);
        for (i, ts) in [10.0, 10.5, 11.0, 11.5].into_iter().enumerate() {
            ring.write(&frame(i as u8 * 40), ts);
        }
        let oldest = ring.nearest(10.0).unwrap();
        assert!(oldest.storage_key.exists());

        ring.write(&frame(200), 12.0);

        assert_eq!(ring.timestamps(), vec![10.5, 11.0, 11.5, 12.0]);
        assert!(!oldest.storage_key.exists());
        assert_eq!(ring.stats().frames_evicted, 1);
        // stale reference now loads as "no frame"
        assert!(ring.load(&oldest).is_none());
    }

    #[test]
    fn encode_failure_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let ring =
            RingStore::with_dir("f", dir.path().join("cam_f"), 4, 80, Arc::new(FailingCodec))
                .unwrap();
        ring.write(&frame(1), 1.0);
        assert!(ring.is_empty());
        assert_eq!(ring.stats().frames_dropped, 1);
        assert_eq!(fs::read_dir(ring.dir()).unwrap().count(), 0);
    }

    #[test]
    fn identical_timestamps_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let ring = store(dir.path(), 4);
        ring.write(&frame(1), 5.0);
        ring.write(&frame(2), 5.0);
        let a = ring.step(5.0, 0).unwrap();
        let b = ring.step(5.0, 1).unwrap();
        assert_ne!(a.storage_key, b.storage_key);
        assert_eq!(fs::read_dir(ring.dir()).unwrap().count(), 2);
    }

    #[test]
    fn file_names_sort_like_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let ring = store(dir.path(), 8);
        for ts in [9.5, 10.0, 100.25] {
            ring.write(&frame(0), ts);
        }
        let mut names: Vec<String> = fs::read_dir(ring.dir())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert!(names[0].starts_with("00000000000009500000-"));
        assert!(names[2].starts_with("00000000000100250000-"));
    }

    #[test]
    fn load_roundtrips_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let ring = store(dir.path(), 4);
        ring.write(&frame(128), 1.0);
        let r = ring.nearest(1.0).unwrap();
        assert_eq!(r.dimensions, (8, 6));
        let img = ring.load(&r).unwrap();
        assert_eq!(img.dimensions(), (8, 6));
    }

    #[test]
    fn clear_removes_files_and_entries() {
        let dir = tempfile::tempdir().unwrap();
        let ring = store(dir.path(), 4);
        ring.write(&frame(1), 1.0);
        ring.write(&frame(2), 2.0);
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.latest_timestamp(), None);
        assert_eq!(fs::read_dir(ring.dir()).unwrap().count(), 0);
        // still usable after a clear
        ring.write(&frame(3), 3.0);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn closed_store_ignores_late_writes() {
        let dir = tempfile::tempdir().unwrap();
        let ring = store(dir.path(), 4);
        ring.write(&frame(1), 1.0);
        ring.close();
        assert!(!ring.dir().exists());

        ring.write(&frame(2), 2.0);
        assert!(ring.is_empty());
        assert!(!ring.dir().exists());
    }

    #[test]
    fn creation_purges_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let cam = dir.path().join("cam_t");
        fs::create_dir_all(&cam).unwrap();
        fs::write(cam.join("00000000000000000001-0000000000.jpg"), b"old").unwrap();

        let ring = store(dir.path(), 4);
        assert!(ring.is_empty());
        assert_eq!(fs::read_dir(ring.dir()).unwrap().count(), 0);
    }

    #[test]
    fn bounds_follow_head_and_tail() {
        let dir = tempfile::tempdir().unwrap();
        let ring = store(dir.path(), 3);
        assert_eq!(ring.oldest_timestamp(), None);
        for ts in [1.0, 2.0, 3.0, 4.0] {
            ring.write(&frame(0), ts);
        }
        assert_eq!(ring.oldest_timestamp(), Some(2.0));
        assert_eq!(ring.latest_timestamp(), Some(4.0));
    }
}
