//! Ring store behaviour through the public API: eviction, lookup, stepping
//! and teardown.

use std::path::Path;
use std::sync::Arc;

use image::{Rgb, RgbImage};

use hindsight::codec::JpegCodec;
use hindsight::pipeline::{step_pair, RingStore, StorageRoot};

fn frame(shade: u8) -> RgbImage {
    RgbImage::from_pixel(8, 6, Rgb([shade, shade / 2, 255 - shade]))
}

fn store(dir: &Path, label: &str, capacity: usize) -> RingStore {
    RingStore::with_dir(label, dir.join(label), capacity, 80, Arc::new(JpegCodec)).unwrap()
}

fn fill(store: &RingStore, timestamps: &[f64]) {
    for (i, &ts) in timestamps.iter().enumerate() {
        store.write(&frame(i as u8 * 20), ts);
    }
}

#[test]
fn overflow_evicts_the_oldest_frame_and_its_file() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(dir.path(), "a", 4);
    fill(&s, &[10.0, 10.5, 11.0, 11.5]);
    let oldest = s.nearest(10.0).unwrap();
    assert!(oldest.storage_key.exists());

    s.write(&frame(200), 12.0);

    assert_eq!(s.timestamps(), vec![10.5, 11.0, 11.5, 12.0]);
    assert!(!oldest.storage_key.exists());
    assert!(s.load(&oldest).is_none());
    assert_eq!(s.stats().frames_evicted, 1);
    assert_eq!(s.oldest_timestamp(), Some(10.5));
    assert_eq!(s.latest_timestamp(), Some(12.0));
}

#[test]
fn nearest_prefers_the_closer_neighbour() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(dir.path(), "a", 8);
    fill(&s, &[10.0, 10.5, 11.0]);

    assert_eq!(s.nearest(10.2).unwrap().timestamp, 10.0);
    assert_eq!(s.nearest(10.3).unwrap().timestamp, 10.5);
    assert_eq!(s.nearest(10.75).unwrap().timestamp, 10.5);
    assert_eq!(s.nearest(0.0).unwrap().timestamp, 10.0);
    assert_eq!(s.nearest(1e12).unwrap().timestamp, 11.0);
}

#[test]
fn step_forward_then_back_returns_to_start() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(dir.path(), "a", 16);
    let ts: Vec<f64> = (1..=10).map(f64::from).collect();
    fill(&s, &ts);

    let start = s.nearest(4.2).unwrap();
    let next = s.step(4.2, 1).unwrap();
    assert_eq!(next.timestamp, 5.0);
    assert_eq!(s.step(next.timestamp, -1).unwrap().timestamp, start.timestamp);

    // clamped at both ends
    assert_eq!(s.step(9.9, 3).unwrap().timestamp, 10.0);
    assert_eq!(s.step(1.0, -3).unwrap().timestamp, 1.0);
}

#[test]
fn loaded_frames_keep_their_dimensions() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(dir.path(), "a", 4);
    s.write(&frame(90), 1.0);
    let r = s.nearest(1.0).unwrap();
    assert_eq!(r.dimensions, (8, 6));
    assert_eq!(s.load(&r).unwrap().dimensions(), (8, 6));
}

#[test]
fn paired_step_lands_on_the_closest_frame_of_either_camera() {
    let dir = tempfile::tempdir().unwrap();
    let a = store(dir.path(), "a", 16);
    let b = store(dir.path(), "b", 16);
    fill(&a, &[1.0, 2.0, 3.0, 4.0]);
    fill(&b, &[1.1, 1.6, 2.6, 3.6]);

    // a: 2.0 -> 3.0, b: 1.6 -> 2.6
    assert_eq!(step_pair(&a, &b, 2.0, 1), Some(2.6));
    // a: 2.0 -> 1.0, b: 2.6 -> 1.6
    assert_eq!(step_pair(&a, &b, 2.4, -1), Some(1.6));
}

#[test]
fn closed_store_ignores_late_writes_and_removes_its_directory() {
    let dir = tempfile::tempdir().unwrap();
    let root = StorageRoot::claim(dir.path().join("buffer")).unwrap();
    let s = RingStore::create(&root, "0", 4, 80, Arc::new(JpegCodec)).unwrap();
    fill(&s, &[1.0, 2.0]);
    let cam_dir = root.camera_dir("0");
    assert!(cam_dir.exists());

    s.close();
    s.write(&frame(1), 3.0);

    assert!(s.is_empty());
    assert!(s.nearest(3.0).is_none());
    assert!(!cam_dir.exists());

    drop(s);
    drop(root);
    assert!(!dir.path().join("buffer").exists());
}
