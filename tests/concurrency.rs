//! One producer and several readers hammering a small store.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};

use hindsight::codec::JpegCodec;
use hindsight::pipeline::RingStore;

const CAPACITY: usize = 8;

#[test]
fn readers_never_see_out_of_order_or_oversized_state() {
    let dir = tempfile::tempdir().unwrap();
    let store = RingStore::with_dir("c", dir.path().join("c"), CAPACITY, 60, Arc::new(JpegCodec)).unwrap();
    let done = AtomicBool::new(false);
    let loads = AtomicUsize::new(0);
    let misses = AtomicUsize::new(0);

    thread::scope(|s| {
        s.spawn(|| {
            let image = RgbImage::from_pixel(16, 16, Rgb([10, 200, 90]));
            let deadline = Instant::now() + Duration::from_millis(500);
            let mut ts = 1000.0;
            while Instant::now() < deadline {
                store.write(&image, ts);
                ts += 0.05;
            }
            done.store(true, Ordering::Release);
        });

        for reader in 0..3 {
            let (store, done, loads, misses) = (&store, &done, &loads, &misses);
            s.spawn(move || {
                let mut probe = 1000.0 + reader as f64;
                while !done.load(Ordering::Acquire) {
                    let snapshot = store.timestamps();
                    assert!(snapshot.len() <= CAPACITY);
                    assert!(snapshot.windows(2).all(|w| w[0] <= w[1]));

                    if let Some(r) = store.nearest(probe) {
                        // the head only moves forward
                        if let Some(&lo) = snapshot.first() {
                            assert!(r.timestamp >= lo, "{} < {}", r.timestamp, lo);
                        }
                        // the frame may be evicted between lookup and load
                        match store.load(&r) {
                            Some(img) => {
                                assert_eq!(img.dimensions(), (16, 16));
                                loads.fetch_add(1, Ordering::Relaxed);
                            }
                            None => {
                                misses.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                    let _ = store.step(probe, -2);
                    probe += 0.013;
                }
            });
        }
    });

    let stats = store.stats();
    assert!(stats.len <= CAPACITY);
    assert_eq!(stats.frames_written, stats.len + stats.frames_evicted);
    assert!(loads.load(Ordering::Relaxed) + misses.load(Ordering::Relaxed) > 0);

    // every retained reference still points at a readable file
    for ts in store.timestamps() {
        let r = store.nearest(ts).unwrap();
        assert!(r.storage_key.exists());
    }
}
