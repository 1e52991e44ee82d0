//! Capture feed abstraction and the built-in synthetic source

use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use image::{Rgb, RgbImage};

use super::frame::Frame;

/// A live source of raw frames for one camera.
pub trait CaptureFeed: Send {
    /// Block until the next frame is available.
    fn capture_frame(&mut self) -> Result<Frame>;
}

/// Opens feeds by camera index. Shared by the scan and by every writer thread.
pub trait FeedFactory: Send + Sync {
    fn open(&self, camera: u32) -> Result<Box<dyn CaptureFeed>>;

    /// Cheap check that a camera index answers.
    fn probe(&self, camera: u32) -> bool;

    /// Indexes in `0..range` that answered a probe, in order.
    fn scan(&self, range: u32) -> Vec<u32> {
        (0..range).filter(|&idx| self.probe(idx)).collect()
    }
}

/// Moving test pattern, one distinct hue per camera index.
///
/// Stands in for real devices when the crate is built without `v4l2`, and in tests.
#[derive(Debug, Clone)]
pub struct SyntheticFeeds {
    pub cameras: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl SyntheticFeeds {
    pub fn new(cameras: u32, width: u32, height: u32, fps: u32) -> Self {
        Self {
            cameras,
            width,
            height,
            fps: fps.max(1),
        }
    }
}

impl FeedFactory for SyntheticFeeds {
    fn open(&self, camera: u32) -> Result<Box<dyn CaptureFeed>> {
        if !self.probe(camera) {
            return Err(eyre!("Synthetic camera {} does not exist", camera));
        }
        Ok(Box::new(SyntheticFeed {
            camera,
            width: self.width,
            height: self.height,
            period: Duration::from_secs_f64(1.0 / self.fps as f64),
            next_due: Instant::now(),
            sequence: 0,
        }))
    }

    fn probe(&self, camera: u32) -> bool {
        camera < self.cameras
    }
}

pub struct SyntheticFeed {
    camera: u32,
    width: u32,
    height: u32,
    period: Duration,
    next_due: Instant,
    sequence: u64,
}

impl SyntheticFeed {
    fn render(&self) -> RgbImage {
        let hue = (self.camera as u8).wrapping_mul(85);
        // a bar sweeping left to right, one pixel column per frame
        let bar = (self.sequence % self.width.max(1) as u64) as u32;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            if x == bar {
                Rgb([255, 255, 255])
            } else {
                Rgb([hue, (y % 256) as u8, (x % 256) as u8])
            }
        })
    }
}

impl CaptureFeed for SyntheticFeed {
    fn capture_frame(&mut self) -> Result<Frame> {
        let now = Instant::now();
        if self.next_due > now {
            std::thread::sleep(self.next_due - now);
        }
        self.next_due = self.next_due.max(now) + self.period;
        self.sequence += 1;
        Ok(Frame::from_rgb(self.render(), self.sequence))
    }
}
