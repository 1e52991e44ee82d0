use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Raw frame as delivered by a capture feed
#[derive(Clone)]
pub struct Frame {
    /// Immutable payload in `meta.format` - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Arrival time, used for capture latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Yuyv4,
    Mjpeg,
    Nv12,
}

impl Frame {
    /// Wrap an RGB image produced in-process.
    pub fn from_rgb(image: image::RgbImage, sequence: u64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: Bytes::from(image.into_raw()),
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                stride: width * 3,
                format: PixelFormat::Rgb24,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
        }
    }
}
