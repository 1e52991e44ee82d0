//! V4L2 capture devices as capture feeds

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::{
    capture::feed::{CaptureFeed, FeedFactory},
    capture::frame::{Frame, FrameMetadata, PixelFormat},
    CaptureConfig,
};

fn device_path(camera: u32) -> String {
    format!("/dev/video{}", camera)
}

/// Opens `/dev/video<N>` devices negotiated to the configured size and format
pub struct V4l2Feeds {
    config: CaptureConfig,
}

impl V4l2Feeds {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }
}

impl FeedFactory for V4l2Feeds {
    fn open(&self, camera: u32) -> Result<Box<dyn CaptureFeed>> {
        let mut capture = V4l2Capture::new(&device_path(camera), &self.config)?;
        capture.start_stream()?;
        Ok(Box::new(capture))
    }

    fn probe(&self, camera: u32) -> bool {
        let path = device_path(camera);
        if !Path::new(&path).exists() {
            return false;
        }

        let Ok(dev) = Device::with_path(&path) else {
            return false;
        };
        let Ok(caps) = dev.query_caps() else {
            return false;
        };
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return false;
        }

        // Only devices offering a format we can decode count
        let usable = dev
            .enum_formats()
            .map(|formats| {
                formats
                    .iter()
                    .any(|f| f.fourcc == FourCC::new(b"MJPG") || f.fourcc == FourCC::new(b"YUYV"))
            })
            .unwrap_or(false);

        if usable {
            info!("Found capture device: {} - {}", path, caps.card);
        } else {
            debug!("Skipping {}: no MJPG/YUYV format", path);
        }
        usable
    }
}

/// Memory-mapped V4L2 capture
pub struct V4l2Capture {
    device: Box<Device>,
    stream: Option<MmapStream<'static>>,
    format: PixelFormat,
    width: u32,
    height: u32,
    stride: u32,
    buffer_count: u32,
    sequence: u64,
}

impl V4l2Capture {
    pub fn new(path: &str, config: &CaptureConfig) -> Result<Self> {
        info!("Initializing V4L2 capture: {}", path);

        let device = Device::with_path(path)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(eyre!("Device doesn't support video capture"));
        }

        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = match config.format {
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
            other => return Err(eyre!("Unsupported pixel format {:?}", other)),
        };

        // The driver may round to the nearest size it supports
        let fmt = device.set_format(&fmt)?;
        info!("Negotiated {}x{} {}", fmt.width, fmt.height, fmt.fourcc);

        Ok(Self {
            device: Box::new(device),
            stream: None,
            format: config.format,
            width: fmt.width,
            height: fmt.height,
            stride: fmt.stride,
            buffer_count: config.buffer_count.max(2),
            sequence: 0,
        })
    }

    pub fn start_stream(&mut self) -> Result<()> {
        let stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, self.buffer_count)?;
        self.stream = Some(stream);
        info!("Capture stream started with {} buffers", self.buffer_count);
        Ok(())
    }
}

impl CaptureFeed for V4l2Capture {
    #[instrument(skip(self))]
    fn capture_frame(&mut self) -> Result<Frame> {
        let timestamp = Instant::now();

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| eyre!("Stream not started"))?;

        let (buf, meta) = stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());
        let used = if used == 0 { buf.len() } else { used };
        let data = Bytes::copy_from_slice(&buf[..used]);

        self.sequence += 1;

        Ok(Frame {
            data,
            meta: Arc::new(FrameMetadata {
                sequence: self.sequence,
                width: self.width,
                height: self.height,
                stride: self.stride,
                format: self.format,
                device_timestamp: Some(
                    Duration::from_secs(meta.timestamp.sec as u64)
                        + Duration::from_micros(meta.timestamp.usec as u64),
                ),
            }),
            timestamp,
        })
    }
}
