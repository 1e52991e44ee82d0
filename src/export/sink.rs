//! Output sinks for composed clip frames

use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::{info, warn};

use super::avi::MjpegAviWriter;
use crate::{Error, Result};

/// Accepts composed frames at a fixed cadence and canvas size.
pub trait ClipSink: Send {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Flush and close; returns the file that was produced.
    fn finish(self: Box<Self>) -> Result<PathBuf>;
}

/// Container/codec combinations a clip can be written with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFormat {
    /// H.264 in MP4 through GStreamer
    Mp4,
    /// Motion JPEG in AVI, written in-process
    MjpegAvi,
}

impl SinkFormat {
    pub fn extension(self) -> &'static str {
        match self {
            SinkFormat::Mp4 => "mp4",
            SinkFormat::MjpegAvi => "avi",
        }
    }

    /// Open a sink of this format at `path` with its extension replaced.
    pub fn open(
        self,
        path: &Path,
        fps: u32,
        width: u32,
        height: u32,
        quality: u8,
    ) -> Result<Box<dyn ClipSink>> {
        let path = path.with_extension(self.extension());
        match self {
            SinkFormat::Mp4 => open_mp4(&path, fps, width, height),
            SinkFormat::MjpegAvi => Ok(Box::new(MjpegAviWriter::create(
                &path, fps, width, height, quality,
            )?)),
        }
    }
}

#[cfg(feature = "gstreamer-pipeline")]
fn open_mp4(path: &Path, fps: u32, width: u32, height: u32) -> Result<Box<dyn ClipSink>> {
    let sink = super::gst_sink::GstMp4Sink::create(path, fps, width, height)
        .map_err(|e| Error::SinkOpen(e.to_string()))?;
    Ok(Box::new(sink))
}

#[cfg(not(feature = "gstreamer-pipeline"))]
fn open_mp4(_path: &Path, _fps: u32, _width: u32, _height: u32) -> Result<Box<dyn ClipSink>> {
    Err(Error::SinkOpen(
        "MP4 output needs the gstreamer-pipeline feature".into(),
    ))
}

/// Try `primary`, then exactly one `fallback`. On total failure the error
/// carries both reasons.
pub fn open_with_fallback(
    path: &Path,
    primary: SinkFormat,
    fallback: SinkFormat,
    fps: u32,
    width: u32,
    height: u32,
    quality: u8,
) -> Result<Box<dyn ClipSink>> {
    let first = match primary.open(path, fps, width, height, quality) {
        Ok(sink) => return Ok(sink),
        Err(e) => e,
    };
    warn!("{:?} output unavailable for {:?}: {}", primary, path, first);

    match fallback.open(path, fps, width, height, quality) {
        Ok(sink) => {
            info!("Falling back to {:?} for {:?}", fallback, path);
            Ok(sink)
        }
        Err(second) => Err(Error::SinkOpen(format!(
            "{:?}: {}; {:?}: {}",
            primary, first, fallback, second
        ))),
    }
}

/// Keeps frames in memory, for callers that post-process them.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub frames: Vec<RgbImage>,
    pub path: PathBuf,
}

impl ClipSink for MemorySink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        self.frames.push(frame.clone());
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<PathBuf> {
        Ok(self.path)
    }
}
