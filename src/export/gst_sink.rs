//! GStreamer-backed MP4 clip writer

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use tracing::{debug, info};

use super::sink::ClipSink;
use crate::Error;

/// Pushes composed RGB frames through `appsrc ! videoconvert ! x264enc ! mp4mux`
pub struct GstMp4Sink {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    path: PathBuf,
    width: u32,
    height: u32,
    frame_duration: gst::ClockTime,
    frames: u64,
}

impl GstMp4Sink {
    pub fn create(path: &Path, fps: u32, width: u32, height: u32) -> Result<Self> {
        gst::init().map_err(|e| eyre!("Failed to initialize GStreamer: {}", e))?;

        let encoder = Self::detect_h264_encoder()?;
        let pipeline_str = format!(
            "appsrc name=src is-live=false format=time ! \
             videoconvert ! \
             {} ! \
             h264parse ! \
             mp4mux ! \
             filesink location=\"{}\"",
            encoder,
            path.display()
        );
        info!("Pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)?
            .downcast::<gst::Pipeline>()
            .map_err(|_| eyre!("Failed to create pipeline"))?;

        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| eyre!("Failed to find appsrc element"))?
            .downcast::<gst_app::AppSrc>()
            .map_err(|_| eyre!("Failed to cast to AppSrc"))?;

        let fps = fps.max(1);
        let video_info = gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, width, height)
            .fps(gst::Fraction::new(fps as i32, 1))
            .build()
            .map_err(|e| eyre!("Invalid video info: {}", e))?;
        let caps = video_info
            .to_caps()
            .map_err(|e| eyre!("Invalid caps: {}", e))?;
        appsrc.set_caps(Some(&caps));
        appsrc.set_format(gst::Format::Time);

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| eyre!("Failed to start pipeline: {:?}", e))?;

        Ok(Self {
            pipeline,
            appsrc,
            path: path.to_path_buf(),
            width,
            height,
            frame_duration: gst::ClockTime::from_nseconds(1_000_000_000 / fps as u64),
            frames: 0,
        })
    }

    /// Hardware encoders first, software fallback last
    fn detect_h264_encoder() -> Result<&'static str> {
        let encoders = ["nvh264enc", "vaapih264enc", "v4l2h264enc", "x264enc"];

        for encoder in &encoders {
            if gst::ElementFactory::find(encoder).is_some() {
                debug!("Using H.264 encoder: {}", encoder);
                return Ok(encoder);
            }
        }
        Err(eyre!("No H.264 encoder available"))
    }

    fn push(&mut self, frame: &RgbImage) -> Result<()> {
        let mut buffer = gst::Buffer::from_mut_slice(pack_rows(frame));
        {
            let buffer = buffer
                .get_mut()
                .ok_or_else(|| eyre!("Fresh buffer is not writable"))?;
            buffer.set_pts(self.frame_duration * self.frames);
            buffer.set_duration(self.frame_duration);
        }
        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| eyre!("Pipeline refused frame: {:?}", e))?;
        self.frames += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.appsrc
            .end_of_stream()
            .map_err(|e| eyre!("Failed to send EOS: {:?}", e))?;

        let bus = self.pipeline.bus().ok_or_else(|| eyre!("Pipeline has no bus"))?;
        // grace period plus the clip's running time
        let clip = Duration::from_nanos(self.frame_duration.nseconds() * self.frames);
        if let Err(e) = wait_for_eos(&bus, EOS_GRACE + clip) {
            let _ = self.pipeline.set_state(gst::State::Null);
            return Err(e);
        }

        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| eyre!("Failed to stop pipeline: {:?}", e))?;
        Ok(())
    }
}

const EOS_GRACE: Duration = Duration::from_secs(30);

/// Drain the bus until end of stream, an error, or `timeout`.
fn wait_for_eos(bus: &gst::Bus, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(eyre!("Encoder did not finish within {:?}", timeout));
        }
        let wait = gst::ClockTime::from_nseconds(remaining.as_nanos() as u64);
        let Some(msg) =
            bus.timed_pop_filtered(wait, &[gst::MessageType::Eos, gst::MessageType::Error])
        else {
            continue;
        };
        use gst::MessageView;
        match msg.view() {
            MessageView::Eos(..) => return Ok(()),
            MessageView::Error(err) => return Err(eyre!("Encoder error: {}", err.error())),
            _ => {}
        }
    }
}

/// GStreamer RGB rows are padded to four bytes
fn pack_rows(frame: &RgbImage) -> Vec<u8> {
    let row = frame.width() as usize * 3;
    let stride = (row + 3) & !3;
    if stride == row {
        return frame.as_raw().clone();
    }
    let mut out = vec![0u8; stride * frame.height() as usize];
    for (src, dst) in frame.as_raw().chunks_exact(row).zip(out.chunks_exact_mut(stride)) {
        dst[..row].copy_from_slice(src);
    }
    out
}

impl ClipSink for GstMp4Sink {
    fn write_frame(&mut self, frame: &RgbImage) -> crate::Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(Error::Sink("frame size does not match the clip".into()));
        }
        self.push(frame).map_err(|e| Error::Sink(e.to_string()))
    }

    fn finish(mut self: Box<Self>) -> crate::Result<PathBuf> {
        self.close().map_err(|e| Error::Sink(e.to_string()))?;
        info!("Wrote {} frames to {:?}", self.frames, self.path);
        Ok(self.path.clone())
    }
}

impl Drop for GstMp4Sink {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
