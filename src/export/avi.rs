//! Motion-JPEG AVI writer
//!
//! Layout: `RIFF AVI ` containing `LIST hdrl` (avih + one video strl),
//! `LIST movi` with one `00dc` chunk per frame, then an `idx1` index.
//! Frame counts and sizes are patched into the header on finish.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use image::RgbImage;

use super::sink::ClipSink;
use crate::codec::{FrameCodec, JpegCodec};
use crate::{Error, Result};

const AVIF_HASINDEX: u32 = 0x10;
const AVIIF_KEYFRAME: u32 = 0x10;

/// Header offsets that are rewritten once the clip is complete
#[derive(Debug, Clone, Copy)]
struct Patches {
    total_frames: u64,
    stream_length: u64,
    movi_size: u64,
}

pub struct MjpegAviWriter {
    out: BufWriter<File>,
    path: PathBuf,
    codec: JpegCodec,
    quality: u8,
    width: u32,
    height: u32,
    patches: Patches,
    /// (offset from the `movi` fourcc, chunk size) per frame
    index: Vec<(u32, u32)>,
    movi_bytes: u64,
    max_chunk: u32,
}

impl MjpegAviWriter {
    pub fn create(path: &Path, fps: u32, width: u32, height: u32, quality: u8) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::SinkOpen("empty canvas".into()));
        }
        let file = File::create(path)
            .map_err(|e| Error::SinkOpen(format!("{}: {}", path.display(), e)))?;
        let mut out = BufWriter::new(file);

        let (header, patches) = build_header(fps.max(1), width, height);
        out.write_all(&header)?;

        Ok(Self {
            out,
            path: path.to_path_buf(),
            codec: JpegCodec,
            quality,
            width,
            height,
            patches,
            index: Vec::new(),
            movi_bytes: 4,
            max_chunk: 0,
        })
    }

    pub fn frames_written(&self) -> usize {
        self.index.len()
    }
}

impl ClipSink for MjpegAviWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(Error::Sink(format!(
                "frame is {:?}, clip is {}x{}",
                frame.dimensions(),
                self.width,
                self.height
            )));
        }
        let jpeg = self.codec.encode(frame, self.quality)?;
        let size = u32::try_from(jpeg.len())
            .map_err(|_| Error::Sink("frame larger than 4 GiB".into()))?;

        self.index.push((self.movi_bytes as u32, size));
        self.out.write_all(b"00dc")?;
        self.out.write_all(&size.to_le_bytes())?;
        self.out.write_all(&jpeg)?;
        let mut chunk = 8 + size as u64;
        if size % 2 == 1 {
            self.out.write_all(&[0])?;
            chunk += 1;
        }
        self.movi_bytes += chunk;
        self.max_chunk = self.max_chunk.max(size);
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<PathBuf> {
        self.out.write_all(b"idx1")?;
        self.out.write_all(&(self.index.len() as u32 * 16).to_le_bytes())?;
        for &(offset, size) in &self.index {
            self.out.write_all(b"00dc")?;
            self.out.write_all(&AVIIF_KEYFRAME.to_le_bytes())?;
            self.out.write_all(&offset.to_le_bytes())?;
            self.out.write_all(&size.to_le_bytes())?;
        }

        let file_len = self.out.stream_position()?;
        let frames = self.index.len() as u32;
        let p = self.patches;
        let riff_size = (file_len - 8) as u32;
        let movi_size = self.movi_bytes as u32;
        let max_chunk = self.max_chunk;

        patch(&mut self.out, 4, riff_size)?;
        patch(&mut self.out, p.total_frames, frames)?;
        patch(&mut self.out, p.total_frames + 12, max_chunk)?;
        patch(&mut self.out, p.stream_length, frames)?;
        patch(&mut self.out, p.stream_length + 4, max_chunk)?;
        patch(&mut self.out, p.movi_size, movi_size)?;

        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        Ok(self.path.clone())
    }
}

fn patch(out: &mut BufWriter<File>, at: u64, value: u32) -> Result<()> {
    out.seek(SeekFrom::Start(at))?;
    out.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn put(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn build_header(fps: u32, width: u32, height: u32) -> (Vec<u8>, Patches) {
    let mut h = Vec::with_capacity(224);

    h.extend_from_slice(b"RIFF");
    put(&mut h, 0); // patched
    h.extend_from_slice(b"AVI ");

    h.extend_from_slice(b"LIST");
    put(&mut h, 4 + (8 + 56) + (8 + 4 + (8 + 56) + (8 + 40)));
    h.extend_from_slice(b"hdrl");

    h.extend_from_slice(b"avih");
    put(&mut h, 56);
    put(&mut h, 1_000_000 / fps); // microseconds per frame
    put(&mut h, 0); // max bytes per second
    put(&mut h, 0); // padding granularity
    put(&mut h, AVIF_HASINDEX);
    let total_frames = h.len() as u64;
    put(&mut h, 0); // total frames, patched
    put(&mut h, 0); // initial frames
    put(&mut h, 1); // streams
    put(&mut h, 0); // suggested buffer size, patched
    put(&mut h, width);
    put(&mut h, height);
    h.extend_from_slice(&[0u8; 16]);

    h.extend_from_slice(b"LIST");
    put(&mut h, 4 + (8 + 56) + (8 + 40));
    h.extend_from_slice(b"strl");

    h.extend_from_slice(b"strh");
    put(&mut h, 56);
    h.extend_from_slice(b"vids");
    h.extend_from_slice(b"MJPG");
    put(&mut h, 0); // flags
    h.extend_from_slice(&0u16.to_le_bytes()); // priority
    h.extend_from_slice(&0u16.to_le_bytes()); // language
    put(&mut h, 0); // initial frames
    put(&mut h, 1); // scale
    put(&mut h, fps); // rate
    put(&mut h, 0); // start
    let stream_length = h.len() as u64;
    put(&mut h, 0); // length, patched
    put(&mut h, 0); // suggested buffer size, patched
    put(&mut h, u32::MAX); // quality: driver default
    put(&mut h, 0); // sample size
    for v in [0u16, 0, width.min(u16::MAX as u32) as u16, height.min(u16::MAX as u32) as u16] {
        h.extend_from_slice(&v.to_le_bytes());
    }

    h.extend_from_slice(b"strf");
    put(&mut h, 40);
    put(&mut h, 40); // BITMAPINFOHEADER size
    put(&mut h, width);
    put(&mut h, height);
    h.extend_from_slice(&1u16.to_le_bytes()); // planes
    h.extend_from_slice(&24u16.to_le_bytes()); // bit count
    h.extend_from_slice(b"MJPG");
    put(&mut h, width * height * 3);
    put(&mut h, 0);
    put(&mut h, 0);
    put(&mut h, 0);
    put(&mut h, 0);

    h.extend_from_slice(b"LIST");
    let movi_size = h.len() as u64;
    put(&mut h, 0); // patched
    h.extend_from_slice(b"movi");

    (
        h,
        Patches {
            total_frames,
            stream_length,
            movi_size,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(data: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(data[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn header_layout_is_stable() {
        let (h, p) = build_header(30, 640, 360);
        assert_eq!(h.len(), 224);
        assert_eq!(&h[0..4], b"RIFF");
        assert_eq!(u32_at(&h, 16), 192); // hdrl list size
        assert_eq!(p.total_frames, 48);
        assert_eq!(p.stream_length, 140);
        assert_eq!(p.movi_size, 216);
        assert_eq!(&h[220..224], b"movi");
        assert_eq!(u32_at(&h, 32), 33_333);
    }

    #[test]
    fn finished_file_reports_frames_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.avi");
        let mut writer: Box<dyn ClipSink> =
            Box::new(MjpegAviWriter::create(&path, 30, 16, 8, 80).unwrap());
        for shade in [0u8, 120, 240] {
            writer
                .write_frame(&RgbImage::from_pixel(16, 8, image::Rgb([shade, 0, 0])))
                .unwrap();
        }
        let out = writer.finish().unwrap();

        let data = std::fs::read(out).unwrap();
        assert_eq!(u32_at(&data, 4) as usize, data.len() - 8);
        assert_eq!(u32_at(&data, 48), 3);
        assert_eq!(u32_at(&data, 140), 3);

        let movi_size = u32_at(&data, 216) as usize;
        let idx1 = 220 + movi_size;
        assert_eq!(&data[idx1..idx1 + 4], b"idx1");
        assert_eq!(u32_at(&data, idx1 + 4), 48);
        // first chunk sits right after the movi fourcc
        assert_eq!(u32_at(&data, idx1 + 16), 4);
        assert_eq!(&data[224..228], b"00dc");
        assert_eq!(&data[232..234], &[0xFF, 0xD8]);
    }

    #[test]
    fn mismatched_frame_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = MjpegAviWriter::create(&dir.path().join("c.avi"), 30, 16, 8, 80).unwrap();
        assert!(writer.write_frame(&RgbImage::new(8, 8)).is_err());
        assert_eq!(writer.frames_written(), 0);
    }
}
