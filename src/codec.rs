//! Frame codec used by the ring stores and the AVI clip writer.

use std::time::Instant;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage};

use crate::{Error, Result};

/// Encodes raw RGB frames to a compressed representation and back.
pub trait FrameCodec: Send + Sync {
    fn encode(&self, frame: &RgbImage, quality: u8) -> Result<Bytes>;
    fn decode(&self, data: &[u8]) -> Result<RgbImage>;
    /// File extension used for stored frames.
    fn extension(&self) -> &'static str;
}

/// Baseline JPEG codec
#[derive(Debug, Default, Clone, Copy)]
pub struct JpegCodec;

impl FrameCodec for JpegCodec {
    fn encode(&self, frame: &RgbImage, quality: u8) -> Result<Bytes> {
        let started = Instant::now();

        let mut out = Vec::with_capacity(frame.as_raw().len() / 8);
        // the encoder accepts 1..=100
        let encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
        encoder.write_image(
            frame.as_raw(),
            frame.width(),
            frame.height(),
            ExtendedColorType::Rgb8,
        )?;

        metrics::histogram!("encode_time_us").record(started.elapsed().as_micros() as f64);
        Ok(Bytes::from(out))
    }

    fn decode(&self, data: &[u8]) -> Result<RgbImage> {
        let started = Instant::now();
        let image = decode_jpeg(data)?;
        metrics::histogram!("decode_time_us").record(started.elapsed().as_micros() as f64);
        Ok(image)
    }

    fn extension(&self) -> &'static str {
        "jpg"
    }
}

#[cfg(feature = "fast-jpeg")]
pub(crate) fn decode_jpeg(data: &[u8]) -> Result<RgbImage> {
    use jpeg_decoder::{Decoder, PixelFormat};

    let mut decoder = Decoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| Error::Codec(format!("jpeg decode: {}", e)))?;
    let info = decoder
        .info()
        .ok_or_else(|| Error::Codec("jpeg without frame header".into()))?;
    let (width, height) = (info.width as u32, info.height as u32);

    let rgb = match info.pixel_format {
        PixelFormat::RGB24 => pixels,
        PixelFormat::L8 => pixels.iter().flat_map(|&l| [l, l, l]).collect(),
        PixelFormat::L16 => pixels
            .chunks_exact(2)
            .flat_map(|c| [c[0], c[0], c[0]])
            .collect(),
        PixelFormat::CMYK32 => pixels
            .chunks_exact(4)
            .flat_map(|c| {
                let k = c[3] as u16;
                let ch = |v: u8| ((v as u16 * k) / 255) as u8;
                [ch(c[0]), ch(c[1]), ch(c[2])]
            })
            .collect(),
        #[allow(unreachable_patterns)]
        other => return Err(Error::Codec(format!("unsupported jpeg layout {:?}", other))),
    };

    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| Error::Codec("decoded buffer does not match frame size".into()))
}

#[cfg(not(feature = "fast-jpeg"))]
pub(crate) fn decode_jpeg(data: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?;
    Ok(image.to_rgb8())
}
