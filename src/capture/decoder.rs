use color_eyre::{eyre::eyre, Result};
use image::RgbImage;
use jpeg_decoder::Decoder;

use super::frame::{Frame, PixelFormat};

/// Convert a raw capture payload to packed RGB.
pub fn decode_frame(frame: &Frame) -> Result<RgbImage> {
    let meta = &frame.meta;
    let (width, height) = (meta.width as usize, meta.height as usize);
    let data = &frame.data[..];

    match meta.format {
        PixelFormat::Mjpeg => {
            let mut decoder = Decoder::new(data);
            let pixels = decoder.decode()?;
            let info = decoder.info().ok_or_else(|| eyre!("MJPEG frame without header"))?;
            let rgb = match info.pixel_format {
                jpeg_decoder::PixelFormat::RGB24 => pixels,
                jpeg_decoder::PixelFormat::L8 => pixels.iter().flat_map(|&l| [l, l, l]).collect(),
                other => return Err(eyre!("Unsupported MJPEG layout: {:?}", other)),
            };
            RgbImage::from_raw(info.width as u32, info.height as u32, rgb)
                .ok_or_else(|| eyre!("MJPEG payload size mismatch"))
        }
        PixelFormat::Rgb24 | PixelFormat::Bgr24 => {
            let stride = row_stride(meta.stride as usize, width * 3);
            check_len(data, stride * height.saturating_sub(1) + width * 3)?;
            let swap = meta.format == PixelFormat::Bgr24;

            let mut out = Vec::with_capacity(width * height * 3);
            for row in data.chunks(stride).take(height) {
                for px in row[..width * 3].chunks_exact(3) {
                    if swap {
                        out.extend_from_slice(&[px[2], px[1], px[0]]);
                    } else {
                        out.extend_from_slice(px);
                    }
                }
            }
            to_image(meta.width, meta.height, out)
        }
        PixelFormat::Yuyv4 => {
            let stride = row_stride(meta.stride as usize, width * 2);
            check_len(data, stride * height.saturating_sub(1) + width * 2)?;

            let mut out = Vec::with_capacity(width * height * 3);
            for row in data.chunks(stride).take(height) {
                // Y0 U Y1 V covers two pixels
                for quad in row[..width * 2].chunks_exact(4) {
                    out.extend_from_slice(&yuv_to_rgb(quad[0], quad[1], quad[3]));
                    out.extend_from_slice(&yuv_to_rgb(quad[2], quad[1], quad[3]));
                }
                if width % 2 == 1 {
                    let tail = &row[(width - 1) * 2..];
                    out.extend_from_slice(&yuv_to_rgb(tail[0], tail[1], 128));
                }
            }
            to_image(meta.width, meta.height, out)
        }
        PixelFormat::Nv12 => {
            let stride = row_stride(meta.stride as usize, width);
            let luma_len = stride * height;
            // interleaved UV pairs cover odd widths with one extra pair
            let uv_len = 2 * width.div_ceil(2);
            let uv_stride = row_stride(stride, uv_len);
            let uv_rows = height.div_ceil(2);
            if uv_rows > 0 {
                check_len(data, luma_len + uv_stride * (uv_rows - 1) + uv_len)?;
            }
            let (luma, chroma) = data.split_at(luma_len.min(data.len()));

            let mut out = Vec::with_capacity(width * height * 3);
            for y in 0..height {
                let uv_row = &chroma[(y / 2) * uv_stride..];
                for x in 0..width {
                    let uv = (x / 2) * 2;
                    out.extend_from_slice(&yuv_to_rgb(
                        luma[y * stride + x],
                        uv_row[uv],
                        uv_row[uv + 1],
                    ));
                }
            }
            to_image(meta.width, meta.height, out)
        }
    }
}

fn row_stride(declared: usize, packed: usize) -> usize {
    if declared >= packed {
        declared
    } else {
        packed
    }
}

fn check_len(data: &[u8], needed: usize) -> Result<()> {
    if data.len() < needed {
        return Err(eyre!(
            "Truncated frame: {} bytes, expected at least {}",
            data.len(),
            needed
        ));
    }
    Ok(())
}

fn to_image(width: u32, height: u32, rgb: Vec<u8>) -> Result<RgbImage> {
    RgbImage::from_raw(width, height, rgb).ok_or_else(|| eyre!("Decoded size mismatch"))
}

/// BT.601 limited-range conversion
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}
