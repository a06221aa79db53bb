//! Conversion of raw sensor buffers into packed RGB24

use bytes::Bytes;
use thiserror::Error;
use zune_jpeg::JpegDecoder;

use super::frame::{PixelFormat, RawFrame};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("{format:?} buffer is {actual} bytes, expected {expected} for {width}x{height}")]
    BadLength {
        format: PixelFormat,
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("MJPEG decode failed: {0}")]
    Jpeg(String),
}

/// Convert a raw buffer into RGB24. RGB input is passed through without copying.
pub fn to_rgb24(raw: &RawFrame) -> Result<Bytes, ConvertError> {
    if let Some(expected) = raw.format.frame_len(raw.width, raw.height) {
        if raw.data.len() != expected {
            return Err(ConvertError::BadLength {
                format: raw.format,
                width: raw.width,
                height: raw.height,
                expected,
                actual: raw.data.len(),
            });
        }
    }

    match raw.format {
        PixelFormat::Rgb24 => Ok(raw.data.clone()),
        PixelFormat::Bgr24 => Ok(Bytes::from(swap_red_blue(&raw.data))),
        PixelFormat::Yuyv => Ok(Bytes::from(yuyv_to_rgb(&raw.data))),
        PixelFormat::BayerRg8 => Ok(Bytes::from(bayer_rg_to_rgb(
            &raw.data,
            raw.width as usize,
            raw.height as usize,
        ))),
        PixelFormat::Mjpeg => {
            let pixels = decode_mjpeg(&raw.data)?;
            let expected = raw.width as usize * raw.height as usize * 3;
            if pixels.len() != expected {
                return Err(ConvertError::BadLength {
                    format: PixelFormat::Mjpeg,
                    width: raw.width,
                    height: raw.height,
                    expected,
                    actual: pixels.len(),
                });
            }
            Ok(Bytes::from(pixels))
        }
    }
}

/// BGR <-> RGB, the same operation in both directions.
pub fn swap_red_blue(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for px in data.chunks_exact(3) {
        out.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    out
}

fn decode_mjpeg(data: &[u8]) -> Result<Vec<u8>, ConvertError> {
    let mut decoder = JpegDecoder::new(data);
    decoder.decode().map_err(|e| ConvertError::Jpeg(format!("{:?}", e)))
}

fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        out.extend_from_slice(&yuv_to_rgb(y0, u, v));
        out.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    out
}

// BT.601, studio swing
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}

/// Block demosaic of an RGGB mosaic: every pixel of a 2x2 cell takes the cell's
/// red, averaged green and blue samples.
fn bayer_rg_to_rgb(data: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(width * height * 3);
    if width == 0 || height == 0 {
        return out;
    }
    let at = |x: usize, y: usize| data[y.min(height - 1) * width + x.min(width - 1)];

    for y in 0..height {
        let y0 = y & !1;
        for x in 0..width {
            let x0 = x & !1;
            let r = at(x0, y0);
            let g = ((at(x0 + 1, y0) as u16 + at(x0, y0 + 1) as u16) / 2) as u8;
            let b = at(x0 + 1, y0 + 1);
            out.extend_from_slice(&[r, g, b]);
        }
    }
    out
}
