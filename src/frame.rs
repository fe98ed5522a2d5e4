//! Frame container and image codec helpers.
//!
//! Everything downstream of ingestion works on `RgbImage`. Decoding failures on
//! user-supplied bytes are `InvalidInput`; encoding failures are reported by the
//! caller as `EncodingFailure`.

use std::io::Cursor;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};

use crate::error::{MonitorError, MonitorResult};

/// Default JPEG quality for persisted results and stream parts.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// A decoded RGB frame pulled from a camera or video.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    sequence: u64,
    captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Zero-based index of this frame within its source.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }
}

/// Decode an uploaded still image (PNG, JPEG or GIF) to RGB.
pub fn decode_image(bytes: &[u8]) -> MonitorResult<RgbImage> {
    if bytes.is_empty() {
        return Err(MonitorError::invalid_input("image is empty"));
    }
    let decoded = image::load_from_memory(bytes)
        .map_err(|err| MonitorError::invalid_input(format!("image could not be decoded: {}", err)))?;
    Ok(decoded.to_rgb8())
}

/// Build an RGB image from a packed RGB24 buffer.
pub fn rgb_from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<RgbImage> {
    let expected = width as usize * height as usize * 3;
    if data.len() != expected {
        return Err(anyhow!(
            "rgb buffer is {} bytes, expected {} for {}x{}",
            data.len(),
            expected,
            width,
            height
        ));
    }
    RgbImage::from_raw(width, height, data).ok_or_else(|| anyhow!("rgb buffer rejected"))
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder
        .encode_image(image)
        .context("failed to encode JPEG")?;
    Ok(out)
}

/// Encode for a result file, choosing the format from the file extension.
/// Unknown extensions fall back to JPEG.
pub fn encode_for_extension(image: &RgbImage, extension: &str, quality: u8) -> Result<Vec<u8>> {
    match extension.to_ascii_lowercase().as_str() {
        "png" => encode_with_format(image, ImageFormat::Png),
        "gif" => encode_with_format(image, ImageFormat::Gif),
        _ => encode_jpeg(image, quality),
    }
}

fn encode_with_format(image: &RgbImage, format: ImageFormat) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, format)
        .with_context(|| format!("failed to encode {:?}", format))?;
    Ok(cursor.into_inner())
}

/// Standard-alphabet base64, as embedded in JSON responses.
pub fn to_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn checker(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Rgb([200, 40, 40])
            } else {
                Rgb([20, 20, 220])
            }
        })
    }

    #[test]
    fn decode_rejects_garbage_as_invalid_input() {
        let err = decode_image(b"definitely not a png").unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::InvalidInput);
        let err = decode_image(&[]).unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::InvalidInput);
    }

    #[test]
    fn jpeg_output_decodes_back_with_same_dimensions() {
        let image = checker(64, 48);
        let bytes = encode_jpeg(&image, 90).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let back = decode_image(&bytes).unwrap();
        assert_eq!(back.dimensions(), (64, 48));
    }

    #[test]
    fn png_extension_is_lossless() {
        let image = checker(16, 16);
        let bytes = encode_for_extension(&image, "PNG", 90).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
        assert_eq!(decode_image(&bytes).unwrap(), image);
    }

    #[test]
    fn raw_buffer_length_is_checked() {
        assert!(rgb_from_raw(2, 2, vec![0; 12]).is_ok());
        assert!(rgb_from_raw(2, 2, vec![0; 11]).is_err());
    }

    #[test]
    fn base64_uses_standard_alphabet_with_padding() {
        assert_eq!(to_base64(&[0xFB, 0xFF]), "+/8=");
    }

    #[test]
    fn frame_exposes_sequence_and_dimensions() {
        let frame = Frame::new(checker(8, 4), 3);
        assert_eq!(frame.sequence(), 3);
        assert_eq!((frame.width(), frame.height()), (8, 4));
        assert_eq!(frame.into_image().dimensions(), (8, 4));
    }
}
