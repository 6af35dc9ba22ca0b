use std::fs;
use std::path::Path;

use anyhow::Context;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbImage, RgbaImage};

pub const MAX_REFERENCE_DIM: u32 = 1024;
pub const MAX_REFERENCE_BYTES: usize = 10 * 1024 * 1024;
const RECOMPRESS_ABOVE_BYTES: usize = 500 * 1024;
const JPEG_QUALITY: u8 = 85;
const JPEG_QUALITY_SMALL: u8 = 70;

/// Reference image for the edit path, ready to be sent as a multipart part.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceImage {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime: String,
}

impl ReferenceImage {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|value| value.to_str())
            .filter(|value| !value.is_empty())
            .unwrap_or("reference")
            .to_string();
        Ok(Self::prepare(bytes, &file_name, mime_for_path(path)))
    }

    /// Flattens, shrinks to fit 1024x1024 and re-encodes as JPEG. Bytes that do
    /// not decode as an image are passed through untouched.
    pub fn prepare(bytes: Vec<u8>, file_name: &str, fallback_mime: Option<&str>) -> Self {
        match compress_reference(&bytes) {
            Ok(jpeg) => {
                tracing::debug!(
                    original = bytes.len(),
                    compressed = jpeg.len(),
                    "reference image re-encoded"
                );
                Self {
                    bytes: jpeg,
                    file_name: jpeg_file_name(file_name),
                    mime: "image/jpeg".to_string(),
                }
            }
            Err(err) => {
                tracing::warn!("reference image not re-encoded, sending original: {err:#}");
                Self {
                    bytes,
                    file_name: file_name.to_string(),
                    mime: fallback_mime.unwrap_or("application/octet-stream").to_string(),
                }
            }
        }
    }
}

fn compress_reference(bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
    let decoded = image::load_from_memory(bytes).context("reference image decode failed")?;
    let rgba = decoded.to_rgba8();
    let mut flattened = RgbaImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend =
            |channel: u8| -> u8 { (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8 };
        flattened.put_pixel(
            x,
            y,
            Rgba([blend(pixel[0]), blend(pixel[1]), blend(pixel[2]), 255]),
        );
    }
    let mut image = DynamicImage::ImageRgba8(flattened);
    if image.width() > MAX_REFERENCE_DIM || image.height() > MAX_REFERENCE_DIM {
        image = image.resize(MAX_REFERENCE_DIM, MAX_REFERENCE_DIM, FilterType::Lanczos3);
    }
    let rgb = image.to_rgb8();

    let encoded = encode_jpeg(&rgb, JPEG_QUALITY)?;
    if encoded.len() > RECOMPRESS_ABOVE_BYTES {
        return encode_jpeg(&rgb, JPEG_QUALITY_SMALL);
    }
    Ok(encoded)
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> anyhow::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode_image(image)
        .context("reference image jpeg encode failed")?;
    Ok(bytes)
}

fn jpeg_file_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|value| value.to_str())
        .filter(|value| !value.is_empty())
        .unwrap_or("reference");
    format!("{stem}.jpg")
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}
