//! Image encoding: JPEG, PNG, WebP

use anyhow::{Context, Result};
use imageproc::image::codecs::png::{CompressionType, FilterType, PngEncoder};
use imageproc::image::{ColorType, DynamicImage, ImageEncoder};
use webp::WebPMemory;

/// Output buffers start at one byte per pixel, up to this many bytes
const MAX_PREALLOCATION: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ImageFormat {
    Jpeg { quality: u8 },
    Png { compression: PngCompression },
    WebP { quality: u8 },
}

impl Default for ImageFormat {
    fn default() -> Self {
        ImageFormat::Jpeg { quality: 85 }
    }
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg { .. } => "jpg",
            ImageFormat::Png { .. } => "png",
            ImageFormat::WebP { .. } => "webp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum PngCompression {
    Fast,
    Default,
    Best,
}

impl From<PngCompression> for CompressionType {
    fn from(compression: PngCompression) -> Self {
        match compression {
            PngCompression::Fast => CompressionType::Fast,
            PngCompression::Default => CompressionType::Default,
            PngCompression::Best => CompressionType::Best,
        }
    }
}

/// Compress an image to JPEG format with the specified quality
///
/// JPEG has no alpha channel, transparent images are flattened first.
pub fn compress_to_jpeg<W>(img: &DynamicImage, writer: &mut W, quality: u8) -> Result<()>
where
    W: std::io::Write,
{
    let mut encoder =
        imageproc::image::codecs::jpeg::JpegEncoder::new_with_quality(writer, quality);

    let result = match img.color() {
        ColorType::L8 | ColorType::Rgb8 => encoder.encode_image(img),
        ColorType::La8 | ColorType::L16 | ColorType::La16 => {
            encoder.encode_image(&DynamicImage::ImageLuma8(img.to_luma8()))
        }
        _ => encoder.encode_image(&DynamicImage::ImageRgb8(img.to_rgb8())),
    };

    result.with_context(|| "Failed to compress image to JPEG")?;

    Ok(())
}

/// Compress an image to PNG format with the specified compression level
///
/// Gray layouts are written unfiltered, color ones with adaptive filtering.
pub fn compress_to_png<W>(
    img: &DynamicImage,
    writer: &mut W,
    compression: PngCompression,
) -> Result<()>
where
    W: std::io::Write,
{
    let filter = match img.color() {
        ColorType::L8 | ColorType::La8 => FilterType::NoFilter,
        _ => FilterType::Adaptive,
    };

    PngEncoder::new_with_quality(writer, compression.into(), filter)
        .write_image(img.as_bytes(), img.width(), img.height(), img.color().into())
        .with_context(|| {
            format!(
                "Failed to compress {}x{} {:?} image to PNG",
                img.width(),
                img.height(),
                img.color()
            )
        })
}

/// Compress an image to WebP format with the specified quality
pub fn compress_to_webp(img: &DynamicImage, quality: u8) -> Result<WebPMemory> {
    let img = if img.color().has_alpha() {
        DynamicImage::from(img.to_rgba8())
    } else {
        DynamicImage::from(img.to_rgb8())
    };
    let encoder = webp::Encoder::from_image(&img)
        .map_err(|e| anyhow::anyhow!("Failed to create WebP encoder: {}", e))?;
    let webp_data = encoder.encode(quality as f32);
    Ok(webp_data)
}

/// Encode `img` into an in-memory buffer
pub fn encode(img: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(initial_capacity(img.width(), img.height()));

    match format {
        ImageFormat::Jpeg { quality } => compress_to_jpeg(img, &mut buffer, quality)?,
        ImageFormat::Png { compression } => compress_to_png(img, &mut buffer, compression)?,
        ImageFormat::WebP { quality } => {
            let webp_data = compress_to_webp(img, quality)?;
            buffer.extend_from_slice(&webp_data);
        }
    }

    log::trace!(
        "Encoded {}x{} image as {} ({} bytes)",
        img.width(),
        img.height(),
        format.extension(),
        buffer.len()
    );
    Ok(buffer)
}

fn initial_capacity(width: u32, height: u32) -> usize {
    (width as usize)
        .saturating_mul(height as usize)
        .min(MAX_PREALLOCATION)
}
