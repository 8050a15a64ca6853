//! Finishes a reduction the codec could only partly apply

use fast_image_resize as fr;
use fr::images::Image as FrImage;
use imageproc::image::{
    DynamicImage, GenericImageView, GrayAlphaImage, GrayImage, RgbImage, RgbaImage,
};

use crate::error::DecodeError;
use crate::sample::ImageBounds;

/// Box-filter `img` down to `target`, keeping its pixel layout.
///
/// 8-bit gray, gray-alpha, RGB and RGBA stay as they are; deeper layouts are
/// reduced to RGBA8. An image already at `target` is returned untouched.
pub(super) fn resize_to(img: DynamicImage, target: ImageBounds) -> Result<DynamicImage, DecodeError> {
    let source = ImageBounds::from(img.dimensions());

    if target == source {
        return Ok(img);
    }

    let resized = match img {
        DynamicImage::ImageLuma8(buf) => {
            let data = resize_raw(buf.into_raw(), source, target, fr::PixelType::U8)?;
            GrayImage::from_raw(target.width, target.height, data).map(DynamicImage::ImageLuma8)
        }
        DynamicImage::ImageLumaA8(buf) => {
            let data = resize_raw(buf.into_raw(), source, target, fr::PixelType::U8x2)?;
            GrayAlphaImage::from_raw(target.width, target.height, data)
                .map(DynamicImage::ImageLumaA8)
        }
        DynamicImage::ImageRgb8(buf) => {
            let data = resize_raw(buf.into_raw(), source, target, fr::PixelType::U8x3)?;
            RgbImage::from_raw(target.width, target.height, data).map(DynamicImage::ImageRgb8)
        }
        other => {
            let data = resize_raw(other.into_rgba8().into_raw(), source, target, fr::PixelType::U8x4)?;
            RgbaImage::from_raw(target.width, target.height, data).map(DynamicImage::ImageRgba8)
        }
    };

    resized.ok_or_else(|| {
        DecodeError::Resample(format!("buffer does not hold a {target} image"))
    })
}

fn resize_raw(
    buffer: Vec<u8>,
    source: ImageBounds,
    target: ImageBounds,
    pixel_type: fr::PixelType,
) -> Result<Vec<u8>, DecodeError> {
    let src_image = FrImage::from_vec_u8(source.width, source.height, buffer, pixel_type)
        .map_err(resample_error)?;

    let mut dst_buffer = vec![0u8; target.pixels() as usize * pixel_type.size()];
    let mut dst_image =
        FrImage::from_slice_u8(target.width, target.height, &mut dst_buffer, pixel_type)
            .map_err(resample_error)?;

    // Box filter averages each sample cell
    let options = fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Box));
    fr::Resizer::new()
        .resize(&src_image, &mut dst_image, Some(&options))
        .map_err(resample_error)?;

    Ok(dst_buffer)
}

fn resample_error(e: impl std::fmt::Display) -> DecodeError {
    DecodeError::Resample(e.to_string())
}
