//! Codec binding: header-only probe and decoding at a sample size
//!
//! PNG rows are box-averaged while they are inflated and JPEG is scaled inside
//! the decoder, so neither path ever holds the full-resolution frame. Every
//! other format is decoded whole, which is only allowed when the whole frame
//! fits the pixel budget.

use imageproc::image::error::{DecodingError, ImageFormatHint, LimitError, LimitErrorKind};
use imageproc::image::{
    DynamicImage, GrayAlphaImage, GrayImage, ImageError, ImageFormat, ImageReader, Limits,
    RgbImage, RgbaImage,
};

use std::io::{BufRead, Read, Seek, SeekFrom};

use crate::sample::{ImageBounds, SampleSize};

/// Upper bound on decoded bytes per pixel (RGBA with 32-bit float channels)
const MAX_BYTES_PER_PIXEL: u64 = 16;

/// Parse only the image header and report its dimensions, no pixel buffer is allocated
pub(super) fn probe_dimensions<R: BufRead + Seek>(mut stream: R) -> Result<(u32, u32), ImageError> {
    let format = ImageReader::new(&mut stream)
        .with_guessed_format()?
        .format();

    // the image crate buffers a whole JPEG file before parsing it
    if format == Some(ImageFormat::Jpeg) {
        let info = jpeg_info(&mut jpeg_decoder::Decoder::new(stream))?;
        return Ok((info.width.into(), info.height.into()));
    }

    ImageReader::new(stream)
        .with_guessed_format()?
        .into_dimensions()
}

/// Decode `stream` reduced by `sample`.
///
/// Returns the image together with the full-resolution bounds it was read
/// from. The image is at most `sample.apply(bounds)` for PNG, and between that
/// and twice that per side for JPEG; the caller finishes the reduction.
pub(super) fn decode_sampled<R: BufRead + Seek>(
    mut stream: R,
    sample: SampleSize,
    max_pixels: Option<u64>,
) -> Result<(DynamicImage, ImageBounds), ImageError> {
    let start = stream.stream_position()?;
    let format = ImageReader::new(&mut stream)
        .with_guessed_format()?
        .format();

    match format {
        Some(ImageFormat::Png) => {
            if let Some(decoded) = decode_png(&mut stream, sample)? {
                return Ok(decoded);
            }
            // Adam7 rows arrive out of order, decode the frame whole instead
            stream.seek(SeekFrom::Start(start))?;
            decode_whole(stream, max_pixels)
        }
        Some(ImageFormat::Jpeg) => decode_jpeg(stream, sample),
        _ => decode_whole(stream, max_pixels),
    }
}

/// Streams a non-interlaced PNG row by row into a [`BoxAccumulator`]
///
/// `None` when the image is interlaced.
fn decode_png<R: Read>(
    stream: R,
    sample: SampleSize,
) -> Result<Option<(DynamicImage, ImageBounds)>, ImageError> {
    let mut decoder = png::Decoder::new(stream);
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder.read_info().map_err(png_error)?;

    let info = reader.info();
    let bounds = ImageBounds::new(info.width, info.height);
    if info.interlaced {
        log::debug!("Interlaced PNG ({bounds}), decoding the whole frame");
        return Ok(None);
    }

    let (color, _) = reader.output_color_type();
    let mut cells = BoxAccumulator::new(bounds, sample, color.samples());

    for y in 0..cells.rows_needed() {
        let row = reader
            .next_row()
            .map_err(png_error)?
            .ok_or_else(|| png_error(format!("image data ends at row {y} of {}", bounds.height)))?;
        cells.push_row(row.data());
    }

    let target = sample.apply(bounds);
    let pixels = cells.finish();
    let image = match color {
        png::ColorType::Grayscale => {
            GrayImage::from_raw(target.width, target.height, pixels).map(DynamicImage::ImageLuma8)
        }
        png::ColorType::GrayscaleAlpha => GrayAlphaImage::from_raw(target.width, target.height, pixels)
            .map(DynamicImage::ImageLumaA8),
        png::ColorType::Rgb => {
            RgbImage::from_raw(target.width, target.height, pixels).map(DynamicImage::ImageRgb8)
        }
        png::ColorType::Rgba => {
            RgbaImage::from_raw(target.width, target.height, pixels).map(DynamicImage::ImageRgba8)
        }
        _ => None,
    };

    image
        .map(|image| Some((image, bounds)))
        .ok_or_else(|| png_error(format!("unexpected {color:?} output for {target}")))
}

/// Lets the JPEG decoder drop DCT coefficients by 1/2, 1/4 or 1/8, whichever
/// still covers the sampled size
fn decode_jpeg<R: Read>(
    stream: R,
    sample: SampleSize,
) -> Result<(DynamicImage, ImageBounds), ImageError> {
    let mut decoder = jpeg_decoder::Decoder::new(stream);
    let info = jpeg_info(&mut decoder)?;
    let bounds = ImageBounds::new(info.width.into(), info.height.into());

    let target = sample.apply(bounds);
    let (width, height) = decoder
        .scale(side(target.width), side(target.height))
        .map_err(jpeg_error)?;
    let (width, height) = (u32::from(width), u32::from(height));
    log::trace!("JPEG {bounds} scaled in the decoder to {width}x{height}");

    let pixels = decoder.decode().map_err(jpeg_error)?;
    let image = match info.pixel_format {
        jpeg_decoder::PixelFormat::L8 => {
            GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8)
        }
        jpeg_decoder::PixelFormat::L16 => {
            // big-endian samples, keep the high byte
            let high = pixels.chunks_exact(2).map(|sample| sample[0]).collect();
            GrayImage::from_raw(width, height, high).map(DynamicImage::ImageLuma8)
        }
        jpeg_decoder::PixelFormat::RGB24 => {
            RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8)
        }
        jpeg_decoder::PixelFormat::CMYK32 => {
            RgbImage::from_raw(width, height, cmyk_to_rgb(&pixels)).map(DynamicImage::ImageRgb8)
        }
    };

    image
        .map(|image| (image, bounds))
        .ok_or_else(|| jpeg_error(format!("pixel buffer does not hold {width}x{height}")))
}

fn jpeg_info<R: Read>(
    decoder: &mut jpeg_decoder::Decoder<R>,
) -> Result<jpeg_decoder::ImageInfo, ImageError> {
    decoder.read_info().map_err(jpeg_error)?;
    decoder
        .info()
        .ok_or_else(|| jpeg_error("no frame header"))
}

fn side(length: u32) -> u16 {
    u16::try_from(length).unwrap_or(u16::MAX)
}

fn cmyk_to_rgb(cmyk: &[u8]) -> Vec<u8> {
    cmyk.chunks_exact(4)
        .flat_map(|pixel| {
            let k = 255 - u32::from(pixel[3]);
            let channel = |ink: u8| ((255 - u32::from(ink)) * k / 255) as u8;
            [channel(pixel[0]), channel(pixel[1]), channel(pixel[2])]
        })
        .collect()
}

/// Formats without a reduced decode path: refuse frames over the budget, then
/// decode under a matching allocation limit
fn decode_whole<R: BufRead + Seek>(
    mut stream: R,
    max_pixels: Option<u64>,
) -> Result<(DynamicImage, ImageBounds), ImageError> {
    let start = stream.stream_position()?;
    let bounds = ImageBounds::from(probe_dimensions(&mut stream)?);
    stream.seek(SeekFrom::Start(start))?;

    let mut reader = ImageReader::new(stream).with_guessed_format()?;
    if let Some(max_pixels) = max_pixels {
        if bounds.pixels() > max_pixels {
            log::debug!(
                "{:?} image {bounds} has no reduced decode and exceeds {max_pixels} pixels",
                reader.format()
            );
            return Err(ImageError::Limits(LimitError::from_kind(
                LimitErrorKind::InsufficientMemory,
            )));
        }

        let mut limits = Limits::default();
        limits.max_alloc = Some(max_pixels.saturating_mul(MAX_BYTES_PER_PIXEL));
        reader.limits(limits);
    }

    let image = reader.decode()?;
    Ok((image, bounds))
}

fn png_error(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> ImageError {
    ImageError::Decoding(DecodingError::new(
        ImageFormatHint::Exact(ImageFormat::Png),
        e,
    ))
}

fn jpeg_error(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> ImageError {
    ImageError::Decoding(DecodingError::new(
        ImageFormatHint::Exact(ImageFormat::Jpeg),
        e,
    ))
}

/// Averages `sample` x `sample` cells of an 8-bit row-major image, one source
/// row at a time. Only one output row of sums is held.
///
/// Columns and rows past the last whole cell are dropped, except that an axis
/// shorter than the sample still yields one cell.
struct BoxAccumulator {
    sample: usize,
    channels: usize,
    cols: usize,
    rows: usize,
    sums: Vec<u64>,
    rows_in_cell: usize,
    rows_seen: usize,
    pixels: Vec<u8>,
}

impl BoxAccumulator {
    fn new(source: ImageBounds, sample: SampleSize, channels: usize) -> Self {
        let target = sample.apply(source);
        let sample = sample.get() as usize;
        let target_width = target.width as usize;

        Self {
            sample,
            channels,
            cols: (source.width as usize).min(target_width * sample),
            rows: (source.height as usize).min(target.height as usize * sample),
            sums: vec![0; target_width * channels],
            rows_in_cell: 0,
            rows_seen: 0,
            pixels: Vec::with_capacity(target.pixels() as usize * channels),
        }
    }

    /// Source rows that land in an output cell
    fn rows_needed(&self) -> usize {
        self.rows
    }

    fn push_row(&mut self, row: &[u8]) {
        let channels = self.channels;
        for (x, pixel) in row.chunks_exact(channels).take(self.cols).enumerate() {
            let cell = x / self.sample * channels;
            for (sum, &value) in self.sums[cell..cell + channels].iter_mut().zip(pixel) {
                *sum += u64::from(value);
            }
        }

        self.rows_in_cell += 1;
        self.rows_seen += 1;
        if self.rows_in_cell == self.sample || self.rows_seen == self.rows {
            self.flush();
        }
    }

    fn flush(&mut self) {
        for (i, cell) in self.sums.chunks_exact_mut(self.channels).enumerate() {
            let width = self.sample.min(self.cols - i * self.sample);
            let count = (width * self.rows_in_cell) as u64;
            for sum in cell.iter_mut() {
                self.pixels.push(((*sum + count / 2) / count) as u8);
                *sum = 0;
            }
        }
        self.rows_in_cell = 0;
    }

    fn finish(self) -> Vec<u8> {
        self.pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageproc::image::GenericImageView;

    fn sample(factor: u32) -> SampleSize {
        SampleSize::new(factor).unwrap()
    }

    fn accumulate(width: u32, height: u32, factor: u32, gray: impl Fn(u32, u32) -> u8) -> Vec<u8> {
        let mut cells = BoxAccumulator::new(ImageBounds::new(width, height), sample(factor), 1);
        for y in 0..cells.rows_needed() as u32 {
            let row: Vec<u8> = (0..width).map(|x| gray(x, y)).collect();
            cells.push_row(&row);
        }
        cells.finish()
    }

    #[test]
    fn cells_average_their_pixels() {
        // 4x2 split into two 2x2 cells: [0, 10, 20, 30] and [100, 110, 120, 130]
        let out = accumulate(4, 2, 2, |x, y| (x as u8 % 2) * 10 + y as u8 * 20 + (x as u8 / 2) * 100);
        assert_eq!(out, vec![15, 115]);
    }

    #[test]
    fn trailing_pixels_are_dropped() {
        // 5x5 at 2 keeps 2x2 cells covering the top-left 4x4
        let out = accumulate(5, 5, 2, |x, y| if x == 4 || y == 4 { 255 } else { 8 });
        assert_eq!(out, vec![8; 4]);
    }

    #[test]
    fn short_axis_collapses_to_one_cell() {
        let out = accumulate(3, 16, 8, |x, _| x as u8 * 30);
        // one column of cells, each averaging 0, 30, 60
        assert_eq!(out, vec![30, 30]);
    }

    #[test]
    fn sample_of_one_copies_rows() {
        let out = accumulate(3, 2, 1, |x, y| (x + 3 * y) as u8);
        assert_eq!(out, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn cmyk_without_ink_is_white() {
        assert_eq!(cmyk_to_rgb(&[0, 0, 0, 0, 0, 0, 0, 255]), vec![255, 255, 255, 0, 0, 0]);
    }

    #[test]
    fn whole_frame_decode_respects_budget() {
        let mut bmp = std::io::Cursor::new(Vec::new());
        DynamicImage::new_rgb8(40, 30)
            .write_to(&mut bmp, ImageFormat::Bmp)
            .unwrap();
        let bytes = bmp.into_inner();

        let (image, bounds) =
            decode_sampled(std::io::Cursor::new(&bytes), SampleSize::ONE, Some(1200)).unwrap();
        assert_eq!(bounds, ImageBounds::new(40, 30));
        assert_eq!(image.dimensions(), (40, 30));

        let err = decode_sampled(std::io::Cursor::new(&bytes), sample(2), Some(1199)).unwrap_err();
        assert!(matches!(err, ImageError::Limits(_)));
    }
}
