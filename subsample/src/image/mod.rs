//! Bounded decode pipeline
//!
//! Decoding runs in two passes over a [`ByteSource`]: the first stream is only
//! used to read the image header, the second one is decoded at the sample size
//! chosen from the header's dimensions. Each stream is dropped before the next
//! one is opened. Callers that already know the factor skip the first pass
//! with [`BoundedDecoder::decode_sampled`].

mod decode;
mod encode;
mod resample;

// Re-export public API
pub use encode::{
    compress_to_jpeg, compress_to_png, compress_to_webp, encode, ImageFormat, PngCompression,
};

use imageproc::image::{DynamicImage, GenericImageView};
use rayon::iter::ParallelIterator;
use rayon::slice::ParallelSlice;

use crate::error::DecodeError;
use crate::sample::{
    compute_sample_size, fit_sample_size, DecodeConstraints, ImageBounds, SampleSize,
};
use crate::source::ByteSource;

/// Decoded pixels, owned by the caller
#[derive(Debug, Clone)]
pub struct DecodedImage {
    image: DynamicImage,
    source_bounds: ImageBounds,
    sample_size: SampleSize,
}

impl DecodedImage {
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_inner(self) -> DynamicImage {
        self.image
    }

    pub fn dimensions(&self) -> ImageBounds {
        ImageBounds::from(self.image.dimensions())
    }

    /// Full-resolution dimensions, before sampling
    pub fn source_bounds(&self) -> ImageBounds {
        self.source_bounds
    }

    pub fn sample_size(&self) -> SampleSize {
        self.sample_size
    }
}

/// Decoder that keeps images within its [`DecodeConstraints`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundedDecoder {
    constraints: DecodeConstraints,
}

impl BoundedDecoder {
    pub fn new(constraints: DecodeConstraints) -> Self {
        Self { constraints }
    }

    pub fn constraints(&self) -> DecodeConstraints {
        self.constraints
    }

    pub fn sample_size_for(&self, bounds: ImageBounds) -> SampleSize {
        compute_sample_size(bounds, self.constraints)
    }

    /// Bounds probe only, nothing is decoded
    pub fn probe<S: ByteSource + ?Sized>(&self, source: &S) -> Result<ImageBounds, DecodeError> {
        probe_bounds(source)
    }

    pub fn try_decode<S: ByteSource + ?Sized>(
        &self,
        source: &S,
    ) -> Result<DecodedImage, DecodeError> {
        decode_with(source, self.constraints.max_pixels(), |bounds| {
            self.sample_size_for(bounds)
        })
    }

    /// Decode at a caller-chosen sample size from a single stream, without a bounds probe.
    ///
    /// Formats the codec cannot reduce while decoding still have to fit the
    /// pixel budget whole.
    pub fn decode_sampled<S: ByteSource + ?Sized>(
        &self,
        source: &S,
        sample_size: SampleSize,
    ) -> Result<DecodedImage, DecodeError> {
        decode_at(source, sample_size, self.constraints.max_pixels())
    }

    /// Like [`try_decode`](Self::try_decode), logging the failure and returning `None`
    pub fn decode<S: ByteSource + ?Sized>(&self, source: &S) -> Option<DecodedImage> {
        self.try_decode(source)
            .map_err(|e| log::warn!("Failed to decode {}: {}", source.describe(), e))
            .ok()
    }

    /// Decode many independent sources on the rayon pool, results in input order
    pub fn decode_batch<S>(&self, sources: &[S]) -> Vec<Result<DecodedImage, DecodeError>>
    where
        S: ByteSource + Sync,
    {
        par_decode(sources, |source| self.try_decode(source))
    }
}

fn par_decode<S, F>(sources: &[S], decode: F) -> Vec<Result<DecodedImage, DecodeError>>
where
    S: ByteSource + Sync,
    F: Fn(&S) -> Result<DecodedImage, DecodeError> + Sync,
{
    let num_threads = rayon::current_num_threads();
    let chunk_size = (sources.len() / num_threads).max(1);

    log::debug!(
        "Decoding {} sources with {} threads, chunk size: {}",
        sources.len(),
        num_threads,
        chunk_size
    );

    sources
        .par_chunks(chunk_size)
        .flat_map_iter(|chunk| chunk.iter().map(&decode))
        .collect()
}

/// Read the dimensions of the image behind `source` without decoding pixels
pub fn probe_bounds<S: ByteSource + ?Sized>(source: &S) -> Result<ImageBounds, DecodeError> {
    let stream = source
        .open()
        .map_err(|e| DecodeError::unavailable(source.describe(), e))?;

    let bounds = decode::probe_dimensions(stream)
        .map(ImageBounds::from)
        .map_err(|e| DecodeError::codec(source.describe(), e))?;

    log::trace!("Probed {}: {}", source.describe(), bounds);
    Ok(bounds)
}

/// Decode `source` within `constraints`, `None` on any failure
pub fn decode_bounded<S: ByteSource + ?Sized>(
    source: &S,
    constraints: DecodeConstraints,
) -> Option<DecodedImage> {
    BoundedDecoder::new(constraints).decode(source)
}

/// Decode `source` at the largest power-of-two reduction still covering `width` x `height`
pub fn decode_to_fit<S: ByteSource + ?Sized>(
    source: &S,
    width: u32,
    height: u32,
) -> Result<DecodedImage, DecodeError> {
    decode_with(source, None, |bounds| fit_sample_size(bounds, width, height))
}

/// [`decode_to_fit`] over many sources on the rayon pool, results in input order
pub fn decode_batch_to_fit<S>(
    sources: &[S],
    width: u32,
    height: u32,
) -> Vec<Result<DecodedImage, DecodeError>>
where
    S: ByteSource + Sync,
{
    par_decode(sources, |source| decode_to_fit(source, width, height))
}

fn decode_with<S, F>(
    source: &S,
    max_pixels: Option<u64>,
    choose_sample: F,
) -> Result<DecodedImage, DecodeError>
where
    S: ByteSource + ?Sized,
    F: FnOnce(ImageBounds) -> SampleSize,
{
    // 1. Header only
    let bounds = probe_bounds(source)?;
    if bounds.is_degenerate() {
        return Err(DecodeError::DegenerateBounds {
            width: bounds.width,
            height: bounds.height,
        });
    }

    let sample_size = choose_sample(bounds);
    log::debug!(
        "Decoding {} ({}) at sample size {}",
        source.describe(),
        bounds,
        sample_size
    );

    // 2. Reduced decode from a fresh stream
    decode_at(source, sample_size, max_pixels)
}

fn decode_at<S>(
    source: &S,
    sample_size: SampleSize,
    max_pixels: Option<u64>,
) -> Result<DecodedImage, DecodeError>
where
    S: ByteSource + ?Sized,
{
    let stream = source
        .open()
        .map_err(|e| DecodeError::unavailable(source.describe(), e))?;
    let (image, bounds) = decode::decode_sampled(stream, sample_size, max_pixels)
        .map_err(|e| DecodeError::codec(source.describe(), e))?;

    if bounds.is_degenerate() {
        return Err(DecodeError::DegenerateBounds {
            width: bounds.width,
            height: bounds.height,
        });
    }

    let image = resample::resize_to(image, sample_size.apply(bounds))?;

    Ok(DecodedImage {
        image,
        source_bounds: bounds,
        sample_size,
    })
}
