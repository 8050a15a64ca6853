//! Heap high-water mark of budgeted decodes, measured with a counting allocator.
//!
//! Lives in its own test binary so no other test allocates while it measures.

use imageproc::image::codecs::jpeg::JpegEncoder;
use imageproc::image::codecs::png::{CompressionType, FilterType, PngEncoder};
use imageproc::image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage};

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use subsample::{BoundedDecoder, BytesSource, DecodeConstraints, ImageBounds};

struct Counting;

static CURRENT: AtomicUsize = AtomicUsize::new(0);
static PEAK: AtomicUsize = AtomicUsize::new(0);

fn grow(bytes: usize) {
    let now = CURRENT.fetch_add(bytes, Ordering::SeqCst) + bytes;
    PEAK.fetch_max(now, Ordering::SeqCst);
}

fn shrink(bytes: usize) {
    CURRENT.fetch_sub(bytes, Ordering::SeqCst);
}

unsafe impl GlobalAlloc for Counting {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            grow(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        shrink(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = System.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            if new_size > layout.size() {
                grow(new_size - layout.size());
            } else {
                shrink(layout.size() - new_size);
            }
        }
        new_ptr
    }
}

#[global_allocator]
static ALLOCATOR: Counting = Counting;

// Tests run on parallel threads, measurements must not overlap
static SERIAL: Mutex<()> = Mutex::new(());

/// Runs `f` and returns its result with the bytes allocated on top of the
/// heap in use before the call, at the highest point
fn peak_during<T>(f: impl FnOnce() -> T) -> (T, usize) {
    let base = CURRENT.load(Ordering::SeqCst);
    PEAK.store(base, Ordering::SeqCst);
    let out = f();
    (out, PEAK.load(Ordering::SeqCst).saturating_sub(base))
}

fn gradient(side: u32) -> RgbImage {
    RgbImage::from_fn(side, side, |x, y| {
        Rgb([(x / 16) as u8, (y / 16) as u8, ((x + y) / 32) as u8])
    })
}

#[test]
fn png_decode_stays_near_output_size() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());

    let side = 3000;
    let full_frame = (side * side * 3) as usize;
    let bytes = {
        let img = gradient(side);
        let mut out = Vec::new();
        PngEncoder::new_with_quality(&mut out, CompressionType::Fast, FilterType::Sub)
            .write_image(img.as_raw(), side, side, ExtendedColorType::Rgb8)
            .unwrap();
        out
    };

    let source = BytesSource::new(&bytes[..]);
    let decoder = BoundedDecoder::new(DecodeConstraints::with_max_pixels(10_000));
    let (decoded, peak) = peak_during(|| decoder.try_decode(&source).unwrap());

    // ceil(sqrt(9M / 10k)) = 30, rounded up to 32
    assert_eq!(decoded.sample_size().get(), 32);
    assert_eq!(decoded.dimensions(), ImageBounds::new(93, 93));
    assert!(
        peak * 16 < full_frame,
        "peak of {peak} bytes while decoding a {full_frame} byte frame"
    );
}

#[test]
fn jpeg_decode_stays_below_full_frame() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());

    let side = 1600;
    let full_frame = (side * side * 3) as usize;
    let bytes = {
        let img = gradient(side);
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 80)
            .write_image(img.as_raw(), side, side, ExtendedColorType::Rgb8)
            .unwrap();
        out
    };

    let source = BytesSource::new(&bytes[..]);
    let decoder = BoundedDecoder::new(DecodeConstraints::with_max_pixels(4_000));
    let (decoded, peak) = peak_during(|| decoder.try_decode(&source).unwrap());

    // ceil(sqrt(2.56M / 4000)) = 26, rounded up to 32; the decoder itself scales by 1/8
    assert_eq!(decoded.sample_size().get(), 32);
    assert_eq!(decoded.dimensions(), ImageBounds::new(50, 50));
    assert!(
        peak * 4 < full_frame,
        "peak of {peak} bytes while decoding a {full_frame} byte frame"
    );
}
