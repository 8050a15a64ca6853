//! Sample-size arithmetic
//!
//! A sample size `s` makes the decoder keep one pixel out of every `s` along
//! each axis, so the decoded image holds roughly `1 / s²` of the source pixels.

use std::fmt;

// Upper bound used when no minimum side length is requested
const MAX_INITIAL_SAMPLE: u32 = 128;
// Initial sizes up to this value round to a power of two, larger ones to a multiple of it
const POWER_OF_TWO_LIMIT: u32 = 8;

/// Pixel dimensions reported by a bounds probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageBounds {
    pub width: u32,
    pub height: u32,
}

impl ImageBounds {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl From<(u32, u32)> for ImageBounds {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for ImageBounds {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Integer downsampling factor, always at least 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SampleSize(u32);

impl SampleSize {
    pub const ONE: SampleSize = SampleSize(1);

    /// Returns `None` for zero
    pub fn new(factor: u32) -> Option<Self> {
        (factor >= 1).then_some(SampleSize(factor))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Dimensions of an image decoded from `bounds` at this sample size
    pub fn apply(self, bounds: ImageBounds) -> ImageBounds {
        ImageBounds {
            width: (bounds.width / self.0).max(1),
            height: (bounds.height / self.0).max(1),
        }
    }
}

impl Default for SampleSize {
    fn default() -> Self {
        Self::ONE
    }
}

impl fmt::Display for SampleSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "1/{}", self.0)
    }
}

/// Limits a bounded decode has to respect.
///
/// Both limits unset means the image is decoded at full resolution.
/// Zero values are treated as unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeConstraints {
    max_pixels: Option<u64>,
    min_side: Option<u32>,
}

impl DecodeConstraints {
    pub fn new(max_pixels: Option<u64>, min_side: Option<u32>) -> Self {
        Self {
            max_pixels: max_pixels.filter(|&n| n > 0),
            min_side: min_side.filter(|&n| n > 0),
        }
    }

    pub fn unconstrained() -> Self {
        Self::default()
    }

    /// Keep the decoded image under `max_pixels` pixels
    pub fn with_max_pixels(max_pixels: u64) -> Self {
        Self::new(Some(max_pixels), None)
    }

    /// Keep both decoded sides at or above `min_side`
    pub fn with_min_side(min_side: u32) -> Self {
        Self::new(None, Some(min_side))
    }

    pub fn max_pixels(&self) -> Option<u64> {
        self.max_pixels
    }

    pub fn min_side(&self) -> Option<u32> {
        self.min_side
    }

    pub fn is_unconstrained(&self) -> bool {
        self.max_pixels.is_none() && self.min_side.is_none()
    }
}

/// Compute the sample size for decoding an image of `bounds` under `constraints`.
///
/// The pixel budget gives a lower bound (`ceil(sqrt(w * h / max_pixels))`), the
/// minimum side an upper bound (`min(w / min_side, h / min_side)`). When the
/// bounds cross, the lower bound wins. Otherwise a set minimum side takes
/// precedence over the pixel budget, even when both are set.
///
/// The result is rounded with [`round_sample_size`] and is never below 1, including
/// for zero-sized bounds.
pub fn compute_sample_size(bounds: ImageBounds, constraints: DecodeConstraints) -> SampleSize {
    round_sample_size(initial_sample_size(bounds, constraints))
}

fn initial_sample_size(bounds: ImageBounds, constraints: DecodeConstraints) -> u32 {
    let w = f64::from(bounds.width);
    let h = f64::from(bounds.height);

    let max_pixels = constraints.max_pixels.filter(|&n| n > 0);
    let min_side = constraints.min_side.filter(|&n| n > 0);

    let lower_bound = match max_pixels {
        None => 1,
        Some(max) => (w * h / max as f64).sqrt().ceil() as u32,
    };

    let upper_bound = match min_side {
        None => MAX_INITIAL_SAMPLE,
        Some(side) => {
            let side = f64::from(side);
            (w / side).floor().min((h / side).floor()) as u32
        }
    };

    if upper_bound < lower_bound {
        return lower_bound;
    }

    match (max_pixels, min_side) {
        (None, None) => 1,
        (Some(_), None) => lower_bound,
        (_, Some(_)) => upper_bound,
    }
}

/// Round an initial factor to a canonical sample size.
///
/// Up to 8 the result is the next power of two (`3 -> 4`), above 8 the next
/// multiple of 8 (`9 -> 16`, `17 -> 24`). Zero rounds to 1.
pub fn round_sample_size(initial: u32) -> SampleSize {
    if initial <= POWER_OF_TWO_LIMIT {
        SampleSize(initial.next_power_of_two())
    } else {
        SampleSize(
            initial
                .div_ceil(POWER_OF_TWO_LIMIT)
                .saturating_mul(POWER_OF_TWO_LIMIT),
        )
    }
}

/// Largest power-of-two sample size that keeps both sides above the requested ones.
///
/// Returns 1 when the image already fits. A requested side of 0 also returns 1
/// instead of halving the image down to a single pixel, the way a plain
/// halving loop against a zero target would.
pub fn fit_sample_size(bounds: ImageBounds, req_width: u32, req_height: u32) -> SampleSize {
    if req_width == 0 || req_height == 0 {
        return SampleSize::ONE;
    }

    let mut sample = 1u32;
    if bounds.height > req_height || bounds.width > req_width {
        let half_height = bounds.height / 2;
        let half_width = bounds.width / 2;

        while half_height / sample > req_height && half_width / sample > req_width {
            sample *= 2;
        }
    }

    SampleSize(sample)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bounds(width: u32, height: u32) -> ImageBounds {
        ImageBounds::new(width, height)
    }

    #[test]
    fn rounding_examples() {
        assert_eq!(round_sample_size(0).get(), 1);
        assert_eq!(round_sample_size(1).get(), 1);
        assert_eq!(round_sample_size(3).get(), 4);
        assert_eq!(round_sample_size(5).get(), 8);
        assert_eq!(round_sample_size(8).get(), 8);
        assert_eq!(round_sample_size(9).get(), 16);
        assert_eq!(round_sample_size(16).get(), 16);
        assert_eq!(round_sample_size(17).get(), 24);
    }

    #[test]
    fn budget_only() {
        // 12M / 2M = 6, sqrt = 2.45, ceil = 3, rounds to 4
        let c = DecodeConstraints::with_max_pixels(2_000_000);
        let sample = compute_sample_size(bounds(4000, 3000), c);
        assert_eq!(sample.get(), 4);

        let decoded = sample.apply(bounds(4000, 3000));
        assert_eq!(decoded, bounds(1000, 750));
        assert!(decoded.pixels() <= 2_000_000);
    }

    #[test]
    fn hundred_square_with_quarter_budget() {
        let c = DecodeConstraints::with_max_pixels(2500);
        let sample = compute_sample_size(bounds(100, 100), c);
        assert_eq!(sample.get(), 2);
        assert_eq!(sample.apply(bounds(100, 100)), bounds(50, 50));
    }

    #[test]
    fn min_side_only() {
        // min(4000 / 300, 3000 / 300) = 10, rounds to 16
        let c = DecodeConstraints::with_min_side(300);
        assert_eq!(compute_sample_size(bounds(4000, 3000), c).get(), 16);
    }

    #[test]
    fn min_side_wins_when_both_set() {
        // budget alone would give 1, min side gives min(20, 15) = 15 -> 16
        let c = DecodeConstraints::new(Some(100_000_000), Some(200));
        assert_eq!(compute_sample_size(bounds(4000, 3000), c).get(), 16);
    }

    #[test]
    fn crossed_bounds_use_lower_bound() {
        // lower = ceil(sqrt(12M / 10k)) = 35, upper = min(4000, 3000) / 1000 = 3
        let c = DecodeConstraints::new(Some(10_000), Some(1000));
        assert_eq!(compute_sample_size(bounds(4000, 3000), c).get(), 40);
    }

    #[test]
    fn min_side_larger_than_image() {
        // upper = 0 < lower = 1, so the lower bound is used
        let c = DecodeConstraints::with_min_side(5000);
        assert_eq!(compute_sample_size(bounds(100, 100), c).get(), 1);
    }

    #[test]
    fn zero_dimensions_stay_at_one() {
        let budget = DecodeConstraints::with_max_pixels(100);
        let side = DecodeConstraints::with_min_side(10);
        let both = DecodeConstraints::new(Some(100), Some(10));

        for c in [DecodeConstraints::unconstrained(), budget, side, both] {
            assert_eq!(compute_sample_size(bounds(0, 0), c), SampleSize::ONE);
            assert_eq!(compute_sample_size(bounds(0, 500), c), SampleSize::ONE);
            assert_eq!(compute_sample_size(bounds(500, 0), c), SampleSize::ONE);
        }
        assert!(bounds(0, 500).is_degenerate());
    }

    #[test]
    fn zero_constraints_are_unset() {
        let c = DecodeConstraints::new(Some(0), Some(0));
        assert!(c.is_unconstrained());
        assert_eq!(compute_sample_size(bounds(4000, 3000), c).get(), 1);
    }

    #[test]
    fn fit_to_request() {
        assert_eq!(fit_sample_size(bounds(100, 100), 200, 200).get(), 1);
        // halves: 1000x750 > 500x300, then 500x375 is not > 500 wide
        assert_eq!(fit_sample_size(bounds(2000, 1500), 500, 300).get(), 2);
        assert_eq!(fit_sample_size(bounds(4096, 4096), 100, 100).get(), 32);
        assert_eq!(fit_sample_size(bounds(4096, 4096), 0, 100).get(), 1);
    }

    #[test]
    fn sample_size_rejects_zero() {
        assert!(SampleSize::new(0).is_none());
        assert_eq!(SampleSize::new(4).map(SampleSize::get), Some(4));
        assert_eq!(SampleSize::new(4).unwrap().apply(bounds(3, 3)), bounds(1, 1));
    }

    proptest! {
        #[test]
        fn unconstrained_is_full_resolution(w in 1u32..100_000, h in 1u32..100_000) {
            let c = DecodeConstraints::unconstrained();
            prop_assert_eq!(compute_sample_size(bounds(w, h), c), SampleSize::ONE);
        }

        #[test]
        fn small_sizes_round_to_power_of_two(initial in 1u32..=8) {
            let rounded = round_sample_size(initial).get();
            prop_assert!(rounded.is_power_of_two());
            prop_assert!(rounded >= initial);
            prop_assert!(rounded / 2 < initial);
        }

        #[test]
        fn large_sizes_round_to_multiple_of_eight(initial in 9u32..1_000_000) {
            let rounded = round_sample_size(initial).get();
            prop_assert_eq!(rounded % 8, 0);
            prop_assert!(rounded >= initial);
            prop_assert!(rounded - initial < 8);
        }

        #[test]
        fn budget_is_respected(
            w in 1u32..20_000,
            h in 1u32..20_000,
            budget in 1u64..50_000_000,
        ) {
            let c = DecodeConstraints::with_max_pixels(budget);
            let sample = compute_sample_size(bounds(w, h), c);
            prop_assert!(sample.get() >= 1);

            let decoded = sample.apply(bounds(w, h));
            // a side never drops below one pixel, so tiny budgets can be exceeded by that
            prop_assert!(decoded.pixels() <= budget.max(u64::from(decoded.width.max(decoded.height))));
        }

        #[test]
        fn deterministic(
            w in 0u32..50_000,
            h in 0u32..50_000,
            budget in proptest::option::of(1u64..100_000_000),
            side in proptest::option::of(1u32..10_000),
        ) {
            let c = DecodeConstraints::new(budget, side);
            let first = compute_sample_size(bounds(w, h), c);
            prop_assert!(first.get() >= 1);
            prop_assert_eq!(first, compute_sample_size(bounds(w, h), c));
        }
    }
}
