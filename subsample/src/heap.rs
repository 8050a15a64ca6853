use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};
use strum::{EnumCount, EnumIter};

use std::str::FromStr;

use crate::sample::DecodeConstraints;

const MIB: u64 = 1024 * 1024;
// Share of the heap a single decoded image may occupy
const HEAP_FRACTION: u64 = 8;
// ARGB_8888
const BYTES_PER_PIXEL: u64 = 4;

/// Pixel budget for one image given a heap size: an eighth of the heap at 4 bytes per pixel
pub fn pixel_budget_for_heap(heap_bytes: u64) -> u64 {
    heap_bytes / HEAP_FRACTION / BYTES_PER_PIXEL
}

impl DecodeConstraints {
    /// Budget-only constraints sized for a process with `heap_bytes` of memory
    pub fn for_heap(heap_bytes: u64) -> Self {
        Self::with_max_pixels(pixel_budget_for_heap(heap_bytes))
    }
}

/// Common per-app memory classes, in MiB
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, TryFromPrimitive, EnumCount, EnumIter,
)]
#[repr(u8)]
pub enum MemoryClass {
    Heap16 = 0,
    Heap24 = 1,
    Heap32 = 2,
    Heap48 = 3,
    Heap64 = 4,
    Heap96 = 5,
    Heap128 = 6,
    Heap192 = 7,
    Heap256 = 8,
    Heap512 = 9,
}

impl MemoryClass {
    pub fn len() -> usize {
        Self::COUNT
    }

    pub fn iter() -> impl Iterator<Item = Self> {
        <Self as strum::IntoEnumIterator>::iter()
    }

    pub fn megabytes(&self) -> u64 {
        match self {
            MemoryClass::Heap16 => 16,
            MemoryClass::Heap24 => 24,
            MemoryClass::Heap32 => 32,
            MemoryClass::Heap48 => 48,
            MemoryClass::Heap64 => 64,
            MemoryClass::Heap96 => 96,
            MemoryClass::Heap128 => 128,
            MemoryClass::Heap192 => 192,
            MemoryClass::Heap256 => 256,
            MemoryClass::Heap512 => 512,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            MemoryClass::Heap16 => "16 MiB",
            MemoryClass::Heap24 => "24 MiB",
            MemoryClass::Heap32 => "32 MiB",
            MemoryClass::Heap48 => "48 MiB",
            MemoryClass::Heap64 => "64 MiB",
            MemoryClass::Heap96 => "96 MiB",
            MemoryClass::Heap128 => "128 MiB",
            MemoryClass::Heap192 => "192 MiB",
            MemoryClass::Heap256 => "256 MiB",
            MemoryClass::Heap512 => "512 MiB",
        }
    }

    pub fn heap_bytes(&self) -> u64 {
        self.megabytes() * MIB
    }

    pub fn pixel_budget(&self) -> u64 {
        pixel_budget_for_heap(self.heap_bytes())
    }

    pub fn constraints(&self) -> DecodeConstraints {
        DecodeConstraints::for_heap(self.heap_bytes())
    }
}

#[derive(Debug)]
pub struct ParseError(String);

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("Invalid memory class: ")?;
        f.write_str(&self.0)
    }
}

impl std::error::Error for ParseError {}

impl TryFrom<&str> for MemoryClass {
    type Error = ParseError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let normalized = s.trim().to_lowercase().replace([' ', '_'], "-");
        let digits = normalized
            .trim_start_matches("heap-")
            .trim_start_matches("heap")
            .trim_end_matches("mib")
            .trim_end_matches("mb")
            .trim_end_matches('m')
            .trim_end_matches('-');

        let megabytes: u64 = digits.parse().map_err(|_| ParseError(s.to_string()))?;
        Self::iter()
            .find(|class| class.megabytes() == megabytes)
            .ok_or_else(|| ParseError(s.to_string()))
    }
}

impl FromStr for MemoryClass {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_an_eighth_of_heap_in_argb_pixels() {
        assert_eq!(pixel_budget_for_heap(256 * MIB), 8 * MIB);
        assert_eq!(MemoryClass::Heap64.pixel_budget(), 2 * MIB);
        assert_eq!(
            MemoryClass::Heap64.constraints().max_pixels(),
            Some(2 * MIB)
        );
        assert_eq!(MemoryClass::Heap64.constraints().min_side(), None);
    }

    #[test]
    fn parse_variants() {
        for input in ["256", "256m", "256MB", "heap-256", "Heap 256", "heap_256", "256 MiB"] {
            assert_eq!(
                MemoryClass::from_str(input).ok(),
                Some(MemoryClass::Heap256),
                "{input}"
            );
        }
        assert!(MemoryClass::from_str("100").is_err());
        assert!(MemoryClass::from_str("lots").is_err());
    }

    #[test]
    fn discriminants_follow_order() {
        assert_eq!(MemoryClass::len(), 10);
        for (i, class) in MemoryClass::iter().enumerate() {
            assert_eq!(MemoryClass::try_from(i as u8).ok(), Some(class));
        }
        assert!(MemoryClass::try_from(MemoryClass::len() as u8).is_err());
    }
}
