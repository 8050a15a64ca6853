//! Failures of a bounded decode

use imageproc::image::ImageError;

use std::io;

/// Coarse failure category, for callers that only need to branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    SourceUnavailable,
    DecodeFailure,
    ArithmeticDegenerate,
    Resample,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The byte source could not be opened or read
    #[error("source unavailable ({source_name}): {cause}")]
    SourceUnavailable {
        source_name: String,
        #[source]
        cause: io::Error,
    },

    /// The codec rejected the bytes
    #[error("failed to decode {source_name}: {cause}")]
    Decode {
        source_name: String,
        #[source]
        cause: ImageError,
    },

    #[error("image reports degenerate bounds {width}x{height}")]
    DegenerateBounds { width: u32, height: u32 },

    #[error("failed to resample image: {0}")]
    Resample(String),
}

impl DecodeError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DecodeError::SourceUnavailable { .. } => FailureKind::SourceUnavailable,
            DecodeError::Decode { .. } => FailureKind::DecodeFailure,
            DecodeError::DegenerateBounds { .. } => FailureKind::ArithmeticDegenerate,
            DecodeError::Resample(_) => FailureKind::Resample,
        }
    }

    pub(crate) fn unavailable(source_name: String, cause: io::Error) -> Self {
        DecodeError::SourceUnavailable { source_name, cause }
    }

    pub(crate) fn codec(source_name: String, cause: ImageError) -> Self {
        DecodeError::Decode { source_name, cause }
    }
}
