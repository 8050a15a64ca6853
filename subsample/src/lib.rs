pub mod config;
pub mod error;
pub mod heap;
pub mod image;
pub mod sample;
pub mod source;

// Re-export commonly used types
pub use config::DecoderConfig;
pub use error::{DecodeError, FailureKind};
pub use heap::MemoryClass;
pub use image::{
    decode_batch_to_fit, decode_bounded, decode_to_fit, probe_bounds, BoundedDecoder,
    DecodedImage, ImageFormat, PngCompression,
};
pub use sample::{
    compute_sample_size, fit_sample_size, round_sample_size, DecodeConstraints, ImageBounds,
    SampleSize,
};
pub use source::{
    AssetDir, ByteSource, BytesSource, DescriptorSource, FileSource, ImageStream, ResourceBundle,
    ResourceId, ResourceSource, Resources, StreamSource,
};
