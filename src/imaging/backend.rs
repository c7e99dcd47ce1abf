//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two pixel operations the pipeline
//! needs: resize and crop. Everything above it (dimension math, cache keys,
//! admission control) is backend-agnostic.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend) on the `image` crate.

use super::params::CropRect;
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Invalid source image: no decodable raster")]
    InvalidSource,
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Trait for image processing backends.
///
/// Backends run on blocking worker threads, so they must be shareable across
/// threads and own no borrowed state.
pub trait ImageBackend: Send + Sync + 'static {
    /// Resample to exactly `width × height`, producing an opaque raster.
    fn resize(
        &self,
        image: &DynamicImage,
        width: u32,
        height: u32,
    ) -> Result<DynamicImage, BackendError>;

    /// Extract the sub-image covered by `rect`.
    fn crop(&self, image: &DynamicImage, rect: CropRect) -> Result<DynamicImage, BackendError>;
}
