//! High-level image operations.
//!
//! These functions combine calculations with backend execution. They are
//! synchronous and CPU-bound; the processing service runs them on blocking
//! worker threads.

use super::backend::{BackendError, ImageBackend};
use super::calculations::{
    calculate_crop_rect, calculate_fill_dimensions, calculate_fit_dimensions,
    calculate_memory_cost,
};
use super::params::CropPercentage;
use crate::types::{Raster, SourceImage};
use image::DynamicImage;
use std::sync::Arc;

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Default working resolution for the processing downsample.
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;

/// Shrink a raster so neither edge exceeds `max_dimension`.
///
/// Returns the same `Arc` (no copy) when the image already fits.
pub fn downsample(
    backend: &impl ImageBackend,
    image: &Raster,
    max_dimension: u32,
) -> Result<Raster> {
    match calculate_fit_dimensions((image.width(), image.height()), max_dimension) {
        None => Ok(Arc::clone(image)),
        Some((width, height)) => backend.resize(image, width, height).map(Arc::new),
    }
}

/// Scale a raster so it covers `target` in both dimensions.
///
/// Thumbnail-quality policy for previews: the result is at least as large as
/// the target, unlike [`downsample`] which fits inside a bound.
pub fn downsample_for_display(
    backend: &impl ImageBackend,
    image: &Raster,
    target: (u32, u32),
) -> Result<Raster> {
    if target.0 == 0 || target.1 == 0 {
        return Err(BackendError::ProcessingFailed(format!(
            "Invalid display target {}x{}",
            target.0, target.1
        )));
    }
    if image.width() == 0 || image.height() == 0 {
        return Err(BackendError::InvalidSource);
    }

    let (width, height) = calculate_fill_dimensions((image.width(), image.height()), target);
    backend.resize(image, width, height).map(Arc::new)
}

/// Remove a symmetric border of `percentage` from every edge.
pub fn crop_symmetric(
    backend: &impl ImageBackend,
    image: &DynamicImage,
    percentage: CropPercentage,
) -> Result<DynamicImage> {
    let rect = calculate_crop_rect((image.width(), image.height()), percentage).ok_or_else(|| {
        BackendError::ProcessingFailed(format!(
            "Crop of {}% leaves nothing of a {}x{} image",
            percentage.value(),
            image.width(),
            image.height()
        ))
    })?;

    let cropped = backend.crop(image, rect)?;
    if cropped.width() == 0 || cropped.height() == 0 {
        return Err(BackendError::ProcessingFailed(
            "Crop produced an empty image".into(),
        ));
    }
    Ok(cropped)
}

/// Estimated memory footprint of a source image (RGBA8 at its density).
///
/// Undecodable sources cost nothing.
pub fn estimated_memory_usage(image: &SourceImage) -> u64 {
    image
        .logical_size()
        .map(|(w, h)| calculate_memory_cost(w, h, image.scale() as f64))
        .unwrap_or(0)
}

/// Estimated memory footprint of a raster at 1.0 density.
pub fn raster_memory_usage(image: &DynamicImage) -> u64 {
    calculate_memory_cost(image.width() as f64, image.height() as f64, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::imaging::params::CropRect;

    fn raster(width: u32, height: u32) -> Raster {
        Arc::new(DynamicImage::new_rgb8(width, height))
    }

    #[test]
    fn downsample_large_square_to_max_dimension() {
        let backend = MockBackend::new();
        let out = downsample(&backend, &raster(2000, 2000), 1024).unwrap();
        assert_eq!((out.width(), out.height()), (1024, 1024));
        assert!(matches!(
            backend.get_operations()[0],
            RecordedOp::Resize {
                width: 1024,
                height: 1024,
                ..
            }
        ));
    }

    #[test]
    fn downsample_small_image_is_noop() {
        let backend = MockBackend::new();
        let source = raster(800, 600);
        let out = downsample(&backend, &source, 1024).unwrap();

        assert!(Arc::ptr_eq(&source, &out));
        assert!(backend.get_operations().is_empty());
    }

    #[test]
    fn downsample_respects_custom_max() {
        let backend = MockBackend::new();
        let out = downsample(&backend, &raster(600, 300), 200).unwrap();
        assert_eq!((out.width(), out.height()), (200, 100));
    }

    #[test]
    fn downsample_for_display_covers_target() {
        let backend = MockBackend::new();
        let out = downsample_for_display(&backend, &raster(800, 600), (400, 500)).unwrap();
        assert_eq!((out.width(), out.height()), (667, 500));
    }

    #[test]
    fn downsample_for_display_rejects_empty_target() {
        let backend = MockBackend::new();
        let result = downsample_for_display(&backend, &raster(800, 600), (0, 500));
        assert!(matches!(result, Err(BackendError::ProcessingFailed(_))));
    }

    #[test]
    fn crop_symmetric_100_square_at_10_percent() {
        let backend = MockBackend::new();
        let source = DynamicImage::new_rgb8(100, 100);
        let out = crop_symmetric(&backend, &source, CropPercentage::new(10.0)).unwrap();

        assert_eq!((out.width(), out.height()), (80, 80));
        assert_eq!(
            backend.get_operations(),
            vec![RecordedOp::Crop {
                from: (100, 100),
                rect: CropRect {
                    x: 10,
                    y: 10,
                    width: 80,
                    height: 80
                }
            }]
        );
    }

    #[test]
    fn crop_symmetric_empty_image_fails_before_backend() {
        let backend = MockBackend::new();
        let source = DynamicImage::new_rgb8(0, 10);
        let result = crop_symmetric(&backend, &source, CropPercentage::default());
        assert!(matches!(result, Err(BackendError::ProcessingFailed(_))));
        assert!(backend.get_operations().is_empty());
    }

    #[test]
    fn crop_symmetric_propagates_backend_failure() {
        let backend = MockBackend::failing_crop();
        let source = DynamicImage::new_rgb8(50, 50);
        let result = crop_symmetric(&backend, &source, CropPercentage::default());
        assert!(matches!(result, Err(BackendError::ProcessingFailed(_))));
    }

    #[test]
    fn estimated_memory_usage_uses_pixel_count() {
        let img = SourceImage::new(DynamicImage::new_rgb8(300, 200)).with_scale(2.0);
        assert_eq!(estimated_memory_usage(&img), 300 * 200 * 4);
    }

    #[test]
    fn estimated_memory_usage_of_undecodable_is_zero() {
        assert_eq!(estimated_memory_usage(&SourceImage::undecodable()), 0);
    }
}
