//! Pure Rust image processing backend.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Resize | `image::imageops::resize` with `Lanczos3` filter, flattened to RGB8 |
//! | Crop | `image::DynamicImage::crop_imm` after a bounds check |

use super::backend::{BackendError, ImageBackend};
use super::params::CropRect;
use image::DynamicImage;
use image::imageops::FilterType;

/// Pure Rust backend using the `image` crate.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend {
    filter: FilterType,
}

impl RustBackend {
    pub fn new() -> Self {
        Self {
            filter: FilterType::Lanczos3,
        }
    }

    /// Use a cheaper resampling filter (e.g. `Triangle` for previews).
    pub fn with_filter(filter: FilterType) -> Self {
        Self { filter }
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBackend for RustBackend {
    fn resize(
        &self,
        image: &DynamicImage,
        width: u32,
        height: u32,
    ) -> Result<DynamicImage, BackendError> {
        if width == 0 || height == 0 {
            return Err(BackendError::ProcessingFailed(format!(
                "Cannot resize to {width}x{height}"
            )));
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(BackendError::InvalidSource);
        }

        // Output is opaque at 1.0 density regardless of the source layout
        let rgb = image.to_rgb8();
        let resized = image::imageops::resize(&rgb, width, height, self.filter);
        Ok(DynamicImage::ImageRgb8(resized))
    }

    fn crop(&self, image: &DynamicImage, rect: CropRect) -> Result<DynamicImage, BackendError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(BackendError::InvalidSource);
        }

        let right = rect.x.checked_add(rect.width);
        let bottom = rect.y.checked_add(rect.height);
        let in_bounds = matches!(
            (right, bottom),
            (Some(r), Some(b)) if r <= image.width() && b <= image.height()
        );
        if rect.width == 0 || rect.height == 0 || !in_bounds {
            return Err(BackendError::ProcessingFailed(format!(
                "Crop {}x{}+{}+{} outside {}x{} image",
                rect.width,
                rect.height,
                rect.x,
                rect.y,
                image.width(),
                image.height()
            )));
        }

        Ok(image.crop_imm(rect.x, rect.y, rect.width, rect.height))
    }
}
