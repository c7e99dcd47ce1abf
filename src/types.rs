//! Shared types passed between the view-model, the processing service and
//! the cache.
//!
//! A [`SourceImage`] is what the picker hands over: an in-memory raster of
//! arbitrary resolution, or a placeholder for an asset that produced no
//! decodable bitmap. Rasters are reference-counted so the original can be
//! shared by the entity, every in-flight request and the cache without copying
//! pixels.

use image::DynamicImage;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Stable identity used as the first half of a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(Uuid);

impl ImageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

}

impl Default for ImageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference-counted decoded raster.
pub type Raster = Arc<DynamicImage>;

/// An image as supplied by the picker.
///
/// `scale` is the pixel density of the raster (pixels per logical point).
/// Logical size is the pixel size divided by the scale, so the memory
/// estimate `width*scale × height*scale × 4` always lands on the pixel count.
#[derive(Debug, Clone)]
pub struct SourceImage {
    id: ImageId,
    raster: Option<Raster>,
    scale: f32,
    name: Option<String>,
}

impl SourceImage {
    /// Wrap a decoded raster at 1.0 density.
    pub fn new(raster: DynamicImage) -> Self {
        Self::from_raster(Arc::new(raster))
    }

    pub fn from_raster(raster: Raster) -> Self {
        Self {
            id: ImageId::new(),
            raster: Some(raster),
            scale: 1.0,
            name: None,
        }
    }

    /// An asset that yielded no decodable bitmap.
    ///
    /// Processing such an image fails with `InvalidSource`.
    pub fn undecodable() -> Self {
        Self {
            id: ImageId::new(),
            raster: None,
            scale: 1.0,
            name: None,
        }
    }

    /// Set the pixel density. Non-positive or non-finite values fall back to 1.0.
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = if scale.is_finite() && scale > 0.0 {
            scale
        } else {
            1.0
        };
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn raster(&self) -> Option<&Raster> {
        self.raster.as_ref()
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Pixel dimensions, `None` for undecodable sources.
    pub fn pixel_size(&self) -> Option<(u32, u32)> {
        self.raster.as_ref().map(|r| (r.width(), r.height()))
    }

    /// Size in logical points (pixels divided by density).
    pub fn logical_size(&self) -> Option<(f64, f64)> {
        self.pixel_size().map(|(w, h)| {
            let scale = self.scale as f64;
            (w as f64 / scale, h as f64 / scale)
        })
    }
}
