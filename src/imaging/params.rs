//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the high-level [`operations`](super::operations) module
//! and the [`backend`](super::backend) that does the pixel work.
//!
//! ## Types
//!
//! - [`CropPercentage`]: Border removed from each edge (5–20, default 10).
//!   Clamped on construction and update.
//! - [`CropRect`]: Pixel rectangle retained by a crop.

use std::hash::{Hash, Hasher};

/// Percentage of each edge removed by a symmetric crop (5–20).
///
/// Stored as the percent value (`10.0` = 10%). Equality and hashing are by
/// value, so two percentages that clamp to the same number are equal.
#[derive(Debug, Clone, Copy)]
pub struct CropPercentage(f64);

impl CropPercentage {
    pub const MIN: f64 = 5.0;
    pub const MAX: f64 = 20.0;
    pub const DEFAULT: f64 = 10.0;

    pub fn new(value: f64) -> Self {
        Self(Self::clamp(value))
    }

    /// Replace the value, clamping identically to [`CropPercentage::new`].
    pub fn update(&mut self, value: f64) {
        self.0 = Self::clamp(value);
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Fraction form (`value / 100`).
    pub fn fraction(self) -> f64 {
        self.0 / 100.0
    }

    fn clamp(value: f64) -> f64 {
        if value.is_nan() {
            Self::DEFAULT
        } else {
            value.clamp(Self::MIN, Self::MAX)
        }
    }
}

impl Default for CropPercentage {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl PartialEq for CropPercentage {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for CropPercentage {}

impl Hash for CropPercentage {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl From<f64> for CropPercentage {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

/// Pixel rectangle kept by a crop, in source coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}
