//! Image processing: pure Rust on the `image` crate.
//!
//! | Operation | Function |
//! |---|---|
//! | **Downsample** (fit inside a bound) | [`downsample`] |
//! | **Display downsample** (cover a target) | [`downsample_for_display`] |
//! | **Symmetric crop** | [`crop_symmetric`] |
//! | **Memory estimate** | [`estimated_memory_usage`] |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Value types describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: High-level functions combining calculations + backend

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, ImageBackend};
pub use calculations::{
    calculate_crop_rect, calculate_fill_dimensions, calculate_fit_dimensions,
    calculate_memory_cost,
};
pub use operations::{
    DEFAULT_MAX_DIMENSION, crop_symmetric, downsample, downsample_for_display,
    estimated_memory_usage, raster_memory_usage,
};
pub use params::{CropPercentage, CropRect};
pub use rust_backend::RustBackend;
