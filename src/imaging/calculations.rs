//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

use super::params::{CropPercentage, CropRect};

/// Bytes per pixel assumed by the memory estimate (RGBA8).
pub const BYTES_PER_PIXEL: u64 = 4;

/// Calculate dimensions that fit inside a `max_dimension` square.
///
/// Returns `None` when both edges already fit (no resize needed). Otherwise
/// scales uniformly by `min(max/width, max/height)` so the longer edge lands
/// exactly on `max_dimension` and the aspect ratio is preserved.
///
/// # Examples
/// ```
/// # use cropdeck::imaging::calculate_fit_dimensions;
/// assert_eq!(calculate_fit_dimensions((2000, 2000), 1024), Some((1024, 1024)));
/// assert_eq!(calculate_fit_dimensions((4000, 3000), 1024), Some((1024, 768)));
/// assert_eq!(calculate_fit_dimensions((800, 600), 1024), None);
/// ```
pub fn calculate_fit_dimensions(source: (u32, u32), max_dimension: u32) -> Option<(u32, u32)> {
    let (src_w, src_h) = source;
    if src_w <= max_dimension && src_h <= max_dimension {
        return None;
    }

    let scale = (max_dimension as f64 / src_w as f64).min(max_dimension as f64 / src_h as f64);

    // The longer edge is pinned so rounding can't push it off max_dimension
    let (w, h) = if src_w >= src_h {
        let h = (src_h as f64 * scale).round() as u32;
        (max_dimension, h)
    } else {
        let w = (src_w as f64 * scale).round() as u32;
        (w, max_dimension)
    };

    Some((w.max(1), h.max(1)))
}

/// Calculate dimensions needed to cover a target area.
///
/// Returns dimensions that completely cover the target area while maintaining
/// the source aspect ratio. One dimension will match exactly, the other may exceed.
///
/// # Arguments
/// * `source` - Original image dimensions (width, height)
/// * `target` - Target area dimensions (width, height)
pub fn calculate_fill_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    let src_aspect = src_w as f64 / src_h as f64;
    let tgt_aspect = tgt_w as f64 / tgt_h as f64;

    if src_aspect > tgt_aspect {
        // Source is wider: height will match, width will exceed
        let h = tgt_h;
        let w = (h as f64 * src_aspect).round() as u32;
        (w.max(tgt_w), h)
    } else {
        // Source is taller: width will match, height will exceed
        let w = tgt_w;
        let h = (w as f64 / src_aspect).round() as u32;
        (w, h.max(tgt_h))
    }
}

/// Calculate the rectangle kept by a symmetric crop.
///
/// A border of `percentage` is removed from each side: the crop offset is
/// `width × p` horizontally and `height × p` vertically, so the retained
/// width is `width × (1 − 2p)`.
///
/// Returns `None` when the retained width or height would be zero. That
/// can't happen for a clamped percentage on a non-empty image, but zero-sized
/// sources reach this too.
pub fn calculate_crop_rect(source: (u32, u32), percentage: CropPercentage) -> Option<CropRect> {
    let (src_w, src_h) = source;
    let p = percentage.fraction();

    let crop_x = (src_w as f64 * p).round() as u32;
    let crop_y = (src_h as f64 * p).round() as u32;

    let width = src_w.checked_sub(crop_x.checked_mul(2)?)?;
    let height = src_h.checked_sub(crop_y.checked_mul(2)?)?;
    if width == 0 || height == 0 {
        return None;
    }

    Some(CropRect {
        x: crop_x,
        y: crop_y,
        width,
        height,
    })
}

/// Estimated memory cost of a raster in bytes.
///
/// `width` and `height` are logical sizes; `scale` is the pixel density.
/// Used purely as a cache-cost heuristic.
pub fn calculate_memory_cost(width: f64, height: f64, scale: f64) -> u64 {
    let px_w = (width * scale).round().max(0.0) as u64;
    let px_h = (height * scale).round().max(0.0) as u64;
    px_w * px_h * BYTES_PER_PIXEL
}
