//! # cropdeck
//!
//! Symmetric photo cropping for long, scrolling image lists. A user picks up
//! to a hundred photos, drags a slider between 5% and 20%, and every image is
//! re-cropped while the list stays responsive.
//!
//! # Architecture: Request Pipeline
//!
//! Each image goes through the same pipeline, driven by the view-model:
//!
//! ```text
//! ImageListViewModel ── ProcessingRequest ──▶ ImageProcessingService
//!        ▲                                        │
//!        │                              1. cache lookup (hit → done)
//!        │                              2. limiter slot  (≤ N at once)
//!        │                              3. downsample    (≤ 1024 px)
//!        │                              4. crop          (p% per edge)
//!        │                              5. cache store
//!        └────────── completion (entity, generation) ◀──┘
//! ```
//!
//! Work is superseded constantly: every slider step cancels what is running
//! and re-dispatches the whole list, visible rows first. Cancellation is
//! cooperative and a superseded result is never written back.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`types`] | `ImageId`, `SourceImage` (decoded raster or undecodable placeholder) |
//! | [`imaging`] | Pure-Rust image operations: downsample, display downsample, symmetric crop |
//! | [`cache`] | LRU cache of cropped results bounded by count and memory cost |
//! | [`cancel`] | `CancellationToken` for cooperative cancellation |
//! | [`limiter`] | `ConcurrencyLimiter`: cancellable admission into CPU-bound work |
//! | [`process`] | `ImageProcessingService`: the per-request pipeline |
//! | [`view_model`] | `ImageListViewModel` and `ProcessedImage` entities |
//! | [`config`] | `cropdeck.toml` loading, validation and merging |
//! | [`output`] | CLI output formatting |
//! | [`logging`] | Tracing subscriber setup for the CLI |
//!
//! # Design Decisions
//!
//! ## Downsample Before Crop
//!
//! Phone photos are 12+ megapixels; list rows show a few hundred points.
//! Every image is shrunk so its longer edge is at most 1024 px before the
//! crop runs, which bounds both the crop cost and the memory held by the
//! cache (4 MB per entry at most).
//!
//! ## Admission, Not Thread Pools
//!
//! CPU work runs on Tokio's blocking pool, but entry into the pipeline is
//! gated by [`limiter::ConcurrencyLimiter`] with `min(cores, 4)` slots.
//! Waiters hold no thread, so a hundred queued requests cost nothing, and a
//! waiter that is cancelled leaves without ever taking a slot.
//!
//! ## Generations Over Handles
//!
//! The view-model tags every dispatch with a generation number. A completion
//! lands only if its generation is still the entity's current one, which
//! covers superseded work, removed rows and cancelled tokens with one check.

pub mod cache;
pub mod cancel;
pub mod config;
pub mod imaging;
pub mod limiter;
pub mod logging;
pub mod output;
pub mod process;
pub mod types;
pub mod view_model;
