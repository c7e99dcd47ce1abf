//! Image processing service.
//!
//! Turns a [`ProcessingRequest`] into a cropped raster. Each call runs the
//! same pipeline:
//!
//! ```text
//! 1. cache lookup      hit → return, nothing else happens
//! 2. admission         wait for a limiter slot (cancellable)
//! 3. downsample        shrink to the working resolution on a blocking thread
//! 4. crop              remove the symmetric border on a blocking thread
//! 5. cache store       keyed by (request identity, crop value)
//! 6. release           the slot guard drops on every exit path
//! ```
//!
//! ## Request identity
//!
//! A request gets a fresh [`ImageId`] at construction and that id is the
//! image half of the cache key. Two requests for the same source image
//! therefore never share an entry; only replaying the same request (or one
//! built with [`ProcessingRequest::with_id`]) hits the cache.
//!
//! ## Cancellation
//!
//! The token is checked while waiting for admission, before each blocking
//! step and once more before the cache store. Work already running on a
//! blocking thread runs to the end, but its result is discarded: a cancelled
//! call never writes to the cache and always returns
//! [`ProcessError::Cancelled`].

use crate::cache::ImageCache;
use crate::cancel::{CancellationToken, Cancelled};
use crate::imaging::{
    BackendError, CropPercentage, DEFAULT_MAX_DIMENSION, ImageBackend, RustBackend,
    crop_symmetric, downsample,
};
use crate::limiter::ConcurrencyLimiter;
use crate::types::{ImageId, Raster, SourceImage};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("Invalid source image: no decodable raster")]
    InvalidSource,
    #[error("Image processing failed: {0}")]
    ProcessingFailed(String),
    #[error("Processing cancelled")]
    Cancelled,
}

impl From<BackendError> for ProcessError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::InvalidSource => ProcessError::InvalidSource,
            BackendError::ProcessingFailed(msg) => ProcessError::ProcessingFailed(msg),
        }
    }
}

impl From<Cancelled> for ProcessError {
    fn from(_: Cancelled) -> Self {
        ProcessError::Cancelled
    }
}

impl From<tokio::task::JoinError> for ProcessError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            ProcessError::Cancelled
        } else {
            ProcessError::ProcessingFailed(format!("worker panicked: {err}"))
        }
    }
}

/// One unit of work: crop `source` by `crop`.
#[derive(Debug, Clone)]
pub struct ProcessingRequest {
    id: ImageId,
    source: SourceImage,
    crop: CropPercentage,
}

impl ProcessingRequest {
    /// New request with a freshly generated identity.
    pub fn new(source: SourceImage, crop: CropPercentage) -> Self {
        Self::with_id(ImageId::new(), source, crop)
    }

    /// Request with an explicit identity, for replaying against the cache.
    pub fn with_id(id: ImageId, source: SourceImage, crop: CropPercentage) -> Self {
        Self { id, source, crop }
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn source(&self) -> &SourceImage {
        &self.source
    }

    pub fn crop(&self) -> CropPercentage {
        self.crop
    }
}

/// Cache-backed, admission-limited crop pipeline.
pub struct ImageProcessingService<B: ImageBackend = RustBackend> {
    backend: Arc<B>,
    cache: Option<Arc<ImageCache>>,
    limiter: Arc<ConcurrencyLimiter>,
    max_dimension: u32,
}

impl ImageProcessingService<RustBackend> {
    /// Service on the `image` crate backend with default slots and no cache.
    pub fn new() -> Self {
        Self::with_backend(RustBackend::new())
    }
}

impl Default for ImageProcessingService<RustBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: ImageBackend> ImageProcessingService<B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            cache: None,
            limiter: Arc::new(ConcurrencyLimiter::with_default_slots()),
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ImageCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_limiter(mut self, limiter: Arc<ConcurrencyLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension.max(1);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn cache(&self) -> Option<&Arc<ImageCache>> {
        self.cache.as_ref()
    }

    pub fn limiter(&self) -> &Arc<ConcurrencyLimiter> {
        &self.limiter
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// Run the pipeline for `request`.
    pub async fn process(
        &self,
        request: &ProcessingRequest,
        cancel: &CancellationToken,
    ) -> Result<Raster, ProcessError> {
        let id = request.id();
        let crop = request.crop();

        if let Some(hit) = self.cache.as_ref().and_then(|c| c.lookup(id, crop)) {
            trace!(%id, crop = crop.value(), "cache hit");
            return Ok(hit);
        }

        let _slot = self.limiter.acquire_slot(cancel).await?;
        trace!(%id, active = self.limiter.active_count(), "admitted");

        let source = request
            .source()
            .raster()
            .cloned()
            .ok_or(ProcessError::InvalidSource)?;

        cancel.check()?;
        let working = {
            let backend = Arc::clone(&self.backend);
            let max_dimension = self.max_dimension;
            tokio::task::spawn_blocking(move || downsample(&*backend, &source, max_dimension))
                .await??
        };

        cancel.check()?;
        let cropped: Raster = {
            let backend = Arc::clone(&self.backend);
            tokio::task::spawn_blocking(move || crop_symmetric(&*backend, &working, crop))
                .await??
                .into()
        };

        cancel.check()?;
        if let Some(cache) = &self.cache {
            cache.store(Arc::clone(&cropped), id, crop);
        }
        debug!(
            %id,
            crop = crop.value(),
            width = cropped.width(),
            height = cropped.height(),
            "processed image"
        );

        Ok(cropped)
    }
}
