//! Image list orchestration.
//!
//! [`ImageListViewModel`] owns every [`ProcessedImage`] on screen and decides
//! what work runs when. It is a single-owner object: all mutation happens
//! through `&mut self`, and background results come back over a channel that
//! the owner drains with [`apply_pending`](ImageListViewModel::apply_pending),
//! [`next_update`](ImageListViewModel::next_update) or
//! [`wait_until_idle`](ImageListViewModel::wait_until_idle).
//!
//! ## Entity lifecycle
//!
//! ```text
//!           dispatch                 Ok
//!   Idle ───────────▶ Processing ─────────▶ Cropped
//!     ▲                 │    │    Err
//!     └──── cancelled ──┘    └────────────▶ Errored
//!
//!   any state ── dispatch ──▶ Processing
//! ```
//!
//! Each dispatch gets a generation number. Only a completion whose generation
//! matches the entity's current in-flight task is applied; everything else
//! (superseded work, removed entities, cancelled tokens) is dropped.
//!
//! ## Priority
//!
//! Work for visible entities is dispatched first and at
//! [`TaskPriority::Elevated`]. Normal-priority tasks yield once to the
//! scheduler before entering the pipeline. This is a bias, not an ordering
//! guarantee.
//!
//! All dispatching methods spawn onto the current Tokio runtime and must be
//! called from within one.

use crate::cache::ImageCache;
use crate::cancel::CancellationToken;
use crate::config::{PipelineConfig, effective_concurrency};
use crate::imaging::{CropPercentage, ImageBackend, RustBackend};
use crate::limiter::ConcurrencyLimiter;
use crate::process::{ImageProcessingService, ProcessError, ProcessingRequest};
use crate::types::{Raster, SourceImage};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default cap on images accepted per selection.
pub const DEFAULT_SELECTION_LIMIT: usize = 100;

/// Identity of an entity within one view-model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPriority {
    /// Visible on screen; starts immediately.
    Elevated,
    /// Off screen; yields once before starting.
    Normal,
}

/// Derived view of an entity's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageState {
    Idle,
    Processing,
    Cropped,
    Errored,
}

#[derive(Debug)]
struct InFlight {
    generation: u64,
    token: CancellationToken,
}

/// One picked image and its processing state.
#[derive(Debug)]
pub struct ProcessedImage {
    id: EntityId,
    original: SourceImage,
    cropped: Option<Raster>,
    processing: bool,
    error: Option<ProcessError>,
    visible: bool,
    task: Option<InFlight>,
    last_generation: Option<u64>,
    last_priority: Option<TaskPriority>,
}

impl ProcessedImage {
    fn new(id: EntityId, original: SourceImage) -> Self {
        Self {
            id,
            original,
            cropped: None,
            processing: false,
            error: None,
            visible: false,
            task: None,
            last_generation: None,
            last_priority: None,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn original(&self) -> &SourceImage {
        &self.original
    }

    pub fn cropped_image(&self) -> Option<&Raster> {
        self.cropped.as_ref()
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn error(&self) -> Option<&ProcessError> {
        self.error.as_ref()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Generation of the most recent dispatch.
    pub fn task_generation(&self) -> Option<u64> {
        self.last_generation
    }

    /// Priority of the most recent dispatch.
    pub fn task_priority(&self) -> Option<TaskPriority> {
        self.last_priority
    }

    pub fn state(&self) -> ImageState {
        if self.processing {
            ImageState::Processing
        } else if self.error.is_some() {
            ImageState::Errored
        } else if self.cropped.is_some() {
            ImageState::Cropped
        } else {
            ImageState::Idle
        }
    }

    /// Cancel and forget the in-flight task, if any.
    fn cancel_task(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                task.token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Passes a value through only when it differs from the previous one.
///
/// The first observed value primes the filter and is suppressed.
#[derive(Debug, Clone, Default)]
pub struct ChangeFilter<T> {
    last: Option<T>,
}

impl<T: PartialEq + Clone> ChangeFilter<T> {
    pub fn new() -> Self {
        Self { last: None }
    }

    /// A filter that has already seen `initial`.
    pub fn primed(initial: T) -> Self {
        Self {
            last: Some(initial),
        }
    }

    /// Record `value`; `true` if it is a real change.
    pub fn observe(&mut self, value: T) -> bool {
        match &self.last {
            Some(prev) if *prev == value => false,
            Some(_) => {
                self.last = Some(value);
                true
            }
            None => {
                self.last = Some(value);
                false
            }
        }
    }
}

#[derive(Debug)]
struct Completion {
    entity: EntityId,
    generation: u64,
    result: Result<Raster, ProcessError>,
}

pub struct ImageListViewModel<B: ImageBackend = RustBackend> {
    service: Arc<ImageProcessingService<B>>,
    images: Vec<ProcessedImage>,
    crop: CropPercentage,
    crop_changes: ChangeFilter<CropPercentage>,
    selection_limit: usize,
    presented_error: Option<String>,
    next_entity: u64,
    next_generation: u64,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
}

impl ImageListViewModel<RustBackend> {
    /// View-model wired from configuration: cache bounds, concurrency,
    /// working resolution, initial crop and selection limit.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let service = ImageProcessingService::new()
            .with_cache(Arc::new(ImageCache::new(config.cache_limits())))
            .with_limiter(Arc::new(ConcurrencyLimiter::new(effective_concurrency(
                &config.processing,
            ))))
            .with_max_dimension(config.processing.max_dimension);
        Self::new(service, config.crop_percentage()).with_selection_limit(config.selection.limit)
    }
}

impl<B: ImageBackend> ImageListViewModel<B> {
    pub fn new(service: ImageProcessingService<B>, crop: CropPercentage) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            service: Arc::new(service),
            images: Vec::new(),
            crop,
            crop_changes: ChangeFilter::primed(crop),
            selection_limit: DEFAULT_SELECTION_LIMIT,
            presented_error: None,
            next_entity: 1,
            next_generation: 1,
            completions_tx,
            completions_rx,
        }
    }

    pub fn with_selection_limit(mut self, limit: usize) -> Self {
        self.selection_limit = limit.max(1);
        self
    }

    pub fn service(&self) -> &ImageProcessingService<B> {
        &self.service
    }

    pub fn cache(&self) -> Option<&Arc<ImageCache>> {
        self.service.cache()
    }

    pub fn images(&self) -> &[ProcessedImage] {
        &self.images
    }

    pub fn image(&self, id: EntityId) -> Option<&ProcessedImage> {
        self.images.iter().find(|img| img.id == id)
    }

    pub fn crop_percentage(&self) -> CropPercentage {
        self.crop
    }

    pub fn selection_limit(&self) -> usize {
        self.selection_limit
    }

    /// Number of entities currently processing.
    pub fn processing_count(&self) -> usize {
        self.images.iter().filter(|img| img.processing).count()
    }

    pub fn is_idle(&self) -> bool {
        self.processing_count() == 0
    }

    // ------------------------------------------------------------------
    // Selection and dispatch
    // ------------------------------------------------------------------

    /// Append one entity per image and dispatch each.
    ///
    /// At most [`selection_limit`](Self::selection_limit) images are
    /// accepted; the ids of the accepted ones are returned in order.
    pub fn process_selected_images(
        &mut self,
        images: impl IntoIterator<Item = SourceImage>,
    ) -> Vec<EntityId> {
        let mut images: Vec<SourceImage> = images.into_iter().collect();
        if images.len() > self.selection_limit {
            warn!(
                selected = images.len(),
                limit = self.selection_limit,
                "selection exceeds limit, dropping the rest"
            );
            images.truncate(self.selection_limit);
        }

        let ids: Vec<EntityId> = images
            .into_iter()
            .map(|original| {
                let id = EntityId(self.next_entity);
                self.next_entity += 1;
                self.images.push(ProcessedImage::new(id, original));
                id
            })
            .collect();

        for &id in &ids {
            self.process_image(id);
        }
        ids
    }

    /// (Re)start processing of one entity at the current crop percentage.
    ///
    /// Any previous task for the entity is cancelled first. Returns `false`
    /// for an unknown id.
    pub fn process_image(&mut self, id: EntityId) -> bool {
        let generation = self.next_generation;
        let crop = self.crop;
        let Some(entity) = self.images.iter_mut().find(|img| img.id == id) else {
            return false;
        };
        self.next_generation += 1;

        entity.cancel_task();
        entity.processing = true;
        entity.error = None;

        let priority = if entity.visible {
            TaskPriority::Elevated
        } else {
            TaskPriority::Normal
        };
        let token = CancellationToken::new();
        let request = ProcessingRequest::new(entity.original.clone(), crop);

        entity.task = Some(InFlight {
            generation,
            token: token.clone(),
        });
        entity.last_generation = Some(generation);
        entity.last_priority = Some(priority);
        debug!(entity = %id, generation, ?priority, crop = crop.value(), "dispatch");

        let service = Arc::clone(&self.service);
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            if priority == TaskPriority::Normal {
                tokio::task::yield_now().await;
            }
            let result = service.process(&request, &token).await;
            // Receiver lives as long as the view-model; a send error means it is gone
            let _ = completions.send(Completion {
                entity: id,
                generation,
                result,
            });
        });
        true
    }

    /// Change the global crop percentage.
    ///
    /// Out-of-range values are clamped. A real change clears the cache,
    /// cancels all in-flight work and re-dispatches every entity, visible
    /// ones first. Returns whether anything was re-dispatched.
    pub fn set_crop_percentage(&mut self, value: impl Into<CropPercentage>) -> bool {
        let crop = value.into();
        self.crop = crop;
        if !self.crop_changes.observe(crop) {
            return false;
        }

        info!(crop = crop.value(), images = self.images.len(), "crop percentage changed");
        if let Some(cache) = self.service.cache() {
            cache.clear();
        }
        for entity in &mut self.images {
            entity.cancel_task();
        }

        let order: Vec<EntityId> = self
            .images
            .iter()
            .filter(|img| img.visible)
            .chain(self.images.iter().filter(|img| !img.visible))
            .map(|img| img.id)
            .collect();
        for id in order {
            self.process_image(id);
        }
        true
    }

    // ------------------------------------------------------------------
    // Visibility, removal, memory pressure
    // ------------------------------------------------------------------

    /// Mark an entity on screen. One with nothing to show and nothing
    /// running is dispatched.
    pub fn mark_visible(&mut self, id: EntityId) {
        let Some(entity) = self.images.iter_mut().find(|img| img.id == id) else {
            return;
        };
        entity.visible = true;
        if entity.cropped.is_none() && !entity.processing && entity.error.is_none() {
            self.process_image(id);
        }
    }

    pub fn mark_invisible(&mut self, id: EntityId) {
        if let Some(entity) = self.images.iter_mut().find(|img| img.id == id) {
            entity.visible = false;
        }
    }

    /// Stop an entity's work and leave it idle. Returns `false` if nothing
    /// was running.
    pub fn cancel_image(&mut self, id: EntityId) -> bool {
        let Some(entity) = self.images.iter_mut().find(|img| img.id == id) else {
            return false;
        };
        let cancelled = entity.cancel_task();
        entity.processing = false;
        cancelled
    }

    /// Cancel an entity's work and drop it. No later result reaches it.
    pub fn remove_image(&mut self, id: EntityId) -> bool {
        let Some(index) = self.images.iter().position(|img| img.id == id) else {
            return false;
        };
        let mut entity = self.images.remove(index);
        entity.cancel_task();
        debug!(entity = %id, "removed");
        true
    }

    /// Respond to a low-memory signal.
    ///
    /// Clears the cache and cancels tasks of entities that are *not*
    /// processing. Entities mid-processing keep running.
    pub fn handle_memory_warning(&mut self) {
        let cleared = self.service.cache().map(|cache| {
            let n = cache.len();
            cache.clear();
            n
        });
        let mut cancelled = 0usize;
        for entity in self.images.iter_mut().filter(|img| !img.processing) {
            if entity.cancel_task() {
                cancelled += 1;
            }
        }
        info!(cleared = ?cleared, cancelled, "memory warning");
    }

    // ------------------------------------------------------------------
    // Top-level error
    // ------------------------------------------------------------------

    /// Show a one-shot error (e.g. a picker failure). Does not touch
    /// in-flight work.
    pub fn present_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(%message, "presenting error");
        self.presented_error = Some(message);
    }

    pub fn dismiss_error(&mut self) {
        self.presented_error = None;
    }

    pub fn presented_error(&self) -> Option<&str> {
        self.presented_error.as_deref()
    }

    // ------------------------------------------------------------------
    // Draining results
    // ------------------------------------------------------------------

    /// Apply every completion already received, without waiting.
    /// Returns how many entities changed.
    pub fn apply_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.completions_rx.try_recv() {
            if self.apply(completion).is_some() {
                applied += 1;
            }
        }
        applied
    }

    /// Wait for the next completion that changes an entity.
    ///
    /// Returns `None` immediately when nothing is processing.
    pub async fn next_update(&mut self) -> Option<EntityId> {
        loop {
            if self.is_idle() {
                return None;
            }
            let completion = self.completions_rx.recv().await?;
            if let Some(id) = self.apply(completion) {
                return Some(id);
            }
        }
    }

    /// Apply completions until no entity is processing.
    pub async fn wait_until_idle(&mut self) {
        while self.next_update().await.is_some() {}
    }

    fn apply(&mut self, completion: Completion) -> Option<EntityId> {
        let Completion {
            entity: id,
            generation,
            result,
        } = completion;

        let Some(entity) = self.images.iter_mut().find(|img| img.id == id) else {
            debug!(entity = %id, generation, "completion for removed entity");
            return None;
        };
        let current = matches!(&entity.task, Some(task) if task.generation == generation);
        if !current {
            debug!(entity = %id, generation, "stale completion");
            return None;
        }

        let cancelled = entity
            .task
            .take()
            .is_some_and(|task| task.token.is_cancelled());
        entity.processing = false;

        match result {
            _ if cancelled => {}
            Err(ProcessError::Cancelled) => {}
            Ok(image) => {
                entity.cropped = Some(image);
                entity.error = None;
            }
            Err(err) => {
                warn!(entity = %id, error = %err, "processing failed");
                entity.error = Some(err);
            }
        }
        Some(id)
    }
}

impl<B: ImageBackend> Drop for ImageListViewModel<B> {
    fn drop(&mut self) {
        for entity in &mut self.images {
            entity.cancel_task();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use image::DynamicImage;
    use std::time::Duration;

    fn image(width: u32, height: u32) -> SourceImage {
        SourceImage::new(DynamicImage::new_rgb8(width, height))
    }

    fn mock_view_model(slots: usize) -> ImageListViewModel<MockBackend> {
        let service = ImageProcessingService::with_backend(MockBackend::new())
            .with_cache(Arc::new(ImageCache::with_defaults()))
            .with_limiter(Arc::new(ConcurrencyLimiter::new(slots)));
        ImageListViewModel::new(service, CropPercentage::default())
    }

    fn crop_count(vm: &ImageListViewModel<MockBackend>) -> usize {
        vm.service()
            .backend()
            .get_operations()
            .iter()
            .filter(|op| matches!(op, RecordedOp::Crop { .. }))
            .count()
    }

    /// Hold every slot of the view-model's limiter so dispatched work parks.
    async fn block_pipeline(vm: &ImageListViewModel<MockBackend>) -> CancellationToken {
        let holder = CancellationToken::new();
        let limiter = vm.service().limiter();
        for _ in 0..limiter.max_concurrent() {
            limiter.acquire(&holder).await.unwrap();
        }
        holder
    }

    fn unblock_pipeline(vm: &ImageListViewModel<MockBackend>) {
        let limiter = vm.service().limiter();
        for _ in 0..limiter.max_concurrent() {
            limiter.release();
        }
    }

    // =========================================================================
    // ChangeFilter
    // =========================================================================

    #[test]
    fn change_filter_suppresses_first_and_duplicates() {
        let mut filter = ChangeFilter::new();
        assert!(!filter.observe(10));
        assert!(!filter.observe(10));
        assert!(filter.observe(15));
        assert!(!filter.observe(15));
        assert!(filter.observe(10));
    }

    #[test]
    fn primed_filter_passes_first_different_value() {
        let mut filter = ChangeFilter::primed(CropPercentage::new(10.0));
        assert!(!filter.observe(CropPercentage::new(10.0)));
        assert!(filter.observe(CropPercentage::new(12.0)));
    }

    // =========================================================================
    // Selection and dispatch
    // =========================================================================

    #[tokio::test]
    async fn selection_processes_every_image() {
        let mut vm = mock_view_model(2);
        let ids = vm.process_selected_images(vec![image(100, 100), image(200, 100)]);
        assert_eq!(ids.len(), 2);
        assert!(vm.images().iter().all(|img| img.is_processing()));

        vm.wait_until_idle().await;

        let first = vm.image(ids[0]).unwrap();
        let cropped = first.cropped_image().unwrap();
        assert_eq!((cropped.width(), cropped.height()), (80, 80));
        assert_eq!(first.state(), ImageState::Cropped);

        let second = vm.image(ids[1]).unwrap().cropped_image().unwrap();
        assert_eq!((second.width(), second.height()), (160, 80));
        assert_eq!(vm.cache().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn selection_is_capped_at_limit() {
        let mut vm = mock_view_model(2).with_selection_limit(3);
        let ids = vm.process_selected_images((0..5).map(|_| image(10, 10)));
        assert_eq!(ids.len(), 3);
        assert_eq!(vm.images().len(), 3);
        vm.wait_until_idle().await;
    }

    #[tokio::test]
    async fn invisible_entities_dispatch_at_normal_priority() {
        let mut vm = mock_view_model(1);
        let ids = vm.process_selected_images(vec![image(20, 20)]);
        let entity = vm.image(ids[0]).unwrap();
        assert_eq!(entity.task_priority(), Some(TaskPriority::Normal));
        assert_eq!(entity.task_generation(), Some(1));
        vm.wait_until_idle().await;
    }

    #[tokio::test]
    async fn failure_surfaces_on_entity_and_is_not_retried() {
        let mut vm = mock_view_model(1);
        let ids = vm.process_selected_images(vec![SourceImage::undecodable()]);
        vm.wait_until_idle().await;

        let entity = vm.image(ids[0]).unwrap();
        assert_eq!(entity.error(), Some(&ProcessError::InvalidSource));
        assert_eq!(entity.state(), ImageState::Errored);
        assert!(!entity.is_processing());

        // Marking visible does not retry an errored entity
        vm.mark_visible(ids[0]);
        assert!(!vm.image(ids[0]).unwrap().is_processing());
        assert_eq!(vm.image(ids[0]).unwrap().task_generation(), Some(1));
    }

    #[tokio::test]
    async fn process_image_unknown_id_is_false() {
        let mut vm = mock_view_model(1);
        assert!(!vm.process_image(EntityId(42)));
    }

    #[tokio::test]
    async fn redispatch_supersedes_previous_task() {
        let mut vm = mock_view_model(1);
        let holder = block_pipeline(&vm).await;
        let ids = vm.process_selected_images(vec![image(100, 100)]);

        assert!(vm.process_image(ids[0]));
        assert_eq!(vm.image(ids[0]).unwrap().task_generation(), Some(2));

        unblock_pipeline(&vm);
        vm.wait_until_idle().await;
        drop(holder);

        assert_eq!(crop_count(&vm), 1);
        assert!(vm.image(ids[0]).unwrap().cropped_image().is_some());
    }

    // =========================================================================
    // Crop percentage changes
    // =========================================================================

    #[tokio::test]
    async fn same_percentage_is_not_a_change() {
        let mut vm = mock_view_model(1);
        vm.process_selected_images(vec![image(100, 100)]);
        vm.wait_until_idle().await;

        assert!(!vm.set_crop_percentage(10.0));
        assert!(vm.is_idle());
        assert_eq!(vm.cache().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn out_of_range_percentage_is_clamped() {
        let mut vm = mock_view_model(1);
        assert!(vm.set_crop_percentage(50.0));
        assert_eq!(vm.crop_percentage().value(), 20.0);
        // 50 and 25 both clamp to 20
        assert!(!vm.set_crop_percentage(25.0));
    }

    #[tokio::test]
    async fn change_clears_cache_and_reprocesses() {
        let mut vm = mock_view_model(2);
        let ids = vm.process_selected_images(vec![image(100, 100)]);
        vm.wait_until_idle().await;
        assert_eq!(vm.cache().unwrap().stats().insertions, 1);

        assert!(vm.set_crop_percentage(20.0));
        assert!(vm.cache().unwrap().is_empty());
        assert!(vm.image(ids[0]).unwrap().is_processing());

        vm.wait_until_idle().await;
        let cropped = vm.image(ids[0]).unwrap().cropped_image().unwrap();
        assert_eq!((cropped.width(), cropped.height()), (60, 60));
    }

    #[tokio::test]
    async fn change_mid_processing_cancels_five_and_reissues_visible_first() {
        let mut vm = mock_view_model(1);
        let holder = block_pipeline(&vm).await;

        let ids = vm.process_selected_images((0..5).map(|_| image(100, 100)));
        assert_eq!(vm.processing_count(), 5);
        vm.mark_visible(ids[2]);
        vm.mark_visible(ids[3]);

        assert!(vm.set_crop_percentage(20.0));

        let generation = |id: EntityId| vm.image(id).unwrap().task_generation().unwrap();
        // Five fresh dispatches after the original five
        let mut generations: Vec<u64> = ids.iter().map(|&id| generation(id)).collect();
        generations.sort_unstable();
        assert_eq!(generations, vec![6, 7, 8, 9, 10]);
        // Visible entities go first, at elevated priority
        assert_eq!(generation(ids[2]), 6);
        assert_eq!(generation(ids[3]), 7);
        for &id in &ids {
            let entity = vm.image(id).unwrap();
            let expected = if entity.is_visible() {
                TaskPriority::Elevated
            } else {
                TaskPriority::Normal
            };
            assert_eq!(entity.task_priority(), Some(expected));
        }

        unblock_pipeline(&vm);
        tokio::time::timeout(Duration::from_secs(5), vm.wait_until_idle())
            .await
            .expect("reissued work should finish");
        drop(holder);

        // The superseded five never ran
        assert_eq!(crop_count(&vm), 5);
        for &id in &ids {
            let entity = vm.image(id).unwrap();
            assert!(entity.error().is_none());
            let cropped = entity.cropped_image().unwrap();
            assert_eq!((cropped.width(), cropped.height()), (60, 60));
        }
        assert_eq!(vm.service().limiter().active_count(), 0);
    }

    #[tokio::test]
    async fn change_while_crops_run_leaves_only_fresh_results_cached() {
        let backend = MockBackend::with_crop_delay(Duration::from_millis(200));
        let service = ImageProcessingService::with_backend(backend)
            .with_cache(Arc::new(ImageCache::with_defaults()))
            .with_limiter(Arc::new(ConcurrencyLimiter::new(4)));
        let mut vm = ImageListViewModel::new(service, CropPercentage::default());
        let ids = vm.process_selected_images((0..4).map(|_| image(100, 100)));

        // Let the first crops reach the blocking threads
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(vm.set_crop_percentage(20.0));
        tokio::time::timeout(Duration::from_secs(5), vm.wait_until_idle())
            .await
            .expect("reissued work should finish");

        assert_eq!(vm.cache().unwrap().len(), 4);
        for &id in &ids {
            let cropped = vm.image(id).unwrap().cropped_image().unwrap();
            assert_eq!((cropped.width(), cropped.height()), (60, 60));
        }
        assert_eq!(vm.service().limiter().active_count(), 0);
    }

    // =========================================================================
    // Visibility, removal, memory pressure, presented error
    // =========================================================================

    #[tokio::test]
    async fn cancelled_entity_is_idle_and_ignores_late_result() {
        let mut vm = mock_view_model(1);
        let holder = block_pipeline(&vm).await;
        let ids = vm.process_selected_images(vec![image(100, 100)]);

        assert!(vm.cancel_image(ids[0]));
        assert!(!vm.cancel_image(ids[0]));
        let entity = vm.image(ids[0]).unwrap();
        assert_eq!(entity.state(), ImageState::Idle);
        assert!(entity.error().is_none());

        unblock_pipeline(&vm);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(vm.apply_pending(), 0);
        drop(holder);
        assert_eq!(crop_count(&vm), 0);
    }

    #[tokio::test]
    async fn mark_visible_dispatches_idle_entity_only() {
        let mut vm = mock_view_model(1);
        let holder = block_pipeline(&vm).await;
        let ids = vm.process_selected_images(vec![image(100, 100)]);
        vm.cancel_image(ids[0]);

        vm.mark_visible(ids[0]);
        let entity = vm.image(ids[0]).unwrap();
        assert!(entity.is_processing());
        assert_eq!(entity.task_generation(), Some(2));
        assert_eq!(entity.task_priority(), Some(TaskPriority::Elevated));

        unblock_pipeline(&vm);
        vm.wait_until_idle().await;
        drop(holder);

        // Already cropped: a visibility flip does not redispatch
        vm.mark_invisible(ids[0]);
        vm.mark_visible(ids[0]);
        assert!(!vm.image(ids[0]).unwrap().is_processing());
        assert_eq!(vm.image(ids[0]).unwrap().task_generation(), Some(2));
    }

    #[tokio::test]
    async fn mark_invisible_only_updates_flag() {
        let mut vm = mock_view_model(1);
        let ids = vm.process_selected_images(vec![image(10, 10)]);
        vm.mark_visible(ids[0]);
        vm.mark_invisible(ids[0]);
        let entity = vm.image(ids[0]).unwrap();
        assert!(!entity.is_visible());
        assert_eq!(entity.task_generation(), Some(1));
        vm.wait_until_idle().await;
    }

    #[tokio::test]
    async fn removed_entity_receives_no_updates() {
        let mut vm = mock_view_model(1);
        let holder = block_pipeline(&vm).await;
        let ids = vm.process_selected_images(vec![image(100, 100), image(100, 100)]);

        assert!(vm.remove_image(ids[0]));
        assert!(!vm.remove_image(ids[0]));
        assert!(vm.image(ids[0]).is_none());

        unblock_pipeline(&vm);
        vm.wait_until_idle().await;
        drop(holder);

        assert_eq!(vm.images().len(), 1);
        assert_eq!(vm.apply_pending(), 0);
        assert_eq!(crop_count(&vm), 1);
    }

    #[tokio::test]
    async fn memory_warning_clears_cache_and_spares_processing_entities() {
        let mut vm = mock_view_model(1);
        let first = vm.process_selected_images(vec![image(100, 100)]);
        vm.wait_until_idle().await;
        assert_eq!(vm.cache().unwrap().len(), 1);

        let holder = block_pipeline(&vm).await;
        let second = vm.process_selected_images(vec![image(50, 50)]);
        vm.handle_memory_warning();
        assert!(vm.cache().unwrap().is_empty());

        unblock_pipeline(&vm);
        vm.wait_until_idle().await;
        drop(holder);

        // In-flight work was not cancelled
        assert!(vm.image(second[0]).unwrap().cropped_image().is_some());
        // Existing results stay on their entities
        assert!(vm.image(first[0]).unwrap().cropped_image().is_some());
    }

    #[tokio::test]
    async fn presented_error_does_not_block_work() {
        let mut vm = mock_view_model(1);
        vm.present_error("picker unavailable");
        let ids = vm.process_selected_images(vec![image(100, 100)]);
        vm.wait_until_idle().await;

        assert_eq!(vm.presented_error(), Some("picker unavailable"));
        assert!(vm.image(ids[0]).unwrap().cropped_image().is_some());

        vm.dismiss_error();
        assert_eq!(vm.presented_error(), None);
    }

    // =========================================================================
    // Draining
    // =========================================================================

    #[tokio::test]
    async fn next_update_returns_none_when_idle() {
        let mut vm = mock_view_model(1);
        assert_eq!(vm.next_update().await, None);
    }

    #[tokio::test]
    async fn apply_pending_picks_up_finished_work() {
        let mut vm = mock_view_model(1);
        let ids = vm.process_selected_images(vec![image(100, 100)]);

        // Nothing lands until the owner drains
        assert!(vm.image(ids[0]).unwrap().is_processing());

        let mut applied = 0;
        for _ in 0..500 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            applied = vm.apply_pending();
            if applied > 0 {
                break;
            }
        }
        assert_eq!(applied, 1);
        assert!(!vm.image(ids[0]).unwrap().is_processing());
    }
}
