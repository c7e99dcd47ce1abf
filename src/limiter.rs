//! Admission control for CPU-bound work.
//!
//! [`ConcurrencyLimiter`] is a counting semaphore with cooperative waiters:
//! at most `N` operations hold a slot at once, and callers beyond that suspend
//! (without occupying a thread) until a slot frees up or their
//! [`CancellationToken`] fires. A cancelled waiter never takes a slot.
//!
//! There is no ordering between waiters. Every release wakes all of them and
//! whichever re-checks first wins; under sustained load a waiter can lose
//! repeatedly.
//!
//! Prefer [`acquire_slot`](ConcurrencyLimiter::acquire_slot): the returned
//! [`Slot`] releases on drop, which covers early returns and panics.

use crate::cancel::{CancellationToken, Cancelled};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

/// Upper bound on the default slot count.
pub const MAX_DEFAULT_SLOTS: usize = 4;

/// `min(available parallelism, 4)`, at least 1.
pub fn default_slot_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cores.clamp(1, MAX_DEFAULT_SLOTS)
}

#[derive(Debug)]
pub struct ConcurrencyLimiter {
    max: usize,
    active: Mutex<usize>,
    released: Notify,
}

impl ConcurrencyLimiter {
    /// Limiter with `max` slots. Zero is treated as one.
    pub fn new(max: usize) -> Self {
        Self {
            max: max.max(1),
            active: Mutex::new(0),
            released: Notify::new(),
        }
    }

    pub fn with_default_slots() -> Self {
        Self::new(default_slot_count())
    }

    pub fn max_concurrent(&self) -> usize {
        self.max
    }

    pub fn active_count(&self) -> usize {
        *self.active.lock()
    }

    /// Wait for a free slot and reserve it.
    ///
    /// The caller owns the slot until it calls [`release`](Self::release).
    /// Fails with [`Cancelled`] if `cancel` fires before a slot is reserved,
    /// including when it was already cancelled on entry.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        loop {
            cancel.check()?;

            let released = self.released.notified();
            tokio::pin!(released);
            // Register before reading the count so a release in between still wakes us
            released.as_mut().enable();

            {
                let mut active = self.active.lock();
                if *active < self.max {
                    *active += 1;
                    trace!(active = *active, max = self.max, "slot acquired");
                    return Ok(());
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Cancelled),
                _ = &mut released => {}
            }
        }
    }

    /// Like [`acquire`](Self::acquire) but returns a guard that releases on drop.
    pub async fn acquire_slot(&self, cancel: &CancellationToken) -> Result<Slot<'_>, Cancelled> {
        self.acquire(cancel).await?;
        Ok(Slot { limiter: self })
    }

    /// Free one slot. Releasing with no slots held is a no-op.
    pub fn release(&self) {
        let mut active = self.active.lock();
        if *active == 0 {
            return;
        }
        *active -= 1;
        trace!(active = *active, max = self.max, "slot released");
        drop(active);
        self.released.notify_waiters();
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::with_default_slots()
    }
}

/// A held admission slot; released exactly once when dropped.
#[derive(Debug)]
pub struct Slot<'a> {
    limiter: &'a ConcurrencyLimiter,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.limiter.release();
    }
}
