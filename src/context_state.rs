// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! The graphics context shared by every backing on one GPU thread.

[`SharedContextState`] owns:
- the [`GraphicsBackend`],
- context loss/abandonment flags,
- the cache of drawing surfaces keyed by texture (entries live exactly as long as the
  context, or until the representation that created them drops),
- the external semaphore pool and a fence helper that defers semaphore recycling until
  the GPU work that might still wait on them has completed.
*/

use crate::config::SharedImageConfig;
use crate::error::Error;
use crate::imp::{ContextType, GraphicsBackend};
use crate::semaphore::{ExternalSemaphore, ExternalSemaphorePool};
use crate::surface::SurfaceHandle;
use crate::texture::TextureId;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type Cleanup = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct FenceHelper {
    /// Cleanups waiting for the next submission.
    unsubmitted: Vec<Cleanup>,
    /// (serial, cleanups) for submitted but unfinished work, in serial order.
    in_flight: Vec<(u64, Vec<Cleanup>)>,
}

pub struct SharedContextState {
    backend: Arc<dyn GraphicsBackend>,
    config: SharedImageConfig,
    lost: AtomicBool,
    abandoned: AtomicBool,
    surface_cache: Mutex<HashMap<TextureId, SurfaceHandle>>,
    semaphore_pool: Arc<ExternalSemaphorePool>,
    fence_helper: Mutex<FenceHelper>,
}

impl Debug for SharedContextState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedContextState")
            .field("backend", &self.backend.name())
            .field("lost", &self.lost.load(Ordering::Relaxed))
            .field("abandoned", &self.abandoned.load(Ordering::Relaxed))
            .field("cached_surfaces", &self.cached_surface_count())
            .finish_non_exhaustive()
    }
}

impl SharedContextState {
    pub fn new(backend: Arc<dyn GraphicsBackend>, config: SharedImageConfig) -> Arc<Self> {
        let semaphore_pool = Arc::new(ExternalSemaphorePool::new(config.max_cached_semaphores));
        Arc::new(SharedContextState {
            backend,
            config,
            lost: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
            surface_cache: Mutex::new(HashMap::new()),
            semaphore_pool,
            fence_helper: Mutex::new(FenceHelper::default()),
        })
    }

    pub fn backend(&self) -> &Arc<dyn GraphicsBackend> {
        &self.backend
    }

    pub fn config(&self) -> &SharedImageConfig {
        &self.config
    }

    pub fn context_type(&self) -> ContextType {
        self.backend.context_type()
    }

    /// Checks for loss, latching the flag the first time the backend reports it.
    pub fn is_context_lost(&self) -> bool {
        if self.lost.load(Ordering::Acquire) {
            return true;
        }
        if self.backend.is_lost() {
            self.mark_context_lost();
            return true;
        }
        false
    }

    pub fn mark_context_lost(&self) {
        if !self.lost.swap(true, Ordering::AcqRel) {
            tracing::error!(backend = self.backend.name(), "graphics context lost");
            self.surface_cache.lock().unwrap_or_else(PoisonError::into_inner).clear();
        }
    }

    /// Abandoning the drawing context happens on loss, or explicitly during teardown.
    pub fn abandon(&self) {
        self.abandoned.store(true, Ordering::Release);
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire) || self.is_context_lost()
    }

    pub fn cached_surface(&self, texture: TextureId) -> Option<SurfaceHandle> {
        self.surface_cache.lock().unwrap_or_else(PoisonError::into_inner).get(&texture).cloned()
    }

    pub fn cache_surface(&self, texture: TextureId, surface: SurfaceHandle) {
        self.surface_cache.lock().unwrap_or_else(PoisonError::into_inner).insert(texture, surface);
    }

    pub fn erase_cached_surface(&self, texture: TextureId) {
        self.surface_cache.lock().unwrap_or_else(PoisonError::into_inner).remove(&texture);
    }

    /// True when the cache holds the only handle to the surface for `texture`.
    pub fn cached_surface_is_unique(&self, texture: TextureId) -> bool {
        self.surface_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&texture)
            .is_none_or(|s| s.handle_count() == 1)
    }

    pub fn cached_surface_count(&self) -> usize {
        self.surface_cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn semaphore_pool(&self) -> &ExternalSemaphorePool {
        &self.semaphore_pool
    }

    pub fn get_or_create_semaphore(&self) -> Result<ExternalSemaphore, Error> {
        if self.is_context_lost() {
            tracing::warn!("cannot create an external semaphore on a lost context");
            return Err(Error::SemaphoreUnavailable);
        }
        Ok(self.semaphore_pool.get_or_create_semaphore())
    }

    /// Returns `semaphores` to the pool once the next submitted work completes.
    pub fn return_semaphores_after_submitted_work(&self, semaphores: Vec<ExternalSemaphore>) {
        if semaphores.is_empty() {
            return;
        }
        let pool = self.semaphore_pool.clone();
        self.enqueue_cleanup_for_submitted_work(Box::new(move || {
            pool.return_semaphores(semaphores)
        }));
    }

    pub fn enqueue_cleanup_for_submitted_work(&self, cleanup: Box<dyn FnOnce() + Send>) {
        self.fence_helper.lock().unwrap_or_else(PoisonError::into_inner).unsubmitted.push(cleanup);
    }

    /// Submits pending GPU work.  Cleanups enqueued so far are attached to this submission.
    pub fn submit(&self) -> Result<u64, Error> {
        let serial = match self.backend.submit() {
            Ok(serial) => serial,
            Err(e) => {
                if e.is_context_lost() {
                    self.mark_context_lost();
                }
                return Err(e);
            }
        };
        let mut helper = self.fence_helper.lock().unwrap_or_else(PoisonError::into_inner);
        let cleanups = std::mem::take(&mut helper.unsubmitted);
        if !cleanups.is_empty() {
            helper.in_flight.push((serial, cleanups));
        }
        Ok(serial)
    }

    /// Runs cleanups whose work has finished.  Returns how many ran.
    pub fn check_completed_work(&self) -> usize {
        let completed = self.backend.completed_serial();
        let ready: Vec<Cleanup> = {
            let mut helper = self.fence_helper.lock().unwrap_or_else(PoisonError::into_inner);
            let split = helper.in_flight.partition_point(|(serial, _)| *serial <= completed);
            helper.in_flight.drain(..split).flat_map(|(_, c)| c).collect()
        };
        let count = ready.len();
        // run outside the lock, cleanups may enqueue more work
        for cleanup in ready {
            cleanup();
        }
        count
    }

    /// Submit, then collect whatever has already completed.
    pub fn flush(&self) -> Result<(), Error> {
        self.submit()?;
        self.check_completed_work();
        Ok(())
    }

    pub fn pending_cleanup_count(&self) -> usize {
        let helper = self.fence_helper.lock().unwrap_or_else(PoisonError::into_inner);
        helper.unsubmitted.len() + helper.in_flight.iter().map(|(_, c)| c.len()).sum::<usize>()
    }
}

impl Drop for SharedContextState {
    fn drop(&mut self) {
        // Whatever is still queued can no longer be waited on by anyone.
        let helper =
            std::mem::take(self.fence_helper.get_mut().unwrap_or_else(PoisonError::into_inner));
        let in_flight = helper.in_flight.into_iter().flat_map(|(_, c)| c);
        for cleanup in helper.unsubmitted.into_iter().chain(in_flight) {
            cleanup();
        }
    }
}
