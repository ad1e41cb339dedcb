// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Semaphores exchanged between APIs at access boundaries.
//!
//! An [`ExternalSemaphore`] is an exportable, driver-owned semaphore.  It is owned by
//! exactly one party at a time: the pool, a backing (as the semaphore the next access
//! must wait on), or an in-flight access.  [`BackendSemaphore`] is the copyable handle a
//! drawing API uses to wait on or signal it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

static NEXT_SEMAPHORE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendSemaphore {
    pub id: u64,
}

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ExternalSemaphore {
    id: u64,
}

impl ExternalSemaphore {
    fn create() -> Self {
        ExternalSemaphore { id: NEXT_SEMAPHORE.fetch_add(1, Ordering::Relaxed) }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn backend_semaphore(&self) -> BackendSemaphore {
        BackendSemaphore { id: self.id }
    }
}

/// Recycles external semaphores.  Creating one is a driver round trip, so handed-back
/// semaphores are kept, up to a bound.
#[derive(Debug)]
pub struct ExternalSemaphorePool {
    free: Mutex<Vec<ExternalSemaphore>>,
    max_cached: usize,
    created: AtomicU64,
}

impl ExternalSemaphorePool {
    pub fn new(max_cached: usize) -> Self {
        ExternalSemaphorePool {
            free: Mutex::new(Vec::new()),
            max_cached,
            created: AtomicU64::new(0),
        }
    }

    pub fn get_or_create_semaphore(&self) -> ExternalSemaphore {
        if let Some(semaphore) = self.free.lock().unwrap_or_else(PoisonError::into_inner).pop() {
            return semaphore;
        }
        self.created.fetch_add(1, Ordering::Relaxed);
        ExternalSemaphore::create()
    }

    /// Takes the semaphores back.  Anything beyond the cache bound is released.
    pub fn return_semaphores(&self, semaphores: Vec<ExternalSemaphore>) {
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        for semaphore in semaphores {
            if free.len() >= self.max_cached {
                tracing::trace!(id = semaphore.id, "semaphore pool full, releasing");
                continue;
            }
            free.push(semaphore);
        }
    }

    pub fn cached_count(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Semaphores ever created by this pool.
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }
}

pub fn backend_semaphores(semaphores: &[ExternalSemaphore]) -> Vec<BackendSemaphore> {
    semaphores.iter().map(ExternalSemaphore::backend_semaphore).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_reuses_and_bounds() {
        let pool = ExternalSemaphorePool::new(1);
        let a = pool.get_or_create_semaphore();
        let b = pool.get_or_create_semaphore();
        let a_id = a.id();
        assert_ne!(a_id, b.id());
        pool.return_semaphores(vec![a, b]);
        assert_eq!(pool.cached_count(), 1);
        assert_eq!(pool.get_or_create_semaphore().id(), a_id);
        assert_eq!(pool.created_count(), 2);
    }
}
