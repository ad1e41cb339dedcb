// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! Registry of live backings.

[`SharedImageManager`] maps mailboxes to backings and hands out representations.  Each
representation holds a [`RepresentationRef`]; a backing whose mailbox has been destroyed
stays alive until the last of those drops, so a backing is never destroyed under an open
representation.
*/

use crate::backing::SharedImageBacking;
use crate::context_state::SharedContextState;
use crate::error::Error;
use crate::mailbox::Mailbox;
use crate::memory::{MemoryAllocatorDumpGuid, MemoryTypeTracker, ProcessMemoryDump};
use crate::representation::{
    GlTexturePassthroughRepresentation, OverlayRepresentation, ProduceContext, RasterRepresentation,
    SkiaRepresentation,
};
use crate::sync_token::GpuFence;
use crate::usage::Usage;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

struct Entry {
    backing: Arc<dyn SharedImageBacking>,
    representations: usize,
    destroy_requested: bool,
    tracker: Arc<MemoryTypeTracker>,
    tracked_size: u64,
}

#[derive(Default)]
struct ManagerInner {
    images: Mutex<HashMap<Mailbox, Entry>>,
}

impl ManagerInner {
    fn images(&self) -> MutexGuard<'_, HashMap<Mailbox, Entry>> {
        self.images.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes `mailbox` and returns the backing so it can be dropped outside the lock.
    fn remove_locked(
        images: &mut HashMap<Mailbox, Entry>,
        mailbox: &Mailbox,
    ) -> Option<Arc<dyn SharedImageBacking>> {
        let entry = images.remove(mailbox)?;
        entry.tracker.track_memory_free(entry.tracked_size);
        tracing::debug!(%mailbox, "shared image backing released");
        Some(entry.backing)
    }
}

/// Keeps one representation's backing registered.  Dropping it may destroy the backing.
pub struct RepresentationRef {
    manager: Weak<ManagerInner>,
    mailbox: Mailbox,
}

impl RepresentationRef {
    /// A reference not tied to any manager.
    pub fn detached() -> Self {
        RepresentationRef { manager: Weak::new(), mailbox: Mailbox::ZERO }
    }
}

impl Debug for RepresentationRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepresentationRef").field("mailbox", &self.mailbox).finish()
    }
}

impl Drop for RepresentationRef {
    fn drop(&mut self) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        let released = {
            let mut images = manager.images();
            match images.get_mut(&self.mailbox) {
                Some(entry) => {
                    entry.representations -= 1;
                    if entry.representations == 0 && entry.destroy_requested {
                        ManagerInner::remove_locked(&mut images, &self.mailbox)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        drop(released);
    }
}

#[derive(Clone, Default)]
pub struct SharedImageManager {
    inner: Arc<ManagerInner>,
}

impl Debug for SharedImageManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedImageManager").field("images", &self.inner.images().len()).finish()
    }
}

impl SharedImageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `backing` under its mailbox, attributing its memory to `tracker`.
    pub fn register(
        &self,
        backing: Arc<dyn SharedImageBacking>,
        tracker: Arc<MemoryTypeTracker>,
    ) -> Result<(), Error> {
        let mailbox = backing.mailbox();
        if mailbox.is_zero() {
            return Err(Error::ZeroMailbox);
        }
        let mut images = self.inner.images();
        if images.contains_key(&mailbox) {
            tracing::error!(%mailbox, "registering a mailbox twice");
            return Err(Error::DuplicateMailbox(mailbox));
        }
        let tracked_size = backing.estimated_size_for_mem_tracking();
        tracker.track_memory_alloc(tracked_size);
        tracing::debug!(
            %mailbox,
            backing = %backing.backing_type(),
            size = tracked_size,
            "registered shared image"
        );
        images.insert(
            mailbox,
            Entry { backing, representations: 0, destroy_requested: false, tracker, tracked_size },
        );
        Ok(())
    }

    /// Unregisters `mailbox`.  The backing is destroyed now, or when its last
    /// representation drops.
    pub fn destroy(&self, mailbox: &Mailbox) -> Result<(), Error> {
        let released = {
            let mut images = self.inner.images();
            let Some(entry) = images.get_mut(mailbox).filter(|e| !e.destroy_requested) else {
                tracing::error!(%mailbox, "destroying a mailbox that is not registered");
                return Err(Error::UnknownMailbox(*mailbox));
            };
            if entry.representations > 0 {
                tracing::debug!(
                    %mailbox,
                    live = entry.representations,
                    "deferring destruction until representations drop"
                );
                entry.destroy_requested = true;
                None
            } else {
                ManagerInner::remove_locked(&mut images, mailbox)
            }
        };
        drop(released);
        Ok(())
    }

    pub fn is_registered(&self, mailbox: &Mailbox) -> bool {
        self.inner.images().get(mailbox).is_some_and(|e| !e.destroy_requested)
    }

    /// Backings still alive, including ones whose destruction is deferred.
    pub fn live_backing_count(&self) -> usize {
        self.inner.images().len()
    }

    pub fn backing(&self, mailbox: &Mailbox) -> Option<Arc<dyn SharedImageBacking>> {
        self.inner.images().get(mailbox).filter(|e| !e.destroy_requested).map(|e| e.backing.clone())
    }

    pub fn usage(&self, mailbox: &Mailbox) -> Option<Usage> {
        self.backing(mailbox).map(|b| b.properties().usage)
    }

    fn begin_produce(
        &self,
        mailbox: &Mailbox,
        tracker: Arc<MemoryTypeTracker>,
    ) -> Result<(Arc<dyn SharedImageBacking>, ProduceContext), Error> {
        let mut images = self.inner.images();
        let Some(entry) = images.get_mut(mailbox).filter(|e| !e.destroy_requested) else {
            tracing::error!(
                %mailbox,
                "trying to produce a representation from a non-existent mailbox"
            );
            return Err(Error::UnknownMailbox(*mailbox));
        };
        entry.representations += 1;
        let registration =
            RepresentationRef { manager: Arc::downgrade(&self.inner), mailbox: *mailbox };
        Ok((entry.backing.clone(), ProduceContext { registration, tracker }))
    }

    pub fn produce_raster(
        &self,
        mailbox: &Mailbox,
        tracker: Arc<MemoryTypeTracker>,
    ) -> Result<Box<dyn RasterRepresentation>, Error> {
        let (backing, produce) = self.begin_produce(mailbox, tracker)?;
        backing.produce_raster(produce)
    }

    pub fn produce_skia(
        &self,
        mailbox: &Mailbox,
        tracker: Arc<MemoryTypeTracker>,
        context_state: Arc<SharedContextState>,
    ) -> Result<Box<dyn SkiaRepresentation>, Error> {
        let (backing, produce) = self.begin_produce(mailbox, tracker)?;
        backing.produce_skia(produce, context_state)
    }

    pub fn produce_gl_texture_passthrough(
        &self,
        mailbox: &Mailbox,
        tracker: Arc<MemoryTypeTracker>,
    ) -> Result<Box<dyn GlTexturePassthroughRepresentation>, Error> {
        let (backing, produce) = self.begin_produce(mailbox, tracker)?;
        backing.produce_gl_texture_passthrough(produce)
    }

    pub fn produce_overlay(
        &self,
        mailbox: &Mailbox,
        tracker: Arc<MemoryTypeTracker>,
    ) -> Result<Box<dyn OverlayRepresentation>, Error> {
        let (backing, produce) = self.begin_produce(mailbox, tracker)?;
        backing.produce_overlay(produce)
    }

    pub fn update(&self, mailbox: &Mailbox, in_fence: Option<GpuFence>) -> Result<(), Error> {
        let backing = self.backing(mailbox).ok_or(Error::UnknownMailbox(*mailbox))?;
        backing.update(in_fence)
    }

    pub fn present_swap_chain(&self, mailbox: &Mailbox) -> Result<(), Error> {
        let backing = self.backing(mailbox).ok_or(Error::UnknownMailbox(*mailbox))?;
        backing.present(true)
    }

    /// Adds one dump per live backing under `gpu/shared_images/client_0x<id>/mailbox_<name>`.
    pub fn on_memory_dump(&self, pmd: &mut ProcessMemoryDump, client_tracing_id: u64) {
        let backings: Vec<_> = self.inner.images().values().map(|e| e.backing.clone()).collect();
        let client_guid =
            MemoryAllocatorDumpGuid::from_name(&format!("gpu/client_0x{client_tracing_id:X}"));
        for backing in backings {
            let dump_name = format!(
                "gpu/shared_images/client_0x{client_tracing_id:X}/mailbox_{}",
                backing.mailbox()
            );
            backing.on_memory_dump(&dump_name, client_guid, pmd, client_tracing_id);
        }
    }
}
