// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Skia access to an [`ExternalVkImageBacking`].
//!
//! Surfaces are cached per texture on the [`SharedContextState`] and reused while the
//! caller asks for the same surface props and sample count.

use crate::backing::{BackingProperties, SharedImageBacking};
use crate::backing::external_vk::ExternalVkImageBacking;
use crate::error::Error;
use crate::mailbox::Mailbox;
use crate::representation::{
    AccessMode, EndState, PendingQueueTransition, ProduceContext, Representation,
    RepresentationBase, RepresentationKind, SkiaAccess, SkiaRepresentation, SkiaWriteParams,
    report_open_access_on_drop,
};
use crate::semaphore::{ExternalSemaphore, backend_semaphores};
use crate::surface::{Surface, SurfaceHandle};
use crate::texture::{PromiseTexture, QueueFamily};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug)]
pub struct ExternalVkSkiaRepresentation {
    base: RepresentationBase<ExternalVkImageBacking>,
    access_mode: AccessMode,
    begin_access_semaphores: Vec<ExternalSemaphore>,
    end_access_semaphore: Option<ExternalSemaphore>,
    write_surface: Option<SurfaceHandle>,
    surface_msaa_count: u32,
    /// Set once the caller applied the transition handed out with the current access.
    queue_transition: Option<Arc<AtomicBool>>,
}

impl ExternalVkSkiaRepresentation {
    pub fn new(backing: &Arc<ExternalVkImageBacking>, produce: ProduceContext) -> Self {
        ExternalVkSkiaRepresentation {
            base: RepresentationBase::new(backing, produce),
            access_mode: AccessMode::None,
            begin_access_semaphores: Vec::new(),
            end_access_semaphore: None,
            write_surface: None,
            surface_msaa_count: 0,
            queue_transition: None,
        }
    }

    fn check_no_access(&self) -> Result<(), Error> {
        if self.access_mode != AccessMode::None {
            tracing::error!(mode = %self.access_mode, "previous access hasn't ended yet");
            return Err(Error::AccessAlreadyInProgress(self.access_mode));
        }
        Ok(())
    }

    fn end_state(&mut self, backing: &ExternalVkImageBacking) -> EndState {
        if backing.need_synchronization() {
            let applied = Arc::new(AtomicBool::new(false));
            self.queue_transition = Some(applied.clone());
            EndState::TransitionToExternal(PendingQueueTransition::to_external(
                backing.backend_texture(),
                applied,
            ))
        } else {
            EndState::None
        }
    }

    /// Fails while the transition owed by this access is outstanding.
    fn check_queue_transition(&self) -> Result<(), Error> {
        match &self.queue_transition {
            Some(applied) if !applied.load(Ordering::Acquire) => {
                tracing::error!(
                    mailbox = %self.base.mailbox(),
                    "access ended before the queue family transition"
                );
                Err(Error::MissingQueueFamilyTransition)
            }
            _ => Ok(()),
        }
    }

    /// Begins the backing access and sets up the semaphores.  On success the caller owns
    /// waiting on the returned begin semaphores and signaling the end semaphores.
    fn begin_access(&mut self, readonly: bool) -> Result<SkiaAccess<PromiseTexture>, Error> {
        debug_assert!(self.begin_access_semaphores.is_empty());
        debug_assert!(self.end_access_semaphore.is_none());
        let backing = self.base.backing()?;
        let begin = backing.begin_access(readonly, false)?;

        let mut access = SkiaAccess::new(backing.promise_texture().clone());
        access.begin_semaphores = backend_semaphores(&begin);
        self.begin_access_semaphores = begin;

        if backing.need_synchronization() {
            match backing.context_state().get_or_create_semaphore() {
                Ok(semaphore) => {
                    access.end_semaphores.push(semaphore.backend_semaphore());
                    self.end_access_semaphore = Some(semaphore);
                }
                Err(e) => {
                    self.rollback_access(&backing, readonly);
                    return Err(e);
                }
            }
        }
        Ok(access)
    }

    /// Undoes a begun backing access that never reached the caller.
    fn rollback_access(&mut self, backing: &ExternalVkImageBacking, readonly: bool) {
        let end = self.end_access_semaphore.take();
        if let Err(e) = backing.end_access(readonly, end, false) {
            tracing::error!(error = %e, "could not roll back access");
        }
        backing.return_pending_semaphores_with_fence_helper(std::mem::take(
            &mut self.begin_access_semaphores,
        ));
    }

    fn end_access(&mut self, readonly: bool) -> Result<(), Error> {
        debug_assert_ne!(self.access_mode, AccessMode::None);
        let backing = self.base.backing()?;
        debug_assert!(backing.need_synchronization() || self.end_access_semaphore.is_none());
        self.check_queue_transition()?;
        self.queue_transition = None;
        backing.end_access(readonly, self.end_access_semaphore.take(), false)?;
        // Everything waited on is reusable once the next submitted work finishes.
        backing.return_pending_semaphores_with_fence_helper(std::mem::take(
            &mut self.begin_access_semaphores,
        ));
        Ok(())
    }

    /// Restores the canvas and pushes what was drawn into the texture.
    fn release_write_surface(&mut self, backing: &ExternalVkImageBacking) -> Result<(), Error> {
        let Some(surface) = self.write_surface.take() else {
            return Ok(());
        };
        let flushed = {
            let mut surface = surface.lock();
            surface.canvas().restore_to_count(1);
            surface.flush()
        };
        drop(surface);
        let texture = backing.backend_texture().id();
        if !backing.context_state().cached_surface_is_unique(texture) {
            tracing::warn!(
                mailbox = %self.base.mailbox(),
                "cached surface still referenced after write access"
            );
        }
        flushed
    }
}

impl Representation for ExternalVkSkiaRepresentation {
    fn mailbox(&self) -> Mailbox {
        self.base.mailbox()
    }

    fn kind(&self) -> RepresentationKind {
        RepresentationKind::Skia
    }

    fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    fn properties(&self) -> Result<BackingProperties, Error> {
        self.base.properties()
    }
}

impl SkiaRepresentation for ExternalVkSkiaRepresentation {
    fn begin_write_access(
        &mut self,
        params: &SkiaWriteParams,
    ) -> Result<SkiaAccess<SurfaceHandle>, Error> {
        let backing = self.base.backing()?;
        let context_state = backing.context_state().clone();
        if context_state.is_abandoned() {
            tracing::error!("drawing context is abandoned");
            return Err(Error::ContextLost);
        }
        self.check_no_access()?;

        let access = self.begin_access(false)?;
        let texture = access.handle.backend_texture();

        let cached = context_state.cached_surface(texture.id()).filter(|s| {
            s.lock().props() == params.surface_props
                && self.surface_msaa_count == params.final_msaa_count
        });
        let surface = match cached {
            // other APIs may have written since the surface was last used
            Some(surface) => {
                surface.lock().reload_from_texture();
                surface
            }
            None => {
                let props = backing.properties();
                match Surface::from_backend_texture(
                    texture,
                    props.surface_origin,
                    params.final_msaa_count,
                    props.color_space,
                    props.alpha_type,
                    params.surface_props,
                ) {
                    Ok(surface) => {
                        let surface = SurfaceHandle::new(surface);
                        self.surface_msaa_count = params.final_msaa_count;
                        context_state.cache_surface(texture.id(), surface.clone());
                        surface
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            "could not make a surface from the backend texture"
                        );
                        context_state.erase_cached_surface(texture.id());
                        self.rollback_access(&backing, false);
                        return Err(e);
                    }
                }
            }
        };

        let count = surface.lock().canvas().save();
        debug_assert_eq!(count, 1);

        self.access_mode = AccessMode::Write;
        self.write_surface = Some(surface.clone());
        Ok(SkiaAccess {
            handle: surface,
            begin_semaphores: access.begin_semaphores,
            end_semaphores: access.end_semaphores,
            end_state: self.end_state(&backing),
        })
    }

    fn begin_write_access_promise(&mut self) -> Result<SkiaAccess<PromiseTexture>, Error> {
        self.check_no_access()?;
        let mut access = self.begin_access(false)?;
        self.access_mode = AccessMode::Write;
        let backing = self.base.backing()?;
        access.end_state = self.end_state(&backing);
        Ok(access)
    }

    fn end_write_access(&mut self) -> Result<(), Error> {
        if self.access_mode != AccessMode::Write {
            tracing::error!(mode = %self.access_mode, "begin_write_access was not called");
            return Err(Error::AccessNotBegun {
                expected: AccessMode::Write,
                actual: self.access_mode,
            });
        }
        // nothing is torn down while ending can still fail
        self.check_queue_transition()?;
        let backing = self.base.backing()?;
        let flushed = self.release_write_surface(&backing);
        self.end_access(false)?;
        self.access_mode = AccessMode::None;
        flushed
    }

    fn begin_read_access(&mut self) -> Result<SkiaAccess<PromiseTexture>, Error> {
        self.check_no_access()?;
        let mut access = self.begin_access(true)?;
        let backing = self.base.backing()?;
        access.end_state = self.end_state(&backing);
        self.access_mode = AccessMode::Read;
        Ok(access)
    }

    fn end_read_access(&mut self) -> Result<(), Error> {
        if self.access_mode != AccessMode::Read {
            tracing::error!(mode = %self.access_mode, "begin_read_access was not called");
            return Err(Error::AccessNotBegun {
                expected: AccessMode::Read,
                actual: self.access_mode,
            });
        }
        self.end_access(true)?;
        self.access_mode = AccessMode::None;
        Ok(())
    }
}

impl Drop for ExternalVkSkiaRepresentation {
    fn drop(&mut self) {
        let Ok(backing) = self.base.backing() else {
            return;
        };
        if self.access_mode != AccessMode::None {
            report_open_access_on_drop(
                self.base.mailbox(),
                RepresentationKind::Skia,
                self.access_mode,
            );
            if let Err(e) = self.release_write_surface(&backing) {
                tracing::error!(error = %e, "could not flush the write surface on drop");
            }
            let readonly = self.access_mode == AccessMode::Read;
            if let Some(applied) = self.queue_transition.take() {
                if !applied.load(Ordering::Acquire) {
                    backing.backend_texture().set_queue_family(QueueFamily::External);
                }
            }
            if let Err(e) = self.end_access(readonly) {
                tracing::error!(error = %e, "could not end access on drop");
            }
            self.access_mode = AccessMode::None;
        }
        backing.context_state().erase_cached_surface(backing.backend_texture().id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SharedImageConfig;
    use crate::context_state::SharedContextState;
    use crate::factory::SharedImageRequest;
    use crate::format::SharedImageFormat;
    use crate::geometry::{Rect, Size};
    use crate::imp::SoftwareBackend;
    use crate::memory::MemoryTypeTracker;
    use crate::surface::SurfaceProps;
    use crate::usage::Usage;

    fn rep(usage: Usage) -> (Arc<ExternalVkImageBacking>, ExternalVkSkiaRepresentation) {
        let ctx = SharedContextState::new(
            Arc::new(SoftwareBackend::vulkan()),
            SharedImageConfig::default(),
        );
        let request = SharedImageRequest::new(
            Mailbox::generate(),
            SharedImageFormat::RGBA_8888,
            Size::new(4, 4),
            usage,
        );
        let backing = Arc::new(ExternalVkImageBacking::create(ctx, &request).unwrap());
        let rep = ExternalVkSkiaRepresentation::new(
            &backing,
            ProduceContext::detached(Arc::new(MemoryTypeTracker::new())),
        );
        (backing, rep)
    }

    fn params() -> SkiaWriteParams {
        SkiaWriteParams {
            final_msaa_count: 1,
            surface_props: SurfaceProps::default(),
            update_rect: Rect::new(0, 0, 4, 4),
        }
    }

    #[test]
    fn surface_is_cached_across_writes() {
        let (backing, mut rep) = rep(Usage::DISPLAY_READ | Usage::RASTER);
        let first = rep.begin_write_access(&params()).unwrap();
        assert!(!first.end_state.requires_transition());
        let first = first.handle;
        rep.end_write_access().unwrap();
        let second = rep.begin_write_access(&params()).unwrap().handle;
        assert!(first.ptr_eq(&second));
        rep.end_write_access().unwrap();
        assert_eq!(backing.context_state().cached_surface_count(), 1);
        drop(rep);
        assert_eq!(backing.context_state().cached_surface_count(), 0);
    }

    #[test]
    fn second_access_is_rejected() {
        let (_backing, mut rep) = rep(Usage::DISPLAY_READ | Usage::RASTER);
        let _access = rep.begin_read_access().unwrap();
        assert!(matches!(
            rep.begin_read_access(),
            Err(Error::AccessAlreadyInProgress(AccessMode::Read))
        ));
        assert!(matches!(rep.end_write_access(), Err(Error::AccessNotBegun { .. })));
        rep.end_read_access().unwrap();
    }

    #[test]
    fn synchronized_end_requires_transition() {
        let (backing, mut rep) = rep(Usage::GLES2 | Usage::DISPLAY_READ);
        let access = rep.begin_read_access().unwrap();
        assert_eq!(access.end_semaphores.len(), 1);
        assert!(access.end_state.requires_transition());
        assert!(matches!(rep.end_read_access(), Err(Error::MissingQueueFamilyTransition)));
        access.end_state.apply();
        rep.end_read_access().unwrap();
        assert_eq!(backing.pending_read_semaphore_count(), 1);
    }
}
