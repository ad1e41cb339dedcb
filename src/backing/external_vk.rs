// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! A Vulkan image whose memory may be shared with GL or WebGPU.

Cross-API ordering is carried by external semaphores.  The backing keeps:
- `write_semaphore`: signaled by the last writer; the next access waits on it,
- `read_semaphores`: one per finished reader; the next writer waits on all of them.

A reader takes the write semaphore (a waited-on semaphore cannot be waited on again,
so only the first reader after a write gets it).  A writer takes everything.
Semaphores handed out at begin return to the pool after the next submission completes.

Synchronization is only needed when another API can touch the memory, see
[`Usage::needs_cross_api_synchronization`].
*/

use crate::backing::{BackingProperties, BackingType, ClearTracker, SharedImageBacking};
use crate::color::{AlphaType, ColorSpace, SurfaceOrigin};
use crate::context_state::SharedContextState;
use crate::error::Error;
use crate::factory::{SharedImageBackingFactory, SharedImageRequest};
use crate::format::SharedImageFormat;
use crate::geometry::Size;
use crate::imp::ContextType;
use crate::mailbox::Mailbox;
use crate::representation::external_vk_skia::ExternalVkSkiaRepresentation;
use crate::representation::{
    AccessMode, GlAccessMode, GlTexturePassthroughRepresentation, ProduceContext, Representation,
    RepresentationBase, RepresentationKind, SkiaRepresentation, TexturePassthrough,
    report_open_access_on_drop,
};
use crate::semaphore::ExternalSemaphore;
use crate::software::Pixmap;
use crate::sync_token::GpuFence;
use crate::texture::{BackendTexture, PromiseTexture, QueueFamily};
use crate::usage::Usage;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static NEXT_SERVICE_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Default)]
struct SyncState {
    reads_in_progress: usize,
    is_write_in_progress: bool,
    write_semaphore: Option<ExternalSemaphore>,
    read_semaphores: Vec<ExternalSemaphore>,
}

#[derive(Debug)]
pub struct ExternalVkImageBacking {
    props: BackingProperties,
    clear_tracker: ClearTracker,
    context_state: Arc<SharedContextState>,
    texture: BackendTexture,
    promise_texture: PromiseTexture,
    service_id: u32,
    need_synchronization: bool,
    sync: Mutex<SyncState>,
}

impl ExternalVkImageBacking {
    pub fn create(
        context_state: Arc<SharedContextState>,
        request: &SharedImageRequest,
    ) -> Result<Self, Error> {
        let props = BackingProperties::new(
            request.mailbox,
            request.format,
            request.size,
            request.color_space,
            request.surface_origin,
            request.alpha_type,
            request.usage,
            request.is_thread_safe,
        )?;
        let resource_format = request
            .format
            .resource_format()
            .ok_or_else(|| {
                Error::TextureCreationFailed(format!(
                    "{} has no single-plane texture",
                    request.format
                ))
            })?;
        let texture = BackendTexture::create(
            context_state.backend(),
            request.size,
            resource_format,
            request.usage.contains(Usage::MIPMAP),
            request.usage,
            &format!("ExternalVkImageBacking_{}", request.usage.label()),
        )?;
        let promise_texture = PromiseTexture::make(&texture)
            .ok_or_else(|| Error::TextureCreationFailed(texture.label().to_string()))?;
        Ok(ExternalVkImageBacking {
            need_synchronization: request.usage.needs_cross_api_synchronization(),
            clear_tracker: ClearTracker::new(request.size),
            props,
            context_state,
            texture,
            promise_texture,
            service_id: NEXT_SERVICE_ID.fetch_add(1, Ordering::Relaxed),
            sync: Mutex::new(SyncState::default()),
        })
    }

    fn sync(&self) -> MutexGuard<'_, SyncState> {
        self.sync.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn context_state(&self) -> &Arc<SharedContextState> {
        &self.context_state
    }

    pub fn backend_texture(&self) -> &BackendTexture {
        &self.texture
    }

    pub fn promise_texture(&self) -> &PromiseTexture {
        &self.promise_texture
    }

    pub fn service_id(&self) -> u32 {
        self.service_id
    }

    /// Whether GL or WebGPU may touch the same memory.
    pub fn need_synchronization(&self) -> bool {
        self.need_synchronization
    }

    pub fn reads_in_progress(&self) -> usize {
        self.sync().reads_in_progress
    }

    pub fn is_write_in_progress(&self) -> bool {
        self.sync().is_write_in_progress
    }

    pub fn has_write_semaphore(&self) -> bool {
        self.sync().write_semaphore.is_some()
    }

    pub fn pending_read_semaphore_count(&self) -> usize {
        self.sync().read_semaphores.len()
    }

    /// Starts an access and returns the semaphores it must wait on.
    pub fn begin_access(
        &self,
        readonly: bool,
        is_gl: bool,
    ) -> Result<Vec<ExternalSemaphore>, Error> {
        let mut sync = self.sync();
        if sync.is_write_in_progress {
            tracing::error!(mailbox = %self.props.mailbox, "the backing is being written");
            return Err(Error::BackingBeingWritten);
        }
        let semaphores = if readonly {
            sync.reads_in_progress += 1;
            sync.write_semaphore.take().into_iter().collect()
        } else {
            if sync.reads_in_progress > 0 {
                tracing::error!(mailbox = %self.props.mailbox, "the backing is being read");
                return Err(Error::BackingBeingRead);
            }
            sync.is_write_in_progress = true;
            let mut semaphores = std::mem::take(&mut sync.read_semaphores);
            semaphores.extend(sync.write_semaphore.take());
            semaphores
        };
        drop(sync);
        if self.need_synchronization && !is_gl {
            // acquire from whichever API released it
            self.texture.set_queue_family(QueueFamily::Local);
        }
        Ok(semaphores)
    }

    /// Ends an access.  `end_semaphore` is signaled by the work the access recorded.
    pub fn end_access(
        &self,
        readonly: bool,
        end_semaphore: Option<ExternalSemaphore>,
        is_gl: bool,
    ) -> Result<(), Error> {
        let mut sync = self.sync();
        if readonly {
            if sync.reads_in_progress == 0 {
                return Err(Error::AccessNotBegun {
                    expected: AccessMode::Read,
                    actual: AccessMode::None,
                });
            }
            sync.reads_in_progress -= 1;
        } else {
            if !sync.is_write_in_progress {
                return Err(Error::AccessNotBegun {
                    expected: AccessMode::Write,
                    actual: AccessMode::None,
                });
            }
            sync.is_write_in_progress = false;
        }

        let Some(semaphore) = end_semaphore else {
            if self.need_synchronization {
                tracing::error!(
                    mailbox = %self.props.mailbox,
                    is_gl,
                    "access ended without an end semaphore"
                );
            }
            return Ok(());
        };
        if !self.need_synchronization {
            drop(sync);
            self.context_state.semaphore_pool().return_semaphores(vec![semaphore]);
            return Ok(());
        }
        if readonly {
            sync.read_semaphores.push(semaphore);
        } else {
            debug_assert!(sync.write_semaphore.is_none());
            debug_assert!(sync.read_semaphores.is_empty());
            sync.write_semaphore = Some(semaphore);
        }
        Ok(())
    }

    /// Recycles semaphores the finished access waited on.
    pub fn return_pending_semaphores_with_fence_helper(&self, semaphores: Vec<ExternalSemaphore>) {
        self.context_state.return_semaphores_after_submitted_work(semaphores);
    }
}

impl Drop for ExternalVkImageBacking {
    fn drop(&mut self) {
        let sync = std::mem::take(self.sync.get_mut().unwrap_or_else(PoisonError::into_inner));
        // Outstanding semaphores may still be waited on by submitted work.
        let mut semaphores = sync.read_semaphores;
        semaphores.extend(sync.write_semaphore);
        self.context_state.return_semaphores_after_submitted_work(semaphores);
        self.context_state.erase_cached_surface(self.texture.id());
        self.texture.destroy();
    }
}

impl SharedImageBacking for ExternalVkImageBacking {
    fn properties(&self) -> &BackingProperties {
        &self.props
    }

    fn backing_type(&self) -> BackingType {
        BackingType::ExternalVkImage
    }

    fn clear_tracker(&self) -> &ClearTracker {
        &self.clear_tracker
    }

    fn update(&self, _in_fence: Option<GpuFence>) -> Result<(), Error> {
        Ok(())
    }

    fn upload_from_memory(&self, pixels: &Pixmap) -> Result<(), Error> {
        let sync = self.sync();
        if sync.is_write_in_progress {
            return Err(Error::BackingBeingWritten);
        }
        if sync.reads_in_progress > 0 {
            return Err(Error::BackingBeingRead);
        }
        self.texture.write_pixels(pixels, true)?;
        self.set_cleared();
        Ok(())
    }

    fn produce_skia(
        self: Arc<Self>,
        produce: ProduceContext,
        context_state: Arc<SharedContextState>,
    ) -> Result<Box<dyn SkiaRepresentation>, Error> {
        if !Arc::ptr_eq(&context_state, &self.context_state) {
            tracing::warn!(
                mailbox = %self.props.mailbox,
                "skia representation requested from a foreign context"
            );
        }
        Ok(Box::new(ExternalVkSkiaRepresentation::new(&self, produce)))
    }

    fn produce_gl_texture_passthrough(
        self: Arc<Self>,
        produce: ProduceContext,
    ) -> Result<Box<dyn GlTexturePassthroughRepresentation>, Error> {
        Ok(Box::new(ExternalVkGlTexturePassthroughRepresentation {
            base: RepresentationBase::new(&self, produce),
            mode: None,
        }))
    }
}

/// GL's view of the Vulkan image.  GL waits on the begin semaphores as soon as the access
/// starts and signals a fresh semaphore when it ends.
#[derive(Debug)]
pub struct ExternalVkGlTexturePassthroughRepresentation {
    base: RepresentationBase<ExternalVkImageBacking>,
    mode: Option<GlAccessMode>,
}

impl ExternalVkGlTexturePassthroughRepresentation {
    fn end_access_inner(&mut self, mode: GlAccessMode) -> Result<(), Error> {
        let backing = self.base.backing()?;
        let end_semaphore = if backing.need_synchronization() {
            match backing.context_state().get_or_create_semaphore() {
                Ok(semaphore) => {
                    // GL's release hands the image over to the external queue.
                    backing.backend_texture().set_queue_family(QueueFamily::External);
                    Some(semaphore)
                }
                Err(e) => {
                    tracing::error!(error = %e, "no semaphore to signal at the end of GL access");
                    None
                }
            }
        } else {
            None
        };
        backing.end_access(mode == GlAccessMode::Read, end_semaphore, true)
    }
}

impl Representation for ExternalVkGlTexturePassthroughRepresentation {
    fn mailbox(&self) -> Mailbox {
        self.base.mailbox()
    }

    fn kind(&self) -> RepresentationKind {
        RepresentationKind::GlTexturePassthrough
    }

    fn access_mode(&self) -> AccessMode {
        self.mode.map_or(AccessMode::None, |m| m.access_mode())
    }

    fn properties(&self) -> Result<BackingProperties, Error> {
        self.base.properties()
    }
}

impl GlTexturePassthroughRepresentation for ExternalVkGlTexturePassthroughRepresentation {
    fn begin_access(&mut self, mode: GlAccessMode) -> Result<(), Error> {
        if let Some(current) = self.mode {
            return Err(Error::AccessAlreadyInProgress(current.access_mode()));
        }
        let backing = self.base.backing()?;
        let semaphores = backing.begin_access(mode == GlAccessMode::Read, true)?;
        tracing::trace!(
            mailbox = %self.base.mailbox(),
            waits = semaphores.len(),
            "GL waits on begin semaphores"
        );
        backing.return_pending_semaphores_with_fence_helper(semaphores);
        self.mode = Some(mode);
        Ok(())
    }

    fn end_access(&mut self) -> Result<(), Error> {
        let Some(mode) = self.mode.take() else {
            return Err(Error::AccessNotBegun {
                expected: AccessMode::Read,
                actual: AccessMode::None,
            });
        };
        self.end_access_inner(mode)
    }

    fn texture_passthrough(&self, plane_index: usize) -> Result<TexturePassthrough, Error> {
        if plane_index != 0 {
            return Err(Error::NotImplemented("texture planes beyond the first"));
        }
        let backing = self.base.backing()?;
        Ok(TexturePassthrough {
            service_id: backing.service_id(),
            texture: backing.backend_texture().clone(),
        })
    }
}

impl Drop for ExternalVkGlTexturePassthroughRepresentation {
    fn drop(&mut self) {
        if let Some(mode) = self.mode.take() {
            report_open_access_on_drop(
                self.base.mailbox(),
                RepresentationKind::GlTexturePassthrough,
                mode.access_mode(),
            );
            let _ = self.end_access_inner(mode);
        }
    }
}

/// Creates [`ExternalVkImageBacking`]s on a Vulkan context.
#[derive(Debug)]
pub struct ExternalVkImageBackingFactory {
    context_state: Arc<SharedContextState>,
    max_texture_size: u32,
}

impl ExternalVkImageBackingFactory {
    pub fn new(context_state: Arc<SharedContextState>) -> Self {
        let max_texture_size =
            context_state.config().max_texture_size.min(context_state.backend().max_texture_size());
        ExternalVkImageBackingFactory { context_state, max_texture_size }
    }
}

impl SharedImageBackingFactory for ExternalVkImageBackingFactory {
    fn name(&self) -> &'static str {
        "ExternalVkImage"
    }

    fn is_supported(
        &self,
        request: &SharedImageRequest,
        pixel_data: Option<&[u8]>,
        has_gmb: bool,
    ) -> bool {
        if self.context_state.context_type() != ContextType::Vulkan || has_gmb {
            return false;
        }
        if request.usage.intersects(Usage::CPU_UPLOAD | Usage::VIDEO_DECODE | Usage::SCANOUT) {
            return false;
        }
        let SharedImageFormat::SinglePlane(_) = request.format else {
            return false;
        };
        if let Some(data) = pixel_data {
            if Some(data.len() as u64) != request.format.estimated_size_in_bytes(request.size) {
                return false;
            }
        }
        let Size { width, height } = request.size;
        width > 0 && height > 0 && width <= self.max_texture_size && height <= self.max_texture_size
    }

    fn create_shared_image(
        &self,
        request: &SharedImageRequest,
    ) -> Result<Arc<dyn SharedImageBacking>, Error> {
        Ok(Arc::new(ExternalVkImageBacking::create(self.context_state.clone(), request)?))
    }

    fn create_shared_image_with_data(
        &self,
        request: &SharedImageRequest,
        data: &[u8],
    ) -> Result<Arc<dyn SharedImageBacking>, Error> {
        let backing = ExternalVkImageBacking::create(self.context_state.clone(), request)?;
        if !data.is_empty() {
            let pixels = crate::factory::pixmap_from_data(request, data)?;
            backing.upload_from_memory(&pixels)?;
        }
        Ok(Arc::new(backing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SharedImageConfig;
    use crate::imp::SoftwareBackend;

    fn backing(usage: Usage) -> ExternalVkImageBacking {
        let ctx = SharedContextState::new(
            Arc::new(SoftwareBackend::vulkan()),
            SharedImageConfig::default(),
        );
        let request = SharedImageRequest::new(
            Mailbox::generate(),
            SharedImageFormat::RGBA_8888,
            Size::new(2, 2),
            usage,
        );
        ExternalVkImageBacking::create(ctx, &request).unwrap()
    }

    #[test]
    fn first_reader_takes_write_semaphore() {
        let b = backing(Usage::GLES2 | Usage::DISPLAY_READ);
        assert!(b.need_synchronization());
        assert!(b.begin_access(false, false).unwrap().is_empty());
        let s = b.context_state().get_or_create_semaphore().unwrap();
        b.end_access(false, Some(s), false).unwrap();
        assert!(b.has_write_semaphore());

        assert_eq!(b.begin_access(true, false).unwrap().len(), 1);
        assert!(b.begin_access(true, false).unwrap().is_empty());
        assert!(matches!(b.begin_access(false, false), Err(Error::BackingBeingRead)));
    }

    #[test]
    fn writer_waits_on_all_readers() {
        let b = backing(Usage::GLES2 | Usage::DISPLAY_READ);
        for _ in 0..3 {
            let _ = b.begin_access(true, false).unwrap();
        }
        for _ in 0..3 {
            let s = b.context_state().get_or_create_semaphore().unwrap();
            b.end_access(true, Some(s), false).unwrap();
        }
        assert_eq!(b.pending_read_semaphore_count(), 3);
        assert_eq!(b.begin_access(false, false).unwrap().len(), 3);
        assert!(matches!(b.begin_access(true, false), Err(Error::BackingBeingWritten)));
    }

    #[test]
    fn unsynchronized_backing_recycles_end_semaphores() {
        let b = backing(Usage::DISPLAY_READ | Usage::RASTER);
        assert!(!b.need_synchronization());
        let _ = b.begin_access(false, false).unwrap();
        let s = b.context_state().get_or_create_semaphore().unwrap();
        b.end_access(false, Some(s), false).unwrap();
        assert!(!b.has_write_semaphore());
        assert_eq!(b.context_state().semaphore_pool().cached_count(), 1);
    }
}
