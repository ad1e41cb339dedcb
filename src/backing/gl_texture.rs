// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! A shared image that is just a GL texture.
//!
//! The texture is allocated when the backing is created.  GL consumers get a passthrough
//! representation; Skia consumers draw through [`SkiaGlImageRepresentation`].

use crate::backing::{BackingProperties, BackingType, ClearTracker, SharedImageBacking};
use crate::context_state::SharedContextState;
use crate::error::Error;
use crate::factory::{
    GpuMemoryBuffer, SharedImageBackingFactory, SharedImageRequest, pixmap_from_data,
};
use crate::format::{ResourceFormat, SharedImageFormat};
use crate::imp::ContextType;
use crate::mailbox::Mailbox;
use crate::representation::skia_gl::SkiaGlImageRepresentation;
use crate::representation::{
    AccessMode, GlAccessMode, GlTexturePassthroughRepresentation, ProduceContext, Representation,
    RepresentationBase, RepresentationKind, SkiaRepresentation, TexturePassthrough,
    report_open_access_on_drop,
};
use crate::software::Pixmap;
use crate::sync_token::GpuFence;
use crate::texture::BackendTexture;
use crate::usage::Usage;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_SERVICE_ID: AtomicU32 = AtomicU32::new(0x1000);

#[derive(Debug)]
pub struct GlTextureImageBacking {
    props: BackingProperties,
    clear_tracker: ClearTracker,
    texture: BackendTexture,
    service_id: u32,
    gmb: Option<GpuMemoryBuffer>,
}

impl GlTextureImageBacking {
    /// Formats whose pixels can be uploaded at creation.
    pub fn supports_pixel_upload_with_format(format: SharedImageFormat) -> bool {
        matches!(
            format,
            SharedImageFormat::SinglePlane(
                ResourceFormat::Rgba8888 | ResourceFormat::Bgra8888 | ResourceFormat::Rgbx8888
            )
        )
    }

    pub fn create(
        context_state: &SharedContextState,
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
            false,
        )?;
        let format =
            request.format.resource_format().ok_or(Error::UnsupportedFormat(request.format))?;
        let texture = BackendTexture::create(
            context_state.backend(),
            request.size,
            format,
            request.usage.contains(Usage::MIPMAP),
            request.usage,
            &format!("GLTextureImageBacking_{}", request.usage.label()),
        )?;
        Ok(GlTextureImageBacking {
            props,
            clear_tracker: ClearTracker::new(request.size),
            texture,
            service_id: NEXT_SERVICE_ID.fetch_add(1, Ordering::Relaxed),
            gmb: None,
        })
    }

    pub fn service_id(&self) -> u32 {
        self.service_id
    }

    pub fn backend_texture(&self) -> &BackendTexture {
        &self.texture
    }
}

impl Drop for GlTextureImageBacking {
    fn drop(&mut self) {
        self.texture.destroy();
    }
}

impl SharedImageBacking for GlTextureImageBacking {
    fn properties(&self) -> &BackingProperties {
        &self.props
    }

    fn backing_type(&self) -> BackingType {
        BackingType::GlTexture
    }

    fn clear_tracker(&self) -> &ClearTracker {
        &self.clear_tracker
    }

    /// Re-reads the client's memory buffer, if the image was imported from one.
    fn update(&self, in_fence: Option<GpuFence>) -> Result<(), Error> {
        if let Some(fence) = &in_fence {
            tracing::trace!(
                fence = fence.id(),
                signaled = fence.is_signaled(),
                "update waits on client fence"
            );
        }
        let Some(gmb) = &self.gmb else {
            return Ok(());
        };
        self.upload_from_memory(&gmb.to_pixmap()?)
    }

    fn upload_from_memory(&self, pixels: &Pixmap) -> Result<(), Error> {
        self.texture.write_pixels(pixels, true)?;
        self.set_cleared();
        Ok(())
    }

    fn produce_gl_texture_passthrough(
        self: Arc<Self>,
        produce: ProduceContext,
    ) -> Result<Box<dyn GlTexturePassthroughRepresentation>, Error> {
        Ok(Box::new(GlTexturePassthroughGlCommonRepresentation {
            base: RepresentationBase::new(&self, produce),
            mode: None,
        }))
    }

    fn produce_skia(
        self: Arc<Self>,
        produce: ProduceContext,
        context_state: Arc<SharedContextState>,
    ) -> Result<Box<dyn SkiaRepresentation>, Error> {
        let gl = self
            .clone()
            .produce_gl_texture_passthrough(ProduceContext::detached(produce.tracker.clone()))?;
        Ok(Box::new(SkiaGlImageRepresentation::create(gl, context_state, &self, produce)?))
    }
}

/// GL passthrough access to a GL texture.  GL serializes its own commands, so nothing
/// is tracked beyond the representation's own begin/end pairing.
#[derive(Debug)]
pub struct GlTexturePassthroughGlCommonRepresentation {
    base: RepresentationBase<GlTextureImageBacking>,
    mode: Option<GlAccessMode>,
}

impl Representation for GlTexturePassthroughGlCommonRepresentation {
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

impl GlTexturePassthroughRepresentation for GlTexturePassthroughGlCommonRepresentation {
    fn begin_access(&mut self, mode: GlAccessMode) -> Result<(), Error> {
        if let Some(current) = self.mode {
            return Err(Error::AccessAlreadyInProgress(current.access_mode()));
        }
        self.base.backing()?;
        self.mode = Some(mode);
        Ok(())
    }

    fn end_access(&mut self) -> Result<(), Error> {
        match self.mode.take() {
            Some(_) => Ok(()),
            None => Err(Error::AccessNotBegun {
                expected: AccessMode::Read,
                actual: AccessMode::None,
            }),
        }
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

impl Drop for GlTexturePassthroughGlCommonRepresentation {
    fn drop(&mut self) {
        if let Some(mode) = self.mode.take() {
            report_open_access_on_drop(
                self.base.mailbox(),
                RepresentationKind::GlTexturePassthrough,
                mode.access_mode(),
            );
        }
    }
}

/// Creates [`GlTextureImageBacking`]s on a GL context.
///
/// Two instances are installed: one that only takes CPU-upload images and one that
/// never does.
#[derive(Debug)]
pub struct GlTextureImageBackingFactory {
    context_state: Arc<SharedContextState>,
    max_texture_size: u32,
    for_cpu_upload_usage: bool,
}

impl GlTextureImageBackingFactory {
    pub fn new(context_state: Arc<SharedContextState>, for_cpu_upload_usage: bool) -> Self {
        let max_texture_size =
            context_state.config().max_texture_size.min(context_state.backend().max_texture_size());
        GlTextureImageBackingFactory { context_state, max_texture_size, for_cpu_upload_usage }
    }

    fn create_backing(&self, request: &SharedImageRequest) -> Result<GlTextureImageBacking, Error> {
        GlTextureImageBacking::create(&self.context_state, request)
    }
}

impl SharedImageBackingFactory for GlTextureImageBackingFactory {
    fn name(&self) -> &'static str {
        if self.for_cpu_upload_usage { "GLTexture(CPU upload)" } else { "GLTexture" }
    }

    fn is_supported(
        &self,
        request: &SharedImageRequest,
        pixel_data: Option<&[u8]>,
        has_gmb: bool,
    ) -> bool {
        if self.context_state.context_type() != ContextType::Gl || request.is_thread_safe {
            return false;
        }
        let usage = request.usage;
        if usage.contains(Usage::CPU_UPLOAD) != self.for_cpu_upload_usage {
            return false;
        }
        if usage.intersects(Usage::WEBGPU | Usage::VIDEO_DECODE | Usage::SCANOUT) {
            return false;
        }
        if has_gmb && request.format.resource_format().is_none_or(|f| f.bytes_per_pixel() != 4) {
            return false;
        }
        if let Some(data) = pixel_data.filter(|d| !d.is_empty()) {
            if !GlTextureImageBacking::supports_pixel_upload_with_format(request.format)
                || Some(data.len() as u64) != request.format.estimated_size_in_bytes(request.size)
            {
                return false;
            }
        }
        request.format.is_single_plane()
            && !request.size.is_empty()
            && request.size.width <= self.max_texture_size
            && request.size.height <= self.max_texture_size
    }

    fn create_shared_image(
        &self,
        request: &SharedImageRequest,
    ) -> Result<Arc<dyn SharedImageBacking>, Error> {
        Ok(Arc::new(self.create_backing(request)?))
    }

    fn create_shared_image_with_data(
        &self,
        request: &SharedImageRequest,
        data: &[u8],
    ) -> Result<Arc<dyn SharedImageBacking>, Error> {
        let backing = self.create_backing(request)?;
        if !data.is_empty() {
            backing.upload_from_memory(&pixmap_from_data(request, data)?)?;
        }
        Ok(Arc::new(backing))
    }

    fn create_shared_image_from_gmb(
        &self,
        request: &SharedImageRequest,
        gmb: &GpuMemoryBuffer,
    ) -> Result<Arc<dyn SharedImageBacking>, Error> {
        let mut backing = self.create_backing(request)?;
        backing.gmb = Some(gmb.clone());
        backing.update(None)?;
        Ok(Arc::new(backing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SharedImageConfig;
    use crate::geometry::Size;
    use crate::imp::SoftwareBackend;
    use crate::memory::MemoryTypeTracker;
    use crate::representation::{SkiaWriteParams, ProduceContext};
    use crate::color::Color4f;
    use crate::geometry::Rect;
    use crate::surface::SurfaceProps;

    fn gl_factory(for_cpu_upload_usage: bool) -> GlTextureImageBackingFactory {
        let ctx =
            SharedContextState::new(Arc::new(SoftwareBackend::gl()), SharedImageConfig::default());
        GlTextureImageBackingFactory::new(ctx, for_cpu_upload_usage)
    }

    fn request(usage: Usage) -> SharedImageRequest {
        SharedImageRequest::new(
            Mailbox::generate(),
            SharedImageFormat::RGBA_8888,
            Size::new(2, 2),
            usage,
        )
    }

    #[test]
    fn support_rules() {
        let f = gl_factory(false);
        assert!(f.is_supported(&request(Usage::GLES2), None, false));
        assert!(!f.is_supported(&request(Usage::GLES2 | Usage::SCANOUT), None, false));
        assert!(!f.is_supported(&request(Usage::GLES2 | Usage::CPU_UPLOAD), None, false));
        let upload = request(Usage::GLES2 | Usage::CPU_UPLOAD);
        assert!(gl_factory(true).is_supported(&upload, None, false));
        assert!(!f.is_supported(&request(Usage::GLES2), Some(&[0; 15]), false));
        assert!(f.is_supported(&request(Usage::GLES2), Some(&[0; 16]), false));
        assert!(!f.is_supported(&request(Usage::GLES2).thread_safe(), None, false));
    }

    #[test]
    fn gmb_contents_arrive_on_update() {
        let f = gl_factory(false);
        let req = request(Usage::GLES2 | Usage::DISPLAY_READ);
        let gmb = GpuMemoryBuffer::new(req.size, ResourceFormat::Rgba8888).unwrap();
        let backing = f.create_shared_image_from_gmb(&req, &gmb).unwrap();
        gmb.write(&[0, 255, 0, 255].repeat(4)).unwrap();
        backing.update(None).unwrap();
        let gl = backing.clone()
            .produce_gl_texture_passthrough(ProduceContext::detached(Arc::new(
                MemoryTypeTracker::new(),
            )))
            .unwrap();
        assert_eq!(
            gl.texture_passthrough(0).unwrap().texture.read_pixel(1, 1),
            Some([0, 255, 0, 255])
        );
    }

    #[test]
    fn skia_write_lands_in_gl_texture() {
        let f = gl_factory(false);
        let backing = f.create_shared_image(&request(Usage::GLES2 | Usage::RASTER)).unwrap();
        let tracker = Arc::new(MemoryTypeTracker::new());
        let ctx = f.context_state.clone();
        let mut skia =
            backing.clone().produce_skia(ProduceContext::detached(tracker.clone()), ctx).unwrap();
        let params = SkiaWriteParams {
            final_msaa_count: 1,
            surface_props: SurfaceProps::default(),
            update_rect: Rect::new(0, 0, 2, 2),
        };
        let access = skia.begin_write_access(&params).unwrap();
        access.handle.lock().canvas().clear(Color4f::RED);
        skia.end_write_access().unwrap();
        let gl = backing.clone().produce_gl_texture_passthrough(ProduceContext::detached(tracker)).unwrap();
        assert_eq!(
            gl.texture_passthrough(0).unwrap().texture.read_pixel(0, 0),
            Some([255, 0, 0, 255])
        );
    }
}
