// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! Choosing and running a backing factory.

Each [`SharedImageBackingFactory`] knows one kind of backing and decides, per request,
whether it can serve it.  [`SharedImageFactory`] asks them in a fixed order and registers
whatever the first willing factory creates with the [`SharedImageManager`].

Factory order: raw draw (when enabled), external Vulkan image, GL texture.
Swap chains are a separate path, see [`SharedImageFactory::create_swap_chain`].
*/

use crate::backing::SharedImageBacking;
use crate::backing::dxgi_swap_chain::DxgiSwapChainImageBackingFactory;
use crate::backing::external_vk::ExternalVkImageBackingFactory;
use crate::backing::gl_texture::GlTextureImageBackingFactory;
use crate::backing::raw_draw::RawDrawImageBackingFactory;
use crate::color::{AlphaType, ColorSpace, SurfaceOrigin};
use crate::context_state::SharedContextState;
use crate::error::Error;
use crate::format::{ResourceFormat, SharedImageFormat};
use crate::geometry::Size;
use crate::mailbox::Mailbox;
use crate::manager::SharedImageManager;
use crate::memory::MemoryTypeTracker;
use crate::software::Pixmap;
use crate::sync_token::GpuFence;
use crate::usage::Usage;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Everything that describes a shared image to be created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SharedImageRequest {
    pub mailbox: Mailbox,
    pub format: SharedImageFormat,
    pub size: Size,
    pub color_space: ColorSpace,
    pub surface_origin: SurfaceOrigin,
    pub alpha_type: AlphaType,
    pub usage: Usage,
    pub is_thread_safe: bool,
}

impl SharedImageRequest {
    /// An sRGB, top-left, premultiplied request.
    pub fn new(mailbox: Mailbox, format: SharedImageFormat, size: Size, usage: Usage) -> Self {
        SharedImageRequest {
            mailbox,
            format,
            size,
            color_space: ColorSpace::srgb(),
            surface_origin: SurfaceOrigin::TopLeft,
            alpha_type: AlphaType::Premultiplied,
            usage,
            is_thread_safe: false,
        }
    }

    pub fn with_color_space(mut self, color_space: ColorSpace) -> Self {
        self.color_space = color_space;
        self
    }

    pub fn with_surface_origin(mut self, surface_origin: SurfaceOrigin) -> Self {
        self.surface_origin = surface_origin;
        self
    }

    pub fn with_alpha_type(mut self, alpha_type: AlphaType) -> Self {
        self.alpha_type = alpha_type;
        self
    }

    pub fn thread_safe(mut self) -> Self {
        self.is_thread_safe = true;
        self
    }
}

static NEXT_GMB_ID: AtomicU64 = AtomicU64::new(1);

/// CPU-mappable memory a client draws into and then shares as an image.
#[derive(Debug, Clone)]
pub struct GpuMemoryBuffer {
    id: u64,
    size: Size,
    format: ResourceFormat,
    memory: Arc<Mutex<Vec<u8>>>,
}

impl GpuMemoryBuffer {
    pub fn new(size: Size, format: ResourceFormat) -> Result<Self, Error> {
        let len = size
            .area()
            .checked_mul(format.bytes_per_pixel() as u64)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or(Error::InvalidSize { width: size.width, height: size.height })?;
        Ok(GpuMemoryBuffer {
            id: NEXT_GMB_ID.fetch_add(1, Ordering::Relaxed),
            size,
            format,
            memory: Arc::new(Mutex::new(vec![0; len])),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn format(&self) -> ResourceFormat {
        self.format
    }

    /// Replaces the mapped contents.  `data` must cover the whole buffer.
    pub fn write(&self, data: &[u8]) -> Result<(), Error> {
        let mut memory = self.memory.lock().unwrap_or_else(PoisonError::into_inner);
        if data.len() != memory.len() {
            return Err(Error::PixelDataMismatch { expected: memory.len(), actual: data.len() });
        }
        memory.copy_from_slice(data);
        Ok(())
    }

    /// A snapshot of the mapped contents.
    pub fn read(&self) -> Vec<u8> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn to_pixmap(&self) -> Result<Pixmap, Error> {
        pixmap_from_bytes(self.size, self.format, &self.read())
    }
}

/// Decodes tightly packed straight-alpha pixels of `format`.
pub fn pixmap_from_bytes(size: Size, format: ResourceFormat, data: &[u8]) -> Result<Pixmap, Error> {
    let expected = size.area() as usize * format.bytes_per_pixel() as usize;
    if data.len() != expected {
        return Err(Error::PixelDataMismatch { expected, actual: data.len() });
    }
    let rgba: Vec<u8> = match format {
        ResourceFormat::Rgba8888 => data.to_vec(),
        ResourceFormat::Bgra8888 => {
            data.chunks_exact(4).flat_map(|c| [c[2], c[1], c[0], c[3]]).collect()
        }
        ResourceFormat::Rgbx8888 => {
            data.chunks_exact(4).flat_map(|c| [c[0], c[1], c[2], 255]).collect()
        }
        other => return Err(Error::UnsupportedFormat(SharedImageFormat::SinglePlane(other))),
    };
    Pixmap::from_rgba8(size.width, size.height, &rgba)
        .ok_or(Error::PixelDataMismatch { expected, actual: data.len() })
}

/// Decodes initial data supplied with a creation request.
pub fn pixmap_from_data(request: &SharedImageRequest, data: &[u8]) -> Result<Pixmap, Error> {
    let format = request.format.resource_format().ok_or(Error::UnsupportedFormat(request.format))?;
    pixmap_from_bytes(request.size, format, data)
}

pub trait SharedImageBackingFactory: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Whether this factory can create the image.  `pixel_data` is initial content, if
    /// any; `has_gmb` is set when importing a [`GpuMemoryBuffer`].
    fn is_supported(
        &self,
        request: &SharedImageRequest,
        pixel_data: Option<&[u8]>,
        has_gmb: bool,
    ) -> bool;

    fn create_shared_image(
        &self,
        request: &SharedImageRequest,
    ) -> Result<Arc<dyn SharedImageBacking>, Error>;

    fn create_shared_image_with_data(
        &self,
        _request: &SharedImageRequest,
        _data: &[u8],
    ) -> Result<Arc<dyn SharedImageBacking>, Error> {
        Err(Error::NotImplemented("create_shared_image_with_data"))
    }

    fn create_shared_image_from_gmb(
        &self,
        _request: &SharedImageRequest,
        _gmb: &GpuMemoryBuffer,
    ) -> Result<Arc<dyn SharedImageBacking>, Error> {
        Err(Error::NotImplemented("create_shared_image_from_gmb"))
    }
}

/// Service-side entry point for creating and destroying shared images.
#[derive(Debug)]
pub struct SharedImageFactory {
    context_state: Arc<SharedContextState>,
    manager: SharedImageManager,
    tracker: Arc<MemoryTypeTracker>,
    factories: Vec<Box<dyn SharedImageBackingFactory>>,
    swap_chain_factory: DxgiSwapChainImageBackingFactory,
}

impl SharedImageFactory {
    pub fn new(context_state: Arc<SharedContextState>, manager: SharedImageManager) -> Self {
        let config = context_state.config().clone();
        let max_texture_size =
            config.max_texture_size.min(context_state.backend().max_texture_size());
        let mut factories: Vec<Box<dyn SharedImageBackingFactory>> = Vec::new();
        if config.enable_raw_draw {
            factories.push(Box::new(RawDrawImageBackingFactory::new(
                config.materialization_policy,
                max_texture_size,
            )));
        }
        factories.push(Box::new(ExternalVkImageBackingFactory::new(context_state.clone())));
        factories.push(Box::new(GlTextureImageBackingFactory::new(context_state.clone(), false)));
        factories.push(Box::new(GlTextureImageBackingFactory::new(context_state.clone(), true)));
        tracing::debug!(
            factories = ?factories.iter().map(|f| f.name()).collect::<Vec<_>>(),
            "shared image factory ready"
        );
        SharedImageFactory {
            swap_chain_factory: DxgiSwapChainImageBackingFactory::new(context_state.clone()),
            context_state,
            manager,
            tracker: Arc::new(MemoryTypeTracker::new()),
            factories,
        }
    }

    pub fn manager(&self) -> &SharedImageManager {
        &self.manager
    }

    pub fn context_state(&self) -> &Arc<SharedContextState> {
        &self.context_state
    }

    /// Memory attributed to images this factory created.
    pub fn tracker(&self) -> &Arc<MemoryTypeTracker> {
        &self.tracker
    }

    fn validate(&self, request: &SharedImageRequest) -> Result<(), Error> {
        if request.mailbox.is_zero() {
            return Err(Error::ZeroMailbox);
        }
        if !request.usage.is_valid_client_usage() {
            tracing::error!(usage = %request.usage.label(), "invalid shared image usage");
            return Err(Error::InvalidUsage(request.usage));
        }
        if request.size.is_empty() {
            return Err(Error::InvalidSize {
                width: request.size.width,
                height: request.size.height,
            });
        }
        Ok(())
    }

    fn pick(
        &self,
        request: &SharedImageRequest,
        pixel_data: Option<&[u8]>,
        has_gmb: bool,
    ) -> Result<&dyn SharedImageBackingFactory, Error> {
        self.factories
            .iter()
            .find(|f| f.is_supported(request, pixel_data, has_gmb))
            .map(|f| f.as_ref())
            .ok_or_else(|| {
                tracing::error!(
                    format = %request.format,
                    size = %request.size,
                    usage = %request.usage.label(),
                    "could not find a factory for the request"
                );
                Error::NoSupportingFactory
            })
    }

    fn register(&self, backing: Arc<dyn SharedImageBacking>) -> Result<(), Error> {
        self.manager.register(backing, self.tracker.clone())
    }

    pub fn create_shared_image(&self, request: &SharedImageRequest) -> Result<(), Error> {
        self.validate(request)?;
        let factory = self.pick(request, None, false)?;
        let backing = factory.create_shared_image(request)?;
        tracing::trace!(
            mailbox = %request.mailbox,
            factory = factory.name(),
            "created shared image"
        );
        self.register(backing)
    }

    pub fn create_shared_image_with_data(
        &self,
        request: &SharedImageRequest,
        data: &[u8],
    ) -> Result<(), Error> {
        self.validate(request)?;
        let factory = self.pick(request, Some(data), false)?;
        let backing = factory.create_shared_image_with_data(request, data)?;
        self.register(backing)
    }

    pub fn create_shared_image_from_gmb(
        &self,
        request: &SharedImageRequest,
        gmb: &GpuMemoryBuffer,
    ) -> Result<(), Error> {
        self.validate(request)?;
        if gmb.size() != request.size {
            return Err(Error::InvalidSize { width: gmb.size().width, height: gmb.size().height });
        }
        let factory = self.pick(request, None, true)?;
        let backing = factory.create_shared_image_from_gmb(request, gmb)?;
        self.register(backing)
    }

    /// Creates the front and back buffers of a presentable swap chain.
    pub fn create_swap_chain(
        &self,
        front_buffer: Mailbox,
        back_buffer: Mailbox,
        format: SharedImageFormat,
        size: Size,
        usage: Usage,
    ) -> Result<(), Error> {
        let (front, back) = self.swap_chain_factory.create_swap_chain(
            front_buffer,
            back_buffer,
            format,
            size,
            usage,
        )?;
        self.register(front)?;
        if let Err(e) = self.register(back) {
            let _ = self.manager.destroy(&front_buffer);
            return Err(e);
        }
        Ok(())
    }

    pub fn present_swap_chain(&self, back_buffer: &Mailbox) -> Result<(), Error> {
        self.manager.present_swap_chain(back_buffer)
    }

    pub fn update_shared_image(
        &self,
        mailbox: &Mailbox,
        in_fence: Option<GpuFence>,
    ) -> Result<(), Error> {
        self.manager.update(mailbox, in_fence)
    }

    pub fn destroy_shared_image(&self, mailbox: &Mailbox) -> Result<(), Error> {
        self.manager.destroy(mailbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::BackingType;
    use crate::config::SharedImageConfig;
    use crate::imp::SoftwareBackend;

    fn factory(backend: SoftwareBackend) -> SharedImageFactory {
        let ctx = SharedContextState::new(Arc::new(backend), SharedImageConfig::default());
        SharedImageFactory::new(ctx, SharedImageManager::new())
    }

    #[test]
    fn picks_backing_by_usage_and_context() {
        let gl = factory(SoftwareBackend::gl());
        let raw = SharedImageRequest::new(
            Mailbox::generate(),
            SharedImageFormat::RGBA_8888,
            Size::new(8, 8),
            Usage::RAW_DRAW | Usage::OOP_RASTERIZATION | Usage::DISPLAY_READ,
        );
        gl.create_shared_image(&raw).unwrap();
        assert_eq!(
            gl.manager().backing(&raw.mailbox).unwrap().backing_type(),
            BackingType::RawDraw
        );

        let tex = SharedImageRequest::new(
            Mailbox::generate(),
            SharedImageFormat::RGBA_8888,
            Size::new(8, 8),
            Usage::GLES2,
        );
        gl.create_shared_image(&tex).unwrap();
        assert_eq!(
            gl.manager().backing(&tex.mailbox).unwrap().backing_type(),
            BackingType::GlTexture
        );

        let vk = factory(SoftwareBackend::vulkan());
        let shared = SharedImageRequest::new(
            Mailbox::generate(),
            SharedImageFormat::RGBA_8888,
            Size::new(8, 8),
            Usage::GLES2 | Usage::DISPLAY_READ,
        );
        vk.create_shared_image(&shared).unwrap();
        assert_eq!(
            vk.manager().backing(&shared.mailbox).unwrap().backing_type(),
            BackingType::ExternalVkImage
        );
    }

    #[test]
    fn rejects_bad_requests() {
        let f = factory(SoftwareBackend::gl());
        let empty = SharedImageRequest::new(
            Mailbox::generate(),
            SharedImageFormat::RGBA_8888,
            Size::new(0, 4),
            Usage::GLES2,
        );
        assert!(matches!(f.create_shared_image(&empty), Err(Error::InvalidSize { .. })));
        let internal =
            SharedImageRequest::new(
                Mailbox::generate(),
                SharedImageFormat::RGBA_8888,
                Size::new(4, 4),
                Usage::SWAP_CHAIN,
            );
        assert!(matches!(f.create_shared_image(&internal), Err(Error::InvalidUsage(_))));
        let zero = SharedImageRequest::new(
            Mailbox::ZERO,
            SharedImageFormat::RGBA_8888,
            Size::new(4, 4),
            Usage::GLES2,
        );
        assert!(matches!(f.create_shared_image(&zero), Err(Error::ZeroMailbox)));
    }

    #[test]
    fn bgra_bytes_decode() {
        let p = pixmap_from_bytes(
            Size::new(1, 1),
            ResourceFormat::Bgra8888,
            &[0, 0, 255, 255],
        ).unwrap();
        assert_eq!(p.get(0, 0), Some([255, 0, 0, 255]));
        assert!(matches!(
            pixmap_from_bytes(Size::new(2, 1), ResourceFormat::Rgba8888, &[0; 4]),
            Err(Error::PixelDataMismatch { expected: 8, actual: 4 })
        ));
    }
}
