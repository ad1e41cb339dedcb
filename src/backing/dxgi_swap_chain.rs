// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! Buffers of a presentable swap chain.

A swap chain is created as a pair of images, a back buffer the client draws into and
a front buffer holding what was last presented.  Both backings share one [`SwapChain`]
and one present state:

- Skia writes record their `update_rect` as the pending swap rect,
- presenting consumes the swap rect; with nothing pending the present is skipped,
- the first present of a swap chain has to cover the whole buffer.

Beginning an overlay read presents (interval 0), so the compositor always scans out
the latest content.
*/

use crate::backing::{BackingProperties, BackingType, ClearTracker, SharedImageBacking};
use crate::color::{AlphaType, ColorSpace, SurfaceOrigin};
use crate::context_state::SharedContextState;
use crate::error::Error;
use crate::format::{ResourceFormat, SharedImageFormat};
use crate::geometry::{Rect, Size};
use crate::imp::GraphicsBackend;
use crate::mailbox::Mailbox;
use crate::representation::skia_gl::SkiaGlImageRepresentation;
use crate::representation::{
    AccessMode, DCompLayerContent, GlAccessMode, GlTexturePassthroughRepresentation, OverlayAccess,
    OverlayRepresentation, ProduceContext, Representation, RepresentationBase, RepresentationKind,
    SkiaAccess, SkiaRepresentation, SkiaWriteParams, TexturePassthrough,
};
use crate::software::Texel;
use crate::surface::SurfaceHandle;
use crate::sync_token::GpuFence;
use crate::texture::{BackendTexture, PromiseTexture};
use crate::usage::Usage;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const BACK_BUFFER: usize = 0;
pub const FRONT_BUFFER: usize = 1;

/// The driver boundary for presentation.
pub trait SwapChain: Send + Sync + Debug {
    fn id(&self) -> u64;

    fn size(&self) -> Size;

    /// Buffer `index`, [`BACK_BUFFER`] or [`FRONT_BUFFER`].
    fn buffer(&self, index: usize) -> Option<BackendTexture>;

    /// Presents the back buffer.  Only `dirty_rect` is guaranteed to be updated on screen.
    fn present(&self, sync_interval: u32, dirty_rect: Rect) -> Result<(), Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentRecord {
    pub sync_interval: u32,
    pub dirty_rect: Rect,
}

static NEXT_SWAP_CHAIN: AtomicU64 = AtomicU64::new(1);

/// A swap chain of two backend textures.  Presenting copies the dirty rect from the back
/// buffer to the front buffer and logs the call.
#[derive(Debug)]
pub struct SoftwareSwapChain {
    id: u64,
    size: Size,
    buffers: [BackendTexture; 2],
    presents: Mutex<Vec<PresentRecord>>,
    fail_presents: AtomicBool,
}

impl SoftwareSwapChain {
    pub fn new(
        backend: &Arc<dyn GraphicsBackend>,
        size: Size,
        format: ResourceFormat,
        usage: Usage,
    ) -> Result<Self, Error> {
        let create =
            |label: &str| BackendTexture::create(backend, size, format, false, usage, label);
        let back = create("DXGISwapChain_back")?;
        let front = create("DXGISwapChain_front")?;
        Ok(SoftwareSwapChain {
            id: NEXT_SWAP_CHAIN.fetch_add(1, Ordering::Relaxed),
            size,
            buffers: [back, front],
            presents: Mutex::new(Vec::new()),
            fail_presents: AtomicBool::new(false),
        })
    }

    /// Every present so far, oldest first.
    pub fn presents(&self) -> Vec<PresentRecord> {
        self.presents.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Makes subsequent presents fail, as a lost output would.
    pub fn set_fail_presents(&self, fail: bool) {
        self.fail_presents.store(fail, Ordering::Relaxed);
    }
}

impl SwapChain for SoftwareSwapChain {
    fn id(&self) -> u64 {
        self.id
    }

    fn size(&self) -> Size {
        self.size
    }

    fn buffer(&self, index: usize) -> Option<BackendTexture> {
        self.buffers.get(index).cloned()
    }

    fn present(&self, sync_interval: u32, dirty_rect: Rect) -> Result<(), Error> {
        if self.fail_presents.load(Ordering::Relaxed) {
            return Err(Error::PresentFailed(format!("swap chain {} refused present", self.id)));
        }
        let [back, front] = &self.buffers;
        let source = back.read_pixels();
        let mut target = front.read_pixels();
        let clipped = dirty_rect.intersect(&source.bounds());
        for y in clipped.y..clipped.y + clipped.height as i32 {
            for x in clipped.x..clipped.x + clipped.width as i32 {
                let texel = Texel { x: x as u32, y: y as u32 };
                target[texel] = source[texel];
            }
        }
        front.write_pixels(&target, true)?;
        self.presents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PresentRecord { sync_interval, dirty_rect });
        Ok(())
    }
}

#[derive(Debug)]
struct PresentState {
    pending_swap_rect: Option<Rect>,
    first_swap: bool,
}

/// State shared by the two buffers of one swap chain.
#[derive(Debug)]
struct SharedSwapChain {
    swap_chain: Arc<dyn SwapChain>,
    present: Mutex<PresentState>,
}

#[derive(Debug)]
pub struct DxgiSwapChainImageBacking {
    props: BackingProperties,
    clear_tracker: ClearTracker,
    shared: Arc<SharedSwapChain>,
    buffer_index: usize,
    service_id: u32,
}

static NEXT_SERVICE_ID: AtomicU32 = AtomicU32::new(0x8000);

impl DxgiSwapChainImageBacking {
    fn present_state(&self) -> MutexGuard<'_, PresentState> {
        self.shared.present.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn swap_chain(&self) -> &Arc<dyn SwapChain> {
        &self.shared.swap_chain
    }

    pub fn buffer_index(&self) -> usize {
        self.buffer_index
    }

    pub fn buffer(&self) -> Result<BackendTexture, Error> {
        self.shared
            .swap_chain
            .buffer(self.buffer_index)
            .ok_or_else(|| {
                Error::PresentFailed(format!("swap chain has no buffer {}", self.buffer_index))
            })
    }

    /// Records the region the current write will update.
    pub fn set_swap_rect(&self, swap_rect: Rect) {
        self.present_state().pending_swap_rect = Some(swap_rect);
    }

    pub fn pending_swap_rect(&self) -> Option<Rect> {
        self.present_state().pending_swap_rect
    }

    pub fn dcomp_layer_content(&self) -> DCompLayerContent {
        DCompLayerContent::SwapChain { swap_chain_id: self.shared.swap_chain.id() }
    }
}

impl SharedImageBacking for DxgiSwapChainImageBacking {
    fn properties(&self) -> &BackingProperties {
        &self.props
    }

    fn backing_type(&self) -> BackingType {
        BackingType::DxgiSwapChain
    }

    fn clear_tracker(&self) -> &ClearTracker {
        &self.clear_tracker
    }

    fn update(&self, _in_fence: Option<GpuFence>) -> Result<(), Error> {
        Err(Error::NotImplemented("update"))
    }

    fn present(&self, sync_with_vblank: bool) -> Result<(), Error> {
        let swap_rect = {
            let mut state = self.present_state();
            let Some(swap_rect) = state.pending_swap_rect.take() else {
                tracing::trace!(mailbox = %self.props.mailbox, "nothing drawn, skipping present");
                return Ok(());
            };
            if state.first_swap {
                if swap_rect != Rect::from_size(self.props.size) {
                    tracing::error!(
                        mailbox = %self.props.mailbox,
                        %swap_rect,
                        "first present must be a full swap"
                    );
                    return Err(Error::PresentFailed(format!(
                        "first present covers only {swap_rect}"
                    )));
                }
                state.first_swap = false;
            }
            swap_rect
        };
        let interval = u32::from(sync_with_vblank);
        self.shared.swap_chain.present(interval, swap_rect).inspect_err(|e| {
            tracing::error!(mailbox = %self.props.mailbox, error = %e, "present failed");
        })
    }

    fn produce_overlay(
        self: Arc<Self>,
        produce: ProduceContext,
    ) -> Result<Box<dyn OverlayRepresentation>, Error> {
        Ok(Box::new(DxgiSwapChainOverlayRepresentation {
            base: RepresentationBase::new(&self, produce),
            reading: false,
        }))
    }

    fn produce_gl_texture_passthrough(
        self: Arc<Self>,
        produce: ProduceContext,
    ) -> Result<Box<dyn GlTexturePassthroughRepresentation>, Error> {
        let texture = TexturePassthrough { service_id: self.service_id, texture: self.buffer()? };
        Ok(Box::new(GlTexturePassthroughDxgiSwapChainBufferRepresentation {
            base: RepresentationBase::new(&self, produce),
            texture,
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
        let inner = SkiaGlImageRepresentation::create(gl, context_state, &self, produce)?;
        Ok(Box::new(SkiaGlImageRepresentationDxgiSwapChain { inner }))
    }
}

/// Scanout of the swap chain.  Beginning a read presents.
#[derive(Debug)]
pub struct DxgiSwapChainOverlayRepresentation {
    base: RepresentationBase<DxgiSwapChainImageBacking>,
    reading: bool,
}

impl Representation for DxgiSwapChainOverlayRepresentation {
    fn mailbox(&self) -> Mailbox {
        self.base.mailbox()
    }

    fn kind(&self) -> RepresentationKind {
        RepresentationKind::Overlay
    }

    fn access_mode(&self) -> AccessMode {
        if self.reading { AccessMode::Read } else { AccessMode::None }
    }

    fn properties(&self) -> Result<BackingProperties, Error> {
        self.base.properties()
    }
}

impl OverlayRepresentation for DxgiSwapChainOverlayRepresentation {
    fn begin_read_access(&mut self) -> Result<OverlayAccess, Error> {
        if self.reading {
            tracing::error!(mailbox = %self.base.mailbox(), "overlay read already in progress");
            return Err(Error::AccessAlreadyInProgress(AccessMode::Read));
        }
        let backing = self.base.backing()?;
        // Present interval 0: the compositor does not wait for vblank.
        backing.present(false)?;
        self.reading = true;
        Ok(OverlayAccess { content: backing.dcomp_layer_content(), acquire_fence: None })
    }

    fn end_read_access(&mut self) -> Result<(), Error> {
        if !self.reading {
            tracing::error!(mailbox = %self.base.mailbox(), "begin_read_access was not called");
            return Err(Error::AccessNotBegun {
                expected: AccessMode::Read,
                actual: AccessMode::None,
            });
        }
        self.reading = false;
        Ok(())
    }
}

/// GL access to one swap-chain buffer.  The buffer is always bound, so access never fails.
#[derive(Debug)]
pub struct GlTexturePassthroughDxgiSwapChainBufferRepresentation {
    base: RepresentationBase<DxgiSwapChainImageBacking>,
    texture: TexturePassthrough,
    mode: Option<GlAccessMode>,
}

impl Representation for GlTexturePassthroughDxgiSwapChainBufferRepresentation {
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

impl GlTexturePassthroughRepresentation for GlTexturePassthroughDxgiSwapChainBufferRepresentation {
    fn begin_access(&mut self, mode: GlAccessMode) -> Result<(), Error> {
        self.mode = Some(mode);
        Ok(())
    }

    fn end_access(&mut self) -> Result<(), Error> {
        self.mode = None;
        Ok(())
    }

    fn texture_passthrough(&self, plane_index: usize) -> Result<TexturePassthrough, Error> {
        if plane_index != 0 {
            return Err(Error::NotImplemented("texture planes beyond the first"));
        }
        Ok(self.texture.clone())
    }
}

/// Skia-over-GL that forwards each write's update rect as the swap rect.
#[derive(Debug)]
pub struct SkiaGlImageRepresentationDxgiSwapChain {
    inner: SkiaGlImageRepresentation<DxgiSwapChainImageBacking>,
}

impl Representation for SkiaGlImageRepresentationDxgiSwapChain {
    fn mailbox(&self) -> Mailbox {
        self.inner.mailbox()
    }

    fn kind(&self) -> RepresentationKind {
        RepresentationKind::Skia
    }

    fn access_mode(&self) -> AccessMode {
        self.inner.access_mode()
    }

    fn properties(&self) -> Result<BackingProperties, Error> {
        self.inner.properties()
    }
}

impl SkiaRepresentation for SkiaGlImageRepresentationDxgiSwapChain {
    fn begin_write_access(
        &mut self,
        params: &SkiaWriteParams,
    ) -> Result<SkiaAccess<SurfaceHandle>, Error> {
        let access = self.inner.begin_write_access(params)?;
        match self.inner.base().backing() {
            Ok(backing) => backing.set_swap_rect(params.update_rect),
            Err(e) => tracing::warn!(error = %e, "swap rect not recorded"),
        }
        Ok(access)
    }

    fn begin_write_access_promise(&mut self) -> Result<SkiaAccess<PromiseTexture>, Error> {
        self.inner.begin_write_access_promise()
    }

    fn end_write_access(&mut self) -> Result<(), Error> {
        self.inner.end_write_access()
    }

    fn begin_read_access(&mut self) -> Result<SkiaAccess<PromiseTexture>, Error> {
        self.inner.begin_read_access()
    }

    fn end_read_access(&mut self) -> Result<(), Error> {
        self.inner.end_read_access()
    }
}

/// Creates swap chains and their buffer backings.
#[derive(Debug)]
pub struct DxgiSwapChainImageBackingFactory {
    context_state: Arc<SharedContextState>,
}

impl DxgiSwapChainImageBackingFactory {
    pub fn new(context_state: Arc<SharedContextState>) -> Self {
        DxgiSwapChainImageBackingFactory { context_state }
    }

    pub fn is_supported_format(format: SharedImageFormat) -> bool {
        matches!(
            format,
            SharedImageFormat::SinglePlane(
                ResourceFormat::Rgba8888 | ResourceFormat::Bgra8888 | ResourceFormat::RgbaF16
            )
        )
    }

    /// Returns `(front, back)` backings over one new swap chain.
    pub fn create_swap_chain(
        &self,
        front_buffer: Mailbox,
        back_buffer: Mailbox,
        format: SharedImageFormat,
        size: Size,
        usage: Usage,
    ) -> Result<(Arc<dyn SharedImageBacking>, Arc<dyn SharedImageBacking>), Error> {
        if front_buffer.is_zero() || back_buffer.is_zero() {
            return Err(Error::ZeroMailbox);
        }
        if front_buffer == back_buffer {
            return Err(Error::DuplicateMailbox(back_buffer));
        }
        if !usage.is_valid_client_usage() {
            return Err(Error::InvalidUsage(usage));
        }
        let (SharedImageFormat::SinglePlane(resource_format), true) =
            (format, Self::is_supported_format(format))
        else {
            tracing::error!(%format, "unsupported swap chain format");
            return Err(Error::UnsupportedFormat(format));
        };
        let max = self.context_state.config().max_texture_size;
        if size.is_empty() || size.width > max || size.height > max {
            return Err(Error::InvalidSize { width: size.width, height: size.height });
        }
        let usage = usage | Usage::SWAP_CHAIN | Usage::SCANOUT;
        let swap_chain =
            SoftwareSwapChain::new(self.context_state.backend(), size, resource_format, usage)?;
        self.create_swap_chain_with(front_buffer, back_buffer, format, usage, Arc::new(swap_chain))
    }

    /// Wraps an existing swap chain.  Its size becomes the size of both buffers.
    pub fn create_swap_chain_with(
        &self,
        front_buffer: Mailbox,
        back_buffer: Mailbox,
        format: SharedImageFormat,
        usage: Usage,
        swap_chain: Arc<dyn SwapChain>,
    ) -> Result<(Arc<dyn SharedImageBacking>, Arc<dyn SharedImageBacking>), Error> {
        let size = swap_chain.size();
        tracing::debug!(swap_chain = swap_chain.id(), %size, %format, "created swap chain");
        let shared = Arc::new(SharedSwapChain {
            swap_chain,
            present: Mutex::new(PresentState { pending_swap_rect: None, first_swap: true }),
        });
        let make = |mailbox: Mailbox,
                    buffer_index: usize|
         -> Result<Arc<dyn SharedImageBacking>, Error> {
            let props = BackingProperties::new(
                mailbox,
                format,
                size,
                ColorSpace::srgb(),
                SurfaceOrigin::TopLeft,
                AlphaType::Premultiplied,
                usage,
                false,
            )?;
            Ok(Arc::new(DxgiSwapChainImageBacking {
                props,
                clear_tracker: ClearTracker::new(size),
                shared: shared.clone(),
                buffer_index,
                service_id: NEXT_SERVICE_ID.fetch_add(1, Ordering::Relaxed),
            }))
        };
        Ok((make(front_buffer, FRONT_BUFFER)?, make(back_buffer, BACK_BUFFER)?))
    }
}
