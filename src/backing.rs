// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! Backings: the owners of shared-image memory.

A backing owns the memory for one logical image and knows how to produce
representations bound to itself.  Backings are always held in an `Arc`; representations
keep only a `Weak` back-reference, checked on every access.

Concrete backings:
- [`raw_draw::RawDrawImageBacking`]: records paint ops and materializes a texture lazily,
- [`external_vk::ExternalVkImageBacking`]: a Vulkan image shared with GL/WebGPU through
  semaphores,
- [`gl_texture::GlTextureImageBacking`]: a plain GL texture,
- [`dxgi_swap_chain::DxgiSwapChainImageBacking`]: one buffer of a presentable swap chain.
*/

use crate::color::{AlphaType, ColorSpace, SurfaceOrigin};
use crate::context_state::SharedContextState;
use crate::error::Error;
use crate::format::SharedImageFormat;
use crate::geometry::{Rect, Size};
use crate::mailbox::Mailbox;
use crate::memory::{
    ATTR_SIZE, DumpAttribute, MemoryAllocatorDumpGuid, OWNING_EDGE_IMPORTANCE, ProcessMemoryDump,
};
use crate::representation::{
    GlTexturePassthroughRepresentation, OverlayRepresentation, ProduceContext, RasterRepresentation,
    RepresentationKind, SkiaRepresentation,
};
use crate::software::Pixmap;
use crate::sync_token::GpuFence;
use crate::usage::Usage;
use std::fmt::{Debug, Display, Formatter};
use std::sync::{Arc, Mutex, PoisonError};

pub mod dxgi_swap_chain;
pub mod external_vk;
pub mod gl_texture;
pub mod raw_draw;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackingType {
    RawDraw,
    ExternalVkImage,
    GlTexture,
    DxgiSwapChain,
}

impl Display for BackingType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackingType::RawDraw => "RawDraw",
            BackingType::ExternalVkImage => "ExternalVkImage",
            BackingType::GlTexture => "GLTexture",
            BackingType::DxgiSwapChain => "DXGISwapChain",
        };
        write!(f, "{name}")
    }
}

/// Immutable description of a backing.
#[derive(Debug, Clone, PartialEq)]
pub struct BackingProperties {
    pub mailbox: Mailbox,
    pub format: SharedImageFormat,
    pub size: Size,
    pub color_space: ColorSpace,
    pub surface_origin: SurfaceOrigin,
    pub alpha_type: AlphaType,
    pub usage: Usage,
    /// Bytes the backing occupies once fully allocated.
    pub estimated_size: u64,
    /// Whether representations may be used from threads other than the creating one.
    pub is_thread_safe: bool,
}

impl BackingProperties {
    /// Fills in `estimated_size` from the format.  Fails on overflow.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mailbox: Mailbox,
        format: SharedImageFormat,
        size: Size,
        color_space: ColorSpace,
        surface_origin: SurfaceOrigin,
        alpha_type: AlphaType,
        usage: Usage,
        is_thread_safe: bool,
    ) -> Result<Self, Error> {
        let estimated_size = format
            .estimated_size_in_bytes(size)
            .ok_or(Error::InvalidSize { width: size.width, height: size.height })?;
        Ok(BackingProperties {
            mailbox,
            format,
            size,
            color_space,
            surface_origin,
            alpha_type,
            usage,
            estimated_size,
            is_thread_safe,
        })
    }
}

/// Tracks which part of the image holds defined content.
///
/// Only a single rectangle is tracked; content written outside it is not remembered.
#[derive(Debug)]
pub struct ClearTracker {
    size: Size,
    cleared: Mutex<Rect>,
}

impl ClearTracker {
    pub fn new(size: Size) -> Self {
        ClearTracker { size, cleared: Mutex::new(Rect::default()) }
    }

    pub fn cleared_rect(&self) -> Rect {
        *self.cleared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_cleared_rect(&self, rect: Rect) {
        let clipped = rect.intersect(&Rect::from_size(self.size));
        *self.cleared.lock().unwrap_or_else(PoisonError::into_inner) = clipped;
    }

    pub fn is_cleared(&self) -> bool {
        self.cleared_rect() == Rect::from_size(self.size)
    }

    pub fn set_cleared(&self) {
        self.set_cleared_rect(Rect::from_size(self.size));
    }
}

pub trait SharedImageBacking: Send + Sync + Debug {
    fn properties(&self) -> &BackingProperties;

    fn backing_type(&self) -> BackingType;

    fn clear_tracker(&self) -> &ClearTracker;

    fn mailbox(&self) -> Mailbox {
        self.properties().mailbox
    }

    fn estimated_size_for_mem_tracking(&self) -> u64 {
        self.properties().estimated_size
    }

    fn cleared_rect(&self) -> Rect {
        self.clear_tracker().cleared_rect()
    }

    fn set_cleared_rect(&self, rect: Rect) {
        self.clear_tracker().set_cleared_rect(rect)
    }

    fn is_cleared(&self) -> bool {
        self.clear_tracker().is_cleared()
    }

    fn set_cleared(&self) {
        self.clear_tracker().set_cleared()
    }

    /// Picks up content written by the client outside any representation, after
    /// `in_fence` signals.
    fn update(&self, in_fence: Option<GpuFence>) -> Result<(), Error>;

    fn upload_from_memory(&self, _pixels: &Pixmap) -> Result<(), Error> {
        Err(Error::NotImplemented("upload_from_memory"))
    }

    fn present(&self, _sync_with_vblank: bool) -> Result<(), Error> {
        Err(Error::NotImplemented("present"))
    }

    /// Adds this backing's dump under `dump_name` and links it to the client.
    fn on_memory_dump(
        &self,
        dump_name: &str,
        client_guid: MemoryAllocatorDumpGuid,
        pmd: &mut ProcessMemoryDump,
        _client_tracing_id: u64,
    ) {
        add_backing_dump(self, dump_name, client_guid, pmd);
    }

    fn produce_raster(
        self: Arc<Self>,
        _produce: ProduceContext,
    ) -> Result<Box<dyn RasterRepresentation>, Error> {
        Err(Error::UnsupportedRepresentation {
            kind: RepresentationKind::Raster,
            backing: self.backing_type(),
        })
    }

    fn produce_skia(
        self: Arc<Self>,
        _produce: ProduceContext,
        _context_state: Arc<SharedContextState>,
    ) -> Result<Box<dyn SkiaRepresentation>, Error> {
        Err(Error::UnsupportedRepresentation {
            kind: RepresentationKind::Skia,
            backing: self.backing_type(),
        })
    }

    fn produce_gl_texture_passthrough(
        self: Arc<Self>,
        _produce: ProduceContext,
    ) -> Result<Box<dyn GlTexturePassthroughRepresentation>, Error> {
        Err(Error::UnsupportedRepresentation {
            kind: RepresentationKind::GlTexturePassthrough,
            backing: self.backing_type(),
        })
    }

    fn produce_overlay(
        self: Arc<Self>,
        _produce: ProduceContext,
    ) -> Result<Box<dyn OverlayRepresentation>, Error> {
        Err(Error::UnsupportedRepresentation {
            kind: RepresentationKind::Overlay,
            backing: self.backing_type(),
        })
    }
}

/// The dump every backing reports: size and descriptive attributes, owned by the client.
pub fn add_backing_dump<B: SharedImageBacking + ?Sized>(
    backing: &B,
    dump_name: &str,
    client_guid: MemoryAllocatorDumpGuid,
    pmd: &mut ProcessMemoryDump,
) {
    let props = backing.properties();
    let dump = pmd.create_allocator_dump(dump_name);
    dump.add_scalar(ATTR_SIZE, DumpAttribute::Bytes(backing.estimated_size_for_mem_tracking()));
    dump.add_string("type", backing.backing_type().to_string());
    dump.add_string("dimensions", props.size.to_string());
    dump.add_string("format", props.format.to_string());
    dump.add_string("usage", props.usage.label());
    let guid = dump.guid;
    pmd.add_ownership_edge(client_guid, guid, OWNING_EDGE_IMPORTANCE);
}
