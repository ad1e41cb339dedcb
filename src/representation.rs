// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! Per-API views over a backing.

A representation is produced by a backing (usually through
[`crate::manager::SharedImageManager`]) and exposes begin/end access pairs for one
graphics API.  Each kind has its own capability trait:

| Trait                                  | Write handle              | Read handle                 |
|----------------------------------------|---------------------------|-----------------------------|
| [`RasterRepresentation`]               | [`SharedPaintOpBuffer`]   | [`RasterReadAccess`]        |
| [`SkiaRepresentation`]                 | [`SurfaceHandle`] or [`PromiseTexture`] | [`PromiseTexture`] |
| [`GlTexturePassthroughRepresentation`] | [`TexturePassthrough`]    | [`TexturePassthrough`]      |
| [`OverlayRepresentation`]              | n/a                       | [`OverlayAccess`]           |

# Access rules

Every successful `begin_*` must be matched by exactly one `end_*`.  Ending an access
that was never begun returns [`Error::AccessNotBegun`].  Dropping a representation with
an access still open is a programming error: it is logged and the access is ended on the
caller's behalf so the backing's state machine stays consistent.

Busy backings report [`Error::BackingBeingRead`] / [`Error::BackingBeingWritten`]
immediately.  Nothing here retries or waits.

# Queue-family hand-off

When the same memory is shared with another API, a Skia access returns
[`EndState::TransitionToExternal`].  The caller must [`PendingQueueTransition::apply`] it
(after its GPU work has been recorded) before calling `end_*_access`; otherwise ending
fails with [`Error::MissingQueueFamilyTransition`].

The `begin_scoped_*` helpers return guards that end the access on drop.
*/

use crate::backing::{BackingProperties, SharedImageBacking};
use crate::color::Color4f;
use crate::context_state::SharedContextState;
use crate::error::Error;
use crate::geometry::Rect;
use crate::mailbox::Mailbox;
use crate::manager::RepresentationRef;
use crate::memory::MemoryTypeTracker;
use crate::paint::SharedPaintOpBuffer;
use crate::semaphore::BackendSemaphore;
use crate::surface::{SurfaceHandle, SurfaceProps};
use crate::sync_token::GpuFenceHandle;
use crate::texture::{BackendTexture, PromiseTexture, QueueFamily};
use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

pub mod external_vk_skia;
pub mod skia_gl;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessMode {
    #[default]
    None,
    Read,
    Write,
}

impl Display for AccessMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessMode::None => write!(f, "None"),
            AccessMode::Read => write!(f, "Read"),
            AccessMode::Write => write!(f, "Write"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepresentationKind {
    Raster,
    Skia,
    GlTexturePassthrough,
    Overlay,
}

impl Display for RepresentationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RepresentationKind::Raster => write!(f, "raster"),
            RepresentationKind::Skia => write!(f, "skia"),
            RepresentationKind::GlTexturePassthrough => write!(f, "GL passthrough"),
            RepresentationKind::Overlay => write!(f, "overlay"),
        }
    }
}

/// What every representation can answer regardless of kind.
pub trait Representation: Send + Debug {
    fn mailbox(&self) -> Mailbox;
    fn kind(&self) -> RepresentationKind;
    /// The access currently open through this representation.
    fn access_mode(&self) -> AccessMode;
    fn properties(&self) -> Result<BackingProperties, Error>;
}

/// State every concrete representation carries: a liveness-checked back-reference to its
/// backing, the tracker its memory is attributed to, and the registration that keeps the
/// backing alive in the manager.
pub struct RepresentationBase<B: ?Sized> {
    mailbox: Mailbox,
    backing: Weak<B>,
    tracker: Arc<MemoryTypeTracker>,
    _registration: RepresentationRef,
}

impl<B: ?Sized> RepresentationBase<B> {
    pub fn mailbox(&self) -> Mailbox {
        self.mailbox
    }

    pub fn tracker(&self) -> &Arc<MemoryTypeTracker> {
        &self.tracker
    }
}

impl<B: SharedImageBacking + ?Sized> RepresentationBase<B> {
    pub fn new(backing: &Arc<B>, produce: ProduceContext) -> Self {
        RepresentationBase {
            mailbox: backing.mailbox(),
            backing: Arc::downgrade(backing),
            tracker: produce.tracker,
            _registration: produce.registration,
        }
    }

    /// The backing, or [`Error::BackingDestroyed`] if it no longer exists.
    pub fn backing(&self) -> Result<Arc<B>, Error> {
        self.backing.upgrade().ok_or_else(|| {
            tracing::error!(mailbox = %self.mailbox, "representation outlived its backing");
            Error::BackingDestroyed(self.mailbox)
        })
    }

    pub fn properties(&self) -> Result<BackingProperties, Error> {
        Ok(self.backing()?.properties().clone())
    }

    pub fn is_cleared(&self) -> Result<bool, Error> {
        Ok(self.backing()?.is_cleared())
    }

    pub fn set_cleared(&self) -> Result<(), Error> {
        self.backing()?.set_cleared();
        Ok(())
    }
}

impl<B: ?Sized> Debug for RepresentationBase<B> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepresentationBase")
            .field("mailbox", &self.mailbox)
            .field("backing_alive", &(self.backing.strong_count() > 0))
            .finish()
    }
}

/// Everything a backing needs from its caller to produce a representation.
#[derive(Debug)]
pub struct ProduceContext {
    pub registration: RepresentationRef,
    pub tracker: Arc<MemoryTypeTracker>,
}

impl ProduceContext {
    /// For representations produced without a manager (tests, one-off tools).
    pub fn detached(tracker: Arc<MemoryTypeTracker>) -> Self {
        ProduceContext { registration: RepresentationRef::detached(), tracker }
    }
}

/// Logs an access left open at drop time.
pub(crate) fn report_open_access_on_drop(
    mailbox: Mailbox,
    kind: RepresentationKind,
    mode: AccessMode,
) {
    tracing::error!(
        %mailbox,
        %kind,
        %mode,
        "representation destroyed with an access still open; ending it"
    );
}

// ---------------------------------------------------------------------------
// Raster

pub type ReleaseCallback = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterWriteParams {
    pub final_msaa_count: u32,
    pub surface_props: SurfaceProps,
    pub clear_color: Option<Color4f>,
    /// Whether the image is currently on screen.
    pub visible: bool,
}

impl Default for RasterWriteParams {
    fn default() -> Self {
        RasterWriteParams {
            final_msaa_count: 1,
            surface_props: SurfaceProps::default(),
            clear_color: None,
            visible: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RasterReadAccess {
    pub paint_op_buffer: SharedPaintOpBuffer,
    pub clear_color: Option<Color4f>,
}

pub trait RasterRepresentation: Representation {
    /// Returns the emptied paint-op buffer to record into.  `context_state` is the context
    /// used if the content has to be materialized into a texture.
    fn begin_write_access(
        &mut self,
        context_state: Arc<SharedContextState>,
        params: RasterWriteParams,
    ) -> Result<SharedPaintOpBuffer, Error>;

    /// `callback` runs once the recorded ops are no longer needed.
    fn end_write_access(&mut self, callback: Option<ReleaseCallback>) -> Result<(), Error>;

    /// `Ok(None)` means "use the texture path instead": either a texture has already been
    /// materialized, or the content is too complex to replay.
    fn begin_read_access(&mut self) -> Result<Option<RasterReadAccess>, Error>;

    fn end_read_access(&mut self) -> Result<(), Error>;
}

pub struct ScopedRasterWriteAccess<'a> {
    representation: &'a mut dyn RasterRepresentation,
    buffer: SharedPaintOpBuffer,
    callback: Option<ReleaseCallback>,
}

impl ScopedRasterWriteAccess<'_> {
    pub fn paint_op_buffer(&self) -> &SharedPaintOpBuffer {
        &self.buffer
    }

    pub fn set_release_callback(&mut self, callback: ReleaseCallback) {
        self.callback = Some(callback);
    }
}

impl Drop for ScopedRasterWriteAccess<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.representation.end_write_access(self.callback.take()) {
            tracing::error!(error = %e, "ending scoped raster write failed");
        }
    }
}

pub struct ScopedRasterReadAccess<'a> {
    representation: &'a mut dyn RasterRepresentation,
    access: RasterReadAccess,
}

impl ScopedRasterReadAccess<'_> {
    pub fn paint_op_buffer(&self) -> &SharedPaintOpBuffer {
        &self.access.paint_op_buffer
    }

    pub fn clear_color(&self) -> Option<Color4f> {
        self.access.clear_color
    }
}

impl Drop for ScopedRasterReadAccess<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.representation.end_read_access() {
            tracing::error!(error = %e, "ending scoped raster read failed");
        }
    }
}

impl dyn RasterRepresentation {
    pub fn begin_scoped_write_access(
        &mut self,
        context_state: Arc<SharedContextState>,
        params: RasterWriteParams,
    ) -> Result<ScopedRasterWriteAccess<'_>, Error> {
        let buffer = self.begin_write_access(context_state, params)?;
        Ok(ScopedRasterWriteAccess { representation: self, buffer, callback: None })
    }

    pub fn begin_scoped_read_access(
        &mut self,
    ) -> Result<Option<ScopedRasterReadAccess<'_>>, Error> {
        Ok(self
            .begin_read_access()?
            .map(|access| ScopedRasterReadAccess { representation: self, access }))
    }
}

// ---------------------------------------------------------------------------
// Skia

/// A queue-family transition the caller owes before ending the access.
#[must_use = "the image must be transitioned to the external queue family before end access"]
#[derive(Debug)]
pub struct PendingQueueTransition {
    texture: BackendTexture,
    applied: Arc<AtomicBool>,
}

impl PendingQueueTransition {
    /// A transition owed by one access.  `applied` is shared with the representation
    /// that checks it at end, so concurrent accesses never see each other's transitions.
    pub(crate) fn to_external(texture: &BackendTexture, applied: Arc<AtomicBool>) -> Self {
        PendingQueueTransition { texture: texture.clone(), applied }
    }

    /// Records that the caller's GPU work has released the image to the external queue.
    pub fn apply(self) {
        self.texture.set_queue_family(QueueFamily::External);
        self.applied.store(true, Ordering::Release);
    }
}

/// What the caller must do with the image after its GPU work and before `end_*_access`.
#[must_use]
#[derive(Debug, Default)]
pub enum EndState {
    #[default]
    None,
    TransitionToExternal(PendingQueueTransition),
}

impl EndState {
    pub fn requires_transition(&self) -> bool {
        matches!(self, EndState::TransitionToExternal(_))
    }

    /// Performs the transition, if any.
    pub fn apply(self) {
        if let EndState::TransitionToExternal(t) = self {
            t.apply();
        }
    }
}

/// Result of beginning a Skia access.
///
/// The caller's GPU work must wait on `begin_semaphores` and signal `end_semaphores`.
#[must_use]
#[derive(Debug)]
pub struct SkiaAccess<H> {
    pub handle: H,
    pub begin_semaphores: Vec<BackendSemaphore>,
    pub end_semaphores: Vec<BackendSemaphore>,
    pub end_state: EndState,
}

impl<H> SkiaAccess<H> {
    pub fn new(handle: H) -> Self {
        SkiaAccess {
            handle,
            begin_semaphores: Vec::new(),
            end_semaphores: Vec::new(),
            end_state: EndState::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkiaWriteParams {
    pub final_msaa_count: u32,
    pub surface_props: SurfaceProps,
    /// The region the caller intends to modify.
    pub update_rect: Rect,
}

pub trait SkiaRepresentation: Representation {
    fn begin_write_access(
        &mut self,
        params: &SkiaWriteParams,
    ) -> Result<SkiaAccess<SurfaceHandle>, Error>;

    fn begin_write_access_promise(&mut self) -> Result<SkiaAccess<PromiseTexture>, Error>;

    fn end_write_access(&mut self) -> Result<(), Error>;

    fn begin_read_access(&mut self) -> Result<SkiaAccess<PromiseTexture>, Error>;

    fn end_read_access(&mut self) -> Result<(), Error>;

    /// Whether several reads may be open through this one representation at once.
    fn supports_multiple_concurrent_read_access(&self) -> bool {
        false
    }
}

pub struct ScopedSkiaWriteAccess<'a> {
    representation: &'a mut dyn SkiaRepresentation,
    surface: SurfaceHandle,
}

impl ScopedSkiaWriteAccess<'_> {
    pub fn surface(&self) -> &SurfaceHandle {
        &self.surface
    }
}

impl Drop for ScopedSkiaWriteAccess<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.representation.end_write_access() {
            tracing::error!(error = %e, "ending scoped skia write failed");
        }
    }
}

pub struct ScopedSkiaReadAccess<'a> {
    representation: &'a mut dyn SkiaRepresentation,
    promise_texture: PromiseTexture,
}

impl ScopedSkiaReadAccess<'_> {
    pub fn promise_texture(&self) -> &PromiseTexture {
        &self.promise_texture
    }
}

impl Drop for ScopedSkiaReadAccess<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.representation.end_read_access() {
            tracing::error!(error = %e, "ending scoped skia read failed");
        }
    }
}

impl dyn SkiaRepresentation {
    /// Begins a write and returns a guard plus the synchronization the caller must honor.
    ///
    /// Any end state is applied when the guard drops, so callers that need to submit
    /// work first should use the unscoped calls.
    pub fn begin_scoped_write_access(
        &mut self,
        params: &SkiaWriteParams,
    ) -> Result<(ScopedSkiaWriteAccess<'_>, Vec<BackendSemaphore>, Vec<BackendSemaphore>), Error> {
        let access = self.begin_write_access(params)?;
        // Scoped users have recorded nothing the transition would race with.
        access.end_state.apply();
        Ok((
            ScopedSkiaWriteAccess { representation: self, surface: access.handle },
            access.begin_semaphores,
            access.end_semaphores,
        ))
    }

    pub fn begin_scoped_read_access(
        &mut self,
    ) -> Result<(ScopedSkiaReadAccess<'_>, Vec<BackendSemaphore>, Vec<BackendSemaphore>), Error> {
        let access = self.begin_read_access()?;
        access.end_state.apply();
        Ok((
            ScopedSkiaReadAccess { representation: self, promise_texture: access.handle },
            access.begin_semaphores,
            access.end_semaphores,
        ))
    }
}

// ---------------------------------------------------------------------------
// GL passthrough

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlAccessMode {
    Read,
    ReadWrite,
}

impl GlAccessMode {
    pub fn access_mode(&self) -> AccessMode {
        match self {
            GlAccessMode::Read => AccessMode::Read,
            GlAccessMode::ReadWrite => AccessMode::Write,
        }
    }
}

/// A GL texture object as seen through the passthrough command decoder.
#[derive(Debug, Clone)]
pub struct TexturePassthrough {
    pub service_id: u32,
    pub texture: BackendTexture,
}

pub trait GlTexturePassthroughRepresentation: Representation {
    fn begin_access(&mut self, mode: GlAccessMode) -> Result<(), Error>;

    fn end_access(&mut self) -> Result<(), Error>;

    fn texture_passthrough(&self, plane_index: usize) -> Result<TexturePassthrough, Error>;
}

pub struct ScopedGlAccess<'a> {
    representation: &'a mut dyn GlTexturePassthroughRepresentation,
}

impl ScopedGlAccess<'_> {
    pub fn texture_passthrough(&self) -> Result<TexturePassthrough, Error> {
        self.representation.texture_passthrough(0)
    }
}

impl Drop for ScopedGlAccess<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.representation.end_access() {
            tracing::error!(error = %e, "ending scoped GL access failed");
        }
    }
}

impl dyn GlTexturePassthroughRepresentation {
    pub fn begin_scoped_access(&mut self, mode: GlAccessMode) -> Result<ScopedGlAccess<'_>, Error> {
        self.begin_access(mode)?;
        Ok(ScopedGlAccess { representation: self })
    }
}

// ---------------------------------------------------------------------------
// Overlay

/// What a compositor layer should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DCompLayerContent {
    SwapChain { swap_chain_id: u64 },
    Texture { texture: crate::texture::TextureId },
}

#[derive(Debug, Clone)]
pub struct OverlayAccess {
    pub content: DCompLayerContent,
    /// Fence the compositor must wait on, if the producer supplied one.
    pub acquire_fence: Option<GpuFenceHandle>,
}

pub trait OverlayRepresentation: Representation {
    fn begin_read_access(&mut self) -> Result<OverlayAccess, Error>;

    fn end_read_access(&mut self) -> Result<(), Error>;
}

pub struct ScopedOverlayReadAccess<'a> {
    representation: &'a mut dyn OverlayRepresentation,
    access: OverlayAccess,
}

impl ScopedOverlayReadAccess<'_> {
    pub fn content(&self) -> &DCompLayerContent {
        &self.access.content
    }
}

impl Drop for ScopedOverlayReadAccess<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.representation.end_read_access() {
            tracing::error!(error = %e, "ending scoped overlay read failed");
        }
    }
}

impl dyn OverlayRepresentation {
    pub fn begin_scoped_read_access(&mut self) -> Result<ScopedOverlayReadAccess<'_>, Error> {
        let access = self.begin_read_access()?;
        Ok(ScopedOverlayReadAccess { representation: self, access })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imp::{GraphicsBackend, SoftwareBackend};
    use crate::format::ResourceFormat;
    use crate::geometry::Size;
    use crate::usage::Usage;

    #[test]
    fn end_state_transition_sets_external_queue() {
        let backend: Arc<dyn GraphicsBackend> = Arc::new(SoftwareBackend::vulkan());
        let t = BackendTexture::create(
            &backend,
            Size::new(1, 1),
            ResourceFormat::Rgba8888,
            false,
            Usage::RASTER,
            "q",
        ).unwrap();
        let state = EndState::TransitionToExternal(PendingQueueTransition::to_external(&t, Arc::new(AtomicBool::new(false))));
        assert!(state.requires_transition());
        assert_eq!(t.mutable_state().queue_family, QueueFamily::Local);
        state.apply();
        assert_eq!(t.mutable_state().queue_family, QueueFamily::External);
    }

    #[test]
    fn access_mode_display() {
        assert_eq!(AccessMode::Write.to_string(), "Write");
        assert_eq!(GlAccessMode::Read.access_mode(), AccessMode::Read);
    }
}
