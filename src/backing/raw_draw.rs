// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! Deferred rasterization.

A [`RawDrawImageBacking`] starts out as nothing but a recorded [`PaintOpBuffer`].  Raster
readers replay the buffer directly into their own target.  A texture is only created
("materialized") when somebody needs one:

- a Skia read asks for a promise texture, or
- a visible write recorded content the [`MaterializationPolicy`] considers complex.

Once materialized, raster reads are refused with `Ok(None)` and callers use the texture.
The next raster write throws the texture away and starts recording afresh.

[`PaintOpBuffer`]: crate::paint::PaintOpBuffer
*/

use crate::backing::{
    BackingProperties, BackingType, ClearTracker, SharedImageBacking, add_backing_dump,
};
use crate::color::{AlphaType, Color4f, ColorSpace, SurfaceOrigin};
use crate::config::MaterializationPolicy;
use crate::context_state::SharedContextState;
use crate::error::Error;
use crate::factory::{SharedImageBackingFactory, SharedImageRequest};
use crate::format::SharedImageFormat;
use crate::memory::{
    ATTR_SIZE, DumpAttribute, MemoryAllocatorDumpGuid, OWNING_EDGE_IMPORTANCE, ProcessMemoryDump,
};
use crate::paint::SharedPaintOpBuffer;
use crate::representation::{
    AccessMode, ProduceContext, RasterReadAccess, RasterRepresentation, RasterWriteParams,
    ReleaseCallback, Representation, RepresentationBase, RepresentationKind, SkiaAccess,
    SkiaRepresentation, SkiaWriteParams, report_open_access_on_drop,
};
use crate::surface::{Surface, SurfaceHandle, SurfaceProps};
use crate::sync_token::GpuFence;
use crate::texture::{BackendTexture, PromiseTexture};
use crate::usage::Usage;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct RawDrawState {
    context_state: Option<Arc<SharedContextState>>,
    read_count: usize,
    is_write: bool,
    paint_op_buffer: Option<SharedPaintOpBuffer>,
    clear_color: Option<Color4f>,
    final_msaa_count: u32,
    surface_props: SurfaceProps,
    visible: bool,
    release_callback: Option<ReleaseCallback>,
    backend_texture: Option<BackendTexture>,
    promise_texture: Option<PromiseTexture>,
}

impl RawDrawState {
    /// Empties the buffer and hands back the release callback so it can run unlocked.
    #[must_use]
    fn reset_paint_op_buffer(&mut self) -> Option<ReleaseCallback> {
        self.clear_color = None;
        if let Some(buffer) = &self.paint_op_buffer {
            buffer.reset();
        }
        self.release_callback.take()
    }

    fn destroy_backend_texture(&mut self) {
        self.promise_texture = None;
        if let Some(texture) = self.backend_texture.take() {
            texture.destroy();
        }
    }

    fn has_valid_texture(&self) -> bool {
        self.backend_texture.as_ref().is_some_and(BackendTexture::is_valid)
    }

    /// Creates the texture and rasterizes the recorded ops into it.
    ///
    /// With `flush` the result is pushed to the device right away; otherwise only the
    /// multisample resolve happens and the consumer's own submission carries the work.
    fn create_backend_texture_and_flush_paint_ops(
        &mut self,
        props: &BackingProperties,
        flush: bool,
    ) -> Result<(), Error> {
        debug_assert!(self.backend_texture.is_none());
        let context_state = self.context_state.clone().ok_or(Error::NoContextState)?;
        if context_state.is_context_lost() {
            return Err(Error::ContextLost);
        }
        let Some(resource_format) = props.format.resource_format() else {
            return Err(Error::TextureCreationFailed(format!(
                "{} cannot be materialized",
                props.format
            )));
        };
        let mipmapped = props.usage.contains(Usage::MIPMAP);
        let label = format!("RawDrawImageBacking_{}", props.usage.label());
        let texture = BackendTexture::create(
            context_state.backend(),
            props.size,
            resource_format,
            mipmapped,
            props.usage,
            &label,
        )
        .inspect_err(|e| tracing::error!(error = %e, "could not create backend texture"))?;
        let Some(promise) = PromiseTexture::make(&texture) else {
            texture.destroy();
            return Err(Error::TextureCreationFailed(label));
        };

        let rasterized = Surface::from_backend_texture(
            &texture,
            props.surface_origin,
            self.final_msaa_count,
            props.color_space,
            props.alpha_type,
            self.surface_props,
        )
        .and_then(|mut surface| {
            let canvas = surface.canvas();
            if let Some(color) = self.clear_color {
                canvas.clear(color);
            }
            if let Some(buffer) = &self.paint_op_buffer {
                buffer.playback(canvas);
            }
            if flush {
                surface.flush()?;
                context_state.submit()?;
                Ok(())
            } else {
                surface.resolve_msaa()
            }
        });
        if let Err(e) = rasterized {
            tracing::error!(error = %e, "could not rasterize into backend texture");
            texture.destroy();
            return Err(e);
        }

        self.backend_texture = Some(texture);
        self.promise_texture = Some(promise);
        Ok(())
    }
}

/// A shared image whose content lives as recorded paint ops until a texture is needed.
#[derive(Debug)]
pub struct RawDrawImageBacking {
    props: BackingProperties,
    full_size: u64,
    clear_tracker: ClearTracker,
    policy: MaterializationPolicy,
    state: Mutex<RawDrawState>,
}

impl std::fmt::Debug for RawDrawState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawDrawState")
            .field("read_count", &self.read_count)
            .field("is_write", &self.is_write)
            .field("ops", &self.paint_op_buffer.as_ref().map(SharedPaintOpBuffer::len))
            .field("backend_texture", &self.backend_texture)
            .finish_non_exhaustive()
    }
}

impl RawDrawImageBacking {
    /// Raw-draw images take no GPU memory up front.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mailbox: crate::mailbox::Mailbox,
        format: SharedImageFormat,
        size: crate::geometry::Size,
        color_space: ColorSpace,
        surface_origin: SurfaceOrigin,
        alpha_type: AlphaType,
        usage: Usage,
        policy: MaterializationPolicy,
    ) -> Result<Self, Error> {
        let mut props =
            BackingProperties::new(
                mailbox,
                format,
                size,
                color_space,
                surface_origin,
                alpha_type,
                usage,
                true,
            )?;
        let full_size = props.estimated_size;
        props.estimated_size = 0;
        Ok(RawDrawImageBacking {
            props,
            full_size,
            clear_tracker: ClearTracker::new(size),
            policy,
            state: Mutex::new(RawDrawState::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, RawDrawState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn policy(&self) -> MaterializationPolicy {
        self.policy
    }

    /// The materialized texture, if any.
    pub fn backend_texture(&self) -> Option<BackendTexture> {
        self.state().backend_texture.clone()
    }

    pub fn is_materialized(&self) -> bool {
        self.state().has_valid_texture()
    }

    pub fn read_count(&self) -> usize {
        self.state().read_count
    }

    pub fn is_being_written(&self) -> bool {
        self.state().is_write
    }

    /// Number of recorded ops, or `None` before the first write.
    pub fn recorded_op_count(&self) -> Option<usize> {
        self.state().paint_op_buffer.as_ref().map(SharedPaintOpBuffer::len)
    }

    fn begin_raster_write_access(
        &self,
        context_state: Arc<SharedContextState>,
        params: RasterWriteParams,
    ) -> Result<SharedPaintOpBuffer, Error> {
        let (buffer, released) = {
            let mut state = self.state();
            if state.read_count > 0 {
                tracing::error!(mailbox = %self.props.mailbox, "the backing is being read");
                return Err(Error::BackingBeingRead);
            }
            if state.is_write {
                tracing::error!(mailbox = %self.props.mailbox, "the backing is being written");
                return Err(Error::BackingBeingWritten);
            }
            if state.context_state.as_ref().is_some_and(|c| !Arc::ptr_eq(c, &context_state)) {
                tracing::warn!(
                    mailbox = %self.props.mailbox,
                    "raster write from a different context"
                );
            }

            state.is_write = true;
            let released = state.reset_paint_op_buffer();
            state.destroy_backend_texture();

            let buffer = state.paint_op_buffer.get_or_insert_with(SharedPaintOpBuffer::new).clone();
            state.context_state = Some(context_state);
            state.final_msaa_count = params.final_msaa_count.max(1);
            state.surface_props = params.surface_props;
            state.clear_color = params.clear_color;
            state.visible = params.visible;
            (buffer, released)
        };
        if let Some(callback) = released {
            callback();
        }
        Ok(buffer)
    }

    fn end_raster_write_access(&self, callback: Option<ReleaseCallback>) -> Result<(), Error> {
        let run_now = {
            let mut state = self.state();
            if !state.is_write {
                return Err(Error::AccessNotBegun {
                    expected: AccessMode::Write,
                    actual: AccessMode::None,
                });
            }
            debug_assert_eq!(state.read_count, 0);
            state.is_write = false;

            let complex = state
                .paint_op_buffer
                .as_ref()
                .is_some_and(|b| b.with(|b| self.policy.is_complex(b)));
            if state.visible && complex {
                tracing::debug!(
                    mailbox = %self.props.mailbox,
                    "materializing complex content eagerly"
                );
                match state.create_backend_texture_and_flush_paint_ops(&self.props, true) {
                    Ok(()) => callback,
                    Err(e) => {
                        // Reads will retry materialization; keep the ops alive until then.
                        tracing::warn!(error = %e, "eager materialization failed");
                        state.release_callback = callback;
                        None
                    }
                }
            } else {
                state.release_callback = callback;
                None
            }
        };
        if let Some(callback) = run_now {
            callback();
        }
        Ok(())
    }

    fn begin_raster_read_access(&self) -> Result<Option<RasterReadAccess>, Error> {
        let mut state = self.state();
        if state.is_write {
            tracing::error!(mailbox = %self.props.mailbox, "the backing is being written");
            return Err(Error::BackingBeingWritten);
        }
        if state.has_valid_texture() {
            return Ok(None);
        }
        let buffer = state.paint_op_buffer.get_or_insert_with(SharedPaintOpBuffer::new).clone();
        if buffer.with(|b| self.policy.is_complex(b)) {
            return Ok(None);
        }
        state.read_count += 1;
        Ok(Some(RasterReadAccess { paint_op_buffer: buffer, clear_color: state.clear_color }))
    }

    fn begin_skia_read_access(&self) -> Result<PromiseTexture, Error> {
        let mut state = self.state();
        if state.is_write {
            tracing::error!(mailbox = %self.props.mailbox, "the backing is being written");
            return Err(Error::BackingBeingWritten);
        }
        if !state.has_valid_texture() {
            state.destroy_backend_texture();
            state.create_backend_texture_and_flush_paint_ops(&self.props, false)?;
        }
        let promise = state.promise_texture.clone().ok_or(Error::NoContextState)?;
        state.read_count += 1;
        Ok(promise)
    }

    fn end_read_access(&self) -> Result<(), Error> {
        let released = {
            let mut state = self.state();
            if state.read_count == 0 {
                return Err(Error::AccessNotBegun {
                    expected: AccessMode::Read,
                    actual: AccessMode::None,
                });
            }
            state.read_count -= 1;
            // With a texture in hand and nobody replaying, the ops have served their purpose.
            if state.read_count == 0 && state.has_valid_texture() {
                state.reset_paint_op_buffer()
            } else {
                None
            }
        };
        if let Some(callback) = released {
            callback();
        }
        Ok(())
    }

    fn adopt_context_state(&self, context_state: Arc<SharedContextState>) {
        let mut state = self.state();
        match &state.context_state {
            None => state.context_state = Some(context_state),
            Some(existing) if !Arc::ptr_eq(existing, &context_state) => {
                tracing::warn!(
                    mailbox = %self.props.mailbox,
                    "skia representation from a different context"
                );
            }
            Some(_) => {}
        }
    }
}

impl Drop for RawDrawImageBacking {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let released = state.reset_paint_op_buffer();
        state.destroy_backend_texture();
        if let Some(callback) = released {
            callback();
        }
    }
}

impl SharedImageBacking for RawDrawImageBacking {
    fn properties(&self) -> &BackingProperties {
        &self.props
    }

    fn backing_type(&self) -> BackingType {
        BackingType::RawDraw
    }

    fn clear_tracker(&self) -> &ClearTracker {
        &self.clear_tracker
    }

    fn estimated_size_for_mem_tracking(&self) -> u64 {
        if self.is_materialized() { self.full_size } else { 0 }
    }

    fn update(&self, _in_fence: Option<GpuFence>) -> Result<(), Error> {
        Err(Error::NotImplemented("update"))
    }

    fn on_memory_dump(
        &self,
        dump_name: &str,
        client_guid: MemoryAllocatorDumpGuid,
        pmd: &mut ProcessMemoryDump,
        _client_tracing_id: u64,
    ) {
        add_backing_dump(self, dump_name, client_guid, pmd);
        let Some(texture) = self.backend_texture() else {
            return;
        };
        let backing_guid = MemoryAllocatorDumpGuid::from_name(dump_name);
        let texture_guid =
            MemoryAllocatorDumpGuid::from_name(&format!("gpu/backend_texture/{}", texture.id()));
        let shared = pmd.create_shared_global_allocator_dump(texture_guid);
        shared.add_scalar(ATTR_SIZE, DumpAttribute::Bytes(self.full_size));
        pmd.add_ownership_edge(backing_guid, texture_guid, OWNING_EDGE_IMPORTANCE);
    }

    fn produce_raster(
        self: Arc<Self>,
        produce: ProduceContext,
    ) -> Result<Box<dyn RasterRepresentation>, Error> {
        Ok(Box::new(RawDrawRasterRepresentation {
            base: RepresentationBase::new(&self, produce),
            writing: false,
            reads: 0,
        }))
    }

    fn produce_skia(
        self: Arc<Self>,
        produce: ProduceContext,
        context_state: Arc<SharedContextState>,
    ) -> Result<Box<dyn SkiaRepresentation>, Error> {
        self.adopt_context_state(context_state);
        Ok(Box::new(RawDrawSkiaRepresentation {
            base: RepresentationBase::new(&self, produce),
            reads: 0,
        }))
    }
}

#[derive(Debug)]
pub struct RawDrawRasterRepresentation {
    base: RepresentationBase<RawDrawImageBacking>,
    writing: bool,
    reads: usize,
}

impl RawDrawRasterRepresentation {
    fn current_mode(&self) -> AccessMode {
        if self.writing {
            AccessMode::Write
        } else if self.reads > 0 {
            AccessMode::Read
        } else {
            AccessMode::None
        }
    }
}

impl Representation for RawDrawRasterRepresentation {
    fn mailbox(&self) -> crate::mailbox::Mailbox {
        self.base.mailbox()
    }

    fn kind(&self) -> RepresentationKind {
        RepresentationKind::Raster
    }

    fn access_mode(&self) -> AccessMode {
        self.current_mode()
    }

    fn properties(&self) -> Result<BackingProperties, Error> {
        self.base.properties()
    }
}

impl RasterRepresentation for RawDrawRasterRepresentation {
    fn begin_write_access(
        &mut self,
        context_state: Arc<SharedContextState>,
        params: RasterWriteParams,
    ) -> Result<SharedPaintOpBuffer, Error> {
        let buffer = self.base.backing()?.begin_raster_write_access(context_state, params)?;
        self.writing = true;
        Ok(buffer)
    }

    fn end_write_access(&mut self, callback: Option<ReleaseCallback>) -> Result<(), Error> {
        if !self.writing {
            return Err(Error::AccessNotBegun {
                expected: AccessMode::Write,
                actual: self.current_mode(),
            });
        }
        self.writing = false;
        self.base.backing()?.end_raster_write_access(callback)
    }

    fn begin_read_access(&mut self) -> Result<Option<RasterReadAccess>, Error> {
        let access = self.base.backing()?.begin_raster_read_access()?;
        if access.is_some() {
            self.reads += 1;
        }
        Ok(access)
    }

    fn end_read_access(&mut self) -> Result<(), Error> {
        if self.reads == 0 {
            return Err(Error::AccessNotBegun {
                expected: AccessMode::Read,
                actual: self.current_mode(),
            });
        }
        self.reads -= 1;
        self.base.backing()?.end_read_access()
    }
}

impl Drop for RawDrawRasterRepresentation {
    fn drop(&mut self) {
        let mode = self.current_mode();
        if mode == AccessMode::None {
            return;
        }
        report_open_access_on_drop(self.base.mailbox(), RepresentationKind::Raster, mode);
        let Ok(backing) = self.base.backing() else {
            return;
        };
        if self.writing {
            let _ = backing.end_raster_write_access(None);
        }
        for _ in 0..self.reads {
            let _ = backing.end_read_access();
        }
    }
}

/// Read-only Skia view: materializes on first read.
#[derive(Debug)]
pub struct RawDrawSkiaRepresentation {
    base: RepresentationBase<RawDrawImageBacking>,
    reads: usize,
}

impl Representation for RawDrawSkiaRepresentation {
    fn mailbox(&self) -> crate::mailbox::Mailbox {
        self.base.mailbox()
    }

    fn kind(&self) -> RepresentationKind {
        RepresentationKind::Skia
    }

    fn access_mode(&self) -> AccessMode {
        if self.reads > 0 { AccessMode::Read } else { AccessMode::None }
    }

    fn properties(&self) -> Result<BackingProperties, Error> {
        self.base.properties()
    }
}

impl SkiaRepresentation for RawDrawSkiaRepresentation {
    fn begin_write_access(
        &mut self,
        _params: &SkiaWriteParams,
    ) -> Result<SkiaAccess<SurfaceHandle>, Error> {
        Err(Error::NotImplemented("skia write access to raw-draw images"))
    }

    fn begin_write_access_promise(&mut self) -> Result<SkiaAccess<PromiseTexture>, Error> {
        Err(Error::NotImplemented("skia write access to raw-draw images"))
    }

    fn end_write_access(&mut self) -> Result<(), Error> {
        Err(Error::NotImplemented("skia write access to raw-draw images"))
    }

    fn begin_read_access(&mut self) -> Result<SkiaAccess<PromiseTexture>, Error> {
        let promise = self.base.backing()?.begin_skia_read_access()?;
        self.reads += 1;
        Ok(SkiaAccess::new(promise))
    }

    fn end_read_access(&mut self) -> Result<(), Error> {
        if self.reads == 0 {
            return Err(Error::AccessNotBegun {
                expected: AccessMode::Read,
                actual: AccessMode::None,
            });
        }
        self.reads -= 1;
        self.base.backing()?.end_read_access()
    }

    fn supports_multiple_concurrent_read_access(&self) -> bool {
        true
    }
}

impl Drop for RawDrawSkiaRepresentation {
    fn drop(&mut self) {
        if self.reads == 0 {
            return;
        }
        report_open_access_on_drop(self.base.mailbox(), RepresentationKind::Skia, AccessMode::Read);
        if let Ok(backing) = self.base.backing() {
            for _ in 0..self.reads {
                let _ = backing.end_read_access();
            }
        }
    }
}

/// Creates [`RawDrawImageBacking`]s for requests that ask for raw draw.
#[derive(Debug, Clone)]
pub struct RawDrawImageBackingFactory {
    policy: MaterializationPolicy,
    max_texture_size: u32,
}

impl RawDrawImageBackingFactory {
    pub fn new(policy: MaterializationPolicy, max_texture_size: u32) -> Self {
        RawDrawImageBackingFactory { policy, max_texture_size }
    }
}

impl SharedImageBackingFactory for RawDrawImageBackingFactory {
    fn name(&self) -> &'static str {
        "RawDraw"
    }

    fn is_supported(
        &self,
        request: &SharedImageRequest,
        pixel_data: Option<&[u8]>,
        has_gmb: bool,
    ) -> bool {
        let usage = request.usage;
        usage.contains(Usage::RAW_DRAW | Usage::OOP_RASTERIZATION)
            && !usage.intersects(Usage::SCANOUT | Usage::WEBGPU | Usage::GLES2 | Usage::CPU_UPLOAD)
            && pixel_data.is_none_or(<[u8]>::is_empty)
            && !has_gmb
            && request.format.is_single_plane()
            && !request.size.is_empty()
            && request.size.width <= self.max_texture_size
            && request.size.height <= self.max_texture_size
    }

    fn create_shared_image(
        &self,
        request: &SharedImageRequest,
    ) -> Result<Arc<dyn SharedImageBacking>, Error> {
        let backing = RawDrawImageBacking::new(
            request.mailbox,
            request.format,
            request.size,
            request.color_space,
            request.surface_origin,
            request.alpha_type,
            request.usage,
            self.policy,
        )?;
        Ok(Arc::new(backing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SharedImageConfig;
    use crate::geometry::{Rect, Size};
    use crate::imp::SoftwareBackend;
    use crate::mailbox::Mailbox;
    use crate::memory::MemoryTypeTracker;
    use crate::paint::PaintOp;

    fn setup(policy: MaterializationPolicy) -> (Arc<RawDrawImageBacking>, Arc<SharedContextState>) {
        let ctx =
            SharedContextState::new(Arc::new(SoftwareBackend::gl()), SharedImageConfig::default());
        let backing = RawDrawImageBacking::new(
            Mailbox::generate(),
            SharedImageFormat::RGBA_8888,
            Size::new(4, 4),
            ColorSpace::srgb(),
            SurfaceOrigin::TopLeft,
            AlphaType::Premultiplied,
            Usage::RAW_DRAW | Usage::OOP_RASTERIZATION | Usage::DISPLAY_READ,
            policy,
        )
        .unwrap();
        (Arc::new(backing), ctx)
    }

    fn produce() -> ProduceContext {
        ProduceContext::detached(Arc::new(MemoryTypeTracker::new()))
    }

    #[test]
    fn raster_read_after_materialization_falls_back() {
        let (backing, ctx) = setup(MaterializationPolicy::default());
        let mut raster = backing.clone().produce_raster(produce()).unwrap();
        let buffer = raster.begin_write_access(ctx.clone(), RasterWriteParams::default()).unwrap();
        buffer.push(PaintOp::DrawRect { rect: Rect::new(0, 0, 2, 2), color: Color4f::BLUE });
        raster.end_write_access(None).unwrap();
        assert!(!backing.is_materialized());
        assert_eq!(backing.estimated_size_for_mem_tracking(), 0);

        let mut skia = backing.clone().produce_skia(produce(), ctx).unwrap();
        let access = skia.begin_read_access().unwrap();
        assert_eq!(access.handle.backend_texture().read_pixel(0, 0), Some([0, 0, 255, 255]));
        skia.end_read_access().unwrap();
        assert_eq!(backing.estimated_size_for_mem_tracking(), 64);
        assert!(raster.begin_read_access().unwrap().is_none());
        // ops were dropped once the last reader of the texture finished
        assert_eq!(backing.recorded_op_count(), Some(0));
    }

    #[test]
    fn buffer_reset_drops_clear_color() {
        let (backing, ctx) = setup(MaterializationPolicy::default());
        let mut raster = backing.clone().produce_raster(produce()).unwrap();
        let params =
            RasterWriteParams { clear_color: Some(Color4f::RED), ..RasterWriteParams::default() };
        let _ = raster.begin_write_access(ctx.clone(), params).unwrap();
        raster.end_write_access(None).unwrap();
        assert_eq!(backing.state().clear_color, Some(Color4f::RED));

        let mut skia = backing.clone().produce_skia(produce(), ctx).unwrap();
        let access = skia.begin_read_access().unwrap();
        assert_eq!(access.handle.backend_texture().read_pixel(0, 0), Some([255, 0, 0, 255]));
        skia.end_read_access().unwrap();
        assert_eq!(backing.recorded_op_count(), Some(0));
        assert_eq!(backing.state().clear_color, None);
    }

    #[test]
    fn skia_read_without_context_fails() {
        let (backing, _ctx) = setup(MaterializationPolicy::default());
        assert!(matches!(backing.begin_skia_read_access(), Err(Error::NoContextState)));
    }

    #[test]
    fn unbalanced_end_is_rejected() {
        let (backing, _ctx) = setup(MaterializationPolicy::default());
        let mut raster = backing.clone().produce_raster(produce()).unwrap();
        assert!(matches!(raster.end_read_access(), Err(Error::AccessNotBegun { .. })));
        assert!(matches!(raster.end_write_access(None), Err(Error::AccessNotBegun { .. })));
    }

    #[test]
    fn dropping_rep_ends_open_write() {
        let (backing, ctx) = setup(MaterializationPolicy::default());
        let mut raster = backing.clone().produce_raster(produce()).unwrap();
        let _ = raster.begin_write_access(ctx, RasterWriteParams::default()).unwrap();
        assert!(backing.is_being_written());
        drop(raster);
        assert!(!backing.is_being_written());
    }
}
