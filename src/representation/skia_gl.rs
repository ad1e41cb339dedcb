// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Skia drawing on top of a GL passthrough representation.
//!
//! The GL representation does the access bookkeeping; this type adds a drawing
//! surface over the same texture.  Backings without a native Skia path produce one of
//! these from their GL representation.

use crate::backing::{BackingProperties, SharedImageBacking};
use crate::context_state::SharedContextState;
use crate::error::Error;
use crate::mailbox::Mailbox;
use crate::representation::{
    AccessMode, GlAccessMode, GlTexturePassthroughRepresentation, ProduceContext, Representation,
    RepresentationBase, RepresentationKind, SkiaAccess, SkiaRepresentation, SkiaWriteParams,
    report_open_access_on_drop,
};
use crate::surface::{Surface, SurfaceHandle};
use crate::texture::PromiseTexture;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

pub struct SkiaGlImageRepresentation<B: ?Sized> {
    base: RepresentationBase<B>,
    gl_representation: Box<dyn GlTexturePassthroughRepresentation>,
    promise_texture: PromiseTexture,
    context_state: Arc<SharedContextState>,
    write_surface: Option<SurfaceHandle>,
    mode: AccessMode,
}

impl<B: ?Sized> Debug for SkiaGlImageRepresentation<B> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkiaGlImageRepresentation")
            .field("base", &self.base)
            .field("texture", &self.promise_texture.id())
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl<B: SharedImageBacking + ?Sized> SkiaGlImageRepresentation<B> {
    /// Wraps `gl_representation`.  Fails if its texture cannot be sampled by Skia.
    pub fn create(
        gl_representation: Box<dyn GlTexturePassthroughRepresentation>,
        context_state: Arc<SharedContextState>,
        backing: &Arc<B>,
        produce: ProduceContext,
    ) -> Result<Self, Error> {
        let passthrough = gl_representation.texture_passthrough(0)?;
        let promise_texture = PromiseTexture::make(&passthrough.texture)
            .ok_or_else(|| {
                Error::TextureCreationFailed(format!(
                    "GL texture {} is gone",
                    passthrough.service_id
                ))
            })?;
        Ok(SkiaGlImageRepresentation {
            base: RepresentationBase::new(backing, produce),
            gl_representation,
            promise_texture,
            context_state,
            write_surface: None,
            mode: AccessMode::None,
        })
    }

    pub fn base(&self) -> &RepresentationBase<B> {
        &self.base
    }

    fn check_no_access(&self) -> Result<(), Error> {
        match self.mode {
            AccessMode::None => Ok(()),
            mode => Err(Error::AccessAlreadyInProgress(mode)),
        }
    }

    fn finish_write(&mut self) -> Result<(), Error> {
        if let Some(surface) = self.write_surface.take() {
            let mut surface = surface.lock();
            surface.canvas().restore_to_count(1);
            // GL samples the texture directly, so the canvas must land in it now.
            surface.flush()?;
        }
        self.gl_representation.end_access()
    }
}

impl<B: SharedImageBacking + ?Sized> Representation for SkiaGlImageRepresentation<B> {
    fn mailbox(&self) -> Mailbox {
        self.base.mailbox()
    }

    fn kind(&self) -> RepresentationKind {
        RepresentationKind::Skia
    }

    fn access_mode(&self) -> AccessMode {
        self.mode
    }

    fn properties(&self) -> Result<BackingProperties, Error> {
        self.base.properties()
    }
}

impl<B: SharedImageBacking + ?Sized> SkiaRepresentation for SkiaGlImageRepresentation<B> {
    fn begin_write_access(
        &mut self,
        params: &SkiaWriteParams,
    ) -> Result<SkiaAccess<SurfaceHandle>, Error> {
        self.check_no_access()?;
        if self.context_state.is_abandoned() {
            return Err(Error::ContextLost);
        }
        let props = self.base.properties()?;
        self.gl_representation.begin_access(GlAccessMode::ReadWrite)?;
        let surface = match Surface::from_backend_texture(
            self.promise_texture.backend_texture(),
            props.surface_origin,
            params.final_msaa_count,
            props.color_space,
            props.alpha_type,
            params.surface_props,
        ) {
            Ok(surface) => SurfaceHandle::new(surface),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    mailbox = %self.base.mailbox(),
                    "could not wrap GL texture in a surface"
                );
                self.gl_representation.end_access()?;
                return Err(e);
            }
        };
        let count = surface.lock().canvas().save();
        debug_assert_eq!(count, 1);
        self.write_surface = Some(surface.clone());
        self.mode = AccessMode::Write;
        Ok(SkiaAccess::new(surface))
    }

    fn begin_write_access_promise(&mut self) -> Result<SkiaAccess<PromiseTexture>, Error> {
        self.check_no_access()?;
        self.gl_representation.begin_access(GlAccessMode::ReadWrite)?;
        self.mode = AccessMode::Write;
        Ok(SkiaAccess::new(self.promise_texture.clone()))
    }

    fn end_write_access(&mut self) -> Result<(), Error> {
        if self.mode != AccessMode::Write {
            return Err(Error::AccessNotBegun { expected: AccessMode::Write, actual: self.mode });
        }
        self.mode = AccessMode::None;
        self.finish_write()
    }

    fn begin_read_access(&mut self) -> Result<SkiaAccess<PromiseTexture>, Error> {
        self.check_no_access()?;
        self.gl_representation.begin_access(GlAccessMode::Read)?;
        self.mode = AccessMode::Read;
        Ok(SkiaAccess::new(self.promise_texture.clone()))
    }

    fn end_read_access(&mut self) -> Result<(), Error> {
        if self.mode != AccessMode::Read {
            return Err(Error::AccessNotBegun { expected: AccessMode::Read, actual: self.mode });
        }
        self.mode = AccessMode::None;
        self.gl_representation.end_access()
    }
}

impl<B: ?Sized> Drop for SkiaGlImageRepresentation<B> {
    fn drop(&mut self) {
        if self.mode == AccessMode::None {
            return;
        }
        report_open_access_on_drop(self.base.mailbox(), RepresentationKind::Skia, self.mode);
        if let Some(surface) = self.write_surface.take() {
            surface.lock().canvas().restore_to_count(1);
        }
        // the GL representation ends its own access when it drops right after this
        self.mode = AccessMode::None;
    }
}
