// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Drawing surfaces over backend textures.

use crate::color::{AlphaType, ColorSpace, SurfaceOrigin};
use crate::error::Error;
use crate::software::Canvas;
use crate::texture::BackendTexture;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelGeometry {
    #[default]
    Unknown,
    RgbHorizontal,
    BgrHorizontal,
}

/// Properties that change how text and dithering are rasterized.  Two surfaces
/// with different props are not interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SurfaceProps {
    pub use_device_independent_fonts: bool,
    pub pixel_geometry: PixelGeometry,
}

/// A canvas whose pixels land in a [`BackendTexture`].
///
/// The canvas starts from the texture's pixels.  With a sample count above 1 it draws
/// into a separate multisample buffer, and nothing reaches the texture until
/// [`Surface::resolve_msaa`] or [`Surface::flush`].
#[derive(Debug)]
pub struct Surface {
    texture: BackendTexture,
    props: SurfaceProps,
    sample_count: u32,
    origin: SurfaceOrigin,
    alpha_type: AlphaType,
    color_space: ColorSpace,
    canvas: Canvas,
}

impl Surface {
    pub fn from_backend_texture(
        texture: &BackendTexture,
        origin: SurfaceOrigin,
        sample_count: u32,
        color_space: ColorSpace,
        alpha_type: AlphaType,
        props: SurfaceProps,
    ) -> Result<Surface, Error> {
        if !texture.is_valid() {
            return Err(Error::SurfaceCreationFailed(format!(
                "{} is not a valid texture",
                texture.label()
            )));
        }
        if !color_space.is_valid() {
            return Err(Error::SurfaceCreationFailed(format!(
                "unsupported color space {color_space}"
            )));
        }
        let base = texture.read_pixels();
        Ok(Surface {
            texture: texture.clone(),
            props,
            sample_count: sample_count.max(1),
            origin,
            alpha_type,
            color_space,
            canvas: Canvas::new(base),
        })
    }

    pub fn canvas(&mut self) -> &mut Canvas {
        &mut self.canvas
    }

    pub fn texture(&self) -> &BackendTexture {
        &self.texture
    }

    pub fn props(&self) -> SurfaceProps {
        self.props
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn origin(&self) -> SurfaceOrigin {
        self.origin
    }

    pub fn alpha_type(&self) -> AlphaType {
        self.alpha_type
    }

    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    /// Reloads the canvas from the texture, dropping anything not yet flushed.
    /// Only valid between accesses, when the save count is back at 1.
    pub fn reload_from_texture(&mut self) {
        debug_assert_eq!(self.canvas.save_count(), 1);
        self.canvas = Canvas::new(self.texture.read_pixels());
    }

    /// Copies the canvas into the texture's pixels without touching the native texture.
    pub fn resolve_msaa(&mut self) -> Result<(), Error> {
        self.texture.write_pixels(self.canvas.pixels(), false)
    }

    /// Resolves and uploads to the native texture.
    pub fn flush(&mut self) -> Result<(), Error> {
        self.texture.write_pixels(self.canvas.pixels(), true)
    }
}

/// A shared, lockable surface.  The per-context cache holds one clone; representations
/// hold another for the duration of an access.
#[derive(Debug, Clone)]
pub struct SurfaceHandle(Arc<Mutex<Surface>>);

impl SurfaceHandle {
    pub fn new(surface: Surface) -> Self {
        SurfaceHandle(Arc::new(Mutex::new(surface)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Surface> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ptr_eq(&self, other: &SurfaceHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live handles to this surface.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color4f;
    use crate::format::ResourceFormat;
    use crate::geometry::{Rect, Size};
    use crate::imp::{GraphicsBackend, SoftwareBackend};
    use crate::software::Pixmap;
    use crate::usage::Usage;

    fn texture() -> BackendTexture {
        let backend: Arc<dyn GraphicsBackend> = Arc::new(SoftwareBackend::gl());
        BackendTexture::create(
            &backend,
            Size::new(4, 4),
            ResourceFormat::Rgba8888,
            false,
            Usage::RASTER,
            "s",
        ).unwrap()
    }

    #[test]
    fn msaa_draws_reach_texture_on_resolve() {
        let t = texture();
        let mut s = Surface::from_backend_texture(
            &t,
            SurfaceOrigin::TopLeft,
            4,
            ColorSpace::srgb(),
            AlphaType::Premultiplied,
            SurfaceProps::default(),
        ).unwrap();
        s.canvas().clear(Color4f::GREEN);
        assert_eq!(t.read_pixel(0, 0), Some([0, 0, 0, 0]));
        s.resolve_msaa().unwrap();
        assert_eq!(t.read_pixel(0, 0), Some([0, 255, 0, 255]));
    }

    #[test]
    fn reload_picks_up_texture_writes() {
        let t = texture();
        let mut s = Surface::from_backend_texture(
            &t,
            SurfaceOrigin::TopLeft,
            1,
            ColorSpace::srgb(),
            AlphaType::Premultiplied,
            SurfaceProps::default(),
        ).unwrap();
        s.canvas().clear(Color4f::RED);
        s.flush().unwrap();

        let blue = Pixmap::new(4, 4, [0, 0, 255, 255]);
        t.write_pixels(&blue, true).unwrap();
        s.reload_from_texture();
        s.canvas().draw_rect(Rect::new(0, 0, 1, 1), Color4f::GREEN);
        s.flush().unwrap();
        assert_eq!(t.read_pixel(0, 0), Some([0, 255, 0, 255]));
        assert_eq!(t.read_pixel(3, 3), Some([0, 0, 255, 255]));
    }

    #[test]
    fn invalid_color_space_rejected() {
        let t = texture();
        let r = Surface::from_backend_texture(
            &t,
            SurfaceOrigin::TopLeft,
            1,
            ColorSpace::invalid(),
            AlphaType::Premultiplied,
            SurfaceProps::default(),
        );
        assert!(matches!(r, Err(Error::SurfaceCreationFailed(_))));
    }
}
