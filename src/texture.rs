// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! Backend textures and promise textures.

A [`BackendTexture`] is the materialized GPU side of a shared image: a backend-native
texture object plus a CPU shadow of its pixels (which is what the software backend and
the tests read back).  It also carries the Vulkan-style mutable state: image layout and
owning queue family.  Interop code that hands an image to a foreign API must move it
to [`QueueFamily::External`] first.

Cloning a `BackendTexture` is cheap and shares the same texture.  The native texture is
released by [`BackendTexture::destroy`] or when the last clone drops.
*/

use crate::error::Error;
use crate::format::ResourceFormat;
use crate::geometry::Size;
use crate::imp::{GraphicsBackend, NativeTexture, NativeTextureDescriptor};
use crate::software::Pixmap;
use crate::usage::Usage;
use std::fmt::{Debug, Display, Formatter};
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(u64);

impl Display for TextureId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "texture#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    #[default]
    Undefined,
    General,
    ColorAttachment,
    ShaderReadOnly,
}

/// Which queue family currently owns the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueueFamily {
    /// Owned by this context's queue.
    #[default]
    Local,
    /// Released to another API or process.
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MutableTextureState {
    pub layout: ImageLayout,
    pub queue_family: QueueFamily,
}

struct Inner {
    id: TextureId,
    size: Size,
    format: ResourceFormat,
    mipmapped: bool,
    label: String,
    pixels: Mutex<Pixmap>,
    state: Mutex<MutableTextureState>,
    native: Mutex<Option<NativeTexture>>,
    backend: Arc<dyn GraphicsBackend>,
    destroyed: AtomicBool,
}

impl Inner {
    fn release_native(&self) {
        let native = self.native.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(native) = native {
            self.backend.destroy_texture(native);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.release_native();
    }
}

#[derive(Clone)]
pub struct BackendTexture(Arc<Inner>);

impl BackendTexture {
    /// Creates a texture of `size` through `backend`.  Pixels start transparent.
    pub fn create(
        backend: &Arc<dyn GraphicsBackend>,
        size: Size,
        format: ResourceFormat,
        mipmapped: bool,
        usage: Usage,
        label: &str,
    ) -> Result<BackendTexture, Error> {
        let native = backend.create_texture(&NativeTextureDescriptor {
            label: label.to_string(),
            size,
            format,
            mipmapped,
            usage,
        })?;
        Ok(BackendTexture(Arc::new(Inner {
            id: TextureId(NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed)),
            size,
            format,
            mipmapped,
            label: label.to_string(),
            pixels: Mutex::new(Pixmap::transparent(size.width, size.height)),
            state: Mutex::new(MutableTextureState::default()),
            native: Mutex::new(Some(native)),
            backend: backend.clone(),
            destroyed: AtomicBool::new(false),
        })))
    }

    pub fn id(&self) -> TextureId {
        self.0.id
    }

    pub fn size(&self) -> Size {
        self.0.size
    }

    pub fn format(&self) -> ResourceFormat {
        self.0.format
    }

    pub fn is_mipmapped(&self) -> bool {
        self.0.mipmapped
    }

    pub fn label(&self) -> &str {
        &self.0.label
    }

    /// False once [`BackendTexture::destroy`] ran.
    pub fn is_valid(&self) -> bool {
        !self.0.destroyed.load(Ordering::Acquire)
    }

    pub fn native(&self) -> Option<NativeTexture> {
        self.0.native.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Releases the native texture.  Idempotent; other clones observe `is_valid() == false`.
    pub fn destroy(&self) {
        if !self.0.destroyed.swap(true, Ordering::AcqRel) {
            tracing::trace!(
                texture = %self.0.id,
                label = %self.0.label,
                "destroying backend texture"
            );
            self.0.release_native();
        }
    }

    /// Premultiplied RGBA8 of one texel of the CPU shadow.
    pub fn read_pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.0.pixels.lock().unwrap_or_else(PoisonError::into_inner).get(x, y)
    }

    pub fn read_pixels(&self) -> Pixmap {
        self.0.pixels.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replaces the shadow pixels.  With `upload`, also pushes them to the native texture.
    pub fn write_pixels(&self, pixels: &Pixmap, upload: bool) -> Result<(), Error> {
        if !self.is_valid() {
            return Err(Error::TextureCreationFailed(format!("{} was destroyed", self.0.label)));
        }
        if (pixels.width(), pixels.height()) != (self.0.size.width, self.0.size.height) {
            return Err(Error::PixelDataMismatch {
                expected: self.0.size.area() as usize * 4,
                actual: pixels.texels().len() * 4,
            });
        }
        *self.0.pixels.lock().unwrap_or_else(PoisonError::into_inner) = pixels.clone();
        if upload {
            if let Some(native) = self.native() {
                self.0.backend.upload(&native, pixels, self.0.format)?;
            }
        }
        Ok(())
    }

    pub fn mutable_state(&self) -> MutableTextureState {
        *self.0.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_mutable_state(&self, state: MutableTextureState) {
        *self.0.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn set_queue_family(&self, queue_family: QueueFamily) {
        self.0.state.lock().unwrap_or_else(PoisonError::into_inner).queue_family = queue_family;
    }

    pub fn ptr_eq(&self, other: &BackendTexture) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Writes the CPU shadow as an 8-bit RGBA PNG.
    pub fn encode_png<W: Write>(&self, w: W) -> Result<(), Error> {
        let pixels = self.read_pixels();
        let mut encoder = png::Encoder::new(w, pixels.width(), pixels.height());
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&pixels.to_unpremultiplied_rgba8())?;
        writer.finish()?;
        Ok(())
    }
}

impl Debug for BackendTexture {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendTexture")
            .field("id", &self.0.id)
            .field("size", &self.0.size)
            .field("format", &self.0.format)
            .field("label", &self.0.label)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// A handle to a texture that a consumer may sample later without realizing it now.
#[derive(Debug, Clone)]
pub struct PromiseTexture {
    texture: BackendTexture,
}

impl PromiseTexture {
    pub fn make(texture: &BackendTexture) -> Option<PromiseTexture> {
        texture.is_valid().then(|| PromiseTexture { texture: texture.clone() })
    }

    pub fn backend_texture(&self) -> &BackendTexture {
        &self.texture
    }

    pub fn id(&self) -> TextureId {
        self.texture.id()
    }
}
