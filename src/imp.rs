// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Graphics backends.
//!
//! Backings never talk to a graphics API directly; they go through a
//! [`GraphicsBackend`] owned by the [`crate::context_state::SharedContextState`].
//! The software backend is always available and is what tests run against.  The wgpu
//! backend (feature `backend_wgpu`) mirrors materialized textures into real GPU memory.

use crate::error::Error;
use crate::format::ResourceFormat;
use crate::geometry::Size;
use crate::software::Pixmap;
use crate::usage::Usage;
use std::fmt::Debug;

mod software;
pub use software::SoftwareBackend;

#[cfg(feature = "backend_wgpu")]
mod wgpu;
#[cfg(feature = "backend_wgpu")]
pub use self::wgpu::WgpuBackend;

/// Which graphics API a context drives.  Representations use this to decide which
/// API-specific path (GL texture, Vulkan image) they are talking to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextType {
    Gl,
    Vulkan,
    Wgpu,
}

#[derive(Debug, Clone)]
pub struct NativeTextureDescriptor {
    pub label: String,
    pub size: Size,
    pub format: ResourceFormat,
    pub mipmapped: bool,
    pub usage: Usage,
}

/// A backend-owned texture object.
#[derive(Debug, Clone)]
pub enum NativeTexture {
    Software { id: u64 },
    #[cfg(feature = "backend_wgpu")]
    Wgpu(::wgpu::Texture),
}

/// The driver boundary.  Implementations must be usable from any thread.
pub trait GraphicsBackend: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    fn context_type(&self) -> ContextType;

    fn max_texture_size(&self) -> u32;

    /// True once the underlying device is gone.  Never resets.
    fn is_lost(&self) -> bool;

    fn create_texture(&self, descriptor: &NativeTextureDescriptor) -> Result<NativeTexture, Error>;

    /// Copies `pixels` into `texture`, converting to `format`.
    fn upload(
        &self,
        texture: &NativeTexture,
        pixels: &Pixmap,
        format: ResourceFormat,
    ) -> Result<(), Error>;

    fn destroy_texture(&self, texture: NativeTexture);

    /// Submits pending work and returns its serial.  Serials increase monotonically.
    fn submit(&self) -> Result<u64, Error>;

    /// The newest serial whose work has completed on the GPU.
    fn completed_serial(&self) -> u64;
}
