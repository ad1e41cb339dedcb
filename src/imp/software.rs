// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use crate::error::Error;
use crate::format::ResourceFormat;
use crate::imp::{ContextType, GraphicsBackend, NativeTexture, NativeTextureDescriptor};
use crate::software::Pixmap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// A backend with no GPU at all.
///
/// Textures are bookkeeping entries holding the last uploaded bytes.  Submitted work
/// completes immediately unless the backend was built with
/// [`SoftwareBackend::with_manual_completion`], in which case [`SoftwareBackend::complete_all`]
/// plays the role of the GPU finishing.
#[derive(Debug)]
pub struct SoftwareBackend {
    context_type: ContextType,
    max_texture_size: u32,
    manual_completion: bool,
    lost: AtomicBool,
    fail_texture_creation: AtomicBool,
    next_texture: AtomicU64,
    submitted: AtomicU64,
    completed: AtomicU64,
    textures: Mutex<HashMap<u64, Vec<u8>>>,
}

impl SoftwareBackend {
    pub fn new(context_type: ContextType) -> Self {
        SoftwareBackend {
            context_type,
            max_texture_size: 16384,
            manual_completion: false,
            lost: AtomicBool::new(false),
            fail_texture_creation: AtomicBool::new(false),
            next_texture: AtomicU64::new(1),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            textures: Mutex::new(HashMap::new()),
        }
    }

    pub fn gl() -> Self {
        Self::new(ContextType::Gl)
    }

    pub fn vulkan() -> Self {
        Self::new(ContextType::Vulkan)
    }

    pub fn with_manual_completion(mut self) -> Self {
        self.manual_completion = true;
        self
    }

    pub fn with_max_texture_size(mut self, size: u32) -> Self {
        self.max_texture_size = size;
        self
    }

    /// Marks every submitted serial complete.
    pub fn complete_all(&self) {
        self.completed.store(self.submitted.load(Ordering::Acquire), Ordering::Release);
    }

    /// Simulates device loss.
    pub fn lose_device(&self) {
        self.lost.store(true, Ordering::Release);
    }

    /// Makes subsequent texture creation fail, as an out-of-memory driver would.
    pub fn set_fail_texture_creation(&self, fail: bool) {
        self.fail_texture_creation.store(fail, Ordering::Release);
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Bytes last uploaded to the texture with `id`.
    pub fn uploaded_bytes(&self, id: u64) -> Option<Vec<u8>> {
        self.textures.lock().unwrap_or_else(PoisonError::into_inner).get(&id).cloned()
    }
}

impl GraphicsBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "software"
    }

    fn context_type(&self) -> ContextType {
        self.context_type
    }

    fn max_texture_size(&self) -> u32 {
        self.max_texture_size
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    fn create_texture(&self, descriptor: &NativeTextureDescriptor) -> Result<NativeTexture, Error> {
        if self.is_lost() {
            return Err(Error::ContextLost);
        }
        if self.fail_texture_creation.load(Ordering::Acquire) {
            return Err(Error::TextureCreationFailed(format!(
                "{}: out of memory",
                descriptor.label
            )));
        }
        let max = self.max_texture_size;
        if descriptor.size.is_empty()
            || descriptor.size.width > max
            || descriptor.size.height > max
        {
            return Err(Error::InvalidSize {
                width: descriptor.size.width,
                height: descriptor.size.height,
            });
        }
        let id = self.next_texture.fetch_add(1, Ordering::Relaxed);
        self.textures.lock().unwrap_or_else(PoisonError::into_inner).insert(id, Vec::new());
        tracing::trace!(id, label = %descriptor.label, "software texture created");
        Ok(NativeTexture::Software { id })
    }

    fn upload(
        &self,
        texture: &NativeTexture,
        pixels: &Pixmap,
        format: ResourceFormat,
    ) -> Result<(), Error> {
        match texture {
            NativeTexture::Software { id } => {
                let mut textures = self.textures.lock().unwrap_or_else(PoisonError::into_inner);
                let slot = textures
                    .get_mut(id)
                    .ok_or_else(|| {
                        Error::TextureCreationFailed(format!("texture {id} was destroyed"))
                    })?;
                *slot = pixels.to_bytes(format);
                Ok(())
            }
            #[cfg(feature = "backend_wgpu")]
            NativeTexture::Wgpu(_) => Err(Error::NotImplemented(
                "uploading a wgpu texture through the software backend",
            )),
        }
    }

    fn destroy_texture(&self, texture: NativeTexture) {
        if let NativeTexture::Software { id } = texture {
            self.textures.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
        }
    }

    fn submit(&self) -> Result<u64, Error> {
        if self.is_lost() {
            return Err(Error::ContextLost);
        }
        let serial = self.submitted.fetch_add(1, Ordering::AcqRel) + 1;
        if !self.manual_completion {
            self.completed.store(serial, Ordering::Release);
        }
        Ok(serial)
    }

    fn completed_serial(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }
}
