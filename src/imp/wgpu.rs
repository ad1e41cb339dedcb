// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use crate::error::Error;
use crate::format::ResourceFormat;
use crate::imp::{ContextType, GraphicsBackend, NativeTexture, NativeTextureDescriptor};
use crate::software::Pixmap;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use wgpu::{Extent3d, TexelCopyBufferLayout, TexelCopyTextureInfo};

/// Backend that mirrors every materialized texture into a `wgpu::Texture`.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    lost: Arc<AtomicBool>,
    submitted: AtomicU64,
    completed: Arc<AtomicU64>,
}

impl Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("lost", &self.lost.load(Ordering::Relaxed))
            .field("submitted", &self.submitted.load(Ordering::Relaxed))
            .field("completed", &self.completed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl WgpuBackend {
    /// Picks the default adapter and opens a device on it, blocking the calling thread.
    pub fn new() -> Result<Self, Error> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> Result<Self, Error> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::from_env_or_default());
        let options = wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            force_fallback_adapter: false,
            compatible_surface: None,
        };
        let adapter = instance.request_adapter(&options).await?;
        let descriptor = wgpu::DeviceDescriptor {
            label: Some("shared_images"),
            ..Default::default()
        };
        let (device, queue) = adapter.request_device(&descriptor).await?;
        Ok(Self::from_device(device, queue))
    }

    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let lost = Arc::new(AtomicBool::new(false));
        let move_lost = lost.clone();
        device.set_device_lost_callback(move |reason, message| {
            tracing::error!(?reason, %message, "wgpu device lost");
            move_lost.store(true, Ordering::Release);
        });
        WgpuBackend {
            device,
            queue,
            lost,
            submitted: AtomicU64::new(0),
            completed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }
}

fn wgpu_format(format: ResourceFormat) -> wgpu::TextureFormat {
    match format {
        ResourceFormat::Rgba8888 | ResourceFormat::Rgbx8888 => wgpu::TextureFormat::Rgba8Unorm,
        ResourceFormat::Bgra8888 => wgpu::TextureFormat::Bgra8Unorm,
        ResourceFormat::Alpha8 | ResourceFormat::Red8 => wgpu::TextureFormat::R8Unorm,
        ResourceFormat::Rg88 => wgpu::TextureFormat::Rg8Unorm,
        ResourceFormat::RgbaF16 => wgpu::TextureFormat::Rgba16Float,
        ResourceFormat::Rgba1010102 => wgpu::TextureFormat::Rgb10a2Unorm,
    }
}

fn aligned_bytes_per_row(width: u32, bytes_per_pixel: u32) -> u32 {
    let unaligned = width * bytes_per_pixel;
    unaligned.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn context_type(&self) -> ContextType {
        ContextType::Wgpu
    }

    fn max_texture_size(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    fn create_texture(&self, descriptor: &NativeTextureDescriptor) -> Result<NativeTexture, Error> {
        if self.is_lost() {
            return Err(Error::ContextLost);
        }
        let max = self.max_texture_size();
        let size = descriptor.size;
        if size.is_empty() || size.width > max || size.height > max {
            return Err(Error::InvalidSize { width: size.width, height: size.height });
        }
        let mip_level_count = if descriptor.mipmapped {
            32 - size.width.max(size.height).leading_zeros()
        } else {
            1
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(descriptor.label.as_str()),
            size: Extent3d { width: size.width, height: size.height, depth_or_array_layers: 1 },
            mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format(descriptor.format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        Ok(NativeTexture::Wgpu(texture))
    }

    fn upload(
        &self,
        texture: &NativeTexture,
        pixels: &Pixmap,
        format: ResourceFormat,
    ) -> Result<(), Error> {
        let NativeTexture::Wgpu(texture) = texture else {
            return Err(Error::NotImplemented(
                "uploading a software texture through the wgpu backend",
            ));
        };
        let bpp = format.bytes_per_pixel();
        let tight = pixels.to_bytes(format);
        let row = (pixels.width() * bpp) as usize;
        let padded_row = aligned_bytes_per_row(pixels.width(), bpp) as usize;
        let mut staging = vec![0u8; padded_row * pixels.height() as usize];
        for (y, src) in tight.chunks_exact(row).enumerate() {
            staging[y * padded_row..y * padded_row + row].copy_from_slice(src);
        }
        self.queue.write_texture(
            TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &staging,
            TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_row as u32),
                rows_per_image: Some(pixels.height()),
            },
            Extent3d { width: pixels.width(), height: pixels.height(), depth_or_array_layers: 1 },
        );
        Ok(())
    }

    fn destroy_texture(&self, texture: NativeTexture) {
        if let NativeTexture::Wgpu(texture) = texture {
            texture.destroy();
        }
    }

    fn submit(&self) -> Result<u64, Error> {
        if self.is_lost() {
            return Err(Error::ContextLost);
        }
        let serial = self.submitted.fetch_add(1, Ordering::AcqRel) + 1;
        self.queue.submit(std::iter::empty());
        let completed = self.completed.clone();
        self.queue.on_submitted_work_done(move || {
            completed.fetch_max(serial, Ordering::AcqRel);
        });
        Ok(serial)
    }

    fn completed_serial(&self) -> u64 {
        if let Err(e) = self.device.poll(wgpu::PollType::Poll) {
            tracing::warn!(error = %e, "device poll failed");
        }
        self.completed.load(Ordering::Acquire)
    }
}
