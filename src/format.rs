// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Pixel formats of shared images.
//!
//! A [`SharedImageFormat`] is either a single-plane [`ResourceFormat`] (RGBA-like) or a
//! multi-planar YUV layout described by plane configuration, subsampling and channel
//! width.  The format determines how many bytes a backing needs, which is what memory
//! accounting reports.

use crate::color::Color4f;
use crate::geometry::Size;
use std::fmt::{Display, Formatter};

pub use half::f16;

/// Formats of a single plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceFormat {
    Rgba8888,
    Bgra8888,
    Rgbx8888,
    Alpha8,
    Red8,
    Rg88,
    RgbaF16,
    Rgba1010102,
}

impl ResourceFormat {
    pub const fn bytes_per_pixel(&self) -> u32 {
        match self {
            ResourceFormat::Alpha8 | ResourceFormat::Red8 => 1,
            ResourceFormat::Rg88 => 2,
            ResourceFormat::Rgba8888
            | ResourceFormat::Bgra8888
            | ResourceFormat::Rgbx8888
            | ResourceFormat::Rgba1010102 => 4,
            ResourceFormat::RgbaF16 => 8,
        }
    }

    pub const fn has_alpha(&self) -> bool {
        matches!(
            self,
            ResourceFormat::Rgba8888
                | ResourceFormat::Bgra8888
                | ResourceFormat::Alpha8
                | ResourceFormat::RgbaF16
                | ResourceFormat::Rgba1010102
        )
    }

    /// Encodes one premultiplied color into the native byte layout of this format.
    pub fn encode(&self, color: Color4f) -> Vec<u8> {
        let [r, g, b, a] = color.to_rgba8();
        match self {
            ResourceFormat::Rgba8888 => vec![r, g, b, a],
            ResourceFormat::Bgra8888 => vec![b, g, r, a],
            ResourceFormat::Rgbx8888 => vec![r, g, b, 0xff],
            ResourceFormat::Alpha8 => vec![a],
            ResourceFormat::Red8 => vec![r],
            ResourceFormat::Rg88 => vec![r, g],
            ResourceFormat::RgbaF16 => [color.r, color.g, color.b, color.a]
                .iter()
                .flat_map(|c| f16::from_f32(*c).to_le_bytes())
                .collect(),
            ResourceFormat::Rgba1010102 => {
                let q = |v: f32| ((v.clamp(0.0, 1.0) * 1023.0).round() as u32) & 0x3ff;
                let a2 = ((color.a.clamp(0.0, 1.0) * 3.0).round() as u32) & 0x3;
                let packed = q(color.r) | (q(color.g) << 10) | (q(color.b) << 20) | (a2 << 30);
                packed.to_le_bytes().to_vec()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaneConfig {
    /// Three planes: Y, V, U.
    YVU,
    /// Two planes: Y and interleaved UV.
    YUV,
    /// Three planes: Y, interleaved UV, A.
    YUVA,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsampling {
    /// 4:2:0, chroma planes are half width and half height.
    K420,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelFormat {
    K8,
    K10,
    K16,
    K16F,
}

impl ChannelFormat {
    const fn bytes_per_channel(&self) -> u32 {
        match self {
            ChannelFormat::K8 => 1,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SharedImageFormat {
    SinglePlane(ResourceFormat),
    MultiPlane {
        plane_config: PlaneConfig,
        subsampling: Subsampling,
        channel_format: ChannelFormat,
    },
}

impl SharedImageFormat {
    pub const RGBA_8888: SharedImageFormat =
        SharedImageFormat::SinglePlane(ResourceFormat::Rgba8888);
    pub const BGRA_8888: SharedImageFormat =
        SharedImageFormat::SinglePlane(ResourceFormat::Bgra8888);
    pub const RGBA_F16: SharedImageFormat = SharedImageFormat::SinglePlane(ResourceFormat::RgbaF16);
    pub const NV12: SharedImageFormat = SharedImageFormat::MultiPlane {
        plane_config: PlaneConfig::YUV,
        subsampling: Subsampling::K420,
        channel_format: ChannelFormat::K8,
    };

    pub fn is_single_plane(&self) -> bool {
        matches!(self, SharedImageFormat::SinglePlane(_))
    }

    pub fn resource_format(&self) -> Option<ResourceFormat> {
        match self {
            SharedImageFormat::SinglePlane(f) => Some(*f),
            SharedImageFormat::MultiPlane { .. } => None,
        }
    }

    pub fn number_of_planes(&self) -> usize {
        match self {
            SharedImageFormat::SinglePlane(_) => 1,
            SharedImageFormat::MultiPlane { plane_config, .. } => match plane_config {
                PlaneConfig::YUV => 2,
                PlaneConfig::YVU | PlaneConfig::YUVA => 3,
            },
        }
    }

    /// Channels stored in `plane`.
    fn channels_in_plane(&self, plane: usize) -> u32 {
        match self {
            SharedImageFormat::SinglePlane(_) => 1,
            SharedImageFormat::MultiPlane { plane_config, .. } => match (plane_config, plane) {
                (PlaneConfig::YUV, 1) | (PlaneConfig::YUVA, 1) => 2,
                _ => 1,
            },
        }
    }

    /// Dimensions of `plane` for an image of `size`.  Chroma planes round up.
    pub fn plane_size(&self, plane: usize, size: Size) -> Size {
        match self {
            SharedImageFormat::SinglePlane(_) => size,
            SharedImageFormat::MultiPlane { plane_config, subsampling: Subsampling::K420, .. } => {
                let is_chroma = match plane_config {
                    PlaneConfig::YVU => plane == 1 || plane == 2,
                    PlaneConfig::YUV | PlaneConfig::YUVA => plane == 1,
                };
                if is_chroma {
                    Size::new(size.width.div_ceil(2), size.height.div_ceil(2))
                } else {
                    size
                }
            }
        }
    }

    /// Bytes needed to store an image of `size`, or `None` on overflow.
    pub fn estimated_size_in_bytes(&self, size: Size) -> Option<u64> {
        match self {
            SharedImageFormat::SinglePlane(f) => {
                size.area().checked_mul(f.bytes_per_pixel() as u64)
            }
            SharedImageFormat::MultiPlane { channel_format, .. } => {
                let mut total: u64 = 0;
                for plane in 0..self.number_of_planes() {
                    let per_texel =
                        (self.channels_in_plane(plane) * channel_format.bytes_per_channel()) as u64;
                    let bytes = self.plane_size(plane, size).area().checked_mul(per_texel)?;
                    total = total.checked_add(bytes)?;
                }
                Some(total)
            }
        }
    }
}

impl Display for SharedImageFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SharedImageFormat::SinglePlane(r) => write!(f, "{r:?}"),
            SharedImageFormat::MultiPlane { plane_config, subsampling, channel_format } => {
                write!(f, "{plane_config:?}/{subsampling:?}/{channel_format:?}")
            }
        }
    }
}
