// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Intended-usage flags of a shared image.

use bitflags::bitflags;

bitflags! {
    /// What a client intends to do with a shared image.  Factories use these to pick a
    /// backing, and backings use them to decide which representations and which
    /// synchronization they need.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct Usage: u32 {
        const GLES2 = 1 << 0;
        const GLES2_FRAMEBUFFER_HINT = 1 << 1;
        const RASTER = 1 << 2;
        const DISPLAY_READ = 1 << 3;
        const DISPLAY_WRITE = 1 << 4;
        const SCANOUT = 1 << 5;
        const OOP_RASTERIZATION = 1 << 6;
        const WEBGPU = 1 << 7;
        const CONCURRENT_READ_WRITE = 1 << 8;
        const VIDEO_DECODE = 1 << 9;
        const MIPMAP = 1 << 10;
        const RAW_DRAW = 1 << 11;
        const CPU_UPLOAD = 1 << 12;
        const SWAP_CHAIN = 1 << 13;
        const PROTECTED = 1 << 14;
    }
}

/// Usages that only the service side may set.
const SERVICE_ONLY: Usage = Usage::SWAP_CHAIN;

impl Usage {
    /// A client may request any non-empty combination that excludes service-only bits.
    pub fn is_valid_client_usage(&self) -> bool {
        !self.is_empty() && !self.intersects(SERVICE_ONLY) && Usage::all().contains(*self)
    }

    /// Whether more than one graphics API will touch the memory, and so needs explicit
    /// semaphore exchange.
    pub fn needs_cross_api_synchronization(&self) -> bool {
        self.intersects(Usage::GLES2 | Usage::WEBGPU)
    }

    /// Human readable `A|B|C` list, used as a texture label and in memory dumps.
    pub fn label(&self) -> String {
        if self.is_empty() {
            return "None".to_string();
        }
        self.iter_names().map(|(name, _)| name).collect::<Vec<_>>().join("|")
    }
}

#[cfg(test)]
mod tests {
    use super::Usage;

    #[test]
    fn client_usage_validation() {
        assert!(Usage::RASTER.is_valid_client_usage());
        assert!(!Usage::empty().is_valid_client_usage());
        assert!(!(Usage::SCANOUT | Usage::SWAP_CHAIN).is_valid_client_usage());
    }

    #[test]
    fn labels() {
        assert_eq!((Usage::RASTER | Usage::MIPMAP).label(), "RASTER|MIPMAP");
        assert_eq!(Usage::empty().label(), "None");
    }
}
