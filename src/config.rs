// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Runtime configuration of the shared-image service.

use crate::paint::PaintOpBuffer;

/// Which recorded content counts as "expensive to re-rasterize".
///
/// Raw-draw backings consult this twice: at the end of a visible write, complex
/// content is materialized into a texture right away; and a raster read of complex
/// content is refused so that the caller uses the texture path instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaterializationPolicy {
    /// Any layer save makes the content complex.
    #[default]
    SaveLayers,
    /// Buffers with at least this many layer saves are complex.
    SaveLayerThreshold(usize),
    /// Nothing is complex; materialization only ever happens on demand.
    Never,
}

impl MaterializationPolicy {
    pub fn is_complex(&self, buffer: &PaintOpBuffer) -> bool {
        match self {
            MaterializationPolicy::SaveLayers => buffer.has_save_layer_ops(),
            MaterializationPolicy::SaveLayerThreshold(n) => {
                buffer.save_layer_count() >= (*n).max(1)
            }
            MaterializationPolicy::Never => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SharedImageConfig {
    pub materialization_policy: MaterializationPolicy,
    /// Upper bound on idle external semaphores kept for reuse.
    pub max_cached_semaphores: usize,
    /// Whether [`crate::factory::SharedImageFactory::new`] installs the raw-draw factory.
    pub enable_raw_draw: bool,
    /// Largest accepted width or height.
    pub max_texture_size: u32,
}

impl Default for SharedImageConfig {
    fn default() -> Self {
        SharedImageConfig {
            materialization_policy: MaterializationPolicy::default(),
            max_cached_semaphores: 16,
            enable_raw_draw: true,
            max_texture_size: 8192,
        }
    }
}
