// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! CPU rasterization used for paint-op playback.
//!
//! Everything here is deterministic: the same op sequence on the same starting pixels
//! always produces bit-identical output, which raw-draw materialization depends on.

pub mod canvas;
pub mod pixmap;

pub use canvas::Canvas;
pub use pixmap::{Pixmap, Rgba8, Texel};
