// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! Recorded drawing commands.

A [`PaintOpBuffer`] is a linear log of [`PaintOp`]s.  Playback walks the log in
recorded order against a [`Canvas`]; there is no tree structure and no caching, so
replaying the same buffer onto the same starting pixels is idempotent.

Raw-draw backings hand a [`SharedPaintOpBuffer`] to the raster writer, who appends to
it, and later to raster readers, who replay it.

```
use shared_images::paint::{PaintOp, PaintOpBuffer};
use shared_images::color::Color4f;

let mut buffer = PaintOpBuffer::new();
buffer.push(PaintOp::Clear(Color4f::RED));
assert_eq!(buffer.len(), 1);
assert!(!buffer.has_save_layer_ops());
```
*/

use crate::color::Color4f;
use crate::geometry::Rect;
use crate::software::Canvas;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, PartialEq)]
pub enum PaintOp {
    Clear(Color4f),
    DrawRect { rect: Rect, color: Color4f },
    Save,
    /// Opens an offscreen layer composited with `alpha` on the matching restore.
    SaveLayer { bounds: Option<Rect>, alpha: u8 },
    Restore,
    Translate { dx: i32, dy: i32 },
    ClipRect(Rect),
}

impl PaintOp {
    fn raster(&self, canvas: &mut Canvas) {
        match self {
            PaintOp::Clear(color) => canvas.clear(*color),
            PaintOp::DrawRect { rect, color } => canvas.draw_rect(*rect, *color),
            PaintOp::Save => {
                canvas.save();
            }
            PaintOp::SaveLayer { bounds, alpha } => {
                canvas.save_layer(*bounds, *alpha);
            }
            PaintOp::Restore => canvas.restore(),
            PaintOp::Translate { dx, dy } => canvas.translate(*dx, *dy),
            PaintOp::ClipRect(rect) => canvas.clip_rect(*rect),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaintOpBuffer {
    ops: Vec<PaintOp>,
    save_layer_count: usize,
}

impl PaintOpBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: PaintOp) {
        if matches!(op, PaintOp::SaveLayer { .. }) {
            self.save_layer_count += 1;
        }
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[PaintOp] {
        &self.ops
    }

    pub fn save_layer_count(&self) -> usize {
        self.save_layer_count
    }

    pub fn has_save_layer_ops(&self) -> bool {
        self.save_layer_count > 0
    }

    pub fn reset(&mut self) {
        self.ops.clear();
        self.save_layer_count = 0;
    }

    /// Replays every op in order.  Saves left open by the buffer are closed at the end,
    /// so the canvas save count is unchanged afterwards.
    pub fn playback(&self, canvas: &mut Canvas) {
        let count = canvas.save();
        for op in &self.ops {
            op.raster(canvas);
        }
        canvas.restore_to_count(count);
    }
}

/// A paint-op buffer shared between a raw-draw backing and its current raster client.
///
/// Locks are held only for the duration of one call.
#[derive(Debug, Clone, Default)]
pub struct SharedPaintOpBuffer(Arc<RwLock<PaintOpBuffer>>);

impl SharedPaintOpBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, op: PaintOp) {
        self.0.write().unwrap_or_else(PoisonError::into_inner).push(op);
    }

    pub fn extend(&self, ops: impl IntoIterator<Item = PaintOp>) {
        let mut buffer = self.0.write().unwrap_or_else(PoisonError::into_inner);
        for op in ops {
            buffer.push(op);
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&PaintOpBuffer) -> R) -> R {
        let buffer = self.0.read().unwrap_or_else(PoisonError::into_inner);
        f(&*buffer)
    }

    pub fn reset(&self) {
        self.0.write().unwrap_or_else(PoisonError::into_inner).reset();
    }

    pub fn len(&self) -> usize {
        self.with(PaintOpBuffer::len)
    }

    pub fn is_empty(&self) -> bool {
        self.with(PaintOpBuffer::is_empty)
    }

    pub fn has_save_layer_ops(&self) -> bool {
        self.with(PaintOpBuffer::has_save_layer_ops)
    }

    pub fn playback(&self, canvas: &mut Canvas) {
        self.with(|b| b.playback(canvas))
    }

    /// True if both handles name the same underlying buffer.
    pub fn ptr_eq(&self, other: &SharedPaintOpBuffer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::Pixmap;

    fn sample() -> PaintOpBuffer {
        let mut b = PaintOpBuffer::new();
        b.push(PaintOp::Clear(Color4f::WHITE));
        b.push(PaintOp::SaveLayer { bounds: Some(Rect::new(0, 0, 4, 4)), alpha: 200 });
        b.push(PaintOp::Translate { dx: 2, dy: 1 });
        b.push(PaintOp::DrawRect {
            rect: Rect::new(0, 0, 3, 3),
            color: Color4f::RED.with_alpha(0.5),
        });
        // left unbalanced on purpose
        b
    }

    #[test]
    fn playback_is_idempotent() {
        let buffer = sample();
        let render = || {
            let mut canvas = Canvas::new(Pixmap::transparent(8, 8));
            canvas.clear(Color4f::GREEN);
            buffer.playback(&mut canvas);
            assert_eq!(canvas.save_count(), 1);
            canvas.into_pixmap()
        };
        assert_eq!(render(), render());
    }

    #[test]
    fn save_layer_count_resets() {
        let mut b = sample();
        assert_eq!(b.save_layer_count(), 1);
        b.reset();
        assert!(b.is_empty());
        assert!(!b.has_save_layer_ops());
    }

    #[test]
    fn shared_handles_alias() {
        let a = SharedPaintOpBuffer::new();
        let b = a.clone();
        b.push(PaintOp::Save);
        assert_eq!(a.len(), 1);
        assert!(a.ptr_eq(&b));
    }
}
