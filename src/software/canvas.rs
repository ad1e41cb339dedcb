// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! A small immediate-mode canvas over a [`Pixmap`].
//!
//! The canvas keeps a save stack of (translation, clip, optional layer).  Layers are
//! full-size transparent pixmaps that are composited back with their alpha when the
//! matching `restore` runs.  The save count starts at 1, so `save()` on a fresh canvas
//! returns 1.

use crate::color::Color4f;
use crate::geometry::Rect;
use crate::software::pixmap::Pixmap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DrawState {
    dx: i32,
    dy: i32,
    clip: Rect,
}

#[derive(Debug)]
struct Layer {
    pixmap: Pixmap,
    bounds: Rect,
    alpha: u8,
}

#[derive(Debug)]
struct SaveRecord {
    state: DrawState,
    layer: Option<Layer>,
}

#[derive(Debug)]
pub struct Canvas {
    base: Pixmap,
    state: DrawState,
    stack: Vec<SaveRecord>,
}

impl Canvas {
    pub fn new(base: Pixmap) -> Self {
        let clip = base.bounds();
        Canvas { base, state: DrawState { dx: 0, dy: 0, clip }, stack: Vec::new() }
    }

    pub fn width(&self) -> u32 {
        self.base.width()
    }

    pub fn height(&self) -> u32 {
        self.base.height()
    }

    /// The pixmap draws currently land in.
    fn target(&mut self) -> &mut Pixmap {
        for record in self.stack.iter_mut().rev() {
            if let Some(layer) = record.layer.as_mut() {
                return &mut layer.pixmap;
            }
        }
        &mut self.base
    }

    /// Pixels of the base surface.  Open layers are not included.
    pub fn pixels(&self) -> &Pixmap {
        &self.base
    }

    pub fn save_count(&self) -> usize {
        self.stack.len() + 1
    }

    /// Pushes the current state and returns the save count before the push.
    pub fn save(&mut self) -> usize {
        let before = self.save_count();
        self.stack.push(SaveRecord { state: self.state, layer: None });
        before
    }

    /// Like [`Canvas::save`], but subsequent draws go into an offscreen layer that is
    /// composited with `alpha` on restore.  `bounds` are in local coordinates.
    pub fn save_layer(&mut self, bounds: Option<Rect>, alpha: u8) -> usize {
        let before = self.save_count();
        let device_bounds = match bounds {
            Some(b) => b.offset(self.state.dx, self.state.dy).intersect(&self.state.clip),
            None => self.state.clip,
        };
        let layer = Layer {
            pixmap: Pixmap::transparent(self.base.width(), self.base.height()),
            bounds: device_bounds,
            alpha,
        };
        self.stack.push(SaveRecord { state: self.state, layer: Some(layer) });
        self.state.clip = device_bounds;
        before
    }

    /// Pops one save record.  Restoring past the initial state is ignored.
    pub fn restore(&mut self) {
        let Some(record) = self.stack.pop() else {
            return;
        };
        self.state = record.state;
        if let Some(layer) = record.layer {
            self.target().composite(&layer.pixmap, layer.bounds, layer.alpha);
        }
    }

    pub fn restore_to_count(&mut self, count: usize) {
        let count = count.max(1);
        while self.save_count() > count {
            self.restore();
        }
    }

    pub fn translate(&mut self, dx: i32, dy: i32) {
        self.state.dx = self.state.dx.saturating_add(dx);
        self.state.dy = self.state.dy.saturating_add(dy);
    }

    pub fn clip_rect(&mut self, rect: Rect) {
        let device = rect.offset(self.state.dx, self.state.dy);
        self.state.clip = self.state.clip.intersect(&device);
    }

    /// Replaces the clipped area with `color`, ignoring what was there.
    pub fn clear(&mut self, color: Color4f) {
        let value = color.premultiplied().to_rgba8();
        let clip = self.state.clip;
        self.target().fill_rect(clip, value);
    }

    pub fn draw_rect(&mut self, rect: Rect, color: Color4f) {
        let value = color.premultiplied().to_rgba8();
        let device = rect.offset(self.state.dx, self.state.dy).intersect(&self.state.clip);
        self.target().blend_rect(device, value);
    }

    /// Consumes the canvas, closing any open layers.
    pub fn into_pixmap(mut self) -> Pixmap {
        self.restore_to_count(1);
        self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_counts() {
        let mut c = Canvas::new(Pixmap::transparent(2, 2));
        assert_eq!(c.save_count(), 1);
        assert_eq!(c.save(), 1);
        assert_eq!(c.save_layer(None, 255), 2);
        assert_eq!(c.save_count(), 3);
        c.restore_to_count(1);
        assert_eq!(c.save_count(), 1);
        c.restore();
        assert_eq!(c.save_count(), 1);
    }

    #[test]
    fn translate_and_clip() {
        let mut c = Canvas::new(Pixmap::transparent(4, 4));
        c.save();
        c.translate(1, 1);
        c.clip_rect(Rect::new(0, 0, 2, 2));
        c.draw_rect(Rect::new(0, 0, 4, 4), Color4f::BLUE);
        c.restore();
        let p = c.pixels();
        assert_eq!(p.get(0, 0), Some([0; 4]));
        assert_eq!(p.get(1, 1), Some([0, 0, 255, 255]));
        assert_eq!(p.get(2, 2), Some([0, 0, 255, 255]));
        assert_eq!(p.get(3, 3), Some([0; 4]));
    }

    #[test]
    fn layer_alpha_composites_on_restore() {
        let mut c = Canvas::new(Pixmap::new(1, 1, [0, 0, 0, 255]));
        c.save_layer(None, 128);
        c.draw_rect(Rect::new(0, 0, 1, 1), Color4f::WHITE);
        assert_eq!(c.pixels().get(0, 0), Some([0, 0, 0, 255]));
        c.restore();
        assert_eq!(c.pixels().get(0, 0), Some([128, 128, 128, 255]));
    }
}
