// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! CPU pixel storage.

A [`Pixmap`] is a 2D array of premultiplied RGBA8 texels with the usual texture
conventions:
- Origin (0, 0) is at the top-left
- X increases to the right
- Y increases downward

Storage is row-major (Y-major, X-minor), which is also the layout GPU uploads want.

```
use shared_images::software::pixmap::{Pixmap, Texel};

let mut pixmap = Pixmap::new(4, 4, [0, 0, 0, 0]);
pixmap[Texel { x: 1, y: 2 }] = [255, 0, 0, 255];
assert_eq!(pixmap[Texel { x: 1, y: 2 }], [255, 0, 0, 255]);
```
*/

use crate::color::Color4f;
use crate::format::ResourceFormat;
use crate::geometry::Rect;
use std::ops::{Index, IndexMut};

/// One premultiplied RGBA8 texel.
pub type Rgba8 = [u8; 4];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Texel {
    pub x: u32,
    pub y: u32,
}

impl Texel {
    #[inline]
    const fn vec_offset(&self, width: u32) -> usize {
        self.y as usize * width as usize + self.x as usize
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Pixmap {
    data: Vec<Rgba8>,
    width: u32,
    height: u32,
}

impl std::fmt::Debug for Pixmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pixmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl Pixmap {
    pub fn new(width: u32, height: u32, fill: Rgba8) -> Self {
        Pixmap { data: vec![fill; width as usize * height as usize], width, height }
    }

    pub fn transparent(width: u32, height: u32) -> Self {
        Self::new(width, height, [0; 4])
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    pub fn texels(&self) -> &[Rgba8] {
        &self.data
    }

    pub fn get(&self, x: u32, y: u32) -> Option<Rgba8> {
        if x < self.width && y < self.height {
            Some(self[Texel { x, y }])
        } else {
            None
        }
    }

    /// Replaces every texel of `rect` (clipped to the pixmap) with `value`.
    pub fn fill_rect(&mut self, rect: Rect, value: Rgba8) {
        self.for_each_in(rect, |px| *px = value);
    }

    /// Source-over blends `value` into every texel of `rect`.
    pub fn blend_rect(&mut self, rect: Rect, value: Rgba8) {
        if value[3] == 255 {
            return self.fill_rect(rect, value);
        }
        self.for_each_in(rect, |px| *px = src_over(value, *px));
    }

    /// Source-over composites `layer` onto self within `rect`, scaling the layer by `alpha`.
    pub fn composite(&mut self, layer: &Pixmap, rect: Rect, alpha: u8) {
        debug_assert_eq!((layer.width, layer.height), (self.width, self.height));
        let clipped = rect.intersect(&self.bounds());
        for y in clipped.y as u32..clipped.y as u32 + clipped.height {
            for x in clipped.x as u32..clipped.x as u32 + clipped.width {
                let t = Texel { x, y };
                let src = scale(layer[t], alpha);
                self[t] = src_over(src, self[t]);
            }
        }
    }

    fn for_each_in(&mut self, rect: Rect, mut f: impl FnMut(&mut Rgba8)) {
        let clipped = rect.intersect(&self.bounds());
        for y in clipped.y as u32..clipped.y as u32 + clipped.height {
            let row = y as usize * self.width as usize;
            let start = row + clipped.x as usize;
            for px in &mut self.data[start..start + clipped.width as usize] {
                f(px);
            }
        }
    }

    /// Encodes into `format`'s native byte layout, unpremultiplying first.
    pub fn to_bytes(&self, format: ResourceFormat) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() * format.bytes_per_pixel() as usize);
        for px in &self.data {
            out.extend_from_slice(&format.encode(unpremultiply(*px)));
        }
        out
    }

    /// Straight-alpha RGBA8 bytes, suitable for PNG encoding.
    pub fn to_unpremultiplied_rgba8(&self) -> Vec<u8> {
        self.data.iter().flat_map(|px| unpremultiply(*px).to_rgba8()).collect()
    }

    /// Builds a pixmap from tightly packed straight-alpha RGBA8 bytes.
    pub fn from_rgba8(width: u32, height: u32, bytes: &[u8]) -> Option<Self> {
        if bytes.len() != width as usize * height as usize * 4 {
            return None;
        }
        let data = bytes
            .chunks_exact(4)
            .map(|c| Color4f::from_rgba8([c[0], c[1], c[2], c[3]]).premultiplied().to_rgba8())
            .collect();
        Some(Pixmap { data, width, height })
    }
}

impl Index<Texel> for Pixmap {
    type Output = Rgba8;
    fn index(&self, index: Texel) -> &Self::Output {
        assert!(index.x < self.width && index.y < self.height, "texel {index:?} out of bounds");
        &self.data[index.vec_offset(self.width)]
    }
}

impl IndexMut<Texel> for Pixmap {
    fn index_mut(&mut self, index: Texel) -> &mut Self::Output {
        assert!(index.x < self.width && index.y < self.height, "texel {index:?} out of bounds");
        &mut self.data[index.vec_offset(self.width)]
    }
}

#[inline]
fn mul_div_255(a: u8, b: u8) -> u8 {
    ((a as u32 * b as u32 + 127) / 255) as u8
}

#[inline]
fn scale(px: Rgba8, alpha: u8) -> Rgba8 {
    if alpha == 255 {
        return px;
    }
    px.map(|c| mul_div_255(c, alpha))
}

/// Premultiplied source-over.
#[inline]
pub fn src_over(src: Rgba8, dst: Rgba8) -> Rgba8 {
    let inv = 255 - src[3];
    [0, 1, 2, 3].map(|i| src[i].saturating_add(mul_div_255(dst[i], inv)))
}

fn unpremultiply(px: Rgba8) -> Color4f {
    let a = px[3];
    if a == 0 {
        return Color4f::TRANSPARENT;
    }
    let un = |c: u8| (c as f32 / a as f32).min(1.0);
    Color4f::new(un(px[0]), un(px[1]), un(px[2]), a as f32 / 255.0)
}
