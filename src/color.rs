// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! Color, color space and pixel-interpretation metadata.

Shared images carry enough color metadata for every representation to agree on what
the stored values mean: a [`ColorSpace`] (primaries and transfer function), an
[`AlphaType`], and a [`SurfaceOrigin`].  Interop code that hands an image from one API to
another uses [`ColorSpace::rgb_to_xyz`] / [`ColorSpace::conversion_matrix_to`] to build the
3x3 matrices the consumer expects.
*/

use std::fmt::{Display, Formatter};

/// A straight-alpha RGBA color with f32 components, nominally in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color4f {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color4f {
    pub const TRANSPARENT: Color4f = Color4f::new(0.0, 0.0, 0.0, 0.0);
    pub const BLACK: Color4f = Color4f::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Color4f = Color4f::new(1.0, 1.0, 1.0, 1.0);
    pub const RED: Color4f = Color4f::new(1.0, 0.0, 0.0, 1.0);
    pub const GREEN: Color4f = Color4f::new(0.0, 1.0, 0.0, 1.0);
    pub const BLUE: Color4f = Color4f::new(0.0, 0.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Color4f { r, g, b, a }
    }

    pub fn with_alpha(self, a: f32) -> Self {
        Color4f { a, ..self }
    }

    /// Quantizes to 8 bits per channel, clamping out-of-range values.
    #[inline]
    pub fn to_rgba8(&self) -> [u8; 4] {
        [quantize(self.r), quantize(self.g), quantize(self.b), quantize(self.a)]
    }

    #[inline]
    pub fn from_rgba8(rgba: [u8; 4]) -> Self {
        Color4f::new(
            rgba[0] as f32 / 255.0,
            rgba[1] as f32 / 255.0,
            rgba[2] as f32 / 255.0,
            rgba[3] as f32 / 255.0,
        )
    }

    pub fn premultiplied(&self) -> Color4f {
        Color4f::new(self.r * self.a, self.g * self.a, self.b * self.a, self.a)
    }
}

#[inline]
fn quantize(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// How the alpha channel relates to the color channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AlphaType {
    #[default]
    Premultiplied,
    Unpremultiplied,
    Opaque,
}

/// Where row 0 of the image lives.  GL-produced content is typically bottom-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SurfaceOrigin {
    #[default]
    TopLeft,
    BottomLeft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primaries {
    Bt709,
    DisplayP3,
    Bt2020,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferFunction {
    Srgb,
    Linear,
    Pq,
    Hlg,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorSpace {
    pub primaries: Primaries,
    pub transfer: TransferFunction,
}

/// Row-major 3x3 matrix.
pub type Matrix3 = [[f32; 3]; 3];

const D65_WHITE: (f64, f64) = (0.3127, 0.3290);

impl ColorSpace {
    pub const fn srgb() -> Self {
        ColorSpace { primaries: Primaries::Bt709, transfer: TransferFunction::Srgb }
    }

    pub const fn srgb_linear() -> Self {
        ColorSpace { primaries: Primaries::Bt709, transfer: TransferFunction::Linear }
    }

    pub const fn display_p3() -> Self {
        ColorSpace { primaries: Primaries::DisplayP3, transfer: TransferFunction::Srgb }
    }

    pub const fn rec2020_pq() -> Self {
        ColorSpace { primaries: Primaries::Bt2020, transfer: TransferFunction::Pq }
    }

    pub const fn invalid() -> Self {
        ColorSpace { primaries: Primaries::Invalid, transfer: TransferFunction::Invalid }
    }

    pub fn is_valid(&self) -> bool {
        self.primaries != Primaries::Invalid && self.transfer != TransferFunction::Invalid
    }

    pub fn is_hdr(&self) -> bool {
        matches!(self.transfer, TransferFunction::Pq | TransferFunction::Hlg)
    }

    fn chromaticities(&self) -> Option<[(f64, f64); 3]> {
        match self.primaries {
            Primaries::Bt709 => Some([(0.640, 0.330), (0.300, 0.600), (0.150, 0.060)]),
            Primaries::DisplayP3 => Some([(0.680, 0.320), (0.265, 0.690), (0.150, 0.060)]),
            Primaries::Bt2020 => Some([(0.708, 0.292), (0.170, 0.797), (0.131, 0.046)]),
            Primaries::Invalid => None,
        }
    }

    /// Linear RGB to CIE XYZ (D65) matrix for these primaries.
    ///
    /// Returns `None` for invalid primaries.
    pub fn rgb_to_xyz(&self) -> Option<Matrix3> {
        let prims = self.chromaticities()?;
        // columns are the XYZ of each primary at Y = 1
        let col = |(x, y): (f64, f64)| [x / y, 1.0, (1.0 - x - y) / y];
        let p = [col(prims[0]), col(prims[1]), col(prims[2])];
        let m = [
            [p[0][0], p[1][0], p[2][0]],
            [p[0][1], p[1][1], p[2][1]],
            [p[0][2], p[1][2], p[2][2]],
        ];
        let w = col(D65_WHITE);
        let s = mul_vec(&invert(&m)?, &w);
        let mut out = [[0f32; 3]; 3];
        for (r, row) in m.iter().enumerate() {
            for c in 0..3 {
                out[r][c] = (row[c] * s[c]) as f32;
            }
        }
        Some(out)
    }

    /// Matrix converting linear RGB in `self` to linear RGB in `target`.
    pub fn conversion_matrix_to(&self, target: &ColorSpace) -> Option<Matrix3> {
        let src = widen(&self.rgb_to_xyz()?);
        let dst = widen(&target.rgb_to_xyz()?);
        let m = mul(&invert(&dst)?, &src);
        Some(m.map(|row| row.map(|v| v as f32)))
    }

    /// Decodes one encoded component to linear light.
    pub fn to_linear(&self, v: f32) -> f32 {
        match self.transfer {
            TransferFunction::Srgb => {
                if v <= 0.04045 {
                    v / 12.92
                } else {
                    ((v + 0.055) / 1.055).powf(2.4)
                }
            }
            _ => v,
        }
    }

    /// Encodes one linear component.  The sRGB curve handles extended-range input.
    pub fn from_linear(&self, linear: f32) -> f32 {
        match self.transfer {
            TransferFunction::Srgb => {
                if linear <= 0.0031308 {
                    12.92 * linear
                } else {
                    1.055 * linear.powf(1.0 / 2.4) - 0.055
                }
            }
            _ => linear,
        }
    }
}

impl Default for ColorSpace {
    fn default() -> Self {
        ColorSpace::srgb()
    }
}

impl Display for ColorSpace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{primaries:{:?}, transfer:{:?}}}", self.primaries, self.transfer)
    }
}

fn widen(m: &Matrix3) -> [[f64; 3]; 3] {
    m.map(|row| row.map(|v| v as f64))
}

fn mul_vec(m: &[[f64; 3]; 3], v: &[f64; 3]) -> [f64; 3] {
    [0, 1, 2].map(|r| m[r][0] * v[0] + m[r][1] * v[1] + m[r][2] * v[2])
}

fn mul(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for r in 0..3 {
        for c in 0..3 {
            out[r][c] = (0..3).map(|k| a[r][k] * b[k][c]).sum();
        }
    }
    out
}

fn invert(m: &[[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv = 1.0 / det;
    Some([
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv,
        ],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srgb_to_xyz_matches_published_matrix() {
        let m = ColorSpace::srgb().rgb_to_xyz().unwrap();
        let expected = [
            [0.4124, 0.3576, 0.1805],
            [0.2126, 0.7152, 0.0722],
            [0.0193, 0.1192, 0.9505],
        ];
        for r in 0..3 {
            for c in 0..3 {
                assert!((m[r][c] - expected[r][c]).abs() < 1e-3, "{r},{c}: {}", m[r][c]);
            }
        }
    }

    #[test]
    fn identity_conversion() {
        let m = ColorSpace::display_p3().conversion_matrix_to(&ColorSpace::display_p3()).unwrap();
        for r in 0..3 {
            for c in 0..3 {
                let want = if r == c { 1.0 } else { 0.0 };
                assert!((m[r][c] - want).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn invalid_has_no_matrix() {
        assert!(!ColorSpace::invalid().is_valid());
        assert!(ColorSpace::invalid().rgb_to_xyz().is_none());
    }

    #[test]
    fn transfer_round_trip() {
        let cs = ColorSpace::srgb();
        for v in [0.0f32, 0.002, 0.2, 0.5, 1.0] {
            assert!((cs.to_linear(cs.from_linear(v)) - v).abs() < 1e-4);
        }
        assert!((cs.from_linear(0.5) - 0.735_357).abs() < 1e-4);
    }

    #[test]
    fn quantization() {
        assert_eq!(Color4f::RED.to_rgba8(), [255, 0, 0, 255]);
        assert_eq!(Color4f::new(2.0, -1.0, 0.5, 1.0).to_rgba8(), [255, 0, 128, 255]);
    }
}
