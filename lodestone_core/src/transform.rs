// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Column-major 4×4 affine transforms.
//!
//! [`Transform3d`] is the matrix currency of the crate: native head poses,
//! view and projection matrices, anchor transforms and reference-space bases
//! are all expressed with it. It covers the operations the synchronization
//! engine needs (identity, multiply, invert, compose from rotation and
//! translation, decompose) without pulling in a full linear-algebra crate.
//!
//! The type is `Copy`, so every operation works on the stack. The `*_into`
//! variants write to a caller-supplied output for hot loops that keep their
//! own scratch storage.

use core::ops::Mul;
#[cfg(not(feature = "std"))]
use kurbo::common::FloatFuncs as _;

use crate::quat::Quat;
use crate::vec3::Vec3;

/// Determinant magnitude below which a matrix is treated as singular.
pub const SINGULAR_EPSILON: f64 = 1e-12;

/// A column-major 4×4 affine transform stored as `[[f64; 4]; 4]`.
///
/// Each inner array is one *column* of the matrix, matching the memory layout
/// of the native engine's flat 16-element arrays.
///
/// Multiplication follows the usual convention: `a * b` maps a point through
/// `b` first and then through `a`.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(from = "[f64; 16]", into = "[f64; 16]")
)]
pub struct Transform3d {
    /// Four columns, each a 4-element array `[x, y, z, w]`.
    pub cols: [[f64; 4]; 4],
}

impl Transform3d {
    /// The 4×4 identity matrix.
    pub const IDENTITY: Self = Self {
        cols: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    /// Creates a transform from four column arrays.
    #[inline]
    #[must_use]
    pub const fn from_cols(col0: [f64; 4], col1: [f64; 4], col2: [f64; 4], col3: [f64; 4]) -> Self {
        Self {
            cols: [col0, col1, col2, col3],
        }
    }

    /// Creates a transform from a flat column-major array (the wire format).
    #[must_use]
    pub const fn from_cols_array(m: [f64; 16]) -> Self {
        Self {
            cols: [
                [m[0], m[1], m[2], m[3]],
                [m[4], m[5], m[6], m[7]],
                [m[8], m[9], m[10], m[11]],
                [m[12], m[13], m[14], m[15]],
            ],
        }
    }

    /// Returns the matrix as a flat column-major array.
    #[must_use]
    pub const fn to_cols_array(&self) -> [f64; 16] {
        let c = &self.cols;
        [
            c[0][0], c[0][1], c[0][2], c[0][3], c[1][0], c[1][1], c[1][2], c[1][3], c[2][0],
            c[2][1], c[2][2], c[2][3], c[3][0], c[3][1], c[3][2], c[3][3],
        ]
    }

    /// Returns column `i` (0-based).
    ///
    /// # Panics
    ///
    /// Panics if `i >= 4`.
    #[inline]
    #[must_use]
    pub const fn col(self, i: usize) -> [f64; 4] {
        self.cols[i]
    }

    /// Creates a pure translation transform.
    #[inline]
    #[must_use]
    pub const fn from_translation(x: f64, y: f64, z: f64) -> Self {
        Self {
            cols: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [x, y, z, 1.0],
            ],
        }
    }

    /// Creates a non-uniform scale transform.
    #[inline]
    #[must_use]
    pub const fn from_scale(sx: f64, sy: f64, sz: f64) -> Self {
        Self {
            cols: [
                [sx, 0.0, 0.0, 0.0],
                [0.0, sy, 0.0, 0.0],
                [0.0, 0.0, sz, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    /// Creates a rigid transform from an orientation and a translation.
    ///
    /// The rotation is applied first, then the translation.
    #[must_use]
    pub fn from_rotation_translation(q: Quat, t: Vec3) -> Self {
        let (x, y, z, w) = (q.x, q.y, q.z, q.w);
        let (x2, y2, z2) = (x + x, y + y, z + z);
        let (xx, xy, xz) = (x * x2, x * y2, x * z2);
        let (yy, yz, zz) = (y * y2, y * z2, z * z2);
        let (wx, wy, wz) = (w * x2, w * y2, w * z2);
        Self {
            cols: [
                [1.0 - (yy + zz), xy + wz, xz - wy, 0.0],
                [xy - wz, 1.0 - (xx + zz), yz + wx, 0.0],
                [xz + wy, yz - wx, 1.0 - (xx + yy), 0.0],
                [t.x, t.y, t.z, 1.0],
            ],
        }
    }

    /// Returns the translation component.
    #[inline]
    #[must_use]
    pub const fn translation(&self) -> Vec3 {
        Vec3::new(self.cols[3][0], self.cols[3][1], self.cols[3][2])
    }

    /// Returns the per-axis scale (lengths of the first three columns).
    #[must_use]
    pub fn scaling(&self) -> Vec3 {
        let len = |c: [f64; 4]| (c[0] * c[0] + c[1] * c[1] + c[2] * c[2]).sqrt();
        Vec3::new(len(self.cols[0]), len(self.cols[1]), len(self.cols[2]))
    }

    /// Extracts the rotation as a unit quaternion.
    ///
    /// Scale is divided out first, then the quaternion is computed by
    /// branching on the largest diagonal term to avoid precision loss for
    /// rotations near 180°.
    #[must_use]
    pub fn rotation(&self) -> Quat {
        let s = self.scaling();
        let inv = |v: f64| if v > 0.0 { 1.0 / v } else { 0.0 };
        let (i0, i1, i2) = (inv(s.x), inv(s.y), inv(s.z));
        let c = &self.cols;
        // r{row}{col}
        let (r00, r10, r20) = (c[0][0] * i0, c[0][1] * i0, c[0][2] * i0);
        let (r01, r11, r21) = (c[1][0] * i1, c[1][1] * i1, c[1][2] * i1);
        let (r02, r12, r22) = (c[2][0] * i2, c[2][1] * i2, c[2][2] * i2);

        let trace = r00 + r11 + r22;
        let q = if trace > 0.0 {
            let s = (trace + 1.0).sqrt() * 2.0;
            Quat::new((r21 - r12) / s, (r02 - r20) / s, (r10 - r01) / s, 0.25 * s)
        } else if r00 > r11 && r00 > r22 {
            let s = (1.0 + r00 - r11 - r22).sqrt() * 2.0;
            Quat::new(0.25 * s, (r01 + r10) / s, (r02 + r20) / s, (r21 - r12) / s)
        } else if r11 > r22 {
            let s = (1.0 + r11 - r00 - r22).sqrt() * 2.0;
            Quat::new((r01 + r10) / s, 0.25 * s, (r12 + r21) / s, (r02 - r20) / s)
        } else {
            let s = (1.0 + r22 - r00 - r11).sqrt() * 2.0;
            Quat::new((r02 + r20) / s, (r12 + r21) / s, 0.25 * s, (r10 - r01) / s)
        };
        q.normalize()
    }

    /// Returns the determinant.
    #[must_use]
    pub fn determinant(&self) -> f64 {
        let b = Cofactors::new(&self.to_cols_array());
        b.determinant()
    }

    /// Returns the inverse, or `None` if the matrix is singular or not finite.
    #[must_use]
    pub fn invert(&self) -> Option<Self> {
        let mut out = Self::IDENTITY;
        self.invert_into(&mut out).then_some(out)
    }

    /// Writes the inverse into `out`.
    ///
    /// Returns `false` and leaves `out` untouched when the matrix is singular
    /// (`|det| < SINGULAR_EPSILON`) or contains non-finite values.
    pub fn invert_into(&self, out: &mut Self) -> bool {
        let a = self.to_cols_array();
        let b = Cofactors::new(&a);
        let det = b.determinant();
        if !det.is_finite() || det.abs() < SINGULAR_EPSILON {
            return false;
        }
        let d = 1.0 / det;
        let [
            a00, a01, a02, a03, a10, a11, a12, a13, a20, a21, a22, a23, a30, a31, a32, a33,
        ] = a;
        let m = [
            (a11 * b.b11 - a12 * b.b10 + a13 * b.b09) * d,
            (a02 * b.b10 - a01 * b.b11 - a03 * b.b09) * d,
            (a31 * b.b05 - a32 * b.b04 + a33 * b.b03) * d,
            (a22 * b.b04 - a21 * b.b05 - a23 * b.b03) * d,
            (a12 * b.b08 - a10 * b.b11 - a13 * b.b07) * d,
            (a00 * b.b11 - a02 * b.b08 + a03 * b.b07) * d,
            (a32 * b.b02 - a30 * b.b05 - a33 * b.b01) * d,
            (a20 * b.b05 - a22 * b.b02 + a23 * b.b01) * d,
            (a10 * b.b10 - a11 * b.b08 + a13 * b.b06) * d,
            (a01 * b.b08 - a00 * b.b10 - a03 * b.b06) * d,
            (a30 * b.b04 - a31 * b.b02 + a33 * b.b00) * d,
            (a21 * b.b02 - a20 * b.b04 - a23 * b.b00) * d,
            (a11 * b.b07 - a10 * b.b09 - a12 * b.b06) * d,
            (a00 * b.b09 - a01 * b.b07 + a02 * b.b06) * d,
            (a31 * b.b01 - a30 * b.b03 - a32 * b.b00) * d,
            (a20 * b.b03 - a21 * b.b01 + a22 * b.b00) * d,
        ];
        *out = Self::from_cols_array(m);
        true
    }

    /// Writes `self * rhs` into `out`.
    #[inline]
    pub fn mul_into(&self, rhs: &Self, out: &mut Self) {
        *out = *self * *rhs;
    }

    /// Transforms a point (implicit `w = 1`), ignoring any projective row.
    #[must_use]
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        let [x, y, z, _] = self.transform_point4([p.x, p.y, p.z, 1.0]);
        Vec3::new(x, y, z)
    }

    /// Transforms a direction (implicit `w = 0`).
    #[must_use]
    pub fn transform_vector(&self, v: Vec3) -> Vec3 {
        let [x, y, z, _] = self.transform_point4([v.x, v.y, v.z, 0.0]);
        Vec3::new(x, y, z)
    }

    /// Multiplies a homogeneous 4-vector by this matrix.
    #[must_use]
    pub fn transform_point4(&self, v: [f64; 4]) -> [f64; 4] {
        let c = &self.cols;
        let mut out = [0.0_f64; 4];
        for (i, o) in out.iter_mut().enumerate() {
            *o = c[0][i] * v[0] + c[1][i] * v[1] + c[2][i] * v[2] + c[3][i] * v[3];
        }
        out
    }

    /// Element-wise comparison within `epsilon`.
    #[must_use]
    pub fn approx_eq(&self, other: &Self, epsilon: f64) -> bool {
        self.cols
            .iter()
            .flatten()
            .zip(other.cols.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= epsilon)
    }

    /// Is this transform [finite]?
    ///
    /// [finite]: f64::is_finite
    #[inline]
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.cols.iter().flatten().all(|v| v.is_finite())
    }

    /// Is any element [NaN]?
    ///
    /// [NaN]: f64::is_nan
    #[inline]
    #[must_use]
    pub fn is_nan(&self) -> bool {
        self.cols.iter().flatten().any(|v| v.is_nan())
    }
}

impl Default for Transform3d {
    #[inline]
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<[f64; 16]> for Transform3d {
    fn from(m: [f64; 16]) -> Self {
        Self::from_cols_array(m)
    }
}

impl From<Transform3d> for [f64; 16] {
    fn from(t: Transform3d) -> Self {
        t.to_cols_array()
    }
}

impl Mul for Transform3d {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        let a = &self.cols;
        let b = &rhs.cols;
        let mut out = [[0.0_f64; 4]; 4];
        let mut j = 0;
        while j < 4 {
            let mut i = 0;
            while i < 4 {
                out[j][i] =
                    a[0][i] * b[j][0] + a[1][i] * b[j][1] + a[2][i] * b[j][2] + a[3][i] * b[j][3];
                i += 1;
            }
            j += 1;
        }
        Self { cols: out }
    }
}

/// 2×2 sub-determinants shared by the determinant and the inverse.
struct Cofactors {
    b00: f64,
    b01: f64,
    b02: f64,
    b03: f64,
    b04: f64,
    b05: f64,
    b06: f64,
    b07: f64,
    b08: f64,
    b09: f64,
    b10: f64,
    b11: f64,
}

impl Cofactors {
    fn new(a: &[f64; 16]) -> Self {
        let [
            a00, a01, a02, a03, a10, a11, a12, a13, a20, a21, a22, a23, a30, a31, a32, a33,
        ] = *a;
        Self {
            b00: a00 * a11 - a01 * a10,
            b01: a00 * a12 - a02 * a10,
            b02: a00 * a13 - a03 * a10,
            b03: a01 * a12 - a02 * a11,
            b04: a01 * a13 - a03 * a11,
            b05: a02 * a13 - a03 * a12,
            b06: a20 * a31 - a21 * a30,
            b07: a20 * a32 - a22 * a30,
            b08: a20 * a33 - a23 * a30,
            b09: a21 * a32 - a22 * a31,
            b10: a21 * a33 - a23 * a31,
            b11: a22 * a33 - a23 * a32,
        }
    }

    fn determinant(&self) -> f64 {
        self.b00 * self.b11 - self.b01 * self.b10 + self.b02 * self.b09 + self.b03 * self.b08
            - self.b04 * self.b07
            + self.b05 * self.b06
    }
}
