// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Unit quaternions for orientations.

use core::ops::Mul;
#[cfg(not(feature = "std"))]
use kurbo::common::FloatFuncs as _;

use crate::vec3::Vec3;

/// A quaternion `(x, y, z, w)` where `w` is the scalar part.
///
/// Orientations are always stored normalized; constructors that accept
/// arbitrary input fall back to [`Quat::IDENTITY`] for degenerate values.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Quat {
    /// X component of the vector part.
    pub x: f64,
    /// Y component of the vector part.
    pub y: f64,
    /// Z component of the vector part.
    pub z: f64,
    /// Scalar part.
    pub w: f64,
}

impl Quat {
    /// The identity rotation.
    pub const IDENTITY: Self = Self::new(0.0, 0.0, 0.0, 1.0);

    /// Creates a quaternion from raw components (not normalized).
    #[inline]
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    /// Creates a rotation of `radians` around `axis`.
    ///
    /// A zero axis yields the identity.
    #[must_use]
    pub fn from_axis_angle(axis: Vec3, radians: f64) -> Self {
        let Some(axis) = axis.normalize() else {
            return Self::IDENTITY;
        };
        let half = radians * 0.5;
        let s = half.sin();
        Self::new(axis.x * s, axis.y * s, axis.z * s, half.cos())
    }

    /// Squared norm.
    #[inline]
    #[must_use]
    pub fn length_squared(self) -> f64 {
        self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w
    }

    /// Returns the normalized quaternion, or the identity if the input is
    /// zero-length or non-finite.
    #[must_use]
    pub fn normalize(self) -> Self {
        let len = self.length_squared().sqrt();
        if !len.is_finite() || len < 1e-12 {
            return Self::IDENTITY;
        }
        let inv = 1.0 / len;
        Self::new(self.x * inv, self.y * inv, self.z * inv, self.w * inv)
    }

    /// The conjugate, which is the inverse for unit quaternions.
    #[inline]
    #[must_use]
    pub fn conjugate(self) -> Self {
        Self::new(-self.x, -self.y, -self.z, self.w)
    }

    /// Rotates a vector by this (unit) quaternion.
    #[must_use]
    pub fn rotate(self, v: Vec3) -> Vec3 {
        // v' = v + 2w(q × v) + 2(q × (q × v))
        let q = Vec3::new(self.x, self.y, self.z);
        let t = q.cross(v) * 2.0;
        v + t * self.w + q.cross(t)
    }

    /// Whether all components are finite.
    #[inline]
    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.w.is_finite()
    }

    /// Compares two rotations within `epsilon`, treating `q` and `-q` as
    /// equal.
    #[must_use]
    pub fn approx_eq(self, other: Self, epsilon: f64) -> bool {
        let same = (self.x - other.x).abs() <= epsilon
            && (self.y - other.y).abs() <= epsilon
            && (self.z - other.z).abs() <= epsilon
            && (self.w - other.w).abs() <= epsilon;
        let flipped = (self.x + other.x).abs() <= epsilon
            && (self.y + other.y).abs() <= epsilon
            && (self.z + other.z).abs() <= epsilon
            && (self.w + other.w).abs() <= epsilon;
        same || flipped
    }
}

impl Default for Quat {
    #[inline]
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul for Quat {
    type Output = Self;

    /// Hamilton product: `a * b` applies `b` first, then `a`.
    #[inline]
    fn mul(self, b: Self) -> Self {
        let a = self;
        Self::new(
            a.w * b.x + a.x * b.w + a.y * b.z - a.z * b.y,
            a.w * b.y - a.x * b.z + a.y * b.w + a.z * b.x,
            a.w * b.z + a.x * b.y - a.y * b.x + a.z * b.w,
            a.w * b.w - a.x * b.x - a.y * b.y - a.z * b.z,
        )
    }
}

#[cfg(test)]
mod tests {
    use core::f64::consts::FRAC_PI_2;

    use super::*;

    #[test]
    fn rotate_x_axis_about_z() {
        let q = Quat::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), FRAC_PI_2);
        let v = q.rotate(Vec3::new(1.0, 0.0, 0.0));
        assert!(v.approx_eq(Vec3::new(0.0, 1.0, 0.0), 1e-12), "got {v:?}");
    }

    #[test]
    fn conjugate_undoes_rotation() {
        let q = Quat::from_axis_angle(Vec3::new(1.0, 2.0, 3.0), 0.7);
        let p = Vec3::new(4.0, -1.0, 0.5);
        let back = q.conjugate().rotate(q.rotate(p));
        assert!(back.approx_eq(p, 1e-12));
        assert!((q * q.conjugate()).approx_eq(Quat::IDENTITY, 1e-12));
    }

    #[test]
    fn degenerate_normalizes_to_identity() {
        assert_eq!(Quat::new(0.0, 0.0, 0.0, 0.0).normalize(), Quat::IDENTITY);
        assert_eq!(
            Quat::new(f64::NAN, 0.0, 0.0, 1.0).normalize(),
            Quat::IDENTITY
        );
    }

    #[test]
    fn negated_quaternion_is_same_rotation() {
        let q = Quat::from_axis_angle(Vec3::UP, 1.0);
        let neg = Quat::new(-q.x, -q.y, -q.z, -q.w);
        assert!(q.approx_eq(neg, 1e-12));
    }
}
