// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Immutable rigid transforms with a cached inverse.
//!
//! A [`RigidTransform`] is a position and unit orientation together with the
//! equivalent [`Transform3d`]. Values are shared cheaply (`Rc`) and never
//! change after construction; the only interior state is the inverse, which
//! is computed on first request and cached.
//!
//! The cached inverse links back to its origin:
//!
//! ```text
//!   original ──strong──► inverse
//!      ▲                   │
//!      └──────weak─────────┘
//! ```
//!
//! so `t.inverse().inverse()` is `t` itself for as long as `t` is alive,
//! without forming a reference cycle.

use alloc::rc::{Rc, Weak};
use core::cell::RefCell;
use core::fmt;

use crate::quat::Quat;
use crate::transform::Transform3d;
use crate::vec3::Vec3;

/// A shared, immutable position + orientation.
#[derive(Clone)]
pub struct RigidTransform {
    inner: Rc<Inner>,
}

struct Inner {
    position: Vec3,
    orientation: Quat,
    matrix: Transform3d,
    inverse: RefCell<InverseLink>,
}

enum InverseLink {
    Unset,
    /// This transform computed its inverse and owns it.
    Owned(Rc<Inner>),
    /// This transform *is* an inverse; points back at the original.
    Origin(Weak<Inner>),
}

impl RigidTransform {
    /// Creates a transform from a position and an orientation.
    ///
    /// The orientation is normalized; a degenerate quaternion becomes the
    /// identity rotation.
    #[must_use]
    pub fn new(position: Vec3, orientation: Quat) -> Self {
        let orientation = orientation.normalize();
        let matrix = Transform3d::from_rotation_translation(orientation, position);
        Self::from_parts(position, orientation, matrix, InverseLink::Unset)
    }

    /// Creates a transform by decomposing `matrix` once.
    ///
    /// The matrix is kept as given; position and orientation are derived
    /// from it.
    #[must_use]
    pub fn from_matrix(matrix: Transform3d) -> Self {
        Self::from_parts(
            matrix.translation(),
            matrix.rotation(),
            matrix,
            InverseLink::Unset,
        )
    }

    /// The identity transform.
    #[must_use]
    pub fn identity() -> Self {
        Self::new(Vec3::ZERO, Quat::IDENTITY)
    }

    fn from_parts(
        position: Vec3,
        orientation: Quat,
        matrix: Transform3d,
        inverse: InverseLink,
    ) -> Self {
        Self {
            inner: Rc::new(Inner {
                position,
                orientation,
                matrix,
                inverse: RefCell::new(inverse),
            }),
        }
    }

    /// Translation component.
    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.inner.position
    }

    /// Unit orientation.
    #[must_use]
    pub fn orientation(&self) -> Quat {
        self.inner.orientation
    }

    /// The equivalent matrix.
    #[must_use]
    pub fn matrix(&self) -> Transform3d {
        self.inner.matrix
    }

    /// Returns the inverse transform, computing and caching it on first use.
    ///
    /// If `self` was itself produced by `inverse()`, the original transform
    /// is returned while it is still alive.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let mut link = self.inner.inverse.borrow_mut();
        match &*link {
            InverseLink::Owned(inv) => {
                return Self {
                    inner: Rc::clone(inv),
                };
            }
            InverseLink::Origin(origin) => {
                if let Some(inner) = origin.upgrade() {
                    return Self { inner };
                }
            }
            InverseLink::Unset => {}
        }

        let inverse = self.compute_inverse();
        *link = InverseLink::Owned(Rc::clone(&inverse.inner));
        inverse
    }

    fn compute_inverse(&self) -> Self {
        let orientation = self.inner.orientation.conjugate();
        let back = InverseLink::Origin(Rc::downgrade(&self.inner));
        match self.inner.matrix.invert() {
            Some(matrix) => Self::from_parts(matrix.translation(), orientation, matrix, back),
            None => {
                let position = -orientation.rotate(self.inner.position);
                let matrix = Transform3d::from_rotation_translation(orientation, position);
                Self::from_parts(position, orientation, matrix, back)
            }
        }
    }

    /// Composes `self * rhs` (apply `rhs` first).
    #[must_use]
    pub fn then(&self, rhs: &Self) -> Self {
        Self::from_matrix(self.inner.matrix * rhs.inner.matrix)
    }

    /// Whether both handles share the same underlying value.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Compares the matrices within `epsilon`.
    #[must_use]
    pub fn approx_eq(&self, other: &Self, epsilon: f64) -> bool {
        self.inner.matrix.approx_eq(&other.inner.matrix, epsilon)
    }
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl From<Transform3d> for RigidTransform {
    fn from(matrix: Transform3d) -> Self {
        Self::from_matrix(matrix)
    }
}

impl fmt::Debug for RigidTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RigidTransform")
            .field("position", &self.inner.position)
            .field("orientation", &self.inner.orientation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RigidTransform {
        RigidTransform::new(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), 0.5),
        )
    }

    #[test]
    fn inverse_of_inverse_is_same_object() {
        let t = sample();
        let inv = t.inverse();
        assert!(inv.inverse().ptr_eq(&t));
        // Cached: a second call returns the same inverse.
        assert!(t.inverse().ptr_eq(&inv));
    }

    #[test]
    fn inverse_composes_to_identity() {
        let t = sample();
        let product = t.matrix() * t.inverse().matrix();
        assert!(product.approx_eq(&Transform3d::IDENTITY, 1e-12));
        assert!(
            t.inverse()
                .position()
                .approx_eq(-t.orientation().conjugate().rotate(t.position()), 1e-12)
        );
    }

    #[test]
    fn inverse_survives_original_drop() {
        let inv = sample().inverse();
        // Origin is gone; a fresh inverse is computed.
        let again = inv.inverse();
        assert!(again.approx_eq(&sample(), 1e-12));
        assert!(again.inverse().ptr_eq(&inv));
    }

    #[test]
    fn no_reference_cycle() {
        let t = sample();
        let inv = t.inverse();
        let weak = Rc::downgrade(&inv.inner);
        drop(inv);
        drop(t);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn from_matrix_decomposes() {
        let m = sample().matrix();
        let t = RigidTransform::from_matrix(m);
        assert!(t.position().approx_eq(Vec3::new(1.0, 2.0, 3.0), 1e-12));
        assert!(t.orientation().approx_eq(sample().orientation(), 1e-12));
    }

    #[test]
    fn orientation_is_normalized() {
        let t = RigidTransform::new(Vec3::ZERO, Quat::new(0.0, 0.0, 0.0, 2.0));
        assert_eq!(t.orientation(), Quat::IDENTITY);
        assert!(t.approx_eq(&RigidTransform::default(), 0.0));
    }
}
