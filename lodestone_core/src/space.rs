// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Reference spaces.
//!
//! A [`ReferenceSpace`] is a coordinate frame poses are expressed in. It is
//! the composition of two transforms:
//!
//! - a fixed **base** mapping native-world coordinates into the space's anchor
//!   frame (identity for `local`, the inverse floor pose for the floor
//!   spaces), and
//! - a consumer-controlled **origin offset**, the pose of the space's origin
//!   expressed in the anchor frame.
//!
//! ```text
//!   native world ──base──► anchor frame ──inv(offset)──► space
//! ```
//!
//! `viewer` is special: its anchor frame moves with the head, so mapping into
//! it needs the current head transform.
//!
//! Spaces are values. [`derive_offset_space`](ReferenceSpace::derive_offset_space)
//! returns a new space and never mutates its parent.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::fmt;
use core::str::FromStr;

use kurbo::Point;

use crate::error::Error;
use crate::native::NativeFloor;
use crate::rigid::RigidTransform;
use crate::transform::Transform3d;
use crate::vec3::Vec3;

/// The kinds of reference space a consumer can request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ReferenceSpaceType {
    /// Origin tracks the viewer's head.
    Viewer,
    /// Origin near the viewer's position at session start.
    Local,
    /// Like `local`, with `y = 0` at floor level.
    LocalFloor,
    /// Floor-level origin with a known boundary polygon.
    BoundedFloor,
    /// World-scale tracking without a fixed origin.
    Unbounded,
}

impl ReferenceSpaceType {
    /// Every type, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Viewer,
        Self::Local,
        Self::LocalFloor,
        Self::BoundedFloor,
        Self::Unbounded,
    ];

    /// Returns the wire string for this type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Local => "local",
            Self::LocalFloor => "local-floor",
            Self::BoundedFloor => "bounded-floor",
            Self::Unbounded => "unbounded",
        }
    }

    /// Whether the space's `y = 0` plane is the floor.
    #[must_use]
    pub const fn is_floor(self) -> bool {
        matches!(self, Self::LocalFloor | Self::BoundedFloor)
    }
}

impl fmt::Display for ReferenceSpaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceSpaceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::UnknownSpaceType(s.into()))
    }
}

/// A coordinate frame for poses, anchors and hit results.
#[derive(Clone, Debug)]
pub struct ReferenceSpace {
    /// Shared by clones; a derived space gets its own.
    identity: Rc<()>,
    kind: ReferenceSpaceType,
    /// Native world → anchor frame.
    base: Transform3d,
    /// Anchor frame → native world.
    base_inverse: Transform3d,
    origin_offset: RigidTransform,
    bounds: Vec<Point>,
}

impl ReferenceSpace {
    /// Creates a space of the given kind.
    ///
    /// `floor` is the native floor description, if the engine provides one.
    /// Floor spaces fall back to a floor `emulated_height` metres below the
    /// native origin when it does not; `bounded-floor` requires the native
    /// floor and at least three boundary points.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedSpace`] for `unbounded`.
    /// - [`Error::SpaceNotAvailable`] for `bounded-floor` without native
    ///   bounds.
    /// - [`Error::NumericDegenerate`] if the native floor transform is
    ///   singular.
    pub fn new(
        kind: ReferenceSpaceType,
        floor: Option<&NativeFloor>,
        emulated_height: f64,
    ) -> Result<Self, Error> {
        let emulated = Transform3d::from_translation(0.0, emulated_height, 0.0);
        let (base, bounds) = match kind {
            ReferenceSpaceType::Viewer | ReferenceSpaceType::Local => {
                (Transform3d::IDENTITY, Vec::new())
            }
            ReferenceSpaceType::LocalFloor => match floor {
                Some(floor) => (invert_floor(floor)?, Vec::new()),
                None => (emulated, Vec::new()),
            },
            ReferenceSpaceType::BoundedFloor => match floor {
                Some(floor) if floor.bounds.len() >= 3 => {
                    let bounds = floor.bounds.iter().map(|&[x, z]| Point::new(x, z)).collect();
                    (invert_floor(floor)?, bounds)
                }
                _ => return Err(Error::SpaceNotAvailable(kind)),
            },
            ReferenceSpaceType::Unbounded => return Err(Error::UnsupportedSpace(kind)),
        };
        let base_inverse = base
            .invert()
            .ok_or(Error::NumericDegenerate("reference space base"))?;
        log::debug!("created {kind} reference space");
        Ok(Self {
            identity: Rc::new(()),
            kind,
            base,
            base_inverse,
            origin_offset: RigidTransform::identity(),
            bounds,
        })
    }

    /// Returns a new space whose origin is `additional`, expressed in this
    /// space.
    ///
    /// The parent is unchanged; the child's offset is
    /// `self.origin_offset * additional`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NumericDegenerate`] if `additional` is not finite.
    pub fn derive_offset_space(&self, additional: &RigidTransform) -> Result<Self, Error> {
        if !additional.matrix().is_finite() {
            return Err(Error::NumericDegenerate("origin offset"));
        }
        let bounds = self
            .bounds
            .iter()
            .map(|p| {
                let local = additional
                    .inverse()
                    .matrix()
                    .transform_point(Vec3::new(p.x, 0.0, p.y));
                Point::new(local.x, local.z)
            })
            .collect();
        Ok(Self {
            identity: Rc::new(()),
            kind: self.kind,
            base: self.base,
            base_inverse: self.base_inverse,
            origin_offset: self.origin_offset.then(additional),
            bounds,
        })
    }

    /// Whether `other` is this space or a clone of it.
    #[must_use]
    pub fn is_same_space(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.identity, &other.identity)
    }

    pub(crate) fn identity(&self) -> &Rc<()> {
        &self.identity
    }

    /// The kind this space was created as.
    #[must_use]
    pub fn kind(&self) -> ReferenceSpaceType {
        self.kind
    }

    /// Native world → anchor frame.
    #[must_use]
    pub fn base(&self) -> Transform3d {
        self.base
    }

    /// Pose of this space's origin in its anchor frame.
    #[must_use]
    pub fn origin_offset(&self) -> &RigidTransform {
        &self.origin_offset
    }

    /// Boundary polygon on the floor plane, as `(x, z)` points in this space.
    ///
    /// Empty for every kind except `bounded-floor`.
    #[must_use]
    pub fn bounds(&self) -> &[Point] {
        &self.bounds
    }

    /// Maps a pose in native world coordinates into this space.
    ///
    /// For `viewer` the head pose is the origin itself, so the result is the
    /// inverse offset regardless of `pose`.
    #[must_use]
    pub fn apply_to_pose_matrix(&self, pose: &Transform3d) -> Transform3d {
        let inv_offset = self.origin_offset.inverse().matrix();
        match self.kind {
            ReferenceSpaceType::Viewer => inv_offset,
            _ => inv_offset * self.base * *pose,
        }
    }

    /// Maps a native view matrix (native world → eye) into a view matrix for
    /// this space (space → eye).
    #[must_use]
    pub fn apply_to_view_matrix(&self, view: &Transform3d, head: &Transform3d) -> Transform3d {
        let offset = self.origin_offset.matrix();
        match self.kind {
            ReferenceSpaceType::Viewer => *view * *head * offset,
            _ => *view * self.base_inverse * offset,
        }
    }

    /// Expresses any native-world matrix (anchor, hit result) in this space.
    ///
    /// Returns `None` for `viewer` when `head` is missing or singular.
    #[must_use]
    pub fn apply_to_native_matrix(
        &self,
        native: &Transform3d,
        head: Option<&Transform3d>,
    ) -> Option<Transform3d> {
        let inv_offset = self.origin_offset.inverse().matrix();
        match self.kind {
            ReferenceSpaceType::Viewer => {
                let inv_head = head?.invert()?;
                Some(inv_offset * inv_head * *native)
            }
            _ => Some(inv_offset * self.base * *native),
        }
    }

    /// Space → native world, the inverse of
    /// [`apply_to_native_matrix`](Self::apply_to_native_matrix).
    #[must_use]
    pub fn space_to_native(&self, head: Option<&Transform3d>) -> Option<Transform3d> {
        let offset = self.origin_offset.matrix();
        match self.kind {
            ReferenceSpaceType::Viewer => Some(*head? * offset),
            _ => Some(self.base_inverse * offset),
        }
    }
}

fn invert_floor(floor: &NativeFloor) -> Result<Transform3d, Error> {
    floor
        .transform
        .invert()
        .ok_or(Error::NumericDegenerate("native floor transform"))
}
