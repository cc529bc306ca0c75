// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Viewer poses resolved per reference space.
//!
//! The native frame delivers a head transform and per-eye view matrices in
//! native world coordinates. [`PoseCache::resolve`] expresses them in a
//! consumer's [`ReferenceSpace`]:
//!
//! ```text
//!   head pose   = space.apply_to_pose_matrix(head)
//!   eye pose    = invert(space.apply_to_view_matrix(view, head))
//! ```
//!
//! Tracking loss (no head transform) and numeric failures never surface as
//! an identity or `NaN` pose: the last valid pose for that space is returned
//! instead.

use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;

use crate::native::NativeFrame;
use crate::rigid::RigidTransform;
use crate::space::ReferenceSpace;
use crate::transform::Transform3d;

/// Which eye a view renders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Eye {
    /// Mono (handheld) view.
    None,
    /// Left eye.
    Left,
    /// Right eye.
    Right,
}

impl Eye {
    /// Returns the wire string for this eye.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

/// One rendered view of the viewer pose.
#[derive(Clone, Debug)]
pub struct View {
    eye: Eye,
    projection: Transform3d,
    transform: RigidTransform,
}

impl View {
    /// Which eye this view is for.
    #[must_use]
    pub fn eye(&self) -> Eye {
        self.eye
    }

    /// Projection matrix.
    #[must_use]
    pub fn projection(&self) -> Transform3d {
        self.projection
    }

    /// Eye pose in the reference space.
    #[must_use]
    pub fn transform(&self) -> &RigidTransform {
        &self.transform
    }

    /// View matrix (reference space → eye).
    #[must_use]
    pub fn view_matrix(&self) -> Transform3d {
        self.transform.inverse().matrix()
    }
}

/// Head pose plus per-eye views for one frame and one reference space.
#[derive(Clone, Debug)]
pub struct ViewerPose {
    transform: RigidTransform,
    views: Vec<View>,
}

impl ViewerPose {
    /// Head pose in the reference space.
    #[must_use]
    pub fn transform(&self) -> &RigidTransform {
        &self.transform
    }

    /// Views, left before right.
    #[must_use]
    pub fn views(&self) -> &[View] {
        &self.views
    }
}

/// The view-related part of a native frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NativeViewState {
    /// Head pose in native world coordinates, if tracked.
    pub head: Option<Transform3d>,
    /// Per-eye native view matrices. Empty means one mono view derived from
    /// the head.
    pub views: Vec<(Eye, Transform3d)>,
    /// Shared projection matrix.
    pub projection: Transform3d,
}

impl NativeViewState {
    /// Extracts view state from a native frame.
    #[must_use]
    pub fn from_frame(frame: &NativeFrame) -> Self {
        let mut out = Self::default();
        out.update_from(frame);
        out
    }

    /// Overwrites this state from a native frame, reusing storage.
    pub fn update_from(&mut self, frame: &NativeFrame) {
        self.head = frame.head_transform;
        self.projection = frame.projection_matrix;
        self.views.clear();
        match (frame.left_view_matrix, frame.right_view_matrix) {
            (Some(left), Some(right)) => {
                self.views.push((Eye::Left, left));
                self.views.push((Eye::Right, right));
            }
            (Some(mono), None) | (None, Some(mono)) => self.views.push((Eye::None, mono)),
            (None, None) => {}
        }
    }
}

/// Last valid viewer pose per reference space.
///
/// Entries do not keep their space alive and are pruned once it is dropped.
#[derive(Clone, Debug, Default)]
pub struct PoseCache {
    last: Vec<Entry>,
}

#[derive(Clone, Debug)]
struct Entry {
    space: Weak<()>,
    pose: ViewerPose,
}

impl PoseCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the viewer pose in `space`.
    ///
    /// Falls back to the previous pose for the space when the head is not
    /// tracked or a matrix is singular or non-finite. Returns `None` only if
    /// no valid pose was ever resolved for the space.
    pub fn resolve(
        &mut self,
        space: &ReferenceSpace,
        state: &NativeViewState,
    ) -> Option<ViewerPose> {
        let Some(head) = state.head else {
            return self.get(space).cloned();
        };
        match compute(space, &head, state) {
            Ok(pose) => {
                self.store(space, pose.clone());
                Some(pose)
            }
            Err(reason) => {
                log::warn!("keeping previous {} pose: {reason}", space.kind());
                self.get(space).cloned()
            }
        }
    }

    /// Number of spaces with a cached pose.
    #[must_use]
    pub fn len(&self) -> usize {
        self.last.len()
    }

    /// Whether no pose is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }

    /// Forgets every cached pose.
    pub fn clear(&mut self) {
        self.last.clear();
    }

    fn get(&self, space: &ReferenceSpace) -> Option<&ViewerPose> {
        let key = Rc::as_ptr(space.identity());
        self.last
            .iter()
            .find(|e| e.space.as_ptr() == key)
            .map(|e| &e.pose)
    }

    fn store(&mut self, space: &ReferenceSpace, pose: ViewerPose) {
        let key = Rc::as_ptr(space.identity());
        if let Some(entry) = self.last.iter_mut().find(|e| e.space.as_ptr() == key) {
            entry.pose = pose;
            return;
        }
        self.last.retain(|e| e.space.strong_count() > 0);
        self.last.push(Entry {
            space: Rc::downgrade(space.identity()),
            pose,
        });
    }
}

fn compute(
    space: &ReferenceSpace,
    head: &Transform3d,
    state: &NativeViewState,
) -> Result<ViewerPose, &'static str> {
    if !head.is_finite() {
        return Err("non-finite head transform");
    }
    let pose = space.apply_to_pose_matrix(head);
    if !pose.is_finite() {
        return Err("non-finite viewer pose");
    }

    let mut views = Vec::with_capacity(state.views.len().max(1));
    if state.views.is_empty() {
        let mono = head.invert().ok_or("singular head transform")?;
        views.push(eye_view(space, Eye::None, &mono, head, state.projection)?);
    } else {
        for (eye, view) in &state.views {
            views.push(eye_view(space, *eye, view, head, state.projection)?);
        }
    }

    Ok(ViewerPose {
        transform: RigidTransform::from_matrix(pose),
        views,
    })
}

fn eye_view(
    space: &ReferenceSpace,
    eye: Eye,
    view: &Transform3d,
    head: &Transform3d,
    projection: Transform3d,
) -> Result<View, &'static str> {
    let eye_pose = space
        .apply_to_view_matrix(view, head)
        .invert()
        .ok_or("singular view matrix")?;
    if !eye_pose.is_finite() {
        return Err("non-finite eye pose");
    }
    Ok(View {
        eye,
        projection,
        transform: RigidTransform::from_matrix(eye_pose),
    })
}
