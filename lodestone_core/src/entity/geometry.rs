// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-entity geometry and incremental change detection.
//!
//! Every buffer is diffed against its previous contents with a fuzzy
//! element-wise comparison. A vertex-count change invalidates everything, so
//! consumers can rebuild GPU buffers wholesale; otherwise only the buffers
//! that actually moved are flagged.

use alloc::string::String;
use alloc::vec::Vec;

use crate::native::{NativeMesh, NativeObject, NativeObjectKind, NativePlane, PlaneAlignment};
use crate::transform::Transform3d;
use crate::vec3::Vec3;

bitflags::bitflags! {
    /// What changed on an entity during the current frame.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Changes: u16 {
        /// The entity transform moved.
        const POSE                = 1 << 0;
        /// The number of vertices changed.
        const VERTEX_COUNT        = 1 << 1;
        /// Vertex positions changed.
        const VERTEX_POSITIONS    = 1 << 2;
        /// Vertex normals changed.
        const VERTEX_NORMALS      = 1 << 3;
        /// Texture coordinates changed.
        const TEXTURE_COORDINATES = 1 << 4;
        /// Triangle indices changed.
        const TRIANGLE_INDICES    = 1 << 5;
        /// Plane boundary, center or extent changed.
        const BOUNDARY            = 1 << 6;
        /// Plane alignment changed.
        const ALIGNMENT           = 1 << 7;
        /// Face blend-shape coefficients changed.
        const BLEND_SHAPES        = 1 << 8;

        /// Every mesh-buffer flag.
        const MESH = Self::VERTEX_COUNT.bits()
            | Self::VERTEX_POSITIONS.bits()
            | Self::VERTEX_NORMALS.bits()
            | Self::TEXTURE_COORDINATES.bits()
            | Self::TRIANGLE_INDICES.bits();
        /// Every flag except `POSE`.
        const GEOMETRY = Self::MESH.bits()
            | Self::BOUNDARY.bits()
            | Self::ALIGNMENT.bits()
            | Self::BLEND_SHAPES.bits();
    }
}

impl Changes {
    /// Whether anything changed.
    #[inline]
    #[must_use]
    pub const fn changed(self) -> bool {
        !self.is_empty()
    }

    /// Whether the transform moved.
    #[inline]
    #[must_use]
    pub const fn pose_changed(self) -> bool {
        self.contains(Self::POSE)
    }

    /// Whether the vertex count changed.
    #[inline]
    #[must_use]
    pub const fn vertex_count_changed(self) -> bool {
        self.contains(Self::VERTEX_COUNT)
    }

    /// Whether vertex positions changed.
    #[inline]
    #[must_use]
    pub const fn vertex_positions_changed(self) -> bool {
        self.contains(Self::VERTEX_POSITIONS)
    }

    /// Whether vertex normals changed.
    #[inline]
    #[must_use]
    pub const fn vertex_normals_changed(self) -> bool {
        self.contains(Self::VERTEX_NORMALS)
    }

    /// Whether texture coordinates changed.
    #[inline]
    #[must_use]
    pub const fn texture_coordinates_changed(self) -> bool {
        self.contains(Self::TEXTURE_COORDINATES)
    }

    /// Whether triangle indices changed.
    #[inline]
    #[must_use]
    pub const fn triangle_indices_changed(self) -> bool {
        self.contains(Self::TRIANGLE_INDICES)
    }

    /// Whether the plane boundary changed.
    #[inline]
    #[must_use]
    pub const fn boundary_changed(self) -> bool {
        self.contains(Self::BOUNDARY)
    }

    /// Whether the plane alignment changed.
    #[inline]
    #[must_use]
    pub const fn alignment_changed(self) -> bool {
        self.contains(Self::ALIGNMENT)
    }

    /// Whether any geometry buffer changed.
    #[inline]
    #[must_use]
    pub const fn geometry_changed(self) -> bool {
        self.intersects(Self::GEOMETRY)
    }
}

/// Mesh buffers of a plane, mesh chunk or face.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshGeometry {
    /// Vertex positions as `xyz` triples.
    pub vertices: Vec<f32>,
    /// Vertex normals as `xyz` triples.
    pub normals: Vec<f32>,
    /// Texture coordinates as `uv` pairs.
    pub texture_coordinates: Vec<f32>,
    /// Triangle vertex indices.
    pub triangle_indices: Vec<u32>,
}

impl MeshGeometry {
    fn from_native(src: &NativeMesh) -> Self {
        Self {
            vertices: src.vertices.clone(),
            normals: src.normals.clone(),
            texture_coordinates: src.texture_coordinates.clone(),
            triangle_indices: src.triangle_indices.clone(),
        }
    }

    /// Number of vertices.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 3
    }

    /// Diffs against `src` and copies whatever moved.
    ///
    /// Normals are skipped when `with_normals` is false (planes derive their
    /// own).
    fn update(&mut self, src: &NativeMesh, epsilon: f64, with_normals: bool) -> Changes {
        if src.vertices.len() != self.vertices.len() {
            let normals = core::mem::take(&mut self.normals);
            *self = Self::from_native(src);
            if !with_normals {
                self.normals = normals;
            }
            return Changes::MESH;
        }
        let mut changes = Changes::empty();
        if sync_f32(&mut self.vertices, &src.vertices, epsilon) {
            changes |= Changes::VERTEX_POSITIONS;
        }
        if with_normals && sync_f32(&mut self.normals, &src.normals, epsilon) {
            changes |= Changes::VERTEX_NORMALS;
        }
        if sync_f32(
            &mut self.texture_coordinates,
            &src.texture_coordinates,
            epsilon,
        ) {
            changes |= Changes::TEXTURE_COORDINATES;
        }
        if self.triangle_indices != src.triangle_indices {
            self.triangle_indices.clone_from(&src.triangle_indices);
            changes |= Changes::TRIANGLE_INDICES;
        }
        changes
    }
}

/// A detected plane.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlaneGeometry {
    /// Triangulated plane surface; normals are derived from the transform.
    pub mesh: MeshGeometry,
    /// Boundary polygon as plane-local `xyz` triples.
    pub boundary: Vec<f32>,
    /// Orientation class.
    pub alignment: PlaneAlignment,
    /// Center in plane-local coordinates.
    pub center: Vec3,
    /// Width and length in metres.
    pub extent: [f64; 2],
    /// Plane normal in native world coordinates.
    pub normal: Vec3,
}

impl PlaneGeometry {
    fn from_native(mesh: &NativeMesh, plane: &NativePlane, transform: &Transform3d) -> Self {
        let mut out = Self {
            mesh: MeshGeometry::from_native(mesh),
            boundary: plane.boundary_vertices.clone(),
            alignment: plane.alignment,
            center: plane.center,
            extent: plane.extent,
            normal: plane_normal(transform),
        };
        out.fill_normals();
        out
    }

    fn update(
        &mut self,
        mesh: &NativeMesh,
        plane: &NativePlane,
        transform: &Transform3d,
        epsilon: f64,
    ) -> Changes {
        let mut changes = self.mesh.update(mesh, epsilon, false);
        let normal = plane_normal(transform);
        if changes.vertex_count_changed() || !normal.approx_eq(self.normal, epsilon) {
            self.normal = normal;
            self.fill_normals();
            changes |= Changes::VERTEX_NORMALS;
        }
        let mut boundary = sync_f32(&mut self.boundary, &plane.boundary_vertices, epsilon);
        if !plane.center.approx_eq(self.center, epsilon)
            || (plane.extent[0] - self.extent[0]).abs() > epsilon
            || (plane.extent[1] - self.extent[1]).abs() > epsilon
        {
            self.center = plane.center;
            self.extent = plane.extent;
            boundary = true;
        }
        if boundary {
            changes |= Changes::BOUNDARY;
        }
        if plane.alignment != self.alignment {
            self.alignment = plane.alignment;
            changes |= Changes::ALIGNMENT;
        }
        changes
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "normals are stored as f32 like every other mesh buffer"
    )]
    fn fill_normals(&mut self) {
        let n = [self.normal.x as f32, self.normal.y as f32, self.normal.z as f32];
        let count = self.mesh.vertex_count();
        self.mesh.normals.clear();
        self.mesh.normals.reserve(count * 3);
        for _ in 0..count {
            self.mesh.normals.extend_from_slice(&n);
        }
    }
}

/// A tracked face.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FaceGeometry {
    /// Face mesh.
    pub mesh: MeshGeometry,
    /// Blend-shape coefficients in engine order.
    pub blend_shapes: Vec<f32>,
}

/// Kind-specific payload of an entity slot.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) enum Geometry {
    /// Anchors and offsets.
    #[default]
    None,
    Mesh(MeshGeometry),
    Plane(PlaneGeometry),
    Face(FaceGeometry),
    Image(Option<String>),
}

impl Geometry {
    /// Builds the payload for a newly tracked object.
    pub(crate) fn from_native(obj: &NativeObject) -> Result<Self, &'static str> {
        Ok(match obj.kind {
            NativeObjectKind::Anchor => Self::None,
            NativeObjectKind::Mesh => Self::Mesh(MeshGeometry::from_native(required_mesh(obj)?)),
            NativeObjectKind::Plane => {
                let plane = obj.plane.as_ref().ok_or("plane without plane data")?;
                Self::Plane(PlaneGeometry::from_native(
                    required_mesh(obj)?,
                    plane,
                    &obj.transform,
                ))
            }
            NativeObjectKind::Face => Self::Face(FaceGeometry {
                mesh: MeshGeometry::from_native(required_mesh(obj)?),
                blend_shapes: obj.blend_shapes.clone().unwrap_or_default(),
            }),
            NativeObjectKind::Image => Self::Image(obj.image_name.clone()),
        })
    }

    /// Checks that `obj` carries what an update of this payload needs,
    /// without touching anything.
    pub(crate) fn validate(&self, obj: &NativeObject) -> Result<(), &'static str> {
        match self {
            Self::Mesh(_) | Self::Face(_) => required_mesh(obj).map(drop),
            Self::Plane(_) => {
                required_mesh(obj)?;
                obj.plane.as_ref().map(drop).ok_or("plane without plane data")
            }
            Self::None | Self::Image(_) => Ok(()),
        }
    }

    /// Diffs against a steady-state update. Call [`validate`](Self::validate)
    /// first; missing buffers are treated as unchanged.
    pub(crate) fn update(&mut self, obj: &NativeObject, epsilon: f64) -> Changes {
        match self {
            Self::None => Changes::empty(),
            Self::Mesh(mesh) => obj
                .geometry
                .as_ref()
                .map_or(Changes::empty(), |src| mesh.update(src, epsilon, true)),
            Self::Plane(plane) => match (&obj.geometry, &obj.plane) {
                (Some(mesh), Some(extra)) => plane.update(mesh, extra, &obj.transform, epsilon),
                _ => Changes::empty(),
            },
            Self::Face(face) => {
                let mut changes = obj
                    .geometry
                    .as_ref()
                    .map_or(Changes::empty(), |src| face.mesh.update(src, epsilon, true));
                if let Some(shapes) = &obj.blend_shapes {
                    if sync_f32(&mut face.blend_shapes, shapes, epsilon) {
                        changes |= Changes::BLEND_SHAPES;
                    }
                }
                changes
            }
            Self::Image(name) => {
                if obj.image_name.is_some() && obj.image_name != *name {
                    name.clone_from(&obj.image_name);
                }
                Changes::empty()
            }
        }
    }
}

fn required_mesh(obj: &NativeObject) -> Result<&NativeMesh, &'static str> {
    obj.geometry.as_ref().ok_or("missing required geometry")
}

/// Local up axis carried through the plane transform.
fn plane_normal(transform: &Transform3d) -> Vec3 {
    transform
        .transform_vector(Vec3::UP)
        .normalize()
        .unwrap_or(Vec3::UP)
}

/// Copies `src` into `dst` if any element differs by more than `epsilon` (or
/// the lengths differ). Returns whether a copy happened.
fn sync_f32(dst: &mut Vec<f32>, src: &[f32], epsilon: f64) -> bool {
    let differs = dst.len() != src.len()
        || dst
            .iter()
            .zip(src)
            .any(|(a, b)| (f64::from(*a) - f64::from(*b)).abs() > epsilon);
    if differs {
        dst.clear();
        dst.extend_from_slice(src);
    }
    differs
}
