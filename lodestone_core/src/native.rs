// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Contract with the native tracking engine.
//!
//! The engine runs out of process (or at least out of our control) and talks
//! to the session over an asynchronous message channel:
//!
//! - **Outbound**: the session pushes [`NativeRequest`]s into an injected
//!   [`NativeBridge`]. Requests that expect an answer carry a
//!   [`RequestId`]; the matching [`NativeResponse`] echoes it.
//!
//! - **Inbound**: the host feeds every message it receives to
//!   [`Session::handle`](crate::session::Session::handle) as a
//!   [`NativeEvent`]. With the `serde` feature these types deserialize
//!   directly from the engine's JSON (camelCase fields, matrices as flat
//!   16-number column-major arrays).
//!
//! Nothing here interprets the payloads; the entity store, clock sync and
//! request layer do that.

use alloc::string::String;
use alloc::vec::Vec;

use crate::entity::Uid;
use crate::hit_test::NativeHit;
use crate::request::RequestId;
use crate::session::SessionMode;
use crate::time::Timestamp;
use crate::transform::Transform3d;
use crate::vec3::Vec3;

/// Outbound side of the native channel.
///
/// Implementations forward requests to the engine. `send` must not call back
/// into the session; responses arrive later through
/// [`Session::handle`](crate::session::Session::handle).
pub trait NativeBridge {
    /// Delivers one request to the native engine.
    fn send(&mut self, request: NativeRequest);
}

impl<B: NativeBridge + ?Sized> NativeBridge for &mut B {
    fn send(&mut self, request: NativeRequest) {
        (**self).send(request);
    }
}

/// A message from the native engine.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")
)]
pub enum NativeEvent {
    /// A clock synchronization sample on the native timeline.
    SetTime {
        /// Native time at which the message was produced.
        timestamp: Timestamp,
    },
    /// A tracking update.
    Frame(NativeFrame),
    /// The answer to an earlier request.
    Response(NativeResponse),
}

/// One tracking update from the native engine.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct NativeFrame {
    /// Native capture time.
    pub timestamp: Timestamp,
    /// Head (camera) pose in native world coordinates, absent while tracking
    /// is lost.
    pub head_transform: Option<Transform3d>,
    /// Left-eye (or mono) view matrix, native world → eye.
    pub left_view_matrix: Option<Transform3d>,
    /// Right-eye view matrix for stereo devices.
    pub right_view_matrix: Option<Transform3d>,
    /// Projection matrix shared by all views.
    pub projection_matrix: Transform3d,
    /// Ambient light intensity, if estimated.
    pub light_estimate: Option<f64>,
    /// Entity changes carried by this frame.
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub objects: NativeObjects,
}

/// The entity portion of a native frame.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct NativeObjects {
    /// Objects the engine started tracking.
    pub new_objects: Vec<NativeObject>,
    /// Uids the engine stopped tracking.
    pub removed_objects: Vec<Uid>,
    /// Steady-state updates for already-known objects.
    pub objects: Vec<NativeObject>,
}

impl NativeObjects {
    /// Whether the batch carries no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new_objects.is_empty() && self.removed_objects.is_empty() && self.objects.is_empty()
    }
}

/// Kinds of object the native engine tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum NativeObjectKind {
    /// A bare anchor.
    Anchor,
    /// A detected plane.
    Plane,
    /// A reconstructed mesh chunk.
    Mesh,
    /// A tracked face.
    Face,
    /// A detected reference image.
    Image,
}

/// One tracked object as reported by the engine.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct NativeObject {
    /// Engine-assigned identifier.
    pub uuid: Uid,
    /// What the object is.
    pub kind: NativeObjectKind,
    /// Pose in native world coordinates.
    pub transform: Transform3d,
    /// Mesh buffers for planes, meshes and faces.
    #[cfg_attr(feature = "serde", serde(default))]
    pub geometry: Option<NativeMesh>,
    /// Plane-specific data.
    #[cfg_attr(feature = "serde", serde(default))]
    pub plane: Option<NativePlane>,
    /// Face blend-shape coefficients.
    #[cfg_attr(feature = "serde", serde(default))]
    pub blend_shapes: Option<Vec<f32>>,
    /// Name of the detection image that produced an image anchor.
    #[cfg_attr(feature = "serde", serde(default))]
    pub image_name: Option<String>,
}

impl NativeObject {
    /// Creates an object with no geometry.
    #[must_use]
    pub fn new(uuid: impl Into<Uid>, kind: NativeObjectKind, transform: Transform3d) -> Self {
        Self {
            uuid: uuid.into(),
            kind,
            transform,
            geometry: None,
            plane: None,
            blend_shapes: None,
            image_name: None,
        }
    }
}

/// Flat mesh buffers.
///
/// Positions and normals are `xyz` triples, texture coordinates `uv` pairs.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct NativeMesh {
    /// Vertex positions.
    pub vertices: Vec<f32>,
    /// Vertex normals (ignored for planes, which derive their own).
    pub normals: Vec<f32>,
    /// Texture coordinates.
    pub texture_coordinates: Vec<f32>,
    /// Triangle vertex indices.
    pub triangle_indices: Vec<u32>,
}

/// Orientation class of a detected plane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum PlaneAlignment {
    /// Floor, table or ceiling.
    #[default]
    Horizontal,
    /// Wall.
    Vertical,
}

/// Plane extras on top of the mesh buffers.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct NativePlane {
    /// Orientation class.
    pub alignment: PlaneAlignment,
    /// Center in plane-local coordinates.
    pub center: Vec3,
    /// Width and length in metres.
    pub extent: [f64; 2],
    /// Boundary polygon as plane-local `xyz` triples.
    pub boundary_vertices: Vec<f32>,
}

/// Native floor description handed over at initialization.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct NativeFloor {
    /// Floor origin pose in native world coordinates.
    pub transform: Transform3d,
    /// Boundary polygon as `[x, z]` points in floor coordinates.
    pub bounds: Vec<[f64; 2]>,
}

/// What the native engine can do, reported in its handshake.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct Capabilities {
    /// Ray-cast hit testing.
    pub hit_test: bool,
    /// Adding and removing anchors.
    pub anchors: bool,
    /// Reference-image detection.
    pub image_detection: bool,
    /// World-map save and restore.
    pub world_map: bool,
}

/// Pixels of a reference image, uploaded once and then (de)activated by name.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct DetectionImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Physical width of the printed image in metres.
    pub physical_width: f64,
    /// RGBA pixel data.
    pub pixels: Vec<u8>,
}

/// An opaque serialized world map.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct WorldMap(pub String);

/// Render-state values forwarded to the engine at a frame boundary.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct RenderStateUpdate {
    /// Near clip plane in metres.
    pub depth_near: f64,
    /// Far clip plane in metres.
    pub depth_far: f64,
    /// Vertical field of view for inline sessions, in radians.
    pub inline_vertical_field_of_view: Option<f64>,
    /// Host identifier of the output layer.
    pub base_layer: Option<u32>,
}

/// A message to the native engine.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "request", rename_all = "camelCase", rename_all_fields = "camelCase")
)]
pub enum NativeRequest {
    /// Starts tracking.
    Initialize {
        /// Requested session mode.
        mode: SessionMode,
    },
    /// Ray-casts from a normalized screen point (top-left origin).
    HitTest {
        /// Correlation id.
        id: RequestId,
        /// Horizontal position, `0..1` left to right.
        x: f64,
        /// Vertical position, `0..1` top to bottom.
        y: f64,
        /// `HitTestTypes` bits.
        types: u32,
    },
    /// Creates a native anchor at a world pose.
    AddAnchor {
        /// Correlation id.
        id: RequestId,
        /// Uid to assign to the new anchor.
        uid: Uid,
        /// Pose in native world coordinates.
        transform: Transform3d,
    },
    /// Stops tracking an anchor.
    RemoveAnchor {
        /// The anchor to drop.
        uid: Uid,
    },
    /// Uploads a reference image.
    CreateDetectionImage {
        /// Correlation id.
        id: RequestId,
        /// Name the image is addressed by.
        name: String,
        /// The pixels.
        image: DetectionImage,
    },
    /// Starts detecting a previously created image.
    ActivateDetectionImage {
        /// Correlation id.
        id: RequestId,
        /// Image name.
        name: String,
    },
    /// Stops detecting an image.
    DeactivateDetectionImage {
        /// Correlation id.
        id: RequestId,
        /// Image name.
        name: String,
    },
    /// Asks for a serialized world map.
    GetWorldMap {
        /// Correlation id.
        id: RequestId,
    },
    /// Restores a world map.
    SetWorldMap {
        /// Correlation id.
        id: RequestId,
        /// The map to restore.
        map: WorldMap,
    },
    /// Caps how many images are tracked simultaneously.
    SetNumberOfTrackedImages {
        /// Maximum tracked image count.
        count: u32,
    },
    /// Applies consumer render state.
    ConfigureRenderState(RenderStateUpdate),
    /// Stops the session.
    End,
}

impl NativeRequest {
    /// The correlation id, for requests that expect a response.
    #[must_use]
    pub fn id(&self) -> Option<RequestId> {
        match self {
            Self::HitTest { id, .. }
            | Self::AddAnchor { id, .. }
            | Self::CreateDetectionImage { id, .. }
            | Self::ActivateDetectionImage { id, .. }
            | Self::DeactivateDetectionImage { id, .. }
            | Self::GetWorldMap { id }
            | Self::SetWorldMap { id, .. } => Some(*id),
            Self::Initialize { .. }
            | Self::RemoveAnchor { .. }
            | Self::SetNumberOfTrackedImages { .. }
            | Self::ConfigureRenderState(_)
            | Self::End => None,
        }
    }
}

/// The engine's answer to a request.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "response", rename_all = "camelCase", rename_all_fields = "camelCase")
)]
pub enum NativeResponse {
    /// Handshake completed.
    Initialized {
        /// Supported features.
        #[cfg_attr(feature = "serde", serde(default))]
        capabilities: Capabilities,
        /// Native floor, if the engine knows one.
        #[cfg_attr(feature = "serde", serde(default))]
        floor: Option<NativeFloor>,
    },
    /// Ray-cast results, unordered.
    HitTest {
        /// Correlation id.
        id: RequestId,
        /// Raw hits.
        hits: Vec<NativeHit>,
    },
    /// An anchor was created.
    AnchorAdded {
        /// Correlation id.
        id: RequestId,
        /// Uid of the new anchor.
        uid: Uid,
        /// Its pose in native world coordinates.
        transform: Transform3d,
    },
    /// A reference image was uploaded.
    DetectionImageCreated {
        /// Correlation id.
        id: RequestId,
    },
    /// A reference image is being detected.
    DetectionImageActivated {
        /// Correlation id.
        id: RequestId,
    },
    /// A reference image is no longer detected.
    DetectionImageDeactivated {
        /// Correlation id.
        id: RequestId,
    },
    /// A serialized world map.
    WorldMap {
        /// Correlation id.
        id: RequestId,
        /// The map.
        map: WorldMap,
    },
    /// A world map was restored.
    WorldMapSet {
        /// Correlation id.
        id: RequestId,
    },
    /// A request failed.
    Failed {
        /// Correlation id.
        id: RequestId,
        /// Engine-provided reason.
        message: String,
    },
}

impl NativeResponse {
    /// The correlation id this response answers, if any.
    #[must_use]
    pub fn id(&self) -> Option<RequestId> {
        match self {
            Self::Initialized { .. } => None,
            Self::HitTest { id, .. }
            | Self::AnchorAdded { id, .. }
            | Self::DetectionImageCreated { id }
            | Self::DetectionImageActivated { id }
            | Self::DetectionImageDeactivated { id }
            | Self::WorldMap { id, .. }
            | Self::WorldMapSet { id }
            | Self::Failed { id, .. } => Some(*id),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;

    #[derive(Default)]
    struct Collect(Vec<NativeRequest>);

    impl NativeBridge for Collect {
        fn send(&mut self, request: NativeRequest) {
            self.0.push(request);
        }
    }

    #[test]
    fn bridge_by_mutable_reference() {
        fn push(mut bridge: impl NativeBridge) {
            bridge.send(NativeRequest::End);
        }
        let mut c = Collect::default();
        push(&mut c);
        assert_eq!(c.0, vec![NativeRequest::End]);
    }

    #[test]
    fn request_ids() {
        let id = RequestId(7);
        assert_eq!(NativeRequest::GetWorldMap { id }.id(), Some(id));
        assert_eq!(NativeRequest::End.id(), None);
        assert_eq!(
            NativeResponse::Failed {
                id,
                message: "nope".into()
            }
            .id(),
            Some(id)
        );
    }

    #[test]
    fn empty_objects() {
        let mut objects = NativeObjects::default();
        assert!(objects.is_empty());
        objects.removed_objects.push(Uid::new("a"));
        assert!(!objects.is_empty());
    }
}
