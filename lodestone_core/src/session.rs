// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Session and frame lifecycle.
//!
//! A [`Session`] owns everything that changes per native frame: the entity
//! store, the clock estimate, the viewer pose cache, the queue of frame
//! callbacks and the map of in-flight native requests.
//!
//! ```text
//!            Initialized           suspend()
//!   Created ───────────▶ Active ◀──────────▶ Suspended
//!      │                   │       resume()      │
//!      └──────── end() ────┴─────────────────────┴──▶ Ended
//! ```
//!
//! Every native frame runs the same pipeline:
//!
//! 1. **Apply**: the object batch is folded into the [`EntityStore`].
//! 2. **Evaluate**: dirty poses propagate to offsets; change lists are
//!    collected into the [`Frame`].
//! 3. **Dispatch** (active sessions only): pending render state becomes
//!    active, then every callback queued before the frame runs once with a
//!    [`FrameScope`]. Callbacks queued during dispatch wait for the next
//!    frame.
//!
//! Requests issued by callbacks or by the host are queued and handed to the
//! [`NativeBridge`] once the current operation finishes.

use alloc::boxed::Box;
use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::vec::Vec;
use core::f64::consts::FRAC_PI_2;
use core::fmt;
use core::mem;

use crate::clock::ClockSync;
use crate::entity::{
    DEFAULT_EPSILON, EntityChanges, EntityEvents, EntityId, EntityKind, EntityStore, Uid,
    UpdateReport,
};
use crate::error::Error;
use crate::hit_test::{HitResult, HitTestRay, HitTestTypes, NativeHit};
use crate::native::{
    Capabilities, DetectionImage, NativeBridge, NativeEvent, NativeFloor, NativeFrame,
    NativeRequest, NativeResponse, RenderStateUpdate, WorldMap,
};
use crate::pose::{NativeViewState, PoseCache, ViewerPose};
use crate::request::{self, Awaiting, Pending, RequestId, RequestLayer};
use crate::rigid::RigidTransform;
use crate::space::{ReferenceSpace, ReferenceSpaceType};
use crate::time::{MonotonicClock, Timestamp};
use crate::trace::{
    ClockSampleEvent, DispatchEvent, FrameSummaryBuilder, NativeFrameEvent, PhaseBeginEvent,
    PhaseEndEvent, PhaseKind, Tracer,
};
use crate::transform::Transform3d;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How the session is presented.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum SessionMode {
    /// Rendered into a page element, no world tracking beyond the viewer.
    Inline,
    /// Full-screen augmented reality.
    ImmersiveAr,
}

impl SessionMode {
    /// Returns the wire string for this mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::ImmersiveAr => "immersive-ar",
        }
    }
}

/// Configuration for a [`Session`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SessionConfig {
    /// Presentation mode.
    pub mode: SessionMode,
    /// Floor height below the local origin when the engine reports no floor,
    /// in meters.
    pub emulated_floor_height: f64,
    /// Tolerance for mesh and plane buffer comparisons.
    pub geometry_epsilon: f64,
    /// Tolerance for entity transform comparisons.
    pub pose_epsilon: f64,
    /// Initial near clip plane.
    pub depth_near: f64,
    /// Initial far clip plane.
    pub depth_far: f64,
    /// Result kinds requested for every hit test.
    pub hit_test_types: HitTestTypes,
}

impl SessionConfig {
    /// Default configuration for immersive AR sessions.
    #[must_use]
    pub const fn immersive_ar() -> Self {
        Self {
            mode: SessionMode::ImmersiveAr,
            emulated_floor_height: 1.6,
            geometry_epsilon: DEFAULT_EPSILON,
            pose_epsilon: DEFAULT_EPSILON,
            depth_near: 0.1,
            depth_far: 1000.0,
            hit_test_types: HitTestTypes::DEFAULT,
        }
    }

    /// Default configuration for inline sessions.
    #[must_use]
    pub const fn inline() -> Self {
        Self {
            mode: SessionMode::Inline,
            ..Self::immersive_ar()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::immersive_ar()
    }
}

// ---------------------------------------------------------------------------
// Render state
// ---------------------------------------------------------------------------

/// Consumer-controlled rendering parameters, applied at frame boundaries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderState {
    /// Near clip plane in meters.
    pub depth_near: f64,
    /// Far clip plane in meters.
    pub depth_far: f64,
    /// Vertical field of view in radians. Inline sessions only.
    pub inline_vertical_field_of_view: Option<f64>,
    /// Host identifier of the output layer.
    pub base_layer: Option<u32>,
}

impl RenderState {
    fn initial(config: &SessionConfig) -> Self {
        Self {
            depth_near: config.depth_near,
            depth_far: config.depth_far,
            inline_vertical_field_of_view: match config.mode {
                SessionMode::Inline => Some(FRAC_PI_2),
                SessionMode::ImmersiveAr => None,
            },
            base_layer: None,
        }
    }

    fn apply(&mut self, init: &RenderStateInit) {
        self.depth_near = init.depth_near.unwrap_or(self.depth_near);
        self.depth_far = init.depth_far.unwrap_or(self.depth_far);
        if init.inline_vertical_field_of_view.is_some() {
            self.inline_vertical_field_of_view = init.inline_vertical_field_of_view;
        }
        if init.base_layer.is_some() {
            self.base_layer = init.base_layer;
        }
    }

    fn to_update(self) -> RenderStateUpdate {
        RenderStateUpdate {
            depth_near: self.depth_near,
            depth_far: self.depth_far,
            inline_vertical_field_of_view: self.inline_vertical_field_of_view,
            base_layer: self.base_layer,
        }
    }
}

/// A partial render state update. `None` fields keep their current value.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RenderStateInit {
    /// New near clip plane.
    pub depth_near: Option<f64>,
    /// New far clip plane.
    pub depth_far: Option<f64>,
    /// New inline field of view.
    pub inline_vertical_field_of_view: Option<f64>,
    /// New output layer.
    pub base_layer: Option<u32>,
}

impl RenderStateInit {
    /// Overlays `newer` on top of `self`.
    fn merge(&mut self, newer: &Self) {
        self.depth_near = newer.depth_near.or(self.depth_near);
        self.depth_far = newer.depth_far.or(self.depth_far);
        self.inline_vertical_field_of_view = newer
            .inline_vertical_field_of_view
            .or(self.inline_vertical_field_of_view);
        self.base_layer = newer.base_layer.or(self.base_layer);
    }

    fn validate(&self, mode: SessionMode) -> Result<(), Error> {
        if mode == SessionMode::ImmersiveAr && self.inline_vertical_field_of_view.is_some() {
            return Err(Error::ProtocolMisuse(
                "inline field of view on an immersive session",
            ));
        }
        let finite = [
            self.depth_near,
            self.depth_far,
            self.inline_vertical_field_of_view,
        ];
        if finite.iter().flatten().any(|v| !v.is_finite()) {
            return Err(Error::ProtocolMisuse("non-finite render state value"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Identifies a queued frame callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameHandle(u32);

impl FrameHandle {
    /// Returns the raw handle value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// A queued frame callback.
pub type FrameCallback = Box<dyn FnOnce(Timestamp, &mut FrameScope<'_>)>;

#[derive(Default)]
struct CallbackQueue {
    next: u32,
    queued: Vec<(FrameHandle, FrameCallback)>,
    /// The one batch owed across a suspension.
    held: Vec<(FrameHandle, FrameCallback)>,
    /// Handles cancelled while their batch is already being dispatched.
    cancelled: BTreeSet<FrameHandle>,
}

impl CallbackQueue {
    fn alloc(&mut self) -> FrameHandle {
        let handle = FrameHandle(self.next);
        self.next = self.next.wrapping_add(1);
        handle
    }

    fn push(&mut self, callback: FrameCallback) -> FrameHandle {
        let handle = self.alloc();
        self.queued.push((handle, callback));
        handle
    }

    fn hold(&mut self, callback: FrameCallback) -> Option<FrameHandle> {
        if !self.held.is_empty() {
            return None;
        }
        let handle = self.alloc();
        self.held.push((handle, callback));
        Some(handle)
    }

    /// Moves the pending batch into the held slot.
    fn suspend(&mut self) {
        self.held.append(&mut self.queued);
    }

    fn cancel(&mut self, handle: FrameHandle) {
        let before = self.queued.len();
        self.queued.retain(|(h, _)| *h != handle);
        if self.queued.len() != before {
            return;
        }
        let before = self.held.len();
        self.held.retain(|(h, _)| *h != handle);
        if self.held.len() != before {
            return;
        }
        self.cancelled.insert(handle);
    }

    fn clear(&mut self) {
        self.queued.clear();
        self.held.clear();
        self.cancelled.clear();
    }
}

impl fmt::Debug for CallbackQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackQueue")
            .field("next", &self.next)
            .field("queued", &self.queued.len())
            .field("held", &self.held.len())
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

/// Per-frame data, as of the most recent native frame.
#[derive(Clone, Debug, Default)]
pub struct Frame {
    index: u64,
    timestamp: Timestamp,
    native_timestamp: Timestamp,
    view: NativeViewState,
    light_estimate: Option<f64>,
    changes: EntityChanges,
}

impl Frame {
    /// Monotonic frame counter, starting at 1.
    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Frame time on the local clock.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Frame time on the engine's clock.
    #[must_use]
    pub fn native_timestamp(&self) -> Timestamp {
        self.native_timestamp
    }

    /// Raw head, view and projection matrices.
    #[must_use]
    pub fn view_state(&self) -> &NativeViewState {
        &self.view
    }

    /// Ambient light intensity, if the engine estimates it.
    #[must_use]
    pub fn light_estimate(&self) -> Option<f64> {
        self.light_estimate
    }

    /// Entities added, moved, reshaped or removed by this frame.
    #[must_use]
    pub fn changes(&self) -> &EntityChanges {
        &self.changes
    }
}

/// What a frame callback can see and do.
pub struct FrameScope<'a> {
    frame: &'a Frame,
    store: &'a EntityStore,
    poses: &'a mut PoseCache,
    callbacks: &'a mut CallbackQueue,
    requests: &'a mut RequestLayer,
    capabilities: Capabilities,
    hit_test_types: HitTestTypes,
}

impl FrameScope<'_> {
    /// The frame being dispatched.
    #[must_use]
    pub fn frame(&self) -> &Frame {
        self.frame
    }

    /// Read-only view of every tracked entity.
    #[must_use]
    pub fn store(&self) -> &EntityStore {
        self.store
    }

    /// The viewer pose in `space`, or the last valid one if tracking was
    /// lost.
    pub fn viewer_pose(&mut self, space: &ReferenceSpace) -> Option<ViewerPose> {
        self.poses.resolve(space, &self.frame.view)
    }

    /// The pose of an entity in `space`.
    ///
    /// Returns `None` for stale handles and for viewer-relative spaces while
    /// the head is not tracked.
    #[must_use]
    pub fn entity_pose(&self, id: EntityId, space: &ReferenceSpace) -> Option<RigidTransform> {
        if !self.store.is_alive(id) {
            return None;
        }
        let m = space
            .apply_to_native_matrix(&self.store.transform(id), self.frame.view.head.as_ref())?;
        m.is_finite().then(|| RigidTransform::from_matrix(m))
    }

    /// Queues `callback` for the next native frame.
    pub fn request_animation_frame(
        &mut self,
        callback: impl FnOnce(Timestamp, &mut FrameScope<'_>) + 'static,
    ) -> FrameHandle {
        self.callbacks.push(Box::new(callback))
    }

    /// Cancels a queued callback, including one later in the current batch.
    pub fn cancel_animation_frame(&mut self, handle: FrameHandle) {
        self.callbacks.cancel(handle);
    }

    /// Casts a ray against the tracked environment.
    pub fn hit_test(&mut self, space: &ReferenceSpace, ray: HitTestRay) -> Pending<Vec<HitResult>> {
        settle(issue_hit_test(
            self.requests,
            self.capabilities,
            self.hit_test_types,
            &self.frame.view,
            space,
            ray,
        ))
    }
}

impl fmt::Debug for FrameScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameScope")
            .field("frame", &self.frame.index)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Lifecycle state of a [`Session`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Waiting for the native handshake.
    Created,
    /// Frames are dispatched to callbacks.
    Active,
    /// Frames update state but callbacks are held.
    Suspended,
    /// Terminal.
    Ended,
}

/// One AR session bound to a native engine.
pub struct Session<B: NativeBridge, C: MonotonicClock> {
    config: SessionConfig,
    state: SessionState,
    bridge: B,
    clock: C,
    clock_sync: ClockSync,
    capabilities: Capabilities,
    floor: Option<NativeFloor>,
    store: EntityStore,
    requests: RequestLayer,
    callbacks: CallbackQueue,
    poses: PoseCache,
    frame: Frame,
    last_report: UpdateReport,
    render_state: RenderState,
    pending_render_state: Option<RenderStateInit>,
    next_anchor: u64,
}

impl<B: NativeBridge, C: MonotonicClock> Session<B, C> {
    /// Creates a session and sends the initialization request.
    pub fn new(config: SessionConfig, mut bridge: B, clock: C) -> Self {
        bridge.send(NativeRequest::Initialize { mode: config.mode });
        log::debug!("{} session created", config.mode.as_str());
        Self {
            config,
            state: SessionState::Created,
            bridge,
            clock,
            clock_sync: ClockSync::new(),
            capabilities: Capabilities::default(),
            floor: None,
            store: EntityStore::with_epsilons(config.geometry_epsilon, config.pose_epsilon),
            requests: RequestLayer::default(),
            callbacks: CallbackQueue::default(),
            poses: PoseCache::new(),
            frame: Frame::default(),
            last_report: UpdateReport::default(),
            render_state: RenderState::initial(&config),
            pending_render_state: None,
            next_anchor: 0,
        }
    }

    // -- Accessors --

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The configuration the session was created with.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Capabilities reported by the native handshake.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Read-only view of every tracked entity.
    #[must_use]
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Entity lifecycle topics, for subscribing.
    pub fn entity_events_mut(&mut self) -> &mut EntityEvents {
        self.store.events_mut()
    }

    /// The most recent frame.
    #[must_use]
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Outcome of applying the most recent native batch.
    #[must_use]
    pub fn last_update_report(&self) -> &UpdateReport {
        &self.last_report
    }

    /// Render state in effect for the current frame.
    #[must_use]
    pub fn render_state(&self) -> &RenderState {
        &self.render_state
    }

    /// Render state staged for the next frame.
    #[must_use]
    pub fn pending_render_state(&self) -> Option<&RenderStateInit> {
        self.pending_render_state.as_ref()
    }

    /// Native clock offset estimate.
    #[must_use]
    pub fn clock_sync(&self) -> &ClockSync {
        &self.clock_sync
    }

    /// Number of requests still waiting for a native response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.requests.waiting_len()
    }

    /// The native bridge.
    #[must_use]
    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    /// The native bridge, mutably.
    pub fn bridge_mut(&mut self) -> &mut B {
        &mut self.bridge
    }

    // -- Frame loop --

    /// Queues `callback` for the next native frame.
    ///
    /// While suspended only one callback is held; further calls return
    /// `None`. Callbacks already queued when the session was suspended
    /// count as that held frame. After the session ended nothing is queued.
    pub fn request_animation_frame(
        &mut self,
        callback: impl FnOnce(Timestamp, &mut FrameScope<'_>) + 'static,
    ) -> Option<FrameHandle> {
        match self.state {
            SessionState::Ended => None,
            SessionState::Suspended => self.callbacks.hold(Box::new(callback)),
            SessionState::Created | SessionState::Active => {
                Some(self.callbacks.push(Box::new(callback)))
            }
        }
    }

    /// Cancels a queued callback. No-op for unknown handles and after end.
    pub fn cancel_animation_frame(&mut self, handle: FrameHandle) {
        if self.state != SessionState::Ended {
            self.callbacks.cancel(handle);
        }
    }

    /// Stops dispatching frame callbacks. Native frames still update state.
    pub fn suspend(&mut self) {
        if self.state == SessionState::Active {
            self.state = SessionState::Suspended;
            self.callbacks.suspend();
            log::debug!("session suspended");
        }
    }

    /// Resumes dispatching. Callbacks held while suspended run
    /// immediately with the most recent frame.
    pub fn resume(&mut self) {
        self.resume_traced(&mut Tracer::none());
    }

    /// Like [`resume`](Self::resume), reporting to `tracer`.
    pub fn resume_traced(&mut self, tracer: &mut Tracer<'_>) {
        if self.state != SessionState::Suspended {
            return;
        }
        self.state = SessionState::Active;
        log::debug!("session resumed");
        let held = mem::take(&mut self.callbacks.held);
        if !held.is_empty() {
            self.dispatch(held, tracer);
        }
        self.flush();
    }

    /// Stages a render state change for the next frame.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionEnded`] after [`end`](Self::end).
    /// - [`Error::ProtocolMisuse`] for an inline field of view on an
    ///   immersive session or a non-finite value.
    pub fn update_render_state(&mut self, init: RenderStateInit) -> Result<(), Error> {
        if self.state == SessionState::Ended {
            return Err(Error::SessionEnded);
        }
        init.validate(self.config.mode)?;
        match &mut self.pending_render_state {
            Some(pending) => pending.merge(&init),
            None => self.pending_render_state = Some(init),
        }
        Ok(())
    }

    // -- Spaces and queries --

    /// Creates a reference space of the given kind.
    ///
    /// Unsupported or unavailable kinds reject the returned [`Pending`].
    pub fn request_reference_space(&mut self, kind: ReferenceSpaceType) -> Pending<ReferenceSpace> {
        match self.reference_space(kind) {
            Ok(space) => Pending::ready(space),
            Err(err) => {
                log::debug!("reference space {kind} rejected: {err}");
                Pending::rejected(err)
            }
        }
    }

    fn reference_space(&self, kind: ReferenceSpaceType) -> Result<ReferenceSpace, Error> {
        if self.state == SessionState::Ended {
            return Err(Error::SessionEnded);
        }
        let inline_kind = matches!(kind, ReferenceSpaceType::Viewer | ReferenceSpaceType::Local);
        if self.config.mode == SessionMode::Inline && !inline_kind {
            return Err(Error::UnsupportedSpace(kind));
        }
        if kind.is_floor() && self.state == SessionState::Created {
            return Err(Error::NotInitialized);
        }
        ReferenceSpace::new(kind, self.floor.as_ref(), self.config.emulated_floor_height)
    }

    /// Casts a ray against the tracked environment.
    ///
    /// Results arrive ranked best-first and expressed in `space`.
    pub fn hit_test(&mut self, space: &ReferenceSpace, ray: HitTestRay) -> Pending<Vec<HitResult>> {
        let result = self.ready().and_then(|()| {
            issue_hit_test(
                &mut self.requests,
                self.capabilities,
                self.config.hit_test_types,
                &self.frame.view,
                space,
                ray,
            )
        });
        self.flush();
        settle(result)
    }

    // -- Anchors --

    /// Asks the engine to anchor `pose` (expressed in `space`).
    pub fn add_anchor(
        &mut self,
        space: &ReferenceSpace,
        pose: &RigidTransform,
    ) -> Pending<EntityId> {
        let result = self.try_add_anchor(space, pose);
        self.flush();
        settle(result)
    }

    fn try_add_anchor(
        &mut self,
        space: &ReferenceSpace,
        pose: &RigidTransform,
    ) -> Result<Pending<EntityId>, Error> {
        self.ready()?;
        let to_native = space
            .space_to_native(self.frame.view.head.as_ref())
            .ok_or(Error::NumericDegenerate("space has no native mapping"))?;
        let world = to_native * pose.matrix();
        if !world.is_finite() {
            return Err(Error::NumericDegenerate("anchor pose"));
        }
        self.request_anchor(world)
    }

    /// Anchors the pose of a hit.
    ///
    /// A hit on a known (or placeholder) anchor becomes an offset against it
    /// and resolves immediately; any other hit asks the engine for a new
    /// anchor.
    pub fn create_anchor_from_hit(&mut self, hit: &HitResult) -> Pending<EntityId> {
        let result = self.try_anchor_from_hit(hit.native());
        self.flush();
        settle(result)
    }

    fn try_anchor_from_hit(&mut self, hit: &NativeHit) -> Result<Pending<EntityId>, Error> {
        self.ready()?;
        let Some(uid) = &hit.anchor_uid else {
            return self.request_anchor(hit.world_transform);
        };
        let base = match self.store.lookup(uid) {
            Some(id) => id,
            None => self.store.create_placeholder(
                uid.clone(),
                placeholder_pose(hit),
                self.frame.timestamp,
            )?,
        };
        let local = match hit.local_transform {
            Some(local) => local,
            None => {
                let inv = self
                    .store
                    .transform(base)
                    .invert()
                    .ok_or(Error::NumericDegenerate("singular anchor transform"))?;
                inv * hit.world_transform
            }
        };
        self.store.create_offset(base, local).map(Pending::ready)
    }

    fn request_anchor(&mut self, world: Transform3d) -> Result<Pending<EntityId>, Error> {
        if !self.capabilities.anchors {
            return Err(Error::UnsupportedFeature("anchors"));
        }
        let uid = Uid::local("anchor", self.next_anchor);
        self.next_anchor += 1;
        let (resolver, pending) = request::pending();
        self.requests.begin(
            |id| NativeRequest::AddAnchor {
                id,
                uid,
                transform: world,
            },
            Awaiting::Anchor { resolver },
        );
        Ok(pending)
    }

    /// Removes an anchor (or anchor offset) and every offset built on it.
    ///
    /// Anchors this session created are also released natively. No-op after
    /// end.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownEntity`] for a stale handle.
    /// - [`Error::ProtocolMisuse`] if the entity is not an anchor.
    pub fn remove_anchor(&mut self, id: EntityId) -> Result<(), Error> {
        if self.state == SessionState::Ended {
            return Ok(());
        }
        if !self.store.is_alive(id) {
            return Err(Error::UnknownEntity);
        }
        if !matches!(self.store.kind(id), EntityKind::Anchor | EntityKind::Offset) {
            return Err(Error::ProtocolMisuse("only anchors can be removed"));
        }
        let uid = self.store.uid(id).clone();
        let removed = self.store.remove(id)?;
        if self.requests.disown_anchor(&uid) {
            self.requests.push(NativeRequest::RemoveAnchor { uid });
        }
        log::debug!("removed {} entities", removed.len());
        self.flush();
        Ok(())
    }

    // -- Images and world maps --

    /// Uploads a reference image under `name`.
    pub fn create_detection_image(
        &mut self,
        name: impl Into<String>,
        image: DetectionImage,
    ) -> Pending<()> {
        let name = name.into();
        self.ack_request(
            self.capabilities.image_detection,
            "image detection",
            |id| NativeRequest::CreateDetectionImage { id, name, image },
        )
    }

    /// Starts detecting a previously uploaded image.
    pub fn activate_detection_image(&mut self, name: impl Into<String>) -> Pending<()> {
        let name = name.into();
        self.ack_request(
            self.capabilities.image_detection,
            "image detection",
            |id| NativeRequest::ActivateDetectionImage { id, name },
        )
    }

    /// Stops detecting an image.
    pub fn deactivate_detection_image(&mut self, name: impl Into<String>) -> Pending<()> {
        let name = name.into();
        self.ack_request(
            self.capabilities.image_detection,
            "image detection",
            |id| NativeRequest::DeactivateDetectionImage { id, name },
        )
    }

    /// Caps how many images are tracked at once.
    ///
    /// # Errors
    ///
    /// [`Error::NotInitialized`] before the handshake and
    /// [`Error::UnsupportedFeature`] without image detection.
    pub fn set_number_of_tracked_images(&mut self, count: u32) -> Result<(), Error> {
        if self.state == SessionState::Ended {
            return Ok(());
        }
        self.check(self.capabilities.image_detection, "image detection")?;
        self.requests
            .push(NativeRequest::SetNumberOfTrackedImages { count });
        self.flush();
        Ok(())
    }

    /// Asks for a serialized world map.
    pub fn get_world_map(&mut self) -> Pending<WorldMap> {
        if let Err(err) = self.check(self.capabilities.world_map, "world map") {
            return Pending::rejected(err);
        }
        let (resolver, pending) = request::pending();
        self.requests
            .begin(|id| NativeRequest::GetWorldMap { id }, Awaiting::WorldMap { resolver });
        self.flush();
        pending
    }

    /// Restores a world map.
    pub fn set_world_map(&mut self, map: WorldMap) -> Pending<()> {
        self.ack_request(self.capabilities.world_map, "world map", |id| {
            NativeRequest::SetWorldMap { id, map }
        })
    }

    fn ack_request(
        &mut self,
        supported: bool,
        feature: &'static str,
        build: impl FnOnce(RequestId) -> NativeRequest,
    ) -> Pending<()> {
        if let Err(err) = self.check(supported, feature) {
            return Pending::rejected(err);
        }
        let (resolver, pending) = request::pending();
        self.requests.begin(build, Awaiting::Ack { resolver });
        self.flush();
        pending
    }

    // -- End --

    /// Ends the session.
    ///
    /// Queued callbacks are dropped, anchors this session created are
    /// released, and the engine is told to stop. Requests already in flight
    /// stay pending and still resolve if their responses arrive.
    pub fn end(&mut self) {
        if self.state == SessionState::Ended {
            return;
        }
        self.state = SessionState::Ended;
        self.callbacks.clear();
        self.poses.clear();
        self.pending_render_state = None;
        for uid in self.requests.take_owned_anchors() {
            if let Some(id) = self.store.lookup(&uid) {
                let _ = self.store.remove(id);
            }
            self.requests.push(NativeRequest::RemoveAnchor { uid });
        }
        self.requests.push(NativeRequest::End);
        self.flush();
        log::debug!("session ended");
    }

    // -- Native input --

    /// Feeds one native message to the session.
    pub fn handle(&mut self, event: NativeEvent) {
        self.handle_traced(event, &mut Tracer::none());
    }

    /// Like [`handle`](Self::handle), reporting frame-loop events to
    /// `tracer`.
    pub fn handle_traced(&mut self, event: NativeEvent, tracer: &mut Tracer<'_>) {
        match event {
            NativeEvent::SetTime { timestamp } => {
                let local = self.clock.now();
                self.clock_sync.observe(local, timestamp);
                tracer.clock_sample(&ClockSampleEvent {
                    local,
                    native: timestamp,
                    offset: self.clock_sync.offset(),
                });
            }
            NativeEvent::Frame(frame) => self.on_frame(&frame, tracer),
            NativeEvent::Response(response) => self.on_response(response),
        }
        self.flush();
    }

    fn on_frame(&mut self, native: &NativeFrame, tracer: &mut Tracer<'_>) {
        match self.state {
            SessionState::Created => {
                log::debug!("ignoring native frame before handshake");
                return;
            }
            SessionState::Ended => return,
            SessionState::Active | SessionState::Suspended => {}
        }

        let index = self.frame.index + 1;
        let local = self.clock_sync.to_local(native.timestamp, self.clock.now());
        let info = NativeFrameEvent {
            frame_index: index,
            native_timestamp: native.timestamp,
            local_timestamp: local,
            new_objects: native.objects.new_objects.len(),
            removed_objects: native.objects.removed_objects.len(),
            objects: native.objects.objects.len(),
            head_tracked: native.head_transform.is_some(),
        };
        tracer.native_frame(&info);
        let mut summary = FrameSummaryBuilder::new(&info);

        self.begin_phase(tracer, &mut summary, index, PhaseKind::ApplyNative);
        self.last_report = self.store.apply_update(&native.objects, local);
        self.end_phase(tracer, &mut summary, index, PhaseKind::ApplyNative);

        self.begin_phase(tracer, &mut summary, index, PhaseKind::Evaluate);
        self.store.evaluate_into(&mut self.frame.changes);
        self.end_phase(tracer, &mut summary, index, PhaseKind::Evaluate);

        #[cfg(feature = "trace-rich")]
        if tracer.is_active() {
            let changes = entity_changes(&self.frame.changes);
            tracer.entity_changes(index, &changes);
        }

        self.frame.index = index;
        self.frame.timestamp = local;
        self.frame.native_timestamp = native.timestamp;
        self.frame.view.update_from(native);
        self.frame.light_estimate = native.light_estimate;

        if self.state == SessionState::Active {
            self.begin_phase(tracer, &mut summary, index, PhaseKind::Dispatch);
            let batch = mem::take(&mut self.callbacks.queued);
            let ran = self.dispatch(batch, tracer);
            summary.set_callbacks(ran);
            self.end_phase(tracer, &mut summary, index, PhaseKind::Dispatch);
        }

        summary.set_entities(self.store.len(), self.last_report.errors.len());
        tracer.frame_summary(&summary.finish());
    }

    /// Runs one batch of callbacks against the current frame.
    fn dispatch(
        &mut self,
        batch: Vec<(FrameHandle, FrameCallback)>,
        tracer: &mut Tracer<'_>,
    ) -> usize {
        let render_state_applied = self.apply_pending_render_state();
        let timestamp = self.frame.timestamp;
        let mut scope = FrameScope {
            frame: &self.frame,
            store: &self.store,
            poses: &mut self.poses,
            callbacks: &mut self.callbacks,
            requests: &mut self.requests,
            capabilities: self.capabilities,
            hit_test_types: self.config.hit_test_types,
        };
        let mut ran = 0;
        let mut cancelled = 0;
        for (handle, callback) in batch {
            if scope.callbacks.cancelled.remove(&handle) {
                cancelled += 1;
                continue;
            }
            callback(timestamp, &mut scope);
            ran += 1;
        }
        self.callbacks.cancelled.clear();
        tracer.dispatch(&DispatchEvent {
            frame_index: self.frame.index,
            callbacks: ran,
            cancelled,
            render_state_applied,
        });
        ran
    }

    /// Promotes the pending render state. Returns `false` if nothing was
    /// pending.
    fn apply_pending_render_state(&mut self) -> bool {
        let Some(init) = self.pending_render_state.take() else {
            return false;
        };
        self.render_state.apply(&init);
        if init.base_layer.is_some() || init.inline_vertical_field_of_view.is_some() {
            self.bridge
                .send(NativeRequest::ConfigureRenderState(self.render_state.to_update()));
        }
        true
    }

    fn on_response(&mut self, response: NativeResponse) {
        match response {
            NativeResponse::Initialized {
                capabilities,
                floor,
            } => {
                if self.state != SessionState::Created {
                    log::warn!("ignoring repeated native handshake");
                    return;
                }
                self.capabilities = capabilities;
                self.floor = floor;
                self.state = SessionState::Active;
                log::debug!("session initialized: {capabilities:?}");
            }
            NativeResponse::HitTest { id, hits } => match self.requests.take(id) {
                Some(Awaiting::HitTest { space, resolver }) => {
                    self.track_hit_anchors(&hits);
                    let results = HitResult::resolve(
                        &space,
                        hits,
                        self.frame.view.head.as_ref(),
                        self.frame.timestamp,
                    );
                    resolver.resolve(results);
                }
                other => mismatched(other, "hit test"),
            },
            NativeResponse::AnchorAdded { id, uid, transform } => match self.requests.take(id) {
                Some(Awaiting::Anchor { resolver }) => {
                    let entity = self
                        .store
                        .add_anchor(uid.clone(), transform, self.frame.timestamp);
                    match entity {
                        Ok(id) if self.state == SessionState::Ended => {
                            let _ = self.store.remove(id);
                            log::debug!("releasing anchor {uid} confirmed after end");
                            self.requests.push(NativeRequest::RemoveAnchor { uid });
                        }
                        Ok(_) => self.requests.own_anchor(uid),
                        Err(_) => self.requests.push(NativeRequest::RemoveAnchor { uid }),
                    }
                    resolver.complete(entity);
                }
                other => mismatched(other, "anchor added"),
            },
            NativeResponse::DetectionImageCreated { id }
            | NativeResponse::DetectionImageActivated { id }
            | NativeResponse::DetectionImageDeactivated { id }
            | NativeResponse::WorldMapSet { id } => match self.requests.take(id) {
                Some(Awaiting::Ack { resolver }) => resolver.resolve(()),
                other => mismatched(other, "acknowledgement"),
            },
            NativeResponse::WorldMap { id, map } => match self.requests.take(id) {
                Some(Awaiting::WorldMap { resolver }) => resolver.resolve(map),
                other => mismatched(other, "world map"),
            },
            NativeResponse::Failed { id, message } => {
                self.requests.fail(id, Error::Native(message));
            }
        }
    }

    /// Creates placeholders for anchors that hits reference before the
    /// engine has described them.
    fn track_hit_anchors(&mut self, hits: &[NativeHit]) {
        for hit in hits {
            let Some(uid) = &hit.anchor_uid else {
                continue;
            };
            if self.store.lookup(uid).is_some() || self.store.is_tombstoned(uid) {
                continue;
            }
            let _ = self.store.create_placeholder(
                uid.clone(),
                placeholder_pose(hit),
                self.frame.timestamp,
            );
        }
    }

    // -- Helpers --

    fn ready(&self) -> Result<(), Error> {
        match self.state {
            SessionState::Created => Err(Error::NotInitialized),
            SessionState::Ended => Err(Error::SessionEnded),
            SessionState::Active | SessionState::Suspended => Ok(()),
        }
    }

    fn check(&self, supported: bool, feature: &'static str) -> Result<(), Error> {
        self.ready()?;
        if supported {
            Ok(())
        } else {
            Err(Error::UnsupportedFeature(feature))
        }
    }

    fn flush(&mut self) {
        for request in self.requests.drain_outbox() {
            self.bridge.send(request);
        }
    }

    fn begin_phase(
        &self,
        tracer: &mut Tracer<'_>,
        summary: &mut FrameSummaryBuilder,
        frame_index: u64,
        phase: PhaseKind,
    ) {
        let timestamp = self.clock.now();
        summary.phase_begin(phase, timestamp);
        tracer.phase_begin(&PhaseBeginEvent {
            frame_index,
            phase,
            timestamp,
        });
    }

    fn end_phase(
        &self,
        tracer: &mut Tracer<'_>,
        summary: &mut FrameSummaryBuilder,
        frame_index: u64,
        phase: PhaseKind,
    ) {
        let timestamp = self.clock.now();
        summary.phase_end(phase, timestamp);
        tracer.phase_end(&PhaseEndEvent {
            frame_index,
            phase,
            timestamp,
        });
    }
}

impl<B: NativeBridge, C: MonotonicClock> fmt::Debug for Session<B, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("capabilities", &self.capabilities)
            .field("frame", &self.frame.index)
            .field("entities", &self.store.len())
            .field("pending_requests", &self.requests.waiting_len())
            .field("callbacks", &self.callbacks)
            .field("render_state", &self.render_state)
            .finish_non_exhaustive()
    }
}

fn issue_hit_test(
    requests: &mut RequestLayer,
    capabilities: Capabilities,
    types: HitTestTypes,
    view: &NativeViewState,
    space: &ReferenceSpace,
    ray: HitTestRay,
) -> Result<Pending<Vec<HitResult>>, Error> {
    if !capabilities.hit_test {
        return Err(Error::UnsupportedFeature("hit test"));
    }
    let point = ray.to_native_point(space, view)?;
    let (resolver, pending) = request::pending();
    requests.begin(
        |id| NativeRequest::HitTest {
            id,
            x: point.x,
            y: point.y,
            types: types.bits(),
        },
        Awaiting::HitTest {
            space: space.clone(),
            resolver,
        },
    );
    Ok(pending)
}

fn settle<T>(result: Result<Pending<T>, Error>) -> Pending<T> {
    result.unwrap_or_else(Pending::rejected)
}

/// World pose of the anchor a hit landed on.
fn placeholder_pose(hit: &NativeHit) -> Transform3d {
    match hit.local_transform.and_then(|local| local.invert()) {
        Some(inv) => hit.world_transform * inv,
        None => hit.world_transform,
    }
}

fn mismatched(awaiting: Option<Awaiting>, response: &'static str) {
    if let Some(awaiting) = awaiting {
        log::warn!("{response} response answers a {} request", awaiting.name());
        awaiting.reject(Error::ProtocolMisuse("response does not match request"));
    }
}

#[cfg(feature = "trace-rich")]
fn entity_changes(changes: &EntityChanges) -> Vec<crate::trace::EntityChange> {
    use crate::trace::{EntityChange, EntityField};

    let tagged = |ids: &[EntityId], field: EntityField| {
        ids.iter()
            .map(move |id| EntityChange {
                entity_index: id.index(),
                field,
            })
            .collect::<Vec<_>>()
    };
    let mut out = tagged(&changes.added, EntityField::Added);
    out.extend(tagged(&changes.poses, EntityField::Pose));
    out.extend(tagged(&changes.geometry, EntityField::Geometry));
    out
}
