// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deterministic harness for driving a lodestone [`Session`] without a real
//! tracking engine.
//!
//! - [`ScriptedBridge`] records every outbound request in a shared
//!   [`RequestLog`] and can answer requests through responder closures.
//! - [`ManualClock`] is a host clock the test moves by hand.
//! - [`Script`] is a JSON list of timed native messages.
//! - [`Replayer`] owns the session and feeds it script steps and scripted
//!   responses.
//! - [`FrameBuilder`] assembles native frames for tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use lodestone_core::entity::Uid;
use lodestone_core::native::{
    Capabilities, NativeBridge, NativeEvent, NativeFloor, NativeFrame, NativeMesh, NativeObject,
    NativeObjectKind, NativeRequest, NativeResponse,
};
use lodestone_core::request::RequestId;
use lodestone_core::session::{Session, SessionConfig};
use lodestone_core::time::{MonotonicClock, Timestamp};
use lodestone_core::trace::Tracer;
use lodestone_core::transform::Transform3d;

// ---------------------------------------------------------------------------
// RequestLog
// ---------------------------------------------------------------------------

/// Shared, append-only record of the requests a session sent.
///
/// Clones share the same storage, so a test can keep one while the bridge
/// (owned by the session) writes to another.
#[derive(Clone, Debug, Default)]
pub struct RequestLog(Rc<RefCell<Vec<NativeRequest>>>);

impl RequestLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, request: NativeRequest) {
        self.0.borrow_mut().push(request);
    }

    /// Number of recorded requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// A copy of every recorded request, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<NativeRequest> {
        self.0.borrow().clone()
    }

    /// Removes and returns every recorded request.
    pub fn take(&self) -> Vec<NativeRequest> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    /// The most recent request.
    #[must_use]
    pub fn last(&self) -> Option<NativeRequest> {
        self.0.borrow().last().cloned()
    }

    /// The id of the most recent request matching `pred`.
    #[must_use]
    pub fn last_id(&self, pred: impl Fn(&NativeRequest) -> bool) -> Option<RequestId> {
        self.0
            .borrow()
            .iter()
            .rev()
            .find(|r| pred(r))
            .and_then(NativeRequest::id)
    }

    /// How many recorded requests match `pred`.
    #[must_use]
    pub fn count(&self, pred: impl Fn(&NativeRequest) -> bool) -> usize {
        self.0.borrow().iter().filter(|r| pred(r)).count()
    }
}

// ---------------------------------------------------------------------------
// ScriptedBridge
// ---------------------------------------------------------------------------

type Responder = Box<dyn FnMut(&NativeRequest) -> Option<NativeResponse>>;
type Inbox = Rc<RefCell<VecDeque<NativeEvent>>>;

/// A [`NativeBridge`] that records requests and answers them from closures.
///
/// Responders run in registration order; the first one returning `Some`
/// answers the request. Answers are queued and reach the session only when
/// the [`Replayer`] pumps them, never from inside `send`.
pub struct ScriptedBridge {
    log: RequestLog,
    inbox: Inbox,
    responders: Vec<Responder>,
}

impl fmt::Debug for ScriptedBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedBridge")
            .field("log", &self.log)
            .field("queued", &self.inbox.borrow().len())
            .field("responders", &self.responders.len())
            .finish()
    }
}

impl Default for ScriptedBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBridge {
    /// A bridge that records but never answers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            log: RequestLog::new(),
            inbox: Rc::new(RefCell::new(VecDeque::new())),
            responders: Vec::new(),
        }
    }

    /// Adds a responder.
    #[must_use]
    pub fn respond_with(
        mut self,
        responder: impl FnMut(&NativeRequest) -> Option<NativeResponse> + 'static,
    ) -> Self {
        self.responders.push(Box::new(responder));
        self
    }

    /// Answers the initialization request with a completed handshake.
    #[must_use]
    pub fn auto_initialize(self, capabilities: Capabilities, floor: Option<NativeFloor>) -> Self {
        self.respond_with(move |request| {
            matches!(request, NativeRequest::Initialize { .. }).then(|| {
                NativeResponse::Initialized {
                    capabilities,
                    floor: floor.clone(),
                }
            })
        })
    }

    /// Confirms every anchor request at the requested pose.
    #[must_use]
    pub fn auto_confirm_anchors(self) -> Self {
        self.respond_with(|request| match request {
            NativeRequest::AddAnchor { id, uid, transform } => Some(NativeResponse::AnchorAdded {
                id: *id,
                uid: uid.clone(),
                transform: *transform,
            }),
            _ => None,
        })
    }

    /// A handle on the request log.
    #[must_use]
    pub fn log(&self) -> RequestLog {
        self.log.clone()
    }
}

impl NativeBridge for ScriptedBridge {
    fn send(&mut self, request: NativeRequest) {
        let answer = self.responders.iter_mut().find_map(|r| r(&request));
        if let Some(response) = answer {
            self.inbox
                .borrow_mut()
                .push_back(NativeEvent::Response(response));
        }
        self.log.push(request);
    }
}

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// A host clock that only moves when told to.
///
/// Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock(Rc<Cell<f64>>);

impl ManualClock {
    /// A clock reading `ms`.
    #[must_use]
    pub fn new(ms: f64) -> Self {
        Self(Rc::new(Cell::new(ms)))
    }

    /// Jumps to `ms`.
    pub fn set(&self, ms: f64) {
        self.0.set(ms);
    }

    /// Moves forward by `ms`.
    pub fn advance(&self, ms: f64) {
        self.0.set(self.0.get() + ms);
    }
}

impl MonotonicClock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.0.get())
    }
}

// ---------------------------------------------------------------------------
// Script
// ---------------------------------------------------------------------------

/// One timed native message.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Step {
    /// Host time at which the message arrives.
    pub at: Timestamp,
    /// The message.
    pub message: NativeEvent,
}

/// A recorded or hand-written sequence of native messages.
///
/// ```json
/// { "steps": [
///     { "at": 1100, "message": { "event": "setTime", "timestamp": 100 } },
///     { "at": 1116, "message": { "event": "frame", "timestamp": 116 } }
/// ] }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Script {
    /// Messages in delivery order.
    pub steps: Vec<Step>,
}

impl Script {
    /// Parses a script from JSON.
    ///
    /// # Errors
    ///
    /// Returns the parser error for malformed input.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serializes the script to JSON.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if a message cannot be represented.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Appends a step.
    pub fn push(&mut self, at: f64, message: NativeEvent) {
        self.steps.push(Step {
            at: Timestamp(at),
            message,
        });
    }
}

// ---------------------------------------------------------------------------
// Replayer
// ---------------------------------------------------------------------------

/// Owns a session wired to a [`ScriptedBridge`] and a [`ManualClock`].
#[derive(Debug)]
pub struct Replayer {
    session: Session<ScriptedBridge, ManualClock>,
    clock: ManualClock,
    log: RequestLog,
    inbox: Inbox,
}

impl Replayer {
    /// A session whose bridge never answers on its own.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self::with_bridge(config, ScriptedBridge::new())
    }

    /// A session over a preconfigured bridge. Answers the bridge produced
    /// while the session was created (usually the handshake) are delivered
    /// right away.
    #[must_use]
    pub fn with_bridge(config: SessionConfig, bridge: ScriptedBridge) -> Self {
        let clock = ManualClock::new(0.0);
        let log = bridge.log();
        let inbox = Rc::clone(&bridge.inbox);
        let session = Session::new(config, bridge, clock.clone());
        let mut replayer = Self {
            session,
            clock,
            log,
            inbox,
        };
        replayer.pump();
        replayer
    }

    /// The session under test.
    #[must_use]
    pub fn session(&self) -> &Session<ScriptedBridge, ManualClock> {
        &self.session
    }

    /// Mutable access to the session under test.
    pub fn session_mut(&mut self) -> &mut Session<ScriptedBridge, ManualClock> {
        &mut self.session
    }

    /// The host clock.
    #[must_use]
    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Requests sent so far.
    #[must_use]
    pub fn requests(&self) -> &RequestLog {
        &self.log
    }

    /// Completes the handshake by hand.
    pub fn handshake(&mut self, capabilities: Capabilities, floor: Option<NativeFloor>) {
        self.deliver(NativeEvent::Response(NativeResponse::Initialized {
            capabilities,
            floor,
        }));
    }

    /// Delivers one message at the current host time, then any scripted
    /// answers it produced.
    pub fn deliver(&mut self, event: NativeEvent) {
        self.deliver_traced(event, &mut Tracer::none());
    }

    /// Like [`deliver`](Self::deliver), reporting to `tracer`.
    pub fn deliver_traced(&mut self, event: NativeEvent, tracer: &mut Tracer<'_>) {
        self.session.handle_traced(event, tracer);
        self.pump_traced(tracer);
    }

    /// Moves the clock to `at` and delivers `event`.
    pub fn deliver_at(&mut self, at: f64, event: NativeEvent) {
        self.clock.set(at);
        self.deliver(event);
    }

    /// Delivers queued scripted answers. Returns how many were delivered.
    pub fn pump(&mut self) -> usize {
        self.pump_traced(&mut Tracer::none())
    }

    fn pump_traced(&mut self, tracer: &mut Tracer<'_>) -> usize {
        let mut delivered = 0;
        loop {
            let next = self.inbox.borrow_mut().pop_front();
            let Some(event) = next else {
                break;
            };
            self.session.handle_traced(event, tracer);
            delivered += 1;
        }
        delivered
    }

    /// Plays every step of `script`.
    pub fn run(&mut self, script: &Script) {
        self.run_traced(script, &mut Tracer::none());
    }

    /// Like [`run`](Self::run), reporting to `tracer`.
    pub fn run_traced(&mut self, script: &Script, tracer: &mut Tracer<'_>) {
        for step in &script.steps {
            self.clock.set(step.at.millis());
            self.deliver_traced(step.message.clone(), tracer);
        }
        log::debug!("replayed {} steps", script.steps.len());
    }
}

// ---------------------------------------------------------------------------
// FrameBuilder
// ---------------------------------------------------------------------------

/// Assembles a [`NativeFrame`] with an identity head and projection.
#[derive(Clone, Debug)]
pub struct FrameBuilder {
    frame: NativeFrame,
}

impl FrameBuilder {
    /// A frame at native time `ms`.
    #[must_use]
    pub fn new(ms: f64) -> Self {
        Self {
            frame: NativeFrame {
                timestamp: Timestamp(ms),
                head_transform: Some(Transform3d::IDENTITY),
                projection_matrix: Transform3d::IDENTITY,
                ..NativeFrame::default()
            },
        }
    }

    /// Sets the head pose.
    #[must_use]
    pub fn head(mut self, head: Transform3d) -> Self {
        self.frame.head_transform = Some(head);
        self
    }

    /// Drops the head pose (tracking lost).
    #[must_use]
    pub fn no_head(mut self) -> Self {
        self.frame.head_transform = None;
        self
    }

    /// Sets the projection matrix.
    #[must_use]
    pub fn projection(mut self, projection: Transform3d) -> Self {
        self.frame.projection_matrix = projection;
        self
    }

    /// Adds a "new object".
    #[must_use]
    pub fn added(mut self, object: NativeObject) -> Self {
        self.frame.objects.new_objects.push(object);
        self
    }

    /// Adds a removal.
    #[must_use]
    pub fn removed(mut self, uid: &str) -> Self {
        self.frame.objects.removed_objects.push(Uid::new(uid));
        self
    }

    /// Adds a steady-state update.
    #[must_use]
    pub fn updated(mut self, object: NativeObject) -> Self {
        self.frame.objects.objects.push(object);
        self
    }

    /// The finished frame.
    #[must_use]
    pub fn build(self) -> NativeFrame {
        self.frame
    }

    /// The finished frame wrapped as an event.
    #[must_use]
    pub fn event(self) -> NativeEvent {
        NativeEvent::Frame(self.frame)
    }
}

/// An anchor object at `transform`.
#[must_use]
pub fn anchor(uid: &str, transform: Transform3d) -> NativeObject {
    NativeObject::new(uid, NativeObjectKind::Anchor, transform)
}

/// A mesh object with positions only.
#[must_use]
pub fn mesh(uid: &str, transform: Transform3d, vertices: Vec<f32>) -> NativeObject {
    let triangle_indices = (0..u32::try_from(vertices.len() / 3).unwrap_or(u32::MAX)).collect();
    let mut object = NativeObject::new(uid, NativeObjectKind::Mesh, transform);
    object.geometry = Some(NativeMesh {
        vertices,
        triangle_indices,
        ..NativeMesh::default()
    });
    object
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_clones_share_storage() {
        let log = RequestLog::new();
        let other = log.clone();
        log.push(NativeRequest::End);
        assert_eq!(other.len(), 1);
        assert_eq!(other.take(), vec![NativeRequest::End]);
        assert!(log.is_empty());
    }

    #[test]
    fn clock_clones_share_time() {
        let clock = ManualClock::new(10.0);
        let other = clock.clone();
        clock.advance(5.0);
        assert_eq!(other.now(), Timestamp(15.0));
    }

    #[test]
    fn first_matching_responder_answers() {
        let mut bridge = ScriptedBridge::new()
            .respond_with(|_| None)
            .respond_with(|r| {
                r.id().map(|id| NativeResponse::Failed {
                    id,
                    message: "first".into(),
                })
            })
            .respond_with(|r| {
                r.id().map(|id| NativeResponse::Failed {
                    id,
                    message: "second".into(),
                })
            });
        bridge.send(NativeRequest::GetWorldMap { id: RequestId(3) });
        bridge.send(NativeRequest::End);
        assert_eq!(bridge.log().len(), 2);
        let queued: Vec<_> = bridge.inbox.borrow().iter().cloned().collect();
        assert_eq!(
            queued,
            vec![NativeEvent::Response(NativeResponse::Failed {
                id: RequestId(3),
                message: "first".into(),
            })]
        );
    }

    #[test]
    fn auto_initialize_activates_session() {
        let bridge = ScriptedBridge::new().auto_initialize(Capabilities::default(), None);
        let replayer = Replayer::with_bridge(SessionConfig::immersive_ar(), bridge);
        assert_eq!(
            replayer.session().state(),
            lodestone_core::session::SessionState::Active
        );
        assert_eq!(
            replayer
                .requests()
                .count(|r| matches!(r, NativeRequest::Initialize { .. })),
            1
        );
    }

    #[test]
    fn mesh_helper_indexes_every_vertex() {
        let obj = mesh("m", Transform3d::IDENTITY, vec![0.0; 9]);
        let geometry = obj.geometry.unwrap();
        assert_eq!(geometry.triangle_indices, vec![0, 1, 2]);
    }
}
