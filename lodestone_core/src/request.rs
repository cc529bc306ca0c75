// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Correlating native requests with their responses.
//!
//! Every outbound request that expects an answer gets a fresh [`RequestId`]
//! from a [`Correlator`]. The caller keeps a [`Pending`] handle; the session
//! keeps the matching [`Resolver`] in its pending map until a response with
//! the same id arrives. There are no timeouts: an unanswered request stays
//! pending.
//!
//! [`Pending`] is a plain single-threaded future. It can be `.await`ed by
//! an executor or polled by hand with [`Pending::try_take`].

use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::vec::{Drain, Vec};
use core::cell::RefCell;
use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};

use crate::entity::{EntityId, Uid};
use crate::error::Error;
use crate::hit_test::HitResult;
use crate::native::{NativeRequest, WorldMap};
use crate::space::ReferenceSpace;

/// Correlation id shared by a request and its response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct RequestId(pub u64);

/// Hands out monotonically increasing [`RequestId`]s.
#[derive(Clone, Debug, Default)]
pub struct Correlator {
    next: u64,
}

impl Correlator {
    /// Creates a correlator starting at id 0.
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Returns the next unused id.
    pub fn next_id(&mut self) -> RequestId {
        let id = RequestId(self.next);
        self.next = self.next.wrapping_add(1);
        id
    }
}

struct Slot<T> {
    value: Option<Result<T, Error>>,
    taken: bool,
    waker: Option<Waker>,
}

/// The consumer half of an asynchronous result.
pub struct Pending<T> {
    slot: Rc<RefCell<Slot<T>>>,
}

/// The producer half of an asynchronous result.
pub struct Resolver<T> {
    slot: Rc<RefCell<Slot<T>>>,
}

/// Creates a connected resolver/pending pair.
#[must_use]
pub fn pending<T>() -> (Resolver<T>, Pending<T>) {
    let slot = Rc::new(RefCell::new(Slot {
        value: None,
        taken: false,
        waker: None,
    }));
    (
        Resolver {
            slot: Rc::clone(&slot),
        },
        Pending { slot },
    )
}

impl<T> Pending<T> {
    /// A result that is already available.
    #[must_use]
    pub fn ready(value: T) -> Self {
        let (resolver, pending) = pending();
        resolver.resolve(value);
        pending
    }

    /// A result that already failed.
    #[must_use]
    pub fn rejected(err: Error) -> Self {
        let (resolver, pending) = pending();
        resolver.reject(err);
        pending
    }

    /// Whether a result is waiting to be taken.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.slot.borrow().value.is_some()
    }

    /// Takes the result if it has arrived.
    ///
    /// Returns `None` while pending and after the result was taken.
    pub fn try_take(&mut self) -> Option<Result<T, Error>> {
        let mut slot = self.slot.borrow_mut();
        let value = slot.value.take();
        if value.is_some() {
            slot.taken = true;
        }
        value
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.borrow_mut();
        if let Some(value) = slot.value.take() {
            slot.taken = true;
            return Poll::Ready(value);
        }
        debug_assert!(!slot.taken, "Pending polled after completion");
        slot.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<T> Resolver<T> {
    /// Completes the request with a value.
    pub fn resolve(self, value: T) {
        self.complete(Ok(value));
    }

    /// Completes the request with an error.
    pub fn reject(self, err: Error) {
        self.complete(Err(err));
    }

    /// Completes the request with either outcome.
    pub fn complete(self, result: Result<T, Error>) {
        let waker = {
            let mut slot = self.slot.borrow_mut();
            slot.value = Some(result);
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Whether the consumer dropped its [`Pending`].
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        Rc::strong_count(&self.slot) == 1
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.borrow();
        f.debug_struct("Pending")
            .field("ready", &slot.value.is_some())
            .field("taken", &slot.taken)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}

/// What a request is waiting for.
#[derive(Debug)]
pub(crate) enum Awaiting {
    HitTest {
        space: ReferenceSpace,
        resolver: Resolver<Vec<HitResult>>,
    },
    Anchor {
        resolver: Resolver<EntityId>,
    },
    Ack {
        resolver: Resolver<()>,
    },
    WorldMap {
        resolver: Resolver<WorldMap>,
    },
}

impl Awaiting {
    pub(crate) fn reject(self, err: Error) {
        match self {
            Self::HitTest { resolver, .. } => resolver.reject(err),
            Self::Anchor { resolver } => resolver.reject(err),
            Self::Ack { resolver } => resolver.reject(err),
            Self::WorldMap { resolver } => resolver.reject(err),
        }
    }

    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::HitTest { .. } => "hit test",
            Self::Anchor { .. } => "add anchor",
            Self::Ack { .. } => "acknowledgement",
            Self::WorldMap { .. } => "world map",
        }
    }
}

/// Outbound queue plus the map of requests still waiting for an answer.
#[derive(Debug, Default)]
pub(crate) struct RequestLayer {
    correlator: Correlator,
    waiting: BTreeMap<RequestId, Awaiting>,
    outbox: Vec<NativeRequest>,
    /// Anchors this session asked the engine to create.
    owned_anchors: Vec<Uid>,
}

impl RequestLayer {
    /// Allocates an id, queues the request built from it and records what it
    /// is waiting for.
    pub(crate) fn begin(
        &mut self,
        build: impl FnOnce(RequestId) -> NativeRequest,
        awaiting: Awaiting,
    ) -> RequestId {
        let id = self.correlator.next_id();
        self.outbox.push(build(id));
        self.waiting.insert(id, awaiting);
        id
    }

    /// Queues a request that has no response.
    pub(crate) fn push(&mut self, request: NativeRequest) {
        self.outbox.push(request);
    }

    /// Removes and returns what `id` was waiting for.
    pub(crate) fn take(&mut self, id: RequestId) -> Option<Awaiting> {
        let awaiting = self.waiting.remove(&id);
        if awaiting.is_none() {
            log::debug!("ignoring response for unknown request {id:?}");
        }
        awaiting
    }

    /// Rejects `id` with a native failure message.
    pub(crate) fn fail(&mut self, id: RequestId, err: Error) {
        if let Some(awaiting) = self.take(id) {
            log::debug!("{} request {id:?} failed: {err}", awaiting.name());
            awaiting.reject(err);
        }
    }

    /// Takes every queued request, oldest first.
    pub(crate) fn drain_outbox(&mut self) -> Drain<'_, NativeRequest> {
        self.outbox.drain(..)
    }

    pub(crate) fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub(crate) fn own_anchor(&mut self, uid: Uid) {
        self.owned_anchors.push(uid);
    }

    /// Forgets an owned anchor. Returns `false` if this session did not
    /// create it.
    pub(crate) fn disown_anchor(&mut self, uid: &Uid) -> bool {
        let before = self.owned_anchors.len();
        self.owned_anchors.retain(|u| u != uid);
        self.owned_anchors.len() != before
    }

    pub(crate) fn take_owned_anchors(&mut self) -> Vec<Uid> {
        core::mem::take(&mut self.owned_anchors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let mut c = Correlator::new();
        assert_eq!(c.next_id(), RequestId(0));
        assert_eq!(c.next_id(), RequestId(1));
    }

    #[test]
    fn try_take_once() {
        let (resolver, mut pending) = pending::<u32>();
        assert!(pending.try_take().is_none());
        assert!(!resolver.is_abandoned());
        resolver.resolve(3);
        assert!(pending.is_ready());
        assert_eq!(pending.try_take(), Some(Ok(3)));
        assert!(pending.try_take().is_none());
    }

    #[test]
    fn poll_after_resolve() {
        let mut cx = Context::from_waker(Waker::noop());
        let (resolver, mut pending) = pending::<&str>();
        assert!(Pin::new(&mut pending).poll(&mut cx).is_pending());
        resolver.reject(Error::SessionEnded);
        assert_eq!(
            Pin::new(&mut pending).poll(&mut cx),
            Poll::Ready(Err(Error::SessionEnded))
        );
    }

    #[test]
    fn ready_and_rejected() {
        assert_eq!(Pending::ready(1).try_take(), Some(Ok(1)));
        assert_eq!(
            Pending::<()>::rejected(Error::NotInitialized).try_take(),
            Some(Err(Error::NotInitialized))
        );
    }

    #[test]
    fn abandoned_resolver() {
        let (resolver, pending) = pending::<()>();
        drop(pending);
        assert!(resolver.is_abandoned());
    }

    #[test]
    fn layer_correlates_out_of_order() {
        let mut layer = RequestLayer::default();
        let (r1, mut p1) = pending::<()>();
        let (r2, mut p2) = pending::<()>();
        let a = layer.begin(|id| NativeRequest::GetWorldMap { id }, Awaiting::Ack { resolver: r1 });
        let b = layer.begin(|id| NativeRequest::GetWorldMap { id }, Awaiting::Ack { resolver: r2 });
        assert_eq!(layer.drain_outbox().count(), 2);
        assert_eq!(layer.waiting_len(), 2);

        match layer.take(b) {
            Some(Awaiting::Ack { resolver }) => resolver.resolve(()),
            other => panic!("unexpected {other:?}"),
        }
        assert!(p1.try_take().is_none());
        assert_eq!(p2.try_take(), Some(Ok(())));

        layer.fail(a, Error::Native("nope".into()));
        assert_eq!(p1.try_take(), Some(Err(Error::Native("nope".into()))));
        assert!(layer.take(a).is_none());
        assert_eq!(layer.waiting_len(), 0);
    }
}
