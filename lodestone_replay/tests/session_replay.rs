// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end behavior of a session driven through the replay harness.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use kurbo::Point;
use lodestone_core::entity::{EntityStatus, Uid};
use lodestone_core::hit_test::{HitResult, HitTestRay, NativeHit, NativeHitKind};
use lodestone_core::native::{Capabilities, NativeEvent, NativeRequest, NativeResponse};
use lodestone_core::request::Pending;
use lodestone_core::rigid::RigidTransform;
use lodestone_core::session::SessionConfig;
use lodestone_core::space::{ReferenceSpace, ReferenceSpaceType};
use lodestone_core::time::Timestamp;
use lodestone_core::transform::Transform3d;
use lodestone_core::vec3::Vec3;
use lodestone_replay::{FrameBuilder, Replayer, ScriptedBridge, anchor, mesh};

const ALL: Capabilities = Capabilities {
    hit_test: true,
    anchors: true,
    image_detection: true,
    world_map: true,
};

fn active() -> Replayer {
    let bridge = ScriptedBridge::new().auto_initialize(ALL, None);
    Replayer::with_bridge(SessionConfig::immersive_ar(), bridge)
}

fn take<T>(mut pending: Pending<T>) -> T {
    match pending.try_take() {
        Some(Ok(value)) => value,
        Some(Err(err)) => panic!("request failed: {err}"),
        None => panic!("request still pending"),
    }
}

fn local_space(replayer: &mut Replayer) -> ReferenceSpace {
    take(
        replayer
            .session_mut()
            .request_reference_space(ReferenceSpaceType::Local),
    )
}

fn translation(x: f64, y: f64, z: f64) -> Transform3d {
    Transform3d::from_translation(x, y, z)
}

#[test]
fn added_and_removed_in_one_batch_leaves_nothing() {
    let mut r = active();
    let removed = Rc::new(Cell::new(0));
    let counter = Rc::clone(&removed);
    r.session_mut()
        .entity_events_mut()
        .removed
        .subscribe(move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        });

    r.deliver(
        FrameBuilder::new(16.0)
            .added(anchor("a", translation(1.0, 0.0, 0.0)))
            .removed("a")
            .event(),
    );

    let session = r.session();
    assert!(session.store().lookup(&Uid::new("a")).is_none());
    assert_eq!(removed.get(), 1);
    assert_eq!(session.last_update_report().updated, 0);
    assert_eq!(session.last_update_report().removed, vec![Uid::new("a")]);
    assert!(session.frame().changes().added.is_empty());
}

#[test]
fn placeholder_is_replaced_once_and_offsets_follow() {
    let hit_world = translation(1.0, 0.0, 0.0);
    let hit_local = translation(0.0, 0.0, 0.5);
    let bridge = ScriptedBridge::new()
        .auto_initialize(ALL, None)
        .respond_with(move |request| match request {
            NativeRequest::HitTest { id, .. } => Some(NativeResponse::HitTest {
                id: *id,
                hits: vec![NativeHit {
                    local_transform: Some(hit_local),
                    anchor_uid: Some(Uid::new("p1")),
                    ..NativeHit::new(NativeHitKind::ExistingPlaneUsingExtent, 1.0, hit_world)
                }],
            }),
            _ => None,
        });
    let mut r = Replayer::with_bridge(SessionConfig::immersive_ar(), bridge);
    let space = local_space(&mut r);
    r.deliver(FrameBuilder::new(16.0).event());

    let replaced = Rc::new(Cell::new(0));
    let counter = Rc::clone(&replaced);
    r.session_mut()
        .entity_events_mut()
        .replaced
        .subscribe(move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        });

    let pending = r
        .session_mut()
        .hit_test(&space, HitTestRay::Screen(Point::new(0.5, 0.5)));
    assert_eq!(r.pump(), 1);
    let hits = take(pending);
    assert_eq!(hits.len(), 1);

    let placeholder = r.session().store().lookup(&Uid::new("p1")).unwrap();
    assert_eq!(
        r.session().store().status(placeholder),
        EntityStatus::Placeholder
    );
    assert!(
        r.session()
            .store()
            .transform(placeholder)
            .approx_eq(&translation(1.0, 0.0, -0.5), 1e-9)
    );

    let offset = take(r.session_mut().create_anchor_from_hit(&hits[0]));
    assert_eq!(r.session().store().base(offset), Some(placeholder));

    r.deliver(
        FrameBuilder::new(32.0)
            .added(anchor("p1", translation(2.0, 0.0, 0.0)))
            .event(),
    );

    let store = r.session().store();
    assert_eq!(replaced.get(), 1);
    assert_eq!(store.lookup(&Uid::new("p1")), Some(placeholder));
    assert_eq!(store.status(placeholder), EntityStatus::Tracked);
    assert!(
        store
            .transform(offset)
            .approx_eq(&translation(2.0, 0.0, 0.5), 1e-9)
    );
    assert_eq!(r.session().last_update_report().promoted, vec![placeholder]);
}

#[test]
fn mesh_updates_report_what_moved() {
    let mut r = active();
    let verts = vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    r.deliver(
        FrameBuilder::new(16.0)
            .added(mesh("m", Transform3d::IDENTITY, verts.clone()))
            .event(),
    );
    let id = r.session().store().lookup(&Uid::new("m")).unwrap();

    r.deliver(
        FrameBuilder::new(32.0)
            .updated(mesh("m", Transform3d::IDENTITY, verts.clone()))
            .event(),
    );
    let changes = r.session().store().changes(id);
    assert!(!changes.vertex_positions_changed());
    assert!(!changes.vertex_count_changed());
    assert!(!changes.changed());

    let mut nudged = verts.clone();
    nudged[4] = 0.01;
    r.deliver(
        FrameBuilder::new(48.0)
            .updated(mesh("m", Transform3d::IDENTITY, nudged))
            .event(),
    );
    let changes = r.session().store().changes(id);
    assert!(changes.vertex_positions_changed());
    assert!(!changes.vertex_count_changed());
    assert_eq!(r.session().frame().changes().geometry, vec![id]);

    let mut grown = verts;
    grown.extend([1.0, 1.0, 0.0]);
    r.deliver(
        FrameBuilder::new(64.0)
            .updated(mesh("m", Transform3d::IDENTITY, grown))
            .event(),
    );
    let changes = r.session().store().changes(id);
    assert!(changes.vertex_count_changed());
    assert!(changes.vertex_positions_changed());
    assert_eq!(r.session().store().mesh(id).unwrap().vertex_count(), 4);
}

#[test]
fn clock_offset_maps_native_frames() {
    let mut r = active();
    for (local, native) in [(1100.0, 100.0), (1105.0, 100.0), (1110.0, 100.0)] {
        r.deliver_at(
            local,
            NativeEvent::SetTime {
                timestamp: Timestamp(native),
            },
        );
    }
    let offset = r.session().clock_sync().offset().unwrap();
    assert!((offset - 1005.0).abs() < 1e-9, "offset {offset}");

    r.deliver_at(1300.0, FrameBuilder::new(200.0).event());
    let ts = r.session().frame().timestamp().millis();
    assert!((ts - 1205.0).abs() < 1e-9, "timestamp {ts}");
}

#[test]
fn hits_rank_extent_before_distance() {
    let bridge = ScriptedBridge::new()
        .auto_initialize(ALL, None)
        .respond_with(|request| match request {
            NativeRequest::HitTest { id, .. } => Some(NativeResponse::HitTest {
                id: *id,
                hits: vec![
                    NativeHit::new(NativeHitKind::FeaturePoint, 1.0, Transform3d::IDENTITY),
                    NativeHit::new(NativeHitKind::ExistingPlane, 5.0, Transform3d::IDENTITY),
                    NativeHit::new(
                        NativeHitKind::ExistingPlaneUsingExtent,
                        10.0,
                        Transform3d::IDENTITY,
                    ),
                ],
            }),
            _ => None,
        });
    let mut r = Replayer::with_bridge(SessionConfig::immersive_ar(), bridge);
    let space = local_space(&mut r);
    r.deliver(FrameBuilder::new(16.0).event());

    let pending = r
        .session_mut()
        .hit_test(&space, HitTestRay::Screen(Point::new(0.25, 0.75)));
    r.pump();
    let kinds: Vec<_> = take(pending).iter().map(|h| h.native().kind).collect();
    assert_eq!(
        kinds,
        vec![
            NativeHitKind::ExistingPlaneUsingExtent,
            NativeHitKind::ExistingPlane,
            NativeHitKind::FeaturePoint,
        ]
    );

    match r.requests().last() {
        Some(NativeRequest::HitTest { x, y, .. }) => {
            assert_eq!(x, 0.25);
            assert_eq!(y, 0.25);
        }
        other => panic!("expected a hit test request, got {other:?}"),
    }
}

#[test]
fn concurrent_hit_tests_resolve_out_of_order() {
    let mut r = active();
    let space = local_space(&mut r);
    r.deliver(FrameBuilder::new(16.0).event());

    let mut first = r
        .session_mut()
        .hit_test(&space, HitTestRay::Screen(Point::new(0.1, 0.1)));
    let mut second = r
        .session_mut()
        .hit_test(&space, HitTestRay::Screen(Point::new(0.9, 0.9)));
    let ids: Vec<_> = r
        .requests()
        .snapshot()
        .iter()
        .filter(|q| matches!(q, NativeRequest::HitTest { .. }))
        .filter_map(NativeRequest::id)
        .collect();
    assert_eq!(ids.len(), 2);
    assert_eq!(r.session().pending_requests(), 2);

    r.deliver(NativeEvent::Response(NativeResponse::HitTest {
        id: ids[1],
        hits: vec![NativeHit::new(
            NativeHitKind::FeaturePoint,
            2.0,
            translation(0.0, 0.0, -2.0),
        )],
    }));
    assert!(first.try_take().is_none());
    let hits: Vec<HitResult> = second.try_take().unwrap().unwrap();
    assert_eq!(hits.len(), 1);

    r.deliver(NativeEvent::Response(NativeResponse::HitTest {
        id: ids[0],
        hits: Vec::new(),
    }));
    assert!(
        matches!(first.try_take(), Some(Ok(ref hits)) if hits.is_empty()),
        "first hit test should resolve empty"
    );
    assert_eq!(r.session().pending_requests(), 0);
}

#[test]
fn suspended_session_holds_a_single_callback() {
    let mut r = active();
    let ran = Rc::new(Cell::new(0));

    r.session_mut().suspend();
    let a = Rc::clone(&ran);
    let b = Rc::clone(&ran);
    assert!(
        r.session_mut()
            .request_animation_frame(move |_, _| a.set(a.get() + 1))
            .is_some()
    );
    assert!(
        r.session_mut()
            .request_animation_frame(move |_, _| b.set(b.get() + 1))
            .is_none()
    );

    r.deliver(FrameBuilder::new(16.0).event());
    assert_eq!(ran.get(), 0);
    assert_eq!(r.session().frame().index(), 1);

    r.session_mut().resume();
    assert_eq!(ran.get(), 1);

    let c = Rc::clone(&ran);
    r.session_mut()
        .request_animation_frame(move |_, _| c.set(c.get() + 1));
    r.deliver(FrameBuilder::new(32.0).event());
    assert_eq!(ran.get(), 2);
    r.deliver(FrameBuilder::new(48.0).event());
    assert_eq!(ran.get(), 2);
}

#[test]
fn viewer_pose_in_offset_space() {
    let mut r = active();
    let local = local_space(&mut r);
    let shifted = local
        .derive_offset_space(&RigidTransform::from_matrix(translation(0.0, 0.0, -1.0)))
        .unwrap();

    let seen = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&seen);
    r.session_mut().request_animation_frame(move |_, scope| {
        let pose = scope.viewer_pose(&shifted);
        *sink.borrow_mut() = pose.map(|p| p.transform().position());
    });
    r.deliver(
        FrameBuilder::new(16.0)
            .head(translation(0.0, 1.5, 0.0))
            .event(),
    );

    let position = seen.borrow().expect("viewer pose while tracked");
    assert!(
        position.approx_eq(Vec3::new(0.0, 1.5, 1.0), 1e-9),
        "position {position:?}"
    );
}

#[test]
fn native_anchor_round_trip_and_end() {
    let bridge = ScriptedBridge::new()
        .auto_initialize(ALL, None)
        .auto_confirm_anchors();
    let mut r = Replayer::with_bridge(SessionConfig::immersive_ar(), bridge);
    let space = local_space(&mut r);
    r.deliver(FrameBuilder::new(16.0).event());

    let pose = RigidTransform::from_matrix(translation(0.0, 0.0, -2.0));
    let pending = r.session_mut().add_anchor(&space, &pose);
    assert_eq!(r.pump(), 1);
    let id = take(pending);
    let uid = r.session().store().uid(id).clone();
    assert!(
        r.session()
            .store()
            .transform(id)
            .approx_eq(&pose.matrix(), 1e-9)
    );

    r.session_mut().end();
    let sent = r.requests().snapshot();
    let tail = &sent[sent.len() - 2..];
    assert_eq!(tail[0], NativeRequest::RemoveAnchor { uid });
    assert_eq!(tail[1], NativeRequest::End);
    assert!(!r.session().store().is_alive(id));
}
