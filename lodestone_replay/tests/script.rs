// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Replaying JSON scripts of native messages.

use lodestone_core::entity::{EntityKind, Uid};
use lodestone_core::native::{NativeEvent, NativeObjectKind, NativeResponse, PlaneAlignment};
use lodestone_core::session::SessionConfig;
use lodestone_core::trace::Tracer;
use lodestone_core::transform::Transform3d;
use lodestone_debug::recorder::{RecordedEvent, RecorderSink, decode};
use lodestone_replay::{Replayer, Script};

const SCRIPT: &str = r#"{
  "steps": [
    { "at": 1000, "message": {
        "event": "response", "response": "initialized",
        "capabilities": { "hitTest": true, "anchors": true }
    } },
    { "at": 1100, "message": { "event": "setTime", "timestamp": 100 } },
    { "at": 1116, "message": {
        "event": "frame",
        "timestamp": 116,
        "headTransform": [1,0,0,0, 0,1,0,0, 0,0,1,0, 0,1.5,0,1],
        "projectionMatrix": [1,0,0,0, 0,1,0,0, 0,0,1,0, 0,0,0,1],
        "lightEstimate": 800,
        "newObjects": [
          { "uuid": "floor", "kind": "plane",
            "transform": [1,0,0,0, 0,1,0,0, 0,0,1,0, 0,0,-1,1],
            "geometry": {
              "vertices": [0,0,0, 1,0,0, 0,0,1],
              "triangleIndices": [0,1,2]
            },
            "plane": {
              "alignment": "horizontal",
              "center": { "x": 0.0, "y": 0.0, "z": 0.0 },
              "extent": [2.0, 3.0],
              "boundaryVertices": [-1,0,-1.5, 1,0,-1.5, 1,0,1.5]
            } },
          { "uuid": "a1", "kind": "anchor",
            "transform": [1,0,0,0, 0,1,0,0, 0,0,1,0, 2,0,0,1] }
        ]
    } },
    { "at": 1132, "message": {
        "event": "frame",
        "timestamp": 132,
        "removedObjects": ["a1"],
        "objects": [
          { "uuid": "floor", "kind": "plane",
            "transform": [1,0,0,0, 0,1,0,0, 0,0,1,0, 0,0,-2,1],
            "geometry": {
              "vertices": [0,0,0, 1,0,0, 0,0,1],
              "triangleIndices": [0,1,2]
            },
            "plane": {
              "alignment": "horizontal",
              "center": { "x": 0.0, "y": 0.0, "z": 0.0 },
              "extent": [2.0, 3.0],
              "boundaryVertices": [-1,0,-1.5, 1,0,-1.5, 1,0,1.5]
            } }
        ]
    } }
  ]
}"#;

#[test]
fn script_parses_every_message_kind() {
    let script = Script::from_json(SCRIPT).unwrap();
    assert_eq!(script.steps.len(), 4);
    assert!(matches!(
        script.steps[0].message,
        NativeEvent::Response(NativeResponse::Initialized { capabilities, floor: None })
            if capabilities.hit_test && !capabilities.world_map
    ));
    match &script.steps[2].message {
        NativeEvent::Frame(frame) => {
            assert_eq!(frame.objects.new_objects.len(), 2);
            assert_eq!(frame.objects.new_objects[0].kind, NativeObjectKind::Plane);
            let plane = frame.objects.new_objects[0].plane.as_ref().unwrap();
            assert_eq!(plane.alignment, PlaneAlignment::Horizontal);
            assert_eq!(plane.extent, [2.0, 3.0]);
            assert_eq!(frame.light_estimate, Some(800.0));
            assert_eq!(
                frame.head_transform.unwrap().translation().y,
                1.5,
                "matrices are column-major"
            );
        }
        other => panic!("expected a frame, got {other:?}"),
    }
    match &script.steps[3].message {
        NativeEvent::Frame(frame) => {
            assert!(frame.head_transform.is_none());
            assert_eq!(frame.objects.removed_objects, vec![Uid::new("a1")]);
        }
        other => panic!("expected a frame, got {other:?}"),
    }
}

#[test]
fn script_survives_a_json_round_trip() {
    let script = Script::from_json(SCRIPT).unwrap();
    let again = Script::from_json(&script.to_json().unwrap()).unwrap();
    assert_eq!(again, script);
}

#[test]
fn replay_builds_the_expected_world() {
    let script = Script::from_json(SCRIPT).unwrap();
    let mut replayer = Replayer::new(SessionConfig::immersive_ar());
    replayer.run(&script);

    let session = replayer.session();
    let store = session.store();
    let floor = store.lookup(&Uid::new("floor")).unwrap();
    assert_eq!(store.kind(floor), EntityKind::Plane);
    assert!(
        store
            .transform(floor)
            .approx_eq(&Transform3d::from_translation(0.0, 0.0, -2.0), 1e-9)
    );
    assert!(store.changes(floor).pose_changed());
    assert!(!store.changes(floor).boundary_changed());
    assert!(store.lookup(&Uid::new("a1")).is_none());
    assert!(store.is_tombstoned(&Uid::new("a1")));

    assert_eq!(session.frame().index(), 2);
    assert_eq!(session.frame().native_timestamp().millis(), 132.0);
    assert_eq!(session.frame().timestamp().millis(), 1132.0);
    assert_eq!(session.frame().changes().removed, vec![Uid::new("a1")]);
}

#[test]
fn traced_replay_records_each_frame() {
    let script = Script::from_json(SCRIPT).unwrap();
    let mut replayer = Replayer::new(SessionConfig::immersive_ar());
    let mut recorder = RecorderSink::new();
    replayer.run_traced(&script, &mut Tracer::new(&mut recorder));

    let events: Vec<_> = decode(recorder.as_bytes()).collect();
    let frames: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            RecordedEvent::NativeFrame(f) => Some(f),
            _ => None,
        })
        .collect();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].new_objects, 2);
    assert!(frames[0].head_tracked);
    assert_eq!(frames[1].removed_objects, 1);
    assert!(!frames[1].head_tracked);

    let samples = events
        .iter()
        .filter(|e| matches!(e, RecordedEvent::ClockSample(s) if s.offset == Some(1000.0)))
        .count();
    assert_eq!(samples, 1);

    let summaries = events
        .iter()
        .filter(|e| matches!(e, RecordedEvent::FrameSummary(_)))
        .count();
    assert_eq!(summaries, 2);
}
