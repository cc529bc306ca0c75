// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chrome Trace Event Format exporter.
//!
//! [`export`] reads recorded bytes from a [`RecorderSink`](super::recorder::RecorderSink)
//! and writes [Chrome Trace Event Format][spec] JSON to the given writer.
//!
//! [spec]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU

use std::io::{self, Write};

use serde_json::{Value, json};

use lodestone_core::time::Timestamp;

use crate::recorder::{RecordedEvent, decode};

/// Exports recorded events as Chrome Trace Event Format JSON.
///
/// The output is a complete JSON array of trace event objects, suitable for
/// loading into `chrome://tracing` or [Perfetto](https://ui.perfetto.dev/).
///
/// Local timestamps are milliseconds; Chrome wants microseconds. Events that
/// carry no timestamp of their own (dispatch, entity counts) are placed at
/// the most recent native frame's local time.
pub fn export(bytes: &[u8], writer: &mut dyn Write) -> io::Result<()> {
    let mut events: Vec<Value> = Vec::new();
    let mut frame_ts = 0.0;

    for recorded in decode(bytes) {
        match recorded {
            RecordedEvent::NativeFrame(e) => {
                frame_ts = to_us(e.local_timestamp);
                events.push(json!({
                    "ph": "i",
                    "name": "NativeFrame",
                    "cat": "Native",
                    "ts": frame_ts,
                    "pid": 0,
                    "tid": 0,
                    "s": "g",
                    "args": {
                        "frame_index": e.frame_index,
                        "native_ms": e.native_timestamp.millis(),
                        "new": e.new_objects,
                        "removed": e.removed_objects,
                        "objects": e.objects,
                        "head_tracked": e.head_tracked,
                    }
                }));
            }
            RecordedEvent::ClockSample(e) => {
                events.push(json!({
                    "ph": "C",
                    "name": "ClockOffset",
                    "cat": "Clock",
                    "ts": to_us(e.local),
                    "pid": 0,
                    "tid": 0,
                    "args": {
                        "offset_ms": e.offset.unwrap_or(0.0),
                    }
                }));
            }
            RecordedEvent::PhaseBegin(e) => {
                events.push(json!({
                    "ph": "B",
                    "name": e.phase.as_str(),
                    "cat": "Frame",
                    "ts": to_us(e.timestamp),
                    "pid": 0,
                    "tid": 0,
                    "args": {
                        "frame_index": e.frame_index,
                    }
                }));
            }
            RecordedEvent::PhaseEnd(e) => {
                events.push(json!({
                    "ph": "E",
                    "name": e.phase.as_str(),
                    "cat": "Frame",
                    "ts": to_us(e.timestamp),
                    "pid": 0,
                    "tid": 0,
                    "args": {
                        "frame_index": e.frame_index,
                    }
                }));
            }
            RecordedEvent::Dispatch(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Dispatch",
                    "cat": "Frame",
                    "ts": frame_ts,
                    "pid": 0,
                    "tid": 0,
                    "s": "t",
                    "args": {
                        "frame_index": e.frame_index,
                        "callbacks": e.callbacks,
                        "cancelled": e.cancelled,
                        "render_state_applied": e.render_state_applied,
                    }
                }));
            }
            RecordedEvent::FrameSummary(s) => {
                events.push(json!({
                    "ph": "i",
                    "name": "FrameSummary",
                    "cat": "Summary",
                    "ts": to_us(s.timestamp),
                    "pid": 0,
                    "tid": 0,
                    "s": "g",
                    "args": {
                        "frame_index": s.frame_index,
                        "apply_us": s.apply_ms * 1000.0,
                        "evaluate_us": s.evaluate_ms * 1000.0,
                        "dispatch_us": s.dispatch_ms * 1000.0,
                        "entities": s.entities,
                        "rejected": s.rejected,
                        "callbacks": s.callbacks,
                    }
                }));
            }
            RecordedEvent::EntityChangesCount { frame_index, count } => {
                events.push(json!({
                    "ph": "i",
                    "name": "EntityChanges",
                    "cat": "Rich",
                    "ts": frame_ts,
                    "pid": 0,
                    "tid": 0,
                    "s": "p",
                    "args": {
                        "frame_index": frame_index,
                        "count": count,
                    }
                }));
            }
        }
    }

    serde_json::to_writer_pretty(writer, &events)?;
    Ok(())
}

fn to_us(t: Timestamp) -> f64 {
    t.millis() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::RecorderSink;
    use lodestone_core::trace::{
        ClockSampleEvent, NativeFrameEvent, PhaseBeginEvent, PhaseEndEvent, PhaseKind, TraceSink,
    };

    #[test]
    fn export_produces_valid_json() {
        let mut rec = RecorderSink::new();
        rec.on_native_frame(&NativeFrameEvent {
            frame_index: 0,
            native_timestamp: Timestamp(5.0),
            local_timestamp: Timestamp(1005.0),
            new_objects: 1,
            removed_objects: 0,
            objects: 1,
            head_tracked: true,
        });
        rec.on_phase_begin(&PhaseBeginEvent {
            frame_index: 0,
            phase: PhaseKind::Evaluate,
            timestamp: Timestamp(1006.0),
        });
        rec.on_phase_end(&PhaseEndEvent {
            frame_index: 0,
            phase: PhaseKind::Evaluate,
            timestamp: Timestamp(1006.5),
        });

        let mut out = Vec::new();
        export(rec.as_bytes(), &mut out).unwrap();
        let json_str = String::from_utf8(out).unwrap();

        let parsed: Vec<Value> = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.len(), 3);

        assert_eq!(parsed[0]["ph"], "i");
        assert_eq!(parsed[0]["name"], "NativeFrame");
        assert_eq!(parsed[0]["ts"], 1_005_000.0);

        assert_eq!(parsed[1]["ph"], "B");
        assert_eq!(parsed[1]["name"], "evaluate");

        assert_eq!(parsed[2]["ph"], "E");
        assert_eq!(parsed[2]["ts"], 1_006_500.0);
    }

    #[test]
    fn clock_samples_become_counters() {
        let mut rec = RecorderSink::new();
        rec.on_clock_sample(&ClockSampleEvent {
            local: Timestamp(1205.0),
            native: Timestamp(5.0),
            offset: Some(1200.0),
        });

        let mut out = Vec::new();
        export(rec.as_bytes(), &mut out).unwrap();
        let parsed: Vec<Value> = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed[0]["ph"], "C");
        assert_eq!(parsed[0]["args"]["offset_ms"], 1200.0);
    }

    #[test]
    fn export_empty_recording() {
        let mut out = Vec::new();
        export(&[], &mut out).unwrap();
        let json_str = String::from_utf8(out).unwrap();
        let parsed: Vec<Value> = serde_json::from_str(&json_str).unwrap();
        assert!(parsed.is_empty());
    }
}
