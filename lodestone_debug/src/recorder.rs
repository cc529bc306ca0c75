// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact binary event recording and decoding.
//!
//! [`RecorderSink`] implements [`TraceSink`] and encodes events into a
//! `Vec<u8>` as fixed-size little-endian records. [`decode`] reads them back
//! as an iterator of [`RecordedEvent`].
//!
//! Rich events ([`on_entity_changes`](TraceSink::on_entity_changes)) store
//! only the count.

use lodestone_core::time::Timestamp;
use lodestone_core::trace::{
    ClockSampleEvent, DispatchEvent, EntityChange, FrameSummary, NativeFrameEvent,
    PhaseBeginEvent, PhaseEndEvent, PhaseKind, TraceSink,
};

// ---------------------------------------------------------------------------
// Event type discriminants
// ---------------------------------------------------------------------------

const TAG_NATIVE_FRAME: u8 = 1;
const TAG_CLOCK_SAMPLE: u8 = 2;
const TAG_PHASE_BEGIN: u8 = 3;
const TAG_PHASE_END: u8 = 4;
const TAG_DISPATCH: u8 = 5;
const TAG_FRAME_SUMMARY: u8 = 6;
const TAG_ENTITY_CHANGES_COUNT: u8 = 7;

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that encodes events into a compact binary buffer.
#[derive(Debug, Default)]
pub struct RecorderSink {
    buf: Vec<u8>,
}

impl RecorderSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a view of the recorded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the recorder and returns the recorded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // -- encoding helpers --------------------------------------------------

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_time(&mut self, t: Timestamp) {
        self.write_f64(t.millis());
    }

    fn write_option_f64(&mut self, v: Option<f64>) {
        match v {
            Some(val) => {
                self.write_u8(1);
                self.write_f64(val);
            }
            None => {
                self.write_u8(0);
                self.write_f64(0.0);
            }
        }
    }

    fn write_count(&mut self, n: usize) {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "counts saturate at u32::MAX in the recording format"
        )]
        self.write_u32(n.min(u32::MAX as usize) as u32);
    }

    fn write_phase(&mut self, phase: PhaseKind) {
        self.write_u8(match phase {
            PhaseKind::ApplyNative => 0,
            PhaseKind::Evaluate => 1,
            PhaseKind::Dispatch => 2,
        });
    }
}

impl TraceSink for RecorderSink {
    fn on_native_frame(&mut self, e: &NativeFrameEvent) {
        self.write_u8(TAG_NATIVE_FRAME);
        self.write_u64(e.frame_index);
        self.write_time(e.native_timestamp);
        self.write_time(e.local_timestamp);
        self.write_count(e.new_objects);
        self.write_count(e.removed_objects);
        self.write_count(e.objects);
        self.write_u8(u8::from(e.head_tracked));
    }

    fn on_clock_sample(&mut self, e: &ClockSampleEvent) {
        self.write_u8(TAG_CLOCK_SAMPLE);
        self.write_time(e.local);
        self.write_time(e.native);
        self.write_option_f64(e.offset);
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        self.write_u8(TAG_PHASE_BEGIN);
        self.write_u64(e.frame_index);
        self.write_phase(e.phase);
        self.write_time(e.timestamp);
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        self.write_u8(TAG_PHASE_END);
        self.write_u64(e.frame_index);
        self.write_phase(e.phase);
        self.write_time(e.timestamp);
    }

    fn on_dispatch(&mut self, e: &DispatchEvent) {
        self.write_u8(TAG_DISPATCH);
        self.write_u64(e.frame_index);
        self.write_count(e.callbacks);
        self.write_count(e.cancelled);
        self.write_u8(u8::from(e.render_state_applied));
    }

    fn on_frame_summary(&mut self, s: &FrameSummary) {
        self.write_u8(TAG_FRAME_SUMMARY);
        self.write_u64(s.frame_index);
        self.write_time(s.timestamp);
        self.write_f64(s.apply_ms);
        self.write_f64(s.evaluate_ms);
        self.write_f64(s.dispatch_ms);
        self.write_count(s.entities);
        self.write_count(s.rejected);
        self.write_count(s.callbacks);
    }

    fn on_entity_changes(&mut self, frame_index: u64, changes: &[EntityChange]) {
        self.write_u8(TAG_ENTITY_CHANGES_COUNT);
        self.write_u64(frame_index);
        self.write_count(changes.len());
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A decoded event from a binary recording.
#[derive(Clone, Debug)]
pub enum RecordedEvent {
    /// A [`NativeFrameEvent`].
    NativeFrame(NativeFrameEvent),
    /// A [`ClockSampleEvent`].
    ClockSample(ClockSampleEvent),
    /// A [`PhaseBeginEvent`].
    PhaseBegin(PhaseBeginEvent),
    /// A [`PhaseEndEvent`].
    PhaseEnd(PhaseEndEvent),
    /// A [`DispatchEvent`].
    Dispatch(DispatchEvent),
    /// A [`FrameSummary`].
    FrameSummary(FrameSummary),
    /// Entity-change count for a frame.
    EntityChangesCount {
        /// Frame counter.
        frame_index: u64,
        /// Number of entity changes.
        count: u32,
    },
}

/// Decodes a byte slice produced by [`RecorderSink`] into an iterator of
/// [`RecordedEvent`].
pub fn decode(bytes: &[u8]) -> DecodeIter<'_> {
    DecodeIter {
        data: bytes,
        pos: 0,
    }
}

/// Iterator over decoded events.
#[derive(Debug)]
pub struct DecodeIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DecodeIter<'_> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.data.get(self.pos..self.pos + N)?.try_into().ok()?;
        self.pos += N;
        Some(bytes)
    }

    fn read_u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|[v]| v)
    }

    fn read_u32(&mut self) -> Option<u32> {
        self.take().map(u32::from_le_bytes)
    }

    fn read_u64(&mut self) -> Option<u64> {
        self.take().map(u64::from_le_bytes)
    }

    fn read_f64(&mut self) -> Option<f64> {
        self.take().map(f64::from_le_bytes)
    }

    fn read_time(&mut self) -> Option<Timestamp> {
        self.read_f64().map(Timestamp)
    }

    fn read_count(&mut self) -> Option<usize> {
        self.read_u32().map(|n| n as usize)
    }

    fn read_bool(&mut self) -> Option<bool> {
        self.read_u8().map(|v| v != 0)
    }

    fn read_option_f64(&mut self) -> Option<Option<f64>> {
        let present = self.read_u8()?;
        let val = self.read_f64()?;
        Some((present != 0).then_some(val))
    }

    fn read_phase(&mut self) -> Option<PhaseKind> {
        Some(match self.read_u8()? {
            0 => PhaseKind::ApplyNative,
            1 => PhaseKind::Evaluate,
            _ => PhaseKind::Dispatch,
        })
    }

    fn decode_native_frame(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::NativeFrame(NativeFrameEvent {
            frame_index: self.read_u64()?,
            native_timestamp: self.read_time()?,
            local_timestamp: self.read_time()?,
            new_objects: self.read_count()?,
            removed_objects: self.read_count()?,
            objects: self.read_count()?,
            head_tracked: self.read_bool()?,
        }))
    }

    fn decode_clock_sample(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::ClockSample(ClockSampleEvent {
            local: self.read_time()?,
            native: self.read_time()?,
            offset: self.read_option_f64()?,
        }))
    }

    fn decode_phase_begin(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::PhaseBegin(PhaseBeginEvent {
            frame_index: self.read_u64()?,
            phase: self.read_phase()?,
            timestamp: self.read_time()?,
        }))
    }

    fn decode_phase_end(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::PhaseEnd(PhaseEndEvent {
            frame_index: self.read_u64()?,
            phase: self.read_phase()?,
            timestamp: self.read_time()?,
        }))
    }

    fn decode_dispatch(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Dispatch(DispatchEvent {
            frame_index: self.read_u64()?,
            callbacks: self.read_count()?,
            cancelled: self.read_count()?,
            render_state_applied: self.read_bool()?,
        }))
    }

    fn decode_frame_summary(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::FrameSummary(FrameSummary {
            frame_index: self.read_u64()?,
            timestamp: self.read_time()?,
            apply_ms: self.read_f64()?,
            evaluate_ms: self.read_f64()?,
            dispatch_ms: self.read_f64()?,
            entities: self.read_count()?,
            rejected: self.read_count()?,
            callbacks: self.read_count()?,
        }))
    }

    fn decode_entity_changes_count(&mut self) -> Option<RecordedEvent> {
        let frame_index = self.read_u64()?;
        let count = self.read_u32()?;
        Some(RecordedEvent::EntityChangesCount { frame_index, count })
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = RecordedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let tag = self.read_u8()?;
        match tag {
            TAG_NATIVE_FRAME => self.decode_native_frame(),
            TAG_CLOCK_SAMPLE => self.decode_clock_sample(),
            TAG_PHASE_BEGIN => self.decode_phase_begin(),
            TAG_PHASE_END => self.decode_phase_end(),
            TAG_DISPATCH => self.decode_dispatch(),
            TAG_FRAME_SUMMARY => self.decode_frame_summary(),
            TAG_ENTITY_CHANGES_COUNT => self.decode_entity_changes_count(),
            _ => None, // unknown tag → stop iteration
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use lodestone_core::trace::EntityField;

    fn sample_frame() -> NativeFrameEvent {
        NativeFrameEvent {
            frame_index: 7,
            native_timestamp: Timestamp(5.0),
            local_timestamp: Timestamp(1205.0),
            new_objects: 2,
            removed_objects: 1,
            objects: 4,
            head_tracked: true,
        }
    }

    fn sample_summary() -> FrameSummary {
        FrameSummary {
            frame_index: 7,
            timestamp: Timestamp(1205.0),
            apply_ms: 0.25,
            evaluate_ms: 0.5,
            dispatch_ms: 3.0,
            entities: 4,
            rejected: 1,
            callbacks: 2,
        }
    }

    #[test]
    fn round_trip_native_frame() {
        let mut rec = RecorderSink::new();
        let orig = sample_frame();
        rec.on_native_frame(&orig);

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert_eq!(events.len(), 1);
        match &events[0] {
            RecordedEvent::NativeFrame(e) => {
                assert_eq!(e.frame_index, orig.frame_index);
                assert_eq!(e.native_timestamp, orig.native_timestamp);
                assert_eq!(e.local_timestamp, orig.local_timestamp);
                assert_eq!(e.new_objects, 2);
                assert_eq!(e.removed_objects, 1);
                assert_eq!(e.objects, 4);
                assert!(e.head_tracked);
            }
            other => panic!("expected NativeFrame, got {other:?}"),
        }
    }

    #[test]
    fn clock_sample_keeps_missing_offset() {
        let mut rec = RecorderSink::new();
        rec.on_clock_sample(&ClockSampleEvent {
            local: Timestamp(1000.0),
            native: Timestamp(0.0),
            offset: None,
        });
        rec.on_clock_sample(&ClockSampleEvent {
            local: Timestamp(1010.0),
            native: Timestamp(10.0),
            offset: Some(1000.0),
        });

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert_eq!(events.len(), 2);
        match (&events[0], &events[1]) {
            (RecordedEvent::ClockSample(a), RecordedEvent::ClockSample(b)) => {
                assert_eq!(a.offset, None);
                assert_eq!(b.offset, Some(1000.0));
                assert_eq!(b.native, Timestamp(10.0));
            }
            other => panic!("expected two ClockSamples, got {other:?}"),
        }
    }

    #[test]
    fn round_trip_phase_events() {
        let mut rec = RecorderSink::new();
        rec.on_phase_begin(&PhaseBeginEvent {
            frame_index: 5,
            phase: PhaseKind::Dispatch,
            timestamp: Timestamp(2000.0),
        });
        rec.on_phase_end(&PhaseEndEvent {
            frame_index: 5,
            phase: PhaseKind::Dispatch,
            timestamp: Timestamp(2003.5),
        });

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert_eq!(events.len(), 2);
        match &events[0] {
            RecordedEvent::PhaseBegin(e) => {
                assert_eq!(e.frame_index, 5);
                assert_eq!(e.phase, PhaseKind::Dispatch);
                assert_eq!(e.timestamp, Timestamp(2000.0));
            }
            other => panic!("expected PhaseBegin, got {other:?}"),
        }
        match &events[1] {
            RecordedEvent::PhaseEnd(e) => {
                assert_eq!(e.phase, PhaseKind::Dispatch);
                assert_eq!(e.timestamp, Timestamp(2003.5));
            }
            other => panic!("expected PhaseEnd, got {other:?}"),
        }
    }

    #[test]
    fn round_trip_dispatch_and_summary() {
        let mut rec = RecorderSink::new();
        rec.on_dispatch(&DispatchEvent {
            frame_index: 7,
            callbacks: 3,
            cancelled: 1,
            render_state_applied: false,
        });
        rec.on_frame_summary(&sample_summary());

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert_eq!(events.len(), 2);
        match &events[0] {
            RecordedEvent::Dispatch(d) => {
                assert_eq!(d.callbacks, 3);
                assert_eq!(d.cancelled, 1);
                assert!(!d.render_state_applied);
            }
            other => panic!("expected Dispatch, got {other:?}"),
        }
        match &events[1] {
            RecordedEvent::FrameSummary(s) => {
                assert_eq!(s.frame_index, 7);
                assert_eq!(s.dispatch_ms, 3.0);
                assert_eq!(s.entities, 4);
                assert_eq!(s.rejected, 1);
                assert_eq!(s.callbacks, 2);
            }
            other => panic!("expected FrameSummary, got {other:?}"),
        }
    }

    #[test]
    fn entity_changes_count() {
        let mut rec = RecorderSink::new();
        let changes = [
            EntityChange {
                entity_index: 0,
                field: EntityField::Added,
            },
            EntityChange {
                entity_index: 3,
                field: EntityField::Pose,
            },
        ];
        rec.on_entity_changes(42, &changes);

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert_eq!(events.len(), 1);
        match &events[0] {
            RecordedEvent::EntityChangesCount { frame_index, count } => {
                assert_eq!(*frame_index, 42);
                assert_eq!(*count, 2);
            }
            other => panic!("expected EntityChangesCount, got {other:?}"),
        }
    }

    #[test]
    fn truncated_record_stops_iteration() {
        let mut rec = RecorderSink::new();
        rec.on_native_frame(&sample_frame());
        rec.on_frame_summary(&sample_summary());
        let bytes = rec.into_bytes();
        let cut = &bytes[..bytes.len() - 3];
        let events: Vec<_> = decode(cut).collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], RecordedEvent::NativeFrame(_)));
    }

    #[test]
    fn empty_buffer_decodes_to_nothing() {
        let events: Vec<_> = decode(&[]).collect();
        assert!(events.is_empty());
    }
}
