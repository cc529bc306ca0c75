// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracing and diagnostics for the native frame loop.
//!
//! This module provides a [`TraceSink`] trait with per-event methods that
//! [`Session::handle_traced`](crate::session::Session::handle_traced) calls
//! at each stage of a native frame. All method bodies default to no-ops, so
//! implementing only the events you care about is fine.
//!
//! [`Tracer`] wraps an optional `&mut dyn TraceSink`. When the `trace` feature
//! is **off**, every `Tracer` method compiles to nothing (zero overhead). When
//! **on**, each method performs a single `Option` branch before dispatching.
//!
//! [`FrameSummaryBuilder`] collects phase timestamps during a frame and
//! produces a [`FrameSummary`] at the end.
//!
//! # Crate features
//!
//! - `trace`: enables the `Tracer` method bodies (one branch per call).
//! - `trace-rich` (implies `trace`): gates [`EntityChange`] events and the
//!   corresponding `TraceSink` method.

use crate::time::Timestamp;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which phase of native frame handling is being measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    /// Applying the native object batch to the entity store.
    ApplyNative,
    /// Dirty propagation and offset recomputation.
    Evaluate,
    /// Running frame callbacks.
    Dispatch,
}

impl PhaseKind {
    /// Every phase, in frame order.
    pub const ALL: [Self; 3] = [Self::ApplyNative, Self::Evaluate, Self::Dispatch];

    /// Short name for display.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ApplyNative => "apply-native",
            Self::Evaluate => "evaluate",
            Self::Dispatch => "dispatch",
        }
    }
}

/// Which aspect of an entity changed.
#[cfg(feature = "trace-rich")]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityField {
    /// The entity started being tracked.
    Added,
    /// Pose changed (directly or through its base).
    Pose,
    /// Mesh, plane or face buffers changed.
    Geometry,
}

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Emitted when a native frame arrives, before it is applied.
#[derive(Clone, Copy, Debug)]
pub struct NativeFrameEvent {
    /// Monotonic frame counter.
    pub frame_index: u64,
    /// Engine timestamp.
    pub native_timestamp: Timestamp,
    /// Engine timestamp mapped to the local clock.
    pub local_timestamp: Timestamp,
    /// Entries in the batch's "new objects" list.
    pub new_objects: usize,
    /// Entries in the batch's "removed objects" list.
    pub removed_objects: usize,
    /// Entries in the batch's "objects" list.
    pub objects: usize,
    /// Whether the frame carries a head transform.
    pub head_tracked: bool,
}

/// Emitted for every native clock sample.
#[derive(Clone, Copy, Debug)]
pub struct ClockSampleEvent {
    /// Local time the sample arrived.
    pub local: Timestamp,
    /// Engine time in the sample.
    pub native: Timestamp,
    /// Mean offset after the sample, if any valid sample exists.
    pub offset: Option<f64>,
}

/// Marks the beginning of a frame phase.
#[derive(Clone, Copy, Debug)]
pub struct PhaseBeginEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Which phase is starting.
    pub phase: PhaseKind,
    /// Local time at the start of the phase.
    pub timestamp: Timestamp,
}

/// Marks the end of a frame phase.
#[derive(Clone, Copy, Debug)]
pub struct PhaseEndEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Which phase is ending.
    pub phase: PhaseKind,
    /// Local time at the end of the phase.
    pub timestamp: Timestamp,
}

/// Emitted after frame callbacks ran.
#[derive(Clone, Copy, Debug)]
pub struct DispatchEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Callbacks that ran.
    pub callbacks: usize,
    /// Callbacks cancelled before they ran.
    pub cancelled: usize,
    /// Whether the pending render state was applied.
    pub render_state_applied: bool,
}

/// Per-frame summary produced by [`FrameSummaryBuilder`].
#[derive(Clone, Copy, Debug)]
pub struct FrameSummary {
    /// Frame counter.
    pub frame_index: u64,
    /// Local timestamp of the frame.
    pub timestamp: Timestamp,
    /// Apply phase duration in milliseconds (0 if not measured).
    pub apply_ms: f64,
    /// Evaluate phase duration in milliseconds (0 if not measured).
    pub evaluate_ms: f64,
    /// Dispatch phase duration in milliseconds (0 if not measured).
    pub dispatch_ms: f64,
    /// Live entities after the frame.
    pub entities: usize,
    /// Native entries rejected as inconsistent.
    pub rejected: usize,
    /// Callbacks that ran.
    pub callbacks: usize,
}

/// A per-frame entity change record.
#[cfg(feature = "trace-rich")]
#[derive(Clone, Copy, Debug)]
pub struct EntityChange {
    /// Slot index of the entity that changed.
    pub entity_index: u32,
    /// What changed.
    pub field: EntityField,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives trace events from the frame loop.
///
/// All methods have default no-op implementations, so you only need to
/// override the events you care about.
pub trait TraceSink {
    /// Called when a native frame arrives.
    fn on_native_frame(&mut self, e: &NativeFrameEvent) {
        _ = e;
    }

    /// Called for every clock sample.
    fn on_clock_sample(&mut self, e: &ClockSampleEvent) {
        _ = e;
    }

    /// Called at the beginning of a frame phase.
    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        _ = e;
    }

    /// Called at the end of a frame phase.
    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        _ = e;
    }

    /// Called after frame callbacks ran.
    fn on_dispatch(&mut self, e: &DispatchEvent) {
        _ = e;
    }

    /// Called with a per-frame summary.
    fn on_frame_summary(&mut self, s: &FrameSummary) {
        _ = s;
    }

    /// Called with per-frame entity changes (requires `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    fn on_entity_changes(&mut self, frame_index: u64, changes: &[EntityChange]) {
        _ = (frame_index, changes);
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Thin wrapper around an optional [`TraceSink`].
///
/// When the `trace` feature is **off**, every method compiles to nothing. When
/// **on**, each method checks the inner `Option` (one branch) before
/// dispatching to the sink.
pub struct Tracer<'a> {
    #[cfg(feature = "trace")]
    sink: Option<&'a mut dyn TraceSink>,
    #[cfg(not(feature = "trace"))]
    _marker: core::marker::PhantomData<&'a mut dyn TraceSink>,
}

impl core::fmt::Debug for Tracer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

impl<'a> Tracer<'a> {
    /// Creates a tracer that dispatches to the given sink.
    #[inline]
    #[must_use]
    pub fn new(sink: &'a mut dyn TraceSink) -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: Some(sink) }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: None }
        }
        #[cfg(not(feature = "trace"))]
        {
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Whether events reach a sink.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        #[cfg(feature = "trace")]
        {
            self.sink.is_some()
        }
        #[cfg(not(feature = "trace"))]
        {
            false
        }
    }

    /// Emits a [`NativeFrameEvent`].
    #[inline]
    pub fn native_frame(&mut self, e: &NativeFrameEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_native_frame(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`ClockSampleEvent`].
    #[inline]
    pub fn clock_sample(&mut self, e: &ClockSampleEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_clock_sample(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`PhaseBeginEvent`].
    #[inline]
    pub fn phase_begin(&mut self, e: &PhaseBeginEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_phase_begin(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`PhaseEndEvent`].
    #[inline]
    pub fn phase_end(&mut self, e: &PhaseEndEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_phase_end(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`DispatchEvent`].
    #[inline]
    pub fn dispatch(&mut self, e: &DispatchEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_dispatch(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`FrameSummary`].
    #[inline]
    pub fn frame_summary(&mut self, s: &FrameSummary) {
        #[cfg(feature = "trace")]
        if let Some(sink) = &mut self.sink {
            sink.on_frame_summary(s);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = s;
        }
    }

    /// Emits entity changes (requires `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    #[inline]
    pub fn entity_changes(&mut self, frame_index: u64, changes: &[EntityChange]) {
        if let Some(s) = &mut self.sink {
            s.on_entity_changes(frame_index, changes);
        }
    }
}

// ---------------------------------------------------------------------------
// FrameSummaryBuilder
// ---------------------------------------------------------------------------

/// Collects phase timestamps during a frame and produces a [`FrameSummary`].
#[derive(Debug)]
pub struct FrameSummaryBuilder {
    frame: NativeFrameEvent,
    phase_starts: [Option<Timestamp>; 3],
    phase_ends: [Option<Timestamp>; 3],
    entities: usize,
    rejected: usize,
    callbacks: usize,
}

impl FrameSummaryBuilder {
    /// Starts building a summary for the given frame.
    #[must_use]
    pub fn new(frame: &NativeFrameEvent) -> Self {
        Self {
            frame: *frame,
            phase_starts: [None; 3],
            phase_ends: [None; 3],
            entities: 0,
            rejected: 0,
            callbacks: 0,
        }
    }

    /// Records the start of a phase.
    pub fn phase_begin(&mut self, phase: PhaseKind, t: Timestamp) {
        self.phase_starts[phase_index(phase)] = Some(t);
    }

    /// Records the end of a phase.
    pub fn phase_end(&mut self, phase: PhaseKind, t: Timestamp) {
        self.phase_ends[phase_index(phase)] = Some(t);
    }

    /// Sets the live entity count and the number of rejected native entries.
    pub fn set_entities(&mut self, live: usize, rejected: usize) {
        self.entities = live;
        self.rejected = rejected;
    }

    /// Sets how many callbacks ran.
    pub fn set_callbacks(&mut self, callbacks: usize) {
        self.callbacks = callbacks;
    }

    /// Consumes the builder and produces the final [`FrameSummary`].
    #[must_use]
    pub fn finish(self) -> FrameSummary {
        FrameSummary {
            frame_index: self.frame.frame_index,
            timestamp: self.frame.local_timestamp,
            apply_ms: self.phase_duration(PhaseKind::ApplyNative),
            evaluate_ms: self.phase_duration(PhaseKind::Evaluate),
            dispatch_ms: self.phase_duration(PhaseKind::Dispatch),
            entities: self.entities,
            rejected: self.rejected,
            callbacks: self.callbacks,
        }
    }

    fn phase_duration(&self, phase: PhaseKind) -> f64 {
        let idx = phase_index(phase);
        match (self.phase_starts[idx], self.phase_ends[idx]) {
            (Some(start), Some(end)) => end.millis_since(start).max(0.0),
            _ => 0.0,
        }
    }
}

/// Maps a [`PhaseKind`] to an array index.
const fn phase_index(phase: PhaseKind) -> usize {
    match phase {
        PhaseKind::ApplyNative => 0,
        PhaseKind::Evaluate => 1,
        PhaseKind::Dispatch => 2,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
