// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per event
//! to a [`Write`](std::io::Write) destination (default: stderr). Timestamps
//! are local milliseconds.

use std::io::Write;

use lodestone_core::trace::{
    ClockSampleEvent, DispatchEvent, EntityChange, FrameSummary, NativeFrameEvent,
    PhaseBeginEvent, PhaseEndEvent, TraceSink,
};

/// Writes human-readable trace lines to a [`Write`](std::io::Write) destination.
pub struct PrettyPrintSink<W: Write = Box<dyn Write>> {
    writer: W,
}

impl<W: Write> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink").finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self {
            writer: Box::new(std::io::stderr()),
        }
    }

    /// Creates a sink that writes to a boxed writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write>) -> Self {
        Self { writer }
    }
}

impl<W: Write> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W) -> Self {
        Self { writer }
    }

    /// Consumes the sink and returns the destination.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> TraceSink for PrettyPrintSink<W> {
    fn on_native_frame(&mut self, e: &NativeFrameEvent) {
        let head = if e.head_tracked { "tracked" } else { "lost" };
        let _ = writeln!(
            self.writer,
            "[frame] #{} native={:.3}ms local={:.3}ms +{} -{} objects={} head={head}",
            e.frame_index,
            e.native_timestamp.millis(),
            e.local_timestamp.millis(),
            e.new_objects,
            e.removed_objects,
            e.objects,
        );
    }

    fn on_clock_sample(&mut self, e: &ClockSampleEvent) {
        let offset = match e.offset {
            Some(ms) => format!("{ms:.3}ms"),
            None => "?".into(),
        };
        let _ = writeln!(
            self.writer,
            "[clock] local={:.3}ms native={:.3}ms offset={offset}",
            e.local.millis(),
            e.native.millis(),
        );
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        let _ = writeln!(
            self.writer,
            "[phase:begin] frame={} {} at {:.3}ms",
            e.frame_index,
            e.phase.as_str(),
            e.timestamp.millis(),
        );
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        let _ = writeln!(
            self.writer,
            "[phase:end] frame={} {} at {:.3}ms",
            e.frame_index,
            e.phase.as_str(),
            e.timestamp.millis(),
        );
    }

    fn on_dispatch(&mut self, e: &DispatchEvent) {
        let render = if e.render_state_applied {
            " render-state"
        } else {
            ""
        };
        let _ = writeln!(
            self.writer,
            "[dispatch] frame={} callbacks={} cancelled={}{render}",
            e.frame_index, e.callbacks, e.cancelled,
        );
    }

    fn on_frame_summary(&mut self, s: &FrameSummary) {
        let _ = writeln!(
            self.writer,
            "[summary] frame={} apply={:.3}ms eval={:.3}ms dispatch={:.3}ms \
             entities={} rejected={} callbacks={}",
            s.frame_index,
            s.apply_ms,
            s.evaluate_ms,
            s.dispatch_ms,
            s.entities,
            s.rejected,
            s.callbacks,
        );
    }

    fn on_entity_changes(&mut self, frame_index: u64, changes: &[EntityChange]) {
        let _ = writeln!(
            self.writer,
            "[entities] frame={frame_index} changes={}",
            changes.len(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestone_core::time::Timestamp;

    #[test]
    fn pretty_print_frame() {
        let mut sink = PrettyPrintSink::with_writer(Vec::<u8>::new());
        sink.on_native_frame(&NativeFrameEvent {
            frame_index: 1,
            native_timestamp: Timestamp(5.0),
            local_timestamp: Timestamp(1005.0),
            new_objects: 2,
            removed_objects: 0,
            objects: 2,
            head_tracked: false,
        });
        let output = String::from_utf8(sink.into_inner()).unwrap();
        assert!(output.contains("[frame] #1"), "got: {output}");
        assert!(output.contains("+2 -0"), "got: {output}");
        assert!(output.contains("head=lost"), "got: {output}");
    }

    #[test]
    fn pretty_print_unknown_offset() {
        let mut sink = PrettyPrintSink::with_writer(Vec::<u8>::new());
        sink.on_clock_sample(&ClockSampleEvent {
            local: Timestamp(1000.0),
            native: Timestamp(0.0),
            offset: None,
        });
        let output = String::from_utf8(sink.into_inner()).unwrap();
        assert!(output.contains("offset=?"), "got: {output}");
    }
}
