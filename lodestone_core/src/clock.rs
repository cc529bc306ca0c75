// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Native-to-host clock synchronization.
//!
//! The native engine stamps frames on its own tracking clock. [`ClockSync`]
//! keeps a running estimate of the offset between that clock and the host's
//! monotonic clock:
//!
//! ```text
//! host_time = native_time + mean(host_sample - native_sample)
//! ```
//!
//! Every `SetTime` message from the native side contributes one sample. The
//! mean is maintained as a running sum and count, so each observation and
//! query is O(1).

use crate::time::Timestamp;

/// Running estimate of the native-to-host clock offset.
#[derive(Clone, Debug, Default)]
pub struct ClockSync {
    /// Sum of all observed `local - native` offsets, in milliseconds.
    sum: f64,
    /// Number of observations folded into `sum`.
    count: u32,
}

impl ClockSync {
    /// Creates an empty estimator.
    #[must_use]
    pub const fn new() -> Self {
        Self { sum: 0.0, count: 0 }
    }

    /// Feeds one `(local_now, native)` observation.
    ///
    /// Non-finite samples are ignored.
    pub fn observe(&mut self, local_now: Timestamp, native: Timestamp) {
        let delta = local_now - native;
        if !delta.is_finite() {
            log::warn!("ignoring non-finite clock sample {local_now:?} / {native:?}");
            return;
        }
        self.sum += delta;
        self.count = self.count.saturating_add(1);
    }

    /// Returns the mean offset, or `None` before the first sample.
    #[must_use]
    pub fn offset(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / f64::from(self.count))
    }

    /// Number of samples observed since creation or the last reset.
    #[must_use]
    pub const fn sample_count(&self) -> u32 {
        self.count
    }

    /// Maps a native timestamp onto the host timeline.
    ///
    /// Before any sample has arrived the mapping is unknown, and `local_now`
    /// is returned instead.
    #[must_use]
    pub fn to_local(&self, native: Timestamp, local_now: Timestamp) -> Timestamp {
        match self.offset() {
            Some(offset) => native + offset,
            None => local_now,
        }
    }

    /// Drops all samples.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
