// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Frame evaluation and change reporting.
//!
//! Evaluation drains each dirty channel once per frame:
//!
//! 1. **POSE**: drain affected indices in base-before-offset order and
//!    recompute every offset transform as `base * local_offset`.
//! 2. **GEOMETRY**: drain marked indices (no recomputation; buffers were
//!    already diffed when the native batch was applied).
//!
//! Each entity touched by either channel then receives exactly one
//! `updated` event. Entities created since the last evaluation are reported
//! in [`EntityChanges::added`] instead.

use alloc::vec::Vec;

use super::geometry::Changes;
use super::id::{EntityId, INVALID, Uid};
use super::store::EntityStore;
use crate::dirty;

/// The set of changes produced by a single [`EntityStore::evaluate`] call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntityChanges {
    /// Entities whose transform changed, bases before their offsets.
    pub poses: Vec<EntityId>,
    /// Entities whose geometry buffers changed.
    pub geometry: Vec<EntityId>,
    /// Entities created since the last evaluation and still alive.
    pub added: Vec<EntityId>,
    /// Uids evicted since the last evaluation.
    pub removed: Vec<Uid>,
}

impl EntityChanges {
    /// Clears all change lists.
    pub fn clear(&mut self) {
        self.poses.clear();
        self.geometry.clear();
        self.added.clear();
        self.removed.clear();
    }

    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
            && self.geometry.is_empty()
            && self.added.is_empty()
            && self.removed.is_empty()
    }
}

impl EntityStore {
    /// Evaluates pending changes, recomputing offset transforms, and returns
    /// what changed.
    pub fn evaluate(&mut self) -> EntityChanges {
        let mut changes = EntityChanges::default();
        self.evaluate_into(&mut changes);
        changes
    }

    /// Like [`evaluate`](Self::evaluate), but reuses a caller-provided buffer.
    pub fn evaluate_into(&mut self, changes: &mut EntityChanges) {
        changes.clear();

        let dirty_poses: Vec<u32> = self
            .dirty
            .drain(dirty::POSE)
            .affected()
            .deterministic()
            .run()
            .collect();
        for idx in dirty_poses {
            if !self.is_live_slot(idx) {
                continue;
            }
            let i = idx as usize;
            let base = self.base[i];
            if base != INVALID && self.is_live_slot(base) {
                self.transform[i] = self.transform[base as usize] * self.local_offset[i];
                self.timestamp[i] = self.timestamp[base as usize];
                self.changes[i] |= Changes::POSE;
            }
            changes.poses.push(self.handle(idx));
        }

        let dirty_geometry: Vec<u32> = self
            .dirty
            .drain(dirty::GEOMETRY)
            .deterministic()
            .run()
            .collect();
        for idx in dirty_geometry {
            if self.is_live_slot(idx) {
                changes.geometry.push(self.handle(idx));
            }
        }

        for id in self.pending_added.drain(..) {
            let alive = id.idx < self.len
                && self.live[id.idx as usize]
                && self.generation[id.idx as usize] == id.generation;
            if alive {
                changes.added.push(id);
            }
        }
        core::mem::swap(&mut self.pending_removed, &mut changes.removed);

        let mut touched: Vec<EntityId> = changes
            .poses
            .iter()
            .chain(&changes.geometry)
            .filter(|id| !changes.added.contains(id))
            .copied()
            .collect();
        touched.sort_unstable();
        touched.dedup();
        for id in touched {
            let event = self.event(id.idx);
            self.events.updated.emit(&event);
        }
    }

    fn is_live_slot(&self, idx: u32) -> bool {
        idx < self.len && self.live[idx as usize]
    }
}
