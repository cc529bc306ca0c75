// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Struct-of-arrays entity storage with allocation, native-update ingestion
//! and lifecycle events.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;

use understory_dirty::{CycleHandling, DirtyTracker, EagerPolicy};

use super::geometry::{Changes, FaceGeometry, Geometry, MeshGeometry, PlaneGeometry};
use super::id::{EntityId, EntityKind, EntityStatus, INVALID, Uid};
use crate::dirty;
use crate::error::Error;
use crate::event::Topic;
use crate::native::{NativeObject, NativeObjectKind, NativeObjects};
use crate::time::Timestamp;
use crate::transform::Transform3d;

/// Default tolerance for geometry and pose comparisons.
pub const DEFAULT_EPSILON: f64 = 1e-6;

/// Payload delivered to entity lifecycle listeners.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityEvent {
    /// The entity's handle. Stale by the time a `removed` listener returns.
    pub id: EntityId,
    /// The entity's uid.
    pub uid: Uid,
    /// The entity's kind (the new kind for `replaced`).
    pub kind: EntityKind,
    /// This frame's change flags.
    pub changes: Changes,
}

/// One topic per lifecycle event.
#[derive(Debug)]
pub struct EntityEvents {
    /// An entity started being tracked.
    pub added: Topic<EntityEvent>,
    /// An entity's pose or geometry changed. Fired once per entity per
    /// evaluation.
    pub updated: Topic<EntityEvent>,
    /// An entity is about to be evicted.
    pub removed: Topic<EntityEvent>,
    /// A placeholder was replaced in place by authoritative data.
    pub replaced: Topic<EntityEvent>,
}

impl Default for EntityEvents {
    fn default() -> Self {
        Self {
            added: Topic::new("added"),
            updated: Topic::new("updated"),
            removed: Topic::new("removed"),
            replaced: Topic::new("replaced"),
        }
    }
}

/// Outcome of one [`EntityStore::apply_update`] call.
#[derive(Clone, Debug, Default)]
pub struct UpdateReport {
    /// Entities created from "new objects".
    pub created: Vec<EntityId>,
    /// Placeholders promoted to tracked entities.
    pub promoted: Vec<EntityId>,
    /// Tombstoned uids brought back in a fresh slot.
    pub reinstated: Vec<EntityId>,
    /// Uids evicted, including cascaded offsets.
    pub removed: Vec<Uid>,
    /// Number of steady-state updates applied.
    pub updated: usize,
    /// Entries skipped because they contradicted local state.
    pub errors: Vec<Error>,
}

impl UpdateReport {
    fn reject(&mut self, uid: &Uid, reason: &'static str) {
        log::warn!("skipping native object {uid}: {reason}");
        self.errors.push(Error::InconsistentNativeData {
            uid: uid.clone(),
            reason,
        });
    }
}

/// Struct-of-arrays storage for every tracked entity.
///
/// Entities are addressed by [`EntityId`] handles. Each entity occupies a
/// slot in parallel arrays; removed entities are recycled through a free list
/// and generation counters make old handles stale. Native uids map to slots
/// through an index, and removed uids are remembered as tombstones.
///
/// Accessors that take an [`EntityId`] panic on a stale handle, like indexing
/// out of bounds. Use [`is_alive`](Self::is_alive) or
/// [`lookup`](Self::lookup) to check first.
#[derive(Debug)]
pub struct EntityStore {
    // -- Identity --
    pub(crate) uid: Vec<Uid>,
    pub(crate) kind: Vec<EntityKind>,
    pub(crate) status: Vec<EntityStatus>,

    // -- Tracked state (updated in place) --
    pub(crate) transform: Vec<Transform3d>,
    pub(crate) timestamp: Vec<Timestamp>,
    pub(crate) changes: Vec<Changes>,
    pub(crate) geometry: Vec<Geometry>,

    // -- Offsets --
    pub(crate) base: Vec<u32>,
    pub(crate) local_offset: Vec<Transform3d>,

    // -- Allocation --
    pub(crate) live: Vec<bool>,
    pub(crate) generation: Vec<u32>,
    pub(crate) free_list: Vec<u32>,
    pub(crate) len: u32,

    // -- Uid index --
    by_uid: BTreeMap<Uid, u32>,
    tombstones: BTreeSet<Uid>,
    next_local: u64,

    // -- Dirty tracking --
    pub(crate) dirty: DirtyTracker<u32>,

    // -- Lifecycle tracking --
    pub(crate) pending_added: Vec<EntityId>,
    pub(crate) pending_removed: Vec<Uid>,
    pub(crate) events: EntityEvents,

    // -- Tolerances --
    pub(crate) geometry_epsilon: f64,
    pub(crate) pose_epsilon: f64,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    /// Creates an empty store with the default tolerances.
    #[must_use]
    pub fn new() -> Self {
        Self::with_epsilons(DEFAULT_EPSILON, DEFAULT_EPSILON)
    }

    /// Creates an empty store with explicit geometry and pose tolerances.
    #[must_use]
    pub fn with_epsilons(geometry_epsilon: f64, pose_epsilon: f64) -> Self {
        Self {
            uid: Vec::new(),
            kind: Vec::new(),
            status: Vec::new(),
            transform: Vec::new(),
            timestamp: Vec::new(),
            changes: Vec::new(),
            geometry: Vec::new(),
            base: Vec::new(),
            local_offset: Vec::new(),
            live: Vec::new(),
            generation: Vec::new(),
            free_list: Vec::new(),
            len: 0,
            by_uid: BTreeMap::new(),
            tombstones: BTreeSet::new(),
            next_local: 0,
            dirty: DirtyTracker::with_cycle_handling(CycleHandling::Error),
            pending_added: Vec::new(),
            pending_removed: Vec::new(),
            events: EntityEvents::default(),
            geometry_epsilon,
            pose_epsilon,
        }
    }

    // -- Native ingestion --

    /// Applies one native batch.
    ///
    /// Runs in four phases: per-frame change flags are cleared, then "new
    /// objects" are created (or promote a placeholder, reinstate a tombstoned
    /// uid, or update an already tracked entity), then "removed objects" are
    /// evicted together with the offsets built on them, then steady-state
    /// "objects" are updated in place.
    ///
    /// Entries that contradict local state are skipped and reported in
    /// [`UpdateReport::errors`]; the rest of the batch still applies.
    pub fn apply_update(&mut self, objects: &NativeObjects, timestamp: Timestamp) -> UpdateReport {
        let mut report = UpdateReport::default();
        for changes in &mut self.changes {
            *changes = Changes::empty();
        }

        for obj in &objects.new_objects {
            self.apply_new(obj, timestamp, &mut report);
        }

        for uid in &objects.removed_objects {
            match self.by_uid.get(uid).copied() {
                Some(idx) => self.evict(idx, &mut report.removed),
                None => log::debug!("ignoring removal of untracked uid {uid}"),
            }
        }

        for obj in &objects.objects {
            match self.by_uid.get(&obj.uuid).copied() {
                Some(idx) => self.update_slot(idx, obj, timestamp, &mut report),
                None if self.tombstones.contains(&obj.uuid) => {
                    report.reject(&obj.uuid, "update for a removed uid");
                }
                None => report.reject(&obj.uuid, "update for an unknown uid"),
            }
        }

        report
    }

    fn apply_new(&mut self, obj: &NativeObject, timestamp: Timestamp, report: &mut UpdateReport) {
        if let Some(idx) = self.by_uid.get(&obj.uuid).copied() {
            self.update_slot(idx, obj, timestamp, report);
            return;
        }
        let geometry = match Geometry::from_native(obj) {
            Ok(geometry) => geometry,
            Err(reason) => {
                report.reject(&obj.uuid, reason);
                return;
            }
        };
        let reinstated = self.tombstones.remove(&obj.uuid);
        let id = self.alloc(
            obj.uuid.clone(),
            obj.kind.into(),
            EntityStatus::Tracked,
            obj.transform,
            timestamp,
            geometry,
        );
        if reinstated {
            log::debug!("reinstating {} in a fresh slot", obj.uuid);
            report.reinstated.push(id);
        } else {
            report.created.push(id);
        }
    }

    /// Updates a tracked entity in place, or promotes a placeholder.
    fn update_slot(
        &mut self,
        idx: u32,
        obj: &NativeObject,
        timestamp: Timestamp,
        report: &mut UpdateReport,
    ) {
        let i = idx as usize;
        if self.status[i] == EntityStatus::Placeholder {
            match Geometry::from_native(obj) {
                Ok(geometry) => {
                    self.promote(idx, obj, timestamp, geometry);
                    report.promoted.push(self.handle(idx));
                }
                Err(reason) => report.reject(&obj.uuid, reason),
            }
            return;
        }
        if EntityKind::from(obj.kind) != self.kind[i] {
            report.reject(&obj.uuid, "entity kind changed");
            return;
        }
        if let Err(reason) = self.geometry[i].validate(obj) {
            report.reject(&obj.uuid, reason);
            return;
        }

        if !self.transform[i].approx_eq(&obj.transform, self.pose_epsilon) {
            self.transform[i] = obj.transform;
            self.changes[i] |= Changes::POSE;
            self.dirty.mark_with(idx, dirty::POSE, &EagerPolicy);
        }
        let geometry_changes = self.geometry[i].update(obj, self.geometry_epsilon);
        if geometry_changes.changed() {
            self.changes[i] |= geometry_changes;
            self.dirty.mark(idx, dirty::GEOMETRY);
        }
        self.timestamp[i] = timestamp;
        report.updated += 1;
    }

    /// Replaces a placeholder with authoritative data, keeping its slot so
    /// every handle and offset resolves to the new entity.
    fn promote(&mut self, idx: u32, obj: &NativeObject, timestamp: Timestamp, geometry: Geometry) {
        let i = idx as usize;
        let has_geometry = geometry != Geometry::None;
        self.kind[i] = obj.kind.into();
        self.status[i] = EntityStatus::Tracked;
        self.transform[i] = obj.transform;
        self.timestamp[i] = timestamp;
        self.geometry[i] = geometry;
        self.changes[i] |= Changes::POSE;
        self.dirty.mark_with(idx, dirty::POSE, &EagerPolicy);
        if has_geometry {
            self.changes[i] |= Changes::GEOMETRY;
            self.dirty.mark(idx, dirty::GEOMETRY);
        }
        log::debug!("promoted placeholder {}", obj.uuid);
        let event = self.event(idx);
        self.events.replaced.emit(&event);
    }

    // -- Local creation --

    /// Creates a placeholder anchor for a uid the engine has referenced but
    /// not described yet.
    ///
    /// Returns the existing handle if the uid is already present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InconsistentNativeData`] if the uid was removed. Only
    /// a native "new object" brings a removed uid back.
    pub fn create_placeholder(
        &mut self,
        uid: Uid,
        transform: Transform3d,
        timestamp: Timestamp,
    ) -> Result<EntityId, Error> {
        if let Some(idx) = self.by_uid.get(&uid).copied() {
            return Ok(self.handle(idx));
        }
        check_not_removed(&self.tombstones, &uid)?;
        Ok(self.alloc(
            uid,
            EntityKind::Anchor,
            EntityStatus::Placeholder,
            transform,
            timestamp,
            Geometry::None,
        ))
    }

    /// Records an anchor the engine confirmed for a consumer request.
    ///
    /// An existing placeholder with the same uid is promoted; an existing
    /// tracked entity is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InconsistentNativeData`] if the uid was removed.
    pub fn add_anchor(
        &mut self,
        uid: Uid,
        transform: Transform3d,
        timestamp: Timestamp,
    ) -> Result<EntityId, Error> {
        if let Some(idx) = self.by_uid.get(&uid).copied() {
            if self.status[idx as usize] == EntityStatus::Placeholder {
                let obj = NativeObject::new(uid, NativeObjectKind::Anchor, transform);
                self.promote(idx, &obj, timestamp, Geometry::None);
            }
            return Ok(self.handle(idx));
        }
        check_not_removed(&self.tombstones, &uid)?;
        Ok(self.alloc(
            uid,
            EntityKind::Anchor,
            EntityStatus::Tracked,
            transform,
            timestamp,
            Geometry::None,
        ))
    }

    /// Creates an offset entity whose transform is `base * local`, kept in
    /// sync whenever `base` moves.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownEntity`] if `base` is stale.
    pub fn create_offset(&mut self, base: EntityId, local: Transform3d) -> Result<EntityId, Error> {
        if !self.is_alive(base) {
            return Err(Error::UnknownEntity);
        }
        let b = base.idx as usize;
        let uid = Uid::local("offset", self.next_local);
        self.next_local += 1;
        let id = self.alloc(
            uid,
            EntityKind::Offset,
            EntityStatus::Tracked,
            self.transform[b] * local,
            self.timestamp[b],
            Geometry::None,
        );
        self.base[id.idx as usize] = base.idx;
        self.local_offset[id.idx as usize] = local;
        let linked = self.dirty.add_dependency(id.idx, base.idx, dirty::POSE);
        debug_assert!(linked.is_ok(), "offset {} cannot depend on {}", id.idx, base.idx);
        Ok(id)
    }

    /// Removes an entity and every offset built on it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownEntity`] if the handle is stale.
    pub fn remove(&mut self, id: EntityId) -> Result<Vec<Uid>, Error> {
        if !self.is_alive(id) {
            return Err(Error::UnknownEntity);
        }
        let mut removed = Vec::new();
        self.evict(id.idx, &mut removed);
        Ok(removed)
    }

    // -- Queries --

    /// Returns the handle of the live entity with this uid.
    #[must_use]
    pub fn lookup(&self, uid: &Uid) -> Option<EntityId> {
        self.by_uid.get(uid).map(|&idx| self.handle(idx))
    }

    /// Whether `uid` was removed and has not come back.
    #[must_use]
    pub fn is_tombstoned(&self, uid: &Uid) -> bool {
        self.tombstones.contains(uid)
    }

    /// Returns whether the given handle refers to a live entity.
    #[must_use]
    pub fn is_alive(&self, id: EntityId) -> bool {
        id.idx < self.len
            && self.generation[id.idx as usize] == id.generation
            && self.live[id.idx as usize]
    }

    /// Number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.iter().filter(|&&l| l).count()
    }

    /// Whether no entity is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.live.contains(&true)
    }

    /// Iterates over the handles of all live entities in slot order.
    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        (0..self.len)
            .filter(|&idx| self.live[idx as usize])
            .map(|idx| self.handle(idx))
    }

    /// Returns the entity's kind.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn kind(&self, id: EntityId) -> EntityKind {
        self.validate(id);
        self.kind[id.idx as usize]
    }

    /// Returns the entity's uid.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn uid(&self, id: EntityId) -> &Uid {
        self.validate(id);
        &self.uid[id.idx as usize]
    }

    /// Returns the entity's pose in native world coordinates.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn transform(&self, id: EntityId) -> Transform3d {
        self.validate(id);
        self.transform[id.idx as usize]
    }

    /// Returns the native timestamp of the entity's last update.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn timestamp(&self, id: EntityId) -> Timestamp {
        self.validate(id);
        self.timestamp[id.idx as usize]
    }

    /// Returns the tracking status.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn status(&self, id: EntityId) -> EntityStatus {
        self.validate(id);
        self.status[id.idx as usize]
    }

    /// Whether the entity is still a placeholder.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn is_placeholder(&self, id: EntityId) -> bool {
        self.status(id) == EntityStatus::Placeholder
    }

    /// Returns what changed on the entity since the last native batch.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn changes(&self, id: EntityId) -> Changes {
        self.validate(id);
        self.changes[id.idx as usize]
    }

    /// Returns the base of an offset entity.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn base(&self, id: EntityId) -> Option<EntityId> {
        self.validate(id);
        let b = self.base[id.idx as usize];
        (b != INVALID).then(|| self.handle(b))
    }

    /// Returns the mesh buffers of a mesh, plane or face.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn mesh(&self, id: EntityId) -> Option<&MeshGeometry> {
        self.validate(id);
        match &self.geometry[id.idx as usize] {
            Geometry::Mesh(mesh) => Some(mesh),
            Geometry::Plane(plane) => Some(&plane.mesh),
            Geometry::Face(face) => Some(&face.mesh),
            Geometry::None | Geometry::Image(_) => None,
        }
    }

    /// Returns plane data, if the entity is a plane.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn plane(&self, id: EntityId) -> Option<&PlaneGeometry> {
        self.validate(id);
        match &self.geometry[id.idx as usize] {
            Geometry::Plane(plane) => Some(plane),
            _ => None,
        }
    }

    /// Returns face data, if the entity is a face.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn face(&self, id: EntityId) -> Option<&FaceGeometry> {
        self.validate(id);
        match &self.geometry[id.idx as usize] {
            Geometry::Face(face) => Some(face),
            _ => None,
        }
    }

    /// Returns the detection image name of an image anchor.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn image_name(&self, id: EntityId) -> Option<&str> {
        self.validate(id);
        match &self.geometry[id.idx as usize] {
            Geometry::Image(name) => name.as_deref(),
            _ => None,
        }
    }

    /// Lifecycle topics, for subscribing.
    pub fn events_mut(&mut self) -> &mut EntityEvents {
        &mut self.events
    }

    // -- Internal helpers --

    pub(crate) fn handle(&self, idx: u32) -> EntityId {
        EntityId {
            idx,
            generation: self.generation[idx as usize],
        }
    }

    pub(crate) fn event(&self, idx: u32) -> EntityEvent {
        let i = idx as usize;
        EntityEvent {
            id: self.handle(idx),
            uid: self.uid[i].clone(),
            kind: self.kind[i],
            changes: self.changes[i],
        }
    }

    /// Panics if the handle is stale.
    fn validate(&self, id: EntityId) {
        assert!(
            self.is_alive(id),
            "stale EntityId: {id:?} (current gen: {})",
            if id.idx < self.len {
                self.generation[id.idx as usize]
            } else {
                u32::MAX
            }
        );
    }

    fn alloc(
        &mut self,
        uid: Uid,
        kind: EntityKind,
        status: EntityStatus,
        transform: Transform3d,
        timestamp: Timestamp,
        geometry: Geometry,
    ) -> EntityId {
        let initial = if geometry == Geometry::None {
            Changes::POSE
        } else {
            Changes::POSE | Changes::GEOMETRY
        };
        let idx = if let Some(idx) = self.free_list.pop() {
            // Reuse a freed slot; its generation was bumped on eviction.
            let i = idx as usize;
            self.uid[i] = uid.clone();
            self.kind[i] = kind;
            self.status[i] = status;
            self.transform[i] = transform;
            self.timestamp[i] = timestamp;
            self.changes[i] = initial;
            self.geometry[i] = geometry;
            self.base[i] = INVALID;
            self.local_offset[i] = Transform3d::IDENTITY;
            self.live[i] = true;
            idx
        } else {
            let idx = self.len;
            self.len += 1;
            self.uid.push(uid.clone());
            self.kind.push(kind);
            self.status.push(status);
            self.transform.push(transform);
            self.timestamp.push(timestamp);
            self.changes.push(initial);
            self.geometry.push(geometry);
            self.base.push(INVALID);
            self.local_offset.push(Transform3d::IDENTITY);
            self.live.push(true);
            self.generation.push(0);
            idx
        };
        if kind != EntityKind::Offset {
            self.by_uid.insert(uid, idx);
        }
        let id = self.handle(idx);
        self.pending_added.push(id);
        let event = self.event(idx);
        self.events.added.emit(&event);
        id
    }

    /// Fires `removed`, cascades to dependent offsets, then frees the slot.
    fn evict(&mut self, idx: u32, removed: &mut Vec<Uid>) {
        let event = self.event(idx);
        self.events.removed.emit(&event);

        let dependents: Vec<u32> = (0..self.len)
            .filter(|&d| self.live[d as usize] && self.base[d as usize] == idx)
            .collect();
        for d in dependents {
            self.evict(d, removed);
        }

        let i = idx as usize;
        self.dirty.remove_key(idx);
        self.live[i] = false;
        self.generation[i] += 1;
        self.geometry[i] = Geometry::None;
        self.base[i] = INVALID;
        self.free_list.push(idx);

        let uid = self.uid[i].clone();
        if self.by_uid.get(&uid) == Some(&idx) {
            self.by_uid.remove(&uid);
            self.tombstones.insert(uid.clone());
        }
        log::debug!("evicted {uid}");
        self.pending_removed.push(uid.clone());
        removed.push(uid);
    }
}

fn check_not_removed(tombstones: &BTreeSet<Uid>, uid: &Uid) -> Result<(), Error> {
    if tombstones.contains(uid) {
        return Err(Error::InconsistentNativeData {
            uid: uid.clone(),
            reason: "uid was removed",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use alloc::vec;
    use core::cell::RefCell;

    use super::*;
    use crate::native::{NativeMesh, NativePlane};

    fn anchor(uid: &str, x: f64) -> NativeObject {
        NativeObject::new(
            uid,
            NativeObjectKind::Anchor,
            Transform3d::from_translation(x, 0.0, 0.0),
        )
    }

    fn batch(new: Vec<NativeObject>, removed: Vec<&str>, objects: Vec<NativeObject>) -> NativeObjects {
        NativeObjects {
            new_objects: new,
            removed_objects: removed.into_iter().map(Uid::from).collect(),
            objects,
        }
    }

    fn counter(topic: &mut Topic<EntityEvent>) -> Rc<RefCell<Vec<Uid>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        topic.subscribe(move |e: &EntityEvent| {
            s.borrow_mut().push(e.uid.clone());
            Ok(())
        });
        seen
    }

    #[test]
    fn new_object_is_created() {
        let mut store = EntityStore::new();
        let report = store.apply_update(&batch(vec![anchor("a", 1.0)], vec![], vec![]), Timestamp(1.0));
        assert_eq!(report.created.len(), 1);
        let id = store.lookup(&Uid::new("a")).unwrap();
        assert_eq!(id, report.created[0]);
        assert_eq!(store.kind(id), EntityKind::Anchor);
        assert_eq!(store.transform(id).translation().x, 1.0);
        assert!(store.changes(id).pose_changed());
    }

    #[test]
    fn new_and_removed_in_same_batch() {
        let mut store = EntityStore::new();
        let removed = counter(&mut store.events_mut().removed);
        let updated = counter(&mut store.events_mut().updated);
        let report = store.apply_update(&batch(vec![anchor("a", 0.0)], vec!["a"], vec![]), Timestamp(1.0));
        let _ = store.evaluate();
        assert!(store.lookup(&Uid::new("a")).is_none());
        assert_eq!(report.removed, vec![Uid::new("a")]);
        assert_eq!(removed.borrow().len(), 1);
        assert!(updated.borrow().is_empty());
    }

    #[test]
    fn steady_state_update_moves_in_place() {
        let mut store = EntityStore::new();
        store.apply_update(&batch(vec![anchor("a", 0.0)], vec![], vec![]), Timestamp(1.0));
        let id = store.lookup(&Uid::new("a")).unwrap();
        let _ = store.evaluate();

        let report = store.apply_update(&batch(vec![], vec![], vec![anchor("a", 2.0)]), Timestamp(2.0));
        assert_eq!(report.updated, 1);
        assert!(store.is_alive(id));
        assert_eq!(store.transform(id).translation().x, 2.0);
        assert_eq!(store.timestamp(id), Timestamp(2.0));
        let changes = store.evaluate();
        assert_eq!(changes.poses, vec![id]);
    }

    #[test]
    fn unchanged_pose_is_not_flagged() {
        let mut store = EntityStore::new();
        store.apply_update(&batch(vec![anchor("a", 0.0)], vec![], vec![]), Timestamp(1.0));
        let _ = store.evaluate();
        store.apply_update(&batch(vec![], vec![], vec![anchor("a", 1e-9)]), Timestamp(2.0));
        let id = store.lookup(&Uid::new("a")).unwrap();
        assert!(!store.changes(id).changed());
        assert!(store.evaluate().poses.is_empty());
    }

    #[test]
    fn unknown_and_tombstoned_updates_are_reported() {
        let mut store = EntityStore::new();
        store.apply_update(&batch(vec![anchor("a", 0.0)], vec!["a"], vec![]), Timestamp(1.0));
        let report = store.apply_update(
            &batch(vec![anchor("b", 0.0)], vec![], vec![anchor("a", 1.0), anchor("zzz", 1.0)]),
            Timestamp(2.0),
        );
        assert_eq!(report.errors.len(), 2);
        assert!(matches!(
            &report.errors[0],
            Error::InconsistentNativeData { uid, .. } if uid.as_str() == "a"
        ));
        // The rest of the batch still applied.
        assert!(store.lookup(&Uid::new("b")).is_some());
    }

    #[test]
    fn tombstoned_uid_reinstates_in_fresh_slot() {
        let mut store = EntityStore::new();
        store.apply_update(&batch(vec![anchor("a", 0.0)], vec![], vec![]), Timestamp(1.0));
        let old = store.lookup(&Uid::new("a")).unwrap();
        store.apply_update(&batch(vec![], vec!["a"], vec![]), Timestamp(2.0));
        assert!(store.is_tombstoned(&Uid::new("a")));

        let report = store.apply_update(&batch(vec![anchor("a", 3.0)], vec![], vec![]), Timestamp(3.0));
        assert_eq!(report.reinstated.len(), 1);
        let new = store.lookup(&Uid::new("a")).unwrap();
        assert_ne!(old, new);
        assert!(!store.is_alive(old));
        assert!(!store.is_tombstoned(&Uid::new("a")));
    }

    #[test]
    fn placeholder_promotion_keeps_handles_and_offsets() {
        let mut store = EntityStore::new();
        let replaced = counter(&mut store.events_mut().replaced);
        let p = store
            .create_placeholder(Uid::new("p1"), Transform3d::IDENTITY, Timestamp(0.0))
            .unwrap();
        let offset = store
            .create_offset(p, Transform3d::from_translation(0.0, 1.0, 0.0))
            .unwrap();
        let _ = store.evaluate();
        assert!(store.is_placeholder(p));

        let mut plane = NativeObject::new(
            "p1",
            NativeObjectKind::Plane,
            Transform3d::from_translation(5.0, 0.0, 0.0),
        );
        plane.geometry = Some(NativeMesh::default());
        plane.plane = Some(NativePlane::default());
        let report = store.apply_update(&batch(vec![plane], vec![], vec![]), Timestamp(1.0));
        assert_eq!(report.promoted, vec![p]);
        assert_eq!(replaced.borrow().len(), 1);

        let changes = store.evaluate();
        assert!(store.is_alive(p));
        assert!(!store.is_placeholder(p));
        assert_eq!(store.kind(p), EntityKind::Plane);
        assert!(store.plane(p).is_some());
        assert!(changes.poses.contains(&offset));
        let t = store.transform(offset).translation();
        assert_eq!((t.x, t.y), (5.0, 1.0));
    }

    #[test]
    fn offset_follows_base_through_evaluate() {
        let mut store = EntityStore::new();
        store.apply_update(&batch(vec![anchor("a", 0.0)], vec![], vec![]), Timestamp(1.0));
        let a = store.lookup(&Uid::new("a")).unwrap();
        let o1 = store.create_offset(a, Transform3d::from_translation(0.0, 0.0, 1.0)).unwrap();
        let o2 = store.create_offset(o1, Transform3d::from_translation(0.0, 0.0, 1.0)).unwrap();
        let _ = store.evaluate();

        store.apply_update(&batch(vec![], vec![], vec![anchor("a", 4.0)]), Timestamp(2.0));
        let changes = store.evaluate();
        assert_eq!(changes.poses, vec![a, o1, o2]);
        assert_eq!(store.transform(o2).translation().x, 4.0);
        assert_eq!(store.transform(o2).translation().z, 2.0);
        assert!(store.changes(o2).pose_changed());
        assert_eq!(store.base(o2), Some(o1));
    }

    #[test]
    fn removal_cascades_to_offsets() {
        let mut store = EntityStore::new();
        store.apply_update(&batch(vec![anchor("a", 0.0)], vec![], vec![]), Timestamp(1.0));
        let a = store.lookup(&Uid::new("a")).unwrap();
        let o = store.create_offset(a, Transform3d::IDENTITY).unwrap();
        let report = store.apply_update(&batch(vec![], vec!["a"], vec![]), Timestamp(2.0));
        assert_eq!(report.removed.len(), 2);
        assert!(!store.is_alive(o));
        assert!(store.is_empty());
        assert_eq!(store.evaluate().removed.len(), 2);
    }

    #[test]
    fn one_updated_event_per_entity() {
        let mut store = EntityStore::new();
        let mut mesh = NativeObject::new("m", NativeObjectKind::Mesh, Transform3d::IDENTITY);
        mesh.geometry = Some(NativeMesh {
            vertices: vec![0.0; 9],
            ..NativeMesh::default()
        });
        store.apply_update(&batch(vec![mesh.clone()], vec![], vec![]), Timestamp(1.0));
        let _ = store.evaluate();
        let updated = counter(&mut store.events_mut().updated);

        mesh.transform = Transform3d::from_translation(1.0, 0.0, 0.0);
        if let Some(g) = mesh.geometry.as_mut() {
            g.vertices[0] = 1.0;
        }
        store.apply_update(&batch(vec![], vec![], vec![mesh]), Timestamp(2.0));
        let changes = store.evaluate();
        assert_eq!(updated.borrow().len(), 1);
        assert_eq!(changes.geometry.len(), 1);
        let id = changes.geometry[0];
        assert!(store.changes(id).vertex_positions_changed());
        assert!(store.changes(id).pose_changed());
    }

    #[test]
    fn missing_geometry_skips_only_that_entry() {
        let mut store = EntityStore::new();
        let mesh = NativeObject::new("m", NativeObjectKind::Mesh, Transform3d::IDENTITY);
        let report = store.apply_update(&batch(vec![mesh, anchor("a", 0.0)], vec![], vec![]), Timestamp(1.0));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.created.len(), 1);
        assert!(store.lookup(&Uid::new("m")).is_none());
    }

    #[test]
    fn add_anchor_promotes_placeholder() {
        let mut store = EntityStore::new();
        let p = store
            .create_placeholder(Uid::new("x"), Transform3d::IDENTITY, Timestamp(0.0))
            .unwrap();
        let a = store
            .add_anchor(
                Uid::new("x"),
                Transform3d::from_translation(1.0, 0.0, 0.0),
                Timestamp(1.0),
            )
            .unwrap();
        assert_eq!(p, a);
        assert!(!store.is_placeholder(a));
        assert_eq!(store.transform(a).translation().x, 1.0);
    }

    #[test]
    fn removed_uid_stays_removed_for_local_creation() {
        let mut store = EntityStore::new();
        let _ = store.apply_update(&batch(vec![anchor("p", 0.0)], vec![], vec![]), Timestamp(0.0));
        let _ = store.apply_update(&batch(vec![], vec!["p"], vec![]), Timestamp(1.0));
        assert!(store.is_tombstoned(&Uid::new("p")));

        let placeholder =
            store.create_placeholder(Uid::new("p"), Transform3d::IDENTITY, Timestamp(2.0));
        assert!(matches!(
            placeholder,
            Err(Error::InconsistentNativeData { ref uid, .. }) if uid.as_str() == "p"
        ));
        assert!(
            store
                .add_anchor(Uid::new("p"), Transform3d::IDENTITY, Timestamp(2.0))
                .is_err()
        );
        assert!(store.is_tombstoned(&Uid::new("p")));
        assert!(store.lookup(&Uid::new("p")).is_none());

        let steady = batch(vec![], vec![], vec![anchor("p", 1.0)]);
        let report = store.apply_update(&steady, Timestamp(3.0));
        assert_eq!(report.errors.len(), 1);
        assert!(store.lookup(&Uid::new("p")).is_none());
    }

    #[test]
    fn remove_stale_handle_is_error() {
        let mut store = EntityStore::new();
        let a = store
            .add_anchor(Uid::new("a"), Transform3d::IDENTITY, Timestamp(0.0))
            .unwrap();
        assert_eq!(store.remove(a), Ok(vec![Uid::new("a")]));
        assert_eq!(store.remove(a), Err(Error::UnknownEntity));
        assert_eq!(store.create_offset(a, Transform3d::IDENTITY), Err(Error::UnknownEntity));
    }

    #[test]
    #[should_panic(expected = "stale EntityId")]
    fn stale_handle_panics_on_transform() {
        let mut store = EntityStore::new();
        let a = store
            .add_anchor(Uid::new("a"), Transform3d::IDENTITY, Timestamp(0.0))
            .unwrap();
        let _ = store.remove(a);
        let _ = store.transform(a);
    }
}
