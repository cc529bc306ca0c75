// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracked entities: anchors, planes, meshes, faces, images and offsets.
//!
//! An *entity* is anything with a pose the native engine (or the consumer)
//! keeps track of. Each entity has:
//!
//! - An identity: a generational [`EntityId`] handle that becomes stale when
//!   the entity is removed, plus a [`Uid`] shared with the native engine.
//! - A transform in native world coordinates, updated in place each frame.
//! - Kind-specific geometry (mesh buffers, plane boundary, blend shapes)
//!   with per-buffer [`Changes`] flags.
//!
//! Entities are stored in struct-of-arrays layout by [`EntityStore`].
//!
//! # Lifecycle
//!
//! ```text
//!   absent ──► placeholder ──► tracked ──► removed (tombstoned)
//!      └─────────────────────────┘             │
//!                  ▲                           │
//!                  └────── new object ─────────┘  (fresh slot)
//! ```
//!
//! A placeholder stands in for an anchor a hit test referenced before the
//! engine described it. Promotion rewrites the slot in place, so handles and
//! offsets taken on the placeholder keep working.
//!
//! # Dirty tracking
//!
//! Pose changes mark the propagating **POSE** channel; offsets depend on their
//! base, so moving an anchor re-evaluates everything built on it. Geometry
//! changes mark the local-only **GEOMETRY** channel (see
//! [`dirty`](crate::dirty)).

mod evaluate;
mod geometry;
mod id;
mod store;

pub use evaluate::EntityChanges;
pub use geometry::{Changes, FaceGeometry, MeshGeometry, PlaneGeometry};
pub use id::{EntityId, EntityKind, EntityStatus, INVALID, Uid};
pub use store::{DEFAULT_EPSILON, EntityEvent, EntityEvents, EntityStore, UpdateReport};
