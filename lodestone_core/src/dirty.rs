// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dirty-tracking channel constants for the entity store.
//!
//! Entity changes are tracked per channel with [`understory_dirty`]:
//!
//! - **Propagating**: [`POSE`] is marked with
//!   [`EagerPolicy`](understory_dirty::EagerPolicy) and anchor offsets carry a
//!   dependency edge to their base entity. When a base anchor moves, every
//!   offset built on it (transitively) is marked too, so evaluation
//!   recomputes `base * local` for exactly the affected offsets, bases first.
//!
//! - **Local-only**: [`GEOMETRY`] is marked with the default policy. Mesh and
//!   plane buffers belong to a single entity and never propagate.
//!
//! Callers never query dirty state directly.
//! [`EntityStore::evaluate`](crate::entity::EntityStore::evaluate) drains both
//! channels and reports the result as
//! [`EntityChanges`](crate::entity::EntityChanges).

use understory_dirty::Channel;

/// Entity transform changed; propagates to dependent offsets.
pub const POSE: Channel = Channel::new(0);

/// Mesh, plane or face buffers changed; no propagation.
pub const GEOMETRY: Channel = Channel::new(1);
