// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Entity identity types.

use alloc::format;
use alloc::string::String;
use core::fmt;

use crate::native::NativeObjectKind;

/// Sentinel value indicating "no entity" in index fields.
pub const INVALID: u32 = u32::MAX;

/// A handle to an entity in an [`EntityStore`](super::EntityStore).
///
/// Contains both a slot index and a generation counter so that stale handles
/// can be detected after an entity is removed and the slot is reused.
/// Placeholder promotion keeps the slot and generation, so handles taken on a
/// placeholder stay valid.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    /// Slot index into the store's arrays.
    pub(crate) idx: u32,
    /// Generation counter; must match the store's generation for this slot.
    pub(crate) generation: u32,
}

impl EntityId {
    /// Returns the raw slot index (for diagnostics only).
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.idx
    }

    /// Returns the generation counter.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}@gen{})", self.idx, self.generation)
    }
}

/// A stable entity identifier shared with the native engine.
///
/// Native objects carry engine-assigned uuids; entities fabricated locally
/// (offsets, consumer anchors before the engine confirms them) get uids from
/// [`Uid::local`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Uid(String);

impl Uid {
    /// Wraps an engine-assigned identifier.
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    /// Builds a locally generated uid such as `offset-3`.
    #[must_use]
    pub fn local(prefix: &str, n: u64) -> Self {
        Self(format!("{prefix}-{n}"))
    }

    /// Returns the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Uid {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Uid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({})", self.0)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What an entity represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A bare anchor (also the kind of every placeholder).
    Anchor,
    /// A detected plane with mesh and boundary.
    Plane,
    /// A reconstructed mesh chunk.
    Mesh,
    /// A tracked face with blend shapes.
    Face,
    /// A detected reference image.
    Image,
    /// A fixed offset from another entity.
    Offset,
}

impl From<NativeObjectKind> for EntityKind {
    fn from(kind: NativeObjectKind) -> Self {
        match kind {
            NativeObjectKind::Anchor => Self::Anchor,
            NativeObjectKind::Plane => Self::Plane,
            NativeObjectKind::Mesh => Self::Mesh,
            NativeObjectKind::Face => Self::Face,
            NativeObjectKind::Image => Self::Image,
        }
    }
}

/// Tracking status of a live entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum EntityStatus {
    /// Fabricated locally; authoritative data has not arrived yet.
    Placeholder,
    /// Backed by native data or a confirmed request.
    #[default]
    Tracked,
}
