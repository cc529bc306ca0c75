// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Spatial-state synchronization core for augmented-reality sessions.
//!
//! `lodestone_core` keeps an application's view of the physical world in
//! step with a native tracking engine: viewer poses, anchors, planes, meshes,
//! faces and detected images, all expressed in consumer-chosen reference
//! spaces. It is `no_std` compatible (with `alloc`), single-threaded and
//! event-driven. The engine is reached only through an injected
//! [`NativeBridge`](native::NativeBridge).
//!
//! # Architecture
//!
//! ```text
//!   native engine
//!       │ NativeEvent (SetTime / Frame / Response)
//!       ▼
//!   Session::handle()
//!       ├── ClockSync::observe()             native → local time
//!       ├── EntityStore::apply_update()      new / removed / updated objects
//!       ├── EntityStore::evaluate() ──► EntityChanges
//!       ├── RequestLayer                     RequestId → Pending<T>
//!       └── dispatch ──► FrameScope ──► viewer_pose(), entity_pose(), hit_test()
//!                                           │
//!   NativeBridge::send() ◀── NativeRequest ─┘
//! ```
//!
//! **[`session`]**: the lifecycle state machine, frame callbacks and
//! double-buffered render state.
//!
//! **[`entity`]**: struct-of-arrays store of anchors, planes, meshes, faces,
//! images and anchor offsets, with generational handles, placeholders and
//! tombstones.
//!
//! **[`dirty`]**: dirty-tracking channels via `understory_dirty`. Pose
//! changes propagate from anchors to the offsets built on them.
//!
//! **[`space`]** and **[`pose`]**: reference spaces and the viewer pose
//! expressed in them.
//!
//! **[`hit_test`]**: ray conversion, result ranking and re-expression.
//!
//! **[`request`]**: correlation ids and the [`Pending`](request::Pending)
//! future.
//!
//! **[`clock`]**: native-to-local clock offset estimation.
//!
//! **[`transform`]**, **[`quat`]**, **[`vec3`]**, **[`rigid`]**: the math.
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) trait and event types for
//! frame-loop instrumentation, with zero-overhead [`Tracer`](trace::Tracer)
//! wrapper.
//!
//! # Crate features
//!
//! - `std` (disabled by default): Enables `std` support in dependencies.
//! - `serde` (disabled by default): Deserializes the native wire types from
//!   the engine's JSON.
//! - `trace` (disabled by default): Enables `Tracer` method bodies (one branch
//!   per call site).
//! - `trace-rich` (disabled by default, implies `trace`): Gates per-entity
//!   change events.

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod clock;
pub mod dirty;
pub mod entity;
pub mod error;
pub mod event;
pub mod native;
pub mod pose;
pub mod quat;
pub mod request;
pub mod rigid;
pub mod session;
pub mod space;
pub mod time;
pub mod trace;
pub mod transform;
pub mod vec3;

pub use error::Error;
