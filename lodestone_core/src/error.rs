// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types.

use alloc::string::String;

use crate::entity::Uid;
use crate::space::ReferenceSpaceType;

/// Errors reported by sessions, spaces and the entity store.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The native handshake has not completed yet.
    #[error("session is not initialized")]
    NotInitialized,
    /// The reference-space type is not supported by this implementation.
    #[error("reference space `{0}` is not supported")]
    UnsupportedSpace(ReferenceSpaceType),
    /// The reference-space type is supported but the native engine cannot
    /// provide it right now.
    #[error("reference space `{0}` is not available")]
    SpaceNotAvailable(ReferenceSpaceType),
    /// The native engine did not advertise the named capability.
    #[error("feature `{0}` is not supported")]
    UnsupportedFeature(&'static str),
    /// A native payload contradicts the local state.
    #[error("inconsistent native data for `{uid}`: {reason}")]
    InconsistentNativeData {
        /// The offending entity.
        uid: Uid,
        /// What was wrong.
        reason: &'static str,
    },
    /// A computation hit a singular matrix or a non-finite value.
    #[error("numeric degenerate: {0}")]
    NumericDegenerate(&'static str),
    /// The caller used the API out of order.
    #[error("protocol misuse: {0}")]
    ProtocolMisuse(&'static str),
    /// The session has ended.
    #[error("session has ended")]
    SessionEnded,
    /// The handle or uid does not name a live entity.
    #[error("unknown entity")]
    UnknownEntity,
    /// The native engine reported a failure.
    #[error("native error: {0}")]
    Native(String),
    /// A wire string did not name a reference-space type.
    #[error("unknown reference space type `{0}`")]
    UnknownSpaceType(String),
}

/// A failure raised by an event listener.
///
/// Listener failures are logged and never interrupt delivery to the other
/// listeners of the same topic.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("listener failed: {0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    /// Creates an error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
