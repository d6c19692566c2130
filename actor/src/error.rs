// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Errors module
//!

use crate::address::{ActorId, PoolAddress};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for the actor runtime.
///
/// Every failure the runtime can surface to a caller is a variant here. The
/// type is serializable so that errors raised on a remote pool travel back
/// over the wire unchanged.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// A payload could not be encoded or decoded. Carries the offending
    /// payload type name.
    #[error("payload of type '{0}' could not be serialized or deserialized")]
    Serialization(String),
    /// The transport channel to a peer pool broke while operations were
    /// pending on it.
    #[error("channel to peer pool closed")]
    ChannelClosed,
    /// The peer pool could not be reached when (re)establishing a channel.
    #[error("pool {0} is unreachable")]
    PoolUnreachable(PoolAddress),
    /// The pool address is not part of this deployment's address table.
    #[error("pool {0} is not known to this deployment")]
    UnknownPool(PoolAddress),
    /// The target pool reported that no actor with this id exists.
    #[error("actor '{0}' not found")]
    ActorNotFound(ActorId),
    /// A bounded mailbox rejected an enqueue beyond its capacity.
    #[error("mailbox of actor '{0}' is full")]
    MailboxFull(ActorId),
    /// The target actor has been destroyed; its mailbox accepts no more
    /// envelopes and queued ones were drained.
    #[error("actor '{0}' is stopped")]
    ActorStopped(ActorId),
    /// A caller-supplied wait on an `ask` expired.
    #[error("ask timed out waiting for a reply")]
    Timeout,
    /// The actor's message handler raised.
    #[error("handler failed: {0}")]
    Handler(String),
    /// The two peers of a connection disagree on the serializer version.
    #[error("serializer version mismatch: ours {ours}, theirs {theirs}")]
    ProtocolMismatch {
        /// Our serializer version.
        ours: u16,
        /// The peer's serializer version.
        theirs: u16,
    },
    /// An actor with the same id already exists in the pool.
    #[error("actor '{0}' already exists")]
    Exists(ActorId),
    /// An actor failed to start.
    #[error("actor failed to start: {0}")]
    Start(String),
    /// An error occurred while stopping an actor.
    #[error("an error occurred while stopping an actor")]
    Stop,
    /// An error occurred while sending a message to an actor.
    #[error("message could not be sent: {0}")]
    Send(String),
    /// Error that does not compromise the operation of the runtime.
    #[error("error: {0}")]
    Functional(String),
}
