// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Addressing module
//!
//! The `address` module provides the value types that name actors and pools
//! across a deployment: `ActorId` names an actor within one pool,
//! `PoolAddress` names a pool within a deployment, and `ActorAddr` combines
//! both into the location-independent reference that travels on the wire.
//!
//! None of these types hold any transport state. Resolving an `ActorAddr` to
//! a live channel is the router's job; keeping the name and the location
//! separate is what lets references stay serializable and stable across
//! reconnects.
//!

use serde::{Deserialize, Serialize};

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Identifier of an actor within one pool.
///
/// Ids form a flat namespace per pool. They are plain value types: cheap to
/// clone, comparable, hashable and serializable, so they can be used as map
/// keys on both sides of a connection.
#[derive(
    Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ActorId(String);

impl ActorId {
    /// Creates an actor id from a name.
    pub fn new(name: impl Into<String>) -> Self {
        ActorId(name.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActorId {
    fn from(name: &str) -> Self {
        ActorId(name.to_owned())
    }
}

impl From<String> for ActorId {
    fn from(name: String) -> Self {
        ActorId(name)
    }
}

impl Display for ActorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of one actor pool within a deployment.
///
/// A pool address is stable for the lifetime of the pool's process. Two
/// pools may share a host (distinct ports and process ids); the process id
/// is what distinguishes "same machine" from "same memory space" when the
/// router selects a transport.
#[derive(
    Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PoolAddress {
    /// Host name or address the pool listens on.
    pub host: String,
    /// Port of the pool's listener.
    pub port: u16,
    /// Operating system process id of the pool's process.
    pub process_id: u32,
}

impl PoolAddress {
    /// Creates a pool address for the current process.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        PoolAddress {
            host: host.into(),
            port,
            process_id: std::process::id(),
        }
    }

    /// Creates a pool address with an explicit process id.
    pub fn with_process(host: impl Into<String>, port: u16, process_id: u32) -> Self {
        PoolAddress {
            host: host.into(),
            port,
            process_id,
        }
    }

    /// True if `other` runs on the same host as this pool.
    pub fn is_same_host(&self, other: &PoolAddress) -> bool {
        self.host == other.host
    }

    /// True if `other` runs in the same process as this pool.
    pub fn is_same_process(&self, other: &PoolAddress) -> bool {
        self.is_same_host(other) && self.process_id == other.process_id
    }

    /// Path of the unix socket used for same-host links to this pool.
    ///
    /// Derived from the port so that both peers agree on it without any
    /// exchange; the listener binds it, same-host connectors dial it.
    pub fn socket_path(&self) -> PathBuf {
        std::env::temp_dir().join(format!("troupe-{}-{}.sock", self.host, self.port))
    }
}

impl Display for PoolAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}#{}", self.host, self.port, self.process_id)
    }
}

/// Location-independent reference to an actor.
///
/// An `ActorAddr` names an actor uniquely across the whole deployment: the
/// address of the pool that owns it plus its id within that pool, and a
/// type tag used to match remotely created actors to a registered factory.
/// It is compared by value and does not own the actor; any number of
/// references to the same actor may exist.
#[derive(
    Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ActorAddr {
    /// Address of the owning pool.
    pub pool: PoolAddress,
    /// Id of the actor within the pool.
    pub id: ActorId,
    /// Tag identifying the actor's type across processes.
    pub type_tag: String,
}

impl ActorAddr {
    /// Creates an actor reference.
    pub fn new(pool: PoolAddress, id: ActorId, type_tag: impl Into<String>) -> Self {
        ActorAddr {
            pool,
            id,
            type_tag: type_tag.into(),
        }
    }
}

impl Display for ActorAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.pool, self.id)
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_actor_id_display() {
        let id = ActorId::from("counter");
        assert_eq!(id.to_string(), "counter");
        assert_eq!(id.as_str(), "counter");
    }

    #[test]
    fn test_pool_address_host_and_process() {
        let a = PoolAddress::with_process("node-1", 9000, 100);
        let b = PoolAddress::with_process("node-1", 9001, 200);
        let c = PoolAddress::with_process("node-2", 9000, 100);
        assert!(a.is_same_host(&b));
        assert!(!a.is_same_process(&b));
        assert!(!a.is_same_host(&c));
        assert!(a.is_same_process(&a.clone()));
    }

    #[test]
    fn test_pool_address_display() {
        let a = PoolAddress::with_process("node-1", 9000, 42);
        assert_eq!(a.to_string(), "node-1:9000#42");
    }

    #[test]
    fn test_socket_path_is_stable() {
        let a = PoolAddress::with_process("localhost", 9000, 1);
        let b = PoolAddress::with_process("localhost", 9000, 2);
        // Same host and port, same rendezvous path, regardless of pid.
        assert_eq!(a.socket_path(), b.socket_path());
    }

    #[test]
    fn test_addr_value_semantics() {
        let pool = PoolAddress::with_process("localhost", 9000, 1);
        let x = ActorAddr::new(pool.clone(), ActorId::from("a"), "T");
        let y = ActorAddr::new(pool, ActorId::from("a"), "T");
        assert_eq!(x, y);
        assert_eq!(x.to_string(), "localhost:9000#1/a");
    }
}
