// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Troupe Actor Pool
//!
//! The process-local core of the Troupe runtime: typed actors scheduled by
//! an actor pool. An actor is an isolated unit of state; the runtime
//! guarantees that no two handler invocations for the same actor ever
//! overlap, across any number of workers, so actor state needs no locking.
//! Across distinct actors, handler invocations proceed concurrently up to
//! the pool's worker count.
//!
//! ## Overview
//!
//! The pool owns every actor running in the process: it registers them
//! under flat [`ActorId`]s, hands out typed [`ActorRef`]s, bounds handler
//! concurrency with worker permits, and supervises lifecycle and failure.
//! Messaging follows the two classic shapes:
//!
//! - **tell**: fire-and-forget, the envelope is enqueued and the caller
//!   moves on.
//! - **ask**: request-response, the caller suspends until the handler's
//!   return value (or failure) comes back; every ask resolves exactly once.
//!
//! Mailboxes are FIFO and per-actor. They are unbounded by default;
//! bounding one is an explicit, per-actor choice, with either blocking
//! backpressure or fail-fast `MailboxFull` on overflow; nothing is ever
//! silently dropped or overwritten.
//!
//! Location transparency (addressing these same actors from another
//! process or machine) lives in the companion `remote` crate; the
//! [`ActorAddr`]/[`PoolAddress`] value types it routes with are defined
//! here so that errors and envelopes share them.
//!
//! ## Basic usage
//!
//! ```ignore
//! use actor::{
//!     Actor, ActorContext, ActorPool, ActorRef, ActorAddr, Error, Handler,
//!     Message, PoolConfig, Response,
//! };
//! use async_trait::async_trait;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Counter {
//!     value: u64,
//! }
//!
//! #[derive(Debug, Clone)]
//! struct Inc(u64);
//!
//! impl Message for Inc {}
//!
//! #[async_trait]
//! impl Actor for Counter {
//!     type Message = Inc;
//!     type Response = u64;
//! }
//!
//! #[async_trait]
//! impl Handler<Counter> for Counter {
//!     async fn handle_message(
//!         &mut self,
//!         _sender: Option<ActorAddr>,
//!         msg: Inc,
//!         _ctx: &mut ActorContext<Self>,
//!     ) -> Result<u64, Error> {
//!         self.value += msg.0;
//!         Ok(self.value)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let token = CancellationToken::new();
//!     let (pool, mut runner) = ActorPool::create(PoolConfig::default(), token.clone());
//!     tokio::spawn(async move { runner.run().await });
//!
//!     let counter: ActorRef<Counter> =
//!         pool.create_actor("counter", Counter { value: 0 }).await?;
//!
//!     counter.tell(Inc(5)).await?;
//!     let value = counter.ask(Inc(3)).await?;
//!     assert_eq!(value, 8);
//!
//!     pool.stop_pool();
//!     Ok(())
//! }
//! ```
//!
//! ## Supervision
//!
//! Handler failures are always reported to the pool's supervisor and, for
//! asks, returned to the caller. What happens to the actor afterwards is
//! the pool's [`RestartPolicy`]: isolate-and-continue (`None`), or restart
//! with fresh state under a per-actor-type [`RetryStrategy`]. References
//! stay valid across restarts. [`PoolRef::watch`] delivers one terminal
//! [`Termination`] event per actor to anyone who needs to react to a peer
//! going away without polling.
//!

// Private modules containing the implementation
mod actor;
mod address;
mod error;
mod mailbox;
mod pool;
mod runner;
mod supervision;

//
// Core actor types
//

/// The fundamental actor trait defining actor behavior and lifecycle hooks.
pub use actor::Actor;

/// Execution context handed to lifecycle hooks and message handlers.
pub use actor::ActorContext;

/// A typed reference to an actor in the local pool, supporting `tell` and
/// `ask`.
pub use actor::ActorRef;

/// Trait for handling messages within actors.
pub use actor::Handler;

/// Marker trait implemented by all messages that can be sent to actors.
pub use actor::Message;

/// A pending `ask` reply, split from its enqueue.
pub use actor::ReplyHandle;

/// Marker trait implemented by all ask responses.
pub use actor::Response;

//
// Addressing
//

/// Location-independent, serializable reference to an actor anywhere in a
/// deployment.
pub use address::ActorAddr;

/// Identifier of an actor within one pool.
pub use address::ActorId;

/// Address of one actor pool within a deployment.
pub use address::PoolAddress;

//
// Error handling
//

/// Error type covering the whole runtime taxonomy, from serialization to
/// transport to supervision failures.
pub use error::Error;

//
// Mailboxes
//

/// Per-actor mailbox configuration: unbounded, or bounded with an explicit
/// overflow policy.
pub use mailbox::MailboxConfig;

/// Behavior of a bounded mailbox at capacity: block the sender or reject
/// with `MailboxFull`.
pub use mailbox::OverflowPolicy;

//
// Pool management
//

/// Factory for actor pools.
pub use pool::ActorPool;

/// Pool-level events consumed by the pool runner.
pub use pool::PoolEvent;

/// Configuration surface of one pool.
pub use pool::PoolConfig;

/// Cloneable reference to a pool: actor creation, lookup, destruction,
/// watching and shutdown.
pub use pool::PoolRef;

/// Drives a pool until shutdown; run it in a dedicated task.
pub use pool::PoolRunner;

/// Default worker count (one permit per available core).
pub use pool::default_worker_count;

//
// Supervision
//

/// Strategy for exponential backoff between restart attempts.
pub use supervision::ExponentialBackoffStrategy;

/// Strategy for fixed-interval restarts.
pub use supervision::FixedIntervalStrategy;

/// Strategy for immediate restarts without delays.
pub use supervision::NoIntervalStrategy;

/// What the supervisor does with a crashed actor.
pub use supervision::RestartPolicy;

/// Trait for implementing custom restart pacing.
pub use supervision::RetryStrategy;

/// Terminal event delivered to watchers when an actor stops.
pub use supervision::Termination;

/// Why an actor terminated: normal stop or failure.
pub use supervision::TerminationReason;
