// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor
//!
//! The `actor` module provides the `Actor` trait and the `ActorRef` type.
//! The `Actor` trait is the main trait that actors must implement. The
//! `ActorRef` type is a typed, in-process reference to an actor that can be
//! used to send messages to it.
//!
//! An actor is an isolated unit of state: the runtime guarantees that its
//! state is only ever touched from inside its own handler invocation, one
//! message at a time, so no locking is needed around actor fields. All
//! interaction goes through messages: `tell` for fire-and-forget and `ask`
//! for request-response.
//!

use crate::{
    ActorId, Error,
    address::ActorAddr,
    mailbox::HandleHelper,
    pool::PoolRef,
    runner::StopSender,
    supervision::{NoIntervalStrategy, RetryStrategy},
};

use tokio::sync::oneshot;
use tokio::time::Duration;

use async_trait::async_trait;

use tracing::debug;

/// Actor execution context providing access to pool services and actor
/// lifecycle management.
///
/// The context is handed to every lifecycle hook and message handler. It
/// exposes the actor's own id, the owning pool (to create, look up, destroy
/// or watch other actors), self-stop, and failure escalation.
pub struct ActorContext<A: Actor + Handler<A>> {
    /// Channel sender for stopping this actor.
    stop: StopSender,
    /// Id of this actor within its pool.
    id: ActorId,
    /// Reference to the owning pool for registry operations.
    pool: PoolRef,
    /// Current error state of the actor, if any.
    error: Option<Error>,
    /// Failure escalated from the current handler invocation, if any.
    escalation: Option<Error>,
    /// Phantom data binding the context to the actor type.
    _phantom: std::marker::PhantomData<A>,
}

impl<A> ActorContext<A>
where
    A: Actor + Handler<A>,
{
    /// Creates a new actor context. Called by the runner during actor
    /// initialization.
    pub(crate) fn new(stop: StopSender, id: ActorId, pool: PoolRef) -> Self {
        Self {
            stop,
            id,
            pool,
            error: None,
            escalation: None,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Re-initializes the actor after a crash, invoking its `pre_restart`
    /// hook.
    pub(crate) async fn restart(
        &mut self,
        actor: &mut A,
        error: Option<&Error>,
    ) -> Result<(), Error> {
        actor.pre_restart(self, error).await
    }

    /// The id of this actor.
    pub fn id(&self) -> &ActorId {
        &self.id
    }

    /// The pool that owns this actor.
    ///
    /// Use it to create further actors, look up peers or watch their
    /// termination.
    pub fn pool(&self) -> &PoolRef {
        &self.pool
    }

    /// Retrieves a reference to this actor that can be handed to other
    /// actors or stored for later use.
    pub async fn reference(&self) -> Option<ActorRef<A>> {
        self.pool.get_actor(&self.id).await
    }

    /// Requests this actor to stop after the current message.
    ///
    /// The optional sender is signalled once the actor has fully stopped.
    pub async fn stop(&self, sender: Option<oneshot::Sender<()>>) {
        debug!("Stopping actor from context.");
        let _ = self.stop.send(sender).await;
    }

    /// Escalates a failure from inside a handler.
    ///
    /// The current invocation still returns its result to the caller; after
    /// it completes the runner treats the actor as crashed. The pool's
    /// restart policy applies, and without one the actor stops with a
    /// `Failed` terminal event. This is the fail-fast path; a plain handler
    /// error is isolated under `RestartPolicy::None`.
    pub fn fail(&mut self, error: Error) {
        self.escalation = Some(error);
    }

    /// Takes the escalated failure, if the handler raised one.
    pub(crate) fn take_escalation(&mut self) -> Option<Error> {
        self.escalation.take()
    }

    /// Sets the error state of the actor.
    pub(crate) fn set_error(&mut self, error: Error) {
        self.error = Some(error);
    }

    /// Returns the current error state of the actor.
    pub(crate) fn error(&self) -> Option<Error> {
        self.error.clone()
    }

    /// Cleans the error state of the actor.
    pub(crate) fn clean_error(&mut self) {
        self.error = None;
    }
}

/// Trait implemented by all messages that can be sent to actors.
///
/// Messages must be cloneable and thread-safe; whether they can also cross
/// process boundaries is decided by the remoting layer's marker traits, so
/// purely local actors can use non-serializable messages.
pub trait Message: Clone + Send + Sync + 'static {}

/// Trait implemented by all values actors return from `ask` handlers.
pub trait Response: Send + Sync + 'static {}

impl Message for () {}

// Common response shapes, so handlers returning plain values do not need
// wrapper types (the orphan rule keeps downstream crates from adding these).
impl Response for () {}
impl Response for bool {}
impl Response for u32 {}
impl Response for u64 {}
impl Response for usize {}
impl Response for i32 {}
impl Response for i64 {}
impl Response for String {}

/// The fundamental actor trait defining actor behavior and lifecycle hooks.
///
/// Implementors choose their message and response types and may override
/// the lifecycle hooks. All hooks have reasonable defaults, so a minimal
/// actor only implements [`Handler`].
#[async_trait]
pub trait Actor: Send + Sync + Sized + 'static + Handler<Self> {
    /// The message type that this actor can receive and process.
    type Message: Message;

    /// The response type returned when processing `ask` messages.
    type Response: Response;

    /// Tag identifying this actor type across processes.
    ///
    /// Used to match remote creation requests against registered factories.
    /// The default is the Rust type name; override it if the tag must stay
    /// stable across refactors.
    fn type_tag() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Pacing of restart attempts when the pool's restart policy applies.
    fn retry_strategy() -> Box<dyn RetryStrategy> {
        Box::new(NoIntervalStrategy::new(3))
    }

    /// Called before the actor starts processing messages.
    ///
    /// Returning an error fails the start; the pool's restart policy
    /// decides whether to retry.
    async fn pre_start(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Called when the actor is restarted after a crash.
    ///
    /// This is where a restarted actor resets to fresh state. The default
    /// delegates to `pre_start`.
    async fn pre_restart(
        &mut self,
        ctx: &mut ActorContext<Self>,
        _error: Option<&Error>,
    ) -> Result<(), Error> {
        self.pre_start(ctx).await
    }

    /// Called before the actor stops, while the mailbox is still open.
    async fn pre_stop(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Called after the actor has stopped processing messages.
    async fn post_stop(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }
}

/// Defines how an actor processes its messages.
#[async_trait]
pub trait Handler<A: Actor + Handler<A>>: Send + Sync {
    /// Processes one incoming message and returns the response.
    ///
    /// `sender` is the reference of the sending actor when the message came
    /// from another actor (possibly on another pool); external callers send
    /// with no sender. Returning an error fails the `ask` (the caller
    /// receives it) and is reported to the supervisor; the actor itself
    /// keeps running unless the restart policy says otherwise.
    async fn handle_message(
        &mut self,
        sender: Option<ActorAddr>,
        msg: A::Message,
        ctx: &mut ActorContext<A>,
    ) -> Result<A::Response, Error>;
}

/// A pending `ask` reply.
///
/// Produced by [`ActorRef::ask_queued`]: the message is already enqueued in
/// the target's mailbox when this handle exists, so callers can control
/// enqueue order separately from reply order. The remoting layer relies on
/// this to keep per-connection FIFO while serving replies concurrently.
pub struct ReplyHandle<A: Actor + Handler<A>> {
    receiver: oneshot::Receiver<Result<A::Response, Error>>,
    id: ActorId,
}

impl<A> ReplyHandle<A>
where
    A: Actor + Handler<A>,
{
    /// Waits for the reply. Resolves exactly once: with the handler's
    /// result, or with `ActorStopped` if the actor went away first.
    pub async fn wait(self) -> Result<A::Response, Error> {
        self.receiver
            .await
            .map_err(|_| Error::ActorStopped(self.id))?
    }
}

/// A typed reference to an actor running in the local pool.
///
/// References are cheap to clone and never own the actor. Dropping every
/// reference does not stop the actor; destruction is always explicit.
pub struct ActorRef<A>
where
    A: Actor + Handler<A>,
{
    /// Id of the target actor.
    id: ActorId,
    /// Typed mailbox handle.
    sender: HandleHelper<A>,
    /// Stop channel of the target actor.
    stop_sender: StopSender,
}

impl<A> ActorRef<A>
where
    A: Actor + Handler<A>,
{
    /// Creates a new actor reference.
    pub(crate) fn new(
        id: ActorId,
        sender: HandleHelper<A>,
        stop_sender: StopSender,
    ) -> Self {
        Self {
            id,
            sender,
            stop_sender,
        }
    }

    /// Sends a message without expecting a response.
    pub async fn tell(&self, message: A::Message) -> Result<(), Error> {
        self.sender.tell(None, message).await
    }

    /// Sends a message on behalf of a sending actor, without expecting a
    /// response. Used by the remoting layer to preserve the sender
    /// reference across pool boundaries.
    pub async fn tell_from(
        &self,
        sender: Option<ActorAddr>,
        message: A::Message,
    ) -> Result<(), Error> {
        self.sender.tell(sender, message).await
    }

    /// Sends a message and waits for the response.
    pub async fn ask(&self, message: A::Message) -> Result<A::Response, Error> {
        self.sender.ask(None, message).await
    }

    /// Sends a message on behalf of a sending actor and waits for the
    /// response.
    pub async fn ask_from(
        &self,
        sender: Option<ActorAddr>,
        message: A::Message,
    ) -> Result<A::Response, Error> {
        self.sender.ask(sender, message).await
    }

    /// Enqueues an ask and returns a handle to the pending reply.
    ///
    /// The message is in the mailbox once this returns; awaiting the reply
    /// can happen later or elsewhere.
    pub async fn ask_queued(
        &self,
        sender: Option<ActorAddr>,
        message: A::Message,
    ) -> Result<ReplyHandle<A>, Error> {
        let receiver = self.sender.ask_queued(sender, message).await?;
        Ok(ReplyHandle {
            receiver,
            id: self.id.clone(),
        })
    }

    /// Sends a message and waits for the response at most `timeout`.
    ///
    /// On expiry the caller gets `Error::Timeout`; the in-flight handler
    /// invocation on the receiver is not aborted, and its late reply is
    /// discarded.
    pub async fn ask_with_timeout(
        &self,
        message: A::Message,
        timeout: Duration,
    ) -> Result<A::Response, Error> {
        match tokio::time::timeout(timeout, self.ask(message)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Stops the actor and waits until it has fully stopped.
    pub async fn ask_stop(&self) -> Result<(), Error> {
        debug!("Stopping actor from handle reference.");
        let (response_sender, response_receiver) = oneshot::channel();

        if self.stop_sender.send(Some(response_sender)).await.is_err() {
            // Already stopping or stopped.
            Ok(())
        } else {
            response_receiver
                .await
                .map_err(|error| Error::Send(error.to_string()))
        }
    }

    /// Stops the actor without waiting for confirmation.
    pub async fn tell_stop(&self) {
        debug!("Stopping actor from handle reference.");

        let _ = self.stop_sender.send(None).await;
    }

    /// The id of the target actor.
    pub fn id(&self) -> ActorId {
        self.id.clone()
    }

    /// Checks if the actor's mailbox is closed.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl<A> Clone for ActorRef<A>
where
    A: Actor + Handler<A>,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            sender: self.sender.clone(),
            stop_sender: self.stop_sender.clone(),
        }
    }
}

impl<A> std::fmt::Debug for ActorRef<A>
where
    A: Actor + Handler<A>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRef").field("id", &self.id).finish()
    }
}
