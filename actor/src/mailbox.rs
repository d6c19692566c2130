

use crate::{
    ActorId, Error,
    actor::{Actor, ActorContext, Handler},
    address::ActorAddr,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tokio::sync::{mpsc, oneshot};

use tracing::debug;

use std::marker::PhantomData;

/// Message handler trait for processing actor messages.
/// This trait abstracts the handling of different message types,
/// allowing the runtime to process messages uniformly regardless
/// of whether they expect a response or not.
#[async_trait]
pub trait MessageHandler<A: Actor>: Send + Sync {
    /// Handles a message for the given actor.
    ///
    /// Returns the handler failure, if any, so the runner can report it to
    /// the supervisor. For `ask` messages the result has already been routed
    /// to the caller when this returns.
    async fn handle(
        &mut self,
        actor: &mut A,
        ctx: &mut ActorContext<A>,
    ) -> Option<Error>;

    /// Resolves this message with a failure without invoking the actor.
    ///
    /// Called while draining a closed mailbox so that pending `ask` callers
    /// are never left hanging.
    fn reject(&mut self, error: Error);
}

/// Internal actor message wrapper that encapsulates the message content,
/// sender information, and optional response channel for request-response
/// patterns.
struct ActorMessage<A>
where
    A: Actor + Handler<A>,
{
    /// The actual message to be processed by the actor.
    message: Option<A::Message>,
    /// The reference of the actor that sent this message, if it was sent by
    /// an actor rather than an external caller.
    sender: Option<ActorAddr>,
    /// Optional response channel for request-response (ask) pattern.
    /// If Some, the handler result is sent back through this channel.
    /// If None, this is a fire-and-forget (tell) message.
    rsvp: Option<oneshot::Sender<Result<A::Response, Error>>>,
    /// Phantom data to associate the message with actor type A at compile time.
    _phantom_actor: PhantomData<A>,
}

impl<A> ActorMessage<A>
where
    A: Actor + Handler<A>,
{
    /// Creates a new internal actor message from message content and
    /// optional response sender.
    pub fn new(
        message: A::Message,
        sender: Option<ActorAddr>,
        rsvp: Option<oneshot::Sender<Result<A::Response, Error>>>,
    ) -> Self {
        Self {
            message: Some(message),
            sender,
            rsvp,
            _phantom_actor: PhantomData,
        }
    }
}

/// Message handler implementation for internal actor message.
/// This implementation calls the actor's handle_message method and,
/// if a response channel exists, sends the result back to the caller.
#[async_trait]
impl<A> MessageHandler<A> for ActorMessage<A>
where
    A: Actor + Handler<A>,
{
    async fn handle(
        &mut self,
        actor: &mut A,
        ctx: &mut ActorContext<A>,
    ) -> Option<Error> {
        let Some(message) = self.message.take() else {
            return None;
        };
        let result = actor
            .handle_message(self.sender.clone(), message, ctx)
            .await;
        let failure = result.as_ref().err().cloned();

        if let Some(rsvp) = self.rsvp.take() {
            debug!("Sending back response (if any).");
            rsvp.send(result).unwrap_or_else(|_failed| {
                // The caller went away (dropped or timed out); a late
                // reply is discarded.
                debug!("Ask caller is gone, discarding reply.");
            })
        }
        failure
    }

    fn reject(&mut self, error: Error) {
        self.message = None;
        if let Some(rsvp) = self.rsvp.take() {
            let _ = rsvp.send(Err(error));
        }
    }
}

/// Boxed message handler for type-erased message handling.
/// This allows different message types to be stored in the same mailbox.
pub type BoxedMessageHandler<A> = Box<dyn MessageHandler<A>>;

/// Behavior of a bounded mailbox when an enqueue would exceed its capacity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// The sender suspends until space frees up (backpressure).
    #[default]
    Block,
    /// The enqueue fails immediately with `Error::MailboxFull`.
    Reject,
}

/// Per-actor mailbox configuration.
///
/// Backpressure is never implicit: an actor either has an unbounded mailbox
/// (enqueue always succeeds) or an explicit capacity with a declared
/// overflow policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxConfig {
    /// Maximum number of queued envelopes; `None` means unbounded.
    pub capacity: Option<usize>,
    /// What to do when a bounded mailbox is full.
    pub overflow: OverflowPolicy,
}

impl MailboxConfig {
    /// An unbounded mailbox.
    pub fn unbounded() -> Self {
        MailboxConfig {
            capacity: None,
            overflow: OverflowPolicy::Block,
        }
    }

    /// A bounded mailbox of the given capacity and overflow policy.
    pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        MailboxConfig {
            capacity: Some(capacity),
            overflow,
        }
    }
}

/// Sender side of an actor's mailbox.
pub(crate) enum MailboxSender<A: Actor> {
    /// Unbounded queue; enqueue never waits.
    Unbounded(mpsc::UnboundedSender<BoxedMessageHandler<A>>),
    /// Bounded queue with its overflow policy.
    Bounded(mpsc::Sender<BoxedMessageHandler<A>>, OverflowPolicy),
}

impl<A: Actor> MailboxSender<A> {
    /// Enqueues a message handler according to the mailbox configuration.
    ///
    /// `id` is only used to build precise errors.
    pub(crate) async fn enqueue(
        &self,
        id: &ActorId,
        msg: BoxedMessageHandler<A>,
    ) -> Result<(), Error> {
        match self {
            MailboxSender::Unbounded(sender) => sender
                .send(msg)
                .map_err(|_| Error::ActorStopped(id.clone())),
            MailboxSender::Bounded(sender, OverflowPolicy::Block) => sender
                .send(msg)
                .await
                .map_err(|_| Error::ActorStopped(id.clone())),
            MailboxSender::Bounded(sender, OverflowPolicy::Reject) => {
                match sender.try_send(msg) {
                    Ok(()) => Ok(()),
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        Err(Error::MailboxFull(id.clone()))
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        Err(Error::ActorStopped(id.clone()))
                    }
                }
            }
        }
    }

    /// Checks if the mailbox is closed.
    pub(crate) fn is_closed(&self) -> bool {
        match self {
            MailboxSender::Unbounded(sender) => sender.is_closed(),
            MailboxSender::Bounded(sender, _) => sender.is_closed(),
        }
    }
}

impl<A: Actor> Clone for MailboxSender<A> {
    fn clone(&self) -> Self {
        match self {
            MailboxSender::Unbounded(sender) => {
                MailboxSender::Unbounded(sender.clone())
            }
            MailboxSender::Bounded(sender, overflow) => {
                MailboxSender::Bounded(sender.clone(), *overflow)
            }
        }
    }
}

/// Receiver side of an actor's mailbox. Owned by the actor's runner;
/// dequeue order is the enqueue order (FIFO).
pub(crate) enum MailboxReceiver<A: Actor> {
    Unbounded(mpsc::UnboundedReceiver<BoxedMessageHandler<A>>),
    Bounded(mpsc::Receiver<BoxedMessageHandler<A>>),
}

impl<A: Actor> MailboxReceiver<A> {
    /// Receives the next queued message, or `None` once the mailbox is
    /// closed and empty.
    pub(crate) async fn recv(&mut self) -> Option<BoxedMessageHandler<A>> {
        match self {
            MailboxReceiver::Unbounded(receiver) => receiver.recv().await,
            MailboxReceiver::Bounded(receiver) => receiver.recv().await,
        }
    }

    /// Closes the mailbox: further enqueues fail, already queued messages
    /// remain retrievable for draining.
    pub(crate) fn close(&mut self) {
        match self {
            MailboxReceiver::Unbounded(receiver) => receiver.close(),
            MailboxReceiver::Bounded(receiver) => receiver.close(),
        }
    }

    /// Drains every still-queued message, resolving each with the given
    /// error. Pending `ask` callers receive the failure; `tell` envelopes
    /// are dropped.
    pub(crate) fn drain(&mut self, error: &Error) {
        loop {
            let next = match self {
                MailboxReceiver::Unbounded(receiver) => receiver.try_recv(),
                MailboxReceiver::Bounded(receiver) => receiver.try_recv(),
            };
            match next {
                Ok(mut msg) => msg.reject(error.clone()),
                Err(_) => break,
            }
        }
    }
}

/// Creates a new mailbox for an actor according to its configuration.
pub(crate) fn mailbox<A: Actor>(
    config: &MailboxConfig,
) -> (MailboxSender<A>, MailboxReceiver<A>) {
    match config.capacity {
        None => {
            let (sender, receiver) = mpsc::unbounded_channel();
            (
                MailboxSender::Unbounded(sender),
                MailboxReceiver::Unbounded(receiver),
            )
        }
        Some(capacity) => {
            let (sender, receiver) = mpsc::channel(capacity.max(1));
            (
                MailboxSender::Bounded(sender, config.overflow),
                MailboxReceiver::Bounded(receiver),
            )
        }
    }
}

/// Handle helper for sending messages to an actor.
/// This is an internal abstraction that wraps the mailbox sender
/// and provides typed message sending methods (tell and ask).
pub struct HandleHelper<A: Actor> {
    /// The underlying mailbox sender for this actor.
    sender: MailboxSender<A>,
    /// Id of the target actor, for error reporting.
    id: ActorId,
}

impl<A> HandleHelper<A>
where
    A: Actor + Handler<A>,
{
    /// Creates a new handle helper from a mailbox sender.
    pub(crate) fn new(sender: MailboxSender<A>, id: ActorId) -> Self {
        debug!("Creating new handle reference.");
        Self { sender, id }
    }

    /// Sends a message to the actor without expecting a response
    /// (fire-and-forget). This is the "tell" pattern in actor terminology.
    pub(crate) async fn tell(
        &self,
        sender: Option<ActorAddr>,
        message: A::Message,
    ) -> Result<(), Error> {
        debug!("Telling message to actor from handle reference.");
        let msg = ActorMessage::new(message, sender, None);
        self.sender.enqueue(&self.id, Box::new(msg)).await
    }

    /// Enqueues an ask message and returns the pending reply without
    /// awaiting it. Enqueue order is therefore the caller's send order even
    /// when several asks are issued back to back.
    pub(crate) async fn ask_queued(
        &self,
        sender: Option<ActorAddr>,
        message: A::Message,
    ) -> Result<oneshot::Receiver<Result<A::Response, Error>>, Error> {
        debug!("Asking message to actor from handle reference.");
        let (response_sender, response_receiver) = oneshot::channel();
        let msg = ActorMessage::new(message, sender, Some(response_sender));
        self.sender.enqueue(&self.id, Box::new(msg)).await?;
        Ok(response_receiver)
    }

    /// Sends a message to the actor and waits for a response
    /// (request-response). This is the "ask" pattern in actor terminology.
    pub(crate) async fn ask(
        &self,
        sender: Option<ActorAddr>,
        message: A::Message,
    ) -> Result<A::Response, Error> {
        let receiver = self.ask_queued(sender, message).await?;
        receiver
            .await
            .map_err(|_| Error::ActorStopped(self.id.clone()))?
    }

    /// Checks if the mailbox is closed.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl<A: Actor> Clone for HandleHelper<A> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            id: self.id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_mailbox_config() {
        let unbounded = MailboxConfig::unbounded();
        assert_eq!(unbounded.capacity, None);
        let bounded = MailboxConfig::bounded(8, OverflowPolicy::Reject);
        assert_eq!(bounded.capacity, Some(8));
        assert_eq!(bounded.overflow, OverflowPolicy::Reject);
        assert_eq!(MailboxConfig::default().capacity, None);
    }
}
