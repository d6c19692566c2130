// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor execution engine
//!
//! The `runner` module provides the `ActorRunner`, the per-actor execution
//! engine. Each actor is driven by exactly one runner task that owns its
//! state and drains its mailbox one envelope at a time. This is what makes
//! per-actor exclusivity structural: the runner is the actor's single
//! scheduling slot, so the actor can never be dispatched twice concurrently
//! and its state needs no locks.
//!
//! Across actors, runners execute in parallel; the number of handler
//! invocations in flight at once is bounded by the pool's worker permits.
//!
//! The runner also implements the lifecycle state machine
//! (Created → Started → … → Terminated) including restart handling: when a
//! crash occurs and the pool's restart policy applies, the actor is
//! re-initialized through its `pre_restart` hook while the mailbox, and
//! therefore every outstanding reference, survives.
//!

use crate::{
    ActorId, Error,
    actor::{Actor, ActorContext, ActorRef, Handler},
    mailbox::{HandleHelper, MailboxConfig, MailboxReceiver, mailbox},
    pool::PoolRef,
    supervision::{RestartPolicy, RetryStrategy, TerminationReason},
};

use tokio::{
    select,
    sync::{mpsc, oneshot},
};
use tracing::{debug, error, warn};

/// Channel receiver for actor stop signals.
///
/// Each message optionally carries a oneshot sender that is signalled once
/// the actor has fully terminated (mailbox drained, registry entry gone).
pub type StopReceiver = mpsc::Receiver<Option<oneshot::Sender<()>>>;

/// Channel sender for actor stop signals.
pub type StopSender = mpsc::Sender<Option<oneshot::Sender<()>>>;

/// Lifecycle states of an actor.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ActorLifecycle {
    /// The actor has been created but not yet started.
    Created,
    /// The actor is actively processing messages.
    Started,
    /// The actor crashed and is being restarted under the restart policy.
    Restarted,
    /// The actor encountered a failure and awaits a policy decision.
    Failed,
    /// The actor is shutting down.
    Stopped,
    /// Final state: the actor is removed from the pool.
    Terminated,
}

/// Core execution engine for one actor.
///
/// Owns the actor instance, its mailbox receiver and its stop channel.
/// Created by the pool together with the actor's reference; runs as a
/// dedicated task until termination.
pub(crate) struct ActorRunner<A: Actor + Handler<A>> {
    /// Id of this actor within the pool.
    id: ActorId,
    /// The actor instance being executed.
    actor: A,
    /// Current lifecycle state.
    lifecycle: ActorLifecycle,
    /// Message receiver from the actor's mailbox.
    receiver: MailboxReceiver<A>,
    /// Receiver for stop signals.
    stop_receiver: StopReceiver,
    /// Confirmations to deliver once the actor has fully terminated.
    pending_stop: Vec<oneshot::Sender<()>>,
}

impl<A> ActorRunner<A>
where
    A: Actor + Handler<A>,
{
    /// Creates a new actor runner, the actor's reference and its stop
    /// sender.
    pub(crate) fn create(
        id: ActorId,
        actor: A,
        mailbox_config: &MailboxConfig,
    ) -> (Self, ActorRef<A>, StopSender) {
        debug!("Creating new actor runner.");
        let (sender, receiver) = mailbox(mailbox_config);
        let (stop_sender, stop_receiver) = mpsc::channel(100);
        let helper = HandleHelper::new(sender, id.clone());

        let actor_ref = ActorRef::new(id.clone(), helper, stop_sender.clone());
        let runner = ActorRunner {
            id,
            actor,
            lifecycle: ActorLifecycle::Created,
            receiver,
            stop_receiver,
            pending_stop: Vec::new(),
        };
        (runner, actor_ref, stop_sender)
    }

    /// Drives the actor through its whole lifecycle, from `pre_start` to
    /// termination.
    ///
    /// The optional `ready` sender is signalled with `true` once the actor
    /// starts processing messages, or `false` if it terminates without ever
    /// starting (failed `pre_start` with no applicable restart).
    pub(crate) async fn init(
        &mut self,
        pool: PoolRef,
        stop_sender: StopSender,
        mut ready: Option<oneshot::Sender<bool>>,
    ) {
        debug!("Initializing actor '{}' runner.", &self.id);

        let mut ctx: ActorContext<A> =
            ActorContext::new(stop_sender, self.id.clone(), pool.clone());

        let mut retries = 0;
        let mut strategy = A::retry_strategy();
        let mut has_started = false;

        loop {
            match self.lifecycle {
                // State: CREATED
                ActorLifecycle::Created => {
                    debug!("Actor '{}' is created.", &self.id);
                    match self.actor.pre_start(&mut ctx).await {
                        Ok(_) => {
                            debug!(
                                "Actor '{}' has started successfully.",
                                &self.id
                            );
                            self.lifecycle = ActorLifecycle::Started;
                        }
                        Err(err) => {
                            error!(
                                "Actor '{}' failed to start: {:?}",
                                &self.id, err
                            );
                            ctx.set_error(err);
                            self.lifecycle = ActorLifecycle::Failed;
                        }
                    }
                }
                // State: STARTED
                ActorLifecycle::Started => {
                    debug!("Actor '{}' is started.", &self.id);
                    has_started = true;
                    if let Some(ready) = ready.take() {
                        ready.send(true).unwrap_or_else(|_| {
                            error!("Failed to send ready signal.");
                        });
                    }
                    self.run(&mut ctx, &pool).await;
                    if ctx.error().is_some() {
                        self.lifecycle = ActorLifecycle::Failed;
                    }
                }
                // State: RESTARTED
                ActorLifecycle::Restarted => {
                    self.apply_retry_strategy(
                        &mut *strategy,
                        &mut ctx,
                        &mut retries,
                    )
                    .await;
                }
                // State: FAILED
                ActorLifecycle::Failed => {
                    debug!("Actor '{}' is faulty.", &self.id);
                    let restart = match pool.config().restart_policy {
                        RestartPolicy::Always => true,
                        RestartPolicy::OnFailureOnly => has_started,
                        RestartPolicy::None => false,
                    };
                    if restart {
                        self.lifecycle = ActorLifecycle::Restarted;
                    } else {
                        self.lifecycle = ActorLifecycle::Stopped;
                    }
                }
                // State: STOPPED
                ActorLifecycle::Stopped => {
                    debug!("Actor '{}' is stopped.", &self.id);
                    if self.actor.post_stop(&mut ctx).await.is_err() {
                        error!("Actor '{}' failed to stop!", &self.id);
                    }
                    self.lifecycle = ActorLifecycle::Terminated;
                }
                // State: TERMINATED
                ActorLifecycle::Terminated => {
                    debug!("Actor '{}' is terminated.", &self.id);
                    let reason = match ctx.error() {
                        Some(err) => TerminationReason::Failed(err),
                        None => TerminationReason::Stopped,
                    };
                    // Close first so no new envelope can slip in, then
                    // resolve everything still queued.
                    self.receiver.close();
                    self.receiver
                        .drain(&Error::ActorStopped(self.id.clone()));
                    pool.finish_actor(&self.id, reason).await;
                    for confirm in self.pending_stop.drain(..) {
                        let _ = confirm.send(());
                    }
                    if let Some(ready) = ready.take() {
                        ready.send(false).unwrap_or_else(|_| {
                            error!("Failed to send ready signal.");
                        });
                    }
                    break;
                }
            }
        }
    }

    /// Main message loop: waits on the stop channel and the mailbox,
    /// dispatching one envelope at a time under a pool worker permit.
    ///
    /// The select is biased towards the stop channel so that a destroy
    /// request stops further dispatch even when the mailbox is never empty.
    async fn run(&mut self, ctx: &mut ActorContext<A>, pool: &PoolRef) {
        debug!("Running actor '{}'.", &self.id);

        loop {
            select! {
                biased;
                stop = self.stop_receiver.recv() => {
                    debug!("Stopping actor '{}'.", &self.id);
                    if self.actor.pre_stop(ctx).await.is_err() {
                        error!("Actor '{}' pre_stop failed!", &self.id);
                    }
                    if let Some(Some(confirm)) = stop {
                        self.pending_stop.push(confirm);
                    }
                    if let ActorLifecycle::Started = self.lifecycle {
                        self.lifecycle = ActorLifecycle::Stopped;
                    }
                    break;
                }
                msg = self.receiver.recv() => {
                    let Some(mut msg) = msg else {
                        // Mailbox closed under us; shut down.
                        self.lifecycle = ActorLifecycle::Stopped;
                        break;
                    };
                    let permit = match pool.acquire_worker().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            self.lifecycle = ActorLifecycle::Stopped;
                            break;
                        }
                    };
                    let failure = msg.handle(&mut self.actor, ctx).await;
                    drop(permit);

                    let escalation = ctx.take_escalation();
                    if let Some(err) = failure.as_ref().or(escalation.as_ref()) {
                        // The supervisor always hears about handler
                        // failures; the caller already has the error if
                        // this was an ask.
                        warn!(
                            "Actor '{}' handler failed: {}",
                            &self.id, err
                        );
                    }
                    // An escalation is always fatal to the invocation
                    // loop; an ordinary handler error only when the
                    // policy restarts crashed actors.
                    let restarts = pool.config().restart_policy
                        != RestartPolicy::None;
                    let fatal = escalation
                        .or_else(|| failure.filter(|_| restarts));
                    if let Some(err) = fatal {
                        ctx.set_error(err);
                        break;
                    }
                }
            }
        }
    }

    /// Applies the actor's retry strategy after a crash: backs off, calls
    /// `pre_restart` and either resumes the actor or gives up once the
    /// retry budget is exhausted.
    async fn apply_retry_strategy(
        &mut self,
        strategy: &mut dyn RetryStrategy,
        ctx: &mut ActorContext<A>,
        retries: &mut usize,
    ) {
        if *retries < strategy.max_retries() {
            debug!(
                "Restarting actor '{}', retry {} of {}.",
                &self.id,
                retries,
                strategy.max_retries()
            );
            if let Some(duration) = strategy.next_backoff() {
                debug!("Backoff for {:?}", &duration);
                tokio::time::sleep(duration).await;
            }
            *retries += 1;
            let error = ctx.error();
            match ctx.restart(&mut self.actor, error.as_ref()).await {
                Ok(_) => {
                    ctx.clean_error();
                    self.lifecycle = ActorLifecycle::Started;
                    *retries = 0;
                }
                Err(err) => {
                    ctx.set_error(err);
                }
            }
        } else {
            error!(
                "Actor '{}' exhausted its restart budget.",
                &self.id
            );
            self.lifecycle = ActorLifecycle::Stopped;
        }
    }
}
