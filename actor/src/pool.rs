// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor pool
//!
//! The `pool` module provides the `ActorPool` type: the process-local
//! scheduler that owns a set of actors. The pool keeps the actor registry,
//! bounds concurrent handler invocations with a worker permit set, governs
//! creation and destruction, and publishes terminal events to watchers.
//!
//! A pool is created with [`ActorPool::create`], which returns a cloneable
//! [`PoolRef`] and a [`PoolRunner`] to drive in a task. Shutdown is driven
//! by the cancellation token: every actor is stopped and awaited, then the
//! runner exits. Pools are explicit values, never process-wide singletons,
//! so tests can run several of them side by side.
//!

use crate::{
    ActorId, Error,
    actor::{Actor, ActorRef, Handler},
    mailbox::MailboxConfig,
    runner::{ActorRunner, StopSender},
    supervision::{RestartPolicy, Termination, TerminationReason},
};

use serde::{Deserialize, Serialize};
use tokio::sync::{
    RwLock, Semaphore, broadcast, mpsc, oneshot,
    OwnedSemaphorePermit,
};
use tokio_util::sync::CancellationToken;

use tracing::{debug, error, warn};

use std::{any::Any, collections::HashMap, sync::Arc, time::Duration};

/// Configuration surface of one actor pool.
///
/// Loading this from files or flags is a host-application concern; the
/// runtime only consumes the parsed value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Default mailbox configuration for actors created without an explicit
    /// one.
    pub mailbox: MailboxConfig,
    /// Number of worker permits: the maximum number of handler invocations
    /// in flight at once across the pool.
    pub worker_count: usize,
    /// Default wait applied to remote asks issued without an explicit
    /// timeout.
    pub ask_default_timeout: Duration,
    /// What to do with actors that crash.
    pub restart_policy: RestartPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            mailbox: MailboxConfig::default(),
            worker_count: default_worker_count(),
            ask_default_timeout: Duration::from_secs(30),
            restart_policy: RestartPolicy::None,
        }
    }
}

/// Default worker count: one permit per available core.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Actor pool factory.
pub struct ActorPool {}

impl ActorPool {
    /// Create a new actor pool.
    ///
    /// # Returns
    ///
    /// Returns a tuple with the pool reference and the pool runner.
    pub fn create(
        config: PoolConfig,
        token: CancellationToken,
    ) -> (PoolRef, PoolRunner) {
        let (event_sender, event_receiver) = mpsc::channel(100);
        let pool = PoolRef::new(config, event_sender, token);
        let runner = PoolRunner::new(event_receiver);
        (pool, runner)
    }
}

/// Pool event.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// Stop the actor pool.
    StopPool,
}

/// Registry entry for one live actor.
struct ActorEntry {
    /// Type-erased `ActorRef<A>`, recovered by downcast on lookup.
    handle: Box<dyn Any + Send + Sync + 'static>,
    /// Stop channel of the actor.
    stopper: StopSender,
    /// Terminal-event channel for watchers.
    watch: broadcast::Sender<Termination>,
}

/// Pool reference.
///
/// Cheap to clone; all clones address the same pool.
#[derive(Clone)]
pub struct PoolRef {
    /// The actors running in this pool.
    actors: Arc<RwLock<HashMap<ActorId, ActorEntry>>>,
    /// Worker permits bounding concurrent handler invocations.
    workers: Arc<Semaphore>,
    /// Pool configuration.
    config: Arc<PoolConfig>,
    /// Shutdown token.
    token: CancellationToken,
}

impl PoolRef {
    /// Create a pool reference.
    pub(crate) fn new(
        config: PoolConfig,
        event_sender: mpsc::Sender<PoolEvent>,
        token: CancellationToken,
    ) -> Self {
        let actors: Arc<RwLock<HashMap<ActorId, ActorEntry>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let actors_clone = actors.clone();
        let token_clone = token.clone();

        tokio::spawn(async move {
            token_clone.cancelled().await;
            debug!("Stopping actor pool...");
            let stoppers: Vec<(ActorId, StopSender)> = {
                let actors = actors_clone.read().await;
                actors
                    .iter()
                    .map(|(id, entry)| (id.clone(), entry.stopper.clone()))
                    .collect()
            };
            for (id, stopper) in stoppers {
                let (stop_sender, stop_receiver) = oneshot::channel();
                if stopper.send(Some(stop_sender)).await.is_err() {
                    debug!("Actor '{}' was already stopping.", id);
                } else {
                    let _ = stop_receiver.await;
                }
            }

            let _ = event_sender.send(PoolEvent::StopPool).await;
        });

        PoolRef {
            actors,
            workers: Arc::new(Semaphore::new(config.worker_count.max(1))),
            config: Arc::new(config),
            token,
        }
    }

    /// The pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Creates an actor in this pool with the pool's default mailbox
    /// configuration.
    pub async fn create_actor<A>(
        &self,
        name: &str,
        actor: A,
    ) -> Result<ActorRef<A>, Error>
    where
        A: Actor + Handler<A>,
    {
        self.create_actor_with(name, actor, self.config.mailbox).await
    }

    /// Creates an actor in this pool with an explicit mailbox
    /// configuration.
    ///
    /// The returned reference is live: the actor has completed `pre_start`
    /// when this returns. If another actor with the same id exists, an
    /// `Err(Error::Exists(_))` is returned instead.
    pub async fn create_actor_with<A>(
        &self,
        name: &str,
        actor: A,
        mailbox: MailboxConfig,
    ) -> Result<ActorRef<A>, Error>
    where
        A: Actor + Handler<A>,
    {
        let id = ActorId::from(name);
        let (mut runner, actor_ref, stop_sender) =
            ActorRunner::create(id.clone(), actor, &mailbox);
        let (watch_sender, _) = broadcast::channel(8);

        {
            let mut actors = self.actors.write().await;
            if actors.contains_key(&id) {
                error!("Actor '{}' already exists!", &id);
                return Err(Error::Exists(id));
            }
            actors.insert(
                id.clone(),
                ActorEntry {
                    handle: Box::new(actor_ref.clone()),
                    stopper: stop_sender.clone(),
                    watch: watch_sender,
                },
            );
        }

        let pool = self.clone();
        let (sender, receiver) = oneshot::channel::<bool>();
        tokio::spawn(async move {
            runner.init(pool, stop_sender, Some(sender)).await;
        });

        if receiver.await.map_err(|e| Error::Start(e.to_string()))? {
            Ok(actor_ref)
        } else {
            Err(Error::Start(format!("runner can not init '{}'", id)))
        }
    }

    /// Retrieves an actor running in this pool. If the actor does not
    /// exist (or has a different type), a None is returned instead.
    pub async fn get_actor<A>(&self, id: &ActorId) -> Option<ActorRef<A>>
    where
        A: Actor + Handler<A>,
    {
        let actors = self.actors.read().await;
        actors
            .get(id)
            .and_then(|entry| entry.handle.downcast_ref::<ActorRef<A>>().cloned())
    }

    /// True if an actor with this id is currently registered.
    pub async fn contains(&self, id: &ActorId) -> bool {
        let actors = self.actors.read().await;
        actors.contains_key(id)
    }

    /// Destroys an actor: stops dispatch, closes its mailbox and resolves
    /// every still-queued ask with `ActorStopped`. Waits until the actor is
    /// fully gone from the registry.
    pub async fn destroy(&self, id: &ActorId) -> Result<(), Error> {
        let stopper = {
            let actors = self.actors.read().await;
            actors.get(id).map(|entry| entry.stopper.clone())
        };
        let Some(stopper) = stopper else {
            return Err(Error::ActorNotFound(id.clone()));
        };
        let (sender, receiver) = oneshot::channel();
        if stopper.send(Some(sender)).await.is_err() {
            // Already on its way out; nothing to wait for.
            return Ok(());
        }
        let _ = receiver.await;
        Ok(())
    }

    /// Watches an actor for termination.
    ///
    /// The returned receiver yields exactly one [`Termination`] event when
    /// the watched actor stops, normally or by failure. Watching an actor
    /// that does not exist fails with `ActorNotFound`.
    pub async fn watch(
        &self,
        id: &ActorId,
    ) -> Result<broadcast::Receiver<Termination>, Error> {
        let actors = self.actors.read().await;
        actors
            .get(id)
            .map(|entry| entry.watch.subscribe())
            .ok_or_else(|| Error::ActorNotFound(id.clone()))
    }

    /// Acquires a worker permit for one handler invocation.
    pub(crate) async fn acquire_worker(
        &self,
    ) -> Result<OwnedSemaphorePermit, Error> {
        self.workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Stop)
    }

    /// Removes a terminated actor from the registry and notifies its
    /// watchers.
    pub(crate) async fn finish_actor(
        &self,
        id: &ActorId,
        reason: TerminationReason,
    ) {
        let entry = {
            let mut actors = self.actors.write().await;
            actors.remove(id)
        };
        if let Some(entry) = entry {
            if let TerminationReason::Failed(ref err) = reason {
                warn!("Actor '{}' terminated by failure: {}", id, err);
            }
            let termination = Termination {
                id: id.clone(),
                reason,
            };
            if entry.watch.send(termination).is_err() {
                debug!("Actor '{}' terminated with no watchers.", id);
            }
        }
    }

    /// Stops the pool: every actor is stopped and the pool runner exits.
    pub fn stop_pool(&self) {
        self.token.cancel();
    }

    /// The pool's cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Pool runner.
pub struct PoolRunner {
    /// The event receiver.
    event_receiver: mpsc::Receiver<PoolEvent>,
}

impl PoolRunner {
    /// Create a new pool runner.
    pub(crate) fn new(event_receiver: mpsc::Receiver<PoolEvent>) -> Self {
        Self { event_receiver }
    }

    /// Run the actor pool until it is stopped.
    pub async fn run(&mut self) {
        debug!("Running actor pool...");
        while let Some(event) = self.event_receiver.recv().await {
            match event {
                PoolEvent::StopPool => {
                    debug!("Actor pool stopped.");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn test_stop_actor_pool() {
        let token = CancellationToken::new();
        let (_pool, mut runner) =
            ActorPool::create(PoolConfig::default(), token.clone());

        tokio::spawn(async move {
            runner.run().await;
        });
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        assert!(logs_contain("Running actor pool..."));
        token.cancel();
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        assert!(logs_contain("Stopping actor pool..."));
        assert!(logs_contain("Actor pool stopped."));
    }

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert!(config.worker_count >= 1);
        assert_eq!(config.restart_policy, RestartPolicy::None);
        assert_eq!(config.mailbox.capacity, None);
    }
}
