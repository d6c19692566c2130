// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Router and reference resolution
//!
//! The `router` module makes references location-transparent. A reference
//! names an actor (`ActorAddr`); the router resolves where it runs: actors
//! of the local pool are reached directly through their typed `ActorRef`
//! (no serialization), actors of peer pools through a cached channel to
//! that pool.
//!
//! The address table maps each peer pool to at most one channel, which is
//! established lazily on first use and shared by every actor on that pool.
//! Concurrent first resolutions collapse into a single connection attempt.
//! A broken channel fails every ask pending on it with `ChannelClosed`,
//! gets evicted, and the next send re-resolves from scratch; nothing is
//! retried automatically.
//!
//! Pending asks are parked in a per-channel table keyed by correlation id;
//! the channel's reader task resumes them when the matching `Reply` or
//! `Error` envelope arrives. A caller that timed out has already abandoned
//! its entry, so its late reply is discarded without touching anyone else.
//!

use crate::{
    channel::{self, Channel},
    envelope::{
        Control, ControlReply, Envelope, MessageKind, Payload, RemoteMessage,
        RemoteResponse, pack_message, unpack_response,
    },
};

use actor::{
    Actor, ActorAddr, ActorId, Error, Handler, PoolAddress, PoolRef,
    Termination, TerminationReason,
};

use tokio::sync::{Mutex, OnceCell, RwLock, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use std::{
    collections::{HashMap, HashSet},
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

/// How long an ask waits for its reply.
#[derive(Clone, Copy, Debug)]
pub(crate) enum AskWait {
    /// The pool's configured default timeout.
    Default,
    /// An explicit caller-supplied timeout.
    For(Duration),
    /// No timeout; used by watch, whose reply is the terminal event.
    Forever,
}

/// One established channel to a peer pool, with its pending-reply table
/// and reader task.
struct Link {
    channel: Arc<dyn Channel>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Payload, Error>>>>>,
}

impl Link {
    /// Wraps a connected channel and spawns its reader task. `on_closed`
    /// runs once when the channel breaks, after every pending ask has been
    /// failed with `ChannelClosed`. Cancelling the token also fails the
    /// pending asks and stops the reader, for local shutdown.
    fn open(
        channel: Arc<dyn Channel>,
        token: CancellationToken,
        on_closed: Box<dyn FnOnce() + Send>,
    ) -> Arc<Link> {
        let link = Arc::new(Link {
            channel: channel.clone(),
            pending: Arc::new(Mutex::new(HashMap::new())),
        });
        let pending = link.pending.clone();
        tokio::spawn(async move {
            let mut on_closed = Some(on_closed);
            loop {
                let received = tokio::select! {
                    _ = token.cancelled() => Err(Error::ChannelClosed),
                    received = channel.recv() => received,
                };
                match received {
                    Ok(envelope) => match envelope.kind {
                        MessageKind::Reply => {
                            let waiter = pending
                                .lock()
                                .await
                                .remove(&envelope.correlation_id);
                            match waiter {
                                Some(tx) => {
                                    let _ = tx.send(Ok(envelope.payload));
                                }
                                None => debug!(
                                    "Discarding late reply {}.",
                                    envelope.correlation_id
                                ),
                            }
                        }
                        MessageKind::Error => {
                            let error = envelope
                                .payload
                                .decode::<Error>()
                                .unwrap_or_else(|_| {
                                    Error::Functional(
                                        "peer sent an undecodable error"
                                            .to_owned(),
                                    )
                                });
                            let waiter = pending
                                .lock()
                                .await
                                .remove(&envelope.correlation_id);
                            match waiter {
                                Some(tx) => {
                                    let _ = tx.send(Err(error));
                                }
                                None => debug!(
                                    "Discarding late error {}.",
                                    envelope.correlation_id
                                ),
                            }
                        }
                        kind => {
                            warn!(
                                "Ignoring unexpected {:?} envelope from peer.",
                                kind
                            );
                        }
                    },
                    Err(_) => {
                        debug!("Peer channel closed, failing pending asks.");
                        let mut pending = pending.lock().await;
                        for (_, tx) in pending.drain() {
                            let _ = tx.send(Err(Error::ChannelClosed));
                        }
                        if let Some(on_closed) = on_closed.take() {
                            on_closed();
                        }
                        break;
                    }
                }
            }
        });
        link
    }

    /// Parks a pending ask under its correlation id.
    async fn register(
        &self,
        correlation_id: u64,
    ) -> oneshot::Receiver<Result<Payload, Error>> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(correlation_id, tx);
        rx
    }

    /// Abandons a pending ask (timed out or failed to send); a reply that
    /// still arrives is discarded by the reader.
    async fn forget(&self, correlation_id: u64) {
        self.pending.lock().await.remove(&correlation_id);
    }

    async fn send(&self, envelope: Envelope) -> Result<(), Error> {
        self.channel
            .send(envelope)
            .await
            .map_err(|_| Error::ChannelClosed)
    }
}

type LinkCell = Arc<OnceCell<Arc<Link>>>;

/// Router state shared by all clones.
struct RouterState {
    /// Address of the local pool.
    local: PoolAddress,
    /// The local pool, for the in-process fast path.
    pool: PoolRef,
    /// Deployment membership: pools this router may resolve.
    known: RwLock<HashSet<PoolAddress>>,
    /// Address table: one channel slot per peer pool.
    links: RwLock<HashMap<PoolAddress, LinkCell>>,
    /// Correlation id source.
    correlation: AtomicU64,
}

/// The deployment-wide message router.
///
/// Cheap to clone; all clones share the address table.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterState>,
}

impl Router {
    /// Creates a router for the local pool, with the given peer pools as
    /// the deployment membership.
    pub fn new(
        local: PoolAddress,
        pool: PoolRef,
        peers: Vec<PoolAddress>,
    ) -> Self {
        let mut known: HashSet<PoolAddress> = peers.into_iter().collect();
        known.insert(local.clone());
        Router {
            inner: Arc::new(RouterState {
                local,
                pool,
                known: RwLock::new(known),
                links: RwLock::new(HashMap::new()),
                correlation: AtomicU64::new(0),
            }),
        }
    }

    /// Address of the local pool.
    pub fn local_address(&self) -> &PoolAddress {
        &self.inner.local
    }

    /// The local pool.
    pub fn pool(&self) -> &PoolRef {
        &self.inner.pool
    }

    /// True if the address names the local pool.
    pub fn is_local(&self, pool: &PoolAddress) -> bool {
        self.inner.local.is_same_process(pool)
    }

    /// Adds a pool to the deployment membership.
    ///
    /// Membership is normally fixed at startup; this exists for backend
    /// adapters that spawn pools at runtime.
    pub async fn register_pool(&self, addr: PoolAddress) {
        self.inner.known.write().await.insert(addr);
    }

    /// Builds the wire reference of an actor hosted by the local pool.
    pub fn local_addr_of<A>(&self, id: &str) -> ActorAddr
    where
        A: Actor + Handler<A>,
    {
        ActorAddr::new(
            self.inner.local.clone(),
            ActorId::from(id),
            A::type_tag(),
        )
    }

    fn next_correlation(&self) -> u64 {
        self.inner.correlation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Resolves the channel to a peer pool, establishing it on first use.
    async fn link(&self, pool: &PoolAddress) -> Result<Arc<Link>, Error> {
        {
            let known = self.inner.known.read().await;
            if !known.contains(pool) {
                return Err(Error::UnknownPool(pool.clone()));
            }
        }
        let cell: LinkCell = {
            let mut links = self.inner.links.write().await;
            links
                .entry(pool.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        let link = cell
            .get_or_try_init(|| async {
                debug!("Establishing channel to pool {}.", pool);
                let channel =
                    channel::connect(&self.inner.local, pool).await?;
                let router = self.clone();
                let peer = pool.clone();
                let marker = cell.clone();
                Ok::<Arc<Link>, Error>(Link::open(
                    channel,
                    self.inner.pool.token(),
                    Box::new(move || {
                        tokio::spawn(async move {
                            router.evict(&peer, &marker).await;
                        });
                    }),
                ))
            })
            .await?
            .clone();
        Ok(link)
    }

    /// Drops a broken channel from the address table so the next send
    /// re-resolves. A newer channel that already replaced it is left alone.
    async fn evict(&self, pool: &PoolAddress, cell: &LinkCell) {
        let mut links = self.inner.links.write().await;
        if let Some(current) = links.get(pool) {
            if Arc::ptr_eq(current, cell) {
                links.remove(pool);
                debug!("Evicted broken channel to pool {}.", pool);
            }
        }
    }

    /// Sends a fire-and-forget envelope to its target pool.
    pub(crate) async fn send_tell(
        &self,
        envelope: Envelope,
    ) -> Result<(), Error> {
        let pool = envelope.target.pool.clone();
        let link = self.link(&pool).await?;
        link.send(envelope).await
    }

    /// Sends a request envelope and waits for its correlated reply.
    pub(crate) async fn ask_env(
        &self,
        mut envelope: Envelope,
        wait: AskWait,
    ) -> Result<Payload, Error> {
        let pool = envelope.target.pool.clone();
        let link = self.link(&pool).await?;
        let correlation_id = self.next_correlation();
        envelope.correlation_id = correlation_id;

        let receiver = link.register(correlation_id).await;
        if let Err(err) = link.send(envelope).await {
            link.forget(correlation_id).await;
            return Err(err);
        }

        let duration = match wait {
            AskWait::Default => {
                Some(self.inner.pool.config().ask_default_timeout)
            }
            AskWait::For(duration) => Some(duration),
            AskWait::Forever => None,
        };
        match duration {
            Some(duration) => {
                match tokio::time::timeout(duration, receiver).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => Err(Error::ChannelClosed),
                    Err(_) => {
                        link.forget(correlation_id).await;
                        Err(Error::Timeout)
                    }
                }
            }
            None => match receiver.await {
                Ok(result) => result,
                Err(_) => Err(Error::ChannelClosed),
            },
        }
    }

    /// Sends a control request to a pool and decodes its reply.
    pub(crate) async fn control(
        &self,
        target: ActorAddr,
        control: &Control,
        wait: AskWait,
    ) -> Result<ControlReply, Error> {
        let envelope = Envelope::control(target, 0, control)?;
        let payload = self.ask_env(envelope, wait).await?;
        payload.decode()
    }

    /// True if the pool owning the reference currently hosts the actor.
    ///
    /// Existence is checked at first use, never eagerly: an unreachable
    /// pool fails here rather than at reference construction.
    pub async fn contains(&self, addr: &ActorAddr) -> Result<bool, Error> {
        if self.is_local(&addr.pool) {
            Ok(self.inner.pool.contains(&addr.id).await)
        } else {
            let control = Control::Contains {
                id: addr.id.clone(),
            };
            match self
                .control(addr.clone(), &control, AskWait::Default)
                .await?
            {
                ControlReply::Contains(present) => Ok(present),
                _ => Err(Error::Functional(
                    "unexpected contains reply".to_owned(),
                )),
            }
        }
    }

    /// Destroys the referenced actor, wherever it runs.
    pub async fn destroy(&self, addr: &ActorAddr) -> Result<(), Error> {
        if self.is_local(&addr.pool) {
            self.inner.pool.destroy(&addr.id).await
        } else {
            let control = Control::Destroy {
                id: addr.id.clone(),
            };
            match self
                .control(addr.clone(), &control, AskWait::Default)
                .await?
            {
                ControlReply::Destroyed => Ok(()),
                _ => Err(Error::Functional(
                    "unexpected destroy reply".to_owned(),
                )),
            }
        }
    }

    /// Waits for the referenced actor's terminal event.
    ///
    /// Losing the pool counts as termination: watchers of actors on an
    /// unreachable pool receive a `Failed(PoolUnreachable)` event rather
    /// than an error.
    pub async fn watch(&self, addr: &ActorAddr) -> Result<Termination, Error> {
        if self.is_local(&addr.pool) {
            let mut receiver = self.inner.pool.watch(&addr.id).await?;
            receiver
                .recv()
                .await
                .map_err(|_| Error::ActorNotFound(addr.id.clone()))
        } else {
            let control = Control::Watch {
                id: addr.id.clone(),
            };
            match self
                .control(addr.clone(), &control, AskWait::Forever)
                .await
            {
                Ok(ControlReply::Terminated(termination)) => Ok(termination),
                Ok(_) => Err(Error::Functional(
                    "unexpected watch reply".to_owned(),
                )),
                Err(Error::ChannelClosed)
                | Err(Error::PoolUnreachable(_)) => Ok(Termination {
                    id: addr.id.clone(),
                    reason: TerminationReason::Failed(
                        Error::PoolUnreachable(addr.pool.clone()),
                    ),
                }),
                Err(err) => Err(err),
            }
        }
    }
}

/// A typed, location-transparent reference to an actor.
///
/// Wraps an [`ActorAddr`] and the router that resolves it. The same API
/// works whether the actor runs in this process (direct handoff, no
/// serialization) or behind a channel; callers cannot tell the difference
/// except in failure modes.
pub struct RemoteRef<A> {
    addr: ActorAddr,
    router: Router,
    _phantom: PhantomData<fn() -> A>,
}

impl<A> RemoteRef<A>
where
    A: Actor + Handler<A>,
    A::Message: RemoteMessage,
    A::Response: RemoteResponse,
{
    /// Creates a reference from a wire address and a router.
    pub fn new(addr: ActorAddr, router: Router) -> Self {
        RemoteRef {
            addr,
            router,
            _phantom: PhantomData,
        }
    }

    /// The wire address of the referenced actor.
    pub fn addr(&self) -> &ActorAddr {
        &self.addr
    }

    /// Sends a message without expecting a response.
    pub async fn tell(&self, message: A::Message) -> Result<(), Error> {
        self.tell_from(None, message).await
    }

    /// Sends a message on behalf of a sending actor.
    pub async fn tell_from(
        &self,
        sender: Option<ActorAddr>,
        message: A::Message,
    ) -> Result<(), Error> {
        if self.router.is_local(&self.addr.pool) {
            let actor = self.local_ref().await?;
            actor.tell_from(sender, message).await
        } else {
            // Serialization happens here, at the send site, so unencodable
            // payloads fail near their cause.
            let payload = pack_message(message)?;
            let envelope = Envelope::tell(sender, self.addr.clone(), payload);
            self.router.send_tell(envelope).await
        }
    }

    /// Sends a message and waits for the response, bounded by the pool's
    /// default ask timeout.
    pub async fn ask(
        &self,
        message: A::Message,
    ) -> Result<A::Response, Error> {
        self.ask_wait(None, message, AskWait::Default).await
    }

    /// Sends a message on behalf of a sending actor and waits for the
    /// response.
    pub async fn ask_from(
        &self,
        sender: Option<ActorAddr>,
        message: A::Message,
    ) -> Result<A::Response, Error> {
        self.ask_wait(sender, message, AskWait::Default).await
    }

    /// Sends a message and waits for the response at most `timeout`.
    pub async fn ask_with_timeout(
        &self,
        message: A::Message,
        timeout: Duration,
    ) -> Result<A::Response, Error> {
        self.ask_wait(None, message, AskWait::For(timeout)).await
    }

    /// Waits for the referenced actor's terminal event.
    pub async fn watch(&self) -> Result<Termination, Error> {
        self.router.watch(&self.addr).await
    }

    /// Destroys the referenced actor.
    pub async fn destroy(&self) -> Result<(), Error> {
        self.router.destroy(&self.addr).await
    }

    /// True if the actor currently exists on its pool.
    pub async fn exists(&self) -> Result<bool, Error> {
        self.router.contains(&self.addr).await
    }

    async fn local_ref(&self) -> Result<actor::ActorRef<A>, Error> {
        self.router
            .pool()
            .get_actor::<A>(&self.addr.id)
            .await
            .ok_or_else(|| Error::ActorNotFound(self.addr.id.clone()))
    }

    async fn ask_wait(
        &self,
        sender: Option<ActorAddr>,
        message: A::Message,
        wait: AskWait,
    ) -> Result<A::Response, Error> {
        if self.router.is_local(&self.addr.pool) {
            let actor = self.local_ref().await?;
            let pending = actor.ask_queued(sender, message).await?;
            let duration = match wait {
                AskWait::Default => {
                    Some(self.router.pool().config().ask_default_timeout)
                }
                AskWait::For(duration) => Some(duration),
                AskWait::Forever => None,
            };
            match duration {
                Some(duration) => {
                    match tokio::time::timeout(duration, pending.wait())
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(Error::Timeout),
                    }
                }
                None => pending.wait().await,
            }
        } else {
            let payload = pack_message(message)?;
            let envelope =
                Envelope::ask(sender, self.addr.clone(), 0, payload);
            let reply = self.router.ask_env(envelope, wait).await?;
            unpack_response(&reply)
        }
    }
}

impl<A> Clone for RemoteRef<A> {
    fn clone(&self) -> Self {
        RemoteRef {
            addr: self.addr.clone(),
            router: self.router.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<A> std::fmt::Debug for RemoteRef<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteRef")
            .field("addr", &self.addr)
            .finish()
    }
}
