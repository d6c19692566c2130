// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Pool server
//!
//! The `server` module is the receiving side of location transparency: it
//! accepts framed connections from peer pools and dispatches their
//! envelopes into the local pool.
//!
//! Dispatch is type-erased. Serving an actor registers a closure that
//! captures its typed `ActorRef` and knows how to decode the actor's
//! message type and encode its response type; incoming envelopes are
//! matched to these closures by actor id. Enqueueing happens inline in the
//! connection's read loop, which is what preserves per-sender FIFO order,
//! while reply production is spawned off so a slow handler never stalls
//! the connection.
//!
//! Control envelopes implement the runtime-level operations a peer may
//! request: creating an actor from a registered factory, destroying one,
//! probing existence, and watching for termination.
//!

use crate::{
    envelope::{
        Control, ControlReply, Envelope, MessageKind, Payload,
        RemoteMessage, RemoteResponse, RequestMeta, pack_response,
        unpack_message,
    },
    wire,
};

use actor::{
    Actor, ActorAddr, ActorId, ActorRef, Error, Handler, PoolAddress,
    PoolRef,
};

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    sync::{RwLock, mpsc},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use std::{collections::HashMap, sync::Arc};

/// Future producing the reply payload of one request.
type ReplyFuture = BoxFuture<'static, Result<Payload, Error>>;

/// Type-erased dispatch closure for one served actor.
///
/// The outer future completes once the envelope is enqueued (order
/// matters); the inner future completes when the reply payload is ready.
type DispatchFn = Arc<
    dyn Fn(Envelope) -> BoxFuture<'static, Result<ReplyFuture, Error>>
        + Send
        + Sync,
>;

/// Type-erased factory for remotely created actors.
type FactoryFn = Arc<
    dyn Fn(Dispatcher, ActorId, Vec<u8>) -> BoxFuture<'static, Result<ActorAddr, Error>>
        + Send
        + Sync,
>;

struct DispatcherState {
    /// Address of the pool this dispatcher serves.
    local: PoolAddress,
    /// The local pool.
    pool: PoolRef,
    /// Served actors by id.
    handlers: RwLock<HashMap<ActorId, DispatchFn>>,
    /// Registered factories by type tag.
    factories: RwLock<HashMap<String, FactoryFn>>,
}

/// Dispatches incoming envelopes into the local pool.
///
/// Cheap to clone; all clones share the registries.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherState>,
}

impl Dispatcher {
    /// Creates a dispatcher for the given pool.
    pub fn new(local: PoolAddress, pool: PoolRef) -> Self {
        Dispatcher {
            inner: Arc::new(DispatcherState {
                local,
                pool,
                handlers: RwLock::new(HashMap::new()),
                factories: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// The local pool.
    pub fn pool(&self) -> &PoolRef {
        &self.inner.pool
    }

    /// Exposes an actor to remote senders and returns its wire reference.
    pub async fn serve<A>(&self, actor_ref: &ActorRef<A>) -> ActorAddr
    where
        A: Actor + Handler<A>,
        A::Message: RemoteMessage,
        A::Response: RemoteResponse,
    {
        let id = actor_ref.id();
        let serving = actor_ref.clone();
        let dispatch: DispatchFn = Arc::new(move |envelope: Envelope| {
            let actor = serving.clone();
            Box::pin(async move {
                match envelope.kind {
                    MessageKind::Tell => {
                        let message: A::Message =
                            unpack_message(&envelope.payload)?;
                        actor.tell_from(envelope.sender, message).await?;
                        let done: ReplyFuture =
                            Box::pin(async { Ok(Payload::empty()) });
                        Ok(done)
                    }
                    MessageKind::Ask => {
                        let message: A::Message =
                            unpack_message(&envelope.payload)?;
                        let pending = actor
                            .ask_queued(envelope.sender, message)
                            .await?;
                        let reply: ReplyFuture = Box::pin(async move {
                            let response = pending.wait().await?;
                            pack_response(response)
                        });
                        Ok(reply)
                    }
                    kind => Err(Error::Functional(format!(
                        "cannot dispatch {:?} envelope to an actor",
                        kind
                    ))),
                }
            })
        });
        {
            let mut handlers = self.inner.handlers.write().await;
            handlers.insert(id.clone(), dispatch);
        }
        debug!("Serving actor '{}' to remote senders.", id);
        ActorAddr::new(self.inner.local.clone(), id, A::type_tag())
    }

    /// Withdraws an actor from remote reach.
    pub async fn unregister(&self, id: &ActorId) {
        let mut handlers = self.inner.handlers.write().await;
        handlers.remove(id);
    }

    /// Registers a factory for remote creation of `A` actors.
    ///
    /// `make` receives the decoded construction arguments sent by the
    /// creating peer. Created actors are served automatically.
    pub async fn register_factory<A, T, F>(&self, make: F)
    where
        A: Actor + Handler<A>,
        A::Message: RemoteMessage,
        A::Response: RemoteResponse,
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> A + Send + Sync + 'static,
    {
        let tag = A::type_tag().to_owned();
        let make = Arc::new(make);
        let factory: FactoryFn = Arc::new(
            move |dispatcher: Dispatcher, id: ActorId, args: Vec<u8>| {
                let make = make.clone();
                Box::pin(async move {
                    let params: T =
                        bincode::deserialize(&args).map_err(|_| {
                            Error::Serialization(
                                std::any::type_name::<T>().to_owned(),
                            )
                        })?;
                    let actor_ref = dispatcher
                        .inner
                        .pool
                        .create_actor(id.as_str(), make(params))
                        .await?;
                    Ok(dispatcher.serve(&actor_ref).await)
                })
            },
        );
        debug!("Registering actor factory for tag '{}'.", tag);
        let mut factories = self.inner.factories.write().await;
        factories.insert(tag, factory);
    }

    /// Creates an actor through a registered factory, as the `Create`
    /// control does, but from local code.
    pub(crate) async fn create_from_factory(
        &self,
        type_tag: &str,
        id: ActorId,
        args: Vec<u8>,
    ) -> Result<ActorAddr, Error> {
        let factory = {
            let factories = self.inner.factories.read().await;
            factories.get(type_tag).cloned()
        }
        .ok_or_else(|| {
            Error::Functional(format!(
                "no factory registered for type tag '{}'",
                type_tag
            ))
        })?;
        factory(self.clone(), id, args).await
    }

    /// Dispatches a tell/ask envelope to its served actor.
    ///
    /// The returned future's completion means the envelope is enqueued;
    /// its output is the reply future.
    pub(crate) async fn dispatch(
        &self,
        envelope: Envelope,
    ) -> Result<ReplyFuture, Error> {
        let handler = {
            let handlers = self.inner.handlers.read().await;
            handlers.get(&envelope.target.id).cloned()
        }
        .ok_or_else(|| Error::ActorNotFound(envelope.target.id.clone()))?;
        handler(envelope).await
    }

    /// Builds the reply future for a control envelope.
    pub(crate) fn control_future(
        &self,
        envelope: &Envelope,
    ) -> Result<ReplyFuture, Error> {
        let control: Control = envelope.payload.decode()?;
        let dispatcher = self.clone();
        Ok(Box::pin(async move {
            match control {
                Control::Create { id, type_tag, args } => {
                    let addr = dispatcher
                        .create_from_factory(&type_tag, id, args)
                        .await?;
                    Payload::encode(&ControlReply::Created(addr))
                }
                Control::Destroy { id } => {
                    dispatcher.unregister(&id).await;
                    dispatcher.inner.pool.destroy(&id).await?;
                    Payload::encode(&ControlReply::Destroyed)
                }
                Control::Contains { id } => {
                    let present = dispatcher.inner.pool.contains(&id).await;
                    Payload::encode(&ControlReply::Contains(present))
                }
                Control::Watch { id } => {
                    let mut receiver =
                        dispatcher.inner.pool.watch(&id).await?;
                    let termination =
                        receiver.recv().await.map_err(|_| {
                            Error::ActorNotFound(id.clone())
                        })?;
                    Payload::encode(&ControlReply::Terminated(termination))
                }
            }
        }))
    }
}

/// Serves one accepted connection: reads frames in order, enqueues them,
/// and ships replies back as their handlers finish.
async fn handle_connection<S>(
    stream: S,
    dispatcher: Dispatcher,
    token: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    if wire::write_handshake(&mut write_half).await.is_err() {
        return;
    }
    if let Err(err) = wire::read_handshake(&mut read_half).await {
        warn!("Rejecting connection: {}", err);
        return;
    }

    let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(64);
    let writer = tokio::spawn(async move {
        while let Some(envelope) = out_rx.recv().await {
            if wire::write_frame(&mut write_half, &envelope).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            frame = wire::read_frame(&mut read_half) => {
                let Ok(envelope) = frame else { break };
                match envelope.kind {
                    MessageKind::Tell => {
                        // Enqueue inline: arrival order is dispatch order.
                        // There is nobody to report a failed tell to.
                        if let Err(err) =
                            dispatcher.dispatch(envelope).await
                        {
                            warn!("Dropping undeliverable tell: {}", err);
                        }
                    }
                    MessageKind::Ask => {
                        let meta = RequestMeta::of(&envelope);
                        match dispatcher.dispatch(envelope).await {
                            Ok(reply) => {
                                let out = out_tx.clone();
                                tokio::spawn(async move {
                                    let envelope = match reply.await {
                                        Ok(payload) => meta.reply(payload),
                                        Err(err) => meta.error(&err),
                                    };
                                    let _ = out.send(envelope).await;
                                });
                            }
                            Err(err) => {
                                let _ =
                                    out_tx.send(meta.error(&err)).await;
                            }
                        }
                    }
                    MessageKind::Control => {
                        let meta = RequestMeta::of(&envelope);
                        match dispatcher.control_future(&envelope) {
                            Ok(reply) => {
                                let out = out_tx.clone();
                                tokio::spawn(async move {
                                    let envelope = match reply.await {
                                        Ok(payload) => meta.reply(payload),
                                        Err(err) => meta.error(&err),
                                    };
                                    let _ = out.send(envelope).await;
                                });
                            }
                            Err(err) => {
                                let _ =
                                    out_tx.send(meta.error(&err)).await;
                            }
                        }
                    }
                    MessageKind::Reply | MessageKind::Error => {
                        debug!(
                            "Ignoring unexpected {:?} envelope.",
                            envelope.kind
                        );
                    }
                }
            }
        }
    }
    writer.abort();
}

/// The listening side of a pool: accepts peer connections over TCP and,
/// on the same host, over a unix socket.
pub struct PoolServer {
    local: PoolAddress,
    dispatcher: Dispatcher,
}

impl PoolServer {
    /// Binds the pool's listeners and starts accepting peers.
    ///
    /// Cancelling the token stops the listeners; established connections
    /// end when their peers observe the close.
    pub async fn bind(
        local: PoolAddress,
        pool: PoolRef,
        token: CancellationToken,
    ) -> Result<PoolServer, Error> {
        let dispatcher = Dispatcher::new(local.clone(), pool);

        let tcp = TcpListener::bind((local.host.as_str(), local.port))
            .await
            .map_err(|e| {
                Error::Start(format!("can not bind {}: {}", local, e))
            })?;
        debug!(
            "Pool server listening on {}:{}.",
            local.host, local.port
        );
        {
            let dispatcher = dispatcher.clone();
            let token = token.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        accepted = tcp.accept() => {
                            match accepted {
                                Ok((stream, peer)) => {
                                    debug!("Accepted connection from {}.", peer);
                                    let _ = stream.set_nodelay(true);
                                    tokio::spawn(handle_connection(
                                        stream,
                                        dispatcher.clone(),
                                        token.clone(),
                                    ));
                                }
                                Err(err) => {
                                    error!("Accept failed: {}", err);
                                    break;
                                }
                            }
                        }
                    }
                }
            });
        }

        #[cfg(unix)]
        {
            let path = local.socket_path();
            let _ = std::fs::remove_file(&path);
            match tokio::net::UnixListener::bind(&path) {
                Ok(listener) => {
                    debug!(
                        "Pool server listening on {}.",
                        path.display()
                    );
                    let dispatcher = dispatcher.clone();
                    let token = token.clone();
                    tokio::spawn(async move {
                        loop {
                            tokio::select! {
                                _ = token.cancelled() => break,
                                accepted = listener.accept() => {
                                    match accepted {
                                        Ok((stream, _)) => {
                                            tokio::spawn(handle_connection(
                                                stream,
                                                dispatcher.clone(),
                                                token.clone(),
                                            ));
                                        }
                                        Err(err) => {
                                            error!("Accept failed on unix socket: {}", err);
                                            break;
                                        }
                                    }
                                }
                            }
                        }
                        let _ = std::fs::remove_file(&path);
                    });
                }
                Err(err) => {
                    warn!(
                        "Unix socket unavailable at {}: {}; same-host peers will use TCP.",
                        path.display(),
                        err
                    );
                }
            }
        }

        Ok(PoolServer { local, dispatcher })
    }

    /// Address this server listens on.
    pub fn address(&self) -> &PoolAddress {
        &self.local
    }

    /// The server's dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Exposes an actor to remote senders and returns its wire reference.
    pub async fn serve<A>(&self, actor_ref: &ActorRef<A>) -> ActorAddr
    where
        A: Actor + Handler<A>,
        A::Message: RemoteMessage,
        A::Response: RemoteResponse,
    {
        self.dispatcher.serve(actor_ref).await
    }

    /// Registers a factory for remote creation of `A` actors.
    pub async fn register_factory<A, T, F>(&self, make: F)
    where
        A: Actor + Handler<A>,
        A::Message: RemoteMessage,
        A::Response: RemoteResponse,
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> A + Send + Sync + 'static,
    {
        self.dispatcher.register_factory::<A, T, F>(make).await
    }
}
