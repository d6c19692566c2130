// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Deployment
//!
//! The `deployment` module assembles one node of a pool group: the local
//! pool, its server, and the router that knows the other pools. A
//! [`Deployment`] is an explicit value with an explicit lifecycle: tests
//! can run several of them in one process without any shared global state,
//! and shutting one down tears down its pool, listeners and channels.
//!
//! Pool membership is fixed at startup. Spawning pools elsewhere is the
//! job of an external orchestration backend speaking the [`Backend`]
//! trait; the router treats a backend-spawned pool exactly like any other.
//!

use crate::{
    envelope::{Control, ControlReply, RemoteMessage, RemoteResponse},
    router::{AskWait, RemoteRef, Router},
    server::PoolServer,
};

use actor::{
    Actor, ActorAddr, ActorId, ActorPool, ActorRef, Error, Handler,
    PoolAddress, PoolConfig, PoolRef,
};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio_util::sync::CancellationToken;

use tracing::debug;

/// One running node of a pool group.
pub struct Deployment {
    local: PoolAddress,
    pool: PoolRef,
    router: Router,
    server: PoolServer,
    token: CancellationToken,
    runner: tokio::task::JoinHandle<()>,
}

impl Deployment {
    /// Starts a deployment node: creates the pool, binds the listeners and
    /// builds the router over the given peer addresses.
    pub async fn start(
        local: PoolAddress,
        peers: Vec<PoolAddress>,
        config: PoolConfig,
    ) -> Result<Deployment, Error> {
        debug!("Starting deployment node at {}.", local);
        let token = CancellationToken::new();
        let (pool, mut pool_runner) =
            ActorPool::create(config, token.clone());
        let runner = tokio::spawn(async move {
            pool_runner.run().await;
        });
        let server = match PoolServer::bind(
            local.clone(),
            pool.clone(),
            token.clone(),
        )
        .await
        {
            Ok(server) => server,
            Err(err) => {
                token.cancel();
                let _ = runner.await;
                return Err(err);
            }
        };
        let router = Router::new(local.clone(), pool.clone(), peers);
        Ok(Deployment {
            local,
            pool,
            router,
            server,
            token,
            runner,
        })
    }

    /// Address of this node's pool.
    pub fn address(&self) -> &PoolAddress {
        &self.local
    }

    /// The local pool.
    pub fn pool(&self) -> &PoolRef {
        &self.pool
    }

    /// The router over this deployment's address space.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The local pool server.
    pub fn server(&self) -> &PoolServer {
        &self.server
    }

    /// Exposes a locally created actor to the deployment and returns its
    /// location-transparent reference.
    pub async fn serve<A>(&self, actor_ref: &ActorRef<A>) -> RemoteRef<A>
    where
        A: Actor + Handler<A>,
        A::Message: RemoteMessage,
        A::Response: RemoteResponse,
    {
        let addr = self.server.serve(actor_ref).await;
        RemoteRef::new(addr, self.router.clone())
    }

    /// Registers a factory so peers (and this node) can create `A` actors
    /// here by type tag.
    pub async fn register_factory<A, T, F>(&self, make: F)
    where
        A: Actor + Handler<A>,
        A::Message: RemoteMessage,
        A::Response: RemoteResponse,
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> A + Send + Sync + 'static,
    {
        self.server.register_factory::<A, T, F>(make).await
    }

    /// Creates an actor on the given pool, local or remote, through its
    /// registered factory, and returns its reference.
    pub async fn create_actor<A, T>(
        &self,
        on: &PoolAddress,
        name: &str,
        args: &T,
    ) -> Result<RemoteRef<A>, Error>
    where
        A: Actor + Handler<A>,
        A::Message: RemoteMessage,
        A::Response: RemoteResponse,
        T: Serialize,
    {
        let args = bincode::serialize(args).map_err(|_| {
            Error::Serialization(std::any::type_name::<T>().to_owned())
        })?;
        let id = ActorId::from(name);
        let addr = if self.router.is_local(on) {
            self.server
                .dispatcher()
                .create_from_factory(A::type_tag(), id, args)
                .await?
        } else {
            let target =
                ActorAddr::new(on.clone(), id.clone(), A::type_tag());
            let control = Control::Create {
                id,
                type_tag: A::type_tag().to_owned(),
                args,
            };
            match self
                .router
                .control(target, &control, AskWait::Default)
                .await?
            {
                ControlReply::Created(addr) => addr,
                _ => {
                    return Err(Error::Functional(
                        "unexpected create reply".to_owned(),
                    ));
                }
            }
        };
        Ok(RemoteRef::new(addr, self.router.clone()))
    }

    /// Builds a typed reference from a wire address received elsewhere.
    pub fn remote_ref<A>(&self, addr: ActorAddr) -> RemoteRef<A>
    where
        A: Actor + Handler<A>,
        A::Message: RemoteMessage,
        A::Response: RemoteResponse,
    {
        RemoteRef::new(addr, self.router.clone())
    }

    /// Shuts the node down: stops every actor, the listeners and the pool
    /// runner.
    pub async fn shutdown(self) {
        debug!("Shutting down deployment node at {}.", self.local);
        self.token.cancel();
        let _ = self.runner.await;
    }
}

/// Adapter contract for external orchestration backends that host pools.
///
/// The router treats every pool identically whether it was spawned as a
/// raw process or by such a backend; register the returned address with
/// the router and it becomes reachable like any other peer.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Spawns a pool somewhere and returns its address.
    async fn spawn_pool(&self, config: PoolConfig)
    -> Result<PoolAddress, Error>;

    /// Terminates a pool previously spawned by this backend.
    async fn terminate_pool(&self, addr: &PoolAddress) -> Result<(), Error>;
}
