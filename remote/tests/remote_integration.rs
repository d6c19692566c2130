// Cross-pool integration tests: TCP and unix-socket transports, remote
// control operations, and peer-loss failure modes.

use actor::{
    Actor, ActorAddr, ActorContext, Error, Handler, Message, PoolAddress,
    PoolConfig, Response, TerminationReason,
};
use remote::{Deployment, RemoteMessage, RemoteResponse};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing_test::traced_test;

use std::time::Duration;

// Reserves a port by binding and releasing it.
fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

// A pool address that other deployments in this process treat as remote.
fn remote_pool(host: &str) -> PoolAddress {
    PoolAddress::with_process(host, free_port(), std::process::id() + 1)
}

#[derive(Debug, Clone)]
pub struct Counter {
    pub value: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CounterCommand {
    Inc,
    Get,
    Slow,
}

impl Message for CounterCommand {}
impl RemoteMessage for CounterCommand {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CounterResponse {
    Value(u64),
}

impl Response for CounterResponse {}
impl RemoteResponse for CounterResponse {}

#[async_trait]
impl Actor for Counter {
    type Message = CounterCommand;
    type Response = CounterResponse;

    fn type_tag() -> &'static str {
        "counter"
    }
}

#[async_trait]
impl Handler<Counter> for Counter {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorAddr>,
        msg: CounterCommand,
        _ctx: &mut ActorContext<Counter>,
    ) -> Result<CounterResponse, Error> {
        match msg {
            CounterCommand::Inc => {
                self.value += 1;
                Ok(CounterResponse::Value(self.value))
            }
            CounterCommand::Get => Ok(CounterResponse::Value(self.value)),
            CounterCommand::Slow => {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok(CounterResponse::Value(self.value))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Recorder {
    seen: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecorderCommand {
    Record(u32),
    Fetch,
}

impl Message for RecorderCommand {}
impl RemoteMessage for RecorderCommand {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecorderResponse {
    Items(Vec<u32>),
    Recorded,
}

impl Response for RecorderResponse {}
impl RemoteResponse for RecorderResponse {}

#[async_trait]
impl Actor for Recorder {
    type Message = RecorderCommand;
    type Response = RecorderResponse;

    fn type_tag() -> &'static str {
        "recorder"
    }
}

#[async_trait]
impl Handler<Recorder> for Recorder {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorAddr>,
        msg: RecorderCommand,
        _ctx: &mut ActorContext<Recorder>,
    ) -> Result<RecorderResponse, Error> {
        match msg {
            RecorderCommand::Record(value) => {
                self.seen.push(value);
                Ok(RecorderResponse::Recorded)
            }
            RecorderCommand::Fetch => {
                Ok(RecorderResponse::Items(self.seen.clone()))
            }
        }
    }
}

#[tokio::test]
#[traced_test]
async fn test_tcp_counter_and_pool_loss() {
    // The server calls itself "localhost", the client "127.0.0.1": they
    // do not look same-host to each other, so the link runs over TCP.
    let server_addr = remote_pool("localhost");
    let client_addr = PoolAddress::new("127.0.0.1", free_port());

    let server =
        Deployment::start(server_addr.clone(), vec![], PoolConfig::default())
            .await
            .unwrap();
    let client = Deployment::start(
        client_addr,
        vec![server_addr.clone()],
        PoolConfig::default(),
    )
    .await
    .unwrap();

    let local_ref = server
        .pool()
        .create_actor("counter", Counter { value: 0 })
        .await
        .unwrap();
    let served = server.serve(&local_ref).await;
    assert_eq!(
        served.addr(),
        &server.router().local_addr_of::<Counter>("counter")
    );

    let counter =
        client.remote_ref::<Counter>(served.addr().clone());

    for expected in 1..=3u64 {
        let response = counter.ask(CounterCommand::Inc).await.unwrap();
        assert_eq!(response, CounterResponse::Value(expected));
    }

    // A fourth ask is in flight when the serving pool dies.
    let pending = {
        let counter = counter.clone();
        tokio::spawn(async move {
            counter
                .ask_with_timeout(CounterCommand::Slow, Duration::from_secs(10))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;
    server.shutdown().await;

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(Error::ChannelClosed)));

    // Later sends re-resolve; the pool is gone for good.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let unreachable = counter.ask(CounterCommand::Get).await;
    assert!(matches!(unreachable, Err(Error::PoolUnreachable(_))));

    client.shutdown().await;
}

#[tokio::test]
async fn test_remote_create_destroy_and_watch() {
    let server_addr = remote_pool("localhost");
    let client_addr = PoolAddress::new("127.0.0.1", free_port());

    let server =
        Deployment::start(server_addr.clone(), vec![], PoolConfig::default())
            .await
            .unwrap();
    server
        .register_factory::<Counter, u64, _>(|start| Counter { value: start })
        .await;

    let client = Deployment::start(
        client_addr,
        vec![server_addr.clone()],
        PoolConfig::default(),
    )
    .await
    .unwrap();

    let counter = client
        .create_actor::<Counter, u64>(&server_addr, "c2", &5)
        .await
        .unwrap();

    assert!(counter.exists().await.unwrap());
    assert_eq!(
        counter.ask(CounterCommand::Inc).await.unwrap(),
        CounterResponse::Value(6)
    );

    // Creating it a second time collides.
    let duplicate = client
        .create_actor::<Counter, u64>(&server_addr, "c2", &0)
        .await;
    assert!(matches!(duplicate, Err(Error::Exists(_))));

    let watcher = {
        let counter = counter.clone();
        tokio::spawn(async move { counter.watch().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    counter.destroy().await.unwrap();

    let termination = watcher.await.unwrap().unwrap();
    assert_eq!(termination.id, "c2".into());
    assert_eq!(termination.reason, TerminationReason::Stopped);

    assert!(!counter.exists().await.unwrap());
    assert!(matches!(
        counter.ask(CounterCommand::Get).await,
        Err(Error::ActorNotFound(_))
    ));

    server.shutdown().await;
    client.shutdown().await;
}

#[tokio::test]
async fn test_remote_tells_preserve_send_order() {
    let server_addr = remote_pool("localhost");
    let client_addr = PoolAddress::new("127.0.0.1", free_port());

    let server =
        Deployment::start(server_addr.clone(), vec![], PoolConfig::default())
            .await
            .unwrap();
    let client = Deployment::start(
        client_addr,
        vec![server_addr.clone()],
        PoolConfig::default(),
    )
    .await
    .unwrap();

    let local_ref = server
        .pool()
        .create_actor("recorder", Recorder { seen: Vec::new() })
        .await
        .unwrap();
    let served = server.serve(&local_ref).await;
    let recorder =
        client.remote_ref::<Recorder>(served.addr().clone());

    for value in 0..50 {
        recorder.tell(RecorderCommand::Record(value)).await.unwrap();
    }
    let response = recorder.ask(RecorderCommand::Fetch).await.unwrap();
    assert_eq!(
        response,
        RecorderResponse::Items((0..50).collect::<Vec<u32>>())
    );

    server.shutdown().await;
    client.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_same_host_peers_use_the_unix_socket() {
    // Same host string on both sides, different (spoofed) process id:
    // the client must pick the server's unix socket over TCP.
    let server_addr = remote_pool("localhost");
    let client_addr = PoolAddress::new("localhost", free_port());

    let server =
        Deployment::start(server_addr.clone(), vec![], PoolConfig::default())
            .await
            .unwrap();
    assert!(server_addr.socket_path().exists());

    let client = Deployment::start(
        client_addr,
        vec![server_addr.clone()],
        PoolConfig::default(),
    )
    .await
    .unwrap();

    let local_ref = server
        .pool()
        .create_actor("counter", Counter { value: 10 })
        .await
        .unwrap();
    let served = server.serve(&local_ref).await;
    let counter =
        client.remote_ref::<Counter>(served.addr().clone());

    assert_eq!(
        counter.ask(CounterCommand::Inc).await.unwrap(),
        CounterResponse::Value(11)
    );

    server.shutdown().await;
    client.shutdown().await;
}

#[tokio::test]
async fn test_unknown_pool_is_an_addressing_error() {
    let client_addr = PoolAddress::new("127.0.0.1", free_port());
    let client =
        Deployment::start(client_addr, vec![], PoolConfig::default())
            .await
            .unwrap();

    // An address nobody registered in the deployment.
    let stranger = remote_pool("localhost");
    let addr = ActorAddr::new(stranger, "ghost".into(), "counter");
    let ghost = client.remote_ref::<Counter>(addr);

    let result = ghost.ask(CounterCommand::Get).await;
    assert!(matches!(result, Err(Error::UnknownPool(_))));

    client.shutdown().await;
}

#[tokio::test]
async fn test_version_mismatch_fails_the_connection() {
    use tokio::io::AsyncWriteExt;

    // A fake peer that speaks serializer version 2.
    let listener =
        tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut greeting = Vec::from(remote::MAGIC);
            greeting.extend_from_slice(&2u16.to_le_bytes());
            let _ = stream.write_all(&greeting).await;
            // Hold the socket open so the client reads our version.
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    });

    let result = remote::TcpChannel::connect("127.0.0.1", port).await;
    assert!(matches!(
        result,
        Err(Error::ProtocolMismatch { ours: 1, theirs: 2 })
    ));
}
