// Ordering, exclusivity, backpressure and timeout tests for the actor pool

use actor::{
    Actor, ActorAddr, ActorContext, ActorPool, Error, Handler, MailboxConfig,
    Message, OverflowPolicy, PoolConfig, Response,
};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};
use tokio::sync::Notify;

fn start_pool(config: PoolConfig) -> (actor::PoolRef, CancellationToken) {
    let token = CancellationToken::new();
    let (pool, mut runner) = ActorPool::create(config, token.clone());
    tokio::spawn(async move {
        runner.run().await;
    });
    (pool, token)
}

// Records every value it is told, in arrival order.
#[derive(Debug, Clone)]
pub struct Recorder {
    seen: Vec<u32>,
}

#[derive(Debug, Clone)]
pub enum RecorderCommand {
    Record(u32),
    Fetch,
}

impl Message for RecorderCommand {}

#[derive(Debug, Clone, PartialEq)]
pub enum RecorderResponse {
    Items(Vec<u32>),
    Recorded,
}

impl Response for RecorderResponse {}

#[async_trait]
impl Actor for Recorder {
    type Message = RecorderCommand;
    type Response = RecorderResponse;
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

// Tracks how many handler invocations run at once.
#[derive(Debug, Clone)]
pub struct Overlap {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[derive(Debug, Clone)]
pub struct Step;

impl Message for Step {}

#[async_trait]
impl Actor for Overlap {
    type Message = Step;
    type Response = ();
}

#[async_trait]
impl Handler<Overlap> for Overlap {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorAddr>,
        _msg: Step,
        _ctx: &mut ActorContext<Overlap>,
    ) -> Result<(), Error> {
        let running = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

// Blocks in its handler until released.
#[derive(Debug, Clone)]
pub struct Gate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[derive(Debug, Clone)]
pub enum GateCommand {
    Wait,
    Ping,
}

impl Message for GateCommand {}

#[async_trait]
impl Actor for Gate {
    type Message = GateCommand;
    type Response = ();
}

#[async_trait]
impl Handler<Gate> for Gate {
    async fn handle_message(
        &mut self,
        _sender: Option<ActorAddr>,
        msg: GateCommand,
        _ctx: &mut ActorContext<Gate>,
    ) -> Result<(), Error> {
        match msg {
            GateCommand::Wait => {
                self.entered.notify_one();
                self.release.notified().await;
                Ok(())
            }
            GateCommand::Ping => Ok(()),
        }
    }
}

async fn busy_gate(
    pool: &actor::PoolRef,
    mailbox: MailboxConfig,
) -> (actor::ActorRef<Gate>, Arc<Notify>) {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let gate = pool
        .create_actor_with(
            "gate",
            Gate {
                entered: entered.clone(),
                release: release.clone(),
            },
            mailbox,
        )
        .await
        .unwrap();
    gate.tell(GateCommand::Wait).await.unwrap();
    entered.notified().await;
    (gate, release)
}

#[tokio::test]
async fn test_tells_arrive_in_send_order() {
    let (pool, token) = start_pool(PoolConfig::default());

    let recorder = pool
        .create_actor("recorder", Recorder { seen: Vec::new() })
        .await
        .unwrap();

    for value in 0..100 {
        recorder.tell(RecorderCommand::Record(value)).await.unwrap();
    }
    let response = recorder.ask(RecorderCommand::Fetch).await.unwrap();
    assert_eq!(
        response,
        RecorderResponse::Items((0..100).collect::<Vec<u32>>())
    );

    token.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handler_invocations_never_overlap() {
    let (pool, token) = start_pool(PoolConfig::default());

    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let overlap = pool
        .create_actor(
            "overlap",
            Overlap {
                current: current.clone(),
                peak: peak.clone(),
            },
        )
        .await
        .unwrap();

    let mut senders = Vec::new();
    for _ in 0..4 {
        let overlap = overlap.clone();
        senders.push(tokio::spawn(async move {
            for _ in 0..25 {
                overlap.tell(Step).await.unwrap();
            }
        }));
    }
    for sender in senders {
        sender.await.unwrap();
    }
    // The mailbox is FIFO, so once this ask answers every Step before it
    // has been handled.
    overlap.ask(Step).await.unwrap();

    assert_eq!(current.load(Ordering::SeqCst), 0);
    assert_eq!(peak.load(Ordering::SeqCst), 1);

    token.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_actors_run_concurrently() {
    let (pool, token) = start_pool(PoolConfig {
        worker_count: 4,
        ..PoolConfig::default()
    });

    let mut gates = Vec::new();
    let mut releases = Vec::new();
    for i in 0..2 {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let gate = pool
            .create_actor(
                &format!("gate-{}", i),
                Gate {
                    entered: entered.clone(),
                    release: release.clone(),
                },
            )
            .await
            .unwrap();
        gates.push((gate, entered));
        releases.push(release);
    }

    // Both handlers must be in flight at the same time: the second
    // `entered` can only fire while the first handler is still parked on
    // its gate.
    for (gate, _) in &gates {
        gate.tell(GateCommand::Wait).await.unwrap();
    }
    tokio::time::timeout(Duration::from_secs(5), async {
        for (_, entered) in &gates {
            entered.notified().await;
        }
    })
    .await
    .expect("handlers did not overlap");

    for release in &releases {
        release.notify_one();
    }
    token.cancel();
}

#[tokio::test]
async fn test_bounded_mailbox_rejects_when_full() {
    let (pool, token) = start_pool(PoolConfig::default());
    let (gate, release) = busy_gate(
        &pool,
        MailboxConfig::bounded(1, OverflowPolicy::Reject),
    )
    .await;

    // The handler is busy; one envelope fits the mailbox, the next one
    // must be rejected, never silently dropped or overwritten.
    gate.tell(GateCommand::Ping).await.unwrap();
    let overflow = gate.tell(GateCommand::Ping).await;
    assert!(matches!(overflow, Err(Error::MailboxFull(_))));

    release.notify_one();
    token.cancel();
}

#[tokio::test]
async fn test_bounded_mailbox_blocks_until_space_frees() {
    let (pool, token) = start_pool(PoolConfig::default());
    let (gate, release) = busy_gate(
        &pool,
        MailboxConfig::bounded(1, OverflowPolicy::Block),
    )
    .await;

    gate.tell(GateCommand::Ping).await.unwrap();

    let blocked = {
        let gate = gate.clone();
        tokio::spawn(async move { gate.tell(GateCommand::Ping).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!blocked.is_finished());

    // Releasing the gate drains the queue and unblocks the sender.
    release.notify_one();
    blocked.await.unwrap().unwrap();

    token.cancel();
}

#[tokio::test]
async fn test_ask_timeout_and_late_reply_discard() {
    let (pool, token) = start_pool(PoolConfig::default());
    let (gate, release) = busy_gate(&pool, MailboxConfig::unbounded()).await;

    // This ask will never be answered in time.
    let started = Instant::now();
    let timed_out = gate
        .ask_with_timeout(GateCommand::Ping, Duration::from_millis(100))
        .await;
    assert!(matches!(timed_out, Err(Error::Timeout)));
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(started.elapsed() < Duration::from_secs(2));

    // The receiver eventually handles the message and produces a late
    // reply; it must vanish without affecting an independent ask.
    release.notify_one();
    let response = gate
        .ask_with_timeout(GateCommand::Ping, Duration::from_secs(5))
        .await;
    assert!(response.is_ok());

    token.cancel();
}
