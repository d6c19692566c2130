

//! Core library for the Troupe runtime.
//! Provides the foundational components for building actor-based applications:
//! the actor pool core (typed actors, mailboxes, supervision) and the remoting
//! layer (envelopes, channels, routing) that makes references work the same
//! across process and machine boundaries.

pub use actor::{
    Actor, ActorAddr, ActorContext, ActorId, ActorPool, ActorRef,
    Error as ActorError, ExponentialBackoffStrategy, FixedIntervalStrategy,
    Handler, MailboxConfig, Message, NoIntervalStrategy, OverflowPolicy,
    PoolAddress, PoolConfig, PoolEvent, PoolRef, PoolRunner, ReplyHandle,
    Response, RestartPolicy, RetryStrategy, Termination, TerminationReason,
    default_worker_count,
};

pub use remote::{
    Backend, Channel, Control, ControlReply, Deployment, Dispatcher,
    Envelope, InProcessChannel, MessageKind, Payload, PoolServer, RemoteMessage,
    RemoteRef, RemoteResponse, Router, StreamChannel, TcpChannel,
    WIRE_VERSION, connect, in_process_pair,
};

#[cfg(unix)]
pub use remote::UnixChannel;
