// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Transport channels
//!
//! The `channel` module provides the point-to-point transport abstraction:
//! a [`Channel`] moves envelopes between two pools, suspending `recv` until
//! a frame is available or the peer goes away. Three implementations cover
//! the three distances a peer can be at:
//!
//! - [`in_process_pair`]: both ends share the process, so envelopes are
//!   handed over a queue directly, no serialization at all;
//! - [`UnixChannel`]: same host, different process, framed over a unix
//!   domain socket;
//! - [`TcpChannel`]: different machine, framed over TCP.
//!
//! [`connect`] picks the right implementation for a peer address; the
//! router calls it once per destination pool and caches the result.
//!

use crate::{
    envelope::Envelope,
    wire::{read_frame, read_handshake, write_frame, write_handshake},
};

use actor::{Error, PoolAddress};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf},
    net::TcpStream,
    sync::{Mutex, mpsc},
};
use tracing::debug;

use std::sync::Arc;

/// Point-to-point transport moving envelopes between two pools.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Sends one envelope. Failure means the envelope may or may not have
    /// reached the peer; the runtime never retries it automatically.
    async fn send(&self, envelope: Envelope) -> Result<(), Error>;

    /// Receives the next envelope, suspending until one arrives. Fails
    /// with `ChannelClosed` once the peer is gone.
    async fn recv(&self) -> Result<Envelope, Error>;
}

/// In-process channel endpoint: a direct queue handoff, no serialization.
pub struct InProcessChannel {
    sender: mpsc::UnboundedSender<Envelope>,
    receiver: Mutex<mpsc::UnboundedReceiver<Envelope>>,
}

/// Creates a connected pair of in-process channel endpoints.
pub fn in_process_pair() -> (InProcessChannel, InProcessChannel) {
    let (tx_a, rx_a) = mpsc::unbounded_channel();
    let (tx_b, rx_b) = mpsc::unbounded_channel();
    (
        InProcessChannel {
            sender: tx_a,
            receiver: Mutex::new(rx_b),
        },
        InProcessChannel {
            sender: tx_b,
            receiver: Mutex::new(rx_a),
        },
    )
}

#[async_trait]
impl Channel for InProcessChannel {
    async fn send(&self, envelope: Envelope) -> Result<(), Error> {
        self.sender
            .send(envelope)
            .map_err(|_| Error::ChannelClosed)
    }

    async fn recv(&self) -> Result<Envelope, Error> {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await.ok_or(Error::ChannelClosed)
    }
}

/// A framed channel over any byte stream.
///
/// Both TCP and unix-socket channels are this, instantiated with their
/// stream type. The handshake has already been exchanged when a value of
/// this type exists.
pub struct StreamChannel<S> {
    reader: Mutex<ReadHalf<S>>,
    writer: Mutex<WriteHalf<S>>,
}

impl<S> StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Exchanges the version handshake on a fresh stream and wraps it.
    pub async fn handshake(stream: S) -> Result<Self, Error> {
        let (mut read_half, mut write_half) = tokio::io::split(stream);
        write_handshake(&mut write_half).await?;
        read_handshake(&mut read_half).await?;
        Ok(StreamChannel {
            reader: Mutex::new(read_half),
            writer: Mutex::new(write_half),
        })
    }
}

#[async_trait]
impl<S> Channel for StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn send(&self, envelope: Envelope) -> Result<(), Error> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, &envelope).await
    }

    async fn recv(&self) -> Result<Envelope, Error> {
        let mut reader = self.reader.lock().await;
        read_frame(&mut *reader).await
    }
}

/// Network-socket channel: framed envelopes over TCP.
pub type TcpChannel = StreamChannel<TcpStream>;

impl TcpChannel {
    /// Connects to a peer pool's TCP listener.
    pub async fn connect(host: &str, port: u16) -> Result<Self, Error> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::Send(e.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::Send(e.to_string()))?;
        debug!("Connected TCP channel to {}:{}.", host, port);
        StreamChannel::handshake(stream).await
    }
}

/// Local-socket channel: framed envelopes over a unix domain socket.
#[cfg(unix)]
pub type UnixChannel = StreamChannel<tokio::net::UnixStream>;

#[cfg(unix)]
impl UnixChannel {
    /// Connects to a peer pool's unix-socket listener.
    pub async fn connect_path(
        path: &std::path::Path,
    ) -> Result<Self, Error> {
        let stream = tokio::net::UnixStream::connect(path)
            .await
            .map_err(|e| Error::Send(e.to_string()))?;
        debug!("Connected unix channel to {}.", path.display());
        StreamChannel::handshake(stream).await
    }
}

/// Establishes a channel to a peer pool, choosing the transport by
/// distance: same host uses the pool's unix socket when it is present,
/// anything else goes over TCP.
///
/// Connection failures surface as `PoolUnreachable`; a version
/// disagreement keeps its `ProtocolMismatch` identity.
pub async fn connect(
    local: &PoolAddress,
    peer: &PoolAddress,
) -> Result<Arc<dyn Channel>, Error> {
    let map_unreachable = |err: Error, peer: &PoolAddress| match err {
        Error::ProtocolMismatch { .. } => err,
        _ => Error::PoolUnreachable(peer.clone()),
    };

    #[cfg(unix)]
    {
        let path = peer.socket_path();
        if peer.is_same_host(local) && path.exists() {
            let channel = UnixChannel::connect_path(&path)
                .await
                .map_err(|e| map_unreachable(e, peer))?;
            return Ok(Arc::new(channel));
        }
    }

    let channel = TcpChannel::connect(&peer.host, peer.port)
        .await
        .map_err(|e| map_unreachable(e, peer))?;
    Ok(Arc::new(channel))
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::envelope::Payload;

    use actor::{ActorAddr, ActorId};

    fn sample(n: u64) -> Envelope {
        Envelope::ask(
            None,
            ActorAddr::new(
                PoolAddress::with_process("localhost", 7000, 1),
                ActorId::from("bob"),
                "test",
            ),
            n,
            Payload::empty(),
        )
    }

    #[tokio::test]
    async fn test_in_process_handoff() {
        let (a, b) = in_process_pair();
        a.send(sample(1)).await.unwrap();
        a.send(sample(2)).await.unwrap();
        assert_eq!(b.recv().await.unwrap().correlation_id, 1);
        assert_eq!(b.recv().await.unwrap().correlation_id, 2);

        b.send(sample(3)).await.unwrap();
        assert_eq!(a.recv().await.unwrap().correlation_id, 3);
    }

    #[tokio::test]
    async fn test_in_process_close() {
        let (a, b) = in_process_pair();
        drop(b);
        assert_eq!(a.recv().await, Err(Error::ChannelClosed));
        assert!(a.send(sample(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_stream_channel_over_duplex() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (near, far) = tokio::join!(
            StreamChannel::handshake(client),
            StreamChannel::handshake(server)
        );
        let near = near.unwrap();
        let far = far.unwrap();

        near.send(sample(9)).await.unwrap();
        assert_eq!(far.recv().await.unwrap().correlation_id, 9);
    }
}
