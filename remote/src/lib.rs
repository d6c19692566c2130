// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Troupe Remoting
//!
//! Location transparency for the Troupe actor runtime: the pieces that let
//! a reference work the same whether its actor runs a function call away
//! or a network hop away.
//!
//! - [`Envelope`]s give messages a wire shape: sender and target
//!   references, a kind (`tell`/`ask`/`reply`/`error`/`control`), a
//!   correlation id and a payload whose large binary buffers travel
//!   out-of-band.
//! - [`Channel`]s move envelopes point to point, over one of three
//!   transports picked by peer distance: in-process handoff, unix socket,
//!   TCP. Stream transports frame with a length prefix and refuse peers
//!   speaking a different serializer version.
//! - The [`Router`] owns the address table, resolves references to
//!   channels (collapsing concurrent first connects), parks pending asks
//!   by correlation id and fails them with `ChannelClosed` when a peer
//!   goes away.
//! - The [`PoolServer`] is the receiving end: it dispatches incoming
//!   envelopes into the local pool through type-erased closures and
//!   answers control requests (remote create, destroy, contains, watch).
//! - A [`Deployment`] ties one node together with an explicit lifecycle.
//!
//! The typed entry point is [`RemoteRef`]: a clone of the same `tell`/
//! `ask` surface actors have locally, backed by whatever transport the
//! router resolves.
//!

mod channel;
mod deployment;
mod envelope;
mod router;
mod server;
mod wire;

//
// Envelope and serializer
//

/// Runtime-level requests carried by control envelopes.
pub use envelope::Control;

/// Replies to control requests.
pub use envelope::ControlReply;

/// One message on the wire: references, kind, correlation id, payload.
pub use envelope::Envelope;

/// The kind of an envelope.
pub use envelope::MessageKind;

/// Serialized payload with out-of-band binary buffers.
pub use envelope::Payload;

/// Marker trait for messages that can cross pool boundaries.
pub use envelope::RemoteMessage;

/// Marker trait for responses that can cross pool boundaries.
pub use envelope::RemoteResponse;

/// Addressing metadata of a request, for building its reply.
pub use envelope::RequestMeta;

/// Encodes a message, detaching its out-of-band buffers.
pub use envelope::pack_message;

/// Encodes a response, detaching its out-of-band buffers.
pub use envelope::pack_response;

/// Decodes a message, reattaching out-of-band buffers.
pub use envelope::unpack_message;

/// Decodes a response, reattaching out-of-band buffers.
pub use envelope::unpack_response;

//
// Transport channels
//

/// Point-to-point transport contract.
pub use channel::Channel;

/// In-process channel endpoint.
pub use channel::InProcessChannel;

/// Framed channel over an arbitrary byte stream.
pub use channel::StreamChannel;

/// Network-socket channel over TCP.
pub use channel::TcpChannel;

/// Local-socket channel over a unix domain socket.
#[cfg(unix)]
pub use channel::UnixChannel;

/// Establishes a channel to a peer pool, choosing the transport by
/// distance.
pub use channel::connect;

/// Creates a connected pair of in-process channel endpoints.
pub use channel::in_process_pair;

//
// Wire format
//

/// Handshake magic bytes.
pub use wire::MAGIC;

/// Maximum serialized envelope size.
pub use wire::MAX_ENVELOPE_SIZE;

/// Maximum out-of-band segment size.
pub use wire::MAX_SEGMENT_SIZE;

/// Serializer version spoken by this build.
pub use wire::WIRE_VERSION;

/// Encodes a whole frame into one buffer.
pub use wire::encode_frame;

/// Reads one frame from a stream.
pub use wire::read_frame;

/// Reads and validates the peer's handshake.
pub use wire::read_handshake;

/// Decodes one frame from a possibly partial buffer.
pub use wire::try_decode_frame;

/// Writes one frame to a stream.
pub use wire::write_frame;

/// Sends our side of the handshake.
pub use wire::write_handshake;

//
// Routing
//

/// Typed, location-transparent reference to an actor.
pub use router::RemoteRef;

/// The deployment-wide message router.
pub use router::Router;

//
// Pool server
//

/// Dispatches incoming envelopes into the local pool.
pub use server::Dispatcher;

/// The listening side of a pool.
pub use server::PoolServer;

//
// Deployment
//

/// Adapter contract for external orchestration backends hosting pools.
pub use deployment::Backend;

/// One running node of a pool group.
pub use deployment::Deployment;
