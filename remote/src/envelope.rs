// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Message envelope and serializer
//!
//! The `envelope` module defines the wire representation of a message: the
//! sending and receiving references, the message kind, a correlation id
//! linking an ask to its eventual reply, and the payload. Envelopes are
//! immutable once sent and serialize deterministically with `bincode`.
//!
//! Large binary buffers are carried by reference next to the payload body,
//! never folded into it: the framing layer writes them out-of-band so a
//! payload wrapping gigabytes of `Bytes` is serialized without a second
//! copy.
//!

use actor::{ActorAddr, ActorId, Error, Message, Response, Termination};

use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// The kind of an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Fire-and-forget message; no reply expected.
    Tell,
    /// Request expecting a correlated `Reply` or `Error`.
    Ask,
    /// Successful response to an `Ask` or `Control` request.
    Reply,
    /// Failure response to an `Ask` or `Control` request; the payload is
    /// the serialized [`Error`].
    Error,
    /// Runtime-level request: create/destroy/contains/watch.
    Control,
}

/// Serialized payload of an envelope.
///
/// `body` is the bincode encoding of the user value. `buffers` are raw
/// binary segments referenced by the value; they travel out-of-band in the
/// transport frame and are reattached on decode, so they are skipped here.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Encoded body.
    pub body: Vec<u8>,
    /// Out-of-band binary segments.
    #[serde(skip)]
    pub buffers: Vec<Bytes>,
}

impl Payload {
    /// An empty payload.
    pub fn empty() -> Self {
        Payload::default()
    }

    /// Encodes a serde value into a payload with no out-of-band buffers.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, Error> {
        let body = bincode::serialize(value).map_err(|_| {
            Error::Serialization(std::any::type_name::<T>().to_owned())
        })?;
        Ok(Payload {
            body,
            buffers: Vec::new(),
        })
    }

    /// Decodes the payload body as a serde value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, Error> {
        bincode::deserialize(&self.body).map_err(|_| {
            Error::Serialization(std::any::type_name::<T>().to_owned())
        })
    }
}

/// Marker trait for messages that can cross pool boundaries.
///
/// Next to the serde bound, implementors may detach large binary buffers
/// before encoding and reattach them after decoding, so the buffers ride
/// out-of-band in the frame instead of being copied through the serializer.
/// The default hooks carry no buffers:
///
/// ```ignore
/// impl RemoteMessage for MyCommand {}
/// ```
pub trait RemoteMessage: Message + Serialize + DeserializeOwned {
    /// Detaches the out-of-band buffers before encoding.
    fn take_buffers(&mut self) -> Vec<Bytes> {
        Vec::new()
    }

    /// Reattaches the out-of-band buffers after decoding.
    fn put_buffers(&mut self, _buffers: Vec<Bytes>) {}
}

/// Marker trait for ask responses that can cross pool boundaries.
///
/// Same contract as [`RemoteMessage`], for the reply direction.
pub trait RemoteResponse: Response + Serialize + DeserializeOwned {
    /// Detaches the out-of-band buffers before encoding.
    fn take_buffers(&mut self) -> Vec<Bytes> {
        Vec::new()
    }

    /// Reattaches the out-of-band buffers after decoding.
    fn put_buffers(&mut self, _buffers: Vec<Bytes>) {}
}

impl RemoteMessage for () {}
impl RemoteResponse for () {}
impl RemoteResponse for bool {}
impl RemoteResponse for u32 {}
impl RemoteResponse for u64 {}
impl RemoteResponse for usize {}
impl RemoteResponse for i32 {}
impl RemoteResponse for i64 {}
impl RemoteResponse for String {}

/// Encodes a message, detaching its out-of-band buffers.
pub fn pack_message<M: RemoteMessage>(mut msg: M) -> Result<Payload, Error> {
    let buffers = msg.take_buffers();
    let mut payload = Payload::encode(&msg)?;
    payload.buffers = buffers;
    Ok(payload)
}

/// Decodes a message, reattaching the frame's out-of-band buffers.
pub fn unpack_message<M: RemoteMessage>(payload: &Payload) -> Result<M, Error> {
    let mut msg: M = payload.decode()?;
    if !payload.buffers.is_empty() {
        msg.put_buffers(payload.buffers.clone());
    }
    Ok(msg)
}

/// Encodes a response, detaching its out-of-band buffers.
pub fn pack_response<R: RemoteResponse>(mut resp: R) -> Result<Payload, Error> {
    let buffers = resp.take_buffers();
    let mut payload = Payload::encode(&resp)?;
    payload.buffers = buffers;
    Ok(payload)
}

/// Decodes a response, reattaching the frame's out-of-band buffers.
pub fn unpack_response<R: RemoteResponse>(
    payload: &Payload,
) -> Result<R, Error> {
    let mut resp: R = payload.decode()?;
    if !payload.buffers.is_empty() {
        resp.put_buffers(payload.buffers.clone());
    }
    Ok(resp)
}

/// Runtime-level requests carried by `Control` envelopes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Control {
    /// Create an actor on the target pool from a registered factory.
    Create {
        /// Id of the actor to create.
        id: ActorId,
        /// Type tag matching a registered factory.
        type_tag: String,
        /// Encoded construction arguments, passed to the factory verbatim.
        args: Vec<u8>,
    },
    /// Destroy an actor on the target pool.
    Destroy {
        /// Id of the actor to destroy.
        id: ActorId,
    },
    /// Ask whether the target pool currently hosts this actor.
    Contains {
        /// Id of the actor to look up.
        id: ActorId,
    },
    /// Subscribe to the actor's terminal event; the reply arrives when the
    /// actor stops.
    Watch {
        /// Id of the actor to watch.
        id: ActorId,
    },
}

/// Replies to `Control` requests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ControlReply {
    /// The actor was created; here is its reference.
    Created(ActorAddr),
    /// The actor was destroyed.
    Destroyed,
    /// Whether the pool hosts the actor.
    Contains(bool),
    /// The watched actor terminated.
    Terminated(Termination),
}

/// One message on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Reference of the sending actor, when the sender is an actor.
    pub sender: Option<ActorAddr>,
    /// Reference of the receiving actor.
    pub target: ActorAddr,
    /// What this envelope is.
    pub kind: MessageKind,
    /// Links an `Ask`/`Control` to its `Reply`/`Error`; 0 for tells.
    pub correlation_id: u64,
    /// The payload.
    pub payload: Payload,
}

impl Envelope {
    /// A fire-and-forget envelope.
    pub fn tell(
        sender: Option<ActorAddr>,
        target: ActorAddr,
        payload: Payload,
    ) -> Self {
        Envelope {
            sender,
            target,
            kind: MessageKind::Tell,
            correlation_id: 0,
            payload,
        }
    }

    /// A request envelope awaiting a correlated reply.
    pub fn ask(
        sender: Option<ActorAddr>,
        target: ActorAddr,
        correlation_id: u64,
        payload: Payload,
    ) -> Self {
        Envelope {
            sender,
            target,
            kind: MessageKind::Ask,
            correlation_id,
            payload,
        }
    }

    /// A control envelope addressed to a pool.
    pub fn control(
        target: ActorAddr,
        correlation_id: u64,
        control: &Control,
    ) -> Result<Self, Error> {
        Ok(Envelope {
            sender: None,
            target,
            kind: MessageKind::Control,
            correlation_id,
            payload: Payload::encode(control)?,
        })
    }

    /// Serializes the envelope. Out-of-band buffers are not included; the
    /// framing layer appends them to the frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        bincode::serialize(self)
            .map_err(|_| Error::Serialization("Envelope".to_owned()))
    }

    /// Deserializes an envelope, without its out-of-band buffers.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        bincode::deserialize(bytes)
            .map_err(|_| Error::Serialization("Envelope".to_owned()))
    }
}

/// Addressing metadata of a request, kept around for building its reply
/// after the request envelope itself has been consumed by dispatch.
#[derive(Clone, Debug)]
pub struct RequestMeta {
    /// Correlation id of the request.
    pub correlation_id: u64,
    /// Sender of the request, if it was an actor.
    pub sender: Option<ActorAddr>,
    /// Target of the request.
    pub target: ActorAddr,
}

impl RequestMeta {
    /// Captures the metadata of a request envelope.
    pub fn of(envelope: &Envelope) -> Self {
        RequestMeta {
            correlation_id: envelope.correlation_id,
            sender: envelope.sender.clone(),
            target: envelope.target.clone(),
        }
    }

    /// Builds the successful reply to this request.
    ///
    /// Replies are routed by correlation id; the target field mirrors the
    /// request's sender when one was given.
    pub fn reply(&self, payload: Payload) -> Envelope {
        Envelope {
            sender: Some(self.target.clone()),
            target: self
                .sender
                .clone()
                .unwrap_or_else(|| self.target.clone()),
            kind: MessageKind::Reply,
            correlation_id: self.correlation_id,
            payload,
        }
    }

    /// Builds the failure reply to this request.
    pub fn error(&self, error: &Error) -> Envelope {
        let payload = Payload::encode(error).unwrap_or_default();
        Envelope {
            sender: Some(self.target.clone()),
            target: self
                .sender
                .clone()
                .unwrap_or_else(|| self.target.clone()),
            kind: MessageKind::Error,
            correlation_id: self.correlation_id,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use actor::PoolAddress;

    fn addr(name: &str) -> ActorAddr {
        ActorAddr::new(
            PoolAddress::with_process("localhost", 7000, 1),
            ActorId::from(name),
            "test",
        )
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Nested {
        items: Vec<(String, i64)>,
        flag: bool,
    }

    #[test]
    fn test_envelope_round_trip() {
        let payload = Payload::encode(&Nested {
            items: vec![("a".into(), 1), ("b".into(), -2)],
            flag: true,
        })
        .unwrap();
        let env = Envelope::ask(Some(addr("alice")), addr("bob"), 42, payload);

        let bytes = env.to_bytes().unwrap();
        let decoded = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(env, decoded);
        let nested: Nested = decoded.payload.decode().unwrap();
        assert_eq!(nested.items.len(), 2);
        assert!(nested.flag);
    }

    #[test]
    fn test_buffers_stay_out_of_band() {
        let mut payload = Payload::encode(&7u64).unwrap();
        let body_only = Envelope::tell(None, addr("bob"), payload.clone())
            .to_bytes()
            .unwrap();

        payload.buffers = vec![Bytes::from(vec![0xAB; 1 << 20])];
        let with_buffers = Envelope::tell(None, addr("bob"), payload)
            .to_bytes()
            .unwrap();

        // A megabyte of attached buffer must not grow the envelope bytes.
        assert_eq!(body_only.len(), with_buffers.len());
    }

    #[test]
    fn test_decode_mismatch_is_serialization_error() {
        let payload = Payload::encode(&"text".to_owned()).unwrap();
        let result: Result<Nested, Error> = payload.decode();
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[test]
    fn test_error_reply_carries_the_error() {
        let env = Envelope::ask(None, addr("bob"), 9, Payload::empty());
        let meta = RequestMeta::of(&env);
        let failure = Error::ActorNotFound(ActorId::from("bob"));
        let reply = meta.error(&failure);
        assert_eq!(reply.kind, MessageKind::Error);
        assert_eq!(reply.correlation_id, 9);
        let decoded: Error = reply.payload.decode().unwrap();
        assert_eq!(decoded, failure);
    }

    #[test]
    fn test_control_round_trip() {
        let control = Control::Create {
            id: ActorId::from("worker"),
            type_tag: "demo::Worker".into(),
            args: vec![1, 2, 3],
        };
        let env = Envelope::control(addr("worker"), 3, &control).unwrap();
        let decoded: Control = env.payload.decode().unwrap();
        assert_eq!(decoded, control);
    }
}
