//! Wire format for framed envelopes.
//!
//! Frame layout: `[length:4][envelope:N][count:2][seg_len:4][seg:M]...`
//!
//! - **length**: Size of the serialized envelope (little-endian u32)
//! - **envelope**: bincode of the [`Envelope`] without its buffers
//! - **count**: Number of out-of-band buffer segments (little-endian u16)
//! - **segments**: Each raw buffer, length-prefixed, appended verbatim
//!
//! Connections start with a handshake `[magic:4][version:2]` sent by both
//! peers; disagreeing serializer versions fail the connection with
//! `ProtocolMismatch` before any frame is decoded.

use crate::envelope::Envelope;

use actor::Error;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Serializer version spoken by this build.
pub const WIRE_VERSION: u16 = 1;

/// Handshake magic.
pub const MAGIC: [u8; 4] = *b"TRPE";

/// Maximum size of a serialized envelope.
///
/// Larger frames are rejected to prevent memory exhaustion from a broken
/// or hostile peer. Bulk data belongs in buffer segments, not the body.
pub const MAX_ENVELOPE_SIZE: usize = 16 * 1024 * 1024;

/// Maximum size of one out-of-band buffer segment.
pub const MAX_SEGMENT_SIZE: usize = 256 * 1024 * 1024;

/// Encodes a whole frame into one buffer.
///
/// Used by tests and the in-memory path; the stream transports write the
/// parts directly with [`write_frame`] to avoid assembling a copy.
pub fn encode_frame(envelope: &Envelope) -> Result<Vec<u8>, Error> {
    let body = envelope.to_bytes()?;
    if body.len() > MAX_ENVELOPE_SIZE {
        return Err(Error::Serialization("Envelope".to_owned()));
    }
    let mut out = Vec::with_capacity(4 + body.len() + 2);
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out.extend_from_slice(
        &(envelope.payload.buffers.len() as u16).to_le_bytes(),
    );
    for segment in &envelope.payload.buffers {
        out.extend_from_slice(&(segment.len() as u32).to_le_bytes());
        out.extend_from_slice(segment);
    }
    Ok(out)
}

/// Tries to decode one frame from a buffer that may hold partial data.
///
/// Returns `Ok(None)` when more bytes are needed (not an error), or the
/// decoded envelope with its reattached buffers plus the number of bytes
/// consumed.
pub fn try_decode_frame(
    data: &[u8],
) -> Result<Option<(Envelope, usize)>, Error> {
    if data.len() < 4 {
        return Ok(None);
    }
    let body_len =
        u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if body_len > MAX_ENVELOPE_SIZE {
        return Err(Error::Serialization("Envelope".to_owned()));
    }
    let mut offset = 4 + body_len;
    if data.len() < offset + 2 {
        return Ok(None);
    }
    let mut envelope = Envelope::from_bytes(&data[4..offset])?;
    let count =
        u16::from_le_bytes([data[offset], data[offset + 1]]) as usize;
    offset += 2;

    let mut buffers = Vec::with_capacity(count);
    for _ in 0..count {
        if data.len() < offset + 4 {
            return Ok(None);
        }
        let seg_len = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        if seg_len > MAX_SEGMENT_SIZE {
            return Err(Error::Serialization("Payload".to_owned()));
        }
        offset += 4;
        if data.len() < offset + seg_len {
            return Ok(None);
        }
        buffers.push(Bytes::copy_from_slice(&data[offset..offset + seg_len]));
        offset += seg_len;
    }
    envelope.payload.buffers = buffers;
    Ok(Some((envelope, offset)))
}

/// Writes one frame to a stream.
///
/// Buffer segments are written straight from their backing storage; they
/// are never copied into the envelope body.
pub async fn write_frame<W>(
    writer: &mut W,
    envelope: &Envelope,
) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    let body = envelope.to_bytes()?;
    if body.len() > MAX_ENVELOPE_SIZE {
        return Err(Error::Serialization("Envelope".to_owned()));
    }
    writer
        .write_all(&(body.len() as u32).to_le_bytes())
        .await
        .map_err(|_| Error::ChannelClosed)?;
    writer
        .write_all(&body)
        .await
        .map_err(|_| Error::ChannelClosed)?;
    writer
        .write_all(&(envelope.payload.buffers.len() as u16).to_le_bytes())
        .await
        .map_err(|_| Error::ChannelClosed)?;
    for segment in &envelope.payload.buffers {
        writer
            .write_all(&(segment.len() as u32).to_le_bytes())
            .await
            .map_err(|_| Error::ChannelClosed)?;
        writer
            .write_all(segment)
            .await
            .map_err(|_| Error::ChannelClosed)?;
    }
    writer.flush().await.map_err(|_| Error::ChannelClosed)?;
    Ok(())
}

/// Reads one frame from a stream, suspending until it is complete.
///
/// Any read failure, including a clean peer close, surfaces as
/// `ChannelClosed`.
pub async fn read_frame<R>(reader: &mut R) -> Result<Envelope, Error>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|_| Error::ChannelClosed)?;
    let body_len = u32::from_le_bytes(len_buf) as usize;
    if body_len > MAX_ENVELOPE_SIZE {
        return Err(Error::Serialization("Envelope".to_owned()));
    }
    let mut body = vec![0u8; body_len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|_| Error::ChannelClosed)?;
    let mut envelope = Envelope::from_bytes(&body)?;

    let mut count_buf = [0u8; 2];
    reader
        .read_exact(&mut count_buf)
        .await
        .map_err(|_| Error::ChannelClosed)?;
    let count = u16::from_le_bytes(count_buf) as usize;

    let mut buffers = Vec::with_capacity(count);
    for _ in 0..count {
        let mut seg_len_buf = [0u8; 4];
        reader
            .read_exact(&mut seg_len_buf)
            .await
            .map_err(|_| Error::ChannelClosed)?;
        let seg_len = u32::from_le_bytes(seg_len_buf) as usize;
        if seg_len > MAX_SEGMENT_SIZE {
            return Err(Error::Serialization("Payload".to_owned()));
        }
        let mut segment = vec![0u8; seg_len];
        reader
            .read_exact(&mut segment)
            .await
            .map_err(|_| Error::ChannelClosed)?;
        buffers.push(Bytes::from(segment));
    }
    envelope.payload.buffers = buffers;
    Ok(envelope)
}

/// Sends our side of the version handshake.
pub async fn write_handshake<W>(writer: &mut W) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(&MAGIC)
        .await
        .map_err(|_| Error::ChannelClosed)?;
    writer
        .write_all(&WIRE_VERSION.to_le_bytes())
        .await
        .map_err(|_| Error::ChannelClosed)?;
    writer.flush().await.map_err(|_| Error::ChannelClosed)?;
    Ok(())
}

/// Reads and validates the peer's side of the version handshake.
///
/// A version disagreement fails with `ProtocolMismatch`; no partial decode
/// is attempted afterwards.
pub async fn read_handshake<R>(reader: &mut R) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
{
    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .await
        .map_err(|_| Error::ChannelClosed)?;
    if magic != MAGIC {
        return Err(Error::Functional(
            "handshake failed: unexpected magic".to_owned(),
        ));
    }
    let mut version = [0u8; 2];
    reader
        .read_exact(&mut version)
        .await
        .map_err(|_| Error::ChannelClosed)?;
    let theirs = u16::from_le_bytes(version);
    if theirs != WIRE_VERSION {
        return Err(Error::ProtocolMismatch {
            ours: WIRE_VERSION,
            theirs,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::envelope::Payload;

    use actor::{ActorAddr, ActorId, PoolAddress};

    fn envelope_with(buffers: Vec<Bytes>) -> Envelope {
        let mut payload = Payload::encode(&"ping".to_owned()).unwrap();
        payload.buffers = buffers;
        Envelope::ask(
            None,
            ActorAddr::new(
                PoolAddress::with_process("localhost", 7000, 1),
                ActorId::from("bob"),
                "test",
            ),
            7,
            payload,
        )
    }

    #[test]
    fn test_frame_round_trip() {
        let env = envelope_with(vec![
            Bytes::from_static(b"first segment"),
            Bytes::from_static(b"second"),
        ]);
        let frame = encode_frame(&env).unwrap();
        let (decoded, consumed) =
            try_decode_frame(&frame).unwrap().expect("complete frame");
        assert_eq!(consumed, frame.len());
        assert_eq!(decoded, env);
        assert_eq!(decoded.payload.buffers.len(), 2);
    }

    #[test]
    fn test_partial_frames_need_more_data() {
        let env = envelope_with(vec![Bytes::from_static(b"segment")]);
        let frame = encode_frame(&env).unwrap();

        // Every strict prefix is incomplete, never an error.
        for cut in [0, 3, 10, frame.len() - 1] {
            assert!(try_decode_frame(&frame[..cut]).unwrap().is_none());
        }
    }

    #[test]
    fn test_trailing_data_is_not_consumed() {
        let env = envelope_with(vec![]);
        let mut frame = encode_frame(&env).unwrap();
        let frame_len = frame.len();
        frame.extend_from_slice(b"next frame starts here");

        let (decoded, consumed) =
            try_decode_frame(&frame).unwrap().expect("complete frame");
        assert_eq!(decoded, env);
        assert_eq!(consumed, frame_len);
    }

    #[test]
    fn test_oversized_envelope_is_rejected() {
        let mut data = Vec::new();
        data.extend_from_slice(
            &((MAX_ENVELOPE_SIZE + 1) as u32).to_le_bytes(),
        );
        data.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            try_decode_frame(&data),
            Err(Error::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_round_trip() {
        let env = envelope_with(vec![Bytes::from(vec![0x5A; 4096])]);
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (mut read_half, _keep) = tokio::io::split(server);
        let (_, mut write_half) = tokio::io::split(client);

        write_frame(&mut write_half, &env).await.unwrap();
        let decoded = read_frame(&mut read_half).await.unwrap();
        assert_eq!(decoded, env);
    }

    #[tokio::test]
    async fn test_handshake_version_mismatch() {
        let (client, server) = tokio::io::duplex(1024);
        let (mut read_half, _keep) = tokio::io::split(server);
        let (_, mut write_half) = tokio::io::split(client);

        // A peer speaking version 2.
        write_half.write_all(&MAGIC).await.unwrap();
        write_half.write_all(&2u16.to_le_bytes()).await.unwrap();

        let result = read_handshake(&mut read_half).await;
        assert_eq!(
            result,
            Err(Error::ProtocolMismatch { ours: 1, theirs: 2 })
        );
    }

    #[tokio::test]
    async fn test_handshake_bad_magic() {
        let (client, server) = tokio::io::duplex(1024);
        let (mut read_half, _keep) = tokio::io::split(server);
        let (_, mut write_half) = tokio::io::split(client);

        write_half.write_all(b"nope").await.unwrap();
        write_half.write_all(&1u16.to_le_bytes()).await.unwrap();

        assert!(read_handshake(&mut read_half).await.is_err());
    }
}
