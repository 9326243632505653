//! # Message Framing
//!
//! Every IPC message is one *frame*: an 8-byte header (sender id, message
//! kind) followed by a variable-length payload whose shape depends on the
//! kind. Frames are the only thing that ever crosses a [`crate::channel`]
//! boundary, and one OS-level connection carries exactly one frame (see
//! `channel.rs` for why that lets us skip a length prefix).
//!
//! Three payload shapes are supported, matching the three framings a
//! session worker's protocol needs:
//! - empty (acks, bare requests)
//! - a single `i32` value (the fork response's child pid)
//! - an arbitrary byte blob (prompts, user input, model output)
//!
//! All integers are encoded in native byte order. The system targets a
//! single host, so wire-level cross-architecture compatibility is
//! explicitly not a goal.

use anyhow::{bail, Result};

/// Discriminant for the kind of message carried by a frame.
///
/// Stable within a build; never serialized across process boundaries other
/// than as this crate's own IPC wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MessageKind {
    ForkRequest = 0,
    ForkResponse = 1,
    KillRequest = 2,
    KillResponse = 3,
    InitRequest = 4,
    InitResponse = 5,
    SubmitInputRequest = 6,
    SubmitInputResponse = 7,
    StopRequest = 8,
    StopResponse = 9,
    ReleaseOutputRequest = 10,
    ReleaseOutputResponse = 11,
    NotifyWhenReadyRequest = 12,
    Ready = 13,
}

impl MessageKind {
    fn from_i32(value: i32) -> Result<Self> {
        use MessageKind::*;
        Ok(match value {
            0 => ForkRequest,
            1 => ForkResponse,
            2 => KillRequest,
            3 => KillResponse,
            4 => InitRequest,
            5 => InitResponse,
            6 => SubmitInputRequest,
            7 => SubmitInputResponse,
            8 => StopRequest,
            9 => StopResponse,
            10 => ReleaseOutputRequest,
            11 => ReleaseOutputResponse,
            12 => NotifyWhenReadyRequest,
            13 => Ready,
            other => bail!("unknown message kind {other}"),
        })
    }
}

/// Payload of a frame, tagged by how it was constructed.
///
/// `Value` is only ever used for the fork response (the new child's pid),
/// but is kept generic over `i32` rather than hard-coded to that one use
/// site, since spec.md describes it as "a caller-chosen fixed-size type."
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Empty,
    Value(i32),
    Blob(Vec<u8>),
}

/// One atomic IPC message: sender id, kind, and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sender_id: i32,
    pub kind: MessageKind,
    pub payload: Payload,
}

const HEADER_LEN: usize = 8;

impl Frame {
    pub fn empty(sender_id: i32, kind: MessageKind) -> Self {
        Self { sender_id, kind, payload: Payload::Empty }
    }

    pub fn value(sender_id: i32, kind: MessageKind, value: i32) -> Self {
        Self { sender_id, kind, payload: Payload::Value(value) }
    }

    pub fn blob(sender_id: i32, kind: MessageKind, bytes: Vec<u8>) -> Self {
        Self { sender_id, kind, payload: Payload::Blob(bytes) }
    }

    /// Interprets the payload as a blob, panicking on shape mismatch is
    /// avoided: callers that expect a blob get an empty slice back for the
    /// `Empty`/`Value` cases, which never happens for well-formed traffic
    /// since each `MessageKind` always carries the same payload shape.
    pub fn blob_bytes(&self) -> &[u8] {
        match &self.payload {
            Payload::Blob(bytes) => bytes,
            _ => &[],
        }
    }

    pub fn value_i32(&self) -> Option<i32> {
        match self.payload {
            Payload::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Serializes this frame to its wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let extra_len = match &self.payload {
            Payload::Empty => 0,
            Payload::Value(_) => 4,
            Payload::Blob(bytes) => bytes.len(),
        };

        let mut buf = Vec::with_capacity(HEADER_LEN + extra_len);
        buf.extend_from_slice(&self.sender_id.to_ne_bytes());
        buf.extend_from_slice(&(self.kind as i32).to_ne_bytes());

        match &self.payload {
            Payload::Empty => {}
            Payload::Value(v) => buf.extend_from_slice(&v.to_ne_bytes()),
            Payload::Blob(bytes) => buf.extend_from_slice(bytes),
        }

        buf
    }

    /// Reconstructs a frame from bytes read off a channel.
    ///
    /// The payload is decoded as a `Blob` regardless of the original
    /// framing, since the wire format alone cannot distinguish "value" from
    /// "blob of the same length" — callers that expect a fixed-size value
    /// (the fork response) use [`Frame::decode_value`] instead.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            bail!("frame too short: {} bytes", data.len());
        }

        let sender_id = i32::from_ne_bytes(data[0..4].try_into().unwrap());
        let kind = MessageKind::from_i32(i32::from_ne_bytes(data[4..8].try_into().unwrap()))?;
        let payload = data[HEADER_LEN..].to_vec();

        let payload = if payload.is_empty() { Payload::Empty } else { Payload::Blob(payload) };

        Ok(Self { sender_id, kind, payload })
    }

    /// Reconstructs a frame whose payload is known to be a fixed `i32`
    /// value (the fork response).
    pub fn decode_value(data: &[u8]) -> Result<Self> {
        if data.len() != HEADER_LEN + 4 {
            bail!("value frame has wrong size: {} bytes", data.len());
        }

        let sender_id = i32::from_ne_bytes(data[0..4].try_into().unwrap());
        let kind = MessageKind::from_i32(i32::from_ne_bytes(data[4..8].try_into().unwrap()))?;
        let value = i32::from_ne_bytes(data[HEADER_LEN..HEADER_LEN + 4].try_into().unwrap());

        Ok(Self { sender_id, kind, payload: Payload::Value(value) })
    }
}

/// Sentinel returned in a fork response when the worker was busy.
///
/// Negative, like handler ids, so an implementation must not confuse it
/// with one — spec.md's open question on this exact ambiguity is resolved
/// by only ever returning this one fixed constant, never another negative
/// value, in the busy path.
pub const FORK_BUSY_SENTINEL: i32 = -1;

/// Builds the release-output response payload: a `has_more` flag byte
/// followed by the accumulated output bytes.
pub fn encode_release_output(sender_id: i32, data: &[u8], has_more: bool) -> Frame {
    let mut payload = Vec::with_capacity(1 + data.len());
    payload.push(has_more as u8);
    payload.extend_from_slice(data);
    Frame::blob(sender_id, MessageKind::ReleaseOutputResponse, payload)
}

/// Splits a release-output response's payload back into `(has_more, data)`.
pub fn decode_release_output(frame: &Frame) -> Result<(bool, &[u8])> {
    let bytes = frame.blob_bytes();
    if bytes.is_empty() {
        bail!("release-output payload missing has_more flag");
    }
    Ok((bytes[0] != 0, &bytes[1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_frame_round_trips() {
        let frame = Frame::empty(-3, MessageKind::KillRequest);
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn blob_frame_round_trips() {
        let frame = Frame::blob(42, MessageKind::InitRequest, b"hello world".to_vec());
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn value_frame_round_trips() {
        let frame = Frame::value(7, MessageKind::ForkResponse, 12345);
        let encoded = frame.encode();
        let decoded = Frame::decode_value(&encoded).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn release_output_round_trips_flag_and_payload_separately() {
        let frame = encode_release_output(9, b"partial output", true);
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).unwrap();
        let (has_more, data) = decode_release_output(&decoded).unwrap();
        assert!(has_more);
        assert_eq!(data, b"partial output");
    }

    #[test]
    fn release_output_preserves_false_flag() {
        let frame = encode_release_output(9, b"", false);
        let decoded = Frame::decode(&frame.encode()).unwrap();
        let (has_more, data) = decode_release_output(&decoded).unwrap();
        assert!(!has_more);
        assert!(data.is_empty());
    }

    #[test]
    fn rejects_truncated_frame() {
        let err = Frame::decode(&[0u8; 4]);
        assert!(err.is_err());
    }
}
