// Path: crates/qkd-types/src/message.rs
//! The framed message codec (§4.3): a header frame and a payload frame, each
//! independently length-prefixed so transports may deliver them as two
//! separate writes/reads.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, BytesMut};

use crate::wire::{self, WireError};

/// The type of a framed message. `recv` uses this to route a message to the
/// caller that asked for it, or to the appropriate per-type queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Data = 0,
    KeySync = 1,
    KeyAck = 2,
}

impl MessageType {
    pub const ALL: [MessageType; 3] = [MessageType::Data, MessageType::KeySync, MessageType::KeyAck];

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Data),
            1 => Some(Self::KeySync),
            2 => Some(Self::KeyAck),
            _ => None,
        }
    }

    /// A small dense index for the per-type queue array (§9: a fixed array
    /// of queues beats a hash map for three variants).
    pub fn index(self) -> usize {
        self as usize
    }
}

/// `type | id | timestamp`, big-endian. `id` is a process-monotonic counter
/// assigned at send time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub id: u32,
    pub kind: MessageType,
    pub timestamp_millis: u64,
}

impl MessageHeader {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(13);
        out.put_u8(self.kind as u8);
        out.put_u32(self.id);
        out.put_u64(self.timestamp_millis);
        out.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut buf = bytes;
        let kind_raw = wire::get_u8(&mut buf)?;
        let kind = MessageType::from_u8(kind_raw)
            .ok_or(WireError::UnknownTag { field: "MessageType", tag: kind_raw })?;
        let id = wire::get_u32(&mut buf)?;
        let timestamp_millis = wire::get_u64(&mut buf)?;
        Ok(Self { id, kind, timestamp_millis })
    }
}

static NEXT_MESSAGE_ID: AtomicU32 = AtomicU32::new(1);

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A full message: header plus an opaque payload blob. The payload is a
/// stream of typed values the producer wrote in some order; consumers must
/// read them back in that same order.
#[derive(Debug, Clone)]
pub struct Message {
    pub header: MessageHeader,
    payload: BytesMut,
    cursor: usize,
}

impl Message {
    /// Builds a fresh outgoing message of the given type, assigning the next
    /// process-monotonic id and the current timestamp.
    pub fn new(kind: MessageType) -> Self {
        let id = NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            header: MessageHeader { id, kind, timestamp_millis: now_millis() },
            payload: BytesMut::new(),
            cursor: 0,
        }
    }

    pub fn from_parts(header: MessageHeader, payload: Vec<u8>) -> Self {
        Self { header, payload: BytesMut::from(&payload[..]), cursor: 0 }
    }

    pub fn kind(&self) -> MessageType {
        self.header.kind
    }

    pub fn payload_bytes(&self) -> &[u8] {
        &self.payload
    }

    // -- writers --

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.payload.put_u8(v);
        self
    }

    pub fn put_u16(&mut self, v: u16) -> &mut Self {
        self.payload.put_u16(v);
        self
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.payload.put_u32(v);
        self
    }

    pub fn put_u64(&mut self, v: u64) -> &mut Self {
        self.payload.put_u64(v);
        self
    }

    pub fn put_blob(&mut self, blob: &[u8]) -> &mut Self {
        wire::put_blob(&mut self.payload, blob);
        self
    }

    // -- readers: consume payload left to right in write order --

    pub fn get_u8(&mut self) -> Result<u8, WireError> {
        let mut rest = &self.payload[self.cursor..];
        let v = wire::get_u8(&mut rest)?;
        self.cursor = self.payload.len() - rest.remaining();
        Ok(v)
    }

    pub fn get_u16(&mut self) -> Result<u16, WireError> {
        let mut rest = &self.payload[self.cursor..];
        if rest.remaining() < 2 {
            return Err(WireError::Underrun { needed: 2, had: rest.remaining() });
        }
        let v = rest.get_u16();
        self.cursor = self.payload.len() - rest.remaining();
        Ok(v)
    }

    pub fn get_u32(&mut self) -> Result<u32, WireError> {
        let mut rest = &self.payload[self.cursor..];
        let v = wire::get_u32(&mut rest)?;
        self.cursor = self.payload.len() - rest.remaining();
        Ok(v)
    }

    pub fn get_u64(&mut self) -> Result<u64, WireError> {
        let mut rest = &self.payload[self.cursor..];
        let v = wire::get_u64(&mut rest)?;
        self.cursor = self.payload.len() - rest.remaining();
        Ok(v)
    }

    pub fn get_blob(&mut self) -> Result<Vec<u8>, WireError> {
        let mut rest = &self.payload[self.cursor..];
        let v = wire::get_blob(&mut rest)?;
        self.cursor = self.payload.len() - rest.remaining();
        Ok(v)
    }

    /// Encodes the header frame and the payload frame, each independently
    /// length-prefixed (`u32` length).
    pub fn encode_frames(&self) -> (Vec<u8>, Vec<u8>) {
        let header = self.header.encode();
        let mut header_frame = BytesMut::with_capacity(4 + header.len());
        header_frame.put_u32(header.len() as u32);
        header_frame.extend_from_slice(&header);

        let mut payload_frame = BytesMut::with_capacity(4 + self.payload.len());
        payload_frame.put_u32(self.payload.len() as u32);
        payload_frame.extend_from_slice(&self.payload);

        (header_frame.to_vec(), payload_frame.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_fields_read_back_in_write_order() {
        let mut msg = Message::new(MessageType::KeySync);
        msg.put_u8(7).put_u32(99).put_blob(b"hello");

        assert_eq!(msg.get_u8().unwrap(), 7);
        assert_eq!(msg.get_u32().unwrap(), 99);
        assert_eq!(msg.get_blob().unwrap(), b"hello");
    }

    #[test]
    fn header_round_trips() {
        let header = MessageHeader { id: 123, kind: MessageType::KeyAck, timestamp_millis: 555 };
        let encoded = header.encode();
        let decoded = MessageHeader::decode(&encoded).unwrap();
        assert_eq!(decoded, header);
    }
}
