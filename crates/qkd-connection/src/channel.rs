// Path: crates/qkd-connection/src/channel.rs
//! The authenticated message channel (§4.3, §4.4) layered over a
//! [`Transport`]: framed send/recv with per-type buffering and
//! authenticator folding.

use qkd_api::error::{ProtocolError, TransportError};
use qkd_crypto::EvHash;
use qkd_types::{Message, MessageHeader, MessageType};

use crate::transport::Transport;

/// A process-lifetime, per-message-type buffer (§9: a fixed array beats a
/// hash map for the three variants in [`MessageType`]).
#[derive(Default)]
struct TypeQueues {
    queues: [Vec<Message>; 3],
}

impl TypeQueues {
    fn push(&mut self, msg: Message) {
        self.queues[msg.kind().index()].push(msg);
    }

    fn pop(&mut self, kind: MessageType) -> Option<Message> {
        let queue = &mut self.queues[kind.index()];
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        }
    }
}

fn read_frame(transport: &mut dyn Transport, timeout_ms: i64) -> Result<Vec<u8>, TransportError> {
    let mut len_buf = [0u8; 4];
    transport.read_exact_timeout(&mut len_buf, timeout_ms)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    if len > 0 {
        transport.read_exact_timeout(&mut body, timeout_ms)?;
    }
    Ok(body)
}

/// A framed message channel over one transport. One `Channel` drives one
/// direction of traffic for one endpoint (peer or listen-accepted).
pub struct Channel {
    transport: Box<dyn Transport>,
    queues: TypeQueues,
}

impl Channel {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport, queues: TypeQueues::default() }
    }

    /// Assigns a fresh id, timestamps, frames, and writes `msg`. On success,
    /// folds the payload into `auth_ctx`.
    pub fn send(&mut self, msg: &Message, auth_ctx: &mut EvHash, timeout_ms: i64) -> Result<(), TransportError> {
        let (header_frame, payload_frame) = msg.encode_frames();
        self.transport.write_all_timeout(&header_frame, timeout_ms)?;
        self.transport.write_all_timeout(&payload_frame, timeout_ms)?;
        auth_ctx.update(msg.payload_bytes());
        Ok(())
    }

    /// Reads one message. If its type matches `expected_type`, folds its
    /// payload into `auth_ctx` and returns it. Otherwise the message is
    /// buffered in its type's queue and the read resumes, until
    /// `expected_type` arrives or `timeout_ms` is exceeded cumulatively.
    pub fn recv(
        &mut self,
        expected_type: MessageType,
        auth_ctx: &mut EvHash,
        timeout_ms: i64,
    ) -> Result<Message, ProtocolError> {
        if let Some(msg) = self.queues.pop(expected_type) {
            auth_ctx.update(msg.payload_bytes());
            return Ok(msg);
        }

        let deadline = std::time::Instant::now()
            + std::time::Duration::from_millis(if timeout_ms < 0 { 0 } else { timeout_ms as u64 });

        loop {
            let remaining = if timeout_ms < 0 {
                -1
            } else {
                let now = std::time::Instant::now();
                if now >= deadline {
                    return Err(ProtocolError::UnexpectedType { wanted: expected_type as u8 });
                }
                (deadline - now).as_millis() as i64
            };

            let header_bytes = read_frame(self.transport.as_mut(), remaining)
                .map_err(|_| ProtocolError::UnexpectedType { wanted: expected_type as u8 })?;
            let header = MessageHeader::decode(&header_bytes)
                .map_err(|e| ProtocolError::Malformed(format!("bad header: {e}")))?;
            let payload = read_frame(self.transport.as_mut(), remaining)
                .map_err(|_| ProtocolError::UnexpectedType { wanted: expected_type as u8 })?;
            let msg = Message::from_parts(header, payload);

            if msg.kind() == expected_type {
                auth_ctx.update(msg.payload_bytes());
                return Ok(msg);
            }
            self.queues.push(msg);

            if timeout_ms >= 0 && std::time::Instant::now() >= deadline {
                return Err(ProtocolError::UnexpectedType { wanted: expected_type as u8 });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TcpTransport;
    use std::thread;

    fn ctx() -> EvHash {
        EvHash::new(&[1, 2, 3, 4]).unwrap()
    }

    #[test]
    fn send_recv_round_trip_over_tcp() {
        let listener = TcpTransport::listen("127.0.0.1", 0).unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut channel = Channel::new(Box::new(TcpTransport::from_stream(stream)));
            let mut auth_ctx = ctx();
            channel.recv(MessageType::Data, &mut auth_ctx, -1).unwrap()
        });

        let client_transport = TcpTransport::connect("127.0.0.1", addr.port()).unwrap();
        let mut client_channel = Channel::new(Box::new(client_transport));
        let mut msg = Message::new(MessageType::Data);
        msg.put_u32(42);
        let mut client_ctx = ctx();
        client_channel.send(&msg, &mut client_ctx, -1).unwrap();

        let mut received = server.join().unwrap();
        assert_eq!(received.get_u32().unwrap(), 42);
    }

    #[test]
    fn out_of_order_message_is_queued_until_requested() {
        let listener = TcpTransport::listen("127.0.0.1", 0).unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut channel = Channel::new(Box::new(TcpTransport::from_stream(stream)));
            let mut auth_ctx = ctx();
            // Client sends KeySync first, then Data; ask for Data first.
            let data = channel.recv(MessageType::Data, &mut auth_ctx, 2000).unwrap();
            let sync = channel.recv(MessageType::KeySync, &mut auth_ctx, 2000).unwrap();
            (data.kind(), sync.kind())
        });

        let transport = TcpTransport::connect("127.0.0.1", addr.port()).unwrap();
        let mut channel = Channel::new(Box::new(transport));
        let mut auth_ctx = ctx();
        channel.send(&Message::new(MessageType::KeySync), &mut auth_ctx, -1).unwrap();
        channel.send(&Message::new(MessageType::Data), &mut auth_ctx, -1).unwrap();

        let (data_kind, sync_kind) = server.join().unwrap();
        assert_eq!(data_kind, MessageType::Data);
        assert_eq!(sync_kind, MessageType::KeySync);
    }
}
