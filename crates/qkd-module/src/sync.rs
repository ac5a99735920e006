// Path: crates/qkd-module/src/sync.rs
//! The stash synchronization protocol (§4.5): list exchange, pick,
//! acknowledge. Runs once per worker tick when `pipe_in` is set and
//! synchronization is enabled.

use qkd_api::error::{ProtocolError, TransportError};
use qkd_api::role::Role;
use qkd_connection::Channel;
use qkd_crypto::EvHash;
use qkd_types::{KeyRecord, Message, MessageType};

use crate::stash::Stash;

const TAG_LIST: u8 = 0;
const TAG_PICK: u8 = 1;
const TAG_NOPICK: u8 = 2;
const TAG_ACK: u8 = 0;
const TAG_NACK: u8 = 1;

fn list_message(ids: &[u64]) -> Message {
    let mut msg = Message::new(MessageType::KeySync);
    msg.put_u8(TAG_LIST);
    msg.put_u32(ids.len() as u32);
    for &id in ids {
        msg.put_u64(id);
    }
    msg
}

fn pick_message(id: Option<u64>) -> Message {
    let mut msg = Message::new(MessageType::KeySync);
    match id {
        Some(id) => {
            msg.put_u8(TAG_PICK);
            msg.put_u64(id);
        }
        None => {
            msg.put_u8(TAG_NOPICK);
        }
    }
    msg
}

fn ack_message(ack: bool) -> Message {
    let mut msg = Message::new(MessageType::KeyAck);
    msg.put_u8(if ack { TAG_ACK } else { TAG_NACK });
    msg
}

/// Runs the sync protocol once. On any transport failure, returns the null
/// key (§7: "sync pick returns null, worker retries"); a structurally
/// malformed message is propagated as a hard error that terminates the
/// module.
pub fn tick(
    stash: &mut Stash,
    channel: &mut Channel,
    role: Role,
    out_ctx: &mut EvHash,
    in_ctx: &mut EvHash,
    timeout_ms: i64,
) -> Result<KeyRecord, ProtocolError> {
    stash.purge_expired();

    match role {
        Role::Responder => responder_tick(stash, channel, out_ctx, in_ctx, timeout_ms),
        Role::Initiator => initiator_tick(stash, channel, out_ctx, in_ctx, timeout_ms),
    }
}

fn send_or_null(channel: &mut Channel, msg: &Message, out_ctx: &mut EvHash, timeout_ms: i64) -> Result<bool, ProtocolError> {
    match channel.send(msg, out_ctx, timeout_ms) {
        Ok(()) => Ok(true),
        Err(TransportError::Closed) | Err(TransportError::Timeout(_)) | Err(TransportError::NotReady(_)) => Ok(false),
        Err(e) => Err(ProtocolError::Malformed(e.to_string())),
    }
}

fn recv_or_null(
    channel: &mut Channel,
    kind: MessageType,
    in_ctx: &mut EvHash,
    timeout_ms: i64,
) -> Result<Option<Message>, ProtocolError> {
    match channel.recv(kind, in_ctx, timeout_ms) {
        Ok(msg) => Ok(Some(msg)),
        Err(ProtocolError::UnexpectedType { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

fn responder_tick(
    stash: &mut Stash,
    channel: &mut Channel,
    out_ctx: &mut EvHash,
    in_ctx: &mut EvHash,
    timeout_ms: i64,
) -> Result<KeyRecord, ProtocolError> {
    let ids: Vec<u64> = stash.in_sync_ids().to_vec();
    if !send_or_null(channel, &list_message(&ids), out_ctx, timeout_ms)? {
        return Ok(KeyRecord::null());
    }

    let Some(mut pick_msg) = recv_or_null(channel, MessageType::KeySync, in_ctx, timeout_ms)? else {
        return Ok(KeyRecord::null());
    };
    let tag = pick_msg.get_u8().map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    if tag == TAG_NOPICK {
        return Ok(KeyRecord::null());
    }
    if tag != TAG_PICK {
        return Err(ProtocolError::Malformed(format!("unexpected sync tag {tag}")));
    }
    let picked_id = pick_msg.get_u64().map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let present = stash.contains_in_sync(picked_id);
    if !send_or_null(channel, &ack_message(present), out_ctx, timeout_ms)? {
        return Ok(KeyRecord::null());
    }
    if !present {
        return Ok(KeyRecord::null());
    }
    Ok(stash.take(picked_id).unwrap_or_else(KeyRecord::null))
}

fn initiator_tick(
    stash: &mut Stash,
    channel: &mut Channel,
    out_ctx: &mut EvHash,
    in_ctx: &mut EvHash,
    timeout_ms: i64,
) -> Result<KeyRecord, ProtocolError> {
    let Some(mut list_msg) = recv_or_null(channel, MessageType::KeySync, in_ctx, timeout_ms)? else {
        return Ok(KeyRecord::null());
    };
    let tag = list_msg.get_u8().map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    if tag != TAG_LIST {
        return Err(ProtocolError::Malformed(format!("expected LIST tag, got {tag}")));
    }
    let count = list_msg.get_u32().map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let mut peer_ids = Vec::with_capacity(count as usize);
    for _ in 0..count {
        peer_ids.push(list_msg.get_u64().map_err(|e| ProtocolError::Malformed(e.to_string()))?);
    }

    // Order-preserving intersection on the initiator's own in_sync order
    // (§4.5 ordering guarantee).
    let local_ids = stash.in_sync_ids().to_vec();
    let picked = local_ids.into_iter().find(|id| peer_ids.contains(id));

    if !send_or_null(channel, &pick_message(picked), out_ctx, timeout_ms)? {
        return Ok(KeyRecord::null());
    }
    let Some(picked_id) = picked else {
        return Ok(KeyRecord::null());
    };

    let Some(mut ack_msg) = recv_or_null(channel, MessageType::KeyAck, in_ctx, timeout_ms)? else {
        return Ok(KeyRecord::null());
    };
    let ack_tag = ack_msg.get_u8().map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    if ack_tag != TAG_ACK {
        return Ok(KeyRecord::null());
    }
    Ok(stash.take(picked_id).unwrap_or_else(KeyRecord::null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use qkd_connection::transport::TcpTransport;
    use std::thread;
    use std::time::Duration;

    fn ctx() -> EvHash {
        EvHash::new(&[1, 2, 3, 4]).unwrap()
    }

    fn populated_stash(ids: &[u64]) -> Stash {
        let mut stash = Stash::new(Duration::from_secs(10));
        for &id in ids {
            stash.push_out_of_sync(KeyRecord::new(id, vec![]));
            stash.promote(id);
        }
        stash
    }

    #[test]
    fn both_sides_pick_the_same_key_scenario_5() {
        let listener = TcpTransport::listen("127.0.0.1", 0).unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut channel = Channel::new(Box::new(TcpTransport::from_stream(stream)));
            let mut stash = populated_stash(&[1, 5, 9, 11]);
            let mut out_ctx = ctx();
            let mut in_ctx = ctx();
            let picked = tick(&mut stash, &mut channel, Role::Responder, &mut out_ctx, &mut in_ctx, 2000).unwrap();
            (picked.id(), stash.in_sync_ids().to_vec())
        });

        let transport = TcpTransport::connect("127.0.0.1", addr.port()).unwrap();
        let mut channel = Channel::new(Box::new(transport));
        let mut stash = populated_stash(&[3, 5, 7, 9]);
        let mut out_ctx = ctx();
        let mut in_ctx = ctx();
        let picked = tick(&mut stash, &mut channel, Role::Initiator, &mut out_ctx, &mut in_ctx, 2000).unwrap();

        let (responder_picked, mut responder_remaining) = server.join().unwrap();
        assert_eq!(picked.id(), 5);
        assert_eq!(responder_picked, 5);

        let mut initiator_remaining = stash.in_sync_ids().to_vec();
        initiator_remaining.sort_unstable();
        responder_remaining.sort_unstable();
        assert_eq!(initiator_remaining, vec![3, 7, 9]);
        assert_eq!(responder_remaining, vec![1, 9, 11]);
    }

    #[test]
    fn no_common_key_yields_null() {
        let listener = TcpTransport::listen("127.0.0.1", 0).unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut channel = Channel::new(Box::new(TcpTransport::from_stream(stream)));
            let mut stash = populated_stash(&[100]);
            let mut out_ctx = ctx();
            let mut in_ctx = ctx();
            tick(&mut stash, &mut channel, Role::Responder, &mut out_ctx, &mut in_ctx, 2000).unwrap()
        });

        let transport = TcpTransport::connect("127.0.0.1", addr.port()).unwrap();
        let mut channel = Channel::new(Box::new(transport));
        let mut stash = populated_stash(&[1]);
        let mut out_ctx = ctx();
        let mut in_ctx = ctx();
        let picked = tick(&mut stash, &mut channel, Role::Initiator, &mut out_ctx, &mut in_ctx, 2000).unwrap();

        assert!(picked.is_null());
        assert!(server.join().unwrap().is_null());
    }
}
