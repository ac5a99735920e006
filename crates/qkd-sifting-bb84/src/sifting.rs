// Path: crates/qkd-sifting-bb84/src/sifting.rs
//! The BB84 sifting [`Module`] implementation (§4.7, §4.8): dense detector
//! events in, an accumulated sifted key out, with an optional QAuth
//! basis-exchange authenticator woven into the public exchange.

use qkd_api::error::{Error, ProtocolError};
use qkd_api::random::RandomSource;
use qkd_api::role::Role;
use qkd_connection::Channel;
use qkd_crypto::EvHash;
use qkd_types::{BasisEvent, BasisTable, KeyRecord, KeyState, Message, MessageType};
use qkd_module::Module;

use crate::config::Bb84Config;
use crate::keyid::KeyIdCounter;
use crate::qauth::{extract, splice, verify, QAuth, QAuthInit};

/// Parity (mod 2) of the set bits of every byte value, precomputed once
/// (§4.7: "a precomputed 256-entry parity table").
const fn build_parity_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0usize;
    while i < 256 {
        table[i] = (i as u8).count_ones() as u8 % 2;
        i += 1;
    }
    table
}

static PARITY: [u8; 256] = build_parity_table();

/// Expands a dense quantum-event table into its raw nibbles (high nibble
/// first, two per byte), preserving the 4-bit detector pattern that
/// [`base_to_bit`] needs — unlike [`BasisTable::from_dense_quantum_table`],
/// which only keeps the 2-bit basis classification.
fn dense_to_nibbles(dense: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(dense.len() * 2);
    for byte in dense {
        out.push((byte & 0xF0) >> 4);
        out.push(byte & 0x0F);
    }
    out
}

/// Reduces one matching-basis detector nibble to a key bit (§4.7): the
/// parity table picks a deterministic bit when it can, and falls back to a
/// fair coin flip on a double-click or no-click event.
fn base_to_bit(nibble: u8, random: &mut dyn RandomSource) -> bool {
    if PARITY[nibble as usize & 0xFF] == 1 {
        (nibble & 0x55) != 0
    } else {
        random.fair_bit()
    }
}

/// The growing sifted-key bit accumulator (§4.7): bits are packed MSB-first
/// and emitted, truncated to a byte boundary, once enough have built up.
#[derive(Default)]
struct BitAccumulator {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitAccumulator {
    fn push(&mut self, bit: bool) {
        let byte_idx = self.bit_len / 8;
        if byte_idx == self.bytes.len() {
            self.bytes.push(0);
        }
        if bit {
            if let Some(slot) = self.bytes.get_mut(byte_idx) {
                *slot |= 1 << (7 - (self.bit_len % 8));
            }
        }
        self.bit_len += 1;
    }

    fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Takes every whole byte accumulated so far (up to 7 trailing bits are
    /// dropped) and resets to empty.
    fn take_whole_bytes(&mut self) -> Vec<u8> {
        let whole = self.bit_len / 8;
        let out = self.bytes.get(..whole).map(<[u8]>::to_vec).unwrap_or_default();
        self.bytes.clear();
        self.bit_len = 0;
        out
    }
}

fn send_blob(peer: &mut Channel, blob: &[u8], out_ctx: &mut EvHash, timeout_ms: i64) -> Result<(), Error> {
    let mut msg = Message::new(MessageType::Data);
    msg.put_blob(blob);
    peer.send(&msg, out_ctx, timeout_ms).map_err(Error::from)
}

fn recv_blob(peer: &mut Channel, in_ctx: &mut EvHash, timeout_ms: i64) -> Result<Vec<u8>, Error> {
    let mut msg = peer.recv(MessageType::Data, in_ctx, timeout_ms).map_err(Error::from)?;
    msg.get_blob().map_err(|e| Error::from(ProtocolError::Malformed(e.to_string())))
}

fn send_bases(peer: &mut Channel, table: &BasisTable, out_ctx: &mut EvHash, timeout_ms: i64) -> Result<(), Error> {
    send_blob(peer, &table.encode(), out_ctx, timeout_ms)
}

fn recv_bases(peer: &mut Channel, in_ctx: &mut EvHash, timeout_ms: i64) -> Result<BasisTable, Error> {
    let blob = recv_blob(peer, in_ctx, timeout_ms)?;
    BasisTable::decode(&blob).map_err(|e| Error::from(ProtocolError::Malformed(e.to_string())))
}

fn send_qauth_init(peer: &mut Channel, init: &QAuthInit, out_ctx: &mut EvHash, timeout_ms: i64) -> Result<(), Error> {
    send_blob(peer, &init.encode(), out_ctx, timeout_ms)
}

fn recv_qauth_init(peer: &mut Channel, in_ctx: &mut EvHash, timeout_ms: i64) -> Result<QAuthInit, Error> {
    let blob = recv_blob(peer, in_ctx, timeout_ms)?;
    QAuthInit::decode(&blob).map_err(Error::from)
}

/// Agrees with the peer on the key being processed this cycle (§4.7 flow
/// step 1): exchanges `(id, size)` and fails the cycle if they disagree.
fn sync_key_data(key: &KeyRecord, peer: &mut Channel, out_ctx: &mut EvHash, in_ctx: &mut EvHash, timeout_ms: i64) -> Result<(), Error> {
    let mut msg = Message::new(MessageType::Data);
    msg.put_u64(key.id()).put_u64(key.size() as u64);
    peer.send(&msg, out_ctx, timeout_ms).map_err(Error::from)?;

    let mut reply = peer.recv(MessageType::Data, in_ctx, timeout_ms).map_err(Error::from)?;
    let peer_id = reply.get_u64().map_err(|e| Error::from(ProtocolError::Malformed(e.to_string())))?;
    let peer_size = reply.get_u64().map_err(|e| Error::from(ProtocolError::Malformed(e.to_string())))?;

    if peer_id != key.id() || peer_size as usize != key.size() {
        return Err(Error::from(ProtocolError::Malformed(format!(
            "key data desync: local ({}, {} bytes), peer ({}, {} bytes)",
            key.id(),
            key.size(),
            peer_id,
            peer_size
        ))));
    }
    Ok(())
}

/// The BB84 sifting stage. One instance runs per role and owns the
/// cross-cycle accumulator that keys are folded into (§4.7).
pub struct Bb84Sifting {
    role: Role,
    config: Bb84Config,
    accumulator: BitAccumulator,
    key_ids: KeyIdCounter,
}

impl Bb84Sifting {
    pub fn new(role: Role, config: Bb84Config) -> Self {
        let key_ids = config.key_id_pattern;
        Self { role, config, accumulator: BitAccumulator::default(), key_ids }
    }

    /// The initiator's half of the exchange (§4.7 flow steps 2-4): splice if
    /// QAuth is enabled, send, receive the responder's plain reply, then
    /// send the init token.
    fn exchange_as_initiator(
        &self,
        local_pure: &BasisTable,
        peer: &mut Channel,
        out_ctx: &mut EvHash,
        in_ctx: &mut EvHash,
        random: &mut dyn RandomSource,
        timeout_ms: i64,
    ) -> Result<BasisTable, Error> {
        if self.config.qauth_enabled {
            let init = QAuthInit::random(random, self.config.qauth_modulus);
            let particles = QAuth::new(init).create_min(local_pure.len() as u64).map_err(Error::from)?;
            let spliced = splice(local_pure, &particles);
            send_bases(peer, &spliced, out_ctx, timeout_ms)?;
            let peer_bases = recv_bases(peer, in_ctx, timeout_ms)?;
            send_qauth_init(peer, &init, out_ctx, timeout_ms)?;
            Ok(peer_bases)
        } else {
            send_bases(peer, local_pure, out_ctx, timeout_ms)?;
            recv_bases(peer, in_ctx, timeout_ms)
        }
    }

    /// The responder's half (§4.7 flow steps 2-5): receive the (possibly
    /// spliced) initiator table, reply with the plain local table, and if
    /// QAuth is enabled, receive the init, extract and verify.
    fn exchange_as_responder(
        &self,
        local_pure: &BasisTable,
        peer: &mut Channel,
        out_ctx: &mut EvHash,
        in_ctx: &mut EvHash,
        timeout_ms: i64,
    ) -> Result<BasisTable, Error> {
        let bases_from_initiator = recv_bases(peer, in_ctx, timeout_ms)?;
        send_bases(peer, local_pure, out_ctx, timeout_ms)?;

        if self.config.qauth_enabled {
            let init = recv_qauth_init(peer, in_ctx, timeout_ms)?;
            let qauth = QAuth::new(init);
            let predicted = qauth.create_max(bases_from_initiator.len() as u64).map_err(Error::from)?;
            let (pure, extracted) = extract(&bases_from_initiator, &predicted);
            verify(&predicted, &extracted).map_err(Error::from)?;
            Ok(pure)
        } else {
            Ok(bases_from_initiator)
        }
    }
}

impl Module for Bb84Sifting {
    fn process(
        &mut self,
        key: &mut KeyRecord,
        in_ctx: &mut EvHash,
        out_ctx: &mut EvHash,
        peer: Option<&mut Channel>,
        random: &mut dyn RandomSource,
        timeout_ms: i64,
    ) -> Result<bool, Error> {
        let peer = peer.ok_or_else(|| {
            Error::from(ProtocolError::Malformed("bb84 sifting requires a paired peer channel".to_string()))
        })?;

        sync_key_data(key, peer, out_ctx, in_ctx, timeout_ms)?;

        let local_nibbles = dense_to_nibbles(key.data());
        let local_pure_bases = BasisTable::from_dense_quantum_table(key.data());

        let peer_bases = match self.role {
            Role::Initiator => {
                self.exchange_as_initiator(&local_pure_bases, peer, out_ctx, in_ctx, random, timeout_ms)?
            }
            Role::Responder => self.exchange_as_responder(&local_pure_bases, peer, out_ctx, in_ctx, timeout_ms)?,
        };

        if local_pure_bases.len() != peer_bases.len() {
            return Err(Error::from(ProtocolError::SizeMismatch {
                expected: local_pure_bases.len(),
                got: peer_bases.len(),
            }));
        }

        let mut disclosed = 0u64;
        for i in 0..local_pure_bases.len() {
            disclosed += 2; // each position discloses its own and the peer's basis choice
            let (Some(own), Some(other)) = (local_pure_bases.get(i), peer_bases.get(i)) else {
                continue;
            };
            if own != other || own == BasisEvent::Invalid {
                continue;
            }
            let nibble = local_nibbles.get(i).copied().unwrap_or(0);
            let mut bit = base_to_bit(nibble, random);
            if self.role.is_responder() {
                bit = !bit;
            }
            self.accumulator.push(bit);
        }
        key.add_disclosed_bits(disclosed);

        if self.accumulator.bit_len() >= self.config.raw_key_length * 8 {
            let data = self.accumulator.take_whole_bytes();
            key.set_id(self.key_ids.next());
            key.set_data(data);
            key.set_state(KeyState::Sifted);
            key.set_error_rate(0.0);
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qkd_connection::transport::TcpTransport;
    use std::thread;

    struct FixedRng(bool);
    impl RandomSource for FixedRng {
        fn next_f64(&mut self) -> f64 {
            if self.0 {
                1.0
            } else {
                0.0
            }
        }
        fn fill_bytes(&mut self, buf: &mut [u8]) {
            buf.fill(if self.0 { 0xFF } else { 0x00 });
        }
    }

    fn ctx() -> EvHash {
        EvHash::new(&[1, 2, 3, 4]).unwrap()
    }

    fn cfg(raw_key_length: usize, qauth: bool) -> Bb84Config {
        Bb84Config {
            raw_key_length,
            qauth_enabled: qauth,
            qauth_modulus: 16,
            key_id_pattern: KeyIdCounter::new(0, 0),
        }
    }

    #[test]
    fn parity_table_matches_popcount_mod_2() {
        for e in 0u32..256 {
            let expected = (e.count_ones() % 2) as u8;
            assert_eq!(PARITY[e as usize], expected);
        }
    }

    #[test]
    fn accumulator_truncates_to_byte_boundary_and_resets() {
        let mut acc = BitAccumulator::default();
        for bit in [true, false, true, true, false, false, true, true, true] {
            acc.push(bit);
        }
        assert_eq!(acc.bit_len(), 9);
        let bytes = acc.take_whole_bytes();
        assert_eq!(bytes, vec![0b1011_0011]);
        assert_eq!(acc.bit_len(), 0);
    }

    /// Scenario 4: both sides hold identical 4-byte dense tables where every
    /// detector event is a clean single click and bases match pairwise.
    /// Expect 8 sparse events, 8 matching bases, 8 bits, 1 sifted byte, with
    /// Bob's byte the bit-inversion of Alice's.
    #[test]
    fn sifting_without_qauth_scenario_4() {
        // Nibbles chosen so classify() yields alternating Diagonal/Rectilinear,
        // never Invalid: 0x1 -> Diagonal, 0x4 -> Rectilinear.
        let dense = vec![0x14u8, 0x14, 0x14, 0x14];

        let listener = TcpTransport::listen("127.0.0.1", 0).unwrap();
        let addr = listener.local_addr().unwrap();

        let bob_dense = dense.clone();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut channel = Channel::new(Box::new(TcpTransport::from_stream(stream)));
            let mut module = Bb84Sifting::new(Role::Responder, cfg(1, false));
            let mut key = KeyRecord::new(7, bob_dense);
            let mut random = FixedRng(true);
            let mut in_ctx = ctx();
            let mut out_ctx = ctx();
            let forwarded =
                module.process(&mut key, &mut in_ctx, &mut out_ctx, Some(&mut channel), &mut random, 2000).unwrap();
            (forwarded, key)
        });

        let transport = TcpTransport::connect("127.0.0.1", addr.port()).unwrap();
        let mut channel = Channel::new(Box::new(transport));
        let mut module = Bb84Sifting::new(Role::Initiator, cfg(1, false));
        let mut key = KeyRecord::new(7, dense);
        let mut random = FixedRng(true);
        let mut in_ctx = ctx();
        let mut out_ctx = ctx();
        let forwarded =
            module.process(&mut key, &mut in_ctx, &mut out_ctx, Some(&mut channel), &mut random, 2000).unwrap();

        let (bob_forwarded, bob_key) = server.join().unwrap();
        assert!(forwarded);
        assert!(bob_forwarded);
        assert_eq!(key.size(), 1);
        assert_eq!(bob_key.size(), 1);
        assert_eq!(bob_key.data()[0], !key.data()[0]);
    }

    /// With QAuth enabled and an untampered channel, both sides still sift
    /// successfully; the authenticator is transparent to the happy path.
    /// The actual tamper-detection property (scenario 6) is exercised
    /// directly against `create_min`/`create_max`/`verify` in `qauth.rs`,
    /// where a man-in-the-middle byte flip is straightforward to express.
    #[test]
    fn qauth_enabled_round_trip_succeeds() {
        let dense = vec![0x14u8; 64];

        let listener = TcpTransport::listen("127.0.0.1", 0).unwrap();
        let addr = listener.local_addr().unwrap();

        let bob_dense = dense.clone();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut channel = Channel::new(Box::new(TcpTransport::from_stream(stream)));
            let mut module = Bb84Sifting::new(Role::Responder, cfg(1024, true));
            let mut key = KeyRecord::new(1, bob_dense);
            let mut random = FixedRng(true);
            let mut in_ctx = ctx();
            let mut out_ctx = ctx();
            module.process(&mut key, &mut in_ctx, &mut out_ctx, Some(&mut channel), &mut random, 2000)
        });

        let transport = TcpTransport::connect("127.0.0.1", addr.port()).unwrap();
        let mut channel = Channel::new(Box::new(transport));
        let mut module = Bb84Sifting::new(Role::Initiator, cfg(1024, true));
        let mut key = KeyRecord::new(1, dense);
        let mut random = FixedRng(true);
        let mut in_ctx = ctx();
        let mut out_ctx = ctx();
        let alice_result = module.process(&mut key, &mut in_ctx, &mut out_ctx, Some(&mut channel), &mut random, 2000);

        let bob_result = server.join().unwrap();
        assert!(alice_result.is_ok());
        assert!(bob_result.is_ok());
    }
}
