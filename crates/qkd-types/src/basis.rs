// Path: crates/qkd-types/src/basis.rs
//! Basis events and tables (§3, §4.7): the currency of BB84 sifting.
//!
//! A detector nibble carries two bits per conjugate basis: bits 0-1 signal a
//! diagonal-basis click, bits 2-3 a rectilinear-basis click. Exactly one
//! basis clicking (and not both, not neither) yields a usable event; the
//! 256-entry parity table used by the bit-extraction step operates on the
//! same nibble.

use bytes::{Buf, BufMut, BytesMut};

use crate::wire::WireError;

/// A single basis event, as classified from four detector bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BasisEvent {
    Invalid = 0,
    Diagonal = 1,
    Rectilinear = 2,
}

impl BasisEvent {
    pub fn from_tag(tag: u8) -> Self {
        match tag & 0x03 {
            1 => Self::Diagonal,
            2 => Self::Rectilinear,
            _ => Self::Invalid,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Classifies a detector nibble per §3: diagonal detectors occupy bits
    /// 0-1, rectilinear detectors occupy bits 2-3. A click on exactly one
    /// basis's detectors yields that basis; no click or clicks on both
    /// (double-click / squashing) yields `Invalid`.
    pub fn classify(nibble: u8) -> Self {
        let diag = (nibble & 0x03) != 0;
        let rect = (nibble & 0x0C) != 0;
        match (diag, rect) {
            (true, false) => Self::Diagonal,
            (false, true) => Self::Rectilinear,
            _ => Self::Invalid,
        }
    }
}

/// An ordered sequence of basis events in sparse form: one byte per event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasisTable(Vec<BasisEvent>);

impl BasisTable {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_events(events: Vec<BasisEvent>) -> Self {
        Self(events)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<BasisEvent> {
        self.0.get(idx).copied()
    }

    pub fn push(&mut self, event: BasisEvent) {
        self.0.push(event);
    }

    pub fn insert(&mut self, idx: usize, event: BasisEvent) {
        self.0.insert(idx, event);
    }

    pub fn remove(&mut self, idx: usize) -> BasisEvent {
        self.0.remove(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BasisEvent> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[BasisEvent] {
        &self.0
    }

    /// Expands a dense quantum-event table (one nibble per detector event,
    /// two events per byte, high nibble first) into a sparse table of the
    /// raw nibble values classified into bases. Per (P7): `len(sparse) =
    /// 2*len(dense)`.
    pub fn from_dense_quantum_table(dense: &[u8]) -> Self {
        let mut events = Vec::with_capacity(dense.len() * 2);
        for byte in dense {
            events.push(BasisEvent::classify((byte & 0xF0) >> 4));
            events.push(BasisEvent::classify(byte & 0x0F));
        }
        Self(events)
    }

    /// Packs this table into the on-wire form: four events per byte, high
    /// bits first. (I5) `size(packed) = ceil(size(sparse)/4)`.
    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity((self.0.len() + 3) / 4);
        for chunk in self.0.chunks(4) {
            let mut byte = 0u8;
            for (i, ev) in chunk.iter().enumerate() {
                byte |= ev.tag() << (6 - 2 * i);
            }
            out.push(byte);
        }
        out
    }

    /// Unpacks a packed on-wire table of exactly `count` events.
    pub fn unpack(packed: &[u8], count: usize) -> Self {
        let mut events = Vec::with_capacity(count);
        'outer: for byte in packed {
            for i in 0..4 {
                if events.len() >= count {
                    break 'outer;
                }
                let tag = (byte >> (6 - 2 * i)) & 0x03;
                events.push(BasisEvent::from_tag(tag));
            }
        }
        Self(events)
    }

    pub fn encode(&self) -> Vec<u8> {
        let packed = self.pack();
        let mut out = BytesMut::with_capacity(8 + packed.len());
        out.put_u64(self.0.len() as u64);
        out.extend_from_slice(&packed);
        out.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut buf = bytes;
        if buf.remaining() < 8 {
            return Err(WireError::Underrun { needed: 8, had: buf.remaining() });
        }
        let count = buf.get_u64() as usize;
        let packed_len = (count + 3) / 4;
        if buf.remaining() < packed_len {
            return Err(WireError::Underrun { needed: packed_len, had: buf.remaining() });
        }
        let mut packed = vec![0u8; packed_len];
        buf.copy_to_slice(&mut packed);
        Ok(Self::unpack(&packed, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_matches_single_basis_clicks() {
        assert_eq!(BasisEvent::classify(0b0000), BasisEvent::Invalid);
        assert_eq!(BasisEvent::classify(0b0001), BasisEvent::Diagonal);
        assert_eq!(BasisEvent::classify(0b0010), BasisEvent::Diagonal);
        assert_eq!(BasisEvent::classify(0b0100), BasisEvent::Rectilinear);
        assert_eq!(BasisEvent::classify(0b1000), BasisEvent::Rectilinear);
        assert_eq!(BasisEvent::classify(0b0101), BasisEvent::Invalid);
        assert_eq!(BasisEvent::classify(0b1111), BasisEvent::Invalid);
    }

    #[test]
    fn dense_to_sparse_doubles_length_high_nibble_first() {
        let dense = [0x12u8, 0xAB];
        let sparse = BasisTable::from_dense_quantum_table(&dense);
        assert_eq!(sparse.len(), 4);
        // 0x12 -> nibbles 0x1 (diag), 0x2 (diag)
        assert_eq!(sparse.get(0), Some(BasisEvent::Diagonal));
        assert_eq!(sparse.get(1), Some(BasisEvent::Diagonal));
        // 0xAB -> nibbles 0xA (rect), 0xB (invalid, both bases click)
        assert_eq!(sparse.get(2), Some(BasisEvent::Rectilinear));
        assert_eq!(sparse.get(3), Some(BasisEvent::Invalid));
    }

    #[test]
    fn pack_unpack_round_trip() {
        let events = vec![
            BasisEvent::Diagonal,
            BasisEvent::Rectilinear,
            BasisEvent::Invalid,
            BasisEvent::Diagonal,
            BasisEvent::Rectilinear,
        ];
        let table = BasisTable::from_events(events.clone());
        let packed = table.pack();
        assert_eq!(packed.len(), 2); // ceil(5/4) == 2
        let unpacked = BasisTable::unpack(&packed, events.len());
        assert_eq!(unpacked.as_slice(), events.as_slice());
    }

    #[test]
    fn encode_decode_round_trip() {
        let table = BasisTable::from_events(vec![BasisEvent::Diagonal; 9]);
        let encoded = table.encode();
        let decoded = BasisTable::decode(&encoded).unwrap();
        assert_eq!(decoded, table);
    }
}
