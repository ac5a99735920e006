// Path: crates/qkd-sifting-bb84/src/qauth.rs
//! The QAuth basis-exchange authenticator (§4.8): a keyed pseudorandom
//! sequence of `(position, value)` particles spliced into the public basis
//! stream by the initiator and extracted/verified by the responder.

use qkd_api::error::{CryptoError, ProtocolError};
use qkd_api::random::RandomSource;
use qkd_crypto::EvHash;
use qkd_types::{BasisEvent, BasisTable};

/// The shared seed for one sifting cycle's particle stream (§4.8): two
/// universal-hash keys, a modulus, and an initial `(position, value)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QAuthInit {
    pub k_v: u32,
    pub k_p: u32,
    pub m: u32,
    pub p0: u32,
    pub v0: u32,
}

impl QAuthInit {
    /// Draws a fresh init token from `random`. `p0` is taken modulo `m`
    /// (§9 Design Notes: "masks `p_0` by `m` but not `v_0`; preserved as-is").
    pub fn random(random: &mut dyn RandomSource, m: u32) -> Self {
        let k_v = random.next_u32();
        let k_p = random.next_u32();
        let v0 = random.next_u32();
        let p0 = if m == 0 { 0 } else { random.next_u32() % m };
        Self { k_v, k_p, m, p0, v0 }
    }

    /// Encodes `(k_v, k_p, m, p0, v0)`, in the order §4.8 presents them.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(20);
        out.extend_from_slice(&self.k_v.to_be_bytes());
        out.extend_from_slice(&self.k_p.to_be_bytes());
        out.extend_from_slice(&self.m.to_be_bytes());
        out.extend_from_slice(&self.p0.to_be_bytes());
        out.extend_from_slice(&self.v0.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != 20 {
            return Err(ProtocolError::SizeMismatch { expected: 20, got: bytes.len() });
        }
        let word = |i: usize| -> u32 {
            let b = &bytes[i * 4..i * 4 + 4];
            u32::from_be_bytes([b[0], b[1], b[2], b[3]])
        };
        Ok(Self { k_v: word(0), k_p: word(1), m: word(2), p0: word(3), v0: word(4) })
    }
}

/// A single particle in the stream: a merged-table position and an
/// authenticator payload whose low bit selects the basis (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QAuthParticle {
    pub position: u64,
    pub value: u32,
}

impl QAuthParticle {
    /// Diagonal if `value` is odd, rectilinear otherwise (§4.8).
    pub fn basis(&self) -> BasisEvent {
        if self.value % 2 == 1 {
            BasisEvent::Diagonal
        } else {
            BasisEvent::Rectilinear
        }
    }
}

/// `H_k(x)`: evhash-32 keyed by `k`, applied to the big-endian encoding of
/// `x` (§4.8).
fn h(key: u32, x: u32) -> Result<u32, CryptoError> {
    let mut ctx = EvHash::new(&key.to_be_bytes())?;
    ctx.update(&x.to_be_bytes());
    let tag = ctx.finalize();
    Ok(u32::from_be_bytes([tag[0], tag[1], tag[2], tag[3]]))
}

/// The deterministic particle stream driven by one [`QAuthInit`] (§4.8).
///
/// Both sides construct one from the same init and step it identically;
/// nothing here is random once the init is fixed.
pub struct QAuthStream {
    k_v: u32,
    k_p: u32,
    m: u32,
    p: u64,
    v: u32,
}

impl QAuthStream {
    pub fn new(init: &QAuthInit) -> Self {
        Self { k_v: init.k_v, k_p: init.k_p, m: init.m.max(1) as u64, p: init.p0 as u64, v: init.v0 }
    }

    /// Emits the current `(p, v)`, then advances: `v <- H_kv(v)`, `p <- p +
    /// 1 + (H_kp(p) mod m)`. The corrected transition per §4.8's open
    /// question: `v`'s transition uses `H_kv`, not `H_kp`.
    pub fn next(&mut self) -> Result<QAuthParticle, CryptoError> {
        let particle = QAuthParticle { position: self.p, value: self.v };
        let next_v = h(self.k_v, self.v)?;
        let step = u64::from(h(self.k_p, self.p as u32)?) % self.m;
        self.v = next_v;
        self.p += 1 + step;
        Ok(particle)
    }
}

/// The authenticator bound to one sifting cycle, either splicing (initiator)
/// or extracting/verifying (responder) against a shared [`QAuthInit`].
pub struct QAuth {
    init: QAuthInit,
}

impl QAuth {
    pub fn new(init: QAuthInit) -> Self {
        Self { init }
    }

    /// Splice (`create_min`, §4.8): generates particles until the next
    /// candidate's position would exceed `base_size + particles_so_far`,
    /// keeping every particle generated before that point (P4).
    pub fn create_min(&self, base_size: u64) -> Result<Vec<QAuthParticle>, CryptoError> {
        let mut stream = QAuthStream::new(&self.init);
        let mut particles = Vec::new();
        loop {
            let candidate = stream.next()?;
            if candidate.position > base_size + particles.len() as u64 {
                break;
            }
            particles.push(candidate);
        }
        Ok(particles)
    }

    /// Extract (`create_max`, §4.8): generates particles until the next
    /// candidate's position exceeds `merged_size` (P4).
    pub fn create_max(&self, merged_size: u64) -> Result<Vec<QAuthParticle>, CryptoError> {
        let mut stream = QAuthStream::new(&self.init);
        let mut particles = Vec::new();
        loop {
            let candidate = stream.next()?;
            if candidate.position > merged_size {
                break;
            }
            particles.push(candidate);
        }
        Ok(particles)
    }
}

/// Inserts each particle's basis at its position inside `base`, shifting
/// subsequent real bases right (the splice side of §4.8, used by the
/// initiator before sending).
pub fn splice(base: &BasisTable, particles: &[QAuthParticle]) -> BasisTable {
    let mut out = BasisTable::new();
    let mut particles = particles.iter().peekable();
    let mut base_idx = 0usize;
    let mut position = 0u64;

    while base_idx < base.len() {
        if let Some(p) = particles.peek() {
            if p.position == position {
                out.push(p.basis());
                particles.next();
                position += 1;
                continue;
            }
        }
        if let Some(event) = base.get(base_idx) {
            out.push(event);
        }
        base_idx += 1;
        position += 1;
    }
    for p in particles {
        out.push(p.basis());
    }
    out
}

/// Removes the bases at the predicted particle positions from `merged`,
/// returning `(pure_table, extracted_events_in_position_order)` — the
/// extract side of §4.8, used by the responder after receiving.
pub fn extract(merged: &BasisTable, particles: &[QAuthParticle]) -> (BasisTable, Vec<BasisEvent>) {
    let mut pure = BasisTable::new();
    let mut extracted = Vec::with_capacity(particles.len());
    let mut next_particle = particles.iter().peekable();

    for (i, event) in merged.iter().enumerate() {
        if let Some(p) = next_particle.peek() {
            if p.position == i as u64 {
                extracted.push(*event);
                next_particle.next();
                continue;
            }
        }
        pure.push(*event);
    }
    (pure, extracted)
}

/// Compares extracted basis values against the values predicted by the
/// shared init (§4.8 Verification); the first mismatch aborts the cycle.
pub fn verify(particles: &[QAuthParticle], extracted: &[BasisEvent]) -> Result<(), ProtocolError> {
    if particles.len() != extracted.len() {
        return Err(ProtocolError::SizeMismatch { expected: particles.len(), got: extracted.len() });
    }
    for (particle, actual) in particles.iter().zip(extracted.iter()) {
        if particle.basis() != *actual {
            return Err(ProtocolError::QAuthMismatch(particle.position));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qkd_api::random::RandomSource;

    struct StepRng(u32);
    impl RandomSource for StepRng {
        fn next_f64(&mut self) -> f64 {
            0.0
        }
        fn fill_bytes(&mut self, buf: &mut [u8]) {
            self.0 = self.0.wrapping_add(1);
            let bytes = self.0.to_be_bytes();
            for (i, b) in buf.iter_mut().enumerate() {
                *b = bytes[i % 4];
            }
        }
    }

    fn scenario_3_init() -> QAuthInit {
        QAuthInit { k_v: 1, k_p: 2, m: 16, p0: 4, v0: 2 }
    }

    #[test]
    fn particle_stream_positions_strictly_increase_scenario_3() {
        let init = scenario_3_init();
        let mut stream = QAuthStream::new(&init);
        let p1 = stream.next().unwrap();
        let p2 = stream.next().unwrap();
        let p3 = stream.next().unwrap();

        assert_eq!(p1.position, 4);
        assert!(p2.position > p1.position);
        assert!(p3.position > p2.position);
        assert!(p2.position - p1.position >= 1 && p2.position - p1.position <= 16);
        assert!(p3.position - p2.position >= 1 && p3.position - p2.position <= 16);
    }

    #[test]
    fn particle_stream_is_deterministic() {
        let init = scenario_3_init();
        let mut a = QAuthStream::new(&init);
        let mut b = QAuthStream::new(&init);
        for _ in 0..10 {
            assert_eq!(a.next().unwrap(), b.next().unwrap());
        }
    }

    #[test]
    fn create_min_bound_p4() {
        let init = QAuthInit::random(&mut StepRng(7), 16);
        let qauth = QAuth::new(init);
        let particles = qauth.create_min(40).unwrap();
        if let Some(last) = particles.last() {
            assert!(last.position <= 40 + particles.len() as u64);
        }
    }

    #[test]
    fn create_max_bound_p4() {
        let init = QAuthInit::random(&mut StepRng(11), 16);
        let qauth = QAuth::new(init);
        let particles = qauth.create_max(40).unwrap();
        if let Some(last) = particles.last() {
            assert!(last.position <= 40);
        }
    }

    #[test]
    fn splice_then_extract_is_inverse_p5() {
        let init = QAuthInit::random(&mut StepRng(3), 16);
        let qauth = QAuth::new(init);
        let base = BasisTable::from_events(vec![
            BasisEvent::Diagonal,
            BasisEvent::Rectilinear,
            BasisEvent::Diagonal,
            BasisEvent::Rectilinear,
            BasisEvent::Diagonal,
            BasisEvent::Rectilinear,
            BasisEvent::Diagonal,
            BasisEvent::Rectilinear,
        ]);

        let particles = qauth.create_min(base.len() as u64).unwrap();
        let merged = splice(&base, &particles);
        assert_eq!(merged.len(), base.len() + particles.len());

        let predicted = qauth.create_max(merged.len() as u64).unwrap();
        let (pure, extracted) = extract(&merged, &predicted);

        assert_eq!(pure.as_slice(), base.as_slice());
        assert!(verify(&predicted, &extracted).is_ok());
    }

    #[test]
    fn tampered_position_fails_verification_scenario_6() {
        let init = QAuthInit::random(&mut StepRng(5), 16);
        let qauth = QAuth::new(init);
        let base = BasisTable::from_events(vec![BasisEvent::Diagonal; 20]);
        let particles = qauth.create_min(base.len() as u64).unwrap();
        let mut merged = splice(&base, &particles);

        let Some(target) = particles.first() else { return };
        let flipped = if target.basis() == BasisEvent::Diagonal {
            BasisEvent::Rectilinear
        } else {
            BasisEvent::Diagonal
        };
        merged.remove(target.position as usize);
        merged.insert(target.position as usize, flipped);

        let predicted = qauth.create_max(merged.len() as u64).unwrap();
        let (_, extracted) = extract(&merged, &predicted);
        assert!(verify(&predicted, &extracted).is_err());
    }

    #[test]
    fn encode_decode_round_trips() {
        let init = QAuthInit { k_v: 0x1111_1111, k_p: 0x2222_2222, m: 16, p0: 3, v0: 0xdead_beef };
        let decoded = QAuthInit::decode(&init.encode()).unwrap();
        assert_eq!(init, decoded);
    }
}
