// Path: crates/qkd-api/src/random.rs
//! The random-source abstraction (§6, §9 "Global random").
//!
//! The reference implementation carries a process-global random source
//! singleton; here it is threaded through module construction instead, so
//! tests can supply a deterministic source without touching global state.

/// A source of randomness used for fair-coin bit draws in sifting and for
/// QAuth init token generation. Implementations are free to be
/// cryptographic DRBGs, file-backed streams, or simple test generators; see
/// `qkd-crypto::random` for the concrete URL-selected variants of §6.
pub trait RandomSource: Send {
    /// Returns a uniformly distributed `f64` in `[0, 1)`, used for the
    /// fair-bit coin flip on double-click/no-click events.
    fn next_f64(&mut self) -> f64;

    /// Fills `buf` with random bytes, used to draw QAuth init token fields.
    fn fill_bytes(&mut self, buf: &mut [u8]);

    fn next_u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        self.fill_bytes(&mut buf);
        u32::from_be_bytes(buf)
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        self.fill_bytes(&mut buf);
        u64::from_be_bytes(buf)
    }

    /// Draws a fair coin-flip bit, used when detector parity is even (§4.7).
    fn fair_bit(&mut self) -> bool {
        self.next_f64() >= 0.5
    }
}
