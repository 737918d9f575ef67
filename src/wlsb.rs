//! Window-based Least Significant Bits codec (C3, §4.3, RFC 3095 §4.5.1).
//!
//! W-LSB lets the compressor send only the low `k` bits of a value that
//! both sides can agree grows roughly monotonically (a sequence number,
//! an IP-ID, a scaled RTP timestamp). `k` is chosen large enough that the
//! decompressor can recover the full value unambiguously from *any*
//! reference still in its sliding window — not just the most recent one,
//! because packets can be reordered or lost in flight.

use crate::error::{Error, Result};

/// Parameters shared by an encoder/decoder pair for one field.
#[derive(Debug, Clone, Copy)]
pub struct WlsbParams {
    /// Width of the value space, in bits (the value lives in ℤ/2^width ℤ).
    pub width: u32,
    /// Interpretation-interval shift `p` (§4.3). Negative for non-RTP
    /// timestamps, zero for sequence numbers.
    pub p: i64,
    /// Maximum number of (reference, sn) pairs retained by the encoder.
    pub window: usize,
}

impl WlsbParams {
    fn modulus(self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            1u64 << self.width
        }
    }
}

/// `(a - b) mod modulus`, for `a`, `b` already reduced into `0..modulus`.
fn mod_sub(a: u64, b: u64, modulus: u64) -> u64 {
    if modulus == u64::MAX {
        return a.wrapping_sub(b);
    }
    (a + modulus - (b % modulus)) % modulus
}

/// Reduce a possibly-negative shift `p` applied to `v`, i.e. `v - p`, into
/// `0..modulus`.
fn shifted(v: u64, p: i64, modulus: u64) -> u64 {
    if modulus == u64::MAX {
        return v.wrapping_sub(p as u64);
    }
    let p_mod = p.rem_euclid(modulus as i64) as u64;
    mod_sub(v, p_mod, modulus)
}

/// Minimum `k` such that `diff < 2^k`, capped at `max_k`.
fn bits_needed(diff: u64, max_k: u32) -> u32 {
    if diff == 0 {
        return 0;
    }
    let k = 64 - diff.leading_zeros();
    k.min(max_k)
}

/// Encoder side: remembers a sliding window of recently-confirmed
/// `(value, sn)` pairs and computes the minimal `k` that lets the
/// decompressor recover a new value unambiguously against all of them.
#[derive(Debug, Clone)]
pub struct WlsbEncoder {
    params: WlsbParams,
    /// `(reference value, sn at which it was confirmed)`, oldest first.
    entries: Vec<(u64, u64)>,
}

impl WlsbEncoder {
    /// Create an encoder with an empty window.
    pub fn new(params: WlsbParams) -> Self {
        Self {
            params,
            entries: Vec::with_capacity(params.window),
        }
    }

    /// True once at least one reference has been confirmed.
    pub fn is_initialized(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Most recently confirmed value, if any.
    pub fn last_value(&self) -> Option<u64> {
        self.entries.last().map(|&(v, _)| v)
    }

    /// Number of bits needed to encode `v` so every reference currently in
    /// the window can decode it unambiguously.
    pub fn required_k(&self, v: u64) -> u32 {
        let modulus = self.params.modulus();
        let v = v % modulus;
        let mut max_diff = 0u64;
        for &(reference, _) in &self.entries {
            let base = shifted(reference, self.params.p, modulus);
            let diff = mod_sub(v, base, modulus);
            max_diff = max_diff.max(diff);
        }
        bits_needed(max_diff, self.params.width)
    }

    /// Encode `v`: returns `(k, low k bits of v)`.
    pub fn encode(&self, v: u64) -> (u32, u64) {
        let modulus = self.params.modulus();
        let v = v % modulus;
        let k = self.required_k(v);
        let mask = if k == 0 { 0 } else { (1u64 << k) - 1 };
        (k, v & mask)
    }

    /// Confirm that `v` (tagged with the flow's current `sn`) was
    /// successfully transmitted/accepted, adding it to the window and
    /// evicting stale entries.
    pub fn confirm(&mut self, v: u64, sn: u64) {
        let modulus = self.params.modulus();
        self.entries.push((v % modulus, sn));
        self.evict(sn);
    }

    fn evict(&mut self, newest_sn: u64) {
        let half_period = self.params.modulus() / 2;
        self.entries
            .retain(|&(_, sn)| newest_sn.wrapping_sub(sn) <= half_period);
        let window = self.params.window.max(1);
        if self.entries.len() > window {
            let drop = self.entries.len() - window;
            self.entries.drain(0..drop);
        }
    }
}

/// Decoder side: holds the single reference value `v_ref_d` the standard
/// calls out, updated on every successfully-decoded (CRC-validated)
/// packet.
#[derive(Debug, Clone)]
pub struct WlsbDecoder {
    params: WlsbParams,
    v_ref_d: Option<u64>,
}

impl WlsbDecoder {
    /// Create a decoder with no reference yet (must be seeded via
    /// [`WlsbDecoder::seed`] from an IR before [`WlsbDecoder::decode`] can
    /// be called).
    pub fn new(params: WlsbParams) -> Self {
        Self {
            params,
            v_ref_d: None,
        }
    }

    /// Unconditionally set the reference value (used after IR/IR-DYN).
    pub fn seed(&mut self, v: u64) {
        self.v_ref_d = Some(v % self.params.modulus());
    }

    /// Current reference value, if seeded.
    pub fn reference(&self) -> Option<u64> {
        self.v_ref_d
    }

    /// Decode `m` (the low `k` bits received) against the current
    /// reference. Does not mutate the reference — call [`Self::seed`]
    /// after the caller has CRC-validated the reconstructed packet.
    pub fn decode(&self, k: u32, m: u64) -> Result<u64> {
        let modulus = self.params.modulus();
        let v_ref_d = self
            .v_ref_d
            .ok_or_else(|| Error::malformed("W-LSB decode before any reference was seeded"))?;
        if k == 0 {
            return Ok(v_ref_d);
        }
        let base = shifted(v_ref_d, self.params.p, modulus);
        let k_mask = (1u64 << k) - 1;
        let base_low = base & k_mask;
        let offset = m.wrapping_sub(base_low) & k_mask;
        Ok((base + offset) % modulus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sn_params(window: usize) -> WlsbParams {
        WlsbParams {
            width: 16,
            p: 0,
            window,
        }
    }

    #[test]
    fn lsb_bound_is_minimal_and_sufficient() {
        let mut enc = WlsbEncoder::new(sn_params(4));
        enc.confirm(1000, 1000);
        let (k, bits) = enc.encode(1001);
        assert!(k <= 16);
        // Every window entry must decode `m` back to the true value.
        let mut dec = WlsbDecoder::new(sn_params(4));
        dec.seed(1000);
        assert_eq!(dec.decode(k, bits).unwrap(), 1001);
    }

    #[test]
    fn round_trip_over_a_run() {
        let mut enc = WlsbEncoder::new(sn_params(4));
        let mut dec = WlsbDecoder::new(sn_params(4));
        enc.confirm(1000, 1000);
        dec.seed(1000);
        for v in 1001..1050u64 {
            let (k, bits) = enc.encode(v);
            let got = dec.decode(k, bits).unwrap();
            assert_eq!(got, v);
            enc.confirm(v, v);
            dec.seed(v);
        }
    }

    #[test]
    fn window_bounds_ambiguity_distance() {
        // With a single-entry window, a huge jump needs the full width.
        let mut enc = WlsbEncoder::new(sn_params(1));
        enc.confirm(0, 0);
        let (k, _) = enc.encode(40000);
        assert_eq!(k, 16);
    }

    #[test]
    fn negative_shift_for_timestamps() {
        let params = WlsbParams {
            width: 32,
            p: -1,
            window: 4,
        };
        let mut enc = WlsbEncoder::new(params);
        let mut dec = WlsbDecoder::new(params);
        enc.confirm(2000, 0);
        dec.seed(2000);
        let (k, bits) = enc.encode(2160);
        assert_eq!(dec.decode(k, bits).unwrap(), 2160);
    }

    #[test]
    fn decode_without_seed_is_malformed() {
        let dec = WlsbDecoder::new(sn_params(4));
        assert!(dec.decode(4, 3).is_err());
    }

    #[test]
    fn stale_entries_are_evicted() {
        let mut enc = WlsbEncoder::new(sn_params(64));
        enc.confirm(10, 0);
        // Jump sn far enough that the half-period purge drops the old entry.
        enc.confirm(20, 40000);
        assert_eq!(enc.entries.len(), 1);
    }
}
