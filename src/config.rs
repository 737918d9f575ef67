//! Endpoint configuration (ambient C0, §4.10, §6).
//!
//! Bundles every tunable named in §6 into two `serde`-serializable
//! structs so a caller can load them from a config file or environment
//! the same way the rest of this crate's ambient stack expects, rather
//! than threading a dozen constructor arguments through.

use serde::{Deserialize, Serialize};

/// CID space size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CidType {
    /// 4-bit CID, embedded in the first octet or an add-CID octet.
    Small,
    /// 14-bit CID, SDVL-encoded.
    Large,
}

/// Compressor operating mode (§4.6). Only `Unidirectional` is reachable
/// without a feedback channel; `Optimistic`/`Reliable` additionally
/// consume FEEDBACK packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// U-mode: no feedback, confidence built from repetition counts and
    /// timeouts alone.
    Unidirectional,
    /// O-mode: feedback used opportunistically to accelerate transitions.
    Optimistic,
    /// R-mode: decompressor actively drives transitions via feedback.
    Reliable,
}

/// Optional behaviors gated behind explicit opt-in (§6 `features`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Features {
    /// Attempt CRC-guided bit-flip repair of a failed SO/FO decompression
    /// before falling back to a full context damage report.
    pub crc_repair: bool,
    /// Accept packet-format quirks from pre-1.7 compressors (relaxed
    /// Extension 3 flag validation).
    pub compat_v1_6: bool,
}

/// Compressor-side configuration. One instance is bound to a
/// `Compressor` for its lifetime; all contexts it creates share it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Highest CID this endpoint will assign. Must be ≤15 for
    /// [`CidType::Small`] or ≤16383 for [`CidType::Large`].
    pub max_cid: u16,
    /// CID address space.
    pub cid_type: CidType,
    /// Feedback mode.
    pub mode: Mode,
    /// W-LSB sliding window width, 1..=256, should be a power of two.
    pub wlsb_window_width: usize,
    /// Packets between periodic IR refreshes in U-mode; 0 disables.
    pub ir_timeout_packets: u32,
    /// Packets between periodic FO-state refreshes in U-mode.
    pub ir_timeout_fo_packets: u32,
    /// Seconds of inactivity before a context is presumed stale in
    /// U-mode (advisory; this crate has no wall clock of its own — the
    /// caller supplies elapsed time to the relevant operations).
    pub ir_timeout_seconds: u32,
    /// Maximum Reconstructed Reception Unit; 0 disables IR segmentation.
    pub mrru: u16,
    /// UDP destination ports that hint an RTP payload.
    pub rtp_ports: Vec<u16>,
    /// Optional behaviors.
    pub features: Features,
    /// `k` in the decompressor's k-out-of-n state downgrade policy.
    pub k: u32,
    /// `n` in the decompressor's k-out-of-n state downgrade policy.
    pub n: u32,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            max_cid: 15,
            cid_type: CidType::Small,
            mode: Mode::Unidirectional,
            wlsb_window_width: 4,
            ir_timeout_packets: 1700,
            ir_timeout_fo_packets: 700,
            ir_timeout_seconds: 200,
            mrru: 0,
            rtp_ports: Vec::new(),
            features: Features::default(),
            k: 1,
            n: 16,
        }
    }
}

impl EndpointConfig {
    /// True if `cid` fits within this configuration's CID space.
    pub fn cid_in_range(&self, cid: u16) -> bool {
        let space_max = match self.cid_type {
            CidType::Small => 15,
            CidType::Large => 16383,
        };
        cid <= self.max_cid.min(space_max)
    }
}

/// Decompressor-side configuration. Distinct from [`EndpointConfig`]
/// because a decompressor may legitimately run with a different
/// `wlsb_window_width`/`mrru` than its peer compressor advertises, and
/// never needs `rtp_ports` (the profile is carried explicitly in IR).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompressorConfig {
    /// Highest CID this endpoint will track a context for.
    pub max_cid: u16,
    /// CID address space.
    pub cid_type: CidType,
    /// Feedback mode.
    pub mode: Mode,
    /// W-LSB sliding window width used when seeding decoders from IR.
    pub wlsb_window_width: usize,
    /// Maximum Reconstructed Reception Unit for segment reassembly; 0
    /// disables segmentation (payloads must already be fully reassembled
    /// by the caller).
    pub mrru: u16,
    /// Optional behaviors.
    pub features: Features,
    /// `k` in the k-out-of-n state downgrade policy.
    pub k: u32,
    /// `n` in the k-out-of-n state downgrade policy.
    pub n: u32,
}

impl Default for DecompressorConfig {
    fn default() -> Self {
        Self {
            max_cid: 15,
            cid_type: CidType::Small,
            mode: Mode::Unidirectional,
            wlsb_window_width: 4,
            mrru: 0,
            features: Features::default(),
            k: 1,
            n: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let c = EndpointConfig::default();
        assert_eq!(c.max_cid, 15);
        assert_eq!(c.ir_timeout_packets, 1700);
        assert_eq!(c.ir_timeout_fo_packets, 700);
        assert_eq!(c.ir_timeout_seconds, 200);
        assert_eq!(c.k, 1);
        assert_eq!(c.n, 16);
    }

    #[test]
    fn cid_range_respects_small_space_even_if_max_cid_larger() {
        let mut c = EndpointConfig::default();
        c.max_cid = 15;
        c.cid_type = CidType::Small;
        assert!(c.cid_in_range(15));
        assert!(!c.cid_in_range(16));
    }

    #[test]
    fn large_cid_space_allows_up_to_16383() {
        let c = EndpointConfig {
            max_cid: 16383,
            cid_type: CidType::Large,
            ..EndpointConfig::default()
        };
        assert!(c.cid_in_range(16383));
        assert!(!c.cid_in_range(16384));
    }

    #[test]
    fn round_trips_through_json() {
        let c = EndpointConfig::default();
        let s = serde_json::to_string(&c).unwrap();
        let back: EndpointConfig = serde_json::from_str(&s).unwrap();
        assert_eq!(c, back);
    }
}
