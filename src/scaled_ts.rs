//! Scaled RTP timestamp codec (C4, §4.4, RFC 3095 §4.5.3 / RFC 4815).
//!
//! RTP timestamps advance in fixed steps (`TS_STRIDE`) for constant
//! packetization intervals, so once the stride is established the
//! compressor only needs to send a small, W-LSB-encoded `TS_SCALED`
//! counter instead of the full 32-bit timestamp. This module tracks the
//! `INIT_TS -> INIT_STRIDE -> SEND_SCALED` state machine independently on
//! the compressor and decompressor sides.

use crate::error::Result;
use crate::wlsb::{WlsbDecoder, WlsbEncoder, WlsbParams};

const SDVL_MAX: u64 = (1 << 29) - 1;

/// Default number of times `TS_STRIDE` is repeated uncompressed before
/// switching to `SEND_SCALED` (`oa_repetitions`, §3 invariant 4).
pub const DEFAULT_OA_REPETITIONS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TsState {
    InitTs,
    InitStride,
    SendScaled,
}

/// What the packet codec must carry for the timestamp field on this
/// packet, as decided by [`ScaledTsEncoder::encode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsEncoding {
    /// Full, uncompressed timestamp (`INIT_TS`, or a clock discontinuity).
    Unscaled { ts: u32 },
    /// Full timestamp plus the stride candidate being confirmed, or a
    /// forced full resend while scaled (a timestamp jump that doesn't
    /// track SN progression).
    WithStride { ts: u32, stride: u32 },
    /// `TS_SCALED`, W-LSB-encoded against the scaled-value window. `k` is
    /// the minimum width that disambiguates against the current window
    /// (used to decide which packet format still has room); `scaled` is
    /// the full scaled value, which callers mask to the packet format's
    /// actual field width rather than to `k` — the field width is fixed
    /// by packet type, not by the window-minimal `k`.
    Scaled { k: u32, scaled: u32 },
}

fn decompose(ts: u32, stride: u32) -> (u32, u32) {
    if stride == 0 {
        return (0, ts);
    }
    let offset = ts % stride;
    (offset, (ts - offset) / stride)
}

/// Compressor side of the scaled-TS codec.
#[derive(Debug, Clone)]
pub struct ScaledTsEncoder {
    state: TsState,
    stride: u32,
    stride_reps: u32,
    oa_repetitions: u32,
    last_ts: Option<u32>,
    last_sn: Option<u32>,
    last_scaled: Option<u32>,
    /// Set by the most recent [`Self::encode`] call: true iff the
    /// resulting `TS_SCALED` delta equals the SN delta, i.e. the
    /// decompressor could derive TS from SN alone (so e.g. UO-0 may omit
    /// the timestamp entirely).
    deducible: bool,
    wlsb: WlsbEncoder,
}

impl ScaledTsEncoder {
    /// Create an encoder with the given W-LSB window width for
    /// `TS_SCALED`.
    pub fn new(window: usize) -> Self {
        Self {
            state: TsState::InitTs,
            stride: 0,
            stride_reps: 0,
            oa_repetitions: DEFAULT_OA_REPETITIONS,
            last_ts: None,
            last_sn: None,
            last_scaled: None,
            deducible: false,
            wlsb: WlsbEncoder::new(WlsbParams {
                width: 32,
                p: 0,
                window,
            }),
        }
    }

    /// Whether the most recent [`Self::encode`] result is deducible from
    /// SN progression alone (no timestamp bits need to be sent).
    pub fn is_deducible(&self) -> bool {
        self.state == TsState::SendScaled && self.deducible
    }

    /// Encode `ts` for sequence number `sn`, advancing the state machine.
    pub fn encode(&mut self, ts: u32, sn: u32) -> TsEncoding {
        self.deducible = false;
        let Some(old_ts) = self.last_ts else {
            self.reset_to_init_ts(ts, sn);
            return TsEncoding::Unscaled { ts };
        };
        let delta = u64::from(ts.wrapping_sub(old_ts));
        if delta == 0 || delta > SDVL_MAX {
            self.reset_to_init_ts(ts, sn);
            return TsEncoding::Unscaled { ts };
        }
        let delta = delta as u32;
        match self.state {
            TsState::InitTs => {
                self.begin_stride_candidate(delta, ts, sn);
                TsEncoding::WithStride {
                    ts,
                    stride: self.stride,
                }
            }
            TsState::InitStride => {
                if delta == self.stride {
                    self.stride_reps += 1;
                } else {
                    self.begin_stride_candidate(delta, ts, sn);
                    return TsEncoding::WithStride {
                        ts,
                        stride: self.stride,
                    };
                }
                self.last_ts = Some(ts);
                self.last_sn = Some(sn);
                if self.stride_reps >= self.oa_repetitions {
                    self.state = TsState::SendScaled;
                    let (_, scaled) = decompose(ts, self.stride);
                    self.wlsb.confirm(u64::from(scaled), u64::from(sn));
                    self.last_scaled = Some(scaled);
                }
                TsEncoding::WithStride {
                    ts,
                    stride: self.stride,
                }
            }
            TsState::SendScaled => {
                if !delta.is_multiple_of(self.stride.max(1)) || self.stride == 0 {
                    self.begin_stride_candidate(delta, ts, sn);
                    return TsEncoding::WithStride {
                        ts,
                        stride: self.stride,
                    };
                }
                let (_, scaled) = decompose(ts, self.stride);
                let sn_delta = sn.wrapping_sub(self.last_sn.unwrap_or(sn));
                let scaled_delta = scaled.wrapping_sub(self.last_scaled.unwrap_or(scaled));
                self.last_ts = Some(ts);
                self.last_sn = Some(sn);
                if scaled_delta != sn_delta {
                    // RTP TS jump: stride still holds, but resend in full
                    // for robustness rather than trust a stale window.
                    self.last_scaled = Some(scaled);
                    self.wlsb.confirm(u64::from(scaled), u64::from(sn));
                    return TsEncoding::WithStride {
                        ts,
                        stride: self.stride,
                    };
                }
                self.deducible = true;
                self.last_scaled = Some(scaled);
                let (k, _) = self.wlsb.encode(u64::from(scaled));
                self.wlsb.confirm(u64::from(scaled), u64::from(sn));
                TsEncoding::Scaled { k, scaled }
            }
        }
    }

    fn reset_to_init_ts(&mut self, ts: u32, sn: u32) {
        self.state = TsState::InitTs;
        self.stride = 0;
        self.stride_reps = 0;
        self.last_ts = Some(ts);
        self.last_sn = Some(sn);
        self.last_scaled = None;
    }

    fn begin_stride_candidate(&mut self, delta: u32, ts: u32, sn: u32) {
        self.state = TsState::InitStride;
        self.stride = delta;
        self.stride_reps = 1;
        self.last_ts = Some(ts);
        self.last_sn = Some(sn);
        self.last_scaled = None;
    }
}

/// Decompressor side of the scaled-TS codec.
#[derive(Debug, Clone)]
pub struct ScaledTsDecoder {
    stride: u32,
    offset: u32,
    last_sn: Option<u32>,
    last_scaled: Option<u32>,
    wlsb: WlsbDecoder,
}

impl ScaledTsDecoder {
    /// Create a decoder with the given W-LSB window width for
    /// `TS_SCALED`.
    pub fn new(_window: usize) -> Self {
        Self {
            stride: 0,
            offset: 0,
            last_sn: None,
            last_scaled: None,
            wlsb: WlsbDecoder::new(WlsbParams {
                width: 32,
                p: 0,
                window: _window,
            }),
        }
    }

    /// Accept an unscaled (`INIT_TS`) timestamp.
    pub fn accept_unscaled(&mut self, _ts: u32, sn: u32) {
        self.stride = 0;
        self.offset = 0;
        self.last_sn = Some(sn);
        self.last_scaled = None;
    }

    /// Accept an explicit timestamp plus stride candidate/resend.
    pub fn accept_with_stride(&mut self, ts: u32, stride: u32, sn: u32) {
        self.stride = stride;
        let (offset, scaled) = decompose(ts, stride);
        self.offset = offset;
        self.wlsb.seed(u64::from(scaled));
        self.last_scaled = Some(scaled);
        self.last_sn = Some(sn);
    }

    /// Decode `TS_SCALED` bits into a full timestamp.
    pub fn decode_scaled(&mut self, k: u32, bits: u64, sn: u32) -> Result<u32> {
        let scaled = self.wlsb.decode(k, bits)? as u32;
        let ts = scaled.wrapping_mul(self.stride).wrapping_add(self.offset);
        self.wlsb.seed(u64::from(scaled));
        self.last_scaled = Some(scaled);
        self.last_sn = Some(sn);
        Ok(ts)
    }

    /// Derive the timestamp purely from SN progression (UO-0 deducible
    /// case): `scaled_new = scaled_old + (sn_new - sn_old)`.
    pub fn decode_deducible(&mut self, sn: u32) -> Result<u32> {
        let last_scaled = self
            .last_scaled
            .ok_or_else(|| crate::error::Error::malformed("deducible TS with no prior scaled value"))?;
        let last_sn = self.last_sn.unwrap_or(sn);
        let scaled = last_scaled.wrapping_add(sn.wrapping_sub(last_sn));
        let ts = scaled.wrapping_mul(self.stride).wrapping_add(self.offset);
        self.wlsb.seed(u64::from(scaled));
        self.last_scaled = Some(scaled);
        self.last_sn = Some(sn);
        Ok(ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_start_then_steady_state_is_deducible() {
        let mut enc = ScaledTsEncoder::new(16);
        let mut dec = ScaledTsDecoder::new(16);

        // Packet 1: INIT_TS.
        let ts0 = 2000u32;
        match enc.encode(ts0, 0) {
            TsEncoding::Unscaled { ts } => {
                assert_eq!(ts, ts0);
                dec.accept_unscaled(ts, 0);
            }
            other => panic!("expected Unscaled, got {other:?}"),
        }

        // Packets 2..4: INIT_STRIDE, stride=160, confirmed over 3 reps.
        let mut ts = ts0;
        for i in 1..=DEFAULT_OA_REPETITIONS {
            ts += 160;
            match enc.encode(ts, i) {
                TsEncoding::WithStride { ts: t, stride } => {
                    assert_eq!(stride, 160);
                    dec.accept_with_stride(t, stride, i);
                }
                other => panic!("expected WithStride, got {other:?}"),
            }
        }

        // Steady state: deducible, UO-0 could omit TS bits entirely.
        for i in (DEFAULT_OA_REPETITIONS + 1)..(DEFAULT_OA_REPETITIONS + 5) {
            ts += 160;
            let enc_result = enc.encode(ts, i);
            assert!(enc.is_deducible());
            match enc_result {
                TsEncoding::Scaled { .. } => {}
                other => panic!("expected Scaled, got {other:?}"),
            }
            let derived = dec.decode_deducible(i).unwrap();
            assert_eq!(derived, ts);
        }
    }

    #[test]
    fn clock_jump_forces_resend() {
        let mut enc = ScaledTsEncoder::new(16);
        enc.encode(1000, 0);
        for i in 1..=DEFAULT_OA_REPETITIONS {
            enc.encode(1000 + 160 * i, i);
        }
        // A jump that isn't a clean multiple of sn progression * stride.
        let jump_result = enc.encode(1000 + 160 * DEFAULT_OA_REPETITIONS + 5_000_000, 99);
        match jump_result {
            TsEncoding::WithStride { .. } => {}
            other => panic!("expected WithStride resend, got {other:?}"),
        }
    }
}
