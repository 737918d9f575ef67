//! Compressor context FSM and public `Compressor` endpoint (C7, §4.5).
//!
//! One [`Compressor`] owns every context for an endpoint. Each context
//! tracks its own `IR -> FO -> SO` state independently; `compress`
//! dispatches to whichever context matches the packet's flow (creating
//! one on first sight), decides the smallest packet type that still
//! carries enough bits for the decompressor to reconstruct the header,
//! and serializes it.

use std::collections::HashMap;

use crate::config::{EndpointConfig, Mode};
use crate::crc::CrcKind;
use crate::error::{Error, Result};
use crate::feedback::{Feedback, FeedbackQueue};
use crate::headerbuild::{self, Extracted};
use crate::packet::{self, DynamicChain, StaticChain};
use crate::profile::Profile;
use crate::scaled_ts::{ScaledTsEncoder, TsEncoding};
use crate::wlsb::{WlsbEncoder, WlsbParams};

const IR_REPETITIONS: u32 = 3;
const FO_REPETITIONS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompState {
    Ir,
    Fo,
    So,
}

/// Flow identity used to find an existing context (§3 "Flow identity").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FlowKey {
    profile: u16,
    src: Vec<u8>,
    dst: Vec<u8>,
    protocol: u8,
    ports: Option<(u16, u16)>,
    spi: Option<u32>,
}

impl FlowKey {
    fn new(profile: Profile, sc: &StaticChain) -> Self {
        FlowKey {
            profile: profile.id(),
            src: sc_addr_bytes(&sc.src),
            dst: sc_addr_bytes(&sc.dst),
            protocol: sc.protocol,
            ports: sc.ports,
            spi: sc.esp_spi,
        }
    }
}

fn sc_addr_bytes(addr: &crate::packet::Addr) -> Vec<u8> {
    match addr {
        crate::packet::Addr::V4(b) => b.to_vec(),
        crate::packet::Addr::V6(b) => b.to_vec(),
    }
}

struct CompressorContext {
    cid: u16,
    profile: Profile,
    static_chain: StaticChain,
    last_dynamic: DynamicChain,
    state: CompState,
    state_reps: u32,
    packets_since_ir: u32,
    sn_wlsb: WlsbEncoder,
    ip_id_wlsb: WlsbEncoder,
    ts_encoder: Option<ScaledTsEncoder>,
    last_packet_counter: u32,
}

impl CompressorContext {
    fn new(cid: u16, profile: Profile, sc: StaticChain, dc: DynamicChain, window: usize) -> Self {
        let ts_encoder = if profile == Profile::Rtp {
            Some(ScaledTsEncoder::new(window))
        } else {
            None
        };
        Self {
            cid,
            profile,
            static_chain: sc,
            last_dynamic: dc,
            state: CompState::Ir,
            state_reps: 0,
            packets_since_ir: 0,
            sn_wlsb: WlsbEncoder::new(WlsbParams {
                width: 32,
                p: 0,
                window,
            }),
            ip_id_wlsb: WlsbEncoder::new(WlsbParams {
                width: 16,
                p: 0,
                window,
            }),
            ts_encoder,
            last_packet_counter: 0,
        }
    }
}

/// Compressor endpoint: owns every per-flow context for this side of a
/// ROHC session.
pub struct Compressor {
    config: EndpointConfig,
    contexts: HashMap<u16, CompressorContext>,
    flow_index: HashMap<FlowKey, u16>,
    next_cid: u16,
    /// Reserved for RND-mode IP-ID generation; this core always treats
    /// IP-ID as sequential (NBO), so it is not yet called.
    #[allow(dead_code)]
    rng: Box<dyn FnMut() -> u8>,
    pending_feedback_out: FeedbackQueue,
}

impl Compressor {
    /// Create a compressor bound to `config`, drawing randomness for any
    /// future randomized-field handling from `rng` (§9: never a process
    /// global).
    pub fn new(config: EndpointConfig, rng: impl FnMut() -> u8 + 'static) -> Self {
        Self {
            contexts: HashMap::new(),
            flow_index: HashMap::new(),
            next_cid: 0,
            rng: Box::new(rng),
            pending_feedback_out: FeedbackQueue::new(16),
            config,
        }
    }

    /// Accept feedback received from the decompressor peer (O/R modes),
    /// applying NACK/STATIC-NACK as an immediate forced downgrade.
    pub fn accept_feedback(&mut self, cid: u16, fb: &Feedback) {
        if self.config.mode == Mode::Unidirectional {
            return;
        }
        let Some(ctx) = self.contexts.get_mut(&cid) else {
            return;
        };
        if let Feedback::Long { kind, .. } = fb {
            use crate::feedback::AckKind;
            match kind {
                AckKind::StaticNack => {
                    log::warn!("cid {cid}: STATIC-NACK received, forcing IR");
                    ctx.state = CompState::Ir;
                    ctx.state_reps = 0;
                }
                AckKind::Nack => {
                    log::warn!("cid {cid}: NACK received, forcing FO");
                    if ctx.state == CompState::So {
                        ctx.state = CompState::Fo;
                        ctx.state_reps = 0;
                    }
                }
                AckKind::Ack => {}
            }
        }
    }

    fn find_or_create_context(&mut self, extracted: &Extracted) -> Result<u16> {
        let key = FlowKey::new(extracted.profile, &extracted.static_chain);
        if let Some(&cid) = self.flow_index.get(&key) {
            return Ok(cid);
        }
        let cid = self.allocate_cid()?;
        let ctx = CompressorContext::new(
            cid,
            extracted.profile,
            extracted.static_chain.clone(),
            extracted.dynamic_chain,
            self.config.wlsb_window_width,
        );
        self.contexts.insert(cid, ctx);
        self.flow_index.insert(key, cid);
        log::debug!("cid {cid}: new context for profile {:?}", extracted.profile);
        Ok(cid)
    }

    fn allocate_cid(&mut self) -> Result<u16> {
        let space_max = match self.config.cid_type {
            crate::config::CidType::Small => 15u16,
            crate::config::CidType::Large => 16383u16,
        };
        let max = self.config.max_cid.min(space_max);
        if (self.contexts.len() as u32) > u32::from(max) {
            return Err(Error::TransientResource);
        }
        for cid in 0..=max {
            if !self.contexts.contains_key(&cid) {
                self.next_cid = cid.wrapping_add(1);
                return Ok(cid);
            }
        }
        Err(Error::TransientResource)
    }

    /// Compress one packet. `packet_counter` is a caller-maintained,
    /// monotonically increasing logical counter used to drive periodic
    /// IR refresh (§5: the caller supplies timeout-relevant counters).
    pub fn compress(&mut self, ip_packet: &[u8], packet_counter: u32) -> Result<Vec<u8>> {
        let extracted = headerbuild::extract(ip_packet, &self.config.rtp_ports)?;
        let cid = self.find_or_create_context(&extracted)?;
        let ctx = self.contexts.get_mut(&cid).expect("just inserted");

        let static_changed = ctx.static_chain != extracted.static_chain;
        ctx.packets_since_ir += 1;
        let periodic_due = self.config.ir_timeout_packets > 0
            && ctx.packets_since_ir >= self.config.ir_timeout_packets;
        if static_changed || periodic_due {
            ctx.state = CompState::Ir;
            ctx.state_reps = 0;
            ctx.packets_since_ir = 0;
            ctx.static_chain = extracted.static_chain.clone();
        }

        let new_sn = extracted.dynamic_chain.logical_sn(extracted.profile);
        let mut body = match ctx.state {
            CompState::Ir => {
                let body = packet::encode_ir(
                    extracted.profile,
                    &ctx.static_chain,
                    Some(extracted.dynamic_chain),
                );
                ctx.state_reps += 1;
                log::debug!("cid {cid}: IR ({}/{})", ctx.state_reps, IR_REPETITIONS);
                if ctx.state_reps >= IR_REPETITIONS {
                    ctx.state = CompState::Fo;
                    ctx.state_reps = 0;
                }
                body
            }
            CompState::Fo => {
                let body = packet::encode_ir_dyn(extracted.profile, extracted.dynamic_chain);
                ctx.state_reps += 1;
                log::debug!("cid {cid}: IR-DYN ({}/{})", ctx.state_reps, FO_REPETITIONS);
                if ctx.state_reps >= FO_REPETITIONS {
                    ctx.state = CompState::So;
                    ctx.state_reps = 0;
                }
                body
            }
            CompState::So => {
                match build_so_packet(ctx, extracted.profile, &extracted.dynamic_chain, new_sn) {
                    Some(body) => body,
                    None => {
                        log::debug!("cid {cid}: SO packet didn't fit, downgrading to FO");
                        ctx.state = CompState::Fo;
                        ctx.state_reps = 0;
                        let body = packet::encode_ir_dyn(extracted.profile, extracted.dynamic_chain);
                        body
                    }
                }
            }
        };

        ctx.sn_wlsb.confirm(u64::from(new_sn), u64::from(new_sn));
        if extracted.profile != Profile::Rtp {
            ctx.ip_id_wlsb.confirm(
                u64::from(extracted.dynamic_chain.ip_id),
                u64::from(new_sn),
            );
        }
        ctx.last_dynamic = extracted.dynamic_chain;
        ctx.last_packet_counter = packet_counter;

        body.extend_from_slice(&extracted.payload);
        packet::wrap_cid(body, cid, self.config.cid_type)
    }

    /// Drain feedback this endpoint wants to send the peer. Unused in
    /// unidirectional mode.
    pub fn drain_feedback(&mut self) -> Vec<Feedback> {
        self.pending_feedback_out.drain()
    }
}

fn build_so_packet(
    ctx: &mut CompressorContext,
    profile: Profile,
    dc: &DynamicChain,
    new_sn: u32,
) -> Option<Vec<u8>> {
    let sn_k = ctx.sn_wlsb.required_k(u64::from(new_sn));

    if profile == Profile::Rtp {
        // UO-0 carries no marker bit at all, so it's only a safe choice
        // when the marker hasn't changed since the last packet this
        // context sent — otherwise the decompressor would silently
        // reconstruct the stale marker (apply_sn_ts carries it forward
        // from the context) and fail the header CRC.
        let marker_unchanged = dc.rtp_marker == ctx.last_dynamic.rtp_marker;
        let ts_encoder = ctx.ts_encoder.as_mut()?;
        let ts_encoding = ts_encoder.encode(dc.ts, new_sn);
        match ts_encoding {
            TsEncoding::Scaled { .. } if sn_k <= 4 && ts_encoder.is_deducible() && marker_unchanged => {
                let crc3 = packet::header_crc(CrcKind::Crc3, &ctx.static_chain, *dc, profile);
                Some(vec![packet::encode_uo0(new_sn as u8, crc3)])
            }
            TsEncoding::Scaled { k, scaled } if k <= 6 && sn_k <= 4 => {
                let crc3 = packet::header_crc(CrcKind::Crc3, &ctx.static_chain, *dc, profile);
                Some(
                    packet::encode_uo1_rtp(scaled as u8, dc.rtp_marker, new_sn as u8, crc3)
                        .to_vec(),
                )
            }
            TsEncoding::Scaled { k, scaled } if k <= 7 && sn_k <= 5 => {
                let crc7 = packet::header_crc(CrcKind::Crc7, &ctx.static_chain, *dc, profile);
                Some(
                    packet::encode_uor2_rtp(new_sn as u8, scaled as u8, dc.rtp_marker, crc7)
                        .to_vec(),
                )
            }
            _ => None,
        }
    } else {
        let id_k = ctx.ip_id_wlsb.required_k(u64::from(dc.ip_id));
        if sn_k <= 4 && id_k == 0 {
            let crc3 = packet::header_crc(CrcKind::Crc3, &ctx.static_chain, *dc, profile);
            Some(vec![packet::encode_uo0(new_sn as u8, crc3)])
        } else if sn_k <= 5 && id_k <= 6 {
            // The UO-1 IP-ID field is a fixed 6 bits wide; send the
            // value's low 6 bits directly rather than the (possibly
            // narrower) W-LSB-minimal `k` bits, since the decoder always
            // decodes against the fixed field width.
            let crc3 = packet::header_crc(CrcKind::Crc3, &ctx.static_chain, *dc, profile);
            Some(packet::encode_uo1_ip(dc.ip_id as u8, new_sn as u8, crc3).to_vec())
        } else if sn_k <= 5 && id_k == 0 {
            // UOR-2 carries no IP-ID bits in this core (no extension 0-3
            // support, see DESIGN.md) so it's only safe when IP-ID
            // doesn't need updating.
            let crc7 = packet::header_crc(CrcKind::Crc7, &ctx.static_chain, *dc, profile);
            Some(packet::encode_uor2(new_sn as u8, crc7).to_vec())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;

    fn rtp_test_packet(sn: u16, ts: u32) -> Vec<u8> {
        let mut rtp = vec![0x80u8, 96];
        rtp.extend_from_slice(&sn.to_be_bytes());
        rtp.extend_from_slice(&ts.to_be_bytes());
        rtp.extend_from_slice(&0xAABBCCDDu32.to_be_bytes());
        rtp.extend_from_slice(b"hello");
        let mut udp = vec![0u8; 8];
        udp[0..2].copy_from_slice(&5004u16.to_be_bytes());
        udp[2..4].copy_from_slice(&5004u16.to_be_bytes());
        udp[4..6].copy_from_slice(&((8 + rtp.len()) as u16).to_be_bytes());
        udp.extend_from_slice(&rtp);

        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&((20 + udp.len()) as u16).to_be_bytes());
        ip[4..6].copy_from_slice(&(sn).to_be_bytes());
        ip[8] = 64;
        ip[9] = 17;
        ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
        ip[16..20].copy_from_slice(&[10, 0, 0, 2]);
        ip.extend_from_slice(&udp);
        ip
    }

    #[test]
    fn first_packets_are_ir_then_steady_state_shrinks() {
        let config = EndpointConfig {
            rtp_ports: vec![5004],
            ..EndpointConfig::default()
        };
        let mut comp = Compressor::new(config, || 0);
        let mut sizes = Vec::new();
        for i in 0..10u16 {
            let pkt = rtp_test_packet(1000 + i, 2000 + 160 * u32::from(i));
            let out = comp.compress(&pkt, u32::from(i)).unwrap();
            sizes.push(out.len());
        }
        assert!(sizes[0] >= 20, "first packet should be IR-sized");
        assert!(
            sizes[9] < sizes[0],
            "steady state should be much smaller than IR"
        );
    }
}
