//! Full-packet extraction and reconstruction.
//!
//! ROHC only compresses the header chain; the transport payload passes
//! through unchanged. This module is the seam between a real IPv4/IPv6
//! packet and the [`crate::packet::StaticChain`]/
//! [`crate::packet::DynamicChain`] pair the rest of the core operates
//! on: `extract` walks a packet into chains plus an opaque payload tail,
//! `rebuild` does the inverse, recomputing the fields (lengths,
//! checksums) that depend on the payload size.
//!
//! IPv4 packets without options and IPv6 packets without extension
//! headers round-trip byte-for-byte. Packets with IP options/extensions,
//! or the TCP/IP-only/uncompressed profiles, carry everything after the
//! fixed IP header as opaque payload rather than being parsed further —
//! full TCP option handling is out of scope (§1 Non-goals).

use crate::iphdr::{self, proto, IpFields};
use crate::error::{Error, Result};
use crate::packet::{Addr, DynamicChain, StaticChain};
use crate::profile::{classify, Profile};

/// Parsed packet ready for compression: the static/dynamic chains, the
/// classified profile, and whatever payload bytes fall outside the
/// fields this core models.
pub struct Extracted {
    /// Classified profile.
    pub profile: Profile,
    /// Static chain fields.
    pub static_chain: StaticChain,
    /// Dynamic chain fields.
    pub dynamic_chain: DynamicChain,
    /// Opaque trailing payload, carried through unchanged.
    pub payload: Vec<u8>,
}

/// Parse `packet` into its header chains and payload, classifying its
/// profile using `rtp_ports` as the RTP-hint list (§9 classifier).
pub fn extract(packet: &[u8], rtp_ports: &[u16]) -> Result<Extracted> {
    let walk = iphdr::walk(packet)?;
    let transport = &packet[walk.payload_offset..];
    let profile = classify(&walk, transport, rtp_ports);

    let (tos, ttl, df, ip_id, src, dst, protocol) = match walk.fields {
        IpFields::V4(f) => (
            f.tos,
            f.ttl,
            f.df,
            f.id,
            Addr::V4(f.src),
            Addr::V4(f.dst),
            f.protocol,
        ),
        IpFields::V6(f) => (
            f.traffic_class,
            f.hop_limit,
            false,
            0,
            Addr::V6(f.src),
            Addr::V6(f.dst),
            walk.next_proto,
        ),
    };

    let mut dc = DynamicChain {
        tos,
        ttl,
        df,
        ip_id,
        ..Default::default()
    };
    let mut sc = StaticChain {
        src,
        dst,
        protocol,
        ports: None,
        rtp_ssrc: None,
        esp_spi: None,
    };

    let payload = match profile {
        Profile::Udp | Profile::UdpLite => {
            if transport.len() < 8 {
                return Err(Error::malformed("truncated UDP header"));
            }
            let src_port = u16::from_be_bytes([transport[0], transport[1]]);
            let dst_port = u16::from_be_bytes([transport[2], transport[3]]);
            sc.ports = Some((src_port, dst_port));
            dc.udp_checksum = u16::from_be_bytes([transport[6], transport[7]]);
            dc.sn = u32::from(ip_id); // no inherent UDP SN; synthesize from IP-ID
            transport[8..].to_vec()
        }
        Profile::Rtp => {
            if transport.len() < 8 + 12 {
                return Err(Error::malformed("truncated UDP/RTP header"));
            }
            let src_port = u16::from_be_bytes([transport[0], transport[1]]);
            let dst_port = u16::from_be_bytes([transport[2], transport[3]]);
            sc.ports = Some((src_port, dst_port));
            dc.udp_checksum = u16::from_be_bytes([transport[6], transport[7]]);
            let rtp = &transport[8..];
            let cc = rtp[0] & 0x0f;
            dc.rtp_marker = rtp[1] & 0x80 != 0;
            dc.rtp_pt = rtp[1] & 0x7f;
            dc.sn = u32::from(u16::from_be_bytes([rtp[2], rtp[3]]));
            dc.ts = u32::from_be_bytes([rtp[4], rtp[5], rtp[6], rtp[7]]);
            sc.rtp_ssrc = Some(u32::from_be_bytes([rtp[8], rtp[9], rtp[10], rtp[11]]));
            let rtp_header_len = 12 + 4 * cc as usize;
            if rtp.len() < rtp_header_len {
                return Err(Error::malformed("truncated RTP CSRC list"));
            }
            rtp[rtp_header_len..].to_vec()
        }
        Profile::Esp => {
            if transport.len() < 8 {
                return Err(Error::malformed("truncated ESP header"));
            }
            sc.esp_spi = Some(u32::from_be_bytes([
                transport[0],
                transport[1],
                transport[2],
                transport[3],
            ]));
            dc.esp_sn = u32::from_be_bytes([transport[4], transport[5], transport[6], transport[7]]);
            transport[8..].to_vec()
        }
        Profile::Ip | Profile::Tcp | Profile::Uncompressed => transport.to_vec(),
    };

    Ok(Extracted {
        profile,
        static_chain: sc,
        dynamic_chain: dc,
        payload,
    })
}

/// Rebuild a full packet from its chains and trailing payload, assuming
/// IPv4 has no options and IPv6 has no extension headers.
pub fn rebuild(profile: Profile, sc: &StaticChain, dc: DynamicChain, payload: &[u8]) -> Vec<u8> {
    let transport = match profile {
        Profile::Udp | Profile::UdpLite => {
            let (s, d) = sc.ports.unwrap_or((0, 0));
            build_udp(s, d, dc.udp_checksum, payload)
        }
        Profile::Rtp => {
            let (s, d) = sc.ports.unwrap_or((0, 0));
            let rtp = build_rtp(dc, sc.rtp_ssrc.unwrap_or(0), payload);
            build_udp(s, d, dc.udp_checksum, &rtp)
        }
        Profile::Esp => {
            let mut out = Vec::with_capacity(8 + payload.len());
            out.extend_from_slice(&sc.esp_spi.unwrap_or(0).to_be_bytes());
            out.extend_from_slice(&dc.esp_sn.to_be_bytes());
            out.extend_from_slice(payload);
            out
        }
        Profile::Ip | Profile::Tcp | Profile::Uncompressed => payload.to_vec(),
    };

    match &sc.src {
        Addr::V4(_) => build_ipv4(sc, dc, &transport),
        Addr::V6(_) => build_ipv6(sc, dc, &transport),
    }
}

fn build_udp(src_port: u16, dst_port: u16, checksum: u16, payload: &[u8]) -> Vec<u8> {
    let len = 8 + payload.len();
    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(&src_port.to_be_bytes());
    out.extend_from_slice(&dst_port.to_be_bytes());
    out.extend_from_slice(&(len as u16).to_be_bytes());
    out.extend_from_slice(&checksum.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn build_rtp(dc: DynamicChain, ssrc: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + payload.len());
    out.push(0x80); // V=2, P=0, X=0, CC=0
    out.push((u8::from(dc.rtp_marker) << 7) | (dc.rtp_pt & 0x7f));
    out.extend_from_slice(&(dc.sn as u16).to_be_bytes());
    out.extend_from_slice(&dc.ts.to_be_bytes());
    out.extend_from_slice(&ssrc.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn build_ipv4(sc: &StaticChain, dc: DynamicChain, transport: &[u8]) -> Vec<u8> {
    let Addr::V4(src) = sc.src else { unreachable!() };
    let Addr::V4(dst) = sc.dst else { unreachable!() };
    let total_len = 20 + transport.len();
    let mut h = vec![0u8; 20];
    h[0] = 0x45;
    h[1] = dc.tos;
    h[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
    h[4..6].copy_from_slice(&dc.ip_id.to_be_bytes());
    h[6] = if dc.df { 0x40 } else { 0 };
    h[8] = dc.ttl;
    h[9] = sc.protocol;
    h[12..16].copy_from_slice(&src);
    h[16..20].copy_from_slice(&dst);
    let checksum = ip_checksum(&h);
    h[10..12].copy_from_slice(&checksum.to_be_bytes());
    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(&h);
    out.extend_from_slice(transport);
    out
}

fn build_ipv6(sc: &StaticChain, dc: DynamicChain, transport: &[u8]) -> Vec<u8> {
    let Addr::V6(src) = sc.src else { unreachable!() };
    let Addr::V6(dst) = sc.dst else { unreachable!() };
    let mut h = vec![0u8; 40];
    h[0] = 0x60 | (dc.tos >> 4);
    h[1] = dc.tos << 4;
    h[4..6].copy_from_slice(&(transport.len() as u16).to_be_bytes());
    h[6] = sc.protocol;
    h[7] = dc.ttl;
    h[8..24].copy_from_slice(&src);
    h[24..40].copy_from_slice(&dst);
    let mut out = Vec::with_capacity(40 + transport.len());
    out.extend_from_slice(&h);
    out.extend_from_slice(transport);
    out
}

/// Standard Internet checksum (RFC 1071) over an IPv4 header with the
/// checksum field itself zeroed.
fn ip_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in header.chunks(2) {
        let word = if chunk.len() == 2 {
            u16::from_be_bytes([chunk[0], chunk[1]])
        } else {
            u16::from_be_bytes([chunk[0], 0])
        };
        sum += u32::from(word);
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Next-header/protocol byte used by a profile's on-the-wire transport,
/// for test fixture construction.
pub fn protocol_for(profile: Profile) -> u8 {
    match profile {
        Profile::Udp | Profile::Rtp => proto::UDP,
        Profile::UdpLite => proto::UDPLITE,
        Profile::Esp => proto::ESP,
        Profile::Tcp => proto::TCP,
        Profile::Ip | Profile::Uncompressed => 253,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtp_packet(sn: u16, ts: u32, marker: bool) -> Vec<u8> {
        let ssrc = 0xAABBCCDDu32;
        let mut rtp = vec![0x80u8, (u8::from(marker) << 7) | 96];
        rtp.extend_from_slice(&sn.to_be_bytes());
        rtp.extend_from_slice(&ts.to_be_bytes());
        rtp.extend_from_slice(&ssrc.to_be_bytes());
        rtp.extend_from_slice(b"payload-bytes");
        let udp = build_udp(5004, 5004, 0x1234, &rtp);
        let sc = StaticChain {
            src: Addr::V4([192, 168, 1, 1]),
            dst: Addr::V4([192, 168, 1, 2]),
            protocol: proto::UDP,
            ports: Some((5004, 5004)),
            rtp_ssrc: Some(ssrc),
            esp_spi: None,
        };
        let dc = DynamicChain {
            tos: 0,
            ttl: 60,
            df: true,
            ip_id: 7,
            ..Default::default()
        };
        build_ipv4(&sc, dc, &udp)
    }

    #[test]
    fn extract_then_rebuild_rtp_is_byte_identical() {
        let original = rtp_packet(1000, 2000, true);
        let extracted = extract(&original, &[5004]).unwrap();
        assert_eq!(extracted.profile, Profile::Rtp);
        let rebuilt = rebuild(
            extracted.profile,
            &extracted.static_chain,
            extracted.dynamic_chain,
            &extracted.payload,
        );
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn ipv4_checksum_is_verifiably_correct() {
        let packet = rtp_packet(1, 2, false);
        let header = &packet[..20];
        // Checksumming the header with the checksum field included
        // should fold to zero for a correctly-computed checksum.
        assert_eq!(ip_checksum(header), 0);
    }
}
