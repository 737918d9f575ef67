//! Profile registry and classifier (C6, §3, §9).
//!
//! A ROHC context is always bound to exactly one compression profile for
//! its lifetime. This module names the profiles this core implements and
//! picks one for a fresh flow by inspecting its header chain — the same
//! job the compressor's context-creation path does in the reference
//! description, just without the byte-compare-against-a-running-context
//! machinery, since here it only ever runs once, up front.

use crate::iphdr::{proto, IpFields, WalkResult};

/// ROHC profile identifiers this core implements (§3, C6 design note).
/// Numeric values match RFC 3095/3843/4815/5225 profile IDs so they can
/// be written directly into IR packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    /// Profile 0x0000: no compression, header passed through unchanged.
    Uncompressed,
    /// Profile 0x0004: IP-only (no recognized transport).
    Ip,
    /// Profile 0x0002: IP/UDP.
    Udp,
    /// Profile 0x0003: IP/ESP.
    Esp,
    /// Profile 0x0001: IP/UDP/RTP.
    Rtp,
    /// Profile 0x0008: IP/UDP-Lite.
    UdpLite,
    /// Profile 0x0006: IP/TCP.
    Tcp,
}

impl Profile {
    /// 16-bit IANA profile identifier as carried in the IR packet's
    /// profile octet/word (§6).
    pub fn id(self) -> u16 {
        match self {
            Profile::Uncompressed => 0x0000,
            Profile::Rtp => 0x0001,
            Profile::Udp => 0x0002,
            Profile::Esp => 0x0003,
            Profile::Ip => 0x0004,
            Profile::Tcp => 0x0006,
            Profile::UdpLite => 0x0008,
        }
    }

    /// Look up a profile by its wire identifier.
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            0x0000 => Some(Profile::Uncompressed),
            0x0001 => Some(Profile::Rtp),
            0x0002 => Some(Profile::Udp),
            0x0003 => Some(Profile::Esp),
            0x0004 => Some(Profile::Ip),
            0x0006 => Some(Profile::Tcp),
            0x0008 => Some(Profile::UdpLite),
            _ => None,
        }
    }
}

/// Classify a walked IP header chain into the most specific profile this
/// core supports, given the set of UDP ports configured as carrying RTP
/// (§6 `rtp_ports`).
///
/// Falls back from most to least specific: RTP requires both a UDP
/// payload on a configured port *and* a payload that parses as a
/// plausible RTP header (version 2, per §4.9); short of that it's plain
/// UDP, then the bare-IP or ESP/TCP/UDP-Lite profiles, and finally
/// [`Profile::Uncompressed`] for anything unrecognized.
pub fn classify(walk: &WalkResult, payload: &[u8], rtp_ports: &[u16]) -> Profile {
    match walk.next_proto {
        proto::UDP => {
            if payload.len() >= 8 {
                let dst_port = u16::from_be_bytes([payload[2], payload[3]]);
                if rtp_ports.contains(&dst_port) && looks_like_rtp(&payload[8..]) {
                    return Profile::Rtp;
                }
            }
            Profile::Udp
        }
        proto::UDPLITE => Profile::UdpLite,
        proto::ESP => Profile::Esp,
        proto::TCP => Profile::Tcp,
        _ => match walk.fields {
            IpFields::V4(_) | IpFields::V6(_) => Profile::Ip,
        },
    }
}

fn looks_like_rtp(rtp_payload: &[u8]) -> bool {
    match rtp_payload.first() {
        Some(b) => (b >> 6) == 2,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip() {
        for p in [
            Profile::Uncompressed,
            Profile::Ip,
            Profile::Udp,
            Profile::Esp,
            Profile::Rtp,
            Profile::UdpLite,
            Profile::Tcp,
        ] {
            assert_eq!(Profile::from_id(p.id()), Some(p));
        }
    }

    #[test]
    fn unknown_id_is_none() {
        assert_eq!(Profile::from_id(0xBEEF), None);
    }

    fn v4_walk(next_proto: u8) -> WalkResult {
        use crate::iphdr::Ipv4Fields;
        WalkResult {
            fields: IpFields::V4(Ipv4Fields {
                tos: 0,
                ttl: 64,
                protocol: next_proto,
                id: 0,
                df: false,
                src: [10, 0, 0, 1],
                dst: [10, 0, 0, 2],
            }),
            extensions: Vec::new(),
            next_proto,
            payload_offset: 20,
        }
    }

    #[test]
    fn udp_on_rtp_port_with_rtp_header_classifies_as_rtp() {
        let walk = v4_walk(proto::UDP);
        let mut payload = vec![0u8; 8 + 12];
        payload[2..4].copy_from_slice(&(5004u16).to_be_bytes());
        payload[8] = 0x80; // RTP version 2
        assert_eq!(classify(&walk, &payload, &[5004]), Profile::Rtp);
    }

    #[test]
    fn udp_not_on_rtp_port_is_plain_udp() {
        let walk = v4_walk(proto::UDP);
        let mut payload = vec![0u8; 8 + 12];
        payload[2..4].copy_from_slice(&(9999u16).to_be_bytes());
        payload[8] = 0x80;
        assert_eq!(classify(&walk, &payload, &[5004]), Profile::Udp);
    }

    #[test]
    fn esp_classifies_directly() {
        let walk = v4_walk(proto::ESP);
        assert_eq!(classify(&walk, &[], &[]), Profile::Esp);
    }

    #[test]
    fn unrecognized_transport_falls_back_to_ip() {
        let walk = v4_walk(253); // "use for experimentation"
        assert_eq!(classify(&walk, &[], &[]), Profile::Ip);
    }
}
