//! IP header walker (C5, §4, §9).
//!
//! Parses (and, for the decompressor, rebuilds) an IPv4 or IPv6 header
//! chain far enough to find the innermost transport protocol (UDP, ESP,
//! UDP-Lite, TCP) without ever reading past the enclosing packet — the
//! "pointer arithmetic through extension chains" design note calls this
//! out explicitly as a class of bug the original C implementation did not
//! guard against.

use crate::error::{Error, Result};

/// IP protocol numbers this core cares about.
pub mod proto {
    /// IPv6 Hop-by-Hop Options.
    pub const HOPOPT: u8 = 0;
    /// TCP.
    pub const TCP: u8 = 6;
    /// UDP.
    pub const UDP: u8 = 17;
    /// IPv6 Routing header.
    pub const IPV6_ROUTE: u8 = 43;
    /// IPv6 Fragment header.
    pub const IPV6_FRAG: u8 = 44;
    /// Encapsulating Security Payload.
    pub const ESP: u8 = 50;
    /// IPv6 Destination Options.
    pub const IPV6_OPTS: u8 = 60;
    /// UDP-Lite.
    pub const UDPLITE: u8 = 136;
}

/// One header in the chain: its protocol/next-header value, and the byte
/// range it occupies in the original packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderSpan {
    /// Protocol number of *this* header (e.g. 6 for TCP, 0 for
    /// hop-by-hop options).
    pub proto: u8,
    /// Offset of this header's first byte in the packet.
    pub offset: usize,
    /// Length of this header in bytes.
    pub len: usize,
}

/// A parsed IPv4 header's fixed fields (options, if any, are included in
/// `HeaderSpan::len` but not individually modeled here).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Fields {
    /// Type of Service / DSCP+ECN byte.
    pub tos: u8,
    /// Time To Live.
    pub ttl: u8,
    /// Upper-layer protocol.
    pub protocol: u8,
    /// Identification field (IP-ID).
    pub id: u16,
    /// Don't-Fragment flag.
    pub df: bool,
    /// Source address.
    pub src: [u8; 4],
    /// Destination address.
    pub dst: [u8; 4],
}

/// A parsed IPv6 fixed header's fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Fields {
    /// Traffic Class byte.
    pub traffic_class: u8,
    /// Flow Label (20 bits, stored in the low bits).
    pub flow_label: u32,
    /// Hop Limit.
    pub hop_limit: u8,
    /// `Next Header` of the fixed header (first extension or upper-layer
    /// protocol).
    pub next_header: u8,
    /// Source address.
    pub src: [u8; 16],
    /// Destination address.
    pub dst: [u8; 16],
}

/// Either an IPv4 or IPv6 outer header, as discovered by [`walk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFields {
    /// IPv4.
    V4(Ipv4Fields),
    /// IPv6 (extension headers, if any, are reported separately by
    /// [`walk`]'s `extensions` output).
    V6(Ipv6Fields),
}

/// Result of walking one IP header (and, for IPv6, its extension chain):
/// the parsed fixed fields, the extension spans crossed, and where the
/// next protocol's payload begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkResult {
    /// The outer IP header's fields.
    pub fields: IpFields,
    /// IPv6 extension headers crossed, in order (empty for IPv4 or a
    /// bare IPv6 header).
    pub extensions: Vec<HeaderSpan>,
    /// Protocol number of the payload immediately following the header
    /// chain (UDP, ESP, TCP, UDP-Lite, or an embedded IP for tunnels).
    pub next_proto: u8,
    /// Byte offset in `data` where that payload begins.
    pub payload_offset: usize,
}

/// Parse the IP header chain starting at `data[0]`, stopping at the first
/// non-extension next-header value. Bounds-checks every extension
/// header's declared length against `data.len()` before trusting it —
/// the mandatory check called for in §9.
pub fn walk(data: &[u8]) -> Result<WalkResult> {
    if data.is_empty() {
        return Err(Error::malformed("empty packet"));
    }
    let version = data[0] >> 4;
    match version {
        4 => walk_v4(data),
        6 => walk_v6(data),
        v => Err(Error::malformed(format!("unsupported IP version {v}"))),
    }
}

fn walk_v4(data: &[u8]) -> Result<WalkResult> {
    if data.len() < 20 {
        return Err(Error::malformed("IPv4 header shorter than 20 bytes"));
    }
    let ihl = (data[0] & 0x0f) as usize * 4;
    if ihl < 20 || data.len() < ihl {
        return Err(Error::malformed("IPv4 IHL out of range"));
    }
    let total_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    if total_len > data.len() {
        return Err(Error::malformed("IPv4 total length exceeds buffer"));
    }
    let fields = Ipv4Fields {
        tos: data[1],
        ttl: data[8],
        protocol: data[9],
        id: u16::from_be_bytes([data[4], data[5]]),
        df: data[6] & 0x40 != 0,
        src: [data[12], data[13], data[14], data[15]],
        dst: [data[16], data[17], data[18], data[19]],
    };
    Ok(WalkResult {
        fields: IpFields::V4(fields),
        extensions: Vec::new(),
        next_proto: fields.protocol,
        payload_offset: ihl,
    })
}

fn walk_v6(data: &[u8]) -> Result<WalkResult> {
    if data.len() < 40 {
        return Err(Error::malformed("IPv6 header shorter than 40 bytes"));
    }
    let payload_len = u16::from_be_bytes([data[4], data[5]]) as usize;
    let total_len = 40 + payload_len;
    if total_len > data.len() {
        return Err(Error::malformed("IPv6 payload length exceeds buffer"));
    }
    let fields = Ipv6Fields {
        traffic_class: (data[0] << 4) | (data[1] >> 4),
        flow_label: (u32::from(data[1] & 0x0f) << 16)
            | (u32::from(data[2]) << 8)
            | u32::from(data[3]),
        hop_limit: data[7],
        next_header: data[6],
        src: data[8..24].try_into().unwrap(),
        dst: data[24..40].try_into().unwrap(),
    };

    let mut offset = 40usize;
    let mut next = fields.next_header;
    let mut extensions = Vec::new();
    loop {
        match next {
            proto::HOPOPT | proto::IPV6_ROUTE | proto::IPV6_OPTS => {
                // Mandatory bounds check (§9): never trust a declared
                // extension length past the end of the packet.
                if offset + 2 > total_len {
                    return Err(Error::malformed("IPv6 extension header truncated"));
                }
                let ext_len = (usize::from(data[offset + 1]) + 1) * 8;
                if offset + ext_len > total_len {
                    return Err(Error::malformed(
                        "IPv6 extension header length exceeds enclosing packet",
                    ));
                }
                let this_proto = next;
                next = data[offset];
                extensions.push(HeaderSpan {
                    proto: this_proto,
                    offset,
                    len: ext_len,
                });
                offset += ext_len;
            }
            proto::IPV6_FRAG => {
                if offset + 8 > total_len {
                    return Err(Error::malformed(
                        "IPv6 fragment header exceeds enclosing packet",
                    ));
                }
                let this_proto = next;
                next = data[offset];
                extensions.push(HeaderSpan {
                    proto: this_proto,
                    offset,
                    len: 8,
                });
                offset += 8;
            }
            _ => break,
        }
    }

    Ok(WalkResult {
        fields: IpFields::V6(fields),
        extensions,
        next_proto: next,
        payload_offset: offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_udp_packet() -> Vec<u8> {
        let mut p = vec![0u8; 20 + 8];
        p[0] = 0x45; // version 4, IHL 5
        p[2..4].copy_from_slice(&(28u16).to_be_bytes());
        p[8] = 64; // ttl
        p[9] = proto::UDP;
        p[12..16].copy_from_slice(&[10, 0, 0, 1]);
        p[16..20].copy_from_slice(&[10, 0, 0, 2]);
        p
    }

    #[test]
    fn ipv4_basic_walk() {
        let p = ipv4_udp_packet();
        let r = walk(&p).unwrap();
        assert_eq!(r.next_proto, proto::UDP);
        assert_eq!(r.payload_offset, 20);
        match r.fields {
            IpFields::V4(f) => assert_eq!(f.src, [10, 0, 0, 1]),
            _ => panic!("expected v4"),
        }
    }

    #[test]
    fn ipv4_truncated_is_malformed() {
        let p = vec![0x45u8; 10];
        assert!(walk(&p).is_err());
    }

    fn ipv6_esp_packet() -> Vec<u8> {
        let mut p = vec![0u8; 40 + 8];
        p[0] = 0x60;
        let payload_len = 8u16;
        p[4..6].copy_from_slice(&payload_len.to_be_bytes());
        p[6] = proto::ESP;
        p[7] = 64;
        p
    }

    #[test]
    fn ipv6_basic_walk() {
        let p = ipv6_esp_packet();
        let r = walk(&p).unwrap();
        assert_eq!(r.next_proto, proto::ESP);
        assert_eq!(r.payload_offset, 40);
    }

    #[test]
    fn ipv6_with_hop_by_hop_extension() {
        let mut p = vec![0u8; 40 + 8 + 8];
        p[0] = 0x60;
        p[4..6].copy_from_slice(&(16u16).to_be_bytes());
        p[6] = proto::HOPOPT;
        p[7] = 64;
        // Hop-by-hop: next header = UDP, ext len field = 0 => 8 bytes.
        p[40] = proto::UDP;
        p[41] = 0;
        let r = walk(&p).unwrap();
        assert_eq!(r.next_proto, proto::UDP);
        assert_eq!(r.payload_offset, 48);
        assert_eq!(r.extensions.len(), 1);
        assert_eq!(r.extensions[0].proto, proto::HOPOPT);
    }

    #[test]
    fn ipv6_extension_length_past_packet_is_rejected() {
        let mut p = vec![0u8; 40 + 8];
        p[0] = 0x60;
        p[4..6].copy_from_slice(&(8u16).to_be_bytes());
        p[6] = proto::HOPOPT;
        p[7] = 64;
        // Claims a length field that would run past the packet end.
        p[40] = proto::UDP;
        p[41] = 200;
        assert!(walk(&p).is_err());
    }
}
