//! Packet format codec (C9, §4.7, §4.9 table).
//!
//! Builds and parses the on-the-wire ROHC packet shapes: the CID
//! envelope (add-CID octet for small CIDs, SDVL CID for large), IR and
//! IR-DYN (full/partial header chains, CRC-8 guarded), and the
//! steady-state UO-0/UO-1/UOR-2 family (CRC-3 or CRC-7 guarded, carrying
//! only the W-LSB bits the context FSMs decide are needed).
//!
//! This module only packs and unpacks bits and runs the CRC check; it
//! never decides *which* packet type to use or *how many* bits a field
//! needs — that's the compressor/decompressor context FSMs' job,
//! consulting the W-LSB and scaled-TS codecs directly.

use crate::bitstream::{encode_sdvl, BitReader};
use crate::config::CidType;
use crate::crc::{crc, CrcKind};
use crate::error::{Error, Result};
use crate::profile::Profile;

/// Either an IPv4 or IPv6 address, stored as raw bytes so the static
/// chain serializer doesn't need to special-case length everywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addr {
    /// IPv4.
    V4([u8; 4]),
    /// IPv6.
    V6([u8; 16]),
}

impl Addr {
    fn version(&self) -> u8 {
        match self {
            Addr::V4(_) => 4,
            Addr::V6(_) => 6,
        }
    }

    fn bytes(&self) -> &[u8] {
        match self {
            Addr::V4(b) => b,
            Addr::V6(b) => b,
        }
    }

    fn from_bytes(version: u8, data: &[u8]) -> Result<(Self, usize)> {
        match version {
            4 => {
                let b: [u8; 4] = data
                    .get(..4)
                    .ok_or_else(|| Error::malformed("truncated IPv4 address"))?
                    .try_into()
                    .unwrap();
                Ok((Addr::V4(b), 4))
            }
            6 => {
                let b: [u8; 16] = data
                    .get(..16)
                    .ok_or_else(|| Error::malformed("truncated IPv6 address"))?
                    .try_into()
                    .unwrap();
                Ok((Addr::V6(b), 16))
            }
            v => Err(Error::malformed(format!("bad IP version {v}"))),
        }
    }
}

/// Fields frozen at context creation (§3): addresses, ports, SPI — never
/// expected to change across a flow's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticChain {
    /// Outer source address.
    pub src: Addr,
    /// Outer destination address.
    pub dst: Addr,
    /// Next-protocol value (UDP, ESP, TCP, ...).
    pub protocol: u8,
    /// UDP/UDP-Lite/TCP (src, dst) ports, if the profile carries a
    /// transport header with ports.
    pub ports: Option<(u16, u16)>,
    /// RTP SSRC, RTP profile only.
    pub rtp_ssrc: Option<u32>,
    /// ESP SPI, ESP profile only.
    pub esp_spi: Option<u32>,
}

impl StaticChain {
    fn fields_for(profile: Profile) -> (bool, bool, bool) {
        // (has_ports, has_ssrc, has_spi)
        match profile {
            Profile::Udp | Profile::UdpLite | Profile::Tcp => (true, false, false),
            Profile::Rtp => (true, true, false),
            Profile::Esp => (false, false, true),
            Profile::Ip | Profile::Uncompressed => (false, false, false),
        }
    }

    fn to_bytes(&self, profile: Profile) -> Vec<u8> {
        let (has_ports, has_ssrc, has_spi) = Self::fields_for(profile);
        let mut out = Vec::new();
        out.push(self.src.version());
        out.extend_from_slice(self.src.bytes());
        out.extend_from_slice(self.dst.bytes());
        out.push(self.protocol);
        if has_ports {
            let (s, d) = self.ports.unwrap_or((0, 0));
            out.extend_from_slice(&s.to_be_bytes());
            out.extend_from_slice(&d.to_be_bytes());
        }
        if has_ssrc {
            out.extend_from_slice(&self.rtp_ssrc.unwrap_or(0).to_be_bytes());
        }
        if has_spi {
            out.extend_from_slice(&self.esp_spi.unwrap_or(0).to_be_bytes());
        }
        out
    }

    fn from_bytes(profile: Profile, data: &[u8]) -> Result<(Self, usize)> {
        let (has_ports, has_ssrc, has_spi) = Self::fields_for(profile);
        if data.is_empty() {
            return Err(Error::malformed("truncated static chain"));
        }
        let version = data[0];
        let mut off = 1;
        let (src, n) = Addr::from_bytes(version, &data[off..])?;
        off += n;
        let (dst, n) = Addr::from_bytes(version, &data[off..])?;
        off += n;
        let protocol = *data
            .get(off)
            .ok_or_else(|| Error::malformed("truncated static chain protocol"))?;
        off += 1;
        let mut ports = None;
        if has_ports {
            let s = read_u16(data, off)?;
            let d = read_u16(data, off + 2)?;
            ports = Some((s, d));
            off += 4;
        }
        let mut rtp_ssrc = None;
        if has_ssrc {
            rtp_ssrc = Some(read_u32(data, off)?);
            off += 4;
        }
        let mut esp_spi = None;
        if has_spi {
            esp_spi = Some(read_u32(data, off)?);
            off += 4;
        }
        Ok((
            StaticChain {
                src,
                dst,
                protocol,
                ports,
                rtp_ssrc,
                esp_spi,
            },
            off,
        ))
    }
}

/// Fields that change packet-to-packet (§3): TTL/TOS, IP-ID, UDP
/// checksum, RTP marker/SN/TS, ESP SN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicChain {
    /// Type of Service / Traffic Class.
    pub tos: u8,
    /// TTL / Hop Limit.
    pub ttl: u8,
    /// Don't-Fragment flag (IPv4 only; ignored for IPv6).
    pub df: bool,
    /// IP identification field.
    pub ip_id: u16,
    /// UDP/UDP-Lite checksum, carried unchanged.
    pub udp_checksum: u16,
    /// RTP marker bit.
    pub rtp_marker: bool,
    /// RTP payload type.
    pub rtp_pt: u8,
    /// Profile sequence number: RTP SN for the RTP profile, a
    /// compressor-synthesized counter for UDP/UDP-Lite.
    pub sn: u32,
    /// RTP timestamp.
    pub ts: u32,
    /// ESP sequence number.
    pub esp_sn: u32,
}

impl Default for DynamicChain {
    fn default() -> Self {
        Self {
            tos: 0,
            ttl: 64,
            df: false,
            ip_id: 0,
            udp_checksum: 0,
            rtp_marker: false,
            rtp_pt: 0,
            sn: 0,
            ts: 0,
            esp_sn: 0,
        }
    }
}

impl DynamicChain {
    /// The value this context's W-LSB window tracks as "the" sequence
    /// number, per profile (§3: "12-bit or 16-bit or 32-bit depending on
    /// profile").
    pub fn logical_sn(&self, profile: Profile) -> u32 {
        match profile {
            Profile::Rtp | Profile::Udp | Profile::UdpLite => self.sn,
            Profile::Esp => self.esp_sn,
            Profile::Ip | Profile::Tcp | Profile::Uncompressed => u32::from(self.ip_id),
        }
    }

    fn to_bytes(self, profile: Profile) -> Vec<u8> {
        let flags = u8::from(self.df);
        let mut out = vec![self.tos, self.ttl, flags];
        out.extend_from_slice(&self.ip_id.to_be_bytes());
        match profile {
            Profile::Udp | Profile::UdpLite => {
                out.extend_from_slice(&self.udp_checksum.to_be_bytes());
                out.extend_from_slice(&self.sn.to_be_bytes());
            }
            Profile::Esp => {
                out.extend_from_slice(&self.esp_sn.to_be_bytes());
            }
            Profile::Rtp => {
                out.extend_from_slice(&self.udp_checksum.to_be_bytes());
                let marker_pt = (u8::from(self.rtp_marker) << 7) | (self.rtp_pt & 0x7f);
                out.push(marker_pt);
                out.extend_from_slice(&self.sn.to_be_bytes());
                out.extend_from_slice(&self.ts.to_be_bytes());
            }
            Profile::Ip | Profile::Tcp | Profile::Uncompressed => {}
        }
        out
    }

    fn from_bytes(profile: Profile, data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 5 {
            return Err(Error::malformed("truncated dynamic chain"));
        }
        let tos = data[0];
        let ttl = data[1];
        let df = data[2] & 0x01 != 0;
        let ip_id = u16::from_be_bytes([data[3], data[4]]);
        let mut dc = DynamicChain {
            tos,
            ttl,
            df,
            ip_id,
            ..Default::default()
        };
        let mut off = 5;
        match profile {
            Profile::Udp | Profile::UdpLite => {
                dc.udp_checksum = read_u16(data, off)?;
                off += 2;
                dc.sn = read_u32(data, off)?;
                off += 4;
            }
            Profile::Esp => {
                dc.esp_sn = read_u32(data, off)?;
                off += 4;
            }
            Profile::Rtp => {
                dc.udp_checksum = read_u16(data, off)?;
                off += 2;
                let marker_pt = *data
                    .get(off)
                    .ok_or_else(|| Error::malformed("truncated RTP marker/pt"))?;
                dc.rtp_marker = marker_pt & 0x80 != 0;
                dc.rtp_pt = marker_pt & 0x7f;
                off += 1;
                dc.sn = read_u32(data, off)?;
                off += 4;
                dc.ts = read_u32(data, off)?;
                off += 4;
            }
            Profile::Ip | Profile::Tcp | Profile::Uncompressed => {}
        }
        Ok((dc, off))
    }
}

fn read_u16(data: &[u8], off: usize) -> Result<u16> {
    let b = data
        .get(off..off + 2)
        .ok_or_else(|| Error::malformed("truncated field"))?;
    Ok(u16::from_be_bytes([b[0], b[1]]))
}

fn read_u32(data: &[u8], off: usize) -> Result<u32> {
    let b = data
        .get(off..off + 4)
        .ok_or_else(|| Error::malformed("truncated field"))?;
    Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

// --- CID envelope -----------------------------------------------------

/// Wrap a packet body (whose first byte is already the type
/// discriminator) with the CID addressing the given context.
pub fn wrap_cid(mut body: Vec<u8>, cid: u16, cid_type: CidType) -> Result<Vec<u8>> {
    match cid_type {
        CidType::Small => {
            if cid > 15 {
                return Err(Error::malformed("small CID out of range"));
            }
            if cid == 0 {
                Ok(body)
            } else {
                let mut out = Vec::with_capacity(body.len() + 1);
                out.push(0xE0 | (cid as u8));
                out.append(&mut body);
                Ok(out)
            }
        }
        CidType::Large => {
            if body.is_empty() {
                return Err(Error::malformed("empty packet body"));
            }
            let first = body.remove(0);
            let mut sdvl = [0u8; 4];
            let n = encode_sdvl(u32::from(cid), &mut sdvl)?;
            let mut out = Vec::with_capacity(1 + n + body.len());
            out.push(first);
            out.extend_from_slice(&sdvl[..n]);
            out.append(&mut body);
            Ok(out)
        }
    }
}

/// Strip a CID envelope, returning the CID and the remaining bytes with
/// the type discriminator as their first byte.
pub fn unwrap_cid(data: &[u8], cid_type: CidType) -> Result<(u16, Vec<u8>)> {
    if data.is_empty() {
        return Err(Error::malformed("empty packet"));
    }
    match cid_type {
        CidType::Small => {
            if data[0] & 0xF0 == 0xE0 {
                let cid = u16::from(data[0] & 0x0F);
                Ok((cid, data[1..].to_vec()))
            } else {
                Ok((0, data.to_vec()))
            }
        }
        CidType::Large => {
            let first = data[0];
            let mut r = BitReader::new(&data[1..]);
            let cid = r.read_sdvl()?;
            if cid > 16383 {
                return Err(Error::malformed("large CID out of range"));
            }
            if !r.position().is_multiple_of(8) {
                return Err(Error::malformed("large CID SDVL not byte-aligned"));
            }
            let consumed = r.position() / 8;
            let mut out = Vec::with_capacity(1 + data.len() - 1 - consumed);
            out.push(first);
            out.extend_from_slice(&data[1 + consumed..]);
            Ok((cid as u16, out))
        }
    }
}

// --- IR / IR-DYN --------------------------------------------------------

/// Decoded contents of an IR or IR-DYN packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrDecoded {
    /// Profile identified by the packet.
    pub profile: Profile,
    /// Static chain, present on IR only (`None` for IR-DYN).
    pub static_chain: Option<StaticChain>,
    /// Dynamic chain, present on both IR (when `D=1`) and IR-DYN.
    pub dynamic_chain: Option<DynamicChain>,
    /// Bytes of the original `data` consumed by the envelope and chains;
    /// anything beyond this index is the opaque transport payload.
    pub consumed: usize,
}

/// Build an IR packet. `dynamic_chain` is optional (`D` flag);
/// `static_chain` is always present.
pub fn encode_ir(
    profile: Profile,
    static_chain: &StaticChain,
    dynamic_chain: Option<DynamicChain>,
) -> Vec<u8> {
    let type_byte = 0xFC | u8::from(dynamic_chain.is_some());
    let profile_byte = profile.id() as u8;
    let mut payload = static_chain.to_bytes(profile);
    if let Some(dc) = dynamic_chain {
        payload.extend(dc.to_bytes(profile));
    }
    let mut crc_input = vec![type_byte, profile_byte];
    crc_input.extend_from_slice(&payload);
    let crc_val = crc(CrcKind::Crc8, &crc_input, CrcKind::Crc8.init());
    let mut out = Vec::with_capacity(3 + payload.len());
    out.push(type_byte);
    out.push(profile_byte);
    out.push(crc_val);
    out.extend(payload);
    out
}

/// Build an IR-DYN packet (dynamic chain only; the receiver's static
/// chain must already be established).
pub fn encode_ir_dyn(profile: Profile, dynamic_chain: DynamicChain) -> Vec<u8> {
    let type_byte = 0xF8;
    let profile_byte = profile.id() as u8;
    let payload = dynamic_chain.to_bytes(profile);
    let mut crc_input = vec![type_byte, profile_byte];
    crc_input.extend_from_slice(&payload);
    let crc_val = crc(CrcKind::Crc8, &crc_input, CrcKind::Crc8.init());
    let mut out = Vec::with_capacity(3 + payload.len());
    out.push(type_byte);
    out.push(profile_byte);
    out.push(crc_val);
    out.extend(payload);
    out
}

/// Parse an IR or IR-DYN packet body (type discriminator as byte 0).
/// Validates the packet's own CRC-8.
pub fn decode_ir_or_dyn(data: &[u8]) -> Result<IrDecoded> {
    if data.len() < 3 {
        return Err(Error::malformed("IR/IR-DYN shorter than 3 bytes"));
    }
    let type_byte = data[0];
    let is_ir = type_byte & 0xFE == 0xFC;
    let is_ir_dyn = type_byte == 0xF8;
    if !is_ir && !is_ir_dyn {
        return Err(Error::malformed("not an IR/IR-DYN packet"));
    }
    let profile_byte = data[1];
    let profile = Profile::from_id(u16::from(profile_byte))
        .ok_or(Error::UnknownProfile(u16::from(profile_byte)))?;
    let crc_received = data[2];
    // `rest` may carry a trailing transport payload past the chains; only
    // the chain bytes themselves were covered by the sender's CRC-8, so
    // the chain length has to be determined before the CRC can be
    // checked.
    let rest = &data[3..];
    if is_ir_dyn {
        let (dc, consumed) = DynamicChain::from_bytes(profile, rest)?;
        let mut crc_input = vec![type_byte, profile_byte];
        crc_input.extend_from_slice(&rest[..consumed]);
        let crc_computed = crc(CrcKind::Crc8, &crc_input, CrcKind::Crc8.init());
        if crc_computed != crc_received {
            return Err(Error::CrcMismatch(0));
        }
        return Ok(IrDecoded {
            profile,
            static_chain: None,
            dynamic_chain: Some(dc),
            consumed: 3 + consumed,
        });
    }
    let has_dynamic = type_byte & 0x01 != 0;
    let (sc, consumed_static) = StaticChain::from_bytes(profile, rest)?;
    let (dynamic_chain, consumed_dynamic) = if has_dynamic {
        let (dc, n) = DynamicChain::from_bytes(profile, &rest[consumed_static..])?;
        (Some(dc), n)
    } else {
        (None, 0)
    };
    let chain_len = consumed_static + consumed_dynamic;
    let mut crc_input = vec![type_byte, profile_byte];
    crc_input.extend_from_slice(&rest[..chain_len]);
    let crc_computed = crc(CrcKind::Crc8, &crc_input, CrcKind::Crc8.init());
    if crc_computed != crc_received {
        return Err(Error::CrcMismatch(0));
    }
    Ok(IrDecoded {
        profile,
        static_chain: Some(sc),
        dynamic_chain,
        consumed: 3 + chain_len,
    })
}

// --- UO-0 / UO-1 / UOR-2 -------------------------------------------------

/// Decoded UO-0 fields (`0SSSSCCC`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uo0 {
    /// Low 4 bits of SN.
    pub sn_bits: u8,
    /// CRC-3 guard.
    pub crc3: u8,
}

/// Encode a UO-0 packet (one byte).
pub fn encode_uo0(sn_bits: u8, crc3: u8) -> u8 {
    ((sn_bits & 0x0F) << 3) | (crc3 & 0x07)
}

/// Decode a UO-0 byte. Returns `None` if the top bit is set (not a UO-0).
pub fn decode_uo0(byte: u8) -> Option<Uo0> {
    if byte & 0x80 != 0 {
        return None;
    }
    Some(Uo0 {
        sn_bits: (byte >> 3) & 0x0F,
        crc3: byte & 0x07,
    })
}

/// Decoded UO-1 (non-RTP) fields (`10IIIIII SSSSSCCC`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uo1Ip {
    /// 6 bits of IP-ID.
    pub ip_id_bits: u8,
    /// 5 bits of SN.
    pub sn_bits: u8,
    /// CRC-3 guard.
    pub crc3: u8,
}

/// Encode a UO-1 (IP) packet (two bytes).
pub fn encode_uo1_ip(ip_id_bits: u8, sn_bits: u8, crc3: u8) -> [u8; 2] {
    [
        0x80 | (ip_id_bits & 0x3F),
        ((sn_bits & 0x1F) << 3) | (crc3 & 0x07),
    ]
}

/// Decode a UO-1 (IP) packet. Returns `None` if the leading bits don't
/// match `10`.
pub fn decode_uo1_ip(b0: u8, b1: u8) -> Option<Uo1Ip> {
    if b0 & 0xC0 != 0x80 {
        return None;
    }
    Some(Uo1Ip {
        ip_id_bits: b0 & 0x3F,
        sn_bits: (b1 >> 3) & 0x1F,
        crc3: b1 & 0x07,
    })
}

/// Decoded UO-1-RTP fields (`10TTTTTT MSSSSCCC`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uo1Rtp {
    /// 6 bits of TS_SCALED.
    pub ts_bits: u8,
    /// RTP marker.
    pub marker: bool,
    /// 4 bits of SN.
    pub sn_bits: u8,
    /// CRC-3 guard.
    pub crc3: u8,
}

/// Encode a UO-1-RTP packet (two bytes).
pub fn encode_uo1_rtp(ts_bits: u8, marker: bool, sn_bits: u8, crc3: u8) -> [u8; 2] {
    [
        0x80 | (ts_bits & 0x3F),
        (u8::from(marker) << 7) | ((sn_bits & 0x0F) << 3) | (crc3 & 0x07),
    ]
}

/// Decode a UO-1-RTP packet. Returns `None` if the leading bits don't
/// match `10`.
pub fn decode_uo1_rtp(b0: u8, b1: u8) -> Option<Uo1Rtp> {
    if b0 & 0xC0 != 0x80 {
        return None;
    }
    Some(Uo1Rtp {
        ts_bits: b0 & 0x3F,
        marker: b1 & 0x80 != 0,
        sn_bits: (b1 >> 3) & 0x0F,
        crc3: b1 & 0x07,
    })
}

/// Decoded UOR-2 (non-RTP) fields (`110SSSSS XCCCCCCC`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uor2 {
    /// 5 bits of SN.
    pub sn_bits: u8,
    /// Extension-present flag. This core never sets it on encode (no
    /// extension 0-3 support — see DESIGN.md); a peer packet with it set
    /// is rejected as malformed rather than misparsed.
    pub ext: bool,
    /// CRC-7 guard.
    pub crc7: u8,
}

/// Encode a UOR-2 packet (two bytes, no extension).
pub fn encode_uor2(sn_bits: u8, crc7: u8) -> [u8; 2] {
    [0xC0 | (sn_bits & 0x1F), crc7 & 0x7F]
}

/// Decode a UOR-2 packet. Returns `None` if the leading bits don't match
/// `110`.
pub fn decode_uor2(b0: u8, b1: u8) -> Option<Uor2> {
    if b0 & 0xE0 != 0xC0 {
        return None;
    }
    Some(Uor2 {
        sn_bits: b0 & 0x1F,
        ext: b1 & 0x80 != 0,
        crc7: b1 & 0x7F,
    })
}

/// Decoded UOR-2-RTP fields (`110SSSSS TTTTTTTM XCCCCCCC`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uor2Rtp {
    /// 5 bits of SN.
    pub sn_bits: u8,
    /// 7 bits of TS_SCALED.
    pub ts_bits: u8,
    /// RTP marker.
    pub marker: bool,
    /// Extension-present flag (never set by this core's encoder).
    pub ext: bool,
    /// CRC-7 guard.
    pub crc7: u8,
}

/// Encode a UOR-2-RTP packet (three bytes, no extension).
pub fn encode_uor2_rtp(sn_bits: u8, ts_bits: u8, marker: bool, crc7: u8) -> [u8; 3] {
    [
        0xC0 | (sn_bits & 0x1F),
        (ts_bits << 1) | u8::from(marker),
        crc7 & 0x7F,
    ]
}

/// Decode a UOR-2-RTP packet. Returns `None` if the leading bits don't
/// match `110`.
pub fn decode_uor2_rtp(b0: u8, b1: u8, b2: u8) -> Option<Uor2Rtp> {
    if b0 & 0xE0 != 0xC0 {
        return None;
    }
    Some(Uor2Rtp {
        sn_bits: b0 & 0x1F,
        ts_bits: b1 >> 1,
        marker: b1 & 0x01 != 0,
        ext: b2 & 0x80 != 0,
        crc7: b2 & 0x7F,
    })
}

/// Compute the CRC (CRC-3 for UO-0/UO-1, CRC-7 for UOR-2) over a header
/// chain per §4.2/§4.8: STATIC+DYNAMIC mask, i.e. the full reconstructed
/// chain.
pub fn header_crc(kind: CrcKind, static_chain: &StaticChain, dynamic_chain: DynamicChain, profile: Profile) -> u8 {
    let mut input = static_chain.to_bytes(profile);
    input.extend(dynamic_chain.to_bytes(profile));
    crc(kind, &input, kind.init())
}
