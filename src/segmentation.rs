//! MRRU segmentation (§6).
//!
//! When an IR packet (or, in principle, any ROHC packet) would exceed
//! the link's MTU, it is split into `1111111L` segments: `L=0` for all
//! but the last, `L=1` for the final one. The reassembly buffer is
//! bounded by the configured MRRU so a peer can't force unbounded
//! memory growth by never sending a final segment.

use crate::error::{Error, Result};

const SEGMENT_TYPE: u8 = 0xFE; // 1111111L with L=0
const SEGMENT_FINAL: u8 = 0xFF; // 1111111L with L=1

/// Split `packet` into segments no larger than `max_segment_size` bytes
/// of payload each (the 1-byte segment header is additional). Returns one
/// segment even if `packet` already fits in one.
pub fn segment(packet: &[u8], max_segment_size: usize) -> Result<Vec<Vec<u8>>> {
    if max_segment_size == 0 {
        return Err(Error::malformed("segment size must be nonzero"));
    }
    let mut out = Vec::new();
    if packet.is_empty() {
        out.push(vec![SEGMENT_FINAL]);
        return Ok(out);
    }
    let mut chunks = packet.chunks(max_segment_size).peekable();
    while let Some(chunk) = chunks.next() {
        let is_last = chunks.peek().is_none();
        let mut seg = Vec::with_capacity(chunk.len() + 1);
        seg.push(if is_last { SEGMENT_FINAL } else { SEGMENT_TYPE });
        seg.extend_from_slice(chunk);
        out.push(seg);
    }
    Ok(out)
}

/// True if `byte` is a segment header octet (`1111111L`).
pub fn is_segment_header(byte: u8) -> bool {
    byte & 0xFE == 0xFE
}

/// Incrementally reassembles a segmented packet, bounded by `mrru`.
#[derive(Debug, Clone)]
pub struct Reassembler {
    mrru: usize,
    buf: Vec<u8>,
}

impl Reassembler {
    /// Create a reassembler bounded at `mrru` bytes.
    pub fn new(mrru: usize) -> Self {
        Self {
            mrru,
            buf: Vec::new(),
        }
    }

    /// Feed one segment (header byte + payload). Returns the fully
    /// reassembled packet once the final segment (`L=1`) arrives, `None`
    /// otherwise.
    pub fn feed(&mut self, segment: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some((&header, payload)) = segment.split_first() else {
            return Err(Error::malformed("empty segment"));
        };
        if !is_segment_header(header) {
            return Err(Error::malformed("not a segment header"));
        }
        if self.buf.len() + payload.len() > self.mrru {
            self.buf.clear();
            return Err(Error::malformed("reassembled packet would exceed MRRU"));
        }
        self.buf.extend_from_slice(payload);
        if header == SEGMENT_FINAL {
            Ok(Some(std::mem::take(&mut self.buf)))
        } else {
            Ok(None)
        }
    }
}
