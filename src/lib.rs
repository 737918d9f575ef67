#![warn(missing_docs)]
/*! This crate implements the compressor and decompressor halves of
Robust Header Compression (ROHC, RFC 3095): it squeezes the repetitive
IP/UDP/RTP/ESP header chain that precedes every packet in a flow down
to a handful of bytes on the wire, and reconstructs the original
header bit-for-bit on the far side.

It covers Profile 0 (uncompressed), 1 (RTP), 2 (UDP), 3 (ESP), 4
(IP-only), 6 (TCP header chain) and 8 (UDP-Lite), each running its own
per-context state machine.

# Architecture overview

Each endpoint keeps one context per flow, keyed by a Context ID (CID).
The compressor's context state climbs `IR -> FO -> SO` as it gains
confidence the peer has synchronized; the decompressor's mirrors it as
`No Context -> Static Context -> Full Context`. A run of CRC failures
on the decompressor side demotes a context back down, which is how a
desynchronized peer eventually recovers without tearing the flow down:

```text
     [ IP/UDP/RTP/ESP packet ]
               ↓
       headerbuild::extract          (split into static/dynamic
               ↓                      chains + opaque payload)
        profile::classify
               ↓
    compressor::Compressor            (per-CID IR/FO/SO context,
               ↓                      W-LSB + scaled-TS encoding)
        packet::encode_*
               ↓
      [ ROHC compressed frame ]
               ↓
        packet::decode_*
               ↓
   decompressor::Decompressor         (per-CID NC/SC/FC context,
               ↓                      CRC-gated state advance)
      headerbuild::rebuild
               ↓
     [ IP/UDP/RTP/ESP packet ]
```

Supporting modules sit underneath both endpoints: [`wlsb`] and
[`scaled_ts`] implement the window-based compression schemes for
sequence numbers, IP-IDs and RTP timestamps; [`crc`] and [`bitstream`]
are the bit-level primitives the packet codecs are built on;
[`feedback`] and [`segmentation`] implement the optional reverse
channel and the MRRU fragmentation described in RFC 3095 §5 and §6.

# Examples

```
use rohc_core::{Compressor, Decompressor, EndpointConfig, DecompressorConfig};

let comp_config = EndpointConfig { rtp_ports: vec![5004], ..EndpointConfig::default() };
let mut comp = Compressor::new(comp_config, || 0);
let mut decomp = Decompressor::new(DecompressorConfig::default());

// A minimal IPv4/UDP packet (4-byte payload, no options).
let packet: Vec<u8> = {
    let mut udp = vec![0u8; 8 + 4];
    udp[0..2].copy_from_slice(&5000u16.to_be_bytes());
    udp[2..4].copy_from_slice(&5001u16.to_be_bytes());
    udp[4..6].copy_from_slice(&(udp.len() as u16).to_be_bytes());
    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&((20 + udp.len()) as u16).to_be_bytes());
    ip[8] = 64;
    ip[9] = 17; // UDP
    ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
    ip[16..20].copy_from_slice(&[10, 0, 0, 2]);
    ip.extend_from_slice(&udp);
    ip
};

let compressed = comp.compress(&packet, 0)?;
let restored = decomp.decompress(&compressed)?;
assert_eq!(restored, packet);
# Ok::<(), rohc_core::Error>(())
```

## Links

* RFC 3095: <https://www.rfc-editor.org/rfc/rfc3095>
* RFC 4815 (generic timestamp scaling): <https://www.rfc-editor.org/rfc/rfc4815>
*/

pub mod bitstream;
pub mod compressor;
pub mod config;
pub mod crc;
pub mod decompressor;
pub mod error;
pub mod feedback;
pub mod headerbuild;
pub mod iphdr;
pub mod packet;
pub mod profile;
pub mod scaled_ts;
pub mod segmentation;
pub mod wlsb;

pub use compressor::Compressor;
pub use config::{CidType, DecompressorConfig, EndpointConfig, Features, Mode};
pub use decompressor::Decompressor;
pub use error::{Error, Result};
pub use feedback::{AckKind, Feedback, FeedbackQueue};
pub use profile::Profile;
