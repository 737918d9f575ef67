//! CRC-guided repair (S4): a single bit flip in a UO-0's SN field should
//! be recoverable by retrying the next plausible SN rather than
//! surfacing a CRC mismatch to the caller.
#![cfg(feature = "crc-repair")]

mod common;

use rohc_core::{Compressor, Decompressor, DecompressorConfig, EndpointConfig};

#[test]
fn bit_flip_in_uo0_sn_is_repaired() {
    let config = EndpointConfig {
        rtp_ports: vec![5004],
        features: rohc_core::Features {
            crc_repair: true,
            ..Default::default()
        },
        ..EndpointConfig::default()
    };
    let mut decomp_config = DecompressorConfig::default();
    decomp_config.features.crc_repair = true;

    let mut comp = Compressor::new(config, || 0);
    let mut decomp = Decompressor::new(decomp_config);

    // Drive both endpoints to steady state (UO-0) and up to SN 1042.
    let base_sn = 1000u16;
    let mut compressed_packets = Vec::new();
    for i in 0..=42u16 {
        let sn = base_sn + i;
        let original = common::rtp_packet(sn, 20000 + 160 * u32::from(i), false, 0xCAFEBABE);
        let compressed = comp.compress(&original, u32::from(i)).unwrap();
        compressed_packets.push((sn, original, compressed));
    }
    for (sn, original, compressed) in &compressed_packets {
        let restored = decomp.decompress(compressed).unwrap();
        assert_eq!(&restored, original, "setup packet sn={sn} failed to decode cleanly");
    }

    // The reference SN tracked by the decompressor is now 1042. Compress
    // the real next packet (SN 1043) and flip one SN bit in the UO-0
    // byte so it decodes to some other value and fails CRC.
    let real_sn = base_sn + 43;
    let original = common::rtp_packet(real_sn, 20000 + 160 * 43, false, 0xCAFEBABE);
    let compressed = comp.compress(&original, 43).unwrap();
    // 1-byte UO-0 header plus the fixture's 7-byte RTP payload.
    assert_eq!(compressed.len(), 8, "expected steady-state UO-0 plus payload");
    let mut corrupted = compressed.clone();
    corrupted[0] ^= 0x08; // flip one SN bit, leaving the CRC-3 bits intact

    let restored = decomp
        .decompress(&corrupted)
        .expect("CRC repair should recover the bit-flipped UO-0");
    assert_eq!(restored, original, "repaired packet should match the true SN=1043 header");
}
