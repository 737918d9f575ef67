//! Full compressor/decompressor round trips through the public endpoint
//! API only — no internal module is touched here.

mod common;

use rohc_core::{Compressor, Decompressor, DecompressorConfig, EndpointConfig, Error};

#[test]
fn rtp_cold_start_then_steady_state() {
    let config = EndpointConfig {
        rtp_ports: vec![5004],
        ..EndpointConfig::default()
    };
    let mut comp = Compressor::new(config, || 0);
    let mut decomp = Decompressor::new(DecompressorConfig::default());

    let mut sizes = Vec::new();
    for i in 0..10u16 {
        let original = common::rtp_packet(1000 + i, 2000 + 160 * u32::from(i), false, 0xAABBCCDD);
        let compressed = comp.compress(&original, u32::from(i)).unwrap();
        sizes.push(compressed.clone());
        let restored = decomp.decompress(&compressed).unwrap();
        assert_eq!(restored, original, "packet {i} round-trip mismatch");
    }

    assert!(sizes[0].len() >= 20, "first packet should be IR-sized");
    let last = sizes.last().unwrap();
    // The fixture's RTP payload is 7 bytes; a steady-state frame is the
    // 1-byte UO-0 header plus that payload carried through unchanged.
    assert_eq!(last.len(), 8, "steady state should be a 1-byte UO-0 header plus payload");
    assert_eq!(last[0] & 0x80, 0, "UO-0 packets have their high bit clear");
}

#[test]
fn esp_flow_over_ipv6() {
    let config = EndpointConfig::default();
    let mut comp = Compressor::new(config, || 0);
    let mut decomp = Decompressor::new(DecompressorConfig::default());

    let spi = 0xDEADBEEFu32;
    let mut first_compressed_len = 0;
    for sn in 1..=5u32 {
        let original = common::esp_packet_v6(spi, sn);
        let compressed = comp.compress(&original, sn).unwrap();
        if sn == 1 {
            first_compressed_len = compressed.len();
        }
        let restored = decomp.decompress(&compressed).unwrap();
        assert_eq!(restored, original, "ESP packet sn={sn} round-trip mismatch");
        // SPI sits at the start of the ESP header, right after the fixed
        // 40-byte IPv6 header.
        assert_eq!(&restored[40..44], &spi.to_be_bytes());
    }
    assert!(first_compressed_len >= 20, "first ESP packet should be IR-sized");
}

#[test]
fn packet_loss_recovery_never_panics_and_resyncs_eventually() {
    let config = EndpointConfig {
        rtp_ports: vec![5004],
        ..EndpointConfig::default()
    };
    let mut comp = Compressor::new(config, || 0);
    let mut decomp = Decompressor::new(DecompressorConfig::default());

    let mut originals = Vec::new();
    let mut compressed = Vec::new();
    for sn in 100..=120u16 {
        let original = common::rtp_packet(sn, 20000 + 160 * u32::from(sn - 100), false, 0x11223344);
        let c = comp.compress(&original, u32::from(sn)).unwrap();
        originals.push(original);
        compressed.push(c);
    }

    // Feed everything except the compressed packets for SN 105..110.
    for (i, sn) in (100..=120u16).enumerate() {
        if (105..=110).contains(&sn) {
            continue;
        }
        let result = decomp.decompress(&compressed[i]);
        match result {
            Ok(restored) => assert_eq!(restored, originals[i], "sn={sn} decoded but didn't match"),
            Err(Error::CrcMismatch(_)) | Err(Error::Malformed(_)) | Err(Error::NoContext(_)) => {
                // Either outcome is acceptable recovery behavior per the
                // decompressor's k-of-n downgrade policy: a gap this wide
                // is allowed to cost a resync rather than silently decode
                // to the wrong header.
            }
            Err(other) => panic!("unexpected error for sn={sn}: {other:?}"),
        }
    }
}

#[test]
fn rtp_timestamp_survives_u32_wraparound() {
    let config = EndpointConfig {
        rtp_ports: vec![5004],
        ..EndpointConfig::default()
    };
    let mut comp = Compressor::new(config, || 0);
    let mut decomp = Decompressor::new(DecompressorConfig::default());

    let mut ts: u32 = u32::MAX - 3 * 160 + 1;
    for i in 0..12u16 {
        let original = common::rtp_packet(2000 + i, ts, false, 0x55667788);
        let compressed = comp.compress(&original, u32::from(i)).unwrap();
        let restored = decomp.decompress(&compressed).unwrap();
        assert_eq!(restored, original, "packet {i} mismatched across TS wraparound (ts={ts})");
        ts = ts.wrapping_add(160);
    }
}

#[test]
fn rtp_marker_flip_after_reaching_steady_state() {
    let config = EndpointConfig {
        rtp_ports: vec![5004],
        ..EndpointConfig::default()
    };
    let mut comp = Compressor::new(config, || 0);
    let mut decomp = Decompressor::new(DecompressorConfig::default());

    // Run long enough to settle into UO-0, then flip the marker bit and
    // confirm the compressor falls back to a format that carries it
    // rather than silently keeping UO-0 and losing the bit.
    let markers = [false, false, false, false, false, false, true, false, false];
    for (i, &marker) in markers.iter().enumerate() {
        let original = common::rtp_packet(3000 + i as u16, 40000 + 160 * i as u32, marker, 0x99887766);
        let compressed = comp.compress(&original, i as u32).unwrap();
        let restored = decomp.decompress(&compressed).unwrap();
        assert_eq!(restored, original, "packet {i} (marker={marker}) round-trip mismatch");
    }
}

#[test]
fn malformed_stream_fuzz_never_panics() {
    use rand::{Rng, RngCore};
    let mut decomp = Decompressor::new(DecompressorConfig::default());
    let mut rng = rand::rng();
    for _ in 0..2000 {
        let len = rng.random_range(0..=2048usize);
        let mut buf = vec![0u8; len];
        rng.fill_bytes(&mut buf);
        match decomp.decompress(&buf) {
            Ok(_)
            | Err(Error::Malformed(_))
            | Err(Error::CrcMismatch(_))
            | Err(Error::NoContext(_))
            | Err(Error::UnknownProfile(_))
            | Err(Error::OutputTooSmall { .. })
            | Err(Error::TransientResource) => {}
        }
    }
}
