// SPDX-License-Identifier: GPL-3.0-only

//! End-to-end scenarios from spec.md §8, driven against synthetic
//! descriptor bytes and synthetic iso-packet sequences -- no physical
//! camera or libusb device is available in this environment, mirroring how
//! the teacher's own `tests/constants_tests.rs` exercises pure-logic pieces
//! without touching hardware.

use uvc_core::descriptor::{self, Codec};
use uvc_core::reassemble::{FrameReassembler, ReassemblerEvent};
use uvc_core::{BitstreamNormaliser, Stats};

/// Installs a `tracing` subscriber once per test binary, same
/// `EnvFilter`-with-`warn`-default pattern the teacher's own
/// `main.rs` uses, so a failing scenario can be re-run with
/// `RUST_LOG=debug` for the reassembler/normaliser trace output.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

fn push_desc(buf: &mut Vec<u8>, b_type: u8, body: &[u8]) {
    buf.push((body.len() + 2) as u8);
    buf.push(b_type);
    buf.extend_from_slice(body);
}

fn standard_interface(num: u8, alt: u8, subclass: u8) -> Vec<u8> {
    vec![num, alt, 0, 0x0E, subclass, 0, 0]
}

fn standard_endpoint(address: u8, attrs: u8, max_packet: u16) -> Vec<u8> {
    let mut v = vec![address, attrs];
    v.extend_from_slice(&max_packet.to_le_bytes());
    v.push(1);
    v
}

/// A 1080p30 MJPEG-capable UVC 1.5 device's configuration descriptor, built
/// by hand the same way the descriptor parser's own unit tests do.
fn synthetic_1080p_mjpeg_descriptor() -> Vec<u8> {
    let mut buf = Vec::new();

    push_desc(&mut buf, 0x04, &standard_interface(0, 0, 0x01));
    let mut header = vec![0x01];
    header.extend_from_slice(&0x0150u16.to_le_bytes());
    header.extend_from_slice(&0u16.to_le_bytes());
    header.extend_from_slice(&48_000_000u32.to_le_bytes());
    header.push(1);
    header.push(1);
    push_desc(&mut buf, 0x24, &header);

    let mut it = vec![0x02, 1];
    it.extend_from_slice(&0x0201u16.to_le_bytes());
    it.push(0);
    it.push(0);
    it.extend_from_slice(&0u16.to_le_bytes());
    it.extend_from_slice(&0u16.to_le_bytes());
    it.extend_from_slice(&0u16.to_le_bytes());
    it.push(0);
    push_desc(&mut buf, 0x24, &it);

    push_desc(&mut buf, 0x04, &standard_interface(1, 0, 0x02));
    let mut ih = vec![0x01, 1];
    ih.extend_from_slice(&0u16.to_le_bytes());
    ih.push(0x81);
    ih.push(0);
    ih.push(1);
    ih.push(0);
    ih.push(0);
    ih.push(0);
    ih.push(1);
    ih.push(0);
    push_desc(&mut buf, 0x24, &ih);

    // VS_FORMAT_MJPEG, format index 1
    push_desc(&mut buf, 0x24, &[0x06, 1, 1, 0, 1, 16, 9, 0, 0]);

    // VS_FRAME_MJPEG: 1920x1080, default interval 333333 (30fps)
    let mut frame = vec![0x07, 1, 0x00];
    frame.extend_from_slice(&1920u16.to_le_bytes());
    frame.extend_from_slice(&1080u16.to_le_bytes());
    frame.extend_from_slice(&0u32.to_le_bytes());
    frame.extend_from_slice(&3_060_000u32.to_le_bytes());
    frame.extend_from_slice(&(1920 * 1080 * 2u32).to_le_bytes());
    frame.extend_from_slice(&333_333u32.to_le_bytes());
    frame.push(1);
    frame.extend_from_slice(&333_333u32.to_le_bytes());
    push_desc(&mut buf, 0x24, &frame);

    push_desc(&mut buf, 0x04, &standard_interface(1, 1, 0x02));
    push_desc(&mut buf, 0x05, &standard_endpoint(0x81, 0x01, 3060));

    buf
}

/// Scenario 1: parse a 1080p30 MJPEG device's descriptors.
#[test]
fn scenario_1_descriptor_tree_has_expected_mjpeg_format() {
    init_tracing();
    let tree = descriptor::parse_configuration(&synthetic_1080p_mjpeg_descriptor())
        .expect("synthetic descriptor must parse");

    assert!(!tree.vs_interfaces.is_empty());
    let vs = &tree.vs_interfaces[0];
    let mjpeg = vs
        .formats
        .iter()
        .find(|f| f.codec == Codec::Mjpeg)
        .expect("must have an MJPEG format");
    let frame = mjpeg
        .frames
        .iter()
        .find(|f| (f.width, f.height) == (1920, 1080))
        .expect("must have a 1920x1080 frame");
    assert_eq!(frame.default_frame_interval, 333_333);
}

fn packet(header_len: u8, flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut p = vec![header_len, flags];
    p.resize(header_len as usize, 0);
    p.extend_from_slice(payload);
    p
}

/// Scenario 3: stream 10 well-formed MJPEG frames; every frame starts with
/// the JPEG SOI marker and ends with EOI, and sequence numbers are 0..9.
#[test]
fn scenario_3_ten_frame_mjpeg_stream_has_contiguous_sequence_numbers() {
    init_tracing();
    let mut reassembler = FrameReassembler::new(
        "MJPG".into(),
        Codec::Mjpeg,
        1920,
        1080,
        0,
        false,
        Stats::new(),
    );

    let mut delivered = Vec::new();
    for i in 0..10u8 {
        let fid = i % 2;
        let mut events = reassembler.push_packet(&packet(12, fid, &[0xFF, 0xD8, i]));
        events.extend(reassembler.push_packet(&packet(12, fid | 0x02, &[i, 0xFF, 0xD9])));
        for ev in events {
            if let ReassemblerEvent::Frame(frame) = ev {
                delivered.push(frame);
            }
        }
    }

    assert_eq!(delivered.len(), 10);
    for (i, frame) in delivered.iter().enumerate() {
        assert_eq!(frame.sequence, i as u64);
        assert_eq!(&frame.data[0..2], &[0xFF, 0xD8]);
        assert_eq!(&frame.data[frame.data.len() - 2..], &[0xFF, 0xD9]);
    }
}

fn nal(nal_type_byte: u8, body: &[u8]) -> Vec<u8> {
    let mut v = vec![0x00, 0x00, 0x00, 0x01, nal_type_byte];
    v.extend_from_slice(body);
    v
}

/// Scenario 4: frames 1-2 carry SPS+PPS+IDR, frames 3..N carry only
/// P-slices, frame N+1 is an IDR with no parameter sets of its own -- the
/// normaliser must prepend the cached SPS/PPS before it.
#[test]
fn scenario_4_idr_without_params_gets_cached_params_prepended() {
    init_tracing();
    let stats = Stats::new();
    let mut normaliser = BitstreamNormaliser::new(Codec::H264, stats.clone());

    let mut reassembler = FrameReassembler::new(
        "H264".into(),
        Codec::H264,
        1280,
        720,
        0,
        false,
        stats.clone(),
    );

    let mut complete_frame = |data: Vec<u8>| -> uvc_core::CompletedFrame {
        let mut events = reassembler.push_packet(&packet(12, 0x02, &data));
        match events.pop().unwrap() {
            ReassemblerEvent::Frame(f) => f,
            ReassemblerEvent::Dropped { .. } => panic!("expected a delivered frame"),
        }
    };

    for i in 0..2u8 {
        let data = [nal(7, &[0xAA]), nal(8, &[0xBB]), nal(5, &[i])].concat();
        let mut frame = complete_frame(data);
        assert!(normaliser.normalise(&mut frame));
    }

    for i in 0..5u8 {
        let mut frame = complete_frame(nal(1, &[i]));
        assert!(normaliser.normalise(&mut frame));
    }

    let mut idr_only = complete_frame(nal(5, &[0xEE]));
    assert!(normaliser.normalise(&mut idr_only));

    let sps_offset = idr_only
        .data
        .windows(5)
        .position(|w| w == [0, 0, 0, 1, 7])
        .expect("cached SPS must be prepended");
    let idr_offset = idr_only
        .data
        .windows(5)
        .position(|w| w == [0, 0, 0, 1, 5])
        .expect("IDR NAL must still be present");
    assert!(sps_offset < idr_offset);
    assert_eq!(stats.snapshot().parameter_set_missing_drops, 0);
}

/// Scenario 6: stopping mid-frame discards the in-progress buffer; a fresh
/// reassembler for the re-started stream begins its sequence at 0 again.
#[test]
fn scenario_6_stop_mid_frame_then_restart_resets_sequence() {
    init_tracing();
    let mut reassembler = FrameReassembler::new(
        "MJPG".into(),
        Codec::Mjpeg,
        640,
        480,
        0,
        false,
        Stats::new(),
    );

    let events = reassembler.push_packet(&packet(12, 0x00, &[0xFF, 0xD8, 0x01]));
    assert!(events.is_empty(), "frame is still in progress, no EOF yet");

    // "Stopping" the stream simply drops the reassembler -- the partial
    // buffer is discarded, never delivered.
    drop(reassembler);

    let mut restarted = FrameReassembler::new(
        "MJPG".into(),
        Codec::Mjpeg,
        640,
        480,
        0,
        false,
        Stats::new(),
    );
    let events = restarted.push_packet(&packet(12, 0x02, &[0xFF, 0xD8, 0xFF, 0xD9]));
    match events.first().unwrap() {
        ReassemblerEvent::Frame(f) => assert_eq!(f.sequence, 0),
        ReassemblerEvent::Dropped { .. } => panic!("expected a delivered frame"),
    }
}
