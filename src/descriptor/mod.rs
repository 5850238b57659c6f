// SPDX-License-Identifier: GPL-3.0-only

//! Descriptor parser: converts a device's USB configuration-descriptor byte
//! stream into a typed model of its Video Control and Video Streaming
//! interfaces.

mod parse;
mod types;

pub use parse::parse_configuration;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

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

    /// Build a minimal but realistic configuration descriptor: one VC
    /// interface with a camera terminal + extension unit, one VS interface
    /// with an MJPEG format at 1920x1080@30fps and two alt settings.
    fn synthetic_config() -> Vec<u8> {
        let mut buf = Vec::new();

        // VC interface, alt 0
        push_desc(&mut buf, 0x04, &standard_interface(0, 0, 0x01));
        // VC_HEADER: bcdUVC=0x0150, total_len=0, clock=48_000_000, 1 streaming if (#1)
        let mut header = vec![0x01];
        header.extend_from_slice(&0x0150u16.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes());
        header.extend_from_slice(&48_000_000u32.to_le_bytes());
        header.push(1);
        header.push(1);
        push_desc(&mut buf, 0x24, &header);

        // VC_INPUT_TERMINAL (camera terminal, unit 1)
        let mut it = vec![0x02, 1];
        it.extend_from_slice(&ITT_CAMERA_RAW.to_le_bytes());
        it.push(0);
        it.push(0);
        it.extend_from_slice(&0u16.to_le_bytes());
        it.extend_from_slice(&0u16.to_le_bytes());
        it.extend_from_slice(&0u16.to_le_bytes());
        it.push(3);
        it.extend_from_slice(&[0x01, 0x02, 0x00]);
        push_desc(&mut buf, 0x24, &it);

        // VC_EXTENSION_UNIT (unit 2)
        let mut xu = vec![0x06, 2];
        xu.extend_from_slice(&[0xAA; 16]);
        xu.push(8); // num controls
        xu.push(1); // 1 input pin
        xu.push(1); // source = terminal 1
        xu.push(1); // control size
        xu.push(0xFF); // bmControls
        xu.push(0); // iExtension
        push_desc(&mut buf, 0x24, &xu);

        // VS interface, alt 0 (no endpoint yet)
        push_desc(&mut buf, 0x04, &standard_interface(1, 0, 0x02));
        // VS_INPUT_HEADER: 1 format
        let mut ih = vec![0x01, 1];
        ih.extend_from_slice(&0u16.to_le_bytes());
        ih.push(0x81); // endpoint address
        ih.push(0);
        ih.push(1); // terminal link
        ih.push(0);
        ih.push(0);
        ih.push(0);
        ih.push(1); // control size
        ih.push(0); // per-format controls
        push_desc(&mut buf, 0x24, &ih);

        // VS_FORMAT_MJPEG, format index 1
        push_desc(&mut buf, 0x24, &[0x06, 1, 1, 0, 1, 16, 9, 0, 0]);

        // VS_FRAME_MJPEG: 1920x1080, default interval 333333 (30fps), 1 discrete interval
        let mut frame = vec![0x07, 1, 0x00];
        frame.extend_from_slice(&1920u16.to_le_bytes());
        frame.extend_from_slice(&1080u16.to_le_bytes());
        frame.extend_from_slice(&0u32.to_le_bytes());
        frame.extend_from_slice(&3_060_000u32.to_le_bytes());
        frame.extend_from_slice(&(1920 * 1080 * 2u32).to_le_bytes());
        frame.extend_from_slice(&333_333u32.to_le_bytes());
        frame.push(1); // 1 discrete interval
        frame.extend_from_slice(&333_333u32.to_le_bytes());
        push_desc(&mut buf, 0x24, &frame);

        // VS interface alt 1, with iso endpoint
        push_desc(&mut buf, 0x04, &standard_interface(1, 1, 0x02));
        push_desc(&mut buf, 0x05, &standard_endpoint(0x81, 0x01, 1024));

        buf
    }

    const ITT_CAMERA_RAW: u16 = 0x0201;

    #[test]
    fn parses_vc_and_vs_interfaces() {
        let tree = parse_configuration(&synthetic_config()).expect("parse should succeed");
        assert_eq!(tree.vc_interfaces.len(), 1);
        assert_eq!(tree.vs_interfaces.len(), 1);

        let vc = &tree.vc_interfaces[0];
        assert_eq!(vc.uvc_version, 0x0150);
        assert_eq!(vc.streaming_control_len(), 48);
        assert_eq!(vc.units.len(), 2);
        assert!(vc.unit(2).unwrap().is_extension());

        let vs = &tree.vs_interfaces[0];
        assert_eq!(vs.alt_settings.len(), 2);
        let alt1 = vs.alt_settings.iter().find(|a| a.alt_setting == 1).unwrap();
        assert!(alt1.iso_endpoint.is_some());
        assert_eq!(alt1.iso_endpoint.unwrap().effective_packet_size(), 1024);
    }

    #[test]
    fn format_index_matches_position() {
        let tree = parse_configuration(&synthetic_config()).unwrap();
        let vs = &tree.vs_interfaces[0];
        for (pos, fmt) in vs.formats.iter().enumerate() {
            assert_eq!(fmt.format_index as usize, pos + 1);
        }
        let fmt = vs.format(1).unwrap();
        assert_eq!(fmt.fourcc, "MJPG");
        assert_eq!(fmt.frames.len(), 1);
        let frame = &fmt.frames[0];
        assert_eq!((frame.width, frame.height), (1920, 1080));
        assert_eq!(frame.default_frame_interval, 333_333);
    }

    #[test]
    fn rejects_zero_length_descriptor() {
        let mut buf = synthetic_config();
        buf.push(0); // bLength = 0
        buf.push(0x24);
        let err = parse_configuration(&buf).unwrap_err();
        assert!(err.reason.contains("bLength"));
    }

    #[test]
    fn truncated_descriptor_is_fatal() {
        let mut buf = synthetic_config();
        buf.push(10); // claims 10 bytes but buffer ends here
        buf.push(0x24);
        let err = parse_configuration(&buf).unwrap_err();
        assert!(err.reason.contains("past end"));
    }

    #[test]
    fn unknown_subtype_is_skipped_not_fatal() {
        let mut buf = synthetic_config();
        // A class-specific VS descriptor with an unrecognised subtype must
        // be skipped, not rejected, as long as bLength is respected.
        buf.push(0x01);
        buf.push(0x04); // standard interface
        buf.extend(standard_interface(1, 1, 0x02));
        buf.push(5);
        buf.push(0x24);
        buf.extend_from_slice(&[0xEE, 0, 0]);
        let tree = parse_configuration(&buf).expect("unknown subtype must not be fatal");
        assert_eq!(tree.vs_interfaces.len(), 1);
    }
}
