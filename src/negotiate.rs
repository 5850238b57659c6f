// SPDX-License-Identifier: GPL-3.0-only

//! PROBE/COMMIT negotiation: picks a format/frame/frame-interval matching
//! the caller's request, round-trips the `VS_PROBE_CONTROL` struct until it
//! stabilises, commits it, and picks the smallest alternate setting whose
//! isochronous endpoint can sustain the negotiated payload size.
//!
//! The wire struct and round-trip loop are grounded on `SludgePhD/rUVC`'s
//! `video.rs` (`ProbeCommitControls`, negotiated there with `zerocopy`); this
//! crate writes the 26/34/48-byte encode/decode by hand to keep a single
//! error-handling idiom with the rest of the control layer.

use byteorder::{ByteOrder, LE};
use tracing::{debug, info, warn};

use crate::control::ControlAccess;
use crate::control::wire::{Query, VS_COMMIT_CONTROL, VS_PROBE_CONTROL};
use crate::descriptor::{AltSetting, Codec, StreamFormat, VsInterface};
use crate::error::{ControlError, ControlErrorKind, NegotiationError, UvcResult};

/// A caller's desired stream parameters.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub width: u16,
    pub height: u16,
    pub codec: Option<Codec>,
    /// 100ns units; `None` picks the frame's default interval.
    pub frame_interval: Option<u32>,
}

/// The negotiated `VS_PROBE_CONTROL`/`VS_COMMIT_CONTROL` payload. Always
/// encoded/decoded at the interface's [`VsInterface`]-independent length
/// (26, 34, or 48 bytes); unused trailing fields stay zeroed for shorter
/// lengths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamingControl {
    pub hint: u16,
    pub format_index: u8,
    pub frame_index: u8,
    pub frame_interval: u32,
    pub key_frame_rate: u16,
    pub p_frame_rate: u16,
    pub comp_quality: u16,
    pub comp_window_size: u16,
    pub delay: u16,
    pub max_video_frame_size: u32,
    pub max_payload_transfer_size: u32,
    pub clock_frequency: u32,
    pub framing_info: u8,
    pub preferred_version: u8,
    pub min_version: u8,
    pub max_version: u8,
    pub usage: u8,
    pub bit_depth_luma: u8,
    pub settings: u8,
    pub max_number_of_ref_frames_plus1: u8,
    pub rate_control_modes: u16,
    pub layout_per_stream: u64,
}

impl StreamingControl {
    pub fn to_bytes(&self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        LE::write_u16(&mut buf[0..2], self.hint);
        buf[2] = self.format_index;
        buf[3] = self.frame_index;
        LE::write_u32(&mut buf[4..8], self.frame_interval);
        LE::write_u16(&mut buf[8..10], self.key_frame_rate);
        LE::write_u16(&mut buf[10..12], self.p_frame_rate);
        LE::write_u16(&mut buf[12..14], self.comp_quality);
        LE::write_u16(&mut buf[14..16], self.comp_window_size);
        LE::write_u16(&mut buf[16..18], self.delay);
        LE::write_u32(&mut buf[18..22], self.max_video_frame_size);
        LE::write_u32(&mut buf[22..26], self.max_payload_transfer_size);

        if len >= 34 {
            LE::write_u32(&mut buf[26..30], self.clock_frequency);
            buf[30] = self.framing_info;
            buf[31] = self.preferred_version;
            buf[32] = self.min_version;
            buf[33] = self.max_version;
        }
        if len >= 48 {
            buf[34] = self.usage;
            buf[35] = self.bit_depth_luma;
            buf[36] = self.settings;
            buf[37] = self.max_number_of_ref_frames_plus1;
            LE::write_u16(&mut buf[38..40], self.rate_control_modes);
            LE::write_u64(&mut buf[40..48], self.layout_per_stream);
        }

        buf
    }

    /// Decode a GET_CUR PROBE/COMMIT readback. A quirky device may return
    /// fewer bytes than requested (`ControlAccess::get` truncates to
    /// whatever the device actually sent); a payload shorter than the
    /// 26-byte UVC 1.0 minimum is a protocol error, not a panic.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, ControlError> {
        if buf.len() < 26 {
            return Err(ControlError::new(
                ControlErrorKind::InvalidLength,
                0,
                VS_PROBE_CONTROL,
            ));
        }
        let mut sc = StreamingControl {
            hint: LE::read_u16(&buf[0..2]),
            format_index: buf[2],
            frame_index: buf[3],
            frame_interval: LE::read_u32(&buf[4..8]),
            key_frame_rate: LE::read_u16(&buf[8..10]),
            p_frame_rate: LE::read_u16(&buf[10..12]),
            comp_quality: LE::read_u16(&buf[12..14]),
            comp_window_size: LE::read_u16(&buf[14..16]),
            delay: LE::read_u16(&buf[16..18]),
            max_video_frame_size: LE::read_u32(&buf[18..22]),
            max_payload_transfer_size: LE::read_u32(&buf[22..26]),
            ..Default::default()
        };

        if buf.len() >= 34 {
            sc.clock_frequency = LE::read_u32(&buf[26..30]);
            sc.framing_info = buf[30];
            sc.preferred_version = buf[31];
            sc.min_version = buf[32];
            sc.max_version = buf[33];
        }
        if buf.len() >= 48 {
            sc.usage = buf[34];
            sc.bit_depth_luma = buf[35];
            sc.settings = buf[36];
            sc.max_number_of_ref_frames_plus1 = buf[37];
            sc.rate_control_modes = LE::read_u16(&buf[38..40]);
            sc.layout_per_stream = LE::read_u64(&buf[40..48]);
        }

        Ok(sc)
    }
}

/// Find the best (format, frame) match for a request: exact codec+resolution
/// match preferred, falling back to resolution-only if no codec was
/// requested.
pub fn match_format<'a>(
    vs: &'a VsInterface,
    request: &StreamRequest,
) -> Option<(&'a StreamFormat, &'a crate::descriptor::FrameInfo)> {
    vs.formats
        .iter()
        .filter(|fmt| request.codec.map(|c| c == fmt.codec).unwrap_or(true))
        .find_map(|fmt| {
            fmt.frames
                .iter()
                .find(|f| f.width == request.width && f.height == request.height)
                .map(|frame| (fmt, frame))
        })
}

/// Negotiates PROBE/COMMIT for one VS interface and selects the alt setting.
pub struct Negotiator<'a> {
    control: ControlAccess<'a>,
    max_probe_rounds: u32,
}

impl<'a> Negotiator<'a> {
    pub fn new(control: ControlAccess<'a>, max_probe_rounds: u32) -> Self {
        Self {
            control,
            max_probe_rounds,
        }
    }

    /// Run the full PROBE -> (stabilise) -> COMMIT sequence and return the
    /// committed control plus the alt setting to switch to.
    ///
    /// PROBE/COMMIT targets the streaming interface itself, not a VC unit,
    /// so the `control` handed to this `Negotiator` must have been
    /// constructed with `interface_number` set to `vs`'s own interface
    /// number; the control requests below always address selector `0`.
    pub fn negotiate<'vs>(
        &self,
        vs: &'vs VsInterface,
        request: &StreamRequest,
        control_len: usize,
    ) -> UvcResult<(StreamingControl, &'vs AltSetting)> {
        let (format, frame) = match_format(vs, request)
            .ok_or(NegotiationError::NoMatchingFormat)?;

        let interval = request
            .frame_interval
            .map(|desired| frame.intervals.closest_to(desired))
            .unwrap_or(frame.default_frame_interval);

        let mut probe = StreamingControl {
            hint: 0x0001, // dwFrameInterval is fixed
            format_index: format.format_index,
            frame_index: frame.frame_index,
            frame_interval: interval,
            ..Default::default()
        };

        let mut last = probe.clone();
        let mut stable = false;

        for round in 0..self.max_probe_rounds {
            self.set_probe(&probe, control_len)?;
            let readback = self.get_probe(control_len)?;
            debug!(round, ?readback, "PROBE round");

            if readback.format_index == last.format_index
                && readback.frame_index == last.frame_index
                && readback.frame_interval == last.frame_interval
                && readback.max_payload_transfer_size == last.max_payload_transfer_size
                && round > 0
            {
                stable = true;
                probe = readback;
                break;
            }

            last = readback.clone();
            probe = readback;
        }

        if !stable {
            warn!("PROBE did not stabilise within retry budget");
            return Err(NegotiationError::ProbeUnstable.into());
        }

        self.set_commit(&probe, control_len)?;
        info!(
            format_index = probe.format_index,
            frame_index = probe.frame_index,
            payload_size = probe.max_payload_transfer_size,
            "COMMIT accepted"
        );

        let alt = vs
            .alt_settings
            .iter()
            .filter(|alt| {
                alt.iso_endpoint
                    .map(|ep| ep.effective_packet_size() >= probe.max_payload_transfer_size)
                    .unwrap_or(false)
            })
            .min_by_key(|alt| alt.iso_endpoint.unwrap().effective_packet_size())
            .ok_or(NegotiationError::NoAltSettingFits)?;

        Ok((probe, alt))
    }

    /// PROBE/COMMIT addresses the streaming interface directly (`wIndex` =
    /// interface number, no unit shift), so every call here uses selector
    /// `0` as the "unit" -- `self.control`'s `interface_number` is the VS
    /// interface.
    fn set_probe(&self, sc: &StreamingControl, len: usize) -> Result<(), ControlError> {
        self.control.set(0, VS_PROBE_CONTROL, &sc.to_bytes(len))
    }

    fn get_probe(&self, len: usize) -> Result<StreamingControl, ControlError> {
        let bytes = self.control.get(0, VS_PROBE_CONTROL, Query::Cur, len)?;
        StreamingControl::from_bytes(&bytes)
    }

    fn set_commit(&self, sc: &StreamingControl, len: usize) -> Result<(), ControlError> {
        self.control.set(0, VS_COMMIT_CONTROL, &sc.to_bytes(len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StreamingControl {
        StreamingControl {
            hint: 1,
            format_index: 1,
            frame_index: 2,
            frame_interval: 333_333,
            key_frame_rate: 0,
            p_frame_rate: 0,
            comp_quality: 5000,
            comp_window_size: 0,
            delay: 0,
            max_video_frame_size: 4_147_200,
            max_payload_transfer_size: 3072,
            clock_frequency: 48_000_000,
            framing_info: 3,
            preferred_version: 1,
            min_version: 1,
            max_version: 1,
            usage: 0,
            bit_depth_luma: 8,
            settings: 0,
            max_number_of_ref_frames_plus1: 1,
            rate_control_modes: 0,
            layout_per_stream: 0,
        }
    }

    #[test]
    fn round_trips_48_byte_payload() {
        let sc = sample();
        let bytes = sc.to_bytes(48);
        assert_eq!(bytes.len(), 48);
        let back = StreamingControl::from_bytes(&bytes).unwrap();
        assert_eq!(back, sc);
    }

    #[test]
    fn round_trips_26_byte_payload_ignoring_extended_fields() {
        let sc = sample();
        let bytes = sc.to_bytes(26);
        assert_eq!(bytes.len(), 26);
        let back = StreamingControl::from_bytes(&bytes).unwrap();
        assert_eq!(back.format_index, sc.format_index);
        assert_eq!(back.frame_interval, sc.frame_interval);
        assert_eq!(back.clock_frequency, 0);
    }

    #[test]
    fn from_bytes_rejects_short_payload_instead_of_panicking() {
        let err = StreamingControl::from_bytes(&[0u8; 10]).unwrap_err();
        assert_eq!(err.kind, ControlErrorKind::InvalidLength);
    }

    #[test]
    fn match_format_prefers_requested_codec() {
        use crate::descriptor::{FrameIntervals, FrameInfo};

        let frame = FrameInfo {
            frame_index: 1,
            width: 1920,
            height: 1080,
            min_bit_rate: 0,
            max_bit_rate: 0,
            max_video_frame_buffer_size: 0,
            default_frame_interval: 333_333,
            intervals: FrameIntervals::Discrete(vec![333_333]),
            still_supported: false,
        };
        let fmt = StreamFormat {
            format_index: 1,
            guid: None,
            fourcc: "MJPG".into(),
            codec: Codec::Mjpeg,
            bits_per_pixel: 0,
            frames: vec![frame],
        };
        let vs = VsInterface {
            interface_number: 1,
            formats: vec![fmt],
            alt_settings: vec![],
        };
        let request = StreamRequest {
            width: 1920,
            height: 1080,
            codec: Some(Codec::Mjpeg),
            frame_interval: None,
        };
        let (fmt, frame) = match_format(&vs, &request).unwrap();
        assert_eq!(fmt.codec, Codec::Mjpeg);
        assert_eq!(frame.width, 1920);
    }
}
