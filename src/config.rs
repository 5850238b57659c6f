// SPDX-License-Identifier: GPL-3.0-only

//! Configuration accepted by [`crate::UvcCamera::open`]: device selection,
//! scheduler sizing, and the behaviour flags enumerated in spec.md §6.
//! Plain `serde`-derived, JSON-serialisable -- this crate is headless, so
//! unlike the teacher's `cosmic_config`-backed `Config` there is no desktop
//! settings store to round-trip through; callers load/save it however
//! suits their application.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::descriptor::Codec;

/// Requested codec for a stream, plus `Auto` to defer to whatever the
/// device offers for the requested resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CodecPreference {
    #[default]
    Auto,
    Mjpeg,
    Yuyv,
    H264,
    H265,
    FrameBased,
}

impl CodecPreference {
    pub fn as_codec(self) -> Option<Codec> {
        match self {
            CodecPreference::Auto => None,
            CodecPreference::Mjpeg => Some(Codec::Mjpeg),
            CodecPreference::Yuyv => Some(Codec::Yuyv),
            CodecPreference::H264 => Some(Codec::H264),
            CodecPreference::H265 => Some(Codec::H265),
            CodecPreference::FrameBased => Some(Codec::FrameBased),
        }
    }
}

/// Device selection, scheduler sizing, and behaviour flags for one
/// [`crate::UvcCamera`] session. The stream's (width, height, fps, codec)
/// itself is a [`crate::negotiate::StreamRequest`], passed separately to
/// `configure_stream` since it may be renegotiated without reopening the
/// device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UvcConfig {
    /// USB vendor ID of the device to open.
    pub vendor_id: u16,
    /// USB product ID of the device to open.
    pub product_id: u16,
    /// Disambiguates among identical VID/PID devices.
    pub serial_number: Option<String>,
    /// Which VS interface to claim; `None` picks the VC interface's first
    /// advertised streaming interface.
    pub streaming_interface: Option<u8>,

    /// Concurrently submitted isochronous transfers.
    pub num_transfers: usize,
    /// Isochronous packets per transfer.
    pub packets_per_transfer: usize,
    /// Bound on the reassembler's completed-frame output queue.
    pub frame_queue_size: usize,

    /// Deliver uncompressed frames that completed short of
    /// `dwMaxVideoFrameSize` without a prior EOF, instead of discarding
    /// them. Defaults to `false` (discard), per spec.md §9's Open
    /// Question resolution.
    pub deliver_partial: bool,
    /// When the frame queue is full, drop the oldest completed frame
    /// instead of stalling transfer resubmission.
    pub drop_on_overflow: bool,
    /// Detach the `uvcvideo` kernel driver from the VC/VS interfaces on
    /// open, reattaching and resetting the device on close.
    pub auto_detach_vc: bool,
    /// Timeout for synchronous control transfers, in milliseconds.
    pub control_timeout_ms: u64,

    /// Directory of Extension-Unit quirks JSON files, loaded once at
    /// `open`. `None` starts with an empty registry.
    pub quirks_dir: Option<PathBuf>,
}

impl Default for UvcConfig {
    fn default() -> Self {
        Self {
            vendor_id: 0,
            product_id: 0,
            serial_number: None,
            streaming_interface: None,
            num_transfers: 12,
            packets_per_transfer: 32,
            frame_queue_size: 8,
            deliver_partial: false,
            drop_on_overflow: true,
            auto_detach_vc: true,
            control_timeout_ms: 2000,
            quirks_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_defaults() {
        let config = UvcConfig::default();
        assert_eq!(config.num_transfers, 12);
        assert_eq!(config.packets_per_transfer, 32);
        assert!(config.auto_detach_vc);
        assert!(!config.deliver_partial);
        assert_eq!(config.control_timeout_ms, 2000);
    }

    #[test]
    fn round_trips_through_json() {
        let config = UvcConfig {
            vendor_id: 0x0408,
            product_id: 0x5473,
            serial_number: Some("ABC123".into()),
            ..UvcConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: UvcConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.vendor_id, config.vendor_id);
        assert_eq!(back.serial_number, config.serial_number);
    }

    #[test]
    fn codec_preference_auto_defers_to_device() {
        assert_eq!(CodecPreference::Auto.as_codec(), None);
        assert_eq!(CodecPreference::Mjpeg.as_codec(), Some(Codec::Mjpeg));
    }
}
