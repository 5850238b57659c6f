// SPDX-License-Identifier: GPL-3.0-only

//! Typed model of a device's Video Control / Video Streaming descriptor tree.
//!
//! Unit and format "polymorphism" is expressed as tagged variants rather than
//! a class hierarchy, per this crate's re-architecture notes: fields common
//! to every unit (its ID, its advertised control bitmap) live in [`VcUnit`],
//! with the subtype-specific payload in [`UnitKind`].

use std::fmt;

/// USB standard endpoint transfer type, as far as this crate cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Isochronous,
    Bulk,
}

/// One endpoint advertised by a VS alternate setting.
#[derive(Debug, Clone, Copy)]
pub struct EndpointInfo {
    /// `bEndpointAddress`.
    pub address: u8,
    /// Raw `wMaxPacketSize`, including the 11-bit additional-transaction
    /// multiplier in bits 11-12 for high-speed isochronous endpoints.
    pub max_packet_size_raw: u16,
    pub kind: EndpointKind,
}

impl EndpointInfo {
    /// The packet size actually sustainable per microframe: base size times
    /// `1 + additional transactions` (USB 2.0 high-bandwidth iso encoding).
    pub fn effective_packet_size(&self) -> u32 {
        let base = (self.max_packet_size_raw & 0x07FF) as u32;
        let mult = ((self.max_packet_size_raw >> 11) & 0x3) as u32 + 1;
        base * mult
    }
}

/// One alternate setting of a Video Streaming interface.
#[derive(Debug, Clone, Default)]
pub struct AltSetting {
    pub alt_setting: u8,
    pub iso_endpoint: Option<EndpointInfo>,
    pub bulk_endpoint: Option<EndpointInfo>,
}

/// A bitmap of advertised controls whose bit positions map to UVC-defined
/// selector codes. Stored as the raw little-endian bytes the descriptor
/// carried; `is_set` indexes into it bit by bit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlBitmap(pub Vec<u8>);

impl ControlBitmap {
    pub fn is_set(&self, bit: usize) -> bool {
        let byte = bit / 8;
        let shift = bit % 8;
        self.0
            .get(byte)
            .map(|b| (b >> shift) & 1 == 1)
            .unwrap_or(false)
    }

    pub fn set_bits(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.0.len() * 8).filter(move |&bit| self.is_set(bit))
    }
}

/// Camera Terminal (Input Terminal with `wTerminalType == ITT_CAMERA`).
#[derive(Debug, Clone)]
pub struct CameraTerminal {
    pub objective_focal_length_min: u16,
    pub objective_focal_length_max: u16,
    pub ocular_focal_length: u16,
    pub controls: ControlBitmap,
}

/// Processing Unit: white balance, gain, etc., applied between the camera
/// terminal and the output terminal.
#[derive(Debug, Clone)]
pub struct ProcessingUnit {
    pub source_id: u8,
    pub max_multiplier: u16,
    pub controls: ControlBitmap,
}

/// Selector Unit: chooses among several input pins.
#[derive(Debug, Clone)]
pub struct SelectorUnit {
    pub input_pins: Vec<u8>,
}

/// Extension Unit: vendor-defined, identified by a 16-byte GUID.
#[derive(Debug, Clone)]
pub struct ExtensionUnit {
    pub guid: [u8; 16],
    pub num_controls: u8,
    pub input_pins: Vec<u8>,
    /// `bmControls` payload size list is folded into `controls` below;
    /// this keeps the raw advertised bitmap for quirks merging.
    pub controls: ControlBitmap,
    /// Human name/type-hint/etc. filled in by [`crate::quirks`] after load,
    /// keyed by selector bit. `None` until merged.
    pub quirk_selectors: Vec<Option<crate::quirks::SelectorQuirk>>,
}

/// Discriminant payload for a [`VcUnit`].
#[derive(Debug, Clone)]
pub enum UnitKind {
    CameraTerminal(CameraTerminal),
    OutputTerminal { source_id: u8 },
    Processing(ProcessingUnit),
    Selector(SelectorUnit),
    Extension(ExtensionUnit),
}

/// One Video Control unit or terminal. The unit ID is unique within its
/// [`VcInterface`] (enforced by the parser).
#[derive(Debug, Clone)]
pub struct VcUnit {
    pub unit_id: u8,
    pub kind: UnitKind,
}

impl VcUnit {
    pub fn controls(&self) -> Option<&ControlBitmap> {
        match &self.kind {
            UnitKind::CameraTerminal(c) => Some(&c.controls),
            UnitKind::Processing(p) => Some(&p.controls),
            UnitKind::Extension(x) => Some(&x.controls),
            UnitKind::OutputTerminal { .. } | UnitKind::Selector(_) => None,
        }
    }

    pub fn is_extension(&self) -> bool {
        matches!(self.kind, UnitKind::Extension(_))
    }
}

/// One Video Control interface.
#[derive(Debug, Clone, Default)]
pub struct VcInterface {
    pub interface_number: u8,
    /// `bcdUVC` from the VC HEADER descriptor, e.g. `0x0150` for UVC 1.5.
    pub uvc_version: u16,
    pub clock_frequency: u32,
    /// Interface numbers of the VS interfaces this VC interface controls.
    pub streaming_interfaces: Vec<u8>,
    pub units: Vec<VcUnit>,
}

impl VcInterface {
    pub fn unit(&self, unit_id: u8) -> Option<&VcUnit> {
        self.units.iter().find(|u| u.unit_id == unit_id)
    }

    /// Size of the PROBE/COMMIT control payload for this interface's UVC
    /// version: 26 bytes (1.0), 34 bytes (1.1), 48 bytes (>= 1.5).
    pub fn streaming_control_len(&self) -> usize {
        match self.uvc_version {
            v if v >= 0x0150 => 48,
            v if v >= 0x0110 => 34,
            _ => 26,
        }
    }
}

/// Either a discrete list of supported frame intervals (100ns units) or a
/// continuous min/max/step range.
#[derive(Debug, Clone)]
pub enum FrameIntervals {
    Discrete(Vec<u32>),
    Continuous { min: u32, max: u32, step: u32 },
}

impl FrameIntervals {
    /// Pick the interval closest to `desired` (100ns units), preferring the
    /// largest interval <= desired, falling back to the smallest available.
    pub fn closest_to(&self, desired: u32) -> u32 {
        match self {
            FrameIntervals::Discrete(list) => {
                let mut sorted = list.clone();
                sorted.sort_unstable();
                sorted
                    .iter()
                    .rev()
                    .find(|&&v| v <= desired)
                    .copied()
                    .or_else(|| sorted.first().copied())
                    .unwrap_or(desired)
            }
            FrameIntervals::Continuous { min, max, step } => {
                let clamped = desired.clamp(*min, *max);
                if *step == 0 {
                    clamped
                } else {
                    let steps = (clamped - min) / step;
                    min + steps * step
                }
            }
        }
    }
}

/// A supported (width, height) pair within a [`StreamFormat`].
#[derive(Debug, Clone)]
pub struct FrameInfo {
    /// 1-based index within the owning format.
    pub frame_index: u8,
    pub width: u16,
    pub height: u16,
    pub min_bit_rate: u32,
    pub max_bit_rate: u32,
    pub max_video_frame_buffer_size: u32,
    /// 100ns units.
    pub default_frame_interval: u32,
    pub intervals: FrameIntervals,
    pub still_supported: bool,
}

/// Codec carried by a [`StreamFormat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    Yuyv,
    Mjpeg,
    H264,
    H265,
    FrameBased,
    Other,
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Codec::Yuyv => "YUYV",
            Codec::Mjpeg => "MJPG",
            Codec::H264 => "H264",
            Codec::H265 => "H265",
            Codec::FrameBased => "FrameBased",
            Codec::Other => "Other",
        };
        write!(f, "{}", s)
    }
}

/// One supported codec within a Video Streaming interface.
#[derive(Debug, Clone)]
pub struct StreamFormat {
    /// 1-based index within the owning [`VsInterface`]; always equal to this
    /// format's 1-based position in `VsInterface::formats`.
    pub format_index: u8,
    pub guid: Option<[u8; 16]>,
    pub fourcc: String,
    pub codec: Codec,
    pub bits_per_pixel: u8,
    pub frames: Vec<FrameInfo>,
}

impl StreamFormat {
    pub fn frame(&self, frame_index: u8) -> Option<&FrameInfo> {
        self.frames.iter().find(|f| f.frame_index == frame_index)
    }
}

/// One Video Streaming interface.
#[derive(Debug, Clone, Default)]
pub struct VsInterface {
    pub interface_number: u8,
    pub formats: Vec<StreamFormat>,
    pub alt_settings: Vec<AltSetting>,
}

impl VsInterface {
    pub fn format(&self, format_index: u8) -> Option<&StreamFormat> {
        self.formats
            .iter()
            .find(|f| f.format_index == format_index)
    }
}

/// Canonicalise the fourcc embedded in the first 4 bytes of a UVC format
/// GUID: trailing spaces trimmed, case preserved.
pub fn fourcc_from_guid(guid: &[u8; 16]) -> String {
    let raw = &guid[0..4];
    let s = String::from_utf8_lossy(raw);
    s.trim_end().to_string()
}

pub fn codec_from_fourcc(fourcc: &str) -> Codec {
    match fourcc {
        "YUY2" | "YUYV" => Codec::Yuyv,
        "MJPG" => Codec::Mjpeg,
        "H264" => Codec::H264,
        "H265" | "HEVC" => Codec::H265,
        _ => Codec::Other,
    }
}

/// Complete parsed descriptor tree for a device.
#[derive(Debug, Clone, Default)]
pub struct DescriptorTree {
    pub vc_interfaces: Vec<VcInterface>,
    pub vs_interfaces: Vec<VsInterface>,
}

impl DescriptorTree {
    pub fn vs_interface(&self, interface_number: u8) -> Option<&VsInterface> {
        self.vs_interfaces
            .iter()
            .find(|vs| vs.interface_number == interface_number)
    }
}
