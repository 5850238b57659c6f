// SPDX-License-Identifier: GPL-3.0-only

//! UVC class-specific control-request wire constants.
//!
//! Numerically grounded on the UVC 1.5 specification and cross-checked
//! against the retrieval pack's own from-scratch UVC constant tables (the
//! `CrabUSB` `usb-device-uvc` crate's `uvc_requests`/`vs_controls` modules),
//! which enumerate the identical values.

/// `bmRequestType` for a GET_* request directed at an interface.
pub const REQUEST_TYPE_GET: u8 = 0xA1;
/// `bmRequestType` for a SET_* request directed at an interface.
pub const REQUEST_TYPE_SET: u8 = 0x21;

/// UVC class-specific request codes (`bRequest`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    SetCur = 0x01,
    GetCur = 0x81,
    GetMin = 0x82,
    GetMax = 0x83,
    GetRes = 0x84,
    GetLen = 0x85,
    GetInfo = 0x86,
    GetDef = 0x87,
}

impl Request {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_get(self) -> bool {
        !matches!(self, Request::SetCur)
    }
}

/// Query kind accepted by the public [`crate::control`] API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    Cur,
    Min,
    Max,
    Res,
    Def,
    Len,
    Info,
}

impl Query {
    pub fn request(self) -> Request {
        match self {
            Query::Cur => Request::GetCur,
            Query::Min => Request::GetMin,
            Query::Max => Request::GetMax,
            Query::Res => Request::GetRes,
            Query::Def => Request::GetDef,
            Query::Len => Request::GetLen,
            Query::Info => Request::GetInfo,
        }
    }
}

/// Video Streaming interface control selectors (for PROBE/COMMIT).
pub const VS_PROBE_CONTROL: u8 = 0x01;
pub const VS_COMMIT_CONTROL: u8 = 0x02;
pub const VS_STILL_PROBE_CONTROL: u8 = 0x03;
pub const VS_STILL_COMMIT_CONTROL: u8 = 0x04;

/// Camera Terminal control selectors (subset used for GET_INFO bookkeeping
/// and quirks lookups by (unit-type, selector)).
pub mod ct_controls {
    pub const CT_SCANNING_MODE_CONTROL: u8 = 0x01;
    pub const CT_AE_MODE_CONTROL: u8 = 0x02;
    pub const CT_AE_PRIORITY_CONTROL: u8 = 0x03;
    pub const CT_EXPOSURE_TIME_ABSOLUTE_CONTROL: u8 = 0x04;
    pub const CT_EXPOSURE_TIME_RELATIVE_CONTROL: u8 = 0x05;
    pub const CT_FOCUS_ABSOLUTE_CONTROL: u8 = 0x06;
    pub const CT_FOCUS_RELATIVE_CONTROL: u8 = 0x07;
    pub const CT_FOCUS_AUTO_CONTROL: u8 = 0x08;
    pub const CT_IRIS_ABSOLUTE_CONTROL: u8 = 0x09;
    pub const CT_IRIS_RELATIVE_CONTROL: u8 = 0x0A;
    pub const CT_ZOOM_ABSOLUTE_CONTROL: u8 = 0x0B;
    pub const CT_ZOOM_RELATIVE_CONTROL: u8 = 0x0C;
    pub const CT_PANTILT_ABSOLUTE_CONTROL: u8 = 0x0D;
    pub const CT_PANTILT_RELATIVE_CONTROL: u8 = 0x0E;
    pub const CT_ROLL_ABSOLUTE_CONTROL: u8 = 0x0F;
    pub const CT_ROLL_RELATIVE_CONTROL: u8 = 0x10;
    pub const CT_PRIVACY_CONTROL: u8 = 0x11;
}

/// Processing Unit control selectors.
pub mod pu_controls {
    pub const PU_BACKLIGHT_COMPENSATION_CONTROL: u8 = 0x01;
    pub const PU_BRIGHTNESS_CONTROL: u8 = 0x02;
    pub const PU_CONTRAST_CONTROL: u8 = 0x03;
    pub const PU_GAIN_CONTROL: u8 = 0x04;
    pub const PU_POWER_LINE_FREQUENCY_CONTROL: u8 = 0x05;
    pub const PU_HUE_CONTROL: u8 = 0x06;
    pub const PU_SATURATION_CONTROL: u8 = 0x07;
    pub const PU_SHARPNESS_CONTROL: u8 = 0x08;
    pub const PU_GAMMA_CONTROL: u8 = 0x09;
    pub const PU_WHITE_BALANCE_TEMPERATURE_CONTROL: u8 = 0x0A;
    pub const PU_WHITE_BALANCE_TEMPERATURE_AUTO_CONTROL: u8 = 0x0B;
    pub const PU_WHITE_BALANCE_COMPONENT_CONTROL: u8 = 0x0C;
    pub const PU_WHITE_BALANCE_COMPONENT_AUTO_CONTROL: u8 = 0x0D;
    pub const PU_DIGITAL_MULTIPLIER_CONTROL: u8 = 0x0E;
    pub const PU_DIGITAL_MULTIPLIER_LIMIT_CONTROL: u8 = 0x0F;
    pub const PU_HUE_AUTO_CONTROL: u8 = 0x10;
    pub const PU_ANALOG_VIDEO_STANDARD_CONTROL: u8 = 0x11;
    pub const PU_ANALOG_LOCK_STATUS_CONTROL: u8 = 0x12;
}

/// Fixed payload lengths (bytes) for standard (non-XU) controls whose
/// length is not self-describing via GET_LEN.
pub fn standard_control_len(selector: u8, is_processing_unit: bool) -> Option<usize> {
    use ct_controls::*;
    use pu_controls::*;

    if is_processing_unit {
        return match selector {
            PU_BACKLIGHT_COMPENSATION_CONTROL => Some(2),
            PU_BRIGHTNESS_CONTROL => Some(2),
            PU_CONTRAST_CONTROL => Some(2),
            PU_GAIN_CONTROL => Some(2),
            PU_POWER_LINE_FREQUENCY_CONTROL => Some(1),
            PU_HUE_CONTROL => Some(2),
            PU_SATURATION_CONTROL => Some(2),
            PU_SHARPNESS_CONTROL => Some(2),
            PU_GAMMA_CONTROL => Some(2),
            PU_WHITE_BALANCE_TEMPERATURE_CONTROL => Some(2),
            PU_WHITE_BALANCE_TEMPERATURE_AUTO_CONTROL => Some(1),
            PU_WHITE_BALANCE_COMPONENT_CONTROL => Some(4),
            PU_WHITE_BALANCE_COMPONENT_AUTO_CONTROL => Some(1),
            PU_DIGITAL_MULTIPLIER_CONTROL => Some(2),
            PU_DIGITAL_MULTIPLIER_LIMIT_CONTROL => Some(2),
            PU_HUE_AUTO_CONTROL => Some(1),
            PU_ANALOG_VIDEO_STANDARD_CONTROL => Some(1),
            PU_ANALOG_LOCK_STATUS_CONTROL => Some(1),
            _ => None,
        };
    }

    match selector {
        CT_SCANNING_MODE_CONTROL => Some(1),
        CT_AE_MODE_CONTROL => Some(1),
        CT_AE_PRIORITY_CONTROL => Some(1),
        CT_EXPOSURE_TIME_ABSOLUTE_CONTROL => Some(4),
        CT_EXPOSURE_TIME_RELATIVE_CONTROL => Some(1),
        CT_FOCUS_ABSOLUTE_CONTROL => Some(2),
        CT_FOCUS_RELATIVE_CONTROL => Some(2),
        CT_FOCUS_AUTO_CONTROL => Some(1),
        CT_IRIS_ABSOLUTE_CONTROL => Some(2),
        CT_IRIS_RELATIVE_CONTROL => Some(1),
        CT_ZOOM_ABSOLUTE_CONTROL => Some(2),
        CT_ZOOM_RELATIVE_CONTROL => Some(3),
        CT_PANTILT_ABSOLUTE_CONTROL => Some(8),
        CT_PANTILT_RELATIVE_CONTROL => Some(4),
        CT_ROLL_ABSOLUTE_CONTROL => Some(2),
        CT_ROLL_RELATIVE_CONTROL => Some(2),
        CT_PRIVACY_CONTROL => Some(1),
        _ => None,
    }
}

/// GET_INFO capability bit positions (spec.md §4.2).
pub mod info_bits {
    pub const SUPPORTS_GET: u8 = 1 << 0;
    pub const SUPPORTS_SET: u8 = 1 << 1;
    pub const DISABLED_BY_AUTOMATIC_CONTROL: u8 = 1 << 2;
    pub const AUTOUPDATE: u8 = 1 << 3;
    pub const ASYNC: u8 = 1 << 4;
    pub const DISABLED_BY_COMMIT_INCOMPATIBILITY: u8 = 1 << 5;
}
