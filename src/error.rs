// SPDX-License-Identifier: GPL-3.0-only

//! Crate-wide error taxonomy
//!
//! Mirrors the per-subsystem enum + umbrella enum shape used throughout this
//! crate's UVC subsystems: each stage of `open -> configure_stream ->
//! next_frame` has its own error type, and [`UvcError`] wraps all of them so
//! a single `Result` alias can flow through the public API.

use std::fmt;

/// Result type alias used by the public API.
pub type UvcResult<T> = Result<T, UvcError>;

/// Umbrella error type returned by the public API.
#[derive(Debug, Clone)]
pub enum UvcError {
    /// Malformed configuration descriptor; fatal to `open`.
    Descriptor(DescriptorError),
    /// Per-control-transfer failure.
    Control(ControlError),
    /// PROBE/COMMIT negotiation failure; fatal to `configure_stream`.
    Negotiation(NegotiationError),
    /// Packet/transfer-level USB failure.
    Transfer(TransferError),
    /// Frame-level failure; the frame is dropped, streaming continues.
    Frame(FrameError),
    /// Underlying USB library error not covered by the above.
    Io(String),
}

impl fmt::Display for UvcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UvcError::Descriptor(e) => write!(f, "descriptor error: {}", e),
            UvcError::Control(e) => write!(f, "control error: {}", e),
            UvcError::Negotiation(e) => write!(f, "negotiation error: {}", e),
            UvcError::Transfer(e) => write!(f, "transfer error: {}", e),
            UvcError::Frame(e) => write!(f, "frame error: {}", e),
            UvcError::Io(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for UvcError {}

/// Descriptor-parser failure: `{offset, reason}` as spec'd.
#[derive(Debug, Clone)]
pub struct DescriptorError {
    /// Byte offset into the configuration descriptor where parsing failed.
    pub offset: usize,
    /// Human-readable reason.
    pub reason: String,
}

impl DescriptorError {
    pub fn new(offset: usize, reason: impl Into<String>) -> Self {
        Self {
            offset,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at offset {}: {}", self.offset, self.reason)
    }
}

impl std::error::Error for DescriptorError {}

/// Kind of control-transfer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlErrorKind {
    /// Device STALLed the request.
    Stall,
    /// Request timed out.
    Timeout,
    /// Device returned an unexpected payload length.
    InvalidLength,
    /// Control is not supported by this unit/selector.
    NotSupported,
}

/// Per-control-transfer error.
#[derive(Debug, Clone)]
pub struct ControlError {
    pub kind: ControlErrorKind,
    /// Unit ID the control belongs to.
    pub unit: u8,
    /// Control selector code.
    pub selector: u8,
}

impl ControlError {
    pub fn new(kind: ControlErrorKind, unit: u8, selector: u8) -> Self {
        Self {
            kind,
            unit,
            selector,
        }
    }
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} on unit {} selector 0x{:02x}",
            self.kind, self.unit, self.selector
        )
    }
}

impl std::error::Error for ControlError {}

/// Kind of PROBE/COMMIT negotiation failure.
#[derive(Debug, Clone)]
pub enum NegotiationError {
    /// No format/frame matched the requested (width, height, codec).
    NoMatchingFormat,
    /// PROBE did not stabilise within the retry budget.
    ProbeUnstable,
    /// COMMIT was STALLed by the device.
    CommitStalled,
    /// No alternate setting's endpoint can sustain the negotiated payload size.
    NoAltSettingFits,
}

impl fmt::Display for NegotiationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationError::NoMatchingFormat => write!(f, "no matching format/frame"),
            NegotiationError::ProbeUnstable => write!(f, "PROBE did not stabilise"),
            NegotiationError::CommitStalled => write!(f, "COMMIT stalled"),
            NegotiationError::NoAltSettingFits => {
                write!(f, "no alt setting's endpoint fits the negotiated payload size")
            }
        }
    }
}

impl std::error::Error for NegotiationError {}

/// Packet/transfer-level USB failure.
#[derive(Debug, Clone)]
pub enum TransferError {
    /// Transfer was cancelled (e.g. during `stop()`).
    Cancelled,
    /// Endpoint STALLed.
    Stall,
    /// Backpressure overflow with `drop_on_overflow = false`.
    Overflow,
    /// Device disappeared; fatal to the stream.
    NoDevice,
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::Cancelled => write!(f, "transfer cancelled"),
            TransferError::Stall => write!(f, "endpoint stalled"),
            TransferError::Overflow => write!(f, "output queue overflowed"),
            TransferError::NoDevice => write!(f, "device disconnected"),
        }
    }
}

impl std::error::Error for TransferError {}

/// Frame-level failure; the frame is dropped but streaming continues.
#[derive(Debug, Clone)]
pub enum FrameError {
    /// Frame ended without reaching the expected size (uncompressed only).
    Truncated,
    /// Frame failed its codec-specific magic-byte check (e.g. MJPEG SOI).
    BadMagic,
    /// H.264/H.265 frame contains an IDR but no parameter set has ever been cached.
    ParameterSetMissing,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Truncated => write!(f, "frame truncated"),
            FrameError::BadMagic => write!(f, "frame failed magic-byte check"),
            FrameError::ParameterSetMissing => {
                write!(f, "IDR frame seen before any parameter set was cached")
            }
        }
    }
}

impl std::error::Error for FrameError {}

// ===== Conversions into the umbrella type =====

impl From<DescriptorError> for UvcError {
    fn from(e: DescriptorError) -> Self {
        UvcError::Descriptor(e)
    }
}

impl From<ControlError> for UvcError {
    fn from(e: ControlError) -> Self {
        UvcError::Control(e)
    }
}

impl From<NegotiationError> for UvcError {
    fn from(e: NegotiationError) -> Self {
        UvcError::Negotiation(e)
    }
}

impl From<TransferError> for UvcError {
    fn from(e: TransferError) -> Self {
        UvcError::Transfer(e)
    }
}

impl From<FrameError> for UvcError {
    fn from(e: FrameError) -> Self {
        UvcError::Frame(e)
    }
}

impl From<rusb::Error> for UvcError {
    fn from(e: rusb::Error) -> Self {
        UvcError::Io(e.to_string())
    }
}
