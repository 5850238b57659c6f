// SPDX-License-Identifier: GPL-3.0-only

//! Frame reassembler: parses the UVC payload header on every non-empty iso
//! packet, tracks the Frame-ID toggle bit, and concatenates payload bytes
//! into a [`CompletedFrame`] on end-of-frame or an implicit FID-toggle
//! boundary.
//!
//! The header parse itself is grounded on the UVC 1.5 payload header layout
//! (spec.md §4.5); the little-endian field reads reuse `byteorder`, the same
//! crate the descriptor parser already uses for this exact purpose.

use std::time::Instant;

use byteorder::{ByteOrder, LittleEndian as LE};
use tracing::{debug, trace};

use crate::descriptor::Codec;
use crate::stats::Stats;
use std::sync::Arc;

/// One packet's parsed UVC payload header, plus a view of its payload
/// bytes (`bHeaderLength..`).
#[derive(Debug, Clone, Copy)]
pub struct PayloadHeader {
    pub header_length: u8,
    pub frame_id: bool,
    pub end_of_frame: bool,
    pub still_image: bool,
    pub error: bool,
    pub pts: Option<u32>,
    pub scr: Option<(u32, u16)>,
}

impl PayloadHeader {
    /// Parse the header at the front of `packet`, returning the header and
    /// the remaining payload slice. `None` if the packet is too short to
    /// hold even the 2-byte minimum header or `bHeaderLength` is
    /// inconsistent with the packet/flag bytes present.
    pub fn parse(packet: &[u8]) -> Option<(Self, &[u8])> {
        if packet.len() < 2 {
            return None;
        }
        let header_length = packet[0];
        if header_length < 2 || header_length as usize > packet.len() {
            return None;
        }
        let flags = packet[1];
        let frame_id = flags & 0x01 != 0;
        let end_of_frame = flags & 0x02 != 0;
        let has_pts = flags & 0x04 != 0;
        let has_scr = flags & 0x08 != 0;
        let still_image = flags & 0x20 != 0;
        let error = flags & 0x40 != 0;

        let mut offset = 2usize;
        let mut pts = None;
        if has_pts {
            if offset + 4 > header_length as usize {
                return None;
            }
            pts = Some(LE::read_u32(&packet[offset..offset + 4]));
            offset += 4;
        }
        let mut scr = None;
        if has_scr {
            if offset + 6 > header_length as usize {
                return None;
            }
            let stc = LE::read_u32(&packet[offset..offset + 4]);
            let sof = LE::read_u16(&packet[offset + 4..offset + 6]);
            scr = Some((stc, sof));
        }

        let payload = &packet[header_length as usize..];
        Some((
            PayloadHeader {
                header_length,
                frame_id,
                end_of_frame,
                still_image,
                error,
                pts,
                scr,
            },
            payload,
        ))
    }
}

/// The in-progress frame: accumulated payload bytes, FID parity, first PTS
/// seen, and a sticky error flag.
#[derive(Debug)]
struct FrameBuffer {
    data: Vec<u8>,
    fid: bool,
    pts: Option<u32>,
    errored: bool,
}

/// An immutable, completed frame ready for delivery to the application (or,
/// for H.264/H.265, to the [`crate::bitstream`] normaliser first).
#[derive(Debug, Clone)]
pub struct CompletedFrame {
    pub fourcc: String,
    pub codec: Codec,
    pub width: u16,
    pub height: u16,
    pub data: Vec<u8>,
    pub host_timestamp: Instant,
    pub device_pts: Option<u32>,
    pub sequence: u64,
}

/// Why a frame was dropped instead of delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDropReason {
    /// Ended (implicit boundary or explicit EOF) short of the negotiated
    /// `dwMaxVideoFrameSize`, for an uncompressed format.
    Truncated,
    /// MJPEG frame did not start with `0xFF 0xD8`.
    BadMagic,
    /// The error bit was set on at least one packet in this frame.
    Errored,
}

/// An event emitted by [`FrameReassembler::push_packet`]. A single packet
/// can emit up to two events: completing the previous frame at an implicit
/// FID-toggle boundary, then immediately completing a one-packet frame if
/// the same packet also carries the EOF bit.
#[derive(Debug, Clone)]
pub enum ReassemblerEvent {
    Frame(CompletedFrame),
    Dropped {
        sequence: u64,
        reason: FrameDropReason,
    },
}

/// Table-driven frame reassembler for one configured stream. Scoped to a
/// single `configure_stream` call: construct a fresh one on every
/// (re)configuration, mirroring the parameter-set cache lifetime note in
/// spec.md §9.
pub struct FrameReassembler {
    current: Option<FrameBuffer>,
    next_sequence: u64,
    fourcc: String,
    codec: Codec,
    width: u16,
    height: u16,
    max_video_frame_size: u32,
    deliver_partial: bool,
    stats: Arc<Stats>,
}

impl FrameReassembler {
    pub fn new(
        fourcc: String,
        codec: Codec,
        width: u16,
        height: u16,
        max_video_frame_size: u32,
        deliver_partial: bool,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            current: None,
            next_sequence: 0,
            fourcc,
            codec,
            width,
            height,
            max_video_frame_size,
            deliver_partial,
            stats,
        }
    }

    /// Feed one iso packet with `actual_length > 0` (the scheduler never
    /// hands this a zero-length packet). Returns 0, 1, or 2 events.
    pub fn push_packet(&mut self, packet: &[u8]) -> Vec<ReassemblerEvent> {
        let mut events = Vec::with_capacity(1);

        let Some((header, payload)) = PayloadHeader::parse(packet) else {
            trace!(len = packet.len(), "malformed payload header, marking current frame errored");
            if let Some(buf) = &mut self.current {
                buf.errored = true;
            }
            return events;
        };

        match &self.current {
            // A header-only packet (no payload) arriving with no frame in
            // progress must not start one (spec.md §8 boundary property).
            None if payload.is_empty() => {}
            None => self.start_buffer(header.frame_id, header.pts),
            Some(buf) if buf.fid != header.frame_id => {
                debug!("implicit frame boundary (FID toggle without prior EOF)");
                if let Some(ev) = self.complete_buffer(false) {
                    events.push(ev);
                }
                self.start_buffer(header.frame_id, header.pts);
            }
            Some(_) => {}
        }

        if let Some(buf) = &mut self.current {
            if header.error {
                buf.errored = true;
            }
            if buf.pts.is_none()
                && let Some(pts) = header.pts
            {
                buf.pts = Some(pts);
            }
            if !payload.is_empty() {
                buf.data.extend_from_slice(payload);
                if self.max_video_frame_size > 0
                    && buf.data.len() as u64 > self.max_video_frame_size as u64
                {
                    buf.errored = true;
                }
            }
        }

        if header.end_of_frame
            && let Some(ev) = self.complete_buffer(true)
        {
            events.push(ev);
        }

        events
    }

    /// Mark the in-progress frame (if any) errored without touching its
    /// data, for transfer-level failures (e.g. a non-OK iso packet status)
    /// that carry no UVC payload header to parse.
    pub fn mark_current_errored(&mut self) {
        if let Some(buf) = &mut self.current {
            buf.errored = true;
        }
    }

    fn start_buffer(&mut self, fid: bool, pts: Option<u32>) {
        self.current = Some(FrameBuffer {
            data: Vec::new(),
            fid,
            pts,
            errored: false,
        });
    }

    fn next_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }

    fn complete_buffer(&mut self, reached_eof: bool) -> Option<ReassemblerEvent> {
        let buf = self.current.take()?;
        let sequence = self.next_sequence();

        if buf.errored {
            self.stats.inc_errored();
            return Some(ReassemblerEvent::Dropped {
                sequence,
                reason: FrameDropReason::Errored,
            });
        }

        if buf.data.is_empty() {
            self.stats.inc_truncated();
            return Some(ReassemblerEvent::Dropped {
                sequence,
                reason: FrameDropReason::Truncated,
            });
        }

        if self.codec == Codec::Mjpeg {
            if buf.data.len() < 2 || buf.data[0] != 0xFF || buf.data[1] != 0xD8 {
                self.stats.inc_errored();
                return Some(ReassemblerEvent::Dropped {
                    sequence,
                    reason: FrameDropReason::BadMagic,
                });
            }
        } else if matches!(self.codec, Codec::Yuyv | Codec::Other)
            && self.max_video_frame_size > 0
            && (buf.data.len() as u32) < self.max_video_frame_size
            && !reached_eof
            && !self.deliver_partial
        {
            self.stats.inc_truncated();
            return Some(ReassemblerEvent::Dropped {
                sequence,
                reason: FrameDropReason::Truncated,
            });
        }

        Some(ReassemblerEvent::Frame(CompletedFrame {
            fourcc: self.fourcc.clone(),
            codec: self.codec,
            width: self.width,
            height: self.height,
            data: buf.data,
            host_timestamp: Instant::now(),
            device_pts: buf.pts,
            sequence,
        }))
    }
}
