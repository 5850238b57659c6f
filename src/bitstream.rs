// SPDX-License-Identifier: GPL-3.0-only

//! H.264/H.265 bitstream normaliser: detects Annex-B vs length-prefixed
//! (AVC) NAL layout, caches the latest SPS/PPS/VPS seen on the wire, and
//! prepends cached parameter sets before IDR frames that arrive without
//! their own, so a downstream decoder can always initialise from the first
//! delivered IDR.
//!
//! Stream-scoped: construct a fresh [`BitstreamNormaliser`] on every
//! `configure_stream`, per the parameter-set cache lifetime note in
//! spec.md §9 -- it must never leak parameter sets across a
//! reconfiguration to a different stream.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::descriptor::Codec;
use crate::reassemble::CompletedFrame;
use crate::stats::Stats;

const ANNEX_B_START_4: [u8; 4] = [0x00, 0x00, 0x00, 0x01];
const ANNEX_B_START_3: [u8; 3] = [0x00, 0x00, 0x01];

/// One NAL unit as found in an Annex-B bitstream: its type and its byte
/// range within the frame (including the leading start code).
#[derive(Debug, Clone, Copy)]
struct Nal {
    nal_type: u8,
    /// Offset of the NAL's payload (first byte after the start code).
    payload_start: usize,
    payload_end: usize,
}

fn start_code_len(buf: &[u8]) -> Option<usize> {
    if buf.starts_with(&ANNEX_B_START_4) {
        Some(4)
    } else if buf.starts_with(&ANNEX_B_START_3) {
        Some(3)
    } else {
        None
    }
}

/// Walk an Annex-B buffer, yielding each NAL unit's type and payload range.
fn iter_annex_b_nals(buf: &[u8]) -> Vec<Nal> {
    let mut nals = Vec::new();
    let mut i = 0usize;
    while i < buf.len() {
        let Some(len) = start_code_len(&buf[i..]) else {
            i += 1;
            continue;
        };
        let payload_start = i + len;
        if payload_start >= buf.len() {
            break;
        }
        // Find the next start code to bound this NAL, or the end of buffer.
        let mut j = payload_start + 1;
        let mut payload_end = buf.len();
        while j < buf.len() {
            if start_code_len(&buf[j..]).is_some() {
                payload_end = j;
                break;
            }
            j += 1;
        }
        let nal_type = buf[payload_start];
        nals.push(Nal {
            nal_type,
            payload_start,
            payload_end,
        });
        i = payload_end;
    }
    nals
}

/// Convert length-prefixed (AVC) NAL units to Annex-B in place, given the
/// prefix width in bytes (1, 2, or 4 -- UVC frame-based payloads use 4).
fn avc_to_annex_b(buf: &[u8], prefix_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(buf.len() + 16);
    let mut i = 0usize;
    while i + prefix_len <= buf.len() {
        let nal_len = match prefix_len {
            1 => buf[i] as usize,
            2 => u16::from_be_bytes([buf[i], buf[i + 1]]) as usize,
            4 => u32::from_be_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]) as usize,
            _ => break,
        };
        let nal_start = i + prefix_len;
        let nal_end = (nal_start + nal_len).min(buf.len());
        if nal_start >= buf.len() {
            break;
        }
        out.extend_from_slice(&ANNEX_B_START_4);
        out.extend_from_slice(&buf[nal_start..nal_end]);
        i = nal_end;
    }
    out
}

/// Heuristic: does `buf`'s first 64 bytes contain an Annex-B start code?
/// If not, and the first 4 bytes plausibly encode a NAL length shorter
/// than the buffer, treat it as AVC/length-prefixed.
fn looks_like_avc(buf: &[u8]) -> bool {
    let probe = &buf[..buf.len().min(64)];
    if start_code_len(probe).is_some() || probe.windows(3).any(|w| w == ANNEX_B_START_3) {
        return false;
    }
    if buf.len() < 4 {
        return false;
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    len > 0 && len < buf.len()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NalKind {
    Vps,
    Sps,
    Pps,
    Idr,
    Other,
}

fn classify(codec: Codec, nal_type: u8) -> NalKind {
    match codec {
        Codec::H264 => match nal_type & 0x1F {
            7 => NalKind::Sps,
            8 => NalKind::Pps,
            5 => NalKind::Idr,
            _ => NalKind::Other,
        },
        Codec::H265 => match (nal_type >> 1) & 0x3F {
            32 => NalKind::Vps,
            33 => NalKind::Sps,
            34 => NalKind::Pps,
            19 | 20 => NalKind::Idr,
            _ => NalKind::Other,
        },
        _ => NalKind::Other,
    }
}

/// Per-codec latest-parameter-set cache, reset on every `configure_stream`.
#[derive(Debug, Default, Clone)]
struct ParamSetCache {
    vps: Option<Vec<u8>>,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl ParamSetCache {
    fn is_complete(&self, codec: Codec) -> bool {
        match codec {
            Codec::H265 => self.vps.is_some() && self.sps.is_some() && self.pps.is_some(),
            _ => self.sps.is_some() && self.pps.is_some(),
        }
    }

    fn prepend_bytes(&self, codec: Codec) -> Vec<u8> {
        let mut out = Vec::new();
        if codec == Codec::H265
            && let Some(vps) = &self.vps
        {
            out.extend_from_slice(&ANNEX_B_START_4);
            out.extend_from_slice(vps);
        }
        if let Some(sps) = &self.sps {
            out.extend_from_slice(&ANNEX_B_START_4);
            out.extend_from_slice(sps);
        }
        if let Some(pps) = &self.pps {
            out.extend_from_slice(&ANNEX_B_START_4);
            out.extend_from_slice(pps);
        }
        out
    }
}

/// Stream-scoped SPS/PPS/VPS cache plus the Annex-B/AVC rewrite logic.
pub struct BitstreamNormaliser {
    codec: Codec,
    cache: ParamSetCache,
    /// Once true, consecutive frames are dropped until a parameter set is
    /// observed on the wire (spec.md §4.6: "subsequent frames are also
    /// dropped until a parameter set is observed").
    awaiting_first_param_set: bool,
    stats: Arc<Stats>,
}

impl BitstreamNormaliser {
    pub fn new(codec: Codec, stats: Arc<Stats>) -> Self {
        Self {
            codec,
            cache: ParamSetCache::default(),
            awaiting_first_param_set: false,
            stats,
        }
    }

    /// Normalise `frame` in place. Returns `false` if the frame must be
    /// dropped entirely (IDR with no parameter set ever cached).
    pub fn normalise(&mut self, frame: &mut CompletedFrame) -> bool {
        if !matches!(self.codec, Codec::H264 | Codec::H265) {
            return true;
        }

        let annex_b = if looks_like_avc(&frame.data) {
            avc_to_annex_b(&frame.data, 4)
        } else {
            frame.data.clone()
        };

        let nals = iter_annex_b_nals(&annex_b);
        let mut has_idr = false;
        let mut idr_offset = None;
        let mut has_param_set_before_idr = false;

        for nal in &nals {
            let kind = classify(self.codec, nal.nal_type);
            match kind {
                NalKind::Vps => {
                    self.cache.vps = Some(annex_b[nal.payload_start..nal.payload_end].to_vec());
                }
                NalKind::Sps => {
                    self.cache.sps = Some(annex_b[nal.payload_start..nal.payload_end].to_vec());
                    if !has_idr {
                        has_param_set_before_idr = true;
                    }
                }
                NalKind::Pps => {
                    self.cache.pps = Some(annex_b[nal.payload_start..nal.payload_end].to_vec());
                    if !has_idr {
                        has_param_set_before_idr = true;
                    }
                }
                NalKind::Idr => {
                    if !has_idr {
                        has_idr = true;
                        idr_offset = Some(nal.payload_start);
                    }
                }
                NalKind::Other => {}
            }
        }

        if !has_idr {
            frame.data = annex_b;
            self.awaiting_first_param_set = false;
            return true;
        }

        // Re-scan strictly before the first IDR for a parameter set the
        // loop above may have recorded globally but not "before" the IDR
        // (H.265 VPS/SPS/PPS must all precede the IDR for this check).
        let idr_offset = idr_offset.unwrap();
        let already_has_params_before_idr = has_param_set_before_idr
            || nals
                .iter()
                .take_while(|n| n.payload_start < idr_offset)
                .any(|n| matches!(classify(self.codec, n.nal_type), NalKind::Sps | NalKind::Pps | NalKind::Vps));

        if already_has_params_before_idr {
            frame.data = annex_b;
            self.awaiting_first_param_set = false;
            return true;
        }

        if !self.cache.is_complete(self.codec) {
            warn!(codec = %self.codec, "IDR frame with no cached parameter set, dropping");
            self.stats.inc_parameter_set_missing();
            self.awaiting_first_param_set = true;
            return false;
        }

        let mut rewritten = self.cache.prepend_bytes(self.codec);
        rewritten.extend_from_slice(&annex_b);
        debug!(
            codec = %self.codec,
            prepended = rewritten.len() - annex_b.len(),
            "prepended cached parameter sets before IDR"
        );
        frame.data = rewritten;
        self.awaiting_first_param_set = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nal(start4: bool, nal_type_byte: u8, body: &[u8]) -> Vec<u8> {
        let mut v = if start4 {
            ANNEX_B_START_4.to_vec()
        } else {
            ANNEX_B_START_3.to_vec()
        };
        v.push(nal_type_byte);
        v.extend_from_slice(body);
        v
    }

    fn frame(codec: Codec, data: Vec<u8>) -> CompletedFrame {
        CompletedFrame {
            fourcc: codec.to_string(),
            codec,
            width: 1920,
            height: 1080,
            data,
            host_timestamp: std::time::Instant::now(),
            device_pts: None,
            sequence: 0,
        }
    }

    #[test]
    fn non_h26x_codec_passes_through_untouched() {
        let mut n = BitstreamNormaliser::new(Codec::Mjpeg, Stats::new());
        let mut f = frame(Codec::Mjpeg, vec![0xFF, 0xD8, 0xFF, 0xD9]);
        let original = f.data.clone();
        assert!(n.normalise(&mut f));
        assert_eq!(f.data, original);
    }

    #[test]
    fn caches_sps_pps_from_incoming_frames() {
        let mut n = BitstreamNormaliser::new(Codec::H264, Stats::new());
        let mut f = frame(
            Codec::H264,
            [nal(true, 7, &[0xAA]), nal(true, 8, &[0xBB]), nal(true, 5, &[0xCC])].concat(),
        );
        assert!(n.normalise(&mut f));
        assert!(n.cache.sps.is_some());
        assert!(n.cache.pps.is_some());
    }

    #[test]
    fn idr_without_params_and_no_cache_is_dropped() {
        let mut n = BitstreamNormaliser::new(Codec::H264, Stats::new());
        let mut f = frame(Codec::H264, nal(true, 5, &[0xCC]));
        assert!(!n.normalise(&mut f));
    }

    #[test]
    fn idr_without_params_but_cache_present_gets_prepended() {
        let mut n = BitstreamNormaliser::new(Codec::H264, Stats::new());
        let mut first = frame(
            Codec::H264,
            [nal(true, 7, &[0xAA]), nal(true, 8, &[0xBB]), nal(true, 5, &[0xCC])].concat(),
        );
        assert!(n.normalise(&mut first));

        let mut later = frame(Codec::H264, nal(true, 1, &[0xDD])); // P-slice only
        assert!(n.normalise(&mut later));
        // no IDR present, passes through, no prepend
        assert_eq!(later.data, nal(true, 1, &[0xDD]));

        let mut idr_only = frame(Codec::H264, nal(true, 5, &[0xEE]));
        assert!(n.normalise(&mut idr_only));
        let sps_offset = idr_only
            .data
            .windows(5)
            .position(|w| w == [0, 0, 0, 1, 7])
            .expect("SPS must be prepended");
        let idr_offset = idr_only
            .data
            .windows(5)
            .position(|w| w == [0, 0, 0, 1, 5])
            .expect("IDR must still be present");
        assert!(sps_offset < idr_offset);
    }

    #[test]
    fn idr_with_own_params_is_untouched() {
        let mut n = BitstreamNormaliser::new(Codec::H264, Stats::new());
        let data = [nal(true, 7, &[0xAA]), nal(true, 8, &[0xBB]), nal(true, 5, &[0xCC])].concat();
        let mut f = frame(Codec::H264, data.clone());
        assert!(n.normalise(&mut f));
        assert_eq!(f.data, data);
    }

    #[test]
    fn avc_length_prefixed_input_is_converted_to_annex_b() {
        let mut n = BitstreamNormaliser::new(Codec::H264, Stats::new());
        let mut avc = Vec::new();
        avc.extend_from_slice(&2u32.to_be_bytes());
        avc.extend_from_slice(&[7, 0xAA]);
        avc.extend_from_slice(&2u32.to_be_bytes());
        avc.extend_from_slice(&[8, 0xBB]);
        let mut f = frame(Codec::H264, avc);
        assert!(n.normalise(&mut f));
        assert!(f.data.windows(4).any(|w| w == ANNEX_B_START_4));
    }

    #[test]
    fn h265_requires_vps_sps_and_pps_before_prepending() {
        let mut n = BitstreamNormaliser::new(Codec::H265, Stats::new());
        let vps_type = 32u8 << 1;
        let sps_type = 33u8 << 1;
        let pps_type = 34u8 << 1;
        let idr_type = 19u8 << 1;
        let mut first = frame(
            Codec::H265,
            [
                nal(true, vps_type, &[1]),
                nal(true, sps_type, &[2]),
                nal(true, pps_type, &[3]),
                nal(true, idr_type, &[4]),
            ]
            .concat(),
        );
        assert!(n.normalise(&mut first));

        let mut idr_only = frame(Codec::H265, nal(true, idr_type, &[5]));
        assert!(n.normalise(&mut idr_only));
        assert!(idr_only.data.windows(5).any(|w| w == [0, 0, 0, 1, vps_type]));
        assert!(idr_only.data.windows(5).any(|w| w == [0, 0, 0, 1, sps_type]));
        assert!(idr_only.data.windows(5).any(|w| w == [0, 0, 0, 1, pps_type]));
    }
}
