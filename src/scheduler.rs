// SPDX-License-Identifier: GPL-3.0-only

//! Isochronous transfer scheduler: keeps `num_transfers` iso transfers in
//! flight against the negotiated endpoint and feeds completed packets to
//! the frame reassembler / bitstream normaliser.
//!
//! `rusb`'s safe API covers control, bulk, and interrupt transfers but not
//! isochronous submission, so this module drops to `libusb1-sys` -- the
//! same FFI layer `rusb` itself is generated from -- for the
//! `libusb_alloc_transfer`/`libusb_submit_transfer`/callback dance. Per the
//! "callback-driven iso completion" re-architecture note in spec.md §9,
//! everything after submission (callback dispatch, resubmission, the
//! `libusb_handle_events` poll) runs on one dedicated thread, so the
//! reassembler is only ever touched from that thread and needs no lock for
//! correctness -- the lock used below exists only because the same state
//! is also read for statistics from the consumer thread.

use std::collections::VecDeque;
use std::os::raw::c_void;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use libusb1_sys::constants::{
    LIBUSB_TRANSFER_CANCELLED, LIBUSB_TRANSFER_COMPLETED, LIBUSB_TRANSFER_NO_DEVICE,
};
use libusb1_sys::libusb_transfer;
use rusb::UsbContext;
use tracing::{debug, error, warn};

use crate::bitstream::BitstreamNormaliser;
use crate::error::{TransferError, UvcError, UvcResult};
use crate::reassemble::{CompletedFrame, FrameDropReason, FrameReassembler};
use crate::stats::Stats;

/// Scheduler sizing knobs (spec.md §6/§4.4).
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub num_transfers: usize,
    pub packets_per_transfer: usize,
    pub packet_size: usize,
    pub frame_queue_size: usize,
    pub drop_on_overflow: bool,
    pub control_timeout_ms: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_transfers: 12,
            packets_per_transfer: 32,
            packet_size: 3072,
            frame_queue_size: 8,
            drop_on_overflow: true,
            control_timeout_ms: 2000,
        }
    }
}

/// One event delivered to the application consumer.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Frame(CompletedFrame),
    Dropped {
        sequence: u64,
        reason: FrameDropReason,
    },
    /// Fatal transfer-level error; the stream is now terminated.
    Error(TransferError),
    /// Delivered once after `stop()`; no further events follow.
    Stopped,
}

/// Bounded FIFO with an explicit drop-oldest-on-overflow policy, since
/// `std::sync::mpsc` has no way to evict the head of the queue.
struct FrameQueue {
    capacity: usize,
    inner: Mutex<VecDeque<StreamEvent>>,
    cv: Condvar,
}

impl FrameQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
        }
    }

    /// Push `event`. Returns `false` if the queue was full and
    /// `drop_on_overflow` is false (the caller should stop resubmitting
    /// transfers until the consumer drains).
    fn push(&self, event: StreamEvent, drop_on_overflow: bool) -> bool {
        let mut q = self.inner.lock().unwrap();
        if q.len() >= self.capacity {
            if !drop_on_overflow {
                return false;
            }
            q.pop_front();
        }
        q.push_back(event);
        self.cv.notify_one();
        true
    }

    fn pop_timeout(&self, timeout: Duration) -> Option<StreamEvent> {
        let q = self.inner.lock().unwrap();
        let (mut q, _) = self.cv.wait_timeout_while(q, timeout, |q| q.is_empty()).unwrap();
        q.pop_front()
    }

    fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

struct SchedulerInner {
    stopping: AtomicBool,
    active_transfers: AtomicUsize,
    queue: FrameQueue,
    reassembler: Mutex<FrameReassembler>,
    normaliser: Mutex<Option<BitstreamNormaliser>>,
    stats: Arc<Stats>,
    drop_on_overflow: bool,
    slots: Mutex<Vec<TransferSlot>>,
}

impl SchedulerInner {
    fn dispatch(&self, events: Vec<crate::reassemble::ReassemblerEvent>) {
        for ev in events {
            match ev {
                crate::reassemble::ReassemblerEvent::Frame(mut frame) => {
                    let keep = match self.normaliser.lock().unwrap().as_mut() {
                        Some(normaliser) => normaliser.normalise(&mut frame),
                        None => true,
                    };
                    if !keep {
                        self.stats.inc_dropped();
                        continue;
                    }
                    self.queue.push(StreamEvent::Frame(frame), self.drop_on_overflow);
                }
                crate::reassemble::ReassemblerEvent::Dropped { sequence, reason } => {
                    self.stats.inc_dropped();
                    self.queue.push(
                        StreamEvent::Dropped { sequence, reason },
                        self.drop_on_overflow,
                    );
                }
            }
        }
    }

    fn fail_fatal(&self, err: TransferError) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        error!(error = %err, "fatal transfer error, terminating stream");
        self.queue.push(StreamEvent::Error(err), true);
    }

    /// SAFETY: called only from the libusb completion callback, i.e. from
    /// within `libusb_handle_events` on the dedicated iso thread.
    unsafe fn on_completion(&self, transfer: *mut libusb_transfer) {
        let status = unsafe { (*transfer).status };
        let num_packets = unsafe { (*transfer).num_iso_packets } as usize;

        if status == LIBUSB_TRANSFER_NO_DEVICE {
            self.active_transfers.fetch_sub(1, Ordering::SeqCst);
            self.fail_fatal(TransferError::NoDevice);
            return;
        }
        if status == LIBUSB_TRANSFER_CANCELLED {
            self.active_transfers.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        if status != LIBUSB_TRANSFER_COMPLETED {
            debug!(status, "iso transfer completed with non-OK status, treated as data error");
            self.reassembler.lock().unwrap().mark_current_errored();
        } else {
            let packet_descs = unsafe {
                std::slice::from_raw_parts((*transfer).iso_packet_desc.as_ptr(), num_packets)
            };
            for (i, desc) in packet_descs.iter().enumerate() {
                let actual_length = desc.actual_length as usize;
                if desc.status != 0 {
                    self.reassembler.lock().unwrap().mark_current_errored();
                    continue;
                }
                if actual_length == 0 {
                    continue;
                }
                let buf_ptr =
                    unsafe { libusb1_sys::libusb_get_iso_packet_buffer_simple(transfer, i as u32) };
                if buf_ptr.is_null() {
                    continue;
                }
                let packet = unsafe { std::slice::from_raw_parts(buf_ptr, actual_length) };
                let events = {
                    let mut reassembler = self.reassembler.lock().unwrap();
                    reassembler.push_packet(packet)
                };
                self.dispatch(events);
            }
        }

        if self.stopping.load(Ordering::SeqCst) {
            self.active_transfers.fetch_sub(1, Ordering::SeqCst);
            return;
        }

        if !self.drop_on_overflow {
            while self.queue.len() >= self.queue.capacity && !self.stopping.load(Ordering::SeqCst)
            {
                thread::sleep(Duration::from_millis(5));
            }
            if self.stopping.load(Ordering::SeqCst) {
                self.active_transfers.fetch_sub(1, Ordering::SeqCst);
                return;
            }
        }

        let rc = unsafe { libusb1_sys::libusb_submit_transfer(transfer) };
        if rc != 0 {
            warn!(rc, "resubmitting iso transfer failed");
            self.active_transfers.fetch_sub(1, Ordering::SeqCst);
            self.fail_fatal(TransferError::NoDevice);
        }
    }
}

struct SlotContext {
    inner: Arc<SchedulerInner>,
}

struct TransferSlot {
    transfer: *mut libusb_transfer,
    buffer_ptr: *mut u8,
    buffer_len: usize,
    buffer_cap: usize,
    ctx: *mut SlotContext,
}

// Raw pointers to libusb-owned and heap-owned memory that this struct
// alone is responsible for freeing; never aliased outside this module.
unsafe impl Send for TransferSlot {}

impl Drop for TransferSlot {
    fn drop(&mut self) {
        unsafe {
            if !self.transfer.is_null() {
                libusb1_sys::libusb_free_transfer(self.transfer);
            }
            if !self.buffer_ptr.is_null() {
                drop(Vec::from_raw_parts(
                    self.buffer_ptr,
                    self.buffer_len,
                    self.buffer_cap,
                ));
            }
            if !self.ctx.is_null() {
                drop(Box::from_raw(self.ctx));
            }
        }
    }
}

extern "C" fn iso_transfer_callback(transfer: *mut libusb_transfer) {
    unsafe {
        let ctx = &*((*transfer).user_data as *const SlotContext);
        ctx.inner.on_completion(transfer);
    }
}

fn build_slot(
    inner: Arc<SchedulerInner>,
    packets_per_transfer: usize,
    packet_size: usize,
    device_handle_raw: *mut libusb1_sys::libusb_device_handle,
    endpoint_address: u8,
    timeout_ms: u32,
) -> UvcResult<TransferSlot> {
    let buffer_len = packets_per_transfer * packet_size;
    let mut buffer = vec![0u8; buffer_len];
    let buffer_ptr = buffer.as_mut_ptr();
    let buffer_cap = buffer.capacity();
    std::mem::forget(buffer);

    let ctx = Box::into_raw(Box::new(SlotContext { inner }));

    unsafe {
        let transfer = libusb1_sys::libusb_alloc_transfer(packets_per_transfer as i32);
        if transfer.is_null() {
            drop(Vec::from_raw_parts(buffer_ptr, buffer_len, buffer_cap));
            drop(Box::from_raw(ctx));
            return Err(UvcError::Io("libusb_alloc_transfer returned NULL".into()));
        }

        libusb1_sys::libusb_fill_iso_transfer(
            transfer,
            device_handle_raw,
            endpoint_address,
            buffer_ptr,
            buffer_len as i32,
            packets_per_transfer as i32,
            iso_transfer_callback,
            ctx as *mut c_void,
            timeout_ms,
        );
        libusb1_sys::libusb_set_iso_packet_lengths(transfer, packet_size as u32);

        Ok(TransferSlot {
            transfer,
            buffer_ptr,
            buffer_len,
            buffer_cap,
            ctx,
        })
    }
}

/// Owns the dedicated iso I/O thread for one active stream. Construct via
/// [`IsoScheduler::start`], consume frames with [`IsoScheduler::next_event`],
/// and tear down with [`IsoScheduler::stop`].
pub struct IsoScheduler {
    inner: Arc<SchedulerInner>,
    join_handle: Option<JoinHandle<()>>,
}

impl IsoScheduler {
    /// Allocate and submit `config.num_transfers` isochronous transfers
    /// against `endpoint_address` and spawn the dedicated iso I/O thread.
    pub fn start(
        device_handle: Arc<rusb::DeviceHandle<rusb::GlobalContext>>,
        endpoint_address: u8,
        config: SchedulerConfig,
        reassembler: FrameReassembler,
        normaliser: Option<BitstreamNormaliser>,
        stats: Arc<Stats>,
    ) -> UvcResult<Self> {
        let inner = Arc::new(SchedulerInner {
            stopping: AtomicBool::new(false),
            active_transfers: AtomicUsize::new(0),
            queue: FrameQueue::new(config.frame_queue_size),
            reassembler: Mutex::new(reassembler),
            normaliser: Mutex::new(normaliser),
            stats,
            drop_on_overflow: config.drop_on_overflow,
            slots: Mutex::new(Vec::new()),
        });

        let run_inner = inner.clone();
        let device_handle_for_thread = device_handle.clone();
        let join_handle = thread::Builder::new()
            .name("uvc-iso".into())
            .spawn(move || {
                run_iso_thread(
                    run_inner,
                    device_handle_for_thread,
                    endpoint_address,
                    config,
                )
            })
            .map_err(|e| UvcError::Io(format!("spawning iso thread: {e}")))?;

        Ok(Self {
            inner,
            join_handle: Some(join_handle),
        })
    }

    /// Block up to `timeout` for the next frame/drop/error event.
    pub fn next_event(&self, timeout: Duration) -> Option<StreamEvent> {
        self.inner.queue.pop_timeout(timeout)
    }

    /// Cancel all pending transfers, wait for every completion callback to
    /// fire, and join the iso thread (spec.md §4.4/§5 cancellation
    /// semantics).
    pub fn stop(mut self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
        for slot in self.inner.slots.lock().unwrap().iter() {
            unsafe {
                libusb1_sys::libusb_cancel_transfer(slot.transfer);
            }
        }
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
        self.inner.queue.push(StreamEvent::Stopped, true);
    }
}

fn run_iso_thread(
    inner: Arc<SchedulerInner>,
    device_handle: Arc<rusb::DeviceHandle<rusb::GlobalContext>>,
    endpoint_address: u8,
    config: SchedulerConfig,
) {
    let handle_raw = device_handle.as_raw();
    let mut slots = Vec::with_capacity(config.num_transfers);

    for _ in 0..config.num_transfers {
        match build_slot(
            inner.clone(),
            config.packets_per_transfer,
            config.packet_size,
            handle_raw,
            endpoint_address,
            config.control_timeout_ms,
        ) {
            Ok(slot) => {
                let rc = unsafe { libusb1_sys::libusb_submit_transfer(slot.transfer) };
                if rc != 0 {
                    warn!(rc, "initial iso transfer submission failed");
                    inner.fail_fatal(TransferError::NoDevice);
                    break;
                }
                inner.active_transfers.fetch_add(1, Ordering::SeqCst);
                slots.push(slot);
            }
            Err(e) => {
                error!(error = %e, "failed to allocate iso transfer");
                inner.fail_fatal(TransferError::NoDevice);
                break;
            }
        }
    }

    *inner.slots.lock().unwrap() = slots;

    let ctx = rusb::GlobalContext::default();
    loop {
        if inner.active_transfers.load(Ordering::SeqCst) == 0 {
            break;
        }
        if let Err(e) = ctx.handle_events(Some(Duration::from_millis(100))) {
            warn!(error = %e, "libusb_handle_events error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_queue_drops_oldest_on_overflow_when_configured() {
        let q = FrameQueue::new(2);
        assert!(q.push(StreamEvent::Dropped { sequence: 0, reason: FrameDropReason::Truncated }, true));
        assert!(q.push(StreamEvent::Dropped { sequence: 1, reason: FrameDropReason::Truncated }, true));
        assert!(q.push(StreamEvent::Dropped { sequence: 2, reason: FrameDropReason::Truncated }, true));
        assert_eq!(q.len(), 2);
        let first = q.pop_timeout(Duration::from_millis(10)).unwrap();
        match first {
            StreamEvent::Dropped { sequence, .. } => assert_eq!(sequence, 1),
            _ => panic!("expected dropped event"),
        }
    }

    #[test]
    fn frame_queue_refuses_push_without_drop_on_overflow() {
        let q = FrameQueue::new(1);
        assert!(q.push(StreamEvent::Dropped { sequence: 0, reason: FrameDropReason::Truncated }, false));
        assert!(!q.push(StreamEvent::Dropped { sequence: 1, reason: FrameDropReason::Truncated }, false));
        assert_eq!(q.len(), 1);
    }
}
