// SPDX-License-Identifier: GPL-3.0-only

//! Device session and the top-level `UvcCamera` facade: wires descriptor
//! parsing, the control layer, PROBE/COMMIT negotiation, and the iso
//! scheduler together behind `open -> configure_stream -> next_frame ->
//! close`, so application code never has to assemble those subsystems by
//! hand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::bitstream::BitstreamNormaliser;
use crate::config::UvcConfig;
use crate::control::{ControlAccess, ControlCatalog};
use crate::descriptor::{self, Codec, DescriptorTree, EndpointInfo, VcInterface, VsInterface};
use crate::error::{DescriptorError, NegotiationError, UvcError, UvcResult};
use crate::negotiate::{Negotiator, StreamRequest, StreamingControl};
use crate::quirks::QuirksRegistry;
use crate::reassemble::FrameReassembler;
use crate::scheduler::{IsoScheduler, SchedulerConfig, StreamEvent};
use crate::stats::{Stats, StatsSnapshot};

const GET_DESCRIPTOR: u8 = 0x06;
const DESCRIPTOR_TYPE_CONFIGURATION: u16 = 0x02;
const STANDARD_GET: u8 = 0x80;
const CONFIG_DESCRIPTOR_HEADER_LEN: usize = 9;

fn read_configuration_descriptor(
    handle: &rusb::DeviceHandle<rusb::GlobalContext>,
    timeout: Duration,
) -> UvcResult<Vec<u8>> {
    let value = DESCRIPTOR_TYPE_CONFIGURATION << 8;
    let mut header = [0u8; CONFIG_DESCRIPTOR_HEADER_LEN];
    handle.read_control(STANDARD_GET, GET_DESCRIPTOR, value, 0, &mut header, timeout)?;
    let total_len = u16::from_le_bytes([header[2], header[3]]) as usize;

    let mut buf = vec![0u8; total_len];
    handle.read_control(STANDARD_GET, GET_DESCRIPTOR, value, 0, &mut buf, timeout)?;
    Ok(buf)
}

fn find_and_open(
    vendor_id: u16,
    product_id: u16,
    serial_number: Option<&str>,
) -> UvcResult<rusb::DeviceHandle<rusb::GlobalContext>> {
    let devices = rusb::devices()?;

    for device in devices.iter() {
        let desc = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => continue,
        };
        if desc.vendor_id() != vendor_id || desc.product_id() != product_id {
            continue;
        }

        let handle = match device.open() {
            Ok(h) => h,
            Err(e) => {
                warn!(vendor_id, product_id, error = %e, "matching device failed to open");
                continue;
            }
        };

        if let Some(wanted) = serial_number {
            let matches = handle
                .read_serial_number_string_ascii(&desc)
                .map(|s| s == wanted)
                .unwrap_or(false);
            if !matches {
                continue;
            }
        }

        return Ok(handle);
    }

    Err(UvcError::Io(format!(
        "no UVC device found for {vendor_id:04x}:{product_id:04x}"
    )))
}

/// Scoped acquisition of the VC/VS interfaces' kernel driver. Detaches
/// `uvcvideo` on `claim`, re-attaches and USB-resets the device on `Drop`
/// if anything was actually detached, per spec.md §4.2/§9.
struct KernelDriverGuard {
    handle: Arc<rusb::DeviceHandle<rusb::GlobalContext>>,
    detached: Mutex<Vec<u8>>,
    enabled: bool,
}

impl KernelDriverGuard {
    fn new(handle: Arc<rusb::DeviceHandle<rusb::GlobalContext>>, enabled: bool) -> Self {
        Self {
            handle,
            detached: Mutex::new(Vec::new()),
            enabled,
        }
    }

    fn claim(&self, interface_number: u8) -> UvcResult<()> {
        if self.enabled {
            match self.handle.kernel_driver_active(interface_number) {
                Ok(true) => {
                    self.handle.detach_kernel_driver(interface_number)?;
                    self.detached.lock().unwrap().push(interface_number);
                    debug!(interface_number, "detached kernel driver");
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(interface_number, error = %e, "kernel_driver_active query failed");
                }
            }
        }
        self.handle.claim_interface(interface_number)?;
        Ok(())
    }
}

impl Drop for KernelDriverGuard {
    fn drop(&mut self) {
        let detached = std::mem::take(&mut *self.detached.lock().unwrap());
        for interface_number in &detached {
            if let Err(e) = self.handle.attach_kernel_driver(*interface_number) {
                warn!(interface_number, error = %e, "failed to reattach kernel driver");
            }
        }
        if !detached.is_empty() {
            if let Err(e) = self.handle.reset() {
                warn!(error = %e, "USB reset after kernel-driver reattach failed");
            }
        }
    }
}

/// An opened UVC device: its parsed descriptor tree, validated control
/// catalog, and the claimed VC/VS interfaces. Does not itself stream --
/// see [`UvcCamera`].
pub struct UvcDevice {
    handle: Arc<rusb::DeviceHandle<rusb::GlobalContext>>,
    descriptors: DescriptorTree,
    #[allow(dead_code)]
    quirks: QuirksRegistry,
    #[allow(dead_code)]
    catalog: ControlCatalog,
    vc_interface_number: u8,
    vs_interface_number: u8,
    control_timeout: Duration,
    _guard: KernelDriverGuard,
}

impl UvcDevice {
    pub fn open(config: &UvcConfig) -> UvcResult<Self> {
        let handle = Arc::new(find_and_open(
            config.vendor_id,
            config.product_id,
            config.serial_number.as_deref(),
        )?);

        let control_timeout = Duration::from_millis(config.control_timeout_ms);
        let raw = read_configuration_descriptor(&handle, control_timeout)?;
        let descriptors = descriptor::parse_configuration(&raw)?;

        let vc = descriptors.vc_interfaces.first().ok_or_else(|| {
            UvcError::from(DescriptorError::new(0, "no Video Control interface found"))
        })?;

        let vs_interface_number = config.streaming_interface.unwrap_or_else(|| {
            vc.streaming_interfaces
                .first()
                .copied()
                .unwrap_or(vc.interface_number + 1)
        });
        let vs = descriptors.vs_interface(vs_interface_number).ok_or_else(|| {
            UvcError::from(DescriptorError::new(
                0,
                format!("streaming interface {vs_interface_number} not found"),
            ))
        })?;

        let guard = KernelDriverGuard::new(handle.clone(), config.auto_detach_vc);
        guard.claim(vc.interface_number)?;
        guard.claim(vs.interface_number)?;

        let quirks = match &config.quirks_dir {
            Some(dir) => QuirksRegistry::load_dir(dir)?,
            None => QuirksRegistry::empty(),
        };

        let catalog = {
            let access = ControlAccess::new(&handle, vc.interface_number, control_timeout);
            access.validate_controls(vc, &quirks)
        };
        info!(
            vc_interface = vc.interface_number,
            vs_interface = vs.interface_number,
            controls = catalog.len(),
            "UVC device opened"
        );

        Ok(Self {
            handle,
            vc_interface_number: vc.interface_number,
            vs_interface_number: vs.interface_number,
            control_timeout,
            descriptors,
            quirks,
            catalog,
            _guard: guard,
        })
    }

    fn vc(&self) -> &VcInterface {
        self.descriptors
            .vc_interfaces
            .iter()
            .find(|v| v.interface_number == self.vc_interface_number)
            .expect("validated at open")
    }

    fn vs(&self) -> &VsInterface {
        self.descriptors
            .vs_interface(self.vs_interface_number)
            .expect("validated at open")
    }

    /// Run PROBE/COMMIT for `request` and switch to the selected alt
    /// setting. Returns the committed control plus the endpoint that will
    /// carry the stream.
    pub fn configure_stream(
        &self,
        request: &StreamRequest,
    ) -> UvcResult<(StreamingControl, EndpointInfo)> {
        let vc = self.vc();
        let vs = self.vs();

        let control = ControlAccess::new(&self.handle, vs.interface_number, self.control_timeout);
        let negotiator = Negotiator::new(control, 3);
        let (committed, alt) = negotiator.negotiate(vs, request, vc.streaming_control_len())?;

        self.handle
            .set_alternate_setting(vs.interface_number, alt.alt_setting)?;

        let endpoint = alt.iso_endpoint.ok_or(NegotiationError::NoAltSettingFits)?;
        info!(
            alt_setting = alt.alt_setting,
            endpoint = endpoint.address,
            packet_size = endpoint.effective_packet_size(),
            "alt setting selected, interface claimed for streaming"
        );
        Ok((committed, endpoint))
    }

    fn release_streaming_interface(&self) {
        if let Err(e) = self.handle.set_alternate_setting(self.vs_interface_number, 0) {
            warn!(error = %e, "failed to release iso bandwidth (SET_INTERFACE alt 0)");
        }
    }
}

/// Top-level facade: `open -> configure_stream -> next_frame -> close`.
pub struct UvcCamera {
    device: UvcDevice,
    config: UvcConfig,
    stats: Arc<Stats>,
    scheduler: Option<IsoScheduler>,
    stream_started: AtomicBool,
}

impl UvcCamera {
    pub fn open(config: UvcConfig) -> UvcResult<Self> {
        let device = UvcDevice::open(&config)?;
        Ok(Self {
            device,
            config,
            stats: Stats::new(),
            scheduler: None,
            stream_started: AtomicBool::new(false),
        })
    }

    /// Negotiate and start streaming `request`. Tearing down any
    /// previously active stream first (reconfiguration resets the frame
    /// sequence and the parameter-set cache, per spec.md §9).
    pub fn configure_stream(&mut self, request: &StreamRequest) -> UvcResult<()> {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop();
        }

        let (committed, endpoint) = self.device.configure_stream(request)?;

        let vs = self.device.vs();
        let format = vs
            .formats
            .iter()
            .find(|f| f.format_index == committed.format_index)
            .ok_or(NegotiationError::NoMatchingFormat)?;
        let frame = format
            .frame(committed.frame_index)
            .ok_or(NegotiationError::NoMatchingFormat)?;

        let reassembler = FrameReassembler::new(
            format.fourcc.clone(),
            format.codec,
            frame.width,
            frame.height,
            committed.max_video_frame_size,
            self.config.deliver_partial,
            self.stats.clone(),
        );
        let normaliser = matches!(format.codec, Codec::H264 | Codec::H265)
            .then(|| BitstreamNormaliser::new(format.codec, self.stats.clone()));

        let scheduler_config = SchedulerConfig {
            num_transfers: self.config.num_transfers,
            packets_per_transfer: self.config.packets_per_transfer,
            packet_size: endpoint.effective_packet_size() as usize,
            frame_queue_size: self.config.frame_queue_size,
            drop_on_overflow: self.config.drop_on_overflow,
            control_timeout_ms: self.config.control_timeout_ms as u32,
        };

        let scheduler = IsoScheduler::start(
            self.device.handle.clone(),
            endpoint.address,
            scheduler_config,
            reassembler,
            normaliser,
            self.stats.clone(),
        )?;

        self.scheduler = Some(scheduler);
        self.stream_started.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Block up to `timeout` for the next stream event. `Ok(None)` on
    /// timeout with no event pending.
    pub fn next_frame(&self, timeout: Duration) -> UvcResult<Option<StreamEvent>> {
        let scheduler = self
            .scheduler
            .as_ref()
            .ok_or_else(|| UvcError::Io("no stream configured".into()))?;
        Ok(scheduler.next_event(timeout))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop any active stream, release the streaming interface, and drop
    /// the device handle. The kernel-driver reattach + USB reset (if any
    /// driver was detached at `open`) happens in `KernelDriverGuard::drop`
    /// as part of the final `Drop` of `self.device`.
    pub fn close(mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop();
        }
        self.device.release_streaming_interface();
    }
}
