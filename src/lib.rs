// SPDX-License-Identifier: GPL-3.0-only

//! Host-side USB Video Class (UVC) streaming engine core.
//!
//! Opens a UVC camera over raw USB, negotiates a streaming configuration
//! via the PROBE/COMMIT handshake, schedules isochronous transfers, and
//! reassembles a continuous sequence of compressed or uncompressed video
//! frames from packetised wire data -- tolerating the firmware deviations
//! common among consumer webcams by mirroring the behaviour of a reference
//! kernel driver rather than a strict reading of the UVC specification.
//!
//! The public entry point is [`UvcCamera`]: `open` a device, `configure_stream`
//! a format, pull frames with `next_frame`, `close` when done. Everything
//! below that -- descriptor parsing, class-specific control transfers,
//! negotiation, the iso scheduler, frame reassembly, and H.264/H.265
//! bitstream normalisation -- is exposed as its own module for callers who
//! need finer-grained control than the facade provides.
//!
//! Out of scope (see `SPEC_FULL.md` §1): CLI wrappers, decoder backends,
//! preview rendering, udev/packaging concerns, still-image capture, and
//! any kernel-driver-path video -- this crate is purely user-space USB.

pub mod bitstream;
pub mod config;
pub mod control;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod negotiate;
pub mod quirks;
pub mod reassemble;
pub mod scheduler;
pub mod stats;

pub use bitstream::BitstreamNormaliser;
pub use config::{CodecPreference, UvcConfig};
pub use descriptor::{Codec, DescriptorTree};
pub use device::{UvcCamera, UvcDevice};
pub use error::{UvcError, UvcResult};
pub use negotiate::{StreamRequest, StreamingControl};
pub use quirks::QuirksRegistry;
pub use reassemble::{CompletedFrame, FrameDropReason};
pub use scheduler::{SchedulerConfig, StreamEvent};
pub use stats::{Stats, StatsSnapshot};
