//! Looped streaming of Universal MIDI Packets.
//!
//! A client negotiates a ring buffer, a pair of position registers and a
//! notification event with a [`LoopedStreamingDevice`], then splits the
//! resulting [`LoopedStream`] into a [`Producer`] and a [`Consumer`]:
//!
//! ```no_run
//! use umploop_stream::{negotiate, LocalDevice, StreamConfig, WaitStatus};
//!
//! let mut device = LocalDevice::default();
//! let (mut producer, mut consumer) = negotiate(&mut device, &StreamConfig::default())?.split();
//!
//! producer.enqueue(&[0x2090_3C40])?;
//! if consumer.wait(None)? == WaitStatus::Readable {
//!     while let Some(event) = consumer.dequeue() {
//!         println!("{} {:?}", event.position, event.packet);
//!     }
//! }
//! # Ok::<(), umploop_stream::StreamError>(())
//! ```

pub mod config;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod negotiate;
pub mod ring;
pub mod service;

pub use config::{DeviceConfig, StreamConfig};
pub use device::{
    BufferGrant, BufferRequest, Lease, LocalDevice, LoopedStreamingDevice, NotifyGrant,
    RegisterGrant,
};
pub use diagnostics::{DiagnosticSink, MemorySink, TracingSink, ValidationEvent};
pub use error::{OpenFailure, Result, StreamError};
pub use negotiate::{negotiate, LoopState, LoopedStream, Negotiation};
pub use ring::{Consumer, Producer, UmpEvent, WaitStatus, ENTRY_HEADER_SIZE};
pub use service::{DeviceService, ServiceClient};
