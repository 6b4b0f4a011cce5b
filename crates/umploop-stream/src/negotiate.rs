//! Client side of opening a looped stream.
//!
//! Opening walks `Closed → Negotiating → Allocated → Streaming`: request a
//! buffer, then fetch the position registers and the notification event (in
//! either order), then start. No packet can be exchanged before all three
//! resources are held.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::StreamConfig;
use crate::device::{BufferGrant, BufferRequest, LoopedStreamingDevice, NotifyGrant, RegisterGrant};
use crate::diagnostics::{DiagnosticSink, TracingSink};
use crate::error::{OpenFailure, Result, StreamError};
use crate::ring::{Consumer, Producer, SharedLoop, MAX_ENTRY_SIZE};

/// Lifecycle of a looped stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Closed,
    Negotiating,
    Allocated,
    Streaming,
}

/// Step-by-step negotiation against a device.
///
/// Each step checks the current state and fails with
/// [`StreamError::InvalidState`] when called out of order. A failed buffer
/// request returns to [`LoopState::Closed`] so it can be retried.
pub struct Negotiation<'d, D: LoopedStreamingDevice + ?Sized> {
    device: &'d mut D,
    config: StreamConfig,
    state: LoopState,
    buffer: Option<BufferGrant>,
    registers: Option<RegisterGrant>,
    notify: Option<NotifyGrant>,
}

impl<'d, D: LoopedStreamingDevice + ?Sized> Negotiation<'d, D> {
    pub fn new(device: &'d mut D, config: StreamConfig) -> Self {
        Self {
            device,
            config,
            state: LoopState::Closed,
            buffer: None,
            registers: None,
            notify: None,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Ask the device for a buffer; returns the agreed capacity in bytes.
    pub fn request_buffer(&mut self) -> Result<u32> {
        self.require_state(LoopState::Closed)?;
        self.state = LoopState::Negotiating;

        let request = BufferRequest {
            minimum_size: self.config.buffer_size,
            exclusive: self.config.exclusive,
        };
        let grant = self
            .device
            .request_buffer(request, self.config.negotiation_timeout)
            .and_then(|grant| validate_grant(&request, grant));

        match grant {
            Ok(grant) => {
                let size = grant.actual_size;
                debug!(requested = request.minimum_size, actual = size, "buffer allocated");
                self.buffer = Some(grant);
                self.state = LoopState::Allocated;
                Ok(size)
            }
            Err(err) => {
                debug!(error = %err, "buffer request failed");
                self.state = LoopState::Closed;
                Err(err)
            }
        }
    }

    /// Fetch the position registers for the allocated buffer.
    pub fn fetch_registers(&mut self) -> Result<()> {
        self.require_state(LoopState::Allocated)?;
        if self.registers.is_none() {
            let grant = self.device.registers(self.config.negotiation_timeout)?;
            self.registers = Some(grant);
        }
        Ok(())
    }

    /// Fetch the notification event for the allocated buffer.
    pub fn fetch_notification(&mut self) -> Result<()> {
        self.require_state(LoopState::Allocated)?;
        if self.notify.is_none() {
            let grant = self.device.notification(self.config.negotiation_timeout)?;
            self.notify = Some(grant);
        }
        Ok(())
    }

    /// Enter streaming once every resource is held.
    pub fn start(&mut self) -> Result<LoopedStream> {
        self.require_state(LoopState::Allocated)?;
        if self.registers.is_none() {
            return Err(StreamError::NotReady {
                missing: "position registers",
            });
        }
        if self.notify.is_none() {
            return Err(StreamError::NotReady {
                missing: "notification event",
            });
        }
        let (Some(buffer), Some(registers), Some(notify)) =
            (self.buffer.take(), self.registers.take(), self.notify.take())
        else {
            return Err(StreamError::NotReady {
                missing: "data buffer",
            });
        };

        let capacity = buffer.actual_size as usize;
        let shared = SharedLoop::new(
            buffer.region,
            capacity,
            registers.registers,
            notify.event,
            buffer.lease,
        );
        self.state = LoopState::Streaming;
        info!(capacity, "looped stream started");

        Ok(LoopedStream {
            shared: Arc::new(shared),
            enforce_sysex_interleave: self.config.enforce_sysex_interleave,
            sink: Arc::new(TracingSink),
        })
    }

    fn require_state(&self, expected: LoopState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(StreamError::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }
}

fn validate_grant(request: &BufferRequest, grant: BufferGrant) -> Result<BufferGrant> {
    let size = grant.actual_size as usize;
    let problem = if grant.actual_size < request.minimum_size {
        Some(format!(
            "device granted {} bytes, less than the {} requested",
            grant.actual_size, request.minimum_size
        ))
    } else if size <= MAX_ENTRY_SIZE {
        Some(format!("device granted {size} bytes, too small for one entry"))
    } else if size % umploop_packet::WORD_SIZE != 0 {
        Some(format!("device granted {size} bytes, not a whole number of words"))
    } else if grant.region.len() < size {
        Some(format!(
            "device granted {size} bytes backed by a {}-byte region",
            grant.region.len()
        ))
    } else {
        None
    };

    match problem {
        Some(message) => Err(OpenFailure::Other(message).into()),
        None => Ok(grant),
    }
}

/// Drive a full negotiation against `device`.
pub fn negotiate<D: LoopedStreamingDevice + ?Sized>(
    device: &mut D,
    config: &StreamConfig,
) -> Result<LoopedStream> {
    let mut negotiation = Negotiation::new(device, config.clone());
    negotiation.request_buffer()?;
    negotiation.fetch_registers()?;
    negotiation.fetch_notification()?;
    negotiation.start()
}

/// A negotiated stream, ready to be split into its two handles.
pub struct LoopedStream {
    shared: Arc<SharedLoop>,
    enforce_sysex_interleave: bool,
    sink: Arc<dyn DiagnosticSink>,
}

impl LoopedStream {
    /// Ring capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Send validation events to `sink` instead of the tracing log.
    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn split(self) -> (Producer, Consumer) {
        let producer = Producer::new(
            Arc::clone(&self.shared),
            Arc::clone(&self.sink),
            self.enforce_sysex_interleave,
        );
        let consumer = Consumer::new(self.shared, self.sink);
        (producer, consumer)
    }
}

impl std::fmt::Debug for LoopedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopedStream")
            .field("capacity", &self.capacity())
            .field("enforce_sysex_interleave", &self.enforce_sysex_interleave)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::DeviceConfig;
    use crate::device::{LocalDevice, Lease};
    use crate::service::DeviceService;

    fn config(buffer_size: u32) -> StreamConfig {
        StreamConfig {
            buffer_size,
            negotiation_timeout: Duration::from_secs(2),
            ..StreamConfig::default()
        }
    }

    #[test]
    fn full_negotiation_reaches_streaming() {
        let mut device = LocalDevice::default();
        let mut negotiation = Negotiation::new(&mut device, config(100));
        assert_eq!(negotiation.state(), LoopState::Closed);

        assert_eq!(negotiation.request_buffer().unwrap(), 128);
        assert_eq!(negotiation.state(), LoopState::Allocated);
        negotiation.fetch_notification().unwrap();
        negotiation.fetch_registers().unwrap();

        let stream = negotiation.start().unwrap();
        assert_eq!(negotiation.state(), LoopState::Streaming);
        assert_eq!(stream.capacity(), 128);
    }

    #[test]
    fn out_of_order_steps_are_rejected() {
        let mut device = LocalDevice::default();
        let mut negotiation = Negotiation::new(&mut device, config(256));

        assert!(matches!(
            negotiation.fetch_registers(),
            Err(StreamError::InvalidState {
                expected: LoopState::Allocated,
                actual: LoopState::Closed
            })
        ));
        assert!(matches!(
            negotiation.start(),
            Err(StreamError::InvalidState { .. })
        ));

        negotiation.request_buffer().unwrap();
        assert!(matches!(
            negotiation.request_buffer(),
            Err(StreamError::InvalidState {
                expected: LoopState::Closed,
                actual: LoopState::Allocated
            })
        ));
    }

    #[test]
    fn start_requires_every_resource() {
        let mut device = LocalDevice::default();
        let mut negotiation = Negotiation::new(&mut device, config(256));
        negotiation.request_buffer().unwrap();
        negotiation.fetch_registers().unwrap();

        assert!(matches!(
            negotiation.start(),
            Err(StreamError::NotReady {
                missing: "notification event"
            })
        ));
        negotiation.fetch_notification().unwrap();
        negotiation.start().unwrap();
    }

    #[test]
    fn failed_request_returns_to_closed() {
        let mut device = LocalDevice::new(DeviceConfig {
            max_buffer_size: 512,
        });
        let mut negotiation = Negotiation::new(&mut device, config(4096));
        let err = negotiation.request_buffer().unwrap_err();
        assert!(matches!(err.open_failure(), Some(OpenFailure::Other(_))));
        assert_eq!(negotiation.state(), LoopState::Closed);
    }

    #[test]
    fn abandoned_negotiation_releases_buffer() {
        let mut device = LocalDevice::default();
        let observer = device.open_session();
        {
            let mut negotiation = Negotiation::new(&mut device, config(256));
            negotiation.request_buffer().unwrap();
            assert_eq!(observer.live_streams(), 1);
        }
        assert_eq!(observer.live_streams(), 0);
        assert_eq!(observer.released_streams(), 1);
    }

    #[test]
    fn second_open_in_session_fails() {
        let mut device = LocalDevice::default();
        let _stream = negotiate(&mut device, &config(256)).unwrap();
        let err = negotiate(&mut device, &config(256)).unwrap_err();
        assert_eq!(err.open_failure(), Some(&OpenFailure::AlreadyOpen));
    }

    /// Grants less than it was asked for.
    struct StingyDevice(LocalDevice);

    impl LoopedStreamingDevice for StingyDevice {
        fn request_buffer(
            &mut self,
            request: BufferRequest,
            timeout: Duration,
        ) -> Result<BufferGrant> {
            let grant = self.0.request_buffer(request, timeout)?;
            Ok(BufferGrant {
                region: grant.region,
                actual_size: request.minimum_size / 2,
                lease: Lease::none(),
            })
        }

        fn registers(&mut self, timeout: Duration) -> Result<RegisterGrant> {
            self.0.registers(timeout)
        }

        fn notification(&mut self, timeout: Duration) -> Result<NotifyGrant> {
            self.0.notification(timeout)
        }
    }

    #[test]
    fn undersized_grant_is_refused() {
        let mut device = StingyDevice(LocalDevice::default());
        let err = negotiate(&mut device, &config(256)).unwrap_err();
        assert!(matches!(err.open_failure(), Some(OpenFailure::Other(msg)) if msg.contains("less than")));
    }

    #[test]
    fn negotiates_through_device_service() {
        let service = DeviceService::spawn(LocalDevice::default()).unwrap();
        let mut client = service.client();
        let (mut producer, mut consumer) = negotiate(&mut client, &config(256)).unwrap().split();

        producer.enqueue(&[0x2090_3C40]).unwrap();
        assert_eq!(consumer.dequeue().unwrap().packet.words(), &[0x2090_3C40]);
    }

    #[test]
    fn works_with_trait_objects() {
        let mut device: Box<dyn LoopedStreamingDevice> = Box::new(LocalDevice::default());
        let stream = negotiate(device.as_mut(), &config(64)).unwrap();
        assert_eq!(stream.capacity(), 64);
    }
}
