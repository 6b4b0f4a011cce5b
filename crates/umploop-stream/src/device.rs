//! The allocating side of a looped stream.
//!
//! A device answers three requests: a data buffer of at least some size, the
//! pair of position registers, and the notification event. Each answer is a
//! grant holding reference-counted handles to the shared resource.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::debug;
use umploop_shm::{NotifyEvent, PositionRegisters, SharedRegion};

use crate::config::DeviceConfig;
use crate::error::{OpenFailure, Result};

/// Buffers handed out by [`LocalDevice`] are a multiple of this many bytes.
pub const BUFFER_ALIGNMENT: u32 = 64;

/// What the client asks for when requesting a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRequest {
    /// Minimum usable size in bytes.
    pub minimum_size: u32,
    /// Refuse to share the device with other sessions.
    pub exclusive: bool,
}

/// Runs a release action exactly once, when dropped.
///
/// Devices attach one to each buffer grant to learn when the stream built on
/// top of it has gone away.
pub struct Lease {
    release: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Lease {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Mutex::new(Some(Box::new(release))),
        }
    }

    /// A lease with nothing to release.
    pub fn none() -> Self {
        Self {
            release: Mutex::new(None),
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let release = self
            .release
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(release) = release {
            release();
        }
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").finish_non_exhaustive()
    }
}

/// Allocated data buffer.
#[derive(Debug)]
pub struct BufferGrant {
    pub region: Arc<SharedRegion>,
    /// Agreed ring capacity in bytes; at least the requested minimum.
    pub actual_size: u32,
    pub lease: Lease,
}

/// Position registers for the allocated buffer.
#[derive(Debug, Clone)]
pub struct RegisterGrant {
    pub registers: Arc<PositionRegisters>,
}

/// Notification event for the allocated buffer.
#[derive(Debug, Clone)]
pub struct NotifyGrant {
    pub event: Arc<NotifyEvent>,
}

/// The other side of the negotiation.
///
/// Every request takes the caller's timeout; implementations that cannot
/// answer in time fail with [`OpenFailure::Timeout`].
pub trait LoopedStreamingDevice {
    /// Allocate a data buffer of at least `request.minimum_size` bytes.
    fn request_buffer(&mut self, request: BufferRequest, timeout: Duration) -> Result<BufferGrant>;

    /// Hand out the position registers of the current allocation.
    fn registers(&mut self, timeout: Duration) -> Result<RegisterGrant>;

    /// Hand out the notification event of the current allocation.
    fn notification(&mut self, timeout: Duration) -> Result<NotifyGrant>;
}

/// Round a requested size up to the device granularity.
pub fn aligned_buffer_size(minimum_size: u32) -> Option<u32> {
    let size = minimum_size.max(BUFFER_ALIGNMENT);
    size.checked_next_multiple_of(BUFFER_ALIGNMENT)
}

#[derive(Debug)]
struct LiveStream {
    session: u64,
    exclusive: bool,
}

#[derive(Debug, Default)]
struct DeviceState {
    next_session: AtomicU64,
    live: Mutex<Vec<LiveStream>>,
    released: AtomicUsize,
}

impl DeviceState {
    fn release(&self, session: u64) {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        live.retain(|stream| stream.session != session);
        self.released.fetch_add(1, Ordering::AcqRel);
        debug!(session, remaining = live.len(), "looped stream allocation released");
    }
}

#[derive(Debug, Default)]
struct Pending {
    registers: Option<Arc<PositionRegisters>>,
    event: Option<Arc<NotifyEvent>>,
}

/// In-process device that allocates shared memory on request.
///
/// Sessions opened from the same device share its bookkeeping: each session
/// may hold one live stream, and an exclusive stream keeps every other session
/// out until it is released.
#[derive(Debug)]
pub struct LocalDevice {
    state: Arc<DeviceState>,
    config: DeviceConfig,
    session: u64,
    pending: Pending,
}

impl LocalDevice {
    pub fn new(config: DeviceConfig) -> Self {
        let state = Arc::new(DeviceState::default());
        let session = state.next_session.fetch_add(1, Ordering::Relaxed);
        Self {
            state,
            config,
            session,
            pending: Pending::default(),
        }
    }

    /// Another session on the same device.
    pub fn open_session(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            config: self.config,
            session: self.state.next_session.fetch_add(1, Ordering::Relaxed),
            pending: Pending::default(),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Streams allocated and not yet released, across all sessions.
    pub fn live_streams(&self) -> usize {
        self.state.live.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Total number of allocations released so far.
    pub fn released_streams(&self) -> usize {
        self.state.released.load(Ordering::Acquire)
    }

    fn reserve(&self, exclusive: bool) -> Result<()> {
        let mut live = self.state.live.lock().unwrap_or_else(|e| e.into_inner());
        if live.iter().any(|stream| stream.session == self.session) {
            return Err(OpenFailure::AlreadyOpen.into());
        }
        let others = !live.is_empty();
        if live.iter().any(|stream| stream.exclusive) || (exclusive && others) {
            return Err(OpenFailure::ExclusiveElsewhere.into());
        }
        live.push(LiveStream {
            session: self.session,
            exclusive,
        });
        Ok(())
    }

    fn allocate(&self, size: u32) -> std::result::Result<Allocation, umploop_shm::ShmError> {
        Ok(Allocation {
            region: Arc::new(SharedRegion::new(size as usize)?),
            registers: Arc::new(PositionRegisters::new()?),
            event: Arc::new(NotifyEvent::new()?),
        })
    }
}

impl Default for LocalDevice {
    fn default() -> Self {
        Self::new(DeviceConfig::default())
    }
}

struct Allocation {
    region: Arc<SharedRegion>,
    registers: Arc<PositionRegisters>,
    event: Arc<NotifyEvent>,
}

impl LoopedStreamingDevice for LocalDevice {
    fn request_buffer(&mut self, request: BufferRequest, _timeout: Duration) -> Result<BufferGrant> {
        let size = aligned_buffer_size(request.minimum_size)
            .filter(|size| *size <= self.config.max_buffer_size)
            .ok_or_else(|| {
                OpenFailure::Other(format!(
                    "requested buffer size {} exceeds device maximum {}",
                    request.minimum_size, self.config.max_buffer_size
                ))
            })?;

        self.reserve(request.exclusive)?;

        let allocation = match self.allocate(size) {
            Ok(allocation) => allocation,
            Err(err) => {
                self.state.release(self.session);
                return Err(OpenFailure::Other(err.to_string()).into());
            }
        };

        debug!(
            session = self.session,
            requested = request.minimum_size,
            actual = size,
            exclusive = request.exclusive,
            "allocated looped stream buffer"
        );

        self.pending = Pending {
            registers: Some(allocation.registers),
            event: Some(allocation.event),
        };

        let state: Weak<DeviceState> = Arc::downgrade(&self.state);
        let session = self.session;
        Ok(BufferGrant {
            region: allocation.region,
            actual_size: size,
            lease: Lease::new(move || {
                if let Some(state) = state.upgrade() {
                    state.release(session);
                }
            }),
        })
    }

    fn registers(&mut self, _timeout: Duration) -> Result<RegisterGrant> {
        let registers = self.pending.registers.take().ok_or_else(|| {
            OpenFailure::Other("no buffer allocated for register request".to_string())
        })?;
        Ok(RegisterGrant { registers })
    }

    fn notification(&mut self, _timeout: Duration) -> Result<NotifyGrant> {
        let event = self.pending.event.take().ok_or_else(|| {
            OpenFailure::Other("no buffer allocated for notification request".to_string())
        })?;
        Ok(NotifyGrant { event })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn request(minimum_size: u32) -> BufferRequest {
        BufferRequest {
            minimum_size,
            exclusive: false,
        }
    }

    fn failure(err: StreamError) -> OpenFailure {
        err.open_failure().cloned().expect("open failure")
    }

    #[test]
    fn sizes_round_up_to_alignment() {
        assert_eq!(aligned_buffer_size(0), Some(64));
        assert_eq!(aligned_buffer_size(1), Some(64));
        assert_eq!(aligned_buffer_size(64), Some(64));
        assert_eq!(aligned_buffer_size(65), Some(128));
        assert_eq!(aligned_buffer_size(256), Some(256));
        assert_eq!(aligned_buffer_size(u32::MAX), None);
    }

    #[test]
    fn grants_at_least_the_requested_size() {
        let mut device = LocalDevice::default();
        let grant = device.request_buffer(request(100), TIMEOUT).unwrap();
        assert_eq!(grant.actual_size, 128);
        assert!(grant.region.len() >= 128);
        assert_eq!(device.live_streams(), 1);
    }

    #[test]
    fn refuses_oversized_buffers() {
        let mut device = LocalDevice::new(DeviceConfig {
            max_buffer_size: 1024,
        });
        let err = device.request_buffer(request(2048), TIMEOUT).unwrap_err();
        assert!(matches!(failure(err), OpenFailure::Other(msg) if msg.contains("exceeds")));
        assert_eq!(device.live_streams(), 0);
    }

    #[test]
    fn registers_and_event_follow_the_buffer() {
        let mut device = LocalDevice::default();
        assert!(device.registers(TIMEOUT).is_err());

        let _grant = device.request_buffer(request(64), TIMEOUT).unwrap();
        device.registers(TIMEOUT).unwrap();
        device.notification(TIMEOUT).unwrap();
        // Handed out once per allocation.
        assert!(device.registers(TIMEOUT).is_err());
    }

    #[test]
    fn second_stream_in_session_is_already_open() {
        let mut device = LocalDevice::default();
        let _grant = device.request_buffer(request(64), TIMEOUT).unwrap();
        let err = device.request_buffer(request(64), TIMEOUT).unwrap_err();
        assert_eq!(failure(err), OpenFailure::AlreadyOpen);
    }

    #[test]
    fn exclusive_stream_blocks_other_sessions() {
        let mut first = LocalDevice::default();
        let mut second = first.open_session();

        let grant = first
            .request_buffer(
                BufferRequest {
                    minimum_size: 64,
                    exclusive: true,
                },
                TIMEOUT,
            )
            .unwrap();
        let err = second.request_buffer(request(64), TIMEOUT).unwrap_err();
        assert_eq!(failure(err), OpenFailure::ExclusiveElsewhere);

        drop(grant);
        assert_eq!(first.live_streams(), 0);
        second.request_buffer(request(64), TIMEOUT).unwrap();
    }

    #[test]
    fn exclusive_request_fails_while_others_stream() {
        let mut first = LocalDevice::default();
        let mut second = first.open_session();
        let _grant = first.request_buffer(request(64), TIMEOUT).unwrap();

        let err = second
            .request_buffer(
                BufferRequest {
                    minimum_size: 64,
                    exclusive: true,
                },
                TIMEOUT,
            )
            .unwrap_err();
        assert_eq!(failure(err), OpenFailure::ExclusiveElsewhere);
        // Shared access is still fine.
        second.request_buffer(request(64), TIMEOUT).unwrap();
        assert_eq!(first.live_streams(), 2);
    }

    #[test]
    fn dropping_a_grant_releases_once() {
        let mut device = LocalDevice::default();
        let grant = device.request_buffer(request(64), TIMEOUT).unwrap();
        assert_eq!(device.released_streams(), 0);
        drop(grant);
        assert_eq!(device.released_streams(), 1);
        assert_eq!(device.live_streams(), 0);
    }

    #[test]
    fn lease_runs_release_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let lease = Lease::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(lease);
        drop(Lease::none());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
