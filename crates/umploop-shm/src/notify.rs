//! Binary "data may be available" signal between producer and consumer.
//!
//! Signals coalesce: several `signal()` calls before a wait wake the waiter
//! once. The event carries no count, so a woken consumer always re-reads the
//! position registers to learn how much data there is.

use std::time::Duration;

use tracing::trace;

use crate::error::{Result, ShmError};

/// Notification event backed by `eventfd` on Linux, a condition variable elsewhere.
#[derive(Debug)]
pub struct NotifyEvent {
    inner: Inner,
}

impl NotifyEvent {
    /// Create an unsignalled event.
    pub fn new() -> Result<Self> {
        Ok(Self {
            inner: Inner::new()?,
        })
    }

    /// Set the event. Never blocks.
    pub fn signal(&self) -> Result<()> {
        trace!("notify event signalled");
        self.inner.signal()
    }

    /// Wait until the event is set, then reset it.
    ///
    /// Returns `Ok(false)` when `timeout` elapses first. `None` waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
        self.inner.wait(timeout)
    }

    /// Reset the event without blocking. Returns whether it was set.
    pub fn try_consume(&self) -> Result<bool> {
        self.inner.try_consume()
    }

    /// Wait for the event from async code.
    #[cfg(all(feature = "async", target_os = "linux"))]
    pub async fn wait_async(&self) -> Result<()> {
        use std::os::fd::AsRawFd;
        use tokio::io::unix::AsyncFd;
        use tokio::io::Interest;

        let fd = AsyncFd::with_interest(BorrowedEventFd(self.inner.fd.as_raw_fd()), Interest::READABLE)
            .map_err(ShmError::Event)?;
        loop {
            if self.try_consume()? {
                return Ok(());
            }
            let mut guard = fd.readable().await.map_err(ShmError::Event)?;
            guard.clear_ready();
        }
    }
}

#[cfg(all(feature = "async", target_os = "linux"))]
struct BorrowedEventFd(std::os::fd::RawFd);

#[cfg(all(feature = "async", target_os = "linux"))]
impl std::os::fd::AsRawFd for BorrowedEventFd {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0
    }
}

#[cfg(target_os = "linux")]
#[derive(Debug)]
struct Inner {
    fd: std::os::fd::OwnedFd,
}

#[cfg(target_os = "linux")]
impl Inner {
    fn new() -> Result<Self> {
        use std::os::fd::FromRawFd;

        // SAFETY: eventfd has no pointer arguments; the result is checked below.
        let raw = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if raw < 0 {
            return Err(ShmError::Event(std::io::Error::last_os_error()));
        }
        // SAFETY: `raw` is a freshly created descriptor owned by nobody else.
        let fd = unsafe { std::os::fd::OwnedFd::from_raw_fd(raw) };
        Ok(Self { fd })
    }

    fn signal(&self) -> Result<()> {
        use std::os::fd::AsRawFd;

        let value: u64 = 1;
        loop {
            // SAFETY: writes exactly 8 bytes from a live u64.
            let rc = unsafe {
                libc::write(
                    self.fd.as_raw_fd(),
                    (&value as *const u64).cast::<libc::c_void>(),
                    std::mem::size_of::<u64>(),
                )
            };
            if rc >= 0 {
                return Ok(());
            }
            let err = std::io::Error::last_os_error();
            match err.kind() {
                std::io::ErrorKind::Interrupted => continue,
                // Counter saturated: the event is already set.
                std::io::ErrorKind::WouldBlock => return Ok(()),
                _ => return Err(ShmError::Event(err)),
            }
        }
    }

    fn try_consume(&self) -> Result<bool> {
        use std::os::fd::AsRawFd;

        let mut value: u64 = 0;
        loop {
            // SAFETY: reads exactly 8 bytes into a live u64.
            let rc = unsafe {
                libc::read(
                    self.fd.as_raw_fd(),
                    (&mut value as *mut u64).cast::<libc::c_void>(),
                    std::mem::size_of::<u64>(),
                )
            };
            if rc >= 0 {
                return Ok(value > 0);
            }
            let err = std::io::Error::last_os_error();
            match err.kind() {
                std::io::ErrorKind::Interrupted => continue,
                std::io::ErrorKind::WouldBlock => return Ok(false),
                _ => return Err(ShmError::Event(err)),
            }
        }
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
        use std::os::fd::AsRawFd;
        use std::time::Instant;

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.try_consume()? {
                return Ok(true);
            }

            let timeout_ms = match deadline {
                None => -1,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(false);
                    }
                    remaining.as_millis().clamp(1, i32::MAX as u128) as libc::c_int
                }
            };

            let mut pfd = libc::pollfd {
                fd: self.fd.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            // SAFETY: one valid pollfd for the duration of the call.
            let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ShmError::Event(err));
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
#[derive(Debug, Default)]
struct Inner {
    set: std::sync::Mutex<bool>,
    cond: std::sync::Condvar,
}

#[cfg(not(target_os = "linux"))]
impl Inner {
    fn new() -> Result<Self> {
        Ok(Self::default())
    }

    fn signal(&self) -> Result<()> {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        *set = true;
        self.cond.notify_all();
        Ok(())
    }

    fn try_consume(&self) -> Result<bool> {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        Ok(std::mem::replace(&mut *set, false))
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
        let set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        let mut set = match timeout {
            None => self
                .cond
                .wait_while(set, |set| !*set)
                .unwrap_or_else(|e| e.into_inner()),
            Some(timeout) => {
                self.cond
                    .wait_timeout_while(set, timeout, |set| !*set)
                    .unwrap_or_else(|e| e.into_inner())
                    .0
            }
        };
        Ok(std::mem::replace(&mut *set, false))
    }
}
