//! Runs a device on its own thread and answers negotiation requests over
//! channels, so a slow or stuck device surfaces as a timeout.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use crate::device::{
    BufferGrant, BufferRequest, LoopedStreamingDevice, NotifyGrant, RegisterGrant,
};
use crate::error::{OpenFailure, Result};

enum Request {
    Buffer {
        request: BufferRequest,
        timeout: Duration,
        reply: Sender<Result<BufferGrant>>,
    },
    Registers {
        timeout: Duration,
        reply: Sender<Result<RegisterGrant>>,
    },
    Notification {
        timeout: Duration,
        reply: Sender<Result<NotifyGrant>>,
    },
    Shutdown,
}

/// Owns the worker thread serving one device.
///
/// Dropping the service stops the worker once the request in flight, if any,
/// has been answered.
#[derive(Debug)]
pub struct DeviceService {
    tx: Sender<Request>,
    handle: Option<JoinHandle<()>>,
}

impl DeviceService {
    /// Move `device` onto a new worker thread.
    pub fn spawn<D>(device: D) -> Result<Self>
    where
        D: LoopedStreamingDevice + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("umploop-device".to_string())
            .spawn(move || serve(device, rx))
            .map_err(|err| OpenFailure::Other(format!("cannot start device service: {err}")))?;
        debug!("device service started");
        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    /// A new client handle for this service.
    pub fn client(&self) -> ServiceClient {
        ServiceClient {
            tx: self.tx.clone(),
        }
    }

    /// Stop the worker and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.tx.send(Request::Shutdown);
            if handle.join().is_err() {
                warn!("device service thread panicked");
            }
            debug!("device service stopped");
        }
    }
}

impl Drop for DeviceService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve<D: LoopedStreamingDevice>(mut device: D, rx: mpsc::Receiver<Request>) {
    while let Ok(request) = rx.recv() {
        let delivered = match request {
            Request::Buffer {
                request,
                timeout,
                reply,
            } => reply.send(device.request_buffer(request, timeout)).is_ok(),
            Request::Registers { timeout, reply } => reply.send(device.registers(timeout)).is_ok(),
            Request::Notification { timeout, reply } => {
                reply.send(device.notification(timeout)).is_ok()
            }
            Request::Shutdown => break,
        };
        if !delivered {
            // The client gave up; the undelivered grant is dropped here.
            debug!("discarded late device reply");
        }
    }
}

/// Client side of a [`DeviceService`]; usable wherever a device is expected.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    tx: Sender<Request>,
}

impl ServiceClient {
    fn call<T>(
        &self,
        timeout: Duration,
        request: impl FnOnce(Sender<Result<T>>) -> Request,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(request(reply_tx))
            .map_err(|_| OpenFailure::Other("device service is not running".to_string()))?;

        match reply_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                debug!(?timeout, "device request timed out");
                Err(OpenFailure::Timeout(timeout).into())
            }
            Err(RecvTimeoutError::Disconnected) => Err(OpenFailure::Other(
                "device service stopped before replying".to_string(),
            )
            .into()),
        }
    }
}

impl LoopedStreamingDevice for ServiceClient {
    fn request_buffer(&mut self, request: BufferRequest, timeout: Duration) -> Result<BufferGrant> {
        self.call(timeout, |reply| Request::Buffer {
            request,
            timeout,
            reply,
        })
    }

    fn registers(&mut self, timeout: Duration) -> Result<RegisterGrant> {
        self.call(timeout, |reply| Request::Registers { timeout, reply })
    }

    fn notification(&mut self, timeout: Duration) -> Result<NotifyGrant> {
        self.call(timeout, |reply| Request::Notification { timeout, reply })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::LocalDevice;

    /// Answers buffer requests only after `delay`.
    struct SlowDevice {
        inner: LocalDevice,
        delay: Duration,
    }

    impl LoopedStreamingDevice for SlowDevice {
        fn request_buffer(
            &mut self,
            request: BufferRequest,
            timeout: Duration,
        ) -> Result<BufferGrant> {
            std::thread::sleep(self.delay);
            self.inner.request_buffer(request, timeout)
        }

        fn registers(&mut self, timeout: Duration) -> Result<RegisterGrant> {
            self.inner.registers(timeout)
        }

        fn notification(&mut self, timeout: Duration) -> Result<NotifyGrant> {
            self.inner.notification(timeout)
        }
    }

    fn request() -> BufferRequest {
        BufferRequest {
            minimum_size: 256,
            exclusive: false,
        }
    }

    #[test]
    fn forwards_requests_to_device() {
        let service = DeviceService::spawn(LocalDevice::default()).unwrap();
        let mut client = service.client();
        let timeout = Duration::from_secs(2);

        let grant = client.request_buffer(request(), timeout).unwrap();
        assert_eq!(grant.actual_size, 256);
        client.registers(timeout).unwrap();
        client.notification(timeout).unwrap();
    }

    #[test]
    fn slow_device_times_out_and_late_grant_is_released() {
        let local = LocalDevice::default();
        let observer = local.open_session();
        let service = DeviceService::spawn(SlowDevice {
            inner: local,
            delay: Duration::from_millis(200),
        })
        .unwrap();

        let mut client = service.client();
        let err = client
            .request_buffer(request(), Duration::from_millis(20))
            .unwrap_err();
        assert_eq!(
            err.open_failure(),
            Some(&OpenFailure::Timeout(Duration::from_millis(20)))
        );

        // Stopping the service waits for the slow request to finish.
        service.shutdown();
        assert_eq!(observer.live_streams(), 0);
        assert_eq!(observer.released_streams(), 1);
    }

    #[test]
    fn stopped_service_fails_requests() {
        let service = DeviceService::spawn(LocalDevice::default()).unwrap();
        let mut client = service.client();
        drop(service);

        let err = client
            .request_buffer(request(), Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err.open_failure(), Some(OpenFailure::Other(_))));
    }
}
