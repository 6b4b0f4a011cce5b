//! Single-producer single-consumer ring of UMP entries.
//!
//! Each entry is a 12-byte header followed by the packet words, with no
//! padding between entries:
//!
//! ```text
//! +----------------+--------------+------------------+
//! | position (u64) | bytes (u32)  | words (bytes/4)  |
//! +----------------+--------------+------------------+
//! ```
//!
//! All fields are native endian. Entries wrap around the end of the buffer
//! byte-wise. One byte of capacity is always left unused so that equal read
//! and write positions mean "empty".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Buf, BufMut};
use tracing::{debug, warn};
use umploop_packet::{Packet, SysExSession, Verdict, MAX_PACKET_WORDS, WORD_SIZE};
use umploop_shm::{NotifyEvent, PositionRegisters, SharedRegion};

use crate::device::Lease;
use crate::diagnostics::{DiagnosticSink, ValidationEvent};
use crate::error::{Result, StreamError};
use crate::negotiate::LoopState;

/// Size of the per-entry header in bytes.
pub const ENTRY_HEADER_SIZE: usize = 12;

/// Largest possible entry: header plus a four-word packet.
pub const MAX_ENTRY_SIZE: usize = ENTRY_HEADER_SIZE + MAX_PACKET_WORDS * WORD_SIZE;

const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_WORDS * WORD_SIZE;

/// Bytes the producer may still write.
pub fn free_space(read: usize, write: usize, capacity: usize) -> usize {
    (read + capacity - write - 1) % capacity
}

/// Bytes committed by the producer and not yet consumed.
pub fn used_bytes(read: usize, write: usize, capacity: usize) -> usize {
    (write + capacity - read) % capacity
}

/// One packet taken off the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UmpEvent {
    /// Position value (timestamp or sequence number) stamped by the producer.
    pub position: u64,
    pub packet: Packet,
}

/// Outcome of [`Consumer::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// At least one byte is available to read.
    Readable,
    /// The timeout elapsed with nothing to read.
    TimedOut,
    /// The producer has detached and everything it wrote has been consumed.
    Closed,
}

/// Resources both handles of one stream refer to.
pub(crate) struct SharedLoop {
    region: Arc<SharedRegion>,
    registers: Arc<PositionRegisters>,
    event: Arc<NotifyEvent>,
    capacity: usize,
    producer_closed: AtomicBool,
    consumer_closed: AtomicBool,
    _lease: Lease,
}

impl SharedLoop {
    pub(crate) fn new(
        region: Arc<SharedRegion>,
        capacity: usize,
        registers: Arc<PositionRegisters>,
        event: Arc<NotifyEvent>,
        lease: Lease,
    ) -> Self {
        debug_assert!(capacity <= region.len());
        Self {
            region,
            registers,
            event,
            capacity,
            producer_closed: AtomicBool::new(false),
            consumer_closed: AtomicBool::new(false),
            _lease: lease,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    fn state(&self) -> LoopState {
        if self.producer_closed.load(Ordering::Acquire)
            && self.consumer_closed.load(Ordering::Acquire)
        {
            LoopState::Closed
        } else {
            LoopState::Streaming
        }
    }

    /// Load both positions, rejecting offsets outside the ring.
    fn positions(&self) -> Result<(usize, usize)> {
        let read = self.registers.read_position().load(Ordering::Acquire) as usize;
        let write = self.registers.write_position().load(Ordering::Acquire) as usize;
        Ok((self.checked("read", read)?, self.checked("write", write)?))
    }

    fn checked(&self, register: &'static str, value: usize) -> Result<usize> {
        if value < self.capacity {
            Ok(value)
        } else {
            Err(StreamError::CorruptPosition {
                register,
                value,
                capacity: self.capacity,
            })
        }
    }

    /// # Safety
    ///
    /// `offset < capacity`, `src.len() < capacity`, and the caller must own
    /// the (wrapped) byte range as producer.
    unsafe fn write_wrapped(&self, offset: usize, src: &[u8]) {
        let first = src.len().min(self.capacity - offset);
        self.region.copy_in(offset, &src[..first]);
        if first < src.len() {
            self.region.copy_in(0, &src[first..]);
        }
    }

    /// # Safety
    ///
    /// `offset < capacity`, `dst.len() < capacity`, and the range must hold
    /// bytes already published by the producer.
    unsafe fn read_wrapped(&self, offset: usize, dst: &mut [u8]) {
        let first = dst.len().min(self.capacity - offset);
        self.region.copy_out(offset, &mut dst[..first]);
        if first < dst.len() {
            self.region.copy_out(0, &mut dst[first..]);
        }
    }
}

impl Drop for SharedLoop {
    fn drop(&mut self) {
        debug!(capacity = self.capacity, "looped stream resources released");
    }
}

/// Writing half of a looped stream. Only advances the write position.
pub struct Producer {
    shared: Arc<SharedLoop>,
    sequence: u64,
    session: Option<SysExSession>,
    sink: Arc<dyn DiagnosticSink>,
    closed: bool,
}

impl Producer {
    pub(crate) fn new(
        shared: Arc<SharedLoop>,
        sink: Arc<dyn DiagnosticSink>,
        enforce_sysex_interleave: bool,
    ) -> Self {
        Self {
            shared,
            sequence: 0,
            session: enforce_sysex_interleave.then(SysExSession::new),
            sink,
            closed: false,
        }
    }

    /// Ring capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Bytes that can be written right now.
    pub fn available_space(&self) -> Result<usize> {
        let (read, write) = self.shared.positions()?;
        Ok(free_space(read, write, self.shared.capacity))
    }

    /// SysEx7 bookkeeping, when interleave enforcement is on.
    pub fn sysex_session(&self) -> Option<&SysExSession> {
        self.session.as_ref()
    }

    pub fn state(&self) -> LoopState {
        self.shared.state()
    }

    /// Whether the consumer has detached.
    pub fn is_peer_closed(&self) -> bool {
        self.shared.consumer_closed.load(Ordering::Acquire)
    }

    /// Enqueue one packet stamped with the next sequence number.
    pub fn enqueue(&mut self, words: &[u32]) -> Result<()> {
        self.enqueue_at(self.sequence, words)?;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(())
    }

    pub fn enqueue_packet(&mut self, packet: &Packet) -> Result<()> {
        self.enqueue(packet.words())
    }

    /// Enqueue one packet stamped with `position`.
    ///
    /// Fails without touching the ring when the words are not exactly one
    /// packet or when the entry does not fit.
    pub fn enqueue_at(&mut self, position: u64, words: &[u32]) -> Result<()> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        if self.is_peer_closed() {
            return Err(StreamError::PeerClosed);
        }

        let packet = match Packet::from_words(words) {
            Ok(packet) => packet,
            Err(err) => {
                self.sink.report(&ValidationEvent::Size {
                    provided_bytes: words.len() * WORD_SIZE,
                    timestamp: position,
                    message: err.to_string(),
                });
                return Err(err.into());
            }
        };

        let capacity = self.shared.capacity;
        let registers = &self.shared.registers;
        let (read, write) = match self.shared.positions() {
            Ok(positions) => positions,
            Err(err) => {
                warn!(error = %err, "refusing to write with a corrupt position register");
                return Err(err);
            }
        };

        let needed = ENTRY_HEADER_SIZE + packet.len_bytes();
        let available = free_space(read, write, capacity);
        if needed > available {
            debug!(needed, available, "ring buffer full, packet rejected");
            return Err(StreamError::BufferFull { needed, available });
        }

        if let Some(session) = self.session.as_mut() {
            if let Verdict::Terminated(group) = session.observe(packet.word0()) {
                debug!(
                    group,
                    first_word = format_args!("{:#010x}", packet.word0()),
                    "open sysex7 stream terminated by interleaved packet"
                );
            }
        }

        let mut entry = [0u8; MAX_ENTRY_SIZE];
        let mut cursor = &mut entry[..];
        cursor.put_u64_ne(position);
        cursor.put_u32_ne(packet.len_bytes() as u32);
        for word in packet.words() {
            cursor.put_u32_ne(*word);
        }

        // SAFETY: `needed` bytes starting at `write` are free space, which
        // only the producer touches until the write position is published.
        unsafe { self.shared.write_wrapped(write, &entry[..needed]) };

        let next = (write + needed) % capacity;
        registers
            .write_position()
            .store(next as u32, Ordering::Release);
        // The entry is committed; a lost wakeup only delays the consumer.
        if let Err(err) = self.shared.event.signal() {
            debug!(error = %err, "failed to signal new entry");
        }
        Ok(())
    }

    /// Detach from the stream. Entries already written stay readable.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shared.producer_closed.store(true, Ordering::Release);
        if let Err(err) = self.shared.event.signal() {
            debug!(error = %err, "failed to signal producer close");
        }
        if let Some(session) = self.session.as_mut() {
            session.reset();
        }
        debug!("producer detached");
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("capacity", &self.shared.capacity)
            .field("sequence", &self.sequence)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Reading half of a looped stream. Only advances the read position.
pub struct Consumer {
    shared: Arc<SharedLoop>,
    sink: Arc<dyn DiagnosticSink>,
    closed: bool,
}

impl Consumer {
    pub(crate) fn new(shared: Arc<SharedLoop>, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            shared,
            sink,
            closed: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Bytes committed and not yet read. Zero while either position register
    /// holds an offset outside the ring.
    pub fn available_bytes(&self) -> usize {
        self.shared
            .positions()
            .map(|(read, write)| used_bytes(read, write, self.shared.capacity))
            .unwrap_or(0)
    }

    pub fn state(&self) -> LoopState {
        self.shared.state()
    }

    /// Whether the producer has detached.
    pub fn is_peer_closed(&self) -> bool {
        self.shared.producer_closed.load(Ordering::Acquire)
    }

    /// Take the next valid packet, or `None` when the ring is empty.
    ///
    /// Invalid entries are reported to the diagnostics sink and skipped. An
    /// entry whose size makes the next boundary unknowable discards
    /// everything up to the current write position. A write position outside
    /// the ring is reported and nothing is read until the producer publishes a
    /// valid one.
    pub fn dequeue(&mut self) -> Option<UmpEvent> {
        if self.closed {
            return None;
        }

        let capacity = self.shared.capacity;
        let registers = &self.shared.registers;
        loop {
            let read = registers.read_position().load(Ordering::Relaxed) as usize;
            let write = registers.write_position().load(Ordering::Acquire) as usize;
            if write >= capacity {
                self.sink.report(&ValidationEvent::Size {
                    provided_bytes: write,
                    timestamp: 0,
                    message: format!("write position {write} is outside the {capacity}-byte ring"),
                });
                return None;
            }
            if read >= capacity {
                self.sink.report(&ValidationEvent::Size {
                    provided_bytes: read,
                    timestamp: 0,
                    message: format!("read position {read} is outside the {capacity}-byte ring"),
                });
                self.resync(write, 0);
                continue;
            }
            let available = used_bytes(read, write, capacity);
            if available == 0 {
                return None;
            }

            if available < ENTRY_HEADER_SIZE {
                self.sink.report(&ValidationEvent::Size {
                    provided_bytes: available,
                    timestamp: 0,
                    message: format!("{available} bytes available, less than an entry header"),
                });
                self.resync(write, available);
                continue;
            }

            let mut header = [0u8; ENTRY_HEADER_SIZE];
            // SAFETY: `available` bytes from `read` are published by the producer.
            unsafe { self.shared.read_wrapped(read, &mut header) };
            let mut cursor = &header[..];
            let position = cursor.get_u64_ne();
            let byte_count = cursor.get_u32_ne() as usize;

            if let Some(message) = size_violation(byte_count, available) {
                self.sink.report(&ValidationEvent::Size {
                    provided_bytes: byte_count,
                    timestamp: position,
                    message,
                });
                self.resync(write, available);
                continue;
            }

            let mut payload = [0u8; MAX_PAYLOAD_SIZE];
            // SAFETY: header and payload lie within the published bytes.
            unsafe {
                self.shared.read_wrapped(
                    (read + ENTRY_HEADER_SIZE) % capacity,
                    &mut payload[..byte_count],
                )
            };
            let next = (read + ENTRY_HEADER_SIZE + byte_count) % capacity;
            registers.read_position().store(next as u32, Ordering::Release);

            let count = byte_count / WORD_SIZE;
            let mut words = [0u32; MAX_PACKET_WORDS];
            let mut cursor = &payload[..byte_count];
            for word in words.iter_mut().take(count) {
                *word = cursor.get_u32_ne();
            }

            match Packet::from_words(&words[..count]) {
                Ok(packet) => return Some(UmpEvent { position, packet }),
                Err(err) => self.sink.report(&ValidationEvent::Data {
                    first_word: words[0],
                    timestamp: position,
                    message: err.to_string(),
                }),
            }
        }
    }

    fn resync(&self, write: usize, skipped: usize) {
        warn!(skipped, "resynchronising read position to write position");
        self.shared
            .registers
            .read_position()
            .store(write as u32, Ordering::Release);
    }

    /// Block until data is available, the producer detaches, or `timeout`
    /// elapses. `None` waits indefinitely.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<WaitStatus> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            if let Some(status) = self.ready_status() {
                return Ok(status);
            }
            let remaining = match deadline {
                None => None,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(WaitStatus::TimedOut);
                    }
                    Some(remaining)
                }
            };
            self.shared.event.wait(remaining)?;
        }
    }

    /// Async counterpart of [`wait`](Self::wait) without a timeout; wrap it in
    /// `tokio::time::timeout` to bound it.
    #[cfg(all(feature = "async", target_os = "linux"))]
    pub async fn wait_async(&mut self) -> Result<WaitStatus> {
        loop {
            if let Some(status) = self.ready_status() {
                return Ok(status);
            }
            self.shared.event.wait_async().await?;
        }
    }

    fn ready_status(&self) -> Option<WaitStatus> {
        if self.closed {
            return Some(WaitStatus::Closed);
        }
        // Load the flag first: once it is seen, every entry committed before
        // the close is visible to the position check below.
        let producer_closed = self.is_peer_closed();
        if self.available_bytes() > 0 {
            Some(WaitStatus::Readable)
        } else if producer_closed {
            Some(WaitStatus::Closed)
        } else {
            None
        }
    }

    /// Detach from the stream. The producer sees [`StreamError::PeerClosed`].
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shared.consumer_closed.store(true, Ordering::Release);
        if let Err(err) = self.shared.event.signal() {
            debug!(error = %err, "failed to signal consumer close");
        }
        debug!("consumer detached");
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("capacity", &self.shared.capacity)
            .field("closed", &self.closed)
            .finish()
    }
}

fn size_violation(byte_count: usize, available: usize) -> Option<String> {
    if byte_count == 0 || byte_count % WORD_SIZE != 0 {
        Some(format!("byte count {byte_count} is not a whole number of words"))
    } else if byte_count > MAX_PAYLOAD_SIZE {
        Some(format!(
            "byte count {byte_count} exceeds the largest packet ({MAX_PAYLOAD_SIZE} bytes)"
        ))
    } else if ENTRY_HEADER_SIZE + byte_count > available {
        Some(format!(
            "entry of {} bytes exceeds the {available} bytes available",
            ENTRY_HEADER_SIZE + byte_count
        ))
    } else {
        None
    }
}
