use crate::negotiate::LoopState;

/// Why a looped stream could not be opened.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OpenFailure {
    /// This session already has a live stream on the device.
    #[error("already open in this session")]
    AlreadyOpen,

    /// Another session holds the device exclusively, or exclusive access was
    /// requested while another session is streaming.
    #[error("opened exclusively elsewhere")]
    ExclusiveElsewhere,

    /// The device did not answer a negotiation request in time.
    #[error("device did not respond within {0:?}")]
    Timeout(std::time::Duration),

    /// Any other allocation or negotiation failure.
    #[error("{0}")]
    Other(String),
}

/// Errors that can occur while negotiating or streaming.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Opening the stream failed; fatal to this stream only.
    #[error("stream open failed: {0}")]
    Open(OpenFailure),

    /// Shared memory or notification event error.
    #[error("shared memory error: {0}")]
    Shm(#[from] umploop_shm::ShmError),

    /// A negotiation step was requested out of order.
    #[error("invalid negotiation state (expected {expected:?}, was {actual:?})")]
    InvalidState {
        expected: LoopState,
        actual: LoopState,
    },

    /// Streaming was requested before every resource was obtained.
    #[error("cannot start streaming: {missing} not obtained")]
    NotReady { missing: &'static str },

    /// The words do not form one well-sized packet.
    #[error("invalid packet: {0}")]
    InvalidPacket(#[from] umploop_packet::PacketError),

    /// Not enough free space in the ring; nothing was written.
    #[error("ring buffer full ({needed} bytes needed, {available} available)")]
    BufferFull { needed: usize, available: usize },

    /// A shared position register holds an offset outside the ring.
    #[error("{register} position {value} is outside the {capacity}-byte ring")]
    CorruptPosition {
        register: &'static str,
        value: usize,
        capacity: usize,
    },

    /// The other side has detached from the stream.
    #[error("peer closed the stream")]
    PeerClosed,

    /// This handle was already closed.
    #[error("stream handle closed")]
    Closed,
}

impl StreamError {
    /// The structured open-failure reason, if this is an open failure.
    pub fn open_failure(&self) -> Option<&OpenFailure> {
        match self {
            Self::Open(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<OpenFailure> for StreamError {
    fn from(failure: OpenFailure) -> Self {
        Self::Open(failure)
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
