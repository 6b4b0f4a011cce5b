use std::fmt;
use std::io;

use umploop_packet::PacketError;
use umploop_stream::{OpenFailure, StreamError};

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => USAGE,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn packet_error(context: &str, err: PacketError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn stream_error(context: &str, err: StreamError) -> CliError {
    let code = match &err {
        StreamError::Open(OpenFailure::Timeout(_)) => TIMEOUT,
        StreamError::Open(_) | StreamError::Shm(_) => TRANSPORT_ERROR,
        StreamError::InvalidPacket(_) | StreamError::CorruptPosition { .. } => DATA_INVALID,
        StreamError::BufferFull { .. } | StreamError::PeerClosed | StreamError::Closed => FAILURE,
        StreamError::InvalidState { .. } | StreamError::NotReady { .. } => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}
