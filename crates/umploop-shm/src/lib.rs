//! Shared-memory plumbing for looped UMP streaming.
//!
//! Three resources make up one looped stream, each allocated once:
//! - [`SharedRegion`]: the data buffer
//! - [`PositionRegisters`]: the write and read byte offsets
//! - [`NotifyEvent`]: the coalescing "new data" signal
//!
//! This is the lowest layer of umploop and knows nothing about packets.

pub mod error;
pub mod notify;
pub mod region;
pub mod registers;

pub use error::{Result, ShmError};
pub use notify::NotifyEvent;
pub use region::SharedRegion;
pub use registers::PositionRegisters;
