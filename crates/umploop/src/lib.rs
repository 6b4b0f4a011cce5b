//! Universal MIDI Packet codec and looped shared-memory streaming.
//!
//! # Crate Structure
//!
//! - [`packet`]: UMP field codec, packet builders and the SysEx7 interleave guard
//! - [`shm`]: shared memory regions, position registers and notification events
//! - [`stream`]: buffer negotiation and the producer/consumer ring

/// Re-export packet types.
pub mod packet {
    pub use umploop_packet::*;
}

/// Re-export shared memory types.
pub mod shm {
    pub use umploop_shm::*;
}

/// Re-export streaming types.
pub mod stream {
    pub use umploop_stream::*;
}
