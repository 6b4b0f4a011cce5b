//! Universal MIDI Packet codec.
//!
//! Everything here is a pure function of the packet's bits. The first word of
//! every packet carries:
//! - the message type in bits 31..28, which alone fixes the packet length
//! - a group index in bits 27..24 (types 0x1-0x5 and 0xD)
//! - a channel index in bits 19..16 (types 0x1, 0x2, 0x4 and 0xD)
//!
//! Field accessors never fail; out-of-range values are masked to the field
//! width. The [`sysex`] module adds the interleave guard for open SysEx7
//! streams.

pub mod builder;
pub mod clamp;
pub mod error;
pub mod fields;
pub mod message_type;
pub mod packet;
pub mod stream;
pub mod sysex;

pub use error::{PacketError, Result};
pub use fields::{channel, group, with_channel, with_group, word_from_bytes, GROUP_COUNT};
pub use message_type::{
    byte_count, has_channel_field, has_group_field, message_type, with_message_type, word_count,
    word_count_for_type, MessageType, FALLBACK_WORD_COUNT, MAX_PACKET_WORDS, WORD_SIZE,
};
pub use packet::Packet;
pub use stream::{stream_form, stream_status, EndpointInfo, FunctionBlockInfo};
pub use sysex::{is_admissible, SysExSession, SysExStatus, Verdict};
