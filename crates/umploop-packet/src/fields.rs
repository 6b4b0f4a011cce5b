//! Fixed-position fields of the first word.
//!
//! ```text
//!  31    28 27    24 23    20 19    16 15             8 7              0
//! ┌────────┬────────┬────────┬────────┬────────────────┬────────────────┐
//! │  type  │ group  │ status │channel │     byte 3     │     byte 4     │
//! └────────┴────────┴────────┴────────┴────────────────┴────────────────┘
//! ```
//!
//! `with_group` and `with_channel` do not check that the message type defines
//! the field. Callers gate on [`has_group_field`](crate::has_group_field) /
//! [`has_channel_field`](crate::has_channel_field) first, otherwise unrelated
//! bits are overwritten.

const GROUP_DATA_MASK: u32 = 0x0F00_0000;
const GROUP_CLEARING_MASK: u32 = 0xF0FF_FFFF;
const GROUP_SHIFT: u32 = 24;

const CHANNEL_DATA_MASK: u32 = 0x000F_0000;
const CHANNEL_CLEARING_MASK: u32 = 0xFFF0_FFFF;
const CHANNEL_SHIFT: u32 = 16;

/// Number of groups on one transport.
pub const GROUP_COUNT: usize = 16;

/// Group index, bits 27..24.
#[inline]
pub fn group(word0: u32) -> u8 {
    ((word0 & GROUP_DATA_MASK) >> GROUP_SHIFT) as u8
}

/// Channel index, bits 19..16.
#[inline]
pub fn channel(word0: u32) -> u8 {
    ((word0 & CHANNEL_DATA_MASK) >> CHANNEL_SHIFT) as u8
}

/// Replace the group nibble. `group` is masked to four bits.
#[inline]
pub fn with_group(word0: u32, group: u8) -> u32 {
    (word0 & GROUP_CLEARING_MASK) | (u32::from(group & 0x0F) << GROUP_SHIFT)
}

/// Replace the channel nibble. `channel` is masked to four bits.
#[inline]
pub fn with_channel(word0: u32, channel: u8) -> u32 {
    (word0 & CHANNEL_CLEARING_MASK) | (u32::from(channel & 0x0F) << CHANNEL_SHIFT)
}

/// Build a word from four bytes, most significant first.
#[inline]
pub fn word_from_bytes(byte0: u8, byte1: u8, byte2: u8, byte3: u8) -> u32 {
    u32::from_be_bytes([byte0, byte1, byte2, byte3])
}

#[inline]
fn nibble3(word: u32) -> u8 {
    ((word & 0x00F0_0000) >> 20) as u8
}

#[inline]
fn nibble4(word: u32) -> u8 {
    ((word & 0x000F_0000) >> 16) as u8
}

/// Status nibble of a 32-bit utility message.
pub fn ump32_status(word0: u32) -> u8 {
    nibble3(word0)
}

/// Status nibble of a MIDI 1.0 or MIDI 2.0 channel voice message.
pub fn channel_voice_status(word0: u32) -> u8 {
    nibble3(word0)
}

/// Full status byte of a system common / real time message.
pub fn system_common_status(word0: u32) -> u8 {
    word0.to_be_bytes()[1]
}

/// Status bank of a flex data message.
pub fn flex_data_status_bank(word0: u32) -> u8 {
    word0.to_be_bytes()[2]
}

/// Status of a flex data message.
pub fn flex_data_status(word0: u32) -> u8 {
    word0.to_be_bytes()[3]
}

/// Status nibble of a 64-bit data (SysEx7) message.
pub fn data64_status(word0: u32) -> u8 {
    nibble3(word0)
}

/// Number of valid payload bytes in a 64-bit data message.
pub fn data64_byte_count(word0: u32) -> u8 {
    nibble4(word0)
}

/// Status nibble of a 128-bit data (SysEx8 / mixed data set) message.
pub fn data128_status(word0: u32) -> u8 {
    nibble3(word0)
}

/// Number of valid payload bytes in a 128-bit data message.
pub fn data128_byte_count(word0: u32) -> u8 {
    nibble4(word0)
}
