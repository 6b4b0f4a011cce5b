//! UMP stream (type 0xF) message decoders.

use serde::Serialize;

/// Endpoint info notification status.
pub const STATUS_ENDPOINT_INFO: u16 = 0x001;

/// Function block info notification status.
pub const STATUS_FUNCTION_BLOCK_INFO: u16 = 0x011;

/// Form field (bits 27..26): complete, start, continue or end.
#[inline]
pub fn stream_form(word0: u32) -> u8 {
    ((word0 & 0x0C00_0000) >> 26) as u8
}

/// 10-bit status field (bits 25..16).
#[inline]
pub fn stream_status(word0: u32) -> u16 {
    ((word0 & 0x03FF_0000) >> 16) as u16
}

#[inline]
fn bit(word: u32, mask: u32) -> bool {
    word & mask != 0
}

/// Decoded endpoint info notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EndpointInfo {
    pub ump_version_major: u8,
    pub ump_version_minor: u8,
    pub static_function_blocks: bool,
    pub function_block_count: u8,
    pub midi2_protocol: bool,
    pub midi1_protocol: bool,
    pub receive_jr_timestamps: bool,
    pub transmit_jr_timestamps: bool,
}

impl EndpointInfo {
    /// Decode from the first two words of the notification.
    pub fn decode(word0: u32, word1: u32) -> Self {
        Self {
            ump_version_major: ((word0 & 0x0000_FF00) >> 8) as u8,
            ump_version_minor: (word0 & 0x0000_00FF) as u8,
            static_function_blocks: bit(word1, 0x8000_0000),
            function_block_count: ((word1 & 0x7F00_0000) >> 24) as u8,
            midi2_protocol: bit(word1, 0x0000_0200),
            midi1_protocol: bit(word1, 0x0000_0100),
            receive_jr_timestamps: bit(word1, 0x0000_0002),
            transmit_jr_timestamps: bit(word1, 0x0000_0001),
        }
    }
}

/// Decoded function block info notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FunctionBlockInfo {
    pub active: bool,
    pub number: u8,
    pub ui_hint: u8,
    pub midi1: u8,
    pub direction: u8,
    pub first_group: u8,
    pub group_count: u8,
    pub midi_ci_version: u8,
    pub max_sysex8_streams: u8,
}

impl FunctionBlockInfo {
    /// Decode from the first two words of the notification.
    pub fn decode(word0: u32, word1: u32) -> Self {
        let [first_group, group_count, midi_ci_version, max_sysex8_streams] = word1.to_be_bytes();
        Self {
            active: bit(word0, 0x0000_8000),
            number: ((word0 & 0x0000_7F00) >> 8) as u8,
            ui_hint: ((word0 & 0x0000_0030) >> 4) as u8,
            midi1: ((word0 & 0x0000_000C) >> 2) as u8,
            direction: (word0 & 0x0000_0003) as u8,
            first_group,
            group_count,
            midi_ci_version,
            max_sysex8_streams,
        }
    }
}
