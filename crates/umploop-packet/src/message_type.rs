//! Message type nibble and the per-type layout tables.
//!
//! The top four bits of the first word of every packet select one of sixteen
//! message types. Everything structural about a packet (its length, whether it
//! carries a group or channel field) follows from that nibble alone.

use serde::Serialize;

/// Number of bytes in one UMP word.
pub const WORD_SIZE: usize = 4;

/// Largest packet, in words.
pub const MAX_PACKET_WORDS: usize = 4;

/// Word count used for a type value outside the 4-bit space.
///
/// The nibble space is fully enumerated today, so only raw `u8` input wider
/// than four bits can reach this. It is kept for forward compatibility.
pub const FALLBACK_WORD_COUNT: u8 = 1;

const MESSAGE_TYPE_SHIFT: u32 = 28;
const MESSAGE_TYPE_CLEARING_MASK: u32 = 0x0FFF_FFFF;

/// UMP message type (bits 31..28 of the first word).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Utility,
    SystemCommon,
    Midi1ChannelVoice,
    Data64,
    Midi2ChannelVoice,
    Data128,
    Reserved32_6,
    Reserved32_7,
    Reserved64_8,
    Reserved64_9,
    Reserved64A,
    Reserved96B,
    Reserved96C,
    FlexData,
    Reserved128E,
    UmpStream,
}

impl MessageType {
    /// Decode the type of a packet from its first word.
    pub fn from_word(word0: u32) -> Self {
        Self::from_nibble((word0 >> MESSAGE_TYPE_SHIFT) as u8)
    }

    /// Decode a type nibble. Bits above the low four are ignored.
    pub fn from_nibble(nibble: u8) -> Self {
        match nibble & 0x0F {
            0x0 => Self::Utility,
            0x1 => Self::SystemCommon,
            0x2 => Self::Midi1ChannelVoice,
            0x3 => Self::Data64,
            0x4 => Self::Midi2ChannelVoice,
            0x5 => Self::Data128,
            0x6 => Self::Reserved32_6,
            0x7 => Self::Reserved32_7,
            0x8 => Self::Reserved64_8,
            0x9 => Self::Reserved64_9,
            0xA => Self::Reserved64A,
            0xB => Self::Reserved96B,
            0xC => Self::Reserved96C,
            0xD => Self::FlexData,
            0xE => Self::Reserved128E,
            _ => Self::UmpStream,
        }
    }

    /// Strict variant of [`from_nibble`](Self::from_nibble): `None` for values above 0xF.
    pub fn try_from_nibble(value: u8) -> Option<Self> {
        (value <= 0x0F).then(|| Self::from_nibble(value))
    }

    /// The 4-bit wire value.
    pub fn nibble(self) -> u8 {
        match self {
            Self::Utility => 0x0,
            Self::SystemCommon => 0x1,
            Self::Midi1ChannelVoice => 0x2,
            Self::Data64 => 0x3,
            Self::Midi2ChannelVoice => 0x4,
            Self::Data128 => 0x5,
            Self::Reserved32_6 => 0x6,
            Self::Reserved32_7 => 0x7,
            Self::Reserved64_8 => 0x8,
            Self::Reserved64_9 => 0x9,
            Self::Reserved64A => 0xA,
            Self::Reserved96B => 0xB,
            Self::Reserved96C => 0xC,
            Self::FlexData => 0xD,
            Self::Reserved128E => 0xE,
            Self::UmpStream => 0xF,
        }
    }

    /// Packet length in words.
    pub fn word_count(self) -> u8 {
        match self {
            Self::Utility
            | Self::SystemCommon
            | Self::Midi1ChannelVoice
            | Self::Reserved32_6
            | Self::Reserved32_7 => 1,
            Self::Data64
            | Self::Midi2ChannelVoice
            | Self::Reserved64_8
            | Self::Reserved64_9
            | Self::Reserved64A => 2,
            Self::Reserved96B | Self::Reserved96C => 3,
            Self::Data128 | Self::FlexData | Self::Reserved128E | Self::UmpStream => 4,
        }
    }

    /// True when bits 27..24 of the first word hold a group index.
    pub fn has_group_field(self) -> bool {
        match self {
            Self::SystemCommon
            | Self::Midi1ChannelVoice
            | Self::Data64
            | Self::Midi2ChannelVoice
            | Self::Data128
            | Self::FlexData => true,
            Self::Utility
            | Self::UmpStream
            | Self::Reserved32_6
            | Self::Reserved32_7
            | Self::Reserved64_8
            | Self::Reserved64_9
            | Self::Reserved64A
            | Self::Reserved96B
            | Self::Reserved96C
            | Self::Reserved128E => false,
        }
    }

    /// True when bits 19..16 of the first word hold a channel index.
    ///
    /// Data types (0x3, 0x5) carry a group but no channel.
    pub fn has_channel_field(self) -> bool {
        match self {
            Self::SystemCommon | Self::Midi1ChannelVoice | Self::Midi2ChannelVoice | Self::FlexData => {
                true
            }
            Self::Utility
            | Self::Data64
            | Self::Data128
            | Self::UmpStream
            | Self::Reserved32_6
            | Self::Reserved32_7
            | Self::Reserved64_8
            | Self::Reserved64_9
            | Self::Reserved64A
            | Self::Reserved96B
            | Self::Reserved96C
            | Self::Reserved128E => false,
        }
    }

    /// Groupless types never belong to a group's message sequence.
    pub fn is_groupless(self) -> bool {
        matches!(self, Self::Utility | Self::UmpStream)
    }

    /// Human-readable name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::Utility => "utility",
            Self::SystemCommon => "system",
            Self::Midi1ChannelVoice => "midi1-channel-voice",
            Self::Data64 => "data64",
            Self::Midi2ChannelVoice => "midi2-channel-voice",
            Self::Data128 => "data128",
            Self::FlexData => "flex-data",
            Self::UmpStream => "ump-stream",
            _ => "reserved",
        }
    }
}

/// Top nibble of the first word.
#[inline]
pub fn message_type(word0: u32) -> u8 {
    (word0 >> MESSAGE_TYPE_SHIFT) as u8
}

/// Replace the message type nibble, keeping the other 28 bits.
#[inline]
pub fn with_message_type(word0: u32, message_type: u8) -> u32 {
    (word0 & MESSAGE_TYPE_CLEARING_MASK) | (u32::from(message_type & 0x0F) << MESSAGE_TYPE_SHIFT)
}

/// Packet length in words for a raw type value.
///
/// Values above 0xF map to [`FALLBACK_WORD_COUNT`].
pub fn word_count_for_type(message_type: u8) -> u8 {
    match MessageType::try_from_nibble(message_type) {
        Some(mt) => mt.word_count(),
        None => FALLBACK_WORD_COUNT,
    }
}

/// Packet length in words, derived from the first word.
#[inline]
pub fn word_count(word0: u32) -> usize {
    MessageType::from_word(word0).word_count() as usize
}

/// Packet length in bytes, derived from the first word.
#[inline]
pub fn byte_count(word0: u32) -> usize {
    word_count(word0) * WORD_SIZE
}

/// Whether a raw type value defines a group field. False above 0xF.
pub fn has_group_field(message_type: u8) -> bool {
    MessageType::try_from_nibble(message_type).is_some_and(MessageType::has_group_field)
}

/// Whether a raw type value defines a channel field. False above 0xF.
pub fn has_channel_field(message_type: u8) -> bool {
    MessageType::try_from_nibble(message_type).is_some_and(MessageType::has_channel_field)
}
