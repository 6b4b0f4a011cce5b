use std::fmt;

use crate::error::{PacketError, Result};
use crate::fields;
use crate::message_type::{MessageType, MAX_PACKET_WORDS, WORD_SIZE};

/// One complete UMP: 1 to 4 words, length implied by the first word's type.
///
/// Stored inline so it can be copied through a real-time path without
/// allocating.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Packet {
    words: [u32; MAX_PACKET_WORDS],
    len: u8,
}

impl Packet {
    /// Build a packet, checking that `words.len()` matches the declared type.
    pub fn from_words(words: &[u32]) -> Result<Self> {
        let Some(&word0) = words.first() else {
            return Err(PacketError::Empty);
        };

        let expected = MessageType::from_word(word0).word_count() as usize;
        if words.len() != expected {
            return Err(PacketError::SizeMismatch {
                first_word: word0,
                expected,
                provided: words.len(),
            });
        }

        let mut buf = [0u32; MAX_PACKET_WORDS];
        buf[..expected].copy_from_slice(words);
        Ok(Self {
            words: buf,
            len: expected as u8,
        })
    }

    /// Caller guarantees `len` matches the type of `words[0]`.
    pub(crate) fn from_first_word_unchecked(words: [u32; MAX_PACKET_WORDS], len: u8) -> Self {
        debug_assert_eq!(MessageType::from_word(words[0]).word_count(), len);
        Self { words, len }
    }

    pub fn words(&self) -> &[u32] {
        &self.words[..self.len as usize]
    }

    pub fn word0(&self) -> u32 {
        self.words[0]
    }

    /// Number of words.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Always false; a packet has at least one word.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn len_bytes(&self) -> usize {
        self.len() * WORD_SIZE
    }

    pub fn message_type(&self) -> MessageType {
        MessageType::from_word(self.words[0])
    }

    /// Group index, when the type defines one.
    pub fn group(&self) -> Option<u8> {
        self.message_type()
            .has_group_field()
            .then(|| fields::group(self.words[0]))
    }

    /// Channel index, when the type defines one.
    pub fn channel(&self) -> Option<u8> {
        self.message_type()
            .has_channel_field()
            .then(|| fields::channel(self.words[0]))
    }

    /// Copy of this packet moved to `group`. Groupless packets are returned unchanged.
    pub fn with_group(mut self, group: u8) -> Self {
        if self.message_type().has_group_field() {
            self.words[0] = fields::with_group(self.words[0], group);
        }
        self
    }

    /// Copy of this packet moved to `channel`. Packets without a channel are returned unchanged.
    pub fn with_channel(mut self, channel: u8) -> Self {
        if self.message_type().has_channel_field() {
            self.words[0] = fields::with_channel(self.words[0], channel);
        }
        self
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("type", &self.message_type())
            .field("words", &format_args!("{:08X?}", self.words()))
            .finish()
    }
}

impl TryFrom<&[u32]> for Packet {
    type Error = PacketError;

    fn try_from(words: &[u32]) -> Result<Self> {
        Self::from_words(words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_lengths() {
        let p = Packet::from_words(&[0x4090_3C00, 0xFFFF_0000]).unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(p.len_bytes(), 8);
        assert_eq!(p.message_type(), MessageType::Midi2ChannelVoice);
        assert_eq!(p.group(), Some(0));
        assert_eq!(p.channel(), Some(0));
    }

    #[test]
    fn rejects_empty() {
        assert!(matches!(Packet::from_words(&[]), Err(PacketError::Empty)));
    }

    #[test]
    fn rejects_size_mismatch() {
        let err = Packet::from_words(&[0x4090_3C00]).unwrap_err();
        match err {
            PacketError::SizeMismatch {
                first_word,
                expected,
                provided,
            } => {
                assert_eq!(first_word, 0x4090_3C00);
                assert_eq!(expected, 2);
                assert_eq!(provided, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn groupless_packets_have_no_group() {
        let p = Packet::from_words(&[0xF000_0000, 0, 0, 0]).unwrap();
        assert_eq!(p.group(), None);
        assert_eq!(p.with_group(5).word0(), 0xF000_0000);
    }

    #[test]
    fn data_packets_have_group_but_no_channel() {
        let p = Packet::from_words(&[0x3516_0102, 0x0304_0506]).unwrap();
        assert_eq!(p.group(), Some(5));
        assert_eq!(p.channel(), None);
        assert_eq!(p.with_channel(9).word0(), 0x3516_0102);
        assert_eq!(p.with_group(1).word0(), 0x3116_0102);
    }

    #[test]
    fn try_from_slice() {
        let words: &[u32] = &[0x2090_3C7F];
        let p = Packet::try_from(words).unwrap();
        assert_eq!(p.words(), words);
    }
}
