//! Constructors for common packets.

use crate::clamp::{byte7, nibble};
use crate::fields::word_from_bytes;
use crate::message_type::MessageType;
use crate::packet::Packet;
use crate::sysex::SysExStatus;

/// Payload bytes carried by one SysEx7 packet.
pub const SYSEX7_BYTES_PER_PACKET: usize = 6;

/// One-word MIDI 1.0 channel voice message (type 0x2).
///
/// Data bytes are truncated to seven bits.
pub fn midi1_channel_voice(group: u8, status: u8, data1: u8, data2: u8) -> Packet {
    one_word(MessageType::Midi1ChannelVoice, group, status, byte7(data1), byte7(data2))
}

/// One-word system common / real time message (type 0x1).
pub fn system_message(group: u8, status: u8, data1: u8, data2: u8) -> Packet {
    one_word(MessageType::SystemCommon, group, status, byte7(data1), byte7(data2))
}

fn one_word(mt: MessageType, group: u8, status: u8, data1: u8, data2: u8) -> Packet {
    let byte0 = (mt.nibble() << 4) | nibble(group);
    Packet::from_first_word_unchecked([word_from_bytes(byte0, status, data1, data2), 0, 0, 0], 1)
}

/// Split a SysEx payload (without F0/F7) into SysEx7 packets on `group`.
///
/// Data bytes are truncated to seven bits. An empty payload produces a single
/// Complete packet with zero bytes.
pub fn sysex7_packets(group: u8, payload: &[u8]) -> Vec<Packet> {
    let chunks: Vec<&[u8]> = if payload.is_empty() {
        vec![&[][..]]
    } else {
        payload.chunks(SYSEX7_BYTES_PER_PACKET).collect()
    };

    let last = chunks.len() - 1;
    chunks
        .iter()
        .enumerate()
        .map(|(index, chunk)| {
            let status = match (index, last) {
                (_, 0) => SysExStatus::Complete,
                (0, _) => SysExStatus::Start,
                (i, l) if i == l => SysExStatus::End,
                _ => SysExStatus::Continue,
            };
            sysex7_packet(group, status, chunk)
        })
        .collect()
}

fn sysex7_packet(group: u8, status: SysExStatus, chunk: &[u8]) -> Packet {
    let mut data = [0u8; SYSEX7_BYTES_PER_PACKET];
    for (slot, byte) in data.iter_mut().zip(chunk) {
        *slot = byte7(*byte);
    }

    let byte0 = (MessageType::Data64.nibble() << 4) | nibble(group);
    let byte1 = (status.nibble() << 4) | chunk.len() as u8;
    let word0 = word_from_bytes(byte0, byte1, data[0], data[1]);
    let word1 = word_from_bytes(data[2], data[3], data[4], data[5]);
    Packet::from_first_word_unchecked([word0, word1, 0, 0], 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{channel, data64_byte_count, group};
    use crate::sysex::{sysex7_status, SysExStatus};

    #[test]
    fn builds_note_on() {
        let packet = midi1_channel_voice(1, 0x93, 60, 0xFF);
        assert_eq!(packet.words(), &[0x2193_3C7F]);
        assert_eq!(group(packet.word0()), 1);
        assert_eq!(channel(packet.word0()), 3);
    }

    #[test]
    fn builds_timing_clock() {
        let packet = system_message(0x12, 0xF8, 0, 0);
        assert_eq!(packet.word0(), 0x12F8_0000);
    }

    #[test]
    fn short_payload_is_single_complete_packet() {
        let packets = sysex7_packets(2, &[0x7E, 0x7F, 0x06, 0x01]);
        assert_eq!(packets.len(), 1);
        let word0 = packets[0].word0();
        assert_eq!(sysex7_status(word0), Some(SysExStatus::Complete));
        assert_eq!(data64_byte_count(word0), 4);
        assert_eq!(packets[0].words(), &[0x3204_7E7F, 0x0601_0000]);
    }

    #[test]
    fn long_payload_is_start_continue_end() {
        let payload: Vec<u8> = (0u8..15).collect();
        let packets = sysex7_packets(3, &payload);
        let statuses: Vec<_> = packets.iter().map(|p| sysex7_status(p.word0())).collect();
        assert_eq!(
            statuses,
            vec![
                Some(SysExStatus::Start),
                Some(SysExStatus::Continue),
                Some(SysExStatus::End)
            ]
        );
        assert_eq!(data64_byte_count(packets[2].word0()), 3);
        assert!(packets.iter().all(|p| group(p.word0()) == 3));
    }

    #[test]
    fn empty_payload() {
        let packets = sysex7_packets(0, &[]);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].words(), &[0x3000_0000, 0]);
    }
}
