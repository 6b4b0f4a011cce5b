//! System exclusive classification and the interleave guard.
//!
//! While a 7-bit SysEx stream is open on a group, only Continue and End
//! packets may follow on that group. Groupless traffic (types 0x0 and 0xF) and
//! traffic on other groups may be interleaved freely, which lets several
//! clients share one transport without corrupting each other's bulk transfers.
//! Any other packet on the open group terminates the stream.

use serde::Serialize;

use crate::fields::{data128_status, data64_status, group, GROUP_COUNT};
use crate::message_type::MessageType;

/// SysEx packet status (bits 23..20 of a data message).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SysExStatus {
    /// Whole message in one packet.
    Complete,
    Start,
    Continue,
    End,
}

impl SysExStatus {
    fn from_status(status: u8) -> Option<Self> {
        match status {
            0x0 => Some(Self::Complete),
            0x1 => Some(Self::Start),
            0x2 => Some(Self::Continue),
            0x3 => Some(Self::End),
            _ => None,
        }
    }

    pub(crate) fn nibble(self) -> u8 {
        match self {
            Self::Complete => 0x0,
            Self::Start => 0x1,
            Self::Continue => 0x2,
            Self::End => 0x3,
        }
    }
}

/// SysEx7 status of a word, or `None` for anything that is not a type 0x3 packet.
pub fn sysex7_status(word0: u32) -> Option<SysExStatus> {
    match MessageType::from_word(word0) {
        MessageType::Data64 => SysExStatus::from_status(data64_status(word0)),
        _ => None,
    }
}

pub fn is_sysex7_start(word0: u32) -> bool {
    sysex7_status(word0) == Some(SysExStatus::Start)
}

pub fn is_sysex7_continue(word0: u32) -> bool {
    sysex7_status(word0) == Some(SysExStatus::Continue)
}

pub fn is_sysex7_end(word0: u32) -> bool {
    sysex7_status(word0) == Some(SysExStatus::End)
}

/// Single-packet ("complete in one UMP") SysEx7.
pub fn is_sysex7_complete(word0: u32) -> bool {
    sysex7_status(word0) == Some(SysExStatus::Complete)
}

/// 8-bit SysEx packet (type 0x5, statuses 0..=3). Mixed data set statuses are excluded.
pub fn is_sysex8(word0: u32) -> bool {
    MessageType::from_word(word0) == MessageType::Data128
        && SysExStatus::from_status(data128_status(word0)).is_some()
}

/// Whether `word0` may be sent while `active_group` has an open SysEx7 stream.
///
/// `false` means the word terminates that stream; the caller clears its
/// active group before sending.
pub fn is_admissible(active_group: Option<u8>, word0: u32) -> bool {
    if MessageType::from_word(word0).is_groupless() {
        return true;
    }

    if Some(group(word0)) != active_group {
        return true;
    }

    is_sysex7_continue(word0) || is_sysex7_end(word0)
}

/// Outcome of observing one outgoing packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Packet does not disturb any open stream.
    Pass,
    /// Packet opened a SysEx7 stream on the group.
    Opened(u8),
    /// Packet closed the group's stream normally (End).
    Closed(u8),
    /// Packet was inadmissible and implicitly terminated the group's stream.
    Terminated(u8),
}

/// Open SysEx7 streams for one transport, one flag per group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SysExSession {
    open: u16,
}

impl SysExSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `group` currently has an open stream.
    pub fn is_open(&self, group: u8) -> bool {
        (group as usize) < GROUP_COUNT && self.open & (1 << group) != 0
    }

    /// Lowest group with an open stream.
    pub fn active_group(&self) -> Option<u8> {
        (self.open != 0).then(|| self.open.trailing_zeros() as u8)
    }

    /// Number of groups with an open stream.
    pub fn open_count(&self) -> u32 {
        self.open.count_ones()
    }

    /// Admissibility of `word0` against the stream open on its own group.
    pub fn check(&self, word0: u32) -> bool {
        if MessageType::from_word(word0).is_groupless() {
            return true;
        }
        let g = group(word0);
        let active = self.is_open(g).then_some(g);
        is_admissible(active, word0)
    }

    /// Apply the state transition for an outgoing packet.
    pub fn observe(&mut self, word0: u32) -> Verdict {
        if MessageType::from_word(word0).is_groupless() {
            return Verdict::Pass;
        }

        let g = group(word0);
        if self.is_open(g) {
            if !self.check(word0) {
                self.close(g);
                return Verdict::Terminated(g);
            }
            if is_sysex7_end(word0) {
                self.close(g);
                return Verdict::Closed(g);
            }
            return Verdict::Pass;
        }

        if is_sysex7_start(word0) {
            self.open |= 1 << g;
            return Verdict::Opened(g);
        }
        Verdict::Pass
    }

    /// Forget every open stream (transport closed).
    pub fn reset(&mut self) {
        self.open = 0;
    }

    fn close(&mut self, group: u8) {
        self.open &= !(1 << group);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // SysEx7 packets on group 3
    const START_G3: u32 = 0x3316_0001;
    const CONTINUE_G3: u32 = 0x3326_0203;
    const END_G3: u32 = 0x3332_0405;
    const COMPLETE_G3: u32 = 0x3303_7E7F;
    const NOTE_ON_G3: u32 = 0x2390_3C7F;
    const NOTE_ON_G5: u32 = 0x2590_3C7F;

    #[test]
    fn classifies_sysex7_statuses() {
        assert!(is_sysex7_start(START_G3));
        assert!(is_sysex7_continue(CONTINUE_G3));
        assert!(is_sysex7_end(END_G3));
        assert!(is_sysex7_complete(COMPLETE_G3));
        assert_eq!(sysex7_status(NOTE_ON_G3), None);
        assert_eq!(sysex7_status(0x3340_0000), None);
    }

    #[test]
    fn classifies_sysex8() {
        assert!(is_sysex8(0x5010_0000));
        assert!(is_sysex8(0x5230_0000));
        assert!(!is_sysex8(0x5080_0000));
        assert!(!is_sysex8(START_G3));
    }

    #[test]
    fn guard_truth_table() {
        let active = Some(3);
        // groupless stream/utility types on any group bits
        assert!(is_admissible(active, 0xF000_0000));
        assert!(is_admissible(active, 0xF300_0000));
        assert!(is_admissible(active, 0x0320_1234));
        // other group
        assert!(is_admissible(active, NOTE_ON_G5));
        // same-group continuation and completion
        assert!(is_admissible(active, CONTINUE_G3));
        assert!(is_admissible(active, END_G3));
        // same-group unrelated traffic terminates
        assert!(!is_admissible(active, NOTE_ON_G3));
        assert!(!is_admissible(active, START_G3));
        assert!(!is_admissible(active, COMPLETE_G3));
    }

    #[test]
    fn nothing_open_admits_everything() {
        assert!(is_admissible(None, NOTE_ON_G3));
        assert!(is_admissible(None, START_G3));
    }

    #[test]
    fn session_open_continue_end() {
        let mut session = SysExSession::new();
        assert_eq!(session.observe(START_G3), Verdict::Opened(3));
        assert_eq!(session.active_group(), Some(3));
        assert_eq!(session.observe(NOTE_ON_G5), Verdict::Pass);
        assert_eq!(session.observe(0xF000_0000), Verdict::Pass);
        assert_eq!(session.observe(CONTINUE_G3), Verdict::Pass);
        assert_eq!(session.observe(END_G3), Verdict::Closed(3));
        assert_eq!(session.active_group(), None);
    }

    #[test]
    fn session_inadmissible_word_terminates() {
        let mut session = SysExSession::new();
        session.observe(START_G3);
        assert!(!session.check(NOTE_ON_G3));
        assert_eq!(session.observe(NOTE_ON_G3), Verdict::Terminated(3));
        assert!(!session.is_open(3));
        assert!(session.check(NOTE_ON_G3));
    }

    #[test]
    fn session_tracks_groups_independently() {
        let mut session = SysExSession::new();
        session.observe(START_G3);
        session.observe(0x3516_0000);
        assert_eq!(session.open_count(), 2);
        assert_eq!(session.observe(NOTE_ON_G5), Verdict::Terminated(5));
        assert!(session.is_open(3));
        session.reset();
        assert_eq!(session.active_group(), None);
    }

    #[test]
    fn restart_on_open_group_terminates_first() {
        let mut session = SysExSession::new();
        session.observe(START_G3);
        assert_eq!(session.observe(START_G3), Verdict::Terminated(3));
        assert_eq!(session.observe(START_G3), Verdict::Opened(3));
    }
}
