/// Errors raised when assembling a packet from raw words.
///
/// The field codec itself never fails; only whole-packet construction does.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    /// No words were supplied.
    #[error("empty packet")]
    Empty,

    /// The word count does not match the length implied by the message type.
    #[error("packet size mismatch for first word {first_word:#010x} ({provided} words, type requires {expected})")]
    SizeMismatch {
        first_word: u32,
        expected: usize,
        provided: usize,
    },
}

pub type Result<T> = std::result::Result<T, PacketError>;
