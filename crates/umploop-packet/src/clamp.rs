//! Truncate numeric payload values to their protocol field width.
//!
//! These never fail. Out-of-range input keeps only its low bits, so a
//! real-time path keeps flowing instead of rejecting a packet.

/// 2-bit value.
#[inline]
pub fn crumb(value: u8) -> u8 {
    value & 0x03
}

/// 4-bit value.
#[inline]
pub fn nibble(value: u8) -> u8 {
    value & 0x0F
}

/// 7-bit data byte.
#[inline]
pub fn byte7(value: u8) -> u8 {
    value & 0x7F
}

/// 10-bit value.
#[inline]
pub fn int10(value: u16) -> u16 {
    value & 0x03FF
}

/// 14-bit value.
#[inline]
pub fn int14(value: u16) -> u16 {
    value & 0x3FFF
}

/// 20-bit value.
#[inline]
pub fn int20(value: u32) -> u32 {
    value & 0x000F_FFFF
}
