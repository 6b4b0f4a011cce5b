use std::sync::atomic::AtomicU32;

use crate::error::Result;
use crate::region::SharedRegion;

const CACHE_LINE: usize = 64;

/// Register page layout: each position on its own cache line.
#[repr(C)]
struct RegisterBlock {
    write_position: AtomicU32,
    _pad0: [u8; CACHE_LINE - 4],
    read_position: AtomicU32,
    _pad1: [u8; CACHE_LINE - 4],
}

const _: () = assert!(std::mem::size_of::<RegisterBlock>() == 2 * CACHE_LINE);

/// The write and read position registers of one ring buffer.
///
/// Both live in their own shared page, apart from the data buffer. Positions
/// are byte offsets into the data buffer.
#[derive(Debug)]
pub struct PositionRegisters {
    region: SharedRegion,
}

impl PositionRegisters {
    /// Allocate a register page with both positions at zero.
    pub fn new() -> Result<Self> {
        let region = SharedRegion::new(std::mem::size_of::<RegisterBlock>())?;
        Ok(Self { region })
    }

    fn block(&self) -> &RegisterBlock {
        // SAFETY: the region is at least size_of::<RegisterBlock>() bytes, page
        // aligned, zero-filled (a valid AtomicU32 is any bit pattern), and lives
        // as long as `self`.
        unsafe { &*(self.region.as_ptr() as *const RegisterBlock) }
    }

    /// Register advanced by the producer.
    pub fn write_position(&self) -> &AtomicU32 {
        &self.block().write_position
    }

    /// Register advanced by the consumer.
    pub fn read_position(&self) -> &AtomicU32 {
        &self.block().read_position
    }
}
