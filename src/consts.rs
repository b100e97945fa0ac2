/// Size of a data block (sector) in bytes.
pub const BLOCK_SIZE: usize = 512;
/// Size of a data block (sector) in bytes, as `u32` for bus addresses.
pub const BLOCK_SIZE_U32: u32 = BLOCK_SIZE as u32;
/// Size of a data block (sector) in bytes, as `u64` for capacities.
pub const BLOCK_SIZE_U64: u64 = BLOCK_SIZE as u64;

pub mod tokens {
    /// Idle state of the response line, also clocked out to receive.
    pub const IDLE: u8 = 0xFF;
    /// Start data token for read single/multiple block and write single block.
    pub const DATA_START_BLOCK: u8 = 0xFE;
    /// Stop token for write multiple blocks.
    pub const STOP_TRAN: u8 = 0xFD;
    /// Start data token for write multiple blocks.
    pub const WRITE_MULTIPLE: u8 = 0xFC;
    /// Mask for data response tokens after a write block operation.
    pub const DATA_RES_MASK: u8 = 0x1F;
    /// Write data accepted token.
    pub const DATA_RES_ACCEPTED: u8 = 0x05;
    /// Write data rejected due to a CRC error.
    pub const DATA_RES_CRC_ERROR: u8 = 0x0B;
    /// Write data rejected due to a write error.
    pub const DATA_RES_WRITE_ERROR: u8 = 0x0D;
    /// Mask of a read data error token (upper nibble is zero).
    pub const DATA_ERROR_MASK: u8 = 0xF0;
    /// Read data error token: address out of range.
    pub const DATA_ERROR_OUT_OF_RANGE: u8 = 0x08;
}

pub mod args {
    /// SEND_IF_COND argument: 2.7-3.6V supplied, check pattern 0xAA.
    pub const IF_COND: u32 = 0x0000_01AA;
    /// Voltage accepted nibble echoed in R7.
    pub const IF_COND_VOLTAGE: u8 = 0x01;
    /// Check pattern echoed in R7.
    pub const IF_COND_PATTERN: u8 = 0xAA;
    /// SD_SEND_OP_COND argument announcing high capacity support.
    pub const HCS: u32 = 0x4000_0000;
    /// CRC_ON_OFF argument enabling CRC checking.
    pub const CRC_ON: u32 = 0x0000_0001;
}
