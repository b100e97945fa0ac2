use crc::{Crc, CRC_16_XMODEM, CRC_7_MMC};

const CRC7: Crc<u8> = Crc::<u8>::new(&CRC_7_MMC);
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// CRC-7 calculation, right aligned.
pub fn crc7(data: &[u8]) -> u8 {
    CRC7.checksum(data)
}

/// CRC-16 calculation of a data block.
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}
