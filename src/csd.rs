//! Card registers read through data blocks: CSD and CID.

use crate::{card::CardType, consts::BLOCK_SIZE_U64};

use bitfield::bitfield;

/// Raw 16-byte register (CSD or CID).
pub type RegisterData = [u8; 16];

bitfield! {
    /// Card Specific Data of standard capacity SD cards (structure 0) and MMC.
    pub struct CsdV1(u128);
    impl Debug;
    pub u8, structure, _: 127, 126;
    pub u8, mmc_spec_version, _: 125, 122;
    pub u8, read_block_length, _: 83, 80;
    pub u16, device_size, _: 73, 62;
    pub u8, device_size_multiplier, _: 49, 47;
    pub erase_single_block_enabled, _: 46;
    pub u8, erase_sector_size, _: 45, 39;
    pub u8, mmc_erase_group_size, _: 46, 42;
    pub u8, mmc_erase_group_multiplier, _: 41, 37;
    pub u8, write_block_length, _: 25, 22;
    pub permanent_write_protection, _: 13;
    pub temporary_write_protection, _: 12;
    pub u8, crc, _: 7, 1;
}

bitfield! {
    /// Card Specific Data of high/extended capacity SD cards (structure 1).
    pub struct CsdV2(u128);
    impl Debug;
    pub u8, structure, _: 127, 126;
    pub u8, read_block_length, _: 83, 80;
    pub u32, device_size, _: 69, 48;
    pub erase_single_block_enabled, _: 46;
    pub u8, erase_sector_size, _: 45, 39;
    pub permanent_write_protection, _: 13;
    pub temporary_write_protection, _: 12;
    pub u8, crc, _: 7, 1;
}

bitfield! {
    /// Card Identification register of SD cards.
    pub struct Cid(u128);
    impl Debug;
    pub u8, manufacturer_id, _: 127, 120;
    pub u16, oem_id, _: 119, 104;
    pub u64, product_name_raw, _: 103, 64;
    pub u8, product_revision, _: 63, 56;
    pub u32, serial_number, _: 55, 24;
    pub u16, manufacturing_date_raw, _: 19, 8;
    pub u8, crc, _: 7, 1;
}

/// Card Specific Data, decoded by structure version.
#[derive(Debug)]
pub enum Csd {
    V1(CsdV1),
    V2(CsdV2),
}

impl Csd {
    /// Decode a CSD by its structure version.
    ///
    /// MMC always uses the standard capacity layout, its structure field
    /// counts MMC specification versions.
    pub fn parse(data: RegisterData, card_type: CardType) -> Self {
        let raw = u128::from_be_bytes(data);
        if card_type != CardType::Mmc && raw >> 126 == 1 {
            Csd::V2(CsdV2(raw))
        } else {
            Csd::V1(CsdV1(raw))
        }
    }

    /// Card capacity in 512-byte sectors.
    pub fn sector_count(&self) -> u64 {
        match self {
            Csd::V1(csd) => {
                let shift = u32::from(csd.device_size_multiplier())
                    + u32::from(csd.read_block_length())
                    + 2;
                ((u64::from(csd.device_size()) + 1) << shift) / BLOCK_SIZE_U64
            }
            Csd::V2(csd) => (u64::from(csd.device_size()) + 1) << 10,
        }
    }

    /// Erase unit in 512-byte sectors, `mmc` picks the MMC layout.
    pub fn erase_block_sectors(&self, mmc: bool) -> u32 {
        match self {
            Csd::V1(csd) if mmc => {
                (u32::from(csd.mmc_erase_group_size()) + 1)
                    * (u32::from(csd.mmc_erase_group_multiplier()) + 1)
            }
            Csd::V1(csd) => {
                // Erase sector size is counted in write blocks.
                let unit = u32::from(csd.erase_sector_size()) + 1;
                let write_block = u32::from(csd.write_block_length());
                if write_block > 9 {
                    unit << (write_block - 9)
                } else {
                    unit
                }
            }
            Csd::V2(csd) => u32::from(csd.erase_sector_size()) + 1,
        }
    }

    /// Can single blocks be erased?
    pub fn erase_single_block_enabled(&self) -> bool {
        match self {
            Csd::V1(csd) => csd.erase_single_block_enabled(),
            Csd::V2(csd) => csd.erase_single_block_enabled(),
        }
    }

    /// Permanent or temporary write protection is set.
    pub fn write_protected(&self) -> bool {
        match self {
            Csd::V1(csd) => csd.permanent_write_protection() || csd.temporary_write_protection(),
            Csd::V2(csd) => csd.permanent_write_protection() || csd.temporary_write_protection(),
        }
    }
}

impl Cid {
    pub fn parse(data: RegisterData) -> Self {
        Cid(u128::from_be_bytes(data))
    }

    /// Five ASCII characters of the product name.
    pub fn product_name(&self) -> [u8; 5] {
        let raw = self.product_name_raw().to_be_bytes();
        [raw[3], raw[4], raw[5], raw[6], raw[7]]
    }

    /// Manufacturing (year, month).
    pub fn manufacturing_date(&self) -> (u16, u8) {
        let raw = self.manufacturing_date_raw();
        (2000 + (raw >> 4), (raw & 0x0F) as u8)
    }
}
