//! Card identity resolved by initialization.

use size::Size;

use crate::consts::{BLOCK_SIZE_U32, BLOCK_SIZE_U64};

/// Card generation.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardType {
    /// Not resolved, or initialization failed.
    Unknown,
    /// MMC version 3.
    Mmc,
    /// SD version 1.
    Sd1,
    /// SD version 2 or later.
    Sd2,
}

/// How a card interprets the address argument of data commands.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Argument is a byte offset (standard capacity and MMC).
    Byte,
    /// Argument is a block index (high/extended capacity).
    Block,
}

/// Card identity.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub card_type: CardType,
    pub addressing: Addressing,
    /// Capacity in 512-byte sectors, from the CSD.
    pub sectors: Option<u64>,
    /// Permanent or temporary write protection set in the CSD.
    pub write_protected: bool,
}

impl Identity {
    pub const UNKNOWN: Identity = Identity {
        card_type: CardType::Unknown,
        addressing: Addressing::Byte,
        sectors: None,
        write_protected: false,
    };

    pub fn new(card_type: CardType, addressing: Addressing) -> Self {
        Identity {
            card_type,
            addressing,
            sectors: None,
            write_protected: false,
        }
    }

    /// Initialization finished for this card.
    pub fn is_resolved(&self) -> bool {
        self.card_type != CardType::Unknown
    }

    /// Is the card an SD card (accepts application commands)?
    pub fn is_sd(&self) -> bool {
        matches!(self.card_type, CardType::Sd1 | CardType::Sd2)
    }

    /// High or extended capacity card.
    pub fn is_block_addressed(&self) -> bool {
        self.addressing == Addressing::Block
    }

    /// Translate a sector index into the argument of a data command.
    ///
    /// Returns `None` if the byte offset does not fit the argument.
    pub fn bus_address(&self, sector: u32) -> Option<u32> {
        match self.addressing {
            Addressing::Byte => sector.checked_mul(BLOCK_SIZE_U32),
            Addressing::Block => Some(sector),
        }
    }

    /// Card capacity.
    pub fn capacity(&self) -> Option<Size> {
        self.sectors
            .map(|sectors| Size::from_bytes(sectors * BLOCK_SIZE_U64))
    }
}

impl Default for Identity {
    fn default() -> Self {
        Identity::UNKNOWN
    }
}
