//! File open modes of a FAT filesystem layer, as a fixed lookup.

use bitflags::bitflags;

bitflags! {
    /// FatFs access mode bits.
    pub struct AccessFlags: u8 {
        const READ = 0x01;
        const WRITE = 0x02;
        const CREATE_NEW = 0x04;
        const CREATE_ALWAYS = 0x08;
        const OPEN_ALWAYS = 0x10;
        const OPEN_APPEND = 0x30;
    }
}

impl AccessFlags {
    /// Open the file only if it exists (no flag bits).
    pub const OPEN_EXISTING: AccessFlags = AccessFlags::empty();
}

/// How a file is opened.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// "r"
    Read,
    /// "r+"
    ReadUpdate,
    /// "w"
    Write,
    /// "w+"
    WriteUpdate,
    /// "a"
    Append,
    /// "a+"
    AppendUpdate,
    /// "wx"
    CreateNew,
    /// "w+x"
    CreateNewUpdate,
    /// Write, creating the file if missing.
    OpenAlways,
    /// Read and write, creating the file if missing.
    OpenAlwaysRead,
    /// Write an existing file.
    OpenExisting,
    /// Read and write an existing file.
    OpenExistingRead,
}

impl OpenMode {
    /// Parse an fopen-style mode string.
    pub fn parse(mode: &str) -> Option<Self> {
        Some(match mode {
            "r" | "rb" => OpenMode::Read,
            "r+" | "rb+" | "r+b" => OpenMode::ReadUpdate,
            "w" | "wb" => OpenMode::Write,
            "w+" | "wb+" | "w+b" => OpenMode::WriteUpdate,
            "a" | "ab" => OpenMode::Append,
            "a+" | "ab+" | "a+b" => OpenMode::AppendUpdate,
            "wx" | "wbx" => OpenMode::CreateNew,
            "w+x" | "wb+x" | "w+bx" => OpenMode::CreateNewUpdate,
            _ => return None,
        })
    }

    pub fn flags(self) -> AccessFlags {
        match self {
            OpenMode::Read => AccessFlags::READ,
            OpenMode::ReadUpdate => AccessFlags::READ | AccessFlags::WRITE,
            OpenMode::Write => AccessFlags::CREATE_ALWAYS | AccessFlags::WRITE,
            OpenMode::WriteUpdate => {
                AccessFlags::CREATE_ALWAYS | AccessFlags::WRITE | AccessFlags::READ
            }
            OpenMode::Append => AccessFlags::OPEN_APPEND | AccessFlags::WRITE,
            OpenMode::AppendUpdate => {
                AccessFlags::OPEN_APPEND | AccessFlags::WRITE | AccessFlags::READ
            }
            OpenMode::CreateNew => AccessFlags::CREATE_NEW | AccessFlags::WRITE,
            OpenMode::CreateNewUpdate => {
                AccessFlags::CREATE_NEW | AccessFlags::WRITE | AccessFlags::READ
            }
            OpenMode::OpenAlways => AccessFlags::OPEN_ALWAYS | AccessFlags::WRITE,
            OpenMode::OpenAlwaysRead => {
                AccessFlags::OPEN_ALWAYS | AccessFlags::WRITE | AccessFlags::READ
            }
            OpenMode::OpenExisting => AccessFlags::OPEN_EXISTING | AccessFlags::WRITE,
            OpenMode::OpenExistingRead => {
                AccessFlags::OPEN_EXISTING | AccessFlags::WRITE | AccessFlags::READ
            }
        }
    }
}

/// When a volume is mounted.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mount {
    /// On the first access to the volume.
    Later = 0,
    /// Immediately, to check the volume is usable.
    Now = 1,
}

impl From<Mount> for u8 {
    fn from(mount: Mount) -> u8 {
        mount as u8
    }
}
