//! SD/MMC Library written in Embedded Rust, that inspired by [embedded-sdmmc](https://crates.io/crates/embedded-sdmmc).
//!
//! This crate is intended to allow you to init/read/write SD/MMC devices by SPI bus.
//! It detects MMC, SD version 1 and SD version 2 cards (byte and block
//! addressed) and serves 512-byte sectors, directly through [`SdMmcSpi`] or
//! through the [`DiskioDevice`] contract of a FAT filesystem layer.
//!
//! ```ignore
//! let transport = SpiTransport::new(spi, cs.into_active_low_switch(), clock);
//! let mut sd = SdMmcSpi::<_, DefaultSdMmcSpiConfig>::new(transport);
//! sd.init()?;
//!
//! let mut sector = [0u8; BLOCK_SIZE];
//! sd.read_sector(0, &mut sector)?;
//! ```
//!
//! ## Features
//!
//! * `log` (default): log messages through the `log` facade.
//! * `defmt-log`: by turning off the default features and enabling the `defmt-log` feature you can
//! configure this crate to log messages over defmt instead.
//!
//! Make sure that either the `log` feature or the `defmt-log` feature is enabled.

#![cfg_attr(not(test), no_std)]

#[cfg(not(any(feature = "log", feature = "defmt-log")))]
compile_error!("either the `log` or the `defmt-log` feature must be enabled");

mod card;
mod command;
mod config;
mod consts;
mod crc;
mod csd;
mod init;
mod link;
pub mod mode;
mod response;
mod transfer;
mod transport;

#[cfg(test)]
mod testutils;

pub use crate::{
    card::{Addressing, CardType, Identity},
    command::{Command, Frame},
    config::{DefaultSdMmcSpiConfig, SdMmcSpiConfig},
    consts::BLOCK_SIZE,
    csd::{Cid, Csd, CsdV1, CsdV2, RegisterData},
    init::{InitState, Initializer},
    link::Link,
    response::{DataResponse, Ocr, R1Status, Response, ResponseShape, StatusError},
    transport::{BusError, Clock, ClockSwitch, ClockTier, Millis, SpiTransport, Transport},
};
pub use diskio::{
    BlockSize, DiskioDevice, Error as DiskioError, IoctlCmd, Lba, Status, StatusFlag,
};

#[cfg(all(feature = "defmt-log", not(feature = "log")))]
use defmt::{error, info, warn};
#[cfg(feature = "log")]
use log::{error, info, warn};

use core::cell::RefCell;

/// [`SdMmcSpi`] result error.
///
/// `E` - transport error type.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
    /// Error from the bus transport.
    Bus(E),
    /// No response to this command.
    NoResponse(u8),
    /// The card does not know the command.
    IllegalCommand,
    /// The card detected a CRC mismatch in the command frame.
    CrcError,
    /// Erase commands out of order.
    EraseSequenceError,
    /// Misaligned or out of range address.
    AddressError,
    /// Argument out of the allowed range for the command.
    ParameterError,
    /// The card does not support the host voltage.
    VoltageMismatch,
    /// Failed to enable CRC checking on the card.
    CantEnableCrc,
    /// Response inconsistent with the expected state.
    UnexpectedResponse(u8),
    /// CRC mismatch of a data block.
    DataCrcError,
    /// The card sent an error token instead of data.
    ReadFault(u8),
    /// Bounded wait exceeded.
    Timeout,
    /// The card did not finish programming in time.
    ProgramTimeout,
    /// The card failed to program a block.
    WriteFault,
    /// Operation attempted before successful initialization.
    NotReady,
    /// Sector range beyond the card capacity.
    OutOfRange,
    /// The CSD marks the card write protected.
    WriteProtected,
    /// Not supported by this card.
    Unsupported,
}

impl<E> From<StatusError> for Error<E> {
    fn from(error: StatusError) -> Self {
        match error {
            StatusError::IllegalCommand => Error::IllegalCommand,
            StatusError::CrcError => Error::CrcError,
            StatusError::EraseSequenceError => Error::EraseSequenceError,
            StatusError::AddressError => Error::AddressError,
            StatusError::ParameterError => Error::ParameterError,
        }
    }
}

/// Error type alias.
type ErrorFor<T> = Error<<T as Transport>::Error>;

/// SD/MMC card driver.
///
/// `T` - bus transport.
/// `Config` - Config implementation of driver config trait.
pub struct SdMmcSpi<T: Transport, Config: SdMmcSpiConfig = DefaultSdMmcSpiConfig> {
    link: RefCell<Link<T, Config>>,
    status: Status,
    identity: Identity,
}

impl<T: Transport, Config: SdMmcSpiConfig> SdMmcSpi<T, Config> {
    /// Creates a new [`SdMmcSpi<T, Config>`], the card is not touched.
    pub fn new(transport: T) -> Self {
        SdMmcSpi {
            link: RefCell::new(Link::new(transport)),
            status: StatusFlag::NotInitialized.into(),
            identity: Identity::UNKNOWN,
        }
    }

    /// Run the initialization handshake.
    ///
    /// Always starts from a software reset, so calling it again on the same
    /// card resolves the same identity.
    pub fn init(&mut self) -> Result<Identity, ErrorFor<T>> {
        let result = Initializer::new(self.link.get_mut()).run();

        match result {
            Ok(identity) => {
                self.identity = identity;
                self.status = if identity.write_protected {
                    StatusFlag::WriteProtected.into()
                } else {
                    Status::default()
                };
            }
            Err(_) => {
                error!("Failed to initialize SD");
                self.identity = Identity::UNKNOWN;
                self.status = StatusFlag::ErrorOccured | StatusFlag::NotInitialized;
            }
        }

        result
    }

    /// Forget the card, the next operation needs [`SdMmcSpi::init`].
    pub fn deinit(&mut self) {
        info!("SD reset invoked");
        self.identity = Identity::UNKNOWN;
        self.status = StatusFlag::NotInitialized.into();
    }

    /// Release the transport.
    pub fn release(self) -> T {
        self.link.into_inner().release()
    }

    /// Identity resolved by the last initialization.
    pub fn card_type(&self) -> Identity {
        self.identity
    }

    /// The card is initialized and releases the response line.
    pub fn ready(&self) -> bool {
        if !self.identity.is_resolved() {
            return false;
        }

        let mut link = self.link.borrow_mut();
        let probe = link
            .select()
            .and_then(|_| link.probe_ready(Config::READY_PROBE_MS));
        let deselect = link.deselect();

        matches!((probe, deselect), (Ok(true), Ok(())))
    }

    /// [`SdMmcSpi::ready`] and the card answered the last command.
    pub fn present(&self) -> bool {
        self.ready() && !self.link.borrow().timed_out()
    }

    /// Capacity in sectors.
    pub fn sector_count(&self) -> Option<u64> {
        self.identity.sectors
    }

    pub fn sector_size(&self) -> usize {
        BLOCK_SIZE
    }

    /// Erase unit in sectors.
    pub fn erase_block_size(&self) -> Result<u32, ErrorFor<T>> {
        let csd = self.read_csd()?;
        Ok(csd.erase_block_sectors(self.identity.card_type == CardType::Mmc))
    }

    /// Read one sector.
    pub fn read_sector(&self, sector: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), ErrorFor<T>> {
        let address = self.bus_address(sector, 1)?;
        self.link.borrow_mut().read_block(address, buf)
    }

    /// Read consecutive sectors, `buf` holds a whole number of sectors.
    pub fn read_sectors(&self, sector: u32, buf: &mut [u8]) -> Result<(), ErrorFor<T>> {
        let count = Self::block_count(buf.len())?;
        let address = self.bus_address(sector, count)?;

        let mut link = self.link.borrow_mut();
        if count == 1 {
            link.read_block(address, buf)
        } else {
            link.read_blocks(address, buf)
        }
    }

    /// Write one sector.
    pub fn write_sector(&self, sector: u32, buf: &[u8; BLOCK_SIZE]) -> Result<(), ErrorFor<T>> {
        self.check_writable()?;
        let address = self.bus_address(sector, 1)?;
        self.link.borrow_mut().write_block(address, buf)
    }

    /// Write consecutive sectors, `buf` holds a whole number of sectors.
    pub fn write_sectors(&self, sector: u32, buf: &[u8]) -> Result<(), ErrorFor<T>> {
        self.check_writable()?;
        let count = Self::block_count(buf.len())?;
        let address = self.bus_address(sector, count)?;

        let mut link = self.link.borrow_mut();
        if count == 1 {
            link.write_block(address, buf)
        } else {
            link.write_blocks(address, buf, self.identity.is_sd())
        }
    }

    /// Wait until the card finished internal work.
    pub fn sync(&self) -> Result<(), ErrorFor<T>> {
        self.check_ready()?;
        self.link.borrow_mut().sync()
    }

    /// Erase sectors `first..=last`.
    pub fn erase(&self, first: u32, last: u32) -> Result<(), ErrorFor<T>> {
        self.check_writable()?;
        if !self.identity.is_sd() {
            return Err(Error::Unsupported);
        }
        if first > last {
            return Err(Error::OutOfRange);
        }

        let start = self.bus_address(first, 1)?;
        let end = self.bus_address(last, 1)?;
        self.link.borrow_mut().erase(start, end)
    }

    /// Read the Card Specific Data register.
    pub fn read_csd(&self) -> Result<Csd, ErrorFor<T>> {
        let mut data = RegisterData::default();
        self.read_register(Command::SendCsd, &mut data)?;
        Ok(Csd::parse(data, self.identity.card_type))
    }

    /// Read the Card Identification register of an SD card.
    pub fn read_cid(&self) -> Result<Cid, ErrorFor<T>> {
        self.check_ready()?;
        if !self.identity.is_sd() {
            return Err(Error::Unsupported);
        }

        let mut data = RegisterData::default();
        self.read_register(Command::SendCid, &mut data)?;
        Ok(Cid::parse(data))
    }

    /// Read the Operating Conditions Register.
    pub fn read_ocr(&self) -> Result<Ocr, ErrorFor<T>> {
        self.check_ready()?;

        let mut link = self.link.borrow_mut();
        let response = link.command(Command::ReadOcr, 0x0000_0000);
        let deselect = link.deselect();
        let response = response?;
        deselect?;

        response
            .ocr()
            .ok_or(Error::UnexpectedResponse(response.status().0))
    }

    /// Read the two SEND_STATUS bytes, R1 in the high byte.
    pub fn card_status(&self) -> Result<u16, ErrorFor<T>> {
        self.check_ready()?;

        let mut link = self.link.borrow_mut();
        let response = link.send_command(Command::SendStatus, 0x0000_0000);
        let deselect = link.deselect();
        let response = response?;
        deselect?;

        match response {
            Response::Card(r1, status) => Ok(u16::from_be_bytes([r1.0, status])),
            other => Ok(u16::from(other.status().0) << 8),
        }
    }

    /// Read the 64-byte SD status of an SD card.
    pub fn read_sd_status(&self) -> Result<[u8; 64], ErrorFor<T>> {
        self.check_ready()?;
        if !self.identity.is_sd() {
            return Err(Error::Unsupported);
        }

        let mut data = [0u8; 64];
        self.link.borrow_mut().read_sd_status(&mut data)?;
        Ok(data)
    }

    fn read_register(&self, cmd: Command, data: &mut RegisterData) -> Result<(), ErrorFor<T>> {
        self.check_ready()?;
        self.link.borrow_mut().read_register(cmd, data)
    }

    fn check_ready(&self) -> Result<(), ErrorFor<T>> {
        if self.identity.is_resolved() {
            Ok(())
        } else {
            Err(Error::NotReady)
        }
    }

    fn check_writable(&self) -> Result<(), ErrorFor<T>> {
        self.check_ready()?;
        if self.identity.write_protected {
            warn!("SD is write protected");
            Err(Error::WriteProtected)
        } else {
            Ok(())
        }
    }

    /// Get count of blocks in buffer.
    fn block_count(buf_len: usize) -> Result<usize, ErrorFor<T>> {
        if buf_len == 0 || buf_len % BLOCK_SIZE != 0 {
            warn!(
                "SD invalid buffer, length: {}, block size: {}",
                buf_len, BLOCK_SIZE
            );
            Err(Error::OutOfRange)
        } else {
            Ok(buf_len / BLOCK_SIZE)
        }
    }

    /// Bus address of `sector`, with `count` sectors checked against the capacity.
    fn bus_address(&self, sector: u32, count: usize) -> Result<u32, ErrorFor<T>> {
        self.check_ready()?;

        let end = u64::from(sector) + count as u64;
        if self.identity.sectors.map_or(false, |sectors| end > sectors) {
            return Err(Error::OutOfRange);
        }
        let last = u32::try_from(end - 1).map_err(|_| Error::OutOfRange)?;
        self.identity.bus_address(last).ok_or(Error::OutOfRange)?;

        self.identity.bus_address(sector).ok_or(Error::OutOfRange)
    }

    /// Validate buffer for read/write.
    fn validate_buffer_len(buf_len: usize) -> Result<(), DiskioError<ErrorFor<T>>> {
        if buf_len == 0 || buf_len % BLOCK_SIZE != 0 {
            error!(
                "SD invalid buffer, length: {}, block size: {}",
                buf_len, BLOCK_SIZE
            );
            Err(DiskioError::InvalidArgument)
        } else {
            Ok(())
        }
    }

    /// Validate initialized.
    fn validate_initialized(&self) -> Result<(), DiskioError<ErrorFor<T>>> {
        if self.status.contains(StatusFlag::NotInitialized) {
            Err(DiskioError::NotInitialized)
        } else {
            Ok(())
        }
    }

    /// Sector index of a disk address.
    fn convert_lba(lba: Lba) -> Result<u32, DiskioError<ErrorFor<T>>> {
        u32::try_from(lba).map_err(|_| DiskioError::InvalidArgument)
    }
}

impl<T: Transport, Config: SdMmcSpiConfig> DiskioDevice for SdMmcSpi<T, Config> {
    type HardwareError = ErrorFor<T>;

    fn status(&self) -> Status {
        self.status
    }

    fn reset(&mut self) {
        self.deinit();
    }

    fn initialize(&mut self) -> Result<(), DiskioError<Self::HardwareError>> {
        self.init().map(|_| ()).map_err(DiskioError::Hardware)
    }

    fn read(&self, buf: &mut [u8], lba: Lba) -> Result<(), DiskioError<Self::HardwareError>> {
        Self::validate_buffer_len(buf.len())?;
        self.validate_initialized()?;

        self.read_sectors(Self::convert_lba(lba)?, buf)
            .map_err(DiskioError::Hardware)
    }

    fn write(&self, buf: &[u8], lba: Lba) -> Result<(), DiskioError<Self::HardwareError>> {
        Self::validate_buffer_len(buf.len())?;
        self.validate_initialized()?;
        if self.status.contains(StatusFlag::WriteProtected) {
            return Err(DiskioError::WriteProtected);
        }

        self.write_sectors(Self::convert_lba(lba)?, buf)
            .map_err(DiskioError::Hardware)
    }

    fn ioctl(&self, cmd: IoctlCmd) -> Result<(), DiskioError<Self::HardwareError>> {
        self.validate_initialized()?;

        match cmd {
            IoctlCmd::CtrlSync => self.sync().map_err(DiskioError::Hardware),
            IoctlCmd::GetSectorCount(count) => {
                *count = self.sector_count().ok_or(DiskioError::NotInitialized)?;
                Ok(())
            }
            IoctlCmd::GetSectorSize(size) => {
                *size = BLOCK_SIZE;
                Ok(())
            }
            IoctlCmd::GetBlockSize(block_size) => {
                let sectors = self.erase_block_size().map_err(DiskioError::Hardware)?;
                *block_size = sectors as BlockSize;
                Ok(())
            }
            IoctlCmd::CtrlTrim(&(start, end)) => {
                let (first, last) = (Self::convert_lba(start)?, Self::convert_lba(end)?);
                match self.erase(first, last) {
                    Err(Error::Unsupported) => Err(DiskioError::NotSupported),
                    Err(Error::WriteProtected) => Err(DiskioError::WriteProtected),
                    Err(Error::OutOfRange) => Err(DiskioError::InvalidArgument),
                    result => result.map_err(DiskioError::Hardware),
                }
            }
        }
    }
}
