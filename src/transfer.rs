//! Block transfer engine: data blocks, register reads and erase.
//!
//! Addresses here are bus addresses, already translated for the card's
//! addressing mode.

#[cfg(all(feature = "defmt-log", not(feature = "log")))]
use defmt::{debug, warn};
#[cfg(feature = "log")]
use log::{debug, warn};

use crate::{
    command::Command,
    config::SdMmcSpiConfig,
    consts::{tokens, BLOCK_SIZE},
    crc::crc16,
    link::Link,
    response::DataResponse,
    transport::Transport,
    Error,
};

impl<T: Transport, Config: SdMmcSpiConfig> Link<T, Config> {
    /// Receive one data block into `data`, verifying its CRC.
    pub fn read_data(&mut self, data: &mut [u8]) -> Result<(), Error<T::Error>> {
        let token = self.wait_for(|token| token != tokens::IDLE, Config::READ_TOKEN_TIMEOUT_MS)?;
        let token = match token {
            Some(token) => token,
            None => {
                warn!("SD data token timed out");
                self.mark_timed_out(true);
                return Err(Error::Timeout);
            }
        };

        if token != tokens::DATA_START_BLOCK {
            warn!("SD read error token: 0x{:02X}", token);
            return Err(if token & tokens::DATA_ERROR_MASK == 0
                && token & tokens::DATA_ERROR_OUT_OF_RANGE != 0
            {
                Error::AddressError
            } else {
                Error::ReadFault(token)
            });
        }

        self.receive_slice(data)?;

        let card_crc = u16::from_be_bytes([self.receive()?, self.receive()?]);
        let host_crc = crc16(data);

        if card_crc != host_crc {
            warn!(
                "SD data CRC mismatch, card: 0x{:04X}, host: 0x{:04X}",
                card_crc, host_crc
            );
            return Err(Error::DataCrcError);
        }

        Ok(())
    }

    /// Send one data block framed by `token`, returning the card's verdict.
    pub fn write_data(&mut self, token: u8, data: &[u8]) -> Result<(), Error<T::Error>> {
        self.wait_ready(Config::READY_TIMEOUT_MS, Error::Timeout)?;

        let host_crc = crc16(data);

        self.send(token)?;
        self.send_slice(data)?;
        self.send_slice(&host_crc.to_be_bytes())?;

        match DataResponse::from(self.receive()?) {
            DataResponse::Accepted => Ok(()),
            DataResponse::CrcRejected => {
                warn!("SD rejected data block CRC");
                Err(Error::DataCrcError)
            }
            DataResponse::WriteError => Err(Error::WriteFault),
            DataResponse::Unknown(token) => {
                warn!("SD unexpected data response: 0x{:02X}", token);
                Err(Error::WriteFault)
            }
        }
    }

    /// Wait for the card to finish programming.
    fn wait_programmed(&mut self) -> Result<(), Error<T::Error>> {
        self.wait_ready(Config::PROGRAM_TIMEOUT_MS, Error::ProgramTimeout)
    }

    /// Read a single block.
    pub fn read_block(&mut self, address: u32, data: &mut [u8]) -> Result<(), Error<T::Error>> {
        let result = self
            .command(Command::ReadSingleBlock, address)
            .and_then(|_| self.read_data(data));

        self.finish(result)
    }

    /// Read consecutive blocks, `data` holds a whole number of blocks.
    pub fn read_blocks(&mut self, address: u32, data: &mut [u8]) -> Result<(), Error<T::Error>> {
        debug!("SD read {} blocks at 0x{:08X}", data.len() / BLOCK_SIZE, address);

        let mut result = self.command(Command::ReadMultipleBlock, address).map(|_| ());
        if result.is_ok() {
            for chunk in data.chunks_mut(BLOCK_SIZE) {
                result = self.read_data(chunk);
                if result.is_err() {
                    break;
                }
            }
            let stop = self.command(Command::StopTransmission, 0x0000_0000);
            result = result.and(stop.map(|_| ()));
        }

        self.finish(result)
    }

    /// Write a single block and check that it was programmed.
    pub fn write_block(&mut self, address: u32, data: &[u8]) -> Result<(), Error<T::Error>> {
        let result = self
            .command(Command::WriteBlock, address)
            .and_then(|_| self.write_data(tokens::DATA_START_BLOCK, data))
            .and_then(|_| self.wait_programmed())
            .and_then(|_| self.check_programmed());

        self.finish(result)
    }

    /// Write consecutive blocks, `data` holds a whole number of blocks.
    ///
    /// `pre_erase` announces the block count to SD cards.
    pub fn write_blocks(
        &mut self,
        address: u32,
        data: &[u8],
        pre_erase: bool,
    ) -> Result<(), Error<T::Error>> {
        let count = data.len() / BLOCK_SIZE;
        debug!("SD write {} blocks at 0x{:08X}", count, address);

        let mut result = Ok(());
        if pre_erase {
            result = self
                .command(Command::SetWrBlkEraseCount, count as u32)
                .map(|_| ());
        }
        result = result.and_then(|_| {
            self.command(Command::WriteMultipleBlock, address)
                .map(|_| ())
        });

        if result.is_ok() {
            for block in data.chunks(BLOCK_SIZE) {
                result = self.write_data(tokens::WRITE_MULTIPLE, block);
                if result.is_err() {
                    break;
                }
            }
            let stop = self
                .wait_ready(Config::READY_TIMEOUT_MS, Error::Timeout)
                .and_then(|_| self.send(tokens::STOP_TRAN))
                .and_then(|_| self.receive().map(|_| ()))
                .and_then(|_| self.wait_programmed());
            result = result.and(stop);
        }

        let result = result.and_then(|_| self.check_programmed());
        self.finish(result)
    }

    /// Read a 16-byte register (CSD or CID).
    pub fn read_register(
        &mut self,
        cmd: Command,
        data: &mut [u8; 16],
    ) -> Result<(), Error<T::Error>> {
        let result = self
            .command(cmd, 0x0000_0000)
            .and_then(|_| self.read_data(data));

        self.finish(result)
    }

    /// Read the SD status (ACMD13), 64 bytes.
    pub fn read_sd_status(&mut self, data: &mut [u8; 64]) -> Result<(), Error<T::Error>> {
        let result = self
            .command(Command::SdStatus, 0x0000_0000)
            .and_then(|_| self.read_data(data));

        self.finish(result)
    }

    /// Erase blocks between two bus addresses, inclusive.
    pub fn erase(&mut self, start: u32, end: u32) -> Result<(), Error<T::Error>> {
        let result = self
            .command(Command::EraseStart, start)
            .and_then(|_| self.command(Command::EraseEnd, end))
            .and_then(|_| self.command(Command::Erase, 0x0000_0000))
            .map(|_| ());

        self.finish(result)
    }

    /// Wait until the card is idle, the sync request of a disk.
    pub fn sync(&mut self) -> Result<(), Error<T::Error>> {
        let result = self
            .select()
            .and_then(|_| self.wait_ready(Config::READY_TIMEOUT_MS, Error::Timeout));

        self.finish(result)
    }

    /// Programming status after a write: both SEND_STATUS bytes clear.
    fn check_programmed(&mut self) -> Result<(), Error<T::Error>> {
        if self.send_command(Command::SendStatus, 0x0000_0000)?.card_status_ok() {
            Ok(())
        } else {
            Err(Error::WriteFault)
        }
    }

    /// Deselect after an operation, the operation's own error wins.
    fn finish<R>(&mut self, result: Result<R, Error<T::Error>>) -> Result<R, Error<T::Error>> {
        let deselect = self.deselect();
        let value = result?;
        deselect.map(|_| value)
    }
}
