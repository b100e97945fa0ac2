//! Command layer: framing, issuing and answering SPI mode commands.

#[cfg(all(feature = "defmt-log", not(feature = "log")))]
use defmt::{trace, warn};
#[cfg(feature = "log")]
use log::{trace, warn};

use crate::{
    config::SdMmcSpiConfig,
    crc::crc7,
    link::Link,
    response::{R1Status, Response, ResponseShape},
    transport::Transport,
    Error,
};

/// Start bit (0) followed by the transmission bit (1).
const CMD_BASE: u8 = 0x40;
/// End bit of a frame.
const CMD_END: u8 = 0x01;

/// Commands (and application commands) used in SPI mode.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// CMD0 GO_IDLE_STATE - init card in spi mode if CS low.
    GoIdleState,
    /// CMD1 SEND_OP_COND - activate the initialization of an MMC.
    SendOpCond,
    /// CMD8 SEND_IF_COND - verify SD Memory Card interface operating condition.
    SendIfCond,
    /// CMD9 SEND_CSD - read the Card Specific Data (CSD register).
    SendCsd,
    /// CMD10 SEND_CID - read the Card Identification register.
    SendCid,
    /// CMD12 STOP_TRANSMISSION - end multiple block read sequence.
    StopTransmission,
    /// CMD13 SEND_STATUS - read the card status register.
    SendStatus,
    /// CMD16 SET_BLOCKLEN - set the block length of byte addressed cards.
    SetBlockLen,
    /// CMD17 READ_SINGLE_BLOCK - read a single data block from the card.
    ReadSingleBlock,
    /// CMD18 READ_MULTIPLE_BLOCK - read a multiple data blocks from the card.
    ReadMultipleBlock,
    /// CMD24 WRITE_BLOCK - write a single data block to the card.
    WriteBlock,
    /// CMD25 WRITE_MULTIPLE_BLOCK - write blocks of data until a stop token.
    WriteMultipleBlock,
    /// CMD32 ERASE_WR_BLK_START_ADDR - first block to erase.
    EraseStart,
    /// CMD33 ERASE_WR_BLK_END_ADDR - last block to erase.
    EraseEnd,
    /// CMD38 ERASE - erase the selected blocks.
    Erase,
    /// CMD55 APP_CMD - escape for application specific command.
    AppCmd,
    /// CMD58 READ_OCR - read the OCR register of a card.
    ReadOcr,
    /// CMD59 CRC_ON_OFF - enable or disable CRC checking.
    CrcOnOff,
    /// ACMD13 SD_STATUS - read the SD status register.
    SdStatus,
    /// ACMD23 SET_WR_BLK_ERASE_COUNT - pre-erase blocks before a multiple block write.
    SetWrBlkEraseCount,
    /// ACMD41 SD_SEND_OP_COND - sends host capacity support information and
    /// activates the card's initialization process.
    SdSendOpCond,
}

impl Command {
    /// Command index.
    pub fn index(self) -> u8 {
        match self {
            Command::GoIdleState => 0,
            Command::SendOpCond => 1,
            Command::SendIfCond => 8,
            Command::SendCsd => 9,
            Command::SendCid => 10,
            Command::StopTransmission => 12,
            Command::SendStatus | Command::SdStatus => 13,
            Command::SetBlockLen => 16,
            Command::ReadSingleBlock => 17,
            Command::ReadMultipleBlock => 18,
            Command::SetWrBlkEraseCount => 23,
            Command::WriteBlock => 24,
            Command::WriteMultipleBlock => 25,
            Command::EraseStart => 32,
            Command::EraseEnd => 33,
            Command::Erase => 38,
            Command::SdSendOpCond => 41,
            Command::AppCmd => 55,
            Command::ReadOcr => 58,
            Command::CrcOnOff => 59,
        }
    }

    /// Must be preceded by APP_CMD.
    pub fn is_app(self) -> bool {
        matches!(
            self,
            Command::SdStatus | Command::SetWrBlkEraseCount | Command::SdSendOpCond
        )
    }

    /// Response the card answers this command with.
    pub fn shape(self) -> ResponseShape {
        match self {
            Command::SendIfCond => ResponseShape::R7,
            Command::ReadOcr => ResponseShape::R3,
            Command::SendStatus | Command::SdStatus => ResponseShape::R2,
            Command::StopTransmission | Command::Erase => ResponseShape::R1b,
            _ => ResponseShape::R1,
        }
    }
}

/// 6-byte command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame([u8; 6]);

impl Frame {
    pub fn new(cmd: Command, arg: u32) -> Self {
        let [a3, a2, a1, a0] = arg.to_be_bytes();
        let mut buf = [CMD_BASE | cmd.index(), a3, a2, a1, a0, 0];
        buf[5] = (crc7(&buf[..5]) << 1) | CMD_END;

        Frame(buf)
    }

    pub fn bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl<T: Transport, Config: SdMmcSpiConfig> Link<T, Config> {
    /// Send command implementation.
    fn send_command_impl(&mut self, cmd: Command, arg: u32) -> Result<Response, Error<T::Error>> {
        if cmd != Command::StopTransmission {
            self.deselect()?;
            self.select()?;
            self.wait_ready(Config::READY_TIMEOUT_MS, Error::Timeout)?;
        }

        trace!("SD CMD{} arg 0x{:08X}", cmd.index(), arg);
        self.send_slice(Frame::new(cmd, arg).bytes())?;

        if cmd == Command::StopTransmission {
            // stuff byte
            self.receive()?;
        }

        let mut r1 = None;
        for _ in 0..Config::READ_R1_ATTEMPTS {
            let status = R1Status(self.receive()?);
            if status.is_valid() {
                r1 = Some(status);
                break;
            }
        }

        let r1 = match r1 {
            Some(r1) => r1,
            None => {
                self.mark_timed_out(true);
                return Err(Error::NoResponse(cmd.index()));
            }
        };
        self.mark_timed_out(false);

        let shape = cmd.shape();
        let mut extra = [0u8; 4];
        self.receive_slice(&mut extra[..shape.extra_bytes()])?;

        if shape == ResponseShape::R1b {
            let timeout = if cmd == Command::Erase {
                Config::ERASE_TIMEOUT_MS
            } else {
                Config::PROGRAM_TIMEOUT_MS
            };
            self.wait_ready(timeout, Error::ProgramTimeout)?;
        }

        Ok(Response::parse(shape, r1, &extra))
    }

    /// Send a command, preceded by APP_CMD for application commands.
    ///
    /// The response is returned as is; only a missing answer is an error.
    pub fn send_command(&mut self, cmd: Command, arg: u32) -> Result<Response, Error<T::Error>> {
        if cmd.is_app() {
            let response = self.send_command_impl(Command::AppCmd, 0x0000_0000)?;
            if !response.status().is_idle_or_ready() {
                return Ok(response);
            }
        }

        self.send_command_impl(cmd, arg)
    }

    /// Send a command and surface the error bits of its status.
    pub fn command(&mut self, cmd: Command, arg: u32) -> Result<Response, Error<T::Error>> {
        let response = self.send_command(cmd, arg)?;

        match response.status().error() {
            Some(error) => {
                warn!(
                    "SD CMD{} rejected: 0b{:08b}",
                    cmd.index(),
                    response.status().0
                );
                Err(error.into())
            }
            None => Ok(response),
        }
    }
}
