//! Response tokens returned by the card.
//!
//! Every command response starts with an R1 status byte. R1b adds a busy
//! period, R2 one more status byte, R3 (OCR) and R7 (interface condition)
//! four more bytes. Data writes are answered with a data response token.

use bitfield::bitfield;

use crate::consts::{args, tokens};

bitfield! {
    /// R1 response bitset.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct R1Status(u8);
    impl Debug;
    pub in_idle_state, _: 0;
    pub erase_reset, _: 1;
    pub illegal_command, _: 2;
    pub command_crc_error, _: 3;
    pub erase_sequence_error, _: 4;
    pub address_error, _: 5;
    pub parameter_error, _: 6;
    pub start_bit, _: 7;
}

bitfield! {
    /// Operation Conditions Register, carried by R3.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Ocr(u32);
    impl Debug;
    pub power_up_done, _: 31;
    pub high_capacity, _: 30;
    pub u16, voltage_window, _: 23, 15;
}

/// Error bit reported in an R1 status.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusError {
    IllegalCommand,
    CrcError,
    EraseSequenceError,
    AddressError,
    ParameterError,
}

impl R1Status {
    /// Ready state, no error.
    pub const READY_STATE: R1Status = R1Status(0x00);
    /// Idle state, no error.
    pub const IN_IDLE_STATE: R1Status = R1Status(0x01);
    /// Idle state with illegal command, answer of legacy cards to SEND_IF_COND.
    pub const IN_IDLE_AND_ILLEGAL: R1Status = R1Status(0x05);

    /// Is the byte a response (start bit clear)?
    pub fn is_valid(&self) -> bool {
        !self.start_bit()
    }

    /// Returns the first error bit set, lowest bit first.
    pub fn error(&self) -> Option<StatusError> {
        if self.illegal_command() {
            Some(StatusError::IllegalCommand)
        } else if self.command_crc_error() {
            Some(StatusError::CrcError)
        } else if self.erase_sequence_error() {
            Some(StatusError::EraseSequenceError)
        } else if self.address_error() {
            Some(StatusError::AddressError)
        } else if self.parameter_error() {
            Some(StatusError::ParameterError)
        } else {
            None
        }
    }

    /// Card answered but is still initializing (or ready), without errors.
    pub fn is_idle_or_ready(&self) -> bool {
        self.0 <= Self::IN_IDLE_STATE.0
    }
}

/// Shape of the response a command is answered with.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    R1,
    R1b,
    R2,
    R3,
    R7,
}

impl ResponseShape {
    /// Bytes following the R1 byte.
    pub fn extra_bytes(self) -> usize {
        match self {
            ResponseShape::R1 | ResponseShape::R1b => 0,
            ResponseShape::R2 => 1,
            ResponseShape::R3 | ResponseShape::R7 => 4,
        }
    }
}

/// Parsed command response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// R1.
    Status(R1Status),
    /// R1b, the busy period is over.
    Busy(R1Status),
    /// R2: R1 and the second card status byte.
    Card(R1Status, u8),
    /// R3 or R7: R1 and a 32-bit payload.
    Extended(R1Status, u32),
}

impl Response {
    pub(crate) fn parse(shape: ResponseShape, r1: R1Status, extra: &[u8]) -> Self {
        match shape {
            ResponseShape::R1 => Response::Status(r1),
            ResponseShape::R1b => Response::Busy(r1),
            ResponseShape::R2 => Response::Card(r1, extra[0]),
            ResponseShape::R3 | ResponseShape::R7 => Response::Extended(
                r1,
                u32::from_be_bytes([extra[0], extra[1], extra[2], extra[3]]),
            ),
        }
    }

    /// The leading R1 status.
    pub fn status(&self) -> R1Status {
        match *self {
            Response::Status(r1)
            | Response::Busy(r1)
            | Response::Card(r1, _)
            | Response::Extended(r1, _) => r1,
        }
    }

    /// The R3/R7 payload.
    pub fn payload(&self) -> Option<u32> {
        match *self {
            Response::Extended(_, payload) => Some(payload),
            _ => None,
        }
    }

    /// The OCR carried by R3.
    pub fn ocr(&self) -> Option<Ocr> {
        self.payload().map(Ocr)
    }

    /// Did R7 echo the supplied voltage and check pattern?
    pub fn if_cond_echoed(&self) -> bool {
        self.payload().map_or(false, |payload| {
            let [_, _, voltage, pattern] = payload.to_be_bytes();
            voltage & 0x0F == args::IF_COND_VOLTAGE && pattern == args::IF_COND_PATTERN
        })
    }

    /// Both status bytes of R2 are clear.
    pub fn card_status_ok(&self) -> bool {
        match *self {
            Response::Card(r1, status) => r1 == R1Status::READY_STATE && status == 0,
            _ => self.status() == R1Status::READY_STATE,
        }
    }
}

/// Data response token after a written block.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataResponse {
    Accepted,
    CrcRejected,
    WriteError,
    Unknown(u8),
}

impl From<u8> for DataResponse {
    fn from(token: u8) -> Self {
        match token & tokens::DATA_RES_MASK {
            tokens::DATA_RES_ACCEPTED => DataResponse::Accepted,
            tokens::DATA_RES_CRC_ERROR => DataResponse::CrcRejected,
            tokens::DATA_RES_WRITE_ERROR => DataResponse::WriteError,
            _ => DataResponse::Unknown(token),
        }
    }
}
