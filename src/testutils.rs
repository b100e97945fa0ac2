//! Utilities to support tests.
//!
//! [`FakeCard`] simulates an SD/MMC card in SPI mode at the byte level. Its
//! clock advances one millisecond per exchanged byte, so timeouts are
//! measured in exchanges.

use std::collections::{HashMap, VecDeque};

use crate::{
    consts::{tokens, BLOCK_SIZE},
    crc::{crc16, crc7},
    card::CardType,
    csd::{tests as registers, Csd, RegisterData},
    transport::{ClockTier, Millis, Transport},
};

/// Deselected clocks a card needs before it answers (74 rounded up to bytes).
const POWER_UP_BYTES: u32 = 10;
/// Busy cycles after a block is programmed.
const DEFAULT_PROGRAM_BUSY: u32 = 3;
/// Idle answers to the op cond command before the card is ready.
const DEFAULT_INIT_POLLS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Sd2 { block: bool },
    Sd1,
    Mmc,
    Absent,
}

impl Kind {
    fn card_type(self) -> CardType {
        match self {
            Kind::Sd2 { .. } => CardType::Sd2,
            Kind::Sd1 => CardType::Sd1,
            Kind::Mmc => CardType::Mmc,
            Kind::Absent => CardType::Unknown,
        }
    }
}

#[derive(Debug)]
enum Phase {
    Command,
    WriteSingle(u32),
    WriteMulti(u32),
    Receiving { sector: u32, multi: bool, buf: Vec<u8> },
    ReadMulti(u32),
}

#[derive(Debug)]
pub struct FakeCard {
    kind: Kind,
    csd: RegisterData,
    sectors: u64,
    selected: bool,
    powered: bool,
    idle: bool,
    app_pending: bool,
    crc_enabled: bool,
    tier: ClockTier,
    exchanges: u32,
    deselected_clocks: u32,
    clocks_before_first_command: Option<u32>,
    out: VecDeque<u8>,
    frame: Vec<u8>,
    phase: Phase,
    busy: u32,
    hold_busy: bool,
    init_polls: u32,
    polls_left: u32,
    program_busy: u32,
    erase_range: (u32, u32),
    rejected: Vec<u8>,
    refuse_voltage: bool,
    withhold_start_token: bool,
    corrupt_next_frame: bool,
    corrupt_next_write: bool,
    fail_writes: bool,
    memory: HashMap<u32, ([u8; BLOCK_SIZE], u16)>,
    commands: Vec<(u8, u32)>,
}

impl FakeCard {
    fn new(kind: Kind, csd: RegisterData) -> Self {
        FakeCard {
            kind,
            csd,
            sectors: Csd::parse(csd, kind.card_type()).sector_count(),
            selected: false,
            powered: false,
            idle: true,
            app_pending: false,
            crc_enabled: false,
            tier: ClockTier::Slow,
            exchanges: 0,
            deselected_clocks: 0,
            clocks_before_first_command: None,
            out: VecDeque::new(),
            frame: Vec::new(),
            phase: Phase::Command,
            busy: 0,
            hold_busy: false,
            init_polls: DEFAULT_INIT_POLLS,
            polls_left: DEFAULT_INIT_POLLS,
            program_busy: DEFAULT_PROGRAM_BUSY,
            erase_range: (u32::MAX, 0),
            rejected: Vec::new(),
            refuse_voltage: false,
            withhold_start_token: false,
            corrupt_next_frame: false,
            corrupt_next_write: false,
            fail_writes: false,
            memory: HashMap::new(),
            commands: Vec::new(),
        }
    }

    /// SD version 2, block addressed (SDHC), 512 MiB.
    pub fn sdhc() -> Self {
        Self::new(Kind::Sd2 { block: true }, registers::csd_v2(1 << 20))
    }

    /// SD version 2, byte addressed (SDSC), 1 GiB.
    pub fn sd2_byte() -> Self {
        Self::new(Kind::Sd2 { block: false }, registers::csd_v1(4095, 7, 9))
    }

    /// SD version 1, 512 MiB.
    pub fn sd1() -> Self {
        Self::new(Kind::Sd1, registers::csd_v1(2047, 7, 9))
    }

    /// MMC version 3, 256 MiB.
    pub fn mmc() -> Self {
        let mut csd = registers::csd_v1(1023, 7, 9);
        csd[0] |= 0x80;
        Self::new(Kind::Mmc, csd)
    }

    /// MMC version 2.x with a structure 1 CSD, 1 GiB.
    pub fn mmc_v2() -> Self {
        let mut csd = registers::csd_v1(4095, 7, 9);
        csd[0] |= 0x40;
        Self::new(Kind::Mmc, csd)
    }

    /// No card in the slot.
    pub fn absent() -> Self {
        Self::new(Kind::Absent, registers::csd_v2(1 << 20))
    }

    /// Set the temporary write protection bit of the CSD.
    pub fn write_protect(&mut self) {
        self.csd[14] |= 0x10;
    }

    /// Skip the power up clocks.
    pub fn power_up(&mut self) {
        self.powered = true;
    }

    /// Skip the whole initialization.
    pub fn force_ready(&mut self) {
        self.powered = true;
        self.idle = false;
    }

    /// Pull the card out of the slot.
    pub fn remove(&mut self) {
        self.kind = Kind::Absent;
        self.powered = false;
    }

    pub fn enable_crc(&mut self) {
        self.crc_enabled = true;
    }

    /// Keep the response line low while selected.
    pub fn hold_busy(&mut self) {
        self.hold_busy = true;
    }

    /// Answer `index` with an illegal command status.
    pub fn reject_command(&mut self, index: u8) {
        self.rejected.push(index);
    }

    /// Answer SEND_IF_COND without accepting the voltage.
    pub fn refuse_voltage(&mut self) {
        self.refuse_voltage = true;
    }

    /// Op cond answers that keep the idle bit set.
    pub fn set_init_polls(&mut self, polls: u32) {
        self.init_polls = polls;
        self.polls_left = polls;
    }

    /// Busy cycles after each programmed block.
    pub fn set_program_busy(&mut self, cycles: u32) {
        self.program_busy = cycles;
    }

    /// Accept read commands but never send the start token.
    pub fn withhold_start_token(&mut self) {
        self.withhold_start_token = true;
    }

    /// Garble the CRC of the next command frame.
    pub fn corrupt_next_frame(&mut self) {
        self.corrupt_next_frame = true;
    }

    /// Garble one byte of the next received data block.
    pub fn corrupt_next_write(&mut self) {
        self.corrupt_next_write = true;
    }

    /// Answer written blocks with a write error.
    pub fn fail_writes(&mut self) {
        self.fail_writes = true;
    }

    /// Flip a stored byte, keeping the CRC it was written with.
    pub fn corrupt_stored(&mut self, sector: u32, offset: usize) {
        let entry = self
            .memory
            .entry(sector)
            .or_insert_with(|| ([0; BLOCK_SIZE], crc16(&[0; BLOCK_SIZE])));
        entry.0[offset] ^= 0xFF;
    }

    /// Stored contents of a written sector.
    pub fn stored(&self, sector: u32) -> Option<[u8; BLOCK_SIZE]> {
        self.memory.get(&sector).map(|(data, _)| *data)
    }

    pub fn sectors(&self) -> u64 {
        self.sectors
    }

    pub fn exchanges(&self) -> u32 {
        self.exchanges
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn crc_enabled(&self) -> bool {
        self.crc_enabled
    }

    pub fn clock_tier(&self) -> ClockTier {
        self.tier
    }

    /// Accepted command frames as (index, argument).
    pub fn commands(&self) -> &[(u8, u32)] {
        &self.commands
    }

    pub fn clocks_before_first_command(&self) -> u32 {
        self.clocks_before_first_command.unwrap_or(self.deselected_clocks)
    }

    fn status(&self, flags: u8) -> u8 {
        u8::from(self.idle) | flags
    }

    fn respond(&mut self, bytes: &[u8]) {
        self.out.push_back(tokens::IDLE);
        self.out.extend(bytes);
    }

    fn push_block(&mut self, data: &[u8], crc: u16) {
        self.out.push_back(tokens::IDLE);
        self.out.push_back(tokens::DATA_START_BLOCK);
        self.out.extend(data);
        self.out.extend(crc.to_be_bytes());
    }

    fn push_sector(&mut self, sector: u32) {
        if u64::from(sector) >= self.sectors {
            self.out.push_back(tokens::DATA_ERROR_OUT_OF_RANGE);
            self.phase = Phase::Command;
            return;
        }
        let (data, crc) = self
            .memory
            .get(&sector)
            .copied()
            .unwrap_or_else(|| ([0; BLOCK_SIZE], crc16(&[0; BLOCK_SIZE])));
        self.push_block(&data, crc);
    }

    fn sector_of(&self, arg: u32) -> Option<u32> {
        match self.kind {
            Kind::Sd2 { block: true } => Some(arg),
            _ if arg % BLOCK_SIZE as u32 == 0 => Some(arg / BLOCK_SIZE as u32),
            _ => None,
        }
    }

    fn poll_op_cond(&mut self) {
        if self.polls_left > 0 {
            self.polls_left -= 1;
        } else {
            self.idle = false;
        }
        let status = self.status(0);
        self.respond(&[status]);
    }

    fn handle_frame(&mut self) {
        let frame = core::mem::take(&mut self.frame);
        let index = frame[0] & 0x3F;
        let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);

        let mut crc_ok = (crc7(&frame[..5]) << 1) | 0x01 == frame[5];
        if self.corrupt_next_frame {
            self.corrupt_next_frame = false;
            crc_ok = false;
        }

        if !self.powered {
            return;
        }
        if self.clocks_before_first_command.is_none() {
            self.clocks_before_first_command = Some(self.deselected_clocks);
        }

        self.out.clear();
        if !crc_ok && (self.crc_enabled || index == 0 || index == 8) {
            let status = self.status(0x08);
            self.respond(&[status]);
            return;
        }

        self.commands.push((index, arg));
        let app = core::mem::take(&mut self.app_pending);

        if index == 0 {
            self.idle = true;
            self.crc_enabled = false;
            self.polls_left = self.init_polls;
            self.phase = Phase::Command;
        }
        if self.rejected.contains(&index) {
            let status = self.status(0x04);
            self.respond(&[status]);
            return;
        }

        let ok = self.status(0);
        let illegal = self.status(0x04);
        match (app, index) {
            (_, 0) => self.respond(&[ok]),
            (_, 55) if self.kind == Kind::Mmc => self.respond(&[illegal]),
            (_, 55) => {
                self.app_pending = true;
                self.respond(&[ok]);
            }
            (true, 41) => self.poll_op_cond(),
            (false, 1) if self.kind == Kind::Mmc => self.poll_op_cond(),
            (_, 8) => match self.kind {
                Kind::Sd2 { .. } => {
                    let voltage = if self.refuse_voltage {
                        0
                    } else {
                        (arg >> 8) as u8 & 0x0F
                    };
                    self.respond(&[ok, 0x00, 0x00, voltage, arg as u8]);
                }
                _ => self.respond(&[illegal]),
            },
            (_, 58) => {
                let mut ocr0 = 0x00;
                if !self.idle {
                    ocr0 |= 0x80;
                    if self.kind == (Kind::Sd2 { block: true }) {
                        ocr0 |= 0x40;
                    }
                }
                self.respond(&[ok, ocr0, 0xFF, 0x80, 0x00]);
            }
            (_, 59) => {
                self.crc_enabled = arg & 0x01 != 0;
                self.respond(&[ok]);
            }
            (_, 16) => {
                let status = if arg as usize == BLOCK_SIZE { ok } else { self.status(0x40) };
                self.respond(&[status]);
            }
            (_, 9) => {
                self.respond(&[ok]);
                let csd = self.csd;
                self.push_block(&csd, crc16(&csd));
            }
            (_, 10) => {
                self.respond(&[ok]);
                let cid = *b"\x03SDSU08G\x80\xDE\xAD\xBE\xEF\x01\x2A\x01";
                self.push_block(&cid, crc16(&cid));
            }
            (true, 13) => {
                self.respond(&[ok, 0x00]);
                let status = [0u8; 64];
                self.push_block(&status, crc16(&status));
            }
            (false, 13) => self.respond(&[ok, 0x00]),
            (true, 23) => self.respond(&[ok]),
            (_, 17) if self.idle => self.respond(&[illegal]),
            (_, 17) => match self.sector_of(arg) {
                Some(sector) => {
                    self.respond(&[ok]);
                    if !self.withhold_start_token {
                        self.push_sector(sector);
                    }
                }
                None => {
                    let status = self.status(0x20);
                    self.respond(&[status]);
                }
            },
            (_, 18) => match self.sector_of(arg) {
                Some(sector) => {
                    self.respond(&[ok]);
                    self.phase = Phase::ReadMulti(sector);
                }
                None => {
                    let status = self.status(0x20);
                    self.respond(&[status]);
                }
            },
            (_, 12) => {
                self.phase = Phase::Command;
                self.respond(&[ok]);
                self.busy = 2;
            }
            (_, 24) | (_, 25) => match self.sector_of(arg) {
                Some(sector) => {
                    self.respond(&[ok]);
                    self.phase = if index == 24 {
                        Phase::WriteSingle(sector)
                    } else {
                        Phase::WriteMulti(sector)
                    };
                }
                None => {
                    let status = self.status(0x20);
                    self.respond(&[status]);
                }
            },
            (_, 32) => {
                self.erase_range.0 = self.sector_of(arg).unwrap_or(u32::MAX);
                self.respond(&[ok]);
            }
            (_, 33) => {
                self.erase_range.1 = self.sector_of(arg).unwrap_or(0);
                self.respond(&[ok]);
            }
            (_, 38) => {
                let (start, end) = self.erase_range;
                self.memory.retain(|&sector, _| sector < start || sector > end);
                self.respond(&[ok]);
                self.busy = 5;
            }
            _ => self.respond(&[illegal]),
        }
    }

    fn receive_block(&mut self, sector: u32, multi: bool, mut buf: Vec<u8>) {
        if self.corrupt_next_write {
            self.corrupt_next_write = false;
            buf[0] ^= 0x01;
        }
        let mut data = [0u8; BLOCK_SIZE];
        data.copy_from_slice(&buf[..BLOCK_SIZE]);
        let crc = u16::from_be_bytes([buf[BLOCK_SIZE], buf[BLOCK_SIZE + 1]]);

        let token = if self.crc_enabled && crc != crc16(&data) {
            tokens::DATA_RES_CRC_ERROR
        } else if self.fail_writes {
            tokens::DATA_RES_WRITE_ERROR
        } else {
            self.memory.insert(sector, (data, crc));
            self.busy = self.program_busy;
            tokens::DATA_RES_ACCEPTED
        };
        self.out.push_back(0xE0 | token);

        self.phase = if multi {
            Phase::WriteMulti(sector + 1)
        } else {
            Phase::Command
        };
    }

    fn input(&mut self, byte: u8) {
        match core::mem::replace(&mut self.phase, Phase::Command) {
            Phase::Receiving {
                sector,
                multi,
                mut buf,
            } => {
                buf.push(byte);
                if buf.len() == BLOCK_SIZE + 2 {
                    self.receive_block(sector, multi, buf);
                } else {
                    self.phase = Phase::Receiving { sector, multi, buf };
                }
            }
            Phase::WriteSingle(sector) => {
                self.phase = if byte == tokens::DATA_START_BLOCK {
                    Phase::Receiving {
                        sector,
                        multi: false,
                        buf: Vec::with_capacity(BLOCK_SIZE + 2),
                    }
                } else {
                    Phase::WriteSingle(sector)
                };
            }
            Phase::WriteMulti(sector) => {
                self.phase = match byte {
                    tokens::WRITE_MULTIPLE => Phase::Receiving {
                        sector,
                        multi: true,
                        buf: Vec::with_capacity(BLOCK_SIZE + 2),
                    },
                    tokens::STOP_TRAN => {
                        self.out.push_back(tokens::IDLE);
                        self.busy = self.program_busy;
                        Phase::Command
                    }
                    _ => Phase::WriteMulti(sector),
                };
            }
            phase @ (Phase::Command | Phase::ReadMulti(_)) => {
                self.phase = phase;
                if !self.frame.is_empty() || byte & 0xC0 == 0x40 {
                    self.frame.push(byte);
                    if self.frame.len() == 6 {
                        self.handle_frame();
                    }
                }
            }
        }
    }

    fn output(&mut self) -> u8 {
        if let Some(byte) = self.out.pop_front() {
            return byte;
        }
        if self.hold_busy {
            return 0x00;
        }
        if self.busy > 0 {
            self.busy -= 1;
            return 0x00;
        }
        if let Phase::ReadMulti(sector) = self.phase {
            self.push_sector(sector);
            if let Phase::ReadMulti(_) = self.phase {
                self.phase = Phase::ReadMulti(sector + 1);
            }
            return self.out.pop_front().unwrap_or(tokens::IDLE);
        }
        tokens::IDLE
    }
}

impl Transport for FakeCard {
    type Error = FakeError;

    fn exchange(&mut self, byte: u8) -> Result<u8, Self::Error> {
        self.exchanges += 1;

        if !self.selected {
            self.deselected_clocks += 1;
            if self.deselected_clocks >= POWER_UP_BYTES && self.kind != Kind::Absent {
                self.powered = true;
            }
            return Ok(tokens::IDLE);
        }
        if self.kind == Kind::Absent {
            return Ok(tokens::IDLE);
        }

        let out = self.output();
        self.input(byte);
        Ok(out)
    }

    fn select(&mut self, selected: bool) -> Result<(), Self::Error> {
        if !selected {
            self.out.clear();
            self.frame.clear();
            if let Phase::ReadMulti(_) = self.phase {
                self.phase = Phase::Command;
            }
        }
        self.selected = selected;
        Ok(())
    }

    fn set_clock(&mut self, tier: ClockTier) -> Result<(), Self::Error> {
        self.tier = tier;
        Ok(())
    }

    fn now(&self) -> Millis {
        self.exchanges
    }
}
