//! Initialization state machine.
//!
//! `Reset -> IdleProbe -> VoltageCheck -> Ready` for SD version 2 cards,
//! `Reset -> IdleProbe -> OpCondPoll -> Ready` for SD version 1 and MMC.
//! Every state can end in `Failed`.

#[cfg(all(feature = "defmt-log", not(feature = "log")))]
use defmt::{debug, info, warn};
#[cfg(feature = "log")]
use log::{debug, info, warn};

use crate::{
    card::{Addressing, CardType, Identity},
    command::Command,
    config::SdMmcSpiConfig,
    consts::{args, BLOCK_SIZE_U32},
    csd::{Csd, RegisterData},
    link::Link,
    response::R1Status,
    transport::{ClockTier, Millis, Transport},
    Error,
};

/// State of the initialization handshake.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    /// Power up clocks and software reset.
    Reset,
    /// Interface condition probe, tells version 2 cards from legacy ones.
    IdleProbe,
    /// Version 2 operating condition polling with high capacity support.
    VoltageCheck,
    /// Legacy (SD version 1 or MMC) operating condition polling.
    OpCondPoll,
    /// Card is ready for data transfer.
    Ready,
    /// Handshake failed.
    Failed,
}

/// Drives one card through initialization.
pub struct Initializer<'a, T: Transport, Config: SdMmcSpiConfig> {
    link: &'a mut Link<T, Config>,
    state: InitState,
    identity: Identity,
    started: Millis,
    failure: Option<Error<T::Error>>,
}

impl<'a, T: Transport, Config: SdMmcSpiConfig> Initializer<'a, T, Config> {
    pub fn new(link: &'a mut Link<T, Config>) -> Self {
        Initializer {
            link,
            state: InitState::Reset,
            identity: Identity::UNKNOWN,
            started: 0,
            failure: None,
        }
    }

    pub fn state(&self) -> InitState {
        self.state
    }

    /// Identity resolved so far.
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// Perform the current state and move to the next one.
    pub fn step(&mut self) -> InitState {
        let next = match self.state {
            InitState::Reset => self.reset(),
            InitState::IdleProbe => self.idle_probe(),
            InitState::VoltageCheck => self.voltage_check(),
            InitState::OpCondPoll => self.op_cond_poll(),
            InitState::Ready | InitState::Failed => return self.state,
        };

        self.state = match next {
            Ok(state) => state,
            Err(err) => {
                warn!("SD initialization failed in {:?}", self.state);
                self.identity = Identity::UNKNOWN;
                self.failure = Some(err);
                InitState::Failed
            }
        };
        debug!("SD initialization state: {:?}", self.state);

        self.state
    }

    /// Step until a terminal state.
    pub fn run(mut self) -> Result<Identity, Error<T::Error>> {
        info!("SD initialize started");

        while !matches!(self.step(), InitState::Ready | InitState::Failed) {}

        let deselect = self.link.deselect();
        match self.failure.take() {
            Some(err) => Err(err),
            None => deselect.map(|_| self.identity),
        }
    }

    fn reset(&mut self) -> Result<InitState, Error<T::Error>> {
        self.link.set_clock(ClockTier::Slow)?;
        self.link.deselect()?;
        self.link.idle_clocks(Config::POWER_UP_CLOCK_BYTES)?;

        self.enter_spi_mode()?;

        if Config::ENABLE_CRC {
            info!("Enabling CRC for SD");
            let status = self.link.send_command(Command::CrcOnOff, args::CRC_ON)?.status();
            if status != R1Status::IN_IDLE_STATE {
                if Config::REQUIRE_CRC {
                    return Err(Error::CantEnableCrc);
                }
                warn!("SD refused CRC checking: 0b{:08b}", status.0);
            }
        }

        Ok(InitState::IdleProbe)
    }

    fn enter_spi_mode(&mut self) -> Result<(), Error<T::Error>> {
        for i in 0..Config::ENTER_SPI_MODE_ATTEMPTS {
            info!("Enter to SPI mode for SD, attempt: {}", i + 1);

            match self.link.send_command(Command::GoIdleState, 0x0000_0000) {
                Ok(response) if response.status() == R1Status::IN_IDLE_STATE => return Ok(()),
                Ok(response) => {
                    let status = response.status();
                    warn!("Wrong response from CMD0: 0b{:08b}", status.0);
                    return Err(status.error().map_or(Error::UnexpectedResponse(status.0), Error::from));
                }
                Err(Error::NoResponse(_)) => {}
                Err(err) => return Err(err),
            }
        }

        Err(Error::NoResponse(Command::GoIdleState.index()))
    }

    fn idle_probe(&mut self) -> Result<InitState, Error<T::Error>> {
        info!("Verifing SD Memory Card interface operating condition");

        let response = self.link.send_command(Command::SendIfCond, args::IF_COND)?;
        let status = response.status();
        self.started = self.link.bus().now();

        if status.illegal_command() {
            // SD version 1 or MMC, both byte addressed.
            return Ok(InitState::OpCondPoll);
        }
        if let Some(err) = status.error() {
            return Err(err.into());
        }
        if status != R1Status::IN_IDLE_STATE {
            return Err(Error::UnexpectedResponse(status.0));
        }
        if !response.if_cond_echoed() {
            warn!("SD interface condition not echoed: 0x{:08X}", response.payload().unwrap_or(0));
            return Err(Error::VoltageMismatch);
        }

        self.identity = Identity::new(CardType::Sd2, Addressing::Byte);
        Ok(InitState::VoltageCheck)
    }

    fn voltage_check(&mut self) -> Result<InitState, Error<T::Error>> {
        info!("Sending host capacity support information and activates");

        self.poll_op_cond(Command::SdSendOpCond, args::HCS)?;

        let response = self.link.command(Command::ReadOcr, 0x0000_0000)?;
        let ocr = response
            .ocr()
            .ok_or(Error::UnexpectedResponse(response.status().0))?;
        if ocr.high_capacity() {
            self.identity.addressing = Addressing::Block;
        }

        self.configure()
    }

    fn op_cond_poll(&mut self) -> Result<InitState, Error<T::Error>> {
        let probe = self.link.send_command(Command::SdSendOpCond, 0x0000_0000)?;

        if probe.status().is_idle_or_ready() {
            self.identity = Identity::new(CardType::Sd1, Addressing::Byte);
            if probe.status() != R1Status::READY_STATE {
                self.poll_op_cond(Command::SdSendOpCond, 0x0000_0000)?;
            }
        } else {
            self.identity = Identity::new(CardType::Mmc, Addressing::Byte);
            self.poll_op_cond(Command::SendOpCond, 0x0000_0000)?;
        }

        self.configure()
    }

    /// Repeat `cmd` until the card leaves the idle state.
    fn poll_op_cond(&mut self, cmd: Command, arg: u32) -> Result<(), Error<T::Error>> {
        loop {
            let status = self.link.send_command(cmd, arg)?.status();
            if status == R1Status::READY_STATE {
                return Ok(());
            }
            if let Some(err) = status.error() {
                return Err(err.into());
            }
            if self.link.bus().elapsed(self.started) >= Config::INIT_TIMEOUT_MS {
                warn!("SD did not leave idle state in {} ms", Config::INIT_TIMEOUT_MS);
                return Err(Error::Timeout);
            }
        }
    }

    /// Fix the block length, speed up the bus and read the capacity.
    fn configure(&mut self) -> Result<InitState, Error<T::Error>> {
        let status = self.link.command(Command::SetBlockLen, BLOCK_SIZE_U32)?.status();
        if status != R1Status::READY_STATE {
            return Err(Error::UnexpectedResponse(status.0));
        }

        self.link.set_clock(ClockTier::Fast)?;

        let mut csd: RegisterData = Default::default();
        self.link.read_register(Command::SendCsd, &mut csd)?;
        let csd = Csd::parse(csd, self.identity.card_type);
        self.identity.sectors = Some(csd.sector_count());
        self.identity.write_protected = csd.write_protected();

        info!(
            "SD successfully initialized, type: {:?}, addressing: {:?}",
            self.identity.card_type, self.identity.addressing
        );
        #[cfg(feature = "log")]
        if let Some(capacity) = self.identity.capacity() {
            info!("SD capacity: {:?}", capacity);
        }
        #[cfg(all(feature = "defmt-log", not(feature = "log")))]
        if let Some(capacity) = self.identity.capacity() {
            info!("SD capacity: {}", defmt::Debug2Format(&capacity));
        }
        if self.identity.write_protected {
            warn!("SD is write protected");
        }

        Ok(InitState::Ready)
    }
}
