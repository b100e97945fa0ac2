//! Bus transport: the byte-level capability the driver is built on.

use core::fmt::Debug;

use embedded_hal::blocking::spi::Transfer;
use switch_hal::OutputSwitch;

/// Milliseconds of a monotonic, wrapping clock.
pub type Millis = u32;

/// Bus clock speed tier.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockTier {
    /// 100-400 kHz, required until the card leaves the idle state.
    Slow,
    /// Full data transfer speed.
    Fast,
}

/// Full-duplex byte transport to the card plus a tick source.
///
/// No retry or interpretation happens here, it is pure I/O.
pub trait Transport {
    /// Transport error type.
    type Error: Debug;

    /// Send one byte and receive one byte.
    fn exchange(&mut self, byte: u8) -> Result<u8, Self::Error>;

    /// Assert (`true`) or deassert (`false`) the device select line.
    fn select(&mut self, selected: bool) -> Result<(), Self::Error>;

    /// Switch the bus clock tier.
    fn set_clock(&mut self, _tier: ClockTier) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Current time.
    fn now(&self) -> Millis;

    /// Time passed since `since`.
    fn elapsed(&self, since: Millis) -> Millis {
        self.now().wrapping_sub(since)
    }
}

/// Monotonic millisecond clock.
pub trait Clock {
    /// Milliseconds since an arbitrary epoch, wrapping.
    fn now_ms(&self) -> Millis;
}

/// [`SpiTransport`] error.
///
/// `T` - SPI error type.
/// `S` - select switch error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError<T, S> {
    /// Error from the SPI peripheral.
    Transport(T),
    /// Couldn't set a select.
    SelectError(S),
}

/// Hook re-clocking the SPI peripheral.
pub type ClockSwitch<Spi, E> = fn(&mut Spi, ClockTier) -> Result<(), E>;

/// [`Transport`] over an `embedded-hal` SPI bus and a chip select switch.
///
/// `Spi` - SPI.
/// `Cs` - Chip select output switch, `on` selects the card.
/// `Clk` - Millisecond clock.
pub struct SpiTransport<Spi: Transfer<u8>, Cs: OutputSwitch, Clk: Clock> {
    spi: Spi,
    cs: Cs,
    clock: Clk,
    clock_switch: Option<ClockSwitch<Spi, Spi::Error>>,
}

impl<Spi: Transfer<u8>, Cs: OutputSwitch, Clk: Clock> SpiTransport<Spi, Cs, Clk> {
    /// Creates a new [`SpiTransport<Spi, Cs, Clk>`].
    ///
    /// `spi` - SPI instance, initially clocked at most at 400 kHz.
    /// `cs` - chip select output switch.
    /// `clock` - millisecond clock used for timeouts.
    pub fn new(spi: Spi, cs: Cs, clock: Clk) -> Self {
        SpiTransport {
            spi,
            cs,
            clock,
            clock_switch: None,
        }
    }

    /// Installs a hook called when the driver changes the bus clock tier.
    pub fn with_clock_switch(mut self, clock_switch: ClockSwitch<Spi, Spi::Error>) -> Self {
        self.clock_switch = Some(clock_switch);
        self
    }

    /// Releases the SPI, chip select and clock.
    pub fn release(self) -> (Spi, Cs, Clk) {
        (self.spi, self.cs, self.clock)
    }
}

impl<Spi, Cs, Clk> Transport for SpiTransport<Spi, Cs, Clk>
where
    Spi: Transfer<u8>,
    Cs: OutputSwitch,
    Clk: Clock,
    Spi::Error: Debug,
    Cs::Error: Debug,
{
    type Error = BusError<Spi::Error, Cs::Error>;

    fn exchange(&mut self, byte: u8) -> Result<u8, Self::Error> {
        self.spi
            .transfer(&mut [byte])
            .map(|b| b[0])
            .map_err(BusError::Transport)
    }

    fn select(&mut self, selected: bool) -> Result<(), Self::Error> {
        if selected {
            self.cs.on().map_err(BusError::SelectError)
        } else {
            self.cs.off().map_err(BusError::SelectError)
        }
    }

    fn set_clock(&mut self, tier: ClockTier) -> Result<(), Self::Error> {
        match self.clock_switch {
            Some(switch) => switch(&mut self.spi, tier).map_err(BusError::Transport),
            None => Ok(()),
        }
    }

    fn now(&self) -> Millis {
        self.clock.now_ms()
    }
}
