//! Link session: the transport plus what the driver knows about the line.

use core::marker::PhantomData;

#[cfg(all(feature = "defmt-log", not(feature = "log")))]
use defmt::trace;
#[cfg(feature = "log")]
use log::trace;

use crate::{
    config::SdMmcSpiConfig,
    consts::tokens,
    transport::{ClockTier, Millis, Transport},
    Error,
};

/// Session with one card over one transport.
///
/// Owned exclusively by one driver, the protocol is not reentrant.
pub struct Link<T: Transport, Config: SdMmcSpiConfig> {
    bus: T,
    selected: bool,
    tier: ClockTier,
    idle: bool,
    timed_out: bool,
    config: PhantomData<Config>,
}

impl<T: Transport, Config: SdMmcSpiConfig> Link<T, Config> {
    pub fn new(bus: T) -> Self {
        Link {
            bus,
            selected: false,
            tier: ClockTier::Slow,
            idle: false,
            timed_out: false,
            config: PhantomData::<Config>,
        }
    }

    pub fn release(self) -> T {
        self.bus
    }

    pub fn bus(&self) -> &T {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut T {
        &mut self.bus
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn clock_tier(&self) -> ClockTier {
        self.tier
    }

    /// Response line was idle at the last observation.
    pub fn is_idle(&self) -> bool {
        self.idle
    }

    /// Last command exchange ran out of its bound.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub(crate) fn mark_timed_out(&mut self, timed_out: bool) {
        self.timed_out = timed_out;
    }

    /// Switch the bus clock tier.
    pub fn set_clock(&mut self, tier: ClockTier) -> Result<(), Error<T::Error>> {
        if self.tier != tier {
            trace!("SD bus clock tier: {:?}", tier);
        }
        self.bus.set_clock(tier).map_err(Error::Bus)?;
        self.tier = tier;
        Ok(())
    }

    /// Send one byte and receive one byte.
    pub fn transfer(&mut self, data: u8) -> Result<u8, Error<T::Error>> {
        self.bus.exchange(data).map_err(Error::Bus)
    }

    /// Receive a byte from the card by clocking out an idle byte.
    pub fn receive(&mut self) -> Result<u8, Error<T::Error>> {
        self.transfer(tokens::IDLE)
    }

    /// Send a byte to the card.
    pub fn send(&mut self, data: u8) -> Result<(), Error<T::Error>> {
        self.transfer(data).map(|_| ())
    }

    /// Receive a slice from the card.
    pub fn receive_slice(&mut self, data: &mut [u8]) -> Result<(), Error<T::Error>> {
        for byte in data.iter_mut() {
            *byte = self.receive()?;
        }

        Ok(())
    }

    /// Send a slice to the card.
    pub fn send_slice(&mut self, data: &[u8]) -> Result<(), Error<T::Error>> {
        for byte in data.iter() {
            self.send(*byte)?;
        }

        Ok(())
    }

    /// Clock idle bytes.
    pub fn idle_clocks(&mut self, count: usize) -> Result<(), Error<T::Error>> {
        for _ in 0..count {
            self.receive()?;
        }

        Ok(())
    }

    /// Activate chip select and let the card settle.
    pub fn select(&mut self) -> Result<(), Error<T::Error>> {
        self.bus.select(true).map_err(Error::Bus)?;
        self.selected = true;
        self.idle_clocks(Config::SELECT_IDLE_BYTES)
    }

    /// Deactivate chip select, one more byte lets the card release the line.
    pub fn deselect(&mut self) -> Result<(), Error<T::Error>> {
        self.bus.select(false).map_err(Error::Bus)?;
        self.selected = false;
        self.receive().map(|_| ())
    }

    /// Receive bytes until `accept` takes one or `timeout` runs out.
    pub fn wait_for<F: Fn(u8) -> bool>(
        &mut self,
        accept: F,
        timeout: Millis,
    ) -> Result<Option<u8>, Error<T::Error>> {
        let start = self.bus.now();
        loop {
            let byte = self.receive()?;
            if accept(byte) {
                return Ok(Some(byte));
            }
            if self.bus.elapsed(start) >= timeout {
                return Ok(None);
            }
        }
    }

    /// Wait for the card to release the response line.
    pub fn wait_ready(&mut self, timeout: Millis, error: Error<T::Error>) -> Result<(), Error<T::Error>> {
        let ready = self.wait_for(|byte| byte == tokens::IDLE, timeout)?.is_some();
        self.idle = ready;
        if ready {
            Ok(())
        } else {
            self.timed_out = true;
            Err(error)
        }
    }

    /// Probe the response line once within `timeout`, without failing.
    pub fn probe_ready(&mut self, timeout: Millis) -> Result<bool, Error<T::Error>> {
        let ready = self.wait_for(|byte| byte == tokens::IDLE, timeout)?.is_some();
        self.idle = ready;
        Ok(ready)
    }
}
