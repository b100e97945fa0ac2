/// Represents config for [`SdMmcSpi`](crate::SdMmcSpi).
///
/// All time budgets are in milliseconds of the transport clock and are
/// checked on every poll iteration.
pub trait SdMmcSpiConfig {
    /// Max byte exchanges while polling for a command response.
    const READ_R1_ATTEMPTS: usize;
    /// Max attempts to enter SPI mode (GO_IDLE_STATE without an answer).
    const ENTER_SPI_MODE_ATTEMPTS: usize;
    /// Idle bytes clocked with the card deselected at power up.
    const POWER_UP_CLOCK_BYTES: usize;
    /// Idle bytes clocked right after the card is selected.
    const SELECT_IDLE_BYTES: usize;
    /// Budget for the card to release the response line before a command or data block.
    const READY_TIMEOUT_MS: u32;
    /// Budget of the non-blocking readiness probe.
    const READY_PROBE_MS: u32;
    /// Budget for the card to leave the idle state during initialization.
    const INIT_TIMEOUT_MS: u32;
    /// Budget for the start token of a data block.
    const READ_TOKEN_TIMEOUT_MS: u32;
    /// Budget for the card to finish programming a written block.
    const PROGRAM_TIMEOUT_MS: u32;
    /// Budget for an erase to finish.
    const ERASE_TIMEOUT_MS: u32;
    /// Ask the card to check CRC on commands and data.
    const ENABLE_CRC: bool;
    /// Fail initialization if the card refuses CRC checking.
    const REQUIRE_CRC: bool;
}

/// Default implementation of [`SdMmcSpiConfig`](crate::SdMmcSpiConfig).
pub struct DefaultSdMmcSpiConfig;

impl SdMmcSpiConfig for DefaultSdMmcSpiConfig {
    const READ_R1_ATTEMPTS: usize = 8;
    const ENTER_SPI_MODE_ATTEMPTS: usize = 10;
    const POWER_UP_CLOCK_BYTES: usize = 10;
    const SELECT_IDLE_BYTES: usize = 8;
    const READY_TIMEOUT_MS: u32 = 500;
    const READY_PROBE_MS: u32 = 10;
    const INIT_TIMEOUT_MS: u32 = 1000;
    const READ_TOKEN_TIMEOUT_MS: u32 = 200;
    const PROGRAM_TIMEOUT_MS: u32 = 500;
    const ERASE_TIMEOUT_MS: u32 = 30_000;
    const ENABLE_CRC: bool = true;
    // Some cards (at least a 512MiB Transcend one) don't support CRC mode.
    const REQUIRE_CRC: bool = false;
}
