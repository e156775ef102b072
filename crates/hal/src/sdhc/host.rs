//! The [`CardHost`] trait and bus configuration types.

use super::{Command, CommandData, HostError};

/// Data bus width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusWidth {
    /// DAT0 only.
    One,
    /// DAT0..3.
    Four,
    /// DAT0..7 (eMMC).
    Eight,
}

impl BusWidth {
    /// Number of data lines.
    pub const fn lines(self) -> u32 {
        match self {
            Self::One => 1,
            Self::Four => 4,
            Self::Eight => 8,
        }
    }

    /// Width from a line count.
    pub const fn from_lines(lines: u32) -> Option<Self> {
        match lines {
            1 => Some(Self::One),
            4 => Some(Self::Four),
            8 => Some(Self::Eight),
            _ => None,
        }
    }
}

/// Bus speed mode. eMMC uses `None` for legacy/HS SDR and `Ddr50` for
/// HS DDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UhsMode {
    /// Legacy or high-speed SDR.
    None,
    /// SDR up to 25 MHz.
    Sdr12,
    /// SDR up to 50 MHz.
    Sdr25,
    /// SDR up to 100 MHz.
    Sdr50,
    /// SDR up to 208 MHz (HS200 on eMMC).
    Sdr104,
    /// DDR up to 50 MHz.
    Ddr50,
}

impl UhsMode {
    /// Double data rate.
    pub const fn is_ddr(self) -> bool {
        matches!(self, Self::Ddr50)
    }

    /// Name used in timing-table keys.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Sdr12 => "SDR12",
            Self::Sdr25 => "SDR25",
            Self::Sdr50 => "SDR50",
            Self::Sdr104 => "SDR104",
            Self::Ddr50 => "DDR50",
        }
    }
}

/// Signalling voltage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusVoltage {
    /// 1.8 V.
    V1_8,
    /// 3.0 V.
    V3_0,
    /// 3.3 V.
    V3_3,
}

/// How data moves between the FIFO and memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum XferMode {
    /// CPU copies words through the buffer port.
    #[default]
    Pio,
    /// ADMA2 descriptor chain.
    Adma,
}

/// Capabilities and power-on defaults of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HostInfo {
    /// Lowest card clock, Hz.
    pub clock_min: u32,
    /// Highest card clock, Hz.
    pub clock_max: u32,
    /// Most blocks one ADMA2 chain can carry.
    pub max_adma2_blocks: u32,
    /// Width used after power-on.
    pub default_bus_width: BusWidth,
    /// Voltage used after power-on.
    pub default_voltage: BusVoltage,
    /// Speed mode used after power-on.
    pub default_uhs: UhsMode,
    /// Identification clock, Hz.
    pub default_clock: u32,
}

/// Operations the card layer needs from a host controller.
pub trait CardHost {
    /// Capabilities and defaults.
    fn info(&self) -> &HostInfo;

    /// Reset the controller, power the slot and start the identification
    /// clock.
    async fn init(&mut self) -> Result<(), HostError>;

    /// Stop the clock and power the slot down.
    async fn deinit(&mut self) -> Result<(), HostError>;

    /// Send `cmd`, filling its response, and run the data phase if given.
    /// Returns the number of blocks moved.
    async fn execute_cmd(
        &mut self,
        cmd: &mut Command,
        data: Option<&mut CommandData<'_>>,
    ) -> Result<u32, HostError>;

    /// Wait for the card to release DAT0.
    async fn card_busy(&mut self, timeout_ms: u32) -> Result<(), HostError>;

    /// Switch the host side of the data bus width.
    fn set_bus_width(&mut self, width: BusWidth) -> Result<(), HostError>;

    /// Program the card clock; returns the clock actually produced.
    fn set_bus_clock(&mut self, hz: u32) -> Result<u32, HostError>;

    /// Switch the signalling voltage.
    fn set_bus_voltage(&mut self, voltage: BusVoltage) -> Result<(), HostError>;

    /// Select the bus speed mode.
    fn set_uhs_mode(&mut self, mode: UhsMode) -> Result<(), HostError>;

    /// Program the TX and RX sampling delays.
    fn set_txrx_delay(&mut self, delay: [u8; 2]);

    /// Card present in the slot.
    fn get_cd(&mut self) -> bool;

    /// Select PIO or ADMA2 for data phases.
    fn set_xfer_mode(&mut self, mode: XferMode);

    /// Current data transfer mode.
    fn xfer_mode(&self) -> XferMode;
}
