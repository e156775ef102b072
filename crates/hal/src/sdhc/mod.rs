//! SD/eMMC host controller.
//!
//! [`CardHost`] is the seam between the card protocol in [`crate::card`] and
//! whatever moves bits on the wire. [`Sdhc`] drives the Apollo5 SDHCI block
//! through a [`crate::regs::RegisterBus`]; [`crate::mocks::SimEmmc`] answers
//! commands from an in-memory device for tests.
//!
//! Interrupts are delivered ISR → task through an `embassy_sync` [`Signal`]:
//! the vector calls [`on_interrupt`], which masks further signalling and
//! publishes a [`HostEvent`]; the task waiting inside [`Sdhc`] reads the
//! latched status, acknowledges it and unmasks.
//!
//! [`Signal`]: embassy_sync::signal::Signal

mod command;
mod host;
pub mod regs;
mod sdhci;

pub use command::{Command, CommandData, DataBuf, DataDirection, ResponseType};
pub use host::{BusVoltage, BusWidth, CardHost, HostInfo, UhsMode, XferMode};
pub use sdhci::{adma2_build, adma2_build_vectored, clock_divider, on_interrupt, HostEvents, Sdhc, SDIO0_BASE, SDIO1_BASE};

/// Host controller failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror_no_std::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostError {
    /// No response to the command.
    #[error("command timeout")]
    CmdTimeout,
    /// Response CRC mismatch.
    #[error("command CRC error")]
    CmdCrc,
    /// Response end bit was 0.
    #[error("command end bit error")]
    CmdEndBit,
    /// Response carried a different command index.
    #[error("command index error")]
    CmdIndex,
    /// Data phase did not complete.
    #[error("data timeout")]
    DataTimeout,
    /// Data CRC mismatch.
    #[error("data CRC error")]
    DataCrc,
    /// Data end bit was 0.
    #[error("data end bit error")]
    DataEndBit,
    /// ADMA2 engine reported a descriptor error.
    #[error("ADMA error")]
    Adma,
    /// Controller or card did not become ready in time.
    #[error("host timeout")]
    Timeout,
    /// Request is malformed for this host.
    #[error("invalid argument")]
    InvalidArg,
    /// No card in the slot.
    #[error("card not present")]
    NoCard,
}

/// Event published from the SDHC interrupt vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostEvent {
    /// Normal and error interrupt status latched at entry.
    Interrupt {
        /// NORMINT (low half) and ERRINT (high half).
        status: u32,
    },
    /// Card inserted or removed.
    CardChange {
        /// Card present after the change.
        present: bool,
    },
}
