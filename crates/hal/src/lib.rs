//! Hardware Abstraction Layer for the Apollo5 power controller and SDIO/eMMC
//! storage path.
//!
//! The crate is split along the same seams the silicon has:
//!
//! ```text
//! block_device (embedded-sdmmc)   calibrate (DDR TX/RX scan)
//!            ↓                          ↓
//!        card (eMMC protocol: CMD0..CMD38, EXT_CSD, erase/trim)
//!            ↓
//!        sdhc (CardHost trait + SDHCI register host)
//!            ↓
//!   pwrctrl (rails, trims, perf modes)  →  regs (RegisterBus)  ←  cpu (CpuCore)
//! ```
//!
//! Every register access goes through [`regs::RegisterBus`] and every core
//! operation (caches, WFI, NVIC) through [`cpu::CpuCore`], so the switching
//! sequences can be checked write-by-write against the recording mocks in
//! [`mocks`].
//!
//! # Features
//!
//! - `std`: expose [`mocks`] to downstream test crates
//! - `hardware`: volatile MMIO bus and the Cortex-M core implementation
//! - `defmt`: enable defmt logging

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)]
// Pedantic lints suppressed for this register-level HAL crate:
#![allow(clippy::doc_markdown)] // register names in doc comments
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)] // hardware accessors: callers decide
#![allow(async_fn_in_trait)] // Embassy no_std: single-threaded, Send bounds not needed

pub mod bits;
pub mod block_device;
pub mod calibrate;
pub mod card;
pub mod config;
pub mod cpu;
pub mod pwrctrl;
pub mod regs;
pub mod sdhc;

#[cfg(any(test, feature = "std"))]
pub mod mocks;

pub use block_device::EmmcBlockDevice;
pub use calibrate::{emmc_calibrate, find_mid_point, longest_run_of_ones, CalibrationWindow};
pub use card::{Card, CardError, CardState, EraseType, ExtCsdField, ExtCsdInfo};
pub use config::{CardConfig, PowerConfig, TempcoLimits};
pub use cpu::CpuCore;
pub use pwrctrl::{
    GpuMode, McuMode, Periph, PowerControl, PowerError, PowerStatus, TempcoRange, VddfBoostLevel,
};
pub use regs::{Field, RegisterBus};
pub use sdhc::{
    BusVoltage, BusWidth, CardHost, Command, CommandData, DataDirection, HostError, HostEvent,
    HostInfo, ResponseType, Sdhc, UhsMode, XferMode,
};
