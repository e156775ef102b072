//! eMMC exercise widget for the Apollo5 SDIO hosts.
//!
//! Drives a [`apollo_hal::Card`] through the checks a board bring-up or
//! regression run needs:
//!
//! - [`timing`]: per bus setting, calibrate the DDR sampling taps once and
//!   reuse them
//! - [`pattern`]: seeded and fixed test data, bounded mismatch reporting
//! - [`identify`]: known-part lookup from the CID
//! - [`erase`]: erase, trim, discard and secure variants checked block by
//!   block against the erase-group geometry
//! - [`rw`]: write/read/compare sweep across block counts and start blocks
//! - [`scatter`]: the same sweep with one ADMA2 transfer spread over several
//!   buffers
//! - [`benchmark`]: throughput per block count
//!
//! Every check takes caller-owned write and read buffers so the widget needs
//! no allocator.

#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

pub mod benchmark;
pub mod config;
pub mod erase;
pub mod identify;
pub mod pattern;
pub mod rw;
pub mod scatter;
pub mod timing;

pub use benchmark::{benchmark_write_read, BenchmarkRow};
pub use config::WidgetConfig;
pub use erase::{emmc_erase, erase_check, erase_group_size, test_erase, trim_erase};
pub use identify::{emmc_identifier, EmmcDeviceInfo, EMMC_DEVICES};
pub use pattern::{check_data_match, prepare_data_pattern, prepare_testdata, PATTERN_COUNT};
pub use rw::test_write_read;
pub use scatter::{test_scatter_write_read, MAX_IO_VECTORS};
pub use timing::{calhash, TimingScan, TimingScanTable};

/// Widget failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror_no_std::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WidgetError {
    /// A card operation failed.
    #[error("card: {0}")]
    Card(#[from] apollo_hal::CardError),
    /// Read-back data differs from what was written.
    #[error("{count} bytes differ, first at offset {offset}")]
    DataMismatch {
        /// First differing byte.
        offset: usize,
        /// Differing bytes counted before giving up.
        count: u32,
    },
    /// An erased region does not hold the erased value.
    #[error("{count} bytes not erased, first at offset {offset}")]
    EraseMismatch {
        /// First byte that is not erased.
        offset: usize,
        /// Offending bytes counted before giving up.
        count: u32,
    },
    /// A buffer cannot hold the blocks the check needs.
    #[error("buffer too small")]
    BufferTooSmall,
    /// The configuration cannot produce a valid sweep.
    #[error("invalid widget configuration")]
    InvalidConfig,
    /// Too many rows for the result table.
    #[error("result table full")]
    TableFull,
}

/// Bytes per block for every widget transfer.
pub const BLOCK_LEN: usize = 512;

/// Byte length of `blocks` blocks.
pub(crate) fn block_bytes(blocks: u32) -> Result<usize, WidgetError> {
    usize::try_from(blocks)
        .ok()
        .and_then(|b| b.checked_mul(BLOCK_LEN))
        .ok_or(WidgetError::InvalidConfig)
}
