//! Test geometry and timeouts.

use apollo_hal::{EraseType, XferMode};

/// What the widget sweeps and how long it waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WidgetConfig {
    /// First block the sweeps touch.
    pub start_block: u32,
    /// Largest block count the write/read and benchmark sweeps use.
    pub block_count: u32,
    /// Span of blocks the sweeps spread their start blocks over.
    pub sector_count: u32,
    /// Data transfer mode.
    pub xfer_mode: XferMode,
    /// Erase variant for [`crate::test_erase`].
    pub erase_type: EraseType,
    /// Blocks written and erased per erase group.
    pub erase_blocks: u32,
    /// Blocks probed at the start of neighbouring groups.
    pub erase_probe_blocks: u32,
    /// Blocks left un-trimmed at the end of a trim range.
    pub trim_tail_blocks: u32,
    /// Timeout for ERASE, TRIM and DISCARD, ms.
    pub erase_timeout_ms: u32,
    /// Timeout for the secure variants, ms.
    pub secure_erase_timeout_ms: u32,
    /// Passes per benchmark point.
    pub benchmark_loops: u32,
    /// Mismatches reported before a comparison gives up.
    pub mismatch_limit: u32,
    /// Segments per transfer in the scatter sweep.
    pub io_vector_count: u32,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            block_count: 32,
            sector_count: 0x100,
            xfer_mode: XferMode::Adma,
            erase_type: EraseType::Erase,
            erase_blocks: 32,
            erase_probe_blocks: 16,
            trim_tail_blocks: 10,
            erase_timeout_ms: 1_000,
            secure_erase_timeout_ms: 10_000,
            benchmark_loops: 10,
            mismatch_limit: 10,
            io_vector_count: 4,
        }
    }
}

impl WidgetConfig {
    /// Timeout for `kind`.
    pub fn erase_timeout(&self, kind: EraseType) -> u32 {
        if kind.is_secure() {
            self.secure_erase_timeout_ms
        } else {
            self.erase_timeout_ms
        }
    }
}
