//! Calibrated DDR taps, cached per bus setting.
//!
//! Entries are keyed by the djb2 hash of `"<uhs>,<clock>,<width>"`. A key
//! that is present but not yet valid is calibrated on first use; later uses
//! only re-apply the stored taps.

use core::fmt::Write as _;

use apollo_hal::sdhc::CardHost;
use apollo_hal::{emmc_calibrate, BusWidth, Card, UhsMode};
use embedded_hal::delay::DelayNs;
use heapless::{String, Vec};

use crate::WidgetError;

/// Entries a table can hold.
pub const SCAN_NUM: usize = 8;

/// Clock the default entries calibrate at, Hz.
pub const DDR_CLOCK_HZ: u32 = 48_000_000;

/// One cached setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimingScan {
    /// Calibrate on first use.
    pub calibrate: bool,
    /// `delays` holds a calibration result.
    pub valid: bool,
    /// TX and RX taps.
    pub delays: [u8; 2],
}

/// djb2 over `s`.
pub fn calhash(s: &[u8]) -> u32 {
    s.iter().fold(5381u32, |hash, c| {
        hash.wrapping_shl(5).wrapping_add(hash).wrapping_add(u32::from(*c))
    })
}

fn key(uhs: UhsMode, clock: u32, width: BusWidth) -> u32 {
    let mut s: String<32> = String::new();
    // Longest key is well under 32 bytes.
    let _ = write!(s, "{},{},{}", uhs.as_str(), clock, width.lines());
    calhash(s.as_bytes())
}

/// Key → taps table.
#[derive(Debug, Clone, Default)]
pub struct TimingScanTable {
    entries: Vec<(u32, TimingScan), SCAN_NUM>,
}

impl TimingScanTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding the settings that need DDR calibration on Apollo5:
    /// DDR50 at 48 MHz on 4 and 8 lines, and SDR50 at 48 MHz on 8 lines.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        for (uhs, width) in [
            (UhsMode::Ddr50, BusWidth::Four),
            (UhsMode::Ddr50, BusWidth::Eight),
            (UhsMode::Sdr50, BusWidth::Eight),
        ] {
            // Capacity exceeds the defaults.
            let _ = table.insert(uhs, DDR_CLOCK_HZ, width);
        }
        table
    }

    /// Add a setting to calibrate on first use. Re-adding a key is a no-op.
    pub fn insert(&mut self, uhs: UhsMode, clock: u32, width: BusWidth) -> Result<(), WidgetError> {
        let key = key(uhs, clock, width);
        if self.entries.iter().any(|(k, _)| *k == key) {
            return Ok(());
        }
        let scan = TimingScan {
            calibrate: true,
            valid: false,
            delays: [0; 2],
        };
        self.entries
            .push((key, scan))
            .map_err(|_| WidgetError::TableFull)
    }

    /// Entry for a setting.
    pub fn find(&self, uhs: UhsMode, clock: u32, width: BusWidth) -> Option<&TimingScan> {
        let key = key(uhs, clock, width);
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Bring the host taps in line with the table for this setting.
    ///
    /// Settings not in the table are left alone and give `None`. The first
    /// use of a listed setting runs [`emmc_calibrate`] with `buf`, which
    /// leaves the card configured for the setting.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply<H: CardHost, D: DelayNs>(
        &mut self,
        card: &mut Card<H, D>,
        uhs: UhsMode,
        clock: u32,
        width: BusWidth,
        buf: &mut [u8],
        start_blk: u32,
        blk_cnt: u32,
    ) -> Result<Option<[u8; 2]>, WidgetError> {
        let key = key(uhs, clock, width);
        let Some((_, scan)) = self.entries.iter_mut().find(|(k, _)| *k == key) else {
            return Ok(None);
        };
        if scan.valid {
            card.host_mut().set_txrx_delay(scan.delays);
            return Ok(Some(scan.delays));
        }
        if !scan.calibrate {
            return Ok(None);
        }
        let window = emmc_calibrate(card, uhs, clock, width, buf, start_blk, blk_cnt).await?;
        scan.delays = window.delays();
        scan.valid = true;
        #[cfg(feature = "defmt")]
        defmt::info!(
            "timing: {=str} {=u32} x{=u32} -> {=[u8]}",
            uhs.as_str(),
            clock,
            width.lines(),
            scan.delays.as_slice()
        );
        Ok(Some(scan.delays))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation
)]
mod tests {
    use super::*;

    #[test]
    fn djb2_values() {
        assert_eq!(calhash(b""), 5381);
        assert_eq!(calhash(b"a"), 5381 * 33 + 97);
    }

    #[test]
    fn defaults_listed() {
        let table = TimingScanTable::with_defaults();
        assert!(table.find(UhsMode::Ddr50, DDR_CLOCK_HZ, BusWidth::Four).is_some());
        assert!(table.find(UhsMode::Ddr50, DDR_CLOCK_HZ, BusWidth::Eight).is_some());
        assert!(table.find(UhsMode::Sdr50, DDR_CLOCK_HZ, BusWidth::Eight).is_some());
        assert!(table.find(UhsMode::Sdr50, DDR_CLOCK_HZ, BusWidth::Four).is_none());
        assert!(table.find(UhsMode::Ddr50, 24_000_000, BusWidth::Eight).is_none());
    }

    #[test]
    fn table_fills_up() {
        let mut table = TimingScanTable::new();
        for clock in 0..SCAN_NUM as u32 {
            table.insert(UhsMode::Ddr50, clock, BusWidth::Eight).unwrap();
        }
        table.insert(UhsMode::Ddr50, 0, BusWidth::Eight).unwrap();
        assert_eq!(
            table.insert(UhsMode::Ddr50, 99, BusWidth::Eight),
            Err(WidgetError::TableFull)
        );
    }
}
