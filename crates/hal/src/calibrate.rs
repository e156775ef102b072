//! DDR TX/RX sampling-delay calibration.
//!
//! Every TX tap is paired with every RX tap; a pair passes when a ramp
//! written to the card reads back intact. The chosen taps sit in the middle
//! of the widest passing windows.

use embedded_hal::delay::DelayNs;

use crate::card::{Card, CardError};
use crate::sdhc::{BusVoltage, BusWidth, CardHost, UhsMode};

/// TX taps scanned.
pub const TX_TAPS: u8 = 16;
/// RX taps scanned.
pub const RX_TAPS: u8 = 32;
/// Shortest run of passing taps that counts as a window.
pub const MIN_WINDOW: u32 = 2;

/// Outcome of a calibration scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationWindow {
    /// Chosen TX tap.
    pub tx: u8,
    /// Chosen RX tap.
    pub rx: u8,
    /// TX taps with an acceptable RX window.
    pub tx_mask: u32,
    /// Passing RX taps at the chosen TX tap.
    pub rx_mask: u32,
}

impl CalibrationWindow {
    /// Taps in the order `set_txrx_delay` takes them.
    pub fn delays(&self) -> [u8; 2] {
        [self.tx, self.rx]
    }
}

/// Length of the longest run of set bits.
pub fn longest_run_of_ones(mut data: u32) -> u32 {
    let mut count = 0u32;
    while data != 0 {
        data &= data.wrapping_shl(1);
        count = count.saturating_add(1);
    }
    count
}

/// Middle bit of the longest run of ones that is followed by a zero.
///
/// A run still open at bit 31 is not considered; 0 is returned when no run
/// qualifies.
pub fn find_mid_point(data: u32) -> u8 {
    let mut run = 0u8;
    let mut best = 0u8;
    let mut pick = 0u8;
    for bit in 0..32u8 {
        if data.wrapping_shr(u32::from(bit)) & 1 != 0 {
            run = run.saturating_add(1);
        } else if run > 0 {
            if run > best {
                best = run;
                pick = bit.saturating_sub(1).saturating_sub(run / 2);
            }
            run = 0;
        }
    }
    pick
}

/// Scan all TX/RX tap pairs at the given bus setting, apply the chosen taps
/// and return them.
///
/// `buf` must hold `blk_cnt` blocks; its contents are overwritten. Each
/// pair re-identifies the card, so the card ends up configured for `uhs`,
/// `clock` and `width`.
pub async fn emmc_calibrate<H: CardHost, D: DelayNs>(
    card: &mut Card<H, D>,
    uhs: UhsMode,
    clock: u32,
    width: BusWidth,
    buf: &mut [u8],
    start_blk: u32,
    blk_cnt: u32,
) -> Result<CalibrationWindow, CardError> {
    let len = usize::try_from(blk_cnt.saturating_mul(512)).map_err(|_| CardError::InvalidArg)?;
    let buf = buf.get_mut(..len).ok_or(CardError::InvalidArg)?;
    if buf.is_empty() {
        return Err(CardError::InvalidArg);
    }

    let mut rx_results = [0u32; TX_TAPS as usize];
    for (tx, rx_result) in (0..TX_TAPS).zip(rx_results.iter_mut()) {
        for rx in 0..RX_TAPS {
            card.host_mut().set_txrx_delay([tx, rx]);
            if try_pair(card, uhs, clock, width, buf, start_blk, blk_cnt).await? {
                *rx_result |= 1u32.wrapping_shl(u32::from(rx));
            }
        }
    }

    let tx_mask = (0u32..)
        .zip(rx_results.iter())
        .filter(|(_, rx)| longest_run_of_ones(**rx) >= MIN_WINDOW)
        .fold(0u32, |mask, (tx, _)| mask | 1u32.wrapping_shl(tx));
    if longest_run_of_ones(tx_mask) < MIN_WINDOW {
        #[cfg(feature = "defmt")]
        defmt::warn!("calibrate: no TX window ({=u32:#x})", tx_mask);
        return Err(CardError::Fail);
    }

    let tx = find_mid_point(tx_mask);
    let rx_mask = rx_results
        .get(usize::from(tx))
        .copied()
        .unwrap_or(0);
    let rx = find_mid_point(rx_mask);
    card.host_mut().set_txrx_delay([tx, rx]);
    #[cfg(feature = "defmt")]
    defmt::info!("calibrate: tx {=u8} rx {=u8}", tx, rx);
    Ok(CalibrationWindow {
        tx,
        rx,
        tx_mask,
        rx_mask,
    })
}

/// One write/read-back at the current taps.
///
/// Failing to identify the card is fatal for the whole scan; a bus setting
/// or data error only fails the pair.
async fn try_pair<H: CardHost, D: DelayNs>(
    card: &mut Card<H, D>,
    uhs: UhsMode,
    clock: u32,
    width: BusWidth,
    buf: &mut [u8],
    start_blk: u32,
    blk_cnt: u32,
) -> Result<bool, CardError> {
    card.find_card().await?;
    card.init().await?;
    if card
        .cfg_set(width, clock, BusVoltage::V1_8, uhs)
        .await
        .is_err()
    {
        return Ok(false);
    }

    for (i, b) in buf.iter_mut().enumerate() {
        #[allow(clippy::cast_possible_truncation)] // ramp wraps at 256
        let v = i as u8;
        *b = v;
    }
    if card.block_write(start_blk, blk_cnt, buf).await.is_err() {
        return Ok(false);
    }
    buf.fill(0);
    if card.block_read(start_blk, blk_cnt, buf).await.is_err() {
        return Ok(false);
    }
    Ok(buf
        .iter()
        .enumerate()
        .all(|(i, b)| usize::from(*b) == i % 256))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::config::CardConfig;
    use crate::mocks::{SimEmmc, SimEmmcConfig};
    use embedded_hal_mock::eh1::delay::NoopDelay;

    #[test]
    fn run_lengths() {
        assert_eq!(longest_run_of_ones(0), 0);
        assert_eq!(longest_run_of_ones(0b1011_1001), 3);
        assert_eq!(longest_run_of_ones(u32::MAX), 32);
    }

    #[test]
    fn mid_point_of_closed_runs() {
        assert_eq!(find_mid_point(0b0111_1000), 4);
        assert_eq!(find_mid_point(0x0000_FFFF), 7);
        // The wider run wins.
        assert_eq!(find_mid_point(0b1100_0111_1110), 3);
    }

    #[test]
    fn open_run_at_msb_ignored() {
        assert_eq!(find_mid_point(0xFF00_0000), 0);
        assert_eq!(find_mid_point(0xFF00_0F00), 9);
        assert_eq!(find_mid_point(u32::MAX), 0);
    }

    fn card(tx_window: u16, rx_window: u32) -> Card<SimEmmc, NoopDelay> {
        let config = SimEmmcConfig {
            tx_window,
            rx_window,
            ..SimEmmcConfig::default()
        };
        Card::new(SimEmmc::new(config), NoopDelay::new(), CardConfig::default())
    }

    #[tokio::test]
    async fn picks_centre_of_passing_window() {
        let mut card = card(0b0000_0011_1111_1000, 0x00FF_0000);
        let mut buf = vec![0u8; 1024];
        let w = emmc_calibrate(&mut card, UhsMode::Ddr50, 48_000_000, BusWidth::Eight, &mut buf, 0, 2)
            .await
            .unwrap();
        assert_eq!(w.tx_mask, 0b0000_0011_1111_1000);
        assert_eq!(w.rx_mask, 0x00FF_0000);
        assert_eq!(w.delays(), [6, 19]);
        assert_eq!(card.host().taps(), [6, 19]);
        assert_eq!(card.host().uhs(), UhsMode::Ddr50);
    }

    #[tokio::test]
    async fn single_tx_tap_is_not_enough() {
        let mut card = card(0b0000_0000_0001_0000, 0x0000_FF00);
        let mut buf = vec![0u8; 512];
        assert_eq!(
            emmc_calibrate(&mut card, UhsMode::Ddr50, 48_000_000, BusWidth::Eight, &mut buf, 0, 1)
                .await,
            Err(CardError::Fail)
        );
    }

    #[tokio::test]
    async fn short_buffer_rejected() {
        let mut card = card(u16::MAX, u32::MAX);
        let mut buf = vec![0u8; 512];
        assert_eq!(
            emmc_calibrate(&mut card, UhsMode::Ddr50, 48_000_000, BusWidth::Eight, &mut buf, 0, 2)
                .await,
            Err(CardError::InvalidArg)
        );
    }

    #[tokio::test]
    async fn card_that_never_leaves_busy_aborts_scan() {
        let config = SimEmmcConfig {
            op_cond_busy_polls: u32::MAX,
            ..SimEmmcConfig::default()
        };
        let mut card = Card::new(SimEmmc::new(config), NoopDelay::new(), CardConfig::default());
        let mut buf = vec![0u8; 512];
        assert_eq!(
            emmc_calibrate(&mut card, UhsMode::Ddr50, 48_000_000, BusWidth::Eight, &mut buf, 0, 1)
                .await,
            Err(CardError::Timeout)
        );
        // The first pair gives up after one round of CMD1 retries.
        let cmd1 = card.host().commands().iter().filter(|(i, _)| *i == 1).count();
        assert_eq!(cmd1, CardConfig::default().op_cond_retries as usize);
    }

    #[tokio::test]
    async fn missing_card_aborts_scan() {
        let config = SimEmmcConfig {
            present: false,
            ..SimEmmcConfig::default()
        };
        let mut card = Card::new(SimEmmc::new(config), NoopDelay::new(), CardConfig::default());
        let mut buf = vec![0u8; 512];
        assert_eq!(
            emmc_calibrate(&mut card, UhsMode::Ddr50, 48_000_000, BusWidth::Eight, &mut buf, 0, 1)
                .await,
            Err(CardError::NotPresent)
        );
    }
}
