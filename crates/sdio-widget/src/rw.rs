//! Write/read/compare sweep.

use apollo_hal::sdhc::CardHost;
use apollo_hal::{Card, CardError, EraseType};
use embedded_hal::delay::DelayNs;

use crate::pattern::check_data_match;
use crate::{block_bytes, WidgetConfig, WidgetError};

/// Block counts from 1 to `config.block_count`, in steps of a quarter.
pub(crate) fn block_counts(config: &WidgetConfig) -> impl Iterator<Item = u32> {
    let step = usize::try_from(config.block_count / 4)
        .unwrap_or(0)
        .saturating_add(1);
    (1..=config.block_count).step_by(step)
}

/// Start blocks from `config.start_block`, spread over half of
/// `config.sector_count` so each count hits two regions.
pub(crate) fn start_blocks(config: &WidgetConfig, cnt: u32) -> impl Iterator<Item = u32> {
    let end = config.sector_count;
    let step = (config.sector_count / 2)
        .checked_sub(cnt)
        .map(|s| s.saturating_add(1));
    core::iter::successors(Some(config.start_block), move |blk| {
        step.and_then(|s| blk.checked_add(s))
    })
    .take_while(move |blk| *blk < end)
}

/// Put the card to sleep and wake it again.
pub(crate) async fn sleep_cycle<H: CardHost, D: DelayNs>(
    card: &mut Card<H, D>,
) -> Result<(), CardError> {
    card.sleep().await?;
    card.wakeup().await
}

/// For every block count and start block: erase, write `wr`, read back and
/// compare, with a sleep/wake cycle between each step.
pub async fn test_write_read<H: CardHost, D: DelayNs>(
    card: &mut Card<H, D>,
    config: &WidgetConfig,
    wr: &[u8],
    rd: &mut [u8],
) -> Result<(), WidgetError> {
    let max = block_bytes(config.block_count)?;
    if wr.len() < max || rd.len() < max {
        return Err(WidgetError::BufferTooSmall);
    }
    card.set_xfer_mode(config.xfer_mode);

    for cnt in block_counts(config) {
        let len = block_bytes(cnt)?;
        let wr = wr.get(..len).ok_or(WidgetError::BufferTooSmall)?;
        for start in start_blocks(config, cnt) {
            #[cfg(feature = "defmt")]
            defmt::info!("write/read: start {=u32}, {=u32} blocks", start, cnt);

            sleep_cycle(card).await?;
            card.block_erase(start, cnt, EraseType::Erase, config.erase_timeout_ms)
                .await?;
            sleep_cycle(card).await?;

            card.block_write(start, cnt, wr).await?;
            sleep_cycle(card).await?;

            let rd = rd.get_mut(..len).ok_or(WidgetError::BufferTooSmall)?;
            rd.fill(0);
            card.block_read(start, cnt, rd).await?;
            check_data_match(rd, wr, config.mismatch_limit)?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn counts_step_by_a_quarter() {
        let config = WidgetConfig {
            block_count: 32,
            ..WidgetConfig::default()
        };
        assert_eq!(block_counts(&config).collect::<Vec<_>>(), [1, 10, 19, 28]);
        let one = WidgetConfig {
            block_count: 1,
            ..WidgetConfig::default()
        };
        assert_eq!(block_counts(&one).collect::<Vec<_>>(), [1]);
    }

    #[test]
    fn starts_cover_two_halves() {
        let config = WidgetConfig {
            start_block: 0,
            sector_count: 0x100,
            ..WidgetConfig::default()
        };
        assert_eq!(start_blocks(&config, 1).collect::<Vec<_>>(), [0, 128]);
        assert_eq!(start_blocks(&config, 28).collect::<Vec<_>>(), [0, 101, 202]);
    }

    #[test]
    fn oversized_count_runs_once() {
        let config = WidgetConfig {
            start_block: 0,
            sector_count: 16,
            ..WidgetConfig::default()
        };
        assert_eq!(start_blocks(&config, 32).collect::<Vec<_>>(), [0]);
    }
}
