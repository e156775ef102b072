//! Throughput per block count.

use apollo_hal::sdhc::CardHost;
use apollo_hal::{Card, EraseType};
use embassy_time::Instant;
use embedded_hal::delay::DelayNs;
use heapless::Vec;

use crate::pattern::check_data_match;
use crate::rw::{block_counts, start_blocks};
use crate::{block_bytes, WidgetConfig, WidgetError};

/// Rows a benchmark run can produce.
pub const MAX_ROWS: usize = 8;

/// Average throughput for one block count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BenchmarkRow {
    /// Blocks per transfer.
    pub blocks: u32,
    /// Write throughput, kB/s.
    pub write_kb_s: u32,
    /// Read throughput, kB/s.
    pub read_kb_s: u32,
}

#[derive(Clone, Copy)]
enum Direction {
    Write,
    Read,
}

/// Mean bytes per millisecond over `loops` transfers. Transfers under a
/// millisecond count as one.
async fn timed<H: CardHost, D: DelayNs>(
    card: &mut Card<H, D>,
    dir: Direction,
    blk: u32,
    cnt: u32,
    wr: &[u8],
    rd: &mut [u8],
    loops: u32,
) -> Result<u64, WidgetError> {
    let bytes = u64::from(cnt).saturating_mul(512);
    let mut sum = 0u64;
    for _ in 0..loops {
        let begin = Instant::now();
        match dir {
            Direction::Write => card.block_write(blk, cnt, wr).await?,
            Direction::Read => card.block_read(blk, cnt, rd).await?,
        };
        let ms = begin.elapsed().as_millis().max(1);
        sum = sum.saturating_add(bytes.checked_div(ms).unwrap_or(0));
    }
    Ok(sum.checked_div(u64::from(loops)).unwrap_or(0))
}

fn kb_s(sum: u64, samples: u64) -> u32 {
    u32::try_from(sum.checked_div(samples).unwrap_or(0)).unwrap_or(u32::MAX)
}

/// For every block count: erase, time `config.benchmark_loops` writes and
/// reads at each start block, verify the data, and average.
pub async fn benchmark_write_read<H: CardHost, D: DelayNs>(
    card: &mut Card<H, D>,
    config: &WidgetConfig,
    wr: &[u8],
    rd: &mut [u8],
) -> Result<Vec<BenchmarkRow, MAX_ROWS>, WidgetError> {
    let max = block_bytes(config.block_count)?;
    if wr.len() < max || rd.len() < max {
        return Err(WidgetError::BufferTooSmall);
    }
    card.set_xfer_mode(config.xfer_mode);

    let mut rows = Vec::new();
    for cnt in block_counts(config) {
        let len = block_bytes(cnt)?;
        let wr = wr.get(..len).ok_or(WidgetError::BufferTooSmall)?;
        let mut samples = 0u64;
        let mut write_sum = 0u64;
        let mut read_sum = 0u64;
        for start in start_blocks(config, cnt) {
            card.block_erase(start, cnt, EraseType::Erase, config.erase_timeout_ms)
                .await?;
            let rd = rd.get_mut(..len).ok_or(WidgetError::BufferTooSmall)?;
            let w = timed(card, Direction::Write, start, cnt, wr, rd, config.benchmark_loops).await?;
            rd.fill(0);
            let r = timed(card, Direction::Read, start, cnt, wr, rd, config.benchmark_loops).await?;
            check_data_match(rd, wr, config.mismatch_limit)?;
            write_sum = write_sum.saturating_add(w);
            read_sum = read_sum.saturating_add(r);
            samples = samples.saturating_add(1);
        }
        let row = BenchmarkRow {
            blocks: cnt,
            write_kb_s: kb_s(write_sum, samples),
            read_kb_s: kb_s(read_sum, samples),
        };
        #[cfg(feature = "defmt")]
        defmt::info!(
            "{=u32} blocks: wr {=u32} kB/s, rd {=u32} kB/s",
            row.blocks,
            row.write_kb_s,
            row.read_kb_s
        );
        rows.push(row).map_err(|_| WidgetError::TableFull)?;
    }
    Ok(rows)
}
