//! Scatter/gather write/read sweep.

use apollo_hal::sdhc::CardHost;
use apollo_hal::{Card, EraseType, XferMode};
use embedded_hal::delay::DelayNs;

use crate::pattern::check_data_match;
use crate::rw::{sleep_cycle, start_blocks};
use crate::{block_bytes, WidgetConfig, WidgetError};

/// Most segments one scatter transfer takes.
pub const MAX_IO_VECTORS: usize = 8;

/// Scatter write/read sweep over `config.io_vector_count` segments of
/// `blocks_per_vector` blocks each.
///
/// `wr` and `rd` are cut into consecutive segments, so the card sees one
/// multi-block write and one multi-block read per start block. Each step is
/// bracketed by a sleep/wake cycle and every segment is compared on its own.
/// The host is switched to ADMA for the sweep.
pub async fn test_scatter_write_read<H: CardHost, D: DelayNs>(
    card: &mut Card<H, D>,
    config: &WidgetConfig,
    blocks_per_vector: u32,
    wr: &[u8],
    rd: &mut [u8],
) -> Result<(), WidgetError> {
    let vectors = usize::try_from(config.io_vector_count).map_err(|_| WidgetError::InvalidConfig)?;
    if vectors == 0 || vectors > MAX_IO_VECTORS || blocks_per_vector == 0 {
        return Err(WidgetError::InvalidConfig);
    }
    let total = blocks_per_vector
        .checked_mul(config.io_vector_count)
        .ok_or(WidgetError::InvalidConfig)?;
    let seg_len = block_bytes(blocks_per_vector)?;
    let len = block_bytes(total)?;
    let wr = wr.get(..len).ok_or(WidgetError::BufferTooSmall)?;
    let rd = rd.get_mut(..len).ok_or(WidgetError::BufferTooSmall)?;
    card.set_xfer_mode(XferMode::Adma);

    for start in start_blocks(config, total) {
        #[cfg(feature = "defmt")]
        defmt::info!(
            "scatter: start {=u32}, {=usize} x {=u32} blocks",
            start,
            vectors,
            blocks_per_vector
        );

        sleep_cycle(card).await?;
        card.block_erase(start, total, EraseType::Erase, config.erase_timeout_ms)
            .await?;
        sleep_cycle(card).await?;

        let mut wsegs: [&[u8]; MAX_IO_VECTORS] = Default::default();
        for (seg, chunk) in wsegs.iter_mut().zip(wr.chunks_exact(seg_len)) {
            *seg = chunk;
        }
        let wsegs = wsegs.get(..vectors).ok_or(WidgetError::InvalidConfig)?;
        card.block_write_vectored(start, wsegs).await?;
        sleep_cycle(card).await?;

        rd.fill(0);
        {
            let mut rsegs: [&mut [u8]; MAX_IO_VECTORS] = Default::default();
            for (seg, chunk) in rsegs.iter_mut().zip(rd.chunks_exact_mut(seg_len)) {
                *seg = chunk;
            }
            let rsegs = rsegs.get_mut(..vectors).ok_or(WidgetError::InvalidConfig)?;
            card.block_read_vectored(start, rsegs).await?;
        }

        for (r, w) in rd.chunks_exact(seg_len).zip(wr.chunks_exact(seg_len)) {
            check_data_match(r, w, config.mismatch_limit)?;
        }
    }
    Ok(())
}
