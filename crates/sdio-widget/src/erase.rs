//! Erase, trim and discard verification.
//!
//! ERASE and SECURE_ERASE work on whole erase groups, so a range that starts
//! mid-group clears the whole group it starts in and, if it crosses a
//! boundary, the next one as well. The checks read back the group around the
//! range and probe the start of the following groups to make sure nothing
//! past the expected groups was touched. Trim variants work on write blocks:
//! the range itself is cleared and a short tail after it must survive.

use apollo_hal::bits::unstuff_bits;
use apollo_hal::sdhc::CardHost;
use apollo_hal::{Card, EraseType, ExtCsdField, XferMode};
use embedded_hal::delay::DelayNs;

use crate::pattern::{check_data_match, first_mismatches};
use crate::{block_bytes, WidgetConfig, WidgetError};

/// Groups written ahead of the erase passes.
const WRITTEN_GROUPS: u32 = 4;
/// Groups erased in turn.
const ERASED_GROUPS: u32 = 3;
/// HC_ERASE_GRP_SIZE unit.
const HC_ERASE_UNIT_BYTES: u32 = 512 * 1024;

/// Check that `rd` holds the card's erased value (EXT_CSD
/// ERASED_MEM_CONT: `0xFF` when set, else `0x00`).
pub fn erase_check<H: CardHost, D: DelayNs>(
    card: &Card<H, D>,
    rd: &[u8],
    limit: u32,
) -> Result<(), WidgetError> {
    let erased = if card.ext_csd_field(ExtCsdField::ErasedMemCont) != 0 {
        0xFF
    } else {
        0x00
    };
    match first_mismatches(rd.iter().map(|b| (*b, erased)), limit) {
        None => {
            #[cfg(feature = "defmt")]
            defmt::debug!("erase check: {=usize} bytes of {=u8:#x}", rd.len(), erased);
            Ok(())
        }
        Some((offset, count)) => Err(WidgetError::EraseMismatch { offset, count }),
    }
}

/// Erase group size in blocks: HC_ERASE_GRP_SIZE × 512 KiB when
/// ERASE_GROUP_DEF is set, else (ERASE_GRP_SIZE + 1) × (ERASE_GRP_MULT + 1)
/// from the CSD.
pub fn erase_group_size<H: CardHost, D: DelayNs>(card: &Card<H, D>) -> u32 {
    if card.ext_csd_field(ExtCsdField::EraseGroupDef) != 0 {
        let units = card.ext_csd_field(ExtCsdField::HcEraseGrpSize);
        HC_ERASE_UNIT_BYTES
            .saturating_mul(units)
            .checked_div(card.info().blksize)
            .unwrap_or(0)
    } else {
        let size = unstuff_bits(card.csd(), 37, 5);
        let mult = unstuff_bits(card.csd(), 42, 5);
        size.saturating_add(1).saturating_mul(mult.saturating_add(1))
    }
}

async fn read_into<'b, H: CardHost, D: DelayNs>(
    card: &mut Card<H, D>,
    blk: u32,
    cnt: u32,
    rd: &'b mut [u8],
) -> Result<&'b [u8], WidgetError> {
    let buf = rd
        .get_mut(..block_bytes(cnt)?)
        .ok_or(WidgetError::BufferTooSmall)?;
    card.block_read(blk, cnt, buf).await?;
    #[cfg(feature = "defmt")]
    defmt::debug!("checking {=u32}+{=u32}", blk, cnt);
    Ok(buf)
}

fn written(wr: &[u8], from_blk: u32, cnt: u32) -> Result<&[u8], WidgetError> {
    let start = block_bytes(from_blk)?;
    let end = start
        .checked_add(block_bytes(cnt)?)
        .ok_or(WidgetError::InvalidConfig)?;
    wr.get(start..end).ok_or(WidgetError::BufferTooSmall)
}

/// Erase `config.erase_blocks` at `start_block + offset` with
/// `config.erase_type` and verify the groups around it.
///
/// `wr` holds what was written at the start of every group; the probe at
/// the group after the erased ones must still read back as `wr`.
pub async fn emmc_erase<H: CardHost, D: DelayNs>(
    card: &mut Card<H, D>,
    config: &WidgetConfig,
    start_block: u32,
    offset: u32,
    group: u32,
    wr: &[u8],
    rd: &mut [u8],
) -> Result<(), WidgetError> {
    let kind = config.erase_type;
    let cnt = config.erase_blocks;
    let probe = config.erase_probe_blocks;
    let limit = config.mismatch_limit;
    let blk = start_block
        .checked_add(offset)
        .ok_or(WidgetError::InvalidConfig)?;
    let misalign = blk.checked_rem(group).ok_or(WidgetError::InvalidConfig)?;
    let next = blk.checked_add(group).ok_or(WidgetError::InvalidConfig)?;
    let check_untouched = offset < group.saturating_mul(2);

    card.block_erase(blk, cnt, kind, config.erase_timeout(kind))
        .await?;
    rd.fill(0x55);

    if misalign == 0 {
        let data = read_into(card, blk, cnt, rd).await?;
        erase_check(card, data, limit)?;
        if check_untouched {
            rd.fill(0);
            let data = read_into(card, next, probe, rd).await?;
            check_data_match(data, written(wr, 0, probe)?, limit)?;
        }
        return Ok(());
    }

    // Start of the group the range begins in.
    let data = read_into(card, blk.saturating_sub(misalign), cnt, rd).await?;
    erase_check(card, data, limit)?;
    let data = read_into(card, blk, cnt, rd).await?;
    erase_check(card, data, limit)?;

    // The range crossed into the next group.
    rd.fill(0x55);
    let data = read_into(card, next, probe, rd).await?;
    erase_check(card, data, limit)?;

    if check_untouched {
        rd.fill(0);
        let after = next.checked_add(group).ok_or(WidgetError::InvalidConfig)?;
        let data = read_into(card, after, probe, rd).await?;
        check_data_match(data, written(wr, 0, probe)?, limit)?;
    }
    Ok(())
}

/// Trim-style erase of `blk_cnt - config.trim_tail_blocks` blocks at
/// `start_blk`, then verify the range and the untouched tail.
///
/// DISCARD leaves contents undefined, so only the command is checked.
/// SECURE_TRIM1 only marks blocks; they must still hold `wr`.
pub async fn trim_erase<H: CardHost, D: DelayNs>(
    card: &mut Card<H, D>,
    config: &WidgetConfig,
    start_blk: u32,
    blk_cnt: u32,
    wr: &[u8],
    rd: &mut [u8],
) -> Result<(), WidgetError> {
    let kind = config.erase_type;
    let limit = config.mismatch_limit;
    let tail = config.trim_tail_blocks;
    let head = blk_cnt.checked_sub(tail).ok_or(WidgetError::InvalidConfig)?;
    let timeout = if kind == EraseType::SecureTrim2 {
        config.secure_erase_timeout_ms
    } else {
        config.erase_timeout_ms
    };

    card.block_erase(start_blk, head, kind, timeout).await?;
    if kind == EraseType::Discard {
        #[cfg(feature = "defmt")]
        defmt::info!("discard: skipping block checks");
        return Ok(());
    }

    if kind == EraseType::SecureTrim1 {
        rd.fill(0);
        let data = read_into(card, start_blk, head, rd).await?;
        check_data_match(data, written(wr, 0, head)?, limit)?;
    } else {
        rd.fill(0x55);
        let data = read_into(card, start_blk, head, rd).await?;
        erase_check(card, data, limit)?;
    }

    let tail_blk = start_blk
        .checked_add(head)
        .ok_or(WidgetError::InvalidConfig)?;
    let data = read_into(card, tail_blk, tail, rd).await?;
    check_data_match(data, written(wr, head, tail)?, limit)
}

/// Full erase sweep with `config.erase_type`.
///
/// For each start block: write `wr` at the start of four consecutive erase
/// groups (skipped for SECURE_TRIM2, which purges what an earlier
/// SECURE_TRIM1 sweep marked), then erase and verify at the first three.
pub async fn test_erase<H: CardHost, D: DelayNs>(
    card: &mut Card<H, D>,
    config: &WidgetConfig,
    wr: &[u8],
    rd: &mut [u8],
) -> Result<(), WidgetError> {
    let cnt = config.erase_blocks;
    let len = block_bytes(cnt)?;
    if config.erase_probe_blocks > cnt || wr.len() < len || rd.len() < len {
        return Err(WidgetError::BufferTooSmall);
    }
    let group = erase_group_size(card);
    if group == 0 {
        return Err(WidgetError::InvalidConfig);
    }
    #[cfg(feature = "defmt")]
    defmt::info!("erase group is {=u32} blocks", group);
    card.set_xfer_mode(XferMode::Adma);

    let step = (config.sector_count / 2)
        .checked_sub(group.saturating_mul(WRITTEN_GROUPS))
        .and_then(|s| s.checked_sub(config.erase_probe_blocks))
        .filter(|s| *s > 0);
    let wr = written(wr, 0, cnt)?;

    let mut start = config.start_block;
    while start < config.sector_count {
        #[cfg(feature = "defmt")]
        defmt::info!("erase sweep: start {=u32}, {=u32} blocks", start, cnt);

        if config.erase_type != EraseType::SecureTrim2 {
            for i in 0..WRITTEN_GROUPS {
                let blk = start
                    .checked_add(group.saturating_mul(i))
                    .ok_or(WidgetError::InvalidConfig)?;
                card.block_write(blk, cnt, wr).await?;
                rd.fill(0);
                let data = read_into(card, blk, cnt, rd).await?;
                check_data_match(data, wr, config.mismatch_limit)?;
            }
        }

        for i in 0..ERASED_GROUPS {
            let offset = group.saturating_mul(i);
            match config.erase_type {
                EraseType::Erase | EraseType::SecureErase => {
                    emmc_erase(card, config, start, offset, group, wr, rd).await?;
                }
                _ => {
                    let blk = start
                        .checked_add(offset)
                        .ok_or(WidgetError::InvalidConfig)?;
                    trim_erase(card, config, blk, cnt, wr, rd).await?;
                }
            }
        }

        match step.and_then(|s| start.checked_add(s)) {
            Some(next) => start = next,
            None => break,
        }
    }
    Ok(())
}
