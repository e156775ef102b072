//! `embedded_sdmmc::BlockDevice` over an eMMC [`Card`], so a FAT volume on
//! the user area can be opened with a `VolumeManager`.

use core::cell::RefCell;

use embedded_hal::delay::DelayNs;
use embedded_sdmmc::{Block, BlockCount, BlockDevice, BlockIdx};

use crate::card::{Card, CardError};
use crate::sdhc::CardHost;

/// Synchronous block-device view of an initialised card.
///
/// Each call drives the async card operation to completion with
/// `embassy_futures::block_on`.
pub struct EmmcBlockDevice<H, D> {
    card: RefCell<Card<H, D>>,
}

impl<H: CardHost, D: DelayNs> EmmcBlockDevice<H, D> {
    /// Wrap a card that is already in the transfer state with 512-byte
    /// blocks.
    pub fn new(card: Card<H, D>) -> Result<Self, CardError> {
        if card.info().blksize != Block::LEN_U32 {
            return Err(CardError::InvalidOperation);
        }
        Ok(Self {
            card: RefCell::new(card),
        })
    }

    /// Give the card back.
    pub fn into_inner(self) -> Card<H, D> {
        self.card.into_inner()
    }

    fn with_card<T>(
        &self,
        f: impl FnOnce(&mut Card<H, D>) -> Result<T, CardError>,
    ) -> Result<T, CardError> {
        let mut card = self
            .card
            .try_borrow_mut()
            .map_err(|_| CardError::InvalidState)?;
        f(&mut card)
    }
}

impl<H: CardHost, D: DelayNs> BlockDevice for EmmcBlockDevice<H, D> {
    type Error = CardError;

    fn read(
        &self,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
        _reason: &str,
    ) -> Result<(), Self::Error> {
        self.with_card(|card| {
            for (blk, block) in (start_block_idx.0..).zip(blocks.iter_mut()) {
                embassy_futures::block_on(card.block_read(blk, 1, &mut block.contents))?;
            }
            Ok(())
        })
    }

    fn write(&self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        self.with_card(|card| {
            for (blk, block) in (start_block_idx.0..).zip(blocks.iter()) {
                embassy_futures::block_on(card.block_write(blk, 1, &block.contents))?;
            }
            Ok(())
        })
    }

    fn num_blocks(&self) -> Result<BlockCount, Self::Error> {
        self.with_card(|card| Ok(BlockCount(card.info().max_blocks)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::config::CardConfig;
    use crate::mocks::{SimEmmc, SimEmmcConfig};
    use embedded_hal_mock::eh1::delay::NoopDelay;

    fn device() -> EmmcBlockDevice<SimEmmc, NoopDelay> {
        let mut card = Card::new(
            SimEmmc::new(SimEmmcConfig::default()),
            NoopDelay::new(),
            CardConfig::default(),
        );
        embassy_futures::block_on(async {
            card.find_card().await.unwrap();
            card.init().await.unwrap();
        });
        EmmcBlockDevice::new(card).unwrap()
    }

    #[test]
    fn blocks_round_trip() {
        let dev = device();
        let mut out = [Block::new(), Block::new()];
        out[0].contents.fill(0x11);
        out[1].contents.fill(0x22);
        dev.write(&out, BlockIdx(40)).unwrap();

        let mut back = [Block::new(), Block::new()];
        dev.read(&mut back, BlockIdx(40), "round trip").unwrap();
        assert_eq!(back[0].contents, [0x11; 512]);
        assert_eq!(back[1].contents, [0x22; 512]);
    }

    #[test]
    fn reports_sector_count() {
        let dev = device();
        assert_eq!(
            dev.num_blocks().unwrap(),
            BlockCount(SimEmmcConfig::default().sectors)
        );
    }

    #[test]
    fn reads_past_end_fail() {
        let dev = device();
        let mut block = [Block::new()];
        let end = BlockIdx(SimEmmcConfig::default().sectors);
        assert_eq!(
            dev.read(&mut block, end, "past end"),
            Err(CardError::OutOfRange)
        );
    }

    #[test]
    fn uninitialised_card_rejected() {
        let card = Card::new(
            SimEmmc::new(SimEmmcConfig::default()),
            NoopDelay::new(),
            CardConfig::default(),
        );
        assert!(EmmcBlockDevice::new(card).is_err());
    }
}
