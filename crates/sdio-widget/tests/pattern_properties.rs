//! Comparison properties over random data.

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use proptest::prelude::*;
use sdio_widget::{check_data_match, prepare_data_pattern, prepare_testdata, WidgetError, PATTERN_COUNT};

proptest! {
    #[test]
    fn single_flip_found_at_its_offset(seed in any::<u32>(), len in 1usize..2048, pick in any::<usize>(), flip in 1u8..=255) {
        let mut wr = vec![0u8; len];
        prepare_testdata(&mut wr, seed);
        let mut rd = wr.clone();
        let at = pick % len;
        rd[at] ^= flip;
        prop_assert_eq!(
            check_data_match(&rd, &wr, 10),
            Err(WidgetError::DataMismatch { offset: at, count: 1 })
        );
    }

    #[test]
    fn every_pattern_matches_itself(index in 0..PATTERN_COUNT, len in 0usize..1024) {
        let mut a = vec![0u8; len];
        let mut b = vec![0xEEu8; len];
        prepare_data_pattern(index, &mut a);
        prepare_data_pattern(index, &mut b);
        // Word patterns leave a trailing partial word alone.
        let whole = if index < 2 { len / 4 * 4 } else { len };
        prop_assert!(check_data_match(&a[..whole], &b[..whole], 0).is_ok());
    }
}
