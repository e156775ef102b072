//! Property tests for the SDHC helpers and register fields.

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation
)]

use apollo_hal::sdhc::regs as sr;
use apollo_hal::sdhc::{adma2_build, clock_divider};
use apollo_hal::Field;
use proptest::prelude::*;

proptest! {
    #[test]
    fn divided_clock_never_exceeds_target(base in 1_000_000u32..200_000_000, target in 100_000u32..200_000_000) {
        let (div, actual) = clock_divider(base, target);
        prop_assert!(actual <= base);
        if target >= base {
            prop_assert_eq!((div, actual), (0, base));
        } else {
            prop_assert!(div >= 1);
            prop_assert!(div <= 1023);
            if div < 1023 {
                prop_assert!(actual <= target);
            }
        }
    }

    #[test]
    fn adma2_descriptors_cover_length(len in 1u32..(sr::ADMA2_DESC_BYTES * 32), addr in any::<u32>()) {
        let mut table = [0u64; sr::ADMA2_DESC_COUNT];
        let used = adma2_build(&mut table, addr, len).unwrap();
        prop_assert_eq!(used as u32, len.div_ceil(sr::ADMA2_DESC_BYTES));

        let mut total = 0u32;
        for (i, desc) in table[..used].iter().enumerate() {
            let chunk = ((desc >> 16) & 0xFFFF) as u32;
            prop_assert_eq!((desc >> 32) as u32, addr.wrapping_add(total));
            prop_assert!(desc & sr::ADMA2_VALID != 0);
            prop_assert_eq!(desc & sr::ADMA2_END != 0, i + 1 == used);
            total += chunk;
        }
        prop_assert_eq!(total, len);
    }

    #[test]
    fn field_insert_only_touches_field(pos in 0u8..32, width in 1u8..=32, word in any::<u32>(), value in any::<u32>()) {
        prop_assume!(u32::from(pos) + u32::from(width) <= 32);
        let field = Field::new(pos, width);
        let out = field.insert(word, value);
        prop_assert_eq!(field.extract(out), value & field.max());
        prop_assert_eq!(out & !field.mask(), word & !field.mask());
    }
}

#[test]
fn adma2_rejects_oversized_transfer() {
    let mut table = [0u64; 2];
    assert!(adma2_build(&mut table, 0, sr::ADMA2_DESC_BYTES * 2 + 1).is_err());
    assert!(adma2_build(&mut table, 0, 0).is_err());
}
