//! Test data and comparison.

use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};

use crate::WidgetError;

/// Distinct fixed patterns [`prepare_data_pattern`] produces.
pub const PATTERN_COUNT: u32 = 6;

/// Fill `buf` with pseudo-random bytes; the same seed gives the same data.
pub fn prepare_testdata(buf: &mut [u8], seed: u32) {
    ChaCha8Rng::seed_from_u64(u64::from(seed)).fill_bytes(buf);
}

/// Fill `buf` with fixed pattern `index`:
///
/// | index | pattern                              |
/// |-------|--------------------------------------|
/// | 0     | `0x5555AAAA` words                   |
/// | 1     | `0xFFFF0000` words                   |
/// | 2     | walking one per byte                 |
/// | 3     | ramp from 1                          |
/// | 4     | ramp down from `0xFF`                |
/// | other | ramp from 0                          |
///
/// Word patterns leave a trailing partial word untouched.
pub fn prepare_data_pattern(index: u32, buf: &mut [u8]) {
    match index {
        0 => fill_words(buf, 0x5555_AAAA),
        1 => fill_words(buf, 0xFFFF_0000),
        2 => fill_bytes(buf, |i| 1u8.wrapping_shl(u32::try_from(i % 8).unwrap_or(0))),
        3 => fill_bytes(buf, |i| low_byte(i.wrapping_add(1))),
        4 => fill_bytes(buf, |i| 0xFFu8.wrapping_sub(low_byte(i))),
        _ => fill_bytes(buf, low_byte),
    }
}

fn fill_words(buf: &mut [u8], word: u32) {
    for chunk in buf.chunks_exact_mut(4) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
}

fn fill_bytes(buf: &mut [u8], f: impl Fn(usize) -> u8) {
    for (i, b) in buf.iter_mut().enumerate() {
        *b = f(i);
    }
}

#[allow(clippy::cast_possible_truncation)] // keeps the low byte
fn low_byte(i: usize) -> u8 {
    i as u8
}

/// Compare read-back data against what was written.
///
/// Counting stops once more than `limit` bytes differ.
pub fn check_data_match(rd: &[u8], wr: &[u8], limit: u32) -> Result<(), WidgetError> {
    if rd.len() != wr.len() {
        return Err(WidgetError::BufferTooSmall);
    }
    match first_mismatches(rd.iter().zip(wr).map(|(r, w)| (*r, *w)), limit) {
        None => Ok(()),
        Some((offset, count)) => Err(WidgetError::DataMismatch { offset, count }),
    }
}

/// First differing offset and the number of differences, counting up to
/// `limit + 1`.
pub(crate) fn first_mismatches(
    pairs: impl Iterator<Item = (u8, u8)>,
    limit: u32,
) -> Option<(usize, u32)> {
    let mut first = None;
    let mut count = 0u32;
    for (i, (found, expected)) in pairs.enumerate() {
        if found == expected {
            continue;
        }
        #[cfg(feature = "defmt")]
        defmt::warn!("byte {=usize}: {=u8:#x} != {=u8:#x}", i, found, expected);
        first.get_or_insert(i);
        count = count.saturating_add(1);
        if count > limit {
            break;
        }
    }
    first.map(|offset| (offset, count))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn seeded_data_repeats() {
        let mut a = [0u8; 64];
        let mut b = [0u8; 64];
        prepare_testdata(&mut a, 7);
        prepare_testdata(&mut b, 7);
        assert_eq!(a, b);
        prepare_testdata(&mut b, 8);
        assert_ne!(a, b);
    }

    #[test]
    fn word_patterns_are_little_endian() {
        let mut buf = [0u8; 10];
        prepare_data_pattern(0, &mut buf);
        assert_eq!(&buf[..4], &[0xAA, 0xAA, 0x55, 0x55]);
        assert_eq!(&buf[8..], &[0, 0]);
        prepare_data_pattern(1, &mut buf);
        assert_eq!(&buf[..4], &[0x00, 0x00, 0xFF, 0xFF]);
    }

    #[test]
    fn byte_patterns() {
        let mut buf = [0u8; 260];
        prepare_data_pattern(2, &mut buf);
        assert_eq!(&buf[..9], &[1, 2, 4, 8, 16, 32, 64, 128, 1]);
        prepare_data_pattern(3, &mut buf);
        assert_eq!((buf[0], buf[254], buf[255]), (1, 255, 0));
        prepare_data_pattern(4, &mut buf);
        assert_eq!((buf[0], buf[1], buf[256]), (0xFF, 0xFE, 0xFF));
        prepare_data_pattern(9, &mut buf);
        assert_eq!((buf[0], buf[255], buf[256]), (0, 255, 0));
    }

    #[test]
    fn mismatch_reports_first_offset() {
        let wr = [1u8, 2, 3, 4];
        assert_eq!(check_data_match(&wr, &wr, 10), Ok(()));
        assert_eq!(
            check_data_match(&[1, 9, 3, 9], &wr, 10),
            Err(WidgetError::DataMismatch { offset: 1, count: 2 })
        );
    }

    #[test]
    fn mismatch_count_stops_past_limit() {
        let wr = [0u8; 100];
        let rd = [1u8; 100];
        assert_eq!(
            check_data_match(&rd, &wr, 3),
            Err(WidgetError::DataMismatch { offset: 0, count: 4 })
        );
    }

    #[test]
    fn length_mismatch_rejected() {
        assert_eq!(check_data_match(&[0; 3], &[0; 4], 1), Err(WidgetError::BufferTooSmall));
    }
}
