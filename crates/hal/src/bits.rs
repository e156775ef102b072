//! Field extraction from CID/CSD responses and EXT_CSD.

/// Extract `size` bits starting at bit `start` of a 128-bit register held
/// least significant word first. Bits past bit 127 read as zero.
pub fn unstuff_bits(reg: &[u32; 4], start: u32, size: u32) -> u32 {
    if size == 0 {
        return 0;
    }
    let index = usize::try_from(start / 32).unwrap_or(usize::MAX);
    let shift = start % 32;
    let lo = reg.get(index).copied().unwrap_or(0).wrapping_shr(shift);
    let hi = if shift != 0 && shift.saturating_add(size) > 32 {
        reg.get(index.saturating_add(1))
            .copied()
            .unwrap_or(0)
            .wrapping_shl(32u32.saturating_sub(shift))
    } else {
        0
    };
    let mask = if size >= 32 {
        u32::MAX
    } else {
        1u32.wrapping_shl(size).wrapping_sub(1)
    };
    (lo | hi) & mask
}

/// Little-endian value of `size` (1..=4) bytes of `ext` at `start`.
/// Bytes outside `ext` read as zero.
pub fn unstuff_bytes(ext: &[u8], start: usize, size: usize) -> u32 {
    (0..size.min(4)).fold(0u32, |acc, i| {
        let byte = ext.get(start.saturating_add(i)).copied().unwrap_or(0);
        #[allow(clippy::cast_possible_truncation)] // i < 4
        let shift = (i as u32).saturating_mul(8);
        acc | u32::from(byte).wrapping_shl(shift)
    })
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation
)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn field_within_one_word() {
        let reg = [0x0000_0F00, 0, 0, 0];
        assert_eq!(unstuff_bits(&reg, 8, 4), 0xF);
        assert_eq!(unstuff_bits(&reg, 8, 3), 0x7);
    }

    #[test]
    fn field_straddling_words() {
        // C_SIZE sits at bits 62..73 of the CSD.
        let mut reg = [0u32; 4];
        reg[1] = 0xC000_0000;
        reg[2] = 0x3FF;
        assert_eq!(unstuff_bits(&reg, 62, 12), 0xFFF);
    }

    #[test]
    fn top_byte_and_out_of_range() {
        let reg = [0, 0, 0, 0x1500_0000];
        assert_eq!(unstuff_bits(&reg, 120, 8), 0x15);
        assert_eq!(unstuff_bits(&reg, 128, 8), 0);
        assert_eq!(unstuff_bits(&reg, 0, 0), 0);
    }

    #[test]
    fn ext_csd_sector_count_is_little_endian() {
        let mut ext = [0u8; 512];
        ext[212..216].copy_from_slice(&[0x00, 0x00, 0x76, 0x00]);
        assert_eq!(unstuff_bytes(&ext, 212, 4), 0x0076_0000);
        assert_eq!(unstuff_bytes(&ext, 510, 4), 0);
    }

    proptest! {
        #[test]
        fn bits_match_u128_shift(words in any::<[u32; 4]>(), start in 0u32..128, size in 1u32..=32) {
            let wide = u128::from(words[0])
                | (u128::from(words[1]) << 32)
                | (u128::from(words[2]) << 64)
                | (u128::from(words[3]) << 96);
            let expected = ((wide >> start) as u32) & if size == 32 { u32::MAX } else { (1 << size) - 1 };
            prop_assert_eq!(unstuff_bits(&words, start, size), expected);
        }
    }
}
