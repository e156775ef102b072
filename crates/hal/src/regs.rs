//! Register bus abstraction.
//!
//! Every driver in this crate reaches silicon through [`RegisterBus`], a
//! 32-bit word-addressed view of the Apollo5 peripheral space. On hardware
//! [`Mmio`] performs volatile accesses; tests substitute a recording bus
//! (see [`crate::mocks::MockBus`]) so register write order can be asserted.

use embedded_hal::delay::DelayNs;

/// 32-bit memory-mapped register access.
pub trait RegisterBus {
    /// Read the word at `addr`.
    fn read(&mut self, addr: u32) -> u32;

    /// Write `value` to the word at `addr`.
    fn write(&mut self, addr: u32, value: u32);

    /// Read-modify-write.
    fn modify<F: FnOnce(u32) -> u32>(&mut self, addr: u32, f: F) {
        let value = self.read(addr);
        self.write(addr, f(value));
    }

    /// Set every bit of `mask`.
    fn set_bits(&mut self, addr: u32, mask: u32) {
        self.modify(addr, |v| v | mask);
    }

    /// Clear every bit of `mask`.
    fn clear_bits(&mut self, addr: u32, mask: u32) {
        self.modify(addr, |v| v & !mask);
    }

    /// Extract `field` from the word at `addr`.
    fn read_field(&mut self, addr: u32, field: Field) -> u32 {
        field.extract(self.read(addr))
    }

    /// Replace `field` in the word at `addr`, leaving other bits untouched.
    fn write_field(&mut self, addr: u32, field: Field, value: u32) {
        self.modify(addr, |v| field.insert(v, value));
    }
}

impl<T: RegisterBus + ?Sized> RegisterBus for &mut T {
    fn read(&mut self, addr: u32) -> u32 {
        (**self).read(addr)
    }

    fn write(&mut self, addr: u32, value: u32) {
        (**self).write(addr, value);
    }
}

/// A contiguous bit field inside a 32-bit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Field {
    /// Bit position of the least significant bit.
    pub pos: u8,
    /// Width in bits (1..=32).
    pub width: u8,
}

impl Field {
    /// Construct a field at `pos` spanning `width` bits.
    pub const fn new(pos: u8, width: u8) -> Self {
        Self { pos, width }
    }

    /// Largest value the field can hold.
    pub const fn max(self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            (1u32 << self.width).wrapping_sub(1)
        }
    }

    /// Mask of the field's bits in register position.
    pub const fn mask(self) -> u32 {
        self.max().wrapping_shl(self.pos as u32)
    }

    /// Extract the field value from a register word.
    pub const fn extract(self, word: u32) -> u32 {
        word.wrapping_shr(self.pos as u32) & self.max()
    }

    /// Return `word` with the field replaced by `value`.
    ///
    /// Bits of `value` above the field width are discarded.
    pub const fn insert(self, word: u32, value: u32) -> u32 {
        (word & !self.mask()) | ((value & self.max()).wrapping_shl(self.pos as u32))
    }

    /// `value` positioned into the field with all other bits zero.
    pub const fn val(self, value: u32) -> u32 {
        self.insert(0, value)
    }
}

/// A register poll ran out of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PollTimeout;

/// Poll `addr` once per microsecond until `(reg & mask) == value` matches
/// `equal`, for at most `max_us` attempts.
pub fn poll_until<B, D>(
    bus: &mut B,
    delay: &mut D,
    addr: u32,
    mask: u32,
    value: u32,
    equal: bool,
    max_us: u32,
) -> Result<(), PollTimeout>
where
    B: RegisterBus + ?Sized,
    D: DelayNs + ?Sized,
{
    for _ in 0..max_us {
        if ((bus.read(addr) & mask) == value) == equal {
            return Ok(());
        }
        delay.delay_us(1);
    }
    Err(PollTimeout)
}

/// Volatile MMIO bus over the physical address space.
#[cfg(feature = "hardware")]
pub struct Mmio {
    _private: (),
}

#[cfg(feature = "hardware")]
impl Mmio {
    /// Create the MMIO bus.
    ///
    /// # Safety
    ///
    /// The caller must only pass addresses of valid, word-aligned Apollo5
    /// peripheral registers to the resulting bus, and must not create a
    /// second bus that races on the same registers.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

#[cfg(feature = "hardware")]
impl RegisterBus for Mmio {
    fn read(&mut self, addr: u32) -> u32 {
        // SAFETY: `Mmio::new` contract: addr is a valid, aligned register.
        unsafe { core::ptr::read_volatile(addr as *const u32) }
    }

    fn write(&mut self, addr: u32, value: u32) {
        // SAFETY: `Mmio::new` contract: addr is a valid, aligned register.
        unsafe { core::ptr::write_volatile(addr as *mut u32, value) }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::MockBus;
    use embedded_hal_mock::eh1::delay::NoopDelay;

    #[test]
    fn field_mask_and_max() {
        let f = Field::new(4, 3);
        assert_eq!(f.max(), 0b111);
        assert_eq!(f.mask(), 0b111_0000);
        assert_eq!(Field::new(0, 32).max(), u32::MAX);
    }

    #[test]
    fn field_insert_truncates_to_width() {
        let f = Field::new(8, 4);
        assert_eq!(f.insert(0xFFFF_FFFF, 0x1F), 0xFFFF_FFFF);
        assert_eq!(f.insert(0, 0x1F), 0xF00);
        assert_eq!(f.extract(0xABCD), 0xB);
    }

    #[test]
    fn write_field_preserves_neighbours() {
        let mut bus = MockBus::new();
        bus.preset(0x100, 0xFFFF_0000);
        bus.write_field(0x100, Field::new(0, 8), 0x5A);
        assert_eq!(bus.peek(0x100), 0xFFFF_005A);
    }

    #[test]
    fn poll_until_succeeds_when_bits_match() {
        let mut bus = MockBus::new();
        bus.preset(0x10, 0b100);
        let r = poll_until(&mut bus, &mut NoopDelay::new(), 0x10, 0b100, 0b100, true, 5);
        assert!(r.is_ok());
    }

    #[test]
    fn poll_until_times_out_after_max_attempts() {
        let mut bus = MockBus::new();
        let r = poll_until(&mut bus, &mut NoopDelay::new(), 0x10, 1, 1, true, 5);
        assert_eq!(r, Err(PollTimeout));
        assert_eq!(bus.read_count(0x10), 5);
    }

    #[test]
    fn poll_until_waits_for_change() {
        let mut bus = MockBus::new();
        bus.preset(0x10, 1);
        // Waiting for (reg & 1) != 1 never resolves while the bit stays set.
        assert!(poll_until(&mut bus, &mut NoopDelay::new(), 0x10, 1, 1, false, 3).is_err());
        bus.preset(0x10, 0);
        assert!(poll_until(&mut bus, &mut NoopDelay::new(), 0x10, 1, 1, false, 3).is_ok());
    }
}
