//! Cortex-M55 core control used by the power sequences.
//!
//! The rail-switching sequences need a handful of core operations the
//! register bus cannot express: cache maintenance, `WFI`, barrier
//! instructions and NVIC masking. [`CpuCore`] collects them so the sequences
//! stay generic; [`CortexCore`] is the `hardware` implementation and
//! [`crate::mocks::MockCore`] records calls for tests.

/// Core operations required around VDDCPU rail switching.
pub trait CpuCore {
    /// Saved interrupt mask, returned by [`CpuCore::mask_all_irqs`].
    type IrqMask: Copy;

    /// Disable I- and D-cache, returning whether each was enabled.
    fn caches_disable(&mut self) -> CacheState;

    /// Re-enable the caches recorded in `state`.
    fn caches_restore(&mut self, state: CacheState);

    /// Set or clear SCB.SCR.SLEEPDEEP.
    fn set_sleep_deep(&mut self, deep: bool);

    /// Wait for interrupt.
    fn wfi(&mut self);

    /// Instruction synchronisation barrier.
    fn isb(&mut self);

    /// Drain the system-bus write buffer so prior register writes land.
    fn sysbus_write_flush(&mut self);

    /// Mask every interrupt at the NVIC/PRIMASK level and return the prior
    /// state. Unlike a critical section, pending interrupts still wake `WFI`.
    fn mask_all_irqs(&mut self) -> Self::IrqMask;

    /// Restore a mask returned by [`CpuCore::mask_all_irqs`].
    fn restore_irqs(&mut self, mask: Self::IrqMask);

    /// Enable an NVIC interrupt line.
    fn enable_irq(&mut self, irq: u16);

    /// Clear a pending NVIC interrupt line.
    fn clear_pending_irq(&mut self, irq: u16);
}

/// Cache enables captured before a rail switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CacheState {
    /// Instruction cache was enabled.
    pub icache: bool,
    /// Data cache was enabled.
    pub dcache: bool,
}

#[cfg(feature = "hardware")]
pub use hw::CortexCore;

#[cfg(feature = "hardware")]
mod hw {
    use super::{CacheState, CpuCore};
    use cortex_m::peripheral::{NVIC, SCB};

    /// Number of NVIC ISER/ICPR words on Apollo5.
    const NVIC_WORDS: usize = 8;

    /// [`CpuCore`] over the Cortex-M core peripherals.
    pub struct CortexCore {
        scb: SCB,
        nvic: NVIC,
        cpuid: cortex_m::peripheral::CPUID,
    }

    impl CortexCore {
        /// Take ownership of the core peripherals the sequences touch.
        pub fn new(scb: SCB, nvic: NVIC, cpuid: cortex_m::peripheral::CPUID) -> Self {
            Self { scb, nvic, cpuid }
        }
    }

    /// Opaque NVIC enable snapshot.
    #[derive(Clone, Copy)]
    pub struct NvicMask([u32; NVIC_WORDS]);

    /// Wrapper so NVIC lines can be named by number.
    #[derive(Clone, Copy)]
    struct Line(u16);

    // SAFETY: any line number below the device's NVIC size is a valid interrupt.
    unsafe impl cortex_m::interrupt::InterruptNumber for Line {
        fn number(self) -> u16 {
            self.0
        }
    }

    impl CpuCore for CortexCore {
        type IrqMask = NvicMask;

        fn caches_disable(&mut self) -> CacheState {
            let state = CacheState {
                icache: SCB::icache_enabled(),
                dcache: SCB::dcache_enabled(),
            };
            if state.dcache {
                self.scb.disable_dcache(&mut self.cpuid);
            }
            if state.icache {
                self.scb.disable_icache();
            }
            state
        }

        fn caches_restore(&mut self, state: CacheState) {
            if state.icache {
                self.scb.enable_icache();
            }
            if state.dcache {
                self.scb.enable_dcache(&mut self.cpuid);
            }
        }

        fn set_sleep_deep(&mut self, deep: bool) {
            if deep {
                self.scb.set_sleepdeep();
            } else {
                self.scb.clear_sleepdeep();
            }
        }

        fn wfi(&mut self) {
            cortex_m::asm::wfi();
        }

        fn isb(&mut self) {
            cortex_m::asm::isb();
        }

        fn sysbus_write_flush(&mut self) {
            cortex_m::asm::dsb();
        }

        fn mask_all_irqs(&mut self) -> NvicMask {
            let mut saved = [0u32; NVIC_WORDS];
            let regs = self.nvic.iser.iter().zip(self.nvic.icer.iter());
            for (slot, (iser, icer)) in saved.iter_mut().zip(regs) {
                *slot = iser.read();
                // SAFETY: ICER only clears enables; masking lines cannot
                // violate memory safety.
                unsafe { icer.write(u32::MAX) };
            }
            NvicMask(saved)
        }

        fn restore_irqs(&mut self, mask: NvicMask) {
            for (bits, iser) in mask.0.iter().zip(self.nvic.iser.iter()) {
                // SAFETY: re-enabling exactly the lines that were enabled before.
                unsafe { iser.write(*bits) };
            }
        }

        fn enable_irq(&mut self, irq: u16) {
            // SAFETY: the wakeup timer handler is installed by the board crate.
            unsafe { NVIC::unmask(Line(irq)) };
        }

        fn clear_pending_irq(&mut self, irq: u16) {
            NVIC::unpend(Line(irq));
        }
    }
}
