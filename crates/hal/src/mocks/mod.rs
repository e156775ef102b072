//! Mock implementations for testing
//!
//! [`MockBus`] is a sparse register file that records every write and counts
//! reads; write hooks model the bits hardware sets in response (perf-request
//! acknowledge, power-status mirroring). [`MockCore`] records core operations.
//! [`SimEmmc`] is a [`crate::sdhc::CardHost`] backed by an in-memory eMMC.

#![cfg(any(test, feature = "std"))]

mod emmc;

pub use emmc::{SimEmmc, SimEmmcConfig};

use crate::cpu::{CacheState, CpuCore};
use crate::pwrctrl::regs as pr;
use crate::regs::RegisterBus;
use std::boxed::Box;
use std::collections::HashMap;
use std::vec::Vec;

type Hook = Box<dyn FnMut(u32, &mut HashMap<u32, u32>)>;

/// Recording register bus.
#[derive(Default)]
pub struct MockBus {
    regs: HashMap<u32, u32>,
    writes: Vec<(u32, u32)>,
    reads: HashMap<u32, usize>,
    hooks: Vec<(u32, Hook)>,
    w1c: Vec<u32>,
}

impl MockBus {
    /// Empty register file; every register reads 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register file with the PWRCTRL behaviour the power sequences rely on:
    /// perf requests are acknowledged and reflected in status, and power
    /// enables show up in the matching status registers.
    pub fn apollo5() -> Self {
        let mut bus = Self::new();
        bus.on_write(pr::MCUPERFREQ, |v, regs| {
            let req = pr::MCUPERFREQ_REQ.extract(v);
            let word = pr::MCUPERFREQ_ACK.insert(v, 1);
            regs.insert(pr::MCUPERFREQ, pr::MCUPERFREQ_STATUS.insert(word, req));
        });
        bus.on_write(pr::DEVPWREN, |v, regs| {
            regs.insert(pr::DEVPWRSTATUS, v & !pr::DEV_OTP);
            let mem = regs.get(&pr::MEMPWRSTATUS).copied().unwrap_or(0);
            let mem = if v & pr::DEV_OTP == 0 {
                mem & !pr::MEMSTAT_OTP
            } else {
                mem | pr::MEMSTAT_OTP
            };
            regs.insert(pr::MEMPWRSTATUS, mem);
        });
        bus.on_write(pr::AUDSSPWREN, |v, regs| {
            regs.insert(pr::AUDSSPWRSTATUS, v);
        });
        bus.preset(
            pr::VRSTATUS,
            pr::VRSTATUS_SIMOBUCKST.val(pr::SIMOBUCKST_ACT),
        );
        bus.preset(pr::MEMPWRSTATUS, pr::MEMSTAT_NVM0);
        bus.preset(pr::CRYPTO_NVMISIDLE, 1);
        bus.preset(pr::CRYPTO_HOSTCCISIDLE, 1);
        bus
    }

    /// Set a register without recording a write.
    pub fn preset(&mut self, addr: u32, value: u32) {
        self.regs.insert(addr, value);
    }

    /// Current register value without counting a read.
    pub fn peek(&self, addr: u32) -> u32 {
        self.regs.get(&addr).copied().unwrap_or(0)
    }

    /// Run `hook` after every write to `addr`, with the written value and the
    /// register file.
    pub fn on_write<F>(&mut self, addr: u32, hook: F)
    where
        F: FnMut(u32, &mut HashMap<u32, u32>) + 'static,
    {
        self.hooks.push((addr, Box::new(hook)));
    }

    /// Treat `addr` as a status register: writing ones clears those bits.
    pub fn write_one_to_clear(&mut self, addr: u32) {
        self.w1c.push(addr);
    }

    /// Every write so far, in order.
    pub fn writes(&self) -> &[(u32, u32)] {
        &self.writes
    }

    /// Values written to `addr`, in order.
    pub fn writes_to(&self, addr: u32) -> Vec<u32> {
        self.writes
            .iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, v)| *v)
            .collect()
    }

    /// Index of the first write to `addr` in [`MockBus::writes`].
    pub fn first_write(&self, addr: u32) -> Option<usize> {
        self.writes.iter().position(|(a, _)| *a == addr)
    }

    /// Number of reads of `addr`.
    pub fn read_count(&self, addr: u32) -> usize {
        self.reads.get(&addr).copied().unwrap_or(0)
    }

    /// Forget recorded writes and reads; register values are kept.
    pub fn clear_log(&mut self) {
        self.writes.clear();
        self.reads.clear();
    }
}

impl RegisterBus for MockBus {
    #[allow(clippy::arithmetic_side_effects)] // Mock counter; overflow not a concern in tests
    fn read(&mut self, addr: u32) -> u32 {
        *self.reads.entry(addr).or_insert(0) += 1;
        self.peek(addr)
    }

    fn write(&mut self, addr: u32, value: u32) {
        self.writes.push((addr, value));
        let stored = if self.w1c.contains(&addr) {
            self.peek(addr) & !value
        } else {
            value
        };
        self.regs.insert(addr, stored);
        for (hook_addr, hook) in &mut self.hooks {
            if *hook_addr == addr {
                hook(value, &mut self.regs);
            }
        }
    }
}

/// A core operation recorded by [`MockCore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreOp {
    /// Caches disabled.
    CachesDisable,
    /// Caches restored.
    CachesRestore(CacheState),
    /// SLEEPDEEP written.
    SleepDeep(bool),
    /// WFI executed.
    Wfi,
    /// ISB executed.
    Isb,
    /// Write buffer drained.
    Flush,
    /// All interrupts masked.
    MaskAll,
    /// Interrupt mask restored.
    RestoreIrqs,
    /// NVIC line enabled.
    EnableIrq(u16),
    /// NVIC pending cleared.
    ClearPending(u16),
}

/// Recording [`CpuCore`].
#[derive(Debug, Default)]
pub struct MockCore {
    /// Cache enables reported by `caches_disable`.
    pub caches: CacheState,
    ops: Vec<CoreOp>,
    masked: bool,
}

impl MockCore {
    /// Core with both caches enabled.
    pub fn new() -> Self {
        Self {
            caches: CacheState {
                icache: true,
                dcache: true,
            },
            ..Self::default()
        }
    }

    /// Recorded operations, in order.
    pub fn ops(&self) -> &[CoreOp] {
        &self.ops
    }

    /// Whether interrupts are currently masked.
    pub fn masked(&self) -> bool {
        self.masked
    }

    /// Number of times `op` was recorded.
    pub fn count(&self, op: CoreOp) -> usize {
        self.ops.iter().filter(|o| **o == op).count()
    }
}

impl CpuCore for MockCore {
    type IrqMask = bool;

    fn caches_disable(&mut self) -> CacheState {
        self.ops.push(CoreOp::CachesDisable);
        self.caches
    }

    fn caches_restore(&mut self, state: CacheState) {
        self.ops.push(CoreOp::CachesRestore(state));
    }

    fn set_sleep_deep(&mut self, deep: bool) {
        self.ops.push(CoreOp::SleepDeep(deep));
    }

    fn wfi(&mut self) {
        self.ops.push(CoreOp::Wfi);
    }

    fn isb(&mut self) {
        self.ops.push(CoreOp::Isb);
    }

    fn sysbus_write_flush(&mut self) {
        self.ops.push(CoreOp::Flush);
    }

    fn mask_all_irqs(&mut self) -> bool {
        self.ops.push(CoreOp::MaskAll);
        core::mem::replace(&mut self.masked, true)
    }

    fn restore_irqs(&mut self, mask: bool) {
        self.ops.push(CoreOp::RestoreIrqs);
        self.masked = mask;
    }

    fn enable_irq(&mut self, irq: u16) {
        self.ops.push(CoreOp::EnableIrq(irq));
    }

    fn clear_pending_irq(&mut self, irq: u16) {
        self.ops.push(CoreOp::ClearPending(irq));
    }
}
