//! MCU and GPU performance-mode switching.
//!
//! Fixed-trimmed parts switch VDDCPU with the core running, caches off and
//! interrupts disabled. PCM-trimmed parts must not execute while VDDCPU
//! moves: the core enters deep sleep with all interrupts masked, a TIMER
//! compare (still able to wake WFI) ends the sleep after `core_sleep_us`.

use super::{
    regs as r, GpuMode, McuMode, Periph, PowerControl, PowerError, VddfBoostLevel,
    MIN_PCM_TRIM_VER,
};
use crate::cpu::CpuCore;
use crate::regs::RegisterBus;
use embedded_hal::delay::DelayNs;

/// GPU rail settle after changing GFXVDDSEL, in µs.
const GPU_VOLTADJ_WAIT_US: u32 = 1;
/// GPU clock settle after changing GFXPERFREQ, in µs.
const GPU_PWRADJ_WAIT_US: u32 = 6;
/// Wakeup timer ticks per µs (HFRC 96 MHz / 16).
const TIMER_TICKS_PER_US: u32 = 6;

/// PWRSW0 override used while switching VDDCPU on fixed-trimmed parts.
fn pwrsw0_fixed(hp: bool) -> u32 {
    r::PWRSW0_COMMON
        | r::PWRSW0_CAOROVERRIDE.val(1)
        | r::PWRSW0_CAORDYNSEL.val(1)
        | r::PWRSW0_CPUOVERRIDE.val(u32::from(hp))
        | r::PWRSW0_CPUDYNSEL.val(if hp { 1 } else { 2 })
}

/// PWRSW0 override used while switching VDDCPU on PCM-trimmed parts.
fn pwrsw0_pcm(hp: bool) -> u32 {
    if hp {
        r::PWRSW0_COMMON
            | r::PWRSW0_CAOROVERRIDE.val(1)
            | r::PWRSW0_CAORDYNSEL.val(3)
            | r::PWRSW0_CPUOVERRIDE.val(1)
            | r::PWRSW0_CPUDYNSEL.val(3)
    } else {
        r::PWRSW0_COMMON
            | r::PWRSW0_CAOROVERRIDE.val(0)
            | r::PWRSW0_CAORDYNSEL.val(2)
            | r::PWRSW0_CPUOVERRIDE.val(0)
            | r::PWRSW0_CPUDYNSEL.val(2)
    }
}

impl<B, D, C> PowerControl<B, D, C>
where
    B: RegisterBus,
    D: DelayNs,
    C: CpuCore,
{
    /// Switch the MCU between LP and HP.
    ///
    /// HP needs the SIMOBUCK active. Parts at trim revision 6 or below cannot
    /// run HP at 250 MHz. If the sequence completes but MCUPERFSTATUS does
    /// not report `mode`, the device state is undefined and `Fail` is
    /// returned.
    pub fn mcu_mode_select(&mut self, mode: McuMode) -> Result<(), PowerError> {
        if mode == McuMode::HighPerformance && !self.buck_active() {
            return Err(PowerError::InvalidOperation);
        }
        let rev = self.trim_version();
        let hp250 = self.bus.read_field(r::CLKGEN_MISC, r::CLKGEN_MISC_CPUHPFREQSEL)
            == r::CPUHPFREQSEL_HP250;
        if rev <= MIN_PCM_TRIM_VER && hp250 {
            return Err(PowerError::InvalidOperation);
        }
        if mode == self.mcu_mode {
            return Ok(());
        }
        if !self.orig.complete() {
            return Err(PowerError::InvalidArg);
        }

        #[cfg(feature = "defmt")]
        defmt::info!("pwrctrl: MCU -> {} (trim rev {})", mode, rev);

        if rev < MIN_PCM_TRIM_VER {
            self.mcu_switch_fixed(mode)?;
        } else if mode == McuMode::HighPerformance {
            if hp250 {
                self.hfrc2_on();
            }
            self.mcu_switch_pcm(mode)?;
        } else {
            let result = self.mcu_switch_pcm(mode);
            if hp250 {
                self.hfrc2_off();
            }
            result?;
        }

        if self.bus.read_field(r::MCUPERFREQ, r::MCUPERFREQ_STATUS) == mode as u32 {
            Ok(())
        } else {
            #[cfg(feature = "defmt")]
            defmt::warn!("pwrctrl: MCUPERFSTATUS does not match {}", mode);
            Err(PowerError::Fail)
        }
    }

    /// Switch the GPU between LP and HP. The GPU must be powered off.
    pub fn gpu_mode_select(&mut self, mode: GpuMode) -> Result<(), PowerError> {
        if mode == GpuMode::HighPerformance && !self.buck_active() {
            return Err(PowerError::InvalidOperation);
        }
        if self.periph_enabled(Periph::Gfx) {
            return Err(PowerError::InUse);
        }
        if mode == self.gpu_mode {
            // A disable that dropped HP to LP may be confirmed as LP.
            if self.gpu_mode_prev != self.gpu_mode {
                self.gpu_mode_prev = mode;
            }
            return Ok(());
        }

        let rev = self.trim_version();
        if rev < MIN_PCM_TRIM_VER {
            self.gpu_switch_fixed(mode);
        } else if mode == GpuMode::HighPerformance {
            if rev > MIN_PCM_TRIM_VER {
                self.hfrc2_on();
            }
            self.gpu_switch_pcm(mode, rev);
        } else {
            self.gpu_switch_pcm(mode, rev);
            if rev > MIN_PCM_TRIM_VER {
                self.hfrc2_off();
            }
        }
        #[cfg(feature = "defmt")]
        defmt::info!("pwrctrl: GPU -> {}", mode);
        Ok(())
    }

    // ─── MCU sequences ──────────────────────────────────────────────────────

    fn mcu_switch_fixed(&mut self, mode: McuMode) -> Result<(), PowerError> {
        let hp = mode == McuMode::HighPerformance;
        critical_section::with(|_| {
            let caches = self.core.caches_disable();
            self.mcu_mode = mode;

            if hp {
                self.bus.write(r::PWRSW0, pwrsw0_fixed(true));
                // The HP boost is computed from the trim in effect right now.
                let memldo = self.bus.read_field(r::LDOREG2, r::MEMLDOACTIVETRIM);
                self.orig.memldo_active = Some(memldo);
                self.bus.write_field(
                    r::LDOREG2,
                    r::MEMLDOACTIVETRIM,
                    super::clamp_trim(memldo, 6, r::MEMLDOACTIVETRIM),
                );
                self.bus.write_field(r::LDOREG1, r::CORELDOTEMPCOTRIM, 0);
                self.delay.delay_us(self.config.rail_settle_us);
            }

            let ack = self.mcu_perf_request(mode);

            if !hp {
                self.bus.write(r::PWRSW0, pwrsw0_fixed(false));
                self.bus.write_field(r::LDOREG1, r::CORELDOTEMPCOTRIM, 8);
                if let Some(orig) = self.orig.memldo_active.filter(|v| *v != 0) {
                    self.bus.write_field(r::LDOREG2, r::MEMLDOACTIVETRIM, orig);
                }
            }

            self.core.caches_restore(caches);
            ack
        })
    }

    fn mcu_switch_pcm(&mut self, mode: McuMode) -> Result<(), PowerError> {
        let hp = mode == McuMode::HighPerformance;
        self.mcu_mode = mode;
        let mask = self.core.mask_all_irqs();

        // GFX must be on across the switch for register retention.
        let gfx_was_on = self.periph_enabled(Periph::Gfx);
        if !gfx_was_on {
            if let Err(e) = self.periph_enable(Periph::Gfx) {
                self.core.restore_irqs(mask);
                return Err(e);
            }
        }

        self.wakeup_timer_init(self.config.core_sleep_us);

        let mram = self.bus.read(r::MRAMPWRCTRL);
        self.bus.clear_bits(r::MRAMPWRCTRL, r::MRAMPWRCTRL_LPREN);
        self.bus.clear_bits(r::MRAMPWRCTRL, r::MRAMPWRCTRL_SLPEN);
        self.bus.set_bits(r::MRAMPWRCTRL, r::MRAMPWRCTRL_CTRL);

        let pwrsw0 = self.bus.read(r::PWRSW0);
        let ack = if hp {
            self.vddf_boost(VddfBoostLevel::Level1);
            self.vddc_boost();
            self.sleep_through_switch(pwrsw0_pcm(true));
            self.mcu_perf_request(mode)
        } else {
            let ack = self.mcu_perf_request(mode);
            self.delay.delay_us(self.config.lp_switch_delay_us);
            self.sleep_through_switch(pwrsw0_pcm(false));
            self.vddf_restore(VddfBoostLevel::Level1);
            self.vddc_restore();
            ack
        };

        self.bus.write(r::PWRSW0, pwrsw0);
        self.bus.write(r::MRAMPWRCTRL, mram);
        self.wakeup_timer_deinit();

        let gfx = if gfx_was_on {
            Ok(())
        } else {
            self.periph_disable(Periph::Gfx)
        };
        self.core.restore_irqs(mask);
        ack.and(gfx)
    }

    /// Deep-sleep while `pwrsw0` moves VDDCPU; the wakeup timer ends it.
    fn sleep_through_switch(&mut self, pwrsw0: u32) {
        self.core.set_sleep_deep(true);
        self.delay.delay_us(1);
        self.bus
            .set_bits(r::timer_ctrl0(self.config.wakeup_timer), r::TIMER_CTRL0_EN);
        self.bus.write(r::PWRSW0, pwrsw0);
        self.core.sysbus_write_flush();
        self.core.wfi();
        self.core.isb();
        self.core.set_sleep_deep(false);
    }

    /// Request `mode` and wait for MCUPERFACK.
    fn mcu_perf_request(&mut self, mode: McuMode) -> Result<(), PowerError> {
        self.bus
            .write_field(r::MCUPERFREQ, r::MCUPERFREQ_REQ, mode as u32);
        let ack = r::MCUPERFREQ_ACK.mask();
        self.poll(r::MCUPERFREQ, ack, ack, true, self.config.max_wait_us)?;
        Ok(())
    }

    // ─── Wakeup timer ───────────────────────────────────────────────────────

    fn wakeup_timer_irq(&self) -> u16 {
        self.config
            .timer0_irq
            .saturating_add(u16::from(self.config.wakeup_timer))
    }

    fn wakeup_timer_init(&mut self, us: u32) {
        let n = self.config.wakeup_timer;
        let ctrl0 = r::timer_ctrl0(n);
        self.bus.clear_bits(ctrl0, r::TIMER_CTRL0_EN);
        self.bus.write(
            ctrl0,
            r::TIMER_CTRL0_CLK.val(r::TIMER_CLK_HFRC_DIV16) | r::TIMER_CTRL0_FN.val(r::TIMER_FN_EDGE),
        );
        self.bus
            .write(r::timer_mode0(n), r::TIMER_MODE0_TRIGSEL.val(r::TIMER_TRIGGER_OUT1));
        self.bus
            .write(r::timer_cmp0(n), us.saturating_mul(TIMER_TICKS_PER_US));
        self.bus.write(r::timer_cmp1(n), u32::MAX);
        self.timer_clear(ctrl0);
        self.bus.write(r::TIMER_INTCLR, r::timer_cmp0_int(n));
        self.bus.set_bits(r::TIMER_INTEN, r::timer_cmp0_int(n));
        self.bus.set_bits(r::TIMER_GLOBEN, 1u32.wrapping_shl(u32::from(n)));
        self.timer_clear(ctrl0);
        let irq = self.wakeup_timer_irq();
        self.core.enable_irq(irq);
    }

    fn timer_clear(&mut self, ctrl0: u32) {
        self.bus.set_bits(ctrl0, r::TIMER_CTRL0_CLR);
        self.bus.clear_bits(ctrl0, r::TIMER_CTRL0_CLR);
    }

    fn wakeup_timer_deinit(&mut self) {
        let n = self.config.wakeup_timer;
        self.bus.clear_bits(r::timer_ctrl0(n), r::TIMER_CTRL0_EN);
        self.bus.write(r::TIMER_INTCLR, r::timer_cmp0_int(n));
        let irq = self.wakeup_timer_irq();
        self.core.clear_pending_irq(irq);
    }

    // ─── GPU sequences ──────────────────────────────────────────────────────

    fn gpu_vddsel(&mut self, mode: GpuMode) {
        let vddf = u32::from(mode == GpuMode::HighPerformance);
        self.bus
            .write_field(r::GFXPWRSWSEL, r::GFXPWRSWSEL_VDDSEL, vddf);
        self.delay.delay_us(GPU_VOLTADJ_WAIT_US);
    }

    fn gpu_switch_fixed(&mut self, mode: GpuMode) {
        critical_section::with(|_| {
            self.gpu_vddsel(mode);
            // Fixed-trimmed parts are limited to 192 MHz.
            self.bus
                .write_field(r::GFXPERFREQ, r::GFXPERFREQ_REQ, r::GFXPERFREQ_HP1);
            self.gpu_mode = mode;
            self.gpu_mode_prev = mode;
            self.delay.delay_us(GPU_PWRADJ_WAIT_US);
        });
    }

    fn gpu_switch_pcm(&mut self, mode: GpuMode, rev: u32) {
        critical_section::with(|_| {
            if mode == GpuMode::HighPerformance {
                self.vddf_boost(VddfBoostLevel::Level1);
            }
            self.gpu_vddsel(mode);
            let req = if rev == MIN_PCM_TRIM_VER {
                r::GFXPERFREQ_HP1
            } else {
                mode as u32
            };
            self.bus.write_field(r::GFXPERFREQ, r::GFXPERFREQ_REQ, req);
            self.gpu_mode = mode;
            self.gpu_mode_prev = mode;
            self.delay.delay_us(GPU_PWRADJ_WAIT_US);
            if mode == GpuMode::LowPower {
                self.vddf_restore(VddfBoostLevel::Level1);
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;
    use crate::mocks::CoreOp;
    use crate::pwrctrl::tests::{initialised, pc};

    #[test]
    fn hp_requires_active_buck() {
        let mut p = initialised(7);
        p.bus.preset(r::VRSTATUS, 0);
        assert_eq!(
            p.mcu_mode_select(McuMode::HighPerformance),
            Err(PowerError::InvalidOperation)
        );
        assert_eq!(
            p.gpu_mode_select(GpuMode::HighPerformance),
            Err(PowerError::InvalidOperation)
        );
    }

    #[test]
    fn hp250_rejected_on_early_trims() {
        let mut p = initialised(6);
        p.bus.preset(r::CLKGEN_MISC, r::CPUHPFREQSEL_HP250);
        assert_eq!(
            p.mcu_mode_select(McuMode::HighPerformance),
            Err(PowerError::InvalidOperation)
        );
    }

    #[test]
    fn same_mode_is_a_noop() {
        let mut p = initialised(7);
        p.mcu_mode_select(McuMode::LowPower).unwrap();
        assert!(p.bus.writes().is_empty());
    }

    #[test]
    fn unsaved_trims_are_rejected() {
        let mut p = pc(7);
        assert_eq!(
            p.mcu_mode_select(McuMode::HighPerformance),
            Err(PowerError::InvalidArg)
        );
    }

    #[test]
    fn fixed_trimmed_hp_boosts_memldo_before_request() {
        let mut p = initialised(5);
        p.mcu_mode_select(McuMode::HighPerformance).unwrap();
        assert_eq!(p.mcu_mode_status(), McuMode::HighPerformance);
        assert_eq!(p.bus.writes_to(r::PWRSW0), vec![pwrsw0_fixed(true)]);
        assert_eq!(p.bus.read_field(r::LDOREG2, r::MEMLDOACTIVETRIM), 46);
        assert_eq!(p.bus.read_field(r::LDOREG1, r::CORELDOTEMPCOTRIM), 0);
        let boost = p.bus.first_write(r::LDOREG2).unwrap();
        let req = p.bus.first_write(r::MCUPERFREQ).unwrap();
        assert!(boost < req);
        let ops = p.core.ops();
        assert_eq!(ops.first(), Some(&CoreOp::CachesDisable));
        assert!(matches!(ops.last(), Some(CoreOp::CachesRestore(_))));
    }

    #[test]
    fn fixed_trimmed_lp_restores_memldo() {
        let mut p = initialised(5);
        p.mcu_mode_select(McuMode::HighPerformance).unwrap();
        p.mcu_mode_select(McuMode::LowPower).unwrap();
        assert_eq!(p.bus.read_field(r::LDOREG2, r::MEMLDOACTIVETRIM), 40);
        assert_eq!(p.bus.read_field(r::LDOREG1, r::CORELDOTEMPCOTRIM), 8);
        assert_eq!(p.bus.peek(r::PWRSW0), pwrsw0_fixed(false));
    }

    #[test]
    fn missing_ack_times_out() {
        let mut p = initialised(5);
        // Replace the acknowledging hook with a bus that never acks.
        let mut bus = crate::mocks::MockBus::new();
        bus.preset(r::VRSTATUS, r::VRSTATUS_SIMOBUCKST.val(r::SIMOBUCKST_ACT));
        p.bus = bus;
        assert_eq!(
            p.mcu_mode_select(McuMode::HighPerformance),
            Err(PowerError::Timeout)
        );
        assert_eq!(p.bus.read_count(r::MCUPERFREQ), 6);
    }

    #[test]
    fn pcm_hp_sleeps_through_rail_switch() {
        let mut p = initialised(7);
        p.mcu_mode_select(McuMode::HighPerformance).unwrap();
        assert_eq!(p.mcu_mode_status(), McuMode::HighPerformance);

        // Override applied, then the saved PWRSW0 restored.
        assert_eq!(p.bus.writes_to(r::PWRSW0), vec![0x2B01_80FF, 0]);
        // Both rails boosted for HP.
        assert_eq!(p.vddc_boost_count(), 1);
        assert_eq!(p.vddf_boost_level(), VddfBoostLevel::Level1);
        // GFX was forced on across the switch and dropped afterwards.
        assert_eq!(p.bus.peek(r::DEVPWREN) & r::DEV_GFX, 0);

        let ops = p.core.ops();
        let wfi = ops.iter().position(|o| *o == CoreOp::Wfi).unwrap();
        assert_eq!(ops[wfi - 1], CoreOp::Flush);
        assert_eq!(ops[wfi + 1], CoreOp::Isb);
        assert_eq!(ops.first(), Some(&CoreOp::MaskAll));
        assert_eq!(ops.last(), Some(&CoreOp::RestoreIrqs));
        assert!(!p.core.masked());
        assert_eq!(p.core.count(CoreOp::EnableIrq(42)), 1);
        assert_eq!(p.core.count(CoreOp::ClearPending(42)), 1);
    }

    #[test]
    fn pcm_hp_requests_perf_after_wake() {
        let mut p = initialised(7);
        p.mcu_mode_select(McuMode::HighPerformance).unwrap();
        let pwrsw = p.bus.first_write(r::PWRSW0).unwrap();
        let req = p.bus.first_write(r::MCUPERFREQ).unwrap();
        assert!(pwrsw < req);
    }

    #[test]
    fn pcm_lp_requests_perf_before_switch_and_releases_boosts() {
        let mut p = initialised(7);
        p.mcu_mode_select(McuMode::HighPerformance).unwrap();
        p.bus.clear_log();
        p.mcu_mode_select(McuMode::LowPower).unwrap();
        let req = p.bus.first_write(r::MCUPERFREQ).unwrap();
        let pwrsw = p.bus.first_write(r::PWRSW0).unwrap();
        assert!(req < pwrsw);
        assert_eq!(p.vddc_boost_count(), 0);
        assert_eq!(p.vddf_boost_level(), VddfBoostLevel::Default);
    }

    #[test]
    fn pcm_wakeup_timer_programmed_for_sleep_duration() {
        let mut p = initialised(7);
        p.mcu_mode_select(McuMode::HighPerformance).unwrap();
        assert_eq!(p.bus.peek(r::timer_cmp0(10)), 300);
        assert_eq!(p.bus.peek(r::timer_cmp1(10)), u32::MAX);
        assert_ne!(p.bus.peek(r::TIMER_GLOBEN) & (1 << 10), 0);
        // Stopped after wake.
        assert_eq!(p.bus.peek(r::timer_ctrl0(10)) & r::TIMER_CTRL0_EN, 0);
    }

    #[test]
    fn pcm_mram_settings_restored() {
        let mut p = initialised(7);
        p.bus.preset(r::MRAMPWRCTRL, r::MRAMPWRCTRL_LPREN | r::MRAMPWRCTRL_SLPEN);
        p.mcu_mode_select(McuMode::HighPerformance).unwrap();
        let w = p.bus.writes_to(r::MRAMPWRCTRL);
        assert_eq!(*w.last().unwrap(), r::MRAMPWRCTRL_LPREN | r::MRAMPWRCTRL_SLPEN);
        assert!(w.contains(&r::MRAMPWRCTRL_CTRL));
    }

    #[test]
    fn hp250_holds_hfrc2_while_in_hp() {
        let mut p = initialised(7);
        p.bus.preset(r::CLKGEN_MISC, r::CPUHPFREQSEL_HP250);
        p.mcu_mode_select(McuMode::HighPerformance).unwrap();
        assert_eq!(p.bus.peek(r::HFRC2) & r::HFRC2_PWRDN, 0);
        p.mcu_mode_select(McuMode::LowPower).unwrap();
        assert_ne!(p.bus.peek(r::HFRC2) & r::HFRC2_PWRDN, 0);
    }

    #[test]
    fn status_mismatch_fails() {
        let mut p = initialised(7);
        // Acknowledged, but the status never leaves LP.
        p.bus.on_write(r::MCUPERFREQ, |_, regs| {
            regs.insert(r::MCUPERFREQ, r::MCUPERFREQ_ACK.val(1));
        });
        assert_eq!(
            p.mcu_mode_select(McuMode::HighPerformance),
            Err(PowerError::Fail)
        );
    }

    #[test]
    fn gpu_refuses_while_powered() {
        let mut p = initialised(7);
        p.bus.preset(r::DEVPWRSTATUS, r::DEV_GFX);
        assert_eq!(
            p.gpu_mode_select(GpuMode::HighPerformance),
            Err(PowerError::InUse)
        );
    }

    #[test]
    fn gpu_fixed_trimmed_caps_clock_at_hp1() {
        let mut p = initialised(5);
        p.gpu_mode_select(GpuMode::HighPerformance).unwrap();
        assert_eq!(p.gpu_mode_status(), GpuMode::HighPerformance);
        assert_eq!(p.bus.read_field(r::GFXPERFREQ, r::GFXPERFREQ_REQ), r::GFXPERFREQ_HP1);
        assert_eq!(p.bus.read_field(r::GFXPWRSWSEL, r::GFXPWRSWSEL_VDDSEL), 1);
        assert_eq!(p.vddf_boost_level(), VddfBoostLevel::Default);
    }

    #[test]
    fn gpu_pcm_hp_boosts_vddf_and_requests_hfrc2() {
        let mut p = initialised(7);
        p.gpu_mode_select(GpuMode::HighPerformance).unwrap();
        assert_eq!(p.vddf_boost_level(), VddfBoostLevel::Level1);
        assert_eq!(p.bus.read_field(r::GFXPERFREQ, r::GFXPERFREQ_REQ), 3);
        assert_eq!(p.bus.peek(r::HFRC2) & r::HFRC2_PWRDN, 0);

        p.gpu_mode_select(GpuMode::LowPower).unwrap();
        assert_eq!(p.vddf_boost_level(), VddfBoostLevel::Default);
        assert_eq!(p.bus.read_field(r::GFXPWRSWSEL, r::GFXPWRSWSEL_VDDSEL), 0);
        assert_ne!(p.bus.peek(r::HFRC2) & r::HFRC2_PWRDN, 0);
    }

    #[test]
    fn gpu_rev6_limited_to_hp1() {
        let mut p = initialised(6);
        p.gpu_mode_select(GpuMode::HighPerformance).unwrap();
        assert_eq!(p.bus.read_field(r::GFXPERFREQ, r::GFXPERFREQ_REQ), r::GFXPERFREQ_HP1);
    }
}
