//! Reference-counted VDDC/VDDF trim boosts and HFRC2 requests.
//!
//! Each boost is requested by whichever client needs the higher rail (CPU HP,
//! GPU HP, fast MSPI DDR) and released independently; hardware is only
//! touched on the first request and the last release.

use super::{clamp_trim, regs as r, Adjust, PowerControl, VddfBoostLevel};
use crate::cpu::CpuCore;
use crate::regs::RegisterBus;
use embedded_hal::delay::DelayNs;

/// CORELDOTEMPCOTRIM while VDDC is boosted.
const CORELDOTEMPCOTRIM_BOOST: u32 = 2;
/// VDDC active low TON trim while boosted.
const VDDCACTLOWTONTRIM_BOOST: u32 = 21;
/// VDDF active low TON trim while VDDC is boosted.
const VDDFACTLOWTONTRIM_BOOST: u32 = 31;
/// MEMLDO codes added for level 1.
const MEMLDO_DELTA_L1: i32 = 5;
/// MEMLDO codes added for level 2.
const MEMLDO_DELTA_L2: i32 = 23;
/// VDDF buck reference codes added for level 1.
const TVRGF_DELTA_L1: i32 = 24;
/// VDDF buck reference for level 2.
const TVRGF_VREF_L2: u32 = 127;
/// VDDF buck tempco trim for level 2.
const TVRGF_TEMPCO_L2: u32 = 31;

impl<B, D, C> PowerControl<B, D, C>
where
    B: RegisterBus,
    D: DelayNs,
    C: CpuCore,
{
    /// Request the VDDC boost (CPU HP, 250 MHz MSPI DDR).
    pub fn vddc_boost(&mut self) {
        critical_section::with(|_| {
            if self.vddc_boost_cnt == 0 {
                self.coreldo_tempco(Some(CORELDOTEMPCOTRIM_BOOST));
                self.vddc_simobuck(true);
                self.delay.delay_us(self.config.rail_settle_us);

                // TON trims only change with the buck disabled.
                self.simobuck_enable(false);
                self.act_low_ton(true);
                self.simobuck_enable(true);
                #[cfg(feature = "defmt")]
                defmt::debug!("pwrctrl: VDDC boosted");
            }
            self.vddc_boost_cnt = self.vddc_boost_cnt.saturating_add(1);
        });
    }

    /// Release one VDDC boost request.
    pub fn vddc_restore(&mut self) {
        critical_section::with(|_| {
            self.vddc_boost_cnt = self.vddc_boost_cnt.saturating_sub(1);
            if self.vddc_boost_cnt == 0 {
                self.simobuck_enable(false);
                self.act_low_ton(false);
                self.vddc_simobuck(false);
                self.simobuck_enable(true);
                self.coreldo_tempco(None);
                #[cfg(feature = "defmt")]
                defmt::debug!("pwrctrl: VDDC restored");
            }
        });
    }

    /// Request a VDDF boost at `level`. `Default` is ignored.
    pub fn vddf_boost(&mut self, level: VddfBoostLevel) {
        critical_section::with(|_| match level {
            VddfBoostLevel::Level1 => {
                if self.vddf_l1_cnt == 0 && self.vddf_l2_cnt == 0 {
                    self.vddf_level_set(VddfBoostLevel::Level1);
                }
                self.vddf_l1_cnt = self.vddf_l1_cnt.saturating_add(1);
            }
            VddfBoostLevel::Level2 => {
                if self.vddf_l2_cnt == 0 {
                    self.vddf_level_set(VddfBoostLevel::Level2);
                }
                self.vddf_l2_cnt = self.vddf_l2_cnt.saturating_add(1);
            }
            VddfBoostLevel::Default => {}
        });
    }

    /// Release one VDDF boost request at `level`. Dropping the last level-2
    /// request while level-1 requests remain falls back to level 1.
    pub fn vddf_restore(&mut self, level: VddfBoostLevel) {
        critical_section::with(|_| {
            match level {
                VddfBoostLevel::Level1 => self.vddf_l1_cnt = self.vddf_l1_cnt.saturating_sub(1),
                VddfBoostLevel::Level2 => self.vddf_l2_cnt = self.vddf_l2_cnt.saturating_sub(1),
                VddfBoostLevel::Default => return,
            }
            if self.vddf_l1_cnt == 0 && self.vddf_l2_cnt == 0 {
                self.vddf_level_set(VddfBoostLevel::Default);
            }
            if level == VddfBoostLevel::Level2 && self.vddf_l2_cnt == 0 && self.vddf_l1_cnt > 0 {
                self.vddf_level_set(VddfBoostLevel::Level1);
            }
        });
    }

    /// Level the VDDF rail currently sits at.
    pub fn vddf_boost_level(&self) -> VddfBoostLevel {
        self.vddf_level
    }

    /// Outstanding VDDC boost requests.
    pub fn vddc_boost_count(&self) -> u32 {
        self.vddc_boost_cnt
    }

    /// Request HFRC2. The first request powers it up.
    pub fn hfrc2_on(&mut self) {
        critical_section::with(|_| {
            if self.hfrc2_cnt == 0 {
                let rev = self.trim_version();
                self.hfrc2_write(rev, true);
                self.delay.delay_us(self.config.hfrc2_settle_us);
            }
            self.hfrc2_cnt = self.hfrc2_cnt.saturating_add(1);
        });
    }

    /// Release HFRC2. The last release powers it down.
    pub fn hfrc2_off(&mut self) {
        critical_section::with(|_| {
            self.hfrc2_cnt = self.hfrc2_cnt.saturating_sub(1);
            if self.hfrc2_cnt == 0 {
                let rev = self.trim_version();
                self.hfrc2_write(rev, false);
            }
        });
    }

    fn vddf_level_set(&mut self, target: VddfBoostLevel) {
        let settle = self.config.rail_settle_us;
        match (target, self.vddf_level) {
            (VddfBoostLevel::Default, VddfBoostLevel::Level1) => {
                self.tvrgf_vref(Adjust::Restore);
                self.memldo(Adjust::Restore);
            }
            (VddfBoostLevel::Default, VddfBoostLevel::Level2) => {
                self.tvrgf_vref(Adjust::Restore);
                self.tvrgf_tempco_restore();
                self.memldo(Adjust::Restore);
            }
            (VddfBoostLevel::Level1, VddfBoostLevel::Default) => {
                self.memldo(Adjust::Boost(MEMLDO_DELTA_L1));
                self.tvrgf_vref(Adjust::Boost(TVRGF_DELTA_L1));
                self.delay.delay_us(settle);
            }
            (VddfBoostLevel::Level1, VddfBoostLevel::Level2) => {
                self.tvrgf_tempco_restore();
                self.tvrgf_vref(Adjust::Boost(TVRGF_DELTA_L1));
                self.memldo(Adjust::Boost(MEMLDO_DELTA_L1));
                self.delay.delay_us(settle);
            }
            (VddfBoostLevel::Level2, _) => {
                self.memldo(Adjust::Boost(MEMLDO_DELTA_L2));
                self.tvrgf_write(r::TVRGFVREFTRIM, TVRGF_VREF_L2);
                self.tvrgf_write(r::TVRGFTEMPCOTRIM, TVRGF_TEMPCO_L2);
                self.delay.delay_us(settle);
            }
            _ => {}
        }
        self.vddf_level = target;
    }

    // ─── Individual trims ───────────────────────────────────────────────────

    pub(crate) fn memldo(&mut self, adj: Adjust) {
        if let Some(orig) = self.orig.memldo_active {
            let v = match adj {
                Adjust::Boost(d) => clamp_trim(orig, d, r::MEMLDOACTIVETRIM),
                Adjust::Restore => orig,
            };
            self.bus.write_field(r::LDOREG2, r::MEMLDOACTIVETRIM, v);
        }
    }

    fn tvrgf_vref(&mut self, adj: Adjust) {
        if let Some(orig) = self.orig.tvrgf_vref {
            let v = match adj {
                Adjust::Boost(d) => clamp_trim(orig, d, r::TVRGFVREFTRIM),
                Adjust::Restore => orig,
            };
            self.tvrgf_write(r::TVRGFVREFTRIM, v);
        }
    }

    fn tvrgf_tempco_restore(&mut self) {
        if let Some(orig) = self.orig.tvrgf_tempco {
            self.tvrgf_write(r::TVRGFTEMPCOTRIM, orig);
        }
    }

    /// VREFGEN4 is only writable through the trim mirror.
    pub(crate) fn tvrgf_write(&mut self, field: crate::regs::Field, value: u32) {
        self.with_trim_writes(|bus| bus.write_field(r::mirror(r::VREFGEN4), field, value));
    }

    /// `Some(v)`: absolute CORELDOTEMPCOTRIM, clamped. `None`: restore.
    pub(crate) fn coreldo_tempco(&mut self, value: Option<u32>) {
        if let Some(orig) = self.orig.coreldo_tempco {
            let v = value.map_or(orig, |v| v.min(r::CORELDOTEMPCOTRIM.max()));
            self.bus.write_field(r::LDOREG1, r::CORELDOTEMPCOTRIM, v);
        }
    }

    fn vddc_simobuck(&mut self, boost: bool) {
        if self.orig.d2a_spare.is_some() {
            if boost {
                self.bus.set_bits(r::D2ASPARE, r::D2ASPARE_VDDC_BOOST);
            } else {
                self.bus.clear_bits(r::D2ASPARE, r::D2ASPARE_VDDC_BOOST);
            }
        }
    }

    fn act_low_ton(&mut self, boost: bool) {
        if let Some(orig) = self.orig.vddc_act_low_ton {
            let v = if boost { VDDCACTLOWTONTRIM_BOOST } else { orig };
            self.bus.write_field(r::SIMOBUCK2, r::VDDCACTLOWTONTRIM, v);
        }
        if let Some(orig) = self.orig.vddf_act_low_ton {
            let v = if boost { VDDFACTLOWTONTRIM_BOOST } else { orig };
            self.bus.write_field(r::SIMOBUCK7, r::VDDFACTLOWTONTRIM, v);
        }
    }

    fn simobuck_enable(&mut self, on: bool) {
        if on {
            self.bus.set_bits(r::MCU_VRCTRL, r::VRCTRL_SIMOBUCKOVER);
            self.bus.set_bits(r::VRCTRL, r::VRCTRL_SIMOBUCKEN);
        } else {
            self.bus.clear_bits(r::MCU_VRCTRL, r::VRCTRL_SIMOBUCKOVER);
            self.bus.clear_bits(r::VRCTRL, r::VRCTRL_SIMOBUCKEN);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::pwrctrl::tests::{initialised, pc};

    fn vref(p: &mut crate::pwrctrl::tests::Pc) -> u32 {
        p.bus.read_field(r::mirror(r::VREFGEN4), r::TVRGFVREFTRIM)
    }

    fn memldo(p: &mut crate::pwrctrl::tests::Pc) -> u32 {
        p.bus.read_field(r::LDOREG2, r::MEMLDOACTIVETRIM)
    }

    #[test]
    fn vddc_boost_touches_hardware_once() {
        let mut p = initialised(7);
        p.vddc_boost();
        let writes = p.bus.writes().len();
        p.vddc_boost();
        assert_eq!(p.bus.writes().len(), writes);
        assert_eq!(p.vddc_boost_count(), 2);
        assert_eq!(p.bus.read_field(r::LDOREG1, r::CORELDOTEMPCOTRIM), 2);
        assert_ne!(p.bus.peek(r::D2ASPARE) & r::D2ASPARE_VDDC_BOOST, 0);
        assert_eq!(p.bus.read_field(r::SIMOBUCK2, r::VDDCACTLOWTONTRIM), 21);
        assert_eq!(p.bus.read_field(r::SIMOBUCK7, r::VDDFACTLOWTONTRIM), 31);
    }

    #[test]
    fn vddc_ton_trims_change_with_buck_disabled() {
        let mut p = initialised(7);
        p.vddc_boost();
        let en = p.bus.writes_to(r::VRCTRL);
        // Cleared then set again.
        assert_eq!(en.len(), 2);
        assert_eq!(en[0] & r::VRCTRL_SIMOBUCKEN, 0);
        assert_ne!(en[1] & r::VRCTRL_SIMOBUCKEN, 0);
        let off = p.bus.first_write(r::VRCTRL).unwrap();
        let ton = p.bus.first_write(r::SIMOBUCK2).unwrap();
        assert!(off < ton);
    }

    #[test]
    fn vddc_restore_reverts_on_last_release() {
        let mut p = initialised(7);
        p.vddc_boost();
        p.vddc_boost();
        p.vddc_restore();
        assert_eq!(p.bus.read_field(r::SIMOBUCK2, r::VDDCACTLOWTONTRIM), 21);
        p.vddc_restore();
        assert_eq!(p.bus.read_field(r::SIMOBUCK2, r::VDDCACTLOWTONTRIM), 12);
        assert_eq!(p.bus.read_field(r::SIMOBUCK7, r::VDDFACTLOWTONTRIM), 14);
        assert_eq!(p.bus.read_field(r::LDOREG1, r::CORELDOTEMPCOTRIM), 8);
        assert_eq!(p.bus.peek(r::D2ASPARE) & r::D2ASPARE_VDDC_BOOST, 0);
    }

    #[test]
    fn restore_without_boost_does_not_underflow() {
        let mut p = initialised(7);
        p.vddc_restore();
        assert_eq!(p.vddc_boost_count(), 0);
        p.vddf_restore(VddfBoostLevel::Level1);
        assert_eq!(p.vddf_boost_level(), VddfBoostLevel::Default);
    }

    #[test]
    fn vddf_level1_boosts_memldo_and_vref() {
        let mut p = initialised(7);
        p.vddf_boost(VddfBoostLevel::Level1);
        assert_eq!(p.vddf_boost_level(), VddfBoostLevel::Level1);
        assert_eq!(memldo(&mut p), 45);
        assert_eq!(vref(&mut p), 84);
        p.vddf_restore(VddfBoostLevel::Level1);
        assert_eq!(p.vddf_boost_level(), VddfBoostLevel::Default);
        assert_eq!(memldo(&mut p), 40);
        assert_eq!(vref(&mut p), 60);
    }

    #[test]
    fn vddf_level2_dominates_and_falls_back_to_level1() {
        let mut p = initialised(7);
        p.vddf_boost(VddfBoostLevel::Level1);
        p.vddf_boost(VddfBoostLevel::Level2);
        assert_eq!(p.vddf_boost_level(), VddfBoostLevel::Level2);
        assert_eq!(memldo(&mut p), 63);
        assert_eq!(vref(&mut p), 127);
        assert_eq!(p.bus.read_field(r::mirror(r::VREFGEN4), r::TVRGFTEMPCOTRIM), 31);

        // A level-1 request while level 2 is active changes nothing.
        p.vddf_boost(VddfBoostLevel::Level1);
        assert_eq!(vref(&mut p), 127);

        p.vddf_restore(VddfBoostLevel::Level2);
        assert_eq!(p.vddf_boost_level(), VddfBoostLevel::Level1);
        assert_eq!(vref(&mut p), 84);
        assert_eq!(memldo(&mut p), 45);
        assert_eq!(p.bus.read_field(r::mirror(r::VREFGEN4), r::TVRGFTEMPCOTRIM), 10);

        p.vddf_restore(VddfBoostLevel::Level1);
        assert_eq!(p.vddf_boost_level(), VddfBoostLevel::Level1);
        p.vddf_restore(VddfBoostLevel::Level1);
        assert_eq!(p.vddf_boost_level(), VddfBoostLevel::Default);
        assert_eq!(vref(&mut p), 60);
    }

    #[test]
    fn vddf_level2_alone_restores_everything() {
        let mut p = initialised(7);
        p.vddf_boost(VddfBoostLevel::Level2);
        p.vddf_restore(VddfBoostLevel::Level2);
        assert_eq!(p.vddf_boost_level(), VddfBoostLevel::Default);
        assert_eq!(vref(&mut p), 60);
        assert_eq!(memldo(&mut p), 40);
        assert_eq!(p.bus.read_field(r::mirror(r::VREFGEN4), r::TVRGFTEMPCOTRIM), 10);
    }

    #[test]
    fn boosts_are_noops_before_trims_are_saved() {
        let mut p = pc(7);
        p.vddf_boost(VddfBoostLevel::Level1);
        p.vddc_boost();
        assert!(p.bus.writes_to(r::LDOREG2).is_empty());
        assert!(p.bus.writes_to(r::D2ASPARE).is_empty());
    }

    #[test]
    fn hfrc2_is_reference_counted() {
        let mut p = initialised(7);
        p.hfrc2_on();
        p.hfrc2_on();
        assert_eq!(p.bus.peek(r::HFRC2) & r::HFRC2_PWRDN, 0);
        p.hfrc2_off();
        assert_eq!(p.bus.peek(r::HFRC2) & r::HFRC2_PWRDN, 0);
        p.hfrc2_off();
        assert_ne!(p.bus.peek(r::HFRC2) & r::HFRC2_PWRDN, 0);
    }
}
