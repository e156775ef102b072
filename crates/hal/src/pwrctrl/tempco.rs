//! VDDC/VDDF temperature compensation.
//!
//! The application reports die temperature through
//! [`PowerControl::temp_update`]; the controller picks a band and lowers the
//! VDDC/VDDF references by a band-specific number of codes. While GFX is
//! being powered up or down the adjustment is parked and applied once the
//! transition finishes.

use super::{clamp_trim, regs as r, PowerControl, PowerError};
use crate::cpu::CpuCore;
use crate::regs::RegisterBus;
use embedded_hal::delay::DelayNs;

/// Temperature band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TempcoRange {
    /// Below the VDDC/VDDF threshold.
    Low,
    /// Between the VDDC/VDDF and buck thresholds.
    Mid,
    /// Above the buck threshold; the buck must stay active in deep sleep.
    High,
}

/// Temperatures at which [`PowerControl::temp_update`] should be called
/// again.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TempThresholds {
    /// Call again when the temperature falls below this.
    pub low: f32,
    /// Call again when the temperature rises to this.
    pub high: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TempcoState {
    pub(crate) range: Option<TempcoRange>,
    /// Held by [`PowerControl::tempco_postpone`].
    pub(crate) postpone: bool,
    /// Held across a GPU power transition.
    pub(crate) gfx_hold: bool,
    pub(crate) pending: Option<TempcoRange>,
    pub(crate) force_buck_active: bool,
}

impl TempcoState {
    fn held(&self) -> bool {
        self.postpone || self.gfx_hold
    }
}

/// Codes removed from (CORELDOACTIVETRIM, TVRGCVREFTRIM, TVRGFVREFTRIM).
const fn reduce(range: TempcoRange) -> (i32, i32, i32) {
    match range {
        TempcoRange::Low => (17, 35, 10),
        TempcoRange::Mid => (12, 20, 10),
        TempcoRange::High => (CORELDO_REDUCE_BUCK, 0, 0),
    }
}

/// CORELDOACTIVETRIM codes below factory that keep the LDO under the buck.
const CORELDO_REDUCE_BUCK: i32 = 6;
/// Extra TVRGC codes the GPU needs while powered.
const GFX_TVRGC_DIFF: i32 = 9;
/// Extra TVRGF codes the GPU needs while powered.
const GFX_TVRGF_DIFF: i32 = 15;
/// Temperature sensor accuracy subtracted before table lookup, in °C.
const SENSOR_MARGIN_C: i32 = 3;

/// Rows of `[low, high, trim]`, terminated by a row starting with 127.
pub type TrimTable = [[i8; 3]];

/// VDDF active trim adjustment by temperature.
pub const VDDF_TRIMS: [[i8; 3]; 10] = [
    [-20, -11, 0],
    [-11, -2, -1],
    [-2, 8, -2],
    [8, 17, -3],
    [17, 26, -4],
    [26, 35, -5],
    [35, 44, -6],
    [44, 53, -7],
    [53, 60, -8],
    [127, 127, 0],
];

/// VDDF low-power trim adjustment by temperature.
pub const VDDFLP_TRIMS: [[i8; 3]; 10] = VDDF_TRIMS;

/// Memory LP LDO trim adjustment by temperature.
pub const MEMLPLDO_TRIMS: [[i8; 3]; 14] = [
    [-18, -14, 8],
    [-14, -10, 7],
    [-10, -6, 6],
    [-6, -2, 5],
    [-2, 2, 4],
    [2, 6, 3],
    [6, 10, 2],
    [10, 14, 1],
    [14, 18, 0],
    [18, 22, -1],
    [22, 26, -2],
    [26, 42, -3],
    [42, 60, -4],
    [127, 127, 0],
];

/// Trim for `temp` from a `[low, high, trim]` table.
///
/// Below the first row the first trim applies; above the last row the
/// default (0) applies.
pub fn lookup_trim(table: &TrimTable, temp: i8) -> i8 {
    let Some(first) = table.first() else {
        return 0;
    };
    if temp < first[0] {
        return first[2];
    }
    table
        .iter()
        .take_while(|row| row[0] < 127)
        .find(|row| temp <= row[1])
        .map_or(0, |row| row[2])
}

/// Convert `celsius` to table degrees and subtract the sensor margin.
///
/// Truncates toward zero, then steps down one degree for any negative
/// reading, whole degrees included.
#[allow(clippy::cast_possible_truncation)] // saturating float→int cast, then clamped to i8
fn table_temp(celsius: f32) -> i8 {
    let t = celsius as i32;
    let t = if celsius < 0.0 { t.saturating_sub(1) } else { t };
    let t = t.saturating_sub(SENSOR_MARGIN_C);
    i8::try_from(t.clamp(i32::from(i8::MIN), i32::from(i8::MAX))).unwrap_or(i8::MAX)
}

impl<B, D, C> PowerControl<B, D, C>
where
    B: RegisterBus,
    D: DelayNs,
    C: CpuCore,
{
    /// Classify `celsius`, apply the band's trims and return the next
    /// thresholds. Out-of-band temperatures return `Fail`.
    pub fn temp_update(&mut self, celsius: f32) -> Result<TempThresholds, PowerError> {
        let l = self.config.tempco;
        let (range, th) = if celsius >= l.low_limit && celsius < l.vddc_vddf_threshold {
            let th = TempThresholds { low: l.low_limit, high: l.vddc_vddf_threshold };
            (TempcoRange::Low, th)
        } else if celsius >= l.vddc_vddf_threshold && celsius < l.buck_lp_threshold {
            let th = TempThresholds {
                low: l.vddc_vddf_threshold - l.hysteresis,
                high: l.buck_lp_threshold,
            };
            (TempcoRange::Mid, th)
        } else if celsius >= l.buck_lp_threshold && celsius < l.high_limit {
            let th = TempThresholds {
                low: l.buck_lp_threshold - l.hysteresis,
                high: l.high_limit,
            };
            (TempcoRange::High, th)
        } else {
            #[cfg(feature = "defmt")]
            defmt::warn!("pwrctrl: temperature outside supported band");
            return Err(PowerError::Fail);
        };

        self.tempco.force_buck_active = range == TempcoRange::High;
        critical_section::with(|_| {
            if self.tempco.held() {
                self.tempco.pending = Some(range);
            } else {
                self.tempco_apply(range);
            }
        });
        self.tempco.range = Some(range);
        Ok(th)
    }

    /// Band of the last successful [`PowerControl::temp_update`].
    pub fn tempco_range(&self) -> Option<TempcoRange> {
        self.tempco.range
    }

    /// Whether the buck must stay active through deep sleep.
    pub fn force_buck_active(&self) -> bool {
        self.tempco.force_buck_active
    }

    /// Hold TempCo adjustments until released. Releasing applies the most
    /// recent parked band unless a GPU power transition still holds it.
    pub fn tempco_postpone(&mut self, postpone: bool) {
        critical_section::with(|_| {
            self.tempco.postpone = postpone;
            if !postpone {
                self.tempco_resume();
            }
        });
    }

    /// Drop the GPU transition hold taken by [`Self::tempco_gfx_hold`].
    pub(crate) fn tempco_gfx_release(&mut self) {
        self.tempco.gfx_hold = false;
        self.tempco_resume();
    }

    /// Park bands while the GPU rail changes.
    pub(crate) fn tempco_gfx_hold(&mut self) {
        self.tempco.gfx_hold = true;
    }

    /// Apply the parked band once nothing holds it.
    fn tempco_resume(&mut self) {
        if self.tempco.held() {
            return;
        }
        if let Some(range) = self.tempco.pending.take() {
            self.tempco_apply(range);
        }
    }

    fn tempco_apply(&mut self, range: TempcoRange) {
        let Some(f) = self.factory else {
            return;
        };
        if !self.buck_active() {
            return;
        }
        let gfx = self.bus.read(r::DEVPWREN) & r::DEV_GFX != 0;
        let (tvrgc_diff, tvrgf_diff) = if gfx {
            (GFX_TVRGC_DIFF, GFX_TVRGF_DIFF)
        } else {
            (0, 0)
        };
        let (coreldo, tvrgc, tvrgf) = reduce(range);

        let coreldo = clamp_trim(f.coreldo_active, coreldo.saturating_neg(), r::CORELDOACTIVETRIM);
        let tvrgc = clamp_trim(f.tvrgc_vref, tvrgc_diff.saturating_sub(tvrgc), r::TVRGCVREFTRIM);
        let tvrgf = clamp_trim(f.tvrgf_vref, tvrgf_diff.saturating_sub(tvrgf), r::TVRGFVREFTRIM);

        self.bus.write_field(r::LDOREG1, r::CORELDOACTIVETRIM, coreldo);
        self.bus.write_field(r::VREFGEN2, r::TVRGCVREFTRIM, tvrgc);
        self.tvrgf_write(r::TVRGFVREFTRIM, tvrgf);

        #[cfg(feature = "defmt")]
        defmt::debug!("pwrctrl: tempco {} applied", range);
    }

    /// Put VDDC/VDDF back on factory references before a deep sleep during
    /// which temperature is not sampled. GFX keeps its extra margin.
    pub fn tempco_deepsleep_restore(&mut self) {
        let Some(f) = self.factory else {
            return;
        };
        if !self.buck_active() {
            return;
        }
        if self.bus.read(r::DEVPWREN) & r::DEV_GFX != 0 {
            let tvrgf = clamp_trim(f.tvrgf_vref, GFX_TVRGF_DIFF, r::TVRGFVREFTRIM);
            self.tvrgf_write(r::TVRGFVREFTRIM, tvrgf);
            let tvrgc = clamp_trim(f.tvrgc_vref, GFX_TVRGC_DIFF, r::TVRGCVREFTRIM);
            self.bus.write_field(r::VREFGEN2, r::TVRGCVREFTRIM, tvrgc);
        } else {
            self.tvrgf_write(r::TVRGFVREFTRIM, f.tvrgf_vref);
            self.bus.write_field(r::VREFGEN2, r::TVRGCVREFTRIM, f.tvrgc_vref);
            let coreldo = clamp_trim(f.coreldo_active, -CORELDO_REDUCE_BUCK, r::CORELDOACTIVETRIM);
            self.bus.write_field(r::LDOREG1, r::CORELDOACTIVETRIM, coreldo);
        }
        self.delay.delay_us(self.config.rail_settle_us);
    }

    /// Offset the VDDF and memory LDO trims from their factory values.
    pub fn tempco_set_trims(&mut self, vddf: i32, vddf_lp: i32, memlp_ldo: i32) {
        let Some(f) = self.factory else {
            return;
        };
        critical_section::with(|_| {
            let act = clamp_trim(f.act_trim_vddf, vddf, r::ACTTRIMVDDF);
            let memldo = clamp_trim(f.memldo_active, vddf, r::MEMLDOACTIVETRIM);
            let lp = clamp_trim(f.lp_trim_vddf, vddf_lp, r::LPTRIMVDDF);
            let memlp = clamp_trim(f.memlp_ldo, memlp_ldo, r::MEMLPLDOTRIM);
            self.bus.write_field(r::SIMOBUCK12, r::ACTTRIMVDDF, act);
            self.bus.write_field(r::LDOREG2, r::MEMLDOACTIVETRIM, memldo);
            self.bus.write_field(r::SIMOBUCK12, r::LPTRIMVDDF, lp);
            self.bus.write_field(r::LDOREG2, r::MEMLPLDOTRIM, memlp);
        });
    }

    /// Apply the table-driven VDDF and memory LDO trims for a measured die
    /// temperature.
    pub fn tempco_sample(&mut self, celsius: f32) {
        let t = table_temp(celsius);
        self.tempco_set_trims(
            i32::from(lookup_trim(&VDDF_TRIMS, t)),
            i32::from(lookup_trim(&VDDFLP_TRIMS, t)),
            i32::from(lookup_trim(&MEMLPLDO_TRIMS, t)),
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::pwrctrl::tests::{initialised, pc};
    use crate::pwrctrl::Periph;

    fn coreldo(p: &mut crate::pwrctrl::tests::Pc) -> u32 {
        p.bus.read_field(r::LDOREG1, r::CORELDOACTIVETRIM)
    }

    fn tvrgc(p: &mut crate::pwrctrl::tests::Pc) -> u32 {
        p.bus.read_field(r::VREFGEN2, r::TVRGCVREFTRIM)
    }

    fn tvrgf(p: &mut crate::pwrctrl::tests::Pc) -> u32 {
        p.bus.read_field(r::mirror(r::VREFGEN4), r::TVRGFVREFTRIM)
    }

    #[test]
    fn bands_and_thresholds() {
        let mut p = initialised(7);
        let th = p.temp_update(-10.0).unwrap();
        assert_eq!(th, TempThresholds { low: -40.0, high: 0.0 });
        assert_eq!(p.tempco_range(), Some(TempcoRange::Low));
        assert!(!p.force_buck_active());

        let th = p.temp_update(0.0).unwrap();
        assert_eq!(th, TempThresholds { low: -5.0, high: 50.0 });

        let th = p.temp_update(50.0).unwrap();
        assert_eq!(th, TempThresholds { low: 45.0, high: 125.0 });
        assert_eq!(p.tempco_range(), Some(TempcoRange::High));
        assert!(p.force_buck_active());
    }

    #[test]
    fn outside_band_fails() {
        let mut p = initialised(7);
        assert_eq!(p.temp_update(-41.0), Err(PowerError::Fail));
        assert_eq!(p.temp_update(125.0), Err(PowerError::Fail));
        assert_eq!(p.tempco_range(), None);
    }

    #[test]
    fn low_band_reduces_all_references() {
        let mut p = initialised(7);
        p.temp_update(-20.0).unwrap();
        assert_eq!(coreldo(&mut p), 300 - 17);
        assert_eq!(tvrgc(&mut p), 50 - 35);
        assert_eq!(tvrgf(&mut p), 60 - 10);
    }

    #[test]
    fn gfx_power_offsets_reductions() {
        let mut p = initialised(7);
        p.periph_enable(Periph::Gfx).unwrap();
        p.temp_update(25.0).unwrap();
        assert_eq!(coreldo(&mut p), 300 - 12);
        assert_eq!(tvrgc(&mut p), 50 - 20 + 9);
        assert_eq!(tvrgf(&mut p), 60 - 10 + 15);

        p.temp_update(80.0).unwrap();
        assert_eq!(coreldo(&mut p), 300 - 6);
        assert_eq!(tvrgc(&mut p), 59);
        assert_eq!(tvrgf(&mut p), 75);
    }

    #[test]
    fn reductions_clamp_at_zero() {
        let mut p = pc(7);
        p.bus.preset(r::VREFGEN2, r::TVRGCVREFTRIM.val(10));
        p.low_power_init().unwrap();
        p.temp_update(-20.0).unwrap();
        assert_eq!(tvrgc(&mut p), 0);
    }

    #[test]
    fn nothing_applied_without_buck() {
        let mut p = initialised(7);
        p.bus.preset(r::VRSTATUS, 0);
        p.bus.clear_log();
        p.temp_update(-20.0).unwrap();
        assert!(p.bus.writes().is_empty());
    }

    #[test]
    fn postponed_band_applies_on_release() {
        let mut p = initialised(7);
        p.tempco_postpone(true);
        p.temp_update(-20.0).unwrap();
        p.temp_update(20.0).unwrap();
        assert_eq!(coreldo(&mut p), 300);
        p.tempco_postpone(false);
        // Only the latest band lands.
        assert_eq!(coreldo(&mut p), 300 - 12);
        assert_eq!(p.bus.writes_to(r::LDOREG1).len(), 1);
    }

    #[test]
    fn gpu_transition_keeps_caller_hold() {
        let mut p = initialised(7);
        p.tempco_postpone(true);
        p.periph_enable(Periph::Gfx).unwrap();
        p.temp_update(-20.0).unwrap();
        assert_eq!(coreldo(&mut p), 300);
        p.periph_disable(Periph::Gfx).unwrap();
        p.temp_update(-20.0).unwrap();
        assert_eq!(coreldo(&mut p), 300);

        p.tempco_postpone(false);
        assert_eq!(coreldo(&mut p), 300 - 17);
    }

    #[test]
    fn gpu_hold_outlives_caller_release() {
        let mut p = initialised(7);
        p.tempco_gfx_hold();
        p.tempco_postpone(true);
        p.temp_update(-20.0).unwrap();
        p.tempco_postpone(false);
        assert_eq!(coreldo(&mut p), 300);
        p.tempco_gfx_release();
        assert_eq!(coreldo(&mut p), 300 - 17);
    }

    #[test]
    fn lookup_below_table_uses_first_row() {
        assert_eq!(lookup_trim(&VDDF_TRIMS, -40), 0);
        assert_eq!(lookup_trim(&MEMLPLDO_TRIMS, -40), 8);
    }

    #[test]
    fn lookup_upper_bound_is_inclusive() {
        assert_eq!(lookup_trim(&VDDF_TRIMS, -11), 0);
        assert_eq!(lookup_trim(&VDDF_TRIMS, -10), -1);
        assert_eq!(lookup_trim(&MEMLPLDO_TRIMS, 42), -3);
        assert_eq!(lookup_trim(&MEMLPLDO_TRIMS, 43), -4);
    }

    #[test]
    fn lookup_above_table_snaps_to_default() {
        assert_eq!(lookup_trim(&VDDF_TRIMS, 61), 0);
        assert_eq!(lookup_trim(&MEMLPLDO_TRIMS, 100), 0);
        assert_eq!(lookup_trim(&[], 10), 0);
    }

    #[test]
    fn set_trims_offsets_from_factory_and_clamps() {
        let mut p = initialised(7);
        p.tempco_set_trims(-5, 40, -30);
        assert_eq!(p.bus.read_field(r::SIMOBUCK12, r::ACTTRIMVDDF), 25);
        assert_eq!(p.bus.read_field(r::LDOREG2, r::MEMLDOACTIVETRIM), 35);
        assert_eq!(p.bus.read_field(r::SIMOBUCK12, r::LPTRIMVDDF), 63);
        assert_eq!(p.bus.read_field(r::LDOREG2, r::MEMLPLDOTRIM), 0);
    }

    #[test]
    fn set_trims_requires_factory_trims() {
        let mut p = pc(7);
        p.tempco_set_trims(1, 1, 1);
        assert!(p.bus.writes().is_empty());
    }

    #[test]
    fn sample_applies_margin_before_lookup() {
        let mut p = initialised(7);
        // 20.5 °C → 20 → 17 after margin: VDDF row [8, 17] = -3, MEMLP row [14, 18] = 0.
        p.tempco_sample(20.5);
        assert_eq!(p.bus.read_field(r::SIMOBUCK12, r::ACTTRIMVDDF), 27);
        assert_eq!(p.bus.read_field(r::LDOREG2, r::MEMLPLDOTRIM), 20);
    }

    #[test]
    fn table_temp_rounds_down() {
        assert_eq!(table_temp(20.9), 17);
        assert_eq!(table_temp(-0.5), -4);
        // Whole negative degrees step down too.
        assert_eq!(table_temp(-7.0), -11);
        assert_eq!(table_temp(0.0), -3);
        assert_eq!(table_temp(1000.0), i8::MAX);
    }

    #[test]
    fn deepsleep_restore_keeps_gpu_margin() {
        let mut p = initialised(7);
        p.temp_update(-20.0).unwrap();
        p.tempco_deepsleep_restore();
        assert_eq!(tvrgf(&mut p), 60);
        assert_eq!(tvrgc(&mut p), 50);
        assert_eq!(coreldo(&mut p), 294);

        p.periph_enable(Periph::Gfx).unwrap();
        p.tempco_deepsleep_restore();
        assert_eq!(tvrgf(&mut p), 75);
        assert_eq!(tvrgc(&mut p), 59);
    }
}
