//! Apollo5 power control: performance modes, rail boosts, peripheral power
//! domains and temperature compensation.
//!
//! [`PowerControl`] owns the register bus, a µs delay and the core. All trim
//! bookkeeping the vendor HAL keeps in globals lives in this struct, with
//! `Option` standing in for the "never saved" sentinel.
//!
//! Trim revisions below 6 are *fixed-trimmed* parts; revision 6 and above are
//! *PCM-trimmed* and switch VDDCPU with the core asleep.

mod boost;
mod peripheral;
mod perf;
pub mod regs;
mod tempco;

pub use peripheral::{Periph, PowerStatus};
pub use tempco::{
    lookup_trim, TempThresholds, TempcoRange, TrimTable, MEMLPLDO_TRIMS, VDDFLP_TRIMS, VDDF_TRIMS,
};

use crate::config::PowerConfig;
use crate::cpu::CpuCore;
use crate::regs::{poll_until, Field, PollTimeout, RegisterBus};
use embedded_hal::delay::DelayNs;
use regs as r;

/// First trim revision with PCM-trimmed rails.
pub const MIN_PCM_TRIM_VER: u32 = 6;

/// Power-control failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror_no_std::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerError {
    /// The hardware did not reach the requested state.
    #[error("power control operation failed")]
    Fail,
    /// Missing prerequisite data (original trims not saved).
    #[error("invalid argument")]
    InvalidArg,
    /// The request is not allowed in the current hardware state.
    #[error("operation not allowed in current state")]
    InvalidOperation,
    /// A status bit did not settle in time.
    #[error("timed out waiting for hardware")]
    Timeout,
    /// The resource is powered and cannot be reconfigured.
    #[error("resource in use")]
    InUse,
    /// Value outside the supported range.
    #[error("value out of range")]
    OutOfRange,
}

impl From<PollTimeout> for PowerError {
    fn from(_: PollTimeout) -> Self {
        Self::Timeout
    }
}

/// MCU performance mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum McuMode {
    /// 96 MHz, VDDCPU on VDDC.
    LowPower = 0,
    /// 192/250 MHz, VDDCPU on VDDF.
    HighPerformance = 1,
}

/// GPU performance mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum GpuMode {
    /// GPU on VDDC.
    LowPower = 0,
    /// GPU on VDDF at full clock.
    HighPerformance = 3,
}

impl TryFrom<u32> for McuMode {
    type Error = PowerError;

    fn try_from(v: u32) -> Result<Self, PowerError> {
        match v {
            0 => Ok(Self::LowPower),
            1 => Ok(Self::HighPerformance),
            _ => Err(PowerError::InvalidArg),
        }
    }
}

impl TryFrom<u32> for GpuMode {
    type Error = PowerError;

    fn try_from(v: u32) -> Result<Self, PowerError> {
        match v {
            0 => Ok(Self::LowPower),
            3 => Ok(Self::HighPerformance),
            _ => Err(PowerError::InvalidArg),
        }
    }
}

/// VDDF boost level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VddfBoostLevel {
    /// Factory trims.
    #[default]
    Default,
    /// +30 mV MEMLDO, +35 mV buck: GPU HP, CPU HP, 192 MHz MSPI DDR.
    Level1,
    /// +150 mV MEMLDO, +145 mV buck: 250 MHz MSPI DDR.
    Level2,
}

/// Operations for [`PowerControl::control`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlOp {
    /// Bring up the SIMOBUCK with all LDO overrides in place.
    SimobuckInit,
    /// Power down CRYPTO if it is on.
    CryptoPowerdown,
    /// Power down every device domain at once.
    DisablePeriphsAll,
}

/// Trims captured at init that the boost sequences restore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OriginalTrims {
    /// LDOREG2.MEMLDOACTIVETRIM.
    pub memldo_active: Option<u32>,
    /// LDOREG1.CORELDOTEMPCOTRIM.
    pub coreldo_tempco: Option<u32>,
    /// VREFGEN4.TVRGFVREFTRIM.
    pub tvrgf_vref: Option<u32>,
    /// VREFGEN4.TVRGFTEMPCOTRIM.
    pub tvrgf_tempco: Option<u32>,
    /// D2ASPARE.
    pub d2a_spare: Option<u32>,
    /// SIMOBUCK2.VDDCACTLOWTONTRIM.
    pub vddc_act_low_ton: Option<u32>,
    /// SIMOBUCK7.VDDFACTLOWTONTRIM.
    pub vddf_act_low_ton: Option<u32>,
}

impl OriginalTrims {
    /// Every trim the mode switch sequences depend on has been saved.
    pub fn complete(&self) -> bool {
        self.memldo_active.is_some()
            && self.coreldo_tempco.is_some()
            && self.tvrgf_vref.is_some()
            && self.d2a_spare.is_some()
            && self.vddc_act_low_ton.is_some()
            && self.vddf_act_low_ton.is_some()
            && self.tvrgf_tempco.is_some()
    }
}

/// Factory trims stored once and restored by `settings_restore` and TempCo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FactoryTrims {
    /// SIMOBUCK12.ACTTRIMVDDF.
    pub act_trim_vddf: u32,
    /// LDOREG2.MEMLDOACTIVETRIM.
    pub memldo_active: u32,
    /// SIMOBUCK12.LPTRIMVDDF.
    pub lp_trim_vddf: u32,
    /// LDOREG2.MEMLPLDOTRIM.
    pub memlp_ldo: u32,
    /// VREFGEN2.TVRGCVREFTRIM.
    pub tvrgc_vref: u32,
    /// VREFGEN4.TVRGFVREFTRIM.
    pub tvrgf_vref: u32,
    /// LDOREG1.CORELDOACTIVETRIM.
    pub coreldo_active: u32,
}

/// Direction of a trim adjustment.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Adjust {
    /// Move `delta` codes from the saved original, clamped to the field.
    Boost(i32),
    /// Write the saved original back.
    Restore,
}

/// Original value shifted by `delta`, clamped to `[0, field.max()]`.
pub(crate) fn clamp_trim(orig: u32, delta: i32, field: Field) -> u32 {
    let v = i64::from(orig).saturating_add(i64::from(delta));
    let v = v.clamp(0, i64::from(field.max()));
    u32::try_from(v).unwrap_or(field.max())
}

/// Apollo5 power controller.
pub struct PowerControl<B, D, C> {
    pub(crate) bus: B,
    pub(crate) delay: D,
    pub(crate) core: C,
    pub(crate) config: PowerConfig,
    pub(crate) trim_rev: Option<u32>,
    pub(crate) orig: OriginalTrims,
    pub(crate) factory: Option<FactoryTrims>,
    pub(crate) mcu_mode: McuMode,
    pub(crate) gpu_mode: GpuMode,
    pub(crate) gpu_mode_prev: GpuMode,
    pub(crate) vddc_boost_cnt: u32,
    pub(crate) vddf_l1_cnt: u32,
    pub(crate) vddf_l2_cnt: u32,
    pub(crate) vddf_level: VddfBoostLevel,
    pub(crate) hfrc2_cnt: u32,
    pub(crate) tempco: tempco::TempcoState,
}

impl<B, D, C> PowerControl<B, D, C>
where
    B: RegisterBus,
    D: DelayNs,
    C: CpuCore,
{
    /// Wrap the bus, delay and core. Call [`PowerControl::low_power_init`]
    /// before switching modes.
    pub fn new(bus: B, delay: D, core: C, config: PowerConfig) -> Self {
        Self {
            bus,
            delay,
            core,
            config,
            trim_rev: None,
            orig: OriginalTrims::default(),
            factory: None,
            mcu_mode: McuMode::LowPower,
            gpu_mode: GpuMode::LowPower,
            gpu_mode_prev: GpuMode::LowPower,
            vddc_boost_cnt: 0,
            vddf_l1_cnt: 0,
            vddf_l2_cnt: 0,
            vddf_level: VddfBoostLevel::Default,
            hfrc2_cnt: 0,
            tempco: tempco::TempcoState::default(),
        }
    }

    /// Release the bus, delay and core.
    pub fn release(self) -> (B, D, C) {
        (self.bus, self.delay, self.core)
    }

    /// Borrow the register bus.
    pub fn bus(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Borrow the core.
    pub fn core(&mut self) -> &mut C {
        &mut self.core
    }

    /// Trims saved for the boost sequences.
    pub fn original_trims(&self) -> &OriginalTrims {
        &self.orig
    }

    /// Factory trims, once stored.
    pub fn factory_trims(&self) -> Option<&FactoryTrims> {
        self.factory.as_ref()
    }

    /// Power trim revision from INFO1, read once. An all-ones word means the
    /// part was never trimmed and reads as 0.
    pub fn trim_version(&mut self) -> u32 {
        if let Some(rev) = self.trim_rev {
            return rev;
        }
        let raw = self.bus.read(r::INFO1_TRIM_REV);
        let rev = if raw == u32::MAX { 0 } else { raw };
        self.trim_rev = Some(rev);
        rev
    }

    /// Current MCU performance mode.
    pub fn mcu_mode_status(&self) -> McuMode {
        self.mcu_mode
    }

    /// Current GPU performance mode.
    pub fn gpu_mode_status(&self) -> GpuMode {
        self.gpu_mode
    }

    /// Capture the trims every later sequence restores, drop HFRC2 and
    /// power down blocks the boot ROM leaves on.
    pub fn low_power_init(&mut self) -> Result<(), PowerError> {
        if self.factory.is_none() {
            let act_trim_vddf = self.bus.read_field(r::SIMOBUCK12, r::ACTTRIMVDDF);
            let lp_trim_vddf = self.bus.read_field(r::SIMOBUCK12, r::LPTRIMVDDF);
            let memldo_active = self.bus.read_field(r::LDOREG2, r::MEMLDOACTIVETRIM);
            let memlp_ldo = self.bus.read_field(r::LDOREG2, r::MEMLPLDOTRIM);
            let tvrgc_vref = self.bus.read_field(r::VREFGEN2, r::TVRGCVREFTRIM);
            let coreldo_active = self.bus.read_field(r::LDOREG1, r::CORELDOACTIVETRIM);
            let tvrgf_vref = self.with_trim_writes(|bus| {
                bus.read_field(r::mirror(r::VREFGEN4), r::TVRGFVREFTRIM)
            });
            self.factory = Some(FactoryTrims {
                act_trim_vddf,
                memldo_active,
                lp_trim_vddf,
                memlp_ldo,
                tvrgc_vref,
                tvrgf_vref,
                coreldo_active,
            });
        }

        let (tvrgf_vref, tvrgf_tempco) = self.with_trim_writes(|bus| {
            let word = bus.read(r::mirror(r::VREFGEN4));
            (r::TVRGFVREFTRIM.extract(word), r::TVRGFTEMPCOTRIM.extract(word))
        });
        self.orig = OriginalTrims {
            memldo_active: Some(self.bus.read_field(r::LDOREG2, r::MEMLDOACTIVETRIM)),
            coreldo_tempco: Some(self.bus.read_field(r::LDOREG1, r::CORELDOTEMPCOTRIM)),
            tvrgf_vref: Some(tvrgf_vref),
            tvrgf_tempco: Some(tvrgf_tempco),
            d2a_spare: Some(self.bus.read(r::D2ASPARE)),
            vddc_act_low_ton: Some(self.bus.read_field(r::SIMOBUCK2, r::VDDCACTLOWTONTRIM)),
            vddf_act_low_ton: Some(self.bus.read_field(r::SIMOBUCK7, r::VDDFACTLOWTONTRIM)),
        };

        let rev = self.trim_version();
        #[cfg(feature = "defmt")]
        defmt::info!("pwrctrl: trims saved, trim rev {}", rev);

        // HFRC2 stays off until a mode switch requests it.
        self.hfrc2_write(rev, false);

        self.periph_disable(Periph::Crypto)?;
        self.periph_disable(Periph::Otp)
    }

    /// Undo `low_power_init` so the boot ROM sees factory settings again.
    /// Only allowed in MCU LP mode.
    pub fn settings_restore(&mut self) -> Result<(), PowerError> {
        if self.mcu_mode != McuMode::LowPower {
            return Err(PowerError::InvalidOperation);
        }
        critical_section::with(|_| {
            if self.buck_active() {
                self.bus.clear_bits(
                    r::MCU_VRCTRL,
                    r::VRCTRL_SIMOBUCKOVER | r::VRCTRL_CORELDOOVER | r::VRCTRL_MEMLDOOVER,
                );
            }
            self.bus.set_bits(r::DEVPWREN, r::DEV_CRYPTO);
            if let Some(f) = self.factory {
                self.bus.write_field(r::SIMOBUCK12, r::ACTTRIMVDDF, f.act_trim_vddf);
                self.bus.write_field(r::SIMOBUCK12, r::LPTRIMVDDF, f.lp_trim_vddf);
                self.bus.write_field(r::LDOREG2, r::MEMLDOACTIVETRIM, f.memldo_active);
                self.bus.write_field(r::LDOREG2, r::MEMLPLDOTRIM, f.memlp_ldo);
                self.bus.write_field(r::VREFGEN2, r::TVRGCVREFTRIM, f.tvrgc_vref);
                self.bus.write_field(r::LDOREG1, r::CORELDOACTIVETRIM, f.coreldo_active);
                self.with_trim_writes(|bus| {
                    bus.write_field(r::mirror(r::VREFGEN4), r::TVRGFVREFTRIM, f.tvrgf_vref);
                });
            }
        });
        Ok(())
    }

    /// Miscellaneous power-control operations.
    pub fn control(&mut self, op: ControlOp) -> Result<(), PowerError> {
        match op {
            ControlOp::SimobuckInit => {
                critical_section::with(|_| {
                    self.bus.set_bits(
                        r::MCU_VRCTRL,
                        r::VRCTRL_SIMOBUCKPDNB
                            | r::VRCTRL_SIMOBUCKRSTB
                            | r::VRCTRL_SIMOBUCKACTIVE
                            | r::VRCTRL_SIMOBUCKOVER,
                    );
                    self.bus.clear_bits(r::MCU_VRCTRL, r::VRCTRL_CORELDOCOLDSTARTEN);
                    self.bus.set_bits(
                        r::MCU_VRCTRL,
                        r::VRCTRL_CORELDO_FORCE | r::VRCTRL_CORELDOOVER,
                    );
                    self.bus.clear_bits(r::MCU_VRCTRL, r::VRCTRL_MEMLDOCOLDSTARTEN);
                    self.bus.set_bits(
                        r::MCU_VRCTRL,
                        r::VRCTRL_MEMLDO_FORCE | r::VRCTRL_MEMLDOOVER,
                    );
                    self.bus.set_bits(r::SIMOBUCK15, r::SIMOBUCK15_TRIMLATCHOVER);
                    self.bus.set_bits(r::SIMOBUCK0, r::SIMOBUCK0_COMP_ALL);
                    self.bus.set_bits(r::VRCTRL, r::VRCTRL_SIMOBUCKEN);
                });
                #[cfg(feature = "defmt")]
                defmt::info!("pwrctrl: SIMOBUCK enabled");
                Ok(())
            }
            ControlOp::CryptoPowerdown => self.periph_disable(Periph::Crypto),
            ControlOp::DisablePeriphsAll => {
                critical_section::with(|_| self.bus.write(r::DEVPWREN, 0));
                Ok(())
            }
        }
    }

    // ─── Shared helpers ─────────────────────────────────────────────────────

    /// SIMOBUCK is supplying the rails.
    pub(crate) fn buck_active(&mut self) -> bool {
        self.bus.read_field(r::VRSTATUS, r::VRSTATUS_SIMOBUCKST) == r::SIMOBUCKST_ACT
    }

    /// Run `f` with the trim mirror unlocked, inside a critical section.
    pub(crate) fn with_trim_writes<R>(&mut self, f: impl FnOnce(&mut B) -> R) -> R {
        critical_section::with(|_| {
            for (addr, key) in r::TRIM_WE_KEYS {
                self.bus.write(addr, key);
            }
            let out = f(&mut self.bus);
            for (addr, _) in r::TRIM_WE_KEYS {
                self.bus.write(addr, 0);
            }
            out
        })
    }

    pub(crate) fn poll(
        &mut self,
        addr: u32,
        mask: u32,
        value: u32,
        equal: bool,
        max_us: u32,
    ) -> Result<(), PollTimeout> {
        poll_until(&mut self.bus, &mut self.delay, addr, mask, value, equal, max_us)
    }

    pub(crate) fn is_pcm_trimmed(&mut self) -> bool {
        self.trim_version() >= MIN_PCM_TRIM_VER
    }

    /// Drive HFRC2 directly. Trim revisions above 6 expose the control in
    /// MCUCTRL; older parts only through the trim mirror.
    pub(crate) fn hfrc2_write(&mut self, rev: u32, on: bool) {
        let apply = |v: u32| {
            if on {
                (v & !r::HFRC2_PWRDN) | r::HFRC2_OVERRIDE
            } else {
                v | r::HFRC2_PWRDN | r::HFRC2_OVERRIDE
            }
        };
        if rev > MIN_PCM_TRIM_VER {
            self.bus.modify(r::HFRC2, apply);
        } else {
            self.with_trim_writes(|bus| bus.modify(r::HFRC2_MIRROR, apply));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
pub(crate) mod tests {
    use super::*;
    use crate::mocks::{MockBus, MockCore};
    use embedded_hal_mock::eh1::delay::NoopDelay;

    pub(crate) type Pc = PowerControl<MockBus, NoopDelay, MockCore>;

    /// Controller over the Apollo5 mock with factory-looking trims and the
    /// given trim revision.
    pub(crate) fn pc(rev: u32) -> Pc {
        let mut bus = MockBus::apollo5();
        bus.preset(r::INFO1_TRIM_REV, rev);
        bus.preset(r::LDOREG2, r::MEMLDOACTIVETRIM.val(40) | r::MEMLPLDOTRIM.val(20));
        bus.preset(r::LDOREG1, r::CORELDOACTIVETRIM.val(300) | r::CORELDOTEMPCOTRIM.val(8));
        bus.preset(r::mirror(r::VREFGEN4), r::TVRGFVREFTRIM.val(60) | r::TVRGFTEMPCOTRIM.val(10));
        bus.preset(r::VREFGEN2, r::TVRGCVREFTRIM.val(50));
        bus.preset(r::SIMOBUCK2, r::VDDCACTLOWTONTRIM.val(12));
        bus.preset(r::SIMOBUCK7, r::VDDFACTLOWTONTRIM.val(14));
        bus.preset(r::SIMOBUCK12, r::ACTTRIMVDDF.val(30) | r::LPTRIMVDDF.val(25));
        PowerControl::new(bus, NoopDelay::new(), MockCore::new(), PowerConfig::default())
    }

    pub(crate) fn initialised(rev: u32) -> Pc {
        let mut p = pc(rev);
        p.low_power_init().unwrap();
        p.bus.clear_log();
        p
    }

    #[test]
    fn trim_version_all_ones_reads_as_zero() {
        let mut p = pc(u32::MAX);
        assert_eq!(p.trim_version(), 0);
        p.bus.preset(r::INFO1_TRIM_REV, 7);
        // Cached after the first read.
        assert_eq!(p.trim_version(), 0);
        assert_eq!(p.bus.read_count(r::INFO1_TRIM_REV), 1);
    }

    #[test]
    fn low_power_init_saves_every_trim() {
        let p = initialised(7);
        let o = p.original_trims();
        assert!(o.complete());
        assert_eq!(o.memldo_active, Some(40));
        assert_eq!(o.coreldo_tempco, Some(8));
        assert_eq!(o.tvrgf_vref, Some(60));
        assert_eq!(o.tvrgf_tempco, Some(10));
        let f = p.factory_trims().unwrap();
        assert_eq!(f.act_trim_vddf, 30);
        assert_eq!(f.lp_trim_vddf, 25);
        assert_eq!(f.coreldo_active, 300);
    }

    #[test]
    fn low_power_init_powers_down_hfrc2_crypto_and_otp() {
        let mut p = pc(7);
        p.bus.preset(r::DEVPWREN, r::DEV_CRYPTO | r::DEV_OTP);
        p.bus.preset(r::DEVPWRSTATUS, r::DEV_CRYPTO);
        p.bus.preset(r::MEMPWRSTATUS, r::MEMSTAT_NVM0 | r::MEMSTAT_OTP);
        p.low_power_init().unwrap();
        assert_eq!(p.bus.peek(r::DEVPWREN) & (r::DEV_CRYPTO | r::DEV_OTP), 0);
        assert_eq!(
            p.bus.peek(r::HFRC2) & (r::HFRC2_PWRDN | r::HFRC2_OVERRIDE),
            r::HFRC2_PWRDN | r::HFRC2_OVERRIDE
        );
    }

    #[test]
    fn factory_trims_are_stored_once() {
        let mut p = initialised(7);
        p.bus.preset(r::SIMOBUCK12, r::ACTTRIMVDDF.val(1));
        p.low_power_init().unwrap();
        assert_eq!(p.factory_trims().unwrap().act_trim_vddf, 30);
    }

    #[test]
    fn trim_writes_are_bracketed_by_keys() {
        let mut p = pc(7);
        p.with_trim_writes(|bus| bus.write(r::HFRC2_MIRROR, 1));
        let w = p.bus.writes();
        assert_eq!(w.len(), 9);
        assert_eq!(w[0], r::TRIM_WE_KEYS[0]);
        assert_eq!(w[4], (r::HFRC2_MIRROR, 1));
        assert!(w[5..].iter().all(|(_, v)| *v == 0));
    }

    #[test]
    fn old_trim_revisions_drive_hfrc2_through_the_mirror() {
        let mut p = pc(5);
        p.hfrc2_write(5, true);
        assert_eq!(p.bus.peek(r::HFRC2_MIRROR), r::HFRC2_OVERRIDE);
        assert!(p.bus.writes_to(r::HFRC2).is_empty());
    }

    #[test]
    fn settings_restore_requires_low_power() {
        let mut p = initialised(7);
        p.mcu_mode = McuMode::HighPerformance;
        assert_eq!(p.settings_restore(), Err(PowerError::InvalidOperation));
    }

    #[test]
    fn settings_restore_drops_overrides_and_restores_factory() {
        let mut p = initialised(7);
        p.bus.preset(r::MCU_VRCTRL, 0xFFFF_FFFF);
        p.bus.preset(r::SIMOBUCK12, 0);
        p.settings_restore().unwrap();
        let vr = p.bus.peek(r::MCU_VRCTRL);
        assert_eq!(vr & r::VRCTRL_SIMOBUCKOVER, 0);
        assert_eq!(vr & r::VRCTRL_CORELDOOVER, 0);
        assert_eq!(vr & r::VRCTRL_MEMLDOOVER, 0);
        assert_ne!(p.bus.peek(r::DEVPWREN) & r::DEV_CRYPTO, 0);
        assert_eq!(p.bus.read_field(r::SIMOBUCK12, r::ACTTRIMVDDF), 30);
    }

    #[test]
    fn simobuck_init_sets_overrides_and_enables_buck() {
        let mut p = pc(7);
        p.bus.preset(r::MCU_VRCTRL, r::VRCTRL_CORELDOCOLDSTARTEN | r::VRCTRL_MEMLDOCOLDSTARTEN);
        p.control(ControlOp::SimobuckInit).unwrap();
        let vr = p.bus.peek(r::MCU_VRCTRL);
        assert_eq!(vr & (r::VRCTRL_CORELDOCOLDSTARTEN | r::VRCTRL_MEMLDOCOLDSTARTEN), 0);
        assert_ne!(vr & r::VRCTRL_SIMOBUCKACTIVE, 0);
        assert_eq!(vr & r::VRCTRL_MEMLDO_FORCE, r::VRCTRL_MEMLDO_FORCE);
        assert_eq!(p.bus.peek(r::VRCTRL) & r::VRCTRL_SIMOBUCKEN, r::VRCTRL_SIMOBUCKEN);
        assert_eq!(p.bus.peek(r::SIMOBUCK0), r::SIMOBUCK0_COMP_ALL);
    }

    #[test]
    fn disable_periphs_all_clears_devpwren() {
        let mut p = pc(7);
        p.bus.preset(r::DEVPWREN, 0xFFFF);
        p.control(ControlOp::DisablePeriphsAll).unwrap();
        assert_eq!(p.bus.peek(r::DEVPWREN), 0);
    }

    #[test]
    fn clamp_trim_saturates_both_ends() {
        let f = r::MEMLDOACTIVETRIM;
        assert_eq!(clamp_trim(60, 6, f), 63);
        assert_eq!(clamp_trim(3, -10, f), 0);
        assert_eq!(clamp_trim(10, 5, f), 15);
    }

    #[test]
    fn raw_modes_are_validated() {
        assert_eq!(McuMode::try_from(2), Err(PowerError::InvalidArg));
        assert_eq!(GpuMode::try_from(3), Ok(GpuMode::HighPerformance));
    }
}
