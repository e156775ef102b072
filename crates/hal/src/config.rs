//! Silicon constants and tunables.
//!
//! Every timing constant the power and card drivers depend on lives here so
//! board bring-up can adjust a value without touching the sequences
//! themselves. `Default` carries the Apollo5 datasheet values.

/// Power-control timing and trim tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PowerConfig {
    /// Upper bound, in µs (one poll per µs), for status bits to settle.
    pub max_wait_us: u32,
    /// Rail settling time after a trim change, in µs.
    pub rail_settle_us: u32,
    /// Core sleep while VDDCPU switches rails (PCM-trimmed parts), in µs.
    pub core_sleep_us: u32,
    /// Timer instance used to wake the core from that sleep.
    pub wakeup_timer: u8,
    /// NVIC line of TIMER0; the wakeup timer's IRQ is offset from it.
    pub timer0_irq: u16,
    /// Delay after the LP perf request before switching rails, in µs.
    pub lp_switch_delay_us: u32,
    /// Settling time after powering HFRC2, in µs.
    pub hfrc2_settle_us: u32,
    /// Wait for CRYPTO/NVM idle, in µs.
    pub crypto_wait_us: u32,
    /// Extra settle after OTP power-up before it can be read, in µs.
    pub otp_settle_us: u32,
    /// Temperature compensation bands.
    pub tempco: TempcoLimits,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            max_wait_us: 5,
            rail_settle_us: 15,
            core_sleep_us: 50,
            wakeup_timer: 10,
            timer0_irq: 32,
            lp_switch_delay_us: 20,
            hfrc2_settle_us: 5,
            crypto_wait_us: 100,
            otp_settle_us: 100,
            tempco: TempcoLimits::default(),
        }
    }
}

/// Temperature bands for VDDC/VDDF compensation, in °C.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TempcoLimits {
    /// Lowest supported temperature.
    pub low_limit: f32,
    /// Boundary between the low and mid bands.
    pub vddc_vddf_threshold: f32,
    /// Boundary between the mid and high bands; above it the buck is kept
    /// active in deep sleep.
    pub buck_lp_threshold: f32,
    /// Highest supported temperature (exclusive).
    pub high_limit: f32,
    /// Hysteresis applied to the lower threshold when leaving a band.
    pub hysteresis: f32,
}

impl Default for TempcoLimits {
    fn default() -> Self {
        Self {
            low_limit: -40.0,
            vddc_vddf_threshold: 0.0,
            buck_lp_threshold: 50.0,
            high_limit: 125.0,
            hysteresis: 5.0,
        }
    }
}

/// eMMC card-layer retry counts and timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CardConfig {
    /// CMD1 attempts before giving up on the card leaving busy.
    pub op_cond_retries: u32,
    /// Delay between CMD1 attempts, in ms.
    pub op_cond_retry_delay_ms: u32,
    /// Busy timeout after CMD5 sleep/awake, in ms.
    pub sleep_awake_timeout_ms: u32,
    /// Busy timeout handed to the host after an R1b CMD6, in ms.
    pub switch_busy_timeout_ms: u32,
    /// Default CMD6 completion timeout when EXT_CSD does not give one, in ms.
    pub generic_cmd6_timeout_ms: u32,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            op_cond_retries: 100,
            op_cond_retry_delay_ms: 10,
            sleep_awake_timeout_ms: 100,
            switch_busy_timeout_ms: 10,
            generic_cmd6_timeout_ms: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_defaults_match_silicon_constants() {
        let c = PowerConfig::default();
        assert_eq!(c.max_wait_us, 5);
        assert_eq!(c.core_sleep_us, 50);
        assert_eq!(c.wakeup_timer, 10);
    }

    #[test]
    fn tempco_bands_are_ordered() {
        let t = TempcoLimits::default();
        assert!(t.low_limit < t.vddc_vddf_threshold);
        assert!(t.vddc_vddf_threshold < t.buck_lp_threshold);
        assert!(t.buck_lp_threshold < t.high_limit);
        assert!(t.hysteresis > 0.0);
    }
}
