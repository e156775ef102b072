//! Apollo5 PWRCTRL / MCUCTRL / CLKGEN register map used by the power HAL.
//!
//! Trim fields live in MCUCTRL; a write-protected mirror of MCUCTRL sits at
//! [`TRIM_MIRROR_BASE`] and only accepts writes while the trim keys are
//! loaded (see [`TRIM_WE_KEYS`]).

use crate::regs::Field;

// ─── Bases ──────────────────────────────────────────────────────────────────

/// CLKGEN peripheral base.
pub const CLKGEN_BASE: u32 = 0x4000_4000;
/// MCUCTRL peripheral base.
pub const MCUCTRL_BASE: u32 = 0x4002_0000;
/// PWRCTRL peripheral base.
pub const PWRCTRL_BASE: u32 = 0x4002_1000;
/// Trim-protected mirror of MCUCTRL.
pub const TRIM_MIRROR_BASE: u32 = 0x4004_0000;
/// CRYPTO (CryptoCell) register base.
pub const CRYPTO_BASE: u32 = 0x400C_0000;
/// INFO1 word holding the power trim revision.
pub const INFO1_TRIM_REV: u32 = 0x4200_6014;

/// Key registers unlocking writes to the trim mirror, with their unlock values.
pub const TRIM_WE_KEYS: [(u32, u32); 4] = [
    (0x4004_01FC, 0x2EF1_543E),
    (0x4004_00F8, 0xDF32_8C18),
    (0x4004_0144, 0x8299_B572),
    (0x4004_0278, 0xA07D_B9C8),
];

// ─── PWRCTRL ────────────────────────────────────────────────────────────────

/// MCU performance request / acknowledge / status.
pub const MCUPERFREQ: u32 = PWRCTRL_BASE + 0x000;
/// Requested MCU performance mode.
pub const MCUPERFREQ_REQ: Field = Field::new(0, 2);
/// Set by hardware once the request has been taken.
pub const MCUPERFREQ_ACK: Field = Field::new(2, 1);
/// Mode the MCU is currently running in.
pub const MCUPERFREQ_STATUS: Field = Field::new(3, 2);

/// Device power enables.
pub const DEVPWREN: u32 = PWRCTRL_BASE + 0x004;
/// Device power status.
pub const DEVPWRSTATUS: u32 = PWRCTRL_BASE + 0x008;
/// Audio subsystem power enables.
pub const AUDSSPWREN: u32 = PWRCTRL_BASE + 0x00C;
/// Audio subsystem power status.
pub const AUDSSPWRSTATUS: u32 = PWRCTRL_BASE + 0x010;
/// Memory power enables.
pub const MEMPWREN: u32 = PWRCTRL_BASE + 0x014;
/// Memory power status.
pub const MEMPWRSTATUS: u32 = PWRCTRL_BASE + 0x018;
/// System power status (MCU core domains).
pub const SYSPWRSTATUS: u32 = PWRCTRL_BASE + 0x020;
/// Shared SRAM power status.
pub const SSRAMPWRST: u32 = PWRCTRL_BASE + 0x028;
/// Voltage regulator control.
pub const VRCTRL: u32 = PWRCTRL_BASE + 0x070;
/// SIMOBUCK enable.
pub const VRCTRL_SIMOBUCKEN: u32 = 1 << 0;
/// Voltage regulator status.
pub const VRSTATUS: u32 = PWRCTRL_BASE + 0x078;
/// SIMOBUCK state field of [`VRSTATUS`].
pub const VRSTATUS_SIMOBUCKST: Field = Field::new(2, 2);
/// [`VRSTATUS_SIMOBUCKST`] value for an active buck.
pub const SIMOBUCKST_ACT: u32 = 2;
/// General-purpose ADC power status.
pub const ADCSTATUS: u32 = PWRCTRL_BASE + 0x080;
/// Audio ADC power status.
pub const AUDADCSTATUS: u32 = PWRCTRL_BASE + 0x084;
/// GPU performance request.
pub const GFXPERFREQ: u32 = PWRCTRL_BASE + 0x0A8;
/// Requested GPU performance mode.
pub const GFXPERFREQ_REQ: Field = Field::new(0, 2);
/// [`GFXPERFREQ_REQ`] value for the 192 MHz HP1 clock.
pub const GFXPERFREQ_HP1: u32 = 1;
/// GPU power-switch rail select.
pub const GFXPWRSWSEL: u32 = PWRCTRL_BASE + 0x0AC;
/// GPU supply rail: 0 = VDDC, 1 = VDDF.
pub const GFXPWRSWSEL_VDDSEL: Field = Field::new(0, 1);

// DEVPWREN / DEVPWRSTATUS share bit positions.

/// IOS0.
pub const DEV_IOS0: u32 = 1 << 0;
/// IOSFD0.
pub const DEV_IOSFD0: u32 = 1 << 1;
/// IOSFD1.
pub const DEV_IOSFD1: u32 = 1 << 2;
/// IOM0 (first of eight).
pub const DEV_IOM0: u32 = 1 << 3;
/// UART0 (first of four).
pub const DEV_UART0: u32 = 1 << 11;
/// General-purpose ADC.
pub const DEV_ADC: u32 = 1 << 15;
/// MSPI0 (first of four).
pub const DEV_MSPI0: u32 = 1 << 16;
/// GPU.
pub const DEV_GFX: u32 = 1 << 20;
/// Display controller.
pub const DEV_DISP: u32 = 1 << 21;
/// Display PHY.
pub const DEV_DISPPHY: u32 = 1 << 22;
/// CryptoCell.
pub const DEV_CRYPTO: u32 = 1 << 23;
/// SDIO0 host.
pub const DEV_SDIO0: u32 = 1 << 24;
/// SDIO1 host.
pub const DEV_SDIO1: u32 = 1 << 25;
/// USB controller.
pub const DEV_USB: u32 = 1 << 26;
/// USB PHY.
pub const DEV_USBPHY: u32 = 1 << 27;
/// Debug block.
pub const DEV_DBG: u32 = 1 << 28;
/// OTP enable (status lives in [`MEMPWRSTATUS`]).
pub const DEV_OTP: u32 = 1 << 29;

/// IOM0..3 share the HCPB domain.
pub const HCPB_MASK: u32 = DEV_IOM0 * 0b1111;
/// IOM4..7 share the HCPC domain.
pub const HCPC_MASK: u32 = (DEV_IOM0 << 4) * 0b1111;
/// UART0..3 share the HCPA domain.
pub const HCPA_MASK: u32 = DEV_UART0 * 0b1111;
/// MSPI0..3 share one domain.
pub const MSPI_MASK: u32 = DEV_MSPI0 * 0b1111;

// AUDSSPWREN / AUDSSPWRSTATUS share bit positions.

/// Audio record path.
pub const AUD_AUDREC: u32 = 1 << 0;
/// Audio playback path.
pub const AUD_AUDPB: u32 = 1 << 1;
/// PDM0.
pub const AUD_PDM0: u32 = 1 << 2;
/// I2S0.
pub const AUD_I2S0: u32 = 1 << 3;
/// I2S1.
pub const AUD_I2S1: u32 = 1 << 4;
/// Audio ADC.
pub const AUD_AUDADC: u32 = 1 << 7;
/// Audio peripherals sharing one domain.
pub const AUD_MASK: u32 = AUD_AUDREC | AUD_AUDPB | AUD_PDM0 | AUD_I2S0 | AUD_I2S1;

/// NVM0 powered (MEMPWRSTATUS).
pub const MEMSTAT_NVM0: u32 = 1 << 4;
/// OTP powered (MEMPWRSTATUS).
pub const MEMSTAT_OTP: u32 = 1 << 10;

// ─── MCUCTRL ────────────────────────────────────────────────────────────────

/// Shadow register valid flags.
pub const SHADOWVALID: u32 = MCUCTRL_BASE + 0x018;
/// INFOC is backed by OTP (1) rather than NVM (0).
pub const SHADOWVALID_INFOCSELOTP: u32 = 1 << 3;
/// VREFGEN2: VDDC reference trims.
pub const VREFGEN2: u32 = MCUCTRL_BASE + 0x044;
/// VDDC buck reference trim.
pub const TVRGCVREFTRIM: Field = Field::new(0, 7);
/// VREFGEN4: VDDF reference trims.
pub const VREFGEN4: u32 = MCUCTRL_BASE + 0x04C;
/// VDDF buck reference trim.
pub const TVRGFVREFTRIM: Field = Field::new(0, 7);
/// VDDF buck reference temperature coefficient trim.
pub const TVRGFTEMPCOTRIM: Field = Field::new(7, 5);
/// LDOREG1: core LDO trims.
pub const LDOREG1: u32 = MCUCTRL_BASE + 0x080;
/// Core LDO active trim.
pub const CORELDOACTIVETRIM: Field = Field::new(0, 10);
/// Core LDO temperature coefficient trim.
pub const CORELDOTEMPCOTRIM: Field = Field::new(10, 4);
/// LDOREG2: memory LDO trims.
pub const LDOREG2: u32 = MCUCTRL_BASE + 0x088;
/// Memory LDO active trim.
pub const MEMLDOACTIVETRIM: Field = Field::new(0, 6);
/// Memory LDO low-power trim.
pub const MEMLPLDOTRIM: Field = Field::new(6, 6);
/// Regulator override control.
pub const MCU_VRCTRL: u32 = MCUCTRL_BASE + 0x0A0;
/// SIMOBUCK override enable.
pub const VRCTRL_SIMOBUCKOVER: u32 = 1 << 0;
/// SIMOBUCK power-down (active low).
pub const VRCTRL_SIMOBUCKPDNB: u32 = 1 << 1;
/// SIMOBUCK reset (active low).
pub const VRCTRL_SIMOBUCKRSTB: u32 = 1 << 2;
/// SIMOBUCK forced active.
pub const VRCTRL_SIMOBUCKACTIVE: u32 = 1 << 3;
/// Core LDO override enable.
pub const VRCTRL_CORELDOOVER: u32 = 1 << 8;
/// Core LDO cold start.
pub const VRCTRL_CORELDOCOLDSTARTEN: u32 = 1 << 9;
/// Core LDO active, early active and power-down-bar bits.
pub const VRCTRL_CORELDO_FORCE: u32 = 0b111 << 10;
/// Memory LDO override enable.
pub const VRCTRL_MEMLDOOVER: u32 = 1 << 16;
/// Memory LDO cold start.
pub const VRCTRL_MEMLDOCOLDSTARTEN: u32 = 1 << 17;
/// Memory LDO active, early active and power-down-bar bits.
pub const VRCTRL_MEMLDO_FORCE: u32 = 0b111 << 18;
/// HFRC2 control (MCUCTRL copy, trim revisions above 6).
pub const HFRC2: u32 = MCUCTRL_BASE + 0x0C4;
/// HFRC2 control in the trim mirror (older trim revisions).
pub const HFRC2_MIRROR: u32 = TRIM_MIRROR_BASE + 0x0C4;
/// HFRC2 software override enable.
pub const HFRC2_OVERRIDE: u32 = 1 << 0;
/// HFRC2 power-down request.
pub const HFRC2_PWRDN: u32 = 1 << 5;
/// Analog spare bits; bit 8 trims the VDDC SIMOBUCK.
pub const D2ASPARE: u32 = MCUCTRL_BASE + 0x0D8;
/// VDDC SIMOBUCK boost bit in [`D2ASPARE`].
pub const D2ASPARE_VDDC_BOOST: u32 = 1 << 8;
/// SIMOBUCK0: receive compensation enables.
pub const SIMOBUCK0: u32 = MCUCTRL_BASE + 0x1A0;
/// VDDC/VDDF/VDDS/VDDCLV compensation enables.
pub const SIMOBUCK0_COMP_ALL: u32 = 0b1111;
/// SIMOBUCK2: VDDC TON trims.
pub const SIMOBUCK2: u32 = MCUCTRL_BASE + 0x1A8;
/// VDDC active low TON trim.
pub const VDDCACTLOWTONTRIM: Field = Field::new(0, 5);
/// SIMOBUCK7: VDDF TON trims.
pub const SIMOBUCK7: u32 = MCUCTRL_BASE + 0x1BC;
/// VDDF active low TON trim.
pub const VDDFACTLOWTONTRIM: Field = Field::new(0, 5);
/// SIMOBUCK12: VDDF output trims.
pub const SIMOBUCK12: u32 = MCUCTRL_BASE + 0x1D0;
/// VDDF active trim.
pub const ACTTRIMVDDF: Field = Field::new(0, 6);
/// VDDF low-power trim.
pub const LPTRIMVDDF: Field = Field::new(6, 6);
/// SIMOBUCK15: trim latch override.
pub const SIMOBUCK15: u32 = MCUCTRL_BASE + 0x1DC;
/// Trim latch override bit.
pub const SIMOBUCK15_TRIMLATCHOVER: u32 = 1 << 0;
/// Power switch control 0.
pub const PWRSW0: u32 = MCUCTRL_BASE + 0x2A0;
/// MRAM power control.
pub const MRAMPWRCTRL: u32 = MCUCTRL_BASE + 0x2F8;
/// MRAM power controlled by MCUCTRL.
pub const MRAMPWRCTRL_CTRL: u32 = 1 << 0;
/// MRAM sleep enable.
pub const MRAMPWRCTRL_SLPEN: u32 = 1 << 1;
/// MRAM low-power read enable.
pub const MRAMPWRCTRL_LPREN: u32 = 1 << 2;

// PWRSW0 fields.

/// Fields of PWRSW0 that every override keeps at 1.
pub const PWRSW0_COMMON: u32 = (1 << 29) // PWRSWVDDRCPUPGN
    | (1 << 27) // PWRSWVDDRCPUDYNSEL
    | (1 << 25) // PWRSWVDDMLSTATSEL
    | (1 << 24) // PWRSWVDDMLDYNSEL
    | (1 << 16) // PWRSWVDDMCPUSTATSEL
    | (1 << 15) // PWRSWVDDMCPUDYNSEL
    | (1 << 7) //  PWRSWVDDCAORPGN
    | (1 << 2); // PWRSWVDDCPUPGN
/// Always-on rail override enable.
pub const PWRSW0_CAOROVERRIDE: Field = Field::new(6, 1);
/// Always-on rail dynamic select.
pub const PWRSW0_CAORDYNSEL: Field = Field::new(4, 2);
/// CPU rail override enable.
pub const PWRSW0_CPUOVERRIDE: Field = Field::new(3, 1);
/// CPU rail dynamic select.
pub const PWRSW0_CPUDYNSEL: Field = Field::new(0, 2);

// ─── CLKGEN ─────────────────────────────────────────────────────────────────

/// Miscellaneous clock controls.
pub const CLKGEN_MISC: u32 = CLKGEN_BASE + 0x020;
/// CPU clock source in HP mode.
pub const CLKGEN_MISC_CPUHPFREQSEL: Field = Field::new(0, 2);
/// [`CLKGEN_MISC_CPUHPFREQSEL`] value for 250 MHz.
pub const CPUHPFREQSEL_HP250: u32 = 1;
/// MSPI I/O clock enables, one bit per instance.
pub const CLKGEN_MSPIIOCLKCTRL: u32 = CLKGEN_BASE + 0x0E4;

// ─── TIMER ──────────────────────────────────────────────────────────────────

/// TIMER block base.
pub const TIMER_BASE: u32 = 0x4000_8000;
/// Global enable, one bit per timer.
pub const TIMER_GLOBEN: u32 = TIMER_BASE + 0x010;
/// Interrupt enable.
pub const TIMER_INTEN: u32 = TIMER_BASE + 0x060;
/// Interrupt clear.
pub const TIMER_INTCLR: u32 = TIMER_BASE + 0x068;
/// Timer enable bit in CTRL0.
pub const TIMER_CTRL0_EN: u32 = 1 << 0;
/// Counter clear bit in CTRL0.
pub const TIMER_CTRL0_CLR: u32 = 1 << 1;
/// CTRL0 clock select: HFRC / 16.
pub const TIMER_CTRL0_CLK: Field = Field::new(8, 4);
/// CTRL0 function select: single edge.
pub const TIMER_CTRL0_FN: Field = Field::new(4, 3);
/// HFRC / 16 clock source code.
pub const TIMER_CLK_HFRC_DIV16: u32 = 2;
/// Edge function code.
pub const TIMER_FN_EDGE: u32 = 0;
/// MODE0 trigger select.
pub const TIMER_MODE0_TRIGSEL: Field = Field::new(0, 8);
/// Trigger on this timer's own OUT1.
pub const TIMER_TRIGGER_OUT1: u32 = 1;

/// CTRL0 of timer `n`.
pub const fn timer_ctrl0(n: u8) -> u32 {
    timer_base(n)
}

/// CMP0 of timer `n`.
pub const fn timer_cmp0(n: u8) -> u32 {
    timer_base(n).wrapping_add(0x08)
}

/// CMP1 of timer `n`.
pub const fn timer_cmp1(n: u8) -> u32 {
    timer_base(n).wrapping_add(0x0C)
}

/// MODE0 of timer `n`.
pub const fn timer_mode0(n: u8) -> u32 {
    timer_base(n).wrapping_add(0x10)
}

/// COMPARE0 interrupt bit of timer `n` in INTEN/INTCLR.
pub const fn timer_cmp0_int(n: u8) -> u32 {
    1u32.wrapping_shl((n as u32).wrapping_mul(2))
}

const fn timer_base(n: u8) -> u32 {
    (TIMER_BASE + 0x100).wrapping_add((n as u32).wrapping_mul(0x20))
}

// ─── CRYPTO ────────────────────────────────────────────────────────────────

/// Host crypto core idle.
pub const CRYPTO_HOSTCCISIDLE: u32 = CRYPTO_BASE + 0x1F18;
/// NVM idle.
pub const CRYPTO_NVMISIDLE: u32 = CRYPTO_BASE + 0x1F10;
/// Host power-down request.
pub const CRYPTO_HOSTPOWERDOWN: u32 = CRYPTO_BASE + 0x1FA0;
/// Peripheral ID 0; reads 0xC0 when the block is powered and accessible.
pub const CRYPTO_PERIPHERALID0: u32 = CRYPTO_BASE + 0x1FE0;
/// Expected [`CRYPTO_PERIPHERALID0`] value.
pub const CRYPTO_PERIPHERAL_ID: u32 = 0xC0;

/// Map an MCUCTRL register address onto the trim mirror.
pub const fn mirror(mcuctrl_addr: u32) -> u32 {
    mcuctrl_addr
        .wrapping_sub(MCUCTRL_BASE)
        .wrapping_add(TRIM_MIRROR_BASE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vrefgen4_mirror_address() {
        assert_eq!(mirror(VREFGEN4), 0x4004_004C);
        assert_eq!(mirror(HFRC2), HFRC2_MIRROR);
    }

    #[test]
    fn shared_domain_masks_are_disjoint() {
        assert_eq!(HCPA_MASK & HCPB_MASK, 0);
        assert_eq!(HCPB_MASK & HCPC_MASK, 0);
        assert_eq!(HCPC_MASK & HCPA_MASK, 0);
        assert_eq!(MSPI_MASK & (HCPA_MASK | HCPB_MASK | HCPC_MASK), 0);
        assert_eq!(HCPC_MASK, 0b1111 << 7);
    }

    #[test]
    fn wakeup_timer_layout() {
        assert_eq!(timer_ctrl0(10), 0x4000_8240);
        assert_eq!(timer_cmp0(10), 0x4000_8248);
        assert_eq!(timer_cmp0_int(10), 1 << 20);
    }

    #[test]
    fn pwrsw0_hp_override_value() {
        let hp = PWRSW0_COMMON
            | PWRSW0_CAOROVERRIDE.val(1)
            | PWRSW0_CAORDYNSEL.val(3)
            | PWRSW0_CPUOVERRIDE.val(1)
            | PWRSW0_CPUDYNSEL.val(3);
        assert_eq!(hp, 0x2B01_80FF);
    }
}
