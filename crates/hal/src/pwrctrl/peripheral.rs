//! Peripheral power domains.

use super::{regs as r, GpuMode, PowerControl, PowerError};
use crate::cpu::CpuCore;
use crate::regs::RegisterBus;
use embedded_hal::delay::DelayNs;

/// MSPI I/O clock settle after enabling it, in µs.
const MSPI_IOCLK_SETTLE_US: u32 = 10;

/// A power-switchable peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum Periph {
    Ios0,
    IosFd0,
    IosFd1,
    Iom0,
    Iom1,
    Iom2,
    Iom3,
    Iom4,
    Iom5,
    Iom6,
    Iom7,
    Uart0,
    Uart1,
    Uart2,
    Uart3,
    Adc,
    Mspi0,
    Mspi1,
    Mspi2,
    Mspi3,
    Gfx,
    Disp,
    DispPhy,
    Crypto,
    Sdio0,
    Sdio1,
    Usb,
    UsbPhy,
    Dbg,
    Otp,
    AudRec,
    AudPb,
    Pdm0,
    I2s0,
    I2s1,
    AudAdc,
}

/// Where a peripheral's enable and status bits live.
#[derive(Debug, Clone, Copy)]
struct Gate {
    enable_reg: u32,
    enable: u32,
    status_reg: u32,
    status: u32,
    /// Enable bits sharing this peripheral's power domain; 0 if unshared.
    domain: u32,
}

impl Gate {
    const fn dev(enable: u32) -> Self {
        Self {
            enable_reg: r::DEVPWREN,
            enable,
            status_reg: r::DEVPWRSTATUS,
            status: enable,
            domain: 0,
        }
    }

    const fn dev_shared(enable: u32, domain: u32) -> Self {
        Self {
            enable_reg: r::DEVPWREN,
            enable,
            status_reg: r::DEVPWRSTATUS,
            status: domain,
            domain,
        }
    }

    const fn aud(enable: u32) -> Self {
        Self {
            enable_reg: r::AUDSSPWREN,
            enable,
            status_reg: r::AUDSSPWRSTATUS,
            status: r::AUD_MASK,
            domain: r::AUD_MASK,
        }
    }
}

impl Periph {
    /// Every peripheral, in PWRCTRL table order.
    pub const ALL: [Periph; 36] = [
        Self::Ios0,
        Self::IosFd0,
        Self::IosFd1,
        Self::Iom0,
        Self::Iom1,
        Self::Iom2,
        Self::Iom3,
        Self::Iom4,
        Self::Iom5,
        Self::Iom6,
        Self::Iom7,
        Self::Uart0,
        Self::Uart1,
        Self::Uart2,
        Self::Uart3,
        Self::Adc,
        Self::Mspi0,
        Self::Mspi1,
        Self::Mspi2,
        Self::Mspi3,
        Self::Gfx,
        Self::Disp,
        Self::DispPhy,
        Self::Crypto,
        Self::Sdio0,
        Self::Sdio1,
        Self::Usb,
        Self::UsbPhy,
        Self::Dbg,
        Self::Otp,
        Self::AudRec,
        Self::AudPb,
        Self::Pdm0,
        Self::I2s0,
        Self::I2s1,
        Self::AudAdc,
    ];

    fn gate(self) -> Gate {
        let iom = |n: u32| r::DEV_IOM0 << n;
        let uart = |n: u32| r::DEV_UART0 << n;
        let mspi = |n: u32| r::DEV_MSPI0 << n;
        match self {
            Self::Ios0 => Gate::dev(r::DEV_IOS0),
            Self::IosFd0 => Gate::dev(r::DEV_IOSFD0),
            Self::IosFd1 => Gate::dev(r::DEV_IOSFD1),
            Self::Iom0 => Gate::dev_shared(iom(0), r::HCPB_MASK),
            Self::Iom1 => Gate::dev_shared(iom(1), r::HCPB_MASK),
            Self::Iom2 => Gate::dev_shared(iom(2), r::HCPB_MASK),
            Self::Iom3 => Gate::dev_shared(iom(3), r::HCPB_MASK),
            Self::Iom4 => Gate::dev_shared(iom(4), r::HCPC_MASK),
            Self::Iom5 => Gate::dev_shared(iom(5), r::HCPC_MASK),
            Self::Iom6 => Gate::dev_shared(iom(6), r::HCPC_MASK),
            Self::Iom7 => Gate::dev_shared(iom(7), r::HCPC_MASK),
            Self::Uart0 => Gate::dev_shared(uart(0), r::HCPA_MASK),
            Self::Uart1 => Gate::dev_shared(uart(1), r::HCPA_MASK),
            Self::Uart2 => Gate::dev_shared(uart(2), r::HCPA_MASK),
            Self::Uart3 => Gate::dev_shared(uart(3), r::HCPA_MASK),
            Self::Adc => Gate::dev(r::DEV_ADC),
            Self::Mspi0 => Gate::dev_shared(mspi(0), r::MSPI_MASK),
            Self::Mspi1 => Gate::dev_shared(mspi(1), r::MSPI_MASK),
            Self::Mspi2 => Gate::dev_shared(mspi(2), r::MSPI_MASK),
            Self::Mspi3 => Gate::dev_shared(mspi(3), r::MSPI_MASK),
            Self::Gfx => Gate::dev(r::DEV_GFX),
            Self::Disp => Gate::dev(r::DEV_DISP),
            Self::DispPhy => Gate::dev(r::DEV_DISPPHY),
            Self::Crypto => Gate::dev(r::DEV_CRYPTO),
            Self::Sdio0 => Gate::dev(r::DEV_SDIO0),
            Self::Sdio1 => Gate::dev(r::DEV_SDIO1),
            Self::Usb => Gate::dev(r::DEV_USB),
            Self::UsbPhy => Gate::dev(r::DEV_USBPHY),
            Self::Dbg => Gate::dev(r::DEV_DBG),
            Self::Otp => Gate {
                status_reg: r::MEMPWRSTATUS,
                status: r::MEMSTAT_OTP,
                ..Gate::dev(r::DEV_OTP)
            },
            Self::AudRec => Gate::aud(r::AUD_AUDREC),
            Self::AudPb => Gate::aud(r::AUD_AUDPB),
            Self::Pdm0 => Gate::aud(r::AUD_PDM0),
            Self::I2s0 => Gate::aud(r::AUD_I2S0),
            Self::I2s1 => Gate::aud(r::AUD_I2S1),
            Self::AudAdc => Gate {
                status: r::AUD_AUDADC,
                domain: 0,
                ..Gate::aud(r::AUD_AUDADC)
            },
        }
    }

    /// MSPI instance number, for the per-instance I/O clock gate.
    fn mspi_index(self) -> Option<u32> {
        match self {
            Self::Mspi0 => Some(0),
            Self::Mspi1 => Some(1),
            Self::Mspi2 => Some(2),
            Self::Mspi3 => Some(3),
            _ => None,
        }
    }
}

/// Snapshot of the PWRCTRL status registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PowerStatus {
    /// DEVPWRSTATUS.
    pub device: u32,
    /// AUDSSPWRSTATUS.
    pub audio_ss: u32,
    /// MEMPWRSTATUS.
    pub memory: u32,
    /// SYSPWRSTATUS.
    pub system: u32,
    /// SSRAMPWRST.
    pub ssram: u32,
    /// VRSTATUS.
    pub regulators: u32,
    /// ADCSTATUS.
    pub adc: u32,
    /// AUDADCSTATUS.
    pub audadc: u32,
}

impl<B, D, C> PowerControl<B, D, C>
where
    B: RegisterBus,
    D: DelayNs,
    C: CpuCore,
{
    /// Power up `periph` and wait for its domain to report on.
    pub fn periph_enable(&mut self, periph: Periph) -> Result<(), PowerError> {
        let g = periph.gate();
        if self.bus.read(g.enable_reg) & g.enable != 0 {
            return Ok(());
        }
        if periph == Periph::Crypto && !self.crypto_backing_on() {
            return Err(PowerError::Fail);
        }

        if periph == Periph::Gfx {
            self.tempco_gfx_hold();
            if self.gpu_mode_prev == GpuMode::HighPerformance {
                if let Err(e) = self.gpu_mode_select(GpuMode::HighPerformance) {
                    critical_section::with(|_| self.tempco_gfx_release());
                    return Err(e);
                }
            }
            critical_section::with(|_| {
                self.bus.set_bits(g.enable_reg, g.enable);
                self.tempco_gfx_release();
            });
        } else {
            critical_section::with(|_| self.bus.set_bits(g.enable_reg, g.enable));
        }

        let max = self.config.max_wait_us;
        self.poll(g.status_reg, g.status, 0, false, max)?;

        match periph {
            Periph::Crypto => {
                let wait = self.config.crypto_wait_us;
                self.poll(r::CRYPTO_NVMISIDLE, 1, 1, true, wait)?;
            }
            Periph::Otp => self.delay.delay_us(self.config.otp_settle_us),
            _ => {}
        }
        if let Some(n) = periph.mspi_index() {
            self.bus.set_bits(r::CLKGEN_MSPIIOCLKCTRL, 1 << n);
            self.delay.delay_us(MSPI_IOCLK_SETTLE_US);
        }

        #[cfg(feature = "defmt")]
        defmt::debug!("pwrctrl: {} on", periph);
        Ok(())
    }

    /// Power down `periph`.
    ///
    /// Peripherals in a shared domain (IOM, UART, MSPI, audio) leave the
    /// domain status set while a sibling stays enabled; that is reported as
    /// success.
    pub fn periph_disable(&mut self, periph: Periph) -> Result<(), PowerError> {
        let g = periph.gate();
        if self.bus.read(g.enable_reg) & g.enable == 0 {
            return Ok(());
        }

        if periph == Periph::Crypto
            && self.bus.read(r::CRYPTO_PERIPHERALID0) == r::CRYPTO_PERIPHERAL_ID
        {
            let wait = self.config.crypto_wait_us;
            self.poll(r::CRYPTO_HOSTCCISIDLE, 1, 1, true, wait)?;
            self.poll(r::CRYPTO_NVMISIDLE, 1, 1, true, wait)?;
            self.bus.write(r::CRYPTO_HOSTPOWERDOWN, 1);
        }

        if periph == Periph::Gfx {
            self.tempco_gfx_hold();
            critical_section::with(|_| self.bus.clear_bits(g.enable_reg, g.enable));
            critical_section::with(|_| self.tempco_gfx_release());
        } else {
            critical_section::with(|_| self.bus.clear_bits(g.enable_reg, g.enable));
        }

        let max = self.config.max_wait_us;
        if self.poll(g.status_reg, g.status, 0, true, max).is_err() {
            let en = self.bus.read(g.enable_reg);
            return if en & g.domain != 0 && en & g.enable == 0 {
                Ok(())
            } else {
                #[cfg(feature = "defmt")]
                defmt::warn!("pwrctrl: {} did not power down", periph);
                Err(PowerError::Timeout)
            };
        }

        if periph == Periph::Gfx {
            if self.gpu_mode == GpuMode::HighPerformance {
                self.gpu_mode_select(GpuMode::LowPower)?;
                self.gpu_mode_prev = GpuMode::HighPerformance;
            } else {
                self.gpu_mode_prev = GpuMode::LowPower;
            }
        }
        if let Some(n) = periph.mspi_index() {
            self.bus.clear_bits(r::CLKGEN_MSPIIOCLKCTRL, 1 << n);
        }

        #[cfg(feature = "defmt")]
        defmt::debug!("pwrctrl: {} off", periph);
        Ok(())
    }

    /// Whether `periph`'s power domain reports on.
    pub fn periph_enabled(&mut self, periph: Periph) -> bool {
        let g = periph.gate();
        self.bus.read(g.status_reg) & g.status != 0
    }

    /// Read every PWRCTRL status register.
    pub fn status_get(&mut self) -> PowerStatus {
        PowerStatus {
            device: self.bus.read(r::DEVPWRSTATUS),
            audio_ss: self.bus.read(r::AUDSSPWRSTATUS),
            memory: self.bus.read(r::MEMPWRSTATUS),
            system: self.bus.read(r::SYSPWRSTATUS),
            ssram: self.bus.read(r::SSRAMPWRST),
            regulators: self.bus.read(r::VRSTATUS),
            adc: self.bus.read(r::ADCSTATUS),
            audadc: self.bus.read(r::AUDADCSTATUS),
        }
    }

    /// CRYPTO reads INFOC at power-up; its backing memory must be on.
    fn crypto_backing_on(&mut self) -> bool {
        let otp = self.bus.read(r::SHADOWVALID) & r::SHADOWVALID_INFOCSELOTP != 0;
        let mem = self.bus.read(r::MEMPWRSTATUS);
        if otp {
            mem & r::MEMSTAT_OTP != 0
        } else {
            mem & r::MEMSTAT_NVM0 != 0
        }
    }
}
