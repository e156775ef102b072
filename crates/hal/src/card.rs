//! eMMC card protocol over a [`CardHost`].
//!
//! [`Card`] walks a device through identification (CMD0 → CMD1 → CMD2 →
//! CMD3 → CMD9 → CMD7 → CMD8), keeps the raw CID/CSD/EXT_CSD and the decoded
//! [`ExtCsdInfo`], and issues block reads, writes and erases in the transfer
//! state. Bus reconfiguration (`cfg_set`) switches the card side through
//! CMD6 before touching the host side.

use embedded_hal::delay::DelayNs;

use crate::bits::{unstuff_bits, unstuff_bytes};
use crate::config::CardConfig;
use crate::sdhc::{
    BusVoltage, BusWidth, CardHost, Command, CommandData, DataBuf, DataDirection, HostError,
    ResponseType, UhsMode, XferMode,
};

/// Size of the EXT_CSD register.
pub const EXT_CSD_LEN: usize = 512;

const RCA: u16 = 1;
/// CMD1 argument: sector addressing, 1.70-1.95 V.
const OCR_SECTOR_MODE: u32 = 0x4 << 28;
const OCR_READY: u32 = 1 << 31;
const HIGH_CAPACITY_C_SIZE: u32 = 0xFFF;
const MAX_BLOCKS_PER_CMD: u32 = 0xFFFF;

const STATUS_SWITCH_ERROR: u32 = 1 << 7;
const STATUS_READY_FOR_DATA: u32 = 1 << 8;

const SWITCH_WRITE_BYTE: u32 = 3;

const LEGACY_MAX_HZ: u32 = 26_000_000;
const HS_SDR_MAX_HZ: u32 = 48_000_000;
const HS200_MAX_HZ: u32 = 96_000_000;

const SEC_ER_EN: u32 = 1 << 0;
const SEC_GB_CL_EN: u32 = 1 << 4;
const DEVICE_TYPE_DDR_1V8: u32 = 0x4;
const HS_TIMING_HS: u32 = 1;
const HS_TIMING_HS200: u32 = 2;
const EXT_CSD_REV_V4_5: u32 = 6;
const SPEC_VERS_4: u32 = 4;

// ─── Errors and states ──────────────────────────────────────────────────────

/// Card-layer failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror_no_std::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CardError {
    /// The host reported a failure.
    #[error("host error: {0}")]
    Host(#[from] HostError),
    /// No card in the slot.
    #[error("card not present")]
    NotPresent,
    /// The card is not in the state the operation needs.
    #[error("card in wrong state")]
    InvalidState,
    /// Malformed request.
    #[error("invalid argument")]
    InvalidArg,
    /// Block range outside the device.
    #[error("block range out of range")]
    OutOfRange,
    /// The device does not support the operation.
    #[error("operation not supported by the device")]
    InvalidOperation,
    /// The card did not finish in time.
    #[error("card timeout")]
    Timeout,
    /// The card rejected the operation.
    #[error("card operation failed")]
    Fail,
}

/// Card state, as reported in CURRENT_STATE plus the driver-only states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CardState {
    /// Not found yet.
    NotPresent,
    /// Found, identification not run.
    PwrOff,
    /// After CMD0.
    Idle,
    /// OCR accepted.
    Ready,
    /// CID sent.
    Ident,
    /// Addressed, not selected.
    Stby,
    /// Selected; data commands accepted.
    Trans,
    /// Sending data.
    Data,
    /// Receiving data.
    Rcv,
    /// Programming.
    Prg,
    /// Disconnected while programming.
    Dis,
    /// Bus test.
    Btst,
    /// Sleeping after CMD5.
    Slp,
    /// Unrecognised CURRENT_STATE.
    Error,
}

impl CardState {
    /// Decode CURRENT_STATE from an R1 status word.
    pub const fn from_status(status: u32) -> Self {
        match status.wrapping_shr(9) & 0xF {
            0 => Self::Idle,
            1 => Self::Ready,
            2 => Self::Ident,
            3 => Self::Stby,
            4 => Self::Trans,
            5 => Self::Data,
            6 => Self::Rcv,
            7 => Self::Prg,
            8 => Self::Dis,
            9 => Self::Btst,
            10 => Self::Slp,
            _ => Self::Error,
        }
    }
}

/// CMD38 erase variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EraseType {
    /// Erase whole erase groups.
    Erase,
    /// Erase write blocks.
    Trim,
    /// Release write blocks; contents undefined.
    Discard,
    /// Erase groups, purging all copies.
    SecureErase,
    /// Mark write blocks for secure trim.
    SecureTrim1,
    /// Purge blocks marked by `SecureTrim1`.
    SecureTrim2,
}

impl EraseType {
    /// CMD38 argument.
    pub const fn arg(self) -> u32 {
        match self {
            Self::Erase => 0,
            Self::Trim => 1,
            Self::Discard => 3,
            Self::SecureErase => 0x8000_0000,
            Self::SecureTrim1 => 0x8000_0001,
            Self::SecureTrim2 => 0x8000_8000,
        }
    }

    /// Needs SEC_ER_EN.
    pub const fn is_secure(self) -> bool {
        matches!(
            self,
            Self::SecureErase | Self::SecureTrim1 | Self::SecureTrim2
        )
    }

    /// Needs SEC_GB_CL_EN.
    pub const fn is_trim(self) -> bool {
        matches!(
            self,
            Self::Trim | Self::Discard | Self::SecureTrim1 | Self::SecureTrim2
        )
    }
}

/// EXT_CSD[34] POWER_OFF_NOTIFICATION values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerNotification {
    /// Host will not notify.
    None = 0,
    /// Powered on; host will notify before power-off.
    On = 1,
    /// Short power-off.
    OffShort = 2,
    /// Long power-off.
    OffLong = 3,
    /// Preparing to sleep.
    Sleep = 4,
}

/// Named EXT_CSD fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum ExtCsdField {
    CacheCtrl,
    PowerOffNotification,
    DataSectorSize,
    EraseGroupDef,
    ErasedMemCont,
    BusWidth,
    HsTiming,
    ExtCsdRev,
    DeviceType,
    SectorCount,
    SleepNotificationTime,
    HcEraseGrpSize,
    SecFeatureSupport,
    PowerOffLongTime,
    GenericCmd6Time,
    CacheSize,
}

impl ExtCsdField {
    /// Byte offset and width.
    pub const fn location(self) -> (usize, usize) {
        match self {
            Self::CacheCtrl => (33, 1),
            Self::PowerOffNotification => (34, 1),
            Self::DataSectorSize => (61, 1),
            Self::EraseGroupDef => (175, 1),
            Self::ErasedMemCont => (181, 1),
            Self::BusWidth => (183, 1),
            Self::HsTiming => (185, 1),
            Self::ExtCsdRev => (192, 1),
            Self::DeviceType => (196, 1),
            Self::SectorCount => (212, 4),
            Self::SleepNotificationTime => (216, 1),
            Self::HcEraseGrpSize => (224, 1),
            Self::SecFeatureSupport => (231, 1),
            Self::PowerOffLongTime => (247, 1),
            Self::GenericCmd6Time => (248, 1),
            Self::CacheSize => (249, 4),
        }
    }

    /// Offset written by CMD6.
    #[allow(clippy::cast_possible_truncation)] // offsets are < 256
    const fn index(self) -> u32 {
        self.location().0 as u32
    }
}

/// Decoded CSD and EXT_CSD properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ExtCsdInfo {
    /// Bytes per block.
    pub blksize: u32,
    /// Block-addressed device (C_SIZE = 0xFFF).
    pub high_capacity: bool,
    /// CSD CCC.
    pub cmd_class: u32,
    /// CSD SPEC_VERS.
    pub spec_ver: u32,
    /// EXT_CSD_REV.
    pub ext_rev: u32,
    /// DEVICE_TYPE.
    pub device_type: u32,
    /// SEC_COUNT.
    pub max_blocks: u32,
    /// CACHE_SIZE in KiB.
    pub cache_size: u32,
    /// SEC_FEATURE_SUPPORT.
    pub sec_feature: u32,
    /// Sleep notification timeout, ms.
    pub sleep_notify_timeout_ms: u32,
    /// Long power-off notification timeout, ms.
    pub power_off_long_timeout_ms: u32,
    /// CMD6 completion timeout, ms.
    pub generic_cmd6_timeout_ms: u32,
}

impl ExtCsdInfo {
    /// Decode from the raw CSD and EXT_CSD.
    pub fn decode(csd: &[u32; 4], ext: &[u8], config: &CardConfig) -> Self {
        let byte = |i: usize| unstuff_bytes(ext, i, 1);
        let ext_rev = byte(192);
        let mut info = Self {
            blksize: if byte(61) != 0 { 4096 } else { 512 },
            high_capacity: unstuff_bits(csd, 62, 12) == HIGH_CAPACITY_C_SIZE,
            cmd_class: unstuff_bits(csd, 84, 12),
            spec_ver: unstuff_bits(csd, 122, 4),
            ext_rev,
            device_type: byte(196),
            max_blocks: unstuff_bytes(ext, 212, 4),
            cache_size: unstuff_bytes(ext, 249, 4),
            sec_feature: byte(231),
            sleep_notify_timeout_ms: config.generic_cmd6_timeout_ms,
            power_off_long_timeout_ms: config.generic_cmd6_timeout_ms,
            generic_cmd6_timeout_ms: config.generic_cmd6_timeout_ms,
        };
        if ext_rev >= EXT_CSD_REV_V4_5 {
            // Byte fields count in units of 10 ms.
            info.sleep_notify_timeout_ms = byte(216).saturating_mul(10);
            info.power_off_long_timeout_ms = byte(247).saturating_mul(10);
            info.generic_cmd6_timeout_ms = byte(248).saturating_mul(10);
        }
        info
    }
}

/// Identification fields from the CID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CidInfo {
    /// MID.
    pub manufacturer: u8,
    /// OID.
    pub oem: u8,
    /// PNM, lowest CID byte first.
    pub name: [u8; 6],
    /// PRV.
    pub revision: u8,
}

impl CidInfo {
    /// Extract from a raw CID.
    #[allow(clippy::cast_possible_truncation)] // 8-bit fields
    pub fn decode(cid: &[u32; 4]) -> Self {
        let mut name = [0u8; 6];
        for (start, b) in (56u32..).step_by(8).zip(name.iter_mut()) {
            *b = unstuff_bits(cid, start, 8) as u8;
        }
        Self {
            manufacturer: unstuff_bits(cid, 120, 8) as u8,
            oem: unstuff_bits(cid, 104, 8) as u8,
            name,
            revision: unstuff_bits(cid, 48, 8) as u8,
        }
    }
}

// ─── Card ───────────────────────────────────────────────────────────────────

/// An eMMC device behind a host.
pub struct Card<H, D> {
    host: H,
    delay: D,
    config: CardConfig,
    state: CardState,
    rca: u16,
    cid: [u32; 4],
    csd: [u32; 4],
    ext_csd: [u8; EXT_CSD_LEN],
    info: ExtCsdInfo,
    bus_width: BusWidth,
    uhs: UhsMode,
    voltage: BusVoltage,
    clock: u32,
    cache_on: bool,
    notification: PowerNotification,
}

impl<H: CardHost, D: DelayNs> Card<H, D> {
    /// Card on `host`; nothing is sent until [`Card::find_card`].
    pub fn new(host: H, delay: D, config: CardConfig) -> Self {
        let info = *host.info();
        Self {
            host,
            delay,
            config,
            state: CardState::NotPresent,
            rca: 0,
            cid: [0; 4],
            csd: [0; 4],
            ext_csd: [0; EXT_CSD_LEN],
            info: ExtCsdInfo::default(),
            bus_width: info.default_bus_width,
            uhs: info.default_uhs,
            voltage: info.default_voltage,
            clock: info.default_clock,
            cache_on: false,
            notification: PowerNotification::None,
        }
    }

    /// The host.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// The host, mutably (delay taps, transfer mode).
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Give back the host and delay.
    pub fn release(self) -> (H, D) {
        (self.host, self.delay)
    }

    /// Last known state, without asking the card.
    pub fn cached_state(&self) -> CardState {
        self.state
    }

    /// Relative card address.
    pub fn rca(&self) -> u16 {
        self.rca
    }

    /// Raw CID, least significant word first.
    pub fn cid(&self) -> &[u32; 4] {
        &self.cid
    }

    /// Raw CSD, least significant word first.
    pub fn csd(&self) -> &[u32; 4] {
        &self.csd
    }

    /// Raw EXT_CSD as last read.
    pub fn ext_csd(&self) -> &[u8; EXT_CSD_LEN] {
        &self.ext_csd
    }

    /// Decoded properties.
    pub fn info(&self) -> &ExtCsdInfo {
        &self.info
    }

    /// Current bus width.
    pub fn bus_width(&self) -> BusWidth {
        self.bus_width
    }

    /// Current speed mode.
    pub fn uhs(&self) -> UhsMode {
        self.uhs
    }

    /// Current card clock, Hz.
    pub fn clock(&self) -> u32 {
        self.clock
    }

    /// Write cache enabled.
    pub fn cache_enabled(&self) -> bool {
        self.cache_on
    }

    /// Last power notification sent.
    pub fn notification(&self) -> PowerNotification {
        self.notification
    }

    /// Identification fields.
    pub fn cid_info(&self) -> CidInfo {
        CidInfo::decode(&self.cid)
    }

    /// Value of `field` from the cached EXT_CSD.
    pub fn ext_csd_field(&self, field: ExtCsdField) -> u32 {
        let (offset, size) = field.location();
        unstuff_bytes(&self.ext_csd, offset, size)
    }

    /// Select PIO or ADMA2 for data commands.
    pub fn set_xfer_mode(&mut self, mode: XferMode) {
        self.host.set_xfer_mode(mode);
    }

    fn require(&self, state: CardState) -> Result<(), CardError> {
        if self.state == state {
            Ok(())
        } else {
            Err(CardError::InvalidState)
        }
    }

    async fn send(&mut self, index: u8, arg: u32, rsp: ResponseType) -> Result<Command, CardError> {
        let mut cmd = Command::new(index, arg, rsp);
        self.host.execute_cmd(&mut cmd, None).await?;
        Ok(cmd)
    }

    fn rca_arg(&self) -> u32 {
        u32::from(self.rca).wrapping_shl(16)
    }

    // ─── Identification ─────────────────────────────────────────────────────

    /// Bring the host up and look for a card; restores host defaults.
    pub async fn find_card(&mut self) -> Result<(), CardError> {
        self.host.init().await?;
        if !self.host.get_cd() {
            self.state = CardState::NotPresent;
            return Err(CardError::NotPresent);
        }
        let info = *self.host.info();
        self.bus_width = info.default_bus_width;
        self.uhs = info.default_uhs;
        self.voltage = info.default_voltage;
        self.clock = info.default_clock;
        self.state = CardState::PwrOff;
        #[cfg(feature = "defmt")]
        defmt::debug!("card: found");
        Ok(())
    }

    /// Power the slot down.
    pub async fn deinit(&mut self) -> Result<(), CardError> {
        self.host.deinit().await?;
        self.state = CardState::PwrOff;
        Ok(())
    }

    /// Identify the card and leave it selected in the transfer state.
    pub async fn init(&mut self) -> Result<(), CardError> {
        if self.state == CardState::NotPresent {
            return Err(CardError::NotPresent);
        }

        self.send(0, 0, ResponseType::None).await?;
        self.state = CardState::Idle;

        self.send_op_cond().await?;
        self.state = CardState::Ready;

        let cmd = self.send(2, 0, ResponseType::R2).await?;
        self.cid = cmd.response;
        self.state = CardState::Ident;

        self.send(3, u32::from(RCA).wrapping_shl(16), ResponseType::R1)
            .await?;
        self.rca = RCA;
        self.state = CardState::Stby;

        let cmd = self.send(9, self.rca_arg(), ResponseType::R2).await?;
        self.csd = cmd.response;

        self.select().await?;
        self.read_ext_csd().await?;

        if self.info.cache_size > 0 {
            self.cache_ctrl(true).await?;
        }
        if self.info.ext_rev >= EXT_CSD_REV_V4_5 {
            self.power_notification(PowerNotification::On).await?;
        }
        #[cfg(feature = "defmt")]
        defmt::info!(
            "card: {=u32} blocks of {=u32}, rev {=u32}",
            self.info.max_blocks,
            self.info.blksize,
            self.info.ext_rev
        );
        Ok(())
    }

    async fn send_op_cond(&mut self) -> Result<(), CardError> {
        let mut arg = OCR_SECTOR_MODE;
        for _ in 0..self.config.op_cond_retries {
            let cmd = self.send(1, arg, ResponseType::R3).await?;
            let ocr = cmd.r1();
            if ocr & OCR_READY != 0 {
                return Ok(());
            }
            arg |= ocr;
            self.delay.delay_ms(self.config.op_cond_retry_delay_ms);
        }
        Err(CardError::Timeout)
    }

    /// Read EXT_CSD (CMD8) and refresh [`ExtCsdInfo`].
    pub async fn read_ext_csd(&mut self) -> Result<(), CardError> {
        self.require(CardState::Trans)?;
        let mut ext = [0u8; EXT_CSD_LEN];
        #[allow(clippy::cast_possible_truncation)] // 512
        let mut data = CommandData::read(&mut ext, EXT_CSD_LEN as u32, 1);
        let mut cmd = Command::new(8, 0, ResponseType::R1);
        self.host.execute_cmd(&mut cmd, Some(&mut data)).await?;
        self.ext_csd = ext;
        self.info = ExtCsdInfo::decode(&self.csd, &self.ext_csd, &self.config);
        Ok(())
    }

    // ─── State ──────────────────────────────────────────────────────────────

    /// CMD13; returns the R1 status word and updates the cached state.
    pub async fn status(&mut self) -> Result<u32, CardError> {
        let cmd = self.send(13, self.rca_arg(), ResponseType::R1).await?;
        let status = cmd.r1();
        self.state = CardState::from_status(status);
        Ok(status)
    }

    /// Current state as reported by the card.
    pub async fn state(&mut self) -> Result<CardState, CardError> {
        self.status().await?;
        Ok(self.state)
    }

    /// CMD7 with our RCA.
    pub async fn select(&mut self) -> Result<(), CardError> {
        self.send(7, self.rca_arg(), ResponseType::R1).await?;
        self.state = CardState::Trans;
        Ok(())
    }

    /// CMD7 with RCA 0; the card does not respond.
    pub async fn deselect(&mut self) -> Result<(), CardError> {
        self.send(7, 0, ResponseType::None).await?;
        self.state = CardState::Stby;
        Ok(())
    }

    /// Deselect and send CMD5 sleep.
    pub async fn sleep(&mut self) -> Result<(), CardError> {
        if self.state == CardState::Trans {
            self.deselect().await?;
        }
        self.require(CardState::Stby)?;
        self.sleep_awake(true).await?;
        self.state = CardState::Slp;
        Ok(())
    }

    /// CMD5 awake and reselect.
    pub async fn wakeup(&mut self) -> Result<(), CardError> {
        self.require(CardState::Slp)?;
        self.sleep_awake(false).await?;
        self.state = CardState::Stby;
        self.select().await
    }

    async fn sleep_awake(&mut self, sleep: bool) -> Result<(), CardError> {
        let arg = self.rca_arg() | u32::from(sleep).wrapping_shl(15);
        self.send(5, arg, ResponseType::R1b).await?;
        self.host
            .card_busy(self.config.sleep_awake_timeout_ms)
            .await?;
        Ok(())
    }

    // ─── CMD6 ───────────────────────────────────────────────────────────────

    /// Write one EXT_CSD byte and wait for the card to finish.
    pub async fn switch(&mut self, field: ExtCsdField, value: u8, timeout_ms: u32) -> Result<(), CardError> {
        self.require(CardState::Trans)?;
        let arg = SWITCH_WRITE_BYTE.wrapping_shl(24)
            | field.index().wrapping_shl(16)
            | u32::from(value).wrapping_shl(8);
        self.send(6, arg, ResponseType::R1b).await?;
        self.host
            .card_busy(self.config.switch_busy_timeout_ms)
            .await?;

        for _ in 0..timeout_ms {
            let status = self.status().await?;
            if status & STATUS_SWITCH_ERROR != 0 {
                #[cfg(feature = "defmt")]
                defmt::warn!("card: switch {} rejected", field);
                return Err(CardError::Fail);
            }
            if status & STATUS_READY_FOR_DATA != 0 && self.state == CardState::Trans {
                return Ok(());
            }
            self.delay.delay_ms(1);
        }
        Err(CardError::Timeout)
    }

    /// Turn the volatile write cache on or off.
    pub async fn cache_ctrl(&mut self, enable: bool) -> Result<(), CardError> {
        if self.info.cache_size == 0 {
            return Err(CardError::InvalidOperation);
        }
        let timeout = self.info.generic_cmd6_timeout_ms;
        self.switch(ExtCsdField::CacheCtrl, u8::from(enable), timeout)
            .await?;
        self.cache_on = enable;
        Ok(())
    }

    /// Send a POWER_OFF_NOTIFICATION value (EXT_CSD rev 6 and later).
    pub async fn power_notification(&mut self, kind: PowerNotification) -> Result<(), CardError> {
        if self.info.ext_rev < EXT_CSD_REV_V4_5 {
            return Err(CardError::InvalidOperation);
        }
        let timeout = match kind {
            PowerNotification::OffLong => self.info.power_off_long_timeout_ms,
            PowerNotification::Sleep => self.info.sleep_notify_timeout_ms,
            _ => self.info.generic_cmd6_timeout_ms,
        };
        self.switch(ExtCsdField::PowerOffNotification, kind as u8, timeout)
            .await?;
        self.notification = kind;
        Ok(())
    }

    // ─── Bus configuration ──────────────────────────────────────────────────

    /// Reconfigure voltage, width, clock and speed mode.
    pub async fn cfg_set(
        &mut self,
        width: BusWidth,
        clock: u32,
        voltage: BusVoltage,
        uhs: UhsMode,
    ) -> Result<(), CardError> {
        self.require(CardState::Trans)?;
        self.check_clock(clock, uhs)?;
        if uhs.is_ddr() && self.info.device_type & DEVICE_TYPE_DDR_1V8 == 0 {
            return Err(CardError::InvalidOperation);
        }

        self.host.set_bus_voltage(voltage)?;
        self.voltage = voltage;

        if uhs == UhsMode::Sdr104 {
            self.set_width(width, uhs).await?;
            self.set_speed(clock, uhs).await?;
        } else {
            self.set_speed(clock, uhs).await?;
            self.set_width(width, uhs).await?;
        }

        self.host.set_uhs_mode(uhs)?;
        self.uhs = uhs;
        #[cfg(feature = "defmt")]
        defmt::info!(
            "card: {=u32}-bit {=u32} Hz {}",
            width.lines(),
            clock,
            uhs.as_str()
        );
        Ok(())
    }

    fn check_clock(&self, clock: u32, uhs: UhsMode) -> Result<(), CardError> {
        let info = self.host.info();
        let bad = clock > info.clock_max
            || clock < info.clock_min
            || (uhs.is_ddr() && clock > HS_SDR_MAX_HZ)
            || (uhs == UhsMode::None && clock > HS200_MAX_HZ)
            || (clock > LEGACY_MAX_HZ && self.info.spec_ver < SPEC_VERS_4);
        if bad {
            Err(CardError::InvalidArg)
        } else {
            Ok(())
        }
    }

    async fn set_speed(&mut self, clock: u32, uhs: UhsMode) -> Result<(), CardError> {
        let timing = if uhs == UhsMode::Sdr104 && clock > HS_SDR_MAX_HZ && clock <= HS200_MAX_HZ {
            HS_TIMING_HS200
        } else {
            HS_TIMING_HS
        };
        if self.info.spec_ver >= SPEC_VERS_4
            && clock >= LEGACY_MAX_HZ
            && self.ext_csd_field(ExtCsdField::HsTiming) != timing
        {
            #[allow(clippy::cast_possible_truncation)] // 1 or 2
            let value = timing as u8;
            let timeout = self.info.generic_cmd6_timeout_ms;
            self.switch(ExtCsdField::HsTiming, value, timeout).await?;
            self.read_ext_csd().await?;
            if self.ext_csd_field(ExtCsdField::HsTiming) != timing {
                return Err(CardError::Fail);
            }
        }
        self.clock = self.host.set_bus_clock(clock)?;
        Ok(())
    }

    async fn set_width(&mut self, width: BusWidth, uhs: UhsMode) -> Result<(), CardError> {
        let value = match (width, uhs.is_ddr()) {
            (BusWidth::One, false) => 0,
            (BusWidth::Four, false) => 1,
            (BusWidth::Eight, false) => 2,
            (BusWidth::Four, true) => 5,
            (BusWidth::Eight, true) => 6,
            (BusWidth::One, true) => return Err(CardError::InvalidArg),
        };
        if width != self.bus_width || uhs != self.uhs {
            let timeout = self.info.generic_cmd6_timeout_ms;
            self.switch(ExtCsdField::BusWidth, value, timeout).await?;
            self.host.set_bus_width(width)?;
            self.bus_width = width;
        }
        Ok(())
    }

    // ─── Data ───────────────────────────────────────────────────────────────

    /// Check `[blk, blk + cnt)` against the device and clamp `cnt` to what
    /// one command can carry.
    fn check_range(&self, blk: u32, cnt: u32) -> Result<u32, CardError> {
        let max = self.info.max_blocks;
        let end = blk.checked_add(cnt).ok_or(CardError::OutOfRange)?;
        if cnt == 0 {
            return Err(CardError::InvalidArg);
        }
        if blk >= max || cnt > MAX_BLOCKS_PER_CMD || end > max {
            return Err(CardError::OutOfRange);
        }
        if self.host.xfer_mode() == XferMode::Adma {
            return Ok(cnt.min(self.host.info().max_adma2_blocks));
        }
        Ok(cnt)
    }

    fn block_arg(&self, blk: u32) -> Result<u32, CardError> {
        if self.info.high_capacity {
            Ok(blk)
        } else {
            blk.checked_mul(self.info.blksize)
                .ok_or(CardError::OutOfRange)
        }
    }

    async fn block_rw(&mut self, blk: u32, cnt: u32, buf: DataBuf<'_>) -> Result<u32, CardError> {
        self.require(CardState::Trans)?;
        let cnt = self.check_range(blk, cnt)?;
        let len = usize::try_from(cnt.saturating_mul(self.info.blksize))
            .map_err(|_| CardError::InvalidArg)?;
        if buf.len() < len {
            return Err(CardError::InvalidArg);
        }
        let read = buf.direction() == DataDirection::Read;
        let index = match (read, cnt > 1) {
            (true, false) => 17,
            (true, true) => 18,
            (false, false) => 24,
            (false, true) => 25,
        };
        let mut data = CommandData {
            buf,
            block_size: self.info.blksize,
            block_count: cnt,
            auto_cmd23: cnt > 1,
        };
        let mut cmd = Command::new(index, self.block_arg(blk)?, ResponseType::R1);
        let moved = self.host.execute_cmd(&mut cmd, Some(&mut data)).await?;
        Ok(moved)
    }

    /// Read `cnt` blocks from `blk`; returns the number read.
    pub async fn block_read(&mut self, blk: u32, cnt: u32, buf: &mut [u8]) -> Result<u32, CardError> {
        self.block_rw(blk, cnt, DataBuf::Read(buf)).await
    }

    /// Write `cnt` blocks at `blk`; returns the number written.
    pub async fn block_write(&mut self, blk: u32, cnt: u32, buf: &[u8]) -> Result<u32, CardError> {
        self.block_rw(blk, cnt, DataBuf::Write(buf)).await
    }

    /// Blocks in a scatter list. Every segment must hold whole blocks and
    /// the list must fit one ADMA2 descriptor chain.
    fn vectored_blocks(&self, lens: impl Iterator<Item = usize>) -> Result<u32, CardError> {
        if self.host.xfer_mode() != XferMode::Adma {
            return Err(CardError::InvalidOperation);
        }
        let blksize = usize::try_from(self.info.blksize).map_err(|_| CardError::InvalidArg)?;
        let mut blocks = 0usize;
        for len in lens {
            if len == 0 || len.checked_rem(blksize) != Some(0) {
                return Err(CardError::InvalidArg);
            }
            blocks = blocks.saturating_add(len.checked_div(blksize).unwrap_or(0));
        }
        let blocks = u32::try_from(blocks).map_err(|_| CardError::InvalidArg)?;
        if blocks == 0 || blocks > self.host.info().max_adma2_blocks {
            return Err(CardError::InvalidArg);
        }
        Ok(blocks)
    }

    /// Read consecutive blocks from `blk`, filling each segment of `bufs` in
    /// turn. ADMA only; returns the number of blocks read.
    pub async fn block_read_vectored<'a>(
        &mut self,
        blk: u32,
        bufs: &'a mut [&'a mut [u8]],
    ) -> Result<u32, CardError> {
        let cnt = self.vectored_blocks(bufs.iter().map(|b| b.len()))?;
        self.block_rw(blk, cnt, DataBuf::ReadVectored(bufs)).await
    }

    /// Write consecutive blocks at `blk`, gathered from each segment of
    /// `bufs` in turn. ADMA only; returns the number of blocks written.
    pub async fn block_write_vectored(&mut self, blk: u32, bufs: &[&[u8]]) -> Result<u32, CardError> {
        let cnt = self.vectored_blocks(bufs.iter().map(|b| b.len()))?;
        self.block_rw(blk, cnt, DataBuf::WriteVectored(bufs)).await
    }

    /// CMD35/36/38 over `[blk, blk + cnt)`, then wait up to `timeout_ms`
    /// for the card to finish.
    pub async fn block_erase(
        &mut self,
        blk: u32,
        cnt: u32,
        kind: EraseType,
        timeout_ms: u32,
    ) -> Result<(), CardError> {
        self.require(CardState::Trans)?;
        if cnt == 0 {
            return Err(CardError::InvalidArg);
        }
        let end = blk.checked_add(cnt).ok_or(CardError::OutOfRange)?;
        if blk >= self.info.max_blocks || end > self.info.max_blocks {
            return Err(CardError::OutOfRange);
        }
        if kind.is_secure() && self.info.sec_feature & SEC_ER_EN == 0 {
            return Err(CardError::InvalidOperation);
        }
        if kind.is_trim() && self.info.sec_feature & SEC_GB_CL_EN == 0 {
            return Err(CardError::InvalidOperation);
        }

        let last = end.saturating_sub(1);
        self.send(35, self.block_arg(blk)?, ResponseType::R1).await?;
        self.send(36, self.block_arg(last)?, ResponseType::R1).await?;
        self.send(38, kind.arg(), ResponseType::R1b).await?;
        self.host.card_busy(timeout_ms).await?;
        #[cfg(feature = "defmt")]
        defmt::debug!("card: {} {=u32}+{=u32}", kind, blk, cnt);
        Ok(())
    }
}
