//! SDHCI register host for the Apollo5 SDIO instances.

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::Timer;
use embedded_hal::delay::DelayNs;

use super::regs as sr;
use super::{
    BusVoltage, BusWidth, CardHost, Command, CommandData, DataBuf, DataDirection, HostError,
    HostEvent, HostInfo, ResponseType, UhsMode, XferMode,
};
use crate::regs::{poll_until, RegisterBus};

/// SDIO0 register block.
pub const SDIO0_BASE: u32 = 0x4007_0000;
/// SDIO1 register block.
pub const SDIO1_BASE: u32 = 0x4007_1000;

/// ISR → task channel for one SDHC instance.
pub type HostEvents = Signal<CriticalSectionRawMutex, HostEvent>;

const FALLBACK_BASE_CLOCK_HZ: u32 = 96_000_000;
const IDENT_CLOCK_HZ: u32 = 400_000;
const HIGH_SPEED_THRESHOLD_HZ: u32 = 26_000_000;
const DIVIDER_MAX: u32 = 1023;
const DIVIDER_SPAN: u32 = DIVIDER_MAX * 2;
const ADMA2_DESC_BLOCKS: u32 = sr::ADMA2_DESC_BYTES / 512;
const MAX_BLOCK_SIZE: u32 = 2048;
const MAX_BLOCK_COUNT: u32 = 0xFFFF;

const RESET_POLL_US: u32 = 10_000;
const CLOCK_STABLE_POLL_US: u32 = 20_000;
const INHIBIT_POLL_US: u32 = 10_000;
const CMD_TIMEOUT_MS: u64 = 100;
const DATA_TIMEOUT_MS: u64 = 1_000;

const RESPONSE_REGS: [u32; 4] = [sr::RESPONSE0, 0x14, 0x18, 0x1C];

/// Divider for `target_hz` from `base_hz` in 10-bit divided-clock mode.
///
/// Returns the divider field value and the clock it produces, which never
/// exceeds the target.
pub fn clock_divider(base_hz: u32, target_hz: u32) -> (u32, u32) {
    if target_hz >= base_hz {
        return (0, base_hz);
    }
    let div = if target_hz == 0 {
        DIVIDER_MAX
    } else {
        base_hz.div_ceil(target_hz.saturating_mul(2)).min(DIVIDER_MAX)
    };
    let actual = base_hz.checked_div(div.saturating_mul(2)).unwrap_or(0);
    (div, actual)
}

/// Fill `table` with ADMA2 transfer descriptors covering `len` bytes at
/// `addr`. Returns the number of descriptors used; the last one carries END.
pub fn adma2_build(table: &mut [u64], addr: u32, len: u32) -> Result<usize, HostError> {
    adma2_build_vectored(table, [(addr, len)])
}

/// Chain descriptors over each `(addr, len)` segment in order. Segments
/// longer than one descriptor are split; the last descriptor carries END.
pub fn adma2_build_vectored(
    table: &mut [u64],
    segments: impl IntoIterator<Item = (u32, u32)>,
) -> Result<usize, HostError> {
    let mut slots = table.iter_mut();
    let mut used = 0usize;
    let mut last = None;
    for (addr, len) in segments {
        if len == 0 {
            return Err(HostError::InvalidArg);
        }
        let mut offset = 0u32;
        while offset < len {
            let chunk = len.saturating_sub(offset).min(sr::ADMA2_DESC_BYTES);
            let slot = slots.next().ok_or(HostError::InvalidArg)?;
            *slot = u64::from(addr.wrapping_add(offset)).wrapping_shl(32)
                | u64::from(chunk).wrapping_shl(16)
                | sr::ADMA2_VALID
                | sr::ADMA2_TRAN;
            last = Some(slot);
            used = used.saturating_add(1);
            offset = offset.saturating_add(chunk);
        }
    }
    let last = last.ok_or(HostError::InvalidArg)?;
    *last |= sr::ADMA2_END;
    Ok(used)
}

#[allow(clippy::cast_possible_truncation)] // 32-bit address space on target
fn bus_addr(bytes: &[u8]) -> u32 {
    bytes.as_ptr() as usize as u32
}

/// SDHC interrupt vector body.
///
/// Transfer interrupts mask signalling and wake the task waiting in
/// [`Sdhc`]; the task acknowledges the status and unmasks. Card insert and
/// remove are acknowledged here.
pub fn on_interrupt<B: RegisterBus + ?Sized>(bus: &mut B, base: u32, events: &HostEvents) {
    let status = bus.read(base | sr::INT_STATUS);
    let card = status & (sr::INT_CARD_INSERT | sr::INT_CARD_REMOVE);
    if card != 0 {
        bus.write(base | sr::INT_STATUS, card);
    }
    let transfer = status & !card;
    if transfer != 0 {
        bus.write(base | sr::SIGNAL_ENABLE, 0);
        events.signal(HostEvent::Interrupt { status: transfer });
    } else if card != 0 {
        let present = bus.read(base | sr::PRESENT_STATE) & sr::PS_CARD_PRESENT != 0;
        events.signal(HostEvent::CardChange { present });
    }
}

fn decode_error(status: u32) -> HostError {
    const ORDER: [(u32, HostError); 8] = [
        (sr::INT_CMD_TIMEOUT, HostError::CmdTimeout),
        (sr::INT_CMD_CRC, HostError::CmdCrc),
        (sr::INT_CMD_END_BIT, HostError::CmdEndBit),
        (sr::INT_CMD_INDEX, HostError::CmdIndex),
        (sr::INT_DATA_TIMEOUT, HostError::DataTimeout),
        (sr::INT_DATA_CRC, HostError::DataCrc),
        (sr::INT_DATA_END_BIT, HostError::DataEndBit),
        (sr::INT_ADMA, HostError::Adma),
    ];
    ORDER
        .iter()
        .find(|(bit, _)| status & bit != 0)
        .map_or(HostError::Timeout, |(_, e)| *e)
}

fn response_flags(rsp: ResponseType) -> u32 {
    let checked = sr::CMD_CRC | sr::CMD_INDEX_CHECK;
    match rsp {
        ResponseType::None => sr::CMD_RESP.val(sr::RESP_NONE),
        ResponseType::R2 => sr::CMD_RESP.val(sr::RESP_LONG) | sr::CMD_CRC,
        ResponseType::R3 | ResponseType::R4 => sr::CMD_RESP.val(sr::RESP_SHORT),
        ResponseType::R1b => sr::CMD_RESP.val(sr::RESP_SHORT_BUSY) | checked,
        ResponseType::R1 | ResponseType::R5 | ResponseType::R6 | ResponseType::R7 => {
            sr::CMD_RESP.val(sr::RESP_SHORT) | checked
        }
    }
}

/// SDHCI host over a [`RegisterBus`].
pub struct Sdhc<'a, B, D> {
    bus: B,
    delay: D,
    base: u32,
    events: &'a HostEvents,
    info: HostInfo,
    base_clock: u32,
    xfer: XferMode,
    taps: Option<[u8; 2]>,
    adma: [u64; sr::ADMA2_DESC_COUNT],
}

impl<'a, B: RegisterBus, D: DelayNs> Sdhc<'a, B, D> {
    /// Host for the instance at `base`, woken through `events`.
    pub fn new(bus: B, delay: D, base: u32, events: &'a HostEvents) -> Self {
        Self {
            bus,
            delay,
            base,
            events,
            info: Self::info_for(FALLBACK_BASE_CLOCK_HZ),
            base_clock: FALLBACK_BASE_CLOCK_HZ,
            xfer: XferMode::Pio,
            taps: None,
            adma: [0; sr::ADMA2_DESC_COUNT],
        }
    }

    /// Give back the bus and delay.
    pub fn release(self) -> (B, D) {
        (self.bus, self.delay)
    }

    /// Base clock the divider works from.
    pub fn base_clock(&self) -> u32 {
        self.base_clock
    }

    fn info_for(base_clock: u32) -> HostInfo {
        #[allow(clippy::cast_possible_truncation)] // descriptor count is 32
        let descs = sr::ADMA2_DESC_COUNT as u32;
        HostInfo {
            clock_min: base_clock.checked_div(DIVIDER_SPAN).unwrap_or(0),
            clock_max: base_clock,
            max_adma2_blocks: descs.saturating_mul(ADMA2_DESC_BLOCKS),
            default_bus_width: BusWidth::One,
            default_voltage: BusVoltage::V1_8,
            default_uhs: UhsMode::None,
            default_clock: IDENT_CLOCK_HZ,
        }
    }

    fn reg(&self, offset: u32) -> u32 {
        self.base | offset
    }

    fn poll(&mut self, offset: u32, mask: u32, value: u32, max_us: u32) -> Result<(), HostError> {
        let addr = self.reg(offset);
        poll_until(&mut self.bus, &mut self.delay, addr, mask, value, true, max_us)
            .map_err(|_| HostError::Timeout)
    }

    fn reset(&mut self, mask: u32) -> Result<(), HostError> {
        let clock = self.reg(sr::CLOCK);
        self.bus.set_bits(clock, mask);
        self.poll(sr::CLOCK, mask, 0, RESET_POLL_US)
    }

    /// Line reset after an error; a stuck reset is logged, not reported.
    fn recover(&mut self, mask: u32) {
        if let Err(_e) = self.reset(mask) {
            #[cfg(feature = "defmt")]
            defmt::warn!("sdhc: line reset {=u32:#x} stuck: {}", mask, _e);
        }
    }

    fn unmask(&mut self) {
        let addr = self.reg(sr::SIGNAL_ENABLE);
        self.bus.write(addr, sr::INT_ALL);
    }

    /// Wait for any bit of `mask` in INT_STATUS, acknowledging it.
    ///
    /// Error status aborts the wait: the failing line is reset and the
    /// decoded error returned, even when the reset itself times out.
    async fn wait_int(
        &mut self,
        mask: u32,
        timeout_ms: u64,
        on_timeout: HostError,
    ) -> Result<u32, HostError> {
        let events = self.events;
        let status_reg = self.reg(sr::INT_STATUS);
        let mut timer = Timer::after_millis(timeout_ms);
        loop {
            let status = self.bus.read(status_reg);
            if status & sr::INT_ERROR_MASK != 0 {
                self.bus.write(status_reg, status & sr::INT_ERROR_MASK);
                self.unmask();
                if status & sr::INT_CMD_ERRORS != 0 {
                    self.recover(sr::RESET_CMD);
                }
                if status & sr::INT_DATA_ERRORS != 0 {
                    self.recover(sr::RESET_DATA);
                }
                let err = decode_error(status);
                #[cfg(feature = "defmt")]
                defmt::warn!("sdhc: error status {=u32:#x} -> {}", status, err);
                return Err(err);
            }
            if status & mask != 0 {
                self.bus.write(status_reg, status & mask);
                self.unmask();
                return Ok(status);
            }
            self.unmask();
            if let Either::Second(()) = select(events.wait(), &mut timer).await {
                return Err(on_timeout);
            }
        }
    }

    /// Return once the FIFO can take or give a block.
    async fn wait_buffer(&mut self, present: u32, int: u32) -> Result<(), HostError> {
        let ps = self.reg(sr::PRESENT_STATE);
        if self.bus.read(ps) & present != 0 {
            let status = self.reg(sr::INT_STATUS);
            self.bus.write(status, int);
            return Ok(());
        }
        self.wait_int(int, DATA_TIMEOUT_MS, HostError::DataTimeout)
            .await
            .map(|_| ())
    }

    fn read_response(&mut self, cmd: &mut Command) {
        let mut raw = [0u32; 4];
        for (word, offset) in raw.iter_mut().zip(RESPONSE_REGS) {
            let addr = self.reg(offset);
            *word = self.bus.read(addr);
        }
        if cmd.response_type.long() {
            // The controller drops the CRC byte; shift it back in so bit 0
            // of word 0 is register bit 0.
            let mut prev = 0u32;
            for (out, word) in cmd.response.iter_mut().zip(raw) {
                *out = word.wrapping_shl(8) | prev.wrapping_shr(24);
                prev = word;
            }
        } else {
            cmd.response = [raw[0], 0, 0, 0];
        }
    }

    /// Program block registers and, for ADMA, the descriptor chain.
    /// Returns the transfer-mode bits.
    fn setup_data(&mut self, data: &CommandData<'_>) -> Result<u32, HostError> {
        let len = data.transfer_len().ok_or(HostError::InvalidArg)?;
        if data.block_count == 0
            || data.block_count > MAX_BLOCK_COUNT
            || data.block_size == 0
            || data.block_size > MAX_BLOCK_SIZE
        {
            return Err(HostError::InvalidArg);
        }
        let block = self.reg(sr::BLOCK);
        self.bus.write(
            block,
            sr::BLOCK_SIZE.val(data.block_size) | sr::BLOCK_COUNT.val(data.block_count),
        );

        let mut mode = sr::XFER_BLK_CNT_EN;
        if data.buf.direction() == DataDirection::Read {
            mode |= sr::XFER_READ;
        }
        if data.block_count > 1 {
            mode |= sr::XFER_MULTI;
            if data.auto_cmd23 {
                // Auto CMD23 takes its block count from ARGUMENT2.
                let arg2 = self.reg(sr::DMA_ADDR);
                self.bus.write(arg2, data.block_count);
                mode |= sr::XFER_ACMD23;
            }
        }

        if self.xfer == XferMode::Adma {
            // Descriptors cover exactly the transfer, however the segments
            // split it.
            let mut remaining = u32::try_from(len).map_err(|_| HostError::InvalidArg)?;
            let segments = data.buf.segments().map_while(|seg| {
                let take = u32::try_from(seg.len()).unwrap_or(u32::MAX).min(remaining);
                remaining = remaining.saturating_sub(take);
                (take > 0).then(|| (bus_addr(seg), take))
            });
            adma2_build_vectored(&mut self.adma, segments)?;
            #[allow(clippy::cast_possible_truncation)] // 32-bit address space on target
            let table = self.adma.as_ptr() as usize as u32;
            let adma = self.reg(sr::ADMA_ADDR);
            self.bus.write(adma, table);
            mode |= sr::XFER_DMA;
        }
        Ok(mode)
    }

    async fn pio(&mut self, data: &mut CommandData<'_>) -> Result<(), HostError> {
        data.transfer_len().ok_or(HostError::InvalidArg)?;
        let block = usize::try_from(data.block_size).map_err(|_| HostError::InvalidArg)?;
        let blocks = usize::try_from(data.block_count).map_err(|_| HostError::InvalidArg)?;
        match &mut data.buf {
            DataBuf::Read(buf) => {
                for chunk in buf.chunks_mut(block).take(blocks) {
                    self.pio_read_block(chunk).await?;
                }
            }
            DataBuf::ReadVectored(segs) => {
                let chunks = segs.iter_mut().flat_map(|seg| seg.chunks_mut(block));
                for chunk in chunks.take(blocks) {
                    self.pio_read_block(chunk).await?;
                }
            }
            DataBuf::Write(buf) => {
                for chunk in buf.chunks(block).take(blocks) {
                    self.pio_write_block(chunk).await?;
                }
            }
            DataBuf::WriteVectored(segs) => {
                let chunks = segs.iter().flat_map(|seg| seg.chunks(block));
                for chunk in chunks.take(blocks) {
                    self.pio_write_block(chunk).await?;
                }
            }
        }
        Ok(())
    }

    async fn pio_read_block(&mut self, chunk: &mut [u8]) -> Result<(), HostError> {
        self.wait_buffer(sr::PS_BUF_READ, sr::INT_READ_READY).await?;
        let fifo = self.reg(sr::BUFFER);
        for word in chunk.chunks_mut(4) {
            let bytes = self.bus.read(fifo).to_le_bytes();
            for (dst, src) in word.iter_mut().zip(bytes) {
                *dst = src;
            }
        }
        Ok(())
    }

    async fn pio_write_block(&mut self, chunk: &[u8]) -> Result<(), HostError> {
        self.wait_buffer(sr::PS_BUF_WRITE, sr::INT_WRITE_READY).await?;
        let fifo = self.reg(sr::BUFFER);
        for word in chunk.chunks(4) {
            let mut bytes = [0u8; 4];
            for (dst, src) in bytes.iter_mut().zip(word) {
                *dst = *src;
            }
            self.bus.write(fifo, u32::from_le_bytes(bytes));
        }
        Ok(())
    }
}

impl<B: RegisterBus, D: DelayNs> CardHost for Sdhc<'_, B, D> {
    fn info(&self) -> &HostInfo {
        &self.info
    }

    async fn init(&mut self) -> Result<(), HostError> {
        self.reset(sr::RESET_ALL)?;

        let caps = self.reg(sr::CAPABILITIES);
        let mhz = self.bus.read_field(caps, sr::CAP_BASE_CLOCK);
        self.base_clock = if mhz == 0 {
            FALLBACK_BASE_CLOCK_HZ
        } else {
            mhz.saturating_mul(1_000_000)
        };
        self.info = Self::info_for(self.base_clock);

        let clock = self.reg(sr::CLOCK);
        self.bus.write_field(clock, sr::TIMEOUT, sr::TIMEOUT_MAX);
        let status = self.reg(sr::INT_STATUS);
        self.bus.write(status, sr::INT_ALL);
        let enable = self.reg(sr::INT_ENABLE);
        self.bus.write(enable, sr::INT_ALL);
        self.unmask();

        self.set_bus_voltage(self.info.default_voltage)?;
        self.set_bus_width(self.info.default_bus_width)?;
        self.set_uhs_mode(self.info.default_uhs)?;
        self.set_bus_clock(self.info.default_clock)?;
        self.set_xfer_mode(self.xfer);
        if let Some(taps) = self.taps {
            self.set_txrx_delay(taps);
        }

        #[cfg(feature = "defmt")]
        defmt::info!("sdhc@{=u32:#x}: base clock {=u32} Hz", self.base, self.base_clock);
        Ok(())
    }

    async fn deinit(&mut self) -> Result<(), HostError> {
        let signal = self.reg(sr::SIGNAL_ENABLE);
        self.bus.write(signal, 0);
        let enable = self.reg(sr::INT_ENABLE);
        self.bus.write(enable, 0);
        let clock = self.reg(sr::CLOCK);
        self.bus.clear_bits(clock, sr::CLK_SD_EN | sr::CLK_INT_EN);
        let hc = self.reg(sr::HOST_CONTROL);
        self.bus.clear_bits(hc, sr::PWR_ON);
        Ok(())
    }

    async fn execute_cmd(
        &mut self,
        cmd: &mut Command,
        data: Option<&mut CommandData<'_>>,
    ) -> Result<u32, HostError> {
        let busy = cmd.response_type.busy();
        let inhibit = if data.is_some() || busy {
            sr::PS_CMD_INHIBIT | sr::PS_DATA_INHIBIT
        } else {
            sr::PS_CMD_INHIBIT
        };
        self.poll(sr::PRESENT_STATE, inhibit, 0, INHIBIT_POLL_US)?;

        let mode = match data.as_deref() {
            Some(d) => self.setup_data(d)?,
            None => 0,
        };
        let mut word = sr::CMD_INDEX.val(u32::from(cmd.index)) | response_flags(cmd.response_type);
        if data.is_some() {
            word |= sr::CMD_DATA;
        }

        let arg = self.reg(sr::ARGUMENT);
        self.bus.write(arg, cmd.arg);
        let issue = self.reg(sr::XFER_CMD);
        self.bus.write(issue, word | mode);

        self.wait_int(sr::INT_CMD_FIN, CMD_TIMEOUT_MS, HostError::CmdTimeout)
            .await?;
        self.read_response(cmd);

        match data {
            Some(d) => {
                if self.xfer == XferMode::Pio {
                    self.pio(d).await?;
                }
                self.wait_int(sr::INT_DATA_FIN, DATA_TIMEOUT_MS, HostError::DataTimeout)
                    .await?;
                Ok(d.block_count)
            }
            None => {
                if busy {
                    self.wait_int(sr::INT_DATA_FIN, DATA_TIMEOUT_MS, HostError::DataTimeout)
                        .await?;
                }
                Ok(0)
            }
        }
    }

    async fn card_busy(&mut self, timeout_ms: u32) -> Result<(), HostError> {
        let ps = self.reg(sr::PRESENT_STATE);
        for _ in 0..timeout_ms {
            if self.bus.read(ps) & sr::PS_DAT0 != 0 {
                return Ok(());
            }
            Timer::after_millis(1).await;
        }
        Err(HostError::Timeout)
    }

    fn set_bus_width(&mut self, width: BusWidth) -> Result<(), HostError> {
        let bits = match width {
            BusWidth::One => 0,
            BusWidth::Four => sr::HC_4BIT,
            BusWidth::Eight => sr::HC_8BIT,
        };
        let hc = self.reg(sr::HOST_CONTROL);
        self.bus
            .modify(hc, |v| (v & !(sr::HC_4BIT | sr::HC_8BIT)) | bits);
        Ok(())
    }

    fn set_bus_clock(&mut self, hz: u32) -> Result<u32, HostError> {
        if hz > self.info.clock_max || hz < self.info.clock_min {
            return Err(HostError::InvalidArg);
        }
        let clock = self.reg(sr::CLOCK);
        self.bus.clear_bits(clock, sr::CLK_SD_EN);
        let (div, actual) = clock_divider(self.base_clock, hz);
        self.bus.modify(clock, |v| {
            let v = v & !0xFFFF;
            let v = sr::CLK_DIV_LO.insert(v, div);
            sr::CLK_DIV_HI.insert(v, div.wrapping_shr(8)) | sr::CLK_INT_EN
        });
        self.poll(sr::CLOCK, sr::CLK_INT_STABLE, sr::CLK_INT_STABLE, CLOCK_STABLE_POLL_US)?;
        self.bus.set_bits(clock, sr::CLK_SD_EN);

        let hc = self.reg(sr::HOST_CONTROL);
        if hz > HIGH_SPEED_THRESHOLD_HZ {
            self.bus.set_bits(hc, sr::HC_HS);
        } else {
            self.bus.clear_bits(hc, sr::HC_HS);
        }
        #[cfg(feature = "defmt")]
        defmt::debug!("sdhc: clock {=u32} Hz (div {=u32})", actual, div);
        Ok(actual)
    }

    fn set_bus_voltage(&mut self, voltage: BusVoltage) -> Result<(), HostError> {
        let sel = match voltage {
            BusVoltage::V1_8 => sr::VOLTAGE_1_8,
            BusVoltage::V3_0 => sr::VOLTAGE_3_0,
            BusVoltage::V3_3 => sr::VOLTAGE_3_3,
        };
        let hc = self.reg(sr::HOST_CONTROL);
        self.bus
            .modify(hc, |v| sr::PWR_VOLTAGE.insert(v, sel) | sr::PWR_ON);
        let hc2 = self.reg(sr::HOST_CONTROL2);
        if voltage == BusVoltage::V1_8 {
            self.bus.set_bits(hc2, sr::HC2_1V8);
        } else {
            self.bus.clear_bits(hc2, sr::HC2_1V8);
        }
        Ok(())
    }

    fn set_uhs_mode(&mut self, mode: UhsMode) -> Result<(), HostError> {
        let sel = match mode {
            UhsMode::None | UhsMode::Sdr12 => sr::UHS_SDR12,
            UhsMode::Sdr25 => sr::UHS_SDR25,
            UhsMode::Sdr50 => sr::UHS_SDR50,
            UhsMode::Sdr104 => sr::UHS_SDR104,
            UhsMode::Ddr50 => sr::UHS_DDR50,
        };
        let hc2 = self.reg(sr::HOST_CONTROL2);
        self.bus.write_field(hc2, sr::HC2_UHS, sel);
        Ok(())
    }

    fn set_txrx_delay(&mut self, delay: [u8; 2]) {
        self.taps = Some(delay);
        let [tx, rx] = delay;
        let addr = self.reg(sr::VENDOR_DELAY);
        self.bus.write(
            addr,
            sr::DLY_TX.val(u32::from(tx))
                | sr::DLY_RX.val(u32::from(rx))
                | sr::DLY_TX_EN
                | sr::DLY_RX_EN,
        );
    }

    fn get_cd(&mut self) -> bool {
        let ps = self.reg(sr::PRESENT_STATE);
        self.bus.read(ps) & sr::PS_CARD_PRESENT != 0
    }

    fn set_xfer_mode(&mut self, mode: XferMode) {
        self.xfer = mode;
        let sel = match mode {
            XferMode::Pio => 0,
            XferMode::Adma => sr::DMA_SEL_ADMA2,
        };
        let hc = self.reg(sr::HOST_CONTROL);
        self.bus.write_field(hc, sr::HC_DMA_SEL, sel);
    }

    fn xfer_mode(&self) -> XferMode {
        self.xfer
    }
}
