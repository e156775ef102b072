//! In-memory eMMC device behind the [`CardHost`] interface.
//!
//! Blocks are stored sparsely, so the simulated device can report a
//! realistic sector count. The device follows the JEDEC state machine far
//! enough for identification, CMD6, sleep and erase; commands sent in the
//! wrong state get no response. A TX/RX tap window models the sampling
//! margin: reads issued with taps outside it return corrupted data.

#![allow(
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation
)] // test double

use crate::bits::unstuff_bits;
use crate::sdhc::{
    BusVoltage, BusWidth, CardHost, Command, CommandData, DataBuf, HostError, HostInfo, UhsMode,
    XferMode,
};
use std::collections::BTreeMap;
use std::vec::Vec;

const BLOCK: usize = 512;

const ST_IDLE: u32 = 0;
const ST_READY: u32 = 1;
const ST_IDENT: u32 = 2;
const ST_STBY: u32 = 3;
const ST_TRAN: u32 = 4;
const ST_SLP: u32 = 10;

const READY_FOR_DATA: u32 = 1 << 8;
const SWITCH_ERROR: u32 = 1 << 7;
const OCR_BUSY_DONE: u32 = 1 << 31;

/// Shape of the simulated device.
#[derive(Debug, Clone)]
pub struct SimEmmcConfig {
    /// Card in the slot.
    pub present: bool,
    /// User-area blocks (SEC_COUNT).
    pub sectors: u32,
    /// OCR returned by CMD1, without the ready bit.
    pub ocr: u32,
    /// CMD1 polls answered busy before the ready bit is set.
    pub op_cond_busy_polls: u32,
    /// CID, least significant word first.
    pub cid: [u32; 4],
    /// CSD, least significant word first.
    pub csd: [u32; 4],
    /// Initial EXT_CSD.
    pub ext_csd: [u8; 512],
    /// TX taps (bit per tap) at which data survives.
    pub tx_window: u16,
    /// RX taps (bit per tap) at which data survives.
    pub rx_window: u32,
}

impl SimEmmcConfig {
    /// CSD with the given C_SIZE and SPEC_VERS.
    pub fn csd_with_c_size(c_size: u32, spec_ver: u32) -> [u32; 4] {
        let mut csd = [0u32; 4];
        // C_SIZE spans bits 62..73.
        csd[1] = (c_size & 0x3) << 30;
        csd[2] = (c_size >> 2) & 0x3FF;
        // CCC at bits 84..95.
        csd[2] |= 0x8F5 << 20;
        // SPEC_VERS at bits 122..125.
        csd[3] = (spec_ver & 0xF) << 26;
        csd
    }

    /// CID for MID/OID/PNM/PRV, PNM given lowest CID byte first.
    pub fn cid_for(mid: u8, oid: u8, name: [u8; 6], prv: u8) -> [u32; 4] {
        let mut cid = [0u32; 4];
        let mut put = |bit: usize, value: u8| {
            let word = bit / 32;
            cid[word] |= u32::from(value) << (bit % 32);
        };
        put(120, mid);
        put(104, oid);
        for (i, b) in name.iter().enumerate() {
            put(56 + 8 * i, *b);
        }
        put(48, prv);
        cid
    }
}

impl Default for SimEmmcConfig {
    /// A 3.7 GiB Toshiba-like part: EXT_CSD rev 8, DDR capable, cache,
    /// secure erase and trim.
    fn default() -> Self {
        let sectors = 0x0076_0000u32;
        let mut ext = [0u8; 512];
        ext[175] = 1; // ERASE_GROUP_DEF
        ext[192] = 8; // EXT_CSD_REV
        ext[196] = 0x57; // DEVICE_TYPE
        ext[212..216].copy_from_slice(&sectors.to_le_bytes());
        ext[216] = 10; // SLEEP_NOTIFICATION_TIME
        ext[224] = 1; // HC_ERASE_GRP_SIZE
        ext[231] = 0x55; // SEC_FEATURE_SUPPORT
        ext[247] = 25; // POWER_OFF_LONG_TIME
        ext[248] = 10; // GENERIC_CMD6_TIME
        ext[249..253].copy_from_slice(&0x400u32.to_le_bytes());
        Self {
            present: true,
            sectors,
            ocr: 0x40FF_8080,
            op_cond_busy_polls: 1,
            cid: Self::cid_for(0x11, 0, *b"0AG400", 0x02),
            csd: Self::csd_with_c_size(0xFFF, 4),
            ext_csd: ext,
            tx_window: u16::MAX,
            rx_window: u32::MAX,
        }
    }
}

/// Simulated eMMC.
pub struct SimEmmc {
    config: SimEmmcConfig,
    info: HostInfo,
    ext_csd: [u8; 512],
    blocks: BTreeMap<u32, Vec<u8>>,
    state: u32,
    rca: u32,
    op_cond_polls: u32,
    switch_error: bool,
    rejected_switch: Option<u8>,
    switch_busy_polls: u32,
    not_ready_polls: u32,
    erase_start: u32,
    erase_end: u32,
    secure_trim_marked: Vec<(u32, u32)>,
    commands: Vec<(u8, u32)>,
    taps: [u8; 2],
    width: BusWidth,
    uhs: UhsMode,
    voltage: BusVoltage,
    clock: u32,
    xfer: XferMode,
    powered: bool,
}

impl SimEmmc {
    /// Device described by `config`.
    pub fn new(config: SimEmmcConfig) -> Self {
        let ext_csd = config.ext_csd;
        Self {
            info: HostInfo {
                clock_min: 46_920,
                clock_max: 96_000_000,
                max_adma2_blocks: 32 * 127,
                default_bus_width: BusWidth::One,
                default_voltage: BusVoltage::V1_8,
                default_uhs: UhsMode::None,
                default_clock: 400_000,
            },
            config,
            ext_csd,
            blocks: BTreeMap::new(),
            state: ST_IDLE,
            rca: 0,
            op_cond_polls: 0,
            switch_error: false,
            rejected_switch: None,
            switch_busy_polls: 0,
            not_ready_polls: 0,
            erase_start: 0,
            erase_end: 0,
            secure_trim_marked: Vec::new(),
            commands: Vec::new(),
            taps: [0; 2],
            width: BusWidth::One,
            uhs: UhsMode::None,
            voltage: BusVoltage::V1_8,
            clock: 0,
            xfer: XferMode::Pio,
            powered: false,
        }
    }

    /// Every command received, as (index, argument).
    pub fn commands(&self) -> &[(u8, u32)] {
        &self.commands
    }

    /// Forget the command log.
    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Live EXT_CSD.
    pub fn ext_csd(&self) -> &[u8; 512] {
        &self.ext_csd
    }

    /// Host-side bus width.
    pub fn bus_width(&self) -> BusWidth {
        self.width
    }

    /// Host-side speed mode.
    pub fn uhs(&self) -> UhsMode {
        self.uhs
    }

    /// Host-side clock.
    pub fn clock(&self) -> u32 {
        self.clock
    }

    /// Programmed TX/RX taps.
    pub fn taps(&self) -> [u8; 2] {
        self.taps
    }

    /// Answer CMD6 writes to `index` with SWITCH_ERROR.
    pub fn reject_switch(&mut self, index: u8) {
        self.rejected_switch = Some(index);
    }

    /// After each CMD6, answer the next `polls` CMD13s without
    /// READY_FOR_DATA.
    pub fn hold_not_ready_after_switch(&mut self, polls: u32) {
        self.switch_busy_polls = polls;
    }

    /// Byte erased blocks read back as (EXT_CSD ERASED_MEM_CONT).
    pub fn erased_byte(&self) -> u8 {
        if self.ext_csd[181] != 0 {
            0xFF
        } else {
            0
        }
    }

    /// Contents of `blk`; never-written blocks read as zero.
    pub fn block(&self, blk: u32) -> Vec<u8> {
        self.blocks
            .get(&blk)
            .cloned()
            .unwrap_or_else(|| vec![0; BLOCK])
    }

    fn erase_group_blocks(&self) -> u32 {
        if self.ext_csd[175] != 0 {
            512 * 1024 * u32::from(self.ext_csd[224]) / BLOCK as u32
        } else {
            let size = (self.config.csd[1] >> 10) & 0x1F;
            let mult = (self.config.csd[1] >> 5) & 0x1F;
            (size + 1) * (mult + 1)
        }
    }

    fn timing_ok(&self) -> bool {
        let [tx, rx] = self.taps;
        let tx_ok = u32::from(self.config.tx_window).checked_shr(u32::from(tx)).unwrap_or(0) & 1;
        let rx_ok = self.config.rx_window.checked_shr(u32::from(rx)).unwrap_or(0) & 1;
        tx_ok != 0 && rx_ok != 0
    }

    fn status(&self) -> u32 {
        let mut status = (self.state << 9) | READY_FOR_DATA;
        if self.switch_error {
            status |= SWITCH_ERROR;
        }
        status
    }

    fn block_index(&self, arg: u32) -> u32 {
        if unstuff_bits(&self.config.csd, 62, 12) == 0xFFF {
            arg
        } else {
            arg / BLOCK as u32
        }
    }

    fn fill(&mut self, start: u32, end_inclusive: u32, byte: u8) {
        for blk in start..=end_inclusive {
            self.blocks.insert(blk, vec![byte; BLOCK]);
        }
    }

    fn erase(&mut self, arg: u32) {
        let erased = self.erased_byte();
        let (start, end) = (self.erase_start, self.erase_end);
        match arg {
            // ERASE and SECURE_ERASE work on whole groups.
            0 | 0x8000_0000 => {
                let group = self.erase_group_blocks();
                let first = start / group * group;
                let last = (end / group + 1) * group - 1;
                self.fill(first, last.min(self.config.sectors - 1), erased);
            }
            1 => self.fill(start, end, erased),
            0x8000_0001 => self.secure_trim_marked.push((start, end)),
            0x8000_8000 => {
                for (s, e) in std::mem::take(&mut self.secure_trim_marked) {
                    self.fill(s, e, erased);
                }
            }
            // DISCARD leaves contents as they were.
            _ => {}
        }
    }

    fn respond(&mut self, cmd: &mut Command) -> Result<(), HostError> {
        let arg = cmd.arg;
        let no_response = Err(HostError::CmdTimeout);
        match cmd.index {
            0 => {
                self.state = ST_IDLE;
                self.op_cond_polls = 0;
            }
            1 => {
                if self.state != ST_IDLE && self.state != ST_READY {
                    return no_response;
                }
                let mut ocr = self.config.ocr;
                if self.op_cond_polls >= self.config.op_cond_busy_polls {
                    ocr |= OCR_BUSY_DONE;
                    self.state = ST_READY;
                }
                self.op_cond_polls += 1;
                cmd.response[0] = ocr;
            }
            2 => {
                if self.state != ST_READY {
                    return no_response;
                }
                cmd.response = self.config.cid;
                self.state = ST_IDENT;
            }
            3 => {
                if self.state != ST_IDENT {
                    return no_response;
                }
                self.rca = arg >> 16;
                cmd.response[0] = self.status();
                self.state = ST_STBY;
            }
            5 => {
                if arg >> 16 != self.rca {
                    return no_response;
                }
                let sleep = arg & (1 << 15) != 0;
                match (sleep, self.state) {
                    (true, ST_STBY) => self.state = ST_SLP,
                    (false, ST_SLP) => self.state = ST_STBY,
                    _ => return no_response,
                }
                cmd.response[0] = self.status();
            }
            6 => {
                if self.state != ST_TRAN {
                    return no_response;
                }
                let index = ((arg >> 16) & 0xFF) as u8;
                let value = ((arg >> 8) & 0xFF) as u8;
                cmd.response[0] = self.status();
                if self.rejected_switch == Some(index) {
                    self.switch_error = true;
                } else {
                    self.ext_csd[usize::from(index)] = value;
                }
                self.not_ready_polls = self.switch_busy_polls;
            }
            7 => {
                let rca = arg >> 16;
                if rca == self.rca && (self.state == ST_STBY || self.state == ST_TRAN) {
                    cmd.response[0] = self.status();
                    self.state = ST_TRAN;
                } else if rca == 0 {
                    if self.state == ST_TRAN {
                        self.state = ST_STBY;
                    }
                } else {
                    return no_response;
                }
            }
            9 => {
                if self.state != ST_STBY || arg >> 16 != self.rca {
                    return no_response;
                }
                cmd.response = self.config.csd;
            }
            13 => {
                if arg >> 16 != self.rca {
                    return no_response;
                }
                cmd.response[0] = self.status();
                if self.not_ready_polls > 0 {
                    cmd.response[0] &= !READY_FOR_DATA;
                    self.not_ready_polls -= 1;
                }
                self.switch_error = false;
            }
            35 | 36 | 38 | 8 | 17 | 18 | 24 | 25 => {
                if self.state != ST_TRAN {
                    return no_response;
                }
                cmd.response[0] = self.status();
                match cmd.index {
                    35 => self.erase_start = self.block_index(arg),
                    36 => self.erase_end = self.block_index(arg),
                    38 => self.erase(arg),
                    _ => {}
                }
            }
            _ => return no_response,
        }
        Ok(())
    }

    fn read_blocks<'b>(&self, start: u32, chunks: impl Iterator<Item = &'b mut [u8]>, corrupt: bool) {
        for (blk, chunk) in (start..).zip(chunks) {
            let n = chunk.len();
            chunk.copy_from_slice(&self.block(blk)[..n]);
            if corrupt {
                for b in chunk.iter_mut() {
                    *b ^= 0xA5;
                }
            }
        }
    }

    fn write_blocks<'b>(&mut self, start: u32, chunks: impl Iterator<Item = &'b [u8]>) {
        for (blk, chunk) in (start..).zip(chunks) {
            self.blocks.insert(blk, chunk.to_vec());
        }
    }

    fn transfer(&mut self, cmd: &Command, data: &mut CommandData<'_>) -> Result<u32, HostError> {
        let len = data.transfer_len().ok_or(HostError::InvalidArg)?;
        let count = data.block_count;
        if cmd.index == 8 {
            if let DataBuf::Read(buf) = &mut data.buf {
                buf[..512].copy_from_slice(&self.ext_csd);
            }
            return Ok(1);
        }
        let start = self.block_index(cmd.arg);
        if start.saturating_add(count) > self.config.sectors {
            return Err(HostError::DataTimeout);
        }
        let corrupt = !self.timing_ok();
        let blocks = len / BLOCK;
        match &mut data.buf {
            DataBuf::Read(buf) => {
                self.read_blocks(start, buf.chunks_mut(BLOCK).take(blocks), corrupt);
            }
            DataBuf::ReadVectored(segs) => {
                let chunks = segs.iter_mut().flat_map(|seg| seg.chunks_mut(BLOCK));
                self.read_blocks(start, chunks.take(blocks), corrupt);
            }
            DataBuf::Write(buf) => self.write_blocks(start, buf.chunks(BLOCK).take(blocks)),
            DataBuf::WriteVectored(segs) => {
                let chunks = segs.iter().flat_map(|seg| seg.chunks(BLOCK));
                self.write_blocks(start, chunks.take(blocks));
            }
        }
        Ok(count)
    }
}

impl CardHost for SimEmmc {
    fn info(&self) -> &HostInfo {
        &self.info
    }

    async fn init(&mut self) -> Result<(), HostError> {
        self.powered = true;
        self.state = ST_IDLE;
        self.width = self.info.default_bus_width;
        self.uhs = self.info.default_uhs;
        self.clock = self.info.default_clock;
        // HS_TIMING and BUS_WIDTH fall back to legacy on power cycle.
        self.ext_csd[183] = 0;
        self.ext_csd[185] = 0;
        Ok(())
    }

    async fn deinit(&mut self) -> Result<(), HostError> {
        self.powered = false;
        Ok(())
    }

    async fn execute_cmd(
        &mut self,
        cmd: &mut Command,
        data: Option<&mut CommandData<'_>>,
    ) -> Result<u32, HostError> {
        self.commands.push((cmd.index, cmd.arg));
        if !self.powered || !self.config.present {
            return Err(HostError::CmdTimeout);
        }
        self.respond(cmd)?;
        match data {
            Some(d) => self.transfer(cmd, d),
            None => Ok(0),
        }
    }

    async fn card_busy(&mut self, _timeout_ms: u32) -> Result<(), HostError> {
        Ok(())
    }

    fn set_bus_width(&mut self, width: BusWidth) -> Result<(), HostError> {
        self.width = width;
        Ok(())
    }

    fn set_bus_clock(&mut self, hz: u32) -> Result<u32, HostError> {
        if hz > self.info.clock_max || hz < self.info.clock_min {
            return Err(HostError::InvalidArg);
        }
        self.clock = hz;
        Ok(hz)
    }

    fn set_bus_voltage(&mut self, voltage: BusVoltage) -> Result<(), HostError> {
        self.voltage = voltage;
        Ok(())
    }

    fn set_uhs_mode(&mut self, mode: UhsMode) -> Result<(), HostError> {
        self.uhs = mode;
        Ok(())
    }

    fn set_txrx_delay(&mut self, delay: [u8; 2]) {
        self.taps = delay;
    }

    fn get_cd(&mut self) -> bool {
        self.config.present
    }

    fn set_xfer_mode(&mut self, mode: XferMode) {
        self.xfer = mode;
    }

    fn xfer_mode(&self) -> XferMode {
        self.xfer
    }
}
