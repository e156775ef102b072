//! SDHCI register map, as offsets from the instance base.
//!
//! The standard 8- and 16-bit registers are accessed through the 32-bit word
//! that contains them.

#![allow(missing_docs)]

use crate::regs::Field;

pub const DMA_ADDR: u32 = 0x00;
/// BLKSIZE (low half) and BLKCOUNT (high half).
pub const BLOCK: u32 = 0x04;
pub const BLOCK_SIZE: Field = Field::new(0, 12);
pub const BLOCK_COUNT: Field = Field::new(16, 16);
pub const ARGUMENT: u32 = 0x08;
/// TRANSMODE (low half) and CMD (high half); writing the high half issues
/// the command.
pub const XFER_CMD: u32 = 0x0C;
pub const RESPONSE0: u32 = 0x10;
pub const BUFFER: u32 = 0x20;
pub const PRESENT_STATE: u32 = 0x24;
/// HOST_CONTROL, POWER, BLOCK_GAP, WAKEUP.
pub const HOST_CONTROL: u32 = 0x28;
/// CLOCK (low half), TIMEOUT, SOFTWARE_RESET.
pub const CLOCK: u32 = 0x2C;
/// NORMINT (low half) and ERRINT (high half), write one to clear.
pub const INT_STATUS: u32 = 0x30;
pub const INT_ENABLE: u32 = 0x34;
pub const SIGNAL_ENABLE: u32 = 0x38;
/// AUTO_CMD_ERR (low half) and HOST_CONTROL2 (high half).
pub const HOST_CONTROL2: u32 = 0x3C;
pub const CAPABILITIES: u32 = 0x40;
pub const ADMA_ADDR: u32 = 0x58;
/// Apollo5 vendor register: TX/RX sampling delay taps.
pub const VENDOR_DELAY: u32 = 0x100;

// ─── Transfer mode (XFER_CMD low half) ──────────────────────────────────────

pub const XFER_DMA: u32 = 0x01;
pub const XFER_BLK_CNT_EN: u32 = 0x02;
pub const XFER_ACMD12: u32 = 0x04;
pub const XFER_ACMD23: u32 = 0x08;
pub const XFER_READ: u32 = 0x10;
pub const XFER_MULTI: u32 = 0x20;

// ─── Command (XFER_CMD high half) ───────────────────────────────────────────

pub const CMD_RESP: Field = Field::new(16, 2);
pub const RESP_NONE: u32 = 0;
pub const RESP_LONG: u32 = 1;
pub const RESP_SHORT: u32 = 2;
pub const RESP_SHORT_BUSY: u32 = 3;
pub const CMD_CRC: u32 = 1 << 19;
pub const CMD_INDEX_CHECK: u32 = 1 << 20;
pub const CMD_DATA: u32 = 1 << 21;
pub const CMD_INDEX: Field = Field::new(24, 6);

// ─── PRESENT_STATE ──────────────────────────────────────────────────────────

pub const PS_CMD_INHIBIT: u32 = 0x1;
pub const PS_DATA_INHIBIT: u32 = 0x2;
pub const PS_BUF_WRITE: u32 = 0x400;
pub const PS_BUF_READ: u32 = 0x800;
pub const PS_CARD_PRESENT: u32 = 0x1_0000;
/// DAT0 line level; low while the card signals busy.
pub const PS_DAT0: u32 = 0x10_0000;

// ─── HOST_CONTROL ───────────────────────────────────────────────────────────

pub const HC_4BIT: u32 = 0x02;
pub const HC_HS: u32 = 0x04;
pub const HC_DMA_SEL: Field = Field::new(3, 2);
pub const DMA_SEL_ADMA2: u32 = 0b10;
pub const HC_8BIT: u32 = 0x20;
pub const PWR_ON: u32 = 1 << 8;
pub const PWR_VOLTAGE: Field = Field::new(9, 3);
pub const VOLTAGE_3_3: u32 = 0x7;
pub const VOLTAGE_3_0: u32 = 0x6;
pub const VOLTAGE_1_8: u32 = 0x5;

// ─── CLOCK ──────────────────────────────────────────────────────────────────

pub const CLK_INT_EN: u32 = 0x1;
pub const CLK_INT_STABLE: u32 = 0x2;
pub const CLK_SD_EN: u32 = 0x4;
pub const CLK_DIV_HI: Field = Field::new(6, 2);
pub const CLK_DIV_LO: Field = Field::new(8, 8);
pub const TIMEOUT: Field = Field::new(16, 4);
pub const TIMEOUT_MAX: u32 = 0xE;
pub const RESET_ALL: u32 = 1 << 24;
pub const RESET_CMD: u32 = 1 << 25;
pub const RESET_DATA: u32 = 1 << 26;

// ─── INT_STATUS ─────────────────────────────────────────────────────────────

pub const INT_CMD_FIN: u32 = 0x1;
pub const INT_DATA_FIN: u32 = 0x2;
pub const INT_DMA_END: u32 = 0x8;
pub const INT_WRITE_READY: u32 = 0x10;
pub const INT_READ_READY: u32 = 0x20;
pub const INT_CARD_INSERT: u32 = 0x40;
pub const INT_CARD_REMOVE: u32 = 0x80;
pub const INT_ERROR: u32 = 0x8000;
pub const INT_CMD_TIMEOUT: u32 = 0x1_0000;
pub const INT_CMD_CRC: u32 = 0x2_0000;
pub const INT_CMD_END_BIT: u32 = 0x4_0000;
pub const INT_CMD_INDEX: u32 = 0x8_0000;
pub const INT_DATA_TIMEOUT: u32 = 0x10_0000;
pub const INT_DATA_CRC: u32 = 0x20_0000;
pub const INT_DATA_END_BIT: u32 = 0x40_0000;
pub const INT_ADMA: u32 = 0x200_0000;
pub const INT_ERROR_MASK: u32 = 0xFFFF_8000;
pub const INT_CMD_ERRORS: u32 = INT_CMD_TIMEOUT | INT_CMD_CRC | INT_CMD_END_BIT | INT_CMD_INDEX;
pub const INT_DATA_ERRORS: u32 = INT_DATA_TIMEOUT | INT_DATA_CRC | INT_DATA_END_BIT | INT_ADMA;
pub const INT_ALL: u32 = 0xFFFF_FFFF;

// ─── HOST_CONTROL2 (high half of the word) ──────────────────────────────────

pub const HC2_UHS: Field = Field::new(16, 3);
pub const UHS_SDR12: u32 = 0;
pub const UHS_SDR25: u32 = 1;
pub const UHS_SDR50: u32 = 2;
pub const UHS_SDR104: u32 = 3;
pub const UHS_DDR50: u32 = 4;
pub const HC2_1V8: u32 = 1 << 19;

// ─── CAPABILITIES ───────────────────────────────────────────────────────────

/// Base clock in MHz.
pub const CAP_BASE_CLOCK: Field = Field::new(8, 8);
pub const CAP_8BIT: u32 = 1 << 18;
pub const CAP_ADMA2: u32 = 1 << 19;

// ─── VENDOR_DELAY ───────────────────────────────────────────────────────────

pub const DLY_TX: Field = Field::new(0, 4);
pub const DLY_RX: Field = Field::new(8, 5);
pub const DLY_TX_EN: u32 = 1 << 16;
pub const DLY_RX_EN: u32 = 1 << 17;

// ─── ADMA2 descriptor attributes ────────────────────────────────────────────

pub const ADMA2_VALID: u64 = 0x1;
pub const ADMA2_END: u64 = 0x2;
pub const ADMA2_TRAN: u64 = 0x20;
/// Bytes one descriptor carries: 127 blocks of 512.
pub const ADMA2_DESC_BYTES: u32 = 127 * 512;
/// Descriptors in the host's table.
pub const ADMA2_DESC_COUNT: usize = 32;
