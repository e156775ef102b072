//! Known eMMC parts.

use apollo_hal::sdhc::CardHost;
use apollo_hal::Card;
use embedded_hal::delay::DelayNs;

/// CID fields and geometry of a part the widget has been qualified on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmmcDeviceInfo {
    /// Vendor name.
    pub manufacturer: &'static str,
    /// CID MID.
    pub manufacturer_id: u8,
    /// CID PNM, lowest CID byte first.
    pub product_name: [u8; 6],
    /// CID PRV.
    pub product_revision: u8,
    /// CID OID.
    pub oem: u8,
    /// CSD C_SIZE.
    pub csize: u32,
    /// EXT_CSD MAX_ENH_SIZE_MULT.
    pub max_enh_size_mult: u32,
    /// EXT_CSD SEC_COUNT.
    pub sector_count: u32,
}

/// Qualified parts.
pub const EMMC_DEVICES: [EmmcDeviceInfo; 3] = [
    EmmcDeviceInfo {
        manufacturer: "Toshiba",
        manufacturer_id: 0x11,
        product_name: *b"0AG400",
        product_revision: 0x02,
        oem: 0,
        csize: 0xFFF,
        max_enh_size_mult: 0x1D8,
        sector_count: 0x0076_0000,
    },
    EmmcDeviceInfo {
        manufacturer: "BIWIN",
        manufacturer_id: 0xF4,
        product_name: *b" niwiB",
        product_revision: 0x11,
        oem: 0x22,
        csize: 0xFFF,
        max_enh_size_mult: 0xD8,
        sector_count: 0x006C_0000,
    },
    EmmcDeviceInfo {
        manufacturer: "Kingston",
        manufacturer_id: 0x70,
        product_name: *b"40756M",
        product_revision: 0x08,
        oem: 0,
        csize: 0xFFF,
        max_enh_size_mult: 0x1C4,
        sector_count: 0x0071_0000,
    },
];

/// Index into [`EMMC_DEVICES`] of the identified card, matched on MID, OID,
/// PRV and PNM.
pub fn emmc_identifier<H: CardHost, D: DelayNs>(card: &Card<H, D>) -> Option<usize> {
    let cid = card.cid_info();
    EMMC_DEVICES.iter().position(|dev| {
        dev.manufacturer_id == cid.manufacturer
            && dev.oem == cid.oem
            && dev.product_revision == cid.revision
            && dev.product_name == cid.name
    })
}
