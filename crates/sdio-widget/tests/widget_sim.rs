//! Widget checks against the simulated eMMC.

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use apollo_hal::mocks::{SimEmmc, SimEmmcConfig};
use apollo_hal::{BusWidth, Card, CardConfig, CardHost, EraseType, UhsMode, XferMode};
use embedded_hal_mock::eh1::delay::NoopDelay;
use sdio_widget::{
    benchmark_write_read, emmc_identifier, erase_check, erase_group_size, prepare_testdata,
    test_erase, test_scatter_write_read, test_write_read, TimingScanTable, WidgetConfig,
    WidgetError,
};

type SimCard = Card<SimEmmc, NoopDelay>;

async fn ready(config: SimEmmcConfig) -> SimCard {
    let mut card = Card::new(SimEmmc::new(config), NoopDelay::new(), CardConfig::default());
    card.find_card().await.unwrap();
    card.init().await.unwrap();
    card
}

fn buffers(blocks: usize, seed: u32) -> (Vec<u8>, Vec<u8>) {
    let mut wr = vec![0u8; blocks * 512];
    prepare_testdata(&mut wr, seed);
    (wr, vec![0u8; blocks * 512])
}

// ── Identification ──────────────────────────────────────────────────────────

#[tokio::test]
async fn toshiba_part_identified() {
    let card = ready(SimEmmcConfig::default()).await;
    assert_eq!(emmc_identifier(&card), Some(0));
}

#[tokio::test]
async fn biwin_part_identified() {
    let config = SimEmmcConfig {
        cid: SimEmmcConfig::cid_for(0xF4, 0x22, *b" niwiB", 0x11),
        ..SimEmmcConfig::default()
    };
    let card = ready(config).await;
    assert_eq!(emmc_identifier(&card), Some(1));
}

#[tokio::test]
async fn revision_must_match() {
    let config = SimEmmcConfig {
        cid: SimEmmcConfig::cid_for(0x11, 0, *b"0AG400", 0x03),
        ..SimEmmcConfig::default()
    };
    let card = ready(config).await;
    assert_eq!(emmc_identifier(&card), None);
}

// ── Erase geometry ──────────────────────────────────────────────────────────

#[tokio::test]
async fn group_from_ext_csd() {
    let card = ready(SimEmmcConfig::default()).await;
    assert_eq!(erase_group_size(&card), 1024);
}

#[tokio::test]
async fn group_from_csd_when_not_high_capacity_grouped() {
    let mut config = SimEmmcConfig::default();
    config.ext_csd[175] = 0;
    // ERASE_GRP_SIZE = 15 (bits 37..41), ERASE_GRP_MULT = 1 (bits 42..46).
    config.csd[1] |= (15 << 5) | (1 << 10);
    let card = ready(config).await;
    assert_eq!(erase_group_size(&card), 32);
}

#[tokio::test]
async fn erased_value_follows_ext_csd() {
    let mut config = SimEmmcConfig::default();
    config.ext_csd[181] = 1;
    let card = ready(config).await;
    assert_eq!(erase_check(&card, &[0xFF; 64], 4), Ok(()));
    assert_eq!(
        erase_check(&card, &[0x00; 64], 4),
        Err(WidgetError::EraseMismatch { offset: 0, count: 5 })
    );
}

// ── Erase sweeps ────────────────────────────────────────────────────────────

#[tokio::test]
async fn erase_sweep_on_group_boundary() {
    let mut card = ready(SimEmmcConfig::default()).await;
    let config = WidgetConfig::default();
    let (wr, mut rd) = buffers(32, 1);
    test_erase(&mut card, &config, &wr, &mut rd).await.unwrap();
    // Group 3 was written but never erased.
    let sim = card.host();
    assert_eq!(sim.block(3 * 1024), wr[..512].to_vec());
    assert_eq!(sim.block(2 * 1024), vec![0; 512]);
}

#[tokio::test]
async fn erase_sweep_mid_group() {
    let mut card = ready(SimEmmcConfig::default()).await;
    let config = WidgetConfig {
        start_block: 1000,
        sector_count: 2000,
        ..WidgetConfig::default()
    };
    let (wr, mut rd) = buffers(32, 2);
    test_erase(&mut card, &config, &wr, &mut rd).await.unwrap();
}

#[tokio::test]
async fn secure_erase_sweep() {
    let mut card = ready(SimEmmcConfig::default()).await;
    let config = WidgetConfig {
        erase_type: EraseType::SecureErase,
        ..WidgetConfig::default()
    };
    let (wr, mut rd) = buffers(32, 3);
    test_erase(&mut card, &config, &wr, &mut rd).await.unwrap();
}

#[tokio::test]
async fn trim_sweep_keeps_tail() {
    let mut card = ready(SimEmmcConfig::default()).await;
    let config = WidgetConfig {
        erase_type: EraseType::Trim,
        ..WidgetConfig::default()
    };
    let (wr, mut rd) = buffers(32, 4);
    test_erase(&mut card, &config, &wr, &mut rd).await.unwrap();
    let sim = card.host();
    assert_eq!(sim.block(21), vec![0; 512]);
    assert_eq!(sim.block(22), wr[22 * 512..23 * 512].to_vec());
}

#[tokio::test]
async fn secure_trim_in_two_steps() {
    let mut card = ready(SimEmmcConfig::default()).await;
    let (wr, mut rd) = buffers(32, 5);
    let step1 = WidgetConfig {
        erase_type: EraseType::SecureTrim1,
        ..WidgetConfig::default()
    };
    test_erase(&mut card, &step1, &wr, &mut rd).await.unwrap();
    assert_eq!(card.host().block(0), wr[..512].to_vec());

    let step2 = WidgetConfig {
        erase_type: EraseType::SecureTrim2,
        ..WidgetConfig::default()
    };
    test_erase(&mut card, &step2, &wr, &mut rd).await.unwrap();
    assert_eq!(card.host().block(0), vec![0; 512]);
}

#[tokio::test]
async fn discard_sweep_skips_checks() {
    let mut card = ready(SimEmmcConfig::default()).await;
    let config = WidgetConfig {
        erase_type: EraseType::Discard,
        ..WidgetConfig::default()
    };
    let (wr, mut rd) = buffers(32, 6);
    test_erase(&mut card, &config, &wr, &mut rd).await.unwrap();
}

#[tokio::test]
async fn erase_sweep_needs_full_buffers() {
    let mut card = ready(SimEmmcConfig::default()).await;
    let (wr, mut rd) = buffers(8, 7);
    assert_eq!(
        test_erase(&mut card, &WidgetConfig::default(), &wr, &mut rd).await,
        Err(WidgetError::BufferTooSmall)
    );
}

// ── Write/read and benchmark ────────────────────────────────────────────────

fn small() -> WidgetConfig {
    WidgetConfig {
        block_count: 8,
        sector_count: 64,
        benchmark_loops: 2,
        ..WidgetConfig::default()
    }
}

#[tokio::test]
async fn write_read_sweep_passes() {
    let mut card = ready(SimEmmcConfig::default()).await;
    let (wr, mut rd) = buffers(8, 8);
    test_write_read(&mut card, &small(), &wr, &mut rd).await.unwrap();
    // Every step is bracketed by CMD5 sleep/awake.
    assert!(card.host().commands().iter().any(|(index, _)| *index == 5));
}

#[tokio::test]
async fn write_read_sweep_catches_bad_sampling() {
    let config = SimEmmcConfig {
        tx_window: 0b10,
        ..SimEmmcConfig::default()
    };
    let mut card = ready(config).await;
    let (wr, mut rd) = buffers(8, 9);
    assert!(matches!(
        test_write_read(&mut card, &small(), &wr, &mut rd).await,
        Err(WidgetError::DataMismatch { offset: 0, .. })
    ));
}

// ── Scatter/gather ──────────────────────────────────────────────────────────

#[tokio::test]
async fn scatter_sweep_passes() {
    let mut card = ready(SimEmmcConfig::default()).await;
    card.set_xfer_mode(XferMode::Pio);
    let (wr, mut rd) = buffers(8, 12);
    test_scatter_write_read(&mut card, &small(), 2, &wr, &mut rd)
        .await
        .unwrap();
    assert_eq!(card.host().xfer_mode(), XferMode::Adma);

    // Starts 0, 25 and 50; each moves all four segments in one CMD25/CMD18.
    let cmds = card.host().commands();
    for start in [0, 25, 50] {
        assert!(cmds.contains(&(25, start)));
        assert!(cmds.contains(&(18, start)));
    }
    assert!(!cmds.iter().any(|(index, _)| *index == 24 || *index == 17));
    assert_eq!(card.host().block(50), wr[..512].to_vec());
    assert_eq!(card.host().block(57), wr[7 * 512..].to_vec());
    assert_eq!(rd, wr);
}

#[tokio::test]
async fn scatter_sweep_catches_bad_sampling() {
    let config = SimEmmcConfig {
        tx_window: 0b10,
        ..SimEmmcConfig::default()
    };
    let mut card = ready(config).await;
    let (wr, mut rd) = buffers(8, 13);
    assert!(matches!(
        test_scatter_write_read(&mut card, &small(), 2, &wr, &mut rd).await,
        Err(WidgetError::DataMismatch { offset: 0, .. })
    ));
}

#[tokio::test]
async fn scatter_sweep_checks_geometry() {
    let mut card = ready(SimEmmcConfig::default()).await;
    let (wr, mut rd) = buffers(8, 14);
    let too_many = WidgetConfig {
        io_vector_count: 9,
        ..small()
    };
    assert_eq!(
        test_scatter_write_read(&mut card, &too_many, 1, &wr, &mut rd).await,
        Err(WidgetError::InvalidConfig)
    );
    assert_eq!(
        test_scatter_write_read(&mut card, &small(), 0, &wr, &mut rd).await,
        Err(WidgetError::InvalidConfig)
    );
    assert_eq!(
        test_scatter_write_read(&mut card, &small(), 4, &wr, &mut rd).await,
        Err(WidgetError::BufferTooSmall)
    );
}

#[tokio::test]
async fn benchmark_reports_each_count() {
    let mut card = ready(SimEmmcConfig::default()).await;
    let (wr, mut rd) = buffers(8, 10);
    let rows = benchmark_write_read(&mut card, &small(), &wr, &mut rd)
        .await
        .unwrap();
    let counts: Vec<u32> = rows.iter().map(|r| r.blocks).collect();
    assert_eq!(counts, [1, 4, 7]);
    assert!(rows.iter().all(|r| r.write_kb_s > 0 && r.read_kb_s > 0));
}

// ── Timing table ────────────────────────────────────────────────────────────

#[tokio::test]
async fn timing_calibrated_once_then_reused() {
    let config = SimEmmcConfig {
        tx_window: 0b0000_0011_1111_1000,
        rx_window: 0x00FF_0000,
        ..SimEmmcConfig::default()
    };
    let mut card = ready(config).await;
    let mut table = TimingScanTable::with_defaults();
    let mut buf = vec![0u8; 1024];

    let first = table
        .apply(&mut card, UhsMode::Ddr50, 48_000_000, BusWidth::Eight, &mut buf, 0, 2)
        .await
        .unwrap();
    assert_eq!(first, Some([6, 19]));
    assert!(table
        .find(UhsMode::Ddr50, 48_000_000, BusWidth::Eight)
        .unwrap()
        .valid);

    card.host_mut().clear_commands();
    card.host_mut().set_txrx_delay([0, 0]);
    let again = table
        .apply(&mut card, UhsMode::Ddr50, 48_000_000, BusWidth::Eight, &mut buf, 0, 2)
        .await
        .unwrap();
    assert_eq!(again, Some([6, 19]));
    assert!(card.host().commands().is_empty());
    assert_eq!(card.host().taps(), [6, 19]);
}

#[tokio::test]
async fn unlisted_setting_left_alone() {
    let mut card = ready(SimEmmcConfig::default()).await;
    let mut table = TimingScanTable::with_defaults();
    let mut buf = vec![0u8; 512];
    let out = table
        .apply(&mut card, UhsMode::Sdr25, 48_000_000, BusWidth::Four, &mut buf, 0, 1)
        .await
        .unwrap();
    assert_eq!(out, None);
    assert_eq!(card.host().taps(), [0, 0]);
}
