use anyhow::Result;
use colored::Colorize;
use std::time::Instant;

use crate::step::{cargo, TARGET};

pub fn run() -> Result<()> {
    println!();
    println!("{}", "🔍 Checking HAL and widget builds...".cyan().bold());
    println!();

    let total_start = Instant::now();

    cargo(
        "Checking apollo-hal (Apollo5 target)",
        &[
            "check",
            "-p",
            "apollo-hal",
            "--target",
            TARGET,
            "--features",
            "hardware,defmt",
        ],
        false,
    )?;

    cargo(
        "Checking sdio-widget (Apollo5 target)",
        &[
            "check",
            "-p",
            "sdio-widget",
            "--target",
            TARGET,
            "--features",
            "defmt",
        ],
        false,
    )?;

    cargo(
        "Checking host build with simulated card",
        &["check", "-p", "apollo-hal", "--features", "std"],
        false,
    )?;

    cargo(
        "Running clippy lints",
        &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
        true,
    )?;

    cargo("Checking code formatting", &["fmt", "--all", "--check"], true)?;

    println!(
        "{}",
        format!(
            "✓ All checks completed in {:.2}s",
            total_start.elapsed().as_secs_f64()
        )
        .green()
        .bold()
    );
    println!();

    Ok(())
}
