use anyhow::{Context, Result};
use colored::Colorize;
use std::process::{Command, Output};
use std::time::Instant;

/// Cortex-M55 target the Apollo5 firmware builds for.
pub const TARGET: &str = "thumbv8m.main-none-eabihf";

/// Runs `cargo <args>` and reports the outcome under `label`.
///
/// A failing step aborts the task unless `soft` is set, in which case the
/// output is shown as a warning.
pub fn cargo(label: &str, args: &[&str], soft: bool) -> Result<Output> {
    println!("{}", format!("  {label}...").cyan());
    let start = Instant::now();

    let output = Command::new("cargo")
        .args(args)
        .output()
        .with_context(|| format!("Failed to run {label}"))?;

    if output.status.success() {
        println!(
            "{}",
            format!(
                "  ✓ {label} passed in {:.2}s",
                start.elapsed().as_secs_f64()
            )
            .green()
        );
    } else if soft {
        eprintln!("{}", format!("  ⚠ {label} reported problems").yellow().bold());
        eprintln!();
        eprintln!("{}", String::from_utf8_lossy(&output.stderr));
    } else {
        eprintln!("{}", format!("  ✗ {label} failed").red().bold());
        eprintln!();
        eprintln!("{}", String::from_utf8_lossy(&output.stderr));
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            eprintln!("  {}", line);
        }
        anyhow::bail!("{label} failed");
    }
    println!();

    Ok(output)
}

/// Pulls `ok. 5 passed; 0 failed; ...` out of libtest output.
pub fn test_summary(output: &str) -> String {
    output
        .lines()
        .rev()
        .find_map(|line| line.split("test result:").nth(1))
        .map(str::trim)
        .unwrap_or("(summary not available)")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_takes_last_result_line() {
        let out = "running 2 tests\ntest result: ok. 2 passed; 0 failed\n\
                   running 1 test\ntest result: ok. 1 passed; 0 failed\n";
        assert_eq!(test_summary(out), "ok. 1 passed; 0 failed");
    }

    #[test]
    fn summary_missing() {
        assert_eq!(test_summary("no tests"), "(summary not available)");
    }
}
