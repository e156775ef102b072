use anyhow::Result;
use colored::Colorize;

use crate::step::cargo;

/// Arguments for `cargo doc` over the two library crates.
fn doc_args(open: bool) -> Vec<&'static str> {
    let mut args = vec![
        "doc",
        "-p",
        "apollo-hal",
        "-p",
        "sdio-widget",
        "--no-deps",
        "--features",
        "apollo-hal/std",
    ];
    if open {
        args.push("--open");
    }
    args
}

pub fn run(open: bool) -> Result<()> {
    println!();
    println!("{}", "📚 Building documentation...".cyan().bold());
    println!();

    cargo("Building documentation", &doc_args(open), false)?;

    if !open {
        println!(
            "   {}",
            "Open target/doc/apollo_hal/index.html in your browser".dimmed()
        );
        println!("   {}", "Or run 'cargo run -p xtask -- doc --open'".dimmed());
        println!();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_flag_is_appended() {
        assert_eq!(doc_args(false).last(), Some(&"apollo-hal/std"));
        assert_eq!(doc_args(true).last(), Some(&"--open"));
    }
}
