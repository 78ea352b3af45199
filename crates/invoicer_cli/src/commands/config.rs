use invoicer_core::config::{self, InvoicerConfig};
use miette::{IntoDiagnostic, Result};
use owo_colors::OwoColorize;
use std::path::Path;

use crate::output::Output;

/// Show current configuration
pub async fn show(config: &InvoicerConfig) -> Result<()> {
    let output = Output::new();

    output.section("Current Configuration");
    println!();

    let toml_str = toml::to_string_pretty(config).into_diagnostic()?;
    println!("{}", toml_str);

    Ok(())
}

/// Save current configuration to file
pub async fn save(config: &InvoicerConfig, path: &Path) -> Result<()> {
    let output = Output::new();

    output.info("Saving configuration to:", &path.display().to_string());
    config::save_config(config, path).await?;

    output.success("Configuration saved successfully!");
    println!();
    println!("To use this configuration, run:");
    println!(
        "  {} --config {}",
        "invoicer".bright_green(),
        path.display()
    );

    Ok(())
}
