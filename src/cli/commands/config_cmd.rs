//! Configuration commands.

use std::path::Path;

use console::style;

use super::ConfigFormat;
use crate::cli::icons::arrow;
use loopguard::{ConfigFile, GuardConfig};

/// Print the effective configuration, defaults and overrides applied.
pub fn cmd_config_show(
    config: &GuardConfig,
    source: Option<&Path>,
    format: ConfigFormat,
) -> anyhow::Result<()> {
    let source = source
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults".to_string());
    eprintln!("{} Source: {}", arrow(), style(source).dim());

    let file = ConfigFile::from_guard_config(config);
    let rendered = match format {
        ConfigFormat::Toml => toml::to_string_pretty(&file)?,
        ConfigFormat::Json => serde_json::to_string_pretty(&file)?,
    };
    println!("{}", rendered.trim_end());
    Ok(())
}
