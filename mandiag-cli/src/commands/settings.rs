//! Configuration inspection command implementation.

use {
    crate::config::Config,
    anyhow::{Context, Result},
    console::style,
};

/// Config command implementation.
pub(crate) fn cmd_config(config: &Config, show: bool, path: bool) -> Result<()> {
    if path {
        match Config::global_config_path() {
            Some(path) => println!("{}", path.display()),
            None => eprintln!(
                "{} No configuration directory on this platform",
                style("⚠").yellow()
            ),
        }
    }

    if show || !path {
        let text = toml::to_string_pretty(config).context("Failed to serialize configuration")?;
        print!("{text}");
    }

    Ok(())
}
