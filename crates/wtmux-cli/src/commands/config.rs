//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::output::{print_error, print_info, print_success, print_warning};
use wtmux_core::config::{self, MuxConfig};

fn resolve_path(config_path: Option<&PathBuf>) -> PathBuf {
    config_path.cloned().unwrap_or_else(config::default_config_path)
}

/// Load the configuration in effect, falling back to defaults when no file exists
pub fn load_effective(config_path: Option<&PathBuf>) -> Result<MuxConfig> {
    let path = resolve_path(config_path);
    if !path.exists() {
        tracing::debug!("No config file at {:?}, using defaults", path);
        return Ok(MuxConfig::default());
    }

    let config: MuxConfig =
        config::load_config(&path).with_context(|| format!("Failed to load config: {:?}", path))?;
    config
        .validate()
        .with_context(|| format!("Invalid config: {:?}", path))?;
    Ok(config)
}

/// Show the effective configuration as TOML
pub fn config_show(config_path: Option<&PathBuf>) -> Result<()> {
    let path = resolve_path(config_path);
    if path.exists() {
        print_info(&format!("Configuration file: {:?}", path));
    } else {
        print_warning(&format!("No configuration file found at {:?}, showing defaults", path));
    }
    println!();

    let config = load_effective(config_path)?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// Get a config value by key
pub fn config_get(config_path: Option<&PathBuf>, key: &str) -> Result<()> {
    let config = load_effective(config_path)?;
    let table = toml::Table::try_from(&config)?;

    match table.get(key) {
        Some(toml::Value::String(s)) => println!("{}", s),
        Some(value) => println!("{}", value),
        None => print_error(&format!("Key not found: {}", key)),
    }
    Ok(())
}

/// Set a config value by key
///
/// The file is rewritten only if the result still parses and validates.
pub fn config_set(config_path: Option<&PathBuf>, key: &str, value: &str) -> Result<()> {
    let path = resolve_path(config_path);
    let mut table = toml::Table::try_from(&load_effective(config_path)?)?;

    if !table.contains_key(key) {
        anyhow::bail!("Unknown config key: {}", key);
    }

    let toml_value = match value.parse::<i64>() {
        Ok(i) => toml::Value::Integer(i),
        Err(_) => toml::Value::String(value.to_string()),
    };
    table.insert(key.to_string(), toml_value);

    let updated: MuxConfig = table
        .try_into()
        .with_context(|| format!("Invalid value for {}: {}", key, value))?;
    updated.validate()?;

    config::save_config(&path, &updated)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;
    print_success(&format!("Set {} = {}", key, value));
    Ok(())
}

/// Write a configuration file holding the defaults
pub fn config_init(config_path: Option<&PathBuf>, force: bool) -> Result<()> {
    let path = resolve_path(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    write_defaults(&path)?;
    print_success(&format!("Created configuration file: {:?}", path));
    Ok(())
}

fn write_defaults(path: &Path) -> Result<()> {
    config::save_config(path, &MuxConfig::default())
        .with_context(|| format!("Failed to write config file: {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = load_effective(Some(&path)).unwrap();
        assert_eq!(config, MuxConfig::default());
    }

    #[test]
    fn test_set_updates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        config_set(Some(&path), "stream_reordering_timeout", "750").unwrap();

        let config = load_effective(Some(&path)).unwrap();
        assert_eq!(config.stream_reordering_timeout, Duration::from_millis(750));
    }

    #[test]
    fn test_set_rejects_unknown_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        assert!(config_set(Some(&path), "bind_address", "0.0.0.0:443").is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_set_rejects_invalid_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        assert!(config_set(Some(&path), "stream_reordering_timeout", "0").is_err());
        assert!(config_set(Some(&path), "max_capsule_size", "large").is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_init_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "accept_backlog_warning = 8\n").unwrap();

        config_init(Some(&path), false).unwrap();
        assert_eq!(load_effective(Some(&path)).unwrap().accept_backlog_warning, 8);

        config_init(Some(&path), true).unwrap();
        assert_eq!(load_effective(Some(&path)).unwrap(), MuxConfig::default());
    }
}
