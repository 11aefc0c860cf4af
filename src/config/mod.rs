pub mod persist;

pub use dc_core::config::*;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Locations searched when no config path is given, in order.
const DEFAULT_PATHS: [&str; 3] = [
    "./dropconvert.toml",
    "./config.toml",
    "~/.config/dropconvert/config.toml",
];

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    prepare(&mut config)?;
    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    if let Some(path) = find_config() {
        tracing::debug!(path = %path.display(), "using config file");
        return load_config(&path);
    }

    let mut config = Config::default();
    prepare(&mut config)?;
    Ok(config)
}

/// First existing file among the default locations.
pub fn find_config() -> Option<PathBuf> {
    DEFAULT_PATHS
        .iter()
        .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
        .find(|p| p.is_file())
}

fn prepare(config: &mut Config) -> Result<()> {
    config.conversion.default_dest_dir = expand_tilde(&config.conversion.default_dest_dir);
    if let Some(path) = config.tools.ffmpeg_path.as_mut() {
        *path = expand_tilde(path);
    }
    if let Some(path) = config.tools.magick_path.as_mut() {
        *path = expand_tilde(path);
    }

    config.check().context("Invalid configuration")?;

    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }
    Ok(())
}

fn expand_tilde(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => PathBuf::from(shellexpand::tilde(s).as_ref()),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.queue, QueueConfig::default());
        assert!(config.conversion.default_dest_dir.is_absolute() || std::env::var("HOME").is_err());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[queue]\nconcurrency_limit = 0\n").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("concurrency_limit"));
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[queue\n").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }
}
