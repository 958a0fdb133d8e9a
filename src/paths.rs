//! Centralized path resolution for mongoform
//!
//! # Environment Variables
//!
//! - `MONGOFORM_CONFIG_DIR` - Override config directory
//! - `MONGOFORM_STATE_DIR` - Override state directory
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `MONGOFORM_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/mongoform` (if set)
//! 3. `~/.config/mongoform`
//!
//! For state_dir():
//! 1. `MONGOFORM_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/mongoform` (if set)
//! 3. `~/.local/state/mongoform`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "MONGOFORM_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "MONGOFORM_STATE_DIR";

/// Get the mongoform config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!("Using config dir from {}: {}", ENV_CONFIG_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME")
        && !xdg.is_empty()
    {
        return Ok(PathBuf::from(xdg).join("mongoform"));
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("mongoform"))
}

/// Get the mongoform state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg) = std::env::var("XDG_STATE_HOME")
        && !xdg.is_empty()
    {
        return Ok(PathBuf::from(xdg).join("mongoform"));
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".local").join("state").join("mongoform"))
}

/// Default path of the desired-state document
pub fn document_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("host.toml"))
}

/// Expand ~ and environment variables in a path string
pub fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::full(path).map_or_else(|_| path.to_string(), |p| p.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        let expanded = expand("~/data");
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_expand_plain_path() {
        assert_eq!(expand("/data/db"), PathBuf::from("/data/db"));
    }
}
