//! User configuration loading for dh-coap.
//!
//! User config location: $XDG_CONFIG_HOME/dh-coap/dh-coap.toml
//! Fallback: the platform config directory (`~/.config` on Linux).

use std::path::{Path, PathBuf};

use super::settings::BridgeSettings;
use crate::error::{BridgeError, BridgeResult};

const APP_DIR: &str = "dh-coap";
const FILE_NAME: &str = "dh-coap.toml";

/// Returns the path to the user configuration file.
///
/// 1. If $XDG_CONFIG_HOME is set: $XDG_CONFIG_HOME/dh-coap/dh-coap.toml
/// 2. Otherwise: `dirs::config_dir()`/dh-coap/dh-coap.toml
///
/// Returns None if no config directory can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg_config.is_empty() {
            return Some(PathBuf::from(xdg_config).join(APP_DIR).join(FILE_NAME));
        }
    }

    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(FILE_NAME))
}

/// Load settings from an explicit file.
pub fn load_config_file(path: &Path) -> BridgeResult<BridgeSettings> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        BridgeError::config(format!("cannot read {}: {}", path.display(), e))
    })?;
    BridgeSettings::from_toml_str(&text)
        .map_err(|e| BridgeError::config(format!("{}: {}", path.display(), e)))
}

/// Load the user configuration file if it exists.
///
/// Returns `Ok(None)` when there is no user config; a file that exists but
/// does not parse is an error.
pub fn load_user_config() -> BridgeResult<Option<BridgeSettings>> {
    let Some(path) = user_config_path() else {
        return Ok(None);
    };
    if !path.exists() {
        log::debug!(
            target: "dh_coap::config",
            "No user config at {}",
            path.display()
        );
        return Ok(None);
    }
    load_config_file(&path).map(Some)
}
