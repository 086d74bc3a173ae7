use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::DOMAIN_LEN;
use crate::{MobileDevice, MobileError, parse_domain};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct MobileSettings {
    pub device: MobileDevice,
    /// Replacement for the ISP mail domain; must be 10 characters.
    pub server_domain: Option<String>,
    /// Where the built-in host persists configuration memory.
    pub config_path: Option<PathBuf>,
    /// Clock used for serial timeouts. Zero disables them.
    pub frequency_hz: u32,
}

impl MobileSettings {
    pub fn replacement_domain(&self) -> Result<Option<[u8; DOMAIN_LEN]>, MobileError> {
        self.server_domain.as_deref().map(parse_domain).transpose()
    }
}

pub fn default_settings_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("mobilegb");
        }
    }

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("mobilegb");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home).join(".config").join("mobilegb");
    }

    PathBuf::new()
}

pub fn default_settings_path() -> PathBuf {
    default_settings_dir().join("mobile.toml")
}

/// Loads settings, falling back to defaults on any error.
pub fn load_from_file(path: &Path) -> MobileSettings {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => return MobileSettings::default(),
    };

    match toml::from_str::<MobileSettings>(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(
                target: "mobile",
                "Failed to parse mobile settings {}: {e}; using defaults",
                path.display()
            );
            MobileSettings::default()
        }
    }
}

pub fn try_load_from_file(path: &Path) -> Result<MobileSettings, MobileError> {
    let text = std::fs::read_to_string(path)?;
    let settings: MobileSettings = toml::from_str(&text)?;
    settings.replacement_domain()?;
    Ok(settings)
}

pub fn save_to_file(path: &Path, cfg: &MobileSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let text = toml::to_string_pretty(cfg).map_err(std::io::Error::other)?;
    std::fs::write(path, text)
}
