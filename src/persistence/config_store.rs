use super::SwitchboardConfig;
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const CONFIG_ENV: &str = "SWITCHBOARD_CONFIG";
const CONFIG_DIR: &str = "switchboard";
const CONFIG_FILE: &str = "config.toml";

/// `$SWITCHBOARD_CONFIG`, else `<config dir>/switchboard/config.toml`
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(path);
    }

    let mut path = dirs::config_dir().unwrap_or_else(|| {
        warn!("Could not determine config directory, using current directory");
        PathBuf::from(".")
    });
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    path
}

/// Reads the config, falling back to defaults if it is missing or broken
pub async fn load_config(path: &Path) -> SwitchboardConfig {
    match read_config(path).await {
        Ok(Some(config)) => {
            info!("Loaded config from {}", path.display());
            config
        }
        Ok(None) => {
            info!("No config at {}, using defaults", path.display());
            SwitchboardConfig::default()
        }
        Err(e) => {
            warn!("{:#}, using defaults", e);
            SwitchboardConfig::default()
        }
    }
}

async fn read_config(path: &Path) -> Result<Option<SwitchboardConfig>> {
    if !tokio::fs::try_exists(path)
        .await
        .map_err(|e| eyre!("Failed to check config file {}: {}", path.display(), e))?
    {
        return Ok(None);
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
    let config = toml::from_str(&content)
        .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
    Ok(Some(config))
}

pub async fn save_config(path: &Path, config: &SwitchboardConfig) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
    }

    let content = toml::to_string_pretty(config)
        .map_err(|e| eyre!("Failed to serialize config: {}", e))?;
    tokio::fs::write(path, content)
        .await
        .map_err(|e| eyre!("Failed to write config file {}: {}", path.display(), e))?;

    info!("Saved config to {}", path.display());
    Ok(())
}
