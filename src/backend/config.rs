use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use super::error::{CatalogueError, Result};

const APP_DIR: &str = "game-catalogue-tui";
const API_KEY_ENV: &str = "RAWG_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base: String,
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    /// Quiet period after the last scroll key before image downloads resume.
    pub scroll_settle_ms: u64,
    pub search_debounce_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: "https://api.rawg.io/api".to_string(),
            api_key: None,
            request_timeout_secs: 15,
            scroll_settle_ms: 200,
            search_debounce_ms: 300,
        }
    }
}

impl Config {
    /// Load `config.json` from the user's config directory, writing the
    /// defaults out the first time. `RAWG_API_KEY` wins over the file.
    pub fn load() -> Result<Self> {
        let path = app_dir(dirs::config_dir())?.join("config.json");

        let config = if path.exists() {
            let content = fs::read_to_string(&path)?;
            Self::parse(&content)
        } else {
            info!("No config file at {:?}, writing defaults", path);
            let config = Config::default();
            fs::write(&path, serde_json::to_string_pretty(&config)?)?;
            config
        };

        Ok(config.with_api_key_override(std::env::var(API_KEY_ENV).ok()))
    }

    fn parse(content: &str) -> Self {
        serde_json::from_str(content).unwrap_or_else(|e| {
            warn!("Failed to parse config, using defaults: {}", e);
            Config::default()
        })
    }

    fn with_api_key_override(mut self, key: Option<String>) -> Self {
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.api_key = Some(key);
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn scroll_settle(&self) -> Duration {
        Duration::from_millis(self.scroll_settle_ms)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }
}

pub fn favorites_db_path() -> Result<PathBuf> {
    Ok(app_dir(dirs::data_dir())?.join("favorites.db"))
}

pub fn log_path() -> Result<PathBuf> {
    Ok(app_dir(dirs::cache_dir())?.join("game-catalogue.log"))
}

fn app_dir(base: Option<PathBuf>) -> Result<PathBuf> {
    let dir = base
        .ok_or_else(|| CatalogueError::Config("could not determine home directories".to_string()))?
        .join(APP_DIR);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}
