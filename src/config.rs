use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::client::DEFAULT_BASE_URL;

/// Environment variable checked first for the API credential.
pub const API_KEY_ENV: &str = "LLM_API_KEY";

pub const DEFAULT_INDEX_DIR: &str = "knowledge_base/vector_db";

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    pub temperature: Option<f32>,
    pub index_dir: Option<PathBuf>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;

        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(&config_path, config_content)?;
        Ok(())
    }

    pub fn save_api_key(key: &str) -> Result<()> {
        let mut config = Self::load().unwrap_or_else(|_| Self::new());
        config.api_key = Some(key.to_string());
        config.save()
    }

    pub fn save_default_model(model: &str) -> Result<()> {
        let mut config = Self::load().unwrap_or_else(|_| Self::new());
        config.default_model = Some(model.to_string());
        config.save()
    }

    /// Resolve the credential: environment variable first, then the config
    /// file. `None` disables the generation path until a key is supplied
    /// interactively.
    pub fn resolve_api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| self.api_key.clone().filter(|k| !k.is_empty()))
    }

    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    /// Candidate index locations, in probe order: the configured directory,
    /// the working-directory default, then the per-user data directory.
    pub fn index_dir_candidates(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(dir) = &self.index_dir {
            candidates.push(dir.clone());
        }
        candidates.push(PathBuf::from(DEFAULT_INDEX_DIR));
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("kbchat").join("vector_db"));
        }
        candidates
    }

    pub fn log_dir() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("kbchat").join("logs"))
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("kbchat").join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_round_trips_through_json() {
        let config = Config {
            api_key: Some("sk-test".to_string()),
            base_url: None,
            default_model: Some("qwen-turbo".to_string()),
            temperature: Some(0.3),
            index_dir: Some(PathBuf::from("/tmp/idx")),
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.api_key.as_deref(), Some("sk-test"));
        assert_eq!(parsed.default_model.as_deref(), Some("qwen-turbo"));
        assert_eq!(parsed.index_dir, Some(PathBuf::from("/tmp/idx")));
    }

    #[test]
    fn test_empty_config_key_resolves_to_none() {
        let config = Config {
            api_key: Some(String::new()),
            ..Config::default()
        };
        // An empty key means absent, not present-but-blank.
        if std::env::var(API_KEY_ENV).is_err() {
            assert!(config.resolve_api_key().is_none());
        }
    }

    #[test]
    fn test_configured_index_dir_is_probed_first() {
        let config = Config {
            index_dir: Some(PathBuf::from("/data/custom")),
            ..Config::default()
        };
        let candidates = config.index_dir_candidates();
        assert_eq!(candidates[0], PathBuf::from("/data/custom"));
        assert!(candidates.contains(&PathBuf::from(DEFAULT_INDEX_DIR)));
    }
}
