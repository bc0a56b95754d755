//! Runtime configuration
//!
//! Every field has a default, so an empty or missing file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheSettings;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Quiet period before a configuration change is recompiled
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_cache_sweep_secs")]
    pub cache_sweep_secs: u64,

    /// Entry count above which a sweep also evicts the oldest entries
    #[serde(default = "default_cache_high_water")]
    pub cache_high_water: usize,

    /// Per-target distribution state
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Compiled payloads, one file per target
    #[serde(default = "default_rules_dir")]
    pub rules_dir: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_sweep_secs: default_cache_sweep_secs(),
            cache_high_water: default_cache_high_water(),
            state_dir: default_state_dir(),
            rules_dir: default_rules_dir(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_cache_ttl_secs() -> u64 {
    120
}

fn default_cache_sweep_secs() -> u64 {
    60
}

fn default_cache_high_water() -> usize {
    1200
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".cbsync/state")
}

fn default_rules_dir() -> PathBuf {
    PathBuf::from(".cbsync/rules")
}

impl SyncConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn debounce_period(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            ttl: Duration::from_secs(self.cache_ttl_secs),
            sweep_period: Duration::from_secs(self.cache_sweep_secs),
            high_water: self.cache_high_water,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.debounce_period(), Duration::from_millis(500));
        let cache = config.cache_settings();
        assert_eq!(cache.ttl, Duration::from_secs(120));
        assert_eq!(cache.sweep_period, Duration::from_secs(60));
        assert_eq!(cache.high_water, 1200);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: SyncConfig = toml::from_str("cache_ttl_secs = 30\nrules_dir = \"/tmp/rules\"")
            .expect("config should parse");
        assert_eq!(config.cache_ttl_secs, 30);
        assert_eq!(config.rules_dir, PathBuf::from("/tmp/rules"));
        assert_eq!(config.debounce_ms, 500);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SyncConfig::load(&dir.path().join("cbsync.toml")).expect("defaults");
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cbsync.toml");
        std::fs::write(&path, "debounce_ms = \"soon\"").expect("write");
        assert!(SyncConfig::load(&path).is_err());
    }
}
