//! Serializable engine configuration.
//!
//! Loaded from TOML and threaded explicitly into the engine and the store;
//! nothing here is global.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use parflow_core::node::Op;
use parflow_core::store::{FsStore, RetryPolicy, StoreError, StoreLayout};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ─── Store ───────────────────────────────────────────────────────────

/// Where and how the filesystem store lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store root directory (default `parflow_tree`).
    pub root: PathBuf,
    /// File naming inside node directories.
    pub layout: StoreLayout,
    /// Read attempts after the first failure (default 10).
    pub read_retries: u32,
    /// Pause between read attempts in milliseconds (default 20).
    pub retry_backoff_ms: u64,
    /// Wipe the store before a run (default true).
    pub clear: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            root: PathBuf::from("parflow_tree"),
            layout: StoreLayout::default(),
            read_retries: retry.read_retries,
            retry_backoff_ms: retry.backoff_ms,
            clear: true,
        }
    }
}

impl StoreConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            read_retries: self.read_retries,
            backoff_ms: self.retry_backoff_ms,
        }
    }

    /// Open the configured store, creating its root if needed.
    pub fn open(&self) -> Result<FsStore, StoreError> {
        FsStore::open(&self.root, self.layout.clone(), self.retry_policy())
    }

    /// Same settings, another root.
    pub fn at(&self, root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..self.clone()
        }
    }
}

// ─── Engine ──────────────────────────────────────────────────────────

/// Map-reduce engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Units of work the leaves are split into (default 4).
    pub num_partitions: usize,
    /// Worker threads of the local engine (default 4).
    pub num_workers: usize,
    /// Operations every worker runs, in order (default fit then predict).
    pub ops: Vec<Op>,
    pub store: StoreConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_partitions: 4,
            num_workers: 4,
            ops: vec![Op::Fit, Op::Predict],
            store: StoreConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_partitions == 0 {
            return Err(ConfigError::Invalid("num_partitions must be at least 1".into()));
        }
        if self.num_workers == 0 {
            return Err(ConfigError::Invalid("num_workers must be at least 1".into()));
        }
        if self.ops.is_empty() {
            return Err(ConfigError::Invalid("ops must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ops, vec![Op::Fit, Op::Predict]);
        assert_eq!(config.store.layout.node_file, "__node__.json");
        assert_eq!(config.store.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = EngineConfig::from_toml(
            r#"
num_partitions = 3

[store]
root = "/tmp/tree"
read_retries = 2
"#,
        )
        .unwrap();
        assert_eq!(config.num_partitions, 3);
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.store.root, PathBuf::from("/tmp/tree"));
        assert_eq!(config.store.read_retries, 2);
        assert_eq!(config.store.retry_backoff_ms, 20);
        assert!(config.store.clear);
    }

    #[test]
    fn ops_parse_from_names() {
        let config = EngineConfig::from_toml(r#"ops = ["fit", "predict"]"#).unwrap();
        assert_eq!(config.ops, vec![Op::Fit, Op::Predict]);
    }

    #[test]
    fn toml_roundtrip() {
        let config = EngineConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(EngineConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn zero_partitions_rejected() {
        let err = EngineConfig::from_toml("num_partitions = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn layout_overrides_apply() {
        let config = EngineConfig::from_toml(
            r#"
[store.layout]
map_prefix = "__out__"
"#,
        )
        .unwrap();
        assert_eq!(config.store.layout.map_prefix, "__out__");
        assert_eq!(config.store.layout.suffix, ".json");
    }
}
