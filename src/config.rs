use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::crypto::MasterSecret;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MnemoConfig {
    pub storage: StorageConfig,
    pub security: SecurityConfig,
    pub embedding: EmbeddingConfig,
    pub ingestion: IngestionConfig,
    pub retention: RetentionConfig,
    pub retrieval: RetrievalConfig,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

/// Master secret source. Exactly one of `master_secret_env` or
/// `master_secret_file` must resolve to a non-empty value; there is no
/// built-in default for key material.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SecurityConfig {
    pub master_secret_env: Option<String>,
    pub master_secret_file: Option<String>,
    /// Seconds of owner inactivity before cached key material is purged.
    pub key_idle_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible embeddings endpoint.
    pub endpoint: String,
    pub model: String,
    pub api_key_env: Option<String>,
    /// Per-request deadline in seconds.
    pub timeout_secs: u64,
    /// Retry attempts for transient failures during ingestion.
    pub max_retries: u32,
    /// Base backoff delay in milliseconds, doubled per attempt.
    pub backoff_base_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestionConfig {
    /// Hard ceiling on a single ingestion payload, in bytes.
    pub max_payload_bytes: usize,
    /// Upper bound on chunk size, in characters.
    pub max_chunk_chars: usize,
    /// Documents longer than this get an extractive summary item.
    pub summary_threshold_chars: usize,
    /// Character budget for a summary item.
    pub summary_max_chars: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetentionConfig {
    /// Per-owner item capacity.
    pub max_items: usize,
    /// Items younger than this are never evicted (explicit wipe excepted).
    pub min_retain_age_secs: i64,
    /// Periodic sweep interval.
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Hard cap on `k` for a recall request.
    pub max_k: usize,
    /// Blend weight for cosine similarity in the final ranking.
    pub similarity_weight: f64,
    /// Blend weight for the recency decay factor.
    pub recency_weight: f64,
    /// Half-life of the recency decay, in seconds.
    pub recency_half_life_secs: f64,
    /// Row bound for the keyword fallback scan.
    pub fallback_scan_limit: usize,
}

impl Default for MnemoConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            security: SecurityConfig::default(),
            embedding: EmbeddingConfig::default(),
            ingestion: IngestionConfig::default(),
            retention: RetentionConfig::default(),
            retrieval: RetrievalConfig::default(),
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_mnemo_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            master_secret_env: Some("MNEMO_MASTER_SECRET".into()),
            master_secret_file: None,
            key_idle_secs: 900,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8089/v1".into(),
            model: "all-MiniLM-L6-v2".into(),
            api_key_env: None,
            timeout_secs: 10,
            max_retries: 3,
            backoff_base_ms: 250,
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 2 * 1024 * 1024,
            max_chunk_chars: 2000,
            summary_threshold_chars: 6000,
            summary_max_chars: 600,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_items: 5000,
            min_retain_age_secs: 3600,
            sweep_interval_secs: 600,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_k: 12,
            similarity_weight: 0.75,
            recency_weight: 0.25,
            recency_half_life_secs: 7.0 * 24.0 * 3600.0,
            fallback_scan_limit: 500,
        }
    }
}

/// Returns `~/.mnemo/`
pub fn default_mnemo_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".mnemo")
}

/// Returns the default config file path: `~/.mnemo/config.toml`
pub fn default_config_path() -> PathBuf {
    default_mnemo_dir().join("config.toml")
}

impl MnemoConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MnemoConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (MNEMO_DB, MNEMO_EMBED_ENDPOINT,
    /// MNEMO_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MNEMO_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("MNEMO_EMBED_ENDPOINT") {
            self.embedding.endpoint = val;
        }
        if let Ok(val) = std::env::var("MNEMO_LOG_LEVEL") {
            self.log_level = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    /// Resolve the master secret from the configured source.
    ///
    /// Security-relevant, so there is no silent default: an unset or empty
    /// secret is a hard error, not a fallback.
    pub fn resolve_master_secret(&self) -> crate::error::Result<MasterSecret> {
        if let Some(ref var) = self.security.master_secret_env {
            if let Ok(value) = std::env::var(var) {
                if !value.is_empty() {
                    return Ok(MasterSecret::new(value.into_bytes()));
                }
            }
        }
        if let Some(ref file) = self.security.master_secret_file {
            let bytes = std::fs::read(expand_tilde(file))?;
            if !bytes.is_empty() {
                return Ok(MasterSecret::new(bytes));
            }
        }
        Err(crate::error::MemoryError::Config(
            "no master secret configured: set security.master_secret_env or \
             security.master_secret_file"
                .into(),
        ))
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}
