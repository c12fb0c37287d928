//! Service configuration.
//!
//! Configuration is stored as TOML at `$XDG_CONFIG_HOME/chunkferry/chunkferry.toml`
//! (falling back to `~/.config`), or wherever `CHUNKFERRY_CONFIG` points.
//! A missing file is created with defaults on first start.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use chunkferry_archive_client::{ClientConfig, RetryPolicy};
use serde::{Deserialize, Serialize};

/// Service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the archive endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Attempts per request before a chunk counts as failed.
    #[serde(default = "default_request_retries")]
    pub request_retries: u32,

    /// Chunk size for newly registered files, in kilobytes (1 KB = 1000 bytes).
    #[serde(default = "default_chunk_size_kb")]
    pub chunk_size_kb: u32,

    /// Records advanced in parallel.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Pause between passes, in seconds.
    #[serde(default = "default_pass_interval")]
    pub pass_interval_secs: u64,

    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,

    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Files registered for transfer at startup. A file is sent again only
    /// when its content changed since it was last archived.
    #[serde(default)]
    pub sources: Vec<PathBuf>,

    /// Pre-issued session token. Takes precedence over `username`/`credential_hash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_hash: Option<String>,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080/api".into()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    60
}

fn default_request_retries() -> u32 {
    3
}

fn default_chunk_size_kb() -> u32 {
    chunkferry_transfer::DEFAULT_CHUNK_SIZE_KB
}

fn default_workers() -> usize {
    2
}

fn default_pass_interval() -> u64 {
    30
}

fn default_catalog_path() -> PathBuf {
    data_dir().join("catalog.json")
}

fn default_staging_dir() -> PathBuf {
    data_dir().join("staging")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            request_retries: default_request_retries(),
            chunk_size_kb: default_chunk_size_kb(),
            workers: default_workers(),
            pass_interval_secs: default_pass_interval(),
            catalog_path: default_catalog_path(),
            staging_dir: default_staging_dir(),
            sources: Vec::new(),
            session_token: None,
            username: None,
            credential_hash: None,
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            let config = Config::default();
            config.save_to(&path)?;
            tracing::info!(path = %path.display(), "wrote default configuration");
            Ok(config)
        }
    }

    /// Loads and validates configuration from `path`.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // May hold a session token or credential hash.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Rejects values the service cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_url.trim().is_empty() {
            bail!("base_url must not be empty");
        }
        if self.chunk_size_kb == 0 {
            bail!("chunk_size_kb must be positive");
        }
        if self.request_retries == 0 {
            bail!("request_retries must be positive");
        }
        if self.workers == 0 {
            bail!("workers must be positive");
        }
        Ok(())
    }

    /// Settings for the archive client.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            request_retries: self.request_retries,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Returns the configuration file path.
fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os("CHUNKFERRY_CONFIG") {
        return PathBuf::from(path);
    }
    base_dir("XDG_CONFIG_HOME", ".config")
        .join("chunkferry")
        .join("chunkferry.toml")
}

/// Directory for the catalog and staged copies.
fn data_dir() -> PathBuf {
    base_dir("XDG_DATA_HOME", ".local/share").join("chunkferry")
}

fn base_dir(xdg_var: &str, home_relative: &str) -> PathBuf {
    std::env::var_os(xdg_var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|h| PathBuf::from(h).join(home_relative))
        })
        .unwrap_or_else(|| std::env::temp_dir().join(home_relative))
}
