use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per segment (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 0.25,
            max_delay_secs: 30,
        }
    }
}

/// What to do with already-written output when a merge fails partway.
/// `Keep` leaves the `.part` file in place so the prefix can be inspected
/// or salvaged; `Discard` removes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialOutputPolicy {
    #[default]
    Keep,
    Discard,
}

/// Global configuration loaded from `~/.config/tsrip/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RipConfig {
    /// Maximum number of segment fetches in flight at once.
    pub concurrency: usize,
    /// Hard wall-clock timeout per segment fetch, in seconds.
    pub per_fetch_timeout_secs: u64,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Disposition of partial output when a merge fails.
    #[serde(default)]
    pub partial_output: PartialOutputPolicy,
    /// Optional per-connection receive cap in bytes per second (None = no cap).
    #[serde(default)]
    pub max_bytes_per_sec: Option<u64>,
    /// Optional curl receive buffer size in bytes (None = library default).
    #[serde(default)]
    pub fetch_buffer_bytes: Option<usize>,
}

impl Default for RipConfig {
    fn default() -> Self {
        Self {
            concurrency: 12,
            per_fetch_timeout_secs: 120,
            retry: None,
            partial_output: PartialOutputPolicy::Keep,
            max_bytes_per_sec: None,
            fetch_buffer_bytes: None,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("tsrip")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<RipConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = RipConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: RipConfig = toml::from_str(&data)?;
    Ok(cfg)
}
