use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::core::error::{Error, ErrorKind, Result, ResultExt};

/// Substitution marker inside `local_url` / `remote_url` templates.
pub const PLACEHOLDER: &str = "%s";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gapps: GappsConfig,
    pub queue: QueueConfig,
}

/// Filename parsing parameters and mirror tiers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GappsConfig {
    pub prefix: String,
    pub time_format: String,
    pub local_path: Option<PathBuf>,
    pub local_url: Option<String>,
    pub remote_url: Option<String>,
}

impl Default for GappsConfig {
    fn default() -> Self {
        Self {
            prefix: "open_gapps".to_string(),
            time_format: "%Y%m%d".to_string(),
            local_path: None,
            local_url: None,
            remote_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub temp_dir: Option<PathBuf>,
    pub max_workers: usize,
    pub concurrency: usize,
    pub chunk_mb: u64,
    pub retry_backoff_ms: u64,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            max_workers: 4,
            concurrency: 6,
            chunk_mb: 8,
            retry_backoff_ms: 400,
            timeout_secs: 60,
            user_agent: concat!("gapps-mirror/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .context_kind(ErrorKind::Config, &format!("unable to read config {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(raw).context_kind(ErrorKind::Config, "unable to parse config")?;
        let cfg = cfg.normalized();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Empty strings in the file mean "not configured".
    pub fn normalized(mut self) -> Self {
        self.gapps.local_path = self.gapps.local_path.filter(|p| !p.as_os_str().is_empty());
        self.gapps.local_url = self.gapps.local_url.filter(|u| !u.is_empty());
        self.gapps.remote_url = self.gapps.remote_url.filter(|u| !u.is_empty());
        self.queue.temp_dir = self.queue.temp_dir.filter(|p| !p.as_os_str().is_empty());
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.gapps.validate()?;
        if self.queue.max_workers == 0 {
            return Err(Error::new(ErrorKind::Config, "queue.max_workers must be at least 1"));
        }
        if self.queue.chunk_mb == 0 {
            return Err(Error::new(ErrorKind::Config, "queue.chunk_mb must be at least 1"));
        }
        Ok(())
    }
}

impl GappsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.time_format.is_empty() {
            return Err(Error::new(ErrorKind::Config, "gapps.time_format is empty"));
        }
        if let Some(tpl) = &self.local_url {
            check_template("gapps.local_url", tpl)?;
            if self.local_path.is_none() {
                return Err(Error::new(ErrorKind::Config, "gapps.local_url requires gapps.local_path"));
            }
        }
        if let Some(tpl) = &self.remote_url {
            check_template("gapps.remote_url", tpl)?;
        }
        Ok(())
    }
}

impl QueueConfig {
    pub fn chunk_size(&self) -> u64 {
        self.chunk_mb.max(1) * 1024 * 1024
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

pub fn check_template(key: &str, template: &str) -> Result<()> {
    match template.matches(PLACEHOLDER).count() {
        1 => Ok(()),
        n => Err(Error::new(
            ErrorKind::Config,
            format!("{key} must contain exactly one {PLACEHOLDER} placeholder, found {n}"),
        )),
    }
}

pub fn fill_template(template: &str, value: &str) -> String {
    template.replacen(PLACEHOLDER, value, 1)
}
