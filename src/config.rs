use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::SyncError;
use crate::transfer::Endpoint;
use crate::util::RetryPolicy;

pub const DEFAULT_PORT: u16 = 21;

/// One (remote_path, search_pattern) unit of work.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileGroup {
    pub remote_path: String,
    /// Regex searched anywhere in the remote file path; empty keeps everything.
    #[serde(default)]
    pub search_pattern: String,
}

/// Which processed files feed the next run's cutoff.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointScope {
    /// Only the files of the last group iterated (historical behavior).
    #[default]
    LastGroup,
    AllGroups,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SyncConfig {
    pub host: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_port", deserialize_with = "deserialize_port")]
    pub port: u16,
    pub target_dir: PathBuf,
    #[serde(default)]
    pub incremental_mode: bool,
    #[serde(default)]
    pub start_date: Option<String>,
    // flat `tables` list kept for older configs
    #[serde(default)]
    pub tables: Vec<FileGroup>,
    #[serde(default)]
    pub file_groups: Vec<FileGroup>,
    #[serde(default)]
    pub checkpoint_scope: CheckpointScope,
    #[serde(default)]
    pub tls_verify: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> usize {
    10
}

fn default_backoff_secs() -> u64 {
    5
}

/// Accept `21`, `"21"`, `""` or `null`; blank values fall back to the default port.
fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    let v = serde_json::Value::deserialize(deserializer)?;
    match v {
        serde_json::Value::Null => Ok(DEFAULT_PORT),
        serde_json::Value::Number(n) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .filter(|p| *p != 0)
            .ok_or_else(|| D::Error::custom(format!("invalid port: {}", n))),
        serde_json::Value::String(s) if s.trim().is_empty() => Ok(DEFAULT_PORT),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| D::Error::custom(format!("invalid port: {}", s))),
        other => Err(D::Error::custom(format!("invalid port: {}", other))),
    }
}

impl SyncConfig {
    pub fn read_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let config: SyncConfig = serde_json::from_str(&raw)
            .with_context(|| format!("cannot parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), SyncError> {
        if self.host.trim().is_empty() {
            return Err(SyncError::Config("host is empty".to_string()));
        }
        if self.target_dir.as_os_str().is_empty() {
            return Err(SyncError::Config("target_dir is empty".to_string()));
        }
        if self.groups().is_empty() {
            return Err(SyncError::Config("no file_groups or tables configured".to_string()));
        }
        if let Some(g) = self.groups().iter().find(|g| g.remote_path.trim().is_empty()) {
            return Err(SyncError::Config(format!(
                "remote_path is empty (search_pattern '{}')",
                g.search_pattern
            )));
        }
        Ok(())
    }

    /// `file_groups` when present, otherwise the flat `tables` list.
    pub fn groups(&self) -> &[FileGroup] {
        if self.file_groups.is_empty() { &self.tables } else { &self.file_groups }
    }

    /// Configured `start_date`, only meaningful in incremental mode.
    pub fn start_date(&self) -> std::result::Result<Option<NaiveDateTime>, SyncError> {
        match self.start_date.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => crate::parse::parse_cutoff(s).map(Some),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.trim().to_string(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_step: Duration::from_secs(self.backoff_secs),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}
