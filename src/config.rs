//! Configuration types for hn-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upstream API settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL items are resolved against (default: "https://hacker-news.firebaseio.com/v0")
    ///
    /// Items are requested as `<base_url>/item/<id>.json`, the current maximum ID as
    /// `<base_url>/maxitem.json`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds (default: 30)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// User-Agent header sent with every request (default: "hn-dl/<version>")
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// How writes are grouped into SQLite transactions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStrategy {
    /// Every statement commits on its own; a crash loses only in-flight items
    PerItem,
    /// One transaction per batch, committed at the batch barrier; a crash loses
    /// the whole in-flight batch
    #[default]
    PerBatch,
}

impl std::str::FromStr for CommitStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "per_item" | "per-item" | "item" => Ok(CommitStrategy::PerItem),
            "per_batch" | "per-batch" | "batch" => Ok(CommitStrategy::PerBatch),
            other => Err(format!(
                "unknown commit strategy '{other}' (expected per_item or per_batch)"
            )),
        }
    }
}

/// Run parameters: which IDs to fetch and how hard to push
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    /// Highest ID to fetch, inclusive (None = the upstream's current max item)
    #[serde(default)]
    pub start_id: Option<i64>,

    /// Lowest ID to fetch, inclusive (default: 1)
    #[serde(default = "default_end_id")]
    pub end_id: i64,

    /// IDs per batch; the next batch starts only after this one is fully done (default: 1024)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum concurrently running fetch+write tasks (default: 96)
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,

    /// Transaction grouping for writes (default: per_batch)
    #[serde(default)]
    pub commit_strategy: CommitStrategy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            start_id: None,
            end_id: default_end_id(),
            batch_size: default_batch_size(),
            num_workers: default_num_workers(),
            commit_strategy: CommitStrategy::default(),
        }
    }
}

/// SQLite store settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "hn_data.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Trade crash safety for insert throughput (default: true)
    ///
    /// Enables WAL, `synchronous = OFF`, a large page cache and in-memory temp storage.
    #[serde(default = "default_true")]
    pub fast_writes: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            fast_writes: true,
        }
    }
}

/// Main configuration for [`Ingester`](crate::Ingester)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Upstream API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Run parameters
    #[serde(default)]
    pub run: RunConfig,

    /// SQLite store settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Load a configuration from a JSON file; missing keys take their defaults
    pub async fn from_json_file(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read(path).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config file '{}': {}", path.display(), e),
            ))
        })?;
        let config: Config = serde_json::from_slice(&raw)?;
        Ok(config)
    }

    /// Reject settings that cannot produce a meaningful run
    pub fn validate(&self) -> Result<()> {
        if self.run.batch_size == 0 {
            return Err(Error::config("run.batch_size", "batch size must be at least 1"));
        }
        if i64::try_from(self.run.batch_size).is_err() {
            return Err(Error::config(
                "run.batch_size",
                format!("batch size {} is too large", self.run.batch_size),
            ));
        }
        if self.run.num_workers == 0 {
            return Err(Error::config(
                "run.num_workers",
                "worker count must be at least 1",
            ));
        }
        if self.run.end_id < 1 {
            return Err(Error::config(
                "run.end_id",
                format!("end ID must be at least 1, got {}", self.run.end_id),
            ));
        }
        if let Some(start_id) = self.run.start_id
            && start_id < self.run.end_id
        {
            return Err(Error::config(
                "run.start_id",
                format!(
                    "start ID {} is below end ID {}",
                    start_id, self.run.end_id
                ),
            ));
        }
        self.api.parsed_base_url()?;
        Ok(())
    }
}

impl ApiConfig {
    /// Parse `base_url`, normalized to end with a slash so relative joins keep its path
    pub fn parsed_base_url(&self) -> Result<url::Url> {
        let mut base = self.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let url = url::Url::parse(&base).map_err(|e| {
            Error::config("api.base_url", format!("invalid base URL '{}': {}", self.base_url, e))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(Error::config(
                "api.base_url",
                format!("unsupported URL scheme '{scheme}'"),
            )),
        }
    }
}

// Default value functions
fn default_base_url() -> String {
    "https://hacker-news.firebaseio.com/v0".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("hn-dl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_end_id() -> i64 {
    1
}

fn default_batch_size() -> usize {
    1024
}

fn default_num_workers() -> usize {
    96
}

fn default_database_path() -> PathBuf {
    PathBuf::from("hn_data.db")
}

fn default_true() -> bool {
    true
}

// Duration as whole seconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
