//! Configuration types for the sync engine and its adapters.
//!
//! Values are resolved in layers: built-in defaults, then an optional
//! `sync.toml` file, then environment variables and CLI flags (applied by the
//! binary through the `with_*` builders). The resulting [`SyncConfig`] is
//! immutable once handed to a service.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

/// Largest page the searchAnalytics endpoint will return.
pub const MAX_PAGE_SIZE: u32 = 25_000;

// =============================================================================
// Search Type / Data State
// =============================================================================

/// The category of search result the fetched metrics pertain to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchType {
    #[default]
    Web,
    Image,
    Video,
    News,
    Discover,
    GoogleNews,
}

impl SearchType {
    /// Returns the API spelling, also used for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Image => "image",
            Self::Video => "video",
            Self::News => "news",
            Self::Discover => "discover",
            Self::GoogleNews => "googleNews",
        }
    }

    /// Parses a comma-separated list such as `"web, image"`.
    pub fn parse_list(s: &str) -> Result<Vec<Self>, AppError> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "web" => Ok(Self::Web),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "news" => Ok(Self::News),
            "discover" => Ok(Self::Discover),
            "googlenews" => Ok(Self::GoogleNews),
            _ => Err(AppError::ConfigError(format!(
                "Unknown search type: '{}'. Valid options: web, image, video, news, discover, googleNews",
                s
            ))),
        }
    }
}

/// Whether to include fresh (not yet finalized) data in query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataState {
    #[default]
    All,
    Final,
}

impl DataState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Final => "final",
        }
    }
}

impl fmt::Display for DataState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataState {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "final" => Ok(Self::Final),
            _ => Err(AppError::ConfigError(format!(
                "Unknown data state: '{}'. Valid options: all, final",
                s
            ))),
        }
    }
}

// =============================================================================
// Adapter Configuration
// =============================================================================

/// Database connection pool configuration.
pub struct DbConfig {
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { max_connections: 5 }
    }
}

/// HTTP client configuration for the analytics API.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Sync Configuration
// =============================================================================

/// Immutable configuration of the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How far back the first sync of a task reaches.
    pub lookback_days: u32,
    /// Days the provider lags behind; the newest owed day is `today - latency`.
    pub api_latency_days: u32,
    /// Maximum width of one fetched chunk.
    pub chunk_size_days: u32,
    /// Rows requested per page.
    pub page_size: u32,
    /// Maximum attempts per page request, first call included.
    pub max_retries: u32,
    /// Base of the exponential backoff between attempts.
    pub retry_base_delay: Duration,
    /// Elapsed time after which a pending/running job is declared stalled.
    pub job_timeout_minutes: u32,
    /// Result types synced for every site.
    pub search_types: Vec<SearchType>,
    pub data_state: DataState,
    /// Directory receiving captured worker output.
    pub log_dir: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lookback_days: 480,
            api_latency_days: 3,
            chunk_size_days: 30,
            page_size: MAX_PAGE_SIZE,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(5),
            job_timeout_minutes: 30,
            search_types: vec![SearchType::Web],
            data_state: DataState::All,
            log_dir: PathBuf::from("storage"),
        }
    }
}

impl SyncConfig {
    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.lookback_days = days;
        self
    }

    pub fn with_api_latency_days(mut self, days: u32) -> Self {
        self.api_latency_days = days;
        self
    }

    pub fn with_chunk_size_days(mut self, days: u32) -> Self {
        self.chunk_size_days = days;
        self
    }

    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn with_job_timeout_minutes(mut self, minutes: u32) -> Self {
        self.job_timeout_minutes = minutes;
        self
    }

    pub fn with_search_types(mut self, types: Vec<SearchType>) -> Self {
        self.search_types = types;
        self
    }

    pub fn with_data_state(mut self, state: DataState) -> Self {
        self.data_state = state;
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// Overlays the values present in a parsed `sync.toml`.
    pub fn merge_file(mut self, file: &SyncFileConfig) -> Self {
        if let Some(v) = file.lookback_days {
            self.lookback_days = v;
        }
        if let Some(v) = file.api_latency_days {
            self.api_latency_days = v;
        }
        if let Some(v) = file.chunk_size_days {
            self.chunk_size_days = v;
        }
        if let Some(v) = file.page_size {
            self.page_size = v;
        }
        if let Some(v) = file.max_retries {
            self.max_retries = v;
        }
        if let Some(v) = file.retry_base_delay_secs {
            self.retry_base_delay = Duration::from_secs(v);
        }
        if let Some(v) = file.job_timeout_minutes {
            self.job_timeout_minutes = v;
        }
        if let Some(v) = &file.search_types {
            self.search_types = v.clone();
        }
        if let Some(v) = file.data_state {
            self.data_state = v;
        }
        if let Some(v) = &file.log_dir {
            self.log_dir = v.clone();
        }
        self
    }

    /// Rejects combinations the engine cannot honor.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.chunk_size_days == 0 {
            return Err(AppError::ConfigError(
                "chunk_size_days must be at least 1".to_string(),
            ));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(AppError::ConfigError(format!(
                "page_size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, self.page_size
            )));
        }
        if self.max_retries == 0 {
            return Err(AppError::ConfigError(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.api_latency_days >= self.lookback_days {
            return Err(AppError::ConfigError(format!(
                "api_latency_days ({}) must be smaller than lookback_days ({})",
                self.api_latency_days, self.lookback_days
            )));
        }
        if self.search_types.is_empty() {
            return Err(AppError::ConfigError(
                "at least one search type is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Captured-output location for a job.
    pub fn job_log_path(&self, job_id: i64) -> PathBuf {
        self.log_dir.join(format!("sync-job-{}.log", job_id))
    }
}

// =============================================================================
// Configuration File (sync.toml)
// =============================================================================

/// Optional overrides read from `sync.toml`. Every field may be omitted.
///
/// # Example
///
/// ```toml
/// lookback_days = 480
/// search_types = ["web", "image"]
/// data_state = "final"
/// retry_base_delay_secs = 5
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncFileConfig {
    pub lookback_days: Option<u32>,
    pub api_latency_days: Option<u32>,
    pub chunk_size_days: Option<u32>,
    pub page_size: Option<u32>,
    pub max_retries: Option<u32>,
    pub retry_base_delay_secs: Option<u64>,
    pub job_timeout_minutes: Option<u32>,
    pub search_types: Option<Vec<SearchType>>,
    pub data_state: Option<DataState>,
    pub log_dir: Option<PathBuf>,
}

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "sync.toml";

/// Returns the default configuration directory: `~/.config/gsc-sync/`.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("gsc-sync"))
}

/// Returns the default configuration file path: `~/.config/gsc-sync/sync.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join(CONFIG_FILE_NAME))
}

/// Loads the sync configuration file.
///
/// With no explicit path the default location is tried and a missing file is
/// not an error. An explicit path that does not exist is.
pub fn load_sync_config(path: Option<PathBuf>) -> Result<Option<SyncFileConfig>, AppError> {
    let explicit = path.is_some();
    let config_path = match path.or_else(default_config_path) {
        Some(p) => p,
        None => return Ok(None),
    };

    if !config_path.exists() {
        if explicit {
            return Err(AppError::ConfigError(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }
        return Ok(None);
    }

    parse_config_file(&config_path).map(Some)
}

fn parse_config_file(path: &Path) -> Result<SyncFileConfig, AppError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AppError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    toml::from_str(&content).map_err(|e| {
        AppError::ConfigError(format!("Invalid TOML in '{}': {}", path.display(), e))
    })
}
