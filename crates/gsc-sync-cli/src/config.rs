use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use gsc_sync_client::DEFAULT_BASE_URL;
use gsc_sync_core::{AppError, DataState, SearchType, SyncConfig, load_sync_config};

static VERSION_INFO: LazyLock<String> = LazyLock::new(|| {
    let version = env!("CARGO_PKG_VERSION");

    // Use VERGEN_GIT_SHA for the commit hash (with safe slicing)
    let commit = option_env!("VERGEN_GIT_SHA")
        .map(|s| s.chars().take(7).collect::<String>())
        .unwrap_or_else(|| "unknown".to_string());

    let built = option_env!("VERGEN_BUILD_DATE").unwrap_or("unknown"); // YYYY-MM-DD
    let target = option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown");
    let rustc = option_env!("VERGEN_RUSTC_SEMVER").unwrap_or("unknown");

    format!("{version}\ncommit: {commit}\nbuilt: {built}\ntarget: {target}\nrustc: {rustc}")
});

pub fn version_info() -> &'static str {
    &VERSION_INFO
}

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "gsc-sync")]
#[command(
    author,
    version = version_info(),
    about = "Incremental Search Console performance sync"
)]
#[command(after_help = "Examples:
  gsc-sync migrate
  gsc-sync sync --site-id 3
  gsc-sync trigger
  gsc-sync progress
  gsc-sync diagnostic --site-id 3 --search-type image
  gsc-sync history --limit 20")]
pub struct Config {
    /// PostgreSQL database connection URL
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: String,

    /// OAuth bearer token for the Search Console API (required by `sync`)
    #[arg(long, env = "GSC_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Search Console API root
    #[arg(long, env = "GSC_API_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub api_base_url: String,

    /// Path to sync.toml (default: ~/.config/gsc-sync/sync.toml when present)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub sync: SyncArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Engine settings that override the configuration file.
#[derive(Args, Debug, Default, Clone)]
pub struct SyncArgs {
    /// Days the first sync of a task reaches back
    #[arg(long, env = "SYNC_DAYS_BACK", value_name = "DAYS")]
    pub days_back: Option<u32>,

    /// Days the API lags behind today
    #[arg(long, env = "SYNC_API_LATENCY_DAYS", value_name = "DAYS")]
    pub api_latency_days: Option<u32>,

    /// Width of one fetched chunk
    #[arg(long, env = "SYNC_CHUNK_DAYS", value_name = "DAYS")]
    pub chunk_days: Option<u32>,

    /// Rows requested per page (at most 25000)
    #[arg(long, env = "SYNC_ROW_LIMIT", value_name = "ROWS")]
    pub row_limit: Option<u32>,

    /// Attempts per page request
    #[arg(long, env = "SYNC_MAX_RETRIES")]
    pub max_retries: Option<u32>,

    /// Base retry delay in seconds
    #[arg(long, env = "SYNC_RETRY_DELAY", value_name = "SECS")]
    pub retry_delay: Option<u64>,

    /// Minutes after which a job is declared stalled
    #[arg(long, env = "SYNC_TIMEOUT_MINUTES", value_name = "MINUTES")]
    pub timeout_minutes: Option<u32>,

    /// Comma-separated result types, e.g. "web,image"
    #[arg(long, env = "SYNC_SEARCH_TYPES", value_name = "TYPES")]
    pub search_types: Option<String>,

    /// "all" or "final"
    #[arg(long, env = "SYNC_DATA_STATE", value_name = "STATE")]
    pub data_state: Option<String>,

    /// Directory for captured worker output
    #[arg(long, env = "SYNC_LOG_DIR", value_name = "DIR")]
    pub log_dir: Option<PathBuf>,
}

impl SyncArgs {
    /// Overlays the values given on the command line or in the environment.
    pub fn apply(&self, mut config: SyncConfig) -> Result<SyncConfig, AppError> {
        if let Some(v) = self.days_back {
            config = config.with_lookback_days(v);
        }
        if let Some(v) = self.api_latency_days {
            config = config.with_api_latency_days(v);
        }
        if let Some(v) = self.chunk_days {
            config = config.with_chunk_size_days(v);
        }
        if let Some(v) = self.row_limit {
            config = config.with_page_size(v);
        }
        if let Some(v) = self.max_retries {
            config = config.with_max_retries(v);
        }
        if let Some(v) = self.retry_delay {
            config = config.with_retry_base_delay(Duration::from_secs(v));
        }
        if let Some(v) = self.timeout_minutes {
            config = config.with_job_timeout_minutes(v);
        }
        if let Some(v) = &self.search_types {
            config = config.with_search_types(SearchType::parse_list(v)?);
        }
        if let Some(v) = &self.data_state {
            config = config.with_data_state(v.parse::<DataState>()?);
        }
        if let Some(v) = &self.log_dir {
            config = config.with_log_dir(v.clone());
        }
        Ok(config)
    }

    /// The given values as command-line flags, for handing to a worker.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut push = |flag: &str, value: Option<String>| {
            if let Some(value) = value {
                args.push(flag.to_string());
                args.push(value);
            }
        };
        push("--days-back", self.days_back.map(|v| v.to_string()));
        push("--api-latency-days", self.api_latency_days.map(|v| v.to_string()));
        push("--chunk-days", self.chunk_days.map(|v| v.to_string()));
        push("--row-limit", self.row_limit.map(|v| v.to_string()));
        push("--max-retries", self.max_retries.map(|v| v.to_string()));
        push("--retry-delay", self.retry_delay.map(|v| v.to_string()));
        push("--timeout-minutes", self.timeout_minutes.map(|v| v.to_string()));
        push("--search-types", self.search_types.clone());
        push("--data-state", self.data_state.clone());
        push(
            "--log-dir",
            self.log_dir.as_ref().map(|v| v.to_string_lossy().into_owned()),
        );
        args
    }
}

/// Builds the engine configuration: defaults, then `sync.toml`, then
/// environment and flags. The result is validated.
pub fn resolve_sync_config(
    config_path: Option<PathBuf>,
    args: &SyncArgs,
) -> Result<SyncConfig, AppError> {
    let mut config = SyncConfig::default();
    if let Some(file) = load_sync_config(config_path)? {
        config = config.merge_file(&file);
    }
    let config = args.apply(config)?;
    config.validate()?;
    Ok(config)
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a sync in the foreground (the worker)
    #[command(after_help = "Exit codes: 0 all tasks succeeded, 1 some task failed, 2 fatal error")]
    Sync {
        /// Sync a single site instead of every active site
        #[arg(long)]
        site_id: Option<i64>,

        /// Skip importing properties from the API first
        #[arg(long)]
        no_import: bool,

        /// Job to report progress to (set by `trigger`)
        #[arg(long)]
        job_id: Option<i64>,
    },
    /// Create a job and start a detached worker for it
    Trigger {
        #[arg(long)]
        site_id: Option<i64>,
    },
    /// Print the progress of a job (default: the active one) as JSON
    Progress {
        #[arg(long)]
        job_id: Option<i64>,
    },
    /// Print stored coverage and gaps for one site and result type
    Diagnostic {
        #[arg(long)]
        site_id: i64,

        #[arg(long, default_value = "web")]
        search_type: SearchType,
    },
    /// List recent task runs
    History {
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },
    /// Create or update the database schema
    Migrate,
}
