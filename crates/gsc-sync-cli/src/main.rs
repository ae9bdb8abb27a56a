use std::process::ExitCode;

use anyhow::Context;
use chrono::{Local, Utc};
use clap::Parser;
use dotenvy::dotenv;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gsc_sync_cli::summary::{render_history, render_summary};
use gsc_sync_cli::{Command, Config, PidProbe, ProcessLauncher, resolve_sync_config};
use gsc_sync_client::SearchConsoleClient;
use gsc_sync_core::error::{MAX_PERSISTED_ERROR_CHARS, truncate_message};
use gsc_sync_core::traits::ProgressStore;
use gsc_sync_core::{
    AppError, DbConfig, DiagnosticService, HttpConfig, JobCoordinator, ProgressService,
    RunRequest, SearchType, SyncConfig, SyncReport, TracingSyncReporter, TriggerService,
};
use gsc_sync_db::{PerformanceRepository, ProgressRepository, SiteRepository, apply_schema};

/// Worker exit code when every task succeeded.
const EXIT_OK: u8 = 0;
/// Worker exit code when at least one task failed.
const EXIT_TASK_ERROR: u8 = 1;
/// Exit code for failures outside the task loop.
const EXIT_FATAL: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();

    match run(config).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("\nFATAL ERROR: {:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(config: Config) -> anyhow::Result<u8> {
    let db_config = DbConfig::default();
    let pool = PgPoolOptions::new()
        .max_connections(db_config.max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    let sync_config = match resolve_sync_config(config.config.clone(), &config.sync) {
        Ok(sync_config) => sync_config,
        Err(e) => {
            if let Command::Sync {
                job_id: Some(job_id),
                ..
            } = &config.command
            {
                let message = truncate_message(
                    &format!("invalid sync configuration: {e}"),
                    MAX_PERSISTED_ERROR_CHARS,
                );
                let progress = ProgressRepository::new(pool.clone());
                if let Err(store_err) = progress.fail_job(*job_id, &message).await {
                    warn!(job_id = *job_id, error = %store_err, "Failed to record job failure");
                }
            }
            return Err(anyhow::Error::new(e).context("Invalid sync configuration"));
        }
    };

    match &config.command {
        Command::Migrate => {
            apply_schema(&pool).await.context("Failed to apply schema")?;
            println!("Schema is up to date.");
            Ok(EXIT_OK)
        }
        Command::Sync {
            site_id,
            no_import,
            job_id,
        } => Ok(sync(&config, pool, sync_config, *site_id, !*no_import, *job_id).await),
        Command::Trigger { site_id } => {
            let launcher = worker_launcher(&config)?;
            let service = TriggerService::new(ProgressRepository::new(pool), launcher, sync_config);
            let outcome = service.trigger(*site_id).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(EXIT_OK)
        }
        Command::Progress { job_id } => {
            let service = ProgressService::new(
                ProgressRepository::new(pool),
                PidProbe,
                sync_config.job_timeout_minutes,
            );
            let view = service.progress(*job_id, Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(EXIT_OK)
        }
        Command::Diagnostic {
            site_id,
            search_type,
        } => {
            let service = DiagnosticService::new(
                PerformanceRepository::new(pool.clone()),
                ProgressRepository::new(pool),
            );
            let diagnostic = service.diagnose(*site_id, *search_type).await?;
            println!("{}", serde_json::to_string_pretty(&diagnostic)?);
            Ok(EXIT_OK)
        }
        Command::History { limit } => {
            let runs = ProgressRepository::new(pool).recent_tasks(*limit).await?;
            print!("{}", render_history(&runs));
            Ok(EXIT_OK)
        }
    }
}

/// Builds the launcher for detached workers, forwarding what the worker
/// cannot rediscover from its own environment.
fn worker_launcher(config: &Config) -> anyhow::Result<ProcessLauncher> {
    let mut launcher = ProcessLauncher::current_exe()
        .context("Failed to locate the gsc-sync executable")?
        .with_config_path(config.config.clone())
        .with_global_args(config.sync.to_args())
        .with_env("DATABASE_URL", config.database_url.clone())
        .with_env("GSC_API_BASE_URL", config.api_base_url.clone());
    if let Some(token) = &config.access_token {
        launcher = launcher.with_env("GSC_ACCESS_TOKEN", token.clone());
    }
    Ok(launcher)
}

// =============================================================================
// Worker
// =============================================================================

/// Runs the worker and maps the result onto its exit code.
async fn sync(
    config: &Config,
    pool: PgPool,
    sync_config: SyncConfig,
    site_id: Option<i64>,
    import_sites: bool,
    job_id: Option<i64>,
) -> u8 {
    let progress = ProgressRepository::new(pool.clone());

    println!("========================================");
    println!(" Search Console sync");
    println!(" {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    println!("========================================\n");

    match run_worker(config, pool, sync_config, site_id, import_sites, job_id).await {
        Ok(report) => {
            print!("\n{}", render_summary(&report));
            println!("\nDone.");
            if report.has_errors() {
                EXIT_TASK_ERROR
            } else {
                EXIT_OK
            }
        }
        Err(e) => {
            if let Some(job_id) = job_id {
                if let Err(store_err) = progress.fail_job(job_id, &e.persisted_message()).await {
                    warn!(job_id, error = %store_err, "Failed to record job failure");
                }
            }
            error!(error = %e, "Sync failed");
            println!("\nFATAL ERROR: {}", e.user_message());
            EXIT_FATAL
        }
    }
}

async fn run_worker(
    config: &Config,
    pool: PgPool,
    sync_config: SyncConfig,
    site_id: Option<i64>,
    import_sites: bool,
    job_id: Option<i64>,
) -> Result<SyncReport, AppError> {
    let progress = ProgressRepository::new(pool.clone());

    if let Some(job_id) = job_id {
        let pid = i32::try_from(std::process::id())
            .map_err(|_| AppError::Generic("process id out of range".to_string()))?;
        progress.set_job_pid(job_id, pid).await?;
        info!(job_id, pid, "Attached to job");
    }

    let token = config.access_token.as_deref().ok_or_else(|| {
        AppError::ConfigError("GSC_ACCESS_TOKEN is required for sync".to_string())
    })?;
    let client = SearchConsoleClient::new(&config.api_base_url, token, &HttpConfig::default())?;

    info!(
        lookback_days = sync_config.lookback_days,
        chunk_size_days = sync_config.chunk_size_days,
        search_types = %sync_config
            .search_types
            .iter()
            .map(SearchType::as_str)
            .collect::<Vec<_>>()
            .join(","),
        "Starting sync"
    );

    let coordinator = JobCoordinator::new(
        client,
        SiteRepository::new(pool.clone()),
        PerformanceRepository::new(pool),
        progress,
        sync_config,
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let request = RunRequest {
        job_id,
        site_id,
        import_sites,
        today: Local::now().date_naive(),
    };
    coordinator.run(&request, &cancel, &TracingSyncReporter).await
}

/// Cancels the token on Ctrl+C or SIGTERM. The coordinator stops before the
/// next chunk.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!("Termination requested, stopping after the current chunk");
    cancel.cancel();
}
