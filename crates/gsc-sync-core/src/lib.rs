//! gsc-sync core - domain types, sync engine and services.
//!
//! This crate provides the Search Console synchronization engine:
//!
//! - **Domain models**: [`Site`], [`PerformanceRow`], [`Job`], [`TaskRun`]
//! - **Engine**: [`split_date_range`], [`resolve_range`], [`PagedFetcher`] with
//!   bounded retry, and the [`JobCoordinator`] that drives them
//! - **Services**: [`ProgressService`] (with the [`LivenessMonitor`]),
//!   [`TriggerService`] and [`DiagnosticService`]
//! - **Traits**: [`AnalyticsProvider`], [`SiteStore`], [`PerformanceStore`],
//!   [`ProgressStore`], [`LivenessProbe`], [`JobLauncher`]
//! - **Reporting**: [`SyncReporter`] for decoupled logging
//!
//! # Architecture
//!
//! Business logic is decoupled from I/O through traits; the PostgreSQL
//! stores, the HTTP client and the process host live in sibling crates and
//! are injected at construction.
//!
//! # Example
//!
//! ```ignore
//! use gsc_sync_core::{JobCoordinator, RunRequest, SyncConfig, TracingSyncReporter};
//! use tokio_util::sync::CancellationToken;
//!
//! let coordinator = JobCoordinator::new(client, sites, rows, progress, SyncConfig::default());
//! let request = RunRequest { job_id: Some(42), site_id: None, import_sites: true, today };
//! let report = coordinator
//!     .run(&request, &CancellationToken::new(), &TracingSyncReporter)
//!     .await?;
//! ```

pub mod chunk;
pub mod config;
pub mod coordinator;
pub mod diagnostic;
pub mod error;
pub mod fetch;
pub mod job;
pub mod models;
pub mod monitor;
pub mod progress;
pub mod range;
pub mod reporter;
pub mod traits;
pub mod trigger;

// Engine
pub use chunk::{DateRange, split_date_range};
pub use coordinator::{JobCoordinator, RunRequest, SyncReport, TaskSummary};
pub use fetch::{AnalyticsQuery, DIMENSIONS, PagedFetcher, RetryPolicy, retry_with_backoff};
pub use range::{ResolvedRange, resolve_range};

// Configuration
pub use config::{
    DataState, DbConfig, HttpConfig, MAX_PAGE_SIZE, SearchType, SyncConfig, SyncFileConfig,
    default_config_path, load_sync_config,
};

// Errors
pub use error::{AppError, ApiErrorDetails, ApiErrorKind};

// Domain models
pub use job::{Job, JobStatus, NewTaskRun, TaskCompletion, TaskOutcome, TaskRun, TaskStatus};
pub use models::{PerformanceRow, ProviderSite, Site, StoredDataSummary, UpsertCounts};

// Services
pub use diagnostic::{DiagnosticService, LastSync, SyncDiagnostic};
pub use monitor::LivenessMonitor;
pub use progress::{JobProgress, ProgressService, ProgressView, progress_fraction};
pub use trigger::{TriggerOutcome, TriggerService};

// Reporting
pub use reporter::{SilentSyncReporter, SyncEvent, SyncReporter, TracingSyncReporter};

// Traits
pub use traits::{
    AnalyticsProvider, JobHandle, JobLauncher, LaunchRequest, Liveness, LivenessProbe,
    PerformanceStore, ProgressStore, SiteStore,
};
