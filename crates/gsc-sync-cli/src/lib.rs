//! GSC Sync CLI - worker and job control for Search Console sync
//!
//! The `gsc-sync` binary hosts the sync worker (`sync`) and the job control
//! surface (`trigger`, `progress`, `diagnostic`, `history`, `migrate`).
//! This library exposes the pieces the binary wires together:
//!
//! - [`config`] - Command line and environment configuration
//! - [`process`] - Detached worker launch and PID liveness checks
//! - [`summary`] - Plain-text rendering of results

pub mod config;
pub mod process;
pub mod summary;

pub use config::{Command, Config, SyncArgs, resolve_sync_config, version_info};
pub use process::{PidProbe, ProcessLauncher};
