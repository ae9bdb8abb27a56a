//! GSC Sync DB - PostgreSQL persistence for the sync engine.
//!
//! # Overview
//!
//! The main components are:
//! - [`SiteRepository`] - Tracked Search Console properties
//! - [`PerformanceRepository`] - Performance rows with exact new/updated counts
//! - [`ProgressRepository`] - Sync jobs and task runs, guarded against
//!   transitions out of terminal states
//! - [`apply_schema`] - Idempotent schema creation

mod performance_repository;
mod progress_repository;
pub mod schema;
mod site_repository;

pub use performance_repository::PerformanceRepository;
pub use progress_repository::ProgressRepository;
pub use schema::{ACTIVE_JOB_INDEX, SCHEMA, apply_schema};
pub use site_repository::SiteRepository;
