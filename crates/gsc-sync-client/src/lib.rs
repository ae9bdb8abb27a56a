//! GSC Sync Client - HTTP client for the Search Console API
//!
//! This crate provides [`SearchConsoleClient`], the `reqwest` implementation
//! of [`gsc_sync_core::traits::AnalyticsProvider`].
//!
//! # Overview
//!
//! The client handles bearer authentication, request building, response
//! parsing and classification of API failures into retryable and permanent
//! errors.

pub mod search_console;

pub use search_console::{DEFAULT_BASE_URL, SearchConsoleClient};
