use chrono::NaiveDate;
use thiserror::Error;

/// Maximum number of characters kept when an error message is persisted.
pub const MAX_PERSISTED_ERROR_CHARS: usize = 5000;

/// Classification of a failed analytics API call by its HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Invalid or expired credentials (401, 403).
    Authentication,
    /// Malformed request (400).
    BadRequest,
    /// Unknown property or endpoint (404).
    NotFound,
    /// Quota or rate limit exceeded (429).
    RateLimit,
    /// Server-side failure (5xx).
    ServerError,
    /// Anything the API returned that fits none of the above.
    Unknown,
}

impl ApiErrorKind {
    /// Maps an HTTP status code to its error class.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ApiErrorKind::Authentication,
            400 => ApiErrorKind::BadRequest,
            404 => ApiErrorKind::NotFound,
            429 => ApiErrorKind::RateLimit,
            500..=599 => ApiErrorKind::ServerError,
            _ => ApiErrorKind::Unknown,
        }
    }
}

/// Structured error details from the analytics API.
#[derive(Debug, Clone)]
pub struct ApiErrorDetails {
    /// The error class derived from the status code.
    pub kind: ApiErrorKind,
    /// Message reported by the API (or the raw body when unparseable).
    pub message: String,
    /// HTTP status code.
    pub status_code: u16,
}

impl ApiErrorDetails {
    pub fn new(kind: ApiErrorKind, message: String, status_code: u16) -> Self {
        Self {
            kind,
            message,
            status_code,
        }
    }

    /// Builds details whose kind is derived from the status code.
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        Self::new(
            ApiErrorKind::from_status(status_code),
            message.into(),
            status_code,
        )
    }
}

impl std::fmt::Display for ApiErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP {}: {}", self.status_code, self.message)
    }
}

/// Application-wide error types.
///
/// Errors from the database driver and JSON layer convert automatically via
/// `#[from]`. Analytics API failures carry an [`ApiErrorDetails`] so the
/// fetcher can tell transient failures from permanent ones.
///
/// # Examples
///
/// ```
/// use gsc_sync_core::error::AppError;
///
/// fn example() -> Result<(), AppError> {
///     Err(AppError::Generic("Something went wrong".to_string()))
/// }
/// assert!(example().is_err());
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// The analytics API answered with an error status.
    #[error("Search Console API error: {0}")]
    ApiError(ApiErrorDetails),

    /// HTTP client failure that is not tied to a response status.
    #[error("API Client error: {0}")]
    ClientError(String),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Reading or writing a local file failed.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A date range whose start lies after its end.
    #[error("Invalid date range: {start} is after {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    /// Site not found in the database.
    #[error("Site not found: {0}")]
    SiteNotFound(i64),

    /// Sync job not found in the database.
    #[error("Sync job not found: {0}")]
    JobNotFound(i64),

    /// Another job is already pending or running.
    #[error("A sync job is already active")]
    ActiveJobExists,

    /// Network or connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The worker received a termination request between chunks.
    #[error("Sync cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic application error for cases not covered by specific variants.
    #[error("Error: {0}")]
    Generic(String),
}

impl AppError {
    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::DatabaseError(e) => {
                if e.to_string().contains("connection") {
                    "Cannot connect to database. Is PostgreSQL running?\n   Check DATABASE_URL."
                        .to_string()
                } else {
                    format!("Database error: {}", e)
                }
            }
            AppError::ApiError(details) => match details.kind {
                ApiErrorKind::Authentication => {
                    "Search Console rejected the credentials.\n   Refresh GSC_ACCESS_TOKEN and try again."
                        .to_string()
                }
                ApiErrorKind::RateLimit => {
                    "Search Console quota exhausted.\n   Wait a few minutes before the next sync."
                        .to_string()
                }
                ApiErrorKind::ServerError => format!(
                    "Search Console server error (HTTP {}).\n   Please try again later.",
                    details.status_code
                ),
                ApiErrorKind::NotFound => format!(
                    "Property not found: {}\n   Check the site URL and its permissions.",
                    details.message
                ),
                ApiErrorKind::BadRequest | ApiErrorKind::Unknown => {
                    format!("Search Console API error: {}", details)
                }
            },
            AppError::NetworkError(msg) => {
                format!("Network error: {}\n   Check your internet connection.", msg)
            }
            AppError::Timeout(secs) => format!(
                "Request timed out after {} seconds.\n   The API may be overloaded. Try again later.",
                secs
            ),
            AppError::ActiveJobExists => {
                "A sync job is already pending or running.\n   Use `gsc-sync progress` to follow it."
                    .to_string()
            }
            AppError::ConfigError(msg) => format!(
                "Configuration error: {}\n   Check your sync.toml and environment.",
                msg
            ),
            _ => self.to_string(),
        }
    }

    /// Returns true if this error is transient and the call may be retried.
    ///
    /// # Examples
    ///
    /// ```
    /// use gsc_sync_core::error::{AppError, ApiErrorDetails};
    ///
    /// let quota = AppError::ApiError(ApiErrorDetails::from_status(429, "quota"));
    /// assert!(quota.is_retryable());
    ///
    /// let auth = AppError::ApiError(ApiErrorDetails::from_status(401, "expired"));
    /// assert!(!auth.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::ApiError(details) => matches!(
                details.kind,
                ApiErrorKind::RateLimit | ApiErrorKind::ServerError
            ),
            AppError::NetworkError(_) | AppError::Timeout(_) => true,
            _ => false,
        }
    }

    /// The message as it should be persisted on a job or task run.
    pub fn persisted_message(&self) -> String {
        truncate_message(&self.to_string(), MAX_PERSISTED_ERROR_CHARS)
    }
}

/// Truncates `message` to at most `max_chars` characters.
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}
