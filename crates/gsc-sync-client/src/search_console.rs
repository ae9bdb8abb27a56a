//! Search Console API client.
//!
//! Implements [`AnalyticsProvider`] over the `webmasters/v3` REST surface:
//! `GET sites` for the property list and `POST sites/{site}/searchAnalytics/query`
//! for one page of rows.
//!
//! Failures are mapped onto [`AppError`] so the fetch layer can tell
//! retryable classes (429, 5xx, transport, timeout) from permanent ones.

use chrono::NaiveDate;
use gsc_sync_core::config::HttpConfig;
use gsc_sync_core::error::{ApiErrorDetails, AppError};
use gsc_sync_core::fetch::AnalyticsQuery;
use gsc_sync_core::models::{PerformanceRow, ProviderSite};
use gsc_sync_core::traits::AnalyticsProvider;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/";

/// HTTP client for the Search Console API.
///
/// Authenticates with a pre-acquired OAuth bearer token.
///
/// # Examples
///
/// ```no_run
/// use gsc_sync_client::SearchConsoleClient;
/// use gsc_sync_core::config::HttpConfig;
/// use gsc_sync_core::traits::AnalyticsProvider;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = SearchConsoleClient::new(
///     "https://www.googleapis.com/",
///     "ya29.token",
///     &HttpConfig::default(),
/// )?;
/// let sites = client.list_sites().await?;
/// println!("Found {} properties", sites.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SearchConsoleClient {
    client: Client,
    base_url: Url,
    access_token: String,
    timeout_secs: u64,
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct SitesResponse {
    #[serde(default)]
    site_entry: Vec<SiteEntry>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SiteEntry {
    site_url: String,
    #[serde(default)]
    permission_level: String,
}

/// Body of a `searchAnalytics.query` request.
#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    start_date: String,
    end_date: String,
    dimensions: &'a [&'a str],
    row_limit: u32,
    start_row: u32,
    #[serde(rename = "type")]
    search_type: &'a str,
    data_state: &'a str,
}

impl<'a> From<&'a AnalyticsQuery> for QueryRequest<'a> {
    fn from(query: &'a AnalyticsQuery) -> Self {
        Self {
            start_date: query.start_date.format("%Y-%m-%d").to_string(),
            end_date: query.end_date.format("%Y-%m-%d").to_string(),
            dimensions: query.dimensions,
            row_limit: query.row_limit,
            start_row: query.start_row,
            search_type: query.search_type.as_str(),
            data_state: query.data_state.as_str(),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
struct QueryResponse {
    #[serde(default)]
    rows: Vec<ApiRow>,
}

#[derive(Deserialize, Debug)]
struct ApiRow {
    keys: Vec<String>,
    #[serde(default)]
    clicks: f64,
    #[serde(default)]
    impressions: f64,
    #[serde(default)]
    ctr: f64,
    #[serde(default)]
    position: f64,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

// =============================================================================
// Mapping
// =============================================================================

/// Converts one API row keyed by `date, page, query, country, device`.
fn row_from_api(row: ApiRow) -> Result<PerformanceRow, AppError> {
    let [date, page, query, country, device]: [String; 5] =
        row.keys.try_into().map_err(|keys: Vec<String>| {
            AppError::ClientError(format!("expected 5 row keys, got {}", keys.len()))
        })?;

    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|e| AppError::ClientError(format!("invalid row date '{}': {}", date, e)))?;

    Ok(PerformanceRow {
        date,
        page,
        query,
        country,
        device,
        clicks: row.clicks.round() as i64,
        impressions: row.impressions.round() as i64,
        ctr: row.ctr,
        position: row.position,
    })
}

/// Maps a non-success response body onto a classified API error.
fn error_from_response(status_code: u16, body: &str) -> AppError {
    let message = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) if body.trim().is_empty() => "empty response body".to_string(),
        Err(_) => body.trim().to_string(),
    };
    AppError::ApiError(ApiErrorDetails::from_status(status_code, message))
}

async fn ensure_success(response: Response) -> Result<Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(error_from_response(status.as_u16(), &body))
}

fn transport_error(err: reqwest::Error, timeout_secs: u64) -> AppError {
    if err.is_timeout() {
        AppError::Timeout(timeout_secs)
    } else if err.is_connect() || err.is_request() {
        AppError::NetworkError(err.to_string())
    } else {
        AppError::ClientError(err.to_string())
    }
}

/// Builds `{base}webmasters/v3/sites/{site}/searchAnalytics/query`.
///
/// The site URL is a single percent-encoded path segment.
fn query_url(base_url: &Url, site_url: &str) -> Result<Url, AppError> {
    let mut url = sites_url(base_url)?;
    url.path_segments_mut()
        .map_err(|_| AppError::InvalidUrl(base_url.to_string()))?
        .pop_if_empty()
        .push(site_url)
        .push("searchAnalytics")
        .push("query");
    Ok(url)
}

fn sites_url(base_url: &Url) -> Result<Url, AppError> {
    base_url
        .join("webmasters/v3/sites")
        .map_err(|e| AppError::InvalidUrl(format!("{}: {}", base_url, e)))
}

// =============================================================================
// Client
// =============================================================================

impl SearchConsoleClient {
    /// Creates a client for the API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidUrl` if the base URL cannot be parsed.
    /// Returns `AppError::ClientError` if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        access_token: impl Into<String>,
        http_config: &HttpConfig,
    ) -> Result<Self, AppError> {
        let mut base_url =
            Url::parse(base_url).map_err(|_| AppError::InvalidUrl(base_url.to_string()))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .user_agent(concat!("gsc-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(http_config.timeout)
            .connect_timeout(http_config.connect_timeout)
            .build()
            .map_err(|e| AppError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            access_token: access_token.into(),
            timeout_secs: http_config.timeout.as_secs(),
        })
    }
}

impl AnalyticsProvider for SearchConsoleClient {
    async fn list_sites(&self) -> Result<Vec<ProviderSite>, AppError> {
        let url = sites_url(&self.base_url)?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout_secs))?;

        let body: SitesResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| AppError::ClientError(format!("Failed to parse sites: {}", e)))?;

        Ok(body
            .site_entry
            .into_iter()
            .map(|entry| ProviderSite {
                site_url: entry.site_url,
                permission_level: entry.permission_level,
            })
            .collect())
    }

    async fn query(&self, query: &AnalyticsQuery) -> Result<Vec<PerformanceRow>, AppError> {
        let url = query_url(&self.base_url, &query.site_url)?;
        let request = QueryRequest::from(query);

        debug!(
            site = %query.site_url,
            start = %query.start_date,
            end = %query.end_date,
            start_row = query.start_row,
            "Querying search analytics"
        );

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout_secs))?;

        let body: QueryResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| AppError::ClientError(format!("Failed to parse query response: {}", e)))?;

        body.rows.into_iter().map(row_from_api).collect()
    }
}
