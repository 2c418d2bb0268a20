//! Clients for the external ad-count services.
//!
//! `LibraryPageClient` fetches the public ad-library search page and hands its
//! text to the count parser. `ArchiveClient` talks to the paginated Ads-Archive
//! JSON API and retries once on server errors.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ServiceError;

pub type Result<T> = std::result::Result<T, ServiceError>;

pub const DEFAULT_LIBRARY_URL: &str = "https://www.facebook.com/ads/library/";
pub const DEFAULT_ARCHIVE_URL: &str = "https://graph.facebook.com/v19.0/ads_archive";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_DELAY: Duration = Duration::from_millis(500);
const ARCHIVE_PAGE_LIMIT: u32 = 100;
const ARCHIVE_MAX_PAGES: usize = 5;

/// One count request: a subject or keyword over a region and date range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountQuery {
    pub subject: String,
    pub region: String,
    pub start: String,
    pub end: String,
}

/// Free-form response body plus the URL it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountResponse {
    pub body: String,
    pub url: String,
}

#[async_trait]
pub trait CountService: Send + Sync {
    async fn fetch(&self, query: &CountQuery) -> Result<CountResponse>;
}

/// Endpoints and credentials, read from the environment.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub library_url: String,
    pub archive_url: String,
    pub archive_token: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            library_url: DEFAULT_LIBRARY_URL.to_string(),
            archive_url: DEFAULT_ARCHIVE_URL.to_string(),
            archive_token: None,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            library_url: std::env::var("ADS_LIBRARY_URL").unwrap_or(defaults.library_url),
            archive_url: std::env::var("ADS_ARCHIVE_URL").unwrap_or(defaults.archive_url),
            archive_token: std::env::var("ADS_ARCHIVE_TOKEN")
                .ok()
                .filter(|t| !t.trim().is_empty()),
        }
    }
}

fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(ServiceError::from)
}

fn parse_base(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| ServiceError::Parse(format!("invalid endpoint {url:?}: {e}")))
}

async fn api_error(resp: reqwest::Response) -> ServiceError {
    let status = resp.status().as_u16();
    let message = resp.text().await.unwrap_or_default();
    ServiceError::Api { status, message }
}

/// Fetches the public ad-library search page as text.
pub struct LibraryPageClient {
    client: reqwest::Client,
    base_url: Url,
}

impl LibraryPageClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: build_http_client()?,
            base_url: parse_base(base_url)?,
        })
    }

    pub fn search_url(&self, query: &CountQuery) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("active_status", "all")
            .append_pair("ad_type", "all")
            .append_pair("country", &query.region)
            .append_pair("q", &query.subject)
            .append_pair("search_type", "keyword_unordered")
            .append_pair("start_date[min]", &query.start)
            .append_pair("start_date[max]", &query.end);
        url
    }
}

#[async_trait]
impl CountService for LibraryPageClient {
    async fn fetch(&self, query: &CountQuery) -> Result<CountResponse> {
        let url = self.search_url(query);
        debug!(subject = %query.subject, %url, "Fetching ad library page");

        let resp = self.client.get(url.clone()).send().await?;
        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }
        Ok(CountResponse {
            body: resp.text().await?,
            url: url.to_string(),
        })
    }
}

/// Parameters for an Ads-Archive search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveQuery {
    pub search_terms: String,
    pub countries: Vec<String>,
    pub delivery_date_min: String,
    pub delivery_date_max: String,
    pub limit: u32,
}

impl From<&CountQuery> for ArchiveQuery {
    fn from(q: &CountQuery) -> Self {
        Self {
            search_terms: q.subject.clone(),
            countries: vec![q.region.clone()],
            delivery_date_min: q.start.clone(),
            delivery_date_max: q.end.clone(),
            limit: ARCHIVE_PAGE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArchivePage {
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub next: Option<String>,
}

/// Client for the Ads-Archive JSON API.
pub struct ArchiveClient {
    client: reqwest::Client,
    base_url: Url,
    token: String,
    retry_delay: Duration,
    max_pages: usize,
}

impl ArchiveClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        Ok(Self {
            client: build_http_client()?,
            base_url: parse_base(base_url)?,
            token: token.to_string(),
            retry_delay: RETRY_DELAY,
            max_pages: ARCHIVE_MAX_PAGES,
        })
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn search_url(&self, query: &ArchiveQuery) -> Url {
        let countries = format!(
            "[{}]",
            query
                .countries
                .iter()
                .map(|c| format!("\"{c}\""))
                .collect::<Vec<_>>()
                .join(",")
        );
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("access_token", &self.token)
            .append_pair("search_terms", &query.search_terms)
            .append_pair("ad_reached_countries", &countries)
            .append_pair("ad_delivery_date_min", &query.delivery_date_min)
            .append_pair("ad_delivery_date_max", &query.delivery_date_max)
            .append_pair("ad_active_status", "ALL")
            .append_pair("fields", "id,page_id,page_name,ad_delivery_start_time")
            .append_pair("limit", &query.limit.to_string());
        url
    }

    /// First page of results.
    pub async fn search(&self, query: &ArchiveQuery) -> Result<ArchivePage> {
        self.get_page(self.search_url(query).as_str()).await
    }

    /// Follow `paging.next` until exhausted or `max_pages` pages have been read.
    pub async fn search_all(&self, query: &ArchiveQuery, max_pages: usize) -> Result<Vec<Value>> {
        let mut ads = Vec::new();
        let mut next = Some(self.search_url(query).to_string());
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            if pages >= max_pages {
                debug!(pages, "Archive page cap reached");
                break;
            }
            let page = self.get_page(&url).await?;
            pages += 1;
            ads.extend(page.data);
            next = page.paging.and_then(|p| p.next).filter(|n| !n.is_empty());
        }

        info!(terms = %query.search_terms, pages, ads = ads.len(), "Archive search finished");
        Ok(ads)
    }

    /// One GET with a single retry on a 5xx response.
    async fn get_page(&self, url: &str) -> Result<ArchivePage> {
        match self.get_page_once(url).await {
            Err(e) if e.is_server_error() => {
                warn!(error = %e, "Archive server error, retrying once");
                tokio::time::sleep(self.retry_delay).await;
                self.get_page_once(url).await
            }
            other => other,
        }
    }

    async fn get_page_once(&self, url: &str) -> Result<ArchivePage> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }
        let text = resp.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl CountService for ArchiveClient {
    async fn fetch(&self, query: &CountQuery) -> Result<CountResponse> {
        let archive_query = ArchiveQuery::from(query);
        let url = self.search_url(&archive_query);
        let ads = self.search_all(&archive_query, self.max_pages).await?;
        let body = serde_json::json!({ "count": ads.len() }).to_string();
        Ok(CountResponse {
            body,
            url: redact_token(url),
        })
    }
}

fn redact_token(mut url: Url) -> String {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "access_token")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut().clear().extend_pairs(pairs);
    url.to_string()
}
