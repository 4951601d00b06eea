use std::time::Duration;

use async_trait::async_trait;
use evsync_core::SOURCE_TAG;
use evsync_storage::{HttpClientConfig, HttpFetcher};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{AdapterError, EventSource, FetchWindow, Locality, ProviderPage};

pub const DEFAULT_BASE_URL: &str = "https://app.ticketmaster.com/discovery/v2";
pub const MIN_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 200;
/// Hard cap on pages per locality, whatever the provider reports.
pub const MAX_PAGES: u32 = 50;
/// The provider refuses to page past `size * page >= 1000`.
const DEEP_PAGING_LIMIT: u32 = 1000;
const SORT_ORDER: &str = "date,asc";

pub fn clamp_page_size(size: u32) -> u32 {
    size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
}

#[derive(Debug, Clone)]
pub struct TicketmasterConfig {
    pub base_url: String,
    pub api_key: String,
    pub page_size: u32,
    pub max_pages: u32,
    pub page_delay: Duration,
    pub http: HttpClientConfig,
}

impl TicketmasterConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            page_size: MAX_PAGE_SIZE,
            max_pages: MAX_PAGES,
            page_delay: Duration::from_millis(250),
            http: HttpClientConfig::default(),
        }
    }
}

#[derive(Debug)]
pub struct TicketmasterSource {
    http: HttpFetcher,
    base_url: String,
    api_key: String,
    page_size: u32,
    max_pages: u32,
    page_delay: Duration,
}

impl TicketmasterSource {
    pub fn new(config: TicketmasterConfig) -> anyhow::Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(config.http)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            page_size: clamp_page_size(config.page_size),
            max_pages: config.max_pages.max(1),
            page_delay: config.page_delay,
        })
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// One search call for a single page of a locality.
    pub async fn fetch_page(
        &self,
        locality: &Locality,
        window: &FetchWindow,
        page_size: u32,
        page_index: u32,
    ) -> Result<ProviderPage, AdapterError> {
        let url = format!("{}/events.json", self.base_url);
        let query = [
            ("apikey", self.api_key.clone()),
            ("countryCode", locality.country_code.clone()),
            ("city", locality.name.clone()),
            ("sort", SORT_ORDER.to_string()),
            ("size", page_size.to_string()),
            ("page", page_index.to_string()),
            ("startDateTime", window.start_param()),
            ("endDateTime", window.end_param()),
        ];

        let response = self.http.fetch_bytes(&url, &query).await?;
        serde_json::from_slice(&response.body).map_err(|source| AdapterError::Decode {
            locality: locality.name.clone(),
            page: page_index,
            source,
        })
    }

    /// Walks every page of a locality at `page_size` (clamped to the provider range).
    pub async fn fetch_locality_pages(
        &self,
        locality: &Locality,
        window: &FetchWindow,
        page_size: u32,
    ) -> Result<Vec<JsonValue>, AdapterError> {
        let page_size = clamp_page_size(page_size);
        let mut events = Vec::new();

        for page_index in 0..self.max_pages {
            if page_index > 0 {
                tokio::time::sleep(self.page_delay).await;
            }

            let page = self
                .fetch_page(locality, window, page_size, page_index)
                .await?;
            let info = page.page;
            let batch = page.into_events();
            debug!(
                locality = locality.name.as_str(),
                page = page_index,
                records = batch.len(),
                total_pages = info.map(|i| i.total_pages),
                "fetched page"
            );
            let exhausted = batch.is_empty();
            events.extend(batch);

            let Some(info) = info else {
                break;
            };
            let next_page = info.number.max(page_index) + 1;
            if exhausted
                || next_page >= info.total_pages
                || next_page.saturating_mul(page_size) >= DEEP_PAGING_LIMIT
            {
                break;
            }
        }

        Ok(events)
    }
}

#[async_trait]
impl EventSource for TicketmasterSource {
    fn source_id(&self) -> &'static str {
        SOURCE_TAG
    }

    async fn fetch_locality_events(
        &self,
        locality: &Locality,
        window: &FetchWindow,
    ) -> Result<Vec<JsonValue>, AdapterError> {
        self.fetch_locality_pages(locality, window, self.page_size).await
    }
}
