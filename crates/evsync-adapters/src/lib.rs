//! Event provider adapter: raw record shapes, paginated fetching, and row mapping.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use evsync_storage::FetchError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

mod mapper;
mod ticketmaster;

pub use mapper::{map_raw_record, map_record, map_records, MapContext, MapError, MappingOutcome};
pub use ticketmaster::{clamp_page_size, TicketmasterConfig, TicketmasterSource};

pub const CRATE_NAME: &str = "evsync-adapters";

/// Provider-shaped event payload. Every field is optional; the mapper decides what is usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEventRecord {
    pub id: Option<String>,
    pub name: Option<String>,
    pub url: Option<String>,
    pub info: Option<String>,
    pub description: Option<String>,
    pub images: Option<Vec<ProviderImage>>,
    pub dates: Option<EventDates>,
    pub price_ranges: Option<Vec<PriceRange>>,
    pub classifications: Option<Vec<Classification>>,
    #[serde(rename = "_embedded")]
    pub embedded: Option<EventEmbedded>,
}

impl ExternalEventRecord {
    pub fn first_venue(&self) -> Option<&Venue> {
        self.embedded.as_ref()?.venues.as_ref()?.first()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderImage {
    pub url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventDates {
    pub start: Option<DatePoint>,
    pub end: Option<DatePoint>,
}

/// Either an exact instant (`dateTime`) or a calendar day (`localDate`), or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatePoint {
    pub date_time: Option<String>,
    pub local_date: Option<String>,
    pub local_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventEmbedded {
    pub venues: Option<Vec<Venue>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub name: Option<String>,
    pub city: Option<NamedRef>,
    pub country: Option<Country>,
    pub address: Option<Address>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedRef {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Country {
    pub name: Option<String>,
    pub country_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub line1: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub currency: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub segment: Option<NamedRef>,
    pub genre: Option<NamedRef>,
    pub sub_genre: Option<NamedRef>,
}

/// One page of search results. Events stay raw so one malformed record cannot sink a page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderPage {
    #[serde(rename = "_embedded")]
    pub embedded: Option<PageEmbedded>,
    pub page: Option<PageInfo>,
}

impl ProviderPage {
    pub fn into_events(self) -> Vec<JsonValue> {
        self.embedded.map(|e| e.events).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageEmbedded {
    #[serde(default)]
    pub events: Vec<JsonValue>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageInfo {
    pub size: u32,
    pub total_elements: u64,
    pub total_pages: u32,
    pub number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locality {
    pub name: String,
    pub country_code: String,
}

/// Search window sent to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    pub fn starting_at(start: DateTime<Utc>, days: u32) -> Self {
        Self {
            start,
            end: start + Duration::days(i64::from(days)),
        }
    }

    /// The provider rejects timestamps that carry fractional seconds.
    pub fn format_instant(instant: DateTime<Utc>) -> String {
        instant.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }

    pub fn start_param(&self) -> String {
        Self::format_instant(self.start)
    }

    pub fn end_param(&self) -> String {
        Self::format_instant(self.end)
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("decoding page {page} for {locality}: {source}")]
    Decode {
        locality: String,
        page: u32,
        #[source]
        source: serde_json::Error,
    },
}

/// Fetch seam between the orchestrator and a concrete provider.
#[async_trait]
pub trait EventSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn fetch_locality_events(
        &self,
        locality: &Locality,
        window: &FetchWindow,
    ) -> Result<Vec<JsonValue>, AdapterError>;
}
