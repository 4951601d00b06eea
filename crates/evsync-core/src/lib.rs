//! Core domain model for event ingestion: normalized rows, dedupe keys, and run outcomes.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "evsync-core";

/// Source marker written on every ingested row; cleanup only touches rows carrying it.
pub const SOURCE_TAG: &str = "ticketmaster";
pub const EVENT_TYPE: &str = "event";
pub const PLACEHOLDER_TITLE: &str = "Untitled Event";
pub const PRICE_PLACEHOLDER: &str = "See booking site";
pub const DEFAULT_RATING: f64 = 0.0;

const DEDUPE_KEY_SEPARATOR: &str = "|";

/// The unit persisted by the gateway. Field names match the `events` table columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEventRow {
    pub title: String,
    pub event_type: String,
    pub business_id: Uuid,
    pub created_by: Uuid,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub source: String,
    pub image_url: Option<String>,
    pub price: String,
    pub rating: f64,
    pub booking_url: Option<String>,
    pub booking_contact: Option<String>,
}

impl NormalizedEventRow {
    pub fn dedupe_key(&self) -> DedupeKey {
        build_dedupe_key(
            &self.title,
            &self.start_date.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.location.as_deref(),
        )
    }
}

/// Derived grouping key: normalized title, start day, normalized location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupeKey(String);

impl DedupeKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_key_fragment(input: &str) -> String {
    input.trim().to_lowercase()
}

/// Builds the composite key from a title, an ISO-8601 start string and an optional location.
///
/// Only the date prefix of `start_date_iso` participates, so two rows starting on the
/// same day at different times share a key.
pub fn build_dedupe_key(title: &str, start_date_iso: &str, location: Option<&str>) -> DedupeKey {
    let day = start_date_iso
        .split('T')
        .next()
        .unwrap_or(start_date_iso)
        .trim();
    DedupeKey(
        [
            normalize_key_fragment(title),
            day.to_string(),
            normalize_key_fragment(location.unwrap_or_default()),
        ]
        .join(DEDUPE_KEY_SEPARATOR),
    )
}

/// Per-batch counts returned by the remote merge procedure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    pub inserted: u64,
    pub updated: u64,
}

/// Diagnostic detail captured from a failed store call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub code: Option<String>,
    pub details: Option<String>,
    pub hint: Option<String>,
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code {code})")?;
        }
        if let Some(details) = &self.details {
            write!(f, "; details: {details}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "; hint: {hint}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub batch_index: usize,
    pub row_count: usize,
    pub error: ErrorDetail,
}

/// Aggregate outcome of one `upsert` call across all batches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertReport {
    pub inserted: u64,
    pub updated: u64,
    pub failures: Vec<BatchFailure>,
}

impl UpsertReport {
    pub fn record_success(&mut self, counts: BatchCounts) {
        self.inserted += counts.inserted;
        self.updated += counts.updated;
    }

    pub fn record_failure(&mut self, failure: BatchFailure) {
        self.failures.push(failure);
    }

    pub fn failed_rows(&self) -> usize {
        self.failures.iter().map(|f| f.row_count).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One aggregate record logged at the end of every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub source: String,
    pub fetched: usize,
    pub mapped: usize,
    pub consolidated: usize,
    pub inserted: u64,
    pub updated: u64,
    pub failed: usize,
    pub attributed_identity: Uuid,
}
