use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use evsync_core::{
    NormalizedEventRow, DEFAULT_RATING, EVENT_TYPE, PLACEHOLDER_TITLE, PRICE_PLACEHOLDER,
    SOURCE_TAG,
};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{DatePoint, ExternalEventRecord};

const LOCATION_SEPARATOR: &str = " · ";
const TAG_SEPARATOR: &str = " / ";
const PLACEHOLDER_TAGS: [&str; 2] = ["undefined", "other"];

/// Identity values stamped on every mapped row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapContext {
    pub business_id: Uuid,
    pub attributed_user: Uuid,
}

#[derive(Debug, Error)]
pub enum MapError {
    #[error("record does not match the provider shape: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unparseable {field} timestamp {value:?}")]
    Timestamp { field: &'static str, value: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingOutcome {
    pub rows: Vec<NormalizedEventRow>,
    pub dropped: usize,
}

fn text_or_none(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_instant(field: &'static str, value: &str) -> Result<DateTime<Utc>, MapError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| MapError::Timestamp {
            field,
            value: value.to_string(),
        })
}

fn parse_day(field: &'static str, value: &str, time: NaiveTime) -> Result<DateTime<Utc>, MapError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|day| day.and_time(time).and_utc())
        .map_err(|_| MapError::Timestamp {
            field,
            value: value.to_string(),
        })
}

/// Exact instant first, then the calendar day at `day_time` UTC. An unparseable
/// instant only errors when there is no calendar day to fall back on.
fn resolve_point(
    field: &'static str,
    point: Option<&DatePoint>,
    day_time: NaiveTime,
) -> Result<Option<DateTime<Utc>>, MapError> {
    let Some(point) = point else {
        return Ok(None);
    };
    let exact = text_or_none(point.date_time.as_deref()).map(|value| parse_instant(field, &value));
    match (exact, text_or_none(point.local_date.as_deref())) {
        (Some(Ok(instant)), _) => Ok(Some(instant)),
        (_, Some(day)) => parse_day(field, &day, day_time).map(Some),
        (Some(Err(err)), None) => Err(err),
        (None, None) => Ok(None),
    }
}

fn compose_location(record: &ExternalEventRecord) -> Option<String> {
    let venue = record.first_venue()?;
    let parts = [
        text_or_none(venue.name.as_deref()),
        text_or_none(venue.city.as_ref().and_then(|c| c.name.as_deref())),
        text_or_none(venue.country.as_ref().and_then(|c| c.name.as_deref())),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(LOCATION_SEPARATOR))
    }
}

fn synthesize_description(record: &ExternalEventRecord) -> Option<String> {
    let classification = record.classifications.as_ref()?.first()?;
    let mut tags: Vec<String> = Vec::new();
    for named in [
        &classification.segment,
        &classification.genre,
        &classification.sub_genre,
    ] {
        let Some(tag) = text_or_none(named.as_ref().and_then(|n| n.name.as_deref())) else {
            continue;
        };
        if PLACEHOLDER_TAGS.contains(&tag.to_lowercase().as_str()) || tags.contains(&tag) {
            continue;
        }
        tags.push(tag);
    }
    if tags.is_empty() {
        return None;
    }

    let tags = tags.join(TAG_SEPARATOR);
    match text_or_none(record.first_venue().and_then(|v| v.name.as_deref())) {
        Some(venue) => Some(format!("{tags} at {venue}")),
        None => Some(tags),
    }
}

fn widest_image(record: &ExternalEventRecord) -> Option<String> {
    let mut best: Option<(u32, String)> = None;
    for image in record.images.iter().flatten() {
        let Some(url) = text_or_none(image.url.as_deref()) else {
            continue;
        };
        let width = image.width.unwrap_or(0);
        if best.as_ref().map_or(true, |(w, _)| width > *w) {
            best = Some((width, url));
        }
    }
    best.map(|(_, url)| url)
}

/// Maps one provider record. `Ok(None)` means the record has no determinable start.
pub fn map_record(
    record: &ExternalEventRecord,
    ctx: &MapContext,
) -> Result<Option<NormalizedEventRow>, MapError> {
    let dates = record.dates.as_ref();
    let start_point = dates.and_then(|d| d.start.as_ref());
    let Some(start_date) = resolve_point("start", start_point, NaiveTime::default())? else {
        return Ok(None);
    };
    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default();
    let end_date = resolve_point("end", dates.and_then(|d| d.end.as_ref()), end_of_day)
        .unwrap_or_else(|err| {
            debug!(error = %err, "unusable end timestamp; falling back to start");
            None
        })
        .unwrap_or(start_date)
        .max(start_date);

    let description = text_or_none(record.info.as_deref())
        .or_else(|| text_or_none(record.description.as_deref()))
        .or_else(|| synthesize_description(record));

    Ok(Some(NormalizedEventRow {
        title: text_or_none(record.name.as_deref()).unwrap_or_else(|| PLACEHOLDER_TITLE.to_string()),
        event_type: EVENT_TYPE.to_string(),
        business_id: ctx.business_id,
        created_by: ctx.attributed_user,
        start_date,
        end_date: Some(end_date),
        location: compose_location(record),
        description,
        source: SOURCE_TAG.to_string(),
        image_url: widest_image(record),
        price: PRICE_PLACEHOLDER.to_string(),
        rating: DEFAULT_RATING,
        booking_url: text_or_none(record.url.as_deref()),
        booking_contact: None,
    }))
}

/// Decodes and maps one raw record, logging and dropping it on any failure.
pub fn map_raw_record(raw: &JsonValue, ctx: &MapContext) -> Option<NormalizedEventRow> {
    let name = raw.get("name").and_then(JsonValue::as_str).unwrap_or_default();
    let id = raw.get("id").and_then(JsonValue::as_str).unwrap_or_default();

    let mapped = serde_json::from_value::<ExternalEventRecord>(raw.clone())
        .map_err(MapError::from)
        .and_then(|record| map_record(&record, ctx));

    match mapped {
        Ok(Some(row)) => Some(row),
        Ok(None) => {
            debug!(id, name, "dropping record without a start date");
            None
        }
        Err(err) => {
            warn!(id, name, error = %err, "dropping record that failed to map");
            None
        }
    }
}

pub fn map_records(raw: &[JsonValue], ctx: &MapContext) -> MappingOutcome {
    let rows = raw
        .iter()
        .filter_map(|record| map_raw_record(record, ctx))
        .collect::<Vec<_>>();
    MappingOutcome {
        dropped: raw.len() - rows.len(),
        rows,
    }
}
