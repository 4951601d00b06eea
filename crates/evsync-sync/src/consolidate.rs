use std::collections::HashMap;

use evsync_core::{DedupeKey, NormalizedEventRow};

fn longer_description(existing: Option<String>, incoming: Option<String>) -> Option<String> {
    match (existing, incoming) {
        (Some(a), Some(b)) if b.chars().count() > a.chars().count() => Some(b),
        (Some(a), _) => Some(a),
        (None, b) => b,
    }
}

/// Folds `next` into `acc`. Identity fields stay first-seen.
pub fn merge_rows(acc: NormalizedEventRow, next: NormalizedEventRow) -> NormalizedEventRow {
    let end_date = match (acc.end_date, next.end_date) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    NormalizedEventRow {
        start_date: acc.start_date.min(next.start_date),
        end_date,
        description: longer_description(acc.description, next.description),
        image_url: acc.image_url.or(next.image_url),
        booking_url: acc.booking_url.or(next.booking_url),
        ..acc
    }
}

/// Collapses rows sharing a dedupe key, keeping first-seen order of keys.
pub fn consolidate(rows: Vec<NormalizedEventRow>) -> Vec<NormalizedEventRow> {
    let mut order: Vec<DedupeKey> = Vec::new();
    let mut buckets: HashMap<DedupeKey, NormalizedEventRow> = HashMap::with_capacity(rows.len());

    for row in rows {
        let key = row.dedupe_key();
        let merged = match buckets.remove(&key) {
            Some(acc) => merge_rows(acc, row),
            None => {
                order.push(key.clone());
                row
            }
        };
        buckets.insert(key, merged);
    }

    order
        .into_iter()
        .filter_map(|key| buckets.remove(&key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use evsync_adapters::{map_raw_record, MapContext};
    use evsync_core::{DEFAULT_RATING, EVENT_TYPE, PRICE_PLACEHOLDER, SOURCE_TAG};
    use uuid::Uuid;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, hour, 0, 0).single().unwrap()
    }

    fn row(title: &str, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> NormalizedEventRow {
        NormalizedEventRow {
            title: title.to_string(),
            event_type: EVENT_TYPE.into(),
            business_id: Uuid::nil(),
            created_by: Uuid::nil(),
            start_date: start,
            end_date: end,
            location: Some("Blue Room".into()),
            description: None,
            source: SOURCE_TAG.into(),
            image_url: None,
            price: PRICE_PLACEHOLDER.into(),
            rating: DEFAULT_RATING,
            booking_url: None,
            booking_contact: None,
        }
    }

    #[test]
    fn merge_keeps_earliest_start_and_latest_end() {
        let a = row("Gig", at(1, 20), Some(at(1, 22)));
        let b = row("gig", at(1, 18), Some(at(1, 23)));
        let merged = merge_rows(a, b);
        assert_eq!(merged.title, "Gig");
        assert_eq!(merged.start_date, at(1, 18));
        assert_eq!(merged.end_date, Some(at(1, 23)));
    }

    #[test]
    fn merge_adopts_the_only_present_end() {
        let merged = merge_rows(row("Gig", at(1, 20), None), row("Gig", at(1, 20), Some(at(1, 21))));
        assert_eq!(merged.end_date, Some(at(1, 21)));
        let merged = merge_rows(row("Gig", at(1, 20), None), row("Gig", at(1, 20), None));
        assert_eq!(merged.end_date, None);
    }

    #[test]
    fn merge_prefers_longer_description_and_first_urls() {
        let mut a = row("Gig", at(1, 20), None);
        a.description = Some("short".into());
        a.booking_url = Some("https://first.test".into());
        let mut b = row("Gig", at(1, 20), None);
        b.description = Some("considerably longer".into());
        b.image_url = Some("https://img.test/b.jpg".into());
        b.booking_url = Some("https://second.test".into());

        let merged = merge_rows(a, b);
        assert_eq!(merged.description.as_deref(), Some("considerably longer"));
        assert_eq!(merged.image_url.as_deref(), Some("https://img.test/b.jpg"));
        assert_eq!(merged.booking_url.as_deref(), Some("https://first.test"));

        let mut c = row("Gig", at(1, 20), None);
        c.description = Some("kept".into());
        let merged = merge_rows(c, row("Gig", at(1, 20), None));
        assert_eq!(merged.description.as_deref(), Some("kept"));
    }

    #[test]
    fn duplicates_collapse_regardless_of_order() {
        let rows = vec![
            row("Jazz Night", at(1, 20), Some(at(1, 22))),
            row("JAZZ NIGHT ", at(1, 18), Some(at(1, 21))),
            row(" jazz night", at(1, 21), Some(at(1, 23))),
        ];
        let orders: [[usize; 3]; 6] = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
        for order in orders {
            let input = order.iter().map(|&i| rows[i].clone()).collect::<Vec<_>>();
            let out = consolidate(input);
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].start_date, at(1, 18));
            assert_eq!(out[0].end_date, Some(at(1, 23)));
            assert!(out[0].end_date.unwrap() >= out[0].start_date);
        }
    }

    #[test]
    fn distinct_keys_survive_in_first_seen_order() {
        let mut elsewhere = row("Gig", at(1, 20), None);
        elsewhere.location = Some("Town Hall".into());
        let out = consolidate(vec![
            row("Gig", at(1, 20), None),
            row("Gig", at(2, 20), None),
            elsewhere,
            row("Gig", at(1, 9), None),
        ]);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].start_date, at(1, 9));
        assert_eq!(out[1].start_date, at(2, 20));
        assert_eq!(out[2].location.as_deref(), Some("Town Hall"));
    }

    #[test]
    fn jazz_night_records_from_the_provider_consolidate_to_one_row() {
        let ctx = MapContext {
            business_id: Uuid::from_u128(7),
            attributed_user: Uuid::from_u128(8),
        };
        let venue = serde_json::json!({ "venues": [{ "name": "Blue Room", "city": { "name": "Cape Town" } }] });
        let first = serde_json::json!({
            "id": "a",
            "name": "Jazz Night",
            "info": "Live quartet.",
            "dates": { "start": { "dateTime": "2025-06-01T18:00:00Z" } },
            "_embedded": venue.clone()
        });
        let second = serde_json::json!({
            "id": "b",
            "name": "JAZZ NIGHT ",
            "info": "Live quartet playing the Blue Note songbook.",
            "dates": { "start": { "localDate": "2025-06-01" } },
            "_embedded": venue
        });

        let rows = [first, second]
            .iter()
            .filter_map(|raw| map_raw_record(raw, &ctx))
            .collect::<Vec<_>>();
        assert_eq!(rows.len(), 2);

        let out = consolidate(rows);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "Jazz Night");
        assert_eq!(
            out[0].description.as_deref(),
            Some("Live quartet playing the Blue Note songbook.")
        );
        assert_eq!(out[0].start_date, at(1, 0));
        assert_eq!(out[0].end_date, Some(at(1, 18)));
    }
}
