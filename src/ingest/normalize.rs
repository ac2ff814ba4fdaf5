// src/ingest/normalize.rs
//! Raw rows → validated records, and recency ordering.
//!
//! Ordering compares `date_ad + time_utc` as plain strings, which is only sound
//! because this module rewrites both into fixed-width zero-padded forms.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{NaiveDate, NaiveTime};

use crate::ingest::types::{
    Field, RawRow, Record, SkipReason, DEFAULT_SOURCE, PLACEHOLDER_IMAGE, UNKNOWN,
};

const DATE_INPUTS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"];

#[derive(Debug, Clone, Default)]
pub struct NormalizeOutcome {
    pub records: Vec<Record>,
    pub rejected: Vec<SkipReason>,
}

/// `YYYY-MM-DD`, or `None` if the text is not a calendar date.
pub fn normalize_date(text: &str) -> Option<String> {
    let t = text.split_whitespace().next()?;
    DATE_INPUTS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(t, fmt).ok())
        .map(|d| d.format("%Y-%m-%d").to_string())
}

/// `HH:MM` or `HH:MM:SS` (seconds kept when given).
pub fn normalize_time(text: &str) -> Option<String> {
    let t = text.split_whitespace().next()?;
    if let Ok(v) = NaiveTime::parse_from_str(t, "%H:%M:%S") {
        return Some(v.format("%H:%M:%S").to_string());
    }
    NaiveTime::parse_from_str(t, "%H:%M")
        .ok()
        .map(|v| v.format("%H:%M").to_string())
}

fn date_field(f: Field<String>) -> String {
    f.ok()
        .and_then(|s| normalize_date(&s))
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn time_field(f: Field<String>) -> String {
    f.ok()
        .and_then(|s| normalize_time(&s))
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Typed record from a raw row, before validation.
pub fn to_record(raw: RawRow) -> Record {
    Record {
        // B.S. days run to 32, so this label is kept verbatim.
        date_bs: raw.date_bs.or_unknown(),
        date_ad: date_field(raw.date_ad),
        time_local: time_field(raw.time_local),
        time_utc: time_field(raw.time_utc),
        latitude: raw.latitude,
        longitude: raw.longitude,
        magnitude: raw.magnitude,
        epicenter: raw.epicenter.or_unknown(),
        source: raw.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
        image_url: PLACEHOLDER_IMAGE.to_string(),
    }
}

/// Convert rows and keep only valid records. Rejections are reported, not logged
/// as errors: incomplete upstream rows are routine.
pub fn normalize(rows: Vec<RawRow>) -> NormalizeOutcome {
    let mut out = NormalizeOutcome {
        records: Vec::with_capacity(rows.len()),
        rejected: Vec::new(),
    };
    for raw in rows {
        let row = raw.row;
        let rec = to_record(raw);
        match rec.invalid_reason() {
            None => out.records.push(rec),
            Some(why) => {
                tracing::debug!(target: "ingest", row, reason = why, "rejecting record");
                out.rejected.push(SkipReason::Invalid {
                    row,
                    detail: why.to_string(),
                });
            }
        }
    }
    out
}

pub fn filter_valid(records: Vec<Record>) -> Vec<Record> {
    records.into_iter().filter(Record::is_valid).collect()
}

/// Most recent first. Drops records whose date or UTC time is unknown, and exact
/// repeats of an earlier record.
pub fn order(records: Vec<Record>) -> Vec<Record> {
    let mut seen = HashSet::new();
    let mut out: Vec<Record> = records
        .into_iter()
        .filter(|r| r.date_ad != UNKNOWN && r.time_utc != UNKNOWN)
        .filter(|r| {
            seen.insert((
                r.date_ad.clone(),
                r.time_utc.clone(),
                r.epicenter.clone(),
                r.magnitude.to_bits(),
            ))
        })
        .collect();
    // Stable: equal keys keep their input order.
    out.sort_by(|a, b| recency_cmp(b, a));
    out
}

fn recency_cmp(a: &Record, b: &Record) -> Ordering {
    a.date_ad
        .cmp(&b.date_ad)
        .then_with(|| a.time_utc.cmp(&b.time_utc))
}
