// src/ingest/parse.rs
//! Table extraction and per-field tokenizers.
//!
//! The upstream page is plain server-rendered HTML with a single data table, so
//! rows and cells are located with tolerant regexes rather than a DOM.

use once_cell::sync::OnceCell;
use regex::Regex;

use crate::error::{FeedError, Result};
use crate::ingest::layout::{ColumnLayout, LayoutMode};
use crate::ingest::types::{Field, RawRow, SkipReason};

pub const BS_MARKER: &str = "B.S.:";
pub const AD_MARKER: &str = "A.D.:";
pub const LOCAL_MARKER: &str = "Local:";
pub const UTC_MARKER: &str = "UTC:";
/// Replaces an epicenter cell that leaked calendar text.
pub const EPICENTER_FALLBACK: &str = "Nepal";

#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub rows: Vec<RawRow>,
    pub skipped: Vec<SkipReason>,
    /// `None` when the document had no table.
    pub layout: Option<ColumnLayout>,
}

#[derive(Debug, Clone, PartialEq)]
struct Cell {
    header: bool,
    text: String,
}

fn re_table() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?is)<table\b[^>]*>(.*?)</table\s*>").expect("table regex"))
}

fn re_row() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr\s*>").expect("row regex"))
}

fn re_cell() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<t([dh])\b[^>]*>(.*?)</t[dh]\s*>").expect("cell regex")
    })
}

fn re_tags() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"))
}

/// Inner markup of the first `<table>`.
fn first_table(markup: &str) -> Option<&str> {
    re_table()
        .captures(markup)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn table_rows(table: &str) -> impl Iterator<Item = &str> {
    re_row()
        .captures_iter(table)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
}

fn row_cells(row: &str) -> Vec<Cell> {
    re_cell()
        .captures_iter(row)
        .map(|c| Cell {
            header: c.get(1).is_some_and(|m| m.as_str().eq_ignore_ascii_case("h")),
            text: cell_text(c.get(2).map(|m| m.as_str()).unwrap_or_default()),
        })
        .collect()
}

/// Strip tags (as spaces, so `<br>` keeps segments apart), decode entities,
/// collapse whitespace.
pub fn cell_text(inner: &str) -> String {
    let no_tags = re_tags().replace_all(inner, " ");
    let decoded = html_escape::decode_html_entities(&no_tags);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse every data row of the first table. A missing table yields an empty
/// outcome; short or blank rows are recorded in `skipped` and parsing continues.
pub fn parse(markup: &str, mode: LayoutMode) -> ParseOutcome {
    let Some(table) = first_table(markup) else {
        tracing::warn!(target: "ingest", "no table found in upstream markup");
        return ParseOutcome::default();
    };

    let mut rows = table_rows(table);
    let header: Vec<String> = rows
        .next()
        .map(|r| row_cells(r).into_iter().map(|c| c.text).collect())
        .unwrap_or_default();

    let data: Vec<Vec<Cell>> = rows
        .map(row_cells)
        // Extra header rows (e.g. a second <thead> line) are not data.
        .filter(|cells| !(cells.is_empty() || cells.iter().all(|c| c.header)))
        .collect();

    let layout = ColumnLayout::resolve(mode, &header, data.first().map(Vec::len));
    let mut out = ParseOutcome {
        rows: Vec::with_capacity(data.len()),
        skipped: Vec::new(),
        layout: Some(layout.clone()),
    };

    for (i, cells) in data.iter().enumerate() {
        let row = i + 1;
        if cells.len() < layout.min_cells {
            tracing::warn!(
                target: "ingest",
                row,
                cells = cells.len(),
                required = layout.min_cells,
                "skipping short row"
            );
            out.skipped.push(SkipReason::ShortRow {
                row,
                cells: cells.len(),
                required: layout.min_cells,
            });
            continue;
        }
        match parse_row(row, cells, &layout) {
            Ok(r) => out.rows.push(r),
            Err(e) => {
                tracing::warn!(target: "ingest", row, error = %e, "dropping row");
                out.skipped.push(SkipReason::Malformed {
                    row,
                    detail: e.to_string(),
                });
            }
        }
    }

    out
}

fn parse_row(row: usize, cells: &[Cell], layout: &ColumnLayout) -> Result<RawRow> {
    if cells.iter().all(|c| c.text.is_empty()) {
        return Err(FeedError::Parse("blank row".into()));
    }
    let text = |idx: usize| cell_at(cells, idx);

    let (date_bs, date_ad) = parse_date(text(layout.date)?);
    let (time_local, time_utc) = parse_time(text(layout.time)?);

    let source = layout
        .source
        .and_then(|i| cells.get(i))
        .map(|c| c.text.clone())
        .filter(|s| !s.is_empty());

    Ok(RawRow {
        row,
        date_bs,
        date_ad,
        time_local,
        time_utc,
        latitude: parse_coordinate(text(layout.latitude)?).unwrap_or(0.0),
        longitude: parse_coordinate(text(layout.longitude)?).unwrap_or(0.0),
        magnitude: parse_magnitude(text(layout.magnitude)?).unwrap_or(0.0),
        epicenter: parse_epicenter(text(layout.epicenter)?),
        source,
    })
}

fn cell_at(cells: &[Cell], idx: usize) -> Result<&str> {
    cells
        .get(idx)
        .map(|c| c.text.as_str())
        .ok_or_else(|| FeedError::Parse(format!("missing cell {idx}")))
}

/// Text following `marker`, up to `other` if it comes later.
fn segment_after(text: &str, marker: &str, other: &str) -> Field<String> {
    let Some(start) = text.find(marker).map(|i| i + marker.len()) else {
        return Field::Unparsed;
    };
    let rest = &text[start..];
    let end = rest.find(other).unwrap_or(rest.len());
    let seg = rest[..end].trim();
    if seg.is_empty() {
        Field::Unparsed
    } else {
        Field::Parsed(seg.to_string())
    }
}

/// Split a two-marker cell. Both halves are unparsed if either marker is missing.
fn split_pair(text: &str, first: &str, second: &str) -> (Field<String>, Field<String>) {
    if !(text.contains(first) && text.contains(second)) {
        return (Field::Unparsed, Field::Unparsed);
    }
    (
        segment_after(text, first, second),
        segment_after(text, second, first),
    )
}

/// `"B.S.: 2079-05-01 A.D.: 2022-08-17"` → (B.S., A.D.).
pub fn parse_date(text: &str) -> (Field<String>, Field<String>) {
    split_pair(text, BS_MARKER, AD_MARKER)
}

/// `"Local: 15:45 UTC: 10:00"` → (local, UTC).
pub fn parse_time(text: &str) -> (Field<String>, Field<String>) {
    split_pair(text, LOCAL_MARKER, UTC_MARKER)
}

pub fn parse_magnitude(text: &str) -> Field<f64> {
    let t = text.trim();
    let t = t.strip_prefix('M').unwrap_or(t).trim();
    match t.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Field::Parsed(v),
        _ => Field::Unparsed,
    }
}

pub fn parse_coordinate(text: &str) -> Field<f64> {
    let t = text.trim().trim_end_matches('°').trim();
    match t.parse::<f64>() {
        Ok(v) if v.is_finite() => Field::Parsed(v),
        _ => Field::Unparsed,
    }
}

pub fn parse_epicenter(text: &str) -> Field<String> {
    let t = text.trim();
    if t.is_empty() {
        Field::Unparsed
    } else if t.contains("B.S.") || t.contains("A.D.") {
        Field::Parsed(EPICENTER_FALLBACK.to_string())
    } else {
        Field::Parsed(t.to_string())
    }
}
