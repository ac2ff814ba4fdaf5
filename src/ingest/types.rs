// src/ingest/types.rs
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Placeholder used for any text field that could not be read.
pub const UNKNOWN: &str = "Unknown";
pub const DEFAULT_SOURCE: &str = "Nepal Seismological Center";
/// Image every parsed record carries until enrichment replaces it.
pub const PLACEHOLDER_IMAGE: &str = "/static/earthquake.jpg";

/// One seismic event as served to clients and written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub date_bs: String, // Bikram Sambat label, best-effort
    pub date_ad: String, // YYYY-MM-DD
    pub time_local: String,
    pub time_utc: String,
    /// 0.0 means "not provided".
    pub latitude: f64,
    /// 0.0 means "not provided".
    pub longitude: f64,
    pub magnitude: f64,
    pub epicenter: String,
    pub source: String,
    pub image_url: String,
}

impl Record {
    pub fn is_valid(&self) -> bool {
        self.date_ad != UNKNOWN && self.magnitude > 0.0 && self.epicenter != UNKNOWN
    }

    /// First failed validity check, if any.
    pub fn invalid_reason(&self) -> Option<&'static str> {
        if self.date_ad == UNKNOWN {
            Some("missing gregorian date")
        } else if !(self.magnitude > 0.0) {
            Some("missing magnitude")
        } else if self.epicenter == UNKNOWN {
            Some("missing epicenter")
        } else {
            None
        }
    }

    /// Lexicographic recency key; only meaningful for normalized date/time strings.
    pub fn recency_key(&self) -> String {
        format!("{}{}", self.date_ad, self.time_utc)
    }
}

/// Result of a single field tokenizer.
#[derive(Debug, Clone, PartialEq)]
pub enum Field<T> {
    Parsed(T),
    Unparsed,
}

impl<T> Field<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Field::Parsed(v) => Some(v),
            Field::Unparsed => None,
        }
    }

    pub fn unwrap_or(self, default: T) -> T {
        self.ok().unwrap_or(default)
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, Field::Parsed(_))
    }
}

impl Field<String> {
    pub fn or_unknown(self) -> String {
        match self {
            Field::Parsed(s) => s,
            Field::Unparsed => UNKNOWN.to_string(),
        }
    }
}

/// One table row after cell extraction and field tokenizing, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// 1-based position among the table's data rows.
    pub row: usize,
    pub date_bs: Field<String>,
    pub date_ad: Field<String>,
    pub time_local: Field<String>,
    pub time_utc: Field<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub magnitude: f64,
    pub epicenter: Field<String>,
    pub source: Option<String>,
}

/// Why a row or record was dropped. Collected instead of swallowed so callers can
/// assert on drop counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    ShortRow {
        row: usize,
        cells: usize,
        required: usize,
    },
    Malformed {
        row: usize,
        detail: String,
    },
    Invalid {
        row: usize,
        detail: String,
    },
}

impl SkipReason {
    pub fn row(&self) -> usize {
        match self {
            SkipReason::ShortRow { row, .. }
            | SkipReason::Malformed { row, .. }
            | SkipReason::Invalid { row, .. } => *row,
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ShortRow {
                row,
                cells,
                required,
            } => write!(f, "row {row}: {cells} cells, need {required}"),
            SkipReason::Malformed { row, detail } => write!(f, "row {row}: malformed ({detail})"),
            SkipReason::Invalid { row, detail } => write!(f, "row {row}: invalid ({detail})"),
        }
    }
}

/// Retrieves raw markup from the upstream source.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}
