// src/ingest/layout.rs
//! Column layouts of the upstream table.
//!
//! The upstream site has shipped several shapes over time (7, 8 and 9 columns,
//! with fields in varying order), so positions are resolved per document:
//! a configured mode wins, otherwise the header row is matched by keyword,
//! otherwise the first data row's width picks a built-in layout.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    #[default]
    Auto,
    Compact,
    Extended,
}

impl std::str::FromStr for LayoutMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(LayoutMode::Auto),
            "compact" => Ok(LayoutMode::Compact),
            "extended" => Ok(LayoutMode::Extended),
            other => Err(format!("unknown layout `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    Compact,
    Extended,
    /// Positions taken from the header row.
    Header,
}

/// Cell index of each field for one table shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    pub kind: LayoutKind,
    pub min_cells: usize,
    pub date: usize,
    pub time: usize,
    pub latitude: usize,
    pub longitude: usize,
    pub magnitude: usize,
    pub epicenter: usize,
    pub source: Option<usize>,
}

/// Date, time, lat, lon, magnitude, epicenter, remarks.
pub const COMPACT: ColumnLayout = ColumnLayout {
    kind: LayoutKind::Compact,
    min_cells: 7,
    date: 0,
    time: 1,
    latitude: 2,
    longitude: 3,
    magnitude: 4,
    epicenter: 5,
    source: None,
};

/// Compact plus a trailing source column.
pub const EXTENDED: ColumnLayout = ColumnLayout {
    kind: LayoutKind::Extended,
    min_cells: 8,
    date: 0,
    time: 1,
    latitude: 2,
    longitude: 3,
    magnitude: 4,
    epicenter: 5,
    source: Some(7),
};

impl ColumnLayout {
    /// Match header labels against known field names. Returns `None` unless every
    /// required field is found.
    pub fn from_header<S: AsRef<str>>(labels: &[S]) -> Option<Self> {
        let find = |keys: &[&str]| {
            labels.iter().position(|l| {
                let l = l.as_ref().to_ascii_lowercase();
                keys.iter().any(|k| l.contains(k))
            })
        };

        let date = find(&["date"])?;
        let time = find(&["time"])?;
        let latitude = find(&["lat"])?;
        let longitude = find(&["lon"])?;
        let magnitude = find(&["mag"])?;
        let epicenter = find(&["epicent", "location", "place", "region"])?;
        let source = find(&["source", "agency"]);

        let required = [date, time, latitude, longitude, magnitude, epicenter];
        // Distinct columns only; a single "Date/Time" header is not enough.
        let mut seen = required.to_vec();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != required.len() {
            return None;
        }

        // Rows must still carry at least the compact width.
        let widest = required.iter().copied().max().unwrap_or(0) + 1;
        Some(Self {
            kind: LayoutKind::Header,
            min_cells: widest.max(COMPACT.min_cells),
            date,
            time,
            latitude,
            longitude,
            magnitude,
            epicenter,
            source,
        })
    }

    /// Built-in layout for a data row of `cells` width.
    pub fn for_width(cells: usize) -> Self {
        if cells >= EXTENDED.min_cells {
            EXTENDED
        } else {
            COMPACT
        }
    }

    /// Resolve the layout for one document.
    pub fn resolve<S: AsRef<str>>(
        mode: LayoutMode,
        header: &[S],
        first_row_width: Option<usize>,
    ) -> Self {
        match mode {
            LayoutMode::Compact => COMPACT,
            LayoutMode::Extended => EXTENDED,
            LayoutMode::Auto => Self::from_header(header)
                .unwrap_or_else(|| Self::for_width(first_row_width.unwrap_or(0))),
        }
    }
}
