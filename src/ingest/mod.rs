// src/ingest/mod.rs
pub mod enrich;
pub mod fetch;
pub mod layout;
pub mod normalize;
pub mod parse;
pub mod types;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;

use crate::error::Result;
use crate::ingest::layout::LayoutMode;
use crate::ingest::types::{Fetcher, Record, SkipReason};

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_rows_total", "Table rows parsed into raw fields.");
        describe_counter!(
            "ingest_rows_skipped_total",
            "Rows dropped by the parser (short or malformed)."
        );
        describe_counter!(
            "ingest_records_rejected_total",
            "Records dropped by validation."
        );
        describe_counter!(
            "ingest_fetch_errors_total",
            "Upstream fetch failures (transport or status)."
        );
        describe_histogram!("ingest_parse_ms", "Parse + normalize time in milliseconds.");
    });
}

/// Everything one pass over a document produced, including what was dropped.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// Valid records, most recent first.
    pub records: Vec<Record>,
    /// Rows the parser could not use.
    pub skipped: Vec<SkipReason>,
    /// Rows that parsed but failed validation.
    pub rejected: Vec<SkipReason>,
    pub table_found: bool,
}

impl IngestReport {
    pub fn dropped(&self) -> usize {
        self.skipped.len() + self.rejected.len()
    }
}

/// Parse → normalize → order for markup already in hand.
pub fn process(markup: &str, mode: LayoutMode) -> IngestReport {
    ensure_metrics_described();
    let t0 = std::time::Instant::now();

    let parsed = parse::parse(markup, mode);
    let table_found = parsed.layout.is_some();
    counter!("ingest_rows_total").increment(parsed.rows.len() as u64);
    counter!("ingest_rows_skipped_total").increment(parsed.skipped.len() as u64);

    let normalized = normalize::normalize(parsed.rows);
    counter!("ingest_records_rejected_total").increment(normalized.rejected.len() as u64);
    let records = normalize::order(normalized.records);

    histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    tracing::info!(
        target: "ingest",
        kept = records.len(),
        skipped = parsed.skipped.len(),
        rejected = normalized.rejected.len(),
        "parsed upstream table"
    );

    IngestReport {
        records,
        skipped: parsed.skipped,
        rejected: normalized.rejected,
        table_found,
    }
}

/// Change fingerprint of a record set: epicenter of the most recent valid record.
/// Rows the upstream lists first but that fail validation (a preliminary event
/// without a magnitude, say) never become the fingerprint.
pub fn latest_key(records: &[Record]) -> Option<String> {
    records.first().map(|r| r.epicenter.clone())
}

/// `latest_key` of the records a document would produce.
pub fn probe_latest(markup: &str, mode: LayoutMode) -> Option<String> {
    latest_key(&process(markup, mode).records)
}

/// Fetch `url` once and process it. Only transport failures are errors.
pub async fn run_once(fetcher: &dyn Fetcher, url: &str, mode: LayoutMode) -> Result<IngestReport> {
    ensure_metrics_described();
    let markup = fetcher.fetch(url).await?;
    Ok(process(&markup, mode))
}
