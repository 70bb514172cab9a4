// src/storage/mod.rs

//! Storage abstractions for ledger persistence.
//!
//! Each source owns two artifacts under the data directory:
//!
//! ```text
//! data/
//! ├── {source}_master.csv        # Append-only history, one row per accepted record
//! └── {source}_new_entries.json  # This run's delta, replaced every run
//! ```
//!
//! The master store is the only state carried across runs; the ledger is
//! rebuilt from it at the start of each run.

pub mod csv;
pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::models::{LedgerEntry, RunDelta, SourceDescriptor};

pub use local::LocalStorage;

/// Leading master store column holding the fingerprint.
pub const ID_COLUMN: &str = "id";
/// Trailing master store column holding the acceptance timestamp.
pub const TIMESTAMP_COLUMN: &str = "scraped_at";
/// Delta item member holding the change kind.
pub const CHANGE_FIELD: &str = "change";

/// Master store header for a source: `id`, the columns, `scraped_at`.
pub fn store_header(columns: &[String]) -> Vec<String> {
    let mut header = Vec::with_capacity(columns.len() + 2);
    header.push(ID_COLUMN.to_string());
    header.extend(columns.iter().cloned());
    header.push(TIMESTAMP_COLUMN.to_string());
    header
}

/// Timestamp format used in stores and deltas.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a stored timestamp. Offset-less ISO timestamps are read as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Some(at.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Outcome recorded in a delta document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaStatus {
    Ok,
    Failed,
}

/// Delta output document for one source and one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaDocument {
    pub source: String,
    pub generated_at: DateTime<Utc>,
    pub status: DeltaStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub count: usize,
    /// Items in store field order: `id`, columns, `scraped_at`, `change`
    pub items: Vec<Map<String, Value>>,
}

impl DeltaDocument {
    /// Build the document for a run; `error` marks the source as failed.
    pub fn build(source: &SourceDescriptor, delta: &RunDelta, error: Option<&str>) -> Self {
        let items: Vec<Map<String, Value>> = delta
            .entries
            .iter()
            .map(|entry| Self::item(source, entry))
            .collect();

        Self {
            source: source.id.clone(),
            generated_at: Utc::now(),
            status: if error.is_some() {
                DeltaStatus::Failed
            } else {
                DeltaStatus::Ok
            },
            error: error.map(str::to_string),
            count: items.len(),
            items,
        }
    }

    fn item(source: &SourceDescriptor, entry: &LedgerEntry) -> Map<String, Value> {
        let mut item = Map::new();
        item.insert(
            ID_COLUMN.to_string(),
            Value::String(entry.fingerprint.to_string()),
        );
        for (column, value) in source.columns.iter().zip(&entry.values) {
            item.insert(column.clone(), Value::String(value.clone()));
        }
        item.insert(
            TIMESTAMP_COLUMN.to_string(),
            Value::String(format_timestamp(&entry.accepted_at)),
        );
        item.insert(
            CHANGE_FIELD.to_string(),
            serde_json::to_value(entry.change).unwrap_or(Value::Null),
        );
        item
    }
}

/// Persistence backend for master stores and deltas.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All persisted entries for a source, aligned with its configured
    /// columns. A missing store yields an empty list.
    async fn load_entries(&self, source: &SourceDescriptor) -> Result<Vec<LedgerEntry>>;

    /// Append entries to the master store, creating it on first write.
    /// Never leaves a partially written store behind.
    async fn append(&self, source: &SourceDescriptor, entries: &[LedgerEntry]) -> Result<()>;

    /// Replace the delta output for a source. An empty delta is valid.
    async fn write_delta(
        &self,
        source: &SourceDescriptor,
        delta: &RunDelta,
        error: Option<&str>,
    ) -> Result<()>;

    /// Replace the whole master store atomically (schema migration only).
    async fn rewrite(&self, source: &SourceDescriptor, entries: &[LedgerEntry]) -> Result<()>;

    /// Header of the persisted master store, if one exists.
    async fn stored_header(&self, source: &SourceDescriptor) -> Result<Option<Vec<String>>>;

    /// Last delta document written for a source, if any.
    async fn load_delta(&self, source: &SourceDescriptor) -> Result<Option<DeltaDocument>>;

    /// Whether the persisted header differs from the configured schema.
    async fn needs_migration(&self, source: &SourceDescriptor) -> Result<bool> {
        Ok(self
            .stored_header(source)
            .await?
            .is_some_and(|header| header != store_header(&source.columns)))
    }
}
