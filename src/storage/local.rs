// src/storage/local.rs

//! Local filesystem storage implementation.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── {source}_master.csv         # id, columns..., scraped_at
//! └── {source}_new_entries.json   # DeltaDocument
//! ```
//!
//! Every write goes to a sibling `.tmp` file first and is renamed into place,
//! so a failed write leaves the previous file untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{ChangeKind, Fingerprint, LedgerEntry, RunDelta, SourceDescriptor};
use crate::pipeline::fingerprint::Fingerprinter;
use crate::storage::csv;
use crate::storage::{
    DeltaDocument, ID_COLUMN, RecordStore, TIMESTAMP_COLUMN, format_timestamp, parse_timestamp,
    store_header,
};

/// Parsed master store contents.
#[derive(Debug, Clone, Default)]
pub struct StoredTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl StoredTable {
    fn parse(text: &str) -> Option<Self> {
        let mut rows = csv::parse_rows(text).into_iter();
        let header = rows.next()?;
        Some(Self {
            header,
            rows: rows.collect(),
        })
    }

    /// Convert rows into ledger entries aligned with the source's columns.
    ///
    /// Columns are matched by header name, so a store written with an older
    /// schema still loads. Stored ids are trusted only when the header
    /// matches the configured schema; otherwise keys are recomputed from the
    /// identity fields where possible. Rows with neither come back with a
    /// blank fingerprint.
    fn into_entries(self, source: &SourceDescriptor) -> Vec<LedgerEntry> {
        let positions: HashMap<&str, usize> = self
            .header
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim(), i))
            .collect();
        let current_schema = self.header == store_header(&source.columns);
        let fingerprinter = Fingerprinter::new(source);
        let id_pos = positions.get(ID_COLUMN).copied();
        let ts_pos = positions.get(TIMESTAMP_COLUMN).copied();

        let mut entries = Vec::with_capacity(self.rows.len());
        for (line, row) in self.rows.iter().enumerate() {
            let values: Vec<String> = source
                .columns
                .iter()
                .map(|column| {
                    positions
                        .get(column.as_str())
                        .and_then(|&i| row.get(i))
                        .cloned()
                        .unwrap_or_default()
                })
                .collect();

            let stored_id = id_pos
                .and_then(|i| row.get(i))
                .map(|id| id.trim())
                .filter(|id| !id.is_empty())
                .map(Fingerprint::from_stored);
            let recomputed = || fingerprinter.key_for_values(&values).ok();
            let fingerprint = if current_schema {
                stored_id.or_else(recomputed)
            } else {
                recomputed().or(stored_id)
            };

            // Kept with a blank id so a rewrite never drops history; the
            // ledger ignores blank ids.
            let fingerprint = fingerprint.unwrap_or_else(|| {
                log::warn!(
                    "[{}] master row {} has no usable id, keeping it without one",
                    source.id,
                    line + 2
                );
                Fingerprint::from_stored("")
            });

            let accepted_at = ts_pos
                .and_then(|i| row.get(i))
                .and_then(|ts| parse_timestamp(ts))
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

            entries.push(LedgerEntry {
                fingerprint,
                values,
                accepted_at,
                change: ChangeKind::New,
            });
        }
        entries
    }
}

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Path of a source's master store.
    pub fn master_path(&self, source: &SourceDescriptor) -> PathBuf {
        self.root_dir.join(format!("{}_master.csv", source.id))
    }

    /// Path of a source's delta output.
    pub fn delta_path(&self, source: &SourceDescriptor) -> PathBuf {
        self.root_dir.join(format!("{}_new_entries.json", source.id))
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::persistence(parent, e))?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.ensure_dir(path).await?;

        let tmp = path.with_extension("tmp");
        let staged = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, path).await
        }
        .await;

        if let Err(e) = staged {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(AppError::persistence(path, e));
        }
        Ok(())
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::persistence(path, e)),
        }
    }

    async fn read_text(&self, path: &Path) -> Result<Option<String>> {
        match self.read_bytes(path).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| AppError::persistence(path, e)),
            None => Ok(None),
        }
    }

    /// Read and parse the master store; `None` when absent or empty.
    pub async fn read_table(&self, source: &SourceDescriptor) -> Result<Option<StoredTable>> {
        let path = self.master_path(source);
        Ok(self
            .read_text(&path)
            .await?
            .and_then(|text| StoredTable::parse(&text)))
    }

    fn entry_row(source: &SourceDescriptor, entry: &LedgerEntry) -> Vec<String> {
        let mut row = Vec::with_capacity(source.columns.len() + 2);
        row.push(entry.fingerprint.to_string());
        row.extend(
            entry
                .values
                .iter()
                .cloned()
                .chain(std::iter::repeat(String::new()))
                .take(source.columns.len()),
        );
        row.push(format_timestamp(&entry.accepted_at));
        row
    }
}

#[async_trait]
impl RecordStore for LocalStorage {
    async fn load_entries(&self, source: &SourceDescriptor) -> Result<Vec<LedgerEntry>> {
        match self.read_table(source).await? {
            Some(table) => Ok(table.into_entries(source)),
            None => Ok(Vec::new()),
        }
    }

    async fn append(&self, source: &SourceDescriptor, entries: &[LedgerEntry]) -> Result<()> {
        let path = self.master_path(source);
        let header = store_header(&source.columns);

        let mut bytes = match self.read_text(&path).await? {
            Some(text) => match StoredTable::parse(&text) {
                Some(table) if table.header != header => {
                    log::warn!(
                        "[{}] stored header {:?} differs from configured columns, migrating",
                        source.id,
                        table.header
                    );
                    let existing = table.into_entries(source);
                    self.rewrite(source, &existing).await?;
                    let rows: Vec<Vec<String>> = existing
                        .iter()
                        .map(|e| Self::entry_row(source, e))
                        .collect();
                    csv::encode(&header, &rows)
                }
                Some(_) => {
                    let mut bytes = text.into_bytes();
                    if !bytes.ends_with(b"\n") {
                        bytes.extend_from_slice(b"\r\n");
                    }
                    bytes
                }
                None => csv::encode(&header, &[]),
            },
            None => csv::encode(&header, &[]),
        };

        for entry in entries {
            csv::write_row(&mut bytes, &Self::entry_row(source, entry))
                .map_err(|e| AppError::persistence(&path, e))?;
        }

        self.write_bytes(&path, &bytes).await?;
        log::info!(
            "[{}] appended {} entries to {}",
            source.id,
            entries.len(),
            path.display()
        );
        Ok(())
    }

    async fn write_delta(
        &self,
        source: &SourceDescriptor,
        delta: &RunDelta,
        error: Option<&str>,
    ) -> Result<()> {
        let path = self.delta_path(source);
        let document = DeltaDocument::build(source, delta, error);
        let bytes = serde_json::to_vec_pretty(&document)?;
        self.write_bytes(&path, &bytes).await?;
        log::debug!(
            "[{}] wrote delta with {} items to {}",
            source.id,
            document.count,
            path.display()
        );
        Ok(())
    }

    async fn rewrite(&self, source: &SourceDescriptor, entries: &[LedgerEntry]) -> Result<()> {
        let path = self.master_path(source);
        let rows: Vec<Vec<String>> = entries
            .iter()
            .map(|e| Self::entry_row(source, e))
            .collect();
        let bytes = csv::encode(&store_header(&source.columns), &rows);
        self.write_bytes(&path, &bytes).await?;
        log::info!(
            "[{}] rewrote master store with {} entries",
            source.id,
            entries.len()
        );
        Ok(())
    }

    async fn stored_header(&self, source: &SourceDescriptor) -> Result<Option<Vec<String>>> {
        Ok(self.read_table(source).await?.map(|table| table.header))
    }

    async fn load_delta(&self, source: &SourceDescriptor) -> Result<Option<DeltaDocument>> {
        let path = self.delta_path(source);
        match self.read_bytes(&path).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
