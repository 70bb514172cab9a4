// src/pipeline/report.rs

//! Per-source and per-batch run reports.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{AppError, ErrorKind};

/// A candidate excluded before dedup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedCandidate {
    /// Position in extraction order (0-based)
    pub position: usize,
    pub reason: String,
}

/// Counters for one source's run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Candidates returned by the extractor
    pub extracted: usize,
    /// Candidates considered (after the window)
    pub examined: usize,
    /// Candidates dropped for lack of identity fields
    pub dropped: Vec<DroppedCandidate>,
    /// Candidates already known
    pub duplicates: usize,
    /// Candidates accepted as new
    pub accepted: usize,
    /// Of the accepted, how many were updates of a known identity
    pub updated: usize,
}

impl RunStats {
    /// Fold in the counters of a later page. Dropped positions continue the
    /// numbering of the candidates examined so far.
    pub fn absorb(&mut self, page: RunStats) {
        let offset = self.examined;
        self.extracted += page.extracted;
        self.examined += page.examined;
        self.dropped
            .extend(page.dropped.into_iter().map(|d| DroppedCandidate {
                position: d.position + offset,
                reason: d.reason,
            }));
        self.duplicates += page.duplicates;
        self.accepted += page.accepted;
        self.updated += page.updated;
    }
}

/// Error summary attached to a failed source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&AppError> for SourceFailure {
    fn from(error: &AppError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Outcome of ingesting one source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source_id: String,
    pub stats: RunStats,
    pub error: Option<SourceFailure>,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl SourceReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Whether this source failed to persist its results.
    pub fn persistence_failed(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|e| e.kind == ErrorKind::Persistence)
    }
}

impl fmt::Display for SourceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            None => write!(
                f,
                "{}: examined {}, new {} ({} updated), known {}, dropped {} [{:.1}s]",
                self.source_id,
                self.stats.examined,
                self.stats.accepted,
                self.stats.updated,
                self.stats.duplicates,
                self.stats.dropped.len(),
                self.elapsed.as_secs_f64()
            ),
            Some(failure) => write!(
                f,
                "{}: FAILED ({}) {} [{:.1}s]",
                self.source_id,
                failure.kind,
                failure.message,
                self.elapsed.as_secs_f64()
            ),
        }
    }
}

/// Outcome of one batch over several sources, in configuration order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
}

impl BatchReport {
    /// True unless some source failed to persist. Fetch and extraction
    /// failures do not count.
    pub fn persistence_ok(&self) -> bool {
        !self.sources.iter().any(SourceReport::persistence_failed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources.iter().filter(|r| !r.is_ok())
    }

    pub fn total_accepted(&self) -> usize {
        self.sources.iter().map(|r| r.stats.accepted).sum()
    }

    pub fn get(&self, source_id: &str) -> Option<&SourceReport> {
        self.sources.iter().find(|r| r.source_id == source_id)
    }

    /// Log one line per source and a batch summary.
    pub fn log_summary(&self) {
        for report in &self.sources {
            if report.is_ok() {
                log::info!("{}", report);
            } else {
                log::error!("{}", report);
            }
        }
        let elapsed = (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0;
        log::info!(
            "Batch finished: {} sources, {} failed, {} new records in {:.1}s",
            self.sources.len(),
            self.failed().count(),
            self.total_accepted(),
            elapsed
        );
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
