//! Ingestion pipeline.
//!
//! - `fingerprint`: stable identity keys for candidate records
//! - `ledger`: known fingerprints for one source's run
//! - `engine`: fetch, extract, filter and persist per source
//! - `report`: per-source and batch outcomes

pub mod engine;
pub mod fingerprint;
pub mod ledger;
pub mod report;

pub use engine::{IngestionEngine, RunOutcome};
pub use fingerprint::{Fingerprinter, fingerprint};
pub use ledger::{Ledger, Verdict};
pub use report::{BatchReport, DroppedCandidate, RunStats, SourceFailure, SourceReport};
