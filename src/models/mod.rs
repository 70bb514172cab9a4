// src/models/mod.rs

//! Domain models for the watcher.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod record;
mod selectors;
mod source;

// Re-export all public types
pub use config::{
    BrowserConfig, CleaningConfig, Config, EngineConfig, FetchConfig, Replacement, RetryConfig,
    StorageConfig,
};
pub use record::{CandidateRecord, ChangeKind, Fingerprint, LedgerEntry, RunDelta};
pub use selectors::{ExtractSpec, FieldSpec};
pub use source::{
    DedupPolicy, FetchStrategy, InteractionStep, PageSpec, Readiness, SOURCE_PAGE_FIELD,
    SourceDescriptor,
};
