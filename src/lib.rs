// src/lib.rs

//! Watcher library: incremental ingestion for publication portals.
//!
//! Each configured source is fetched (plain HTTP or a WebDriver-rendered
//! page), turned into candidate records by its extractor, filtered against
//! the source's master store, and only genuinely new records are appended.

pub mod error;
pub mod extract;
pub mod fetch;
pub mod models;
pub mod pipeline;
pub mod storage;
pub mod utils;

pub use error::{AppError, Result};
pub use pipeline::IngestionEngine;
