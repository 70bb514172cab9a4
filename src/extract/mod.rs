// src/extract/mod.rs

//! Extraction: raw page content to candidate records.
//!
//! Extractors are pure functions of their input. Each source gets its own
//! extractor through the `ExtractorRegistry`; sources with selector rules in
//! the config get a `SelectorExtractor`, anything more exotic can be
//! registered in code.

pub mod selector;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{CandidateRecord, Config, SourceDescriptor};

pub use selector::SelectorExtractor;

/// Turns raw page content into candidate records, in page order.
///
/// An error means the page did not have the expected structure. An empty
/// listing is `Ok(vec![])`.
pub trait Extractor: Send + Sync {
    fn extract(&self, source: &SourceDescriptor, raw: &str) -> Result<Vec<CandidateRecord>>;
}

impl<F> Extractor for F
where
    F: Fn(&SourceDescriptor, &str) -> Result<Vec<CandidateRecord>> + Send + Sync,
{
    fn extract(&self, source: &SourceDescriptor, raw: &str) -> Result<Vec<CandidateRecord>> {
        self(source, raw)
    }
}

/// Per-source extractor lookup.
#[derive(Default, Clone)]
pub struct ExtractorRegistry {
    extractors: HashMap<String, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build selector extractors for every source that has selector rules.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        for source in &config.sources {
            if let Some(spec) = &source.extract {
                let extractor = SelectorExtractor::new(spec, config.cleaning.clone())?;
                registry.register(&source.id, Arc::new(extractor));
            }
        }
        Ok(registry)
    }

    /// Register (or replace) the extractor for `source_id`.
    pub fn register(&mut self, source_id: impl Into<String>, extractor: Arc<dyn Extractor>) {
        self.extractors.insert(source_id.into(), extractor);
    }

    pub fn get(&self, source_id: &str) -> Option<Arc<dyn Extractor>> {
        self.extractors.get(source_id).cloned()
    }

    /// Like `get`, but a missing extractor is an extraction error.
    pub fn require(&self, source_id: &str) -> Result<Arc<dyn Extractor>> {
        self.get(source_id)
            .ok_or_else(|| AppError::extraction(source_id, "no extractor registered"))
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }
}
