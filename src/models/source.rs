// src/models/source.rs

//! Source descriptors: one publication endpoint the engine watches.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{CandidateRecord, ExtractSpec};

/// Field filled with the listing page a record was scraped from.
pub const SOURCE_PAGE_FIELD: &str = "source_page";

/// How raw page content is obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    /// One HTTP request per run
    #[default]
    Static,
    /// A controlled browser session renders the page first
    Interactive,
}

/// Condition that must hold before an interactive page is snapshotted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Readiness {
    /// `document.readyState` has left `loading`
    DomContentLoaded,
    /// An element matching `selector` is present
    Element { selector: String },
    /// Document complete and no new resource loads for `quiet_ms`
    NetworkIdle {
        #[serde(default = "default_quiet_ms")]
        quiet_ms: u64,
    },
    /// Fixed delay after navigation
    Settle { millis: u64 },
}

fn default_quiet_ms() -> u64 {
    500
}

/// A navigation/interaction step run after the page loads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum InteractionStep {
    /// Click the first element matching `selector`
    Click { selector: String },
    /// Wait until an element matching `selector` is present
    WaitFor { selector: String },
    /// Sleep for a fixed number of milliseconds
    Sleep { millis: u64 },
    /// Run a synchronous script in page context
    Script { source: String },
}

/// Dedup policy for a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Identity fields only; later content changes are ignored
    #[default]
    FirstWriteWins,
    /// Every stored column participates; a changed record with a known
    /// identity is accepted again and marked as updated
    ContentHash,
}

/// One listing page of a multi-page source.
///
/// Every other key becomes a constant field on the page's records:
///
/// ```toml
/// pages = [
///     { url = "https://irdai.gov.in/acts", category = "Acts" },
///     { url = "https://irdai.gov.in/rules", category = "Rules" },
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSpec {
    pub url: String,

    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

impl PageSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Attach the page's constant fields and its URL to an extracted record.
    pub fn stamp(&self, record: &mut CandidateRecord) {
        for (name, value) in &self.fields {
            record.insert(name.as_str(), value.as_str());
        }
        if record.non_empty(SOURCE_PAGE_FIELD).is_none() {
            record.insert(SOURCE_PAGE_FIELD, self.url.as_str());
        }
    }
}

/// One external publication endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Unique source identifier, also used for output file names
    pub id: String,

    /// Listing page URL; may be left out when `pages` is given
    #[serde(default)]
    pub url: String,

    /// Listing pages sharing one master store, fetched in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<PageSpec>,

    /// Fetch strategy
    #[serde(default)]
    pub strategy: FetchStrategy,

    /// Extra request headers (static strategy)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Interaction steps (interactive strategy)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<InteractionStep>,

    /// Readiness condition (interactive strategy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<Readiness>,

    /// Async script whose string result replaces the page source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_script: Option<String>,

    /// Maximum candidates considered per run ("top N" window)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_candidates: Option<usize>,

    /// Fields that together identify a record
    pub identity: Vec<String>,

    /// Stored field order (identity fields included)
    pub columns: Vec<String>,

    /// Dedup policy
    #[serde(default)]
    pub dedup: DedupPolicy,

    /// Selector rules for the built-in extractor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract: Option<ExtractSpec>,
}

impl SourceDescriptor {
    /// Minimal static descriptor, mostly useful for tests and embedding.
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        identity: &[&str],
        columns: &[&str],
    ) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            pages: Vec::new(),
            strategy: FetchStrategy::Static,
            headers: BTreeMap::new(),
            steps: Vec::new(),
            readiness: None,
            capture_script: None,
            max_candidates: None,
            identity: identity.iter().map(|s| s.to_string()).collect(),
            columns: columns.iter().map(|s| s.to_string()).collect(),
            dedup: DedupPolicy::FirstWriteWins,
            extract: None,
        }
    }

    /// Listing pages in fetch order; a single-page source yields its `url`.
    pub fn listing_pages(&self) -> Vec<PageSpec> {
        if self.pages.is_empty() {
            vec![PageSpec::new(self.url.clone())]
        } else {
            self.pages.clone()
        }
    }

    /// The descriptor as seen by fetchers and extractors for one page.
    pub fn for_page(&self, page: &PageSpec) -> Self {
        Self {
            url: page.url.clone(),
            pages: Vec::new(),
            ..self.clone()
        }
    }

    /// Effective candidate window, applied per listing page.
    pub fn window(&self, default_max: usize) -> usize {
        self.max_candidates.unwrap_or(default_max)
    }

    /// Readiness condition, defaulting to DOM content loaded.
    pub fn readiness_or_default(&self) -> Readiness {
        self.readiness.clone().unwrap_or(Readiness::DomContentLoaded)
    }

    /// Check internal consistency of the descriptor.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("source id is empty".into());
        }
        if self.id.contains(['/', '\\']) {
            return Err(format!("source id '{}' must not contain path separators", self.id));
        }
        if self.url.is_empty() && self.pages.is_empty() {
            return Err(format!("source '{}' has neither url nor pages", self.id));
        }
        for page in self.listing_pages() {
            if url::Url::parse(&page.url).is_err() {
                return Err(format!("source '{}' has an invalid url '{}'", self.id, page.url));
            }
            if let Some(name) = page.fields.keys().find(|k| is_reserved(k)) {
                return Err(format!(
                    "source '{}': page field name '{}' is reserved",
                    self.id, name
                ));
            }
        }
        if self.identity.is_empty() {
            return Err(format!("source '{}' has no identity fields", self.id));
        }
        if self.columns.is_empty() {
            return Err(format!("source '{}' has no columns", self.id));
        }
        for field in &self.identity {
            if !self.columns.contains(field) {
                return Err(format!(
                    "source '{}': identity field '{}' is not a column",
                    self.id, field
                ));
            }
        }
        if let Some(reserved) = self.columns.iter().find(|c| is_reserved(c)) {
            return Err(format!(
                "source '{}': column name '{}' is reserved",
                self.id, reserved
            ));
        }
        if self.max_candidates == Some(0) {
            return Err(format!("source '{}': max_candidates must be > 0", self.id));
        }
        if self.strategy == FetchStrategy::Static
            && (!self.steps.is_empty() || self.capture_script.is_some())
        {
            return Err(format!(
                "source '{}': steps and capture_script need the interactive strategy",
                self.id
            ));
        }
        Ok(())
    }
}

fn is_reserved(name: &str) -> bool {
    matches!(name, "id" | "scraped_at" | "change")
}
