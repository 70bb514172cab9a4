// src/pipeline/ledger.rs

//! Dedup ledger: the known fingerprints of one source for one run.
//!
//! Built from the master store at the start of a run and dropped at the end.
//! The master store stays the only source of truth; there is no separate
//! index file.

use std::collections::HashSet;

use crate::error::Result;
use crate::models::{DedupPolicy, Fingerprint, LedgerEntry, SourceDescriptor};
use crate::pipeline::fingerprint::Fingerprinter;
use crate::storage::RecordStore;

/// How a candidate relates to what the ledger already knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Never seen
    New,
    /// Content changed for a known identity (content-hash policy only)
    Updated,
    /// Already accepted, in an earlier run or earlier in this one
    Duplicate,
}

/// In-memory fingerprint set for one source.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    source_id: String,
    known: HashSet<Fingerprint>,
    /// Identity keys, tracked only under the content-hash policy
    identities: Option<HashSet<Fingerprint>>,
}

impl Ledger {
    /// Empty ledger (first run).
    pub fn empty(source: &SourceDescriptor) -> Self {
        Self {
            source_id: source.id.clone(),
            known: HashSet::new(),
            identities: match source.dedup {
                DedupPolicy::FirstWriteWins => None,
                DedupPolicy::ContentHash => Some(HashSet::new()),
            },
        }
    }

    /// Ledger over already persisted entries. Entries without an id are
    /// history only and never match a candidate.
    pub fn from_entries(source: &SourceDescriptor, entries: &[LedgerEntry]) -> Self {
        let mut ledger = Self::empty(source);
        let fingerprinter = Fingerprinter::new(source);
        for entry in entries.iter().filter(|e| !e.fingerprint.as_str().is_empty()) {
            ledger.known.insert(entry.fingerprint.clone());
            if let Some(identities) = ledger.identities.as_mut() {
                if let Ok(identity) = fingerprinter.identity_for_values(&entry.values) {
                    identities.insert(identity);
                }
            }
        }
        ledger
    }

    /// Read the master store once. A missing store is an empty ledger.
    pub async fn load(store: &dyn RecordStore, source: &SourceDescriptor) -> Result<Self> {
        let entries = store.load_entries(source).await?;
        let ledger = Self::from_entries(source, &entries);
        log::debug!(
            "[{}] ledger loaded with {} fingerprints",
            ledger.source_id,
            ledger.len()
        );
        Ok(ledger)
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.known.contains(fingerprint)
    }

    /// Mark a fingerprint accepted for the rest of the run.
    /// Returns `false` if it was already known.
    pub fn remember(&mut self, fingerprint: Fingerprint) -> bool {
        self.known.insert(fingerprint)
    }

    /// Classify a candidate by its record key and identity key.
    pub fn classify(&self, key: &Fingerprint, identity: &Fingerprint) -> Verdict {
        if self.contains(key) {
            return Verdict::Duplicate;
        }
        match &self.identities {
            Some(identities) if identities.contains(identity) => Verdict::Updated,
            _ => Verdict::New,
        }
    }

    /// Accept a candidate: remember its key and, when tracked, its identity.
    pub fn accept(&mut self, key: Fingerprint, identity: Fingerprint) {
        self.remember(key);
        if let Some(identities) = self.identities.as_mut() {
            identities.insert(identity);
        }
    }
}
