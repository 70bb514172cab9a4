// src/pipeline/fingerprint.rs

//! Fingerprint generation.
//!
//! A fingerprint is SHA-256 over the UTF-8 field values joined by the ASCII
//! unit separator, hex encoded and truncated. It depends on nothing but the
//! field values, so it is stable across runs, processes and machines.

use sha2::{Digest, Sha256};

use crate::models::{CandidateRecord, DedupPolicy, Fingerprint, SourceDescriptor};

/// Separator between fields; not expected inside scraped text.
const FIELD_SEPARATOR: &str = "\u{1f}";

/// Hex characters kept (160 bits).
const FINGERPRINT_LEN: usize = 40;

/// Fingerprint an ordered list of field values.
pub fn fingerprint(fields: &[&str]) -> Fingerprint {
    let mut hasher = Sha256::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            hasher.update(FIELD_SEPARATOR.as_bytes());
        }
        hasher.update(field.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    Fingerprint::from_stored(&digest[..FINGERPRINT_LEN])
}

/// Why a candidate could not be fingerprinted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingField(pub String);

/// Fingerprints for one source under its dedup policy.
#[derive(Debug, Clone, Copy)]
pub struct Fingerprinter<'a> {
    source: &'a SourceDescriptor,
}

impl<'a> Fingerprinter<'a> {
    pub fn new(source: &'a SourceDescriptor) -> Self {
        Self { source }
    }

    /// Record key under the source's policy.
    ///
    /// Identity fields must be present and non-blank. Under the content-hash
    /// policy every column participates, blanks included.
    pub fn record_key(&self, record: &CandidateRecord) -> Result<Fingerprint, MissingField> {
        let identity = self.identity_values(record)?;
        Ok(match self.source.dedup {
            DedupPolicy::FirstWriteWins => fingerprint(&identity),
            DedupPolicy::ContentHash => {
                let values = record.project(&self.source.columns);
                let refs: Vec<&str> = values.iter().map(String::as_str).collect();
                fingerprint(&refs)
            }
        })
    }

    /// Key over the identity fields only, regardless of policy.
    pub fn identity_key(&self, record: &CandidateRecord) -> Result<Fingerprint, MissingField> {
        Ok(fingerprint(&self.identity_values(record)?))
    }

    /// Record key for values aligned with the source's columns.
    pub fn key_for_values(&self, values: &[String]) -> Result<Fingerprint, MissingField> {
        self.record_key(&self.to_record(values))
    }

    /// Identity key for values aligned with the source's columns.
    pub fn identity_for_values(&self, values: &[String]) -> Result<Fingerprint, MissingField> {
        self.identity_key(&self.to_record(values))
    }

    fn to_record(&self, values: &[String]) -> CandidateRecord {
        CandidateRecord::from_pairs(
            self.source
                .columns
                .iter()
                .zip(values)
                .map(|(c, v)| (c.as_str(), v.as_str())),
        )
    }

    fn identity_values<'r>(
        &self,
        record: &'r CandidateRecord,
    ) -> Result<Vec<&'r str>, MissingField> {
        self.source
            .identity
            .iter()
            .map(|field| {
                record
                    .non_empty(field)
                    .map(str::trim)
                    .ok_or_else(|| MissingField(field.clone()))
            })
            .collect()
    }
}
