// src/pipeline/engine.rs

//! Ingestion engine: fetch, extract, fingerprint, filter, persist.
//!
//! One run per source. Sources share nothing but the fetcher (and through
//! it, possibly one browser session); each gets its own ledger, so a
//! failure or a timeout in one never touches another.
//!
//! Interactive sources queue for the one browser session. `run_all` gives
//! them a lane of their own and runs it serially, so a source's deadline
//! starts when its turn comes and never while it waits for the session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};

use crate::error::{AppError, Result};
use crate::extract::{Extractor, ExtractorRegistry};
use crate::fetch::{FetchAdapter, Fetcher};
use crate::models::{
    CandidateRecord, ChangeKind, Config, EngineConfig, FetchStrategy, LedgerEntry, RunDelta,
    SourceDescriptor,
};
use crate::pipeline::fingerprint::{Fingerprinter, MissingField};
use crate::pipeline::ledger::{Ledger, Verdict};
use crate::pipeline::report::{BatchReport, DroppedCandidate, RunStats, SourceFailure, SourceReport};
use crate::storage::{LocalStorage, RecordStore};
use crate::utils::truncate_for_log;

/// Result of one source's run before persistence.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub delta: RunDelta,
    pub stats: RunStats,
}

/// Drives runs over configured sources.
pub struct IngestionEngine {
    config: EngineConfig,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn RecordStore>,
    extractors: ExtractorRegistry,
}

impl IngestionEngine {
    pub fn new(
        config: EngineConfig,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn RecordStore>,
        extractors: ExtractorRegistry,
    ) -> Self {
        Self {
            config,
            fetcher,
            store,
            extractors,
        }
    }

    /// Wire the default fetch adapter, local storage and configured
    /// selector extractors.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            config.engine.clone(),
            Arc::new(FetchAdapter::new(config)?),
            Arc::new(LocalStorage::new(&config.storage.data_dir)),
            ExtractorRegistry::from_config(config)?,
        ))
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    pub fn extractors_mut(&mut self) -> &mut ExtractorRegistry {
        &mut self.extractors
    }

    fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.config.source_timeout_secs)
    }

    /// One run for one source: returns the records not seen before, in
    /// extraction order. Nothing is persisted.
    ///
    /// Listing pages are fetched in order against one ledger, with the
    /// `max_candidates` window applied to each page. Any page failing fails
    /// the whole run.
    pub async fn run(
        &self,
        source: &SourceDescriptor,
        extractor: &dyn Extractor,
        max_candidates: usize,
    ) -> Result<RunOutcome> {
        let mut ledger = Ledger::load(self.store.as_ref(), source).await?;
        if ledger.is_empty() {
            log::info!("[{}] no stored records, treating as first run", source.id);
        }

        let accepted_at = Utc::now();
        let mut outcome = RunOutcome {
            delta: RunDelta::empty(&source.id),
            stats: RunStats::default(),
        };

        for page in source.listing_pages() {
            let target = source.for_page(&page);
            let raw = self.fetcher.fetch(&target).await?;
            log::debug!(
                "[{}] fetched {} bytes from {}: {}",
                source.id,
                raw.len(),
                target.url,
                truncate_for_log(raw.trim_start(), 80)
            );

            let mut candidates = extractor.extract(&target, &raw)?;
            for candidate in &mut candidates {
                page.stamp(candidate);
            }

            let RunOutcome { delta, stats } =
                Self::select(source, &mut ledger, candidates, max_candidates, accepted_at);
            outcome.delta.entries.extend(delta.entries);
            outcome.stats.absorb(stats);
        }

        Ok(outcome)
    }

    /// Window, fingerprint and filter candidates against the ledger.
    pub fn select(
        source: &SourceDescriptor,
        ledger: &mut Ledger,
        candidates: Vec<CandidateRecord>,
        max_candidates: usize,
        accepted_at: DateTime<Utc>,
    ) -> RunOutcome {
        let fingerprinter = Fingerprinter::new(source);
        let mut stats = RunStats {
            extracted: candidates.len(),
            ..RunStats::default()
        };
        let mut delta = RunDelta::empty(&source.id);

        for (position, candidate) in candidates.into_iter().take(max_candidates).enumerate() {
            stats.examined += 1;

            let keys = fingerprinter
                .record_key(&candidate)
                .and_then(|key| Ok((key, fingerprinter.identity_key(&candidate)?)));
            let (key, identity) = match keys {
                Ok(keys) => keys,
                Err(MissingField(field)) => {
                    let reason = format!("missing identity field '{field}'");
                    log::debug!("[{}] candidate {} dropped: {}", source.id, position, reason);
                    stats.dropped.push(DroppedCandidate { position, reason });
                    continue;
                }
            };

            let change = match ledger.classify(&key, &identity) {
                Verdict::Duplicate => {
                    stats.duplicates += 1;
                    continue;
                }
                Verdict::New => ChangeKind::New,
                Verdict::Updated => {
                    stats.updated += 1;
                    ChangeKind::Updated
                }
            };

            ledger.accept(key.clone(), identity);
            stats.accepted += 1;
            delta.entries.push(LedgerEntry {
                fingerprint: key,
                values: candidate.project(&source.columns),
                accepted_at,
                change,
            });
        }

        if stats.extracted > stats.examined {
            log::debug!(
                "[{}] {} candidates beyond the window of {} ignored",
                source.id,
                stats.extracted - stats.examined,
                max_candidates
            );
        }

        RunOutcome { delta, stats }
    }

    /// Run one source under its deadline, then persist: append to the
    /// master store and replace the delta. A failed source still gets an
    /// empty delta marked as failed.
    pub async fn ingest(&self, source: &SourceDescriptor) -> SourceReport {
        let started = Instant::now();
        match source.pages.len() {
            0 => log::info!("[{}] ingesting {}", source.id, source.url),
            n => log::info!("[{}] ingesting {} pages", source.id, n),
        }

        let outcome = match self.extractors.require(&source.id) {
            Ok(extractor) => {
                let window = source.window(self.config.max_candidates);
                let limit = self.source_timeout();
                match tokio::time::timeout(limit, self.run(source, extractor.as_ref(), window))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(AppError::timeout(&source.id, limit.as_secs())),
                }
            }
            Err(e) => Err(e),
        };

        let (stats, error) = match outcome {
            Ok(RunOutcome { delta, mut stats }) => match self.persist(source, &delta).await {
                Ok(()) => (stats, None),
                Err(e) => {
                    // Nothing was saved.
                    stats.accepted = 0;
                    stats.updated = 0;
                    (stats, Some(e))
                }
            },
            Err(e) => {
                log::warn!("[{}] run failed: {}", source.id, e);
                let error = match self
                    .store
                    .write_delta(source, &RunDelta::empty(&source.id), Some(&e.to_string()))
                    .await
                {
                    Ok(()) => e,
                    Err(write_err) => {
                        log::error!("[{}] could not write failed delta: {}", source.id, write_err);
                        write_err
                    }
                };
                (RunStats::default(), Some(error))
            }
        };

        let report = SourceReport {
            source_id: source.id.clone(),
            stats,
            error: error.as_ref().map(SourceFailure::from),
            elapsed: started.elapsed(),
        };
        if report.is_ok() {
            log::info!("{}", report);
        } else {
            log::error!("{}", report);
        }
        report
    }

    /// Append then write the delta. Nothing counts as saved unless the
    /// append succeeded.
    async fn persist(&self, source: &SourceDescriptor, delta: &RunDelta) -> Result<()> {
        if let Err(e) = self.store.append(source, &delta.entries).await {
            log::error!("[{}] append failed: {}", source.id, e);
            let empty = RunDelta::empty(&source.id);
            if let Err(write_err) = self
                .store
                .write_delta(source, &empty, Some(&e.to_string()))
                .await
            {
                log::error!("[{}] could not write failed delta: {}", source.id, write_err);
            }
            return Err(e);
        }
        self.store.write_delta(source, delta, None).await
    }

    /// Group sources into lanes: every static source alone, all interactive
    /// sources together in the first lane.
    fn lanes(sources: &[SourceDescriptor]) -> Vec<Vec<(usize, &SourceDescriptor)>> {
        let mut interactive = Vec::new();
        let mut lanes = Vec::new();
        for (i, source) in sources.iter().enumerate() {
            match source.strategy {
                FetchStrategy::Interactive => interactive.push((i, source)),
                FetchStrategy::Static => lanes.push(vec![(i, source)]),
            }
        }
        if !interactive.is_empty() {
            lanes.insert(0, interactive);
        }
        lanes
    }

    /// Ingest every source, at most `max_concurrent` lanes at a time. Reports
    /// come back in the order the sources were given.
    pub async fn run_all(&self, sources: &[SourceDescriptor]) -> BatchReport {
        let started_at = Utc::now();
        let concurrency = self.config.max_concurrent.max(1);
        log::info!(
            "Running {} sources (concurrency {})",
            sources.len(),
            concurrency
        );

        let mut indexed: Vec<(usize, SourceReport)> = stream::iter(Self::lanes(sources))
            .map(|lane| async move {
                let mut reports = Vec::with_capacity(lane.len());
                for (i, source) in lane {
                    reports.push((i, self.ingest(source).await));
                }
                reports
            })
            .buffer_unordered(concurrency)
            .flat_map(stream::iter)
            .collect()
            .await;
        indexed.sort_by_key(|(i, _)| *i);

        self.fetcher.shutdown().await;

        BatchReport {
            started_at,
            finished_at: Utc::now(),
            sources: indexed.into_iter().map(|(_, report)| report).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use crate::error::ErrorKind;
    use crate::models::{DedupPolicy, PageSpec};
    use crate::storage::DeltaStatus;

    /// Serves canned pages by URL or source id; anything else fails like a
    /// dead host.
    #[derive(Default)]
    struct StubFetcher {
        pages: Mutex<HashMap<String, String>>,
        delay: Option<Duration>,
    }

    impl StubFetcher {
        fn with(pages: &[(&str, &str)]) -> Self {
            Self {
                pages: Mutex::new(
                    pages
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                delay: None,
            }
        }

        fn set(&self, id: &str, page: &str) {
            self.pages
                .lock()
                .unwrap()
                .insert(id.to_string(), page.to_string());
        }
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self, source: &SourceDescriptor) -> Result<String> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let page = {
                let pages = self.pages.lock().unwrap();
                pages.get(&source.url).or_else(|| pages.get(&source.id)).cloned()
            };
            page.ok_or_else(|| AppError::fetch(&source.url, "connection refused"))
        }
    }

    /// One record per line: `title|link`. A line without `|` has no link.
    fn lines_extractor() -> Arc<dyn Extractor> {
        Arc::new(
            |_: &SourceDescriptor, raw: &str| -> Result<Vec<CandidateRecord>> {
                Ok(raw
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .map(|line| match line.split_once('|') {
                        Some((title, link)) => {
                            CandidateRecord::from_pairs([("title", title), ("link", link)])
                        }
                        None => CandidateRecord::from_pairs([("title", line)]),
                    })
                    .collect())
            },
        )
    }

    fn source(id: &str) -> SourceDescriptor {
        SourceDescriptor::new(
            id,
            format!("https://{id}.gov.in/updates"),
            &["link"],
            &["title", "link"],
        )
    }

    struct Harness {
        _tmp: TempDir,
        fetcher: Arc<StubFetcher>,
        storage: Arc<LocalStorage>,
        engine: IngestionEngine,
    }

    fn harness(fetcher: StubFetcher, ids: &[&str], config: EngineConfig) -> Harness {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(fetcher);
        let storage = Arc::new(LocalStorage::new(tmp.path()));
        let mut extractors = ExtractorRegistry::new();
        for id in ids {
            extractors.register(*id, lines_extractor());
        }
        let engine = IngestionEngine::new(
            config,
            fetcher.clone(),
            storage.clone(),
            extractors,
        );
        Harness {
            _tmp: tmp,
            fetcher,
            storage,
            engine,
        }
    }

    fn titles(delta: &RunDelta) -> Vec<&str> {
        delta.entries.iter().map(|e| e.values[0].as_str()).collect()
    }

    #[tokio::test]
    async fn test_first_run_persists_everything() {
        let h = harness(
            StubFetcher::with(&[("dot", "A|/a.pdf\nB|/b.pdf\nC|/c.pdf")]),
            &["dot"],
            EngineConfig::default(),
        );
        let src = source("dot");

        let report = h.engine.ingest(&src).await;
        assert!(report.is_ok());
        assert_eq!(report.stats.accepted, 3);

        assert_eq!(h.storage.load_entries(&src).await.unwrap().len(), 3);
        let delta = h.storage.load_delta(&src).await.unwrap().unwrap();
        assert_eq!(delta.count, 3);
        assert_eq!(delta.status, DeltaStatus::Ok);
    }

    #[tokio::test]
    async fn test_second_identical_run_is_empty() {
        let h = harness(
            StubFetcher::with(&[("dot", "A|/a.pdf\nB|/b.pdf")]),
            &["dot"],
            EngineConfig::default(),
        );
        let src = source("dot");

        h.engine.ingest(&src).await;
        let report = h.engine.ingest(&src).await;

        assert_eq!(report.stats.accepted, 0);
        assert_eq!(report.stats.duplicates, 2);
        assert_eq!(h.storage.load_entries(&src).await.unwrap().len(), 2);
        let delta = h.storage.load_delta(&src).await.unwrap().unwrap();
        assert_eq!(delta.count, 0);
    }

    #[tokio::test]
    async fn test_store_grows_monotonically() {
        let h = harness(
            StubFetcher::with(&[("dot", "A|/a.pdf")]),
            &["dot"],
            EngineConfig::default(),
        );
        let src = source("dot");

        let mut previous = 0;
        for page in ["A|/a.pdf", "B|/b.pdf\nA|/a.pdf", "C|/c.pdf", ""] {
            h.fetcher.set("dot", page);
            h.engine.ingest(&src).await;
            let size = h.storage.load_entries(&src).await.unwrap().len();
            assert!(size >= previous);
            previous = size;
        }
        assert_eq!(previous, 3);
    }

    #[tokio::test]
    async fn test_delta_preserves_extraction_order() {
        let h = harness(
            StubFetcher::with(&[("dot", "C|/c.pdf\nA|/a.pdf\nB|/b.pdf")]),
            &["dot"],
            EngineConfig::default(),
        );
        let extractor = lines_extractor();

        let outcome = h
            .engine
            .run(&source("dot"), extractor.as_ref(), 10)
            .await
            .unwrap();
        assert_eq!(titles(&outcome.delta), vec!["C", "A", "B"]);
    }

    #[tokio::test]
    async fn test_window_bounds_candidates() {
        let h = harness(
            StubFetcher::with(&[("dot", "A|/a\nB|/b\nC|/c\nD|/d")]),
            &["dot"],
            EngineConfig::default(),
        );
        let extractor = lines_extractor();

        let outcome = h
            .engine
            .run(&source("dot"), extractor.as_ref(), 2)
            .await
            .unwrap();
        assert_eq!(titles(&outcome.delta), vec!["A", "B"]);
        assert_eq!(outcome.stats.extracted, 4);
        assert_eq!(outcome.stats.examined, 2);
    }

    #[tokio::test]
    async fn test_source_window_overrides_default() {
        let h = harness(
            StubFetcher::with(&[("dot", "A|/a\nB|/b\nC|/c")]),
            &["dot"],
            EngineConfig {
                max_candidates: 1,
                ..EngineConfig::default()
            },
        );
        let mut src = source("dot");
        src.max_candidates = Some(2);

        let report = h.engine.ingest(&src).await;
        assert_eq!(report.stats.accepted, 2);
    }

    #[tokio::test]
    async fn test_missing_identity_field_is_dropped() {
        let h = harness(
            StubFetcher::with(&[("dot", "A|/a.pdf\nNo link here\nB|/b.pdf")]),
            &["dot"],
            EngineConfig::default(),
        );
        let src = source("dot");

        let report = h.engine.ingest(&src).await;
        assert!(report.is_ok());
        assert_eq!(report.stats.accepted, 2);
        assert_eq!(report.stats.dropped.len(), 1);
        assert_eq!(report.stats.dropped[0].position, 1);

        let stored = h.storage.load_entries(&src).await.unwrap();
        assert!(stored.iter().all(|e| e.values[0] != "No link here"));
    }

    #[tokio::test]
    async fn test_same_run_duplicates_accepted_once() {
        let h = harness(
            StubFetcher::with(&[("dot", "A|/a.pdf\nA again|/a.pdf")]),
            &["dot"],
            EngineConfig::default(),
        );
        let report = h.engine.ingest(&source("dot")).await;
        assert_eq!(report.stats.accepted, 1);
        assert_eq!(report.stats.duplicates, 1);
    }

    #[tokio::test]
    async fn test_empty_extraction_is_not_an_error() {
        let h = harness(
            StubFetcher::with(&[("dot", "")]),
            &["dot"],
            EngineConfig::default(),
        );
        let src = source("dot");

        let report = h.engine.ingest(&src).await;
        assert!(report.is_ok());
        let delta = h.storage.load_delta(&src).await.unwrap().unwrap();
        assert_eq!(delta.status, DeltaStatus::Ok);
        assert_eq!(delta.count, 0);
    }

    #[tokio::test]
    async fn test_failing_source_is_isolated() {
        let h = harness(
            StubFetcher::with(&[("b", "X|/x.pdf\nY|/y.pdf")]),
            &["a", "b"],
            EngineConfig::default(),
        );
        let sources = vec![source("a"), source("b")];

        let batch = h.engine.run_all(&sources).await;

        let a = batch.get("a").unwrap();
        assert_eq!(a.error.as_ref().map(|e| e.kind), Some(ErrorKind::Fetch));
        let a_delta = h.storage.load_delta(&sources[0]).await.unwrap().unwrap();
        assert_eq!(a_delta.status, DeltaStatus::Failed);
        assert_eq!(a_delta.count, 0);

        let b = batch.get("b").unwrap();
        assert!(b.is_ok());
        assert_eq!(h.storage.load_entries(&sources[1]).await.unwrap().len(), 2);
        let b_delta = h.storage.load_delta(&sources[1]).await.unwrap().unwrap();
        assert_eq!(b_delta.count, 2);

        assert!(batch.persistence_ok());
        assert_eq!(batch.sources[0].source_id, "a");
    }

    #[tokio::test]
    async fn test_ledgers_are_not_shared_across_sources() {
        let h = harness(
            StubFetcher::with(&[("a", "Same|/same.pdf"), ("b", "Same|/same.pdf")]),
            &["a", "b"],
            EngineConfig::default(),
        );
        let batch = h.engine.run_all(&[source("a"), source("b")]).await;
        assert_eq!(batch.total_accepted(), 2);
    }

    #[tokio::test]
    async fn test_slow_source_times_out() {
        let mut fetcher = StubFetcher::with(&[("slow", "A|/a.pdf")]);
        fetcher.delay = Some(Duration::from_secs(5));
        let h = harness(
            fetcher,
            &["slow"],
            EngineConfig {
                source_timeout_secs: 1,
                ..EngineConfig::default()
            },
        );
        let src = source("slow");

        let report = h.engine.ingest(&src).await;
        assert_eq!(
            report.error.as_ref().map(|e| e.kind),
            Some(ErrorKind::Timeout)
        );
        assert!(h.storage.load_entries(&src).await.unwrap().is_empty());
        let delta = h.storage.load_delta(&src).await.unwrap().unwrap();
        assert_eq!(delta.status, DeltaStatus::Failed);
    }

    #[tokio::test]
    async fn test_missing_extractor_reported() {
        let h = harness(
            StubFetcher::with(&[("dot", "A|/a.pdf")]),
            &[],
            EngineConfig::default(),
        );
        let report = h.engine.ingest(&source("dot")).await;
        assert_eq!(
            report.error.as_ref().map(|e| e.kind),
            Some(ErrorKind::Extraction)
        );
    }

    #[tokio::test]
    async fn test_content_hash_marks_updates() {
        let h = harness(
            StubFetcher::with(&[("isro", "Launch|/v1.pdf")]),
            &["isro"],
            EngineConfig::default(),
        );
        let mut src = source("isro");
        src.identity = vec!["title".to_string()];
        src.dedup = DedupPolicy::ContentHash;

        h.engine.ingest(&src).await;
        h.fetcher.set("isro", "Launch|/v2.pdf");
        let report = h.engine.ingest(&src).await;

        assert_eq!(report.stats.accepted, 1);
        assert_eq!(report.stats.updated, 1);
        let delta = h.storage.load_delta(&src).await.unwrap().unwrap();
        assert_eq!(delta.items[0]["change"], "updated");
        assert_eq!(h.storage.load_entries(&src).await.unwrap().len(), 2);
    }

    #[test]
    fn test_select_is_pure_over_ledger() {
        let src = source("dot");
        let mut ledger = Ledger::empty(&src);
        let candidates = vec![
            CandidateRecord::from_pairs([("title", "A"), ("link", "/a")]),
            CandidateRecord::from_pairs([("title", "B"), ("link", "/b")]),
        ];

        let first = IngestionEngine::select(&src, &mut ledger, candidates.clone(), 10, Utc::now());
        let second = IngestionEngine::select(&src, &mut ledger, candidates, 10, Utc::now());
        assert_eq!(first.stats.accepted, 2);
        assert_eq!(second.stats.accepted, 0);
        assert_eq!(second.stats.duplicates, 2);
    }

    #[tokio::test]
    async fn test_pages_share_one_ledger() {
        let h = harness(
            StubFetcher::with(&[
                ("https://irdai.gov.in/acts", "A|/a.pdf\nShared|/shared.pdf"),
                ("https://irdai.gov.in/circulars", "Shared|/shared.pdf\nC|/c.pdf"),
            ]),
            &["irdai"],
            EngineConfig::default(),
        );
        let mut src = SourceDescriptor::new(
            "irdai",
            "",
            &["link"],
            &["title", "link", "category", "source_page"],
        );
        src.pages = vec![
            PageSpec::new("https://irdai.gov.in/acts").with_field("category", "Acts"),
            PageSpec::new("https://irdai.gov.in/circulars").with_field("category", "Circulars"),
        ];

        let report = h.engine.ingest(&src).await;
        assert!(report.is_ok());
        assert_eq!(report.stats.examined, 4);
        assert_eq!(report.stats.accepted, 3);
        assert_eq!(report.stats.duplicates, 1);

        let stored = h.storage.load_entries(&src).await.unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(
            stored[2].values,
            vec!["C", "/c.pdf", "Circulars", "https://irdai.gov.in/circulars"]
        );

        let again = h.engine.ingest(&src).await;
        assert_eq!(again.stats.accepted, 0);
        assert_eq!(h.storage.load_entries(&src).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_window_applies_per_page() {
        let h = harness(
            StubFetcher::with(&[
                ("https://mib.gov.in/notices", "N1|/n1\nN2|/n2"),
                ("https://mib.gov.in/other", "O1|/o1\nO2|/o2"),
            ]),
            &["mib"],
            EngineConfig::default(),
        );
        let mut src = source("mib");
        src.pages = vec![
            PageSpec::new("https://mib.gov.in/notices"),
            PageSpec::new("https://mib.gov.in/other"),
        ];

        let outcome = h
            .engine
            .run(&src, lines_extractor().as_ref(), 1)
            .await
            .unwrap();
        assert_eq!(titles(&outcome.delta), vec!["N1", "O1"]);
        assert_eq!(outcome.stats.extracted, 4);
    }

    #[tokio::test]
    async fn test_failing_page_fails_the_source() {
        let h = harness(
            StubFetcher::with(&[("https://mib.gov.in/notices", "N1|/n1")]),
            &["mib"],
            EngineConfig::default(),
        );
        let mut src = source("mib");
        src.pages = vec![
            PageSpec::new("https://mib.gov.in/notices"),
            PageSpec::new("https://mib.gov.in/missing"),
        ];

        let report = h.engine.ingest(&src).await;
        assert_eq!(report.error.as_ref().map(|e| e.kind), Some(ErrorKind::Fetch));
        assert!(h.storage.load_entries(&src).await.unwrap().is_empty());
    }

    /// Local storage whose `append` fails for the listed sources.
    struct FlakyStore {
        inner: LocalStorage,
        failing: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn load_entries(&self, source: &SourceDescriptor) -> Result<Vec<LedgerEntry>> {
            self.inner.load_entries(source).await
        }

        async fn append(&self, source: &SourceDescriptor, entries: &[LedgerEntry]) -> Result<()> {
            let failing = self.failing.lock().unwrap().contains(&source.id);
            if failing {
                return Err(AppError::persistence(
                    self.inner.master_path(source),
                    "No space left on device",
                ));
            }
            self.inner.append(source, entries).await
        }

        async fn write_delta(
            &self,
            source: &SourceDescriptor,
            delta: &RunDelta,
            error: Option<&str>,
        ) -> Result<()> {
            self.inner.write_delta(source, delta, error).await
        }

        async fn rewrite(&self, source: &SourceDescriptor, entries: &[LedgerEntry]) -> Result<()> {
            self.inner.rewrite(source, entries).await
        }

        async fn stored_header(&self, source: &SourceDescriptor) -> Result<Option<Vec<String>>> {
            self.inner.stored_header(source).await
        }

        async fn load_delta(
            &self,
            source: &SourceDescriptor,
        ) -> Result<Option<crate::storage::DeltaDocument>> {
            self.inner.load_delta(source).await
        }
    }

    #[tokio::test]
    async fn test_append_failure_keeps_store_and_siblings() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(FlakyStore {
            inner: LocalStorage::new(tmp.path()),
            failing: Mutex::default(),
        });
        let fetcher = Arc::new(StubFetcher::with(&[("a", "A|/a.pdf"), ("b", "B|/b.pdf")]));
        let mut extractors = ExtractorRegistry::new();
        extractors.register("a", lines_extractor());
        extractors.register("b", lines_extractor());
        let engine = IngestionEngine::new(
            EngineConfig::default(),
            fetcher.clone(),
            store.clone(),
            extractors,
        );
        let sources = vec![source("a"), source("b")];

        assert!(engine.run_all(&sources).await.persistence_ok());
        let master = store.inner.master_path(&sources[0]);
        let before = std::fs::read(&master).unwrap();

        store.failing.lock().unwrap().insert("a".to_string());
        fetcher.set("a", "A|/a.pdf\nA2|/a2.pdf");
        fetcher.set("b", "B|/b.pdf\nB2|/b2.pdf");
        let batch = engine.run_all(&sources).await;

        assert!(!batch.persistence_ok());
        let a = batch.get("a").unwrap();
        assert!(a.persistence_failed());
        assert_eq!(a.stats.accepted, 0);
        assert_eq!(std::fs::read(&master).unwrap(), before);
        let a_delta = store.load_delta(&sources[0]).await.unwrap().unwrap();
        assert_eq!(a_delta.status, DeltaStatus::Failed);
        assert_eq!(a_delta.count, 0);
        assert!(a_delta.error.is_some());

        let b = batch.get("b").unwrap();
        assert!(b.is_ok());
        assert_eq!(b.stats.accepted, 1);
        assert_eq!(store.load_entries(&sources[1]).await.unwrap().len(), 2);
    }

    #[test]
    fn test_interactive_sources_share_a_lane() {
        let mut sources = vec![source("a"), source("b"), source("c"), source("d")];
        sources[1].strategy = FetchStrategy::Interactive;
        sources[3].strategy = FetchStrategy::Interactive;

        let lanes: Vec<Vec<usize>> = IngestionEngine::lanes(&sources)
            .into_iter()
            .map(|lane| lane.into_iter().map(|(i, _)| i).collect())
            .collect();
        assert_eq!(lanes, vec![vec![1, 3], vec![0], vec![2]]);
    }

    /// WebDriver endpoint double. Every `POST /session` opens a new session;
    /// navigation takes `delay` (3s for URLs containing "slow") and the page
    /// source is `url|url` for the last URL navigated to.
    async fn fake_webdriver(delay: Duration) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sessions = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(Mutex::new(String::new()));
        let counter = Arc::clone(&sessions);

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let counter = Arc::clone(&counter);
                let current = Arc::clone(&current);
                tokio::spawn(async move {
                    let _ = answer(socket, delay, &counter, &current).await;
                });
            }
        });

        (format!("http://{addr}"), sessions)
    }

    async fn answer(
        mut socket: TcpStream,
        delay: Duration,
        sessions: &AtomicUsize,
        current: &Mutex<String>,
    ) -> std::io::Result<()> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let head_end = loop {
            let n = socket.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
        let length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < head_end + length {
            let n = socket.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        let body: Value = serde_json::from_slice(&buf[head_end..]).unwrap_or(Value::Null);

        let mut request_line = head.split_whitespace();
        let method = request_line.next().unwrap_or_default().to_string();
        let path = request_line.next().unwrap_or_default().to_string();

        let value = if method == "POST" && path == "/session" {
            let n = sessions.fetch_add(1, Ordering::SeqCst) + 1;
            json!({ "sessionId": format!("s{n}"), "capabilities": {} })
        } else if path.ends_with("/url") {
            let url = body["url"].as_str().unwrap_or_default().to_string();
            let wait = if url.contains("slow") {
                Duration::from_secs(3)
            } else {
                delay
            };
            *current.lock().unwrap() = url;
            tokio::time::sleep(wait).await;
            Value::Null
        } else if path.ends_with("/execute/sync") {
            json!("complete")
        } else if path.ends_with("/source") {
            let url = current.lock().unwrap().clone();
            json!(format!("{url}|{url}"))
        } else {
            Value::Null
        };

        let payload = json!({ "value": value }).to_string();
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            payload.len(),
            payload
        );
        socket.write_all(response.as_bytes()).await?;
        socket.shutdown().await
    }

    fn browser_engine(
        driver_url: &str,
        sources: &[SourceDescriptor],
        data_dir: &std::path::Path,
    ) -> IngestionEngine {
        let mut config = Config::default();
        config.browser.webdriver_url = driver_url.to_string();
        config.browser.poll_interval_ms = 10;
        config.engine = EngineConfig {
            max_concurrent: 3,
            source_timeout_secs: 1,
            ..EngineConfig::default()
        };
        config.sources = sources.to_vec();

        let mut extractors = ExtractorRegistry::new();
        for source in sources {
            extractors.register(source.id.as_str(), lines_extractor());
        }
        IngestionEngine::new(
            config.engine.clone(),
            Arc::new(FetchAdapter::new(&config).unwrap()),
            Arc::new(LocalStorage::new(data_dir)),
            extractors,
        )
    }

    fn interactive(id: &str) -> SourceDescriptor {
        let mut src = source(id);
        src.url = format!("https://{id}.gov.in/list");
        src.strategy = FetchStrategy::Interactive;
        src
    }

    #[tokio::test]
    async fn test_queued_interactive_sources_keep_their_deadline() {
        // Each render takes 600ms against a 1s deadline; waiting in line
        // for the session must not count against it.
        let (driver_url, sessions) = fake_webdriver(Duration::from_millis(600)).await;
        let tmp = TempDir::new().unwrap();
        let sources = vec![interactive("i1"), interactive("i2"), interactive("i3")];
        let engine = browser_engine(&driver_url, &sources, tmp.path());

        let batch = engine.run_all(&sources).await;

        for report in &batch.sources {
            assert!(report.is_ok(), "{report}");
            assert_eq!(report.stats.accepted, 1);
        }
        assert_eq!(sessions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timed_out_render_discards_session() {
        let (driver_url, sessions) = fake_webdriver(Duration::from_millis(100)).await;
        let tmp = TempDir::new().unwrap();
        let sources = vec![interactive("slow"), interactive("next")];
        let engine = browser_engine(&driver_url, &sources, tmp.path());

        let batch = engine.run_all(&sources).await;

        let slow = batch.get("slow").unwrap();
        assert_eq!(slow.error.as_ref().map(|e| e.kind), Some(ErrorKind::Timeout));
        let next = batch.get("next").unwrap();
        assert!(next.is_ok(), "{next}");
        assert_eq!(next.stats.accepted, 1);
        assert_eq!(sessions.load(Ordering::SeqCst), 2);
    }
}
