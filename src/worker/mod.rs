//! Resolution worker
//!
//! Runs one job per mention candidate: normalize, resolve, append to the
//! ledger, update the cross-reference index. Jobs run concurrently up to
//! `max_concurrent_jobs`, each with its own cancellation, and a failing job
//! never takes the batch down with it.

use crate::database::{Database, MentionCandidate, MentionOutcome, MentionRecord, NewMentionRecord};
use crate::error::AppError;
use crate::normalizer::normalize_candidate;
use crate::resolver::FuzzyResolver;
use crate::xref::CrossReferenceIndex;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// What happened to one candidate.
#[derive(Debug, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum CandidateOutcome {
    Recorded(MentionRecord),
    /// No matchable text; nothing written
    Skipped,
    /// Cancelled before the ledger append; nothing written
    Cancelled,
    Failed(AppError),
}

impl CandidateOutcome {
    pub fn record(&self) -> Option<&MentionRecord> {
        match self {
            Self::Recorded(record) => Some(record),
            _ => None,
        }
    }
}

/// Shared worker state for status reporting
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerState {
    pub active_jobs: usize,
    pub processed: usize,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Tally of a batch plus each candidate's outcome, in input order.
#[derive(Debug, Default, Serialize)]
pub struct BatchSummary {
    pub run_id: String,
    pub total: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub lookup_failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub failed: usize,
    pub outcomes: Vec<CandidateOutcome>,
}

impl BatchSummary {
    fn from_outcomes(run_id: &str, outcomes: Vec<CandidateOutcome>) -> Self {
        let mut summary = BatchSummary {
            run_id: run_id.to_string(),
            total: outcomes.len(),
            ..BatchSummary::default()
        };
        for outcome in &outcomes {
            match outcome {
                CandidateOutcome::Recorded(record) => match record.outcome {
                    MentionOutcome::Matched => summary.matched += 1,
                    MentionOutcome::Unmatched => summary.unmatched += 1,
                    MentionOutcome::LookupFailed => summary.lookup_failed += 1,
                },
                CandidateOutcome::Skipped => summary.skipped += 1,
                CandidateOutcome::Cancelled => summary.cancelled += 1,
                CandidateOutcome::Failed(_) => summary.failed += 1,
            }
        }
        summary.outcomes = outcomes;
        summary
    }
}

#[derive(Clone)]
pub struct ResolutionWorker {
    db: Arc<Database>,
    resolver: Arc<FuzzyResolver>,
    index: Arc<RwLock<CrossReferenceIndex>>,
    state: Arc<RwLock<WorkerState>>,
    run_id: Arc<str>,
    jobs: Arc<Semaphore>,
}

impl ResolutionWorker {
    pub fn new(
        db: Arc<Database>,
        resolver: Arc<FuzzyResolver>,
        index: Arc<RwLock<CrossReferenceIndex>>,
        max_concurrent_jobs: usize,
    ) -> Self {
        let run_id = uuid::Uuid::new_v4().to_string();
        log::info!(
            "Resolution worker {} ready ({} concurrent jobs)",
            run_id,
            max_concurrent_jobs.max(1)
        );
        Self {
            db,
            resolver,
            index,
            state: Arc::new(RwLock::new(WorkerState::default())),
            run_id: run_id.into(),
            jobs: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn index(&self) -> Arc<RwLock<CrossReferenceIndex>> {
        self.index.clone()
    }

    pub async fn state(&self) -> WorkerState {
        self.state.read().await.clone()
    }

    /// Rebuild the cross-reference index from the whole ledger.
    pub async fn rebuild_index(&self) -> Result<usize, AppError> {
        let records = self.db.all_mention_records()?;
        self.index.write().await.rebuild_from(&records);
        Ok(records.len())
    }

    /// Resolve a single candidate and record the result.
    pub async fn resolve_one(
        &self,
        candidate: MentionCandidate,
        cancel: &CancellationToken,
    ) -> CandidateOutcome {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return CandidateOutcome::Cancelled,
            permit = self.jobs.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(e) => return CandidateOutcome::Failed(AppError::Other(e.to_string())),
            },
        };

        let span = tracing::info_span!(
            "resolve",
            podcast = %candidate.podcast_id,
            episode = %candidate.episode_id
        );

        {
            let mut state = self.state.write().await;
            state.active_jobs += 1;
        }
        let outcome = self.run_job(candidate, cancel).instrument(span).await;
        {
            let mut state = self.state.write().await;
            state.active_jobs = state.active_jobs.saturating_sub(1);
            state.processed += 1;
            state.last_activity = Some(Utc::now());
        }
        outcome
    }

    async fn run_job(&self, candidate: MentionCandidate, cancel: &CancellationToken) -> CandidateOutcome {
        let normalized = match normalize_candidate(&candidate.raw_text, candidate.context.as_deref()) {
            Ok(normalized) => normalized,
            Err(e) => {
                log::info!("Skipping candidate {:?}: {}", candidate.raw_text, e);
                return CandidateOutcome::Skipped;
            }
        };

        let resolution = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::info!("Cancelled resolving {:?}", candidate.raw_text);
                return CandidateOutcome::Cancelled;
            }
            result = self.resolver.resolve(&normalized) => match result {
                Ok(resolution) => resolution,
                Err(e) => {
                    let e = AppError::from(e);
                    log::error!("Failed to resolve {:?}: {}", candidate.raw_text, e);
                    return CandidateOutcome::Failed(e);
                }
            },
        };

        if cancel.is_cancelled() {
            return CandidateOutcome::Cancelled;
        }

        let mut record =
            NewMentionRecord::for_candidate(&candidate, &self.resolver.config().version, &self.run_id);
        record.book_id = resolution.book_id();
        record.confidence = resolution.confidence();
        record.outcome = resolution.outcome();
        record.match_method = resolution.method();

        let appended = match self.db.append_mention(&record) {
            Ok(appended) => appended,
            Err(e) => {
                let e = AppError::from(e);
                log::error!("Failed to record mention {:?}: {}", candidate.raw_text, e);
                return CandidateOutcome::Failed(e);
            }
        };

        self.index.write().await.apply_incremental(&appended);

        log::info!(
            "{:?} -> {} (book {:?}, {:.2})",
            appended.raw_text,
            appended.outcome,
            appended.book_id,
            appended.confidence
        );
        CandidateOutcome::Recorded(appended)
    }

    /// Resolve `candidates` concurrently. Outcomes come back in input order.
    pub async fn run_batch(
        &self,
        candidates: Vec<MentionCandidate>,
        cancel: &CancellationToken,
    ) -> BatchSummary {
        let batch_cancel = cancel.child_token();
        let total = candidates.len();
        log::info!("Run {}: resolving {} candidates", self.run_id, total);

        let mut jobs = JoinSet::new();
        for (position, candidate) in candidates.into_iter().enumerate() {
            let worker = self.clone();
            let job_cancel = batch_cancel.clone();
            jobs.spawn(async move { (position, worker.resolve_one(candidate, &job_cancel).await) });
        }

        let mut outcomes: Vec<Option<CandidateOutcome>> = (0..total).map(|_| None).collect();
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok((position, outcome)) => outcomes[position] = Some(outcome),
                Err(e) => log::error!("Resolution job panicked: {}", e),
            }
        }

        let outcomes = outcomes
            .into_iter()
            .map(|outcome| {
                outcome.unwrap_or_else(|| CandidateOutcome::Failed(AppError::Other("job panicked".to_string())))
            })
            .collect();
        let summary = BatchSummary::from_outcomes(&self.run_id, outcomes);

        log::info!(
            "Run {}: {} matched, {} unmatched, {} lookup failures, {} skipped, {} cancelled, {} failed",
            self.run_id,
            summary.matched,
            summary.unmatched,
            summary.lookup_failed,
            summary.skipped,
            summary.cancelled,
            summary.failed
        );
        summary
    }

    /// Re-resolve every mention still without a book. History is kept: each
    /// attempt appends a new record.
    pub async fn reprocess_unresolved(&self, cancel: &CancellationToken) -> Result<BatchSummary, AppError> {
        let pending = self.db.unresolved_records()?;
        log::info!("Reprocessing {} unresolved mentions", pending.len());

        let candidates = pending.iter().map(MentionRecord::to_candidate).collect();
        Ok(self.run_batch(candidates, cancel).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolverConfig;
    use crate::database::EpisodeRef;
    use crate::lookup::fake::FakeLookup;
    use crate::lookup::MetadataLookup;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup_db() -> (Arc<Database>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).unwrap();
        (Arc::new(db), temp_dir)
    }

    fn worker(db: &Arc<Database>, lookup: Arc<dyn MetadataLookup>) -> ResolutionWorker {
        let resolver = FuzzyResolver::new(
            db.clone(),
            lookup,
            ResolverConfig::default(),
            Duration::from_secs(2),
        );
        ResolutionWorker::new(
            db.clone(),
            Arc::new(resolver),
            Arc::new(RwLock::new(CrossReferenceIndex::new())),
            4,
        )
    }

    fn mention(raw: &str, podcast: &str, episode: &str) -> MentionCandidate {
        MentionCandidate {
            raw_text: raw.to_string(),
            podcast_id: podcast.to_string(),
            episode_id: episode.to_string(),
            timestamp_offset: 12.5,
            context: None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_candidates_create_one_book() {
        let (db, _temp) = setup_db();
        let lookup = Arc::new(
            FakeLookup::new()
                .with_book("Project Hail Mary", "Project Hail Mary", &["Andy Weir"], "OL21745884W")
                .with_delay(Duration::from_millis(20)),
        );
        let worker = worker(&db, lookup.clone());

        let candidates = (0..8)
            .map(|i| mention("Project Hail Mary", "pod", &format!("ep{}", i)))
            .collect();
        let summary = worker.run_batch(candidates, &CancellationToken::new()).await;

        assert_eq!(summary.matched, 8);
        let ids: Vec<Option<i64>> = summary
            .outcomes
            .iter()
            .map(|o| o.record().and_then(|r| r.book_id))
            .collect();
        assert!(ids.iter().all(|id| id.is_some() && *id == ids[0]));
        assert_eq!(db.count_books().unwrap(), 1);
        assert_eq!(lookup.calls(), 1);

        let state = worker.state().await;
        assert_eq!(state.processed, 8);
        assert_eq!(state.active_jobs, 0);
    }

    #[tokio::test]
    async fn test_sapiens_end_to_end() {
        let (db, _temp) = setup_db();
        let lookup = Arc::new(FakeLookup::new().with_book(
            "Sapiens",
            "Sapiens: A Brief History of Humankind",
            &["Yuval Noah Harari"],
            "OL17075811W",
        ));
        let worker = worker(&db, lookup);

        let summary = worker
            .run_batch(
                vec![
                    mention("Sapiens", "pod-a", "ep-1"),
                    mention("sapiens: a brief history of humankind", "pod-b", "ep-2"),
                    mention("Sapiens by Harari", "pod-c", "ep-3"),
                ],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(summary.matched, 3);
        let book_id = summary.outcomes[0].record().and_then(|r| r.book_id).unwrap();
        for outcome in &summary.outcomes {
            assert_eq!(outcome.record().and_then(|r| r.book_id), Some(book_id));
        }

        let index = worker.index();
        let mut mentions = index.read().await.mentions_of(book_id, &db).unwrap();
        mentions.sort();
        let expected: Vec<EpisodeRef> = [("pod-a", "ep-1"), ("pod-b", "ep-2"), ("pod-c", "ep-3")]
            .iter()
            .map(|(p, e)| EpisodeRef {
                podcast_id: p.to_string(),
                episode_id: e.to_string(),
            })
            .collect();
        assert_eq!(mentions, expected);
    }

    #[tokio::test]
    async fn test_unresolved_mentions_are_kept_and_reprocessed() {
        let (db, _temp) = setup_db();
        let first = worker(&db, Arc::new(FakeLookup::new()));

        let summary = first
            .run_batch(vec![mention("Xyzzyxoblivion", "pod", "ep-9")], &CancellationToken::new())
            .await;
        assert_eq!(summary.unmatched, 1);
        let record = summary.outcomes[0].record().unwrap();
        assert_eq!(record.book_id, None);
        assert_eq!(record.outcome, MentionOutcome::Unmatched);

        let pending = db.unresolved_records().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].raw_text, "Xyzzyxoblivion");
        assert_eq!(pending[0].timestamp_offset, 12.5);

        // A later run whose catalogue knows the title picks it up
        let lookup = Arc::new(FakeLookup::new().with_book(
            "Xyzzyxoblivion",
            "Xyzzyxoblivion",
            &[],
            "OL1W",
        ));
        let second = worker(&db, lookup);
        let summary = second.reprocess_unresolved(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.matched, 1);
        assert_ne!(first.run_id(), second.run_id());

        assert!(db.unresolved_records().unwrap().is_empty());
        let history = db.records_for_episode("ep-9").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].book_id, None);
        assert!(history[1].book_id.is_some());
    }

    #[tokio::test]
    async fn test_lookup_failure_is_recorded_for_retry() {
        let (db, _temp) = setup_db();
        let worker = worker(&db, Arc::new(FakeLookup::failing()));

        let summary = worker
            .run_batch(vec![mention("Dune", "pod", "ep-1")], &CancellationToken::new())
            .await;
        assert_eq!(summary.lookup_failed, 1);
        assert_eq!(db.unresolved_records().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_candidates_are_skipped() {
        let (db, _temp) = setup_db();
        let worker = worker(&db, Arc::new(FakeLookup::new()));

        let summary = worker
            .run_batch(
                vec![mention("   ", "pod", "ep-1"), mention("?!", "pod", "ep-1")],
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(summary.skipped, 2);
        assert!(db.all_mention_records().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_jobs_leave_no_trace() {
        let (db, _temp) = setup_db();
        let lookup = Arc::new(
            FakeLookup::new()
                .with_book("Dune", "Dune", &["Frank Herbert"], "OL893415W")
                .with_delay(Duration::from_millis(500)),
        );
        let worker = worker(&db, lookup);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let summary = worker.run_batch(vec![mention("Dune", "pod", "ep-1")], &cancel).await;
        assert_eq!(summary.cancelled, 1);
        assert!(db.all_mention_records().unwrap().is_empty());
        assert!(worker.index().read().await.is_empty());

        // Already-cancelled token: nothing starts
        let summary = worker.run_batch(vec![mention("Emma", "pod", "ep-2")], &cancel).await;
        assert_eq!(summary.cancelled, 1);
    }

    #[tokio::test]
    async fn test_rebuild_index_matches_incremental() {
        let (db, _temp) = setup_db();
        let lookup = Arc::new(FakeLookup::new().with_book("Emma", "Emma", &["Jane Austen"], "OL66554W"));
        let worker = worker(&db, lookup);

        worker
            .run_batch(
                vec![mention("Emma", "p1", "e1"), mention("Emma", "p2", "e2")],
                &CancellationToken::new(),
            )
            .await;
        let incremental = worker.index().read().await.clone();

        assert_eq!(worker.rebuild_index().await.unwrap(), 2);
        assert_eq!(*worker.index().read().await, incremental);
    }
}
