//! Fuzzy resolver
//!
//! Maps a normalized candidate onto a canonical book: exact keys first, then
//! fuzzy scoring over books sharing a significant token, then the external
//! catalogue. Only the external step creates books, and it does so under a
//! per-key lock.

pub mod key_lock;
pub mod similarity;

use crate::config::ResolverConfig;
use crate::database::{Book, Database, InsertOutcome, MatchMethod, MentionOutcome, NewBook};
use crate::error::LookupError;
use crate::lookup::{ExternalBook, MetadataLookup};
use crate::normalizer::{title_keys, NormalizedCandidate};
use anyhow::Result;
use key_lock::KeyedLocks;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// What the resolver decided for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    Matched {
        book_id: i64,
        confidence: f64,
        method: MatchMethod,
    },
    /// `retry` is set when the external lookup failed rather than came back empty
    Unmatched { retry: bool },
}

impl Resolution {
    pub fn book_id(&self) -> Option<i64> {
        match self {
            Self::Matched { book_id, .. } => Some(*book_id),
            Self::Unmatched { .. } => None,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Self::Matched { confidence, .. } => *confidence,
            Self::Unmatched { .. } => 0.0,
        }
    }

    pub fn method(&self) -> Option<MatchMethod> {
        match self {
            Self::Matched { method, .. } => Some(*method),
            Self::Unmatched { .. } => None,
        }
    }

    pub fn outcome(&self) -> MentionOutcome {
        match self {
            Self::Matched { .. } => MentionOutcome::Matched,
            Self::Unmatched { retry: true } => MentionOutcome::LookupFailed,
            Self::Unmatched { retry: false } => MentionOutcome::Unmatched,
        }
    }
}

pub struct FuzzyResolver {
    db: Arc<Database>,
    lookup: Arc<dyn MetadataLookup>,
    config: ResolverConfig,
    lookup_timeout: Duration,
    create_locks: KeyedLocks,
}

impl FuzzyResolver {
    pub fn new(
        db: Arc<Database>,
        lookup: Arc<dyn MetadataLookup>,
        config: ResolverConfig,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            db,
            lookup,
            config,
            lookup_timeout,
            create_locks: KeyedLocks::new(),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve one candidate. Errors are store failures only; lookup
    /// trouble comes back as `Unmatched { retry: true }`.
    pub async fn resolve(&self, candidate: &NormalizedCandidate) -> Result<Resolution> {
        if let Some(found) = self.match_in_store(candidate)? {
            return Ok(found);
        }

        let _guard = self.create_locks.lock(&candidate.full_key).await;

        // Another job may have created the book while we waited
        if let Some(found) = self.match_in_store(candidate)? {
            return Ok(found);
        }

        self.resolve_externally(candidate).await
    }

    /// Steps that only read the store.
    pub fn match_in_store(&self, candidate: &NormalizedCandidate) -> Result<Option<Resolution>> {
        if let Some(book) = self.db.lookup_exact(&candidate.full_key)? {
            return Ok(Some(Resolution::Matched {
                book_id: book.id,
                confidence: 1.0,
                method: MatchMethod::Exact,
            }));
        }

        if candidate.short_key != candidate.full_key {
            if let Some(book) = self.db.lookup_exact(&candidate.short_key)? {
                return Ok(Some(Resolution::Matched {
                    book_id: book.id,
                    confidence: self.config.short_key_confidence,
                    method: MatchMethod::ShortKey,
                }));
            }
        }

        let Some((book, score)) = self.best_fuzzy(candidate)? else {
            return Ok(None);
        };

        if score >= self.config.high_threshold {
            log::debug!(
                "Fuzzy match {:?} -> book {} ({:.3})",
                candidate.full_key,
                book.id,
                score
            );
            return Ok(Some(Resolution::Matched {
                book_id: book.id,
                confidence: score,
                method: MatchMethod::Fuzzy,
            }));
        }

        if score >= self.config.mid_threshold {
            if let Some(hint) = candidate.author_hint.as_deref() {
                if similarity::author_matches(
                    hint,
                    &book.authors,
                    self.config.author_match_threshold,
                ) {
                    let confidence = (score + self.config.author_boost).min(self.config.boost_cap);
                    log::debug!(
                        "Author-boosted match {:?} by {:?} -> book {} ({:.3})",
                        candidate.full_key,
                        hint,
                        book.id,
                        confidence
                    );
                    return Ok(Some(Resolution::Matched {
                        book_id: book.id,
                        confidence,
                        method: MatchMethod::AuthorBoost,
                    }));
                }
            }
        }

        Ok(None)
    }

    /// Best-scoring book among those sharing a significant token.
    ///
    /// Books within `tie_epsilon` of the best score are ranked by how often
    /// they have been mentioned, then by lowest id. The returned score is
    /// always the best one, so the tie-break picks the book but never moves
    /// the result across a threshold.
    fn best_fuzzy(&self, candidate: &NormalizedCandidate) -> Result<Option<(Book, f64)>> {
        let mut pool: BTreeMap<i64, Book> = BTreeMap::new();
        for token in candidate.significant_tokens() {
            for book in self.db.lookup_candidates_by_token(token)? {
                pool.entry(book.id).or_insert(book);
            }
        }
        if pool.is_empty() {
            return Ok(None);
        }

        let scored: Vec<(Book, f64)> = pool
            .into_values()
            .map(|book| {
                let score = similarity::score(candidate, &book);
                (book, score)
            })
            .collect();
        let best = scored.iter().map(|(_, score)| *score).fold(0.0, f64::max);

        let mut tied = Vec::new();
        for (book, score) in scored {
            if best - score <= self.config.tie_epsilon {
                let popularity = self.db.mention_count_for_book(book.id)?;
                tied.push((popularity, book, score));
            }
        }
        tied.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.id.cmp(&b.1.id)));

        Ok(tied.into_iter().next().map(|(_, book, _)| (book, best)))
    }

    async fn resolve_externally(&self, candidate: &NormalizedCandidate) -> Result<Resolution> {
        let looked_up = tokio::time::timeout(
            self.lookup_timeout,
            self.lookup
                .lookup(&candidate.title, candidate.author_hint.as_deref()),
        )
        .await
        .unwrap_or(Err(LookupError::Timeout(self.lookup_timeout)));

        match looked_up {
            Ok(Some(found)) => self.adopt_external(candidate, found),
            Ok(None) => {
                log::info!("No match anywhere for {:?}", candidate.title);
                Ok(Resolution::Unmatched { retry: false })
            }
            Err(e) => {
                log::warn!("Lookup failed for {:?}: {}", candidate.title, e);
                Ok(Resolution::Unmatched { retry: true })
            }
        }
    }

    /// Attach an externally verified record to the store and register the
    /// candidate's title as an alias of it.
    fn adopt_external(&self, candidate: &NormalizedCandidate, found: ExternalBook) -> Result<Resolution> {
        let mut existing = match found.external_id.as_deref() {
            Some(external_id) => self.db.find_by_external_id(external_id)?,
            None => None,
        };
        if existing.is_none() {
            if let Some(isbn) = found.isbn.as_deref() {
                existing = self.db.find_by_isbn(isbn)?;
            }
        }

        let book_id = match existing {
            Some(book) => book.id,
            None => {
                if title_keys(&found.title).is_err() {
                    log::warn!(
                        "Ignoring lookup result for {:?}: title {:?} has no matchable text",
                        candidate.title,
                        found.title
                    );
                    return Ok(Resolution::Unmatched { retry: false });
                }
                let authors = found.authors.clone();
                match self.db.insert_book(&NewBook::from(found))? {
                    InsertOutcome::Created(id) => id,
                    InsertOutcome::Existing(id) => {
                        for author in &authors {
                            self.db.add_author(id, author)?;
                        }
                        id
                    }
                }
            }
        };

        self.db.add_alias(book_id, &candidate.title)?;

        Ok(Resolution::Matched {
            book_id,
            confidence: self.config.external_confidence,
            method: MatchMethod::External,
        })
    }
}
