//! Cross-reference index: which episodes mention which book.
//!
//! Derived entirely from the ledger. Entries are keyed by the book id a
//! record was written against; merges are applied at read time, so a merge
//! never requires touching the index.

use crate::database::{Database, EpisodeRef, MentionRecord};
use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrossReferenceIndex {
    /// book id -> episode -> first ledger sequence mentioning it there
    entries: HashMap<i64, BTreeMap<EpisodeRef, i64>>,
}

/// A book discussed on more than one show.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossPodcastBook {
    pub book_id: i64,
    pub podcasts: Vec<String>,
    pub episodes: Vec<EpisodeRef>,
}

impl CrossReferenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard current state and index `records` from scratch.
    pub fn rebuild_from(&mut self, records: &[MentionRecord]) {
        self.entries.clear();
        for record in records {
            self.apply_incremental(record);
        }
        log::info!(
            "Rebuilt cross-reference index: {} books from {} records",
            self.entries.len(),
            records.len()
        );
    }

    /// Fold one record in. Order of application does not matter.
    pub fn apply_incremental(&mut self, record: &MentionRecord) {
        let Some(book_id) = record.book_id else {
            return;
        };
        let episode = EpisodeRef {
            podcast_id: record.podcast_id.clone(),
            episode_id: record.episode_id.clone(),
        };
        self.entries
            .entry(book_id)
            .or_default()
            .entry(episode)
            .and_modify(|seq| *seq = (*seq).min(record.id))
            .or_insert(record.id);
    }

    /// Episodes mentioning `book_id` or any book merged into it, in
    /// first-seen order.
    pub fn mentions_of(&self, book_id: i64, db: &Database) -> Result<Vec<EpisodeRef>> {
        let members = db.redirect_members(book_id)?;
        Ok(self.merged_entries(&members))
    }

    /// Books mentioned on at least `min_podcasts` distinct podcasts, most
    /// widely mentioned first.
    pub fn cross_podcast_books(&self, min_podcasts: usize, db: &Database) -> Result<Vec<CrossPodcastBook>> {
        let mut survivors: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for &book_id in self.entries.keys() {
            let survivor = db.resolve_redirect(book_id)?;
            survivors.entry(survivor).or_default().push(book_id);
        }

        let mut books: Vec<CrossPodcastBook> = survivors
            .into_iter()
            .filter_map(|(book_id, members)| {
                let episodes = self.merged_entries(&members);
                let podcasts: BTreeSet<&str> =
                    episodes.iter().map(|e| e.podcast_id.as_str()).collect();
                if podcasts.len() < min_podcasts.max(1) {
                    return None;
                }
                let podcasts = podcasts.into_iter().map(str::to_string).collect();
                Some(CrossPodcastBook {
                    book_id,
                    podcasts,
                    episodes,
                })
            })
            .collect();

        books.sort_by(|a, b| {
            b.podcasts
                .len()
                .cmp(&a.podcasts.len())
                .then(a.book_id.cmp(&b.book_id))
        });
        Ok(books)
    }

    /// Number of books (pre-merge ids) with at least one mention.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn merged_entries(&self, members: &[i64]) -> Vec<EpisodeRef> {
        let mut first_seen: BTreeMap<&EpisodeRef, i64> = BTreeMap::new();
        for id in members {
            for (episode, &seq) in self.entries.get(id).into_iter().flatten() {
                first_seen
                    .entry(episode)
                    .and_modify(|s| *s = (*s).min(seq))
                    .or_insert(seq);
            }
        }

        let mut ordered: Vec<(i64, &EpisodeRef)> =
            first_seen.into_iter().map(|(episode, seq)| (seq, episode)).collect();
        ordered.sort();
        ordered.into_iter().map(|(_, episode)| episode.clone()).collect()
    }
}
