//! Mention ledger: append-only history of every resolution attempt.

use super::books::{redirect_members_locked, resolve_redirect_locked};
use super::{Database, MatchMethod, MentionOutcome, MentionRecord, NewMentionRecord};
use anyhow::{ensure, Result};
use rusqlite::{params, Row};

const MENTION_COLUMNS: &str = "id, podcast_id, episode_id, timestamp_offset, raw_text, context,
     book_id, confidence, outcome, match_method, resolved_at, resolver_version, run_id";

impl Database {
    /// Append one record. This is the only write the ledger accepts.
    pub fn append_mention(&self, record: &NewMentionRecord) -> Result<MentionRecord> {
        ensure!(
            (0.0..=1.0).contains(&record.confidence),
            "confidence {} outside [0, 1]",
            record.confidence
        );
        ensure!(
            record.outcome != MentionOutcome::Matched || record.book_id.is_some(),
            "matched mention of {:?} has no book id",
            record.raw_text
        );

        let conn = self.conn()?;
        let resolved_at = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO mention_records (podcast_id, episode_id, timestamp_offset, raw_text,
                 context, book_id, confidence, outcome, match_method, resolved_at,
                 resolver_version, run_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.podcast_id,
                record.episode_id,
                record.timestamp_offset,
                record.raw_text,
                record.context,
                record.book_id,
                record.confidence,
                record.outcome.to_string(),
                record.match_method.map(|m| m.to_string()),
                resolved_at,
                record.resolver_version,
                record.run_id,
            ],
        )?;
        let id = conn.last_insert_rowid();

        Ok(MentionRecord {
            id,
            podcast_id: record.podcast_id.clone(),
            episode_id: record.episode_id.clone(),
            timestamp_offset: record.timestamp_offset,
            raw_text: record.raw_text.clone(),
            context: record.context.clone(),
            book_id: record.book_id,
            confidence: record.confidence,
            outcome: record.outcome,
            match_method: record.match_method,
            resolved_at,
            resolver_version: record.resolver_version.clone(),
            run_id: record.run_id.clone(),
        })
    }

    pub fn get_mention(&self, id: i64) -> Result<Option<MentionRecord>> {
        let records = self.query_mentions(
            &format!("SELECT {} FROM mention_records WHERE id = ?", MENTION_COLUMNS),
            params![id],
        )?;
        Ok(records.into_iter().next())
    }

    /// Records for an episode in append order.
    pub fn records_for_episode(&self, episode_id: &str) -> Result<Vec<MentionRecord>> {
        self.query_mentions(
            &format!(
                "SELECT {} FROM mention_records WHERE episode_id = ? ORDER BY id",
                MENTION_COLUMNS
            ),
            params![episode_id],
        )
    }

    /// Records that resolve to `book_id`, including records written against
    /// books later merged into it.
    pub fn records_for_book(&self, book_id: i64) -> Result<Vec<MentionRecord>> {
        let members = {
            let conn = self.conn()?;
            let survivor = resolve_redirect_locked(&conn, book_id, self.max_redirect_hops)?;
            redirect_members_locked(&conn, survivor)?
        };

        let placeholders = vec!["?"; members.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM mention_records WHERE book_id IN ({}) ORDER BY id",
            MENTION_COLUMNS, placeholders
        );
        self.query_mentions(&sql, rusqlite::params_from_iter(members.iter()))
    }

    /// Popularity prior used by the resolver's tie-break.
    pub fn mention_count_for_book(&self, book_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let survivor = resolve_redirect_locked(&conn, book_id, self.max_redirect_hops)?;
        let count = conn.query_row(
            "WITH RECURSIVE members(id) AS (
                 SELECT ?1
                 UNION
                 SELECT r.from_id FROM book_redirects r JOIN members m ON r.to_id = m.id
             )
             SELECT COUNT(*) FROM mention_records WHERE book_id IN (SELECT id FROM members)",
            params![survivor],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Whole ledger in append order, for index rebuilds.
    pub fn all_mention_records(&self) -> Result<Vec<MentionRecord>> {
        self.query_mentions(
            &format!("SELECT {} FROM mention_records ORDER BY id", MENTION_COLUMNS),
            params![],
        )
    }

    /// Mentions whose latest record has no book, oldest first.
    ///
    /// A mention is identified by podcast, episode, raw text and offset;
    /// once a later record for it resolves, it drops out of this list.
    pub fn unresolved_records(&self) -> Result<Vec<MentionRecord>> {
        self.query_mentions(
            "SELECT m.id, m.podcast_id, m.episode_id, m.timestamp_offset, m.raw_text, m.context,
                    m.book_id, m.confidence, m.outcome, m.match_method, m.resolved_at,
                    m.resolver_version, m.run_id
             FROM mention_records m
             WHERE m.book_id IS NULL
               AND NOT EXISTS (
                   SELECT 1 FROM mention_records later
                   WHERE later.podcast_id = m.podcast_id
                     AND later.episode_id = m.episode_id
                     AND later.raw_text = m.raw_text
                     AND later.timestamp_offset = m.timestamp_offset
                     AND later.id > m.id
               )
             ORDER BY m.id",
            params![],
        )
    }

    fn query_mentions<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<MentionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let records = stmt
            .query_map(params, mention_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

/// Unknown outcome text means a damaged row; it reads as unmatched so the
/// mention stays eligible for re-resolution.
fn parse_outcome(id: i64, stored: &str) -> MentionOutcome {
    MentionOutcome::parse(stored).unwrap_or_else(|| {
        log::warn!("Mention {} has unknown outcome {:?}, reading as unmatched", id, stored);
        MentionOutcome::Unmatched
    })
}

fn mention_from_row(row: &Row) -> rusqlite::Result<MentionRecord> {
    Ok(MentionRecord {
        id: row.get(0)?,
        podcast_id: row.get(1)?,
        episode_id: row.get(2)?,
        timestamp_offset: row.get(3)?,
        raw_text: row.get(4)?,
        context: row.get(5)?,
        book_id: row.get(6)?,
        confidence: row.get(7)?,
        outcome: parse_outcome(row.get(0)?, &row.get::<_, String>(8)?),
        match_method: row
            .get::<_, Option<String>>(9)?
            .as_deref()
            .and_then(MatchMethod::parse),
        resolved_at: row.get(10)?,
        resolver_version: row.get(11)?,
        run_id: row.get(12)?,
    })
}
