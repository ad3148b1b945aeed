pub mod books;
pub mod ledger;
pub mod models;


use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub use models::*;

/// Redirect hops followed before a chain is reported as corrupt.
pub const DEFAULT_MAX_REDIRECT_HOPS: usize = 16;

/// SQLite-backed canonical book store and mention ledger.
///
/// Statements run one at a time on the shared connection; logical
/// serialization of book creation is the resolver's per-key lock plus the
/// UNIQUE constraints below.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    max_redirect_hops: usize,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            PRAGMA temp_store=MEMORY;
        ",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            max_redirect_hops: DEFAULT_MAX_REDIRECT_HOPS,
        };

        db.init_schema()?;

        Ok(db)
    }

    pub fn with_max_redirect_hops(mut self, max_hops: usize) -> Self {
        self.max_redirect_hops = max_hops.max(1);
        self
    }

    pub fn max_redirect_hops(&self) -> usize {
        self.max_redirect_hops
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS books (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                normalized_key TEXT NOT NULL UNIQUE,
                isbn TEXT,
                external_id TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_books_isbn ON books(isbn);
            CREATE INDEX IF NOT EXISTS idx_books_external_id ON books(external_id);

            CREATE TABLE IF NOT EXISTS book_authors (
                book_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                position INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (book_id) REFERENCES books(id),
                UNIQUE(book_id, name)
            );

            -- Every normalized key (title or alias) maps to exactly one book
            CREATE TABLE IF NOT EXISTS book_keys (
                key TEXT PRIMARY KEY,
                book_id INTEGER NOT NULL,
                alias_title TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                FOREIGN KEY (book_id) REFERENCES books(id)
            );

            CREATE INDEX IF NOT EXISTS idx_book_keys_book ON book_keys(book_id);

            -- Significant key tokens, bounds the fuzzy candidate search
            CREATE TABLE IF NOT EXISTS book_tokens (
                token TEXT NOT NULL,
                book_id INTEGER NOT NULL,
                PRIMARY KEY (token, book_id),
                FOREIGN KEY (book_id) REFERENCES books(id)
            );

            -- Merge graph: a merged book points at the book that absorbed it
            CREATE TABLE IF NOT EXISTS book_redirects (
                from_id INTEGER PRIMARY KEY,
                to_id INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                FOREIGN KEY (from_id) REFERENCES books(id),
                FOREIGN KEY (to_id) REFERENCES books(id)
            );

            CREATE INDEX IF NOT EXISTS idx_book_redirects_to ON book_redirects(to_id);

            CREATE TABLE IF NOT EXISTS mention_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                podcast_id TEXT NOT NULL,
                episode_id TEXT NOT NULL,
                timestamp_offset REAL NOT NULL DEFAULT 0,
                raw_text TEXT NOT NULL,
                context TEXT,
                book_id INTEGER,
                confidence REAL NOT NULL DEFAULT 0,
                outcome TEXT NOT NULL,
                match_method TEXT,
                resolved_at TEXT NOT NULL,
                resolver_version TEXT NOT NULL,
                run_id TEXT NOT NULL,
                FOREIGN KEY (book_id) REFERENCES books(id)
            );

            CREATE INDEX IF NOT EXISTS idx_mentions_episode ON mention_records(episode_id);
            CREATE INDEX IF NOT EXISTS idx_mentions_book ON mention_records(book_id);
            CREATE INDEX IF NOT EXISTS idx_mentions_source
                ON mention_records(podcast_id, episode_id, raw_text);

            CREATE TRIGGER IF NOT EXISTS mention_records_no_update
                BEFORE UPDATE ON mention_records BEGIN
                SELECT RAISE(ABORT, 'mention ledger is append-only');
            END;
            CREATE TRIGGER IF NOT EXISTS mention_records_no_delete
                BEFORE DELETE ON mention_records BEGIN
                SELECT RAISE(ABORT, 'mention ledger is append-only');
            END;
            CREATE TRIGGER IF NOT EXISTS books_no_delete
                BEFORE DELETE ON books BEGIN
                SELECT RAISE(ABORT, 'books are merged, never deleted');
            END;
        "#,
        )?;

        Ok(())
    }

    // =========================================================================
    // Stats
    // =========================================================================

    pub fn get_stats(&self) -> Result<StoreStats> {
        let conn = self.conn()?;

        let total_books: i64 = conn.query_row(
            "SELECT COUNT(*) FROM books WHERE id NOT IN (SELECT from_id FROM book_redirects)",
            [],
            |row| row.get(0),
        )?;
        let total_redirects: i64 =
            conn.query_row("SELECT COUNT(*) FROM book_redirects", [], |row| row.get(0))?;
        let total_mentions: i64 =
            conn.query_row("SELECT COUNT(*) FROM mention_records", [], |row| row.get(0))?;
        let matched_mentions: i64 = conn.query_row(
            "SELECT COUNT(*) FROM mention_records WHERE book_id IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        drop(conn);

        let unresolved_mentions = self.unresolved_records()?.len() as i64;

        Ok(StoreStats {
            total_books,
            total_redirects,
            total_mentions,
            matched_mentions,
            unresolved_mentions,
        })
    }
}

/// Next hop in the merge graph, if `id` has been merged away.
fn next_redirect(conn: &Connection, id: i64) -> Result<Option<i64>> {
    let next = conn
        .query_row(
            "SELECT to_id FROM book_redirects WHERE from_id = ?",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(next)
}
