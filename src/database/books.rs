//! Canonical book store: insert, exact and token lookups, aliases, merges.
//!
//! Every read goes through [`resolve_redirect`](Database::resolve_redirect)
//! so callers always see the surviving book of a merge chain.

use super::{next_redirect, Book, Database, InsertOutcome, NewBook};
use crate::error::IntegrityError;
use crate::normalizer::{normalize_author, significant_tokens, title_keys};
use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;

impl Database {
    // =========================================================================
    // Redirects
    // =========================================================================

    /// Follow merge redirects from `id` to the surviving book.
    pub fn resolve_redirect(&self, id: i64) -> Result<i64> {
        let conn = self.conn()?;
        resolve_redirect_locked(&conn, id, self.max_redirect_hops)
    }

    /// Every book id whose redirect chain ends at `book_id`'s survivor,
    /// the survivor included.
    pub fn redirect_members(&self, book_id: i64) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let survivor = resolve_redirect_locked(&conn, book_id, self.max_redirect_hops)?;
        redirect_members_locked(&conn, survivor)
    }

    /// Record that `loser_id` and `survivor_id` are the same work.
    ///
    /// Nothing is rewritten: a redirect `loser -> survivor` is stored and
    /// reads follow it. Returns the book the merged pair now resolves to.
    pub fn merge_books(&self, loser_id: i64, survivor_id: i64) -> Result<i64> {
        if loser_id == survivor_id {
            return Err(IntegrityError::SelfMerge(loser_id).into());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        for id in [loser_id, survivor_id] {
            if !book_exists(&tx, id)? {
                return Err(anyhow!("Book {} not found", id));
            }
        }

        if let Some(target) = next_redirect(&tx, loser_id)? {
            return Err(IntegrityError::AlreadyRedirected {
                id: loser_id,
                target,
            }
            .into());
        }

        // The loser has no outgoing edge, so reaching it from the survivor
        // means the new edge would close a cycle.
        let terminal = resolve_redirect_locked(&tx, survivor_id, self.max_redirect_hops)?;
        if terminal == loser_id {
            log::error!(
                "Rejected merge {} -> {}: would create a redirect cycle",
                loser_id,
                survivor_id
            );
            return Err(IntegrityError::RedirectCycle {
                start: survivor_id,
                revisited: loser_id,
            }
            .into());
        }

        tx.execute(
            "INSERT INTO book_redirects (from_id, to_id) VALUES (?, ?)",
            params![loser_id, survivor_id],
        )?;

        // Reject merges that push any chain through the loser past the hop bound
        for member in redirect_members_locked(&tx, loser_id)? {
            resolve_redirect_locked(&tx, member, self.max_redirect_hops)?;
        }
        tx.commit()?;

        log::info!(
            "Merged book {} into {} (resolves to {})",
            loser_id,
            survivor_id,
            terminal
        );
        Ok(terminal)
    }

    // =========================================================================
    // Book queries
    // =========================================================================

    /// Book by id, read through redirects.
    pub fn get_book(&self, id: i64) -> Result<Option<Book>> {
        let conn = self.conn()?;
        if !book_exists(&conn, id)? {
            return Ok(None);
        }
        let survivor = resolve_redirect_locked(&conn, id, self.max_redirect_hops)?;
        load_book(&conn, survivor)
    }

    /// Book owning the normalized `key` as its title or an alias.
    pub fn lookup_exact(&self, key: &str) -> Result<Option<Book>> {
        let conn = self.conn()?;
        let owner: Option<i64> = conn
            .query_row(
                "SELECT book_id FROM book_keys WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        match owner {
            Some(id) => {
                let survivor = resolve_redirect_locked(&conn, id, self.max_redirect_hops)?;
                load_book(&conn, survivor)
            }
            None => Ok(None),
        }
    }

    /// Books whose keys contain `token`, deduplicated after redirects.
    pub fn lookup_candidates_by_token(&self, token: &str) -> Result<Vec<Book>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT book_id FROM book_tokens WHERE token = ? ORDER BY book_id")?;
        let ids = stmt
            .query_map(params![token], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = HashSet::new();
        let mut books = Vec::new();
        for id in ids {
            let survivor = resolve_redirect_locked(&conn, id, self.max_redirect_hops)?;
            if seen.insert(survivor) {
                if let Some(book) = load_book(&conn, survivor)? {
                    books.push(book);
                }
            }
        }
        Ok(books)
    }

    pub fn find_by_external_id(&self, external_id: &str) -> Result<Option<Book>> {
        self.find_by_column("external_id", external_id)
    }

    pub fn find_by_isbn(&self, isbn: &str) -> Result<Option<Book>> {
        self.find_by_column("isbn", isbn)
    }

    fn find_by_column(&self, column: &str, value: &str) -> Result<Option<Book>> {
        let conn = self.conn()?;
        let sql = format!("SELECT id FROM books WHERE {} = ? ORDER BY id LIMIT 1", column);
        let id: Option<i64> = conn
            .query_row(&sql, params![value], |row| row.get(0))
            .optional()?;
        match id {
            Some(id) => {
                let survivor = resolve_redirect_locked(&conn, id, self.max_redirect_hops)?;
                load_book(&conn, survivor)
            }
            None => Ok(None),
        }
    }

    /// Surviving (non-merged) books, ordered by id.
    pub fn list_books(&self) -> Result<Vec<Book>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM books WHERE id NOT IN (SELECT from_id FROM book_redirects) ORDER BY id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut books = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(book) = load_book(&conn, id)? {
                books.push(book);
            }
        }
        Ok(books)
    }

    /// Count of book rows, merged ones included.
    pub fn count_books(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM books", [], |row| row.get(0))?;
        Ok(count)
    }

    // =========================================================================
    // Book mutations
    // =========================================================================

    /// Compare-and-insert on the normalized title.
    ///
    /// If any book already owns the title's key (as title or alias) that
    /// book is returned as `Existing` and nothing is written.
    pub fn insert_book(&self, book: &NewBook) -> Result<InsertOutcome> {
        let (full_key, short_key) = title_keys(&book.title)
            .map_err(|_| anyhow!("Book title has no matchable text: {:?}", book.title))?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let owner: Option<i64> = tx
            .query_row(
                "SELECT book_id FROM book_keys WHERE key = ?",
                params![full_key],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = owner {
            let survivor = resolve_redirect_locked(&tx, id, self.max_redirect_hops)?;
            return Ok(InsertOutcome::Existing(survivor));
        }

        let now = chrono::Utc::now().to_rfc3339();
        let inserted = tx.execute(
            "INSERT INTO books (title, normalized_key, isbn, external_id, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(normalized_key) DO NOTHING",
            params![book.title, full_key, book.isbn, book.external_id, now],
        )?;
        if inserted == 0 {
            let id: i64 = tx.query_row(
                "SELECT id FROM books WHERE normalized_key = ?",
                params![full_key],
                |row| row.get(0),
            )?;
            let survivor = resolve_redirect_locked(&tx, id, self.max_redirect_hops)?;
            return Ok(InsertOutcome::Existing(survivor));
        }
        let id = tx.last_insert_rowid();

        for (position, author) in book.authors.iter().enumerate() {
            insert_author(&tx, id, author, position as i64)?;
        }
        register_key(&tx, id, &full_key, &book.title)?;
        register_key(&tx, id, &short_key, &book.title)?;

        tx.commit()?;
        log::info!("Created book {} {:?} (key {:?})", id, book.title, full_key);
        Ok(InsertOutcome::Created(id))
    }

    /// Register an alternate title. Keys already owned by another book are
    /// left alone. Returns true if any new key was added.
    pub fn add_alias(&self, book_id: i64, alternate_title: &str) -> Result<bool> {
        let (full_key, short_key) = title_keys(alternate_title)
            .map_err(|_| anyhow!("Alias has no matchable text: {:?}", alternate_title))?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let survivor = resolve_redirect_locked(&tx, book_id, self.max_redirect_hops)?;
        if !book_exists(&tx, survivor)? {
            return Err(anyhow!("Book {} not found", book_id));
        }

        let mut added = register_key(&tx, survivor, &full_key, alternate_title)?;
        added |= register_key(&tx, survivor, &short_key, alternate_title)?;
        tx.commit()?;

        if added {
            log::debug!("Added alias {:?} to book {}", alternate_title, survivor);
        }
        Ok(added)
    }

    /// Add an author discovered after creation. Returns true if new.
    pub fn add_author(&self, book_id: i64, name: &str) -> Result<bool> {
        let conn = self.conn()?;
        let survivor = resolve_redirect_locked(&conn, book_id, self.max_redirect_hops)?;
        if !book_exists(&conn, survivor)? {
            return Err(anyhow!("Book {} not found", book_id));
        }

        let wanted = normalize_author(name);
        let existing = load_authors(&conn, survivor)?;
        if existing.iter().any(|a| normalize_author(a) == wanted) {
            return Ok(false);
        }
        insert_author(&conn, survivor, name, existing.len() as i64)
    }
}

// =============================================================================
// Connection-level helpers (callers hold the connection lock)
// =============================================================================

pub(super) fn resolve_redirect_locked(conn: &Connection, id: i64, max_hops: usize) -> Result<i64> {
    let mut current = id;
    let mut visited = HashSet::from([id]);

    for _ in 0..max_hops {
        match next_redirect(conn, current)? {
            None => return Ok(current),
            Some(next) => {
                if !visited.insert(next) {
                    log::error!("Redirect cycle from book {} at book {}", id, next);
                    return Err(IntegrityError::RedirectCycle {
                        start: id,
                        revisited: next,
                    }
                    .into());
                }
                current = next;
            }
        }
    }

    match next_redirect(conn, current)? {
        None => Ok(current),
        Some(_) => {
            log::error!("Redirect chain from book {} exceeds {} hops", id, max_hops);
            Err(IntegrityError::RedirectChainTooLong {
                start: id,
                max_hops,
            }
            .into())
        }
    }
}

pub(super) fn redirect_members_locked(conn: &Connection, survivor: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "WITH RECURSIVE members(id) AS (
             SELECT ?1
             UNION
             SELECT r.from_id FROM book_redirects r JOIN members m ON r.to_id = m.id
         )
         SELECT id FROM members ORDER BY id",
    )?;
    let ids = stmt
        .query_map(params![survivor], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(ids)
}

fn book_exists(conn: &Connection, id: i64) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT id FROM books WHERE id = ?", params![id], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

fn load_book(conn: &Connection, id: i64) -> Result<Option<Book>> {
    let row = conn
        .query_row(
            "SELECT id, title, normalized_key, isbn, external_id, created_at
             FROM books WHERE id = ?",
            params![id],
            |row| {
                Ok(Book {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    normalized_key: row.get(2)?,
                    isbn: row.get(3)?,
                    external_id: row.get(4)?,
                    created_at: row.get(5)?,
                    authors: Vec::new(),
                    keys: Vec::new(),
                })
            },
        )
        .optional()?;

    let Some(mut book) = row else {
        return Ok(None);
    };
    book.authors = load_authors(conn, id)?;

    // Merged-away books still own their keys; the survivor's come first.
    let mut members = redirect_members_locked(conn, id)?;
    members.retain(|member| *member != id);
    members.insert(0, id);

    let mut stmt = conn.prepare("SELECT key FROM book_keys WHERE book_id = ? ORDER BY rowid")?;
    for member in members {
        let keys = stmt
            .query_map(params![member], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<String>, _>>()?;
        for key in keys {
            if !book.keys.contains(&key) {
                book.keys.push(key);
            }
        }
    }

    Ok(Some(book))
}

fn load_authors(conn: &Connection, book_id: i64) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT name FROM book_authors WHERE book_id = ? ORDER BY position, rowid")?;
    let authors = stmt
        .query_map(params![book_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(authors)
}

fn insert_author(conn: &Connection, book_id: i64, name: &str, position: i64) -> Result<bool> {
    let name = name.trim();
    if name.is_empty() {
        return Ok(false);
    }
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO book_authors (book_id, name, position) VALUES (?, ?, ?)",
        params![book_id, name, position],
    )?;
    Ok(inserted > 0)
}

/// Claim `key` for `book_id` and index its tokens. First claimant wins.
fn register_key(conn: &Connection, book_id: i64, key: &str, alias_title: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO book_keys (key, book_id, alias_title) VALUES (?, ?, ?)",
        params![key, book_id, alias_title],
    )?;
    if inserted == 0 {
        return Ok(false);
    }

    for token in significant_tokens(key) {
        conn.execute(
            "INSERT OR IGNORE INTO book_tokens (token, book_id) VALUES (?, ?)",
            params![token, book_id],
        )?;
    }
    Ok(true)
}
