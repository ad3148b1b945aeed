use super::AppContext;
use crate::database::{Book, EpisodeRef};
use crate::error::AppError;
use crate::lookup::ExternalBook;
use crate::normalizer::normalize_candidate;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct BookDetails {
    pub book: Book,
    /// Ids merged into this book
    pub merged_ids: Vec<i64>,
    pub mention_count: i64,
    pub episodes: Vec<EpisodeRef>,
}

#[derive(Debug, Serialize)]
pub struct MergeResult {
    pub loser_id: i64,
    pub survivor_id: i64,
    /// Book both ids now resolve to
    pub resolved_id: i64,
}

pub fn list_books(ctx: &AppContext) -> Result<Vec<Book>, AppError> {
    ctx.db.list_books().map_err(AppError::from)
}

pub async fn get_book(ctx: &AppContext, book_id: i64) -> Result<BookDetails, AppError> {
    let book = ctx
        .db
        .get_book(book_id)?
        .ok_or_else(|| AppError::NotFound(format!("book {}", book_id)))?;

    let merged_ids = ctx
        .db
        .redirect_members(book.id)?
        .into_iter()
        .filter(|id| *id != book.id)
        .collect();
    let mention_count = ctx.db.mention_count_for_book(book.id)?;
    let index = ctx.worker.index();
    let episodes = index.read().await.mentions_of(book.id, &ctx.db)?;

    Ok(BookDetails {
        book,
        merged_ids,
        mention_count,
        episodes,
    })
}

/// Declare two books the same work. Mentions of `loser_id` follow the
/// redirect; nothing already recorded changes.
pub fn merge_books(ctx: &AppContext, loser_id: i64, survivor_id: i64) -> Result<MergeResult, AppError> {
    let resolved_id = ctx.db.merge_books(loser_id, survivor_id).map_err(|e| {
        let e = AppError::from(e);
        if matches!(e, AppError::Integrity(_)) {
            log::error!("Merge {} -> {} rejected: {}", loser_id, survivor_id, e);
        }
        e
    })?;

    Ok(MergeResult {
        loser_id,
        survivor_id,
        resolved_id,
    })
}

pub fn add_alias(ctx: &AppContext, book_id: i64, title: &str) -> Result<Book, AppError> {
    ctx.db.add_alias(book_id, title)?;
    ctx.db
        .get_book(book_id)?
        .ok_or_else(|| AppError::NotFound(format!("book {}", book_id)))
}

/// Ask the external catalogue directly, without touching the store.
pub async fn lookup_title(ctx: &AppContext, raw: &str) -> Result<Option<ExternalBook>, AppError> {
    let candidate = normalize_candidate(raw, None).map_err(|e| AppError::Other(e.to_string()))?;
    ctx.lookup
        .lookup(&candidate.title, candidate.author_hint.as_deref())
        .await
        .map_err(|e| AppError::Other(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::setup_context;
    use crate::database::NewBook;
    use crate::error::IntegrityError;
    use crate::lookup::NoopLookup;
    use std::sync::Arc;

    fn add_book(ctx: &AppContext, title: &str) -> i64 {
        ctx.db
            .insert_book(&NewBook {
                title: title.to_string(),
                ..NewBook::default()
            })
            .unwrap()
            .id()
    }

    #[tokio::test]
    async fn test_merge_and_details() {
        let (ctx, _temp) = setup_context(Arc::new(NoopLookup)).await;
        let a = add_book(&ctx, "Sapiens");
        let b = add_book(&ctx, "Sapiens A Brief History");

        let merged = merge_books(&ctx, b, a).unwrap();
        assert_eq!(merged.resolved_id, a);

        let details = get_book(&ctx, b).await.unwrap();
        assert_eq!(details.book.id, a);
        assert_eq!(details.merged_ids, vec![b]);

        let err = merge_books(&ctx, a, b).unwrap_err();
        assert!(matches!(err, AppError::Integrity(IntegrityError::RedirectCycle { .. })));
        assert_eq!(list_books(&ctx).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_book() {
        let (ctx, _temp) = setup_context(Arc::new(NoopLookup)).await;
        assert!(matches!(get_book(&ctx, 42).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_add_alias() {
        let (ctx, _temp) = setup_context(Arc::new(NoopLookup)).await;
        let id = add_book(&ctx, "Nineteen Eighty-Four");
        let book = add_alias(&ctx, id, "1984").unwrap();
        assert!(book.keys.contains(&"1984".to_string()));
    }

    #[tokio::test]
    async fn test_lookup_rejects_empty_title() {
        let (ctx, _temp) = setup_context(Arc::new(NoopLookup)).await;
        assert!(lookup_title(&ctx, "  ").await.is_err());
        assert_eq!(lookup_title(&ctx, "Dune").await.unwrap(), None);
    }
}
