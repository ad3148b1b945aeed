use super::AppContext;
use crate::database::EpisodeRef;
use crate::error::AppError;
use crate::xref::CrossPodcastBook;

/// Episodes that mention `book_id`, merged books included.
pub async fn book_mentions(ctx: &AppContext, book_id: i64) -> Result<Vec<EpisodeRef>, AppError> {
    if ctx.db.get_book(book_id)?.is_none() {
        return Err(AppError::NotFound(format!("book {}", book_id)));
    }
    let index = ctx.worker.index();
    let mentions = index.read().await.mentions_of(book_id, &ctx.db)?;
    Ok(mentions)
}

/// Books discussed on at least `min_podcasts` different podcasts.
pub async fn cross_podcast(ctx: &AppContext, min_podcasts: usize) -> Result<Vec<CrossPodcastBook>, AppError> {
    let index = ctx.worker.index();
    let books = index.read().await.cross_podcast_books(min_podcasts, &ctx.db)?;
    Ok(books)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::setup_context;
    use crate::commands::worker::ingest;
    use crate::lookup::fake::FakeLookup;
    use std::io::Cursor;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_cross_podcast_after_ingest() {
        let lookup = Arc::new(
            FakeLookup::new()
                .with_book("Dune", "Dune", &["Frank Herbert"], "OL893415W")
                .with_book("Emma", "Emma", &["Jane Austen"], "OL66554W"),
        );
        let (ctx, _temp) = setup_context(lookup).await;

        let input = r#"{"raw_text": "Dune", "podcast_id": "p1", "episode_id": "e1"}
{"raw_text": "Dune by Frank Herbert", "podcast_id": "p2", "episode_id": "e7"}
{"raw_text": "Emma", "podcast_id": "p1", "episode_id": "e2"}
"#;
        ingest(&ctx, Cursor::new(input), &CancellationToken::new())
            .await
            .unwrap();

        let books = cross_podcast(&ctx, 2).await.unwrap();
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].podcasts, vec!["p1", "p2"]);

        let dune = books[0].book_id;
        assert_eq!(book_mentions(&ctx, dune).await.unwrap().len(), 2);
        assert!(matches!(book_mentions(&ctx, 999).await, Err(AppError::NotFound(_))));
    }
}
