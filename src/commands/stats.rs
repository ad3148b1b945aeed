use super::AppContext;
use crate::database::{MentionRecord, StoreStats};
use crate::error::AppError;

pub fn get_stats(ctx: &AppContext) -> Result<StoreStats, AppError> {
    ctx.db.get_stats().map_err(AppError::from)
}

/// Mentions still waiting for a book, oldest first.
pub fn list_unresolved(ctx: &AppContext, limit: Option<usize>) -> Result<Vec<MentionRecord>, AppError> {
    let mut records = ctx.db.unresolved_records()?;
    if let Some(limit) = limit {
        records.truncate(limit);
    }
    Ok(records)
}

/// Ledger history for one episode, in append order.
pub fn episode_history(ctx: &AppContext, episode_id: &str) -> Result<Vec<MentionRecord>, AppError> {
    ctx.db.records_for_episode(episode_id).map_err(AppError::from)
}
