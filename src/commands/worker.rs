use super::AppContext;
use crate::database::MentionCandidate;
use crate::error::AppError;
use crate::worker::{BatchSummary, WorkerState};
use serde::Serialize;
use std::io::BufRead;
use tokio_util::sync::CancellationToken;

/// A JSON line that could not be read as a candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedLine {
    pub line: usize,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct IngestReport {
    pub rejected: Vec<RejectedLine>,
    pub summary: BatchSummary,
    pub worker: WorkerState,
}

/// Read mention candidates from JSON lines. Blank lines are ignored;
/// malformed ones are reported and skipped.
pub fn parse_candidates<R: BufRead>(reader: R) -> Result<(Vec<MentionCandidate>, Vec<RejectedLine>), AppError> {
    let mut candidates = Vec::new();
    let mut rejected = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<MentionCandidate>(trimmed) {
            Ok(candidate) => candidates.push(candidate),
            Err(e) => {
                log::warn!("Skipping malformed candidate on line {}: {}", index + 1, e);
                rejected.push(RejectedLine {
                    line: index + 1,
                    error: e.to_string(),
                });
            }
        }
    }

    Ok((candidates, rejected))
}

/// Resolve a JSON-lines stream of candidates and record every outcome.
pub async fn ingest<R: BufRead>(
    ctx: &AppContext,
    reader: R,
    cancel: &CancellationToken,
) -> Result<IngestReport, AppError> {
    let (candidates, rejected) = parse_candidates(reader)?;
    let summary = ctx.worker.run_batch(candidates, cancel).await;
    Ok(IngestReport {
        rejected,
        summary,
        worker: ctx.worker.state().await,
    })
}

/// Retry every mention that still has no book.
pub async fn reprocess(ctx: &AppContext, cancel: &CancellationToken) -> Result<BatchSummary, AppError> {
    ctx.worker.reprocess_unresolved(cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::setup_context;
    use crate::lookup::fake::FakeLookup;
    use std::io::Cursor;
    use std::sync::Arc;

    #[test]
    fn test_parse_candidates_reports_bad_lines() {
        let input = r#"{"raw_text": "Dune", "podcast_id": "p1", "episode_id": "e1", "timestamp_offset": 61.0}

{"raw_text": "Emma", "podcast_id": "p1"}
not json
{"raw_text": "Emma", "podcast_id": "p1", "episode_id": "e2", "context": "a novel by Jane Austen"}
"#;
        let (candidates, rejected) = parse_candidates(Cursor::new(input)).unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].timestamp_offset, 61.0);
        assert_eq!(candidates[1].timestamp_offset, 0.0);
        assert_eq!(candidates[1].context.as_deref(), Some("a novel by Jane Austen"));
        let lines: Vec<usize> = rejected.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_ingest_then_reprocess() {
        let lookup = Arc::new(FakeLookup::new().with_book("Dune", "Dune", &["Frank Herbert"], "OL893415W"));
        let (ctx, _temp) = setup_context(lookup).await;

        let input = r#"{"raw_text": "Dune", "podcast_id": "p1", "episode_id": "e1"}
{"raw_text": "Xyzzyxoblivion", "podcast_id": "p1", "episode_id": "e1"}
"#;
        let report = ingest(&ctx, Cursor::new(input), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.summary.matched, 1);
        assert_eq!(report.summary.unmatched, 1);
        assert_eq!(report.worker.processed, 2);

        let again = reprocess(&ctx, &CancellationToken::new()).await.unwrap();
        assert_eq!(again.total, 1);
        assert_eq!(again.unmatched, 1);
        assert_eq!(ctx.db.all_mention_records().unwrap().len(), 3);
    }
}
