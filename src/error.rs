use std::time::Duration;
use thiserror::Error;

/// Typed application error hierarchy for the command surface.
///
/// Serializes as a plain string so CLI JSON output carries the same
/// `"error message"` text that is logged, while Rust code still gets
/// typed variants that can be matched or propagated with `?`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Json(String),

    #[error("{0}")]
    Other(String),
}

/// Corrupted or contradictory merge state in the redirect graph.
///
/// Halts the read path that hit it; never resolved silently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("Redirect cycle detected starting at book {start} (revisited book {revisited})")]
    RedirectCycle { start: i64, revisited: i64 },

    #[error("Redirect chain from book {start} exceeds {max_hops} hops")]
    RedirectChainTooLong { start: i64, max_hops: usize },

    #[error("Cannot merge book {0} into itself")]
    SelfMerge(i64),

    #[error("Book {id} is already redirected to book {target}")]
    AlreadyRedirected { id: i64, target: i64 },
}

/// Failure of the external metadata collaborator. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("Metadata lookup timed out after {0:?}")]
    Timeout(Duration),

    #[error("Metadata lookup unavailable: {0}")]
    Unavailable(String),
}

/// Raw mention text had nothing to match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Empty mention candidate")]
pub struct EmptyCandidate;

impl serde::Serialize for AppError {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

// ── From impls ─────────────────────────────────────────────────────────────

/// Database functions return `anyhow::Result`; integrity failures travel
/// inside as `IntegrityError` and are recovered here by downcast.
impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<IntegrityError>() {
            Ok(integrity) => AppError::Integrity(integrity),
            Err(e) => AppError::Database(e.to_string()),
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Json(e.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(e: serde_yaml::Error) -> Self {
        AppError::Config(e.to_string())
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Other(s)
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        AppError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_error_survives_anyhow_round_trip() {
        let err: anyhow::Error = IntegrityError::SelfMerge(7).into();
        let app: AppError = err.into();
        assert!(matches!(app, AppError::Integrity(IntegrityError::SelfMerge(7))));
    }

    #[test]
    fn test_other_anyhow_errors_become_database_errors() {
        let app: AppError = anyhow::anyhow!("disk full").into();
        assert!(matches!(app, AppError::Database(ref m) if m == "disk full"));
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let json = serde_json::to_string(&AppError::NotFound("book 3".into())).unwrap();
        assert_eq!(json, "\"Not found: book 3\"");
    }
}
