use serde::{Deserialize, Serialize};

/// Terminal outcome of resolving one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MentionOutcome {
    Matched,
    Unmatched,
    /// Unmatched because the external lookup failed; eligible for retry
    LookupFailed,
}

impl Default for MentionOutcome {
    fn default() -> Self {
        Self::Unmatched
    }
}

impl std::fmt::Display for MentionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Matched => write!(f, "matched"),
            Self::Unmatched => write!(f, "unmatched"),
            Self::LookupFailed => write!(f, "lookup_failed"),
        }
    }
}

impl MentionOutcome {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "matched" => Some(Self::Matched),
            "unmatched" => Some(Self::Unmatched),
            "lookup_failed" => Some(Self::LookupFailed),
            _ => None,
        }
    }
}

/// Which resolver step produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Exact,
    ShortKey,
    Fuzzy,
    AuthorBoost,
    External,
}

impl std::fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::ShortKey => write!(f, "short_key"),
            Self::Fuzzy => write!(f, "fuzzy"),
            Self::AuthorBoost => write!(f, "author_boost"),
            Self::External => write!(f, "external"),
        }
    }
}

impl MatchMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exact" => Some(Self::Exact),
            "short_key" => Some(Self::ShortKey),
            "fuzzy" => Some(Self::Fuzzy),
            "author_boost" => Some(Self::AuthorBoost),
            "external" => Some(Self::External),
            _ => None,
        }
    }
}

/// Canonical book record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub title: String,
    /// Derived from `title` at insert time
    pub normalized_key: String,
    pub authors: Vec<String>,
    pub isbn: Option<String>,
    pub external_id: Option<String>,
    /// Every key that resolves to this book, including `normalized_key`
    pub keys: Vec<String>,
    pub created_at: String,
}

/// Input for creating a canonical book.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewBook {
    pub title: String,
    pub authors: Vec<String>,
    pub isbn: Option<String>,
    pub external_id: Option<String>,
}

/// Result of a compare-and-insert on the normalized title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created(i64),
    /// Another writer already owns the normalized title
    Existing(i64),
}

impl InsertOutcome {
    pub fn id(&self) -> i64 {
        match self {
            Self::Created(id) | Self::Existing(id) => *id,
        }
    }
}

/// Raw mention produced by the extraction step. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionCandidate {
    pub raw_text: String,
    pub podcast_id: String,
    pub episode_id: String,
    /// Seconds from the start of the episode
    #[serde(default)]
    pub timestamp_offset: f64,
    #[serde(default)]
    pub context: Option<String>,
}

/// Durable ledger row. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionRecord {
    /// Ledger sequence number
    pub id: i64,
    pub podcast_id: String,
    pub episode_id: String,
    pub timestamp_offset: f64,
    pub raw_text: String,
    pub context: Option<String>,
    /// As recorded; read through redirects to find the current book
    pub book_id: Option<i64>,
    pub confidence: f64,
    pub outcome: MentionOutcome,
    pub match_method: Option<MatchMethod>,
    pub resolved_at: String,
    pub resolver_version: String,
    pub run_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMentionRecord {
    pub podcast_id: String,
    pub episode_id: String,
    pub timestamp_offset: f64,
    pub raw_text: String,
    pub context: Option<String>,
    pub book_id: Option<i64>,
    pub confidence: f64,
    pub outcome: MentionOutcome,
    pub match_method: Option<MatchMethod>,
    pub resolver_version: String,
    pub run_id: String,
}

impl NewMentionRecord {
    /// Ledger entry for `candidate` with no book attached yet.
    pub fn for_candidate(candidate: &MentionCandidate, resolver_version: &str, run_id: &str) -> Self {
        Self {
            podcast_id: candidate.podcast_id.clone(),
            episode_id: candidate.episode_id.clone(),
            timestamp_offset: candidate.timestamp_offset,
            raw_text: candidate.raw_text.clone(),
            context: candidate.context.clone(),
            book_id: None,
            confidence: 0.0,
            outcome: MentionOutcome::Unmatched,
            match_method: None,
            resolver_version: resolver_version.to_string(),
            run_id: run_id.to_string(),
        }
    }
}

impl MentionRecord {
    /// Rebuild the candidate that produced this record, for re-resolution.
    pub fn to_candidate(&self) -> MentionCandidate {
        MentionCandidate {
            raw_text: self.raw_text.clone(),
            podcast_id: self.podcast_id.clone(),
            episode_id: self.episode_id.clone(),
            timestamp_offset: self.timestamp_offset,
            context: self.context.clone(),
        }
    }
}

/// One (podcast, episode) pair in the cross-reference index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EpisodeRef {
    pub podcast_id: String,
    pub episode_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_books: i64,
    pub total_redirects: i64,
    pub total_mentions: i64,
    pub matched_mentions: i64,
    pub unresolved_mentions: i64,
}
