//! External metadata lookup
//!
//! The resolver's last resort on a miss. Lookups are unreliable by nature:
//! callers bound them with a timeout and treat every failure as "not found,
//! try again later".

use crate::config::LookupConfig;
use crate::database::NewBook;
use crate::error::LookupError;
use crate::normalizer::title_keys;
use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{direct::NotKeyed, InMemoryState},
    Quota, RateLimiter,
};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Minimum title similarity before a search hit is believed.
const MIN_TITLE_SIMILARITY: f64 = 0.8;

/// Canonical record returned by an external catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalBook {
    pub title: String,
    pub authors: Vec<String>,
    pub isbn: Option<String>,
    pub external_id: Option<String>,
}

impl From<ExternalBook> for NewBook {
    fn from(book: ExternalBook) -> Self {
        NewBook {
            title: book.title,
            authors: book.authors,
            isbn: book.isbn,
            external_id: book.external_id,
        }
    }
}

/// Catalogue the resolver consults when the store has no answer.
#[async_trait]
pub trait MetadataLookup: Send + Sync {
    /// Zero or one canonical record for `title`.
    async fn lookup(
        &self,
        title: &str,
        author: Option<&str>,
    ) -> Result<Option<ExternalBook>, LookupError>;
}

/// Lookup used when external lookups are disabled.
pub struct NoopLookup;

#[async_trait]
impl MetadataLookup for NoopLookup {
    async fn lookup(
        &self,
        _title: &str,
        _author: Option<&str>,
    ) -> Result<Option<ExternalBook>, LookupError> {
        Ok(None)
    }
}

/// Open Library search API client
pub struct OpenLibraryClient {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
    timeout: Duration,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl OpenLibraryClient {
    pub fn new(config: &LookupConfig) -> Self {
        let timeout = config.timeout();
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
            timeout,
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        }
    }

    async fn search(&self, title: &str, author: Option<&str>) -> Result<SearchResponse, LookupError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/search.json", self.base_url);
        let mut query = vec![
            ("title", title),
            ("limit", "5"),
            ("fields", "key,title,subtitle,author_name,isbn"),
        ];
        if let Some(author) = author {
            query.push(("author", author));
        }

        log::debug!("Open Library search: title={:?} author={:?}", title, author);

        let response = self
            .client
            .get(&url)
            .header("User-Agent", &self.user_agent)
            .query(&query)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        if !response.status().is_success() {
            return Err(LookupError::Unavailable(format!(
                "Open Library returned {}",
                response.status()
            )));
        }

        response
            .json::<SearchResponse>()
            .await
            .map_err(|e| self.classify(e))
    }

    fn classify(&self, e: reqwest::Error) -> LookupError {
        if e.is_timeout() {
            LookupError::Timeout(self.timeout)
        } else {
            LookupError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
impl MetadataLookup for OpenLibraryClient {
    async fn lookup(
        &self,
        title: &str,
        author: Option<&str>,
    ) -> Result<Option<ExternalBook>, LookupError> {
        let response = self.search(title, author).await?;
        let found = pick_doc(title, response.docs);

        match &found {
            Some(book) => log::info!(
                "Open Library matched {:?} -> {:?} ({:?})",
                title,
                book.title,
                book.external_id
            ),
            None => log::info!("Open Library has no confident match for {:?}", title),
        }
        Ok(found)
    }
}

/// First search hit whose title plausibly is `query`.
fn pick_doc(query: &str, docs: Vec<SearchDoc>) -> Option<ExternalBook> {
    let (query_full, query_short) = title_keys(query).ok()?;

    docs.into_iter().find_map(|doc| {
        let title = match doc.subtitle.as_deref().map(str::trim) {
            Some(subtitle) if !subtitle.is_empty() => format!("{}: {}", doc.title.trim(), subtitle),
            _ => doc.title.trim().to_string(),
        };
        let (doc_full, doc_short) = title_keys(&title).ok()?;

        let plausible = doc_short == query_short
            || doc_full == query_full
            || strsim::normalized_levenshtein(&doc_short, &query_short) >= MIN_TITLE_SIMILARITY;
        if !plausible {
            return None;
        }

        let isbn = doc
            .isbn
            .iter()
            .find(|isbn| isbn.len() == 13)
            .or_else(|| doc.isbn.first())
            .cloned();
        let external_id = doc
            .key
            .as_deref()
            .map(|key| key.trim_start_matches("/works/").to_string())
            .filter(|key| !key.is_empty());

        Some(ExternalBook {
            title,
            authors: doc.author_name,
            isbn,
            external_id,
        })
    })
}

/// Build the configured lookup.
pub fn from_config(config: &LookupConfig) -> Arc<dyn MetadataLookup> {
    if config.enabled {
        Arc::new(OpenLibraryClient::new(config))
    } else {
        log::info!("External metadata lookup disabled");
        Arc::new(NoopLookup)
    }
}


// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    docs: Vec<SearchDoc>,
}

#[derive(Debug, Deserialize)]
struct SearchDoc {
    #[serde(default)]
    key: Option<String>,
    title: String,
    #[serde(default)]
    subtitle: Option<String>,
    #[serde(default)]
    author_name: Vec<String>,
    #[serde(default)]
    isbn: Vec<String>,
}
