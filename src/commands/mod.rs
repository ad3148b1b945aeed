//! Command surface for the `book-resolver` binary.
//!
//! Each command takes the shared [`AppContext`] and returns a serializable
//! value or an [`AppError`](crate::error::AppError); `main` prints either as
//! JSON.

pub mod books;
pub mod stats;
pub mod worker;
pub mod xref;

use crate::config::AppConfig;
use crate::database::Database;
use crate::error::AppError;
use crate::lookup::{self, MetadataLookup};
use crate::resolver::FuzzyResolver;
use crate::worker::ResolutionWorker;
use crate::xref::CrossReferenceIndex;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Everything a command needs, wired once at startup.
pub struct AppContext {
    pub config: AppConfig,
    pub db: Arc<Database>,
    pub lookup: Arc<dyn MetadataLookup>,
    pub worker: ResolutionWorker,
}

impl AppContext {
    /// Open the store, build the resolver and worker, and load the index.
    pub async fn from_config(config: AppConfig) -> Result<Self, AppError> {
        let lookup = lookup::from_config(&config.lookup);
        Self::with_lookup(config, lookup).await
    }

    pub async fn with_lookup(config: AppConfig, lookup: Arc<dyn MetadataLookup>) -> Result<Self, AppError> {
        if let Some(parent) = config.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::new(&config.database_path)?
            .with_max_redirect_hops(config.resolver.max_redirect_hops);
        let db = Arc::new(db);
        log::info!("Opened book store at {}", config.database_path.display());

        let resolver = FuzzyResolver::new(
            db.clone(),
            lookup.clone(),
            config.resolver.clone(),
            config.lookup.timeout(),
        );
        let worker = ResolutionWorker::new(
            db.clone(),
            Arc::new(resolver),
            Arc::new(RwLock::new(CrossReferenceIndex::new())),
            config.worker.max_concurrent_jobs,
        );
        worker.rebuild_index().await?;

        Ok(Self {
            config,
            db,
            lookup,
            worker,
        })
    }
}
