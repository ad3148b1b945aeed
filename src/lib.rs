pub mod commands;
pub mod config;
pub mod database;
pub mod error;
pub mod lookup;
pub mod normalizer;
pub mod resolver;
pub mod worker;
pub mod xref;

pub use commands::AppContext;
pub use config::AppConfig;
pub use database::Database;
pub use error::AppError;
pub use resolver::{FuzzyResolver, Resolution};
pub use worker::ResolutionWorker;
pub use xref::CrossReferenceIndex;

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber. `RUST_LOG` wins over `default_filter`.
///
/// `log::` records from this crate and its dependencies are forwarded into
/// the same subscriber.
pub fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
    if let Err(e) = result {
        eprintln!("Logging already initialized: {}", e);
    }
}
