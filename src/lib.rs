//! # hn-dl
//!
//! Bulk downloader for the Hacker News item API into SQLite.
//!
//! Items are fetched by numeric ID from `<base>/item/<id>.json`, highest ID first,
//! in fixed-size batches. Inside a batch up to `num_workers` fetch+write tasks run
//! at once; a batch is finished (and committed) before the next one is scheduled.
//! Every item becomes one `items` row plus one `kids` row per child reference.
//!
//! ## Quick Start
//!
//! ```no_run
//! use hn_dl::{Config, Event, Ingester};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.run.start_id = Some(8900);
//!     config.run.end_id = 8863;
//!
//!     let ingester = Ingester::new(config).await?;
//!
//!     let mut events = ingester.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             if let Event::BatchCompleted { high, low } = event {
//!                 println!("batch {high}..{low} done");
//!             }
//!         }
//!     });
//!
//!     let summary = ingester.run().await?;
//!     println!("inserted {} items", summary.inserted);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Upstream item retrieval
pub mod fetcher;
/// Batch coordinator
pub mod ingest;
/// Concurrency limiting
pub mod limiter;
/// Core types and events
pub mod types;
/// Single-writer persistence
pub mod writer;

// Re-export commonly used types
pub use config::{ApiConfig, CommitStrategy, Config, PersistenceConfig, RunConfig};
pub use db::Database;
pub use error::{DatabaseError, Error, FetchError, Result, WriteError};
pub use fetcher::{HttpItemFetcher, ItemSource};
pub use ingest::{Batch, BatchPlan, Ingester};
pub use limiter::ConcurrencyLimiter;
pub use types::{ChildRef, Event, Item, ItemId, ItemType, RunSummary, StoredItem};
pub use writer::{ItemWriter, WriteOutcome};

/// Which kind of run [`run_with_shutdown`] drives
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunMode {
    /// Every ID from the start ID down to the end ID
    #[default]
    Range,
    /// Only IDs missing from the store
    FillGaps,
}

/// Run the ingester with graceful signal handling.
///
/// A termination signal cancels the run at the next batch boundary: the batch in
/// flight is finished and committed, then the summary is returned with
/// `cancelled` set.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use hn_dl::{Config, Ingester, RunMode, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let ingester = Ingester::new(Config::default()).await?;
///     let summary = run_with_shutdown(ingester, RunMode::Range).await?;
///     println!("{} batches", summary.batches);
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(ingester: Ingester, mode: RunMode) -> Result<RunSummary> {
    let cancel_token = ingester.cancel_token();

    let run = async {
        match mode {
            RunMode::Range => ingester.run().await,
            RunMode::FillGaps => ingester.run_fill_gaps().await,
        }
    };
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result,
        _ = wait_for_signal() => {
            tracing::info!("Finishing the current batch before stopping");
            cancel_token.cancel();
            run.await
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    }
}
