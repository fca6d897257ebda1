//! Batch coordinator.
//!
//! A run walks a [`BatchPlan`] from the highest ID down. Every ID of a batch gets
//! its own fetch+write task on a [`JoinSet`]; tasks are admitted through the
//! shared [`ConcurrencyLimiter`], so batch size and worker count are independent.
//! The next batch is not scheduled until the current set is drained and, under
//! [`CommitStrategy::PerBatch`](crate::config::CommitStrategy::PerBatch), its
//! transaction committed.
//!
//! Per-item failures are logged and counted, never propagated: a run only
//! returns `Err` when it cannot start (no start ID, unreadable store).

mod batches;


pub use batches::{Batch, BatchPlan, Batches};

use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::fetcher::{HttpItemFetcher, ItemSource};
use crate::limiter::ConcurrencyLimiter;
use crate::types::{Event, ItemId, RunSummary};
use crate::writer::ItemWriter;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Drives runs over the upstream API into the store (cloneable, all fields are shared)
#[derive(Clone)]
pub struct Ingester {
    /// Store the run writes into (public so callers can inspect results)
    pub db: Arc<Database>,
    source: Arc<dyn ItemSource>,
    writer: Arc<ItemWriter>,
    limiter: ConcurrencyLimiter,
    event_tx: broadcast::Sender<Event>,
    config: Arc<Config>,
    cancel_token: CancellationToken,
}

/// Outcome counters of one batch, updated by its tasks
#[derive(Default)]
struct BatchTally {
    inserted: AtomicU64,
    already_present: AtomicU64,
    fetch_failed: AtomicU64,
    missing: AtomicU64,
    write_failed: AtomicU64,
}

/// Everything one fetch+write task needs, moved into the task
struct ItemTask {
    id: ItemId,
    source: Arc<dyn ItemSource>,
    writer: Arc<ItemWriter>,
    event_tx: broadcast::Sender<Event>,
    tally: Arc<BatchTally>,
}

impl Ingester {
    /// Create an ingester talking to the configured HTTP API
    ///
    /// Validates `config`, opens (and bootstraps) the database and checks out the
    /// writer connection.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let db = Database::open(&config.persistence).await?;
        let source = HttpItemFetcher::new(&config.api, config.run.num_workers)?;

        Self::with_source(config, Arc::new(db), Arc::new(source)).await
    }

    /// Create an ingester over an already opened store and any [`ItemSource`]
    pub async fn with_source(
        config: Config,
        db: Arc<Database>,
        source: Arc<dyn ItemSource>,
    ) -> Result<Self> {
        config.validate()?;

        let writer = ItemWriter::new(&db, config.run.commit_strategy).await?;
        let limiter = ConcurrencyLimiter::new(config.run.num_workers);

        // Buffer of 1000 events; slow subscribers get RecvError::Lagged
        let (event_tx, _rx) = broadcast::channel(1000);

        Ok(Self {
            db,
            source,
            writer: Arc::new(writer),
            limiter,
            event_tx,
            config: Arc::new(config),
            cancel_token: CancellationToken::new(),
        })
    }

    /// Subscribe to run events
    ///
    /// Every subscriber receives all events. One [`Event::ItemCompleted`] is sent
    /// per finished task, so a subscriber counting them tracks progress.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Token that stops the run at the next batch boundary when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Request a stop at the next batch boundary
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Configuration this ingester was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The concurrency limiter shared by this ingester's tasks
    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Fetch every ID from the start ID down to `end_id` (inclusive)
    ///
    /// Without a configured start ID the run begins at the upstream's current
    /// maximum item.
    pub async fn run(&self) -> Result<RunSummary> {
        let start = match self.config.run.start_id {
            Some(id) => ItemId(id),
            None => {
                let max = self.source.max_item().await?;
                tracing::info!(max_item = %max, "Resolved start ID from upstream");
                max
            }
        };
        let end = ItemId(self.config.run.end_id);

        if start < end {
            return Err(Error::config(
                "run.start_id",
                format!("start ID {} is below end ID {}", start, end),
            ));
        }

        let plan = BatchPlan::descending(start, end, self.config.run.batch_size);

        tracing::info!(
            start_id = %start,
            end_id = %end,
            batch_size = plan.batch_size(),
            num_workers = self.limiter.capacity(),
            commit_strategy = ?self.writer.strategy(),
            "Starting fetch"
        );

        self.run_plan(&plan).await
    }

    /// Fetch only the IDs in `[end_id, ceiling]` that have no stored row
    ///
    /// IDs an earlier run found missing upstream are not requested again. The ceiling is the configured start ID, or the highest stored ID when none
    /// is configured. An empty store yields an empty run.
    pub async fn run_fill_gaps(&self) -> Result<RunSummary> {
        let ceiling = match self.config.run.start_id {
            Some(id) => Some(ItemId(id)),
            None => self.db.max_item_id().await?,
        };
        let floor = ItemId(self.config.run.end_id);

        let missing = match ceiling {
            Some(ceiling) => self.db.missing_ids(floor, ceiling).await?,
            None => {
                tracing::info!("Store is empty, no gaps to fill");
                Vec::new()
            }
        };

        let plan = BatchPlan::from_ids(missing, self.config.run.batch_size);

        tracing::info!(
            floor = %floor,
            ceiling = ?ceiling.map(|c| c.0),
            missing = plan.total_items(),
            num_workers = self.limiter.capacity(),
            "Starting gap fill"
        );

        self.run_plan(&plan).await
    }

    async fn run_plan(&self, plan: &BatchPlan) -> Result<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::default();

        self.event_tx
            .send(Event::RunStarted {
                total_items: plan.total_items(),
                total_batches: plan.total_batches(),
            })
            .ok();

        for batch in plan.batches() {
            if self.cancel_token.is_cancelled() {
                summary.cancelled = true;
                tracing::info!(
                    lowest_completed = ?summary.lowest_completed.map(|id| id.0),
                    next_batch_high = %batch.high,
                    "Run cancelled at batch boundary"
                );
                break;
            }

            let tally = self.run_batch(&batch).await?;

            summary.batches += 1;
            summary.attempted += batch.len() as u64;
            summary.inserted += tally.inserted.load(Ordering::Relaxed);
            summary.already_present += tally.already_present.load(Ordering::Relaxed);
            summary.fetch_failed += tally.fetch_failed.load(Ordering::Relaxed);
            summary.missing += tally.missing.load(Ordering::Relaxed);
            summary.write_failed += tally.write_failed.load(Ordering::Relaxed);
            summary.lowest_completed = Some(batch.low);
        }

        summary.elapsed = started.elapsed();

        tracing::info!(
            batches = summary.batches,
            attempted = summary.attempted,
            inserted = summary.inserted,
            already_present = summary.already_present,
            skipped = summary.skipped(),
            missing = summary.missing,
            cancelled = summary.cancelled,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "Completed fetching items"
        );

        self.event_tx
            .send(Event::RunCompleted {
                summary: summary.clone(),
            })
            .ok();

        Ok(summary)
    }

    /// Schedule one batch and wait at its barrier
    async fn run_batch(&self, batch: &Batch) -> Result<Arc<BatchTally>> {
        tracing::debug!(
            batch_high = %batch.high,
            batch_low = %batch.low,
            size = batch.len(),
            "Starting batch"
        );
        self.event_tx
            .send(Event::BatchStarted {
                high: batch.high,
                low: batch.low,
                size: batch.len() as u64,
            })
            .ok();

        if let Err(e) = self.writer.begin_batch().await {
            tracing::error!(
                batch_high = %batch.high,
                batch_low = %batch.low,
                error = %e,
                "Could not open batch transaction, writes will commit individually"
            );
        }

        let tally = Arc::new(BatchTally::default());
        let mut tasks = JoinSet::new();
        let mut scheduling_error = None;

        for &id in &batch.ids {
            let permit = match self.limiter.acquire().await {
                Ok(permit) => permit,
                Err(e) => {
                    scheduling_error = Some(e);
                    break;
                }
            };

            let task = ItemTask {
                id,
                source: Arc::clone(&self.source),
                writer: Arc::clone(&self.writer),
                event_tx: self.event_tx.clone(),
                tally: Arc::clone(&tally),
            };

            tasks.spawn(async move {
                let _permit = permit;
                process_item(task).await;
            });
        }

        // Barrier: nothing from this batch may still be running past this point
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(
                    batch_high = %batch.high,
                    batch_low = %batch.low,
                    error = %e,
                    "Item task panicked"
                );
                tally.write_failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Err(e) = self.writer.commit_batch().await {
            tracing::error!(
                batch_high = %batch.high,
                batch_low = %batch.low,
                error = %e,
                "Failed to commit batch, its writes are lost"
            );
            let lost = tally.inserted.swap(0, Ordering::Relaxed);
            tally.write_failed.fetch_add(lost, Ordering::Relaxed);
        }

        if let Some(e) = scheduling_error {
            return Err(e);
        }

        tracing::debug!(
            batch_high = %batch.high,
            batch_low = %batch.low,
            "Batch complete"
        );
        self.event_tx
            .send(Event::BatchCompleted {
                high: batch.high,
                low: batch.low,
            })
            .ok();

        Ok(tally)
    }
}

/// Fetch one item and hand it to the writer
///
/// Always ends with an [`Event::ItemCompleted`], whatever happened.
async fn process_item(task: ItemTask) {
    let id = task.id;

    match task.source.fetch(id).await {
        Ok(item) => match task.writer.write(&item).await {
            Ok(outcome) if outcome.inserted => {
                task.tally.inserted.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {
                tracing::debug!(item_id = %id, "Item already stored");
                task.tally.already_present.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(item_id = %id, error = %e, "Failed to write item");
                task.tally.write_failed.fetch_add(1, Ordering::Relaxed);
            }
        },
        Err(e) => {
            tracing::warn!(
                item_id = %id,
                missing = e.is_missing(),
                error = %e,
                "Failed to fetch item"
            );
            task.tally.fetch_failed.fetch_add(1, Ordering::Relaxed);

            if e.is_missing() {
                match task.writer.record_missing(id).await {
                    Ok(_) => {
                        task.tally.missing.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::warn!(item_id = %id, error = %e, "Failed to record missing item");
                    }
                }
            }
        }
    }

    task.event_tx.send(Event::ItemCompleted { id }).ok();
}
