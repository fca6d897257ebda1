use clap::Parser;
use hn_dl::{CommitStrategy, Config, Event, Ingester, RunMode, RunSummary, run_with_shutdown};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Download Hacker News items into SQLite")]
struct Args {
    /// JSON config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,
    /// SQLite database path
    #[arg(long)]
    database: Option<PathBuf>,
    /// API base URL (items are fetched from <base-url>/item/<id>.json)
    #[arg(long)]
    base_url: Option<String>,
    /// Highest item ID to fetch (defaults to the current max item)
    #[arg(long)]
    start: Option<i64>,
    /// Lowest item ID to fetch, inclusive
    #[arg(long)]
    end: Option<i64>,
    /// IDs per batch
    #[arg(long)]
    batch_size: Option<usize>,
    /// Maximum concurrent fetch+write tasks
    #[arg(long)]
    workers: Option<usize>,
    /// per_item or per_batch
    #[arg(long)]
    commit_strategy: Option<CommitStrategy>,
    /// Only fetch IDs missing from the database
    #[arg(long)]
    fill_gaps: bool,
    /// Log progress every N completed items
    #[arg(long, default_value_t = 10_000)]
    progress_every: u64,
}

impl Args {
    async fn into_config(self) -> hn_dl::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path).await?,
            None => Config::default(),
        };

        if let Some(database) = self.database {
            config.persistence.database_path = database;
        }
        if let Some(base_url) = self.base_url {
            config.api.base_url = base_url;
        }
        if self.start.is_some() {
            config.run.start_id = self.start;
        }
        if let Some(end) = self.end {
            config.run.end_id = end;
        }
        if let Some(batch_size) = self.batch_size {
            config.run.batch_size = batch_size;
        }
        if let Some(workers) = self.workers {
            config.run.num_workers = workers;
        }
        if let Some(strategy) = self.commit_strategy {
            config.run.commit_strategy = strategy;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .init();

    let mode = if args.fill_gaps {
        RunMode::FillGaps
    } else {
        RunMode::Range
    };
    let progress_every = args.progress_every.max(1);
    let config = args.into_config().await?;

    let ingester = Ingester::new(config).await?;

    let events = ingester.subscribe();
    let reporter = tokio::spawn(report_progress(events, progress_every));

    let summary = run_with_shutdown(ingester, mode).await?;
    reporter.abort();

    print_summary(&summary);
    println!("Completed fetching items");

    Ok(())
}

/// `RUST_LOG` when set, `info` otherwise
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

async fn report_progress(mut events: tokio::sync::broadcast::Receiver<Event>, every: u64) {
    let mut total = 0u64;
    let mut completed = 0u64;

    loop {
        match events.recv().await {
            Ok(Event::RunStarted { total_items, .. }) => total = total_items,
            Ok(Event::ItemCompleted { .. }) => {
                completed += 1;
                if completed % every == 0 {
                    tracing::info!(completed, total, "Progress");
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => completed += missed,
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!("Batches:         {}", summary.batches);
    println!("Attempted:       {}", summary.attempted);
    println!("Inserted:        {}", summary.inserted);
    println!("Already stored:  {}", summary.already_present);
    println!("Fetch failures:  {}", summary.fetch_failed);
    println!("  not upstream:  {}", summary.missing);
    println!("Write failures:  {}", summary.write_failed);
    if let Some(lowest) = summary.lowest_completed {
        println!("Lowest batch ID: {}", lowest);
    }
    if summary.cancelled {
        println!("Run was cancelled before the last batch");
    }
    println!("Elapsed:         {:.1}s", summary.elapsed.as_secs_f64());
}
