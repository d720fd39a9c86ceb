//! Runs the writers and the watch consumer concurrently and measures the elapsed time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytes::Bytes;
use kvbench_client::{Revision, StoreClient};
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinSet};

use crate::config::Config;
use crate::workload::{Writer, WriterStats, consume_events};

/// The outcome of a successful benchmark run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Wall-clock time from spawning the writers until every task finished.
    pub elapsed: Duration,
    /// Successful puts of each writer task, indexed by task.
    pub puts_per_task: Vec<u64>,
    /// Events observed by the watch consumer.
    pub events_observed: u64,
    /// Highest revision returned by any put.
    pub last_revision: Option<Revision>,
}

impl RunReport {
    /// Successful puts across all writer tasks.
    pub fn total_puts(&self) -> u64 {
        self.puts_per_task.iter().sum()
    }
}

enum Outcome {
    Writer { task: usize, stats: WriterStats },
    Watcher { events: u64 },
}

fn joined(result: Result<Result<Outcome>, JoinError>) -> Result<Outcome> {
    result.context("benchmark task panicked")?
}

/// Runs a single benchmark against `store`.
///
/// If watching is enabled, the consumer subscribes first and the writers are only spawned once
/// the subscription is confirmed. The measured region starts right before the writers are spawned
/// and ends once all tasks have finished.
///
/// The first failure of any task aborts all remaining tasks and fails the run.
pub async fn run<S>(config: &Config, store: Arc<S>) -> Result<RunReport>
where
    S: StoreClient + ?Sized,
{
    let key = Bytes::copy_from_slice(config.key.as_bytes());
    let value = Bytes::copy_from_slice(config.value.as_bytes());
    let mut tasks: JoinSet<Result<Outcome>> = JoinSet::new();

    if config.enable_watch {
        let watch_target = config.watch_target();
        if !config.enable_put && watch_target > 0 {
            tracing::warn!(
                watch_target,
                "watching without puts, the consumer waits for changes from other clients"
            );
        }

        let (ready, subscribed) = oneshot::channel();
        let store = Arc::clone(&store);
        let key = key.clone();

        tasks.spawn(async move {
            let mut events = store
                .watch(&key)
                .await
                .context("failed to subscribe to watch")?;
            ready.send(()).ok();

            let events = consume_events(&mut events, watch_target)
                .await
                .context("watch consumer failed")?;
            tracing::debug!(events, "watch consumer finished");
            anyhow::Ok(Outcome::Watcher { events })
        });

        if subscribed.await.is_err() {
            // the consumer ended before confirming its subscription, its result has the reason
            let result = tasks
                .join_next()
                .await
                .context("watch consumer vanished")?;
            joined(result)?;
            anyhow::bail!("watch consumer ended before subscribing");
        }
        tracing::info!(watch_target, "watch subscribed");
    }

    let start = Instant::now();

    let mut report = RunReport::default();
    if config.enable_put {
        report.puts_per_task = vec![0; config.concurrency];
        for task in 0..config.concurrency {
            let store = Arc::clone(&store);
            let writer = Writer::new(key.clone(), value.clone(), config.request_count);
            tasks.spawn(async move {
                let stats = writer
                    .run(store.as_ref())
                    .await
                    .with_context(|| format!("writer {task} failed"))?;
                anyhow::Ok(Outcome::Writer { task, stats })
            });
        }
        tracing::info!(
            concurrency = config.concurrency,
            request_count = config.request_count,
            "writers started"
        );
    }

    while let Some(result) = tasks.join_next().await {
        match joined(result)? {
            Outcome::Writer { task, stats } => {
                report.puts_per_task[task] = stats.puts;
                report.last_revision = report.last_revision.max(stats.last_revision);
            }
            Outcome::Watcher { events } => report.events_observed = events,
        }
    }

    report.elapsed = start.elapsed();
    tracing::info!(elapsed = ?report.elapsed, "run finished");

    Ok(report)
}
