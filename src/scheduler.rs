use crate::{
    aggregator::{apply_batch, collect_batch},
    config::Config,
    dataset::SharedDataset,
    errors::Result,
    feed::{parse_domains, FeedSource},
    pool::{Job, TaskKind, WorkerPool},
};
use chrono::Utc;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{interval, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct RefreshIntervals {
    pub feed: Duration,
    pub health: Duration,
    /// Lower bound on how long a health batch may take.
    pub batch_timeout: Duration,
    pub probe_timeout: Duration,
}

impl From<&Config> for RefreshIntervals {
    fn from(config: &Config) -> Self {
        Self {
            feed: config.feed_refresh_interval(),
            health: config.health_refresh_interval(),
            batch_timeout: config.batch_timeout(),
            probe_timeout: config.probe_timeout(),
        }
    }
}

// DNS, HTTPS and HTTP steps, each bounded by the probe timeout
const PROBE_STEPS: u32 = 3;

/// Aborts the submission task when a health cycle ends or is itself aborted,
/// so no producer outlives its batch.
struct Submission(JoinHandle<Result<usize>>);

impl Drop for Submission {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Drives the two periodic loops: re-reading the feed and re-probing every
/// listed domain through the worker pool. The loops are independent and
/// may overlap; a health batch merges by name, so domains dropped by a feed
/// refresh in the meantime are simply skipped.
pub struct RefreshScheduler {
    dataset: Arc<SharedDataset>,
    feed: Arc<dyn FeedSource>,
    pool: Arc<WorkerPool>,
    intervals: RefreshIntervals,
    next_batch: AtomicU64,
    // The pool has one result queue, so health cycles must not overlap
    health_cycle: Mutex<()>,
}

impl RefreshScheduler {
    pub fn new(
        dataset: Arc<SharedDataset>,
        feed: Arc<dyn FeedSource>,
        pool: Arc<WorkerPool>,
        intervals: RefreshIntervals,
    ) -> Self {
        Self {
            dataset,
            feed,
            pool,
            intervals,
            next_batch: AtomicU64::new(1),
            health_cycle: Mutex::new(()),
        }
    }

    /// Fetches and installs a new domain list. On failure the current list
    /// stays in place.
    pub async fn run_feed_cycle(&self) -> Result<usize> {
        let data = match self.feed.fetch().await {
            Ok(data) => data,
            Err(e) => {
                warn!("Feed refresh failed, keeping previous domain list: {}", e);
                crate::metrics::record_refresh("feed", "error");
                return Err(e);
            }
        };

        let domains = parse_domains(&data, Utc::now());
        let count = domains.len();
        self.dataset.replace_domains(domains).await;

        info!("Feed refresh loaded {} domains", count);
        crate::metrics::record_refresh("feed", "ok");
        crate::metrics::set_domain_count(count);
        Ok(count)
    }

    /// Probes every domain currently listed and merges the complete batch.
    /// Per-domain failures end up in that domain's record; only an
    /// incomplete batch fails the cycle, in which case nothing is merged.
    pub async fn run_health_cycle(&self) -> Result<usize> {
        let _running = self.health_cycle.lock().await;
        let started = Instant::now();

        let names = self.dataset.domain_names().await;
        if names.is_empty() {
            debug!("Health refresh skipped, no domains listed");
            return Ok(0);
        }

        let batch = self.next_batch.fetch_add(1, Ordering::Relaxed);
        let expected = names.len();
        info!("Health refresh batch {} probing {} domains", batch, expected);

        // Submission runs apart from collection so a full job queue cannot
        // stall the collector that frees it.
        let sender = self.pool.sender()?;
        let mut submission = Submission(tokio::spawn(async move {
            let mut submitted = 0usize;
            for name in names {
                sender.submit(Job::new(batch, name, TaskKind::Health)).await?;
                submitted += 1;
            }
            Ok(submitted)
        }));

        let results = match collect_batch(
            &self.pool,
            batch,
            expected,
            &mut submission.0,
            self.batch_wait(expected),
        )
        .await
        {
            Ok(results) => results,
            Err(e) => {
                warn!("Health refresh batch {} abandoned: {}", batch, e);
                crate::metrics::record_refresh("health", "error");
                return Err(e);
            }
        };

        let online = results.values().filter(|h| h.is_online).count();
        let updated = apply_batch(&self.dataset, results).await;

        let elapsed = started.elapsed();
        info!(
            "Health refresh batch {} merged {} domains ({} online) in {:?}",
            batch, updated, online, elapsed
        );
        crate::metrics::record_refresh("health", "ok");
        crate::metrics::record_health_cycle(elapsed);
        Ok(updated)
    }

    /// Time allowed for a batch of `expected` probes: `batch_timeout`, or
    /// longer when the pool needs more rounds of worst-case probes than
    /// that covers.
    fn batch_wait(&self, expected: usize) -> Duration {
        let rounds = expected.div_ceil(self.pool.size().max(1));
        let rounds = u32::try_from(rounds).unwrap_or(u32::MAX);
        let needed = self
            .intervals
            .probe_timeout
            .saturating_mul(PROBE_STEPS)
            .saturating_mul(rounds);
        needed.max(self.intervals.batch_timeout)
    }

    /// Starts both loops. Each runs once immediately, then on its interval.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let feed = {
            let scheduler = self.clone();
            tokio::spawn(async move {
                let mut ticker = interval(scheduler.intervals.feed);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if scheduler.run_feed_cycle().await.is_err() {
                        debug!("Feed loop idle until next tick after failure");
                    }
                }
            })
        };

        let health = {
            let scheduler = self.clone();
            tokio::spawn(async move {
                let mut ticker = interval(scheduler.intervals.health);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if scheduler.run_health_cycle().await.is_err() {
                        debug!("Health loop idle until next tick after failure");
                    }
                }
            })
        };

        info!(
            "Refresh scheduler started (feed every {:?}, health every {:?})",
            self.intervals.feed, self.intervals.health
        );
        SchedulerHandle {
            tasks: vec![feed, health],
        }
    }
}

/// Stops the refresh loops when dropped.
pub struct SchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn stop(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
