use crate::{
    dataset::SharedDataset,
    errors::{Result, SentinelError},
    models::HealthRecord,
    pool::{Outcome, WorkerPool},
};
use std::{collections::HashMap, time::Duration};
use tokio::{task::JoinHandle, time::timeout};
use tracing::{debug, warn};

/// Health records gathered for one batch, keyed by domain name.
pub type HealthBatch = HashMap<String, HealthRecord>;

/// Receives results until exactly `expected` results tagged with `batch`
/// have arrived.
///
/// `submission` is the task feeding the pool; it must report how many jobs
/// it enqueued. If it fails or enqueues fewer than `expected`, or if `wait`
/// elapses first, the batch is abandoned with `IncompleteBatch` and nothing
/// is returned. The caller keeps the handle so it can abort a submission
/// still blocked on a full queue. Results carrying another batch number are
/// dropped.
pub async fn collect_batch(
    pool: &WorkerPool,
    batch: u64,
    expected: usize,
    submission: &mut JoinHandle<Result<usize>>,
    wait: Duration,
) -> Result<HealthBatch> {
    let mut results = HealthBatch::with_capacity(expected);
    let mut received = 0usize;
    let mut submission_done = false;

    let collect = async {
        while received < expected {
            tokio::select! {
                joined = &mut *submission, if !submission_done => {
                    submission_done = true;
                    match joined {
                        Ok(Ok(submitted)) if submitted == expected => {}
                        Ok(Ok(submitted)) => {
                            warn!("Batch {} submitted {} of {} jobs", batch, submitted, expected);
                            return Err(SentinelError::IncompleteBatch { received, expected });
                        }
                        Ok(Err(e)) => {
                            warn!("Batch {} submission failed: {}", batch, e);
                            return Err(SentinelError::IncompleteBatch { received, expected });
                        }
                        Err(e) => {
                            return Err(SentinelError::Internal(format!("submission task failed: {}", e)));
                        }
                    }
                }
                result = pool.recv() => {
                    let Some(result) = result else {
                        return Err(SentinelError::PoolClosed);
                    };
                    if result.batch != batch {
                        debug!("Dropping stale result for {} from batch {}", result.domain, result.batch);
                        continue;
                    }
                    received += 1;
                    results.insert(result.domain, health_from(result.outcome));
                }
            }
        }
        Ok(())
    };

    let outcome = timeout(wait, collect).await;
    match outcome {
        Ok(Ok(())) => Ok(results),
        Ok(Err(e)) => Err(e),
        Err(_) => {
            warn!("Batch {} timed out with {} of {} results", batch, received, expected);
            Err(SentinelError::IncompleteBatch { received, expected })
        }
    }
}

/// Merges a complete batch into the dataset in one write section.
pub async fn apply_batch(dataset: &SharedDataset, batch: HealthBatch) -> usize {
    dataset.merge_health(batch).await
}

fn health_from(outcome: Outcome) -> HealthRecord {
    match outcome {
        Outcome::Health(health) => health,
        Outcome::Failed(error) => HealthRecord::offline(error),
        Outcome::Whois(_) | Outcome::Dns(_) => {
            HealthRecord::offline("unexpected lookup result in health batch")
        }
    }
}
