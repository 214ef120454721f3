use crate::{
    config::Config,
    errors::{Result, SentinelError},
    models::{DnsInfo, HealthRecord, WhoisInfo},
};
use async_trait::async_trait;
use futures::FutureExt;
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};
use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Health,
    Whois,
    Dns,
}

/// A unit of work for the pool. `batch` is echoed back on the result so a
/// collector can tell its own results from stragglers of an older batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub batch: u64,
    pub domain: String,
    pub kind: TaskKind,
}

impl Job {
    pub fn new(batch: u64, domain: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            batch,
            domain: domain.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Health(HealthRecord),
    Whois(WhoisInfo),
    Dns(DnsInfo),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub batch: u64,
    pub domain: String,
    pub outcome: Outcome,
}

/// Work executed by pool workers, one method per [`TaskKind`].
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn health(&self, domain: &str) -> HealthRecord;
    async fn whois(&self, domain: &str) -> Result<WhoisInfo>;
    async fn dns(&self, domain: &str) -> Result<DnsInfo>;
}

/// Cloneable producer handle onto the pool's job queue.
///
/// Outliving the pool's intake is harmless: once the pool shuts down every
/// sender fails with `PoolClosed`, including one already waiting for space.
#[derive(Clone)]
pub struct JobSender {
    tx: mpsc::Sender<Job>,
    closed: watch::Receiver<bool>,
}

impl JobSender {
    /// Waits for queue space, then enqueues the job.
    pub async fn submit(&self, job: Job) -> Result<()> {
        tokio::select! {
            biased;
            _ = closed(self.closed.clone()) => Err(SentinelError::PoolClosed),
            sent = self.tx.send(job) => sent.map_err(|_| SentinelError::PoolClosed),
        }
    }
}

/// Resolves once intake is closed or the pool itself is gone.
async fn closed(mut signal: watch::Receiver<bool>) {
    while !*signal.borrow_and_update() {
        if signal.changed().await.is_err() {
            return;
        }
    }
}

/// Fixed set of workers fed from a bounded job queue, publishing into a
/// bounded result queue. Both queues hold `workers * queue_factor` items.
pub struct WorkerPool {
    size: usize,
    jobs: std::sync::Mutex<Option<mpsc::Sender<Job>>>,
    closed: watch::Sender<bool>,
    results: Mutex<mpsc::Receiver<JobResult>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn start(workers: usize, queue_factor: usize, handler: Arc<dyn JobHandler>) -> Result<Self> {
        if workers == 0 {
            return Err(SentinelError::InvalidPool);
        }

        let capacity = workers * queue_factor.max(1);
        let (job_tx, job_rx) = mpsc::channel::<Job>(capacity);
        let (result_tx, result_rx) = mpsc::channel::<JobResult>(capacity);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (closed_tx, closed_rx) = watch::channel(false);

        let handles = (0..workers)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    job_rx.clone(),
                    closed_rx.clone(),
                    result_tx.clone(),
                    handler.clone(),
                ))
            })
            .collect();

        info!("Worker pool started with {} workers (queue capacity {})", workers, capacity);

        Ok(Self {
            size: workers,
            jobs: std::sync::Mutex::new(Some(job_tx)),
            closed: closed_tx,
            results: Mutex::new(result_rx),
            workers: Mutex::new(handles),
        })
    }

    pub fn from_config(config: &Config, handler: Arc<dyn JobHandler>) -> Result<Self> {
        Self::start(config.workers, config.queue_factor, handler)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Producer handle, or `PoolClosed` after [`WorkerPool::shutdown`].
    pub fn sender(&self) -> Result<JobSender> {
        let jobs = self
            .jobs
            .lock()
            .map_err(|_| SentinelError::Internal("job queue lock poisoned".to_string()))?;
        jobs.as_ref()
            .map(|tx| JobSender {
                tx: tx.clone(),
                closed: self.closed.subscribe(),
            })
            .ok_or(SentinelError::PoolClosed)
    }

    pub async fn submit(&self, job: Job) -> Result<()> {
        self.sender()?.submit(job).await
    }

    /// Next result from any worker. `None` once every worker has exited.
    pub async fn recv(&self) -> Option<JobResult> {
        self.results.lock().await.recv().await
    }

    /// Closes the job queue and waits for the workers to drain it. Results
    /// produced while draining are discarded. Jobs already running are not
    /// interrupted; senders handed out earlier are refused from here on.
    pub async fn shutdown(&self) {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.take();
        }
        self.closed.send_replace(true);

        let mut discarded = 0usize;
        {
            let mut results = self.results.lock().await;
            while results.recv().await.is_some() {
                discarded += 1;
            }
        }
        if discarded > 0 {
            debug!("Discarded {} results while draining the pool", discarded);
        }

        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker task ended abnormally: {}", e);
            }
        }
        info!("Worker pool stopped");
    }
}

async fn run_worker(
    id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    closed_signal: watch::Receiver<bool>,
    results: mpsc::Sender<JobResult>,
    handler: Arc<dyn JobHandler>,
) {
    loop {
        // Queued jobs are still drained after close; an empty queue ends the worker
        let job = {
            let mut jobs = jobs.lock().await;
            tokio::select! {
                biased;
                job = jobs.recv() => job,
                _ = closed(closed_signal.clone()) => jobs.try_recv().ok(),
            }
        };
        let Some(job) = job else {
            break;
        };

        debug!("Worker {} picked up {:?} job for {}", id, job.kind, job.domain);
        let result = execute(handler.as_ref(), job).await;

        if results.send(result).await.is_err() {
            warn!("Worker {} lost its result queue", id);
            break;
        }
    }
    debug!("Worker {} exiting", id);
}

/// Runs one job to completion. Handler errors and panics become
/// `Outcome::Failed` so the calling worker keeps going.
pub(crate) async fn execute(handler: &dyn JobHandler, job: Job) -> JobResult {
    let Job { batch, domain, kind } = job;

    let dispatch = async {
        match kind {
            TaskKind::Health => Outcome::Health(handler.health(&domain).await),
            TaskKind::Whois => match handler.whois(&domain).await {
                Ok(info) => Outcome::Whois(info),
                Err(e) => Outcome::Failed(e.to_string()),
            },
            TaskKind::Dns => match handler.dns(&domain).await {
                Ok(info) => Outcome::Dns(info),
                Err(e) => Outcome::Failed(e.to_string()),
            },
        }
    };

    let outcome = match AssertUnwindSafe(dispatch).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!("Handler panicked on {:?} job for {}: {}", kind, domain, message);
            Outcome::Failed(format!("handler panicked: {}", message))
        }
    };

    JobResult { batch, domain, outcome }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
