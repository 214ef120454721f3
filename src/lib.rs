//! # Domain Sentinel Library
//!
//! Monitors newly registered domains: a periodically refreshed feed is
//! enriched with liveness data through a bounded worker pool and kept in a
//! shared, lock-protected dataset that answers queries.
//!
//! ## Features
//!
//! - Feed and health refresh loops on independent intervals
//! - Fixed-size worker pool with bounded queues and panic isolation
//! - DNS → HTTPS → HTTP health probing with per-request timeouts
//! - WHOIS (port 43, IANA discovery, referrals) and DNS lookups behind a TTL cache
//! - Look-alike domain reports aggregated per similarity threshold
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use domain_sentinel::{Config, Sentinel};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sentinel = Sentinel::new(Arc::new(Config::load()?))?;
//!     sentinel.refresh_feed().await?;
//!     sentinel.refresh_health().await?;
//!
//!     let stats = sentinel.stats().await;
//!     println!("Tracking {} domains", stats.total_domains);
//!
//!     sentinel.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod dataset;
pub mod dns;
pub mod errors;
pub mod feed;
pub mod handler;
pub mod health;
pub mod lookup;
pub mod metrics;
pub mod models;
pub mod parser;
pub mod pool;
#[cfg(feature = "server")]
pub mod ratelimit;
pub mod scheduler;
pub mod similarity;
pub mod whois;

// Re-export main types for easy access
pub use config::Config;
pub use dataset::SharedDataset;
pub use errors::{Result, SentinelError};
pub use models::{
    DnsInfo, Domain, DomainPage, DomainStats, HealthRecord, Protocol, SimilarityData, WhoisInfo,
};
pub use pool::WorkerPool;
pub use scheduler::{RefreshScheduler, SchedulerHandle};

use chrono::Utc;
use feed::{FeedSource, HttpFeed};
use handler::SentinelHandler;
use health::HealthProber;
use lookup::{DnsLookup, LookupService, WhoisLookup};
use scheduler::RefreshIntervals;
use similarity::{HttpSimilaritySource, SimilaritySource, SimilarityService};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

const FEED_TIMEOUT: Duration = Duration::from_secs(30);
const SIMILARITY_TIMEOUT: Duration = Duration::from_secs(10);
const NEW_DOMAIN_WINDOW_HOURS: i64 = 24;

/// The external collaborators a [`Sentinel`] talks to.
pub struct Collaborators {
    pub feed: Arc<dyn FeedSource>,
    pub prober: HealthProber,
    pub whois: Arc<dyn WhoisLookup>,
    pub dns: Arc<dyn DnsLookup>,
    pub similarity: Arc<dyn SimilaritySource>,
}

impl Collaborators {
    /// Network-backed collaborators built from configuration.
    pub fn from_config(config: &Arc<Config>) -> Result<Self> {
        Ok(Self {
            feed: Arc::new(HttpFeed::new(config.feed_url.clone(), FEED_TIMEOUT)?),
            prober: HealthProber::system(config.probe_timeout())?,
            whois: Arc::new(whois::WhoisService::new(config.clone())),
            dns: Arc::new(dns::DnsService::new(config.probe_timeout())),
            similarity: Arc::new(HttpSimilaritySource::new(
                config.similarity_url_template.clone(),
                SIMILARITY_TIMEOUT,
            )?),
        })
    }
}

/// Everything wired together: dataset, pool, scheduler and the query side.
///
/// Must be created inside a tokio runtime.
pub struct Sentinel {
    config: Arc<Config>,
    dataset: Arc<SharedDataset>,
    pool: Arc<WorkerPool>,
    scheduler: Arc<RefreshScheduler>,
    prober: HealthProber,
    lookups: LookupService,
    similarity: SimilarityService,
    running: std::sync::Mutex<Option<SchedulerHandle>>,
}

impl Sentinel {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let collaborators = Collaborators::from_config(&config)?;
        Self::with_collaborators(config, collaborators)
    }

    pub fn with_collaborators(config: Arc<Config>, collaborators: Collaborators) -> Result<Self> {
        let Collaborators {
            feed,
            prober,
            whois,
            dns,
            similarity,
        } = collaborators;

        let handler = SentinelHandler::new(prober.clone(), whois.clone(), dns.clone());
        let pool = Arc::new(WorkerPool::from_config(&config, Arc::new(handler))?);
        let dataset = Arc::new(SharedDataset::new());
        let scheduler = Arc::new(RefreshScheduler::new(
            dataset.clone(),
            feed,
            pool.clone(),
            RefreshIntervals::from(config.as_ref()),
        ));

        Ok(Self {
            lookups: LookupService::from_config(&config, whois, dns),
            similarity: SimilarityService::new(similarity, config.similarity_ttl()),
            config,
            dataset,
            pool,
            scheduler,
            prober,
            running: std::sync::Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dataset(&self) -> &SharedDataset {
        &self.dataset
    }

    /// Starts the refresh loops. Calling it again while running does nothing.
    pub fn start(&self) {
        let Ok(mut running) = self.running.lock() else {
            warn!("Scheduler state lock poisoned, not starting");
            return;
        };
        if running.is_none() {
            *running = Some(self.scheduler.clone().spawn());
        }
    }

    /// Stops the refresh loops and drains the worker pool.
    pub async fn shutdown(&self) {
        let handle = self.running.lock().ok().and_then(|mut running| running.take());
        if let Some(handle) = handle {
            handle.stop();
        }
        self.pool.shutdown().await;
        info!("Sentinel stopped");
    }

    pub async fn refresh_feed(&self) -> Result<usize> {
        self.scheduler.run_feed_cycle().await
    }

    pub async fn refresh_health(&self) -> Result<usize> {
        self.scheduler.run_health_cycle().await
    }

    pub async fn domains(&self, search: Option<&str>, page: usize, limit: usize) -> DomainPage {
        self.dataset.page(search, page, limit).await
    }

    /// Domains first seen in the last 24 hours.
    pub async fn new_domains(&self) -> Vec<Domain> {
        let since = Utc::now() - chrono::Duration::hours(NEW_DOMAIN_WINDOW_HOURS);
        self.dataset.recent(since).await
    }

    pub async fn stats(&self) -> DomainStats {
        self.dataset.stats().await
    }

    pub async fn tlds(&self) -> Vec<String> {
        self.dataset.labels().await
    }

    pub async fn tld_domains(&self, tld: &str) -> Vec<Domain> {
        self.dataset.by_label(&tld.trim().to_lowercase()).await
    }

    /// Probes `domain` right now, bypassing the pool and every cache.
    pub async fn check_health(&self, domain: &str) -> Result<HealthRecord> {
        let domain = lookup::normalize_domain(domain)?;
        Ok(self.prober.probe(&domain).await)
    }

    pub async fn whois(&self, domain: &str) -> Result<(WhoisInfo, bool)> {
        self.lookups.whois(domain).await
    }

    pub async fn dns(&self, domain: &str) -> Result<(DnsInfo, bool)> {
        self.lookups.dns(domain).await
    }

    pub async fn similarity(&self, threshold: &str) -> Result<Arc<Vec<SimilarityData>>> {
        self.similarity.report(threshold).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use health::{HostResolver, HttpProbe};

    struct StaticFeed;

    #[async_trait]
    impl FeedSource for StaticFeed {
        async fn fetch(&self) -> Result<String> {
            Ok("alpha.com\nbeta.com\ngamma.org\nbroken.net\n".to_string())
        }
    }

    struct Resolver;

    #[async_trait]
    impl HostResolver for Resolver {
        async fn resolve(&self, domain: &str) -> std::result::Result<(), String> {
            if domain == "broken.net" {
                Err("no such host".to_string())
            } else {
                Ok(())
            }
        }
    }

    struct Http;

    #[async_trait]
    impl HttpProbe for Http {
        async fn status(&self, url: &str) -> std::result::Result<u16, String> {
            if url.starts_with("https://gamma") {
                Err("tls handshake failed".to_string())
            } else {
                Ok(200)
            }
        }
    }

    struct Whois;

    #[async_trait]
    impl WhoisLookup for Whois {
        async fn lookup(&self, domain: &str) -> Result<WhoisInfo> {
            Ok(WhoisInfo {
                domain_name: domain.to_string(),
                registrar: Some("Registrar".to_string()),
                ..WhoisInfo::default()
            })
        }
    }

    struct Dns;

    #[async_trait]
    impl DnsLookup for Dns {
        async fn lookup(&self, domain: &str) -> Result<DnsInfo> {
            Err(SentinelError::Dns(format!("{} has no records", domain)))
        }
    }

    struct Similar;

    #[async_trait]
    impl SimilaritySource for Similar {
        async fn fetch(&self, _threshold: &str) -> Result<String> {
            Ok("paypa1.com -> paypal.com (93.0%)\n".to_string())
        }
    }

    fn sentinel() -> Sentinel {
        let mut config = Config::default();
        config.workers = 2;
        let collaborators = Collaborators {
            feed: Arc::new(StaticFeed),
            prober: HealthProber::new(Arc::new(Resolver), Arc::new(Http), Duration::from_secs(5)),
            whois: Arc::new(Whois),
            dns: Arc::new(Dns),
            similarity: Arc::new(Similar),
        };
        Sentinel::with_collaborators(Arc::new(config), collaborators).unwrap()
    }

    #[tokio::test]
    async fn test_refresh_and_query() {
        let sentinel = sentinel();
        assert_eq!(sentinel.refresh_feed().await.unwrap(), 4);
        assert_eq!(sentinel.refresh_health().await.unwrap(), 4);

        let stats = sentinel.stats().await;
        assert_eq!(stats.total_domains, 4);
        assert_eq!(stats.domains_per_tld["com"], 2);

        let gamma = sentinel.domains(Some("gamma"), 1, 10).await;
        assert_eq!(gamma.total, 1);
        assert_eq!(gamma.domains[0].health.protocol, Some(Protocol::Http));

        let broken = &sentinel.tld_domains("NET").await[0];
        assert!(!broken.health.is_online);
        assert!(broken
            .health
            .error
            .as_deref()
            .unwrap()
            .starts_with("DNS resolution failed"));

        assert_eq!(sentinel.tlds().await, vec!["com", "net", "org"]);
        assert_eq!(sentinel.new_domains().await.len(), 4);
        sentinel.shutdown().await;
    }

    #[tokio::test]
    async fn test_lookups_report_cache_state() {
        let sentinel = sentinel();

        let (_, hit) = sentinel.whois("alpha.com").await.unwrap();
        assert!(!hit);
        let (info, hit) = sentinel.whois("alpha.com").await.unwrap();
        assert!(hit);
        assert_eq!(info.registrar.as_deref(), Some("Registrar"));

        let (dns, _) = sentinel.dns("alpha.com").await.unwrap();
        assert!(dns.error.unwrap().starts_with("DNS lookup failed"));

        let report = sentinel.similarity("0.9").await.unwrap();
        assert_eq!(report[0].target_domain, "paypal.com");
        sentinel.shutdown().await;
    }

    #[tokio::test]
    async fn test_check_health_bypasses_dataset() {
        let sentinel = sentinel();
        let record = sentinel.check_health("alpha.com").await.unwrap();
        assert_eq!(record.protocol, Some(Protocol::Https));
        assert_eq!(sentinel.stats().await.total_domains, 0);
        assert!(sentinel.check_health("").await.is_err());
        sentinel.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_shutdown_closes_pool() {
        let sentinel = sentinel();
        sentinel.start();
        sentinel.start();
        assert_eq!(sentinel.refresh_feed().await.unwrap(), 4);

        sentinel.shutdown().await;
        assert!(matches!(
            sentinel.refresh_health().await,
            Err(SentinelError::PoolClosed)
        ));
    }
}
