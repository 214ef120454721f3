use crate::{
    errors::Result,
    health::HealthProber,
    lookup::{DnsLookup, WhoisLookup},
    models::{DnsInfo, HealthRecord, WhoisInfo},
    pool::JobHandler,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Routes pool jobs to the prober and the live WHOIS/DNS clients.
#[derive(Clone)]
pub struct SentinelHandler {
    prober: HealthProber,
    whois: Arc<dyn WhoisLookup>,
    dns: Arc<dyn DnsLookup>,
}

impl SentinelHandler {
    pub fn new(prober: HealthProber, whois: Arc<dyn WhoisLookup>, dns: Arc<dyn DnsLookup>) -> Self {
        Self { prober, whois, dns }
    }
}

#[async_trait]
impl JobHandler for SentinelHandler {
    async fn health(&self, domain: &str) -> HealthRecord {
        self.prober.probe(domain).await
    }

    async fn whois(&self, domain: &str) -> Result<WhoisInfo> {
        self.whois.lookup(domain).await
    }

    async fn dns(&self, domain: &str) -> Result<DnsInfo> {
        self.dns.lookup(domain).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::SentinelError,
        health::{HostResolver, HttpProbe},
        models::Protocol,
        pool::{Job, Outcome, TaskKind, WorkerPool},
    };
    use std::time::Duration;

    struct Resolves;

    #[async_trait]
    impl HostResolver for Resolves {
        async fn resolve(&self, _domain: &str) -> std::result::Result<(), String> {
            Ok(())
        }
    }

    struct Answers;

    #[async_trait]
    impl HttpProbe for Answers {
        async fn status(&self, _url: &str) -> std::result::Result<u16, String> {
            Ok(204)
        }
    }

    struct NoWhois;

    #[async_trait]
    impl WhoisLookup for NoWhois {
        async fn lookup(&self, domain: &str) -> Result<WhoisInfo> {
            Err(SentinelError::UnsupportedTld(domain.to_string()))
        }
    }

    struct StaticDns;

    #[async_trait]
    impl DnsLookup for StaticDns {
        async fn lookup(&self, domain: &str) -> Result<DnsInfo> {
            Ok(DnsInfo {
                domain: domain.to_string(),
                txt_records: vec!["v=spf1 -all".to_string()],
                ..DnsInfo::default()
            })
        }
    }

    fn handler() -> SentinelHandler {
        let prober = HealthProber::new(Arc::new(Resolves), Arc::new(Answers), Duration::from_secs(5));
        SentinelHandler::new(prober, Arc::new(NoWhois), Arc::new(StaticDns))
    }

    #[tokio::test]
    async fn test_dispatches_each_kind_through_pool() {
        let pool = WorkerPool::start(2, 2, Arc::new(handler())).unwrap();
        pool.submit(Job::new(1, "a.com", TaskKind::Health)).await.unwrap();
        pool.submit(Job::new(1, "b.com", TaskKind::Whois)).await.unwrap();
        pool.submit(Job::new(1, "c.com", TaskKind::Dns)).await.unwrap();

        for _ in 0..3 {
            let result = pool.recv().await.unwrap();
            match (result.domain.as_str(), result.outcome) {
                ("a.com", Outcome::Health(health)) => {
                    assert_eq!(health.protocol, Some(Protocol::Https));
                    assert_eq!(health.status_code, Some(204));
                }
                ("b.com", Outcome::Failed(message)) => assert!(message.contains("b.com")),
                ("c.com", Outcome::Dns(info)) => assert_eq!(info.txt_records.len(), 1),
                (domain, outcome) => panic!("unexpected result for {}: {:?}", domain, outcome),
            }
        }
        pool.shutdown().await;
    }
}
