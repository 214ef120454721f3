use crate::{
    errors::Result,
    models::{HealthRecord, Protocol},
};
use async_trait::async_trait;
use reqwest::redirect::Policy;
use std::{sync::Arc, time::Duration};
use tokio::time::{timeout, Instant};
use tracing::debug;

pub const NOT_RESPONDING: &str = "Domain is not responding to HTTP(S) requests";

const USER_AGENT: &str = "DomainSentinel/1.0";

/// Resolves a host name. Only success or failure matters to the prober.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, domain: &str) -> std::result::Result<(), String>;
}

/// Issues a GET and reports the status once response headers arrive.
#[async_trait]
pub trait HttpProbe: Send + Sync {
    async fn status(&self, url: &str) -> std::result::Result<u16, String>;
}

/// Resolver backed by the operating system (`getaddrinfo`).
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, domain: &str) -> std::result::Result<(), String> {
        let mut addrs = tokio::net::lookup_host((domain, 80))
            .await
            .map_err(|e| e.to_string())?;
        if addrs.next().is_some() {
            Ok(())
        } else {
            Err(format!("no addresses found for {}", domain))
        }
    }
}

pub struct ReqwestProbe {
    client: reqwest::Client,
}

impl ReqwestProbe {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        // Redirects are not followed: the first status answered is the one recorded
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .redirect(Policy::none())
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn status(&self, url: &str) -> std::result::Result<u16, String> {
        let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        Ok(response.status().as_u16())
    }
}

/// Liveness check: DNS first, then HTTPS, then plain HTTP.
#[derive(Clone)]
pub struct HealthProber {
    resolver: Arc<dyn HostResolver>,
    http: Arc<dyn HttpProbe>,
    timeout: Duration,
}

impl HealthProber {
    pub fn new(resolver: Arc<dyn HostResolver>, http: Arc<dyn HttpProbe>, timeout: Duration) -> Self {
        Self {
            resolver,
            http,
            timeout,
        }
    }

    /// Prober using the system resolver and a reqwest client.
    pub fn system(timeout: Duration) -> Result<Self> {
        Ok(Self::new(
            Arc::new(SystemResolver),
            Arc::new(ReqwestProbe::new(timeout)?),
            timeout,
        ))
    }

    /// Never fails: every problem ends up in the returned record.
    ///
    /// An unresolvable name stops the probe before any HTTP request. HTTPS
    /// is tried first and HTTP only if HTTPS fails; the first success sets
    /// protocol, status and latency (request start to response headers).
    pub async fn probe(&self, domain: &str) -> HealthRecord {
        let resolved = match timeout(self.timeout, self.resolver.resolve(domain)).await {
            Ok(resolved) => resolved,
            Err(_) => Err("lookup timed out".to_string()),
        };
        if let Err(reason) = resolved {
            debug!("DNS resolution failed for {}: {}", domain, reason);
            crate::metrics::increment_probes("dns_failure");
            return HealthRecord::offline(format!("DNS resolution failed: {}", reason));
        }

        for protocol in [Protocol::Https, Protocol::Http] {
            let url = format!("{}://{}", protocol.scheme(), domain);
            let start = Instant::now();
            match self.attempt(&url).await {
                Ok(status) => {
                    let elapsed = start.elapsed().as_millis() as u64;
                    crate::metrics::increment_probes(protocol.scheme());
                    return HealthRecord::online(protocol, status, elapsed);
                }
                Err(reason) => debug!("{} probe failed: {}", url, reason),
            }
        }

        crate::metrics::increment_probes("offline");
        HealthRecord::offline(NOT_RESPONDING)
    }

    async fn attempt(&self, url: &str) -> std::result::Result<u16, String> {
        match timeout(self.timeout, self.http.status(url)).await {
            Ok(result) => result,
            Err(_) => Err(format!("timed out after {:?}", self.timeout)),
        }
    }
}
