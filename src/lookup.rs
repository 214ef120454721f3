use crate::{
    cache::TtlCache,
    config::Config,
    errors::{Result, SentinelError},
    models::{DnsInfo, WhoisInfo},
};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

#[async_trait]
pub trait WhoisLookup: Send + Sync {
    async fn lookup(&self, domain: &str) -> Result<WhoisInfo>;
}

#[async_trait]
pub trait DnsLookup: Send + Sync {
    async fn lookup(&self, domain: &str) -> Result<DnsInfo>;
}

/// What the lookup cache stores. WHOIS and DNS share one cache with
/// namespaced keys.
#[derive(Debug, Clone)]
pub enum CachedLookup {
    Whois(WhoisInfo),
    Dns(DnsInfo),
}

/// On-demand WHOIS and DNS lookups memoized for the cache TTL.
///
/// Failed lookups are cached too, as records carrying an `error`, so a
/// broken domain is not re-queried on every request.
pub struct LookupService {
    cache: TtlCache<String, CachedLookup>,
    whois: Arc<dyn WhoisLookup>,
    dns: Arc<dyn DnsLookup>,
}

impl LookupService {
    pub fn new(
        whois: Arc<dyn WhoisLookup>,
        dns: Arc<dyn DnsLookup>,
        ttl: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            cache: TtlCache::new(ttl, sweep_interval),
            whois,
            dns,
        }
    }

    pub fn from_config(config: &Config, whois: Arc<dyn WhoisLookup>, dns: Arc<dyn DnsLookup>) -> Self {
        Self::new(whois, dns, config.cache_ttl(), config.cache_sweep_interval())
    }

    /// Returns the WHOIS record and whether it came from the cache.
    pub async fn whois(&self, domain: &str) -> Result<(WhoisInfo, bool)> {
        let domain = normalize_domain(domain)?;
        let key = format!("whois:{}", domain);

        if let Some(CachedLookup::Whois(info)) = self.cache.get(&key).await {
            debug!("WHOIS cache hit for {}", domain);
            crate::metrics::increment_cache_hits("whois");
            return Ok((info, true));
        }
        crate::metrics::increment_cache_misses("whois");

        let info = match self.whois.lookup(&domain).await {
            Ok(info) => info,
            Err(e) => {
                warn!("WHOIS lookup for {} failed: {}", domain, e);
                WhoisInfo::failed(&domain, whois_error(e))
            }
        };

        self.cache.set(key, CachedLookup::Whois(info.clone())).await;
        Ok((info, false))
    }

    /// Returns the DNS report and whether it came from the cache.
    pub async fn dns(&self, domain: &str) -> Result<(DnsInfo, bool)> {
        let domain = normalize_domain(domain)?;
        let key = format!("dns:{}", domain);

        if let Some(CachedLookup::Dns(info)) = self.cache.get(&key).await {
            debug!("DNS cache hit for {}", domain);
            crate::metrics::increment_cache_hits("dns");
            return Ok((info, true));
        }
        crate::metrics::increment_cache_misses("dns");

        let info = match self.dns.lookup(&domain).await {
            Ok(info) => info,
            Err(e) => {
                warn!("DNS lookup for {} failed: {}", domain, e);
                DnsInfo::failed(&domain, format!("DNS lookup failed: {}", dns_reason(e)))
            }
        };

        self.cache.set(key, CachedLookup::Dns(info.clone())).await;
        Ok((info, false))
    }
}

/// Trims, lower-cases and drops a trailing root dot.
pub fn normalize_domain(domain: &str) -> Result<String> {
    let normalized = domain.trim().trim_end_matches('.').to_lowercase();
    if normalized.is_empty() {
        return Err(SentinelError::InvalidDomain("Empty domain".to_string()));
    }
    if !normalized.contains('.') || normalized.starts_with('.') {
        return Err(SentinelError::InvalidDomain(normalized));
    }
    Ok(normalized)
}

fn whois_error(error: SentinelError) -> String {
    match error {
        // Parser errors already carry their own prefix
        SentinelError::Whois(message) if message.starts_with("WHOIS parsing failed") => message,
        SentinelError::Whois(message) => format!("WHOIS lookup failed: {}", message),
        other => format!("WHOIS lookup failed: {}", other),
    }
}

fn dns_reason(error: SentinelError) -> String {
    match error {
        SentinelError::Dns(message) => message,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingWhois {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WhoisLookup for CountingWhois {
        async fn lookup(&self, domain: &str) -> Result<WhoisInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if domain.ends_with(".invalid") {
                return Err(SentinelError::UnsupportedTld("invalid".to_string()));
            }
            Ok(WhoisInfo {
                domain_name: domain.to_string(),
                registrar: Some("Example Registrar".to_string()),
                ..WhoisInfo::default()
            })
        }
    }

    #[derive(Default)]
    struct CountingDns {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DnsLookup for CountingDns {
        async fn lookup(&self, domain: &str) -> Result<DnsInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SentinelError::Dns(format!("no record found for {}", domain)))
        }
    }

    fn service(whois: Arc<CountingWhois>, dns: Arc<CountingDns>) -> LookupService {
        LookupService::new(whois, dns, Duration::from_secs(900), Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn test_whois_hit_within_ttl() {
        let whois = Arc::new(CountingWhois::default());
        let service = service(whois.clone(), Arc::new(CountingDns::default()));

        let (first, hit) = service.whois("Example.COM").await.unwrap();
        assert!(!hit);
        assert_eq!(first.domain_name, "example.com");

        tokio::time::advance(Duration::from_secs(600)).await;
        let (second, hit) = service.whois("example.com").await.unwrap();
        assert!(hit);
        assert_eq!(second, first);
        assert_eq!(whois.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(301)).await;
        let (_, hit) = service.whois("example.com").await.unwrap();
        assert!(!hit);
        assert_eq!(whois.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_lookup_is_cached_as_error_record() {
        let whois = Arc::new(CountingWhois::default());
        let service = service(whois.clone(), Arc::new(CountingDns::default()));

        let (info, hit) = service.whois("nothing.invalid").await.unwrap();
        assert!(!hit);
        assert!(info.error.as_deref().unwrap().starts_with("WHOIS lookup failed:"));

        let (again, hit) = service.whois("nothing.invalid").await.unwrap();
        assert!(hit);
        assert_eq!(again, info);
        assert_eq!(whois.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dns_and_whois_keys_are_separate() {
        let whois = Arc::new(CountingWhois::default());
        let dns = Arc::new(CountingDns::default());
        let service = service(whois.clone(), dns.clone());

        service.whois("example.com").await.unwrap();
        let (info, hit) = service.dns("example.com").await.unwrap();
        assert!(!hit);
        assert_eq!(
            info.error.as_deref(),
            Some("DNS lookup failed: no record found for example.com")
        );
        assert_eq!(dns.calls.load(Ordering::SeqCst), 1);

        let (_, hit) = service.dns("example.com").await.unwrap();
        assert!(hit);
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let service = service(Arc::new(CountingWhois::default()), Arc::new(CountingDns::default()));
        assert!(matches!(service.whois("   ").await, Err(SentinelError::InvalidDomain(_))));
        assert!(matches!(service.dns("localhost").await, Err(SentinelError::InvalidDomain(_))));
    }

    #[test]
    fn test_parse_failure_keeps_its_message() {
        let message = whois_error(SentinelError::Whois(
            "WHOIS parsing failed: domain is not registered".to_string(),
        ));
        assert_eq!(message, "WHOIS parsing failed: domain is not registered");
    }
}
