use crate::{
    config::Config,
    errors::{Result, SentinelError},
    lookup::WhoisLookup,
    models::WhoisInfo,
    parser::WhoisParser,
};
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::{RwLock, Semaphore},
    time::timeout,
};
use tracing::{debug, info, warn};

const WHOIS_PORT: u16 = 43;
const IANA_WHOIS: &str = "whois.iana.org";
const READ_CHUNK: usize = 8192;

/// WHOIS client speaking the port-43 text protocol.
///
/// The authoritative server for a TLD is found by asking IANA, falling back
/// to the usual `whois.nic.<tld>` style names, and remembered for the life
/// of the service. Registrar referrals in a response are followed up to
/// `max_referrals` hops.
pub struct WhoisService {
    config: Arc<Config>,
    parser: WhoisParser,
    tld_servers: RwLock<HashMap<String, String>>,
    query_permits: Semaphore,
    discovery_permits: Semaphore,
}

/// Raw response together with the server that produced it.
#[derive(Debug, Clone)]
pub struct RawWhois {
    pub server: String,
    pub text: String,
}

impl WhoisService {
    pub fn new(config: Arc<Config>) -> Self {
        let permits = config.concurrent_whois_queries.max(1);
        info!("WhoisService initialized ({} concurrent queries)", permits);
        Self {
            parser: WhoisParser::new(),
            tld_servers: RwLock::new(HashMap::new()),
            query_permits: Semaphore::new(permits),
            discovery_permits: Semaphore::new(permits * 2),
            config,
        }
    }

    /// Fetches the raw registration text for `domain`, following referrals.
    pub async fn fetch_raw(&self, domain: &str) -> Result<RawWhois> {
        let domain = domain.trim().trim_end_matches('.').to_lowercase();
        let tld = match domain.rsplit_once('.') {
            Some((head, tld)) if !head.is_empty() && !tld.is_empty() => tld.to_string(),
            _ => return Err(SentinelError::InvalidDomain(domain)),
        };

        let server = self.server_for_tld(&tld).await?;
        let text = self.query(&server, &domain).await?;
        Ok(self.follow_referrals(server, text, &domain).await)
    }

    async fn server_for_tld(&self, tld: &str) -> Result<String> {
        if let Some(server) = self.tld_servers.read().await.get(tld) {
            return Ok(server.clone());
        }

        let server = self
            .discover_server(tld)
            .await
            .ok_or_else(|| SentinelError::UnsupportedTld(tld.to_string()))?;

        self.tld_servers
            .write()
            .await
            .insert(tld.to_string(), server.clone());
        Ok(server)
    }

    async fn discover_server(&self, tld: &str) -> Option<String> {
        debug!("Discovering whois server for TLD: {}", tld);

        match self.discovery_query(IANA_WHOIS, tld).await {
            Ok(response) => {
                if let Some(server) = referral_server(&response) {
                    info!("Discovered whois server via IANA for {}: {}", tld, server);
                    return Some(server);
                }
                debug!("IANA response for {} named no whois server", tld);
            }
            Err(e) => debug!("IANA query for {} failed: {}", tld, e),
        }

        for candidate in candidate_servers(tld) {
            if self.reachable(&candidate).await {
                info!("Discovered whois server by convention for {}: {}", tld, candidate);
                return Some(candidate);
            }
        }

        warn!("Could not discover whois server for TLD: {}", tld);
        None
    }

    async fn reachable(&self, server: &str) -> bool {
        let limit = Duration::from_secs(self.config.discovery_timeout_seconds.min(10));
        matches!(
            timeout(limit, TcpStream::connect((server, WHOIS_PORT))).await,
            Ok(Ok(_))
        )
    }

    async fn query(&self, server: &str, query: &str) -> Result<String> {
        let _permit = self
            .query_permits
            .acquire()
            .await
            .map_err(|_| SentinelError::Internal("whois semaphore closed".to_string()))?;
        self.exchange(server, query).await
    }

    async fn discovery_query(&self, server: &str, query: &str) -> Result<String> {
        let _permit = self
            .discovery_permits
            .acquire()
            .await
            .map_err(|_| SentinelError::Internal("discovery semaphore closed".to_string()))?;
        self.exchange(server, query).await
    }

    async fn exchange(&self, server: &str, query: &str) -> Result<String> {
        let limit = Duration::from_secs(self.config.whois_timeout_seconds);

        let mut stream = timeout(limit, TcpStream::connect((server, WHOIS_PORT))).await??;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }
        stream.write_all(format!("{}\r\n", query).as_bytes()).await?;

        let mut response = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = timeout(limit, stream.read(&mut chunk)).await??;
            if n == 0 {
                break;
            }
            response.extend_from_slice(&chunk[..n]);
            if response.len() > self.config.max_response_size {
                return Err(SentinelError::ResponseTooLarge);
            }
        }

        String::from_utf8(response).map_err(|_| SentinelError::InvalidUtf8)
    }

    /// Follows registry-to-registrar referrals. A failing referral keeps the
    /// last good answer rather than failing the lookup.
    async fn follow_referrals(&self, mut server: String, mut text: String, domain: &str) -> RawWhois {
        for _ in 0..self.config.max_referrals {
            let Some(next) = referral_server(&text) else {
                break;
            };
            if next.eq_ignore_ascii_case(&server) {
                break;
            }

            debug!("Following referral from {} to {}", server, next);
            match self.query(&next, domain).await {
                Ok(answer) => {
                    server = next;
                    text = answer;
                }
                Err(e) => {
                    warn!("Failed to query referral server {}: {}", next, e);
                    break;
                }
            }
        }
        RawWhois { server, text }
    }
}

#[async_trait]
impl WhoisLookup for WhoisService {
    async fn lookup(&self, domain: &str) -> Result<WhoisInfo> {
        let raw = self.fetch_raw(domain).await?;
        debug!("WHOIS answer for {} from {} ({} bytes)", domain, raw.server, raw.text.len());
        self.parser.parse(domain, &raw.text)
    }
}

/// Server named by a `whois:`, `refer:` or `Registrar WHOIS Server:` line.
fn referral_server(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let (key, value) = line.trim().split_once(':')?;
        let key = key.trim().to_lowercase();
        let value = value.trim();
        let is_referral = key == "refer" || key == "whois" || (key.contains("whois") && key.contains("server"));
        if is_referral && !value.is_empty() {
            Some(strip_scheme(value).to_string())
        } else {
            None
        }
    })
}

fn strip_scheme(server: &str) -> &str {
    server
        .trim_start_matches("whois://")
        .trim_start_matches("rwhois://")
        .trim_end_matches('/')
}

fn candidate_servers(tld: &str) -> Vec<String> {
    let mut candidates = vec![format!("whois.nic.{}", tld), format!("whois.{}", tld)];
    if tld.len() == 2 {
        candidates.push(format!("whois.domain.{}", tld));
        candidates.push(format!("whois.dns.{}", tld));
    }
    candidates.push(format!("whois.registry.{}", tld));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referral_from_iana_answer() {
        let answer = "% IANA WHOIS server\n\ndomain:       COM\nwhois:        whois.verisign-grs.com\nstatus:       ACTIVE\n";
        assert_eq!(referral_server(answer).as_deref(), Some("whois.verisign-grs.com"));
    }

    #[test]
    fn test_referral_from_registry_answer() {
        let answer = "   Domain Name: EXAMPLE.COM\n   Registrar WHOIS Server: whois.markmonitor.com\n";
        assert_eq!(referral_server(answer).as_deref(), Some("whois.markmonitor.com"));
    }

    #[test]
    fn test_referral_strips_scheme() {
        assert_eq!(
            referral_server("refer: whois://whois.example.net/").as_deref(),
            Some("whois.example.net")
        );
    }

    #[test]
    fn test_no_referral() {
        assert!(referral_server("Domain Name: EXAMPLE.COM\nRegistrar WHOIS Server:\n").is_none());
    }

    #[test]
    fn test_candidates_for_cctld() {
        let candidates = candidate_servers("de");
        assert_eq!(candidates[0], "whois.nic.de");
        assert!(candidates.contains(&"whois.dns.de".to_string()));
        assert_eq!(candidate_servers("shop").len(), 3);
    }

    #[tokio::test]
    async fn test_rejects_names_without_tld() {
        let service = WhoisService::new(Arc::new(Config::default()));
        assert!(matches!(
            service.fetch_raw("localhost").await,
            Err(SentinelError::InvalidDomain(_))
        ));
    }
}
