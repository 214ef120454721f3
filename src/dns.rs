use crate::{
    errors::{Result, SentinelError},
    lookup::DnsLookup,
    models::{DnsInfo, IpInfo, MxRecord, NsRecord},
};
use async_trait::async_trait;
use hickory_resolver::{
    config::{ResolverConfig, ResolverOpts},
    proto::rr::{RData, RecordType},
    TokioAsyncResolver,
};
use std::{net::IpAddr, time::Duration};
use tracing::debug;

/// DNS report builder on top of hickory's async resolver.
///
/// Only the forward lookup decides success. Reverse, MX, TXT, NS and CNAME
/// queries that fail leave their section empty.
pub struct DnsService {
    resolver: TokioAsyncResolver,
}

impl DnsService {
    pub fn new(timeout: Duration) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), opts),
        }
    }

    async fn addresses(&self, domain: &str) -> Result<Vec<IpAddr>> {
        let found = self
            .resolver
            .lookup_ip(domain)
            .await
            .map_err(|e| SentinelError::Dns(e.to_string()))?;
        Ok(found.iter().collect())
    }

    async fn reverse(&self, ip: IpAddr) -> Vec<String> {
        match self.resolver.reverse_lookup(ip).await {
            Ok(names) => names.iter().map(|name| trim_root(&name.to_string())).collect(),
            Err(e) => {
                debug!("Reverse lookup for {} failed: {}", ip, e);
                Vec::new()
            }
        }
    }

    async fn mx(&self, domain: &str) -> Vec<MxRecord> {
        match self.resolver.mx_lookup(domain).await {
            Ok(records) => records
                .iter()
                .map(|mx| MxRecord {
                    host: trim_root(&mx.exchange().to_string()),
                    priority: mx.preference(),
                })
                .collect(),
            Err(e) => {
                debug!("MX lookup for {} failed: {}", domain, e);
                Vec::new()
            }
        }
    }

    async fn txt(&self, domain: &str) -> Vec<String> {
        match self.resolver.txt_lookup(domain).await {
            Ok(records) => records
                .iter()
                .map(|txt| {
                    txt.txt_data()
                        .iter()
                        .map(|chunk| String::from_utf8_lossy(chunk))
                        .collect::<String>()
                })
                .collect(),
            Err(e) => {
                debug!("TXT lookup for {} failed: {}", domain, e);
                Vec::new()
            }
        }
    }

    async fn ns(&self, domain: &str) -> Vec<NsRecord> {
        let hosts: Vec<String> = match self.resolver.ns_lookup(domain).await {
            Ok(records) => records.iter().map(|ns| trim_root(&ns.to_string())).collect(),
            Err(e) => {
                debug!("NS lookup for {} failed: {}", domain, e);
                return Vec::new();
            }
        };

        let mut records = Vec::with_capacity(hosts.len());
        for host in hosts {
            let ips = match self.resolver.lookup_ip(host.as_str()).await {
                Ok(found) => found.iter().map(|ip| ip.to_string()).collect(),
                Err(_) => Vec::new(),
            };
            records.push(NsRecord { host, ips });
        }
        records
    }

    async fn cnames(&self, domain: &str) -> Vec<String> {
        match self.resolver.lookup(domain, RecordType::CNAME).await {
            Ok(answer) => answer
                .iter()
                .filter_map(|rdata| match rdata {
                    RData::CNAME(target) => Some(trim_root(&target.to_string())),
                    _ => None,
                })
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl DnsLookup for DnsService {
    async fn lookup(&self, domain: &str) -> Result<DnsInfo> {
        let addresses = self.addresses(domain).await?;

        let mut ip_addresses = Vec::with_capacity(addresses.len());
        for ip in addresses {
            ip_addresses.push(IpInfo {
                address: ip.to_string(),
                version: if ip.is_ipv4() { 4 } else { 6 },
                reverse: self.reverse(ip).await,
            });
        }

        let (mx_records, txt_records, ns_records, cnames) = tokio::join!(
            self.mx(domain),
            self.txt(domain),
            self.ns(domain),
            self.cnames(domain)
        );

        Ok(DnsInfo {
            domain: domain.to_string(),
            ip_addresses,
            mx_records,
            txt_records,
            ns_records,
            cnames,
            error: None,
        })
    }
}

fn trim_root(name: &str) -> String {
    name.trim_end_matches('.').to_string()
}
