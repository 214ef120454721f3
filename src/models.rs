use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A domain observed in the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub name: String,
    pub tld: String,
    pub created_at: DateTime<Utc>,
    pub health: HealthRecord,
}

impl Domain {
    pub fn new(name: impl Into<String>, tld: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            tld: tld.into(),
            created_at,
            health: HealthRecord::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

/// Outcome of one liveness probe. The default value is the record of a
/// domain that has not been probed yet: offline, no protocol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub is_online: bool,
    pub protocol: Option<Protocol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthRecord {
    pub fn online(protocol: Protocol, status_code: u16, response_time_ms: u64) -> Self {
        Self {
            is_online: true,
            protocol: Some(protocol),
            status_code: Some(status_code),
            response_time_ms: Some(response_time_ms),
            error: None,
        }
    }

    pub fn offline(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainStats {
    pub total_domains: usize,
    pub domains_per_tld: HashMap<String, usize>,
    pub last_update_time: Option<DateTime<Utc>>,
}

impl DomainStats {
    pub fn compute(domains: &[Domain], last_update_time: DateTime<Utc>) -> Self {
        let mut domains_per_tld = HashMap::new();
        for domain in domains {
            *domains_per_tld.entry(domain.tld.clone()).or_insert(0) += 1;
        }

        Self {
            total_domains: domains.len(),
            domains_per_tld,
            last_update_time: Some(last_update_time),
        }
    }
}

/// One page of a filtered domain listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainPage {
    pub domains: Vec<Domain>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WhoisInfo {
    pub domain_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registrar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(rename = "nameservers", skip_serializing_if = "Vec::is_empty", default)]
    pub name_servers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub status: Vec<String>,
    #[serde(default)]
    pub dnssec: bool,
    #[serde(skip_serializing_if = "Contact::is_empty", default)]
    pub registrant: Contact,
    #[serde(skip_serializing_if = "Contact::is_empty", default)]
    pub administrative: Contact,
    #[serde(skip_serializing_if = "Contact::is_empty", default)]
    pub technical: Contact,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WhoisInfo {
    pub fn failed(domain: &str, error: impl Into<String>) -> Self {
        Self {
            domain_name: domain.to_string(),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Contact {
    pub fn is_empty(&self) -> bool {
        self == &Contact::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DnsInfo {
    pub domain: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub ip_addresses: Vec<IpInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub mx_records: Vec<MxRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub txt_records: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub ns_records: Vec<NsRecord>,
    #[serde(rename = "cnames", skip_serializing_if = "Vec::is_empty", default)]
    pub cnames: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DnsInfo {
    pub fn failed(domain: &str, error: impl Into<String>) -> Self {
        Self {
            domain: domain.to_string(),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpInfo {
    pub address: String,
    pub version: u8, // 4 or 6
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub reverse: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MxRecord {
    pub host: String,
    pub priority: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NsRecord {
    pub host: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub ips: Vec<String>,
}

/// Aggregated look-alike registrations for one monitored target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityData {
    pub target_domain: String,
    pub count: usize,
    pub examples: Vec<String>,
    pub similarity: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unprobed_domain_is_offline() {
        let domain = Domain::new("example.com", "com", Utc::now());
        assert!(!domain.health.is_online);
        assert!(domain.health.protocol.is_none());
    }

    #[test]
    fn test_stats_count_per_tld() {
        let now = Utc::now();
        let domains = vec![
            Domain::new("a.com", "com", now),
            Domain::new("b.com", "com", now),
            Domain::new("c.org", "org", now),
        ];
        let stats = DomainStats::compute(&domains, now);
        assert_eq!(stats.total_domains, 3);
        assert_eq!(stats.domains_per_tld["com"], 2);
        assert_eq!(stats.domains_per_tld["org"], 1);
        assert_eq!(stats.last_update_time, Some(now));
    }

    #[test]
    fn test_protocol_serializes_lowercase() {
        let record = HealthRecord::online(Protocol::Https, 200, 12);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["protocol"], "https");
        assert_eq!(json["status_code"], 200);
        assert!(json.get("error").is_none());
    }
}
