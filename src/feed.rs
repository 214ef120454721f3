use crate::{
    errors::{Result, SentinelError},
    models::Domain,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{collections::HashSet, time::Duration};
use tracing::debug;

/// Source of the plain-text domain list, one name per line.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> Result<String>;
}

pub struct HttpFeed {
    client: reqwest::Client,
    url: String,
}

impl HttpFeed {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("DomainSentinel/1.0")
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl FeedSource for HttpFeed {
    async fn fetch(&self) -> Result<String> {
        debug!("Fetching domain feed from {}", self.url);
        let response = self
            .client
            .get(&self.url)
            .header("Accept", "text/plain")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SentinelError::Feed(format!(
                "feed fetch failed with status: {}",
                response.status()
            )));
        }

        Ok(response.text().await?)
    }
}

/// Parses feed text into domains first seen at `seen_at`.
///
/// Blank lines and names without a label separator are dropped silently.
/// A name repeated in the same feed is kept once.
pub fn parse_domains(data: &str, seen_at: DateTime<Utc>) -> Vec<Domain> {
    let mut seen = HashSet::new();
    data.lines()
        .filter_map(|line| parse_line(line, seen_at))
        .filter(|domain| seen.insert(domain.name.clone()))
        .collect()
}

fn parse_line(line: &str, seen_at: DateTime<Utc>) -> Option<Domain> {
    let name = line.trim();
    let (head, tld) = name.rsplit_once('.')?;
    if head.is_empty() || tld.is_empty() {
        return None;
    }
    Some(Domain::new(name, tld, seen_at))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_is_text_after_last_dot() {
        let domains = parse_domains("example.com\nshop.example.co.uk\n", Utc::now());
        assert_eq!(domains.len(), 2);
        assert_eq!(domains[0].name, "example.com");
        assert_eq!(domains[0].tld, "com");
        assert_eq!(domains[1].tld, "uk");
    }

    #[test]
    fn test_malformed_and_empty_lines_dropped() {
        let data = "localhost\n\n   \nexample.org\n.com\nbroken.\n";
        let domains = parse_domains(data, Utc::now());
        let names: Vec<_> = domains.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["example.org"]);
    }

    #[test]
    fn test_whitespace_and_crlf_trimmed() {
        let domains = parse_domains("  padded.net \r\nother.io\r\n", Utc::now());
        assert_eq!(domains[0].name, "padded.net");
        assert_eq!(domains[1].name, "other.io");
    }

    #[test]
    fn test_duplicates_kept_once() {
        let domains = parse_domains("a.com\nb.com\na.com\n", Utc::now());
        assert_eq!(domains.len(), 2);
    }

    #[test]
    fn test_parsed_domains_start_unprobed() {
        let now = Utc::now();
        let domains = parse_domains("fresh.dev", now);
        assert_eq!(domains[0].created_at, now);
        assert!(!domains[0].health.is_online);
    }
}
