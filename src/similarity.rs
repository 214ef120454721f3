use crate::{
    errors::{Result, SentinelError},
    models::SimilarityData,
};
use async_trait::async_trait;
use moka::future::Cache;
use once_cell::sync::Lazy;
use regex::Regex;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{debug, info};

const MAX_TARGETS: usize = 10;
const MAX_EXAMPLES: usize = 3;

static SIMILARITY_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(.*?) -> (.*?) \(([\d.]+)%\)").expect("similarity line pattern compiles")
});

/// Source of the raw similarity report for one threshold.
#[async_trait]
pub trait SimilaritySource: Send + Sync {
    async fn fetch(&self, threshold: &str) -> Result<String>;
}

/// Fetches `similarity_<threshold>.txt` from the monitoring repository.
pub struct HttpSimilaritySource {
    client: reqwest::Client,
    url_template: String,
}

impl HttpSimilaritySource {
    pub fn new(url_template: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("DomainSentinel/1.0")
            .build()?;
        Ok(Self {
            client,
            url_template: url_template.into(),
        })
    }
}

#[async_trait]
impl SimilaritySource for HttpSimilaritySource {
    async fn fetch(&self, threshold: &str) -> Result<String> {
        let url = self.url_template.replace("{threshold}", threshold);
        debug!("Fetching similarity data from {}", url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "text/plain")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SentinelError::Feed(format!(
                "unexpected status code: {}",
                response.status().as_u16()
            )));
        }
        Ok(response.text().await?)
    }
}

/// Top look-alike targets per threshold, cached for an hour.
pub struct SimilarityService {
    source: Arc<dyn SimilaritySource>,
    cache: Cache<String, Arc<Vec<SimilarityData>>>,
}

impl SimilarityService {
    pub fn new(source: Arc<dyn SimilaritySource>, ttl: Duration) -> Self {
        let cache = Cache::builder().max_capacity(64).time_to_live(ttl).build();
        Self { source, cache }
    }

    pub async fn report(&self, threshold: &str) -> Result<Arc<Vec<SimilarityData>>> {
        validate_threshold(threshold)?;

        if let Some(cached) = self.cache.get(threshold).await {
            debug!("Similarity cache hit for threshold {}", threshold);
            return Ok(cached);
        }

        let text = self.source.fetch(threshold).await?;
        let report = Arc::new(aggregate(&text)?);
        info!(
            "Similarity report for threshold {} has {} targets",
            threshold,
            report.len()
        );

        self.cache.insert(threshold.to_string(), report.clone()).await;
        Ok(report)
    }
}

/// Thresholds end up in a URL, so only digits and dots are accepted.
fn validate_threshold(threshold: &str) -> Result<()> {
    if threshold.is_empty() || !threshold.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(SentinelError::InvalidThreshold(threshold.to_string()));
    }
    Ok(())
}

/// Groups `<new> -> <target> (<pct>%)` lines by target, busiest first.
pub fn aggregate(text: &str) -> Result<Vec<SimilarityData>> {
    let mut by_target: HashMap<String, SimilarityData> = HashMap::new();

    for line in text.lines() {
        let Some(caps) = SIMILARITY_LINE.captures(line) else {
            continue;
        };
        let new_domain = caps[1].trim();
        let target = caps[2].trim();
        let similarity = caps[3].parse::<f64>().unwrap_or(0.0);

        let entry = by_target
            .entry(target.to_string())
            .or_insert_with(|| SimilarityData {
                target_domain: target.to_string(),
                count: 0,
                examples: Vec::with_capacity(MAX_EXAMPLES),
                similarity,
            });
        entry.count += 1;
        if entry.examples.len() < MAX_EXAMPLES {
            entry.examples.push(new_domain.to_string());
        }
    }

    if by_target.is_empty() {
        return Err(SentinelError::NoSimilarityData);
    }

    let mut report: Vec<SimilarityData> = by_target.into_values().collect();
    report.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.target_domain.cmp(&b.target_domain))
    });
    report.truncate(MAX_TARGETS);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSource {
        body: String,
        fetches: AtomicUsize,
    }

    impl StubSource {
        fn new(body: &str) -> Arc<Self> {
            Arc::new(Self {
                body: body.to_string(),
                fetches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SimilaritySource for StubSource {
        async fn fetch(&self, _threshold: &str) -> Result<String> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.body.clone())
        }
    }

    const REPORT: &str = "\
g00gle.com -> google.com (91.5%)
gooogle.net -> google.com (90.0%)
googel.org -> google.com (88.2%)
google-login.xyz -> google.com (85.0%)
appie.com -> apple.com (92.0%)
# generated 2025-01-01
not a match line
";

    #[test]
    fn test_aggregate_groups_by_target() {
        let report = aggregate(REPORT).unwrap();
        assert_eq!(report.len(), 2);

        let google = &report[0];
        assert_eq!(google.target_domain, "google.com");
        assert_eq!(google.count, 4);
        assert_eq!(google.examples, vec!["g00gle.com", "gooogle.net", "googel.org"]);
        assert_eq!(google.similarity, 91.5);

        assert_eq!(report[1].target_domain, "apple.com");
        assert_eq!(report[1].count, 1);
    }

    #[test]
    fn test_aggregate_keeps_top_ten() {
        let text: String = (0..15)
            .flat_map(|t| (0..=t).map(move |i| format!("x{}-{}.com -> target{}.com (80.0%)\n", i, t, t)))
            .collect();
        let report = aggregate(&text).unwrap();
        assert_eq!(report.len(), 10);
        assert_eq!(report[0].target_domain, "target14.com");
        assert_eq!(report[9].target_domain, "target5.com");
    }

    #[test]
    fn test_no_matching_lines() {
        assert!(matches!(aggregate("nothing here\n"), Err(SentinelError::NoSimilarityData)));
    }

    #[test]
    fn test_threshold_validation() {
        assert!(validate_threshold("0.85").is_ok());
        assert!(validate_threshold("90").is_ok());
        assert!(validate_threshold("").is_err());
        assert!(validate_threshold("../etc").is_err());
    }

    #[tokio::test]
    async fn test_report_cached_within_ttl() {
        let source = StubSource::new(REPORT);
        let service = SimilarityService::new(source.clone(), Duration::from_secs(3600));

        let first = service.report("0.85").await.unwrap();
        let second = service.report("0.85").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        service.report("0.90").await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_report_refetched_after_ttl() {
        let source = StubSource::new(REPORT);
        let service = SimilarityService::new(source.clone(), Duration::from_millis(50));

        service.report("0.85").await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        service.report("0.85").await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalid_threshold_never_fetches() {
        let source = StubSource::new(REPORT);
        let service = SimilarityService::new(source.clone(), Duration::from_secs(3600));
        assert!(matches!(
            service.report("1;rm").await,
            Err(SentinelError::InvalidThreshold(_))
        ));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }
}
