use crate::models::{Domain, DomainPage, DomainStats, HealthRecord};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 100;

#[derive(Debug, Default)]
struct DatasetState {
    domains: Vec<Domain>,
    stats: DomainStats,
}

impl DatasetState {
    fn refresh_stats(&mut self, now: DateTime<Utc>) {
        self.stats = DomainStats::compute(&self.domains, now);
    }
}

/// The current domain list and its statistics behind one reader/writer
/// lock. Every write replaces both together, so readers always see a list
/// and the statistics computed from that same list.
#[derive(Debug, Default)]
pub struct SharedDataset {
    state: RwLock<DatasetState>,
}

impl SharedDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swaps in a freshly fetched list. Domains missing from it are gone.
    pub async fn replace_domains(&self, domains: Vec<Domain>) {
        let mut state = self.state.write().await;
        state.domains = domains;
        state.refresh_stats(Utc::now());
        debug!("Dataset replaced with {} domains", state.domains.len());
    }

    pub async fn domain_names(&self) -> Vec<String> {
        let state = self.state.read().await;
        state.domains.iter().map(|d| d.name.clone()).collect()
    }

    /// Overwrites the health of every listed domain found by name and
    /// returns how many were updated. Domains without an entry keep their
    /// previous record; entries for unknown domains are ignored.
    pub async fn merge_health(&self, mut batch: HashMap<String, HealthRecord>) -> usize {
        let mut state = self.state.write().await;
        let mut updated = 0;
        for domain in state.domains.iter_mut() {
            if let Some(health) = batch.remove(&domain.name) {
                domain.health = health;
                updated += 1;
            }
        }
        state.refresh_stats(Utc::now());

        if !batch.is_empty() {
            debug!("Skipped health for {} domains no longer listed", batch.len());
        }
        updated
    }

    /// Substring-filtered page. `page` starts at 1; out-of-range values are
    /// clamped the way the listing endpoint expects.
    pub async fn page(&self, search: Option<&str>, page: usize, limit: usize) -> DomainPage {
        let page = page.max(1);
        let limit = if (1..=MAX_PAGE_LIMIT).contains(&limit) {
            limit
        } else {
            DEFAULT_PAGE_LIMIT
        };
        let search = search.filter(|s| !s.is_empty());

        let state = self.state.read().await;
        let filtered: Vec<&Domain> = state
            .domains
            .iter()
            .filter(|d| search.map_or(true, |s| d.name.contains(s)))
            .collect();

        let total = filtered.len();
        let domains = filtered
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .cloned()
            .collect();

        DomainPage {
            domains,
            total,
            page,
            limit,
        }
    }

    pub async fn stats(&self) -> DomainStats {
        self.state.read().await.stats.clone()
    }

    /// List and statistics taken under one read guard.
    pub async fn snapshot(&self) -> (Vec<Domain>, DomainStats) {
        let state = self.state.read().await;
        (state.domains.clone(), state.stats.clone())
    }

    /// Domains first seen after `since`.
    pub async fn recent(&self, since: DateTime<Utc>) -> Vec<Domain> {
        let state = self.state.read().await;
        state
            .domains
            .iter()
            .filter(|d| d.created_at > since)
            .cloned()
            .collect()
    }

    /// Distinct top-level labels, sorted.
    pub async fn labels(&self) -> Vec<String> {
        let state = self.state.read().await;
        state
            .domains
            .iter()
            .map(|d| d.tld.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub async fn by_label(&self, tld: &str) -> Vec<Domain> {
        let state = self.state.read().await;
        state
            .domains
            .iter()
            .filter(|d| d.tld == tld)
            .cloned()
            .collect()
    }
}
