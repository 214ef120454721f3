use crate::errors::{Result, SentinelError};
use governor::{
    clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota,
    RateLimiter as KeyedLimiter,
};
use std::{net::IpAddr, num::NonZeroU32};
use tracing::debug;

type ClientBuckets = KeyedLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// Per-client token bucket. Each client starts with `burst` tokens and
/// regains `per_second` tokens every second, up to `burst`.
///
/// Owned by the serving layer's state; there is no process-wide instance.
pub struct RateLimiter {
    buckets: ClientBuckets,
}

impl RateLimiter {
    pub fn new(per_second: u32, burst: u32) -> Self {
        let quota = Quota::per_second(non_zero(per_second)).allow_burst(non_zero(burst));
        Self::with_quota(quota)
    }

    fn with_quota(quota: Quota) -> Self {
        Self {
            buckets: KeyedLimiter::keyed(quota),
        }
    }

    /// Takes one token for `client`, or fails with `RateLimited`.
    pub fn check(&self, client: IpAddr) -> Result<()> {
        self.buckets.check_key(&client).map_err(|_| {
            crate::metrics::increment_rate_limited();
            SentinelError::RateLimited
        })
    }

    /// Forgets clients whose bucket has refilled completely. A forgotten
    /// client comes back with a full bucket, which is what it had anyway.
    pub fn prune(&self) -> usize {
        let before = self.buckets.len();
        self.buckets.retain_recent();
        self.buckets.shrink_to_fit();
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            debug!("Pruned {} idle rate limit buckets", removed);
        }
        removed
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}

fn non_zero(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
}
