//! Per-client request limiting.
//!
//! Each client identity (the peer IP) gets a counter and a window that opens
//! at its first request. Every request increments the counter; once it passes
//! the limit the stage answers `429` until the window rolls over.
//!
//! The counters live behind [`RateLimitStore`]. [`MemoryStore`] keeps them in
//! sharded, mutex-guarded maps so increments for one identity are atomic and
//! unrelated identities rarely contend.

use std::collections::HashMap;
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{Flow, Stage};
use crate::error::Rejection;
use crate::request::{Request, RequestHead};
use crate::response::{IntoResponse, Response};

pub const DEFAULT_WINDOW: Duration = Duration::from_millis(900_000);
pub const DEFAULT_LIMIT: u32 = 100;

const SHARDS: usize = 16;

static RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
static RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
static RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

// ── Store ─────────────────────────────────────────────────────────────────────

/// State of one identity's window right after a hit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Hit {
    /// Requests counted in the current window, this one included.
    pub count: u32,
    pub reset_at: Instant,
}

/// Counter storage.
///
/// `hit` must be atomic per key: two concurrent hits for the same identity
/// always produce two distinct counts.
pub trait RateLimitStore: Send + Sync + 'static {
    /// Counts one request for `key` at `now`. Opens a fresh window when none
    /// exists or the previous one has ended.
    fn hit(&self, key: IpAddr, window: Duration, now: Instant) -> Hit;

    /// Drops windows that ended before `now`. Returns how many were dropped.
    fn sweep(&self, now: Instant) -> usize;
}

#[derive(Clone, Copy, Debug)]
struct Bucket {
    count: u32,
    reset_at: Instant,
}

/// In-process [`RateLimitStore`].
pub struct MemoryStore {
    shards: Vec<Mutex<HashMap<IpAddr, Bucket>>>,
    hasher: RandomState,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, key: &IpAddr) -> MutexGuard<'_, HashMap<IpAddr, Bucket>> {
        let idx = (self.hasher.hash_one(key) as usize) % self.shards.len();
        // Bucket updates are single assignments; a poisoned shard is still consistent.
        self.shards[idx].lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of identities currently tracked.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(|p| p.into_inner()).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts a task that sweeps expired windows every `every`. The task
    /// stops once the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(store) = store.upgrade() else { return };
                let swept = store.sweep(Instant::now());
                if swept > 0 {
                    debug!(swept, remaining = store.len(), "swept expired rate limit windows");
                }
            }
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitStore for MemoryStore {
    fn hit(&self, key: IpAddr, window: Duration, now: Instant) -> Hit {
        let mut shard = self.shard(&key);
        let bucket = shard.entry(key).or_insert(Bucket { count: 0, reset_at: now + window });
        if now >= bucket.reset_at {
            *bucket = Bucket { count: 0, reset_at: now + window };
        }
        bucket.count = bucket.count.saturating_add(1);
        Hit { count: bucket.count, reset_at: bucket.reset_at }
    }

    fn sweep(&self, now: Instant) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                let mut shard = shard.lock().unwrap_or_else(|p| p.into_inner());
                let before = shard.len();
                shard.retain(|_, bucket| bucket.reset_at > now);
                before - shard.len()
            })
            .sum()
    }
}

// ── Stage ─────────────────────────────────────────────────────────────────────

/// The limiter's verdict for one request, left in the request extensions so
/// the response can carry `RateLimit-*` headers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Quota {
    pub limit: u32,
    pub remaining: u32,
    /// Until the window rolls over.
    pub reset: Duration,
}

impl Quota {
    fn reset_secs(&self) -> u64 {
        // Round up so `0` never means "still limited".
        self.reset.as_secs() + u64::from(self.reset.subsec_nanos() > 0)
    }
}

pub struct RateLimit {
    store: Arc<dyn RateLimitStore>,
    limit: u32,
    window: Duration,
}

impl RateLimit {
    pub fn new(store: Arc<dyn RateLimitStore>, limit: u32, window: Duration) -> Self {
        Self { store, limit, window }
    }
}

impl Stage for RateLimit {
    fn name(&self) -> &'static str { "rate_limit" }

    fn on_request(&self, req: &mut Request) -> Flow {
        let now = Instant::now();
        let client = req.remote_addr().ip();
        let hit = self.store.hit(client, self.window, now);
        let quota = Quota {
            limit: self.limit,
            remaining: self.limit.saturating_sub(hit.count),
            reset: hit.reset_at.saturating_duration_since(now),
        };
        req.extensions_mut().insert(quota);

        if hit.count <= self.limit {
            return Flow::Continue;
        }

        warn!(%client, count = hit.count, limit = self.limit, "rate limit exceeded");
        let mut res = Rejection::RateLimited { limit: self.limit, retry_after: quota.reset }
            .into_response();
        res.headers_mut().insert(RETRY_AFTER, HeaderValue::from(quota.reset_secs()));
        Flow::Respond(res)
    }

    fn on_response(&self, head: &RequestHead, res: &mut Response) {
        let Some(quota) = head.extensions().get::<Quota>() else { return };
        let headers = res.headers_mut();
        headers.insert(RATELIMIT_LIMIT.clone(), HeaderValue::from(quota.limit));
        headers.insert(RATELIMIT_REMAINING.clone(), HeaderValue::from(quota.remaining));
        headers.insert(RATELIMIT_RESET.clone(), HeaderValue::from(quota.reset_secs()));
    }
}
