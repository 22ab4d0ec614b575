use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use http::Method;
use lru::LruCache;
use tracing::debug;

use crate::breaker::{Breaker, BreakerConfig};

/// Identity of a circuit breaker: the request method and target host
/// (with port when present). Path and query never enter the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BreakerKey {
    method: Method,
    host: String,
}

impl BreakerKey {
    /// A key for the given method and host (include the port when the
    /// target carries one).
    pub fn new(method: Method, host: impl Into<String>) -> Self {
        Self {
            method,
            host: host.into(),
        }
    }

    pub(crate) fn from_request<B>(req: &http::Request<B>) -> Self {
        let host = req
            .uri()
            .authority()
            .map(|a| a.as_str().to_string())
            .unwrap_or_default();
        Self {
            method: req.method().clone(),
            host,
        }
    }
}

impl fmt::Display for BreakerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.host)
    }
}

struct Entry {
    breaker: Arc<Breaker>,
    last_used: Instant,
}

/// Keyed breaker store bounded by an LRU cap and an idle TTL.
///
/// Lookup touches the entry (promoting it in the LRU order and stamping
/// `last_used`); inserts first sweep idle entries off the cold tail.
/// Touch and insert share one lock region so the map and the recency
/// order can never diverge.
pub(crate) struct BreakerRegistry {
    entries: Mutex<LruCache<BreakerKey, Entry>>,
    breaker_config: BreakerConfig,
    idle_ttl: Duration,
}

impl BreakerRegistry {
    pub(crate) fn new(
        max_entries: usize,
        idle_ttl: Duration,
        breaker_config: BreakerConfig,
    ) -> Self {
        let cap = NonZeroUsize::new(max_entries.max(1)).expect("max_entries is at least 1");
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            breaker_config,
            idle_ttl,
        }
    }

    pub(crate) fn get(&self, key: &BreakerKey) -> Arc<Breaker> {
        let mut entries = self.entries.lock().expect("breaker registry lock poisoned");
        let now = Instant::now();

        if let Some(entry) = entries.get_mut(key) {
            entry.last_used = now;
            return Arc::clone(&entry.breaker);
        }

        // Sweep idle entries from the cold tail before inserting. The
        // LRU cap itself bounds the count.
        loop {
            let tail_is_idle = matches!(
                entries.peek_lru(),
                Some((_, entry)) if now.duration_since(entry.last_used) >= self.idle_ttl
            );
            if !tail_is_idle {
                break;
            }
            if let Some((evicted, _)) = entries.pop_lru() {
                debug!(key = %evicted, "evicting idle breaker");
            }
        }

        let breaker = Arc::new(Breaker::new(key.to_string(), self.breaker_config.clone()));
        entries.push(
            key.clone(),
            Entry {
                breaker: Arc::clone(&breaker),
                last_used: now,
            },
        );
        breaker
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().expect("breaker registry lock poisoned").len()
    }
}
