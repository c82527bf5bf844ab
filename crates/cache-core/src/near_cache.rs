//! C5 Near-Cache (spec §3.6, §4.3): an optional process-local loading cache
//! keyed by the normalised key, with single-flight population per key.
//!
//! Grounded on `other_examples/manifests/thichuong-multi-tier-cache`'s L1
//! `moka::future::Cache` layer: `moka` natively provides the stampede
//! protection ("at-most-one concurrent load per key") this component needs,
//! so there is no hand-rolled mutex-guarded load map here.

use std::time::Duration;

use moka::future::Cache;

use crate::collaborators::FlaggedValue;
use crate::key::NormalisedKey;

/// `None` is the explicit NotFound marker (spec §3.6): a cached miss is
/// remembered for the cache's TTL so it does not trigger a re-read of the
/// underlying replicas on every lookup.
#[derive(Clone)]
struct Entry(Option<FlaggedValue>);

/// Process-local cache in front of the remote replicas (spec §4.3). Reads of
/// a given key consult the near-cache first; a miss triggers at-most-one
/// concurrent load, with concurrent callers waiting on the same load.
#[derive(Clone)]
pub struct NearCache {
    cache: Cache<NormalisedKey, Entry>,
}

impl NearCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        NearCache {
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Returns the cached value for `key`, running `loader` at most once
    /// across all concurrent callers on a miss (spec §4.3 single-flight).
    /// `loader` itself is the Read Orchestrator's single-key path — near-cache
    /// participation is orthogonal to zone fallback (spec §4.3).
    pub async fn get_with<F, Fut>(&self, key: &NormalisedKey, loader: F) -> Option<FlaggedValue>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = crate::error::Result<Option<FlaggedValue>>>,
    {
        let key_for_init = key.clone();
        let result = self
            .cache
            .try_get_with(key_for_init, async move {
                loader().await.map(Entry)
            })
            .await;

        match result {
            Ok(Entry(value)) => value,
            Err(_) => None,
        }
    }

    pub async fn invalidate(&self, key: &NormalisedKey) {
        self.cache.invalidate(key).await;
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl std::fmt::Debug for NearCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NearCache")
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    fn key(k: &str) -> NormalisedKey {
        crate::key::KeyNormalizer::new(None).normalise(k).unwrap()
    }

    #[tokio::test]
    async fn single_flight_loads_only_once_for_concurrent_callers() {
        let nc = NearCache::new(100, Duration::from_secs(60));
        let loads = StdArc::new(AtomicUsize::new(0));
        let k = key("k");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let nc = nc.clone();
            let loads = loads.clone();
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                nc.get_with(&k, || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(Some(FlaggedValue {
                        flags: 0,
                        bytes: Bytes::from_static(b"v"),
                    }))
                })
                .await
            }));
        }
        for h in handles {
            let v = h.await.unwrap();
            assert_eq!(v.unwrap().bytes, Bytes::from_static(b"v"));
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn not_found_marker_avoids_rereading() {
        let nc = NearCache::new(100, Duration::from_secs(60));
        let loads = StdArc::new(AtomicUsize::new(0));
        let k = key("missing");

        for _ in 0..3 {
            let loads = loads.clone();
            let result = nc
                .get_with(&k, || async move {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                })
                .await;
            assert!(result.is_none());
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }
}
