//! End-to-end scenarios S1-S6 and the Invariant-8 TTL table (spec §8),
//! driven through the public `CacheClient` facade against fake
//! `Pool`/`Replica`/`Transcoder` collaborators.
//!
//! S4 (hashed-key collision) is exercised as a unit test inside `read.rs`
//! instead of here: it needs the envelope wire format, which is an
//! internal collaborator detail, not part of this crate's public surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use cache_core::{
    CacheClient, Config, ConsistencyPolicy, EventBus, FlaggedValue, Pool, Replica, ServerGroup,
    Transcoder,
};

#[derive(Debug)]
struct FakeReplica {
    group: ServerGroup,
    store: Mutex<HashMap<String, FlaggedValue>>,
    get_calls: AtomicUsize,
    deletes: Mutex<Vec<String>>,
}

impl FakeReplica {
    fn new(group: &str) -> Arc<Self> {
        Arc::new(FakeReplica {
            group: ServerGroup(group.to_string()),
            store: Mutex::new(HashMap::new()),
            get_calls: AtomicUsize::new(0),
            deletes: Mutex::new(Vec::new()),
        })
    }

    fn seed(&self, wire_key: &str, value: &str) {
        self.store.lock().unwrap().insert(
            wire_key.to_string(),
            FlaggedValue {
                flags: 0,
                bytes: Bytes::copy_from_slice(value.as_bytes()),
            },
        );
    }

    fn get_call_count(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Replica for FakeReplica {
    fn server_group(&self) -> &ServerGroup {
        &self.group
    }

    async fn get(&self, wire_key: &str) -> cache_core::Result<Option<FlaggedValue>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.store.lock().unwrap().get(wire_key).cloned())
    }

    async fn get_bulk(&self, wire_keys: &[String]) -> cache_core::Result<HashMap<String, FlaggedValue>> {
        let store = self.store.lock().unwrap();
        Ok(wire_keys
            .iter()
            .filter_map(|k| store.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn meta_debug(&self, wire_key: &str) -> cache_core::Result<Option<String>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .get(wire_key)
            .map(|v| format!("{} bytes", v.bytes.len())))
    }

    async fn set(&self, wire_key: &str, value: FlaggedValue, _ttl: i64, _latch: Option<&cache_core::Latch>) -> cache_core::Result<bool> {
        self.store.lock().unwrap().insert(wire_key.to_string(), value);
        Ok(true)
    }

    async fn add(&self, wire_key: &str, value: FlaggedValue, _ttl: i64, _latch: Option<&cache_core::Latch>) -> cache_core::Result<bool> {
        let mut store = self.store.lock().unwrap();
        if store.contains_key(wire_key) {
            Ok(false)
        } else {
            store.insert(wire_key.to_string(), value);
            Ok(true)
        }
    }

    async fn replace(&self, wire_key: &str, value: FlaggedValue, _ttl: i64, _latch: Option<&cache_core::Latch>) -> cache_core::Result<bool> {
        let mut store = self.store.lock().unwrap();
        if store.contains_key(wire_key) {
            store.insert(wire_key.to_string(), value);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn append(&self, wire_key: &str, value: FlaggedValue, _latch: Option<&cache_core::Latch>) -> cache_core::Result<bool> {
        let mut store = self.store.lock().unwrap();
        if let Some(existing) = store.get_mut(wire_key) {
            let mut bytes = existing.bytes.to_vec();
            bytes.extend_from_slice(&value.bytes);
            existing.bytes = Bytes::from(bytes);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn append_or_add(&self, wire_key: &str, value: FlaggedValue, ttl: i64, latch: Option<&cache_core::Latch>) -> cache_core::Result<bool> {
        if self.append(wire_key, value.clone(), latch).await? {
            Ok(true)
        } else {
            self.add(wire_key, value, ttl, latch).await
        }
    }

    async fn delete(&self, wire_key: &str, _latch: Option<&cache_core::Latch>) -> cache_core::Result<bool> {
        self.deletes.lock().unwrap().push(wire_key.to_string());
        Ok(self.store.lock().unwrap().remove(wire_key).is_some())
    }

    async fn touch(&self, _wire_key: &str, _ttl: i64, _latch: Option<&cache_core::Latch>) -> cache_core::Result<bool> {
        Ok(true)
    }

    async fn incr(&self, wire_key: &str, delta: i64, default: i64, _ttl: i64, _latch: Option<&cache_core::Latch>) -> cache_core::Result<i64> {
        let mut store = self.store.lock().unwrap();
        let current = store
            .get(wire_key)
            .and_then(|v| std::str::from_utf8(&v.bytes).ok())
            .and_then(|s| s.parse::<i64>().ok());
        let updated = match current {
            Some(c) => c + delta,
            None => default,
        };
        store.insert(
            wire_key.to_string(),
            FlaggedValue {
                flags: 0,
                bytes: Bytes::from(updated.to_string()),
            },
        );
        Ok(updated)
    }

    async fn decr(&self, wire_key: &str, delta: i64, default: i64, ttl: i64, latch: Option<&cache_core::Latch>) -> cache_core::Result<i64> {
        self.incr(wire_key, -delta, default, ttl, latch).await
    }
}

struct FakePool {
    read_order: Vec<Arc<dyn Replica>>,
    write_set: Vec<Arc<dyn Replica>>,
}

#[async_trait::async_trait]
impl Pool for FakePool {
    fn get_client_for_read(&self) -> Option<Arc<dyn Replica>> {
        self.read_order.first().cloned()
    }

    fn get_clients_for_read_excluding(&self, excluding: &ServerGroup) -> Vec<Arc<dyn Replica>> {
        self.read_order
            .iter()
            .filter(|r| r.server_group() != excluding)
            .cloned()
            .collect()
    }

    fn get_clients_for_write(&self) -> Vec<Arc<dyn Replica>> {
        self.write_set.clone()
    }

    fn get_read_timeout(&self) -> Duration {
        Duration::from_millis(200)
    }

    fn get_operation_timeout(&self) -> Duration {
        Duration::from_millis(200)
    }
}

struct StringTranscoder;

impl Transcoder<String> for StringTranscoder {
    fn encode(&self, value: &String) -> cache_core::Result<FlaggedValue> {
        Ok(FlaggedValue {
            flags: 0,
            bytes: Bytes::copy_from_slice(value.as_bytes()),
        })
    }

    fn decode(&self, value: &FlaggedValue) -> cache_core::Result<String> {
        Ok(String::from_utf8_lossy(&value.bytes).into_owned())
    }
}

fn client(read_order: Vec<Arc<dyn Replica>>, write_set: Vec<Arc<dyn Replica>>) -> CacheClient {
    let pool: Arc<dyn Pool> = Arc::new(FakePool { read_order, write_set });
    CacheClient::new("app", pool, Arc::new(Config::default()), EventBus::default())
}

/// S1: cache hit, no fallback.
#[tokio::test]
async fn s1_cache_hit_no_fallback() {
    let a = FakeReplica::new("A");
    let b = FakeReplica::new("B");
    a.seed("k", "v");
    let c = client(vec![a.clone(), b.clone()], vec![a.clone(), b.clone()]);

    let value = c.get::<String>("k", &StringTranscoder, None).await.unwrap();
    assert_eq!(value, Some("v".to_string()));
    assert_eq!(b.get_call_count(), 0, "primary hit must not touch the fallback");
}

/// S2: primary miss, fallback hit.
#[tokio::test]
async fn s2_primary_miss_fallback_hit() {
    let a = FakeReplica::new("A");
    let b = FakeReplica::new("B");
    b.seed("k", "v");
    let c = client(vec![a.clone(), b.clone()], vec![a.clone(), b.clone()]);

    let value = c.get::<String>("k", &StringTranscoder, None).await.unwrap();
    assert_eq!(value, Some("v".to_string()));
    assert_eq!(a.get_call_count(), 1);
    assert_eq!(b.get_call_count(), 1);
}

/// S3: full miss with throw=true still returns null, not an exception.
#[tokio::test]
async fn s3_full_miss_throw_true_returns_null() {
    let a = FakeReplica::new("A");
    let b = FakeReplica::new("B");
    let c = client(vec![a.clone(), b.clone()], vec![a.clone(), b.clone()]);

    let value = c.get::<String>("k", &StringTranscoder, Some(true)).await.unwrap();
    assert_eq!(value, None);
}

/// S5: consistent read with QUORUM met; the minority bucket is repaired
/// with a delete.
#[tokio::test]
async fn s5_consistent_quorum_met_repairs_minority() {
    let a = FakeReplica::new("A");
    let b = FakeReplica::new("B");
    let c_replica = FakeReplica::new("C");
    a.seed("k", "x");
    b.seed("k", "x");
    c_replica.seed("k", "y");
    let write_set: Vec<Arc<dyn Replica>> = vec![a.clone(), b.clone(), c_replica.clone()];
    let client = client(write_set.clone(), write_set);

    let value = client
        .get_consistent::<String>("k", ConsistencyPolicy::Quorum, &StringTranscoder)
        .await
        .unwrap();
    assert_eq!(value, Some("x".to_string()));
    assert_eq!(*c_replica.deletes.lock().unwrap(), vec!["k".to_string()]);
    assert!(a.deletes.lock().unwrap().is_empty());
    assert!(b.deletes.lock().unwrap().is_empty());
}

/// S6: bulk read with progressive partial fallback across two fallback
/// replicas until every key resolves.
#[tokio::test]
async fn s6_bulk_partial_fallback_resolves_every_key() {
    let primary = FakeReplica::new("primary");
    let fallback1 = FakeReplica::new("fallback1");
    let fallback2 = FakeReplica::new("fallback2");
    primary.seed("a", "1");
    fallback1.seed("b", "2");
    fallback2.seed("c", "3");

    let read_order: Vec<Arc<dyn Replica>> = vec![primary.clone(), fallback1.clone(), fallback2.clone()];
    let write_set: Vec<Arc<dyn Replica>> = read_order.clone();
    let client = client(read_order, write_set);

    let (result, status) = client
        .get_bulk::<String>(&["a".to_string(), "b".to_string(), "c".to_string()], &StringTranscoder)
        .await
        .unwrap();

    assert_eq!(result.get("a").unwrap(), &Some("1".to_string()));
    assert_eq!(result.get("b").unwrap(), &Some("2".to_string()));
    assert_eq!(result.get("c").unwrap(), &Some("3".to_string()));
    assert_eq!(status, cache_core::BulkStatus::Hit);
}

/// Invariant 8: the TTL table's boundary values, driven through `set`
/// instead of the internal `validate_ttl` helper directly.
#[tokio::test]
async fn invariant_8_ttl_table_through_set() {
    let a = FakeReplica::new("A");
    let client = client(vec![a.clone()], vec![a.clone()]);

    assert!(client.set("k", &"v".to_string(), -1, &StringTranscoder).await.is_err());
    assert!(client
        .set("k", &"v".to_string(), i64::MAX, &StringTranscoder)
        .await
        .is_err());

    let latch = client
        .set("k", &"v".to_string(), 30, &StringTranscoder)
        .await
        .unwrap();
    assert!(latch.await_quorum().await);
    assert_eq!(a.get("k").await.unwrap().unwrap().bytes, Bytes::from_static(b"v"));
}
