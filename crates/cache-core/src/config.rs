//! Live-reloadable configuration (spec §6.2). The property store and its
//! external watcher (file/etcd/zk) are out of scope (spec §1); this module
//! only defines the atomically-updated scalar cells and their read/write
//! API, the way §5 describes shared configuration state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::key::HashAlgorithm;
use crate::latch::Policy;

pub type ConfigHandle = Arc<Config>;

/// Recognised configuration keys (spec §6.2), each independently
/// live-reloadable without restarting the client.
pub struct Config {
    throw_exception: AtomicBool,
    fallback_zone: AtomicBool,
    bulk_fallback_zone: AtomicBool,
    bulk_partial_fallback_zone: AtomicBool,
    use_inmemory_cache: AtomicBool,
    events_using_latch: AtomicBool,
    ignore_touch: AtomicBool,
    hash_key: AtomicBool,
    auto_hash_keys: AtomicBool,
    max_key_length: AtomicU64,
    max_read_duration_metric_ms: AtomicU64,
    max_write_duration_metric_ms: AtomicU64,
    hash_algo: RwLock<String>,
    pool_alias: RwLock<Option<String>>,
    write_policy: RwLock<Policy>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            throw_exception: AtomicBool::new(false),
            fallback_zone: AtomicBool::new(true),
            bulk_fallback_zone: AtomicBool::new(true),
            bulk_partial_fallback_zone: AtomicBool::new(true),
            use_inmemory_cache: AtomicBool::new(false),
            events_using_latch: AtomicBool::new(false),
            ignore_touch: AtomicBool::new(false),
            hash_key: AtomicBool::new(false),
            auto_hash_keys: AtomicBool::new(false),
            max_key_length: AtomicU64::new(200),
            max_read_duration_metric_ms: AtomicU64::new(u64::MAX),
            max_write_duration_metric_ms: AtomicU64::new(u64::MAX),
            hash_algo: RwLock::new("siphash24".to_string()),
            pool_alias: RwLock::new(None),
            write_policy: RwLock::new(Policy::Quorum),
        }
    }
}

macro_rules! bool_cell {
    ($get:ident, $set:ident, $field:ident) => {
        pub fn $get(&self) -> bool {
            self.$field.load(Ordering::Relaxed)
        }
        pub fn $set(&self, value: bool) {
            self.$field.store(value, Ordering::Relaxed);
        }
    };
}

impl Config {
    bool_cell!(throw_exception, set_throw_exception, throw_exception);
    bool_cell!(fallback_zone, set_fallback_zone, fallback_zone);
    bool_cell!(
        bulk_fallback_zone,
        set_bulk_fallback_zone,
        bulk_fallback_zone
    );
    bool_cell!(
        bulk_partial_fallback_zone,
        set_bulk_partial_fallback_zone,
        bulk_partial_fallback_zone
    );
    bool_cell!(
        use_inmemory_cache,
        set_use_inmemory_cache,
        use_inmemory_cache
    );
    bool_cell!(
        events_using_latch,
        set_events_using_latch,
        events_using_latch
    );
    bool_cell!(ignore_touch, set_ignore_touch, ignore_touch);
    bool_cell!(hash_key, set_hash_key, hash_key);
    bool_cell!(auto_hash_keys, set_auto_hash_keys, auto_hash_keys);

    pub fn max_key_length(&self) -> usize {
        self.max_key_length.load(Ordering::Relaxed) as usize
    }
    pub fn set_max_key_length(&self, value: usize) {
        self.max_key_length.store(value as u64, Ordering::Relaxed);
    }

    pub fn max_read_duration_metric_ms(&self) -> Option<u64> {
        match self.max_read_duration_metric_ms.load(Ordering::Relaxed) {
            u64::MAX => None,
            v => Some(v),
        }
    }
    pub fn set_max_read_duration_metric_ms(&self, value: u64) {
        self.max_read_duration_metric_ms
            .store(value, Ordering::Relaxed);
    }

    pub fn max_write_duration_metric_ms(&self) -> Option<u64> {
        match self.max_write_duration_metric_ms.load(Ordering::Relaxed) {
            u64::MAX => None,
            v => Some(v),
        }
    }
    pub fn set_max_write_duration_metric_ms(&self, value: u64) {
        self.max_write_duration_metric_ms
            .store(value, Ordering::Relaxed);
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        let name = self.hash_algo.read().unwrap();
        HashAlgorithm::parse(&name).unwrap_or_default()
    }
    pub fn set_hash_algo(&self, name: impl Into<String>) {
        *self.hash_algo.write().unwrap() = name.into();
    }

    /// `EVCacheClientPoolManager.<app>.alias`: when this changes, the core
    /// re-resolves its pool reference (spec §6.2). The re-resolution itself
    /// is the `Pool` collaborator's responsibility; this cell just tracks
    /// the currently configured alias so a caller can detect the change.
    pub fn pool_alias(&self) -> Option<String> {
        self.pool_alias.read().unwrap().clone()
    }
    pub fn set_pool_alias(&self, alias: Option<String>) {
        *self.pool_alias.write().unwrap() = alias;
    }

    pub fn write_policy(&self) -> Policy {
        *self.write_policy.read().unwrap()
    }
    pub fn set_write_policy(&self, policy: Policy) {
        *self.write_policy.write().unwrap() = policy;
    }

    /// Effective "throw" flag for a call: the call-scoped override takes
    /// precedence over the configured default (spec §7).
    pub fn effective_throw(&self, call_override: Option<bool>) -> bool {
        call_override.unwrap_or_else(|| self.throw_exception())
    }
}
