//! `CacheClient`: the public facade (spec §1, data-flow diagram in §2).
//! Ties key normalisation, the near-cache, the event bus, metrics and the
//! four orchestrators together behind the operation set application code
//! actually calls.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::bulk::{BulkOrchestrator, BulkStatus};
use crate::collaborators::{FlaggedValue, Pool, Transcoder};
use crate::config::ConfigHandle;
use crate::consistent::{ConsistencyPolicy, ConsistentReadOrchestrator};
use crate::error::Result;
use crate::event::EventBus;
use crate::key::{KeyNormalizer, NormalisedKey};
use crate::latch::Latch;
use crate::near_cache::NearCache;
use crate::read::ReadOrchestrator;
use crate::write::{validate_ttl, WriteOp, WriteOrchestrator};
use std::collections::HashMap;

/// Default near-cache sizing (spec is silent on a concrete figure): a
/// generous per-process entry ceiling and a short TTL, since the near-cache
/// exists to absorb bursts between reloads, not to serve as a long-lived
/// store.
const NEAR_CACHE_MAX_CAPACITY: u64 = 10_000;
const NEAR_CACHE_TTL: Duration = Duration::from_secs(60);

/// Wires a [`Pool`] collaborator, an [`EventBus`], a [`crate::Config`] and an
/// application name into the five orchestrators (spec §2 data flow).
pub struct CacheClient {
    app: String,
    pool: Arc<dyn Pool>,
    config: ConfigHandle,
    events: EventBus,
    normalizer: KeyNormalizer,
    near_cache: NearCache,
}

impl CacheClient {
    pub fn new(app: impl Into<String>, pool: Arc<dyn Pool>, config: ConfigHandle, events: EventBus) -> Self {
        let app = app.into();
        let normalizer = KeyNormalizer::new(None)
            .with_max_key_length(config.max_key_length())
            .with_algorithm(config.hash_algorithm())
            .with_force_hash(config.hash_key())
            .with_auto_hash(config.auto_hash_keys());
        let near_cache = NearCache::new(NEAR_CACHE_MAX_CAPACITY, NEAR_CACHE_TTL);
        CacheClient {
            app,
            pool,
            config,
            events,
            normalizer,
            near_cache,
        }
    }

    fn normalise(&self, key: &str) -> Result<NormalisedKey> {
        self.normalizer.normalise(key)
    }

    fn now_ms_and_epoch_s() -> (i64, i64) {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default();
        (now.as_millis() as i64, now.as_secs() as i64)
    }

    fn read_orch(&self) -> ReadOrchestrator<'_> {
        ReadOrchestrator {
            pool: self.pool.as_ref(),
            config: &self.config,
            events: &self.events,
            app: &self.app,
            near_cache: Some(&self.near_cache),
        }
    }

    fn bulk_orch(&self) -> BulkOrchestrator<'_> {
        BulkOrchestrator {
            pool: self.pool.as_ref(),
            config: &self.config,
            app: &self.app,
        }
    }

    fn write_orch(&self) -> WriteOrchestrator<'_> {
        WriteOrchestrator {
            pool: self.pool.as_ref(),
            config: &self.config,
            events: &self.events,
            app: &self.app,
        }
    }

    fn consistent_orch(&self) -> ConsistentReadOrchestrator<'_> {
        ConsistentReadOrchestrator {
            pool: self.pool.as_ref(),
            app: &self.app,
        }
    }

    fn check_ttl(&self, ttl: i64) -> Result<()> {
        let (now_ms, now_s) = Self::now_ms_and_epoch_s();
        validate_ttl(ttl, now_ms, now_s)
    }

    /// `get` (spec §4.4). Consults the near-cache first when configured.
    pub async fn get<T: Clone + Send + Sync + 'static>(
        &self,
        key: &str,
        transcoder: &dyn Transcoder<T>,
        throw: Option<bool>,
    ) -> Result<Option<T>> {
        let key = self.normalise(key)?;
        let throw = self.config.effective_throw(throw);
        match self.read_orch().get(&key, transcoder, throw).await {
            Ok(v) => Ok(v),
            Err(err) if throw => Err(err),
            Err(_) => Ok(None),
        }
    }

    pub async fn meta_get<T: Clone + Send + Sync + 'static>(
        &self,
        key: &str,
        transcoder: &dyn Transcoder<T>,
        throw: Option<bool>,
    ) -> Result<Option<T>> {
        let key = self.normalise(key)?;
        let throw = self.config.effective_throw(throw);
        match self.read_orch().meta_get(&key, transcoder, throw).await {
            Ok(v) => Ok(v),
            Err(err) if throw => Err(err),
            Err(_) => Ok(None),
        }
    }

    pub async fn meta_debug(&self, key: &str, throw: Option<bool>) -> Result<Option<String>> {
        let key = self.normalise(key)?;
        let throw = self.config.effective_throw(throw);
        match self.read_orch().meta_debug(&key, throw).await {
            Ok(v) => Ok(v),
            Err(err) if throw => Err(err),
            Err(_) => Ok(None),
        }
    }

    pub async fn get_and_touch<T: Clone + Send + Sync + 'static>(
        &self,
        key: &str,
        ttl: i64,
        transcoder: &dyn Transcoder<T>,
        throw: Option<bool>,
    ) -> Result<Option<T>> {
        self.check_ttl(ttl)?;
        let key = self.normalise(key)?;
        let throw = self.config.effective_throw(throw);
        match self.read_orch().get_and_touch(&key, ttl, transcoder, throw).await {
            Ok(v) => Ok(v),
            Err(err) if throw => Err(err),
            Err(_) => Ok(None),
        }
    }

    /// `get_bulk` (spec §4.7).
    pub async fn get_bulk<T: Clone + Send + Sync + 'static>(
        &self,
        keys: &[String],
        transcoder: &dyn Transcoder<T>,
    ) -> Result<(HashMap<String, Option<T>>, BulkStatus)> {
        let normalised: Vec<NormalisedKey> = keys.iter().map(|k| self.normalise(k)).collect::<Result<_>>()?;
        self.bulk_orch().get_bulk(&normalised, transcoder).await
    }

    pub async fn get_bulk_and_touch<T: Clone + Send + Sync + 'static>(
        &self,
        keys: &[String],
        ttl: i64,
        transcoder: &dyn Transcoder<T>,
    ) -> Result<(HashMap<String, Option<T>>, BulkStatus)> {
        self.check_ttl(ttl)?;
        let normalised: Vec<NormalisedKey> = keys.iter().map(|k| self.normalise(k)).collect::<Result<_>>()?;
        self.bulk_orch().get_bulk_and_touch(&normalised, ttl, transcoder).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn write<T: Send + Sync + 'static>(
        &self,
        op: WriteOp,
        key: &str,
        value: Option<&T>,
        ttl: i64,
        transcoder: Option<&dyn Transcoder<T>>,
    ) -> Result<Latch> {
        if !matches!(op, WriteOp::Delete) {
            self.check_ttl(ttl)?;
        }
        let key = self.normalise(key)?;
        let latch = self.write_orch().write(op, &key, value, ttl, transcoder).await?;
        self.near_cache.invalidate(&key).await;
        Ok(latch)
    }

    pub async fn set<T: Send + Sync + 'static>(&self, key: &str, value: &T, ttl: i64, transcoder: &dyn Transcoder<T>) -> Result<Latch> {
        self.write(WriteOp::Set, key, Some(value), ttl, Some(transcoder)).await
    }

    pub async fn add<T: Send + Sync + 'static>(&self, key: &str, value: &T, ttl: i64, transcoder: &dyn Transcoder<T>) -> Result<Latch> {
        self.write(WriteOp::Add, key, Some(value), ttl, Some(transcoder)).await
    }

    pub async fn replace<T: Send + Sync + 'static>(&self, key: &str, value: &T, ttl: i64, transcoder: &dyn Transcoder<T>) -> Result<Latch> {
        self.write(WriteOp::Replace, key, Some(value), ttl, Some(transcoder)).await
    }

    pub async fn append<T: Send + Sync + 'static>(&self, key: &str, value: &T, transcoder: &dyn Transcoder<T>) -> Result<Latch> {
        self.write(WriteOp::Append, key, Some(value), 0, Some(transcoder)).await
    }

    pub async fn append_or_add<T: Send + Sync + 'static>(&self, key: &str, value: &T, ttl: i64, transcoder: &dyn Transcoder<T>) -> Result<Latch> {
        self.write(WriteOp::AppendOrAdd, key, Some(value), ttl, Some(transcoder)).await
    }

    pub async fn delete(&self, key: &str) -> Result<Latch> {
        self.write::<FlaggedValue>(WriteOp::Delete, key, None, 0, None).await
    }

    pub async fn touch(&self, key: &str, ttl: i64) -> Result<Latch> {
        self.write::<FlaggedValue>(WriteOp::Touch, key, None, ttl, None).await
    }

    pub async fn incr(&self, key: &str, delta: i64, default: i64, ttl: i64) -> Result<Latch> {
        self.check_ttl(ttl)?;
        let key = self.normalise(key)?;
        let latch = self.write_orch().incr_or_decr(true, &key, delta, default, ttl).await?;
        self.near_cache.invalidate(&key).await;
        Ok(latch)
    }

    pub async fn decr(&self, key: &str, delta: i64, default: i64, ttl: i64) -> Result<Latch> {
        self.check_ttl(ttl)?;
        let key = self.normalise(key)?;
        let latch = self.write_orch().incr_or_decr(false, &key, delta, default, ttl).await?;
        self.near_cache.invalidate(&key).await;
        Ok(latch)
    }

    /// Consistent read against every write replica (spec §4.5).
    pub async fn get_consistent<T: Clone + Send + Sync + 'static>(
        &self,
        key: &str,
        policy: ConsistencyPolicy,
        transcoder: &dyn Transcoder<T>,
    ) -> Result<Option<T>> {
        let key = self.normalise(key)?;
        self.consistent_orch().get(&key, policy, transcoder).await
    }

    pub fn read_timeout(&self) -> Duration {
        self.pool.get_read_timeout()
    }

    pub fn operation_timeout(&self) -> Duration {
        self.pool.get_operation_timeout()
    }
}
