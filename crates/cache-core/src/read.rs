//! C6 Read Orchestrator (spec §4.4): single-key get/meta-get/meta-debug/
//! get-and-touch with zone fallback, near-cache participation, and
//! collision rejection.
//!
//! Grounded on `gazette::journal::read::Client::read_some`: one attempt
//! against a primary, fall through a fixed list on miss, swallow errors on
//! every attempt but the last.

use std::sync::Arc;
use std::time::Instant;

use crate::collaborators::{EnvelopeTranscoder, FlaggedValue, Pool, Replica, Transcoder};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::EventBus;
use crate::key::NormalisedKey;
use crate::metrics::{self, Attempt, CallTags, CallType, IpcResult};
use crate::near_cache::NearCache;

pub struct ReadOrchestrator<'a> {
    pub pool: &'a dyn Pool,
    pub config: &'a Config,
    pub events: &'a EventBus,
    pub app: &'a str,
    pub near_cache: Option<&'a NearCache>,
}

impl<'a> ReadOrchestrator<'a> {
    /// Executes a plain `get` (spec §4.4 algorithm, steps 1–8).
    pub async fn get<T: Send + 'static>(
        &self,
        key: &NormalisedKey,
        transcoder: &dyn Transcoder<T>,
        throw: bool,
    ) -> Result<Option<T>> {
        let raw = self.get_raw(key, "get", CallType::Read, throw).await?;
        decode_outcome(raw, key, transcoder, self.app)
    }

    pub async fn meta_get<T: Send + 'static>(
        &self,
        key: &NormalisedKey,
        transcoder: &dyn Transcoder<T>,
        throw: bool,
    ) -> Result<Option<T>> {
        // Same shape as `get`; real deployments distinguish meta-get by
        // requesting additional metadata from the replica, which is the
        // replica collaborator's concern (spec §6.1), not the core's.
        self.get(key, transcoder, throw).await
    }

    pub async fn meta_debug(&self, key: &NormalisedKey, throw: bool) -> Result<Option<String>> {
        let primary = self
            .pool
            .get_client_for_read()
            .ok_or(Error::NullClient { role: "read" })?;
        let wire_key = wire_key_for(key, primary.as_ref());
        match primary.meta_debug(&wire_key).await {
            Ok(v) => Ok(v),
            Err(err) if throw => Err(err),
            Err(_) => Ok(None),
        }
    }

    /// get-and-touch: identical read path, plus a best-effort fan-out touch
    /// to all write replicas on a hit (spec §4.4). Degrades to a plain get
    /// when `<app>.ignore.touch` is set.
    pub async fn get_and_touch<T: Send + 'static>(
        &self,
        key: &NormalisedKey,
        ttl: i64,
        transcoder: &dyn Transcoder<T>,
        throw: bool,
    ) -> Result<Option<T>> {
        let raw = self.get_raw(key, "get_and_touch", CallType::Read, throw).await?;
        let hit = raw.is_some();
        let decoded = decode_outcome(raw, key, transcoder, self.app)?;

        if hit && decoded.is_some() && !self.config.ignore_touch() {
            for replica in self.pool.get_clients_for_write() {
                let wire_key = wire_key_for(key, replica.as_ref());
                if let Err(err) = replica.touch(&wire_key, ttl, None).await {
                    tracing::debug!(?err, server_group = %replica.server_group(), "best-effort touch failed");
                }
            }
        }

        Ok(decoded)
    }

    /// Near-cache-fronted read (spec §4.3): a miss triggers at-most-one
    /// concurrent load of the full algorithm below, with concurrent callers
    /// waiting on the same load. Bypassed when `throw` is set, since moka's
    /// single-flight slot requires a `Clone` error type to fan a failure out
    /// to every waiter and [`Error`] intentionally isn't one; `throw=false`
    /// already converts every backend fault to `None` before it would reach
    /// the cache, so the two paths agree on everything the cache could see.
    async fn get_raw(
        &self,
        key: &NormalisedKey,
        call: &'static str,
        call_type: CallType,
        throw: bool,
    ) -> Result<Option<FlaggedValue>> {
        let use_near_cache = !throw && self.config.use_inmemory_cache() && self.near_cache.is_some();
        if use_near_cache {
            let nc = self.near_cache.unwrap();
            let value = nc
                .get_with(key, || async {
                    Ok(self.read_raw(key, call, call_type, throw).await?.value)
                })
                .await;
            return Ok(value);
        }
        Ok(self.read_raw(key, call, call_type, throw).await?.value)
    }

    /// Core of spec §4.4: primary attempt, then ordered fallback, stopping at
    /// the first non-null. Returns the raw (possibly still-enveloped) bytes;
    /// callers decode and check the envelope themselves so the collision
    /// check stays colocated with decoding.
    async fn read_raw(
        &self,
        key: &NormalisedKey,
        call: &'static str,
        call_type: CallType,
        throw: bool,
    ) -> Result<ReadOutcome> {
        let start = Instant::now();
        let primary = match self.pool.get_client_for_read() {
            Some(p) => p,
            None => {
                metrics::fast_fail(self.app, call, call_type, metrics::FailureReason::NullClient);
                self.record_error_call(call, call_type, start, IpcResult::Error);
                return Err(Error::NullClient { role: "read" });
            }
        };

        let event = self.events.create(
            call_kind(call),
            self.app,
            None,
            vec![key.clone()],
            None,
        );
        if let Some(event) = &event {
            if self.events.throttle(event).await {
                metrics::fast_fail(self.app, call, call_type, metrics::FailureReason::Throttled);
                self.record_error_call(call, call_type, start, IpcResult::Throttled);
                return Err(Error::Throttled);
            }
            self.events.start(event).await;
        }

        let fallback_enabled = self.config.fallback_zone() && self.pool.supports_fallback();
        let primary_wire = wire_key_for(key, primary.as_ref());

        let primary_throw = if fallback_enabled { false } else { throw };
        let primary_result = primary.get(&primary_wire).await;

        let (value, server_group, attempt) = match primary_result {
            Ok(Some(v)) => (Some(v), Some(primary.server_group().to_string()), Attempt::Initial),
            Ok(None) if !fallback_enabled => (None, None, Attempt::Initial),
            Err(err) if primary_throw => {
                self.finish_error(&event, &err).await;
                self.record_error_call(call, call_type, start, IpcResult::for_error(&err));
                return Err(err);
            }
            _ => {
                // Miss, or a swallowed error — fall through to zone fallback.
                match self.fallback(key, &event, &primary, call, call_type, throw).await {
                    Ok(v) => v,
                    Err(err) => {
                        self.finish_error(&event, &err).await;
                        self.record_error_call(call, call_type, start, IpcResult::for_error(&err));
                        return Err(err);
                    }
                }
            }
        };

        let elapsed = start.elapsed();
        let hit = value.is_some();
        if let Some(mut event) = event {
            self.events.complete(&mut event).await;
        }
        metrics::overall_call(
            self.app,
            CallTags {
                call,
                call_type,
                ipc_result: IpcResult::Success,
                cache_hit: Some(if hit { metrics::CacheHit::Yes } else { metrics::CacheHit::No }),
                attempt: Some(attempt),
                server_group: server_group.as_deref(),
                zone: None,
            },
            elapsed,
        );

        Ok(ReadOutcome { value })
    }

    #[allow(clippy::too_many_arguments)]
    async fn fallback(
        &self,
        key: &NormalisedKey,
        event: &Option<crate::Event>,
        primary: &Arc<dyn Replica>,
        call: &'static str,
        call_type: CallType,
        throw: bool,
    ) -> Result<(Option<FlaggedValue>, Option<String>, Attempt)> {
        let fallbacks = self.pool.get_clients_for_read_excluding(primary.server_group());
        let last = fallbacks.len().saturating_sub(1);

        for (i, replica) in fallbacks.iter().enumerate() {
            // Re-check throttling on every fallback iteration, since a
            // listener may start rejecting mid-fan-out.
            if let Some(event) = event {
                if self.events.throttle(event).await {
                    metrics::fast_fail(self.app, call, call_type, metrics::FailureReason::Throttled);
                    return Err(Error::Throttled);
                }
            }

            let wire_key = wire_key_for(key, replica.as_ref());
            let is_last = i == last;
            match replica.get(&wire_key).await {
                Ok(Some(v)) => {
                    return Ok((
                        Some(v),
                        Some(replica.server_group().to_string()),
                        Attempt::for_index(i + 1),
                    ))
                }
                Ok(None) => continue,
                Err(err) if is_last && throw => return Err(err),
                Err(err) => {
                    tracing::debug!(?err, server_group = %replica.server_group(), "fallback read attempt failed");
                    continue;
                }
            }
        }
        Ok((None, None, Attempt::for_index(fallbacks.len())))
    }

    async fn finish_error(&self, event: &Option<crate::Event>, err: &Error) {
        if let Some(event) = event {
            let mut event = event.clone();
            self.events.error(&mut event, err).await;
        }
    }

    fn record_error_call(&self, call: &'static str, call_type: CallType, start: Instant, ipc_result: IpcResult) {
        metrics::overall_call(
            self.app,
            CallTags {
                call,
                call_type,
                ipc_result,
                cache_hit: None,
                attempt: None,
                server_group: None,
                zone: None,
            },
            start.elapsed(),
        );
    }
}

/// The raw outcome of a single-key read, stripped of per-attempt metadata
/// once metrics for that attempt have already been recorded.
struct ReadOutcome {
    value: Option<FlaggedValue>,
}

fn call_kind(call: &str) -> crate::event::CallKind {
    match call {
        "get" => crate::event::CallKind::Get,
        "get_and_touch" => crate::event::CallKind::GetAndTouch,
        _ => crate::event::CallKind::Get,
    }
}

/// Selects the wire-key form for `replica`: the replica's duet capability
/// overrides the hashed/canonical choice (spec §3.1, §9).
pub(crate) fn wire_key_for(key: &NormalisedKey, replica: &dyn Replica) -> String {
    key.derived_key(replica.is_duet_client()).to_string()
}

/// Decodes a raw read value, checking the envelope's canonical key when
/// hashing is in effect (spec §3.2, §4.4 collision handling).
pub(crate) fn decode_outcome<T>(
    value: Option<FlaggedValue>,
    key: &NormalisedKey,
    transcoder: &dyn Transcoder<T>,
    app: &str,
) -> Result<Option<T>> {
    let Some(raw) = value else {
        return Ok(None);
    };

    if key.hashed_key().is_some() {
        let envelope = EnvelopeTranscoder.decode(&raw, 0, 0)?;
        if envelope.canonical_key != key.canonical_key() {
            metrics::key_hash_collision(app);
            tracing::warn!(
                expected = key.canonical_key(),
                found = %envelope.canonical_key,
                "hashed-key collision on read"
            );
            return Ok(None);
        }
        let payload = FlaggedValue {
            flags: envelope.flags,
            bytes: envelope.payload,
        };
        return Ok(Some(transcoder.decode(&payload)?));
    }

    Ok(Some(transcoder.decode(&raw)?))
}
