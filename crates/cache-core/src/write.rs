//! C8 Write Orchestrator (spec §4.6): fan-out writes with a completion
//! latch and policy-based success quorum.
//!
//! Grounded on `gazette::router::Router`'s "dispatch to every relevant
//! member" shape, adapted from routing a single RPC to one member into
//! fanning the same call out to every write replica.

use std::time::SystemTime;

use crate::collaborators::{EnvelopeTranscoder, FlaggedValue, Pool, Replica, Transcoder};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::EventBus;
use crate::key::NormalisedKey;
use crate::latch::Latch;
use crate::metrics::{self, CallTags, CallType, IpcResult};
use crate::read::wire_key_for;

/// TTL validation (spec §4.8). `ttl` must be `>= 0`; a value larger than the
/// current wall-clock milliseconds is rejected as a caller mistake
/// (seconds vs. milliseconds); a value past 30 days is treated as an
/// absolute epoch-seconds timestamp and must lie in the future.
pub fn validate_ttl(ttl: i64, now_wall_ms: i64, now_epoch_s: i64) -> Result<()> {
    const THIRTY_DAYS_SECONDS: i64 = 2_592_000;

    if ttl < 0 {
        return Err(Error::InvalidTtl {
            ttl,
            reason: "ttl must be >= 0",
        });
    }
    if ttl > now_wall_ms {
        return Err(Error::InvalidTtl {
            ttl,
            reason: "ttl exceeds current wall-clock milliseconds; did you pass milliseconds instead of seconds?",
        });
    }
    if ttl > THIRTY_DAYS_SECONDS && ttl <= now_epoch_s {
        return Err(Error::InvalidTtl {
            ttl,
            reason: "ttl beyond 30 days is treated as an absolute epoch-seconds value and must be in the future",
        });
    }
    Ok(())
}

/// What kind of fan-out write is being issued (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Set,
    Add,
    Replace,
    Append,
    AppendOrAdd,
    Delete,
    Touch,
}

pub struct WriteOrchestrator<'a> {
    pub pool: &'a dyn Pool,
    pub config: &'a Config,
    pub events: &'a EventBus,
    pub app: &'a str,
}

impl<'a> WriteOrchestrator<'a> {
    /// Fan-out set/add/replace/append/append-or-add/delete/touch
    /// (spec §4.6). Returns the latch the caller awaits for quorum.
    #[allow(clippy::too_many_arguments)]
    pub async fn write<T: Send + Sync + 'static>(
        &self,
        op: WriteOp,
        key: &NormalisedKey,
        value: Option<&T>,
        ttl: i64,
        transcoder: Option<&dyn Transcoder<T>>,
    ) -> Result<Latch> {
        let start = std::time::Instant::now();
        let write_set = self.pool.get_clients_for_write();
        if write_set.is_empty() {
            metrics::fast_fail(self.app, op_name(op), CallType::Write, metrics::FailureReason::NullClient);
            self.record_error_call(op, start, IpcResult::Error);
            return Err(Error::NullClient { role: "write" });
        }

        let write_only = self.pool.get_write_only_clients();
        let write_only_groups: Vec<_> = write_only.iter().map(|r| r.server_group().clone()).collect();
        let denominator = write_set.len() - write_only_groups.len();

        let event = self.events.create(
            write_call_kind(op),
            self.app,
            None,
            vec![key.clone()],
            Some(ttl),
        );
        if let Some(event) = &event {
            if self.events.throttle(event).await {
                metrics::fast_fail(self.app, op_name(op), CallType::Write, metrics::FailureReason::Throttled);
                self.record_error_call(op, start, IpcResult::Throttled);
                return Err(Error::Throttled);
            }
            self.events.start(event).await;
        }

        metrics::ttl(self.app, ttl);

        let encoded = match (value, transcoder) {
            (Some(v), Some(t)) => Some(self.encode(key, v, ttl, t)?),
            _ => None,
        };

        let policy = self.config.write_policy();
        let (latch, slots) = Latch::new(policy, denominator);
        let mut slots = slots.into_iter();

        // When events are attached in latch mode, a second latch mirrors the
        // caller's one so the event can be terminated on the same quorum
        // condition without consuming the latch returned to the caller
        // (spec §4.6, §5).
        let using_latch = event.is_some() && self.config.events_using_latch();
        let (observer, observer_slots) = if using_latch {
            let (l, s) = Latch::new(policy, denominator);
            (Some(l), s.into_iter().map(Some).collect())
        } else {
            (None, Vec::new())
        };
        let mut observer_slots: std::vec::IntoIter<Option<crate::latch::LatchSlot>> = observer_slots.into_iter();

        for replica in &write_set {
            let wire_key = wire_key_for(key, replica.as_ref());
            let is_write_only = write_only_groups.contains(replica.server_group());
            let slot = if is_write_only { None } else { slots.next() };
            let observer_slot = if is_write_only { None } else { observer_slots.next().flatten() };

            let replica = replica.clone();
            let value = encoded.clone();
            // Fan-out writes return immediately (spec §5): each dispatch is
            // spawned so the caller gets the latch back without waiting on
            // every replica.
            tokio::spawn(dispatch(op, replica, wire_key, value, ttl, slot, observer_slot));
        }

        match (event, observer) {
            (Some(mut event), Some(observer)) => {
                let events = self.events.clone();
                let deadline = self.pool.get_operation_timeout();
                tokio::spawn(async move {
                    let _ = tokio::time::timeout(deadline, observer.await_quorum()).await;
                    events.complete(&mut event).await;
                });
            }
            (Some(mut event), None) => {
                self.events.complete(&mut event).await;
            }
            (None, _) => {}
        }

        metrics::overall_call(
            self.app,
            CallTags {
                call: op_name(op),
                call_type: CallType::Write,
                ipc_result: IpcResult::Success,
                cache_hit: None,
                attempt: None,
                server_group: None,
                zone: None,
            },
            start.elapsed(),
        );

        Ok(latch)
    }

    fn record_error_call(&self, op: WriteOp, start: std::time::Instant, ipc_result: IpcResult) {
        metrics::overall_call(
            self.app,
            CallTags {
                call: op_name(op),
                call_type: CallType::Write,
                ipc_result,
                cache_hit: None,
                attempt: None,
                server_group: None,
                zone: None,
            },
            start.elapsed(),
        );
    }

    fn encode<T>(&self, key: &NormalisedKey, value: &T, ttl: i64, transcoder: &dyn Transcoder<T>) -> Result<FlaggedValue> {
        let encoded = transcoder.encode(value)?;
        if key.hashed_key().is_some() {
            let write_time = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as i64;
            let envelope = EnvelopeTranscoder.wrap(key.canonical_key(), encoded, ttl, write_time);
            Ok(EnvelopeTranscoder.encode(&envelope))
        } else {
            Ok(encoded)
        }
    }

    /// incr/decr fan-out plus cross-replica convergence (spec §4.6): the
    /// maximum observed value becomes `current`; replicas that returned `-1`
    /// are re-initialised with `default=current`; replicas that disagree are
    /// overwritten with a `set` carrying `current`'s string form. Best-effort
    /// and not counted against the latch.
    pub async fn incr_or_decr(&self, is_incr: bool, key: &NormalisedKey, delta: i64, default: i64, ttl: i64) -> Result<Latch> {
        let write_set = self.pool.get_clients_for_write();
        if write_set.is_empty() {
            metrics::fast_fail(
                self.app,
                if is_incr { "incr" } else { "decr" },
                CallType::Write,
                metrics::FailureReason::NullClient,
            );
            return Err(Error::NullClient { role: "write" });
        }

        let write_only = self.pool.get_write_only_clients();
        let write_only_groups: Vec<_> = write_only.iter().map(|r| r.server_group().clone()).collect();
        let denominator = write_set.len() - write_only_groups.len();

        let (latch, slots) = Latch::new(self.config.write_policy(), denominator);
        let mut slots = slots.into_iter();
        let mut observed = Vec::with_capacity(write_set.len());

        for replica in &write_set {
            let wire_key = wire_key_for(key, replica.as_ref());
            let result = if is_incr {
                replica.incr(&wire_key, delta, default, ttl, None).await
            } else {
                replica.decr(&wire_key, delta, default, ttl, None).await
            };
            let is_write_only = write_only_groups.contains(replica.server_group());
            if let Some(slot) = (!is_write_only).then(|| slots.next()).flatten() {
                slot.report(result.is_ok());
            }
            observed.push((replica.clone(), result.unwrap_or(-1)));
        }

        let current = observed.iter().map(|(_, v)| *v).max().unwrap_or(default);
        for (replica, value) in &observed {
            let wire_key = wire_key_for(key, replica.as_ref());
            if *value == -1 {
                let _ = if is_incr {
                    replica.incr(&wire_key, 0, current, ttl, None).await
                } else {
                    replica.decr(&wire_key, 0, current, ttl, None).await
                };
            } else if *value != current {
                let payload = FlaggedValue {
                    flags: 0,
                    bytes: current.to_string().into_bytes().into(),
                };
                let _ = replica.set(&wire_key, payload, ttl, None).await;
            }
        }

        Ok(latch)
    }
}

async fn dispatch(
    op: WriteOp,
    replica: std::sync::Arc<dyn Replica>,
    wire_key: String,
    value: Option<FlaggedValue>,
    ttl: i64,
    slot: Option<crate::latch::LatchSlot>,
    observer_slot: Option<crate::latch::LatchSlot>,
) {
    // `dispatch` is spawned fire-and-forget per replica by `write()`; this
    // free function (not a `&self` method) keeps it independent of the
    // orchestrator's lifetime, since the spawned task outlives the call.
    let result: Result<bool> = match op {
        WriteOp::Set => replica.set(&wire_key, value.unwrap_or_default(), ttl, None).await,
        WriteOp::Add => replica.add(&wire_key, value.unwrap_or_default(), ttl, None).await,
        WriteOp::Replace => replica.replace(&wire_key, value.unwrap_or_default(), ttl, None).await,
        WriteOp::Append => replica.append(&wire_key, value.unwrap_or_default(), None).await,
        WriteOp::AppendOrAdd => replica.append_or_add(&wire_key, value.unwrap_or_default(), ttl, None).await,
        WriteOp::Delete => replica.delete(&wire_key, None).await,
        WriteOp::Touch => replica.touch(&wire_key, ttl, None).await,
    };
    if let Err(err) = &result {
        tracing::debug!(?err, server_group = %replica.server_group(), op = op_name(op), "replica write failed");
    }
    let success = result.unwrap_or(false);
    if let Some(slot) = slot {
        slot.report(success);
    }
    if let Some(observer_slot) = observer_slot {
        observer_slot.report(success);
    }
}

fn op_name(op: WriteOp) -> &'static str {
    match op {
        WriteOp::Set => "set",
        WriteOp::Add => "add",
        WriteOp::Replace => "replace",
        WriteOp::Append => "append",
        WriteOp::AppendOrAdd => "append_or_add",
        WriteOp::Delete => "delete",
        WriteOp::Touch => "touch",
    }
}

fn write_call_kind(op: WriteOp) -> crate::event::CallKind {
    match op {
        WriteOp::Set => crate::event::CallKind::Set,
        WriteOp::Add => crate::event::CallKind::Add,
        WriteOp::Replace => crate::event::CallKind::Replace,
        WriteOp::Append => crate::event::CallKind::Append,
        WriteOp::AppendOrAdd => crate::event::CallKind::AppendOrAdd,
        WriteOp::Delete => crate::event::CallKind::Delete,
        WriteOp::Touch => crate::event::CallKind::Touch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_table_matches_invariant_8() {
        let now_wall_ms = 1_750_000_000_000;
        let now_epoch_s = 1_750_000_000;

        assert!(validate_ttl(-1, now_wall_ms, now_epoch_s).is_err());
        assert!(validate_ttl(now_wall_ms + 1, now_wall_ms, now_epoch_s).is_err());
        assert!(validate_ttl(2_592_001, now_wall_ms, now_epoch_s).is_err());

        assert!(validate_ttl(0, now_wall_ms, now_epoch_s).is_ok());
        assert!(validate_ttl(30, now_wall_ms, now_epoch_s).is_ok());
        assert!(validate_ttl(2_592_000, now_wall_ms, now_epoch_s).is_ok());
        assert!(validate_ttl(now_epoch_s + 60, now_wall_ms, now_epoch_s).is_ok());
    }
}
