//! C9 Consistent Read (spec §4.5): reads every write replica in parallel,
//! buckets equal values, and returns a value only if one bucket meets the
//! caller's success policy. Minority buckets are repaired with a delete.
//!
//! Grounded on `journal_client::fragments::FragmentIter`'s bounded-wait
//! fan-in shape, generalised from "wait for one" to "wait for all, bucket,
//! threshold".

use std::time::{Duration, Instant};

use futures::future::join_all;

use crate::collaborators::{FlaggedValue, Pool, Replica, Transcoder};
use crate::error::{Error, Result};
use crate::key::NormalisedKey;
use crate::latch::Policy;
use crate::metrics;
use crate::read::{decode_outcome, wire_key_for};

/// Success policy a caller supplies for a consistent read; shares the
/// fan-out write policy table (spec §3.5, §4.5: "per §3.5 policy table").
pub type ConsistencyPolicy = Policy;

/// 20 ms floor on the per-future wait, so a near-zero remaining budget
/// cannot starve every replica future at once (spec §5).
const MIN_PER_FUTURE_WAIT: Duration = Duration::from_millis(20);

pub struct ConsistentReadOrchestrator<'a> {
    pub pool: &'a dyn Pool,
    pub app: &'a str,
}

impl<'a> ConsistentReadOrchestrator<'a> {
    /// Executes `get(key, policy)` (spec §4.5). Degrades to a plain
    /// single-replica read when `policy`'s threshold is ≤ 1.
    pub async fn get<T: Send + 'static>(
        &self,
        key: &NormalisedKey,
        policy: ConsistencyPolicy,
        transcoder: &dyn Transcoder<T>,
    ) -> Result<Option<T>> {
        let write_set = self.pool.get_clients_for_write();
        if write_set.is_empty() {
            metrics::fast_fail(self.app, "get_consistent", metrics::CallType::Read, metrics::FailureReason::NullClient);
            return Err(Error::NullClient { role: "write" });
        }

        let required = policy.required(write_set.len());
        if required <= 1 {
            let primary = write_set[0].clone();
            let wire_key = wire_key_for(key, primary.as_ref());
            let value = primary.get(&wire_key).await?;
            return decode_outcome(value, key, transcoder, self.app);
        }

        let deadline = self.pool.get_read_timeout();
        let start = Instant::now();
        let per_future_wait = deadline.saturating_sub(start.elapsed()).max(MIN_PER_FUTURE_WAIT);

        let reads = write_set.iter().map(|replica| {
            let replica = replica.clone();
            let wire_key = wire_key_for(key, replica.as_ref());
            async move {
                let result = tokio::time::timeout(per_future_wait, replica.get(&wire_key)).await;
                match result {
                    Ok(Ok(value)) => (replica, value),
                    _ => (replica, None),
                }
            }
        });
        let results = join_all(reads).await;

        let buckets = bucket_by_equality(results);

        for bucket in &buckets {
            if bucket.replicas.len() >= required {
                for other in &buckets {
                    if !std::ptr::eq(other, bucket) {
                        self.repair(key, other).await;
                    }
                }
                return decode_outcome(Some(bucket.value.clone()), key, transcoder, self.app);
            }
        }

        // No bucket reached quorum: every bucket is a minority bucket
        // (invariant 6), so all of them get repaired before returning null.
        for bucket in &buckets {
            self.repair(key, bucket).await;
        }

        Ok(None)
    }

    /// Best-effort delete against every replica in a minority bucket.
    /// TODO: recover the majority's remaining TTL via meta-get + set instead
    /// of an outright delete (tracked upstream, not implemented here).
    async fn repair(&self, key: &NormalisedKey, bucket: &Bucket) {
        for replica in &bucket.replicas {
            let wire_key = wire_key_for(key, replica.as_ref());
            if let Err(err) = replica.delete(&wire_key, None).await {
                tracing::debug!(?err, server_group = %replica.server_group(), "consistent-read repair delete failed");
            }
        }
    }
}

struct Bucket {
    value: FlaggedValue,
    replicas: Vec<std::sync::Arc<dyn Replica>>,
}

/// Groups replica responses by value equality, scanning write replicas in
/// their pool-given order and appending into the first matching bucket —
/// never a `HashMap`, so iteration order is deterministic (Open Question
/// resolution, see `SPEC_FULL.md`). Buckets are then sorted by descending
/// size, ties broken by which bucket's value was observed first.
fn bucket_by_equality(
    results: Vec<(std::sync::Arc<dyn Replica>, Option<FlaggedValue>)>,
) -> Vec<Bucket> {
    let mut buckets: Vec<Bucket> = Vec::new();
    for (replica, value) in results {
        let Some(value) = value else { continue };
        if let Some(bucket) = buckets.iter_mut().find(|b| b.value == value) {
            bucket.replicas.push(replica);
        } else {
            buckets.push(Bucket {
                value,
                replicas: vec![replica],
            });
        }
    }
    buckets.sort_by_key(|b| std::cmp::Reverse(b.replicas.len()));
    buckets
}
