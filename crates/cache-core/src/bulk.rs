//! C7 Bulk Read Orchestrator (spec §4.7): multi-key reads, including partial
//! fallback for the unfilled subset.
//!
//! Grounded on `journal_client::fragments::FragmentIter`'s pattern of
//! accumulating into a growing result across repeated requests until nothing
//! is left to fetch.

use std::collections::HashMap;

use crate::collaborators::{EnvelopeTranscoder, FlaggedValue, Pool, Replica, Transcoder};
use crate::config::Config;
use crate::error::Result;
use crate::key::NormalisedKey;
use crate::metrics;
use crate::read::wire_key_for;

/// `BHIT` / `BHIT_PARTIAL(keys)` / `BMISS_ALL` (spec §4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkStatus {
    Hit,
    HitPartial(Vec<String>),
    MissAll,
}

pub struct BulkOrchestrator<'a> {
    pub pool: &'a dyn Pool,
    pub config: &'a Config,
    pub app: &'a str,
}

impl<'a> BulkOrchestrator<'a> {
    /// `keys` is already normalised by the caller (spec §4.7: "Normalise
    /// each"). The returned map has an entry for every requested application
    /// key iff the result is `BMISS_ALL` (mapped to `None`) or every key
    /// resolved; a `BHIT_PARTIAL` map holds only the keys that resolved
    /// (Invariant 7).
    pub async fn get_bulk<T: Clone + Send + 'static>(
        &self,
        keys: &[NormalisedKey],
        transcoder: &dyn Transcoder<T>,
    ) -> Result<(HashMap<String, Option<T>>, BulkStatus)> {
        metrics::overall_keys_size(self.app, keys.len());

        if keys.is_empty() {
            return Ok((HashMap::new(), BulkStatus::MissAll));
        }

        let primary = self.pool.get_client_for_read();
        let mut resolved: HashMap<String, T> = HashMap::new();
        let mut remaining: Vec<NormalisedKey> = keys.to_vec();

        if let Some(primary) = &primary {
            self.attempt(primary.as_ref(), &mut remaining, &mut resolved, transcoder)
                .await?;
        }

        let primary_hits: Vec<String> = resolved.keys().cloned().collect();

        if !remaining.is_empty() && self.config.bulk_fallback_zone() && resolved.is_empty() {
            // Full-fallback: primary returned nothing at all.
            if let Some(primary) = &primary {
                for replica in self.pool.get_clients_for_read_excluding(primary.server_group()) {
                    self.attempt(replica.as_ref(), &mut remaining, &mut resolved, transcoder)
                        .await?;
                    if remaining.is_empty() {
                        break;
                    }
                }
            }
        } else if !remaining.is_empty() && self.config.bulk_partial_fallback_zone() && !resolved.is_empty() {
            // Partial-fallback: primary returned some but not all keys.
            if let Some(primary) = &primary {
                for replica in self.pool.get_clients_for_read_excluding(primary.server_group()) {
                    self.attempt(replica.as_ref(), &mut remaining, &mut resolved, transcoder)
                        .await?;
                    if remaining.is_empty() {
                        break;
                    }
                }
            }
        }

        let status = if resolved.is_empty() {
            BulkStatus::MissAll
        } else if remaining.is_empty() {
            BulkStatus::Hit
        } else {
            BulkStatus::HitPartial(primary_hits)
        };

        let result: HashMap<String, Option<T>> = if matches!(status, BulkStatus::MissAll) {
            keys.iter()
                .map(|k| (k.application_key().to_string(), None))
                .collect()
        } else {
            resolved.into_iter().map(|(k, v)| (k, Some(v))).collect()
        };

        Ok((result, status))
    }

    /// On a hit, triggers a best-effort touch fan-out for every resolved key
    /// (spec §4.7 bulk-and-touch).
    pub async fn get_bulk_and_touch<T: Clone + Send + 'static>(
        &self,
        keys: &[NormalisedKey],
        ttl: i64,
        transcoder: &dyn Transcoder<T>,
    ) -> Result<(HashMap<String, Option<T>>, BulkStatus)> {
        let (result, status) = self.get_bulk(keys, transcoder).await?;

        let resolved_keys: Vec<&NormalisedKey> = keys
            .iter()
            .filter(|k| result.get(k.application_key()).is_some_and(Option::is_some))
            .collect();

        for replica in self.pool.get_clients_for_write() {
            for key in &resolved_keys {
                let wire_key = wire_key_for(key, replica.as_ref());
                if let Err(err) = replica.touch(&wire_key, ttl, None).await {
                    tracing::debug!(?err, "best-effort bulk touch failed");
                }
            }
        }

        Ok((result, status))
    }

    /// One bulk RPC against `replica` for every key still in `remaining`,
    /// moving resolved keys into `resolved` and shrinking `remaining` in
    /// place (spec §4.7).
    async fn attempt<T: Send + 'static>(
        &self,
        replica: &dyn Replica,
        remaining: &mut Vec<NormalisedKey>,
        resolved: &mut HashMap<String, T>,
        transcoder: &dyn Transcoder<T>,
    ) -> Result<()> {
        if remaining.is_empty() {
            return Ok(());
        }

        let any_hashed = remaining.iter().any(|k| k.hashed_key().is_some());
        let wire_keys: Vec<String> = remaining.iter().map(|k| wire_key_for(k, replica)).collect();

        let response = replica.get_bulk(&wire_keys).await?;

        let mut still_remaining = Vec::new();
        for key in remaining.iter() {
            let wire = wire_key_for(key, replica);
            if let Some(raw) = response.get(&wire) {
                if let Some(decoded) = self.decode_bulk_entry(key, raw, any_hashed, transcoder)? {
                    resolved.insert(key.application_key().to_string(), decoded);
                    continue;
                }
            }
            still_remaining.push(key.clone());
        }
        *remaining = still_remaining;
        Ok(())
    }

    fn decode_bulk_entry<T>(
        &self,
        key: &NormalisedKey,
        raw: &FlaggedValue,
        any_hashed: bool,
        transcoder: &dyn Transcoder<T>,
    ) -> Result<Option<T>> {
        if any_hashed && key.hashed_key().is_some() {
            let envelope = EnvelopeTranscoder.decode(raw, 0, 0)?;
            if envelope.canonical_key != key.canonical_key() {
                metrics::key_hash_collision(self.app);
                return Ok(None);
            }
            let payload = FlaggedValue {
                flags: envelope.flags,
                bytes: envelope.payload,
            };
            return Ok(Some(transcoder.decode(&payload)?));
        }
        Ok(Some(transcoder.decode(raw)?))
    }
}
