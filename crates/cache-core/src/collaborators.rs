//! Collaborator contracts (spec §6.1). These are external to the core: the
//! binary wire protocol, server-group discovery/health/reconnection and
//! transcoder byte formats are implemented by whoever constructs a
//! [`CacheClient`](crate::CacheClient), not by this crate.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::latch::Latch;

/// Identity of a replica's failure domain (typically an availability zone).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerGroup(pub String);

impl std::fmt::Display for ServerGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored value plus the flags a [`Transcoder`] attached to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlaggedValue {
    pub flags: u32,
    pub bytes: Bytes,
}

/// A single per-replica memcached-style backend (spec §3.3).
#[async_trait]
pub trait Replica: Send + Sync + std::fmt::Debug {
    fn server_group(&self) -> &ServerGroup;

    /// Whether this replica expects the un-prefixed application key on the
    /// wire rather than the canonical/hashed key (spec §3.1, §9).
    fn is_duet_client(&self) -> bool {
        false
    }

    async fn get(&self, wire_key: &str) -> Result<Option<FlaggedValue>>;

    async fn get_bulk(&self, wire_keys: &[String]) -> Result<std::collections::HashMap<String, FlaggedValue>>;

    async fn meta_get(&self, wire_key: &str) -> Result<Option<FlaggedValue>> {
        self.get(wire_key).await
    }

    async fn meta_debug(&self, wire_key: &str) -> Result<Option<String>>;

    async fn set(&self, wire_key: &str, value: FlaggedValue, ttl: i64, latch: Option<&Latch>) -> Result<bool>;

    async fn add(&self, wire_key: &str, value: FlaggedValue, ttl: i64, latch: Option<&Latch>) -> Result<bool>;

    async fn replace(&self, wire_key: &str, value: FlaggedValue, ttl: i64, latch: Option<&Latch>) -> Result<bool>;

    async fn append(&self, wire_key: &str, value: FlaggedValue, latch: Option<&Latch>) -> Result<bool>;

    async fn append_or_add(
        &self,
        wire_key: &str,
        value: FlaggedValue,
        ttl: i64,
        latch: Option<&Latch>,
    ) -> Result<bool>;

    async fn delete(&self, wire_key: &str, latch: Option<&Latch>) -> Result<bool>;

    async fn touch(&self, wire_key: &str, ttl: i64, latch: Option<&Latch>) -> Result<bool>;

    /// Returns the post-increment value, or `-1` if the key did not exist and
    /// `default` was not applicable (spec §4.6 incr/decr convergence).
    async fn incr(&self, wire_key: &str, delta: i64, default: i64, ttl: i64, latch: Option<&Latch>) -> Result<i64>;

    async fn decr(&self, wire_key: &str, delta: i64, default: i64, ttl: i64, latch: Option<&Latch>) -> Result<i64>;
}

/// Supplies a primary read replica, ordered fallback replicas, and the full
/// write-set (spec §6.1).
#[async_trait]
pub trait Pool: Send + Sync {
    fn get_client_for_read(&self) -> Option<std::sync::Arc<dyn Replica>>;

    /// Ordered fallback replicas, excluding any in `excluding`'s server group.
    fn get_clients_for_read_excluding(&self, excluding: &ServerGroup) -> Vec<std::sync::Arc<dyn Replica>>;

    fn get_clients_for_write(&self) -> Vec<std::sync::Arc<dyn Replica>>;

    /// Subset of the write-set excluded from the success-quorum denominator.
    fn get_write_only_clients(&self) -> Vec<std::sync::Arc<dyn Replica>> {
        Vec::new()
    }

    fn get_read_timeout(&self) -> std::time::Duration;

    fn get_operation_timeout(&self) -> std::time::Duration;

    fn supports_fallback(&self) -> bool {
        true
    }
}

/// Encodes/decodes application values to/from a `(flags, bytes)` pair
/// (spec §6.1). A secondary envelope transcoder (no compression) wraps a
/// hashed-key payload with its original canonical key for collision
/// detection (spec §3.2).
pub trait Transcoder<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<FlaggedValue>;
    fn decode(&self, value: &FlaggedValue) -> Result<T>;
}

/// The envelope written to the backend when a hashed key is in effect
/// (spec §3.2). On read its `canonical_key` MUST equal the caller's
/// canonical key, else the read is treated as a miss plus a collision
/// counter increment (spec §4.6/§4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EVCacheValue {
    pub canonical_key: String,
    pub flags: u32,
    pub payload: Bytes,
    pub ttl: i64,
    pub write_time: i64,
}

/// Envelope transcoder: wraps/unwraps an already-encoded payload with its
/// canonical key, with compression disabled (spec §3.2, §6.1).
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeTranscoder;

impl EnvelopeTranscoder {
    pub fn wrap(&self, canonical_key: &str, payload: FlaggedValue, ttl: i64, write_time: i64) -> EVCacheValue {
        EVCacheValue {
            canonical_key: canonical_key.to_string(),
            flags: payload.flags,
            payload: payload.bytes,
            ttl,
            write_time,
        }
    }

    pub fn encode(&self, envelope: &EVCacheValue) -> FlaggedValue {
        // A length-prefixed canonical key followed by the raw payload bytes:
        // simple and sufficient since this transcoder only round-trips
        // within this crate's own write/read paths.
        let key_bytes = envelope.canonical_key.as_bytes();
        let mut buf = Vec::with_capacity(4 + key_bytes.len() + envelope.payload.len());
        buf.extend_from_slice(&(key_bytes.len() as u32).to_be_bytes());
        buf.extend_from_slice(key_bytes);
        buf.extend_from_slice(&envelope.payload);
        FlaggedValue {
            flags: envelope.flags,
            bytes: Bytes::from(buf),
        }
    }

    pub fn decode(&self, wire: &FlaggedValue, ttl: i64, write_time: i64) -> Result<EVCacheValue> {
        let bytes = &wire.bytes;
        if bytes.len() < 4 {
            return Err(crate::error::Error::Unexpected(anyhow::anyhow!(
                "envelope payload shorter than length prefix"
            )));
        }
        let key_len = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
        if bytes.len() < 4 + key_len {
            return Err(crate::error::Error::Unexpected(anyhow::anyhow!(
                "envelope payload shorter than declared key length"
            )));
        }
        let canonical_key = String::from_utf8_lossy(&bytes[4..4 + key_len]).into_owned();
        let payload = wire.bytes.slice(4 + key_len..);
        Ok(EVCacheValue {
            canonical_key,
            flags: wire.flags,
            payload,
            ttl,
            write_time,
        })
    }
}
