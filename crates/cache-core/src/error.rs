pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced by the core orchestrator (spec §7).
///
/// Every public facade method consults the effective throw flag
/// (call-scoped override OR configured default): when it is `false`
/// these are swallowed and converted into `None` / empty results /
/// zero-width latches rather than returned.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid ttl {ttl}: {reason}")]
    InvalidTtl { ttl: i64, reason: &'static str },

    #[error("no replica available for {role}")]
    NullClient { role: &'static str },

    #[error("call throttled by an event listener")]
    Throttled,

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("failed to connect to replica: {0}")]
    ConnectError(String),

    #[error("replica read queue is full")]
    ReadQueueFull,

    #[error("hashed-key collision: expected canonical key {expected:?}, found {found:?}")]
    Collision { expected: String, found: String },

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}
