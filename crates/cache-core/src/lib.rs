//! Request orchestration core for a distributed, multi-replica, in-process
//! ephemeral cache client.
//!
//! This crate implements the facade that mediates between application code
//! issuing logical cache operations and a pool of per-replica backends
//! organised into failure domains ("server groups"). The underlying wire
//! protocol, server-group discovery/health and transcoder byte formats are
//! external collaborators, expressed here only as traits (see
//! [`collaborators`]).

mod bulk;
mod client;
mod collaborators;
mod config;
mod consistent;
mod error;
mod event;
mod key;
mod latch;
mod metrics;
mod near_cache;
mod read;
mod write;

pub use bulk::BulkStatus;
pub use client::CacheClient;
pub use collaborators::{FlaggedValue, Pool, Replica, ServerGroup, Transcoder};
pub use config::{Config, ConfigHandle};
pub use consistent::ConsistencyPolicy;
pub use error::{Error, Result};
pub use event::{CallKind, Event, EventBus, EventListener, EventStatus};
pub use key::{HashAlgorithm, KeyNormalizer, NormalisedKey};
pub use latch::{Latch, Policy};
