use std::hash::Hasher;

use crate::error::{Error, Result};

/// Digest algorithm used to derive a hashed wire key from a canonical key
/// (config key `<app>.hash.algo`, default `siphash24`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    #[default]
    SipHash24,
    Xxh3,
}

impl HashAlgorithm {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "siphash24" => Some(HashAlgorithm::SipHash24),
            "xxh3" => Some(HashAlgorithm::Xxh3),
            _ => None,
        }
    }

    fn digest(self, canonical_key: &str) -> String {
        match self {
            HashAlgorithm::SipHash24 => {
                let mut hasher = siphasher::sip::SipHasher24::new();
                hasher.write(canonical_key.as_bytes());
                format!("{:016x}", hasher.finish())
            }
            HashAlgorithm::Xxh3 => {
                format!("{:016x}", xxhash_rust::xxh3::xxh3_64(canonical_key.as_bytes()))
            }
        }
    }
}

/// Immutable triple produced once per call (spec §3.1).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalisedKey {
    application_key: String,
    canonical_key: String,
    hashed_key: Option<String>,
    algorithm: HashAlgorithm,
}

impl NormalisedKey {
    pub fn application_key(&self) -> &str {
        &self.application_key
    }

    pub fn canonical_key(&self) -> &str {
        &self.canonical_key
    }

    pub fn hashed_key(&self) -> Option<&str> {
        self.hashed_key.as_deref()
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Returns `hashed_key` if present, else `canonical_key`. `for_duet_replica`
    /// selects the un-prefixed `application_key` form for replicas that expect
    /// it (an opaque replica capability, spec §3.1/§9).
    pub fn derived_key(&self, for_duet_replica: bool) -> &str {
        if for_duet_replica {
            return &self.application_key;
        }
        self.hashed_key.as_deref().unwrap_or(&self.canonical_key)
    }
}

/// Validates, prefixes, length-checks and optionally hashes application keys
/// into [`NormalisedKey`] triples (spec §4.1, component C1).
#[derive(Debug, Clone)]
pub struct KeyNormalizer {
    prefix: Option<String>,
    max_key_length: usize,
    algorithm: HashAlgorithm,
    force_hash: bool,
    auto_hash: bool,
}

impl KeyNormalizer {
    pub fn new(prefix: Option<String>) -> Self {
        KeyNormalizer {
            prefix,
            max_key_length: 200,
            algorithm: HashAlgorithm::default(),
            force_hash: false,
            auto_hash: false,
        }
    }

    pub fn with_max_key_length(mut self, max_key_length: usize) -> Self {
        self.max_key_length = max_key_length;
        self
    }

    pub fn with_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_force_hash(mut self, force_hash: bool) -> Self {
        self.force_hash = force_hash;
        self
    }

    pub fn with_auto_hash(mut self, auto_hash: bool) -> Self {
        self.auto_hash = auto_hash;
        self
    }

    /// Normalises `application_key`. Rejects null/empty/whitespace-containing
    /// keys with [`Error::InvalidArgument`]; if hashing is not in effect and
    /// the canonical key still exceeds `max_key_length`, fails with the same
    /// kind (spec §4.1 invariant) instead of producing an over-length key.
    pub fn normalise(&self, application_key: &str) -> Result<NormalisedKey> {
        if application_key.is_empty() || application_key.chars().any(char::is_whitespace) {
            return Err(Error::InvalidArgument(format!(
                "key must be non-empty and contain no whitespace: {application_key:?}"
            )));
        }

        let canonical_key = match &self.prefix {
            Some(prefix) => format!("{prefix}:{application_key}"),
            None => application_key.to_string(),
        };

        let needs_hash = self.force_hash
            || (self.auto_hash && canonical_key.len() > self.max_key_length);

        let hashed_key = if needs_hash {
            Some(self.algorithm.digest(&canonical_key))
        } else {
            None
        };

        if hashed_key.is_none() && canonical_key.len() > self.max_key_length {
            return Err(Error::InvalidArgument(format!(
                "canonical key {canonical_key:?} exceeds max_key_length {} and hashing is not enabled",
                self.max_key_length
            )));
        }

        Ok(NormalisedKey {
            application_key: application_key.to_string(),
            canonical_key,
            hashed_key,
            algorithm: self.algorithm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_whitespace_keys() {
        let n = KeyNormalizer::new(None);
        assert!(n.normalise("").is_err());
        assert!(n.normalise("has space").is_err());
        assert!(n.normalise("tab\tchar").is_err());
    }

    #[test]
    fn composes_prefix() {
        let n = KeyNormalizer::new(Some("p".to_string()));
        let k = n.normalise("k").unwrap();
        assert_eq!(k.canonical_key(), "p:k");
        assert_eq!(k.hashed_key(), None);
        assert_eq!(k.derived_key(false), "p:k");
        assert_eq!(k.derived_key(true), "k");
    }

    #[test]
    fn rejects_overlength_without_hashing() {
        let n = KeyNormalizer::new(None).with_max_key_length(4);
        assert!(n.normalise("toolong").is_err());
    }

    #[test]
    fn auto_hashes_overlength_key() {
        let n = KeyNormalizer::new(None)
            .with_max_key_length(4)
            .with_auto_hash(true);
        let k = n.normalise("toolong").unwrap();
        assert!(k.hashed_key().is_some());
        assert_eq!(k.derived_key(false), k.hashed_key().unwrap());
    }

    #[test]
    fn force_hash_applies_regardless_of_length() {
        let n = KeyNormalizer::new(None).with_force_hash(true);
        let k = n.normalise("short").unwrap();
        assert!(k.hashed_key().is_some());
    }

    #[test]
    fn hash_is_deterministic_over_canonical_key_and_algorithm() {
        let n = KeyNormalizer::new(Some("p".into())).with_force_hash(true);
        let a = n.normalise("k").unwrap();
        let b = n.normalise("k").unwrap();
        assert_eq!(a.hashed_key(), b.hashed_key());
    }

    #[test]
    fn normalise_is_idempotent_over_application_key() {
        let n = KeyNormalizer::new(Some("p".into()));
        let once = n.normalise("k").unwrap();
        let twice = n.normalise(once.application_key()).unwrap();
        assert_eq!(once, twice);
    }
}
