//! # Integrity Chain
//!
//! Links every recorded event to its predecessor:
//!
//! ```text
//! hash = hex(H(prevHash ++ json(event)))
//! ```
//!
//! where `json(event)` is the canonical serialization of the event without
//! the hash fields. The first event of a chain instance uses 64 `'0'`
//! characters as `prevHash`. Editing any recorded event invalidates its hash
//! and, through `prevHash`, every later one. Verification needs nothing but
//! the recorded lines; see [`crate::verify`].

use crate::config::IntegrityConfig;
use crate::error::TelemetryError;
use crate::event::{ChainLink, SignedEvent, TelemetryEvent};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::str::FromStr;

/// `prevHash` of the first event in a chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Supported digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    /// Lowercase hex digest of `parts` fed in order.
    pub fn digest_hex(self, parts: &[&[u8]]) -> String {
        fn run<D: Digest>(parts: &[&[u8]]) -> String {
            let mut hasher = D::new();
            for part in parts {
                hasher.update(*part);
            }
            hex::encode(hasher.finalize())
        }

        match self {
            HashAlgorithm::Sha256 => run::<Sha256>(parts),
            HashAlgorithm::Sha384 => run::<Sha384>(parts),
            HashAlgorithm::Sha512 => run::<Sha512>(parts),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha384" => Ok(HashAlgorithm::Sha384),
            "sha512" => Ok(HashAlgorithm::Sha512),
            other => Err(TelemetryError::Config(format!(
                "unsupported integrity algorithm '{}'",
                other
            ))),
        }
    }
}

/// Hash of `event` chained onto `prev_hash`.
///
/// This is the single definition shared by signing and verification.
pub fn compute_hash(
    algorithm: HashAlgorithm,
    prev_hash: &str,
    event: &TelemetryEvent,
) -> Result<String, TelemetryError> {
    let canonical = serde_json::to_vec(event)?;
    Ok(algorithm.digest_hex(&[prev_hash.as_bytes(), &canonical]))
}

/// Chaining strategy, chosen once at construction.
#[derive(Debug)]
pub enum IntegrityChain {
    /// Events pass through without hash fields.
    Disabled,

    /// Hash chain state.
    Chained {
        algorithm: HashAlgorithm,
        prev_hash: String,
    },
}

impl IntegrityChain {
    pub fn from_config(config: &IntegrityConfig) -> Result<Self, TelemetryError> {
        if !config.enabled {
            return Ok(IntegrityChain::Disabled);
        }
        let algorithm = config.algorithm.parse()?;
        Ok(IntegrityChain::new(algorithm))
    }

    /// A fresh chain starting at the genesis hash.
    pub fn new(algorithm: HashAlgorithm) -> Self {
        IntegrityChain::Chained {
            algorithm,
            prev_hash: GENESIS_HASH.to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, IntegrityChain::Chained { .. })
    }

    /// Hash of the most recently signed event, or the genesis hash.
    pub fn head(&self) -> Option<&str> {
        match self {
            IntegrityChain::Disabled => None,
            IntegrityChain::Chained { prev_hash, .. } => Some(prev_hash),
        }
    }

    /// Attach `prevHash`/`hash` and advance the chain.
    ///
    /// On a serialization failure the chain does not advance.
    pub fn sign(&mut self, event: TelemetryEvent) -> Result<SignedEvent, TelemetryError> {
        match self {
            IntegrityChain::Disabled => Ok(SignedEvent::unsigned(event)),
            IntegrityChain::Chained {
                algorithm,
                prev_hash,
            } => {
                let hash = compute_hash(*algorithm, prev_hash, &event)?;
                let link = ChainLink {
                    prev_hash: std::mem::replace(prev_hash, hash.clone()),
                    hash,
                };
                Ok(SignedEvent {
                    event,
                    link: Some(link),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventInput, EventKind};
    use serde_json::Map;

    fn tool_start(name: &str, seq: u64, ts: u64) -> TelemetryEvent {
        TelemetryEvent::stamp(
            EventInput::new(EventKind::ToolStart {
                tool_name: name.into(),
                params: Map::new(),
            }),
            seq,
            ts,
        )
    }

    fn tool_end(seq: u64, ts: u64) -> TelemetryEvent {
        TelemetryEvent::stamp(
            EventInput::new(EventKind::ToolEnd {
                tool_name: "test".into(),
                duration_ms: None,
                success: true,
                error: None,
            }),
            seq,
            ts,
        )
    }

    fn enabled() -> IntegrityChain {
        IntegrityChain::from_config(&IntegrityConfig {
            enabled: true,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_disabled_adds_no_fields() {
        let mut chain = IntegrityChain::from_config(&IntegrityConfig::default()).unwrap();
        let evt = tool_start("test", 1, 1000);
        let signed = chain.sign(evt.clone()).unwrap();
        assert_eq!(signed.event, evt);
        assert!(signed.link.is_none());
        assert!(chain.head().is_none());
    }

    #[test]
    fn test_first_event_uses_genesis() {
        let mut chain = enabled();
        let signed = chain.sign(tool_start("test", 1, 1000)).unwrap();
        assert_eq!(signed.prev_hash(), Some(GENESIS_HASH));
        assert_eq!(GENESIS_HASH, "0".repeat(64));

        let hash = signed.hash().unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(chain.head(), Some(hash));
    }

    #[test]
    fn test_links_consecutive_events() {
        let mut chain = enabled();
        let first = chain.sign(tool_start("test", 1, 1000)).unwrap();
        let second = chain.sign(tool_end(2, 2000)).unwrap();
        assert_eq!(second.prev_hash(), first.hash());
    }

    #[test]
    fn test_hash_is_reproducible_externally() {
        let mut chain = enabled();
        let events = vec![tool_start("test", 1, 1000), tool_end(2, 2000)];
        let signed: Vec<_> = events
            .into_iter()
            .map(|e| chain.sign(e).unwrap())
            .collect();

        for (i, s) in signed.iter().enumerate() {
            let expected_prev = if i == 0 {
                GENESIS_HASH.to_string()
            } else {
                signed[i - 1].hash().unwrap().to_string()
            };
            assert_eq!(s.prev_hash(), Some(expected_prev.as_str()));

            let mut hasher = Sha256::new();
            hasher.update(expected_prev.as_bytes());
            hasher.update(serde_json::to_string(&s.event).unwrap().as_bytes());
            assert_eq!(s.hash(), Some(hex::encode(hasher.finalize()).as_str()));
        }
    }

    #[test]
    fn test_independent_chains_agree() {
        let mut a = enabled();
        let mut b = enabled();
        for seq in 1..=5 {
            let ha = a.sign(tool_start("x", seq, seq * 10)).unwrap();
            let hb = b.sign(tool_start("x", seq, seq * 10)).unwrap();
            assert_eq!(ha.hash(), hb.hash());
        }
    }

    #[test]
    fn test_single_field_change_changes_hash() {
        let mut a = enabled();
        let mut b = enabled();
        let ha = a.sign(tool_start("test1", 1, 1000)).unwrap();
        let hb = b.sign(tool_start("test2", 1, 1000)).unwrap();
        assert_ne!(ha.hash(), hb.hash());
    }

    #[test]
    fn test_sha512_and_bad_algorithm() {
        let mut chain = IntegrityChain::from_config(&IntegrityConfig {
            enabled: true,
            algorithm: "SHA-512".into(),
        })
        .unwrap();
        let signed = chain.sign(tool_start("x", 1, 1)).unwrap();
        assert_eq!(signed.hash().unwrap().len(), 128);
        // The genesis sentinel does not depend on the digest size
        assert_eq!(signed.prev_hash(), Some(GENESIS_HASH));

        let err = IntegrityChain::from_config(&IntegrityConfig {
            enabled: true,
            algorithm: "md5".into(),
        })
        .unwrap_err();
        assert!(matches!(err, TelemetryError::Config(_)));
    }
}
