//! In-memory stages run for every event before any I/O is issued:
//! admission, redaction and hash chaining.

pub mod integrity;
pub mod ratelimit;
pub mod redact;

pub use integrity::{compute_hash, HashAlgorithm, IntegrityChain, GENESIS_HASH};
pub use ratelimit::{RateLimiter, TokenBucket};
pub use redact::Redactor;
