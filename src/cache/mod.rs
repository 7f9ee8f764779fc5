//! Query-Result Cache
//!
//! In-memory cache shared by the caching repository decorators.
//!
//! - **entry** - Per-key expiry and hit counters, aggregate stats
//! - **key** - Deterministic key derivation from method and arguments
//! - **store** - TTL + LFU-tail store and the `QueryCache` port

pub mod entry;
pub mod key;
pub mod store;

pub use entry::{CacheEntry, CacheStats};
pub use key::{derive_key, entity_prefix, method_prefix};
pub use store::{CacheStore, DisabledCache, QueryCache};
