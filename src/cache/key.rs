//! Cache Key Derivation
//!
//! Keys have the shape `"{entity}:{method}:{digest}"` where the digest is the
//! hex SHA-256 of the canonical JSON form of `{"method", "args"}`. Writes
//! invalidate a whole family with a prefix scan on `"{entity}:"`. The scan
//! must be anchored at the key start: as a substring, `"topic:"` would also
//! match `document_topic:*` and `document:find_by_topic:*`.

use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::domain::EntityType;
use crate::error::Result;

/// Derive the cache key for `method` called with `args` on `entity_type`.
///
/// `serde_json::Map` keeps keys sorted, so structurally equal arguments
/// always produce the same digest.
pub fn derive_key<A: Serialize + ?Sized>(
    entity_type: &EntityType,
    method: &str,
    args: &A,
) -> Result<String> {
    let canonical = serde_json::to_vec(&json!({
        "method": method,
        "args": serde_json::to_value(args)?,
    }))?;

    let digest = Sha256::digest(&canonical);
    Ok(format!("{}:{}:{}", entity_type, method, hex::encode(digest)))
}

/// Prefix shared by every key cached for `entity_type`.
pub fn entity_prefix(entity_type: &EntityType) -> String {
    format!("{}:", entity_type)
}

/// Prefix shared by every key cached for one method of `entity_type`.
pub fn method_prefix(entity_type: &EntityType, method: &str) -> String {
    format!("{}:{}:", entity_type, method)
}

// =============================================================================
// Tests
// =============================================================================
