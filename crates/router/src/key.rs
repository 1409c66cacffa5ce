//! Routing keys.
//!
//! A key names one cacheable computation: the same check against the same
//! snapshot always produces the same key, so it lands on the same node.

use xxhash_rust::xxh3::xxh3_64;

use crate::model::CheckRequest;

/// `check_{tenant}_{schema}:{snap}:{type}:{id}#{permission}@{subject}`
pub fn routing_key(request: &CheckRequest) -> String {
    format!(
        "check_{}_{}:{}:{}#{}@{}",
        request.tenant_id,
        request.metadata.schema_version,
        request.metadata.snap_token,
        request.entity,
        request.permission,
        request.subject,
    )
}

/// [`routing_key`] hashed to 16 lowercase hex digits, for call metadata.
pub fn hashed_routing_key(request: &CheckRequest) -> String {
    format!("{:016x}", xxh3_64(routing_key(request).as_bytes()))
}
