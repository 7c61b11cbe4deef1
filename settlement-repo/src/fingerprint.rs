//! Request fingerprinting for idempotency checks.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Field excluded from the fingerprint: the key itself is not part of the request.
const KEY_FIELD: &str = "idempotency_key";

/// Hashes an operation name and its request into a stable hex digest.
///
/// The request is encoded as canonical JSON (object keys sorted) with the
/// top-level `idempotency_key` removed, so the same request sent with the key
/// in a header or in the body produces the same fingerprint.
pub fn fingerprint<T: Serialize>(operation: &str, request: &T) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(request)?;
    if let Value::Object(map) = &mut value {
        map.remove(KEY_FIELD);
    }
    let canonical = serde_json::to_vec(&value)?;

    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    hasher.update(b":");
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}
