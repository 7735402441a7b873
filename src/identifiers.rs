//! Type-safe identifiers for endpoints and operations.
//!
//! Both identifiers are stable fingerprints (64-bit FNV-1a), not
//! cryptographic hashes. They are map keys and wire ids, nothing more.
//!
//! | Type | Derived from | Used as |
//! |------|--------------|---------|
//! | [`EndpointId`] | transport URL | registry key |
//! | [`OperationId`] | URL, query, variables, disambiguator | operation table key and wire `id` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Constants
// ============================================================================

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Separator between the parts of an operation id.
pub const OPERATION_ID_DELIMITER: char = '.';

/// Unit separator fed between query text and variables so that
/// `("ab", "c")` and `("a", "bc")` fingerprint differently.
const FIELD_SEPARATOR: u8 = 0x1f;

// ============================================================================
// Fingerprinting
// ============================================================================

/// Incremental 64-bit FNV-1a.
#[derive(Debug, Clone, Copy)]
struct Fnv1a(u64);

impl Fnv1a {
    #[inline]
    const fn new() -> Self {
        Self(FNV_OFFSET_BASIS)
    }

    #[inline]
    fn write(mut self, bytes: &[u8]) -> Self {
        for byte in bytes {
            self.0 ^= u64::from(*byte);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
        self
    }

    #[inline]
    const fn finish(self) -> u64 {
        self.0
    }
}

/// Returns the FNV-1a fingerprint of `input`.
#[inline]
#[must_use]
pub fn fingerprint(input: &str) -> u64 {
    Fnv1a::new().write(input.as_bytes()).finish()
}

// ============================================================================
// EndpointId
// ============================================================================

/// Registry key for one transport URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(u64);

impl EndpointId {
    /// Fingerprints an endpoint URL.
    #[inline]
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        Self(fingerprint(url))
    }

    /// Returns the raw fingerprint.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// ============================================================================
// OperationId
// ============================================================================

/// Identity of one subscription operation.
///
/// Format: `{endpoint}.{query}.{disambiguator}` where `endpoint` is the URL
/// fingerprint, `query` the fingerprint of the query text and serialized
/// variables, and `disambiguator` the caller-supplied key verbatim.
///
/// The disambiguator is kept verbatim so two structurally identical
/// subscriptions with different keys can never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Computes the identity of `(query, variables, disambiguator)` on an endpoint.
    #[must_use]
    pub fn new(endpoint: &str, query: &str, variables: &Value, disambiguator: u64) -> Self {
        let query_fp = Fnv1a::new()
            .write(query.as_bytes())
            .write(&[FIELD_SEPARATOR])
            .write(variables.to_string().as_bytes())
            .finish();

        Self(format!(
            "{endpoint}{delim}{query_fp:016x}{delim}{disambiguator}",
            endpoint = EndpointId::from_url(endpoint),
            delim = OPERATION_ID_DELIMITER,
        ))
    }

    /// Wraps an id received on the wire.
    #[inline]
    #[must_use]
    pub fn from_wire(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for OperationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_known_vectors() {
        assert_eq!(fingerprint(""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fingerprint("a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(fingerprint("foobar"), 0x8594_4171_f739_67e8);
    }

    #[test]
    fn test_endpoint_id_is_stable() {
        let a = EndpointId::from_url("wss://h/s");
        let b = EndpointId::from_url("wss://h/s");
        assert_eq!(a, b);
        assert_ne!(a, EndpointId::from_url("wss://h/t"));
        assert_eq!(a.to_string().len(), 16);
    }

    #[test]
    fn test_operation_id_format() {
        let id = OperationId::new("wss://h/s", "subscription{m{id}}", &json!({}), 7);
        let parts: Vec<&str> = id.as_str().split(OPERATION_ID_DELIMITER).collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], EndpointId::from_url("wss://h/s").to_string());
        assert_eq!(parts[2], "7");
    }

    #[test]
    fn test_variables_change_identity() {
        let q = "subscription($id:ID!){m(id:$id){id}}";
        let a = OperationId::new("wss://h/s", q, &json!({"id": 1}), 0);
        let b = OperationId::new("wss://h/s", q, &json!({"id": 2}), 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_query_variables_boundary() {
        let a = OperationId::new("wss://h/s", "ab", &json!("c"), 0);
        let b = OperationId::new("wss://h/s", "a", &json!("bc"), 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = OperationId::from_wire("0");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""0""#);
    }

    proptest! {
        #[test]
        fn prop_identical_tuples_collapse(
            url in "wss?://[a-z]{1,12}/[a-z]{0,8}",
            query in ".{0,64}",
            n in any::<i64>(),
            key in any::<u64>(),
        ) {
            let vars = json!({ "n": n });
            prop_assert_eq!(
                OperationId::new(&url, &query, &vars, key),
                OperationId::new(&url, &query, &vars, key)
            );
        }

        #[test]
        fn prop_disambiguator_separates(
            url in "wss?://[a-z]{1,12}/[a-z]{0,8}",
            query in ".{0,64}",
            a in any::<u64>(),
            b in any::<u64>(),
        ) {
            prop_assume!(a != b);
            let vars = json!({});
            prop_assert_ne!(
                OperationId::new(&url, &query, &vars, a),
                OperationId::new(&url, &query, &vars, b)
            );
        }
    }
}
