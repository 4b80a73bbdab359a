// Cache key derivation.
// Hashes the normalized request (method, URL with sorted query, vary headers, body) with SHA-256.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::http::{HttpRequest, RequestBody};

/// Request headers that change the representation a server returns.
pub const VARY_HEADERS: &[&str] = &["accept", "authorization", "content-type"];

/// Length of a hex-encoded SHA-256 digest.
pub const KEY_LEN: usize = 64;

/// Deterministic identifier of a logical request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a normalized request. Pure: no I/O, clock, or randomness.
    pub fn for_request(request: &HttpRequest) -> Self {
        let mut hasher = Sha256::new();
        update_field(&mut hasher, request.method.as_bytes());
        update_field(&mut hasher, request.url.as_str().as_bytes());

        let vary = request.headers.subset(VARY_HEADERS);
        update_field(&mut hasher, &(vary.len() as u64).to_le_bytes());
        for (name, value) in vary.iter() {
            update_field(&mut hasher, name.as_bytes());
            update_field(&mut hasher, value.as_bytes());
        }

        match &request.body {
            None => update_field(&mut hasher, b"none"),
            Some(body) => {
                let (kind, canonical) = canonical_body(body);
                update_field(&mut hasher, kind.as_bytes());
                update_field(&mut hasher, &canonical);
            }
        }

        Self(hex::encode(hasher.finalize()))
    }

    /// Accept a string only if it looks like a digest produced by this module.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == KEY_LEN
            && s
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log fields.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Length-prefixed so adjacent fields can never run together.
fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn canonical_body(body: &RequestBody) -> (&'static str, Vec<u8>) {
    match body {
        RequestBody::Json(value) => {
            let mut out = String::new();
            write_canonical_json(value, &mut out);
            ("json", out.into_bytes())
        }
        RequestBody::Form(pairs) => {
            let mut sorted = pairs.clone();
            sorted.sort();
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&sorted)
                .finish();
            ("form", encoded.into_bytes())
        }
        RequestBody::Text(text) => ("text", text.as_bytes().to_vec()),
        RequestBody::Bytes(bytes) => ("bytes", bytes.clone()),
    }
}

/// Compact JSON with object keys sorted at every level.
fn write_canonical_json(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical_json(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_json(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
