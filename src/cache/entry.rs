// Cache entry model.
// One persisted record per key: request descriptor, stored response, and validity window.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::http::{Headers, HttpRequest, HttpResponse, RequestBody};

use super::key::CacheKey;

/// Bumped whenever the on-disk record layout changes.
pub const ENTRY_FORMAT_VERSION: u32 = 1;

/// Request headers kept in the descriptor. Credentials are never written to disk.
const REPLAY_HEADERS: &[&str] = &["accept", "accept-language", "content-type"];

/// The request that produced an entry. Diagnostic only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<RequestBody>,
}

impl From<&HttpRequest> for RequestDescriptor {
    fn from(request: &HttpRequest) -> Self {
        Self {
            method: request.method.clone(),
            url: request.url.to_string(),
            headers: request.headers.subset(REPLAY_HEADERS),
            body: request.body.clone(),
        }
    }
}

/// A cached response with its validity window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub version: u32,
    pub key: CacheKey,
    pub request: RequestDescriptor,
    pub response: HttpResponse,
    /// When the response was fetched.
    pub created_at: DateTime<Utc>,
    /// `created_at` plus the TTL in force at write time.
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(
        key: CacheKey,
        request: &HttpRequest,
        response: HttpResponse,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            version: ENTRY_FORMAT_VERSION,
            key,
            request: RequestDescriptor::from(request),
            response,
            created_at,
            expires_at,
        }
    }

    /// Valid strictly before `expires_at`; the boundary instant is already expired.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_valid_at(now)
    }

    /// Time since the entry was fetched, zero if the clock went backwards.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}
