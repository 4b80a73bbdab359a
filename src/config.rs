// Cache configuration.
// The two knobs a caller controls: where entries live and how long they stay valid.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::paths::{FALLBACK_CACHE_DIR, default_cache_dir};

/// Default TTL for cached responses: 1 hour.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory holding one file per cached request.
    pub cache_dir: PathBuf,
    /// Validity window applied to entries at write time.
    #[serde(rename = "ttl_seconds", with = "duration_secs")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir().unwrap_or_else(|| PathBuf::from(FALLBACK_CACHE_DIR)),
            ttl: DEFAULT_TTL,
        }
    }
}

impl CacheConfig {
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(ttl.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
