// Disk-backed HTTP response cache.
// Answers repeated requests from a local directory, honoring a TTL, forced refresh,
// named post-processors, and purge by age. Safe across tasks and across processes.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;

pub use cache::{CacheEntry, CacheKey, CacheOutput, CacheStats, ClearReport, EntryInfo, HttpCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, DEFAULT_TTL};
pub use error::{CacheError, Result};
pub use http::{
    Headers, HttpRequest, HttpResponse, ReqwestTransport, RequestBody, RequestOptions, Transport,
    TransportError,
};
