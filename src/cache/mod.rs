// Cache module for on-disk HTTP response caching.
// Stores one JSON record per request key with TTL validity and atomic replacement.

pub mod entry;
pub mod key;
pub mod manager;
pub mod paths;
pub mod processors;
pub mod store;

pub use entry::{CacheEntry, ENTRY_FORMAT_VERSION, RequestDescriptor};
pub use key::CacheKey;
pub use manager::{BatchItem, CacheOutput, CacheStats, ClearReport, EntryInfo, HttpCache};
pub use processors::{BUILTIN_PROCESSORS, PostProcessorFn, PostProcessorRegistry};
