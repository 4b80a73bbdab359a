// Response cache manager.
// Fronts a transport with a disk cache: key, look up, fetch on miss, persist, post-process.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::http::{HttpRequest, HttpResponse, ReqwestTransport, RequestOptions, Transport};

use super::entry::CacheEntry;
use super::key::CacheKey;
use super::paths;
use super::processors::{self, PostProcessorFn, PostProcessorRegistry};
use super::store;

/// What a request returns: the raw response, or a post-processor's output.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheOutput {
    Response(HttpResponse),
    Processed(Value),
}

impl CacheOutput {
    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            Self::Response(response) => Some(response),
            Self::Processed(_) => None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Processed(value) => Some(value),
            Self::Response(_) => None,
        }
    }

    pub fn into_response(self) -> Option<HttpResponse> {
        match self {
            Self::Response(response) => Some(response),
            Self::Processed(_) => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Processed(value) => Some(value),
            Self::Response(_) => None,
        }
    }
}

/// Outcome of a [`HttpCache::clear`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearReport {
    /// Parseable entries deleted because they matched the age filter.
    pub removed: usize,
    /// Unreadable or corrupt entries deleted.
    pub corrupt: usize,
    /// Entries that matched but could not be deleted.
    pub failed: usize,
}

impl ClearReport {
    pub fn total_removed(&self) -> usize {
        self.removed + self.corrupt
    }
}

/// Snapshot of the cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub post_processors: Vec<String>,
    pub ttl: Duration,
    pub cache_dir: PathBuf,
}

/// Metadata about one cached request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub key: CacheKey,
    pub path: PathBuf,
    pub status: u16,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub age: Duration,
    pub valid: bool,
}

/// Per-URL result of [`HttpCache::request_many`].
#[derive(Debug)]
pub struct BatchItem {
    pub url: String,
    pub result: Result<CacheOutput>,
}

/// Disk-backed HTTP response cache.
///
/// Safe to share between tasks behind an `Arc`, and between processes that
/// point at the same directory. Concurrent misses for one key each fetch; the
/// last completed write owns the file.
pub struct HttpCache {
    cache_dir: PathBuf,
    ttl: Duration,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    processors: PostProcessorRegistry,
}

impl HttpCache {
    /// Create a cache at `cache_dir` using the default reqwest transport.
    pub fn new(cache_dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self> {
        let transport = ReqwestTransport::new().map_err(CacheError::TransportInit)?;
        Self::with_transport(cache_dir, ttl, Arc::new(transport))
    }

    /// Create a cache that fetches through the given transport.
    pub fn with_transport(
        cache_dir: impl Into<PathBuf>,
        ttl: Duration,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let cache_dir = cache_dir.into();
        store::ensure_dir(&cache_dir)?;
        debug!(dir = %cache_dir.display(), ttl_secs = ttl.as_secs(), "opened response cache");

        Ok(Self {
            cache_dir,
            ttl,
            transport,
            clock: Arc::new(SystemClock),
            processors: PostProcessorRegistry::new(),
        })
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        Self::new(&config.cache_dir, config.ttl)
    }

    /// Replace the time source used for entry timestamps and validity.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register the built-in processors (`json`, `text`, `status`, ...).
    pub fn with_builtin_processors(self) -> Self {
        processors::register_builtins(&self.processors);
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Register or replace a named post-processor on this instance.
    pub fn register_post_processor<F>(&self, name: impl Into<String>, processor: F)
    where
        F: Fn(&HttpResponse) -> Value + Send + Sync + 'static,
    {
        self.processors.register(name, processor);
    }

    /// Perform a request, answering from the cache when a valid entry exists.
    ///
    /// With `force_refresh` the cache is bypassed and the fetched response
    /// replaces any stored entry. Transport failures surface as
    /// [`CacheError::Fetch`]; an expired entry is never served in their place.
    pub async fn request(
        &self,
        method: &str,
        url: &str,
        options: &RequestOptions,
        force_refresh: bool,
        post_processor: Option<&str>,
    ) -> Result<CacheOutput> {
        let request = HttpRequest::new(method, url, options)?;
        let processor = self.resolve_processor(post_processor)?;
        let key = CacheKey::for_request(&request);
        let path = paths::entry_path(&self.cache_dir, &key);

        if !force_refresh {
            if let Some(entry) = self.load_valid(&key, &path) {
                debug!(key = %key.short(), url = %request.url, "cache hit");
                return Ok(finish(entry.response, processor.as_deref()));
            }
        }

        debug!(
            key = %key.short(),
            url = %request.url,
            force_refresh,
            "cache miss, fetching"
        );
        let response = self
            .transport
            .send(&request)
            .await
            .map_err(|source| CacheError::Fetch {
                url: request.url.to_string(),
                source,
            })?;

        let entry = CacheEntry::new(key, &request, response, self.clock.now(), self.ttl);
        if let Err(e) = store::write_entry(&path, &entry) {
            warn!(key = %entry.key.short(), error = %e, "failed to persist cache entry");
        } else {
            debug!(
                key = %entry.key.short(),
                status = entry.response.status,
                expires_at = %entry.expires_at,
                "stored cache entry"
            );
        }

        Ok(finish(entry.response, processor.as_deref()))
    }

    /// Look up a valid cached response without touching the network.
    pub fn get(
        &self,
        method: &str,
        url: &str,
        options: &RequestOptions,
        post_processor: Option<&str>,
    ) -> Result<Option<CacheOutput>> {
        let request = HttpRequest::new(method, url, options)?;
        let processor = self.resolve_processor(post_processor)?;
        let key = CacheKey::for_request(&request);
        let path = paths::entry_path(&self.cache_dir, &key);

        Ok(self
            .load_valid(&key, &path)
            .map(|entry| finish(entry.response, processor.as_deref())))
    }

    /// Store a response obtained outside the cache as if it had just been fetched.
    pub fn store(
        &self,
        method: &str,
        url: &str,
        options: &RequestOptions,
        response: HttpResponse,
    ) -> Result<CacheEntry> {
        let request = HttpRequest::new(method, url, options)?;
        let key = CacheKey::for_request(&request);
        let path = paths::entry_path(&self.cache_dir, &key);

        let entry = CacheEntry::new(key, &request, response, self.clock.now(), self.ttl);
        store::write_entry(&path, &entry)?;
        debug!(key = %entry.key.short(), url = %request.url, "stored cache entry");
        Ok(entry)
    }

    /// Describe the stored entry for a request, valid or not.
    pub fn entry_info(
        &self,
        method: &str,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Option<EntryInfo>> {
        let request = HttpRequest::new(method, url, options)?;
        let key = CacheKey::for_request(&request);
        let path = paths::entry_path(&self.cache_dir, &key);

        let entry = match store::read_entry(&path) {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(None),
            Err(e @ CacheError::CorruptEntry { .. }) => {
                warn!(key = %key.short(), error = %e, "ignoring corrupt cache entry");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let now = self.clock.now();
        Ok(Some(EntryInfo {
            key,
            path,
            status: entry.response.status,
            created_at: entry.created_at,
            expires_at: entry.expires_at,
            age: entry.age_at(now),
            valid: entry.is_valid_at(now),
        }))
    }

    /// Delete entries from the cache directory.
    ///
    /// With `older_than`, only entries created before `now - older_than` are
    /// deleted; without it, every entry is. Corrupt entries are always deleted
    /// and counted separately. Temp files from in-flight writes are never touched,
    /// and an entry whose file changed while it was being inspected is kept.
    /// A rename landing between that last check and the unlink can still be lost.
    pub fn clear(&self, older_than: Option<Duration>) -> Result<ClearReport> {
        let now = self.clock.now();
        let cutoff = older_than.map(|age| {
            chrono::Duration::from_std(age)
                .ok()
                .and_then(|age| now.checked_sub_signed(age))
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        });

        let mut report = ClearReport::default();
        for path in store::list_entries(&self.cache_dir)? {
            let Some(stamp) = store::file_stamp(&path) else {
                continue;
            };
            let corrupt = match store::read_entry(&path) {
                Ok(Some(entry)) => match cutoff {
                    Some(cutoff) if entry.created_at >= cutoff => continue,
                    _ => false,
                },
                Ok(None) => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "removing unreadable cache entry");
                    true
                }
            };

            // A concurrent write may have renamed a fresh entry into place since the read.
            if store::file_stamp(&path) != Some(stamp) {
                debug!(path = %path.display(), "cache entry replaced during clear, keeping it");
                continue;
            }

            match store::remove_entry(&path) {
                Ok(true) if corrupt => report.corrupt += 1,
                Ok(true) => report.removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove cache entry");
                    report.failed += 1;
                }
            }
        }

        info!(
            removed = report.removed,
            corrupt = report.corrupt,
            failed = report.failed,
            "cleared cache entries"
        );
        Ok(report)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let entries = store::list_entries(&self.cache_dir)?;
        let total_bytes: u64 = entries.iter().filter_map(|p| store::entry_size(p)).sum();

        Ok(CacheStats {
            entries: entries.len(),
            total_bytes,
            post_processors: self.processors.names(),
            ttl: self.ttl,
            cache_dir: self.cache_dir.clone(),
        })
    }

    /// Issue GET-style requests one after another, pausing `delay` between them.
    ///
    /// A failure is recorded for its URL and does not stop the batch.
    pub async fn request_many(
        &self,
        urls: &[&str],
        method: &str,
        post_processor: Option<&str>,
        delay: Duration,
    ) -> Vec<BatchItem> {
        let options = RequestOptions::default();
        let mut results = Vec::with_capacity(urls.len());

        for (i, url) in urls.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = self
                .request(method, url, &options, false, post_processor)
                .await;
            if let Err(e) = &result {
                warn!(url = %url, error = %e, "batch request failed");
            }
            results.push(BatchItem {
                url: url.to_string(),
                result,
            });
        }

        results
    }

    fn resolve_processor(&self, name: Option<&str>) -> Result<Option<Arc<PostProcessorFn>>> {
        match name {
            None => Ok(None),
            Some(name) => self
                .processors
                .get(name)
                .map(Some)
                .ok_or_else(|| CacheError::UnknownPostProcessor(name.to_string())),
        }
    }

    /// Read an entry and keep it only if it parses and has not expired.
    fn load_valid(&self, key: &CacheKey, path: &Path) -> Option<CacheEntry> {
        match store::read_entry(path) {
            Ok(Some(entry)) if entry.is_valid_at(self.clock.now()) => Some(entry),
            Ok(Some(entry)) => {
                debug!(key = %key.short(), expired_at = %entry.expires_at, "cache entry expired");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key.short(), error = %e, "treating unreadable cache entry as a miss");
                None
            }
        }
    }
}

impl fmt::Debug for HttpCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCache")
            .field("cache_dir", &self.cache_dir)
            .field("ttl", &self.ttl)
            .field("processors", &self.processors)
            .finish_non_exhaustive()
    }
}

fn finish(response: HttpResponse, processor: Option<&PostProcessorFn>) -> CacheOutput {
    match processor {
        Some(processor) => CacheOutput::Processed(processor(&response)),
        None => CacheOutput::Response(response),
    }
}
