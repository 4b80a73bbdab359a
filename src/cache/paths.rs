// Cache path utilities.
// One flat directory of `<digest>.json` files; lookups are pure path construction.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use super::key::CacheKey;

/// Extension of finalized entry files. Temp files never carry it.
pub const ENTRY_EXTENSION: &str = "json";

/// Fallback root when no home directory can be determined.
pub const FALLBACK_CACHE_DIR: &str = "./cache";

/// Get the platform cache directory (~/.cache/http-disk-cache on Linux).
pub fn default_cache_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "http-disk-cache").map(|dirs| dirs.cache_dir().to_path_buf())
}

/// Path to the entry file for a key.
pub fn entry_path(root: &Path, key: &CacheKey) -> PathBuf {
    root.join(format!("{}.{}", key.as_str(), ENTRY_EXTENSION))
}

/// Key encoded in an entry file name, if the path names an entry.
pub fn key_from_path(path: &Path) -> Option<CacheKey> {
    if path.extension()? != ENTRY_EXTENSION {
        return None;
    }
    CacheKey::parse(path.file_stem()?.to_str()?)
}

/// Whether a path names a finalized entry file.
pub fn is_entry_file(path: &Path) -> bool {
    key_from_path(path).is_some()
}
