// Cache store for reading and writing entry files.
// Handles JSON serialization, atomic replacement, and tolerant deletion.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tempfile::NamedTempFile;

use crate::error::{CacheError, Result};

use super::entry::{CacheEntry, ENTRY_FORMAT_VERSION};
use super::paths;

/// Ensure the cache root exists and is a writable directory.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    match fs::metadata(dir) {
        Ok(meta) if !meta.is_dir() => {
            return Err(CacheError::configuration(dir, "exists and is not a directory"));
        }
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(dir)
                .map_err(|e| CacheError::configuration(dir, format!("cannot create: {}", e)))?;
        }
        Err(e) => {
            return Err(CacheError::configuration(dir, format!("cannot stat: {}", e)));
        }
    }

    // Probe writability the same way entries are written.
    NamedTempFile::new_in(dir)
        .map_err(|e| CacheError::configuration(dir, format!("not writable: {}", e)))?;

    Ok(())
}

/// Read an entry file.
///
/// Returns `Ok(None)` when the file does not exist and `CorruptEntry` when it
/// exists but cannot be parsed as a current-format entry.
pub fn read_entry(path: &Path) -> Result<Option<CacheEntry>> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let entry: CacheEntry =
        serde_json::from_slice(&contents).map_err(|e| CacheError::corrupt(path, e))?;

    if entry.version != ENTRY_FORMAT_VERSION {
        return Err(CacheError::corrupt(
            path,
            format!("unsupported format version {}", entry.version),
        ));
    }
    if paths::key_from_path(path).is_some_and(|key| key != entry.key) {
        return Err(CacheError::corrupt(path, "key does not match file name"));
    }

    Ok(Some(entry))
}

/// Write an entry atomically: temp file in the same directory, fsync, rename.
///
/// Readers see either the previous file or the complete new one. Concurrent
/// writers of the same key each use their own temp file; the last rename wins.
pub fn write_entry(path: &Path, entry: &CacheEntry) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "entry path has no parent"))?;

    let json = serde_json::to_vec_pretty(entry)?;

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(&json)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;

    Ok(())
}

/// Delete an entry file. Returns false if it was already gone.
pub fn remove_entry(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// List finalized entry files under the cache root, in no particular order.
pub fn list_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for item in fs::read_dir(dir)? {
        let path = match item {
            Ok(item) => item.path(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        if paths::is_entry_file(&path) {
            entries.push(path);
        }
    }
    Ok(entries)
}

/// Modification time and length of an entry file, or None if it vanished.
///
/// Entries are replaced by rename, so a changed stamp means a different file.
pub fn file_stamp(path: &Path) -> Option<(SystemTime, u64)> {
    let meta = fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

/// Size of an entry file, or None if it vanished.
pub fn entry_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|meta| meta.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::CacheKey;
    use crate::http::{Headers, HttpRequest, HttpResponse, RequestOptions};
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn sample_entry(url: &str, body: &[u8]) -> CacheEntry {
        let request = HttpRequest::new("GET", url, &RequestOptions::new()).unwrap();
        let key = CacheKey::for_request(&request);
        let response = HttpResponse::new(200, Headers::new(), body.to_vec());
        CacheEntry::new(key, &request, response, Utc::now(), Duration::from_secs(60))
    }

    #[test]
    fn test_write_and_read_entry() {
        let temp_dir = TempDir::new().unwrap();
        let entry = sample_entry("https://example.com/a", b"hello");
        let path = paths::entry_path(temp_dir.path(), &entry.key);

        write_entry(&path, &entry).unwrap();

        let read = read_entry(&path).unwrap().unwrap();
        assert_eq!(read, entry);
    }

    #[test]
    fn test_write_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let entry = sample_entry("https://example.com/a", b"hello");
        let path = paths::entry_path(temp_dir.path(), &entry.key);

        write_entry(&path, &entry).unwrap();
        write_entry(&path, &entry).unwrap();

        let names: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(names, vec![path]);
    }

    #[test]
    fn test_read_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let entry = sample_entry("https://example.com/a", b"hello");
        let path = paths::entry_path(temp_dir.path(), &entry.key);

        assert!(read_entry(&path).unwrap().is_none());
    }

    #[test]
    fn test_truncated_entry_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let entry = sample_entry("https://example.com/a", b"hello");
        let path = paths::entry_path(temp_dir.path(), &entry.key);
        write_entry(&path, &entry).unwrap();

        let contents = fs::read(&path).unwrap();
        fs::write(&path, &contents[..contents.len() / 2]).unwrap();

        assert!(matches!(
            read_entry(&path),
            Err(CacheError::CorruptEntry { .. })
        ));
    }

    #[test]
    fn test_entry_under_wrong_name_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let a = sample_entry("https://example.com/a", b"a");
        let b = sample_entry("https://example.com/b", b"b");
        let path = paths::entry_path(temp_dir.path(), &b.key);
        fs::write(&path, serde_json::to_vec(&a).unwrap()).unwrap();

        assert!(matches!(
            read_entry(&path),
            Err(CacheError::CorruptEntry { .. })
        ));
    }

    #[test]
    fn test_remove_missing_is_not_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let entry = sample_entry("https://example.com/a", b"hello");
        let path = paths::entry_path(temp_dir.path(), &entry.key);
        write_entry(&path, &entry).unwrap();

        assert!(remove_entry(&path).unwrap());
        assert!(!remove_entry(&path).unwrap());
    }

    #[test]
    fn test_file_stamp_changes_when_entry_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let first = sample_entry("https://example.com/a", b"short");
        let path = paths::entry_path(temp_dir.path(), &first.key);
        write_entry(&path, &first).unwrap();
        let before = file_stamp(&path).unwrap();
        assert_eq!(file_stamp(&path), Some(before));

        let second = sample_entry("https://example.com/a", b"a considerably longer body");
        write_entry(&path, &second).unwrap();
        assert_ne!(file_stamp(&path), Some(before));

        remove_entry(&path).unwrap();
        assert_eq!(file_stamp(&path), None);
    }

    #[test]
    fn test_list_entries_skips_other_files() {
        let temp_dir = TempDir::new().unwrap();
        let entry = sample_entry("https://example.com/a", b"hello");
        let path = paths::entry_path(temp_dir.path(), &entry.key);
        write_entry(&path, &entry).unwrap();
        fs::write(temp_dir.path().join(".tmpXYZ"), b"partial").unwrap();
        fs::write(temp_dir.path().join("README.txt"), b"notes").unwrap();

        assert_eq!(list_entries(temp_dir.path()).unwrap(), vec![path]);
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("nested").join("cache").join("dir");

        ensure_dir(&nested).unwrap();

        assert!(nested.is_dir());
        assert_eq!(fs::read_dir(&nested).unwrap().count(), 0);
    }

    #[test]
    fn test_ensure_dir_rejects_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("occupied");
        fs::write(&file, b"x").unwrap();

        assert!(matches!(
            ensure_dir(&file),
            Err(CacheError::Configuration { .. })
        ));
    }
}
