//! Atomic JSON document store.
//!
//! Every shared document (settings, quarantine ledgers, run reports) goes
//! through this module. Writes are serialized through a sibling `.lock`
//! file and land via temp-file + rename, so a reader always sees either the
//! old complete document or the new complete document.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Store failures. `LockTimeout` is deliberately separate from the generic
/// I/O case: a timed-out lock usually means another process is alive and
/// writing, not that the disk failed, and callers may retry instead of
/// alerting.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid document path {path:?}: {reason}")]
    InvalidPath { path: PathBuf, reason: &'static str },
    #[error("failed to serialize document for {path:?}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("lock timeout on {0:?}")]
    LockTimeout(PathBuf),
    #[error("i/o failure on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("written document failed verification: {0:?}")]
    VerifyFailed(PathBuf),
}

/// Tuning knobs for [`save`] and [`update`].
#[derive(Debug, Clone)]
pub struct SaveOptions {
    pub lock_timeout: Duration,
    /// Lock files older than this are treated as leftovers of a crashed
    /// writer and removed.
    pub stale_lock_after: Duration,
    /// Re-read the document after the rename to confirm it parses.
    pub verify: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(6),
            stale_lock_after: Duration::from_secs(60),
            verify: true,
        }
    }
}

const LOCK_POLL: Duration = Duration::from_millis(100);

/// Load a document, falling back to `default()` when the file is absent,
/// unreadable, or does not match the expected shape. Callers always receive
/// a usable document; corrupt files are logged, never propagated.
pub fn load_or<T, F>(path: &Path, default: F) -> T
where
    T: DeserializeOwned,
    F: FnOnce() -> T,
{
    if validate_path(path).is_err() || !path.exists() {
        return default();
    }
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            warn!("failed to read {}: {}", path.display(), err);
            return default();
        }
    };
    match serde_json::from_str(&text) {
        Ok(doc) => doc,
        Err(err) => {
            warn!("unreadable JSON document {}: {}", path.display(), err);
            default()
        }
    }
}

/// [`load_or`] with the type's `Default` as the fallback.
pub fn load_or_default<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    load_or(path, T::default)
}

/// Atomically persist a document.
///
/// The document is serialized before the filesystem is touched, written to
/// a temp file in the destination directory, fsynced, and renamed over the
/// destination while the sibling lock file is held. Any failure leaves the
/// previous file byte-identical.
pub fn save<T: Serialize>(path: &Path, document: &T, opts: &SaveOptions) -> Result<(), StoreError> {
    validate_path(path)?;
    let encoded = serde_json::to_string_pretty(document).map_err(|source| StoreError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    ensure_parent(path)?;
    let _lock = LockGuard::acquire(lock_path_for(path), opts)?;
    write_replace(path, &encoded)?;
    if opts.verify {
        verify_readable(path)?;
    }
    Ok(())
}

/// Read-modify-write under a single lock acquisition.
///
/// The lock covers the whole cycle, so concurrent writers of the same
/// document (the run loop and any number of quarantine workers) cannot lose
/// each other's updates. Returns the document as written.
pub fn update<T, D, F>(path: &Path, default: D, mutate: F, opts: &SaveOptions) -> Result<T, StoreError>
where
    T: Serialize + DeserializeOwned,
    D: FnOnce() -> T,
    F: FnOnce(&mut T),
{
    validate_path(path)?;
    ensure_parent(path)?;
    let _lock = LockGuard::acquire(lock_path_for(path), opts)?;
    let mut document = load_or(path, default);
    mutate(&mut document);
    let encoded = serde_json::to_string_pretty(&document).map_err(|source| StoreError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    write_replace(path, &encoded)?;
    if opts.verify {
        verify_readable(path)?;
    }
    Ok(document)
}

fn validate_path(path: &Path) -> Result<(), StoreError> {
    let invalid = |reason| StoreError::InvalidPath {
        path: path.to_path_buf(),
        reason,
    };
    if path.to_string_lossy().contains('\u{0}') {
        return Err(invalid("null byte"));
    }
    if path.file_name().is_none() {
        return Err(invalid("empty name"));
    }
    let suffix_ok = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if !suffix_ok {
        return Err(invalid("wrong suffix"));
    }
    Ok(())
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(".lock");
    PathBuf::from(raw)
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    Ok(())
}

fn write_replace(path: &Path, encoded: &str) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".tonwerk.")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(io_err)?;
    tmp.write_all(encoded.as_bytes()).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|err| io_err(err.error))?;
    Ok(())
}

fn verify_readable(path: &Path) -> Result<(), StoreError> {
    let text = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str::<serde_json::Value>(&text)
        .map_err(|_| StoreError::VerifyFailed(path.to_path_buf()))?;
    Ok(())
}

/// Exclusive advisory lock via a create-new sibling file. Removed on drop,
/// including every error path of the caller.
struct LockGuard {
    lock_path: PathBuf,
}

impl LockGuard {
    fn acquire(lock_path: PathBuf, opts: &SaveOptions) -> Result<Self, StoreError> {
        let start = Instant::now();
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut file) => {
                    let _ = write!(file, "pid={}", std::process::id());
                    return Ok(Self { lock_path });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if lock_age(&lock_path)
                        .map(|age| age > opts.stale_lock_after)
                        .unwrap_or(false)
                    {
                        warn!("removing stale lock file {}", lock_path.display());
                        let _ = fs::remove_file(&lock_path);
                        continue;
                    }
                    if start.elapsed() > opts.lock_timeout {
                        return Err(StoreError::LockTimeout(lock_path));
                    }
                    debug!("waiting for lock {}", lock_path.display());
                    std::thread::sleep(LOCK_POLL);
                }
                Err(source) => {
                    return Err(StoreError::Io {
                        path: lock_path,
                        source,
                    })
                }
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

fn lock_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        count: u32,
    }

    fn quick_opts() -> SaveOptions {
        SaveOptions {
            lock_timeout: Duration::from_millis(300),
            stale_lock_after: Duration::from_secs(60),
            verify: true,
        }
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        let doc = Doc {
            name: "alpha".to_string(),
            count: 3,
        };
        save(&path, &doc, &SaveOptions::default()).unwrap();
        let loaded: Doc = load_or_default(&path);
        assert_eq!(loaded, doc);
        assert!(
            !lock_path_for(&path).exists(),
            "lock file must be removed after a clean save"
        );
    }

    #[test]
    fn load_missing_file_yields_default() {
        let dir = TempDir::new().unwrap();
        let loaded: Doc = load_or_default(&dir.path().join("absent.json"));
        assert_eq!(loaded, Doc::default());
    }

    #[test]
    fn load_corrupt_file_yields_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();
        let loaded: Doc = load_or_default(&path);
        assert_eq!(loaded, Doc::default());
    }

    #[test]
    fn load_wrong_shape_yields_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shape.json");
        fs::write(&path, "[1, 2, 3]").unwrap();
        let loaded: Doc = load_or_default(&path);
        assert_eq!(loaded, Doc::default());
    }

    #[test]
    fn save_rejects_wrong_suffix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.txt");
        let err = save(&path, &Doc::default(), &SaveOptions::default()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn save_rejects_empty_name() {
        let err = save(Path::new(""), &Doc::default(), &SaveOptions::default()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn save_rejects_null_byte_in_path() {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;
        let path = PathBuf::from(OsString::from_vec(b"bad\0name.json".to_vec()));
        let err = save(&path, &Doc::default(), &SaveOptions::default()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath { .. }));
    }

    #[test]
    fn held_lock_times_out_and_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        let original = Doc {
            name: "original".to_string(),
            count: 1,
        };
        save(&path, &original, &SaveOptions::default()).unwrap();
        let before = fs::read(&path).unwrap();

        fs::write(lock_path_for(&path), "pid=held").unwrap();
        let err = save(
            &path,
            &Doc {
                name: "late".to_string(),
                count: 2,
            },
            &quick_opts(),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));
        assert_eq!(fs::read(&path).unwrap(), before);
        fs::remove_file(lock_path_for(&path)).unwrap();
    }

    #[test]
    fn stale_lock_is_taken_over() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(lock_path_for(&path), "pid=dead").unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let opts = SaveOptions {
            lock_timeout: Duration::from_millis(300),
            stale_lock_after: Duration::ZERO,
            verify: true,
        };
        let doc = Doc {
            name: "takeover".to_string(),
            count: 7,
        };
        save(&path, &doc, &opts).unwrap();
        let loaded: Doc = load_or_default(&path);
        assert_eq!(loaded, doc);
        assert!(!lock_path_for(&path).exists());
    }

    #[test]
    fn concurrent_saves_serialize_and_leave_one_complete_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        let a = Doc {
            name: "writer-a".to_string(),
            count: 1,
        };
        let b = Doc {
            name: "writer-b".to_string(),
            count: 2,
        };
        let (path_a, doc_a) = (path.clone(), a.clone());
        let (path_b, doc_b) = (path.clone(), b.clone());
        let ta = std::thread::spawn(move || save(&path_a, &doc_a, &SaveOptions::default()));
        let tb = std::thread::spawn(move || save(&path_b, &doc_b, &SaveOptions::default()));
        ta.join().unwrap().unwrap();
        tb.join().unwrap().unwrap();

        let loaded: Doc = load_or_default(&path);
        assert!(loaded == a || loaded == b, "final file must be one of the writes");
        assert!(!lock_path_for(&path).exists());
    }

    #[test]
    fn update_applies_mutation_under_lock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        let written = update(
            &path,
            Doc::default,
            |doc: &mut Doc| {
                doc.name = "updated".to_string();
                doc.count += 1;
            },
            &SaveOptions::default(),
        )
        .unwrap();
        assert_eq!(written.count, 1);
        let loaded: Doc = load_or_default(&path);
        assert_eq!(loaded, written);
    }
}
