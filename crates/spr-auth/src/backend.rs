//! Storage backends for the credential store
//!
//! A backend moves the serialized store in and out of durable storage and
//! provides a writer lock that spans a whole load-modify-store cycle. The
//! file backend is what the SDK uses by default; the memory backend exists
//! for tests and for embedders that keep tokens elsewhere.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::constants::{CREDENTIALS_DIR, CREDENTIALS_FILE};
use crate::error::{Error, Result};

/// Boxed future used by the dyn-compatible traits in this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How long a writer waits for the lock before giving up with `StoreBusy`.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Lock files older than this are assumed to belong to a crashed writer.
pub const STALE_LOCK_AFTER: Duration = Duration::from_secs(30);

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Held for the duration of a load-modify-store cycle. Released on drop.
pub struct BackendLock {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl BackendLock {
    /// A lock with nothing to release (single-process backends).
    pub fn noop() -> Self {
        Self { release: None }
    }

    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for BackendLock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Durable storage for the serialized credential map.
///
/// Uses `Pin<Box<dyn Future>>` return types so stores can hold an
/// `Arc<dyn StorageBackend>`.
pub trait StorageBackend: Send + Sync {
    /// Human-readable location for logs and error messages.
    fn describe(&self) -> String;

    /// Read the full serialized store. Missing storage reads as empty.
    fn read(&self) -> BoxFuture<'_, Result<Vec<u8>>>;

    /// Replace the full serialized store.
    fn write<'a>(&'a self, contents: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    /// Acquire the cross-writer lock guarding a read-modify-write cycle.
    fn lock(&self) -> BoxFuture<'_, Result<BackendLock>>;
}

/// JSON credential file on local disk.
///
/// Writes go through a temp file + rename so readers never observe a torn
/// file. Writers coordinate through an exclusive-create `<file>.lock`
/// sibling, which also covers independent processes sharing the file.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
    lock_timeout: Duration,
    stale_after: Duration,
}

impl FileBackend {
    /// Open the credential file, creating its directory and an empty file if
    /// absent. Idempotent.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let dir = parent_dir(&path)?;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::Io(format!("creating credential directory: {e}")))?;

        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => {
                restrict_permissions(&path).await?;
                debug!(path = %path.display(), "created empty credential file");
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(Error::Io(format!("creating credential file: {e}"))),
        }

        Ok(Self {
            path,
            lock_timeout: LOCK_TIMEOUT,
            stale_after: STALE_LOCK_AFTER,
        })
    }

    /// `~/.sprinklr/credentials.json`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Io("cannot determine home directory".into()))?;
        Ok(home.join(CREDENTIALS_DIR).join(CREDENTIALS_FILE))
    }

    /// Override the lock wait and staleness thresholds.
    pub fn with_lock_timing(mut self, timeout: Duration, stale_after: Duration) -> Self {
        self.lock_timeout = timeout;
        self.stale_after = stale_after;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    /// Move a stale lock aside and delete it.
    ///
    /// The rename is atomic, so of several writers that saw the same stale
    /// lock only one moves it. A writer that checked staleness late may move
    /// a lock someone else just took; the moved file is re-checked and such a
    /// lock is linked back in place.
    async fn break_stale_lock(&self, lock_path: &Path) {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let mut name = lock_path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(format!(".stale-{}-{nanos}", std::process::id()));
        let aside = lock_path.with_file_name(name);

        match tokio::fs::rename(lock_path, &aside).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return,
            Err(e) => {
                warn!(path = %lock_path.display(), error = %e, "failed to move stale credential lock");
                return;
            }
        }

        if self.lock_is_stale(&aside).await {
            let holder = tokio::fs::read_to_string(&aside).await.unwrap_or_default();
            warn!(path = %lock_path.display(), holder_pid = holder.trim(), "broke stale credential lock");
        } else if let Err(e) = tokio::fs::hard_link(&aside, lock_path).await {
            warn!(path = %lock_path.display(), error = %e, "failed to restore live credential lock");
        }
        if let Err(e) = tokio::fs::remove_file(&aside).await {
            warn!(path = %aside.display(), error = %e, "failed to remove moved credential lock");
        }
    }

    async fn lock_is_stale(&self, lock_path: &Path) -> bool {
        let Ok(metadata) = tokio::fs::metadata(lock_path).await else {
            return false;
        };
        let Ok(modified) = metadata.modified() else {
            return false;
        };
        SystemTime::now()
            .duration_since(modified)
            .is_ok_and(|age| age > self.stale_after)
    }

    async fn acquire(&self) -> Result<BackendLock> {
        let lock_path = self.lock_path();
        let deadline = tokio::time::Instant::now() + self.lock_timeout;

        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
                .await
            {
                Ok(mut file) => {
                    // Holder PID, reported if the lock is ever broken as stale
                    let pid = std::process::id().to_string();
                    let recorded = match file.write_all(pid.as_bytes()).await {
                        Ok(()) => file.flush().await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = recorded {
                        warn!(path = %lock_path.display(), error = %e, "failed to record lock holder");
                    }
                    let release_path = lock_path.clone();
                    return Ok(BackendLock::new(move || {
                        if let Err(e) = std::fs::remove_file(&release_path) {
                            warn!(path = %release_path.display(), error = %e, "failed to release credential lock");
                        }
                    }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let stale = self.lock_is_stale(&lock_path).await;
                    if stale {
                        self.break_stale_lock(&lock_path).await;
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Err(Error::StoreBusy(lock_path.display().to_string()));
                    }
                    if !stale {
                        tokio::time::sleep(LOCK_POLL_INTERVAL).await;
                    }
                }
                Err(e) => return Err(Error::Io(format!("creating credential lock: {e}"))),
            }
        }
    }
}

impl StorageBackend for FileBackend {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn read(&self) -> BoxFuture<'_, Result<Vec<u8>>> {
        Box::pin(async move {
            match tokio::fs::read(&self.path).await {
                Ok(bytes) => Ok(bytes),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
                Err(e) => Err(Error::Io(format!("reading credential file: {e}"))),
            }
        })
    }

    fn write<'a>(&'a self, contents: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(write_atomic(&self.path, contents))
    }

    fn lock(&self) -> BoxFuture<'_, Result<BackendLock>> {
        Box::pin(self.acquire())
    }
}

/// In-memory backend. Locking is a no-op; the store's own mutex serializes
/// writers within the process.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    contents: std::sync::Mutex<Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the backend with raw serialized contents.
    pub fn with_contents(contents: impl Into<Vec<u8>>) -> Self {
        Self {
            contents: std::sync::Mutex::new(contents.into()),
        }
    }

    /// Snapshot of the raw serialized contents.
    pub fn contents(&self) -> Vec<u8> {
        self.contents
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

impl StorageBackend for MemoryBackend {
    fn describe(&self) -> String {
        "memory".into()
    }

    fn read(&self) -> BoxFuture<'_, Result<Vec<u8>>> {
        Box::pin(async move {
            self.contents
                .lock()
                .map(|c| c.clone())
                .map_err(|_| Error::Io("memory backend poisoned".into()))
        })
    }

    fn write<'a>(&'a self, contents: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut slot = self
                .contents
                .lock()
                .map_err(|_| Error::Io("memory backend poisoned".into()))?;
            *slot = contents.to_vec();
            Ok(())
        })
    }

    fn lock(&self) -> BoxFuture<'_, Result<BackendLock>> {
        Box::pin(async { Ok(BackendLock::noop()) })
    }
}

fn parent_dir(path: &Path) -> Result<&Path> {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))
}

/// Write to a temp file in the same directory, then rename it over the
/// target. The file holds OAuth tokens, so it is restricted to 0600.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = parent_dir(path)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "credentials".into());
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    restrict_permissions(&tmp_path).await?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), bytes = contents.len(), "persisted credentials");
    Ok(())
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_makes_directories_and_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("creds.json");

        let backend = FileBackend::create(path.clone()).await.unwrap();
        assert!(path.exists());
        assert!(backend.read().await.unwrap().is_empty());

        // Second open leaves existing content alone
        backend.write(b"{\"prod\":{}}").await.unwrap();
        let again = FileBackend::create(path).await.unwrap();
        assert_eq!(again.read().await.unwrap(), b"{\"prod\":{}}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn written_file_is_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.json");
        let backend = FileBackend::create(path.clone()).await.unwrap();
        backend.write(b"{}").await.unwrap();

        let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "credential file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::create(dir.path().join("creds.json"))
            .await
            .unwrap()
            .with_lock_timing(Duration::from_millis(100), Duration::from_secs(60));

        let guard = backend.lock().await.unwrap();
        assert!(backend.lock_path().exists());

        let second = backend.lock().await;
        assert!(matches!(second, Err(Error::StoreBusy(_))));

        drop(guard);
        assert!(!backend.lock_path().exists());
        let _again = backend.lock().await.unwrap();
    }

    #[tokio::test]
    async fn stale_lock_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::create(dir.path().join("creds.json"))
            .await
            .unwrap()
            .with_lock_timing(Duration::from_secs(2), Duration::ZERO);

        // Leftover lock from a writer that never released it
        std::fs::write(backend.lock_path(), "99999").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let guard = backend.lock().await;
        assert!(guard.is_ok(), "stale lock must be broken");
    }

    #[tokio::test]
    async fn live_lock_moved_by_late_breaker_is_restored() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::create(dir.path().join("creds.json"))
            .await
            .unwrap()
            .with_lock_timing(Duration::from_millis(100), Duration::from_secs(60));

        // Another writer took the lock after this one judged the old one stale
        std::fs::write(backend.lock_path(), "4242").unwrap();
        backend.break_stale_lock(&backend.lock_path()).await;

        assert_eq!(std::fs::read_to_string(backend.lock_path()).unwrap(), "4242");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".stale-"))
            .collect();
        assert!(leftovers.is_empty());
        assert!(matches!(backend.lock().await, Err(Error::StoreBusy(_))));
    }

    #[tokio::test]
    async fn breaking_an_already_broken_lock_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::create(dir.path().join("creds.json"))
            .await
            .unwrap()
            .with_lock_timing(Duration::from_millis(100), Duration::ZERO);

        backend.break_stale_lock(&backend.lock_path()).await;
        assert!(!backend.lock_path().exists());
        let _guard = backend.lock().await.unwrap();
    }

    #[tokio::test]
    async fn lock_file_records_holder_pid() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::create(dir.path().join("creds.json")).await.unwrap();

        let _guard = backend.lock().await.unwrap();
        assert_eq!(
            std::fs::read_to_string(backend.lock_path()).unwrap(),
            std::process::id().to_string()
        );
    }

    #[tokio::test]
    async fn memory_backend_roundtrip() {
        let backend = MemoryBackend::new();
        assert!(backend.read().await.unwrap().is_empty());
        backend.write(b"abc").await.unwrap();
        assert_eq!(backend.contents(), b"abc");
    }
}
