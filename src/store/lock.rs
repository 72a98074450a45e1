use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use fs2::FileExt;
use tracing::warn;

use crate::error::BrigadeError;

/// An exclusive lock on a sidecar file, held for the lifetime of a
/// read-modify-write state transition (spec.md §4.2).
///
/// While held, a background thread touches the lock file's mtime every
/// `heartbeat_interval` so a crashed holder can be detected by age and its
/// lock forcibly broken (SPEC_FULL.md §5.1).
pub struct FileLock {
    path: PathBuf,
    _file: File,
    stop: Arc<AtomicBool>,
    heartbeat: Option<std::thread::JoinHandle<()>>,
}

impl FileLock {
    /// Unconditionally breaks an existing lock, regardless of its age
    /// (spec.md §7's `--force` override: "first breaks the lock").
    ///
    /// flock() locks are scoped to the open file description that acquired
    /// them, not to the path, so unlocking a freshly-opened fd is a no-op
    /// against a lock actually held by another process. The only way to
    /// truly force a break is to remove the file; the next `acquire` call
    /// recreates it with a fresh inode that carries no lock state.
    pub fn force_break(path: &Path) -> Result<(), BrigadeError> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Acquire the lock, waiting up to `timeout`. A lock whose mtime is
    /// older than `stale_threshold` is forcibly broken (with a warning log
    /// standing in for the spec's "recorded in an event").
    pub fn acquire(
        path: &Path,
        timeout: Duration,
        stale_threshold: Duration,
        heartbeat_interval: Duration,
    ) -> Result<Self, BrigadeError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(_) => {
                    if is_stale(path, stale_threshold) {
                        warn!(path = %path.display(), "breaking stale lock");
                        // Unlocking this fd would do nothing to the holder's
                        // actual lock (flock() is scoped to the open file
                        // description that acquired it). Remove and reopen
                        // the file instead, so the new inode starts unlocked.
                        drop(file);
                        std::fs::remove_file(path).ok();
                        file = OpenOptions::new().create(true).write(true).open(path)?;
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(BrigadeError::lock_timeout(&path.display().to_string()));
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }

        touch(path);

        let stop = Arc::new(AtomicBool::new(false));
        let heartbeat = {
            let stop = stop.clone();
            let path = path.to_path_buf();
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    std::thread::sleep(heartbeat_interval);
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    touch(&path);
                }
            })
        };

        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
            stop,
            heartbeat: Some(heartbeat),
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.heartbeat.take() {
            let _ = handle.join();
        }
        FileExt::unlock(&self._file).ok();
        let _ = &self.path;
    }
}

fn touch(path: &Path) {
    // Writing fresh content (rather than re-setting the same bytes) forces
    // the mtime update the staleness check below relies on.
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let _ = std::fs::write(path, now.to_string());
}

fn is_stale(path: &Path, stale_threshold: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|modified| {
            SystemTime::now()
                .duration_since(modified)
                .map(|age| age > stale_threshold)
                .unwrap_or(false)
        })
        .unwrap_or(false)
}
