//! Exclusive advisory locking via uniquely-named `O_CREAT|O_EXCL` files,
//! with exponential-backoff acquisition.
//!
//! Grounded directly on `file-lock.c`'s `flock_with_timeout`: the backoff
//! multiplier grows by `2n + 1` each failed attempt (capped at 1000x) and
//! the actual wait is jittered to `(750 + rand(0..500)) * multiplier / 1000`
//! milliseconds, which the original seeds from the process id once per
//! process. We use the `rand` crate's thread-local RNG instead of a
//! `libc::srand(getpid())` — both give per-process-varying jitter, and
//! `rand` is the workspace's existing randomness dependency.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::{DEFAULT_LOCK_BACKOFF_INITIAL_MS, DEFAULT_LOCK_BACKOFF_MULTIPLIER_CAP};
use crate::error::{Error, Result};

/// An exclusive advisory lock realised as directory entry `D/name`.
///
/// Held locks are released on `Drop`, but callers should still call
/// [`FileLock::release`] explicitly on every code path so failures surface
/// rather than being swallowed in a destructor.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    name: &'static str,
    held: bool,
}

impl FileLock {
    /// Builds a lock handle for `dir/name` without attempting acquisition.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>, name: &'static str) -> Self {
        Self {
            path: dir.as_ref().join(name),
            name,
            held: false,
        }
    }

    /// Whether this process currently holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.held
    }

    /// Attempts to create the lock file, retrying with exponential,
    /// jittered backoff until `timeout` elapses.
    ///
    /// `initial_backoff_ms` and `multiplier_cap` come from
    /// [`crate::config::ZeroskipConfig`]; pass the defaults
    /// ([`DEFAULT_LOCK_BACKOFF_INITIAL_MS`], [`DEFAULT_LOCK_BACKOFF_MULTIPLIER_CAP`])
    /// when the caller has no config override.
    pub fn acquire(
        &mut self,
        timeout: Duration,
        initial_backoff_ms: u64,
        multiplier_cap: u64,
    ) -> Result<()> {
        if self.held {
            return Ok(());
        }

        let deadline = Instant::now() + timeout;
        let mut multiplier: u64 = 1;
        let mut n: u64 = 1;

        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(_) => {
                    self.held = true;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if timeout.is_zero() || Instant::now() >= deadline {
                        return Err(Error::LockNotAcquired(self.name));
                    }
                    let backoff_ms = multiplier * initial_backoff_ms;
                    let jitter = 750 + rand::thread_rng().gen_range(0..500);
                    let wait_ms = jitter * backoff_ms / 1000;
                    let wait = Duration::from_millis(wait_ms).min(
                        deadline.saturating_duration_since(Instant::now()),
                    );
                    std::thread::sleep(wait);

                    multiplier += 2 * n + 1;
                    if multiplier > multiplier_cap {
                        multiplier = multiplier_cap;
                    } else {
                        n += 1;
                    }
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    /// Releases the lock: unlinks the file. A no-op success if the lock was
    /// never held by this handle.
    pub fn release(&mut self) -> Result<()> {
        if !self.held {
            return Ok(());
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }
        self.held = false;
        Ok(())
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if self.held {
            if let Err(err) = self.release() {
                tracing::error!(lock = self.name, %err, "failed to release lock on drop");
            }
        }
    }
}
