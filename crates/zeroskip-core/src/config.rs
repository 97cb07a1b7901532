//! Tunables an embedder may override, separate from constants the wire
//! format fixes forever.
//!
//! The short/long record thresholds (§4.3) and the on-disk header layouts
//! are NOT configurable here — they are `pub const`s in
//! [`crate::storage::record`] and [`crate::storage::header`], because
//! changing them would break on-disk compatibility. This struct only holds
//! values that affect engine *behaviour*, not the bytes it writes.
//!
//! The core never reads this from a file; parsing a config file is a job
//! for an outer collaborator (the CLI), which builds a `ZeroskipConfig` and
//! passes it to [`crate::engine::DbEngine::open_with_config`].

use serde::{Deserialize, Serialize};

/// Default size, in bytes, at which the active file is finalised and a new
/// one rotated in (spec §3: "2 MiB").
pub const DEFAULT_ROTATION_THRESHOLD: u64 = 2 * 1024 * 1024;

/// Initial backoff interval, in milliseconds, for lock acquisition retries.
pub const DEFAULT_LOCK_BACKOFF_INITIAL_MS: u64 = 1;

/// Cap on the backoff multiplier growth (spec §4.2: "capped at 1000x").
pub const DEFAULT_LOCK_BACKOFF_MULTIPLIER_CAP: u64 = 1000;

/// Engine-level tunables that do not affect the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZeroskipConfig {
    /// Active file size, in bytes, at which rotation is triggered.
    pub rotation_threshold: u64,
    /// Initial lock-acquisition backoff interval, in milliseconds.
    pub lock_backoff_initial_ms: u64,
    /// Cap on the lock backoff multiplier.
    pub lock_backoff_multiplier_cap: u64,
    /// Default timeout, in milliseconds, for lock acquisition when the
    /// caller does not specify one explicitly.
    pub default_lock_timeout_ms: u64,
}

impl Default for ZeroskipConfig {
    fn default() -> Self {
        Self {
            rotation_threshold: DEFAULT_ROTATION_THRESHOLD,
            lock_backoff_initial_ms: DEFAULT_LOCK_BACKOFF_INITIAL_MS,
            lock_backoff_multiplier_cap: DEFAULT_LOCK_BACKOFF_MULTIPLIER_CAP,
            default_lock_timeout_ms: 5000,
        }
    }
}

impl ZeroskipConfig {
    /// Starts a builder seeded with defaults.
    #[must_use]
    pub fn builder() -> ZeroskipConfigBuilder {
        ZeroskipConfigBuilder(Self::default())
    }
}

/// Fluent builder for [`ZeroskipConfig`].
#[derive(Debug, Default)]
pub struct ZeroskipConfigBuilder(ZeroskipConfig);

impl ZeroskipConfigBuilder {
    /// Overrides the rotation threshold.
    #[must_use]
    pub fn rotation_threshold(mut self, bytes: u64) -> Self {
        self.0.rotation_threshold = bytes;
        self
    }

    /// Overrides the initial lock backoff interval.
    #[must_use]
    pub fn lock_backoff_initial_ms(mut self, ms: u64) -> Self {
        self.0.lock_backoff_initial_ms = ms;
        self
    }

    /// Overrides the lock backoff multiplier cap.
    #[must_use]
    pub fn lock_backoff_multiplier_cap(mut self, cap: u64) -> Self {
        self.0.lock_backoff_multiplier_cap = cap;
        self
    }

    /// Overrides the default lock acquisition timeout.
    #[must_use]
    pub fn default_lock_timeout_ms(mut self, ms: u64) -> Self {
        self.0.default_lock_timeout_ms = ms;
        self
    }

    /// Finishes the builder.
    #[must_use]
    pub fn build(self) -> ZeroskipConfig {
        self.0
    }
}
