//! Construction-time configuration for a [`FileTable`](crate::FileTable).
//!
//! Everything here is immutable once the table is built. The table itself
//! only interprets [`EvictionPolicy`]; the key, option flags, block size and
//! IV size are handed to the [`FileBackend`](crate::FileBackend) untouched.
//!
//! # Example
//!
//! ```
//! use oxcrypt_filetable::{EvictionPolicy, TableConfig, TableKey, TableOptions};
//!
//! let config = TableConfig::new(TableKey::new([7u8; 32]))
//!     .with_options(TableOptions { read_only: true, ..TableOptions::default() })
//!     .with_block_size(4096)
//!     .with_policy(EvictionPolicy::new(64, 4));
//!
//! assert!(config.validate().is_ok());
//! assert!(config.options().read_only);
//! ```

use std::fmt;

use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

/// Master key length in bytes.
pub const KEY_LENGTH: usize = 32;

/// Default maximum number of idle objects retained after their last close.
pub const DEFAULT_MAX_IDLE: usize = 101;

/// Default number of idle objects evicted once [`DEFAULT_MAX_IDLE`] is exceeded.
pub const DEFAULT_EVICT_BATCH: usize = 8;

pub const DEFAULT_BLOCK_SIZE: u32 = 4096;
pub const DEFAULT_IV_SIZE: u32 = 12;
pub const DEFAULT_FORMAT_VERSION: u32 = 4;

/// Errors from [`TableConfig::validate`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Block size must be non-zero")]
    ZeroBlockSize,

    #[error("IV size must be non-zero")]
    ZeroIvSize,

    #[error("Eviction batch must be at least 1")]
    ZeroEvictBatch,

    #[error("Eviction batch {batch} exceeds idle capacity {max_idle}")]
    BatchExceedsCapacity { batch: usize, max_idle: usize },
}

/// Master key shared with the backend.
///
/// Held in a [`SecretBox`] so it is zeroed on drop and never printed.
/// Access goes through [`TableKey::with_key_bytes`], which keeps the
/// exposure scoped to a closure.
pub struct TableKey(SecretBox<[u8; KEY_LENGTH]>);

impl TableKey {
    /// Take ownership of `key`, wiping the caller's stack copy.
    pub fn new(mut key: [u8; KEY_LENGTH]) -> Self {
        let secret = SecretBox::new(Box::new(key));
        key.zeroize();
        Self(secret)
    }

    /// Run `f` with the raw key bytes.
    pub fn with_key_bytes<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&[u8; KEY_LENGTH]) -> R,
    {
        f(self.0.expose_secret())
    }
}

impl fmt::Debug for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TableKey([REDACTED])")
    }
}

/// Boolean option flags of a mounted filesystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableOptions {
    /// Mounted read-only.
    pub read_only: bool,
    /// Content authentication disabled.
    pub no_authentication: bool,
    /// Access and modification times are persisted.
    pub store_time: bool,
}

/// Idle-cache retention policy.
///
/// When a close pushes the idle count above `max_idle`, the oldest
/// `evict_batch` idle objects are flushed and dropped in one go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionPolicy {
    pub max_idle: usize,
    pub evict_batch: usize,
}

impl EvictionPolicy {
    pub fn new(max_idle: usize, evict_batch: usize) -> Self {
        Self {
            max_idle,
            evict_batch,
        }
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE, DEFAULT_EVICT_BATCH)
    }
}

/// Full configuration for a [`FileTable`](crate::FileTable).
#[derive(Debug)]
pub struct TableConfig {
    format_version: u32,
    master_key: TableKey,
    options: TableOptions,
    block_size: u32,
    iv_size: u32,
    policy: EvictionPolicy,
}

impl TableConfig {
    /// Create a configuration with default options and sizes.
    pub fn new(master_key: TableKey) -> Self {
        Self {
            format_version: DEFAULT_FORMAT_VERSION,
            master_key,
            options: TableOptions::default(),
            block_size: DEFAULT_BLOCK_SIZE,
            iv_size: DEFAULT_IV_SIZE,
            policy: EvictionPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_format_version(mut self, version: u32) -> Self {
        self.format_version = version;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: TableOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    #[must_use]
    pub fn with_iv_size(mut self, iv_size: u32) -> Self {
        self.iv_size = iv_size;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Check sizes and policy for values the table cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        if self.iv_size == 0 {
            return Err(ConfigError::ZeroIvSize);
        }
        if self.policy.evict_batch == 0 {
            return Err(ConfigError::ZeroEvictBatch);
        }
        // A batch larger than the cap could never be filled on the first overflow
        if self.policy.evict_batch > self.policy.max_idle.saturating_add(1) {
            return Err(ConfigError::BatchExceedsCapacity {
                batch: self.policy.evict_batch,
                max_idle: self.policy.max_idle,
            });
        }
        Ok(())
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    pub fn master_key(&self) -> &TableKey {
        &self.master_key
    }

    pub fn options(&self) -> TableOptions {
        self.options
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn iv_size(&self) -> u32 {
        self.iv_size
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }
}
