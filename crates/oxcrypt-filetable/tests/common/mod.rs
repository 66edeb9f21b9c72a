//! Shared helpers for file table integration tests.

#![allow(dead_code)]

use std::sync::Once;

use oxcrypt_filetable::testing::MemoryBackend;
use oxcrypt_filetable::{EvictionPolicy, FileTable, TableConfig, TableKey};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Route table logs to the test output; filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

pub fn test_config() -> TableConfig {
    TableConfig::new(TableKey::new([0x42; 32]))
}

/// Table over an empty memory backend with the default policy.
pub fn new_table() -> FileTable<MemoryBackend> {
    table_with_backend(MemoryBackend::new(), EvictionPolicy::default())
}

pub fn table_with_policy(max_idle: usize, evict_batch: usize) -> FileTable<MemoryBackend> {
    table_with_backend(MemoryBackend::new(), EvictionPolicy::new(max_idle, evict_batch))
}

pub fn table_with_backend(backend: MemoryBackend, policy: EvictionPolicy) -> FileTable<MemoryBackend> {
    init_tracing();
    FileTable::new(backend, test_config().with_policy(policy)).expect("valid test config")
}
