//! # Configuration
//!
//! Startup configuration for the allocator and the work queue.
//!
//! Loaded once from TOML. Every field has a default, so an empty file is a
//! valid config:
//!
//! ```toml
//! [allocator]
//! capacity = 67108864
//! clear = true
//!
//! [work_queue]
//! max_items = 256
//! reserved_cores = 1
//! thread_name = "ember-worker"
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};

/// Configuration for a [`crate::memory::BlockAllocator`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Arena size in bytes, rounded up to the page size.
    pub capacity: usize,
    /// Zero the arena on creation.
    pub clear: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            capacity: 64 * 1024 * 1024,
            clear: true,
        }
    }
}

/// Configuration for a [`crate::jobs::WorkQueue`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkQueueConfig {
    /// Requested ring size. Raised to the queue's minimum capacity.
    pub max_items: usize,
    /// Fixed worker count. `None` derives it from the logical core count.
    pub worker_threads: Option<usize>,
    /// Cores assumed busy with other engine threads.
    pub reserved_cores: usize,
    /// Prefix for worker thread names.
    pub thread_name: String,
}

impl Default for WorkQueueConfig {
    fn default() -> Self {
        Self {
            max_items: 256,
            worker_threads: None,
            reserved_cores: 1,
            thread_name: "ember-worker".to_owned(),
        }
    }
}

impl WorkQueueConfig {
    /// One worker, default ring.
    #[must_use]
    pub fn single_worker() -> Self {
        Self {
            worker_threads: Some(1),
            ..Self::default()
        }
    }

    /// Default config with a fixed worker count.
    #[must_use]
    pub fn with_workers(workers: usize) -> Self {
        Self {
            worker_threads: Some(workers),
            ..Self::default()
        }
    }
}

/// Top-level configuration file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EmberConfig {
    /// Allocator section.
    pub allocator: AllocatorConfig,
    /// Work queue section.
    pub work_queue: WorkQueueConfig,
}

impl EmberConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not parse or fails validation.
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Rejects values no allocator or queue can be built from.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.allocator.capacity == 0 {
            return Err(invalid("allocator.capacity must be greater than zero"));
        }
        if self.work_queue.max_items == 0 {
            return Err(invalid("work_queue.max_items must be greater than zero"));
        }
        if self.work_queue.worker_threads == Some(0) {
            return Err(invalid("work_queue.worker_threads must be at least 1"));
        }
        if self.work_queue.thread_name.is_empty() {
            return Err(invalid("work_queue.thread_name must not be empty"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EmberConfig::from_toml_str("").unwrap();
        assert_eq!(config, EmberConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = EmberConfig::from_toml_str(
            r#"
            [allocator]
            capacity = 8192

            [work_queue]
            worker_threads = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.allocator.capacity, 8192);
        assert!(config.allocator.clear);
        assert_eq!(config.work_queue.worker_threads, Some(3));
        assert_eq!(config.work_queue.max_items, 256);
    }

    #[test]
    fn test_rejects_zero_workers() {
        let err = EmberConfig::from_toml_str("[work_queue]\nworker_threads = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = EmberConfig::from_toml_str("[allocator\ncapacity = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
