//! Tuning knobs shared by the parallel builders and sorts.
//!
//! A [`CollectionsConfig`] can be built in code or read from a TOML file.
//! Missing keys fall back to their defaults.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::arrays::sort::DEFAULT_PARALLEL_THRESHOLD;
use crate::primitives::concurrency::Concurrency;
use crate::types::{CollectionsError, Result};

/// Shards created per writer by the sharded id map builders.
pub const DEFAULT_SHARDS_PER_THREAD: usize = 4;

/// Concurrency and sizing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionsConfig {
    /// Number of workers used by parallel operations. 0 means one per
    /// available core.
    pub concurrency: usize,
    /// Size of the global rayon pool, if it should be configured.
    pub rayon_thread_pool_size: Option<usize>,
    /// Range length below which the merge sort stops forking.
    pub parallel_sort_threshold: usize,
    /// Shards per writer of the sharded id map builders.
    pub shards_per_thread: usize,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            rayon_thread_pool_size: None,
            parallel_sort_threshold: DEFAULT_PARALLEL_THRESHOLD,
            shards_per_thread: DEFAULT_SHARDS_PER_THREAD,
        }
    }
}

impl CollectionsConfig {
    /// Single-worker settings.
    pub fn sequential() -> Self {
        Self {
            concurrency: 1,
            shards_per_thread: 1,
            ..Self::default()
        }
    }

    /// One worker per core with a pool of the same size.
    pub fn parallel() -> Self {
        let workers = Concurrency::available().value();
        Self {
            concurrency: workers,
            rayon_thread_pool_size: Some(workers),
            ..Self::default()
        }
    }

    /// Effective worker count.
    pub fn concurrency(&self) -> Concurrency {
        match self.concurrency {
            0 => Concurrency::available(),
            n => Concurrency::new(n),
        }
    }

    /// Parses settings from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| CollectionsError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Serializes the settings as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| CollectionsError::Config(err.to_string()))
    }

    fn validate(&self) -> Result<()> {
        if self.shards_per_thread == 0 {
            return Err(CollectionsError::Invalid("shards_per_thread must be positive"));
        }
        if self.rayon_thread_pool_size == Some(0) {
            return Err(CollectionsError::Invalid(
                "rayon_thread_pool_size must be positive",
            ));
        }
        Ok(())
    }

    /// Sizes the global rayon pool from `rayon_thread_pool_size`.
    ///
    /// Only the first call in a process builds the pool; every later call
    /// logs a warning. Returns whether the pool has the requested size.
    pub fn configure_thread_pool(&self) -> bool {
        static CONFIGURED: OnceLock<Option<usize>> = OnceLock::new();
        let Some(threads) = self.rayon_thread_pool_size else {
            return false;
        };
        let mut built_now = false;
        let installed = *CONFIGURED.get_or_init(|| {
            built_now = true;
            match rayon::ThreadPoolBuilder::new().num_threads(threads).build_global() {
                Ok(()) => {
                    info!(threads, "config.thread_pool");
                    Some(threads)
                }
                Err(err) => {
                    warn!(threads, error = %err, "config.thread_pool.failed");
                    None
                }
            }
        });
        if !built_now {
            warn!(
                requested = threads,
                installed = ?installed,
                "config.thread_pool.already_configured"
            );
        }
        installed == Some(threads)
    }
}
