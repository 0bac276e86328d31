use offc_registry::config::{env_in_range, process_env};
use offc_registry::ConfigError;

use crate::{DEFAULT_THREADS, MAX_NUM_COPY_THREADS};

/// Startup configuration for the CPU copy engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MtConfig {
    /// Workers per dispatch (`T`). Adjustable at runtime.
    pub threads: usize,
    /// Threads in the worker pool.
    pub pool_threads: usize,
}

impl Default for MtConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            pool_threads: default_pool_threads(),
        }
    }
}

impl MtConfig {
    /// Reads `OFFC_MT_THREADS` and `OFFC_MT_POOL_THREADS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max = MAX_NUM_COPY_THREADS as u64;
        let threads = env_in_range(&lookup, "OFFC_MT_THREADS", DEFAULT_THREADS as u64, 1..=max)?;
        let pool_threads = env_in_range(
            &lookup,
            "OFFC_MT_POOL_THREADS",
            default_pool_threads() as u64,
            1..=max,
        )?;
        Ok(Self {
            threads: threads as usize,
            pool_threads: pool_threads as usize,
        })
    }
}

fn default_pool_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(DEFAULT_THREADS)
        .min(MAX_NUM_COPY_THREADS)
}
