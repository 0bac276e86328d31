//! `CPU_MT_COPY`: batch page copy fanned out over a pool of CPU workers.
//!
//! With `T` workers and `N` pairs, a batch with `N < T` has every pair split into `T` equal
//! chunks, one per worker; otherwise each worker copies a contiguous block of whole pairs
//! (`N / T` each, the first `N % T` workers taking one more). See [`plan`].

#![forbid(unsafe_code)]

mod config;
mod engine;
mod offload;
pub mod partition;

pub use config::MtConfig;
pub use engine::{CpuMtMigrator, MtError, ThreadCountError};
pub use offload::CpuMtOffload;
pub use partition::{plan, CopyPlan};

/// Name the engine registers under.
pub const CPU_MT_COPY: &str = "CPU_MT_COPY";

pub const MAX_NUM_COPY_THREADS: usize = 64;

pub const DEFAULT_THREADS: usize = 4;
