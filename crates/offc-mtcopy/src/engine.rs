use offc_mem::{Batch, Folio, PhysMemory};
use offc_registry::{MigrateError, Migrator};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::config::MtConfig;
use crate::partition::{build_work, plan, CopyPlan};
use crate::MAX_NUM_COPY_THREADS;

/// A worker count outside `1..=MAX_NUM_COPY_THREADS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid thread count {value}, must be between 1 and {max}")]
pub struct ThreadCountError {
    pub value: u64,
    pub max: usize,
}

#[derive(Debug, Error)]
pub enum MtError {
    #[error(transparent)]
    InvalidThreads(#[from] ThreadCountError),

    #[error("failed to build copy worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Name(#[from] offc_registry::NameError),
}

/// Multithreaded CPU copy engine.
///
/// Each dispatch fans a batch out to `threads()` workers on a private pool and blocks until all
/// of them have finished.
pub struct CpuMtMigrator {
    pool: rayon::ThreadPool,
    threads: Mutex<usize>,
}

impl CpuMtMigrator {
    pub fn new(config: &MtConfig) -> Result<Self, MtError> {
        let threads = check_threads(config.threads as u64)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.pool_threads.clamp(1, MAX_NUM_COPY_THREADS))
            .thread_name(|i| format!("offc-mt-{i}"))
            .build()?;
        Ok(Self {
            pool,
            threads: Mutex::new(threads),
        })
    }

    /// Workers per dispatch.
    pub fn threads(&self) -> usize {
        *self.threads.lock()
    }

    /// Change the worker count. Dispatches already in flight keep the value they started with.
    pub fn set_threads(&self, value: u64) -> Result<(), ThreadCountError> {
        let threads = check_threads(value)?;
        *self.threads.lock() = threads;
        debug!("MT threads set to {threads}");
        Ok(())
    }

    pub fn pool_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Copy every pair of `batch`, returning only after all workers are done.
    ///
    /// Nothing is copied if the work cannot be allocated or a pair cannot be split evenly. If any
    /// worker fails the whole batch reports [`MigrateError::Retry`].
    pub fn copy_batch(&self, mem: &PhysMemory, batch: &Batch) -> Result<(), MigrateError> {
        if batch.is_empty() {
            return Ok(());
        }

        let workers = self.threads().min(MAX_NUM_COPY_THREADS);
        let plan = plan(batch.len(), workers);
        let mut work = build_work(batch, &plan)?;

        self.pool.scope(|scope| {
            for item in work.iter_mut() {
                scope.spawn(move |_| item.run(mem));
            }
        });

        let failed = work.iter().filter(|w| w.failed()).count();
        if failed > 0 {
            debug!(
                pairs = batch.len(),
                workers,
                failed,
                split_pages = matches!(plan, CopyPlan::SplitPages { .. }),
                "multithreaded copy failed"
            );
            return Err(MigrateError::Retry);
        }
        Ok(())
    }
}

fn check_threads(value: u64) -> Result<usize, ThreadCountError> {
    match usize::try_from(value) {
        Ok(threads) if (1..=MAX_NUM_COPY_THREADS).contains(&threads) => Ok(threads),
        _ => Err(ThreadCountError {
            value,
            max: MAX_NUM_COPY_THREADS,
        }),
    }
}

impl Migrator for CpuMtMigrator {
    fn migrate(&self, mem: &PhysMemory, batch: &Batch) -> Result<(), MigrateError> {
        self.copy_batch(mem, batch)
    }

    fn can_migrate(&self, _dst: &Folio, _src: &Folio) -> bool {
        true
    }
}

impl std::fmt::Debug for CpuMtMigrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuMtMigrator")
            .field("threads", &self.threads())
            .field("pool_threads", &self.pool_threads())
            .finish()
    }
}
