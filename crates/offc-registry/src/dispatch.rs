use offc_mem::{folios_mc_copy, Batch, CopyError, PhysMemory};
use tracing::warn;

use crate::migrator::MigratorName;
use crate::registry::Registry;

/// How [`migrate_batch`] routed a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Backend that was consulted, if dispatch was on.
    pub backend: Option<MigratorName>,
    /// Pairs the backend transferred.
    pub offloaded: usize,
    /// Pairs the backend's predicate declined.
    pub rejected: usize,
    /// Pairs the backend accepted but then failed, re-copied by the default path.
    pub fell_back: usize,
}

impl BatchOutcome {
    /// Pairs that went through the default path.
    pub fn defaulted(&self, batch_len: usize) -> usize {
        batch_len - self.offloaded
    }
}

/// Host entry point: move every pair of `batch`, through the active backend when there is one.
///
/// The backend is looked up once, under a read guard held for the whole call, so an uninstall
/// that races with this call never frees the backend mid-transfer. Only a failure of the default
/// path itself (a poisoned source unit) is reported to the caller, and only after both the
/// backend's pairs and the rejected pairs have been handled.
pub fn migrate_batch(
    registry: &Registry,
    mem: &PhysMemory,
    batch: &Batch,
) -> Result<BatchOutcome, CopyError> {
    if batch.is_empty() {
        return Ok(BatchOutcome::default());
    }
    let stats = registry.stats();
    stats.batch();

    let guard = registry.read();
    let descriptor = match guard.descriptor() {
        Some(descriptor) if registry.dispatch_enabled() => descriptor,
        _ => {
            stats.default_copy(batch.len());
            folios_mc_copy(mem, batch)?;
            return Ok(BatchOutcome::default());
        }
    };

    let mut admitted = Vec::with_capacity(batch.len());
    let mut rejected = Vec::new();
    for (idx, pair) in batch.iter().enumerate() {
        if descriptor.can_migrate(pair.dst(), pair.src()) {
            admitted.push(idx);
        } else {
            rejected.push(idx);
        }
    }

    let mut outcome = BatchOutcome {
        backend: Some(descriptor.name().clone()),
        rejected: rejected.len(),
        ..BatchOutcome::default()
    };

    let offloaded = if admitted.len() == batch.len() {
        batch.clone()
    } else {
        batch.subset(&admitted)
    };
    let backend_result = if offloaded.is_empty() {
        Ok(())
    } else {
        descriptor.migrate(mem, &offloaded)
    };
    drop(guard);

    let mut first_err = None;
    if !offloaded.is_empty() {
        match backend_result {
            Ok(()) => {
                stats.offloaded(offloaded.len());
                outcome.offloaded = offloaded.len();
            }
            Err(err) => {
                warn!(
                    backend = %descriptor_name(&outcome),
                    errno = err.errno(),
                    "batch migration failed, falling back to default copy: {err}"
                );
                stats.backend_failure();
                stats.default_copy(offloaded.len());
                outcome.fell_back = offloaded.len();
                first_err = folios_mc_copy(mem, &offloaded).err();
            }
        }
    }

    if !rejected.is_empty() {
        warn!(
            backend = %descriptor_name(&outcome),
            pairs = rejected.len(),
            "pairs rejected by backend predicate, using default copy"
        );
        stats.rejected(rejected.len());
        stats.default_copy(rejected.len());
        if let Err(err) = folios_mc_copy(mem, &batch.subset(&rejected)) {
            first_err.get_or_insert(err);
        }
    }

    match first_err {
        Some(err) => Err(err),
        None => Ok(outcome),
    }
}

fn descriptor_name(outcome: &BatchOutcome) -> &str {
    outcome.backend.as_ref().map_or("", MigratorName::as_str)
}
