//! Default transfer path: one unit at a time on the calling thread.

use crate::batch::{Batch, TransferPair};
use crate::phys::{CopyError, PhysMemory};

/// Copy a single pair.
pub fn folio_copy(mem: &PhysMemory, pair: &TransferPair) -> Result<(), CopyError> {
    mem.copy_mc(pair.dst().phys_addr(), pair.src().phys_addr(), pair.len())
}

/// Copy every pair of `batch` in order, stopping at the first failure.
pub fn folios_mc_copy(mem: &PhysMemory, batch: &Batch) -> Result<(), CopyError> {
    for pair in batch {
        folio_copy(mem, pair)?;
    }
    Ok(())
}
