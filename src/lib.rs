//! Pluggable page-migration offload.
//!
//! A host moves batches of pages with [`migrate_batch`]. When a backend is installed in the
//! [`Registry`] the batch goes to it: [`CpuMtOffload`] splits the copy across a worker pool and
//! [`DcbmOffload`] hands it to DMA channels. Either way the default CPU copy picks up whatever
//! the backend declines or fails to move. Backends are switched on and tuned through the
//! [`SysfsRoot`] control tree.
//!
//! [`OffloadSystem`] wires all of this together over one [`PhysMemory`] and a software DMA
//! controller.

#![forbid(unsafe_code)]

mod config;
mod system;

pub use config::OffcConfig;
pub use system::{OffloadSystem, SystemError};

pub use offc_dcbm as dcbm;
pub use offc_mem as mem;
pub use offc_mtcopy as mtcopy;
pub use offc_registry as registry;
pub use offc_sysfs as sysfs;

pub use offc_dcbm::{DcbmConfig, DcbmMigrator, DcbmOffload, DmaFault, SoftDmaController};
pub use offc_mem::{Batch, CopyError, Folio, FolioFlags, PhysMemory, TransferPair, PAGE_SIZE};
pub use offc_mtcopy::{CpuMtMigrator, CpuMtOffload, MtConfig};
pub use offc_registry::{
    migrate_batch, BatchOutcome, ConfigError, MigrateError, Migrator, MigratorDescriptor,
    MigratorName, Registry,
};
pub use offc_sysfs::{ControlError, SysfsRoot};
