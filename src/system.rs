use std::sync::Arc;

use offc_dcbm::{DcbmError, DcbmOffload, SoftDmaController};
use offc_mem::{Batch, CopyError, MemoryError, PhysMemory};
use offc_mtcopy::{CpuMtOffload, MtError};
use offc_registry::{migrate_batch, BatchOutcome, ConfigError, Registry};
use offc_sysfs::SysfsRoot;
use thiserror::Error;
use tracing::info;

use crate::config::OffcConfig;

#[derive(Debug, Error)]
pub enum SystemError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to set up host memory: {0}")]
    Memory(#[from] MemoryError),

    #[error("failed to load CPU_MT_COPY: {0}")]
    CpuMt(#[from] MtError),

    #[error("failed to load DCBM: {0}")]
    Dcbm(#[from] DcbmError),
}

/// One host with both backends loaded and the control tree attached.
///
/// Both backends start with offloading off; turn one on with a write to
/// `cpu_mt/offloading` or `dcbm/offloading`.
pub struct OffloadSystem {
    mem: Arc<PhysMemory>,
    registry: Arc<Registry>,
    dma: SoftDmaController,
    cpu_mt: Arc<CpuMtOffload>,
    dcbm: Arc<DcbmOffload>,
    sysfs: SysfsRoot,
}

impl OffloadSystem {
    pub fn new(config: &OffcConfig) -> Result<Self, SystemError> {
        let mem = Arc::new(PhysMemory::new(config.nr_frames)?);
        let registry = Arc::new(Registry::new());
        let dma = SoftDmaController::new(mem.clone(), config.soft_dma_channels);

        let cpu_mt = Arc::new(CpuMtOffload::new(registry.clone(), &config.mt)?);
        let dcbm = Arc::new(DcbmOffload::new(
            registry.clone(),
            Arc::new(dma.clone()),
            &config.dcbm,
        )?);
        let sysfs = SysfsRoot::standard(registry.clone(), cpu_mt.clone(), dcbm.clone());

        info!(
            nr_frames = config.nr_frames,
            dma_channels = config.soft_dma_channels,
            "offload system ready"
        );
        Ok(Self {
            mem,
            registry,
            dma,
            cpu_mt,
            dcbm,
            sysfs,
        })
    }

    pub fn from_env() -> Result<Self, SystemError> {
        Self::new(&OffcConfig::from_env()?)
    }

    pub fn mem(&self) -> &Arc<PhysMemory> {
        &self.mem
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn dma(&self) -> &SoftDmaController {
        &self.dma
    }

    pub fn cpu_mt(&self) -> &Arc<CpuMtOffload> {
        &self.cpu_mt
    }

    pub fn dcbm(&self) -> &Arc<DcbmOffload> {
        &self.dcbm
    }

    pub fn sysfs(&self) -> &SysfsRoot {
        &self.sysfs
    }

    /// Move `batch` through whichever backend is active.
    pub fn migrate(&self, batch: &Batch) -> Result<BatchOutcome, CopyError> {
        migrate_batch(&self.registry, &self.mem, batch)
    }

    /// Stop both backends and wait until every retired backend has been released.
    pub fn shutdown(&self) {
        self.cpu_mt.shutdown();
        self.dcbm.shutdown();
        self.registry.barrier();
        info!("offload system shut down");
    }
}

impl std::fmt::Debug for OffloadSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffloadSystem")
            .field("nr_frames", &self.mem.nr_frames())
            .field("active", &self.registry.active_name())
            .field("dma", &self.dma)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_offloading_off() {
        let system = OffloadSystem::new(&OffcConfig {
            nr_frames: 16,
            ..OffcConfig::default()
        })
        .unwrap();
        assert_eq!(system.registry().active_name(), None);
        assert!(!system.cpu_mt().is_offloading());
        assert!(!system.dcbm().is_offloading());
        assert_eq!(system.dma().nr_channels(), 4);
        assert_eq!(system.sysfs().list().len(), 5);
    }

    #[test]
    fn bad_thread_count_fails_to_load() {
        let mut config = OffcConfig::default();
        config.mt.threads = 0;
        assert!(matches!(
            OffloadSystem::new(&config),
            Err(SystemError::CpuMt(MtError::InvalidThreads(
                offc_mtcopy::ThreadCountError { value: 0, .. }
            )))
        ));
    }

    #[test]
    fn shutdown_stops_the_active_backend() {
        let system = OffloadSystem::new(&OffcConfig {
            nr_frames: 16,
            ..OffcConfig::default()
        })
        .unwrap();
        system.sysfs().write("dcbm/offloading", "1").unwrap();
        assert!(system.registry().dispatch_enabled());
        system.shutdown();
        assert_eq!(system.registry().active_name(), None);
        assert_eq!(system.sysfs().read("dcbm/offloading").unwrap(), "0\n");
    }
}
