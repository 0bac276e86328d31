use std::sync::Arc;

use offc_registry::{MigratorName, OffloadSwitch, Registry, SwitchAction};

use crate::config::MtConfig;
use crate::engine::{CpuMtMigrator, MtError};
use crate::CPU_MT_COPY;

/// The CPU engine as loaded into a host: the migrator plus its offloading toggle.
///
/// Dropping it stops offloading if this engine is active.
#[derive(Debug)]
pub struct CpuMtOffload {
    migrator: Arc<CpuMtMigrator>,
    switch: OffloadSwitch,
}

impl CpuMtOffload {
    pub fn new(registry: Arc<Registry>, config: &MtConfig) -> Result<Self, MtError> {
        let migrator = Arc::new(CpuMtMigrator::new(config)?);
        let switch = OffloadSwitch::new(registry, MigratorName::new(CPU_MT_COPY)?, migrator.clone());
        Ok(Self { migrator, switch })
    }

    pub fn migrator(&self) -> &Arc<CpuMtMigrator> {
        &self.migrator
    }

    pub fn set_offloading(&self, action: i64) -> SwitchAction {
        self.switch.apply(action)
    }

    pub fn is_offloading(&self) -> bool {
        self.switch.is_on()
    }

    pub fn shutdown(&self) {
        self.switch.shutdown();
    }
}

impl Drop for CpuMtOffload {
    fn drop(&mut self) {
        self.shutdown();
    }
}
