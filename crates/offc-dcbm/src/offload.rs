use std::sync::Arc;

use offc_registry::{MigratorName, OffloadSwitch, Registry, SwitchAction};

use crate::config::DcbmConfig;
use crate::dmaengine::DmaProvider;
use crate::migrator::{DcbmError, DcbmMigrator};
use crate::DCBM;

/// The DMA engine as loaded into a host. Dropping it stops offloading if it is active.
#[derive(Debug)]
pub struct DcbmOffload {
    migrator: Arc<DcbmMigrator>,
    switch: OffloadSwitch,
}

impl DcbmOffload {
    pub fn new(
        registry: Arc<Registry>,
        provider: Arc<dyn DmaProvider>,
        config: &DcbmConfig,
    ) -> Result<Self, DcbmError> {
        let migrator = Arc::new(DcbmMigrator::new(provider));
        migrator.set_nr_dma_chan(config.nr_dma_chan as i64)?;
        let switch = OffloadSwitch::new(registry, MigratorName::new(DCBM)?, migrator.clone());
        Ok(Self { migrator, switch })
    }

    pub fn migrator(&self) -> &Arc<DcbmMigrator> {
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

impl Drop for DcbmOffload {
    fn drop(&mut self) {
        self.shutdown();
    }
}
