use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::migrator::{Migrator, MigratorDescriptor, MigratorName};
use crate::registry::Registry;

/// What a call to [`OffloadSwitch::apply`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchAction {
    Enabled,
    Disabled,
    AlreadyOn,
    AlreadyOff,
    /// Another backend holds the registry.
    Busy,
    /// The action code was neither 0 nor 1.
    Ignored,
}

impl SwitchAction {
    /// Whether the registry changed.
    pub fn changed(self) -> bool {
        matches!(self, SwitchAction::Enabled | SwitchAction::Disabled)
    }
}

/// Per-backend on/off toggle for a shared [`Registry`].
pub struct OffloadSwitch {
    registry: Arc<Registry>,
    name: MigratorName,
    migrator: Arc<dyn Migrator>,
    /// Serializes toggles of this backend.
    toggle: Mutex<()>,
}

impl OffloadSwitch {
    pub fn new(registry: Arc<Registry>, name: MigratorName, migrator: Arc<dyn Migrator>) -> Self {
        Self {
            registry,
            name,
            migrator,
            toggle: Mutex::new(()),
        }
    }

    /// `1` turns offloading on, `0` turns it off; anything else is logged and ignored.
    pub fn apply(&self, action: i64) -> SwitchAction {
        match action {
            0 => self.disable(),
            1 => self.enable(),
            other => {
                debug!(backend = %self.name, action = other, "invalid offloading action, ignoring");
                SwitchAction::Ignored
            }
        }
    }

    pub fn enable(&self) -> SwitchAction {
        let _toggle = self.toggle.lock();
        if self.is_on() {
            debug!("{} offloading is already ON", self.name);
            return SwitchAction::AlreadyOn;
        }

        let descriptor = MigratorDescriptor::new(self.name.clone(), Arc::clone(&self.migrator));
        if !self.registry.install(descriptor) {
            return SwitchAction::Busy;
        }
        SwitchAction::Enabled
    }

    pub fn disable(&self) -> SwitchAction {
        let _toggle = self.toggle.lock();
        if !self.registry.uninstall_if(&self.name) {
            debug!("{} offloading is already OFF", self.name);
            return SwitchAction::AlreadyOff;
        }
        SwitchAction::Disabled
    }

    /// Whether this backend is the one installed in the registry.
    pub fn is_on(&self) -> bool {
        self.registry.is_active(&self.name)
    }

    pub fn name(&self) -> &MigratorName {
        &self.name
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Stop offloading if it is on and wait until the retired descriptor has been freed.
    pub fn shutdown(&self) {
        self.disable();
        self.registry.barrier();
    }
}

impl std::fmt::Debug for OffloadSwitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffloadSwitch")
            .field("name", &self.name)
            .field("on", &self.is_on())
            .finish()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    use offc_mem::{Batch, PhysMemory};

    use crate::migrator::MigrateError;

    struct Nop;

    impl Migrator for Nop {
        fn migrate(&self, _mem: &PhysMemory, _batch: &Batch) -> Result<(), MigrateError> {
            Ok(())
        }
    }

    fn switch(registry: &Arc<Registry>, name: &str) -> OffloadSwitch {
        OffloadSwitch::new(
            Arc::clone(registry),
            MigratorName::new(name).unwrap(),
            Arc::new(Nop),
        )
    }

    #[test]
    fn toggles_are_idempotent() {
        let registry = Arc::new(Registry::new());
        let sw = switch(&registry, "CPU_MT_COPY");

        assert_eq!(sw.apply(1), SwitchAction::Enabled);
        assert_eq!(sw.apply(1), SwitchAction::AlreadyOn);
        assert!(registry.dispatch_enabled());
        assert_eq!(registry.active_name().unwrap(), "CPU_MT_COPY");

        assert_eq!(sw.apply(0), SwitchAction::Disabled);
        assert_eq!(sw.apply(0), SwitchAction::AlreadyOff);
        assert!(!registry.dispatch_enabled());
        assert_eq!(registry.active_name(), None);
    }

    #[test]
    fn other_values_are_ignored() {
        let registry = Arc::new(Registry::new());
        let sw = switch(&registry, "DCBM");
        assert_eq!(sw.apply(2), SwitchAction::Ignored);
        assert_eq!(sw.apply(-1), SwitchAction::Ignored);
        assert!(!sw.is_on());
        assert_eq!(registry.active_name(), None);

        sw.apply(1);
        assert_eq!(sw.apply(7), SwitchAction::Ignored);
        assert!(sw.is_on());
    }

    #[test]
    fn second_backend_is_busy_and_cannot_remove_the_first() {
        let registry = Arc::new(Registry::new());
        let cpu = switch(&registry, "CPU_MT_COPY");
        let dma = switch(&registry, "DCBM");

        assert_eq!(cpu.apply(1), SwitchAction::Enabled);
        assert_eq!(dma.apply(1), SwitchAction::Busy);
        assert!(!dma.is_on());
        assert_eq!(dma.apply(0), SwitchAction::AlreadyOff);
        assert_eq!(registry.active_name().unwrap(), "CPU_MT_COPY");

        cpu.shutdown();
        assert_eq!(dma.apply(1), SwitchAction::Enabled);
        assert_eq!(registry.active_name().unwrap(), "DCBM");
    }

    #[test]
    fn state_follows_the_registry() {
        let registry = Arc::new(Registry::new());
        let sw = switch(&registry, "CPU_MT_COPY");
        sw.apply(1);

        assert!(registry.uninstall());
        assert!(!sw.is_on());
        assert_eq!(sw.apply(0), SwitchAction::AlreadyOff);
        assert_eq!(sw.apply(1), SwitchAction::Enabled);
        assert!(sw.is_on());
        assert_eq!(registry.active_name().unwrap(), "CPU_MT_COPY");
    }

    #[test]
    fn shutdown_forces_off() {
        let registry = Arc::new(Registry::new());
        let sw = switch(&registry, "DCBM");
        sw.apply(1);
        sw.shutdown();
        assert!(!sw.is_on());
        assert!(!registry.dispatch_enabled());
        sw.shutdown();
    }
}
