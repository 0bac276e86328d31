//! Backend registration and host dispatch for batch page migration.
//!
//! A [`Registry`] holds at most one active [`MigratorDescriptor`]. Hosts call
//! [`migrate_batch`], which routes each batch through the active backend when dispatch is on and
//! through the default copy path otherwise. Backends turn themselves on and off through an
//! [`OffloadSwitch`].
//!
//! Readers never block: the active descriptor is read inside a grace-period read-side section
//! ([`srcu`]), and an uninstalled descriptor is only freed once every reader that might still be
//! using it has finished.

pub mod config;
mod dispatch;
pub mod errno;
mod migrator;
mod registry;
pub mod srcu;
mod stats;
mod switch;

pub use config::ConfigError;
pub use dispatch::{migrate_batch, BatchOutcome};
pub use migrator::{
    MigrateError, Migrator, MigratorDescriptor, MigratorName, NameError, MIGRATOR_NAME_LEN,
};
pub use registry::{ReadGuard, Registry};
pub use stats::{DispatchSnapshot, DispatchStats};
pub use switch::{OffloadSwitch, SwitchAction};
