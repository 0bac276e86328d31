use std::fmt;
use std::sync::Arc;

use offc_mem::{Batch, Folio, PhysMemory};
use thiserror::Error;

use crate::errno;

/// Size of the name field a backend registers under, including the terminator.
pub const MIGRATOR_NAME_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("migrator name is empty")]
    Empty,

    #[error("migrator name is {len} bytes, at most {max} allowed")]
    TooLong { len: usize, max: usize },
}

/// Bounded, non-empty backend name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MigratorName(String);

impl MigratorName {
    pub const MAX_LEN: usize = MIGRATOR_NAME_LEN - 1;

    pub fn new(name: impl Into<String>) -> Result<Self, NameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(NameError::Empty);
        }
        if name.len() > Self::MAX_LEN {
            return Err(NameError::TooLong {
                len: name.len(),
                max: Self::MAX_LEN,
            });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MigratorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for MigratorName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for MigratorName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Batch-level failures a backend reports to the host. Every variant means "nothing was
/// committed as success"; the host re-copies the batch through the default path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MigrateError {
    #[error("transfer failed, retry")]
    Retry,

    #[error("out of memory allocating {what}")]
    OutOfMemory { what: &'static str },

    #[error("unsupported batch: {0}")]
    Unsupported(String),
}

impl MigrateError {
    /// Negative errno equivalent.
    pub fn errno(&self) -> i32 {
        match self {
            MigrateError::Retry => -errno::EAGAIN,
            MigrateError::OutOfMemory { .. } => -errno::ENOMEM,
            MigrateError::Unsupported(_) => -errno::ENOTSUPP,
        }
    }
}

/// A pluggable bulk transfer implementation.
///
/// `migrate` must not return until every pair of `batch` has been transferred or the call has
/// failed as a whole. Pairs have no ordering relationship with each other.
pub trait Migrator: Send + Sync {
    fn migrate(&self, mem: &PhysMemory, batch: &Batch) -> Result<(), MigrateError>;

    /// Whether this backend can move `src` into `dst`.
    fn can_migrate(&self, _dst: &Folio, _src: &Folio) -> bool {
        true
    }
}

/// What gets installed into a [`crate::Registry`].
///
/// The `Arc` keeps the backend alive for as long as any descriptor (installed or waiting for
/// its grace period) refers to it.
pub struct MigratorDescriptor {
    name: MigratorName,
    migrator: Arc<dyn Migrator>,
}

impl MigratorDescriptor {
    pub fn new(name: MigratorName, migrator: Arc<dyn Migrator>) -> Self {
        Self { name, migrator }
    }

    pub fn name(&self) -> &MigratorName {
        &self.name
    }

    pub fn migrator(&self) -> &Arc<dyn Migrator> {
        &self.migrator
    }

    pub fn migrate(&self, mem: &PhysMemory, batch: &Batch) -> Result<(), MigrateError> {
        self.migrator.migrate(mem, batch)
    }

    pub fn can_migrate(&self, dst: &Folio, src: &Folio) -> bool {
        self.migrator.can_migrate(dst, src)
    }
}

impl fmt::Debug for MigratorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigratorDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_bounded() {
        assert_eq!(MigratorName::new(""), Err(NameError::Empty));
        assert_eq!(
            MigratorName::new("x".repeat(32)),
            Err(NameError::TooLong { len: 32, max: 31 })
        );
        let name = MigratorName::new("x".repeat(31)).unwrap();
        assert_eq!(name.as_str().len(), 31);
        assert_eq!(MigratorName::new("DCBM").unwrap(), "DCBM");
    }

    #[test]
    fn errno_mapping() {
        assert_eq!(MigrateError::Retry.errno(), -11);
        assert_eq!(MigrateError::OutOfMemory { what: "work items" }.errno(), -12);
        assert_eq!(MigrateError::Unsupported("x".into()).errno(), -524);
    }
}
