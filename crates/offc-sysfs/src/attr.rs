use std::sync::Arc;

use offc_dcbm::{DcbmError, DcbmOffload, MAX_DMA_CHANNELS};
use offc_mtcopy::{CpuMtOffload, ThreadCountError};
use offc_registry::errno::{EACCES, EINVAL, ENOENT, ERANGE};
use offc_registry::{Registry, SwitchAction};
use thiserror::Error;
use tracing::{debug, error};

use crate::parse::{parse_int, parse_uint, ParseError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("value {value} out of range {min}..={max}")]
    OutOfRange { value: i64, min: i64, max: i64 },

    #[error("no such attribute: {0}")]
    NoSuchAttribute(String),

    #[error("attribute is read-only")]
    ReadOnly,
}

impl ControlError {
    /// Negative errno a write would fail with.
    pub fn errno(&self) -> i32 {
        match self {
            ControlError::Parse(ParseError::Invalid) => -EINVAL,
            ControlError::Parse(ParseError::Overflow) => -ERANGE,
            ControlError::OutOfRange { .. } => -EINVAL,
            ControlError::NoSuchAttribute(_) => -ENOENT,
            ControlError::ReadOnly => -EACCES,
        }
    }
}

/// One file in a control directory.
pub trait Attribute: Send + Sync {
    fn name(&self) -> &str;

    /// Current value, newline terminated.
    fn show(&self) -> String;

    /// Apply `buf`, returning the number of bytes consumed.
    fn store(&self, _buf: &str) -> Result<usize, ControlError> {
        Err(ControlError::ReadOnly)
    }
}

/// A backend with an on/off offloading toggle.
pub trait OffloadControl: Send + Sync {
    fn set_offloading(&self, action: i64) -> SwitchAction;
    fn is_offloading(&self) -> bool;
}

impl OffloadControl for CpuMtOffload {
    fn set_offloading(&self, action: i64) -> SwitchAction {
        CpuMtOffload::set_offloading(self, action)
    }

    fn is_offloading(&self) -> bool {
        CpuMtOffload::is_offloading(self)
    }
}

impl OffloadControl for DcbmOffload {
    fn set_offloading(&self, action: i64) -> SwitchAction {
        DcbmOffload::set_offloading(self, action)
    }

    fn is_offloading(&self) -> bool {
        DcbmOffload::is_offloading(self)
    }
}

/// `offloading`: `1` starts offloading through the backend, `0` stops it.
pub struct OffloadingAttr {
    backend: Arc<dyn OffloadControl>,
}

impl OffloadingAttr {
    pub fn new(backend: Arc<dyn OffloadControl>) -> Self {
        Self { backend }
    }
}

impl Attribute for OffloadingAttr {
    fn name(&self) -> &str {
        "offloading"
    }

    fn show(&self) -> String {
        format!("{}\n", u8::from(self.backend.is_offloading()))
    }

    fn store(&self, buf: &str) -> Result<usize, ControlError> {
        let action = parse_int(buf).map_err(|err| {
            debug!("error parsing input {buf:?}: {err}");
            err
        })?;
        if self.backend.set_offloading(action) == SwitchAction::Ignored {
            debug!("input should be zero or one, parsed as {action}");
        }
        Ok(buf.len())
    }
}

/// `cpu_mt/threads`: workers per dispatch.
pub struct ThreadsAttr {
    offload: Arc<CpuMtOffload>,
}

impl ThreadsAttr {
    pub fn new(offload: Arc<CpuMtOffload>) -> Self {
        Self { offload }
    }
}

impl Attribute for ThreadsAttr {
    fn name(&self) -> &str {
        "threads"
    }

    fn show(&self) -> String {
        format!("{}\n", self.offload.migrator().threads())
    }

    fn store(&self, buf: &str) -> Result<usize, ControlError> {
        let threads = parse_uint(buf).map_err(|err| {
            debug!("error parsing input {buf:?}: {err}");
            err
        })?;
        self.offload
            .migrator()
            .set_threads(threads)
            .map_err(|ThreadCountError { value, max }| {
                debug!("Invalid thread count. Must be between 1 and {max}");
                ControlError::OutOfRange {
                    value: i64::try_from(value).unwrap_or(i64::MAX),
                    min: 1,
                    max: max as i64,
                }
            })?;
        Ok(buf.len())
    }
}

/// `dcbm/nr_dma_chan`: channels requested per batch.
pub struct NrDmaChanAttr {
    offload: Arc<DcbmOffload>,
}

impl NrDmaChanAttr {
    pub fn new(offload: Arc<DcbmOffload>) -> Self {
        Self { offload }
    }
}

impl Attribute for NrDmaChanAttr {
    fn name(&self) -> &str {
        "nr_dma_chan"
    }

    fn show(&self) -> String {
        format!("{}\n", self.offload.migrator().nr_dma_chan())
    }

    fn store(&self, buf: &str) -> Result<usize, ControlError> {
        let value = parse_int(buf).map_err(|err| {
            error!("error parsing input {buf:?}: {err}");
            err
        })?;
        match self.offload.migrator().set_nr_dma_chan(value) {
            Ok(()) => Ok(buf.len()),
            Err(err) => {
                error!("invalid value: {err}");
                let max = match err {
                    DcbmError::InvalidChannels { max, .. } => max,
                    DcbmError::Name(_) => MAX_DMA_CHANNELS,
                };
                Err(ControlError::OutOfRange {
                    value,
                    min: 1,
                    max: max as i64,
                })
            }
        }
    }
}

/// `offc/active_migrator`: name of the installed backend, or an empty line.
pub struct ActiveMigratorAttr {
    registry: Arc<Registry>,
}

impl ActiveMigratorAttr {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

impl Attribute for ActiveMigratorAttr {
    fn name(&self) -> &str {
        "active_migrator"
    }

    fn show(&self) -> String {
        match self.registry.active_name() {
            Some(name) => format!("{name}\n"),
            None => "\n".to_owned(),
        }
    }
}
