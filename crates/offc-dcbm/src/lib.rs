//! `DCBM`: batch page copy offloaded to DMA memcpy channels.
//!
//! [`DcbmMigrator`] talks to hardware only through the [`dmaengine`] traits. [`SoftDmaController`]
//! implements them in software over a [`offc_mem::PhysMemory`], with fault injection, so the
//! engine runs (and is tested) without a DMA device.

mod config;
pub mod dmaengine;
mod migrator;
mod offload;
mod soft;

pub use config::DcbmConfig;
pub use dmaengine::{DmaCaps, DmaChannel, DmaDevice, DmaError, DmaProvider, DmaStatus};
pub use migrator::{DcbmError, DcbmMigrator, DcbmSnapshot, DcbmStats, DmaCopyReport};
pub use offload::DcbmOffload;
pub use soft::{DmaFault, SoftDmaController, SoftDmaStats};

/// Name the engine registers under.
pub const DCBM: &str = "DCBM";

pub const MAX_DMA_CHANNELS: usize = 16;

pub const DEFAULT_DMA_CHANNELS: usize = 1;
