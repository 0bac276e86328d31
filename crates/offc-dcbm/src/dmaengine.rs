//! Minimal DMA-engine client interface: providers hand out memcpy-capable channels, channels
//! prepare and queue descriptors, devices map pages into the engine's address space.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use offc_mem::{Folio, Pfn};
use thiserror::Error;

/// Bus address as seen by the DMA engine.
pub type DmaAddr = u64;

/// Handle for a submitted descriptor. Always positive.
pub type DmaCookie = i32;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DmaCaps: u32 {
        const MEMCPY = 1 << 0;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DmaCtrlFlags: u32 {
        /// Run the completion callback when the transfer finishes.
        const PREP_INTERRUPT = 1 << 0;
        /// The client will not reuse the descriptor.
        const CTRL_ACK = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// Device reads (transfer source).
    ToDevice,
    /// Device writes (transfer destination).
    FromDevice,
}

/// Hardware result delivered to a completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaStatus {
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DmaError {
    #[error("failed to map pfn {pfn} for {dir:?}")]
    MapFailed { pfn: Pfn, dir: DmaDirection },

    #[error("failed to prepare memcpy descriptor")]
    PrepFailed,

    #[error("descriptor submission failed")]
    SubmitFailed,
}

pub type DmaCallback = Box<dyn FnOnce(DmaStatus) + Send + 'static>;

/// A prepared memcpy, not yet submitted.
pub struct DmaTxDescriptor {
    dst: DmaAddr,
    src: DmaAddr,
    len: usize,
    flags: DmaCtrlFlags,
    callback: Option<DmaCallback>,
}

impl DmaTxDescriptor {
    pub fn new(dst: DmaAddr, src: DmaAddr, len: usize, flags: DmaCtrlFlags) -> Self {
        Self {
            dst,
            src,
            len,
            flags,
            callback: None,
        }
    }

    pub fn dst(&self) -> DmaAddr {
        self.dst
    }

    pub fn src(&self) -> DmaAddr {
        self.src
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn flags(&self) -> DmaCtrlFlags {
        self.flags
    }

    pub fn set_callback(&mut self, callback: impl FnOnce(DmaStatus) + Send + 'static) {
        self.callback = Some(Box::new(callback));
    }

    /// Run the callback, if any. Called by the engine once the transfer has finished.
    pub fn complete(mut self, status: DmaStatus) {
        if let Some(callback) = self.callback.take() {
            callback(status);
        }
    }
}

impl fmt::Debug for DmaTxDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaTxDescriptor")
            .field("dst", &format_args!("0x{:x}", self.dst))
            .field("src", &format_args!("0x{:x}", self.src))
            .field("len", &self.len)
            .field("flags", &self.flags)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

pub trait DmaDevice: Send + Sync {
    fn map_page(&self, folio: &Folio, len: usize, dir: DmaDirection) -> Result<DmaAddr, DmaError>;

    fn unmap_page(&self, addr: DmaAddr, len: usize, dir: DmaDirection);
}

/// An acquired channel. Dropping it releases the channel back to its provider.
pub trait DmaChannel: Send {
    fn device(&self) -> Arc<dyn DmaDevice>;

    fn prep_dma_memcpy(
        &self,
        dst: DmaAddr,
        src: DmaAddr,
        len: usize,
        flags: DmaCtrlFlags,
    ) -> Option<DmaTxDescriptor>;

    /// Queue `tx`. On error the descriptor is dropped and its callback never runs.
    fn tx_submit(&self, tx: DmaTxDescriptor) -> Result<DmaCookie, DmaError>;

    /// Start executing everything queued so far.
    fn issue_pending(&self);
}

pub trait DmaProvider: Send + Sync {
    fn request_channel(&self, caps: DmaCaps) -> Option<Box<dyn DmaChannel>>;
}
