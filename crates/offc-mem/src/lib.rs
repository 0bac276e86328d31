//! Host page model shared by every migration backend.
//!
//! [`PhysMemory`] is a fixed set of page frames that many threads (CPU copy workers and
//! simulated DMA hardware) may access at once. A [`Folio`] names a run of contiguous frames, a
//! [`TransferPair`] is one source/destination unit to move, and a [`Batch`] is the ordered list a
//! host hands to a backend in a single call.
//!
//! The routines in [`copy`] are the default (non-accelerated) transfer path every backend falls
//! back to.

#![forbid(unsafe_code)]

mod batch;
pub mod copy;
mod folio;
mod phys;

pub use batch::{Batch, BatchError, TransferPair};
pub use copy::{folio_copy, folios_mc_copy};
pub use folio::{Folio, FolioFlags, Pfn};
pub use phys::{CopyError, MemoryError, PhysAddr, PhysMemory};

pub const PAGE_SHIFT: u32 = 12;

/// Host page granularity. Every transfer unit is a whole number of pages.
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
