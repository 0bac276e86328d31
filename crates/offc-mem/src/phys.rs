use core::ops::Range;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

use crate::folio::{Folio, FolioFlags, Pfn};
use crate::{PAGE_SHIFT, PAGE_SIZE};

/// Host physical address.
pub type PhysAddr = u64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("physical memory access out of range: addr=0x{addr:x} len={len} size=0x{size:x}")]
    OutOfRange { addr: PhysAddr, len: usize, size: u64 },

    #[error("physical memory of {nr_frames} frames cannot be represented")]
    InvalidSize { nr_frames: u64 },

    #[error("invalid folio size of {nr_pages} pages")]
    InvalidFolioSize { nr_pages: usize },

    #[error("no run of {nr_pages} free frames")]
    NoFreeFrames { nr_pages: usize },

    #[error("frames starting at pfn {pfn} are not allocated")]
    NotAllocated { pfn: Pfn },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CopyError {
    /// The source frame has an uncorrectable memory error. `copied` bytes made it to the
    /// destination before the bad frame was reached.
    #[error("hardware memory error in source frame {pfn} after {copied} bytes")]
    Poisoned { pfn: Pfn, copied: usize },

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Host RAM as a fixed array of page frames.
///
/// Bytes are stored as [`AtomicU8`] so that CPU workers and DMA hardware threads can copy into
/// disjoint ranges of the same frame concurrently without data races. Callers that need
/// ordering between transfers synchronize externally (thread joins, completion waits).
pub struct PhysMemory {
    bytes: Box<[AtomicU8]>,
    poisoned: Box<[AtomicBool]>,
    allocated: Mutex<Vec<bool>>,
}

impl PhysMemory {
    pub fn new(nr_frames: u64) -> Result<Self, MemoryError> {
        let frames = usize::try_from(nr_frames)
            .ok()
            .filter(|&n| n > 0)
            .ok_or(MemoryError::InvalidSize { nr_frames })?;
        let len = frames
            .checked_mul(PAGE_SIZE)
            .ok_or(MemoryError::InvalidSize { nr_frames })?;

        Ok(Self {
            bytes: (0..len).map(|_| AtomicU8::new(0)).collect(),
            poisoned: (0..frames).map(|_| AtomicBool::new(false)).collect(),
            allocated: Mutex::new(vec![false; frames]),
        })
    }

    pub fn nr_frames(&self) -> u64 {
        self.poisoned.len() as u64
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn free_frames(&self) -> usize {
        self.allocated.lock().iter().filter(|used| !**used).count()
    }

    fn range(&self, addr: PhysAddr, len: usize) -> Result<Range<usize>, MemoryError> {
        let size = self.size();
        let err = MemoryError::OutOfRange { addr, len, size };
        let end = addr.checked_add(len as u64).ok_or(err.clone())?;
        if end > size {
            return Err(err);
        }
        // `end <= size` and `size` came from a `usize`.
        Ok(addr as usize..end as usize)
    }

    fn frame_index(&self, pfn: Pfn) -> Result<usize, MemoryError> {
        if pfn >= self.nr_frames() {
            return Err(MemoryError::OutOfRange {
                addr: pfn << PAGE_SHIFT,
                len: PAGE_SIZE,
                size: self.size(),
            });
        }
        Ok(pfn as usize)
    }

    pub fn read(&self, addr: PhysAddr, dst: &mut [u8]) -> Result<(), MemoryError> {
        let range = self.range(addr, dst.len())?;
        for (slot, byte) in dst.iter_mut().zip(&self.bytes[range]) {
            *slot = byte.load(Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn write(&self, addr: PhysAddr, src: &[u8]) -> Result<(), MemoryError> {
        let range = self.range(addr, src.len())?;
        for (byte, value) in self.bytes[range].iter().zip(src) {
            byte.store(*value, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Allocate `nr_pages` contiguous frames (first fit).
    pub fn alloc_folio(&self, nr_pages: usize, flags: FolioFlags) -> Result<Folio, MemoryError> {
        if nr_pages == 0 || nr_pages > self.poisoned.len() {
            return Err(MemoryError::InvalidFolioSize { nr_pages });
        }

        let mut allocated = self.allocated.lock();
        let mut run = 0;
        for idx in 0..allocated.len() {
            if allocated[idx] {
                run = 0;
                continue;
            }
            run += 1;
            if run == nr_pages {
                let start = idx + 1 - nr_pages;
                allocated[start..=idx].fill(true);
                return Ok(Folio::new(start as Pfn, nr_pages, flags));
            }
        }
        Err(MemoryError::NoFreeFrames { nr_pages })
    }

    pub fn free_folio(&self, folio: Folio) -> Result<(), MemoryError> {
        let start = self.frame_index(folio.pfn())?;
        let end = start + folio.nr_pages();
        let mut allocated = self.allocated.lock();
        let frames = allocated
            .get_mut(start..end)
            .ok_or(MemoryError::NotAllocated { pfn: folio.pfn() })?;
        if !frames.iter().all(|used| *used) {
            return Err(MemoryError::NotAllocated { pfn: folio.pfn() });
        }
        frames.fill(false);
        Ok(())
    }

    pub fn fill_folio(&self, folio: &Folio, value: u8) -> Result<(), MemoryError> {
        let range = self.range(folio.phys_addr(), folio.size())?;
        for byte in &self.bytes[range] {
            byte.store(value, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn folio_bytes(&self, folio: &Folio) -> Result<Vec<u8>, MemoryError> {
        let mut buf = vec![0u8; folio.size()];
        self.read(folio.phys_addr(), &mut buf)?;
        Ok(buf)
    }

    /// Mark a frame as having an uncorrectable memory error.
    pub fn poison_pfn(&self, pfn: Pfn) -> Result<(), MemoryError> {
        let idx = self.frame_index(pfn)?;
        self.poisoned[idx].store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn unpoison_pfn(&self, pfn: Pfn) -> Result<(), MemoryError> {
        let idx = self.frame_index(pfn)?;
        self.poisoned[idx].store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_poisoned(&self, pfn: Pfn) -> bool {
        self.frame_index(pfn)
            .map(|idx| self.poisoned[idx].load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Machine-check-safe copy of `len` bytes from `src` to `dst`.
    ///
    /// Both ranges are validated before anything is written. The copy stops at the first
    /// poisoned source frame and reports how far it got. Ranges must not overlap.
    pub fn copy_mc(&self, dst: PhysAddr, src: PhysAddr, len: usize) -> Result<(), CopyError> {
        let dst_range = self.range(dst, len)?;
        let src_range = self.range(src, len)?;

        let mut copied = 0;
        while copied < len {
            let cur = src_range.start + copied;
            let pfn = (cur >> PAGE_SHIFT) as Pfn;
            if self.poisoned[pfn as usize].load(Ordering::SeqCst) {
                return Err(CopyError::Poisoned { pfn, copied });
            }

            let in_frame = PAGE_SIZE - (cur & (PAGE_SIZE - 1));
            let take = in_frame.min(len - copied);
            let from = &self.bytes[cur..cur + take];
            let to_start = dst_range.start + copied;
            let to = &self.bytes[to_start..to_start + take];
            for (d, s) in to.iter().zip(from) {
                d.store(s.load(Ordering::Relaxed), Ordering::Relaxed);
            }
            copied += take;
        }
        Ok(())
    }
}

impl core::fmt::Debug for PhysMemory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PhysMemory")
            .field("nr_frames", &self.nr_frames())
            .field("free_frames", &self.free_frames())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_frames_is_rejected() {
        assert!(matches!(
            PhysMemory::new(0),
            Err(MemoryError::InvalidSize { nr_frames: 0 })
        ));
    }

    #[test]
    fn alloc_is_first_fit_and_contiguous() {
        let mem = PhysMemory::new(8).unwrap();

        let a = mem.alloc_folio(1, FolioFlags::empty()).unwrap();
        let b = mem.alloc_folio(4, FolioFlags::empty()).unwrap();
        assert_eq!(a.pfn(), 0);
        assert_eq!(b.pfn(), 1);
        assert!(b.is_large());
        assert_eq!(mem.free_frames(), 3);

        mem.free_folio(a).unwrap();
        let c = mem.alloc_folio(1, FolioFlags::empty()).unwrap();
        assert_eq!(c.pfn(), 0, "freed frame is reused");

        assert!(matches!(
            mem.alloc_folio(4, FolioFlags::empty()),
            Err(MemoryError::NoFreeFrames { nr_pages: 4 })
        ));
        assert!(matches!(
            mem.alloc_folio(0, FolioFlags::empty()),
            Err(MemoryError::InvalidFolioSize { nr_pages: 0 })
        ));
    }

    #[test]
    fn double_free_is_reported() {
        let mem = PhysMemory::new(2).unwrap();
        let folio = mem.alloc_folio(1, FolioFlags::empty()).unwrap();
        mem.free_folio(folio).unwrap();
        assert_eq!(
            mem.free_folio(folio),
            Err(MemoryError::NotAllocated { pfn: 0 })
        );
    }

    #[test]
    fn out_of_range_returns_error_without_panicking() {
        let mem = PhysMemory::new(1).unwrap();
        assert!(matches!(
            mem.read(PAGE_SIZE as u64 - 2, &mut [0u8; 4]),
            Err(MemoryError::OutOfRange { .. })
        ));
        assert!(matches!(
            mem.write(u64::MAX - 1, &[1, 2]),
            Err(MemoryError::OutOfRange { .. })
        ));
        assert!(matches!(
            mem.copy_mc(0, u64::MAX, 1),
            Err(CopyError::Memory(MemoryError::OutOfRange { .. }))
        ));
    }

    #[test]
    fn copy_stops_at_poisoned_source_frame() {
        let mem = PhysMemory::new(4).unwrap();
        let src = mem.alloc_folio(2, FolioFlags::empty()).unwrap();
        let dst = mem.alloc_folio(2, FolioFlags::empty()).unwrap();
        mem.fill_folio(&src, 0x5a).unwrap();
        mem.poison_pfn(src.pfn() + 1).unwrap();

        let err = mem
            .copy_mc(dst.phys_addr(), src.phys_addr(), src.size())
            .unwrap_err();
        assert_eq!(
            err,
            CopyError::Poisoned {
                pfn: src.pfn() + 1,
                copied: PAGE_SIZE,
            }
        );

        let bytes = mem.folio_bytes(&dst).unwrap();
        assert!(bytes[..PAGE_SIZE].iter().all(|b| *b == 0x5a));
        assert!(bytes[PAGE_SIZE..].iter().all(|b| *b == 0));

        mem.unpoison_pfn(src.pfn() + 1).unwrap();
        mem.copy_mc(dst.phys_addr(), src.phys_addr(), src.size())
            .unwrap();
        assert_eq!(mem.folio_bytes(&dst).unwrap(), mem.folio_bytes(&src).unwrap());
    }

    #[test]
    fn unaligned_copy_crosses_frame_boundary() {
        let mem = PhysMemory::new(4).unwrap();
        let pattern: Vec<u8> = (0..100u8).collect();
        mem.write(PAGE_SIZE as u64 - 50, &pattern).unwrap();

        let dst = 2 * PAGE_SIZE as u64 + 7;
        mem.copy_mc(dst, PAGE_SIZE as u64 - 50, pattern.len())
            .unwrap();

        let mut out = vec![0u8; pattern.len()];
        mem.read(dst, &mut out).unwrap();
        assert_eq!(out, pattern);
    }
}
