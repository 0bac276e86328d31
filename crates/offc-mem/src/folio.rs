use bitflags::bitflags;

use crate::phys::PhysAddr;
use crate::{PAGE_SHIFT, PAGE_SIZE};

/// Page frame number.
pub type Pfn = u64;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FolioFlags: u32 {
        /// More than one page. Set automatically by the allocator.
        const LARGE = 1 << 0;
        /// Backed by the huge page pool.
        const HUGETLB = 1 << 1;
        /// Carries private metadata (buffer heads, swap entries, ...) that a plain copy would miss.
        const PRIVATE = 1 << 2;
    }
}

/// Handle to `nr_pages` physically contiguous frames starting at `pfn`.
///
/// Folios are created by [`crate::PhysMemory::alloc_folio`]; the handle itself owns nothing and is
/// freely copyable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Folio {
    pfn: Pfn,
    nr_pages: usize,
    flags: FolioFlags,
}

impl Folio {
    pub(crate) fn new(pfn: Pfn, nr_pages: usize, mut flags: FolioFlags) -> Self {
        if nr_pages > 1 {
            flags |= FolioFlags::LARGE;
        }
        Self {
            pfn,
            nr_pages,
            flags,
        }
    }

    pub fn pfn(&self) -> Pfn {
        self.pfn
    }

    pub fn nr_pages(&self) -> usize {
        self.nr_pages
    }

    pub fn flags(&self) -> FolioFlags {
        self.flags
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.nr_pages * PAGE_SIZE
    }

    pub fn phys_addr(&self) -> PhysAddr {
        self.pfn << PAGE_SHIFT
    }

    pub fn is_large(&self) -> bool {
        self.flags.contains(FolioFlags::LARGE)
    }

    pub fn is_hugetlb(&self) -> bool {
        self.flags.contains(FolioFlags::HUGETLB)
    }

    pub fn has_private(&self) -> bool {
        self.flags.contains(FolioFlags::PRIVATE)
    }

    /// Frames covered by this folio.
    pub fn pfns(&self) -> core::ops::Range<Pfn> {
        self.pfn..self.pfn + self.nr_pages as u64
    }
}
