//! Splitting a batch into per-worker work.

use std::collections::TryReserveError;

use offc_mem::{Batch, PhysAddr, PhysMemory};
use offc_registry::MigrateError;

/// How a batch is spread across `T` workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyPlan {
    /// Fewer pairs than workers: every pair is cut into `workers` equal chunks and worker `i`
    /// copies chunk `i` of every pair.
    SplitPages { workers: usize },
    /// Worker `i` copies `shares[i]` whole pairs, taken as a contiguous block of the batch.
    SplitBatch { shares: Vec<usize> },
}

impl CopyPlan {
    pub fn workers(&self) -> usize {
        match self {
            CopyPlan::SplitPages { workers } => *workers,
            CopyPlan::SplitBatch { shares } => shares.len(),
        }
    }
}

/// Choose the plan for `nr_items` pairs and `workers` workers (at least one).
pub fn plan(nr_items: usize, workers: usize) -> CopyPlan {
    let workers = workers.max(1);
    if nr_items < workers {
        return CopyPlan::SplitPages { workers };
    }
    let base = nr_items / workers;
    let extra = nr_items % workers;
    CopyPlan::SplitBatch {
        shares: (0..workers).map(|i| base + usize::from(i < extra)).collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyItem {
    pub dst: PhysAddr,
    pub src: PhysAddr,
    pub len: usize,
}

/// One worker's share of a dispatch.
#[derive(Debug)]
pub struct WorkItem {
    items: Vec<CopyItem>,
    failed: bool,
}

impl WorkItem {
    pub fn items(&self) -> &[CopyItem] {
        &self.items
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Copy every item, recording whether any of them failed. A failing item does not stop the
    /// rest.
    pub fn run(&mut self, mem: &PhysMemory) {
        self.failed = false;
        for item in &self.items {
            if let Err(err) = mem.copy_mc(item.dst, item.src, item.len) {
                tracing::debug!(
                    dst = item.dst,
                    src = item.src,
                    len = item.len,
                    "worker copy failed: {err}"
                );
                self.failed = true;
            }
        }
    }
}

fn reserve<T>(v: &mut Vec<T>, additional: usize) -> Result<(), MigrateError> {
    v.try_reserve_exact(additional)
        .map_err(|_: TryReserveError| MigrateError::OutOfMemory {
            what: "copy work items",
        })
}

/// Build the work for every worker of `plan`.
///
/// Every allocation and the chunk-size precondition are checked before anything is returned, so
/// an error here means no transfer has started.
pub fn build_work(batch: &Batch, plan: &CopyPlan) -> Result<Vec<WorkItem>, MigrateError> {
    let mut work = Vec::new();
    reserve(&mut work, plan.workers())?;

    match plan {
        CopyPlan::SplitPages { workers } => {
            let workers = *workers;
            if let Some(pair) = batch.iter().find(|p| p.len() % workers != 0) {
                return Err(MigrateError::Unsupported(format!(
                    "{} byte unit cannot be split across {workers} workers",
                    pair.len()
                )));
            }
            for _ in 0..workers {
                let mut items = Vec::new();
                reserve(&mut items, batch.len())?;
                work.push(WorkItem {
                    items,
                    failed: false,
                });
            }
            for pair in batch {
                let chunk = pair.len() / workers;
                for (i, w) in work.iter_mut().enumerate() {
                    let off = (chunk * i) as u64;
                    w.items.push(CopyItem {
                        dst: pair.dst().phys_addr() + off,
                        src: pair.src().phys_addr() + off,
                        len: chunk,
                    });
                }
            }
        }
        CopyPlan::SplitBatch { shares } => {
            let mut pairs = batch.iter();
            for &share in shares {
                let mut items = Vec::new();
                reserve(&mut items, share)?;
                items.extend(pairs.by_ref().take(share).map(|pair| CopyItem {
                    dst: pair.dst().phys_addr(),
                    src: pair.src().phys_addr(),
                    len: pair.len(),
                }));
                work.push(WorkItem {
                    items,
                    failed: false,
                });
            }
        }
    }
    Ok(work)
}

#[cfg(test)]
mod tests {
    use super::*;

    use offc_mem::{FolioFlags, PAGE_SIZE};

    fn batch(mem: &PhysMemory, n: usize, pages: usize) -> Batch {
        let src: Vec<_> = (0..n)
            .map(|_| mem.alloc_folio(pages, FolioFlags::empty()).unwrap())
            .collect();
        let dst: Vec<_> = (0..n)
            .map(|_| mem.alloc_folio(pages, FolioFlags::empty()).unwrap())
            .collect();
        Batch::from_lists(dst, src).unwrap()
    }

    #[test]
    fn plan_picks_split_pages_below_worker_count() {
        assert_eq!(plan(3, 4), CopyPlan::SplitPages { workers: 4 });
        assert_eq!(plan(0, 4), CopyPlan::SplitPages { workers: 4 });
        assert_eq!(
            plan(4, 4),
            CopyPlan::SplitBatch {
                shares: vec![1, 1, 1, 1]
            }
        );
        assert_eq!(
            plan(10, 4),
            CopyPlan::SplitBatch {
                shares: vec![3, 3, 2, 2]
            }
        );
        assert_eq!(plan(5, 1), CopyPlan::SplitBatch { shares: vec![5] });
    }

    #[test]
    fn split_pages_gives_each_worker_one_chunk_of_every_pair() {
        let mem = PhysMemory::new(8).unwrap();
        let batch = batch(&mem, 3, 1);
        let work = build_work(&batch, &plan(3, 4)).unwrap();

        assert_eq!(work.len(), 4);
        for (i, w) in work.iter().enumerate() {
            assert_eq!(w.items().len(), 3);
            for (pair, item) in batch.iter().zip(w.items()) {
                assert_eq!(item.len, PAGE_SIZE / 4);
                assert_eq!(item.src, pair.src().phys_addr() + (i * PAGE_SIZE / 4) as u64);
                assert_eq!(item.dst, pair.dst().phys_addr() + (i * PAGE_SIZE / 4) as u64);
            }
        }
    }

    #[test]
    fn split_batch_hands_out_contiguous_blocks() {
        let mem = PhysMemory::new(32).unwrap();
        let batch = batch(&mem, 10, 1);
        let work = build_work(&batch, &plan(10, 4)).unwrap();

        let sizes: Vec<_> = work.iter().map(|w| w.items().len()).collect();
        assert_eq!(sizes, vec![3, 3, 2, 2]);

        let flattened: Vec<_> = work.iter().flat_map(|w| w.items().iter()).collect();
        for (pair, item) in batch.iter().zip(flattened) {
            assert_eq!(item.src, pair.src().phys_addr());
            assert_eq!(item.len, PAGE_SIZE);
        }
    }

    #[test]
    fn indivisible_chunk_is_unsupported() {
        let mem = PhysMemory::new(8).unwrap();
        let batch = batch(&mem, 1, 1);
        // 4096 bytes over 3 workers.
        assert!(matches!(
            build_work(&batch, &plan(1, 3)),
            Err(MigrateError::Unsupported(_))
        ));
    }

    #[test]
    fn reservation_failure_is_out_of_memory() {
        let mut v: Vec<CopyItem> = Vec::new();
        assert_eq!(
            reserve(&mut v, usize::MAX),
            Err(MigrateError::OutOfMemory {
                what: "copy work items"
            })
        );
    }
}
