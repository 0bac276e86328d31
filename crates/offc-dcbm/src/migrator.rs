use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use offc_mem::{folio_copy, Batch, Folio, PhysMemory, TransferPair};
use offc_registry::{MigrateError, Migrator};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, error};

use crate::dmaengine::{
    DmaCaps, DmaChannel, DmaCtrlFlags, DmaDirection, DmaError, DmaProvider, DmaStatus,
};
use crate::{DEFAULT_DMA_CHANNELS, MAX_DMA_CHANNELS};

#[derive(Debug, Error)]
pub enum DcbmError {
    #[error("invalid channel count {value}, must be between 1 and {max}")]
    InvalidChannels { value: i64, max: usize },

    #[error(transparent)]
    Name(#[from] offc_registry::NameError),
}

/// What one call to [`DcbmMigrator::copy_parallel`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DmaCopyReport {
    pub requested_channels: usize,
    pub actual_channels: usize,
    /// Transfers accepted by a channel.
    pub submitted: usize,
    /// Pairs copied on the CPU after a map, prep, submit or hardware failure.
    pub fallbacks: usize,
    /// CPU fallback copies that failed as well.
    pub fallback_failures: usize,
    /// No channel could be used; the whole batch went through the CPU copy.
    pub whole_batch_fallback: bool,
}

#[derive(Debug, Default)]
pub struct DcbmStats {
    batches: AtomicU64,
    submitted: AtomicU64,
    fallbacks: AtomicU64,
    whole_batch_fallbacks: AtomicU64,
    fallback_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DcbmSnapshot {
    pub batches: u64,
    pub submitted: u64,
    pub fallbacks: u64,
    pub whole_batch_fallbacks: u64,
    pub fallback_failures: u64,
}

impl DcbmStats {
    fn record(&self, report: &DmaCopyReport) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.submitted
            .fetch_add(report.submitted as u64, Ordering::Relaxed);
        self.fallbacks
            .fetch_add(report.fallbacks as u64, Ordering::Relaxed);
        self.fallback_failures
            .fetch_add(report.fallback_failures as u64, Ordering::Relaxed);
        if report.whole_batch_fallback {
            self.whole_batch_fallbacks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DcbmSnapshot {
        DcbmSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            whole_batch_fallbacks: self.whole_batch_fallbacks.load(Ordering::Relaxed),
            fallback_failures: self.fallback_failures.load(Ordering::Relaxed),
        }
    }
}

/// In-flight bookkeeping for one acquired channel, shared with the completion callbacks.
#[derive(Default)]
struct ChannelState {
    inner: Mutex<ChannelCounters>,
    done: Condvar,
}

#[derive(Default)]
struct ChannelCounters {
    active: usize,
    /// Batch indices whose transfer completed with a hardware error.
    failed: Vec<usize>,
}

impl ChannelState {
    fn begin(&self) {
        self.inner.lock().active += 1;
    }

    /// Undo `begin` for a descriptor the channel refused.
    fn cancel(&self) {
        let mut counters = self.inner.lock();
        counters.active -= 1;
        if counters.active == 0 {
            self.done.notify_all();
        }
    }

    fn complete(&self, idx: usize, status: DmaStatus) {
        let mut counters = self.inner.lock();
        if status == DmaStatus::Error {
            counters.failed.push(idx);
        }
        counters.active -= 1;
        if counters.active == 0 {
            self.done.notify_all();
        }
    }

    /// Block until nothing is in flight and return the indices that failed in hardware.
    fn wait(&self) -> Vec<usize> {
        let mut counters = self.inner.lock();
        while counters.active != 0 {
            self.done.wait(&mut counters);
        }
        std::mem::take(&mut counters.failed)
    }
}

struct ChannelWork {
    chan: Box<dyn DmaChannel>,
    state: Arc<ChannelState>,
}

impl ChannelWork {
    fn new(chan: Box<dyn DmaChannel>) -> Self {
        Self {
            chan,
            state: Arc::new(ChannelState::default()),
        }
    }

    /// Map both folios, prepare a memcpy and queue it. On error everything done so far is undone.
    fn submit(&self, idx: usize, pair: &TransferPair) -> Result<(), DmaError> {
        let device = self.chan.device();
        let len = pair.len();

        let src = device.map_page(pair.src(), len, DmaDirection::ToDevice)?;
        let dst = match device.map_page(pair.dst(), len, DmaDirection::FromDevice) {
            Ok(dst) => dst,
            Err(err) => {
                device.unmap_page(src, len, DmaDirection::ToDevice);
                return Err(err);
            }
        };

        let flags = DmaCtrlFlags::CTRL_ACK | DmaCtrlFlags::PREP_INTERRUPT;
        let Some(mut tx) = self.chan.prep_dma_memcpy(dst, src, len, flags) else {
            device.unmap_page(dst, len, DmaDirection::FromDevice);
            device.unmap_page(src, len, DmaDirection::ToDevice);
            return Err(DmaError::PrepFailed);
        };

        {
            let state = Arc::clone(&self.state);
            let device = Arc::clone(&device);
            tx.set_callback(move |status| {
                device.unmap_page(dst, len, DmaDirection::FromDevice);
                device.unmap_page(src, len, DmaDirection::ToDevice);
                state.complete(idx, status);
            });
        }

        self.state.begin();
        if let Err(err) = self.chan.tx_submit(tx) {
            self.state.cancel();
            device.unmap_page(dst, len, DmaDirection::FromDevice);
            device.unmap_page(src, len, DmaDirection::ToDevice);
            return Err(err);
        }
        Ok(())
    }
}

/// `DCBM`: batch copy offloaded to DMA memcpy channels.
pub struct DcbmMigrator {
    provider: Arc<dyn DmaProvider>,
    nr_dma_chan: Mutex<usize>,
    stats: DcbmStats,
}

impl DcbmMigrator {
    pub fn new(provider: Arc<dyn DmaProvider>) -> Self {
        Self {
            provider,
            nr_dma_chan: Mutex::new(DEFAULT_DMA_CHANNELS),
            stats: DcbmStats::default(),
        }
    }

    pub fn nr_dma_chan(&self) -> usize {
        *self.nr_dma_chan.lock()
    }

    pub fn set_nr_dma_chan(&self, value: i64) -> Result<(), DcbmError> {
        let channels = usize::try_from(value)
            .ok()
            .filter(|n| (1..=MAX_DMA_CHANNELS).contains(n))
            .ok_or(DcbmError::InvalidChannels {
                value,
                max: MAX_DMA_CHANNELS,
            })?;
        *self.nr_dma_chan.lock() = channels;
        debug!("DMA channels set to {channels}");
        Ok(())
    }

    pub fn stats(&self) -> &DcbmStats {
        &self.stats
    }

    /// Copy `batch` over up to `channel_count` DMA channels.
    ///
    /// Pairs are handed to channels round-robin. A pair that cannot be mapped, prepared or
    /// submitted, or that the hardware fails, is copied on the CPU instead. If no channel can be
    /// used the whole batch is copied on the CPU. Returns only once every pair has been handled.
    pub fn copy_parallel(
        &self,
        mem: &PhysMemory,
        batch: &Batch,
        channel_count: usize,
    ) -> DmaCopyReport {
        let mut report = DmaCopyReport {
            requested_channels: channel_count,
            ..DmaCopyReport::default()
        };
        if batch.is_empty() {
            return report;
        }

        let wanted = channel_count.min(batch.len());
        let mut works: Vec<ChannelWork> = Vec::new();
        if works.try_reserve_exact(wanted).is_err() {
            error!("failed to allocate memory for channels");
            self.copy_whole_batch(mem, batch, &mut report);
            return report;
        }
        for i in 0..wanted {
            match self.provider.request_channel(DmaCaps::MEMCPY) {
                Some(chan) => works.push(ChannelWork::new(chan)),
                None => {
                    error!("could only allocate {i} DMA channels");
                    break;
                }
            }
        }
        report.actual_channels = works.len();

        if works.is_empty() {
            error!("couldn't allocate any DMA channels, falling back to CPU copy");
            self.copy_whole_batch(mem, batch, &mut report);
            return report;
        }

        for (idx, pair) in batch.iter().enumerate() {
            let work = &works[idx % works.len()];
            match work.submit(idx, pair) {
                Ok(()) => report.submitted += 1,
                Err(err) => {
                    error!(pfn = pair.src().pfn(), "dma submission failed: {err}");
                    fallback_copy(mem, pair, &mut report);
                }
            }
        }

        for work in &works {
            work.chan.issue_pending();
        }

        for work in &works {
            for idx in work.state.wait() {
                error!(pfn = batch.pairs()[idx].src().pfn(), "dma transfer reported an error");
                fallback_copy(mem, &batch.pairs()[idx], &mut report);
            }
        }

        if report.fallbacks > 0 {
            error!("processed {} fallback with CPU", report.fallbacks);
        }

        drop(works);
        self.stats.record(&report);
        report
    }

    fn copy_whole_batch(&self, mem: &PhysMemory, batch: &Batch, report: &mut DmaCopyReport) {
        report.whole_batch_fallback = true;
        for pair in batch {
            if let Err(err) = folio_copy(mem, pair) {
                error!(pfn = pair.src().pfn(), "CPU copy failed: {err}");
                report.fallback_failures += 1;
            }
        }
        self.stats.record(report);
    }
}

fn fallback_copy(mem: &PhysMemory, pair: &TransferPair, report: &mut DmaCopyReport) {
    report.fallbacks += 1;
    if let Err(err) = folio_copy(mem, pair) {
        error!(pfn = pair.src().pfn(), "CPU fallback copy failed: {err}");
        report.fallback_failures += 1;
    }
}

impl Migrator for DcbmMigrator {
    fn migrate(&self, mem: &PhysMemory, batch: &Batch) -> Result<(), MigrateError> {
        self.copy_parallel(mem, batch, self.nr_dma_chan());
        Ok(())
    }

    fn can_migrate(&self, dst: &Folio, src: &Folio) -> bool {
        if src.is_hugetlb()
            || dst.is_hugetlb()
            || src.has_private()
            || dst.has_private()
            || src.nr_pages() != dst.nr_pages()
        {
            error!(pfn = src.pfn(), "can NOT DMA migrate this folio");
            return false;
        }
        true
    }
}

impl std::fmt::Debug for DcbmMigrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DcbmMigrator")
            .field("nr_dma_chan", &self.nr_dma_chan())
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use offc_mem::FolioFlags;

    struct NoChannels;

    impl DmaProvider for NoChannels {
        fn request_channel(&self, _caps: DmaCaps) -> Option<Box<dyn DmaChannel>> {
            None
        }
    }

    #[test]
    fn channel_count_is_validated() {
        let dcbm = DcbmMigrator::new(Arc::new(NoChannels));
        assert_eq!(dcbm.nr_dma_chan(), 1);
        dcbm.set_nr_dma_chan(16).unwrap();
        assert_eq!(dcbm.nr_dma_chan(), 16);
        assert!(matches!(
            dcbm.set_nr_dma_chan(17),
            Err(DcbmError::InvalidChannels { value: 17, max: 16 })
        ));
        assert!(dcbm.set_nr_dma_chan(0).is_err());
        assert!(dcbm.set_nr_dma_chan(-3).is_err());
        assert_eq!(dcbm.nr_dma_chan(), 16);
    }

    #[test]
    fn predicate_rejects_hugetlb_private_and_mismatched_folios() {
        let dcbm = DcbmMigrator::new(Arc::new(NoChannels));
        let mem = PhysMemory::new(16).unwrap();
        let plain = mem.alloc_folio(1, FolioFlags::empty()).unwrap();
        let plain2 = mem.alloc_folio(1, FolioFlags::empty()).unwrap();
        let huge = mem.alloc_folio(2, FolioFlags::HUGETLB).unwrap();
        let private = mem.alloc_folio(1, FolioFlags::PRIVATE).unwrap();
        let large = mem.alloc_folio(2, FolioFlags::empty()).unwrap();

        assert!(dcbm.can_migrate(&plain2, &plain));
        assert!(!dcbm.can_migrate(&plain, &private));
        assert!(!dcbm.can_migrate(&private, &plain));
        assert!(!dcbm.can_migrate(&large, &huge));
        assert!(!dcbm.can_migrate(&large, &plain));
    }

    #[test]
    fn channel_state_wait_returns_immediately_without_submissions() {
        let state = ChannelState::default();
        assert!(state.wait().is_empty());

        state.begin();
        state.begin();
        state.complete(3, DmaStatus::Error);
        state.cancel();
        assert_eq!(state.wait(), vec![3]);
    }
}
