use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use offc_mem::{Folio, PhysMemory};
use parking_lot::Mutex;
use tracing::warn;

use crate::dmaengine::{
    DmaAddr, DmaCaps, DmaChannel, DmaCookie, DmaCtrlFlags, DmaDevice, DmaDirection, DmaError,
    DmaProvider, DmaStatus, DmaTxDescriptor,
};

/// Operation to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaFault {
    MapSrc,
    MapDst,
    Prep,
    Submit,
    /// The transfer is accepted but the hardware reports an error on completion.
    Transfer,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftDmaStats {
    pub channels_in_use: usize,
    /// Mappings not yet unmapped.
    pub mapped: usize,
    /// Descriptors executed, successful or not.
    pub completed: u64,
    pub errors: u64,
}

/// Software DMA controller over a [`PhysMemory`].
///
/// Bus addresses are physical addresses. Queued descriptors run on a hardware thread spawned by
/// [`DmaChannel::issue_pending`]; completion callbacks run on that thread.
#[derive(Clone)]
pub struct SoftDmaController {
    inner: Arc<Inner>,
}

struct Inner {
    mem: Arc<PhysMemory>,
    channels: Mutex<Vec<bool>>,
    faults: Mutex<Vec<PendingFault>>,
    mapped: AtomicUsize,
    completed: AtomicU64,
    errors: AtomicU64,
}

struct PendingFault {
    kind: DmaFault,
    skip: usize,
}

impl Inner {
    /// Count one `kind` operation against the injected faults; true if it must fail.
    fn should_fail(&self, kind: DmaFault) -> bool {
        let mut faults = self.faults.lock();
        let mut fire = false;
        faults.retain_mut(|f| {
            if f.kind != kind {
                return true;
            }
            if f.skip == 0 {
                fire = true;
                return false;
            }
            f.skip -= 1;
            true
        });
        fire
    }

    fn execute(&self, tx: DmaTxDescriptor) {
        let status = if self.should_fail(DmaFault::Transfer) {
            DmaStatus::Error
        } else {
            match self.mem.copy_mc(tx.dst(), tx.src(), tx.len()) {
                Ok(()) => DmaStatus::Complete,
                Err(err) => {
                    warn!("soft dma transfer failed: {err}");
                    DmaStatus::Error
                }
            }
        };
        if status == DmaStatus::Error {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.completed.fetch_add(1, Ordering::Relaxed);
        tx.complete(status);
    }
}

impl SoftDmaController {
    pub fn new(mem: Arc<PhysMemory>, nr_channels: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                mem,
                channels: Mutex::new(vec![false; nr_channels]),
                faults: Mutex::new(Vec::new()),
                mapped: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                errors: AtomicU64::new(0),
            }),
        }
    }

    pub fn nr_channels(&self) -> usize {
        self.inner.channels.lock().len()
    }

    /// Make the `nth` next `kind` operation (counting from zero) fail.
    pub fn inject_fault(&self, kind: DmaFault, nth: usize) {
        self.inner
            .faults
            .lock()
            .push(PendingFault { kind, skip: nth });
    }

    pub fn clear_faults(&self) {
        self.inner.faults.lock().clear();
    }

    pub fn stats(&self) -> SoftDmaStats {
        SoftDmaStats {
            channels_in_use: self.inner.channels.lock().iter().filter(|&&b| b).count(),
            mapped: self.inner.mapped.load(Ordering::SeqCst),
            completed: self.inner.completed.load(Ordering::Relaxed),
            errors: self.inner.errors.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for SoftDmaController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftDmaController")
            .field("nr_channels", &self.nr_channels())
            .field("stats", &self.stats())
            .finish()
    }
}

impl DmaProvider for SoftDmaController {
    fn request_channel(&self, caps: DmaCaps) -> Option<Box<dyn DmaChannel>> {
        if !DmaCaps::MEMCPY.contains(caps) {
            return None;
        }
        let id = {
            let mut channels = self.inner.channels.lock();
            let id = channels.iter().position(|in_use| !in_use)?;
            channels[id] = true;
            id
        };
        Some(Box::new(SoftDmaChannel {
            id,
            inner: Arc::clone(&self.inner),
            device: Arc::new(SoftDmaDevice {
                inner: Arc::clone(&self.inner),
            }),
            queue: Mutex::new(Vec::new()),
            next_cookie: Mutex::new(1),
            hw: Mutex::new(Vec::new()),
        }))
    }
}

struct SoftDmaDevice {
    inner: Arc<Inner>,
}

impl DmaDevice for SoftDmaDevice {
    fn map_page(&self, folio: &Folio, len: usize, dir: DmaDirection) -> Result<DmaAddr, DmaError> {
        let fault = match dir {
            DmaDirection::ToDevice => DmaFault::MapSrc,
            DmaDirection::FromDevice => DmaFault::MapDst,
        };
        let in_range = folio.pfns().end <= self.inner.mem.nr_frames() && len <= folio.size();
        if !in_range || self.inner.should_fail(fault) {
            return Err(DmaError::MapFailed {
                pfn: folio.pfn(),
                dir,
            });
        }
        self.inner.mapped.fetch_add(1, Ordering::SeqCst);
        Ok(folio.phys_addr())
    }

    fn unmap_page(&self, _addr: DmaAddr, _len: usize, _dir: DmaDirection) {
        let prev = self.inner.mapped.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "unbalanced dma unmap");
    }
}

struct SoftDmaChannel {
    id: usize,
    inner: Arc<Inner>,
    device: Arc<SoftDmaDevice>,
    queue: Mutex<Vec<DmaTxDescriptor>>,
    next_cookie: Mutex<DmaCookie>,
    hw: Mutex<Vec<JoinHandle<()>>>,
}

impl DmaChannel for SoftDmaChannel {
    fn device(&self) -> Arc<dyn DmaDevice> {
        self.device.clone()
    }

    fn prep_dma_memcpy(
        &self,
        dst: DmaAddr,
        src: DmaAddr,
        len: usize,
        flags: DmaCtrlFlags,
    ) -> Option<DmaTxDescriptor> {
        if len == 0 || self.inner.should_fail(DmaFault::Prep) {
            return None;
        }
        Some(DmaTxDescriptor::new(dst, src, len, flags))
    }

    fn tx_submit(&self, tx: DmaTxDescriptor) -> Result<DmaCookie, DmaError> {
        if self.inner.should_fail(DmaFault::Submit) {
            return Err(DmaError::SubmitFailed);
        }
        let cookie = {
            let mut next = self.next_cookie.lock();
            let cookie = *next;
            *next = next.checked_add(1).unwrap_or(1);
            cookie
        };
        self.queue.lock().push(tx);
        Ok(cookie)
    }

    fn issue_pending(&self) {
        let pending = std::mem::take(&mut *self.queue.lock());
        if pending.is_empty() {
            return;
        }

        let pending = Arc::new(Mutex::new(pending));
        let spawned = {
            let inner = Arc::clone(&self.inner);
            let pending = Arc::clone(&pending);
            std::thread::Builder::new()
                .name(format!("offc-dma-{}", self.id))
                .spawn(move || {
                    for tx in std::mem::take(&mut *pending.lock()) {
                        inner.execute(tx);
                    }
                })
        };
        match spawned {
            Ok(handle) => {
                let mut hw = self.hw.lock();
                hw.retain(|h| !h.is_finished());
                hw.push(handle);
            }
            Err(err) => {
                warn!(
                    channel = self.id,
                    "failed to start dma hardware thread, running inline: {err}"
                );
                for tx in std::mem::take(&mut *pending.lock()) {
                    self.inner.execute(tx);
                }
            }
        }
    }
}

impl Drop for SoftDmaChannel {
    fn drop(&mut self) {
        for handle in self.hw.get_mut().drain(..) {
            if handle.join().is_err() {
                warn!(channel = self.id, "dma hardware thread panicked");
            }
        }
        if let Some(slot) = self.inner.channels.lock().get_mut(self.id) {
            *slot = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use offc_mem::FolioFlags;

    fn controller(channels: usize) -> (Arc<PhysMemory>, SoftDmaController) {
        let mem = Arc::new(PhysMemory::new(16).unwrap());
        (mem.clone(), SoftDmaController::new(mem, channels))
    }

    #[test]
    fn channels_are_limited_and_released_on_drop() {
        let (_mem, dma) = controller(2);
        let a = dma.request_channel(DmaCaps::MEMCPY).unwrap();
        let b = dma.request_channel(DmaCaps::MEMCPY).unwrap();
        assert!(dma.request_channel(DmaCaps::MEMCPY).is_none());
        assert_eq!(dma.stats().channels_in_use, 2);

        drop(a);
        assert_eq!(dma.stats().channels_in_use, 1);
        let _c = dma.request_channel(DmaCaps::MEMCPY).unwrap();
        drop(b);
        assert_eq!(dma.stats().channels_in_use, 1);
    }

    #[test]
    fn issued_descriptor_copies_and_calls_back() {
        let (mem, dma) = controller(1);
        let src = mem.alloc_folio(1, FolioFlags::empty()).unwrap();
        let dst = mem.alloc_folio(1, FolioFlags::empty()).unwrap();
        mem.fill_folio(&src, 0x5a).unwrap();

        let chan = dma.request_channel(DmaCaps::MEMCPY).unwrap();
        let device = chan.device();
        let s = device.map_page(&src, src.size(), DmaDirection::ToDevice).unwrap();
        let d = device.map_page(&dst, dst.size(), DmaDirection::FromDevice).unwrap();
        assert_eq!(dma.stats().mapped, 2);

        let (tx_done, rx_done) = std::sync::mpsc::channel();
        let mut tx = chan
            .prep_dma_memcpy(d, s, src.size(), DmaCtrlFlags::PREP_INTERRUPT)
            .unwrap();
        tx.set_callback(move |status| tx_done.send(status).unwrap());
        let cookie = chan.tx_submit(tx).unwrap();
        assert!(cookie > 0);
        chan.issue_pending();

        assert_eq!(rx_done.recv().unwrap(), DmaStatus::Complete);
        assert_eq!(mem.folio_bytes(&dst).unwrap(), mem.folio_bytes(&src).unwrap());
        device.unmap_page(d, dst.size(), DmaDirection::FromDevice);
        device.unmap_page(s, src.size(), DmaDirection::ToDevice);
        drop(chan);

        let stats = dma.stats();
        assert_eq!(stats.mapped, 0);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.channels_in_use, 0);
    }

    #[test]
    fn injected_faults_fire_once_at_the_requested_operation() {
        let (mem, dma) = controller(1);
        let folio = mem.alloc_folio(1, FolioFlags::empty()).unwrap();
        let chan = dma.request_channel(DmaCaps::MEMCPY).unwrap();
        let device = chan.device();

        dma.inject_fault(DmaFault::MapSrc, 1);
        assert!(device.map_page(&folio, 4096, DmaDirection::ToDevice).is_ok());
        assert_eq!(
            device.map_page(&folio, 4096, DmaDirection::ToDevice),
            Err(DmaError::MapFailed {
                pfn: folio.pfn(),
                dir: DmaDirection::ToDevice
            })
        );
        assert!(device.map_page(&folio, 4096, DmaDirection::ToDevice).is_ok());

        dma.inject_fault(DmaFault::Prep, 0);
        assert!(chan
            .prep_dma_memcpy(0, 0, 4096, DmaCtrlFlags::empty())
            .is_none());

        dma.inject_fault(DmaFault::Submit, 0);
        let tx = chan
            .prep_dma_memcpy(0, 0, 4096, DmaCtrlFlags::empty())
            .unwrap();
        assert_eq!(chan.tx_submit(tx), Err(DmaError::SubmitFailed));
    }

    #[test]
    fn transfer_fault_completes_with_error() {
        let (mem, dma) = controller(1);
        let src = mem.alloc_folio(1, FolioFlags::empty()).unwrap();
        let dst = mem.alloc_folio(1, FolioFlags::empty()).unwrap();
        mem.fill_folio(&src, 1).unwrap();
        dma.inject_fault(DmaFault::Transfer, 0);

        let chan = dma.request_channel(DmaCaps::MEMCPY).unwrap();
        let (tx_done, rx_done) = std::sync::mpsc::channel();
        let mut tx = chan
            .prep_dma_memcpy(dst.phys_addr(), src.phys_addr(), 4096, DmaCtrlFlags::empty())
            .unwrap();
        tx.set_callback(move |status| tx_done.send(status).unwrap());
        chan.tx_submit(tx).unwrap();
        chan.issue_pending();

        assert_eq!(rx_done.recv().unwrap(), DmaStatus::Error);
        assert_eq!(mem.folio_bytes(&dst).unwrap(), vec![0u8; 4096]);
        assert_eq!(dma.stats().errors, 1);
    }
}
