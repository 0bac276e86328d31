use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use offc_mem::Folio;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::migrator::{MigratorDescriptor, MigratorName};
use crate::srcu::Srcu;
use crate::stats::DispatchStats;

/// Holds at most one active backend.
///
/// Readers ([`Registry::read`], [`Registry::active_name`], [`Registry::dispatch_enabled`]) never
/// take a lock and never wait. Writers ([`Registry::install`], [`Registry::uninstall`]) are
/// serialized by a mutex. A removed descriptor is freed on a reclaim thread once a grace period
/// has elapsed, so a reader that picked it up before the removal can finish its transfer.
pub struct Registry {
    active: AtomicPtr<MigratorDescriptor>,
    dispatch: AtomicBool,
    writer: Mutex<()>,
    srcu: Arc<Srcu>,
    reclaim: Mutex<Vec<JoinHandle<()>>>,
    stats: DispatchStats,
}

/// A descriptor unpublished from the slot and waiting for its grace period.
struct Retired(*mut MigratorDescriptor);

// Safety: the pointer came from `Box::into_raw` and is owned exclusively by this value once it
// has been swapped out of the slot; `MigratorDescriptor` itself is `Send + Sync`.
unsafe impl Send for Retired {}

impl Retired {
    /// # Safety
    /// No reader may still hold a reference to the descriptor.
    unsafe fn free(self) {
        drop(Box::from_raw(self.0));
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            active: AtomicPtr::new(ptr::null_mut()),
            dispatch: AtomicBool::new(false),
            writer: Mutex::new(()),
            srcu: Arc::new(Srcu::new()),
            reclaim: Mutex::new(Vec::new()),
            stats: DispatchStats::default(),
        }
    }

    /// Publish `descriptor` as the active backend and turn dispatch on.
    ///
    /// If another backend is already active this is a no-op (the descriptor is dropped) and
    /// `false` is returned; replace it by uninstalling first.
    pub fn install(&self, descriptor: MigratorDescriptor) -> bool {
        let _writer = self.writer.lock();

        let current = self.active.load(Ordering::SeqCst);
        if !current.is_null() {
            // Safety: writers are serialized, so nothing can retire `current` under us.
            let active = unsafe { &*current };
            debug!(
                requested = %descriptor.name(),
                active = %active.name(),
                "migrator already installed, ignoring"
            );
            return false;
        }

        info!("starting migration offload by {}", descriptor.name());
        self.active
            .store(Box::into_raw(Box::new(descriptor)), Ordering::SeqCst);
        let _ = self
            .dispatch
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst);
        true
    }

    /// Remove the active backend, if any, and schedule it for reclamation.
    pub fn uninstall(&self) -> bool {
        let _writer = self.writer.lock();
        self.uninstall_locked()
    }

    /// Like [`Registry::uninstall`], but only if the active backend is called `name`.
    pub fn uninstall_if(&self, name: &MigratorName) -> bool {
        let _writer = self.writer.lock();

        let current = self.active.load(Ordering::SeqCst);
        // Safety: writers are serialized, so nothing can retire `current` under us.
        match unsafe { current.as_ref() } {
            Some(active) if active.name() == name => self.uninstall_locked(),
            Some(active) => {
                debug!(
                    requested = %name,
                    active = %active.name(),
                    "not uninstalling a different migrator"
                );
                false
            }
            None => false,
        }
    }

    fn uninstall_locked(&self) -> bool {
        let old = self.active.swap(ptr::null_mut(), Ordering::SeqCst);
        let _ = self
            .dispatch
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst);

        if old.is_null() {
            debug!("no migrator installed");
            return false;
        }

        // Safety: `old` is still live; only the reclaim thread below frees it.
        info!("stopping migration offload by {}", unsafe { (*old).name() });
        self.defer_free(Retired(old));
        true
    }

    fn defer_free(&self, retired: Retired) {
        let srcu = Arc::clone(&self.srcu);
        let spawned = std::thread::Builder::new()
            .name("offc-reclaim".into())
            .spawn(move || {
                srcu.synchronize();
                // Safety: the grace period has elapsed; no reader can reach the descriptor.
                unsafe { retired.free() };
            });

        match spawned {
            Ok(handle) => {
                let mut pending = self.reclaim.lock();
                pending.retain(|h| !h.is_finished());
                pending.push(handle);
            }
            // The closure (and the descriptor it owned) is dropped without being freed.
            Err(err) => warn!("failed to spawn reclaim thread, leaking retired migrator: {err}"),
        }
    }

    /// Enter a read-side critical section and observe the active backend.
    pub fn read(&self) -> ReadGuard<'_> {
        let idx = self.srcu.read_lock();
        let current = self.active.load(Ordering::SeqCst);
        // Safety: non-null slot values come from `Box::into_raw` in `install`, and a descriptor is
        // only freed after a grace period, which waits for this critical section.
        let descriptor = unsafe { current.as_ref() };
        ReadGuard {
            srcu: &self.srcu,
            idx,
            descriptor,
        }
    }

    pub fn active_name(&self) -> Option<MigratorName> {
        self.read().descriptor().map(|d| d.name().clone())
    }

    pub fn is_active(&self, name: &MigratorName) -> bool {
        self.read()
            .descriptor()
            .is_some_and(|d| d.name() == name)
    }

    pub fn dispatch_enabled(&self) -> bool {
        self.dispatch.load(Ordering::SeqCst)
    }

    /// Ask the active backend whether it accepts this pair. Without a backend every pair is
    /// acceptable to the default path.
    pub fn can_migrate(&self, dst: &Folio, src: &Folio) -> bool {
        self.read()
            .descriptor()
            .map_or(true, |d| d.can_migrate(dst, src))
    }

    /// Wait for every read-side critical section that is currently open.
    pub fn synchronize(&self) {
        self.srcu.synchronize();
    }

    /// Wait until every descriptor uninstalled so far has been freed.
    pub fn barrier(&self) {
        let pending = std::mem::take(&mut *self.reclaim.lock());
        for handle in pending {
            if handle.join().is_err() {
                warn!("reclaim thread panicked");
            }
        }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.barrier();
        let current = *self.active.get_mut();
        if !current.is_null() {
            // Safety: `&mut self` rules out live read guards.
            unsafe { Retired(current).free() };
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("active", &self.active_name())
            .field("dispatch", &self.dispatch_enabled())
            .finish()
    }
}

/// Read-side critical section. The observed descriptor stays valid until the guard is dropped,
/// even if it is uninstalled in the meantime.
pub struct ReadGuard<'a> {
    srcu: &'a Srcu,
    idx: usize,
    descriptor: Option<&'a MigratorDescriptor>,
}

impl ReadGuard<'_> {
    pub fn descriptor(&self) -> Option<&MigratorDescriptor> {
        self.descriptor
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.srcu.read_unlock(self.idx);
    }
}
