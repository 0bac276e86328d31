//! Sleepable read-copy-update style grace periods.
//!
//! Readers bracket their use of a shared object with [`Srcu::read_lock`] and
//! [`Srcu::read_unlock`]; neither call ever waits. A writer that has unpublished an object calls
//! [`Srcu::synchronize`], which returns once every reader that could still hold the object has
//! left its critical section.
//!
//! Protocol:
//! 1) A reader increments `readers[idx & 1]` and remembers which counter it used.
//! 2) `synchronize` drains the inactive counter (stragglers that sampled `idx` before the
//!    previous flip), flips `idx`, then drains the counter that was active before the flip.
//!
//! A reader that can observe the old object incremented its counter before the writer
//! unpublished it, so one of the two drains waits for it. All accesses are `SeqCst`.
//!
//! A draining writer parks on a condition variable. The reader that drops a counter to zero
//! wakes it if `waiting` is set; the writer sets `waiting` before re-reading the counter, so
//! one of the two always sees the other.

#[cfg(all(feature = "loom", test))]
use loom::sync::atomic::AtomicUsize;
#[cfg(not(all(feature = "loom", test)))]
use std::sync::atomic::AtomicUsize;

use std::sync::atomic::Ordering;

#[cfg(not(all(feature = "loom", test)))]
use std::sync::atomic::AtomicBool;

#[cfg(not(all(feature = "loom", test)))]
use parking_lot::Condvar;
use parking_lot::Mutex;

pub struct Srcu {
    idx: AtomicUsize,
    readers: [AtomicUsize; 2],
    /// Serializes grace periods.
    gp_lock: Mutex<()>,
    #[cfg(not(all(feature = "loom", test)))]
    park: Park,
}

/// Where a draining writer sleeps.
#[cfg(not(all(feature = "loom", test)))]
#[derive(Default)]
struct Park {
    waiting: AtomicBool,
    lock: Mutex<()>,
    drained: Condvar,
}

impl Srcu {
    pub fn new() -> Self {
        Self {
            idx: AtomicUsize::new(0),
            readers: [AtomicUsize::new(0), AtomicUsize::new(0)],
            gp_lock: Mutex::new(()),
            #[cfg(not(all(feature = "loom", test)))]
            park: Park::default(),
        }
    }

    /// Enter a read-side critical section. Pass the returned index to [`Srcu::read_unlock`].
    pub fn read_lock(&self) -> usize {
        let idx = self.idx.load(Ordering::SeqCst) & 1;
        self.readers[idx].fetch_add(1, Ordering::SeqCst);
        idx
    }

    pub fn read_unlock(&self, idx: usize) {
        let prev = self.readers[idx & 1].fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "unbalanced srcu read_unlock");
        #[cfg(not(all(feature = "loom", test)))]
        {
            if prev == 1 && self.park.waiting.load(Ordering::SeqCst) {
                let _lock = self.park.lock.lock();
                self.park.drained.notify_all();
            }
        }
    }

    /// Wait until every read-side critical section that started before this call has ended.
    pub fn synchronize(&self) {
        let _gp = self.gp_lock.lock();

        let active = self.idx.load(Ordering::SeqCst) & 1;
        self.drain(active ^ 1);

        test_yield();
        self.idx.fetch_add(1, Ordering::SeqCst);
        test_yield();

        self.drain(active);
    }

    /// Number of readers currently inside a critical section.
    pub fn readers(&self) -> usize {
        self.readers[0].load(Ordering::SeqCst) + self.readers[1].load(Ordering::SeqCst)
    }

    #[cfg(not(all(feature = "loom", test)))]
    fn drain(&self, idx: usize) {
        if self.readers[idx].load(Ordering::SeqCst) == 0 {
            return;
        }
        let mut lock = self.park.lock.lock();
        self.park.waiting.store(true, Ordering::SeqCst);
        while self.readers[idx].load(Ordering::SeqCst) != 0 {
            self.park.drained.wait(&mut lock);
        }
        self.park.waiting.store(false, Ordering::SeqCst);
    }

    #[cfg(all(feature = "loom", test))]
    fn drain(&self, idx: usize) {
        while self.readers[idx].load(Ordering::SeqCst) != 0 {
            loom::thread::yield_now();
        }
    }
}

impl Default for Srcu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, feature = "loom"))]
#[inline]
fn test_yield() {
    loom::thread::yield_now();
}

#[cfg(not(all(test, feature = "loom")))]
#[inline]
fn test_yield() {}


#[cfg(all(test, feature = "loom"))]
mod loom_tests {
    use super::*;

    use loom::sync::atomic::AtomicBool;
    use loom::sync::Arc;
    use loom::thread;

    #[test]
    fn reader_never_observes_reclaimed_object() {
        loom::model(|| {
            let srcu = Arc::new(Srcu::new());
            let published = Arc::new(AtomicBool::new(true));
            let freed = Arc::new(AtomicBool::new(false));

            let reader = {
                let srcu = srcu.clone();
                let published = published.clone();
                let freed = freed.clone();
                thread::spawn(move || {
                    let idx = srcu.read_lock();
                    if published.load(Ordering::SeqCst) {
                        assert!(!freed.load(Ordering::SeqCst));
                        thread::yield_now();
                        assert!(!freed.load(Ordering::SeqCst));
                    }
                    srcu.read_unlock(idx);
                })
            };

            published.store(false, Ordering::SeqCst);
            srcu.synchronize();
            freed.store(true, Ordering::SeqCst);

            reader.join().unwrap();
        });
    }

    #[test]
    fn republished_object_is_protected_across_index_flip() {
        loom::model(|| {
            let srcu = Arc::new(Srcu::new());
            // 0 = nothing published, 1 = first object, 2 = second object.
            let slot = Arc::new(loom::sync::atomic::AtomicUsize::new(1));
            let freed_second = Arc::new(AtomicBool::new(false));

            let reader = {
                let srcu = srcu.clone();
                let slot = slot.clone();
                let freed_second = freed_second.clone();
                thread::spawn(move || {
                    let idx = srcu.read_lock();
                    if slot.load(Ordering::SeqCst) == 2 {
                        thread::yield_now();
                        assert!(!freed_second.load(Ordering::SeqCst));
                    }
                    srcu.read_unlock(idx);
                })
            };

            slot.store(0, Ordering::SeqCst);
            srcu.synchronize();
            slot.store(2, Ordering::SeqCst);
            slot.store(0, Ordering::SeqCst);
            srcu.synchronize();
            freed_second.store(true, Ordering::SeqCst);

            reader.join().unwrap();
        });
    }
}
