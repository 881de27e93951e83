//! Exclusive guard: an ordered queue of one-shot permission tokens.
//!
//! `Guard` hands out [`Locker`]s in the order [`Guard::new_locker`] is
//! called. A locker's `lock()` blocks until every locker created before it
//! has been unlocked or released, so the creating thread can prearrange an
//! ordered sequence of critical sections without ever blocking itself.

use std::cell::RefCell;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::error::{bug, LockError};
use crate::signal::Signal;

/// Queue head stays compacted to the front once it has drifted this far, or
/// past the halfway point of the queue, whichever comes first. This bounds
/// resident slot count to O(live lockers).
const COMPACT_MIN: usize = 32;

#[derive(Default)]
struct Inner {
    off: usize,
    queue: Vec<Option<Arc<Signal>>>,
}

impl Inner {
    fn unlock(&mut self, signal: &Arc<Signal>) {
        let l = self.queue.len();
        match self.queue.get(self.off) {
            Some(Some(head)) if Arc::ptr_eq(head, signal) => {}
            _ => bug(LockError::LockerNotLocked),
        }
        self.queue[self.off] = None;
        self.off += 1;
        if self.off == l {
            self.off = 0;
            self.queue.clear();
            return;
        }
        let next = self.queue[self.off].clone().expect("guard: hole at queue head");
        next.fire();
        if self.off >= l / 2 || self.off >= COMPACT_MIN {
            self.queue.drain(0..self.off);
            self.off = 0;
            log::trace!("guard: queue compacted");
        }
    }
}

/// Grants a single exclusive permission at a time, in locker creation order.
///
/// A freshly constructed `Guard` (`Guard::new()` or `Guard::default()`) is a
/// valid, idle guard; there is no separate initialization step.
#[derive(Default)]
pub struct Guard {
    inner: Arc<Mutex<Inner>>,
}

impl Guard {
    /// Creates an idle guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a [`Locker`] for exclusive permission acquisition.
    ///
    /// Lockers created after this one will not acquire the permission
    /// before this one has been locked-then-unlocked, or released.
    pub fn new_locker(&self) -> Locker {
        let signal = Arc::new(Signal::new());
        let owned = {
            let mut inner = self.inner.lock().unwrap();
            let owned = inner.off == inner.queue.len();
            inner.queue.push(Some(signal.clone()));
            owned
        };
        if owned {
            log::trace!("guard: new locker granted immediately (queue was idle)");
            signal.fire();
        } else {
            log::trace!("guard: new locker enqueued behind pending lockers");
        }
        Locker {
            guard: self.inner.clone(),
            state: RefCell::new(TokenState::Pending(signal)),
        }
    }
}

enum TokenState {
    Pending(Arc<Signal>),
    Held(Arc<Signal>),
    Consumed,
}

/// A one-shot exclusive permission token produced by [`Guard::new_locker`].
///
/// Not [`Sync`]: a locker is meant for single-thread use at a time, handed
/// off from its creator to whichever worker will eventually call `lock()`.
pub struct Locker {
    guard: Arc<Mutex<Inner>>,
    state: RefCell<TokenState>,
}

impl Locker {
    /// Blocks until this locker is granted the permission.
    ///
    /// # Panics
    /// Panics with [`LockError::LockerLocked`] if already held, or
    /// [`LockError::LockerUnlocked`] if already consumed (unlocked or
    /// released).
    pub fn lock(&self) {
        let signal = match &*self.state.borrow() {
            TokenState::Held(_) => bug(LockError::LockerLocked),
            TokenState::Consumed => bug(LockError::LockerUnlocked),
            TokenState::Pending(s) => s.clone(),
        };
        signal.wait();
        *self.state.borrow_mut() = TokenState::Held(signal);
    }

    /// Releases a held permission, advancing the queue to the next locker.
    ///
    /// # Panics
    /// Panics with [`LockError::LockerUnlocked`] if already consumed, or
    /// [`LockError::LockerNotLocked`] if never locked.
    pub fn unlock(&self) {
        let signal = match &*self.state.borrow() {
            TokenState::Consumed => bug(LockError::LockerUnlocked),
            TokenState::Pending(_) => bug(LockError::LockerNotLocked),
            TokenState::Held(s) => s.clone(),
        };
        *self.state.borrow_mut() = TokenState::Consumed;
        self.guard.lock().unwrap().unlock(&signal);
        log::trace!("guard: locker unlocked");
    }

    /// Abandons a never-locked token, preserving its place in the queue.
    ///
    /// A background thread waits for the grant in this locker's stead and
    /// immediately unlocks, so later lockers see the same FIFO ordering as
    /// if this one had been locked and unlocked right away.
    ///
    /// # Panics
    /// Panics with [`LockError::LockerLocked`] if currently held, or
    /// [`LockError::LockerUnlocked`] if already consumed.
    pub fn release(&self) {
        let signal = match &*self.state.borrow() {
            TokenState::Held(_) => bug(LockError::LockerLocked),
            TokenState::Consumed => bug(LockError::LockerUnlocked),
            TokenState::Pending(s) => s.clone(),
        };
        *self.state.borrow_mut() = TokenState::Consumed;
        let guard = self.guard.clone();
        thread::Builder::new()
            .name("guard-release".into())
            .spawn(move || {
                signal.wait();
                guard.lock().unwrap().unlock(&signal);
            })
            .expect("guard: failed to spawn release thread");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;
    use std::sync::mpsc;
    use std::time::Duration;

    fn catch(f: impl FnOnce()) -> LockError {
        let err = panic::catch_unwind(panic::AssertUnwindSafe(f)).unwrap_err();
        *err.downcast_ref::<LockError>()
            .expect("panic payload should be a LockError")
    }

    #[test]
    fn lock_unlock_roundtrip() {
        let g = Guard::new();
        let l = g.new_locker();
        l.lock();
        l.unlock();
    }

    #[test]
    fn double_lock_panics() {
        let g = Guard::new();
        let l = g.new_locker();
        l.lock();
        assert_eq!(catch(|| l.lock()), LockError::LockerLocked);
    }

    #[test]
    fn lock_after_unlock_panics() {
        let g = Guard::new();
        let l = g.new_locker();
        l.lock();
        l.unlock();
        assert_eq!(catch(|| l.lock()), LockError::LockerUnlocked);
    }

    #[test]
    fn lock_after_release_panics() {
        let g = Guard::new();
        let l = g.new_locker();
        l.release();
        assert_eq!(catch(|| l.lock()), LockError::LockerUnlocked);
    }

    #[test]
    fn unlock_without_lock_panics() {
        let g = Guard::new();
        let l = g.new_locker();
        assert_eq!(catch(|| l.unlock()), LockError::LockerNotLocked);
    }

    #[test]
    fn double_unlock_panics() {
        let g = Guard::new();
        let l = g.new_locker();
        l.lock();
        l.unlock();
        assert_eq!(catch(|| l.unlock()), LockError::LockerUnlocked);
    }

    #[test]
    fn unlock_after_release_panics() {
        let g = Guard::new();
        let l = g.new_locker();
        l.release();
        assert_eq!(catch(|| l.unlock()), LockError::LockerUnlocked);
    }

    #[test]
    fn release_after_lock_panics() {
        let g = Guard::new();
        let l = g.new_locker();
        l.lock();
        assert_eq!(catch(|| l.release()), LockError::LockerLocked);
    }

    #[test]
    fn release_after_unlock_panics() {
        let g = Guard::new();
        let l = g.new_locker();
        l.lock();
        l.unlock();
        assert_eq!(catch(|| l.release()), LockError::LockerUnlocked);
    }

    #[test]
    fn release_after_release_panics() {
        let g = Guard::new();
        let l = g.new_locker();
        l.release();
        assert_eq!(catch(|| l.release()), LockError::LockerUnlocked);
    }

    #[test]
    fn fifo_order_between_two_lockers() {
        let g = Guard::new();
        let l0 = g.new_locker();
        let l1 = g.new_locker();

        let (tx, rx) = mpsc::channel();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            l0.lock();
            tx.send("l0").unwrap();
            l0.unlock();
        });

        // l1 was created after l0, so this cannot return before the spawned
        // thread above has locked and unlocked l0.
        l1.lock();
        tx.send("l1").unwrap();
        l1.unlock();

        assert_eq!(rx.recv().unwrap(), "l0");
        assert_eq!(rx.recv().unwrap(), "l1");
        t.join().unwrap();
    }

    #[test]
    fn release_preserves_queue_order() {
        let g = Guard::new();
        let l0 = g.new_locker();
        let l1 = g.new_locker();
        let l2 = g.new_locker();

        l1.release();
        l0.lock();
        l0.unlock();
        l2.lock();
        l2.unlock();
    }

    #[test]
    fn queue_compacts_after_many_lockers() {
        let g = Guard::new();
        for _ in 0..200 {
            let l = g.new_locker();
            l.lock();
            l.unlock();
        }
        let inner = g.inner.lock().unwrap();
        assert_eq!(inner.queue.len(), 0);
        assert_eq!(inner.off, 0);
    }

    #[test]
    fn queue_compacts_while_many_lockers_are_still_pending() {
        let g = Guard::new();
        let lockers: Vec<_> = (0..(COMPACT_MIN * 3)).map(|_| g.new_locker()).collect();

        for l in &lockers {
            l.lock();
            l.unlock();
            let inner = g.inner.lock().unwrap();
            assert!(
                inner.queue.len() <= COMPACT_MIN * 3,
                "queue must never grow past what was ever pending"
            );
        }

        let inner = g.inner.lock().unwrap();
        assert_eq!(inner.queue.len(), 0);
        assert_eq!(inner.off, 0);
    }
}
