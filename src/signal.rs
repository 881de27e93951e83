//! One-shot rendezvous primitive.
//!
//! A grant is signaled by firing a condition variable guarding a per-token
//! flag, which is what [`Signal`] is. A guard holds a non-owning [`Arc`] to
//! the same `Signal` its locker does; firing it wakes exactly one blocked
//! `wait`.
//!
//! A `Signal` is fired at most once in its lifetime. Callers never attempt a
//! second `wait()` on a fired signal: the token-level state machine in
//! [`crate::guard`] and [`crate::rwguard`] guarantees that by construction,
//! so `Signal` itself does not need to distinguish "already delivered" from
//! "delivered again".

use std::sync::{Condvar, Mutex};

pub(crate) struct Signal {
    fired: Mutex<bool>,
    cv: Condvar,
}

impl Signal {
    pub(crate) fn new() -> Self {
        Signal {
            fired: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    /// Wakes the single waiter blocked in (or yet to call) [`Signal::wait`].
    pub(crate) fn fire(&self) {
        let mut fired = self.fired.lock().unwrap();
        debug_assert!(!*fired, "guard: signal fired twice");
        *fired = true;
        self.cv.notify_one();
    }

    /// Blocks until [`Signal::fire`] has been called.
    pub(crate) fn wait(&self) {
        let mut fired = self.fired.lock().unwrap();
        while !*fired {
            fired = self.cv.wait(fired).unwrap();
        }
    }
}
