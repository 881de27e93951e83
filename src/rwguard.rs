//! Read/write guard: an ordered queue of reader and writer permission tokens.
//!
//! `RWGuard` grants either a batch of contiguous readers or a single writer,
//! strictly in the order [`RWGuard::new_reader`] / [`RWGuard::new_writer`]
//! were called. Readers queued back-to-back with no writer between them are
//! granted together the moment the phase ahead of them ends; see
//! [`Inner::unlock_write`] for the promotion scan.

use std::cell::RefCell;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::error::{bug, LockError};
use crate::signal::Signal;

const COMPACT_MIN: usize = 32;

/// Wraps an `Arc<Signal>` so it can live in a [`HashSet`] keyed by identity
/// rather than by value.
#[derive(Clone)]
struct SignalRef(Arc<Signal>);

impl PartialEq for SignalRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for SignalRef {}
impl Hash for SignalRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state)
    }
}

struct Waiter {
    signal: Option<Arc<Signal>>,
    writing: bool,
}

#[derive(Default)]
struct Inner {
    off: usize,
    readers: HashSet<SignalRef>,
    waiters: Vec<Waiter>,
}

impl Inner {
    fn unlock_read(&mut self, signal: &Arc<Signal>) {
        if !self.readers.remove(&SignalRef(signal.clone())) {
            bug(LockError::ReaderNotLocked);
        }
        if self.readers.is_empty() && self.off < self.waiters.len() {
            let head = self.waiters[self.off]
                .signal
                .clone()
                .expect("guard: rwguard head waiter missing signal");
            head.fire();
        }
    }

    fn unlock_write(&mut self, signal: &Arc<Signal>) {
        let mut i = self.off;
        let l = self.waiters.len();
        let matches_head = i < l
            && self.waiters[i]
                .signal
                .as_ref()
                .is_some_and(|head| Arc::ptr_eq(head, signal));
        if !self.readers.is_empty() || !matches_head {
            bug(LockError::WriterNotLocked);
        }

        self.waiters[i].signal = None;
        i += 1;
        if i == l {
            self.off = 0;
            self.waiters.clear();
            return;
        }

        if self.waiters[i].writing {
            let next = self.waiters[i]
                .signal
                .clone()
                .expect("guard: rwguard next writer missing signal");
            next.fire();
        } else {
            loop {
                let signal = self.waiters[i]
                    .signal
                    .take()
                    .expect("guard: rwguard reader waiter missing signal");
                signal.fire();
                self.readers.insert(SignalRef(signal));
                i += 1;
                if i == l || self.waiters[i].writing {
                    break;
                }
            }
            if i == l {
                self.off = 0;
                self.waiters.clear();
                return;
            }
        }

        if i >= l / 2 || i >= COMPACT_MIN {
            self.waiters.drain(0..i);
            self.off = 0;
            log::trace!("rwguard: waiter queue compacted");
        } else {
            self.off = i;
        }
    }
}

/// Grants read and/or write permission to clients, FIFO by creation order.
///
/// A freshly constructed `RWGuard` (`RWGuard::new()` or `RWGuard::default()`)
/// is a valid, idle guard.
#[derive(Default)]
pub struct RWGuard {
    inner: Arc<Mutex<Inner>>,
}

impl RWGuard {
    /// Creates an idle read/write guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a [`Locker`](crate::Locker)-shaped reader token.
    ///
    /// Writers created after this reader will not acquire their permission
    /// before this reader has been locked-then-unlocked, or released.
    pub fn new_reader(&self) -> Reader {
        let signal = Arc::new(Signal::new());
        let granted = {
            let mut inner = self.inner.lock().unwrap();
            if inner.off == inner.waiters.len() {
                inner.readers.insert(SignalRef(signal.clone()));
                true
            } else {
                inner.waiters.push(Waiter {
                    signal: Some(signal.clone()),
                    writing: false,
                });
                false
            }
        };
        if granted {
            log::trace!("rwguard: new reader granted immediately (no pending writers)");
            signal.fire();
        } else {
            log::trace!("rwguard: new reader enqueued behind a pending writer");
        }
        Reader {
            guard: self.inner.clone(),
            state: RefCell::new(TokenState::Pending(signal)),
        }
    }

    /// Creates a [`Locker`](crate::Locker)-shaped writer token.
    ///
    /// Every locker, reader or writer, created after this one will not
    /// acquire its permission before this writer has been
    /// locked-then-unlocked, or released.
    pub fn new_writer(&self) -> Writer {
        let signal = Arc::new(Signal::new());
        let owned = {
            let mut inner = self.inner.lock().unwrap();
            let owned = inner.readers.is_empty() && inner.waiters.is_empty();
            inner.waiters.push(Waiter {
                signal: Some(signal.clone()),
                writing: true,
            });
            owned
        };
        if owned {
            log::trace!("rwguard: new writer granted immediately (guard was idle)");
            signal.fire();
        } else {
            log::trace!("rwguard: new writer enqueued behind pending readers or a writer");
        }
        Writer {
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

/// A one-shot read permission token produced by [`RWGuard::new_reader`].
pub struct Reader {
    guard: Arc<Mutex<Inner>>,
    state: RefCell<TokenState>,
}

/// A one-shot write permission token produced by [`RWGuard::new_writer`].
pub struct Writer {
    guard: Arc<Mutex<Inner>>,
    state: RefCell<TokenState>,
}

macro_rules! impl_token {
    ($ty:ident, $locked:expr, $unlocked:expr, $not_locked:expr, $unlock_method:ident, $noun:literal) => {
        impl $ty {
            #[doc = concat!("Blocks until this ", $noun, " is granted permission.")]
            pub fn lock(&self) {
                let signal = match &*self.state.borrow() {
                    TokenState::Held(_) => bug($locked),
                    TokenState::Consumed => bug($unlocked),
                    TokenState::Pending(s) => s.clone(),
                };
                signal.wait();
                *self.state.borrow_mut() = TokenState::Held(signal);
            }

            #[doc = concat!("Completes a grant held by this ", $noun, ".")]
            pub fn unlock(&self) {
                let signal = match &*self.state.borrow() {
                    TokenState::Consumed => bug($unlocked),
                    TokenState::Pending(_) => bug($not_locked),
                    TokenState::Held(s) => s.clone(),
                };
                *self.state.borrow_mut() = TokenState::Consumed;
                self.guard.lock().unwrap().$unlock_method(&signal);
                log::trace!(concat!("rwguard: ", $noun, " unlocked"));
            }

            #[doc = concat!("Abandons a never-locked ", $noun, ", preserving its queue position.")]
            pub fn release(&self) {
                let signal = match &*self.state.borrow() {
                    TokenState::Held(_) => bug($locked),
                    TokenState::Consumed => bug($unlocked),
                    TokenState::Pending(s) => s.clone(),
                };
                *self.state.borrow_mut() = TokenState::Consumed;
                let guard = self.guard.clone();
                thread::Builder::new()
                    .name("rwguard-release".into())
                    .spawn(move || {
                        signal.wait();
                        guard.lock().unwrap().$unlock_method(&signal);
                    })
                    .expect("guard: failed to spawn release thread");
            }
        }
    };
}

impl_token!(
    Reader,
    LockError::ReaderLocked,
    LockError::ReaderUnlocked,
    LockError::ReaderNotLocked,
    unlock_read,
    "reader"
);

impl_token!(
    Writer,
    LockError::WriterLocked,
    LockError::WriterUnlocked,
    LockError::WriterNotLocked,
    unlock_write,
    "writer"
);
