//! Lockers that can be created in one order and locked, from anywhere, in
//! that same order.
//!
//! [`Guard`] and [`RWGuard`] are meant to be used from one thread to create
//! lockers up front, which are then handed off to other threads to be
//! locked in creation order. The creating thread is never blocked by
//! creation itself, so it can safely prearrange an ordered sequence of
//! critical sections ahead of the workers that will actually enter them.
//!
//! ```
//! use guard::Guard;
//!
//! let guard = Guard::new();
//! let l0 = guard.new_locker();
//! let l1 = guard.new_locker();
//!
//! let worker = std::thread::spawn(move || {
//!     l0.lock();
//!     l0.unlock();
//! });
//!
//! // l1 cannot be acquired before l0 has been locked and unlocked.
//! l1.lock();
//! l1.unlock();
//! worker.join().unwrap();
//! ```
//!
//! Every token ([`guard::Locker`], [`rwguard::Reader`], [`rwguard::Writer`])
//! is single-shot: once unlocked or released it cannot be reused, and any
//! further call panics with a [`LockError`]. See that type for the full
//! misuse taxonomy.

pub mod error;
pub mod guard;
pub mod rwguard;
mod signal;

pub use error::LockError;
pub use guard::{Guard, Locker};
pub use rwguard::{Reader, RWGuard, Writer};

// Tokens are meant to be created on one thread and locked on another, but
// never shared between threads concurrently.
static_assertions::assert_impl_all!(Locker: Send);
static_assertions::assert_not_impl_any!(Locker: Sync);
static_assertions::assert_impl_all!(Reader: Send);
static_assertions::assert_not_impl_any!(Reader: Sync);
static_assertions::assert_impl_all!(Writer: Send);
static_assertions::assert_not_impl_any!(Writer: Sync);
static_assertions::assert_impl_all!(Guard: Send, Sync);
static_assertions::assert_impl_all!(RWGuard: Send, Sync);
