//! Typed misuse errors.
//!
//! Every row of these is a programmer error: calling a token method from a
//! state that does not allow it. None of them is ever returned from a
//! function; they are the payload of a panic (see [`crate::bug`]), so that
//! tests can recover them with [`std::panic::catch_unwind`] and
//! `downcast_ref`.

use thiserror::Error;

/// A misuse of a [`Locker`](crate::Locker)-like token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("guard: locker already locked")]
    LockerLocked,
    #[error("guard: locker already unlocked")]
    LockerUnlocked,
    #[error("guard: locker not locked")]
    LockerNotLocked,

    #[error("guard: reader already locked")]
    ReaderLocked,
    #[error("guard: reader already unlocked")]
    ReaderUnlocked,
    #[error("guard: reader not locked")]
    ReaderNotLocked,

    #[error("guard: writer already locked")]
    WriterLocked,
    #[error("guard: writer already unlocked")]
    WriterUnlocked,
    #[error("guard: writer not locked")]
    WriterNotLocked,
}

/// Aborts the current thread with a typed [`LockError`] payload.
///
/// This is the library's sole error-reporting mechanism: misuse is a bug,
/// never a recoverable condition, so there is no `Result` anywhere in the
/// public API.
#[cold]
#[track_caller]
pub(crate) fn bug(err: LockError) -> ! {
    log::error!("{err}");
    std::panic::panic_any(err)
}
