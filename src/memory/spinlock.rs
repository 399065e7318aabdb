//! Exclusive update primitive keyed by the address of a lock word.
//!
//! Each record embeds one `AtomicU64` next to the data it guards, so a
//! million metrics cost a million words instead of a million lock objects.
//! The word holds [`UNLOCKED`] or [`HELD`]; any other value means the
//! native memory was scribbled on and the operation aborts with
//! [`TsaggError::Corruption`].
//!
//! Waiting spins with exponential backoff and then yields the thread
//! (`crossbeam::utils::Backoff`). There is no timeout: critical sections
//! are O(1) apart from raw window growth, so acquisition always succeeds
//! eventually.

use crate::core::{Result, TsaggError};
use crossbeam::utils::Backoff;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock word value when nobody holds the lock.
pub const UNLOCKED: u64 = 0;
/// Lock word value while a mutator is inside its critical section.
pub const HELD: u64 = 0x4845_4C44; // "HELD"

/// Scoped ownership of a lock word; releases on drop, including unwinding.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ExclusiveGuard<'a> {
    word: &'a AtomicU64,
    released: bool,
}

impl ExclusiveGuard<'_> {
    /// Release explicitly, surfacing corruption of the lock word.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        release_word(self.word)
    }
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = release_word(self.word) {
                tracing::warn!(error = %e, "lock word corrupted while held");
            }
        }
    }
}

/// Spin until the lock word moves from [`UNLOCKED`] to [`HELD`].
pub fn acquire(word: &AtomicU64) -> Result<ExclusiveGuard<'_>> {
    let backoff = Backoff::new();
    loop {
        match word.compare_exchange_weak(UNLOCKED, HELD, Ordering::Acquire, Ordering::Relaxed) {
            Ok(_) => {
                return Ok(ExclusiveGuard {
                    word,
                    released: false,
                })
            },
            Err(HELD) => {
                // Wait on plain loads so contenders don't bounce the cache line.
                while word.load(Ordering::Relaxed) == HELD {
                    backoff.snooze();
                }
            },
            Err(UNLOCKED) => {}, // spurious failure of the weak exchange
            Err(other) => return Err(unexpected_word(word, other)),
        }
    }
}

/// Take the lock only if it is free right now.
pub fn try_acquire(word: &AtomicU64) -> Result<Option<ExclusiveGuard<'_>>> {
    match word.compare_exchange(UNLOCKED, HELD, Ordering::Acquire, Ordering::Relaxed) {
        Ok(_) => Ok(Some(ExclusiveGuard {
            word,
            released: false,
        })),
        Err(HELD) => Ok(None),
        Err(other) => Err(unexpected_word(word, other)),
    }
}

/// Run `body` while holding the lock word.
pub fn run_exclusive<R>(word: &AtomicU64, body: impl FnOnce() -> R) -> Result<R> {
    let guard = acquire(word)?;
    let out = body();
    guard.release()?;
    Ok(out)
}

/// Like [`run_exclusive`] for a fallible body; the lock is released on both outcomes.
pub fn try_run_exclusive<R>(word: &AtomicU64, body: impl FnOnce() -> Result<R>) -> Result<R> {
    let guard = acquire(word)?;
    let out = body();
    guard.release()?;
    out
}

/// Whether the word is currently held. Racy; diagnostics only.
pub fn is_locked(word: &AtomicU64) -> bool {
    word.load(Ordering::Relaxed) == HELD
}

fn release_word(word: &AtomicU64) -> Result<()> {
    word.compare_exchange(HELD, UNLOCKED, Ordering::Release, Ordering::Relaxed)
        .map(|_| ())
        .map_err(|found| unexpected_word(word, found))
}

fn unexpected_word(word: &AtomicU64, found: u64) -> TsaggError {
    TsaggError::corruption(format!(
        "lock word at {:p} holds {:#x}, expected {:#x} or {:#x}",
        word, found, UNLOCKED, HELD
    ))
}
