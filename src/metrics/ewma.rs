//! Exponentially weighted moving averages over native records.
//!
//! One formula, three ways to guard it:
//!
//! - [`Unsynchronized`]: plain loads and stores, single writer only
//! - [`SpinLocked`]: the record's own lock word, for short contended updates
//! - [`Blocking`]: a `parking_lot::Mutex`, parks waiters instead of spinning
//!
//! `alpha = 2 / (window + 1)`; the first sample seeds the average as-is.

use crate::core::config::EwmaStrategy;
use crate::core::{Result, TsaggError};
use crate::memory::arena::{ArenaBox, NativeArena, Zeroable};
use crate::memory::spinlock;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[repr(C)]
pub(crate) struct EwmaRecord {
    lock: AtomicU64,
    window_size: AtomicU64,
    value: AtomicU64,
    sample_count: AtomicU64,
}

// SAFETY: atomics only, valid when zeroed.
unsafe impl Zeroable for EwmaRecord {}

/// How an EWMA serializes its read-modify-write.
pub trait UpdateStrategy: Default + Send + Sync + 'static {
    /// Strategy tag reported through [`MovingAverage::strategy`]
    const KIND: EwmaStrategy;

    /// Run `body` under this strategy's exclusion
    fn update<R>(&self, lock_word: &AtomicU64, body: impl FnOnce() -> R) -> Result<R>;
}

/// No exclusion. Concurrent writers can lose updates.
#[derive(Debug, Default)]
pub struct Unsynchronized;

impl UpdateStrategy for Unsynchronized {
    const KIND: EwmaStrategy = EwmaStrategy::Unsynchronized;

    #[inline]
    fn update<R>(&self, _lock_word: &AtomicU64, body: impl FnOnce() -> R) -> Result<R> {
        Ok(body())
    }
}

/// Spins on the lock word embedded in the record.
#[derive(Debug, Default)]
pub struct SpinLocked;

impl UpdateStrategy for SpinLocked {
    const KIND: EwmaStrategy = EwmaStrategy::Spin;

    #[inline]
    fn update<R>(&self, lock_word: &AtomicU64, body: impl FnOnce() -> R) -> Result<R> {
        spinlock::run_exclusive(lock_word, body)
    }
}

/// Blocks on a mutex; waiting threads sleep.
#[derive(Debug, Default)]
pub struct Blocking {
    mutex: Mutex<()>,
}

impl UpdateStrategy for Blocking {
    const KIND: EwmaStrategy = EwmaStrategy::Mutex;

    #[inline]
    fn update<R>(&self, _lock_word: &AtomicU64, body: impl FnOnce() -> R) -> Result<R> {
        let _guard = self.mutex.lock();
        Ok(body())
    }
}

/// Common read/update contract of every EWMA variant.
pub trait MovingAverage: Send + Sync {
    /// Fold in a sample, returning the new average
    fn append(&self, sample: f64) -> Result<f64>;
    /// Current average, 0.0 before the first sample
    fn value(&self) -> f64;
    /// Samples appended so far
    fn sample_count(&self) -> u64;
    /// Window length in ticks
    fn window_size(&self) -> u64;
    /// Synchronization strategy in use
    fn strategy(&self) -> EwmaStrategy;
}

/// EWMA state in a native block, guarded by `S`.
pub struct Ewma<S: UpdateStrategy> {
    record: ArenaBox<EwmaRecord>,
    alpha: f64,
    strategy: S,
}

/// Single-writer EWMA
pub type UnsyncEwma = Ewma<Unsynchronized>;
/// EWMA guarded by its lock word
pub type SpinEwma = Ewma<SpinLocked>;
/// EWMA guarded by a mutex
pub type MutexEwma = Ewma<Blocking>;

impl<S: UpdateStrategy> Ewma<S> {
    /// Allocate an EWMA over `window_size` ticks.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(arena: &NativeArena, window_size: u64) -> Result<Self> {
        if window_size == 0 {
            return Err(TsaggError::invalid_argument("EWMA window size must be at least 1"));
        }

        let record = arena.alloc_record::<EwmaRecord>()?;
        record.window_size.store(window_size, Ordering::Relaxed);

        Ok(Self {
            record,
            alpha: 2.0 / (window_size as f64 + 1.0),
            strategy: S::default(),
        })
    }

    /// Smoothing factor
    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl<S: UpdateStrategy> MovingAverage for Ewma<S> {
    fn append(&self, sample: f64) -> Result<f64> {
        if !sample.is_finite() {
            return Err(TsaggError::invalid_argument(format!("non-finite EWMA sample {}", sample)));
        }

        let rec = &*self.record;
        let alpha = self.alpha;
        self.strategy.update(&rec.lock, || {
            let seen = rec.sample_count.load(Ordering::Acquire);
            let next = if seen == 0 {
                sample
            } else {
                let current = f64::from_bits(rec.value.load(Ordering::Acquire));
                alpha * sample + (1.0 - alpha) * current
            };
            rec.value.store(next.to_bits(), Ordering::Release);
            rec.sample_count.store(seen + 1, Ordering::Release);
            next
        })
    }

    fn value(&self) -> f64 {
        f64::from_bits(self.record.value.load(Ordering::Acquire))
    }

    fn sample_count(&self) -> u64 {
        self.record.sample_count.load(Ordering::Acquire)
    }

    fn window_size(&self) -> u64 {
        self.record.window_size.load(Ordering::Relaxed)
    }

    fn strategy(&self) -> EwmaStrategy {
        S::KIND
    }
}

impl<S: UpdateStrategy> fmt::Debug for Ewma<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ewma")
            .field("strategy", &S::KIND)
            .field("window_size", &self.window_size())
            .field("value", &self.value())
            .field("sample_count", &self.sample_count())
            .finish()
    }
}

/// Build an EWMA with the strategy chosen at runtime.
pub fn build_ewma(
    arena: &NativeArena,
    window_size: u64,
    strategy: EwmaStrategy,
) -> Result<Box<dyn MovingAverage>> {
    Ok(match strategy {
        EwmaStrategy::Unsynchronized => Box::new(UnsyncEwma::new(arena, window_size)?),
        EwmaStrategy::Spin => Box::new(SpinEwma::new(arena, window_size)?),
        EwmaStrategy::Mutex => Box::new(MutexEwma::new(arena, window_size)?),
    })
}
