//! Per-metric period aggregator over a native record.
//!
//! Layout of the record (one 64-byte arena block):
//!
//! | field         | repr                                   |
//! |---------------|----------------------------------------|
//! | `lock`        | lock word for [`spinlock`]             |
//! | `id`          | metric id                              |
//! | `last_update` | epoch millis of the last ingested value |
//! | `count`       | values seen this period                |
//! | `min`, `max`  | `i64` or `f64` bits, per numeric kind  |
//! | `mean`        | always `f64` bits                      |
//! | `kind`        | [`NumericKind`] tag                    |
//! | `raw_enabled` | raw retention flag                     |
//!
//! Writers serialize on the lock word. Readers load single fields without
//! locking, so two fields read back to back may straddle a concurrent
//! update (e.g. `count` already bumped, `mean` not yet). Use
//! [`PeriodAggregator::snapshot`] for a consistent view.

use crate::core::config::RawWindowConfig;
use crate::core::types::{millis_to_datetime, now_millis};
use crate::core::{MetricId, MetricValue, NumericKind, Result, StatsSnapshot, TsaggError};
use crate::memory::arena::{ArenaBox, NativeArena, Zeroable};
use crate::memory::spinlock;
use crate::metrics::raw_window::RawValueWindow;
use chrono::{DateTime, Utc};
use std::cell::UnsafeCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

#[repr(C)]
pub(crate) struct AggregatorRecord {
    lock: AtomicU64,
    id: AtomicU64,
    last_update: AtomicU64,
    count: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
    mean: AtomicU64,
    kind: AtomicU8,
    raw_enabled: AtomicBool,
}

// SAFETY: every field is an atomic, valid when zeroed, with no drop glue.
unsafe impl Zeroable for AggregatorRecord {}

/// Sentinel min/max bits for an empty period.
#[inline]
#[allow(clippy::cast_sign_loss)]
fn sentinels(kind: NumericKind) -> (u64, u64) {
    match kind {
        NumericKind::Integer => (i64::MAX as u64, i64::MIN as u64),
        NumericKind::Float => (f64::MAX.to_bits(), f64::MIN.to_bits()),
    }
}

#[inline]
#[allow(clippy::cast_sign_loss)]
fn encode(value: MetricValue) -> u64 {
    match value {
        MetricValue::Integer(v) => v as u64,
        MetricValue::Float(v) => v.to_bits(),
    }
}

#[inline]
#[allow(clippy::cast_possible_wrap)]
fn decode(kind: NumericKind, bits: u64) -> MetricValue {
    match kind {
        NumericKind::Integer => MetricValue::Integer(bits as i64),
        NumericKind::Float => MetricValue::Float(f64::from_bits(bits)),
    }
}

struct AggregatorInner {
    record: ArenaBox<AggregatorRecord>,
    kind: NumericKind,
    /// Only touched while `record.lock` is held.
    raw: UnsafeCell<Option<RawValueWindow>>,
    window_config: RawWindowConfig,
}

// SAFETY: `raw` is accessed exclusively under the record's lock word; all
// other state is atomic.
unsafe impl Sync for AggregatorInner {}

impl AggregatorInner {
    /// # Safety
    ///
    /// Caller must hold `record.lock`.
    #[allow(clippy::mut_from_ref)]
    unsafe fn raw_mut(&self) -> &mut Option<RawValueWindow> {
        &mut *self.raw.get()
    }
}

/// Handle to one metric's period statistics.
///
/// Handles are cheap to clone; clones share the same native record and
/// compare equal by its address.
#[derive(Clone)]
pub struct PeriodAggregator {
    inner: Arc<AggregatorInner>,
}

impl PeriodAggregator {
    /// Allocate and initialize an aggregator for `id`.
    pub fn create(
        arena: &NativeArena,
        id: MetricId,
        kind: NumericKind,
        window_config: &RawWindowConfig,
    ) -> Result<Self> {
        let record = arena.alloc_record::<AggregatorRecord>()?;
        record.id.store(id.get(), Ordering::Relaxed);
        record.kind.store(kind as u8, Ordering::Relaxed);
        let (min, max) = sentinels(kind);
        record.min.store(min, Ordering::Relaxed);
        record.max.store(max, Ordering::Relaxed);

        Ok(Self {
            inner: Arc::new(AggregatorInner {
                record,
                kind,
                raw: UnsafeCell::new(None),
                window_config: window_config.clone(),
            }),
        })
    }

    /// Fold one value into the current period.
    ///
    /// The value is converted to the aggregator's kind first. Non-finite
    /// floats are rejected and leave the state untouched.
    #[allow(clippy::cast_precision_loss)]
    pub fn process_value(&self, value: impl Into<MetricValue>) -> Result<()> {
        let value = value.into();
        if !value.is_finite() {
            return Err(TsaggError::invalid_argument(format!(
                "metric {}: non-finite value {}",
                self.id(),
                value
            )));
        }
        let value = value.coerce(self.inner.kind);
        let now = now_millis();
        let inner = &*self.inner;
        let rec = &*inner.record;

        spinlock::try_run_exclusive(&rec.lock, || {
            if rec.raw_enabled.load(Ordering::Relaxed) {
                // SAFETY: lock held.
                if let Some(window) = unsafe { inner.raw_mut() }.as_mut() {
                    window.append(value)?;
                }
            }

            let count = rec.count.load(Ordering::Relaxed) + 1;
            let sample = value.as_f64();
            if count == 1 {
                let bits = encode(value);
                rec.min.store(bits, Ordering::Release);
                rec.max.store(bits, Ordering::Release);
                rec.mean.store(sample.to_bits(), Ordering::Release);
            } else {
                let min = decode(inner.kind, rec.min.load(Ordering::Relaxed));
                let max = decode(inner.kind, rec.max.load(Ordering::Relaxed));
                if less_than(value, min) {
                    rec.min.store(encode(value), Ordering::Release);
                }
                if less_than(max, value) {
                    rec.max.store(encode(value), Ordering::Release);
                }
                let mean = f64::from_bits(rec.mean.load(Ordering::Relaxed));
                let mean = (mean * (count - 1) as f64 + sample) / count as f64;
                rec.mean.store(mean.to_bits(), Ordering::Release);
            }
            rec.count.store(count, Ordering::Release);
            rec.last_update.store(now, Ordering::Release);
            Ok(())
        })
    }

    /// Start a new period: count 0, min/max back to sentinels.
    ///
    /// The raw value window is left alone.
    pub fn reset(&self) -> Result<()> {
        let rec = &*self.inner.record;
        let (min, max) = sentinels(self.inner.kind);
        spinlock::run_exclusive(&rec.lock, || {
            rec.count.store(0, Ordering::Release);
            rec.min.store(min, Ordering::Release);
            rec.max.store(max, Ordering::Release);
            rec.mean.store(0f64.to_bits(), Ordering::Release);
        })
    }

    /// Switch raw value retention on or off.
    ///
    /// Enabling allocates an empty window; disabling releases it.
    pub fn set_raw_enabled(&self, enabled: bool) -> Result<()> {
        let inner = &*self.inner;
        let rec = &*inner.record;
        spinlock::try_run_exclusive(&rec.lock, || {
            // SAFETY: lock held.
            let raw = unsafe { inner.raw_mut() };
            match (enabled, raw.is_some()) {
                (true, false) => {
                    *raw = Some(RawValueWindow::new(inner.kind, &inner.window_config)?);
                },
                (false, true) => *raw = None,
                _ => {},
            }
            rec.raw_enabled.store(enabled, Ordering::Release);
            Ok(())
        })?;

        tracing::debug!(metric = self.id().get(), enabled, "raw retention toggled");
        Ok(())
    }

    /// Metric id
    pub fn id(&self) -> MetricId {
        MetricId(self.inner.record.id.load(Ordering::Relaxed))
    }

    /// Numeric kind fixed at creation
    pub fn numeric_kind(&self) -> NumericKind {
        self.inner.kind
    }

    /// Whether raw values are retained
    pub fn is_raw_enabled(&self) -> bool {
        self.inner.record.raw_enabled.load(Ordering::Acquire)
    }

    /// Values seen in the current period
    pub fn count(&self) -> u64 {
        self.inner.record.count.load(Ordering::Acquire)
    }

    /// Smallest value this period; the kind's maximum when `count() == 0`
    pub fn min(&self) -> MetricValue {
        decode(self.inner.kind, self.inner.record.min.load(Ordering::Acquire))
    }

    /// Largest value this period; the kind's minimum when `count() == 0`
    pub fn max(&self) -> MetricValue {
        decode(self.inner.kind, self.inner.record.max.load(Ordering::Acquire))
    }

    /// Running mean in the metric's kind.
    ///
    /// Integer metrics truncate the floating accumulator toward zero.
    #[allow(clippy::cast_possible_truncation)]
    pub fn mean(&self) -> MetricValue {
        let mean = self.mean_f64();
        match self.inner.kind {
            NumericKind::Integer => MetricValue::Integer(mean as i64),
            NumericKind::Float => MetricValue::Float(mean),
        }
    }

    /// Running mean as stored, without truncation
    pub fn mean_f64(&self) -> f64 {
        f64::from_bits(self.inner.record.mean.load(Ordering::Acquire))
    }

    /// Epoch millis of the last ingested value, 0 if none yet
    pub fn last_update_millis(&self) -> u64 {
        self.inner.record.last_update.load(Ordering::Acquire)
    }

    /// Time of the last ingested value, `None` if none yet
    pub fn last_update_time(&self) -> Option<DateTime<Utc>> {
        match self.last_update_millis() {
            0 => None,
            millis => Some(millis_to_datetime(millis)),
        }
    }

    /// Median of the retained raw values.
    ///
    /// Fails with `InvalidState` when raw retention is off; `None` when the
    /// window is still empty.
    pub fn median(&self) -> Result<Option<f64>> {
        self.with_raw(|window| Ok(window.median()))
    }

    /// Nearest-rank percentile of the retained raw values
    pub fn percentile(&self, p: f64) -> Result<Option<f64>> {
        self.with_raw(|window| window.percentile(p))
    }

    /// Retained raw values, oldest first
    pub fn raw_values(&self) -> Result<Vec<MetricValue>> {
        self.with_raw(|window| Ok(window.values()))
    }

    /// Number of retained raw values
    pub fn raw_len(&self) -> Result<usize> {
        self.with_raw(|window| Ok(window.len()))
    }

    /// Kind tag as stored in the native record.
    fn stored_kind(&self) -> Option<NumericKind> {
        NumericKind::from_tag(self.inner.record.kind.load(Ordering::Acquire))
    }

    /// Consistent copy of every field, taken under the lock.
    ///
    /// Fails with [`TsaggError::Corruption`] if the record's kind tag no
    /// longer matches the kind the aggregator was created with.
    pub fn snapshot(&self) -> Result<StatsSnapshot> {
        let inner = &*self.inner;
        let rec = &*inner.record;
        spinlock::try_run_exclusive(&rec.lock, || {
            let kind = match self.stored_kind() {
                Some(kind) if kind == inner.kind => kind,
                stored => {
                    return Err(TsaggError::corruption(format!(
                        "metric {}: kind tag {} does not match {}",
                        self.id(),
                        stored.map_or("unknown", |k| k.as_str()),
                        inner.kind.as_str()
                    )));
                },
            };
            // SAFETY: lock held.
            let median = unsafe { inner.raw_mut() }.as_ref().and_then(RawValueWindow::median);
            Ok(StatsSnapshot {
                id: self.id(),
                kind,
                count: self.count(),
                min: self.min(),
                max: self.max(),
                mean: self.mean(),
                median,
                raw_enabled: self.is_raw_enabled(),
                last_update_millis: self.last_update_millis(),
            })
        })
    }

    /// Native record plus raw window bytes.
    pub fn memory_bytes(&self) -> Result<usize> {
        let inner = &*self.inner;
        spinlock::run_exclusive(&inner.record.lock, || {
            // SAFETY: lock held.
            let raw = unsafe { inner.raw_mut() }
                .as_ref()
                .map_or(0, RawValueWindow::memory_bytes);
            inner.record.block_size() + raw
        })
    }

    /// Address of the backing record; the aggregator's identity.
    pub fn addr(&self) -> usize {
        self.inner.record.addr()
    }

    /// Whether some thread is inside this aggregator's critical section
    pub fn is_locked(&self) -> bool {
        spinlock::is_locked(&self.inner.record.lock)
    }

    fn with_raw<R>(&self, f: impl FnOnce(&RawValueWindow) -> Result<R>) -> Result<R> {
        let inner = &*self.inner;
        spinlock::try_run_exclusive(&inner.record.lock, || {
            // SAFETY: lock held.
            match unsafe { inner.raw_mut() }.as_ref() {
                Some(window) => f(window),
                None => Err(TsaggError::invalid_state(format!(
                    "metric {}: raw value retention is disabled",
                    self.id()
                ))),
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn lock_word(&self) -> &AtomicU64 {
        &self.inner.record.lock
    }
}

#[inline]
fn less_than(a: MetricValue, b: MetricValue) -> bool {
    match (a, b) {
        (MetricValue::Integer(a), MetricValue::Integer(b)) => a < b,
        (a, b) => a.as_f64() < b.as_f64(),
    }
}

impl PartialEq for PeriodAggregator {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for PeriodAggregator {}

impl Hash for PeriodAggregator {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for PeriodAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodAggregator")
            .field("id", &self.id())
            .field("kind", &self.numeric_kind())
            .field("stored_kind", &self.stored_kind())
            .field("count", &self.count())
            .field("min", &self.min())
            .field("max", &self.max())
            .field("mean", &self.mean_f64())
            .field("raw_enabled", &self.is_raw_enabled())
            .field("addr", &format_args!("{:#x}", self.addr()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::MemoryConfig;
    use std::thread;

    fn arena() -> NativeArena {
        NativeArena::new(&MemoryConfig {
            alignment: 64,
            tracking: true,
        })
        .unwrap()
    }

    fn window(max: usize) -> RawWindowConfig {
        RawWindowConfig {
            initial_slots: 2,
            resize_slots: 2,
            max_slots: max,
        }
    }

    fn aggregator(kind: NumericKind) -> PeriodAggregator {
        PeriodAggregator::create(&arena(), MetricId(42), kind, &window(8)).unwrap()
    }

    #[test]
    fn test_record_fits_one_cache_line() {
        assert!(std::mem::size_of::<AggregatorRecord>() <= 64);
    }

    #[test]
    fn test_fresh_aggregator_has_sentinels() {
        let agg = aggregator(NumericKind::Integer);

        assert_eq!(agg.id(), MetricId(42));
        assert_eq!(agg.count(), 0);
        assert_eq!(agg.min(), MetricValue::Integer(i64::MAX));
        assert_eq!(agg.max(), MetricValue::Integer(i64::MIN));
        assert!(agg.last_update_time().is_none());

        let agg = aggregator(NumericKind::Float);
        assert_eq!(agg.min(), MetricValue::Float(f64::MAX));
        assert_eq!(agg.max(), MetricValue::Float(f64::MIN));
    }

    #[test]
    fn test_integer_scenario() {
        let agg = aggregator(NumericKind::Integer);
        for v in [10, 20, 30] {
            agg.process_value(v).unwrap();
        }

        assert_eq!(agg.count(), 3);
        assert_eq!(agg.min(), MetricValue::Integer(10));
        assert_eq!(agg.max(), MetricValue::Integer(30));
        assert_eq!(agg.mean_f64(), 20.0);
        assert!(agg.last_update_time().is_some());

        agg.reset().unwrap();
        assert_eq!(agg.count(), 0);

        agg.process_value(5).unwrap();
        assert_eq!(agg.count(), 1);
        assert_eq!(agg.min(), MetricValue::Integer(5));
        assert_eq!(agg.max(), MetricValue::Integer(5));
        assert_eq!(agg.mean(), MetricValue::Integer(5));
    }

    #[test]
    fn test_integer_mean_truncates_on_read() {
        let agg = aggregator(NumericKind::Integer);
        agg.process_value(1).unwrap();
        agg.process_value(2).unwrap();

        assert_eq!(agg.mean_f64(), 1.5);
        assert_eq!(agg.mean(), MetricValue::Integer(1));
    }

    #[test]
    fn test_float_values_into_integer_metric() {
        let agg = aggregator(NumericKind::Integer);
        agg.process_value(7.8).unwrap();
        assert_eq!(agg.min(), MetricValue::Integer(7));
    }

    #[test]
    fn test_incremental_mean_matches_arithmetic_mean() {
        let agg = aggregator(NumericKind::Float);
        let values: Vec<f64> = (0..1000).map(|i| f64::from(i) * 0.37 - 50.0).collect();

        let mut lo = f64::MAX;
        let mut hi = f64::MIN;
        for &v in &values {
            agg.process_value(v).unwrap();
            lo = lo.min(v);
            hi = hi.max(v);
            // min <= every value so far <= max
            assert_eq!(agg.min(), MetricValue::Float(lo));
            assert_eq!(agg.max(), MetricValue::Float(hi));
        }

        let expected = values.iter().sum::<f64>() / values.len() as f64;
        assert!((agg.mean_f64() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_rejected() {
        let agg = aggregator(NumericKind::Float);
        agg.process_value(1.0).unwrap();

        assert!(matches!(agg.process_value(f64::NAN), Err(TsaggError::InvalidArgument(_))));
        assert!(agg.process_value(f64::INFINITY).is_err());
        assert_eq!(agg.count(), 1);
        assert!(!agg.is_locked());
    }

    #[test]
    fn test_reset_on_fresh_is_noop() {
        let agg = aggregator(NumericKind::Float);
        let before = agg.snapshot().unwrap();
        agg.reset().unwrap();
        assert_eq!(agg.snapshot().unwrap(), before);
    }

    #[test]
    fn test_median_requires_raw() {
        let agg = aggregator(NumericKind::Integer);
        agg.process_value(3).unwrap();

        assert!(matches!(agg.median(), Err(TsaggError::InvalidState(_))));
        assert!(agg.raw_values().is_err());
        // Numeric state unaffected by the failed query
        assert_eq!(agg.count(), 1);
    }

    #[test]
    fn test_raw_retention_lifecycle() {
        let agg = aggregator(NumericKind::Integer);
        agg.set_raw_enabled(true).unwrap();
        assert!(agg.is_raw_enabled());
        assert_eq!(agg.median().unwrap(), None);

        for v in [5, 1, 9, 3] {
            agg.process_value(v).unwrap();
        }
        assert_eq!(agg.median().unwrap(), Some(4.0));
        assert_eq!(agg.raw_len().unwrap(), 4);

        // Period rollover keeps the raw window
        agg.reset().unwrap();
        assert_eq!(agg.raw_len().unwrap(), 4);

        agg.set_raw_enabled(false).unwrap();
        assert!(!agg.is_raw_enabled());
        assert!(agg.median().is_err());

        agg.set_raw_enabled(true).unwrap();
        assert_eq!(agg.raw_len().unwrap(), 0);
    }

    #[test]
    fn test_raw_window_bounded() {
        let agg = aggregator(NumericKind::Integer);
        agg.set_raw_enabled(true).unwrap();
        for v in 0..20 {
            agg.process_value(v).unwrap();
        }

        let expected: Vec<MetricValue> = (12..20).map(MetricValue::Integer).collect();
        assert_eq!(agg.raw_values().unwrap(), expected);
        assert_eq!(agg.count(), 20);
    }

    #[test]
    fn test_snapshot_is_consistent() {
        let agg = aggregator(NumericKind::Float);
        agg.set_raw_enabled(true).unwrap();
        agg.process_value(2.0).unwrap();
        agg.process_value(4.0).unwrap();

        let snap = agg.snapshot().unwrap();
        assert_eq!(snap.count, 2);
        assert_eq!(snap.min, MetricValue::Float(2.0));
        assert_eq!(snap.max, MetricValue::Float(4.0));
        assert_eq!(snap.mean, MetricValue::Float(3.0));
        assert_eq!(snap.median, Some(3.0));
        assert!(snap.raw_enabled);
    }

    #[test]
    fn test_identity_by_address() {
        let arena = arena();
        let a = PeriodAggregator::create(&arena, MetricId(1), NumericKind::Float, &window(4)).unwrap();
        let b = PeriodAggregator::create(&arena, MetricId(1), NumericKind::Float, &window(4)).unwrap();

        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_native_memory_released_with_last_handle() {
        let arena = arena();
        let agg = PeriodAggregator::create(&arena, MetricId(7), NumericKind::Integer, &window(4))
            .unwrap();
        let clone = agg.clone();
        assert_eq!(arena.snapshot().unwrap().outstanding_blocks, 1);

        drop(agg);
        assert_eq!(arena.snapshot().unwrap().outstanding_blocks, 1);
        drop(clone);
        assert_eq!(arena.snapshot().unwrap().outstanding_blocks, 0);
    }

    #[test]
    fn test_corrupted_lock_aborts_update() {
        let agg = aggregator(NumericKind::Integer);
        agg.lock_word().store(0xBAD, Ordering::Relaxed);

        assert!(matches!(agg.process_value(1), Err(TsaggError::Corruption(_))));
        assert_eq!(agg.count(), 0);
    }

    #[test]
    fn test_snapshot_reads_kind_tag_from_record() {
        let agg = aggregator(NumericKind::Float);
        agg.process_value(2.5).unwrap();
        assert_eq!(agg.stored_kind(), Some(NumericKind::Float));
        assert_eq!(agg.snapshot().unwrap().kind, NumericKind::Float);

        agg.inner.record.kind.store(9, Ordering::Relaxed);
        assert!(matches!(agg.snapshot(), Err(TsaggError::Corruption(_))));

        agg.inner.record.kind.store(NumericKind::Integer as u8, Ordering::Relaxed);
        assert!(matches!(agg.snapshot(), Err(TsaggError::Corruption(_))));
        // Lock is released on the error path
        assert_eq!(agg.lock_word().load(Ordering::Relaxed), 0);
        assert!(format!("{:?}", agg).contains("stored_kind: Some(Integer)"));
    }

    #[test]
    fn test_concurrent_updates_serialize() {
        let agg = aggregator(NumericKind::Integer);
        let mut handles = vec![];

        for t in 0..8i64 {
            let agg = agg.clone();
            handles.push(thread::spawn(move || {
                for i in 0..1_000i64 {
                    agg.process_value(t * 1_000 + i).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(agg.count(), 8_000);
        assert_eq!(agg.min(), MetricValue::Integer(0));
        assert_eq!(agg.max(), MetricValue::Integer(7_999));
        assert!((agg.mean_f64() - 3_999.5).abs() < 1e-6);
    }
}
