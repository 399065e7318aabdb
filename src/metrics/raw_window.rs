//! Sliding raw-value window for median and percentile queries.
//!
//! The window starts at `initial_slots`, grows by `resize_slots` whenever
//! the current allocation is exhausted, and stops growing at `max_slots`.
//! From then on it behaves as a ring: each append overwrites the oldest
//! sample, so the newest value is never dropped.
//!
//! The window is not synchronized. Its owning aggregator only touches it
//! while holding the record's lock word.

use crate::core::config::RawWindowConfig;
use crate::core::{MetricValue, NumericKind, Result, TsaggError};

/// A numeric sample the window can hold.
pub trait Sample: Copy + Send + 'static {
    /// Sort ascending in place
    fn sort(values: &mut [Self]);
    /// Widen for statistics
    fn to_f64(self) -> f64;
}

impl Sample for i64 {
    fn sort(values: &mut [Self]) {
        values.sort_unstable();
    }

    #[allow(clippy::cast_precision_loss)]
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Sample for f64 {
    fn sort(values: &mut [Self]) {
        values.sort_unstable_by(f64::total_cmp);
    }

    fn to_f64(self) -> f64 {
        self
    }
}

/// Growable ring of samples of one numeric type.
#[derive(Debug, Clone)]
pub struct SampleRing<T: Sample> {
    buffer: Vec<T>,
    /// Index of the oldest sample once the ring has wrapped
    head: usize,
    /// Slots reserved so far; grows in `resize_slots` steps up to `max_slots`
    allocated: usize,
    resize_slots: usize,
    max_slots: usize,
}

impl<T: Sample> SampleRing<T> {
    /// Create a ring with `initial_slots` reserved
    pub fn new(config: &RawWindowConfig) -> Result<Self> {
        if config.max_slots == 0 {
            return Err(TsaggError::invalid_argument("raw window ceiling must be greater than 0"));
        }
        let initial = config.initial_slots.clamp(1, config.max_slots);

        let mut buffer = Vec::new();
        reserve(&mut buffer, initial)?;

        Ok(Self {
            buffer,
            head: 0,
            allocated: initial,
            resize_slots: config.resize_slots,
            max_slots: config.max_slots,
        })
    }

    /// Append a sample, growing or evicting the oldest as needed.
    pub fn append(&mut self, value: T) -> Result<()> {
        if self.buffer.len() == self.max_slots {
            self.buffer[self.head] = value;
            self.head = (self.head + 1) % self.max_slots;
            return Ok(());
        }

        if self.buffer.len() == self.allocated {
            let target = self
                .allocated
                .saturating_add(self.resize_slots.max(1))
                .min(self.max_slots);
            let additional = target - self.buffer.len();
            reserve(&mut self.buffer, additional)?;
            self.allocated = target;
        }

        self.buffer.push(value);
        Ok(())
    }

    /// Number of retained samples
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True when nothing is retained
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Whether the ring has reached its ceiling and now evicts on append
    pub fn is_full(&self) -> bool {
        self.buffer.len() == self.max_slots
    }

    /// Slots currently reserved
    pub fn allocated_slots(&self) -> usize {
        self.allocated
    }

    /// Hard ceiling
    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    /// Retained samples, oldest first
    pub fn values(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.buffer.len());
        out.extend_from_slice(&self.buffer[self.head..]);
        out.extend_from_slice(&self.buffer[..self.head]);
        out
    }

    /// Median of the retained samples; even counts average the middle pair
    pub fn median(&self) -> Option<f64> {
        if self.buffer.is_empty() {
            return None;
        }

        let mut sorted = self.buffer.clone();
        T::sort(&mut sorted);

        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 1 {
            Some(sorted[mid].to_f64())
        } else {
            Some((sorted[mid - 1].to_f64() + sorted[mid].to_f64()) / 2.0)
        }
    }

    /// Nearest-rank percentile, `p` in `[0, 100]`
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn percentile(&self, p: f64) -> Result<Option<f64>> {
        if !(0.0..=100.0).contains(&p) {
            return Err(TsaggError::invalid_argument(format!(
                "percentile must be within [0, 100], got {}",
                p
            )));
        }
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let mut sorted = self.buffer.clone();
        T::sort(&mut sorted);

        let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        let index = rank.saturating_sub(1).min(sorted.len() - 1);
        Ok(Some(sorted[index].to_f64()))
    }

    /// Drop all samples, keeping the current allocation
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.head = 0;
    }

    /// Heap bytes reserved by the ring
    pub fn memory_bytes(&self) -> usize {
        self.buffer.capacity() * std::mem::size_of::<T>()
    }
}

fn reserve<T>(buffer: &mut Vec<T>, additional: usize) -> Result<()> {
    buffer.try_reserve_exact(additional).map_err(|_| TsaggError::OutOfMemory {
        requested: additional.saturating_mul(std::mem::size_of::<T>()),
    })
}

/// Kind-matching raw value retention for one aggregator.
#[derive(Debug, Clone)]
pub enum RawValueWindow {
    /// Window of an integer metric
    Integer(SampleRing<i64>),
    /// Window of a float metric
    Float(SampleRing<f64>),
}

impl RawValueWindow {
    /// Create an empty window for `kind`
    pub fn new(kind: NumericKind, config: &RawWindowConfig) -> Result<Self> {
        Ok(match kind {
            NumericKind::Integer => RawValueWindow::Integer(SampleRing::new(config)?),
            NumericKind::Float => RawValueWindow::Float(SampleRing::new(config)?),
        })
    }

    /// Append a value, converted to the window's kind
    pub fn append(&mut self, value: MetricValue) -> Result<()> {
        match self {
            RawValueWindow::Integer(ring) => ring.append(value.as_i64()),
            RawValueWindow::Float(ring) => ring.append(value.as_f64()),
        }
    }

    /// Numeric kind of the retained values
    pub fn kind(&self) -> NumericKind {
        match self {
            RawValueWindow::Integer(_) => NumericKind::Integer,
            RawValueWindow::Float(_) => NumericKind::Float,
        }
    }

    /// Retained sample count
    pub fn len(&self) -> usize {
        match self {
            RawValueWindow::Integer(ring) => ring.len(),
            RawValueWindow::Float(ring) => ring.len(),
        }
    }

    /// True when nothing is retained
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retained values, oldest first
    pub fn values(&self) -> Vec<MetricValue> {
        match self {
            RawValueWindow::Integer(ring) => {
                ring.values().into_iter().map(MetricValue::Integer).collect()
            },
            RawValueWindow::Float(ring) => {
                ring.values().into_iter().map(MetricValue::Float).collect()
            },
        }
    }

    /// Median of the retained values
    pub fn median(&self) -> Option<f64> {
        match self {
            RawValueWindow::Integer(ring) => ring.median(),
            RawValueWindow::Float(ring) => ring.median(),
        }
    }

    /// Nearest-rank percentile, `p` in `[0, 100]`
    pub fn percentile(&self, p: f64) -> Result<Option<f64>> {
        match self {
            RawValueWindow::Integer(ring) => ring.percentile(p),
            RawValueWindow::Float(ring) => ring.percentile(p),
        }
    }

    /// Drop every retained value
    pub fn clear(&mut self) {
        match self {
            RawValueWindow::Integer(ring) => ring.clear(),
            RawValueWindow::Float(ring) => ring.clear(),
        }
    }

    /// Heap bytes held by the buffer
    pub fn memory_bytes(&self) -> usize {
        match self {
            RawValueWindow::Integer(ring) => ring.memory_bytes(),
            RawValueWindow::Float(ring) => ring.memory_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(initial: usize, resize: usize, max: usize) -> RawWindowConfig {
        RawWindowConfig {
            initial_slots: initial,
            resize_slots: resize,
            max_slots: max,
        }
    }

    #[test]
    fn test_ring_creation() {
        let ring = SampleRing::<i64>::new(&config(4, 4, 16)).unwrap();

        assert_eq!(ring.len(), 0);
        assert!(ring.is_empty());
        assert!(!ring.is_full());
        assert_eq!(ring.allocated_slots(), 4);
        assert_eq!(ring.median(), None);
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        assert!(SampleRing::<f64>::new(&config(0, 0, 0)).is_err());
    }

    #[test]
    fn test_growth_by_increment() {
        let mut ring = SampleRing::<i64>::new(&config(2, 3, 10)).unwrap();

        for i in 0..3 {
            ring.append(i).unwrap();
        }
        assert_eq!(ring.allocated_slots(), 5);

        for i in 3..6 {
            ring.append(i).unwrap();
        }
        assert_eq!(ring.allocated_slots(), 8);

        for i in 6..9 {
            ring.append(i).unwrap();
        }
        // Last step is capped at the ceiling
        assert_eq!(ring.allocated_slots(), 10);
        assert_eq!(ring.values(), (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn test_eviction_keeps_most_recent() {
        let mut ring = SampleRing::<i64>::new(&config(2, 2, 4)).unwrap();

        for i in 0..11 {
            ring.append(i).unwrap();
            assert!(ring.len() <= 4);
        }

        assert!(ring.is_full());
        assert_eq!(ring.allocated_slots(), 4);
        assert_eq!(ring.values(), vec![7, 8, 9, 10]);
    }

    #[test]
    fn test_fixed_size_window() {
        let mut ring = SampleRing::<f64>::new(&config(3, 0, 3)).unwrap();
        for v in [1.0, 2.0, 3.0, 4.0] {
            ring.append(v).unwrap();
        }
        assert_eq!(ring.values(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_median_odd_and_even() {
        let mut ring = SampleRing::<i64>::new(&config(8, 8, 8)).unwrap();
        for v in [9, 1, 5] {
            ring.append(v).unwrap();
        }
        assert_eq!(ring.median(), Some(5.0));

        ring.append(2).unwrap();
        assert_eq!(ring.median(), Some(3.5));
    }

    #[test]
    fn test_median_after_wraparound() {
        let mut ring = SampleRing::<f64>::new(&config(3, 3, 3)).unwrap();
        for v in [100.0, 200.0, 1.0, 2.0, 3.0] {
            ring.append(v).unwrap();
        }
        assert_eq!(ring.median(), Some(2.0));
    }

    #[test]
    fn test_percentile() {
        let mut ring = SampleRing::<f64>::new(&config(16, 16, 16)).unwrap();
        for v in 1..=10 {
            ring.append(f64::from(v)).unwrap();
        }

        assert_eq!(ring.percentile(50.0).unwrap(), Some(5.0));
        assert_eq!(ring.percentile(95.0).unwrap(), Some(10.0));
        assert_eq!(ring.percentile(0.0).unwrap(), Some(1.0));
        assert!(ring.percentile(101.0).is_err());
    }

    #[test]
    fn test_clear() {
        let mut ring = SampleRing::<i64>::new(&config(2, 2, 2)).unwrap();
        for v in 0..5 {
            ring.append(v).unwrap();
        }
        ring.clear();

        assert!(ring.is_empty());
        ring.append(42).unwrap();
        assert_eq!(ring.values(), vec![42]);
    }

    #[test]
    fn test_window_coerces_to_kind() {
        let mut window = RawValueWindow::new(NumericKind::Integer, &config(4, 4, 4)).unwrap();
        window.append(MetricValue::Float(2.9)).unwrap();
        window.append(MetricValue::Integer(4)).unwrap();

        assert_eq!(window.kind(), NumericKind::Integer);
        assert_eq!(window.values(), vec![MetricValue::Integer(2), MetricValue::Integer(4)]);
        assert_eq!(window.median(), Some(3.0));
    }
}
