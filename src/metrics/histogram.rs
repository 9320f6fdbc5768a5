use std::sync::Arc;

use parking_lot::Mutex;
use quanta::Clock;

use crate::error::MetricError;
use crate::kind::MetricKind;
use crate::metrics::{ChildMetric, MetricCore, MetricValue};

/// Validated construction parameters shared by all children of one histogram collector.
#[derive(Clone)]
pub struct HistogramShape {
    bounds: Arc<[f64]>,
    clock: Clock,
}

impl HistogramShape {
    /// Validates `bounds` and builds a shape over them.
    pub fn new(bounds: &[f64]) -> Result<HistogramShape, MetricError> {
        HistogramShape::with_clock(bounds, Clock::new())
    }

    /// Like [`new`](HistogramShape::new), but with an explicit clock so duration observations
    /// can be driven by [`quanta::Clock::mock`] in tests.
    pub fn with_clock(bounds: &[f64], clock: Clock) -> Result<HistogramShape, MetricError> {
        Ok(HistogramShape { bounds: validate_buckets(bounds)?, clock })
    }

    /// The configured upper bounds, excluding the implicit `+Inf`.
    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }
}

/// A bucketed histogram child.
///
/// Tracks the number of observations at or below each configured upper bound, plus the exact sum
/// and count.  State lives behind a single narrow mutex so that a snapshot always sees bucket
/// counts, sum, and count from the same moment; the critical section is a handful of arithmetic
/// operations and never allocates.
pub struct Histogram {
    bounds: Arc<[f64]>,
    clock: Clock,
    inner: Mutex<Inner>,
    core: MetricCore,
}

struct Inner {
    // Per-bound counts, non-cumulative; accumulated into cumulative form at snapshot time.
    buckets: Vec<u64>,
    sum: f64,
    count: u64,
}

impl Histogram {
    /// Records one observation.
    ///
    /// NaN observations are dropped: not bucketed, not counted, not summed.
    pub fn observe(&self, value: f64) {
        if value.is_nan() {
            return;
        }

        {
            let mut inner = self.inner.lock();
            inner.sum += value;
            inner.count += 1;
            let idx = self.bounds.partition_point(|b| value > *b);
            if idx < inner.buckets.len() {
                inner.buckets[idx] += 1;
            }
            // Values above the last bound land only in the implicit +Inf bucket, i.e. the count.
        }

        self.core.publish();
    }

    /// Runs `f` and records its duration, in seconds, measured on the shape's clock.
    pub fn observe_duration<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = self.clock.now();
        let result = f();
        self.observe((self.clock.now() - start).as_secs_f64());
        result
    }

    /// The configured upper bounds, excluding the implicit `+Inf`.
    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }
}

impl ChildMetric for Histogram {
    type Shape = HistogramShape;

    const KIND: MetricKind = MetricKind::Histogram;

    fn create(shape: &Self::Shape, core: MetricCore) -> Histogram {
        Histogram {
            bounds: shape.bounds.clone(),
            clock: shape.clock.clone(),
            inner: Mutex::new(Inner {
                buckets: vec![0; shape.bounds.len()],
                sum: 0.0,
                count: 0,
            }),
            core,
        }
    }

    fn core(&self) -> &MetricCore {
        &self.core
    }

    fn snapshot(&self) -> MetricValue {
        let inner = self.inner.lock();

        let mut cumulative = 0;
        let mut buckets = Vec::with_capacity(self.bounds.len() + 1);
        for (bound, count) in self.bounds.iter().zip(inner.buckets.iter()) {
            cumulative += count;
            buckets.push((*bound, cumulative));
        }
        buckets.push((f64::INFINITY, inner.count));

        MetricValue::Histogram { sum: inner.sum, count: inner.count, buckets }
    }
}

/// Validates histogram bucket bounds: non-empty, finite, strictly increasing.
fn validate_buckets(bounds: &[f64]) -> Result<Arc<[f64]>, MetricError> {
    if bounds.is_empty() {
        return Err(MetricError::InvalidBuckets);
    }
    for window in bounds.windows(2) {
        if !(window[0] < window[1]) {
            return Err(MetricError::InvalidBuckets);
        }
    }
    if bounds.iter().any(|b| !b.is_finite()) {
        return Err(MetricError::InvalidBuckets);
    }

    Ok(Arc::from(bounds))
}

/// Generates `count` bucket bounds, starting at `start` and spaced `width` apart.
pub fn linear_buckets(start: f64, width: f64, count: usize) -> Result<Vec<f64>, MetricError> {
    if count == 0 || width <= 0.0 {
        return Err(MetricError::InvalidBuckets);
    }

    Ok((0..count).map(|i| start + width * i as f64).collect())
}

/// Generates `count` bucket bounds, starting at `start` and growing by `factor` each step.
pub fn exponential_buckets(start: f64, factor: f64, count: usize) -> Result<Vec<f64>, MetricError> {
    if count == 0 || start <= 0.0 || factor <= 1.0 {
        return Err(MetricError::InvalidBuckets);
    }

    let mut bounds = Vec::with_capacity(count);
    let mut bound = start;
    for _ in 0..count {
        bounds.push(bound);
        bound *= factor;
    }
    Ok(bounds)
}
