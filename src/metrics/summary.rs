use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use quanta::{Clock, Instant};

use crate::error::MetricError;
use crate::kind::MetricKind;
use crate::metrics::{ChildMetric, MetricCore, MetricValue};
use crate::quantile::{Quantile, QuantileEpsilonPair};
use crate::stream::{Invariant, QuantileStream, StreamConfig};

/// Configuration for a summary metric.
#[derive(Clone, Debug)]
pub struct SummaryOpts {
    /// Target quantiles and their allowed rank errors.
    pub objectives: Vec<QuantileEpsilonPair>,
    /// Length of the sliding time window the quantiles describe.
    pub max_age: Duration,
    /// Number of overlapping window slices; more buckets smooth the window roll-over at the
    /// cost of duplicating every observation into each slice.
    pub age_buckets: usize,
    /// Capacity of the hot observation buffer; a full buffer triggers a flush into the streams.
    pub buf_cap: usize,
    /// Clock used for window rotation.  Replaceable with [`quanta::Clock::mock`] in tests.
    pub clock: Clock,
}

impl Default for SummaryOpts {
    fn default() -> SummaryOpts {
        SummaryOpts {
            objectives: vec![
                QuantileEpsilonPair { quantile: 0.5, epsilon: 0.05 },
                QuantileEpsilonPair { quantile: 0.9, epsilon: 0.01 },
                QuantileEpsilonPair { quantile: 0.99, epsilon: 0.001 },
            ],
            max_age: Duration::from_secs(600),
            age_buckets: 5,
            buf_cap: 500,
            clock: Clock::new(),
        }
    }
}

impl SummaryOpts {
    pub(crate) fn validate(&self) -> Result<SummaryShape, MetricError> {
        for objective in &self.objectives {
            // Re-run the constructor checks; the pair fields are public.
            QuantileEpsilonPair::new(objective.quantile, objective.epsilon)?;
        }

        // Each age bucket covers max_age / age_buckets; a zero-length slice would make the
        // window rotation loop unable to advance past the current instant.
        let age_buckets = self.age_buckets.max(1);
        self.max_age
            .checked_div(age_buckets as u32)
            .filter(|slice| !slice.is_zero())
            .ok_or(MetricError::InvalidWindow)?;

        Ok(SummaryShape {
            objectives: Arc::from(self.objectives.clone()),
            max_age: self.max_age,
            age_buckets,
            buf_cap: self.buf_cap.max(1),
            clock: self.clock.clone(),
        })
    }
}

/// Validated construction parameters shared by all children of one summary collector.
#[derive(Clone)]
pub struct SummaryShape {
    objectives: Arc<[QuantileEpsilonPair]>,
    max_age: Duration,
    age_buckets: usize,
    buf_cap: usize,
    clock: Clock,
}

/// A quantile summary child over a sliding time window.
///
/// Observations land in a small "hot" buffer under a narrow append lock, keeping the `observe`
/// hot path short even while a flush or snapshot holds the coarser stream lock.  When the hot
/// buffer fills, its deadline passes, or a snapshot is taken, the hot and cold buffers are
/// swapped and the cold contents are folded into every age bucket's quantile stream; sum and
/// count accumulate at that point.
///
/// The window is modelled as `age_buckets` parallel streams, each begun one slice apart.  Every
/// observation goes into all of them, and only the oldest ("head") stream answers queries, so
/// the reported quantiles always describe roughly the trailing `max_age`.  When the clock
/// crosses a slice boundary the head stream is reset and the head advances.
pub struct Summary {
    shape: SummaryShape,
    slice: Duration,
    hot: Mutex<HotBuffer>,
    cold: Mutex<ColdState>,
    core: MetricCore,
}

struct HotBuffer {
    values: Vec<f64>,
    deadline: Option<Instant>,
}

struct ColdState {
    streams: Vec<QuantileStream>,
    head: usize,
    head_deadline: Instant,
    sum: f64,
    count: u64,
    // Swap partner for the hot buffer, reused across flushes.
    spare: Vec<f64>,
}

impl Summary {
    /// Records one observation.
    ///
    /// NaN observations are dropped entirely: not streamed, not counted, not summed.
    pub fn observe(&self, value: f64) {
        if value.is_nan() {
            return;
        }

        let now = self.shape.clock.now();
        let flush_needed = {
            let mut hot = self.hot.lock();
            hot.values.push(value);
            let deadline = *hot.deadline.get_or_insert(now + self.slice);
            hot.values.len() >= self.shape.buf_cap || now >= deadline
        };

        if flush_needed {
            let mut cold = self.cold.lock();
            self.flush(&mut cold, now);
        }

        self.core.publish();
    }

    /// The configured objectives.
    pub fn objectives(&self) -> &[QuantileEpsilonPair] {
        &self.shape.objectives
    }

    /// Swaps the hot buffer out and folds its contents into every age bucket's stream.
    ///
    /// Callers must hold the cold lock; the hot lock is taken only for the swap itself.
    fn flush(&self, cold: &mut ColdState, now: Instant) {
        {
            let mut hot = self.hot.lock();
            std::mem::swap(&mut hot.values, &mut cold.spare);
            hot.deadline = None;
        }

        self.rotate(cold, now);

        let mut spare = std::mem::take(&mut cold.spare);
        for &value in &spare {
            for stream in &mut cold.streams {
                stream.insert(value);
            }
            cold.sum += value;
            cold.count += 1;
        }
        spare.clear();
        cold.spare = spare;
    }

    /// Advances the head past any window slices the clock has crossed, resetting each expired
    /// stream so it starts accumulating a fresh window.
    fn rotate(&self, cold: &mut ColdState, now: Instant) {
        while now >= cold.head_deadline {
            cold.streams[cold.head].reset();
            cold.head = (cold.head + 1) % cold.streams.len();
            cold.head_deadline = cold.head_deadline + self.slice;
        }
    }
}

impl ChildMetric for Summary {
    type Shape = SummaryShape;

    const KIND: MetricKind = MetricKind::Summary;

    fn create(shape: &Self::Shape, core: MetricCore) -> Summary {
        let slice = shape.max_age / shape.age_buckets as u32;
        let now = shape.clock.now();

        let streams = (0..shape.age_buckets)
            .map(|_| {
                QuantileStream::with_config(
                    Invariant::Targeted(shape.objectives.clone()),
                    StreamConfig { buffer_capacity: shape.buf_cap },
                )
            })
            .collect();

        Summary {
            shape: shape.clone(),
            slice,
            hot: Mutex::new(HotBuffer {
                values: Vec::with_capacity(shape.buf_cap),
                deadline: None,
            }),
            cold: Mutex::new(ColdState {
                streams,
                head: 0,
                head_deadline: now + slice,
                sum: 0.0,
                count: 0,
                spare: Vec::with_capacity(shape.buf_cap),
            }),
            core,
        }
    }

    fn core(&self) -> &MetricCore {
        &self.core
    }

    fn snapshot(&self) -> MetricValue {
        let now = self.shape.clock.now();
        let mut cold = self.cold.lock();
        self.flush(&mut cold, now);

        let head = cold.head;
        let objectives = self.shape.objectives.clone();
        let quantiles = objectives
            .iter()
            .map(|o| (Quantile::new(o.quantile), cold.streams[head].query(o.quantile)))
            .collect();

        MetricValue::Summary { sum: cold.sum, count: cold.count, quantiles }
    }
}
