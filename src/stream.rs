//! Streaming quantile estimation.
//!
//! [`QuantileStream`] answers "what value sits at rank phi" over an unbounded series of
//! observations while retaining only a compressed subset of them.  It follows the
//! Cormode-Korn-Muthukrishnan-Srivastava construction: each retained sample carries the value,
//! the local rank width it covers, and the allowed rank uncertainty (delta) at the position it
//! was inserted.  Adjacent samples are merged whenever their combined uncertainty still honors
//! the configured error invariant, which bounds memory to `O(log(epsilon * n) / epsilon)`
//! samples instead of `O(n)`.
//!
//! Three invariants are supported: *targeted* (explicit quantile/error pairs, tightest near the
//! targets), *low-biased* (relative error, tight at low quantiles), and *high-biased* (the
//! mirror of low-biased).

use std::sync::Arc;

use crate::quantile::QuantileEpsilonPair;

/// One compressed sample: the observed value, the number of observations it stands in for, and
/// the rank uncertainty it was admitted with.
#[derive(Clone, Copy, Debug)]
struct Sample {
    value: f64,
    width: f64,
    delta: f64,
}

/// The error invariant governing how aggressively samples may be merged.
#[derive(Clone, Debug)]
pub enum Invariant {
    /// Tightest error around an explicit set of target quantiles.
    Targeted(Arc<[QuantileEpsilonPair]>),
    /// Relative-error invariant favoring accurate low quantiles.
    LowBiased(f64),
    /// Relative-error invariant favoring accurate high quantiles.
    HighBiased(f64),
}

impl Invariant {
    /// The allowed rank uncertainty at observed rank `rank` out of `n` observations.
    fn allowed_error(&self, n: f64, rank: f64) -> f64 {
        match self {
            Invariant::Targeted(targets) => {
                let mut min = f64::MAX;
                for target in targets.iter() {
                    let f = if target.quantile * n <= rank {
                        2.0 * target.epsilon * rank / target.quantile
                    } else {
                        2.0 * target.epsilon * (n - rank) / (1.0 - target.quantile)
                    };
                    if f < min {
                        min = f;
                    }
                }
                min
            }
            Invariant::LowBiased(epsilon) => 2.0 * epsilon * rank,
            Invariant::HighBiased(epsilon) => 2.0 * epsilon * (n - rank),
        }
    }
}

/// Tuning parameters for a [`QuantileStream`].
///
/// `buffer_capacity` controls how many raw observations are held before being sorted, merged
/// into the compressed sample list, and compressed.  Larger buffers amortize merge cost at the
/// price of a larger flush; there is no single canonical value across implementations of this
/// algorithm family, so it is exposed here rather than hard-coded.
#[derive(Clone, Copy, Debug)]
pub struct StreamConfig {
    /// Number of buffered observations that triggers a merge/compress pass.
    pub buffer_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> StreamConfig {
        StreamConfig { buffer_capacity: 500 }
    }
}

/// A streaming, compressed quantile estimator.
///
/// Observations are buffered and periodically folded into a sorted, compressed sample list.
/// Queries flush the buffer first, so they always reflect every insertion made so far.
pub struct QuantileStream {
    invariant: Invariant,
    samples: Vec<Sample>,
    // Total rank weight merged into `samples`; tracked as f64 because the invariant functions
    // operate on fractional ranks.
    n: f64,
    count: u64,
    buffer: Vec<f64>,
    buffer_capacity: usize,
}

impl QuantileStream {
    /// Creates a stream with the given invariant and default configuration.
    pub fn new(invariant: Invariant) -> QuantileStream {
        QuantileStream::with_config(invariant, StreamConfig::default())
    }

    /// Creates a stream with the given invariant and configuration.
    pub fn with_config(invariant: Invariant, config: StreamConfig) -> QuantileStream {
        let buffer_capacity = config.buffer_capacity.max(1);

        QuantileStream {
            invariant,
            samples: Vec::new(),
            n: 0.0,
            count: 0,
            buffer: Vec::with_capacity(buffer_capacity),
            buffer_capacity,
        }
    }

    /// Creates a stream targeting an explicit set of quantile/error objectives.
    pub fn targeted(objectives: Arc<[QuantileEpsilonPair]>) -> QuantileStream {
        QuantileStream::new(Invariant::Targeted(objectives))
    }

    /// Creates a stream optimized for accurate low quantiles.
    pub fn low_biased(epsilon: f64) -> QuantileStream {
        QuantileStream::new(Invariant::LowBiased(epsilon))
    }

    /// Creates a stream optimized for accurate high quantiles.
    pub fn high_biased(epsilon: f64) -> QuantileStream {
        QuantileStream::new(Invariant::HighBiased(epsilon))
    }

    /// Inserts an observation.
    ///
    /// The value lands in the insertion buffer; once the buffer reaches its configured capacity,
    /// the buffered values are sorted and merged into the compressed sample list.
    pub fn insert(&mut self, value: f64) {
        self.buffer.push(value);
        self.count += 1;

        if self.buffer.len() >= self.buffer_capacity {
            self.flush();
        }
    }

    /// Queries the estimated value at quantile `phi`.
    ///
    /// Returns `0.0` when no observations have been inserted.  A stream holding a single value
    /// returns that value exactly for every `phi`.
    pub fn query(&mut self, phi: f64) -> f64 {
        self.flush();

        if self.samples.is_empty() {
            return 0.0;
        }

        let mut target = (phi * self.n).ceil();
        target += (self.invariant.allowed_error(self.n, target) / 2.0).ceil();

        let mut prev = self.samples[0];
        let mut rank = 0.0;
        for &cur in &self.samples[1..] {
            rank += prev.width;
            if rank + cur.width + cur.delta > target {
                return prev.value;
            }
            prev = cur;
        }

        prev.value
    }

    /// Exact number of logical insertions made so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Number of compressed samples currently retained (diagnostic).
    pub fn sample_count(&self) -> usize {
        self.samples.len() + self.buffer.len()
    }

    /// Whether the stream has seen no observations.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Clears all state, returning the stream to its freshly-created condition.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.buffer.clear();
        self.n = 0.0;
        self.count = 0;
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.sort_by(f64::total_cmp);
        self.merge(&buffer);
        buffer.clear();
        self.buffer = buffer;

        self.compress();
    }

    /// Folds a sorted batch of values into the sample list, assigning each the rank uncertainty
    /// the invariant allows at its insertion point.  The first and last samples always carry a
    /// delta of zero so the stream's extremes stay exact.
    fn merge(&mut self, sorted: &[f64]) {
        let mut rank = 0.0;
        let mut i = 0;

        for &value in sorted {
            while i < self.samples.len() && self.samples[i].value <= value {
                rank += self.samples[i].width;
                i += 1;
            }

            let delta = if i == 0 || i == self.samples.len() {
                0.0
            } else {
                (self.invariant.allowed_error(self.n, rank)).floor() - 1.0
            };

            self.samples.insert(i, Sample { value, width: 1.0, delta });
            i += 1;
            self.n += 1.0;
        }
    }

    /// Merges adjacent samples whose combined rank uncertainty still satisfies the invariant.
    fn compress(&mut self) {
        if self.samples.len() < 2 {
            return;
        }

        let mut xi = self.samples.len() - 1;
        let mut rank = self.n - 1.0 - self.samples[xi].width;
        let mut i = xi;

        while i > 0 {
            i -= 1;
            let c = self.samples[i];
            let x = self.samples[xi];

            if c.width + x.width + x.delta <= self.invariant.allowed_error(self.n, rank) {
                self.samples[xi].width += c.width;
                self.samples.remove(i);
                xi -= 1;
            } else {
                xi = i;
            }

            rank -= c.width;
        }
    }
}
