//! Metric kinds and their per-series children.
//!
//! A child is one concrete time series of a collector: its kind-specific numeric state, its
//! publish state, and its flattened label values.  All children embed a [`MetricCore`] and
//! implement [`ChildMetric`], which is the closed capability surface the collector and registry
//! rely on; each kind otherwise owns its private representation and synchronization.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::kind::MetricKind;
use crate::label::LabelKey;
use crate::quantile::Quantile;

mod counter;
mod gauge;
mod histogram;
mod summary;

pub use self::counter::Counter;
pub use self::gauge::Gauge;
pub use self::histogram::{exponential_buckets, linear_buckets, Histogram, HistogramShape};
pub use self::summary::{Summary, SummaryOpts, SummaryShape};

/// A point-in-time, kind-specific snapshot of one child.
///
/// Each variant is internally consistent: a histogram's bucket counts, sum, and count all
/// reflect the same moment, as do a summary's quantile estimates.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    /// Cumulative counter value.
    Counter(f64),
    /// Current gauge value.
    Gauge(f64),
    /// Bucketed histogram state.
    Histogram {
        /// Sum of all observed values.
        sum: f64,
        /// Total number of observations.
        count: u64,
        /// Cumulative `(upper bound, count)` pairs, ending with the implicit `+Inf` bucket.
        buckets: Vec<(f64, u64)>,
    },
    /// Quantile summary state.
    Summary {
        /// Sum of all observed values.
        sum: f64,
        /// Total number of observations.
        count: u64,
        /// Estimated value per configured objective, over the trailing time window.
        quantiles: Vec<(Quantile, f64)>,
    },
}

/// State shared by every child regardless of kind: publish gating and identity.
pub struct MetricCore {
    published: AtomicBool,
    label_values: LabelKey,
}

impl MetricCore {
    pub(crate) fn new(label_values: LabelKey, suppress_initial_value: bool) -> MetricCore {
        MetricCore { published: AtomicBool::new(!suppress_initial_value), label_values }
    }

    /// The child's fully flattened label values: registry static labels, then metric static
    /// labels, then instance labels.
    pub fn label_values(&self) -> &LabelKey {
        &self.label_values
    }

    /// Whether this child is visible to collection.
    pub fn is_published(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }

    /// Makes this child visible to collection.
    ///
    /// Called implicitly by every value-mutating operation; only needed explicitly when a
    /// suppressed child should be exposed before its first mutation.
    pub fn publish(&self) {
        self.published.store(true, Ordering::Release);
    }

    /// Hides this child from collection until it is published again, regardless of its stored
    /// value.
    pub fn unpublish(&self) {
        self.published.store(false, Ordering::Release);
    }
}

/// The capability surface one child exposes to its collector.
///
/// The set of implementors is closed: counters, gauges, histograms, and summaries.
pub trait ChildMetric: Send + Sync + 'static {
    /// Kind-specific construction parameters shared by all children of one collector.
    type Shape: Clone + Send + Sync + 'static;

    /// The metric kind of this child type.
    const KIND: MetricKind;

    /// Creates a fresh, zero-state child.
    fn create(shape: &Self::Shape, core: MetricCore) -> Self;

    /// The shared per-child state.
    fn core(&self) -> &MetricCore;

    /// Takes an internally consistent snapshot of the current value.
    fn snapshot(&self) -> MetricValue;
}
