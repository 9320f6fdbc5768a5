use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::MetricError;
use crate::kind::MetricKind;
use crate::metrics::{ChildMetric, MetricCore, MetricValue};

/// A monotonically increasing counter child.
///
/// The value is stored as the bit pattern of an `f64` inside an `AtomicU64`, so increments stay
/// lock-free and the hot path allocates nothing.
pub struct Counter {
    value: AtomicU64,
    core: MetricCore,
}

impl Counter {
    /// Increments the counter by one.
    pub fn inc(&self) {
        self.add(1.0);
        self.core.publish();
    }

    /// Increments the counter by `value`.
    ///
    /// Counters only go up: a negative or NaN increment is a usage error and leaves the value
    /// untouched.
    pub fn inc_by(&self, value: f64) -> Result<(), MetricError> {
        if !(value >= 0.0) {
            return Err(MetricError::NegativeIncrement(value));
        }

        self.add(value);
        self.core.publish();
        Ok(())
    }

    /// The current value.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Acquire))
    }

    fn add(&self, value: f64) {
        let _ = self.value.fetch_update(Ordering::AcqRel, Ordering::Relaxed, |curr| {
            Some((f64::from_bits(curr) + value).to_bits())
        });
    }
}

impl ChildMetric for Counter {
    type Shape = ();

    const KIND: MetricKind = MetricKind::Counter;

    fn create(_: &Self::Shape, core: MetricCore) -> Counter {
        Counter { value: AtomicU64::new(0.0_f64.to_bits()), core }
    }

    fn core(&self) -> &MetricCore {
        &self.core
    }

    fn snapshot(&self) -> MetricValue {
        MetricValue::Counter(self.get())
    }
}
