use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::kind::MetricKind;
use crate::metrics::{ChildMetric, MetricCore, MetricValue};

/// A gauge child: a value that can go up and down.
pub struct Gauge {
    value: AtomicU64,
    core: MetricCore,
}

impl Gauge {
    /// Sets the gauge to `value`.
    pub fn set(&self, value: f64) {
        self.value.store(value.to_bits(), Ordering::Release);
        self.core.publish();
    }

    /// Increments the gauge by `value`.
    pub fn inc_by(&self, value: f64) {
        let _ = self.value.fetch_update(Ordering::AcqRel, Ordering::Relaxed, |curr| {
            Some((f64::from_bits(curr) + value).to_bits())
        });
        self.core.publish();
    }

    /// Increments the gauge by one.
    pub fn inc(&self) {
        self.inc_by(1.0);
    }

    /// Decrements the gauge by `value`.
    pub fn dec_by(&self, value: f64) {
        self.inc_by(-value);
    }

    /// Decrements the gauge by one.
    pub fn dec(&self) {
        self.inc_by(-1.0);
    }

    /// Sets the gauge to the current Unix time, in seconds.
    pub fn set_to_current_time(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.set(now);
    }

    /// The current value.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Acquire))
    }
}

impl ChildMetric for Gauge {
    type Shape = ();

    const KIND: MetricKind = MetricKind::Gauge;

    fn create(_: &Self::Shape, core: MetricCore) -> Gauge {
        Gauge { value: AtomicU64::new(0.0_f64.to_bits()), core }
    }

    fn core(&self) -> &MetricCore {
        &self.core
    }

    fn snapshot(&self) -> MetricValue {
        MetricValue::Gauge(self.get())
    }
}

#[cfg(test)]
mod tests {
    use super::Gauge;
    use crate::label::LabelKey;
    use crate::metrics::{ChildMetric, MetricCore, MetricValue};

    fn gauge() -> Gauge {
        Gauge::create(&(), MetricCore::new(LabelKey::empty(), false))
    }

    #[test]
    fn set_inc_dec() {
        let g = gauge();
        g.set(10.0);
        g.inc();
        g.dec_by(2.5);
        assert_eq!(g.get(), 8.5);
        assert_eq!(g.snapshot(), MetricValue::Gauge(8.5));
    }

    #[test]
    fn negative_values_allowed() {
        let g = gauge();
        g.dec_by(3.0);
        assert_eq!(g.get(), -3.0);
    }

    #[test]
    fn current_time_is_recent() {
        let g = gauge();
        g.set_to_current_time();
        // Some time after 2020-01-01.
        assert!(g.get() > 1_577_836_800.0);
    }
}
