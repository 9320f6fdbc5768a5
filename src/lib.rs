//! An in-process metrics instrumentation engine.
//!
//! Application code registers metric families with a [`Registry`], gets children back for
//! specific label values, and mutates them on the hot path; a scrape transport periodically
//! runs a collection pass that snapshots every published child into a [`Serializer`].  The
//! engine owns naming, label handling, child lifecycle, and value semantics; wire formats and
//! transports live outside it.
//!
//! Four metric kinds are supported: monotonically increasing [`Counter`]s, free-moving
//! [`Gauge`]s, bucketed [`Histogram`]s, and windowed quantile [`Summary`] metrics backed by a
//! compressed streaming estimator ([`QuantileStream`]).
//!
//! # Usage
//!
//! ```
//! use pyrometer::{MetricOpts, Registry};
//!
//! # fn main() -> Result<(), pyrometer::MetricError> {
//! let registry = Registry::new();
//! let requests = registry.register_counter(
//!     MetricOpts::new("http_requests_total", "Total HTTP requests.")
//!         .label_names(["method", "status"]),
//! )?;
//!
//! requests.with_labels(&["get", "200"])?.inc();
//! # Ok(())
//! # }
//! ```
//!
//! Hot-path handles are cheap to clone and free of locks for counters and gauges; callers
//! with a fixed label set should resolve their child once and keep the handle.  For label
//! sets that come and go, [`ExpiringCollector`] bounds cardinality by removing children that
//! have gone unused for a configured duration.

mod collector;
mod error;
mod expire;
mod exposition;
mod kind;
mod label;
mod metrics;
mod quantile;
mod registry;
mod stream;

pub use self::collector::{AnyCollector, Collector, MetricOpts};
pub use self::error::{MetricError, ScrapeError};
pub use self::expire::{ExpiringCollector, LeaseGuard};
pub use self::exposition::{
    sanitize_help, sanitize_label_value, validate_label_name, validate_metric_name, Serializer,
};
pub use self::kind::{MetricKind, MetricKindMask};
pub use self::label::{KeyHasher, LabelKey, SharedString};
pub use self::metrics::{
    exponential_buckets, linear_buckets, ChildMetric, Counter, Gauge, Histogram, HistogramShape,
    MetricCore, MetricValue, Summary, SummaryOpts, SummaryShape,
};
pub use self::quantile::{parse_quantiles, Quantile, QuantileEpsilonPair};
pub use self::registry::{default_registry, Registry};
pub use self::stream::{Invariant, QuantileStream, StreamConfig};
