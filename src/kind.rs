use std::fmt;
use std::ops::BitOr;

/// Metric kind.
///
/// Defines the kind, or type, of a metric family:
/// - counters
/// - gauges
/// - histograms
/// - summaries
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum MetricKind {
    /// Counter type.
    Counter,
    /// Gauge type.
    Gauge,
    /// Histogram type.
    Histogram,
    /// Summary type.
    Summary,
}

impl MetricKind {
    /// The kind's name as used in family declarations.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metric kind mask.
///
/// Useful for matching against a kind, or kinds, of metrics, such as scoping the expiry sweep to
/// a subset of kinds.  Masks combine in a bitwise fashion via `|`, and inclusion of a specific
/// kind is checked via [`matches`](MetricKindMask::matches).
#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy, Ord, PartialOrd)]
pub struct MetricKindMask(u8);

impl MetricKindMask {
    /// No metric kinds.
    pub const NONE: MetricKindMask = MetricKindMask(0);

    /// The counter kind.
    pub const COUNTER: MetricKindMask = MetricKindMask(1);

    /// The gauge kind.
    pub const GAUGE: MetricKindMask = MetricKindMask(2);

    /// The histogram kind.
    pub const HISTOGRAM: MetricKindMask = MetricKindMask(4);

    /// The summary kind.
    pub const SUMMARY: MetricKindMask = MetricKindMask(8);

    /// All metric kinds.
    pub const ALL: MetricKindMask = MetricKindMask(15);

    #[inline]
    fn value(&self) -> u8 {
        self.0
    }

    /// Whether or not this mask contains the specified kind.
    pub fn matches(&self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Counter => self.0 & MetricKindMask::COUNTER.value() != 0,
            MetricKind::Gauge => self.0 & MetricKindMask::GAUGE.value() != 0,
            MetricKind::Histogram => self.0 & MetricKindMask::HISTOGRAM.value() != 0,
            MetricKind::Summary => self.0 & MetricKindMask::SUMMARY.value() != 0,
        }
    }
}

impl BitOr for MetricKindMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}
