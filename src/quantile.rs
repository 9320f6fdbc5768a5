use crate::error::MetricError;

/// A quantile that has both the raw value and a human-friendly display label.
///
/// We work with quantiles for optimal floating-point precision over percentiles, but most of the
/// time, monitoring systems show us percentiles, and usually in an abbreviated form: `p99`.
///
/// On top of holding the quantile value, we calculate the familiar "p99" style of label, doing
/// the appropriate percentile conversion.  Thus, if you have a quantile of `0.99`, the resulting
/// label is `p99`, and if you have a quantile of `0.999`, the resulting label is `p999`.
///
/// There are two special cases, where we label `0.0` and `1.0` as `min` and `max`, respectively.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantile(f64, String);

impl Quantile {
    /// Creates a new [`Quantile`] from a floating-point value.
    ///
    /// All values are clamped between 0.0 and 1.0.
    pub fn new(quantile: f64) -> Quantile {
        let clamped = quantile.clamp(0.0, 1.0);
        let display = clamped * 100.0;

        let raw_label = format!("{}", clamped);
        let label = match raw_label.as_str() {
            "0" => "min".to_string(),
            "1" => "max".to_string(),
            _ => {
                let raw = format!("p{}", display);
                raw.replace('.', "")
            }
        };

        Quantile(clamped, label)
    }

    /// Gets the human-friendly display label.
    pub fn label(&self) -> &str {
        self.1.as_str()
    }

    /// Gets the raw quantile value.
    pub fn value(&self) -> f64 {
        self.0
    }
}

/// Parses a slice of floating-point values into a vector of [`Quantile`]s.
pub fn parse_quantiles(quantiles: &[f64]) -> Vec<Quantile> {
    quantiles.iter().map(|f| Quantile::new(*f)).collect()
}

/// A target quantile paired with its allowed absolute rank error.
///
/// An objective of `(0.99, 0.001)` asks the estimator to answer the 99th percentile with the
/// reported rank off by no more than 0.1% of the observations seen so far.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuantileEpsilonPair {
    /// The target quantile, in the open interval (0.0, 1.0).
    pub quantile: f64,
    /// The allowed absolute rank error, in the open interval (0.0, 1.0).
    pub epsilon: f64,
}

impl QuantileEpsilonPair {
    /// Creates a new objective, validating both components.
    pub fn new(quantile: f64, epsilon: f64) -> Result<QuantileEpsilonPair, MetricError> {
        if !(quantile > 0.0 && quantile < 1.0) || !(epsilon > 0.0 && epsilon < 1.0) {
            return Err(MetricError::InvalidObjective { quantile, epsilon });
        }

        Ok(QuantileEpsilonPair { quantile, epsilon })
    }
}
