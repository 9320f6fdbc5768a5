//! Error types.
//!
//! Configuration and usage errors ([`MetricError`]) represent programmer error: they surface
//! synchronously at the offending call and are never retried internally.  Collection-time
//! failures ([`ScrapeError`]) are reported to the collection caller, which decides the
//! user-visible behavior; an aborted scrape produces no partial output.

use std::io;

use thiserror::Error;

use crate::kind::MetricKind;

/// Errors raised while configuring or using metrics.
#[derive(Debug, Error)]
pub enum MetricError {
    /// The metric name contains characters outside `[a-zA-Z0-9_:]` or starts with a digit.
    #[error("invalid metric name '{0}'")]
    InvalidMetricName(String),

    /// The label name contains characters outside `[a-zA-Z0-9_]` or starts with a digit.
    #[error("invalid label name '{0}'")]
    InvalidLabelName(String),

    /// The label name is reserved, either globally (`__` prefix) or by the metric kind.
    #[error("label name '{0}' is reserved")]
    ReservedLabelName(String),

    /// The same label name was declared more than once across instance and static labels.
    #[error("duplicate label name '{0}'")]
    DuplicateLabelName(String),

    /// The number of label values did not match the declared label names.
    #[error("expected {expected} label value(s), got {actual}")]
    LabelCountMismatch {
        /// Number of declared label names.
        expected: usize,
        /// Number of values supplied.
        actual: usize,
    },

    /// A metric with this name is already registered with a different set of label names.
    #[error("metric '{name}' is already registered with a different label set")]
    LabelSetMismatch {
        /// The metric name.
        name: String,
    },

    /// A metric with this name is already registered as a different kind.
    #[error("metric '{name}' is already registered as a {existing} metric")]
    KindMismatch {
        /// The metric name.
        name: String,
        /// The kind of the already-registered metric.
        existing: MetricKind,
    },

    /// A static label name collides with another static or instance label name.
    #[error("static label '{0}' collides with an existing label name")]
    StaticLabelCollision(String),

    /// Static labels were set more than once, or after registration/collection started.
    #[error("static labels may only be set once, before any metric is registered or collected")]
    StaticLabelsSealed,

    /// A counter was incremented by a negative (or NaN) amount.
    #[error("counter increments must be non-negative, got {0}")]
    NegativeIncrement(f64),

    /// The unlabelled child was requested on a metric that declares label names.
    #[error("metric '{name}' declares labels; use with_labels() instead of the unlabelled child")]
    LabelsRequired {
        /// The metric name.
        name: String,
    },

    /// Histogram bucket bounds were empty, unsorted, or non-finite.
    #[error("histogram buckets must be non-empty, finite, and strictly increasing")]
    InvalidBuckets,

    /// The summary window was too short for its bucket count, leaving zero-length slices.
    #[error("summary max_age divided by age_buckets must be a nonzero duration")]
    InvalidWindow,

    /// A summary objective was outside the open unit interval.
    #[error("summary objective ({quantile}, {epsilon}) must satisfy 0 < quantile < 1 and 0 < epsilon < 1")]
    InvalidObjective {
        /// Target quantile.
        quantile: f64,
        /// Allowed rank error.
        epsilon: f64,
    },
}

/// Errors raised during a collection pass.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// A before-collect callback signalled that this scrape must be abandoned.
    ///
    /// The diagnostic message is intended to be surfaced to the scraper, e.g. as the body of a
    /// 503 response.  No metric output is produced for the aborted pass.
    #[error("scrape aborted: {0}")]
    Aborted(String),

    /// The serializer failed to write output.
    #[error("failed to write exposition output: {0}")]
    Io(#[from] io::Error),
}

impl ScrapeError {
    /// Creates a scrape-abort error with the given diagnostic message.
    pub fn aborted<S: Into<String>>(reason: S) -> ScrapeError {
        ScrapeError::Aborted(reason.into())
    }
}
