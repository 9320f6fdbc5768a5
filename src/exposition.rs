//! The boundary between the engine and exposition writers.
//!
//! Wire formats themselves live outside this crate; the engine only guarantees that it calls a
//! [`Serializer`] once per metric family and once per published child, in family-then-metric
//! order, with the fully flattened label set.  This module also carries the name validation and
//! value sanitization rules of the Prometheus [data model], which back the configuration checks
//! performed at metric construction.
//!
//! [data model]: https://prometheus.io/docs/concepts/data_model/#metric-names-and-labels

use std::io;

use crate::error::MetricError;
use crate::kind::MetricKind;
use crate::label::LabelKey;
use crate::metrics::MetricValue;

/// A sink for collected metric snapshots.
///
/// Implementations own the wire format (text, OpenMetrics, ...); the engine owns the ordering
/// and the publish gating.  `write_metric` is only ever called for published children, and
/// `label_names`/`label_values` always have equal length and include the registry- and
/// metric-level static labels ahead of the instance labels.
pub trait Serializer {
    /// Writes the declaration of a metric family: its name, help text, and kind.
    fn write_family_declaration(
        &mut self,
        name: &str,
        help: &str,
        kind: MetricKind,
    ) -> io::Result<()>;

    /// Writes one time series belonging to the most recently declared family.
    fn write_metric(
        &mut self,
        name: &str,
        label_names: &LabelKey,
        label_values: &LabelKey,
        value: &MetricValue,
    ) -> io::Result<()>;
}

/// Validates a metric name against the Prometheus data model.
///
/// The first character must be `[a-zA-Z_:]`, and all subsequent characters must be
/// `[a-zA-Z0-9_:]`.
pub fn validate_metric_name(name: &str) -> Result<(), MetricError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) => {
            valid_metric_name_start_character(c) && chars.all(valid_metric_name_character)
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(MetricError::InvalidMetricName(name.to_string()))
    }
}

/// Validates a label name against the Prometheus data model.
///
/// The first character must be `[a-zA-Z_]`, all subsequent characters must be `[a-zA-Z0-9_]`,
/// and names beginning with `__` are reserved for internal use.
pub fn validate_label_name(name: &str) -> Result<(), MetricError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) => valid_label_name_start_character(c) && chars.all(valid_label_name_character),
        None => false,
    };

    if !valid {
        return Err(MetricError::InvalidLabelName(name.to_string()));
    }

    if name.starts_with("__") {
        return Err(MetricError::ReservedLabelName(name.to_string()));
    }

    Ok(())
}

/// Escapes a label value for use in exposition output.
///
/// All Unicode characters are valid in label values, but backslashes, double quotes, and line
/// feeds must be escaped.
pub fn sanitize_label_value(value: &str) -> String {
    sanitize_value_or_help(value, false)
}

/// Escapes a help string for use in exposition output.
///
/// Same rules as [`sanitize_label_value`], except double quotes are left as-is.
pub fn sanitize_help(value: &str) -> String {
    sanitize_value_or_help(value, true)
}

fn sanitize_value_or_help(value: &str, is_help: bool) -> String {
    let mut sanitized = String::with_capacity(value.len());

    let mut previous_backslash = false;
    for c in value.chars() {
        match c {
            '\n' => sanitized.push_str("\\n"),
            '"' if !is_help => {
                previous_backslash = false;
                sanitized.push_str("\\\"");
            }
            // A backslash either escapes something that follows or has itself been escaped; if
            // the previous character was a backslash, this one completes an escaped pair.
            '\\' => {
                if previous_backslash {
                    sanitized.push_str("\\\\");
                }
                previous_backslash = !previous_backslash;
            }
            c => {
                if previous_backslash {
                    previous_backslash = false;
                    sanitized.push_str("\\\\");
                }
                sanitized.push(c);
            }
        }
    }

    if previous_backslash {
        sanitized.push_str("\\\\");
    }

    sanitized
}

#[inline]
fn valid_metric_name_start_character(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

#[inline]
fn valid_metric_name_character(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

#[inline]
fn valid_label_name_start_character(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

#[inline]
fn valid_label_name_character(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
