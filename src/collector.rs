//! Metric families and their label-indexed children.
//!
//! A [`Collector`] is one named metric family: a help string, a fixed ordered list of label
//! names, and a map from label-value [`LabelKey`] to child.  Children are created lazily on
//! first access, exactly once per key even under concurrent first access, and can be removed so
//! that a later access yields a fresh, zero-state child.

use std::hash::BuildHasherDefault;
use std::io;
use std::sync::Arc;

use hashbrown::hash_map::RawEntryMut;
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::error::MetricError;
use crate::exposition::{validate_label_name, validate_metric_name, Serializer};
use crate::kind::MetricKind;
use crate::label::{KeyHasher, LabelKey};
use crate::metrics::{ChildMetric, Counter, Gauge, Histogram, MetricCore, Summary};

type ChildMap<C> = HashMap<LabelKey, Arc<C>, BuildHasherDefault<KeyHasher>>;

/// Configuration common to all metric kinds.
#[derive(Clone, Debug)]
pub struct MetricOpts {
    name: String,
    help: String,
    label_names: Vec<String>,
    static_labels: Vec<(String, String)>,
    suppress_initial_value: bool,
}

impl MetricOpts {
    /// Creates options for a metric with the given name and help text.
    pub fn new<N, H>(name: N, help: H) -> MetricOpts
    where
        N: Into<String>,
        H: Into<String>,
    {
        MetricOpts {
            name: name.into(),
            help: help.into(),
            label_names: Vec::new(),
            static_labels: Vec::new(),
            suppress_initial_value: false,
        }
    }

    /// Declares the ordered instance label names for this metric.
    pub fn label_names<I, S>(mut self, names: I) -> MetricOpts
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.label_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a static label applied to every child of this metric.
    pub fn static_label<N, V>(mut self, name: N, value: V) -> MetricOpts
    where
        N: Into<String>,
        V: Into<String>,
    {
        self.static_labels.push((name.into(), value.into()));
        self
    }

    /// Keeps children out of collection output until their first mutation or an explicit
    /// publish.
    pub fn suppress_initial_value(mut self) -> MetricOpts {
        self.suppress_initial_value = true;
        self
    }

    /// The metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared instance label names.
    pub fn labels(&self) -> &[String] {
        &self.label_names
    }
}

/// One named metric family and its children.
pub struct Collector<C: ChildMetric> {
    name: String,
    help: String,
    label_names: Box<[String]>,
    // Registry static names, then metric static names, then instance names; shared structure
    // with other collectors built against the same registry prefix.
    flat_label_names: LabelKey,
    // Registry static values followed by metric static values; the prefix of every child's
    // flattened label values.
    static_values: LabelKey,
    suppress_initial_value: bool,
    shape: C::Shape,
    children: RwLock<ChildMap<C>>,
}

impl<C: ChildMetric> Collector<C> {
    /// Creates a collector, validating the metric name and the full label-name set.
    ///
    /// `registry_statics` are the registry-wide static labels; collisions between them, the
    /// metric's own static labels, and the instance label names are configuration errors.
    pub(crate) fn new(
        opts: MetricOpts,
        shape: C::Shape,
        registry_statics: &[(String, String)],
    ) -> Result<Arc<Collector<C>>, MetricError> {
        validate_metric_name(&opts.name)?;

        let mut seen: Vec<&str> = Vec::new();
        let all_names = registry_statics
            .iter()
            .map(|(name, _)| name)
            .chain(opts.static_labels.iter().map(|(name, _)| name))
            .chain(opts.label_names.iter());
        for name in all_names {
            validate_label_name(name)?;
            if reserved_for_kind(C::KIND, name) {
                return Err(MetricError::ReservedLabelName(name.clone()));
            }
            if seen.contains(&name.as_str()) {
                return Err(MetricError::DuplicateLabelName(name.clone()));
            }
            seen.push(name);
        }

        let flat_label_names = LabelKey::from_values(opts.label_names.iter().cloned())
            .prepend(opts.static_labels.iter().map(|(name, _)| name.clone()))
            .prepend(registry_statics.iter().map(|(name, _)| name.clone()));

        let static_values = LabelKey::from_values(
            registry_statics.iter().map(|(_, value)| value.clone()),
        )
        .concat(&LabelKey::from_values(
            opts.static_labels.iter().map(|(_, value)| value.clone()),
        ));

        let collector = Arc::new(Collector {
            name: opts.name,
            help: opts.help,
            label_names: opts.label_names.into_boxed_slice(),
            flat_label_names,
            static_values,
            suppress_initial_value: opts.suppress_initial_value,
            shape,
            children: RwLock::new(ChildMap::default()),
        });

        // A metric without label names has exactly one series; materialize it up front so it
        // shows up in collection output immediately (publish state permitting).
        if collector.label_names.is_empty() {
            let _ = collector.with_key(&LabelKey::empty())?;
        }

        Ok(collector)
    }

    /// The metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The help text.
    pub fn help(&self) -> &str {
        &self.help
    }

    /// The declared instance label names.
    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    /// Builds the child key for the given label values, checking arity.
    pub fn key_for<S: AsRef<str>>(&self, values: &[S]) -> Result<LabelKey, MetricError> {
        if values.len() != self.label_names.len() {
            return Err(MetricError::LabelCountMismatch {
                expected: self.label_names.len(),
                actual: values.len(),
            });
        }

        Ok(LabelKey::from_values(values.iter().map(|v| v.as_ref().to_owned())))
    }

    /// Gets or creates the child for the given label values.
    ///
    /// Equal values always resolve to the same child instance; under concurrent first access
    /// exactly one child is created.
    pub fn with_labels<S: AsRef<str>>(&self, values: &[S]) -> Result<Arc<C>, MetricError> {
        let key = self.key_for(values)?;
        self.with_key(&key)
    }

    /// Gets or creates the child for a precomputed key.
    ///
    /// This is the allocation-free lookup path for callers that cache their [`LabelKey`]s.
    pub fn with_key(&self, key: &LabelKey) -> Result<Arc<C>, MetricError> {
        if key.len() != self.label_names.len() {
            return Err(MetricError::LabelCountMismatch {
                expected: self.label_names.len(),
                actual: key.len(),
            });
        }

        let hash = key.get_hash();

        // Fast path: the child already exists.
        {
            let children = self.children.read();
            if let Some((_, child)) = children.raw_entry().from_key_hashed_nocheck(hash, key) {
                return Ok(child.clone());
            }
        }

        // Re-check under the write lock so concurrent first accesses agree on one instance.
        let mut children = self.children.write();
        let entry = children.raw_entry_mut().from_key_hashed_nocheck(hash, key);
        let child = match entry {
            RawEntryMut::Occupied(entry) => entry.get().clone(),
            RawEntryMut::Vacant(entry) => {
                let child = self.create_child(key);
                entry.insert_hashed_nocheck(hash, key.clone(), child.clone());
                child
            }
        };

        Ok(child)
    }

    /// The unlabelled child of a metric with no declared label names.
    pub fn unlabelled(&self) -> Result<Arc<C>, MetricError> {
        if !self.label_names.is_empty() {
            return Err(MetricError::LabelsRequired { name: self.name.clone() });
        }

        self.with_key(&LabelKey::empty())
    }

    /// Removes the child for the given label values.
    ///
    /// Returns `true` if a child existed.  A later access with the same values yields a brand
    /// new, zero-state child; the removed instance is never resurrected.
    pub fn remove<S: AsRef<str>>(&self, values: &[S]) -> Result<bool, MetricError> {
        let key = self.key_for(values)?;
        Ok(self.remove_key(&key))
    }

    /// Removes the child for a precomputed key.
    pub fn remove_key(&self, key: &LabelKey) -> bool {
        let hash = key.get_hash();
        let mut children = self.children.write();
        let entry = children.raw_entry_mut().from_key_hashed_nocheck(hash, key);
        if let RawEntryMut::Occupied(entry) = entry {
            let _ = entry.remove_entry();
            return true;
        }

        false
    }

    /// Removes every child.
    pub fn clear(&self) {
        self.children.write().clear();
        if self.label_names.is_empty() {
            let _ = self.with_key(&LabelKey::empty());
        }
    }

    /// Number of live children (diagnostic).
    pub fn child_count(&self) -> usize {
        self.children.read().len()
    }

    /// Serializes this family: one declaration, then one line per published child.
    ///
    /// Children are snapshotted outside the map lock; each snapshot is internally consistent
    /// but no cross-child consistency is promised.
    pub fn collect<S: Serializer + ?Sized>(&self, serializer: &mut S) -> io::Result<()> {
        serializer.write_family_declaration(&self.name, &self.help, C::KIND)?;

        let children: Vec<Arc<C>> = {
            let children = self.children.read();
            children.values().filter(|c| c.core().is_published()).cloned().collect()
        };

        for child in children {
            serializer.write_metric(
                &self.name,
                &self.flat_label_names,
                child.core().label_values(),
                &child.snapshot(),
            )?;
        }

        Ok(())
    }

    fn create_child(&self, key: &LabelKey) -> Arc<C> {
        let label_values = self.static_values.concat(key);
        let core = MetricCore::new(label_values, self.suppress_initial_value);
        Arc::new(C::create(&self.shape, core))
    }
}

fn reserved_for_kind(kind: MetricKind, name: &str) -> bool {
    match kind {
        MetricKind::Histogram => name == "le",
        MetricKind::Summary => name == "quantile",
        _ => false,
    }
}

/// A registered collector of any kind.
///
/// The set of metric kinds is closed, so dynamic dispatch across them is a plain enum rather
/// than an open trait hierarchy.
#[derive(Clone)]
pub enum AnyCollector {
    /// A counter family.
    Counter(Arc<Collector<Counter>>),
    /// A gauge family.
    Gauge(Arc<Collector<Gauge>>),
    /// A histogram family.
    Histogram(Arc<Collector<Histogram>>),
    /// A summary family.
    Summary(Arc<Collector<Summary>>),
}

impl AnyCollector {
    /// The metric kind.
    pub fn kind(&self) -> MetricKind {
        match self {
            AnyCollector::Counter(_) => MetricKind::Counter,
            AnyCollector::Gauge(_) => MetricKind::Gauge,
            AnyCollector::Histogram(_) => MetricKind::Histogram,
            AnyCollector::Summary(_) => MetricKind::Summary,
        }
    }

    /// The metric name.
    pub fn name(&self) -> &str {
        match self {
            AnyCollector::Counter(c) => c.name(),
            AnyCollector::Gauge(c) => c.name(),
            AnyCollector::Histogram(c) => c.name(),
            AnyCollector::Summary(c) => c.name(),
        }
    }

    /// The declared instance label names.
    pub fn label_names(&self) -> &[String] {
        match self {
            AnyCollector::Counter(c) => c.label_names(),
            AnyCollector::Gauge(c) => c.label_names(),
            AnyCollector::Histogram(c) => c.label_names(),
            AnyCollector::Summary(c) => c.label_names(),
        }
    }

    /// Serializes this family and its published children.
    pub fn collect<S: Serializer + ?Sized>(&self, serializer: &mut S) -> io::Result<()> {
        match self {
            AnyCollector::Counter(c) => c.collect(serializer),
            AnyCollector::Gauge(c) => c.collect(serializer),
            AnyCollector::Histogram(c) => c.collect(serializer),
            AnyCollector::Summary(c) => c.collect(serializer),
        }
    }

    /// Removes every child of this collector.
    pub fn clear(&self) {
        match self {
            AnyCollector::Counter(c) => c.clear(),
            AnyCollector::Gauge(c) => c.clear(),
            AnyCollector::Histogram(c) => c.clear(),
            AnyCollector::Summary(c) => c.clear(),
        }
    }
}
