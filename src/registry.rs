//! The registry: the named set of collectors that a collection pass walks.
//!
//! Registration is idempotent for an identical definition and an error for a conflicting one,
//! so any component can call `register_*` with its own definition and share the collector that
//! results.  Collection walks collectors in registration order, running the registered
//! before-collect callbacks first; if any callback fails the pass is abandoned before a single
//! byte of output is written.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

use crate::collector::{AnyCollector, Collector, MetricOpts};
use crate::error::{MetricError, ScrapeError};
use crate::exposition::{validate_label_name, Serializer};
use crate::kind::MetricKindMask;
use crate::metrics::{
    ChildMetric, Counter, Gauge, Histogram, HistogramShape, Summary, SummaryOpts,
};

type SyncCallback = Box<dyn Fn() -> Result<(), ScrapeError> + Send + Sync>;
type AsyncCallback =
    Box<dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), ScrapeError>> + Send>> + Send + Sync>;

static DEFAULT_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// The process-wide default registry.
pub fn default_registry() -> &'static Registry {
    &DEFAULT_REGISTRY
}

/// A named set of collectors.
pub struct Registry {
    // Lock order: `static_labels` before `collectors`; never the reverse.
    static_labels: RwLock<Option<Vec<(String, String)>>>,
    collectors: RwLock<IndexMap<String, AnyCollector>>,
    collected: AtomicBool,
    callbacks: Mutex<Vec<SyncCallback>>,
    async_callbacks: Mutex<Vec<AsyncCallback>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Registry {
        Registry {
            static_labels: RwLock::new(None),
            collectors: RwLock::new(IndexMap::new()),
            collected: AtomicBool::new(false),
            callbacks: Mutex::new(Vec::new()),
            async_callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Sets the registry-wide static labels, applied ahead of every collector's own labels.
    ///
    /// May only be called once, and only before any metric is registered or any collection
    /// pass has run; afterwards the flattened label layout of existing children would silently
    /// diverge from new ones.
    pub fn set_static_labels<I, N, V>(&self, labels: I) -> Result<(), MetricError>
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        let labels: Vec<(String, String)> =
            labels.into_iter().map(|(n, v)| (n.into(), v.into())).collect();
        for (i, (name, _)) in labels.iter().enumerate() {
            validate_label_name(name)?;
            if labels[..i].iter().any(|(seen, _)| seen == name) {
                return Err(MetricError::StaticLabelCollision(name.clone()));
            }
        }

        let mut statics = self.static_labels.write();
        let collectors = self.collectors.read();
        if statics.is_some() || !collectors.is_empty() || self.collected.load(Ordering::Acquire)
        {
            return Err(MetricError::StaticLabelsSealed);
        }

        *statics = Some(labels);
        Ok(())
    }

    /// Registers a counter, or returns the existing collector if one with the same name and
    /// label names is already registered.
    pub fn register_counter(
        &self,
        opts: MetricOpts,
    ) -> Result<Arc<Collector<Counter>>, MetricError> {
        self.register(opts, (), AnyCollector::Counter, |any| match any {
            AnyCollector::Counter(c) => Some(c),
            _ => None,
        })
    }

    /// Registers a gauge, or returns the existing collector on an identical definition.
    pub fn register_gauge(&self, opts: MetricOpts) -> Result<Arc<Collector<Gauge>>, MetricError> {
        self.register(opts, (), AnyCollector::Gauge, |any| match any {
            AnyCollector::Gauge(c) => Some(c),
            _ => None,
        })
    }

    /// Registers a histogram with the given bucket upper bounds, or returns the existing
    /// collector on an identical definition.
    pub fn register_histogram(
        &self,
        opts: MetricOpts,
        buckets: &[f64],
    ) -> Result<Arc<Collector<Histogram>>, MetricError> {
        let shape = HistogramShape::new(buckets)?;
        self.register(opts, shape, AnyCollector::Histogram, |any| match any {
            AnyCollector::Histogram(c) => Some(c),
            _ => None,
        })
    }

    /// Registers a summary with the given objectives and window configuration, or returns the
    /// existing collector on an identical definition.
    pub fn register_summary(
        &self,
        opts: MetricOpts,
        summary_opts: SummaryOpts,
    ) -> Result<Arc<Collector<Summary>>, MetricError> {
        let shape = summary_opts.validate()?;
        self.register(opts, shape, AnyCollector::Summary, |any| match any {
            AnyCollector::Summary(c) => Some(c),
            _ => None,
        })
    }

    /// Removes the collector with the given name.  Returns `true` if one existed.
    ///
    /// Its children and any outstanding handles to them stay alive, but they no longer appear
    /// in collection output.
    pub fn unregister(&self, name: &str) -> bool {
        self.collectors.write().shift_remove(name).is_some()
    }

    /// Removes every child of every collector whose kind matches `mask`.
    ///
    /// The families stay registered; their series restart from zero on next access.
    pub fn clear_matching(&self, mask: MetricKindMask) {
        let collectors = self.collectors.read();
        for collector in collectors.values() {
            if mask.matches(collector.kind()) {
                collector.clear();
            }
        }
    }

    /// Looks up a registered collector by name.
    pub fn get(&self, name: &str) -> Option<AnyCollector> {
        self.collectors.read().get(name).cloned()
    }

    /// Number of registered collectors.
    pub fn len(&self) -> usize {
        self.collectors.read().len()
    }

    /// Whether no collectors are registered.
    pub fn is_empty(&self) -> bool {
        self.collectors.read().is_empty()
    }

    /// Registers a callback that runs at the start of every collection pass.
    ///
    /// Callbacks are the hook for just-in-time gauge updates.  A returned error aborts the
    /// pass before any output is written.
    pub fn add_before_collect_callback<F>(&self, callback: F)
    where
        F: Fn() -> Result<(), ScrapeError> + Send + Sync + 'static,
    {
        self.callbacks.lock().push(Box::new(callback));
    }

    /// Registers an async before-collect callback, for updates that need to await.
    pub fn add_async_before_collect_callback<F, Fut>(&self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ScrapeError>> + Send + 'static,
    {
        self.async_callbacks.lock().push(Box::new(move || {
            Box::pin(callback())
                as Pin<Box<dyn Future<Output = Result<(), ScrapeError>> + Send>>
        }));
    }

    /// Runs one collection pass: callbacks first, then every collector in registration order.
    ///
    /// If any callback fails the pass is abandoned with no output written, so a transport can
    /// turn the error into e.g. a 503 without emitting a truncated payload.  Cancelling the
    /// returned future (dropping it, or racing it against a timeout) likewise abandons the
    /// pass; collectors are only walked after every callback has completed.
    pub async fn collect_and_serialize<S: Serializer + ?Sized>(
        &self,
        serializer: &mut S,
    ) -> Result<(), ScrapeError> {
        self.collected.store(true, Ordering::Release);

        {
            let callbacks = self.callbacks.lock();
            for callback in callbacks.iter() {
                if let Err(err) = callback() {
                    tracing::debug!(error = %err, "collection pass aborted by callback");
                    return Err(err);
                }
            }
        }

        // Materialize the futures under the lock, await them outside it.
        let pending: Vec<_> = {
            let callbacks = self.async_callbacks.lock();
            callbacks.iter().map(|callback| callback()).collect()
        };
        for future in pending {
            if let Err(err) = future.await {
                tracing::debug!(error = %err, "collection pass aborted by async callback");
                return Err(err);
            }
        }

        let collectors: Vec<AnyCollector> =
            self.collectors.read().values().cloned().collect();
        for collector in &collectors {
            collector.collect(serializer)?;
        }

        Ok(())
    }

    fn register<C, W, U>(
        &self,
        opts: MetricOpts,
        shape: C::Shape,
        wrap: W,
        unwrap: U,
    ) -> Result<Arc<Collector<C>>, MetricError>
    where
        C: ChildMetric,
        W: FnOnce(Arc<Collector<C>>) -> AnyCollector,
        U: Fn(&AnyCollector) -> Option<&Arc<Collector<C>>>,
    {
        {
            let collectors = self.collectors.read();
            if let Some(existing) = collectors.get(opts.name()) {
                return reuse_existing::<C, U>(existing, &opts, &unwrap);
            }
        }

        // Hold the statics guard across the insert so a concurrent set_static_labels cannot
        // slip in between reading the prefix and registering a collector built without it.
        let statics = self.static_labels.read();
        let mut collectors = self.collectors.write();
        if let Some(existing) = collectors.get(opts.name()) {
            return reuse_existing::<C, U>(existing, &opts, &unwrap);
        }

        let name = opts.name().to_string();
        let collector = Collector::new(opts, shape, statics.as_deref().unwrap_or(&[]))?;
        collectors.insert(name, wrap(collector.clone()));
        Ok(collector)
    }
}

impl Default for Registry {
    fn default() -> Registry {
        Registry::new()
    }
}

fn reuse_existing<C, U>(
    existing: &AnyCollector,
    opts: &MetricOpts,
    unwrap: &U,
) -> Result<Arc<Collector<C>>, MetricError>
where
    C: ChildMetric,
    U: Fn(&AnyCollector) -> Option<&Arc<Collector<C>>>,
{
    let collector = match unwrap(existing) {
        Some(collector) => collector,
        None => {
            return Err(MetricError::KindMismatch {
                name: opts.name().to_string(),
                existing: existing.kind(),
            })
        }
    };

    if collector.label_names() != opts.labels() {
        return Err(MetricError::LabelSetMismatch { name: opts.name().to_string() });
    }

    Ok(collector.clone())
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::{default_registry, Registry};
    use crate::collector::MetricOpts;
    use crate::error::{MetricError, ScrapeError};
    use crate::exposition::Serializer;
    use crate::kind::MetricKind;
    use crate::label::LabelKey;
    use crate::metrics::{MetricValue, SummaryOpts};

    #[derive(Default)]
    struct Recording {
        families: Vec<String>,
        metrics: Vec<(String, Vec<String>, Vec<String>)>,
    }

    impl Serializer for Recording {
        fn write_family_declaration(
            &mut self,
            name: &str,
            _help: &str,
            _kind: MetricKind,
        ) -> io::Result<()> {
            self.families.push(name.to_string());
            Ok(())
        }

        fn write_metric(
            &mut self,
            name: &str,
            label_names: &LabelKey,
            label_values: &LabelKey,
            _value: &MetricValue,
        ) -> io::Result<()> {
            self.metrics.push((
                name.to_string(),
                label_names.iter().map(|s| s.to_string()).collect(),
                label_values.iter().map(|s| s.to_string()).collect(),
            ));
            Ok(())
        }
    }

    #[test]
    fn identical_registration_shares_collector() {
        let registry = Registry::new();
        let opts = || MetricOpts::new("hits_total", "Hits.").label_names(["route"]);

        let first = registry.register_counter(opts()).unwrap();
        let second = registry.register_counter(opts()).unwrap();
        assert!(std::sync::Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn conflicting_registration_rejected() {
        let registry = Registry::new();
        registry
            .register_counter(MetricOpts::new("hits_total", "Hits.").label_names(["route"]))
            .unwrap();

        assert!(matches!(
            registry.register_gauge(MetricOpts::new("hits_total", "Hits.")),
            Err(MetricError::KindMismatch { existing: MetricKind::Counter, .. })
        ));
        assert!(matches!(
            registry.register_counter(MetricOpts::new("hits_total", "Hits.")),
            Err(MetricError::LabelSetMismatch { .. })
        ));
    }

    #[test]
    fn unregister_removes_from_output() {
        let registry = Registry::new();
        registry.register_counter(MetricOpts::new("a_total", "A.")).unwrap();
        assert!(registry.unregister("a_total"));
        assert!(!registry.unregister("a_total"));
        assert!(registry.is_empty());
    }

    #[test]
    fn static_labels_sealed_after_registration() {
        let registry = Registry::new();
        registry.register_counter(MetricOpts::new("a_total", "A.")).unwrap();
        assert!(matches!(
            registry.set_static_labels([("region", "eu")]),
            Err(MetricError::StaticLabelsSealed)
        ));

        let fresh = Registry::new();
        fresh.set_static_labels([("region", "eu")]).unwrap();
        assert!(matches!(
            fresh.set_static_labels([("zone", "a")]),
            Err(MetricError::StaticLabelsSealed)
        ));
    }

    #[test]
    fn clear_matching_resets_only_masked_kinds() {
        use crate::kind::MetricKindMask;

        let registry = Registry::new();
        let counter = registry
            .register_counter(MetricOpts::new("hits_total", "Hits.").label_names(["route"]))
            .unwrap();
        counter.with_labels(&["/a"]).unwrap().inc();
        let gauge = registry.register_gauge(MetricOpts::new("temp", "Temp.")).unwrap();
        gauge.unlabelled().unwrap().set(5.0);

        registry.clear_matching(MetricKindMask::COUNTER);

        assert_eq!(counter.child_count(), 0);
        assert_eq!(gauge.unlabelled().unwrap().get(), 5.0);
    }

    #[test]
    fn static_label_collision_detected() {
        let registry = Registry::new();
        assert!(matches!(
            registry.set_static_labels([("region", "eu"), ("region", "us")]),
            Err(MetricError::StaticLabelCollision(_))
        ));
    }

    #[test]
    fn registration_and_static_labels_agree_under_race() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        for _ in 0..200 {
            let registry = Arc::new(Registry::new());
            let barrier = Arc::new(Barrier::new(2));

            let handle = {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.register_counter(MetricOpts::new("hits_total", "Hits.")).ok()
                })
            };
            barrier.wait();
            let statics_set = registry.set_static_labels([("region", "eu")]).is_ok();
            let collector = handle.join().unwrap();

            // When both calls succeed the static labels were set first, so the collector
            // must carry them in its flattened label names; a collector registered without
            // the prefix forces set_static_labels to fail instead.
            if let (Some(collector), true) = (collector, statics_set) {
                let mut out = Recording::default();
                collector.collect(&mut out).unwrap();
                assert_eq!(out.metrics[0].1, vec!["region".to_string()]);
            }
        }
    }

    #[test]
    fn instance_label_clashing_with_registry_static_rejected() {
        let registry = Registry::new();
        registry.set_static_labels([("region", "eu")]).unwrap();

        assert!(matches!(
            registry.register_counter(
                MetricOpts::new("hits_total", "Hits.").label_names(["region"])
            ),
            Err(MetricError::DuplicateLabelName(_))
        ));
        // The failed registration leaves nothing behind.
        assert!(registry.get("hits_total").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn collect_walks_registration_order() {
        let registry = Registry::new();
        registry.set_static_labels([("region", "eu")]).unwrap();

        let counter = registry
            .register_counter(
                MetricOpts::new("hits_total", "Hits.")
                    .label_names(["route"])
                    .static_label("service", "api"),
            )
            .unwrap();
        counter.with_labels(&["/index"]).unwrap().inc();

        registry.register_gauge(MetricOpts::new("temp", "Temp.")).unwrap();

        let mut out = Recording::default();
        registry.collect_and_serialize(&mut out).await.unwrap();

        assert_eq!(out.families, vec!["hits_total", "temp"]);
        assert_eq!(
            out.metrics[0],
            (
                "hits_total".to_string(),
                vec!["region".to_string(), "service".to_string(), "route".to_string()],
                vec!["eu".to_string(), "api".to_string(), "/index".to_string()],
            )
        );
    }

    #[tokio::test]
    async fn callback_failure_aborts_without_output() {
        let registry = Registry::new();
        let counter = registry.register_counter(MetricOpts::new("a_total", "A.")).unwrap();
        counter.unlabelled().unwrap().inc();

        registry.add_before_collect_callback(|| Err(ScrapeError::aborted("backend down")));

        let mut out = Recording::default();
        let err = registry.collect_and_serialize(&mut out).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Aborted(_)));
        assert!(out.families.is_empty());
        assert!(out.metrics.is_empty());
    }

    #[tokio::test]
    async fn async_callback_runs_before_serialization() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let registry = Registry::new();
        registry.register_counter(MetricOpts::new("a_total", "A.")).unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        registry.add_async_before_collect_callback(move || {
            let flag = Arc::clone(&flag);
            async move {
                tokio::task::yield_now().await;
                flag.store(true, Ordering::Release);
                Ok(())
            }
        });

        let mut out = Recording::default();
        registry.collect_and_serialize(&mut out).await.unwrap();
        assert!(ran.load(Ordering::Acquire));
        assert_eq!(out.families, vec!["a_total"]);
    }

    #[test]
    fn summary_registration_validates_objectives() {
        let registry = Registry::new();
        let opts = SummaryOpts {
            objectives: vec![crate::quantile::QuantileEpsilonPair {
                quantile: 1.5,
                epsilon: 0.01,
            }],
            ..SummaryOpts::default()
        };
        assert!(matches!(
            registry.register_summary(MetricOpts::new("s", "S."), opts),
            Err(MetricError::InvalidObjective { .. })
        ));
    }

    #[test]
    fn default_registry_is_shared() {
        let a = default_registry();
        let b = default_registry();
        assert!(std::ptr::eq(a, b));
    }
}
