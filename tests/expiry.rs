use std::io;
use std::time::Duration;

use quanta::Clock;

use pyrometer::{
    ExpiringCollector, LabelKey, MetricKind, MetricOpts, MetricValue, Registry, Serializer,
};

#[derive(Default)]
struct SeriesRecorder {
    series: Vec<Vec<String>>,
}

impl Serializer for SeriesRecorder {
    fn write_family_declaration(
        &mut self,
        _name: &str,
        _help: &str,
        _kind: MetricKind,
    ) -> io::Result<()> {
        Ok(())
    }

    fn write_metric(
        &mut self,
        _name: &str,
        _label_names: &LabelKey,
        label_values: &LabelKey,
        _value: &MetricValue,
    ) -> io::Result<()> {
        self.series.push(label_values.iter().map(|s| s.to_string()).collect());
        Ok(())
    }
}

async fn scraped_series(registry: &Registry) -> Vec<Vec<String>> {
    let mut recorder = SeriesRecorder::default();
    registry.collect_and_serialize(&mut recorder).await.unwrap();
    recorder.series
}

#[tokio::test]
async fn expired_series_vanish_from_scrapes() {
    let registry = Registry::new();
    let connections = registry
        .register_counter(
            MetricOpts::new("peer_bytes_total", "Bytes per peer.").label_names(["peer"]),
        )
        .unwrap();

    let (clock, mock) = Clock::mock();
    let expiring =
        ExpiringCollector::with_clock(connections, Duration::from_secs(30), clock);

    expiring.with_extend(&["10.0.0.1"], |c| c.inc_by(100.0)).unwrap().unwrap();
    expiring.with_extend(&["10.0.0.2"], |c| c.inc_by(200.0)).unwrap().unwrap();

    assert_eq!(scraped_series(&registry).await.len(), 2);

    // One peer keeps talking, the other goes quiet.
    mock.increment(Duration::from_secs(20));
    expiring.with_extend(&["10.0.0.1"], |c| c.inc()).unwrap();

    mock.increment(Duration::from_secs(15));
    expiring.sweep_once();

    let series = scraped_series(&registry).await;
    assert_eq!(series, vec![vec!["10.0.0.1".to_string()]]);
}

#[tokio::test]
async fn leased_series_survive_sweeps() {
    let registry = Registry::new();
    let connections = registry
        .register_gauge(MetricOpts::new("conn_state", "Connection state.").label_names(["id"]))
        .unwrap();

    let (clock, mock) = Clock::mock();
    let expiring = ExpiringCollector::with_clock(connections, Duration::from_secs(5), clock);

    let lease = expiring.acquire_lease(&["c1"]).unwrap();
    lease.set(1.0);

    mock.increment(Duration::from_secs(3600));
    expiring.sweep_once();
    assert_eq!(scraped_series(&registry).await.len(), 1);

    // Releasing the lease starts the idle timer from now.
    drop(lease);
    expiring.sweep_once();
    assert_eq!(scraped_series(&registry).await.len(), 1);

    mock.increment(Duration::from_secs(6));
    expiring.sweep_once();
    assert!(scraped_series(&registry).await.is_empty());
}

#[tokio::test]
async fn expired_series_restart_from_zero() {
    let registry = Registry::new();
    let hits = registry
        .register_counter(MetricOpts::new("hits_total", "Hits.").label_names(["route"]))
        .unwrap();

    let (clock, mock) = Clock::mock();
    let expiring = ExpiringCollector::with_clock(hits, Duration::from_secs(10), clock);

    expiring.with_extend(&["/a"], |c| c.inc_by(50.0)).unwrap().unwrap();
    mock.increment(Duration::from_secs(11));
    assert_eq!(expiring.sweep_once(), 1);

    let lease = expiring.acquire_lease(&["/a"]).unwrap();
    assert_eq!(lease.get(), 0.0);
    lease.inc();

    let mut recorder = SeriesRecorder::default();
    registry.collect_and_serialize(&mut recorder).await.unwrap();
    assert_eq!(recorder.series, vec![vec!["/a".to_string()]]);
}
