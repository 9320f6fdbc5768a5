//! Idle-series expiry for high-cardinality collectors.
//!
//! An [`ExpiringCollector`] wraps a [`Collector`] and removes children that have gone unused
//! for a configured duration, bounding memory when label values come and go (connection IDs,
//! pod names).  Liveness is tracked per child as a lease count plus a keep-alive deadline,
//! both guarded by one lock that the sweep also takes, so a sweep can never remove a child
//! out from under a caller that is in the middle of acquiring it.

use std::hash::BuildHasherDefault;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use parking_lot::Mutex;
use quanta::{Clock, Instant};
use tokio::time::MissedTickBehavior;

use crate::collector::Collector;
use crate::error::MetricError;
use crate::label::{KeyHasher, LabelKey};
use crate::metrics::ChildMetric;

struct Lifetime {
    leases: usize,
    keep_alive_until: Instant,
}

struct Shared<C: ChildMetric> {
    inner: Arc<Collector<C>>,
    expires_after: Duration,
    clock: Clock,
    lifetimes: Mutex<HashMap<LabelKey, Lifetime, BuildHasherDefault<KeyHasher>>>,
    sweeping: AtomicBool,
}

/// A collector whose idle children are removed after `expires_after` without use.
///
/// "Use" is either holding a [`LeaseGuard`] or touching the child through
/// [`with_extend`](ExpiringCollector::with_extend); both reset the expiry timer.  Removal goes
/// through [`Collector::remove_key`], so an expired series simply disappears from collection
/// output and a later access creates a fresh, zero-state child.
///
/// Cloning is cheap; clones share the same expiry state.
pub struct ExpiringCollector<C: ChildMetric> {
    shared: Arc<Shared<C>>,
}

impl<C: ChildMetric> Clone for ExpiringCollector<C> {
    fn clone(&self) -> ExpiringCollector<C> {
        ExpiringCollector { shared: Arc::clone(&self.shared) }
    }
}

impl<C: ChildMetric> ExpiringCollector<C> {
    /// Wraps `inner`, expiring children after `expires_after` without use.
    pub fn new(inner: Arc<Collector<C>>, expires_after: Duration) -> ExpiringCollector<C> {
        ExpiringCollector::with_clock(inner, expires_after, Clock::new())
    }

    /// Like [`new`](ExpiringCollector::new) with an explicit clock, so tests can drive expiry
    /// with [`quanta::Clock::mock`].
    pub fn with_clock(
        inner: Arc<Collector<C>>,
        expires_after: Duration,
        clock: Clock,
    ) -> ExpiringCollector<C> {
        ExpiringCollector {
            shared: Arc::new(Shared {
                inner,
                expires_after,
                clock,
                lifetimes: Mutex::new(HashMap::default()),
                sweeping: AtomicBool::new(false),
            }),
        }
    }

    /// The wrapped collector.
    pub fn collector(&self) -> &Arc<Collector<C>> {
        &self.shared.inner
    }

    /// Acquires a lease on the child for the given label values, creating it if needed.
    ///
    /// While the returned guard is alive the child cannot expire; dropping the guard releases
    /// the lease and restarts the expiry timer.
    pub fn acquire_lease<S: AsRef<str>>(
        &self,
        values: &[S],
    ) -> Result<LeaseGuard<C>, MetricError> {
        let shared = &self.shared;
        let key = shared.inner.key_for(values)?;

        let mut lifetimes = shared.lifetimes.lock();
        // Resolve the child while holding the lifetimes lock; a concurrent sweep takes the
        // same lock, so it cannot remove this child between resolution and lease registration.
        let child = shared.inner.with_key(&key)?;
        let deadline = shared.clock.now() + shared.expires_after;
        let lifetime = lifetimes
            .entry(key.clone())
            .or_insert(Lifetime { leases: 0, keep_alive_until: deadline });
        lifetime.leases += 1;
        drop(lifetimes);

        Ok(LeaseGuard { owner: Arc::clone(shared), key, child })
    }

    /// Runs `f` against the child for the given label values, resetting its expiry timer.
    ///
    /// The extend-on-use path for callers that mutate and move on rather than holding a lease.
    pub fn with_extend<S, F, R>(&self, values: &[S], f: F) -> Result<R, MetricError>
    where
        S: AsRef<str>,
        F: FnOnce(&C) -> R,
    {
        let shared = &self.shared;
        let key = shared.inner.key_for(values)?;

        let mut lifetimes = shared.lifetimes.lock();
        let child = shared.inner.with_key(&key)?;
        let deadline = shared.clock.now() + shared.expires_after;
        lifetimes
            .entry(key)
            .and_modify(|lifetime| lifetime.keep_alive_until = deadline)
            .or_insert(Lifetime { leases: 0, keep_alive_until: deadline });
        drop(lifetimes);

        Ok(f(&child))
    }

    /// Removes every unleased child whose keep-alive deadline has passed.
    ///
    /// Returns the number of children removed.  Concurrent calls are collapsed to one; the
    /// losers return immediately with zero.
    pub fn sweep_once(&self) -> usize {
        self.shared.sweep_once()
    }

    /// Number of children currently tracked for expiry (diagnostic).
    pub fn tracked_series(&self) -> usize {
        self.shared.lifetimes.lock().len()
    }

    /// Spawns a background task sweeping at half the expiry interval.
    ///
    /// The task holds only a weak reference and exits on its own once every clone of this
    /// collector is dropped; the handle can also be aborted directly.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(&self.shared);
        let period = (self.shared.expires_after / 2).max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(shared) => {
                        shared.sweep_once();
                    }
                    None => return,
                }
            }
        })
    }
}

impl<C: ChildMetric> Shared<C> {
    fn sweep_once(&self) -> usize {
        if self.sweeping.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let removed = {
            let mut lifetimes = self.lifetimes.lock();
            let now = self.clock.now();
            let mut removed = 0;
            lifetimes.retain(|key, lifetime| {
                if lifetime.leases == 0 && now >= lifetime.keep_alive_until {
                    self.inner.remove_key(key);
                    removed += 1;
                    tracing::trace!(metric = self.inner.name(), "expired idle series");
                    false
                } else {
                    true
                }
            });
            removed
        };

        self.sweeping.store(false, Ordering::Release);
        removed
    }
}

/// A live lease on one child.
///
/// Dereferences to the child, so the holder can mutate it directly.  Dropping the guard
/// releases the lease and restarts the expiry timer from the moment of release.
pub struct LeaseGuard<C: ChildMetric> {
    owner: Arc<Shared<C>>,
    key: LabelKey,
    child: Arc<C>,
}

impl<C: ChildMetric> LeaseGuard<C> {
    /// A plain handle to the leased child, free of the lease itself.
    pub fn child(&self) -> Arc<C> {
        self.child.clone()
    }
}

impl<C: ChildMetric> Deref for LeaseGuard<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.child
    }
}

impl<C: ChildMetric> Drop for LeaseGuard<C> {
    fn drop(&mut self) {
        let mut lifetimes = self.owner.lifetimes.lock();
        if let Some(lifetime) = lifetimes.get_mut(&self.key) {
            lifetime.leases = lifetime.leases.saturating_sub(1);
            lifetime.keep_alive_until = self.owner.clock.now() + self.owner.expires_after;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use quanta::{Clock, Mock};

    use super::ExpiringCollector;
    use crate::collector::{Collector, MetricOpts};
    use crate::metrics::Counter;

    fn expiring(expires_after: Duration) -> (ExpiringCollector<Counter>, Arc<Mock>) {
        let inner = Collector::new(
            MetricOpts::new("conns_total", "Connections.").label_names(["peer"]),
            (),
            &[],
        )
        .unwrap();
        let (clock, mock) = Clock::mock();
        (ExpiringCollector::with_clock(inner, expires_after, clock), mock)
    }

    #[test]
    fn lease_blocks_expiry() {
        let (expiring, mock) = expiring(Duration::from_secs(10));

        let lease = expiring.acquire_lease(&["a"]).unwrap();
        lease.inc();

        mock.increment(Duration::from_secs(60));
        assert_eq!(expiring.sweep_once(), 0);
        assert_eq!(expiring.collector().child_count(), 1);
        assert_eq!(lease.get(), 1.0);
    }

    #[test]
    fn released_child_expires_after_idle_period() {
        let (expiring, mock) = expiring(Duration::from_secs(10));

        let lease = expiring.acquire_lease(&["a"]).unwrap();
        lease.inc();
        drop(lease);

        // The release restarted the timer; not yet expired.
        mock.increment(Duration::from_secs(9));
        assert_eq!(expiring.sweep_once(), 0);
        assert_eq!(expiring.collector().child_count(), 1);

        mock.increment(Duration::from_secs(2));
        assert_eq!(expiring.sweep_once(), 1);
        assert_eq!(expiring.collector().child_count(), 0);
        assert_eq!(expiring.tracked_series(), 0);

        // A later access yields a fresh, zero-state child.
        let lease = expiring.acquire_lease(&["a"]).unwrap();
        assert_eq!(lease.get(), 0.0);
    }

    #[test]
    fn use_extends_lifetime() {
        let (expiring, mock) = expiring(Duration::from_secs(10));

        expiring.with_extend(&["a"], |c| c.inc()).unwrap();

        mock.increment(Duration::from_secs(8));
        expiring.with_extend(&["a"], |c| c.inc()).unwrap();

        // 16s since creation, but only 8s since last use.
        mock.increment(Duration::from_secs(8));
        assert_eq!(expiring.sweep_once(), 0);

        mock.increment(Duration::from_secs(3));
        assert_eq!(expiring.sweep_once(), 1);
    }

    #[test]
    fn overlapping_leases_all_released_before_expiry() {
        let (expiring, mock) = expiring(Duration::from_secs(10));

        let first = expiring.acquire_lease(&["a"]).unwrap();
        let second = expiring.acquire_lease(&["a"]).unwrap();
        assert!(Arc::ptr_eq(&first.child(), &second.child()));

        drop(first);
        mock.increment(Duration::from_secs(60));
        // One lease still live.
        assert_eq!(expiring.sweep_once(), 0);

        drop(second);
        assert_eq!(expiring.sweep_once(), 0);
        mock.increment(Duration::from_secs(11));
        assert_eq!(expiring.sweep_once(), 1);
    }

    #[test]
    fn sweep_only_touches_expired_children() {
        let (expiring, mock) = expiring(Duration::from_secs(10));

        expiring.with_extend(&["old"], |c| c.inc()).unwrap();
        mock.increment(Duration::from_secs(8));
        expiring.with_extend(&["new"], |c| c.inc()).unwrap();

        mock.increment(Duration::from_secs(3));
        assert_eq!(expiring.sweep_once(), 1);
        assert_eq!(expiring.collector().child_count(), 1);
        assert!(expiring.collector().with_labels(&["new"]).unwrap().get() > 0.0);
    }

    #[tokio::test]
    async fn sweeper_exits_when_collector_dropped() {
        let (expiring, _mock) = expiring(Duration::from_millis(20));
        let handle = expiring.spawn_sweeper();
        drop(expiring);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sweeper did not exit")
            .unwrap();
    }
}
