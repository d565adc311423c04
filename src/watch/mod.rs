//! Kubernetes watch sources
//!
//! A source watches one resource kind across all namespaces and feeds an
//! ordered queue of [`ResourceEvent`]s to that kind's event loop:
//!
//! - an initial listing arrives as `Added` events
//! - changes arrive as `Added`, `Updated` or `Deleted`
//! - every resync period, every known snapshot is delivered again as `Updated`
//!
//! When the watch re-lists after a disconnect, objects that vanished in the
//! meantime are reported as `Deleted`.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::model::{Keyed, ObjectKey};
use crate::Error;

/// Watcher timeout (seconds) - must be less than the client read timeout (30s)
/// so the API server closes idle watches before the client gives up on them.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Default period between full resyncs
pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(300);

/// Capacity of each per-kind event queue
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

/// A change to one watched object, carrying its full snapshot
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceEvent<T> {
    /// First time this object was seen
    Added(T),
    /// Object changed, or was redelivered by a resync
    Updated(T),
    /// Object is gone; carries its last known snapshot
    Deleted(T),
}

impl<T> ResourceEvent<T> {
    /// The snapshot carried by the event
    pub fn snapshot(&self) -> &T {
        match self {
            Self::Added(s) | Self::Updated(s) | Self::Deleted(s) => s,
        }
    }

    /// Short name of the event type, for logs
    pub fn action(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Updated(_) => "updated",
            Self::Deleted(_) => "deleted",
        }
    }
}

/// Remembers what a source has delivered so it can tell adds from updates,
/// detect deletions across re-lists, and replay everything on resync.
#[derive(Debug)]
pub struct SnapshotTracker<T> {
    known: HashMap<ObjectKey, T>,
    relisted: Option<HashSet<ObjectKey>>,
}

impl<T> Default for SnapshotTracker<T> {
    fn default() -> Self {
        Self {
            known: HashMap::new(),
            relisted: None,
        }
    }
}

impl<T: Keyed + Clone> SnapshotTracker<T> {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects currently known
    pub fn len(&self) -> usize {
        self.known.len()
    }

    /// True when no object is known
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Record a created or modified object
    pub fn apply(&mut self, snapshot: T) -> ResourceEvent<T> {
        match self.known.insert(snapshot.key(), snapshot.clone()) {
            Some(_) => ResourceEvent::Updated(snapshot),
            None => ResourceEvent::Added(snapshot),
        }
    }

    /// Record a deleted object
    pub fn delete(&mut self, snapshot: T) -> ResourceEvent<T> {
        self.known.remove(&snapshot.key());
        ResourceEvent::Deleted(snapshot)
    }

    /// A full listing is starting
    pub fn begin_relist(&mut self) {
        self.relisted = Some(HashSet::new());
    }

    /// An object delivered as part of the current listing
    pub fn relist_apply(&mut self, snapshot: T) -> ResourceEvent<T> {
        if let Some(ref mut seen) = self.relisted {
            seen.insert(snapshot.key());
        }
        self.apply(snapshot)
    }

    /// The listing is complete; everything known but not listed is deleted
    pub fn end_relist(&mut self) -> Vec<ResourceEvent<T>> {
        let Some(seen) = self.relisted.take() else {
            return Vec::new();
        };

        let mut gone: Vec<ObjectKey> = self
            .known
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();
        gone.sort();

        gone.into_iter()
            .filter_map(|key| self.known.remove(&key))
            .map(ResourceEvent::Deleted)
            .collect()
    }

    /// Every known snapshot as an `Updated` event, in key order
    pub fn resync(&self) -> Vec<ResourceEvent<T>> {
        let mut keys: Vec<&ObjectKey> = self.known.keys().collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|key| self.known.get(key))
            .cloned()
            .map(ResourceEvent::Updated)
            .collect()
    }
}

/// Translate one watcher event into zero or more resource events
///
/// Objects that cannot be converted are logged and skipped.
pub fn translate<K, T>(
    kind: &str,
    tracker: &mut SnapshotTracker<T>,
    event: Event<K>,
) -> Vec<ResourceEvent<T>>
where
    T: for<'a> TryFrom<&'a K, Error = Error> + Keyed + Clone,
{
    match event {
        Event::Init => {
            debug!(kind, "Watch listing started");
            tracker.begin_relist();
            Vec::new()
        }
        Event::InitApply(obj) => convert(kind, &obj)
            .map(|s| tracker.relist_apply(s))
            .into_iter()
            .collect(),
        Event::InitDone => {
            let deleted = tracker.end_relist();
            debug!(
                kind,
                known = tracker.len(),
                vanished = deleted.len(),
                "Watch listing complete"
            );
            deleted
        }
        Event::Apply(obj) => convert(kind, &obj)
            .map(|s| tracker.apply(s))
            .into_iter()
            .collect(),
        Event::Delete(obj) => convert(kind, &obj)
            .map(|s| tracker.delete(s))
            .into_iter()
            .collect(),
    }
}

fn convert<K, T>(kind: &str, obj: &K) -> Option<T>
where
    T: for<'a> TryFrom<&'a K, Error = Error>,
{
    match T::try_from(obj) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            error!(kind, error = %e, "Unexpected object from watch, skipping");
            None
        }
    }
}

/// Start watching `api` and deliver events to `tx`
///
/// The task runs until the receiver is dropped. Watch errors are logged and
/// the watcher reconnects with backoff.
pub fn spawn_source<K, T>(
    api: Api<K>,
    resync_period: Duration,
    tx: mpsc::Sender<ResourceEvent<T>>,
) -> JoinHandle<()>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    T: for<'a> TryFrom<&'a K, Error = Error> + Keyed + Clone + Send + Sync + 'static,
{
    tokio::spawn(run_source(api, resync_period, tx))
}

/// Resync timer whose first tick is one period away
///
/// A zero period falls back to [`DEFAULT_RESYNC_PERIOD`].
fn resync_timer(period: Duration) -> Interval {
    let period = if period.is_zero() {
        warn!(
            default_secs = DEFAULT_RESYNC_PERIOD.as_secs(),
            "Resync period must be non-zero, using default"
        );
        DEFAULT_RESYNC_PERIOD
    } else {
        period
    };

    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn run_source<K, T>(
    api: Api<K>,
    resync_period: Duration,
    tx: mpsc::Sender<ResourceEvent<T>>,
) where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    T: for<'a> TryFrom<&'a K, Error = Error> + Keyed + Clone + Send + Sync + 'static,
{
    let kind = K::kind(&()).to_string();
    let mut stream = watcher::watcher(api, watcher::Config::default().timeout(WATCH_TIMEOUT_SECS))
        .default_backoff()
        .boxed();
    let mut tracker = SnapshotTracker::new();
    let mut resync = resync_timer(resync_period);

    info!(kind = %kind, resync_secs = resync.period().as_secs(), "Starting watch");

    loop {
        let events = tokio::select! {
            event = stream.next() => match event {
                Some(Ok(event)) => translate(&kind, &mut tracker, event),
                Some(Err(e)) => {
                    warn!(kind = %kind, error = %e, "Watch error, retrying");
                    continue;
                }
                None => {
                    warn!(kind = %kind, "Watch stream ended");
                    return;
                }
            },
            _ = resync.tick() => {
                debug!(kind = %kind, known = tracker.len(), "Resync");
                tracker.resync()
            }
        };

        for event in events {
            if tx.send(event).await.is_err() {
                info!(kind = %kind, "Event loop gone, stopping watch");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServiceDescriptor;
    use k8s_openapi::api::core::v1::{Service, ServiceSpec};
    use kube::api::ObjectMeta;

    fn desc(name: &str) -> ServiceDescriptor {
        ServiceDescriptor::headless("default", name)
    }

    fn service(name: Option<&str>, cluster_ip: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: name.map(String::from),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                cluster_ip: Some(cluster_ip.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    mod tracker {
        use super::*;

        #[test]
        fn first_apply_is_added_then_updated() {
            let mut tracker = SnapshotTracker::new();
            assert_eq!(tracker.apply(desc("web")), ResourceEvent::Added(desc("web")));
            assert_eq!(tracker.apply(desc("web")), ResourceEvent::Updated(desc("web")));
            assert_eq!(tracker.len(), 1);
        }

        #[test]
        fn delete_forgets_object() {
            let mut tracker = SnapshotTracker::new();
            tracker.apply(desc("web"));
            assert_eq!(tracker.delete(desc("web")), ResourceEvent::Deleted(desc("web")));
            assert!(tracker.is_empty());
            assert_eq!(tracker.apply(desc("web")), ResourceEvent::Added(desc("web")));
        }

        #[test]
        fn relist_reports_vanished_objects_as_deleted() {
            let mut tracker = SnapshotTracker::new();
            tracker.apply(desc("api"));
            tracker.apply(desc("web"));
            tracker.apply(desc("db"));

            tracker.begin_relist();
            assert_eq!(
                tracker.relist_apply(desc("web")),
                ResourceEvent::Updated(desc("web"))
            );
            let deleted = tracker.end_relist();

            assert_eq!(
                deleted,
                vec![
                    ResourceEvent::Deleted(desc("api")),
                    ResourceEvent::Deleted(desc("db")),
                ]
            );
            assert_eq!(tracker.len(), 1);
        }

        #[test]
        fn end_relist_without_begin_deletes_nothing() {
            let mut tracker = SnapshotTracker::new();
            tracker.apply(desc("web"));
            assert!(tracker.end_relist().is_empty());
            assert_eq!(tracker.len(), 1);
        }

        #[test]
        fn resync_replays_everything_as_updated() {
            let mut tracker = SnapshotTracker::new();
            tracker.apply(desc("web"));
            tracker.apply(desc("api"));

            assert_eq!(
                tracker.resync(),
                vec![
                    ResourceEvent::Updated(desc("api")),
                    ResourceEvent::Updated(desc("web")),
                ]
            );
            assert_eq!(tracker.len(), 2);
        }
    }

    mod translation {
        use super::*;

        #[test]
        fn initial_listing_is_added() {
            let mut tracker = SnapshotTracker::<ServiceDescriptor>::new();

            assert!(translate("Service", &mut tracker, Event::<Service>::Init).is_empty());
            let events = translate(
                "Service",
                &mut tracker,
                Event::InitApply(service(Some("web"), "None")),
            );
            assert_eq!(events, vec![ResourceEvent::Added(desc("web"))]);
            assert!(translate("Service", &mut tracker, Event::<Service>::InitDone).is_empty());
        }

        #[test]
        fn apply_and_delete_flow_through() {
            let mut tracker = SnapshotTracker::<ServiceDescriptor>::new();

            translate("Service", &mut tracker, Event::Apply(service(Some("web"), "None")));
            let events = translate(
                "Service",
                &mut tracker,
                Event::Apply(service(Some("web"), "10.96.0.20")),
            );
            assert_eq!(
                events,
                vec![ResourceEvent::Updated(ServiceDescriptor::new(
                    "default", "web", true
                ))]
            );

            let events = translate(
                "Service",
                &mut tracker,
                Event::Delete(service(Some("web"), "10.96.0.20")),
            );
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].action(), "deleted");
        }

        #[test]
        fn unconvertible_objects_are_skipped() {
            let mut tracker = SnapshotTracker::<ServiceDescriptor>::new();
            let events = translate("Service", &mut tracker, Event::Apply(service(None, "None")));
            assert!(events.is_empty());
            assert!(tracker.is_empty());
        }
    }

    mod resync {
        use super::*;

        #[tokio::test]
        async fn zero_period_uses_default() {
            assert_eq!(resync_timer(Duration::ZERO).period(), DEFAULT_RESYNC_PERIOD);
        }

        #[tokio::test]
        async fn configured_period_is_kept() {
            let period = Duration::from_secs(60);
            assert_eq!(resync_timer(period).period(), period);
        }
    }

    #[test]
    fn event_exposes_snapshot() {
        let event = ResourceEvent::Updated(desc("web"));
        assert_eq!(event.snapshot().name, "web");
        assert_eq!(event.action(), "updated");
    }
}
