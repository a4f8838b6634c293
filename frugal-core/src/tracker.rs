//! Process-wide set of tracked resources
//!
//! The tracker deduplicates resources by signature and owns their
//! serialization. One reentrant lock guards the whole set: the same thread
//! may hold it across `synchronize` while the dump underneath locks again.

use crate::aggregator::{Aggregator, SyncReport};
use crate::error::{SnapshotError, SyncError};
use crate::resource::{Resource, ResourceSnapshot};
use frugal_types::EntityType;
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

type ResourceMap = BTreeMap<String, Arc<Resource>>;

/// In-memory set of resources keyed by signature
pub struct Tracker {
    guard: ReentrantMutex<RefCell<ResourceMap>>,
}

impl Tracker {
    pub fn new() -> Self {
        Tracker {
            guard: ReentrantMutex::new(RefCell::new(BTreeMap::new())),
        }
    }

    /// Add a resource.
    ///
    /// If a resource with the same signature is already tracked, that one
    /// is returned as the canonical instance and `resource` is not
    /// inserted. Usage is not merged here.
    pub fn add(&self, resource: Arc<Resource>) -> Arc<Resource> {
        let guard = self.guard.lock();
        let mut resources = guard.borrow_mut();
        Arc::clone(
            resources
                .entry(resource.signature().to_string())
                .or_insert(resource),
        )
    }

    /// The tracked resource sharing `resource`'s signature, or `resource`
    pub fn resource_for(&self, resource: Arc<Resource>) -> Arc<Resource> {
        let guard = self.guard.lock();
        let resources = guard.borrow();
        resources
            .get(resource.signature())
            .cloned()
            .unwrap_or(resource)
    }

    pub fn get(&self, signature: &str) -> Option<Arc<Resource>> {
        let guard = self.guard.lock();
        let resources = guard.borrow();
        resources.get(signature).cloned()
    }

    /// Run `work` for `resource`, depositing the resource afterwards.
    ///
    /// The deposit happens on every exit path, including an `Err` returned
    /// by `work` and unwinding, as long as the resource recorded usage.
    pub fn track<R>(&self, resource: Arc<Resource>, work: impl FnOnce(&Arc<Resource>) -> R) -> R {
        tracing::debug!(resource = %resource.signature(), "tracking resource");
        let deposit = Deposit {
            tracker: self,
            resource,
        };
        work(&deposit.resource)
    }

    /// Add `resource` and fold its usage into the canonical instance
    pub fn deposit(&self, resource: &Arc<Resource>) {
        if !resource.any() {
            return;
        }
        let canonical = self.add(Arc::clone(resource));
        if !Arc::ptr_eq(&canonical, resource) {
            canonical.merge(resource);
        }
    }

    pub fn len(&self) -> usize {
        let guard = self.guard.lock();
        let resources = guard.borrow();
        resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tracked resources, ordered by signature
    pub fn resources(&self) -> Vec<Arc<Resource>> {
        let guard = self.guard.lock();
        let resources = guard.borrow();
        resources.values().cloned().collect()
    }

    pub fn signatures(&self) -> Vec<String> {
        let guard = self.guard.lock();
        let resources = guard.borrow();
        resources.keys().cloned().collect()
    }

    /// Columns used for `entity` across every tracked resource
    pub fn columns_for(&self, entity: &EntityType) -> BTreeSet<String> {
        self.resources()
            .iter()
            .flat_map(|resource| resource.columns(entity))
            .collect()
    }

    pub fn associations_for(&self, entity: &EntityType) -> BTreeSet<String> {
        self.resources()
            .iter()
            .flat_map(|resource| resource.associations(entity))
            .collect()
    }

    /// Flat snapshot list
    pub fn dump(&self) -> Vec<ResourceSnapshot> {
        let guard = self.guard.lock();
        let resources = guard.borrow();
        resources.values().map(|r| r.snapshot()).collect()
    }

    /// Rebuild a tracker from a snapshot list
    pub fn load(snapshots: &[ResourceSnapshot]) -> Self {
        let tracker = Tracker::new();
        tracker.absorb(snapshots);
        tracker
    }

    /// Merge snapshots into this tracker, by signature
    pub fn absorb(&self, snapshots: &[ResourceSnapshot]) {
        let guard = self.guard.lock();
        for snapshot in snapshots {
            let existing = guard.borrow().get(&snapshot.signature).cloned();
            match existing {
                Some(resource) => resource.merge_snapshot(snapshot),
                None => {
                    guard.borrow_mut().insert(
                        snapshot.signature.clone(),
                        Arc::new(Resource::from_snapshot(snapshot)),
                    );
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        let guard = self.guard.lock();
        let snapshots = self.dump();
        drop(guard);
        serde_json::to_vec(&snapshots).map_err(SnapshotError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Vec<ResourceSnapshot>, SnapshotError> {
        serde_json::from_slice(bytes).map_err(SnapshotError::Decode)
    }

    /// Rebuild from a stored payload; a corrupt payload yields an empty tracker
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match Self::decode(bytes) {
            Ok(snapshots) => Self::load(&snapshots),
            Err(err) => {
                tracing::warn!("Discarding tracker snapshot: {}", err);
                Tracker::new()
            }
        }
    }

    /// Write this tracker to shared storage through `aggregator`
    pub fn synchronize(&self, aggregator: &Aggregator) -> Result<SyncReport, SyncError> {
        let _guard = self.guard.lock();
        aggregator.synchronize(self)
    }

    /// Drop every tracked resource
    pub fn clear(&self) {
        let guard = self.guard.lock();
        guard.borrow_mut().clear();
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("resources", &self.signatures())
            .finish()
    }
}

/// Deposits its resource into the tracker when dropped
struct Deposit<'a> {
    tracker: &'a Tracker,
    resource: Arc<Resource>,
}

impl Drop for Deposit<'_> {
    fn drop(&mut self) {
        self.tracker.deposit(&self.resource);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frugal_types::RequestFingerprint;

    fn resource(action: &str) -> Arc<Resource> {
        Arc::new(Resource::new(RequestFingerprint::new(
            "posts", action, "GET", "html",
        )))
    }

    fn post() -> EntityType {
        EntityType::new("Post")
    }

    #[test]
    fn test_add_deduplicates_by_signature() {
        let tracker = Tracker::new();
        let r1 = resource("show");
        let r2 = resource("show");

        let first = tracker.add(Arc::clone(&r1));
        let second = tracker.add(Arc::clone(&r2));

        assert_eq!(tracker.len(), 1);
        assert!(Arc::ptr_eq(&first, &r1));
        assert!(Arc::ptr_eq(&second, &r1));
    }

    #[test]
    fn test_add_does_not_merge() {
        let tracker = Tracker::new();
        let r1 = resource("show");
        let r2 = resource("show");
        r2.add_column(&post(), "title");

        tracker.add(Arc::clone(&r1));
        tracker.add(r2);

        assert!(tracker.get("posts#show GET html").unwrap().columns(&post()).is_empty());
    }

    #[test]
    fn test_track_deposits_and_merges() {
        let tracker = Tracker::new();

        tracker.track(resource("show"), |r| r.add_column(&post(), "title"));
        tracker.track(resource("show"), |r| r.add_column(&post(), "body"));

        assert_eq!(tracker.len(), 1);
        let canonical = tracker.get("posts#show GET html").unwrap();
        assert_eq!(canonical.columns(&post()).len(), 2);
    }

    #[test]
    fn test_track_skips_unused_resource() {
        let tracker = Tracker::new();
        let answer = tracker.track(resource("index"), |_| 42);
        assert_eq!(answer, 42);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_track_deposits_on_error() {
        let tracker = Tracker::new();
        let result: Result<(), &str> = tracker.track(resource("show"), |r| {
            r.add_column(&post(), "title");
            Err("handler failed")
        });

        assert!(result.is_err());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_track_deposits_on_panic() {
        let tracker = Tracker::new();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tracker.track(resource("show"), |r| {
                r.add_column(&post(), "title");
                panic!("handler panicked");
            })
        }));

        assert!(outcome.is_err());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_dump_load_round_trip() {
        let tracker = Tracker::new();
        tracker.track(resource("show"), |r| {
            r.add_column(&post(), "title");
            r.add_association(&post(), "author");
        });
        tracker.track(resource("index"), |r| {
            r.add_column(&EntityType::new("User"), "name");
        });

        let restored = Tracker::load(&tracker.dump());

        assert_eq!(restored.signatures(), tracker.signatures());
        for signature in tracker.signatures() {
            let original = tracker.get(&signature).unwrap();
            let copy = restored.get(&signature).unwrap();
            assert_eq!(original.snapshot(), copy.snapshot());
        }
    }

    #[test]
    fn test_corrupt_bytes_yield_empty_tracker() {
        let tracker = Tracker::from_bytes(b"{not json");
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_columns_for_spans_resources() {
        let tracker = Tracker::new();
        tracker.track(resource("show"), |r| r.add_column(&post(), "title"));
        tracker.track(resource("index"), |r| r.add_column(&post(), "created_at"));

        let columns: Vec<String> = tracker.columns_for(&post()).into_iter().collect();
        assert_eq!(columns, vec!["created_at", "title"]);
    }

    #[test]
    fn test_concurrent_tracking() {
        let tracker = Arc::new(Tracker::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    tracker.track(resource("show"), |r| {
                        r.add_column(&post(), &format!("c{}", i));
                    });
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.columns_for(&post()).len(), 8);
    }
}
