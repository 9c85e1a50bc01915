//! Tracks task IDs currently being processed by this instance so a broker
//! redelivery of the same message is detected and skipped instead of
//! processed twice, and carries a per-task cancellation flag the worker
//! polls while the task is in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

/// The sole piece of mutable shared state workers touch directly: a
/// concurrent map, not a mutex around a `HashMap`, so insert/remove from
/// different workers never contend on a single lock.
#[derive(Default)]
pub struct InflightSet {
    tasks: DashMap<Uuid, Arc<AtomicBool>>,
}

impl InflightSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `task_id` as in flight. Returns `false` if it was already present
    /// (a redelivery), in which case the caller should skip processing.
    pub fn try_insert(&self, task_id: Uuid) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.tasks.entry(task_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(AtomicBool::new(false)));
                true
            }
        }
    }

    pub fn remove(&self, task_id: &Uuid) {
        self.tasks.remove(task_id);
    }

    pub fn contains(&self, task_id: &Uuid) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Flip the cancellation flag for an in-flight task. Returns `false` if
    /// `task_id` isn't currently tracked (already finished, or never started).
    pub fn cancel(&self, task_id: &Uuid) -> bool {
        match self.tasks.get(task_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Whether cancellation has been requested for `task_id`. `false` for
    /// tasks no longer tracked, so a finished task never reports as cancelled.
    #[must_use]
    pub fn is_cancelled(&self, task_id: &Uuid) -> bool {
        self.tasks
            .get(task_id)
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// The shared cancellation flag for an in-flight task, for callers that
    /// need to poll it repeatedly (e.g. the engine mid-processing) without
    /// going back through the map each time.
    #[must_use]
    pub fn flag(&self, task_id: &Uuid) -> Option<Arc<AtomicBool>> {
        self.tasks.get(task_id).map(|entry| entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_insert_succeeds_second_is_detected_as_redelivery() {
        let set = InflightSet::new();
        let id = Uuid::new_v4();
        assert!(set.try_insert(id));
        assert!(!set.try_insert(id));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn removal_allows_reinsertion() {
        let set = InflightSet::new();
        let id = Uuid::new_v4();
        set.try_insert(id);
        set.remove(&id);
        assert!(set.is_empty());
        assert!(set.try_insert(id));
    }

    #[test]
    fn cancelling_an_in_flight_task_sets_its_flag() {
        let set = InflightSet::new();
        let id = Uuid::new_v4();
        set.try_insert(id);
        assert!(!set.is_cancelled(&id));
        assert!(set.cancel(&id));
        assert!(set.is_cancelled(&id));
    }

    #[test]
    fn cancelling_an_unknown_task_is_a_no_op() {
        let set = InflightSet::new();
        let id = Uuid::new_v4();
        assert!(!set.cancel(&id));
    }

    #[test]
    fn removed_tasks_no_longer_report_as_cancelled() {
        let set = InflightSet::new();
        let id = Uuid::new_v4();
        set.try_insert(id);
        set.cancel(&id);
        set.remove(&id);
        assert!(!set.is_cancelled(&id));
    }
}
