//! # Session Registry
//!
//! Parent-process-only state: the set of live session ids (spec.md I5) and
//! the per-handler-thread negative id assignment used to name each
//! handler's reply channel (spec.md §4.6, §9 "Handler ids").

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;
use std::thread::ThreadId;

/// Ascending set of active session ids, seeded with the root worker (id 0).
pub struct SessionRegistry {
    ids: Mutex<BTreeSet<i32>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        let mut ids = BTreeSet::new();
        ids.insert(0);
        Self { ids: Mutex::new(ids) }
    }

    pub fn insert(&self, id: i32) {
        self.ids.lock().unwrap().insert(id);
    }

    pub fn remove(&self, id: i32) {
        self.ids.lock().unwrap().remove(&id);
    }

    pub fn contains(&self, id: i32) -> bool {
        self.ids.lock().unwrap().contains(&id)
    }

    pub fn ascending_ids(&self) -> Vec<i32> {
        self.ids.lock().unwrap().iter().copied().collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Assigns each HTTP handler thread a stable negative id on first use, so
/// its reply channel name never collides with a worker's session id.
pub struct HandlerIds {
    assigned: Mutex<HashMap<ThreadId, i32>>,
    next: AtomicI32,
}

impl HandlerIds {
    pub fn new() -> Self {
        Self { assigned: Mutex::new(HashMap::new()), next: AtomicI32::new(-1) }
    }

    /// Returns this thread's handler id, assigning one (`-1, -2, ...` in
    /// order of arrival) the first time it is called from a given thread.
    pub fn id_for_current_thread(&self) -> i32 {
        let thread_id = std::thread::current().id();
        let mut assigned = self.assigned.lock().unwrap();
        *assigned.entry(thread_id).or_insert_with(|| self.next.fetch_sub(1, Ordering::SeqCst))
    }
}

impl Default for HandlerIds {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_registry_contains_only_root() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.ascending_ids(), vec![0]);
    }

    #[test]
    fn insert_and_remove_track_membership() {
        let registry = SessionRegistry::new();
        registry.insert(42);
        registry.insert(7);
        assert_eq!(registry.ascending_ids(), vec![0, 7, 42]);

        registry.remove(7);
        assert!(!registry.contains(7));
        assert!(registry.contains(42));
    }

    #[test]
    fn handler_ids_are_negative_and_stable_per_thread() {
        let ids = HandlerIds::new();
        let first = ids.id_for_current_thread();
        let second = ids.id_for_current_thread();
        assert_eq!(first, second);
        assert!(first < 0);
    }
}
