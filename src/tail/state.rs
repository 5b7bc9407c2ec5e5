// SPDX-License-Identifier: Apache-2.0

//! Per-file read state and the shared in-memory store.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::tail::file_id::FileId;

/// State never expires.
pub const TTL_INFINITE: i64 = -1;
/// State was loaded from the registry but not yet claimed by any input.
pub const TTL_UNCLAIMED: i64 = -2;
/// State is eligible for removal on the next cleanup.
pub const TTL_EXPIRED: i64 = 0;

/// Read progress for a single tracked file.
///
/// `finished` and the identity-derived comparison are runtime concerns and
/// are not persisted; everything else round-trips through the registry file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct State {
    #[serde(skip)]
    pub finished: bool,
    pub source: String,
    pub offset: u64,
    pub timestamp: DateTime<Utc>,
    /// Retention in nanoseconds; negative values are the sentinels above.
    pub ttl: i64,
    #[serde(rename = "type")]
    pub input_type: String,
    #[serde(rename = "FileStateOS")]
    pub file_id: FileId,
}

impl State {
    pub fn new(file_id: FileId, source: String, input_type: String) -> Self {
        Self {
            finished: false,
            source,
            offset: 0,
            timestamp: Utc::now(),
            ttl: TTL_INFINITE,
            input_type,
            file_id,
        }
    }

    /// Identity equality: same device + inode, regardless of path.
    pub fn is_same(&self, other: &State) -> bool {
        self.file_id == other.file_id
    }

    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.ttl > 0
            && now
                .signed_duration_since(self.timestamp)
                .num_nanoseconds()
                .map(|age| age > self.ttl)
                .unwrap_or(true)
    }
}

/// Thread-safe collection of states, keyed logically by file identity.
///
/// Backed by an ordered Vec rather than a map: iteration order stays stable
/// for snapshotting and the collection is small enough that a linear
/// identity scan costs less than it would save.
#[derive(Debug, Default)]
pub struct StateStore {
    states: RwLock<Vec<State>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by identity, stamping the mutation time.
    pub fn update(&self, mut state: State) {
        let mut states = self.write();
        state.timestamp = Utc::now();

        match states.iter().position(|s| s.is_same(&state)) {
            Some(index) => states[index] = state,
            None => {
                debug!(source = %state.source, "new state added");
                states.push(state);
            }
        }
    }

    /// Identity lookup; None when the file has never been seen.
    pub fn find_previous(&self, state: &State) -> Option<State> {
        self.read().iter().find(|s| s.is_same(state)).cloned()
    }

    /// Drop every finished state whose TTL ran out. Returns the number
    /// removed. Unfinished states that would have expired are logged and
    /// kept; their owning worker has not released them yet.
    pub fn cleanup(&self) -> usize {
        let mut states = self.write();
        let before = states.len();
        let now = Utc::now();

        states.retain(|state| {
            if state.ttl == TTL_EXPIRED || state.expired(now) {
                if state.finished {
                    debug!(source = %state.source, ttl = state.ttl, "state removed, ttl expired");
                    return false;
                }
                error!(
                    source = %state.source,
                    "state should have been dropped, but worker is not finished"
                );
            }
            true
        });

        before - states.len()
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// Defensive copy of all states.
    pub fn get_states(&self) -> Vec<State> {
        self.read().clone()
    }

    /// Replace the contents wholesale; used when loading the registry.
    pub fn set_states(&self, states: Vec<State>) {
        *self.write() = states;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<State>> {
        self.states.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<State>> {
        self.states.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(inode: u64, source: &str) -> State {
        State::new(FileId::new(1, inode), source.to_string(), "log".to_string())
    }

    #[test]
    fn test_update_replaces_by_identity() {
        let store = StateStore::new();

        let mut s = state(100, "/var/log/a.log");
        s.offset = 10;
        store.update(s.clone());

        // Same identity, new path and offset.
        s.source = "/var/log/a.log.1".to_string();
        s.offset = 20;
        store.update(s.clone());

        assert_eq!(store.count(), 1);
        let found = store.find_previous(&s).unwrap();
        assert_eq!(found.offset, 20);
        assert_eq!(found.source, "/var/log/a.log.1");
    }

    #[test]
    fn test_find_previous_missing() {
        let store = StateStore::new();
        store.update(state(100, "/a"));

        assert!(store.find_previous(&state(999, "/b")).is_none());
    }

    #[test]
    fn test_cleanup_removes_expired_finished() {
        let store = StateStore::new();

        let mut keep = state(1, "/keep");
        keep.finished = true;
        store.update(keep);

        let mut drop_now = state(2, "/drop");
        drop_now.finished = true;
        drop_now.ttl = TTL_EXPIRED;
        store.update(drop_now);

        assert_eq!(store.cleanup(), 1);
        assert_eq!(store.count(), 1);
        assert_eq!(store.get_states()[0].source, "/keep");
    }

    #[test]
    fn test_cleanup_keeps_unfinished() {
        let store = StateStore::new();

        let mut s = state(1, "/busy");
        s.finished = false;
        s.ttl = TTL_EXPIRED;
        store.update(s);

        assert_eq!(store.cleanup(), 0);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let store = StateStore::new();

        let mut a = state(1, "/a");
        a.finished = true;
        a.ttl = TTL_EXPIRED;
        store.update(a);

        let mut b = state(2, "/b");
        b.finished = true;
        store.update(b);

        store.cleanup();
        let first = store.get_states();
        store.cleanup();
        let second = store.get_states();
        assert_eq!(first, second);
    }

    #[test]
    fn test_infinite_ttl_never_expires() {
        let store = StateStore::new();

        let mut s = state(1, "/a");
        s.finished = true;
        s.ttl = TTL_INFINITE;
        store.update(s);

        assert_eq!(store.cleanup(), 0);
    }

    #[test]
    fn test_set_states_replaces_contents() {
        let store = StateStore::new();
        store.update(state(1, "/old"));

        store.set_states(vec![state(2, "/new-a"), state(3, "/new-b")]);

        assert_eq!(store.count(), 2);
        assert!(store.find_previous(&state(1, "/old")).is_none());
    }
}
