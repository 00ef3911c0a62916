use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use crate::pipeline::model_config::config::GestureKind;
use crate::pipeline::module::gesture_signal::GestureState;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Challenge {
    pub id: String,
    pub gesture: GestureKind,
    pub instruction: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ActiveChallenge {
    pub challenge: Challenge,
    pub status: ChallengeStatus,
    pub attempts: u32,
    pub identity: Option<String>,
}

impl ActiveChallenge {
    pub fn new(challenge: Challenge, identity: Option<String>) -> Self {
        ActiveChallenge {
            challenge,
            status: ChallengeStatus::Pending,
            attempts: 0,
            identity,
        }
    }
}

#[derive(Debug)]
pub struct SessionState {
    pub session_id: String,
    pub created_at: Instant,
    pub last_seen: Instant,
    pub gestures: GestureState,
    pub challenge: Option<ActiveChallenge>,
}

impl SessionState {
    pub fn new(session_id: &str) -> Self {
        let now = Instant::now();
        SessionState {
            session_id: session_id.to_string(),
            created_at: now,
            last_seen: now,
            gestures: GestureState::default(),
            challenge: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }
}

pub type SharedSession = Arc<Mutex<SessionState>>;

/// Sessions keyed by id. Each entry has its own lock so sessions never
/// contend with each other; the map lock is only held for lookup.
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<String, SharedSession>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        SessionStore {
            sessions: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, session_id: &str) -> Option<SharedSession> {
        self.sessions.get(session_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn get_or_create(&self, session_id: &str) -> SharedSession {
        let entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionState::new(session_id))));
        Arc::clone(entry.value())
    }

    pub fn remove(&self, session_id: &str) -> Option<SharedSession> {
        self.sessions.remove(session_id).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drops sessions idle for longer than the TTL and returns their ids.
    pub fn evict_expired(&self) -> Vec<String> {
        let mut evicted = Vec::new();
        self.sessions.retain(|session_id, session| {
            let alive = session.lock().last_seen.elapsed() < self.ttl;
            if !alive {
                evicted.push(session_id.clone());
            }
            alive
        });
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_returns_same_session() {
        let store = SessionStore::new(Duration::from_secs(60));
        let a = store.get_or_create("s1");
        a.lock().gestures.blink_count = 3;
        let b = store.get_or_create("s1");
        assert_eq!(b.lock().gestures.blink_count, 3);
        assert_eq!(store.len(), 1);
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_sessions_are_isolated() {
        let store = SessionStore::new(Duration::from_secs(60));
        let a = store.get_or_create("a");
        let _guard = a.lock();
        // holding a's lock does not block b
        let b = store.get_or_create("b");
        assert!(b.try_lock().is_some());
    }

    #[test]
    fn test_evict_expired() {
        let store = SessionStore::new(Duration::from_millis(0));
        store.get_or_create("old");
        let evicted = store.evict_expired();
        assert_eq!(evicted, vec!["old".to_string()]);
        assert!(store.is_empty());

        let store = SessionStore::new(Duration::from_secs(60));
        store.get_or_create("fresh");
        assert!(store.evict_expired().is_empty());
        assert_eq!(store.len(), 1);
    }
}
