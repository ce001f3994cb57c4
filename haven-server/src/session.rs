//! Per-client session cache.
//!
//! Maps a client identifier to its open conversation. Entries are created on
//! demand by the first message from an identifier, refreshed on every
//! successful exchange, and removed by the eviction sweeper once idle beyond
//! the configured TTL. The map is sharded, so get-or-create for one
//! identifier never blocks lookups for unrelated identifiers.

use crate::provider::Conversation;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ============================================================================
// Session Entity
// ============================================================================

/// One client's open conversation plus its last-activity timestamp.
///
/// The transcript is guarded by an async mutex: concurrent messages from the
/// same identifier are serialized, other identifiers are unaffected. The
/// timestamp only ever moves forward.
pub struct Session {
    identifier: String,
    conversation: Mutex<Conversation>,
    last_active: AtomicI64,
}

impl Session {
    fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            conversation: Mutex::new(Conversation::new()),
            last_active: AtomicI64::new(now_millis()),
        }
    }

    /// The key this session is stored under.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The conversation transcript, exclusively locked per exchange.
    pub fn conversation(&self) -> &Mutex<Conversation> {
        &self.conversation
    }

    /// Mark the session as just used. `fetch_max` keeps the timestamp
    /// monotonic even when refreshes race.
    pub fn touch(&self) {
        self.last_active.fetch_max(now_millis(), Ordering::AcqRel);
    }

    /// Last-activity timestamp in unix milliseconds.
    pub fn last_active_millis(&self) -> i64 {
        self.last_active.load(Ordering::Acquire)
    }

    /// Time elapsed since the last successful exchange.
    pub fn idle_time(&self) -> Duration {
        let idle = now_millis().saturating_sub(self.last_active_millis());
        Duration::from_millis(idle.max(0) as u64)
    }

    #[cfg(test)]
    pub(crate) fn set_last_active_millis(&self, millis: i64) {
        self.last_active.store(millis, Ordering::Release);
    }
}

// ============================================================================
// Session Store
// ============================================================================

/// Concurrent session cache keyed by client identifier.
///
/// Shared by `Arc` between the request path and the eviction sweeper; tests
/// construct isolated stores per case.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the session for `identifier`, creating it if absent.
    ///
    /// Atomic per key: concurrent callers with the same identifier observe
    /// the same entity. Construction is cheap (no provider I/O), so holding
    /// the shard lock during insert is fine.
    pub fn get_or_create(&self, identifier: &str) -> Arc<Session> {
        self.sessions
            .entry(identifier.to_string())
            .or_insert_with(|| {
                tracing::debug!(identifier = %identifier, "Creating session");
                Arc::new(Session::new(identifier))
            })
            .value()
            .clone()
    }

    /// Look up a session without creating one.
    pub fn get(&self, identifier: &str) -> Option<Arc<Session>> {
        self.sessions.get(identifier).map(|entry| entry.value().clone())
    }

    /// Remove the session if present. Idempotent.
    pub fn remove(&self, identifier: &str) {
        self.sessions.remove(identifier);
    }

    /// Whether a session exists for `identifier`.
    pub fn contains(&self, identifier: &str) -> bool {
        self.sessions.contains_key(identifier)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Visit every live session. Iteration locks one shard at a time and
    /// never observes a half-inserted entry.
    pub fn for_each(&self, mut visit: impl FnMut(&Session)) {
        for entry in self.sessions.iter() {
            visit(entry.value());
        }
    }

    /// Delete every session idle longer than `idle_ttl`.
    ///
    /// Only elapsed idle time matters; a busy session is retained no matter
    /// how old it is. Returns the number of evicted sessions.
    pub fn evict_idle(&self, idle_ttl: Duration) -> usize {
        let mut evicted = 0;
        self.sessions.retain(|identifier, session| {
            let idle = session.idle_time();
            if idle > idle_ttl {
                tracing::info!(
                    identifier = %identifier,
                    idle_secs = idle.as_secs(),
                    "Deleted inactive session"
                );
                evicted += 1;
                false
            } else {
                true
            }
        });
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(30 * 60);

    #[test]
    fn get_or_create_returns_same_entity() {
        let store = SessionStore::new();
        let first = store.get_or_create("10.0.0.5");
        let second = store.get_or_create("10.0.0.5");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 1);
        assert_eq!(first.identifier(), "10.0.0.5");
    }

    #[test]
    fn distinct_identifiers_get_distinct_entities() {
        let store = SessionStore::new();
        let a = store.get_or_create("10.0.0.5");
        let b = store.get_or_create("10.0.0.6");

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn no_creation_without_lookup() {
        let store = SessionStore::new();
        assert!(store.is_empty());
        assert!(store.get("10.0.0.5").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_get_or_create_constructs_once() {
        let store = Arc::new(SessionStore::new());
        let barrier = Arc::new(tokio::sync::Barrier::new(32));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                store.get_or_create("10.0.0.5")
            }));
        }

        let mut sessions = Vec::new();
        for handle in handles {
            sessions.push(handle.await.unwrap());
        }

        assert_eq!(store.len(), 1);
        for session in &sessions[1..] {
            assert!(Arc::ptr_eq(&sessions[0], session));
        }
    }

    #[test]
    fn remove_is_idempotent() {
        let store = SessionStore::new();
        store.get_or_create("10.0.0.5");

        store.remove("10.0.0.5");
        assert!(!store.contains("10.0.0.5"));

        store.remove("10.0.0.5");
        assert!(store.is_empty());
    }

    #[test]
    fn touch_never_moves_backwards() {
        let store = SessionStore::new();
        let session = store.get_or_create("10.0.0.5");

        let future = now_millis() + 60_000;
        session.set_last_active_millis(future);
        session.touch();

        assert!(session.last_active_millis() >= future);
    }

    #[test]
    fn eviction_removes_sessions_idle_past_ttl() {
        let store = SessionStore::new();
        let session = store.get_or_create("10.0.0.5");
        session.set_last_active_millis(now_millis() - TTL.as_millis() as i64 - 1_000);

        let evicted = store.evict_idle(TTL);

        assert_eq!(evicted, 1);
        assert!(!store.contains("10.0.0.5"));
    }

    #[test]
    fn eviction_retains_sessions_within_ttl() {
        let store = SessionStore::new();
        let session = store.get_or_create("10.0.0.5");
        session.set_last_active_millis(now_millis() - TTL.as_millis() as i64 + 5_000);

        let evicted = store.evict_idle(TTL);

        assert_eq!(evicted, 0);
        assert!(store.contains("10.0.0.5"));
    }

    #[test]
    fn eviction_only_touches_idle_sessions() {
        let store = SessionStore::new();
        let stale = store.get_or_create("10.0.0.5");
        stale.set_last_active_millis(now_millis() - TTL.as_millis() as i64 - 1_000);
        store.get_or_create("10.0.0.6");

        let evicted = store.evict_idle(TTL);

        assert_eq!(evicted, 1);
        assert!(!store.contains("10.0.0.5"));
        assert!(store.contains("10.0.0.6"));
    }

    #[tokio::test]
    async fn recreated_session_starts_fresh() {
        let store = SessionStore::new();
        let original = store.get_or_create("10.0.0.5");
        original
            .conversation()
            .lock()
            .await
            .record_exchange("hello", "hi");
        original.set_last_active_millis(now_millis() - TTL.as_millis() as i64 - 1_000);

        store.evict_idle(TTL);
        let recreated = store.get_or_create("10.0.0.5");

        assert!(!Arc::ptr_eq(&original, &recreated));
        assert!(recreated.conversation().lock().await.is_empty());
    }

    #[test]
    fn for_each_visits_every_session() {
        let store = SessionStore::new();
        store.get_or_create("10.0.0.5");
        store.get_or_create("10.0.0.6");
        store.get_or_create("10.0.0.7");

        let mut seen = Vec::new();
        store.for_each(|session| seen.push(session.identifier().to_string()));

        seen.sort();
        assert_eq!(seen, vec!["10.0.0.5", "10.0.0.6", "10.0.0.7"]);
    }
}
