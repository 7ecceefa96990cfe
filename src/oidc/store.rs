//! State Store
//!
//! The single mutable resource of the protocol engine. [`StateStore`] holds
//! the current [`LocalState`] snapshot, serialises every read-modify-write
//! behind an async mutex, persists each new snapshot through a
//! [`StatePersistence`] collaborator and then publishes it to subscribers.
//!
//! Subscribers get replay-latest semantics: [`StateStore::changes`] yields
//! the current snapshot immediately, then every later one.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::{watch, Mutex, RwLock};
use tokio_stream::wrappers::WatchStream;

use crate::error::Result;
use crate::oidc::models::{LocalState, LocalStatePatch, PendingAuthorizeRequest};

// ---------------------------------------------------------------------------
// Persistence collaborator
// ---------------------------------------------------------------------------

/// Backing medium for [`LocalState`].
///
/// Implementations decide where the blob lives (memory, OS keyring, ...).
/// The store never calls these methods concurrently.
#[async_trait]
pub trait StatePersistence: Send + Sync {
    /// Reads the stored state, `None` when nothing has been written yet.
    async fn read(&self) -> Result<Option<LocalState>>;

    /// Replaces the stored state.
    async fn write(&self, state: &LocalState) -> Result<()>;

    /// Removes the stored state.
    async fn clear(&self) -> Result<()>;
}

/// Process-local persistence. State is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    slot: RwLock<Option<LocalState>>,
}

impl MemoryPersistence {
    /// Creates an empty in-memory persistence.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatePersistence for MemoryPersistence {
    async fn read(&self) -> Result<Option<LocalState>> {
        Ok(self.slot.read().await.clone())
    }

    async fn write(&self, state: &LocalState) -> Result<()> {
        *self.slot.write().await = Some(state.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.slot.write().await = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// Serialised, persisted, observable holder of [`LocalState`].
///
/// # Examples
///
/// ```
/// use simple_oidc::oidc::models::LocalStatePatch;
/// use simple_oidc::oidc::store::StateStore;
///
/// # tokio_test::block_on(async {
/// let store = StateStore::in_memory();
/// store
///     .patch_state(LocalStatePatch {
///         access_token: Some("A".to_string()),
///         ..Default::default()
///     })
///     .await
///     .unwrap();
/// assert_eq!(store.get_state().access_token.as_deref(), Some("A"));
/// # });
/// ```
pub struct StateStore {
    persistence: Arc<dyn StatePersistence>,
    current: watch::Sender<LocalState>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("subscribers", &self.current.receiver_count())
            .finish_non_exhaustive()
    }
}

impl StateStore {
    /// Creates a store starting from the default (logged-out) state.
    ///
    /// Nothing is read from `persistence`; use [`StateStore::load`] to
    /// resume a persisted session.
    pub fn new(persistence: Arc<dyn StatePersistence>) -> Self {
        let (current, _) = watch::channel(LocalState::default());
        Self {
            persistence,
            current,
            write_lock: Mutex::new(()),
        }
    }

    /// Creates a store backed by [`MemoryPersistence`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryPersistence::new()))
    }

    /// Creates a store seeded with whatever `persistence` currently holds.
    ///
    /// # Errors
    ///
    /// Propagates the persistence read failure.
    pub async fn load(persistence: Arc<dyn StatePersistence>) -> Result<Self> {
        let initial = persistence.read().await?.unwrap_or_default();
        tracing::debug!(
            logged_in = initial.access_token.is_some(),
            pending = initial.pending_requests.len(),
            "Loaded persisted OIDC state"
        );
        let (current, _) = watch::channel(initial);
        Ok(Self {
            persistence,
            current,
            write_lock: Mutex::new(()),
        })
    }

    /// Returns a consistent snapshot of the current state.
    pub fn get_state(&self) -> LocalState {
        self.current.borrow().clone()
    }

    /// Subscribes to state changes.
    ///
    /// The stream yields the current snapshot first, then every subsequent
    /// one. Each call returns an independent subscription.
    pub fn changes(&self) -> WatchStream<LocalState> {
        WatchStream::new(self.current.subscribe())
    }

    /// Atomically applies `f` to the state.
    ///
    /// The new snapshot is persisted before it is published. When `f`
    /// leaves the state unchanged nothing is written or published. When
    /// persisting fails the published state is left untouched.
    ///
    /// # Errors
    ///
    /// Propagates the persistence write failure.
    pub async fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut LocalState) -> T,
    {
        let _guard = self.write_lock.lock().await;
        let mut next = self.get_state();
        let output = f(&mut next);
        if *self.current.borrow() != next {
            self.persistence.write(&next).await?;
            self.current.send_replace(next);
        }
        Ok(output)
    }

    /// Merges every field set in `patch` and persists the result.
    ///
    /// # Errors
    ///
    /// Propagates the persistence write failure.
    pub async fn patch_state(&self, patch: LocalStatePatch) -> Result<()> {
        self.update(|state| state.apply(patch)).await
    }

    /// Resets to the default state and clears persistence.
    ///
    /// # Errors
    ///
    /// Propagates the persistence clear failure.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.persistence.clear().await?;
        self.current.send_replace(LocalState::default());
        Ok(())
    }

    /// Records `pending` as the in-flight authorize request.
    ///
    /// Pending requests older than `max_age` are dropped in the same write,
    /// so abandoned flows do not accumulate.
    ///
    /// # Errors
    ///
    /// Propagates the persistence write failure.
    pub async fn store_pending(
        &self,
        pending: PendingAuthorizeRequest,
        max_age: Duration,
    ) -> Result<()> {
        let now = Utc::now();
        self.update(|state| {
            state.purge_expired_pending(max_age, now);
            state.begin_flow(pending);
        })
        .await
    }

    /// Removes and returns the pending request for `state`.
    ///
    /// Requests older than `max_age` are purged first and so are never
    /// returned. A second call for the same `state` returns `None`.
    ///
    /// # Errors
    ///
    /// Propagates the persistence write failure.
    pub async fn take_pending(
        &self,
        state: &str,
        max_age: Duration,
    ) -> Result<Option<PendingAuthorizeRequest>> {
        let now = Utc::now();
        self.update(|current| {
            current.purge_expired_pending(max_age, now);
            current.remove_pending(state)
        })
        .await
    }

    /// Drops the pending request for `state` without using it.
    ///
    /// # Errors
    ///
    /// Propagates the persistence write failure.
    pub async fn discard_pending(&self, state: &str) -> Result<()> {
        self.update(|current| {
            current.remove_pending(state);
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OidcError;
    use futures::StreamExt;
    use mockall::mock;

    mock! {
        Persistence {}

        #[async_trait]
        impl StatePersistence for Persistence {
            async fn read(&self) -> Result<Option<LocalState>>;
            async fn write(&self, state: &LocalState) -> Result<()>;
            async fn clear(&self) -> Result<()>;
        }
    }

    fn pending(state: &str) -> PendingAuthorizeRequest {
        PendingAuthorizeRequest {
            state: state.to_string(),
            nonce: "n".to_string(),
            code_verifier: "v".to_string(),
            code_challenge: "c".to_string(),
            redirect_uri: "https://app.example/cb".to_string(),
            requested_scopes: "openid".to_string(),
            created_at: Utc::now(),
        }
    }

    fn token_patch(token: &str) -> LocalStatePatch {
        LocalStatePatch {
            access_token: Some(token.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_patch_state_persists_and_publishes() {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = StateStore::new(persistence.clone());

        store.patch_state(token_patch("A")).await.unwrap();

        assert_eq!(store.get_state().access_token.as_deref(), Some("A"));
        let persisted = persistence.read().await.unwrap().unwrap();
        assert_eq!(persisted.access_token.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn test_load_resumes_persisted_state() {
        let persistence = Arc::new(MemoryPersistence::new());
        persistence
            .write(&LocalState {
                refresh_token: Some("R".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let store = StateStore::load(persistence).await.unwrap();
        assert_eq!(store.get_state().refresh_token.as_deref(), Some("R"));
    }

    #[tokio::test]
    async fn test_changes_replays_latest_then_updates() {
        let store = StateStore::in_memory();
        store.patch_state(token_patch("A")).await.unwrap();

        let mut changes = store.changes();
        let first = changes.next().await.unwrap();
        assert_eq!(first.access_token.as_deref(), Some("A"));

        store.patch_state(token_patch("B")).await.unwrap();
        let second = changes.next().await.unwrap();
        assert_eq!(second.access_token.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_each_subscription_is_independent() {
        let store = StateStore::in_memory();
        let mut early = store.changes();
        assert!(early.next().await.unwrap().access_token.is_none());

        store.patch_state(token_patch("A")).await.unwrap();

        let mut late = store.changes();
        assert_eq!(late.next().await.unwrap().access_token.as_deref(), Some("A"));
        assert_eq!(early.next().await.unwrap().access_token.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn test_clear_resets_state_and_persistence() {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = StateStore::new(persistence.clone());
        store.patch_state(token_patch("A")).await.unwrap();

        store.clear().await.unwrap();

        assert_eq!(store.get_state(), LocalState::default());
        assert!(persistence.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_take_pending_consumes_exactly_once() {
        let store = StateStore::in_memory();
        store.store_pending(pending("s1"), Duration::minutes(10)).await.unwrap();

        let first = store.take_pending("s1", Duration::minutes(10)).await.unwrap();
        let second = store.take_pending("s1", Duration::minutes(10)).await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert!(store.get_state().authorize_state.is_none());
    }

    #[tokio::test]
    async fn test_take_pending_treats_expired_request_as_absent() {
        let store = StateStore::in_memory();
        let mut stale = pending("old");
        stale.created_at = Utc::now() - Duration::minutes(30);
        store.store_pending(stale, Duration::hours(1)).await.unwrap();

        let taken = store.take_pending("old", Duration::minutes(10)).await.unwrap();
        assert!(taken.is_none());
        assert!(store.get_state().pending_requests.is_empty());
    }

    #[tokio::test]
    async fn test_store_pending_drops_abandoned_flows() {
        let store = StateStore::in_memory();
        for i in 0..50 {
            let mut abandoned = pending(&format!("old-{i}"));
            abandoned.created_at = Utc::now() - Duration::days(30);
            store.store_pending(abandoned, Duration::days(60)).await.unwrap();
        }
        assert_eq!(store.get_state().pending_requests.len(), 50);

        store
            .store_pending(pending("fresh"), Duration::minutes(10))
            .await
            .unwrap();

        let state = store.get_state();
        assert_eq!(state.pending_requests.len(), 1);
        assert!(state.pending_requests.contains_key("fresh"));
        assert_eq!(state.authorize_state.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_serialised() {
        let store = Arc::new(StateStore::in_memory());
        let mut tasks = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .store_pending(pending(&format!("s{i}")), Duration::minutes(10))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(store.get_state().pending_requests.len(), 20);
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_published_state_untouched() {
        let mut persistence = MockPersistence::new();
        persistence
            .expect_write()
            .returning(|_| Err(OidcError::Persistence("disk full".to_string())));

        let store = StateStore::new(Arc::new(persistence));
        let err = store.patch_state(token_patch("A")).await.unwrap_err();

        assert_eq!(err, OidcError::Persistence("disk full".to_string()));
        assert!(store.get_state().access_token.is_none());
    }

    #[tokio::test]
    async fn test_unchanged_update_does_not_write() {
        let mut persistence = MockPersistence::new();
        persistence.expect_write().never();

        let store = StateStore::new(Arc::new(persistence));
        store.discard_pending("unknown").await.unwrap();
    }
}
