// Session cache
// Holds the active session and serializes credential exchanges

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use tokio::sync::{watch, RwLock};

use crate::auth::{Session, SessionStore};
use crate::error::{AuthError, Result};

type FlightResult = Option<Result<Session>>;

/// Process-wide store of the active session
///
/// At most one exchange runs at a time: the first caller to miss the cache
/// becomes the leader, later callers wait for the leader's outcome.
pub struct SessionCache {
    /// Current session
    current: RwLock<Option<Session>>,

    /// Receiver for the exchange in flight, if any
    in_flight: Mutex<Option<watch::Receiver<FlightResult>>>,

    /// Optional on-disk copy of the session
    persistent: Option<PersistentStore>,
}

/// Session file plus the fingerprint of every method that may write to it
struct PersistentStore {
    store: SessionStore,
    fingerprints: HashMap<String, String>,
}

enum Flight {
    Leader(watch::Sender<FlightResult>),
    Follower(watch::Receiver<FlightResult>),
}

/// Clears the in-flight marker when the leader finishes or is dropped
struct FlightGuard<'a> {
    cache: &'a SessionCache,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self
            .cache
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *in_flight = None;
    }
}

impl SessionCache {
    /// In-memory cache only
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
            in_flight: Mutex::new(None),
            persistent: None,
        }
    }

    /// Cache backed by a session file
    ///
    /// `fingerprints` maps each method identifier to its
    /// `AuthMethod::fingerprint`; sessions from other methods are not written.
    pub fn with_store(store: SessionStore, fingerprints: HashMap<String, String>) -> Self {
        Self {
            persistent: Some(PersistentStore { store, fingerprints }),
            ..Self::new()
        }
    }

    /// Current session, unless absent or expired
    pub async fn get(&self) -> Option<Session> {
        let current = self.current.read().await;
        current.as_ref().filter(|s| !s.is_expired()).cloned()
    }

    /// Replace the current session
    pub async fn store(&self, session: Session) {
        if let Some(ref persistent) = self.persistent {
            // The in-memory session stays usable even if the file cannot be written
            if let Err(e) = persistent.save(&session).await {
                tracing::warn!(error = %e, "Failed to persist session");
            }
        }

        let mut current = self.current.write().await;
        *current = Some(session);
    }

    /// Drop the current session (logout)
    pub async fn invalidate(&self) -> Result<()> {
        {
            let mut current = self.current.write().await;
            *current = None;
        }

        if let Some(ref persistent) = self.persistent {
            let store = persistent.store.clone();
            run_blocking(move || store.clear()).await?;
        }

        tracing::info!("Session invalidated");
        Ok(())
    }

    /// Seed the cache from the session file
    ///
    /// The stored session is used only if it was produced by `expected_method`
    /// with the credential that method is configured with now. Returns whether
    /// a still-valid session was loaded.
    pub async fn load_persisted(&self, expected_method: Option<&str>) -> Result<bool> {
        let Some(ref persistent) = self.persistent else {
            return Ok(false);
        };

        let store = persistent.store.clone();
        let Some(stored) = run_blocking(move || store.load()).await? else {
            return Ok(false);
        };

        let matches = expected_method
            .filter(|method| *method == stored.session.method)
            .and_then(|method| persistent.fingerprints.get(method))
            .is_some_and(|fingerprint| *fingerprint == stored.fingerprint);

        if !matches {
            tracing::info!(
                method = %stored.session.method,
                expected = ?expected_method,
                "Persisted session belongs to other credentials, ignoring"
            );
            return Ok(false);
        }

        tracing::info!(
            method = %stored.session.method,
            expires_at = %stored.session.expires_at.to_rfc3339(),
            "Loaded persisted session"
        );
        let mut current = self.current.write().await;
        *current = Some(stored.session);
        Ok(true)
    }

    /// Run `exchange` unless another caller is already running one
    ///
    /// Every concurrent caller receives the same session or the same error.
    /// The session is stored before waiters are released. If the leader is
    /// dropped or cancelled, a waiting caller takes over and runs its own
    /// `exchange`.
    pub async fn single_flight<F, Fut>(&self, exchange: F) -> Result<Session>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Session>>,
    {
        let tx = loop {
            match self.join_flight() {
                Flight::Leader(tx) => break tx,
                Flight::Follower(mut rx) => {
                    tracing::debug!("Waiting for in-flight exchange");
                    if let Ok(outcome) = rx.wait_for(|result| result.is_some()).await {
                        if let Some(result) = outcome.clone() {
                            return result;
                        }
                    }
                    tracing::debug!("In-flight exchange abandoned, taking over");
                }
            }
        };

        let _guard = FlightGuard { cache: self };

        // A previous leader may have stored a session after our cache miss
        if let Some(session) = self.get().await {
            let _ = tx.send(Some(Ok(session.clone())));
            return Ok(session);
        }

        let result = exchange().await;
        if let Ok(ref session) = result {
            self.store(session.clone()).await;
        }

        // A cancellation belongs to this caller only; waiters retry instead
        if !matches!(result, Err(AuthError::Cancelled)) {
            let _ = tx.send(Some(result.clone()));
        }
        result
    }

    fn join_flight(&self) -> Flight {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match in_flight.as_ref() {
            Some(rx) => Flight::Follower(rx.clone()),
            None => {
                let (tx, rx) = watch::channel(None);
                *in_flight = Some(rx);
                Flight::Leader(tx)
            }
        }
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistentStore {
    async fn save(&self, session: &Session) -> Result<()> {
        let Some(fingerprint) = self.fingerprints.get(&session.method).cloned() else {
            tracing::debug!(method = %session.method, "No fingerprint for method, not persisting");
            return Ok(());
        };

        let store = self.store.clone();
        let session = session.clone();
        run_blocking(move || store.save(&session, &fingerprint)).await
    }
}

/// File locking and I/O stay off the async workers
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AuthError::Store(format!("session store task failed: {}", e)))?
}
