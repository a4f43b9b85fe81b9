//! Single-use CSRF state for the OIDC redirect round trip.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use tokio_util::sync::CancellationToken;

use super::clock::Clock;

/// Lifetime of a login state.
pub const STATE_TTL_MINUTES: i64 = 10;

const STATE_BYTES: usize = 32;
const CLEANUP_INTERVAL: StdDuration = StdDuration::from_secs(60);

#[derive(Debug, Clone)]
struct CsrfState {
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

struct Inner {
    states: Mutex<HashMap<String, CsrfState>>,
    clock: Arc<dyn Clock>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, CsrfState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut states = self.lock();
        let before = states.len();
        states.retain(|_, state| now <= state.expires_at);
        before - states.len()
    }
}

/// In-memory store of pending login states.
///
/// Owns one background task that drops expired entries once a minute. It stops on
/// [`StateStore::shutdown`] or when the store is dropped.
pub struct StateStore {
    inner: Arc<Inner>,
    cancel: CancellationToken,
}

impl StateStore {
    /// Create a store and start its cleanup task on the current Tokio runtime.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let inner = Arc::new(Inner {
            states: Mutex::new(HashMap::new()),
            clock,
        });
        let cancel = CancellationToken::new();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(cleanup_loop(inner.clone(), cancel.clone()));
            }
            Err(_) => {
                log::debug!("no tokio runtime, CSRF state cleanup runs only on lookup");
            }
        }

        Self { inner, cancel }
    }

    /// Generate and remember a fresh state token.
    pub fn create(&self) -> String {
        let mut bytes = [0u8; STATE_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        let now = self.inner.clock.now();
        let state = CsrfState {
            created_at: now,
            expires_at: now + Duration::minutes(STATE_TTL_MINUTES),
        };
        self.inner.lock().insert(token.clone(), state);

        token
    }

    /// Remove `token` and report whether it was known and unexpired.
    ///
    /// The entry is removed whatever the outcome, so a token validates at most once.
    pub fn validate_and_consume(&self, token: &str) -> bool {
        let now = self.inner.clock.now();
        match self.inner.lock().remove(token) {
            Some(state) if now <= state.expires_at => true,
            Some(state) => {
                log::debug!(
                    "login state expired after {}s",
                    (now - state.created_at).num_seconds()
                );
                false
            }
            None => false,
        }
    }

    /// Number of pending states, expired ones included until cleanup runs.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries now.
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    /// Stop the cleanup task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for StateStore {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("pending", &self.len())
            .finish()
    }
}

async fn cleanup_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    let start = tokio::time::Instant::now() + CLEANUP_INTERVAL;
    let mut interval = tokio::time::interval_at(start, CLEANUP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let removed = inner.purge_expired();
        if removed > 0 {
            tracing::debug!(removed, "purged expired login states");
        }
    }

    tracing::debug!("login state cleanup stopped");
}
