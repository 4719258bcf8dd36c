//! # Session Management
//!
//! Obtains and renews the authenticated credential shared by every worker.
//! The credential is an immutable value swapped atomically under a single
//! coordination point; concurrent renewal requests collapse into exactly
//! one in-flight login, and all waiters observe the same fresh credential.
//!
//! Credential capture is modeled as an explicit observation: the login
//! flow receives an observer handle, drives the interactive steps, and the
//! manager awaits the first matching observation within a bound. No global
//! callback state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::harvesting::error::{ExtractError, SessionError};

/// Authenticated-session material observed from outgoing traffic.
///
/// Replaced wholesale on renewal, never mutated in place. The generation
/// number increases with every successful login so waiters can verify they
/// observed a credential at least as new as the one whose expiry they
/// reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub generation: u64,
    pub headers: HashMap<String, String>,
    pub storage_state: Option<serde_json::Value>,
    pub captured_at: DateTime<Utc>,
}

/// Raw material captured by a login flow: request headers seen on outgoing
/// authenticated traffic and/or exported browser storage state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapturedAuth {
    pub headers: HashMap<String, String>,
    pub storage_state: Option<serde_json::Value>,
}

/// Handle a login flow uses to report observed authentication material.
///
/// The first observation wins; later ones are ignored. Dropping every clone
/// deregisters the observation.
#[derive(Clone)]
pub struct CredentialObserver {
    tx: mpsc::Sender<CapturedAuth>,
}

impl CredentialObserver {
    /// Reports one observed authentication capture. Never blocks.
    pub fn observe(&self, captured: CapturedAuth) {
        if self.tx.try_send(captured).is_err() {
            debug!("credential observation dropped (already captured or slot closed)");
        }
    }
}

/// Interactive authentication flow: credential submission, secondary
/// verification, wait for the landing state. Implementations report what
/// they capture through the observer and fail with `MissingSecrets` when
/// required secrets are unset.
#[async_trait]
pub trait LoginFlow: Send + Sync {
    async fn run(&self, observer: CredentialObserver) -> Result<(), SessionError>;
}

/// Shared session manager.
///
/// The only cross-worker mutable object in a run. Readers snapshot the
/// credential once at attempt start; `renew` swaps in a new one atomically.
pub struct SessionManager {
    flow: Arc<dyn LoginFlow>,
    login_timeout: Duration,
    current: RwLock<Option<Arc<Credential>>>,
    // Single coordination point for renewals; holding it means one login
    // is in flight and every other renewal request waits on it.
    renew_guard: Mutex<()>,
    next_generation: AtomicU64,
    renewals: AtomicU64,
}

impl SessionManager {
    #[must_use]
    pub fn new(flow: Arc<dyn LoginFlow>, login_timeout: Duration) -> Self {
        Self {
            flow,
            login_timeout,
            current: RwLock::new(None),
            renew_guard: Mutex::new(()),
            next_generation: AtomicU64::new(0),
            renewals: AtomicU64::new(0),
        }
    }

    /// Drives the login flow and stores the captured credential.
    ///
    /// Fails with `LoginTimeout` when no authenticated traffic is observed
    /// within the configured bound.
    pub async fn login(&self) -> Result<Arc<Credential>, SessionError> {
        let credential = self.perform_login().await?;
        *self.current.write().await = Some(Arc::clone(&credential));
        info!(
            "🔑 session established (generation {}, {} headers)",
            credential.generation,
            credential.headers.len()
        );
        Ok(credential)
    }

    /// Snapshot of the current credential, taken once at attempt start
    pub async fn credential(&self) -> Result<Arc<Credential>, SessionError> {
        self.current
            .read()
            .await
            .as_ref()
            .map(Arc::clone)
            .ok_or(SessionError::NotAuthenticated)
    }

    /// True iff the failure calls for a coordinated session renewal
    #[must_use]
    pub fn needs_renewal(error: &ExtractError) -> bool {
        matches!(error, ExtractError::AuthExpired(_))
    }

    /// Renews the shared credential after an observed expiry of
    /// `expired_generation`.
    ///
    /// Concurrent calls coalesce: the first caller performs the login, the
    /// rest wait and return the credential it produced. The returned
    /// credential's generation is always greater than `expired_generation`.
    pub async fn renew(&self, expired_generation: u64) -> Result<Arc<Credential>, SessionError> {
        // Fast path: somebody already renewed past the reported expiry
        if let Some(current) = self.fresher_than(expired_generation).await {
            return Ok(current);
        }

        let _guard = self.renew_guard.lock().await;

        // Re-check under the guard; a renewal that completed while we
        // waited satisfies this request without another login.
        if let Some(current) = self.fresher_than(expired_generation).await {
            debug!(
                "renewal for generation {} satisfied by coalesced login (now {})",
                expired_generation, current.generation
            );
            return Ok(current);
        }

        warn!(
            "🔄 credential generation {} expired, renewing session",
            expired_generation
        );
        let credential = self.perform_login().await?;
        *self.current.write().await = Some(Arc::clone(&credential));
        self.renewals.fetch_add(1, Ordering::SeqCst);
        info!("✅ session renewed (generation {})", credential.generation);

        Ok(credential)
    }

    /// Number of renewals performed (excludes the initial login)
    #[must_use]
    pub fn renewal_count(&self) -> u64 {
        self.renewals.load(Ordering::SeqCst)
    }

    async fn fresher_than(&self, expired_generation: u64) -> Option<Arc<Credential>> {
        self.current
            .read()
            .await
            .as_ref()
            .filter(|c| c.generation > expired_generation)
            .map(Arc::clone)
    }

    async fn perform_login(&self) -> Result<Arc<Credential>, SessionError> {
        // Register the observation slot, then drive the flow. Capture may
        // land during the flow or shortly after; the slot buffers it.
        let (tx, mut rx) = mpsc::channel(4);
        let observer = CredentialObserver { tx };

        self.flow.run(observer).await?;

        let waited_secs = self.login_timeout.as_secs();
        let captured = tokio::time::timeout(self.login_timeout, rx.recv())
            .await
            .map_err(|_| SessionError::LoginTimeout { waited_secs })?
            .ok_or(SessionError::LoginTimeout { waited_secs })?;

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(Credential {
            generation,
            headers: captured.headers,
            storage_state: captured.storage_state,
            captured_at: Utc::now(),
        }))
    }
}
