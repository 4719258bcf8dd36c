//! Concrete login flows
//!
//! Two ways to establish a session:
//! - [`StoredStateFlow`] replays a pre-captured auth state file (headers
//!   plus optional browser storage state), for setups where login needs a
//!   manual step done once out of band.
//! - [`HttpLoginFlow`] drives the login endpoint directly with secrets
//!   from the environment (see `config::secrets`) and captures the
//!   returned token and headers.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::harvesting::error::SessionError;
use crate::harvesting::session::{CapturedAuth, CredentialObserver, LoginFlow};
use crate::infrastructure::config::secrets;

/// Replays auth state captured earlier (for example after a manual login)
pub struct StoredStateFlow {
    path: PathBuf,
}

impl StoredStateFlow {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LoginFlow for StoredStateFlow {
    async fn run(&self, observer: CredentialObserver) -> Result<(), SessionError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            SessionError::FlowFailed(format!(
                "auth state file {} unreadable: {e}",
                self.path.display()
            ))
        })?;
        let auth: CapturedAuth = serde_json::from_str(&content).map_err(|e| {
            SessionError::FlowFailed(format!(
                "auth state file {} not parseable: {e}",
                self.path.display()
            ))
        })?;
        if auth.headers.is_empty() && auth.storage_state.is_none() {
            return Err(SessionError::FlowFailed(format!(
                "auth state file {} holds no usable state",
                self.path.display()
            )));
        }

        debug!("replaying stored auth state from {}", self.path.display());
        observer.observe(auth);
        Ok(())
    }
}

/// Drives the login endpoint with environment secrets.
///
/// The credential submission and the verification PIN go in one request;
/// the captured credential comes from the response token and headers.
pub struct HttpLoginFlow {
    login_endpoint: String,
    client: Client,
}

impl HttpLoginFlow {
    pub fn new(login_endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SessionError> {
        let client = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| SessionError::FlowFailed(format!("failed to build login client: {e}")))?;
        Ok(Self {
            login_endpoint: login_endpoint.into(),
            client,
        })
    }

    fn required_secret(name: &str) -> Result<String, SessionError> {
        std::env::var(name)
            .ok()
            .filter(|value| !value.is_empty())
            .ok_or_else(|| SessionError::MissingSecrets(name.to_string()))
    }
}

#[async_trait]
impl LoginFlow for HttpLoginFlow {
    async fn run(&self, observer: CredentialObserver) -> Result<(), SessionError> {
        let email = Self::required_secret(secrets::EMAIL)?;
        let password = Self::required_secret(secrets::PASSWORD)?;
        let pin = std::env::var(secrets::PIN).ok().filter(|value| !value.is_empty());

        let mut body = json!({"email": email, "password": password});
        if let Some(pin) = pin {
            body["pin"] = Value::String(pin);
        }

        info!("🔐 driving login flow against {}", self.login_endpoint);
        let response = self
            .client
            .post(&self.login_endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| SessionError::FlowFailed(format!("login request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::FlowFailed(format!(
                "login endpoint answered {status}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| SessionError::FlowFailed(format!("login response not readable: {e}")))?;

        observer.observe(captured_from_login_payload(&payload)?);
        Ok(())
    }
}

fn captured_from_login_payload(payload: &Value) -> Result<CapturedAuth, SessionError> {
    let mut headers = HashMap::new();

    if let Some(token) = payload.get("token").and_then(Value::as_str) {
        headers.insert("authorization".to_string(), format!("Bearer {token}"));
    }
    if let Some(extra) = payload.get("headers").and_then(Value::as_object) {
        for (name, value) in extra {
            if let Some(value) = value.as_str() {
                headers.insert(name.clone(), value.to_string());
            }
        }
    }

    if headers.is_empty() {
        return Err(SessionError::FlowFailed(
            "login response carried no token or headers".to_string(),
        ));
    }

    Ok(CapturedAuth {
        headers,
        storage_state: payload.get("storage_state").cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvesting::session::SessionManager;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_stored_state_flow_establishes_a_session() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("auth_state.json");
        std::fs::write(
            &state_path,
            r#"{"headers": {"authorization": "Bearer stored-token"}, "storage_state": null}"#,
        )
        .unwrap();

        let session = SessionManager::new(
            Arc::new(StoredStateFlow::new(&state_path)),
            Duration::from_secs(1),
        );
        let credential = session.login().await.unwrap();

        assert_eq!(
            credential.headers.get("authorization").map(String::as_str),
            Some("Bearer stored-token")
        );
        assert_eq!(credential.generation, 1);
    }

    #[tokio::test]
    async fn test_stored_state_flow_rejects_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("auth_state.json");
        std::fs::write(&state_path, r#"{"headers": {}, "storage_state": null}"#).unwrap();

        let session = SessionManager::new(
            Arc::new(StoredStateFlow::new(&state_path)),
            Duration::from_secs(1),
        );

        assert!(matches!(
            session.login().await,
            Err(SessionError::FlowFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_stored_state_flow_reports_missing_file() {
        let session = SessionManager::new(
            Arc::new(StoredStateFlow::new("/nonexistent/auth_state.json")),
            Duration::from_secs(1),
        );

        assert!(matches!(
            session.login().await,
            Err(SessionError::FlowFailed(_))
        ));
    }

    #[test]
    fn test_login_payload_with_token_becomes_bearer_header() {
        let payload = json!({"token": "abc123", "headers": {"x-session": "s1"}});
        let auth = captured_from_login_payload(&payload).unwrap();

        assert_eq!(
            auth.headers.get("authorization").map(String::as_str),
            Some("Bearer abc123")
        );
        assert_eq!(auth.headers.get("x-session").map(String::as_str), Some("s1"));
    }

    #[test]
    fn test_login_payload_without_credentials_is_rejected() {
        let payload = json!({"status": "ok"});
        assert!(matches!(
            captured_from_login_payload(&payload),
            Err(SessionError::FlowFailed(_))
        ));
    }
}
