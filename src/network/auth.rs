//! Authentication Interceptor
//!
//! Attaches the stored access token to outbound requests and performs the
//! 401-driven token refresh. Refresh is single-flight: concurrent callers
//! queue on one lock, and a caller that finds the token already rotated
//! replays with it instead of refreshing again.

use crate::credentials::{CredentialStore, TokenKind};
use crate::error::NetworkError;
use crate::network::classify::{classify_status, classify_transport};
use crate::telemetry::Telemetry;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Bearer-token interceptor over the credential store
pub struct AuthInterceptor {
    credentials: CredentialStore,
    http: reqwest::Client,
    refresh_url: String,
    timeout: Duration,
    refresh_lock: Mutex<()>,
    telemetry: Telemetry,
}

impl AuthInterceptor {
    pub fn new(
        credentials: CredentialStore,
        http: reqwest::Client,
        refresh_url: impl Into<String>,
        timeout: Duration,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            credentials,
            http,
            refresh_url: refresh_url.into(),
            timeout,
            refresh_lock: Mutex::new(()),
            telemetry,
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Current access token, if one is stored and readable
    pub async fn access_token(&self) -> Option<String> {
        match self.credentials.access_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Cannot read access token, sending request unauthenticated");
                None
            }
        }
    }

    /// Obtain a fresh access token after `rejected` was refused with a 401
    ///
    /// Makes at most one refresh call per invocation. Errors are returned to
    /// the client, which surfaces the original 401 instead.
    pub async fn refresh(&self, rejected: Option<&str>) -> Result<String, NetworkError> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(current) = self.access_token().await {
            if Some(current.as_str()) != rejected {
                debug!("Access token already rotated by a concurrent refresh");
                return Ok(current);
            }
        }

        let refresh_token = match self.credentials.refresh_token().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                self.telemetry.record_refresh(false);
                return Err(NetworkError::Unauthorized(
                    "No refresh token stored".to_string(),
                ));
            }
            Err(e) => {
                self.telemetry.record_refresh(false);
                return Err(NetworkError::Unknown(format!(
                    "Cannot read refresh token: {}",
                    e
                )));
            }
        };

        let result = self.call_refresh(&refresh_token).await;
        self.telemetry.record_refresh(result.is_ok());
        match &result {
            Ok(_) => info!("Access token refreshed"),
            Err(e) => warn!(kind = %e.kind(), "Token refresh failed"),
        }
        result
    }

    async fn call_refresh(&self, refresh_token: &str) -> Result<String, NetworkError> {
        let response = self
            .http
            .post(&self.refresh_url)
            .timeout(self.timeout)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| classify_transport(&e))?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &headers, &body));
        }

        let parsed: RefreshResponse = serde_json::from_slice(&body)
            .map_err(|e| NetworkError::ParseError(format!("Refresh response: {}", e)))?;

        self.credentials
            .save(TokenKind::Access, parsed.token.clone(), None)
            .await
            .map_err(|e| NetworkError::Unknown(format!("Cannot store access token: {}", e)))?;

        if let Some(rotated) = parsed.refresh_token {
            self.credentials
                .save(TokenKind::Refresh, rotated, None)
                .await
                .map_err(|e| {
                    NetworkError::Unknown(format!("Cannot store refresh token: {}", e))
                })?;
        }

        Ok(parsed.token)
    }
}

impl std::fmt::Debug for AuthInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthInterceptor")
            .field("refresh_url", &self.refresh_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn interceptor(server: &MockServer, credentials: CredentialStore) -> AuthInterceptor {
        AuthInterceptor::new(
            credentials,
            reqwest::Client::new(),
            format!("{}/auth/refresh", server.uri()),
            Duration::from_secs(5),
            Telemetry::new().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_refresh_stores_rotated_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(serde_json::json!({"refreshToken": "r1"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"token": "a2", "refreshToken": "r2"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let credentials = CredentialStore::in_memory();
        credentials.save(TokenKind::Access, "a1", None).await.unwrap();
        credentials.save(TokenKind::Refresh, "r1", None).await.unwrap();

        let auth = interceptor(&server, credentials.clone());
        assert_eq!(auth.refresh(Some("a1")).await.unwrap(), "a2");
        assert_eq!(credentials.access_token().await.unwrap().as_deref(), Some("a2"));
        assert_eq!(credentials.refresh_token().await.unwrap().as_deref(), Some("r2"));
        assert_eq!(auth.telemetry.refreshes(true), 1);
    }

    #[tokio::test]
    async fn test_missing_refresh_token() {
        let server = MockServer::start().await;
        let auth = interceptor(&server, CredentialStore::in_memory());
        assert_matches!(auth.refresh(None).await, Err(NetworkError::Unauthorized(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"token": "fresh"}))
                    .set_delay(Duration::from_millis(50)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let credentials = CredentialStore::in_memory();
        credentials.save(TokenKind::Access, "stale", None).await.unwrap();
        credentials.save(TokenKind::Refresh, "r", None).await.unwrap();
        let auth = Arc::new(interceptor(&server, credentials));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let auth = auth.clone();
                tokio::spawn(async move { auth.refresh(Some("stale")).await })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "fresh");
        }
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(serde_json::json!({"detail": "revoked"})),
            )
            .mount(&server)
            .await;

        let credentials = CredentialStore::in_memory();
        credentials.save(TokenKind::Refresh, "r", None).await.unwrap();
        let auth = interceptor(&server, credentials);

        assert_matches!(
            auth.refresh(None).await,
            Err(NetworkError::Unauthorized(message)) if message == "revoked"
        );
        assert_eq!(auth.telemetry.refreshes(false), 1);
    }
}
