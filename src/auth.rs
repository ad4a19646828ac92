//! Streaming-credential acquisition.
//!
//! The speech backend is never contacted with long-lived user credentials.
//! Instead the app backend mints a short-lived streaming token (after
//! checking subscription/voucher entitlement) and returns the WebSocket
//! endpoint to dial. A rejected user credential gets exactly one silent
//! refresh-and-retry; a second rejection is terminal for the attempt.

use async_trait::async_trait;
use log::{info, warn};
use serde::Deserialize;
use std::sync::Mutex;
use thiserror::Error;

use crate::error::SessionError;

/// A short-lived credential plus the endpoint it is valid for.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StreamToken {
    pub token: String,
    #[serde(rename = "websocketUrl")]
    pub websocket_url: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    /// The account lacks entitlement (no subscription, voucher, or admin
    /// override). Carries the server's user-facing message.
    #[error("access denied: {0}")]
    AccessDenied(String),
    /// The bearer credential was rejected as invalid or expired.
    #[error("invalid or expired credential")]
    InvalidCredential,
    #[error("token request failed: {0}")]
    Network(String),
}

/// Collaborator that mints streaming tokens and can refresh the stored
/// user credential.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self) -> Result<StreamToken, TokenError>;

    /// Silently refresh the stored user credential. Called at most once per
    /// recording attempt.
    async fn refresh_credentials(&self) -> Result<(), TokenError>;
}

/// Acquire a streaming token, applying the one-shot refresh policy.
///
/// Only an `InvalidCredential` rejection triggers the refresh; entitlement
/// denials and network failures surface immediately. A failure after the
/// refresh maps to `SessionExpired` so the host can prompt for login.
pub async fn acquire_stream_token(issuer: &dyn TokenIssuer) -> Result<StreamToken, SessionError> {
    match issuer.issue().await {
        Ok(token) => Ok(token),
        Err(TokenError::InvalidCredential) => {
            info!("streaming token rejected, attempting one silent credential refresh");
            if let Err(e) = issuer.refresh_credentials().await {
                warn!("credential refresh failed: {}", e);
                return Err(SessionError::SessionExpired);
            }
            issuer.issue().await.map_err(|e| {
                warn!("token request failed after refresh: {}", e);
                SessionError::SessionExpired
            })
        }
        Err(TokenError::AccessDenied(message)) => Err(SessionError::TokenAcquisition(message)),
        Err(TokenError::Network(message)) => Err(SessionError::TokenAcquisition(message)),
    }
}

#[derive(Debug, Clone)]
struct StoredCredentials {
    access_token: String,
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    session: RefreshedSession,
}

#[derive(Debug, Deserialize)]
struct RefreshedSession {
    access_token: String,
    refresh_token: String,
}

/// `TokenIssuer` backed by the app backend's HTTP API.
pub struct HttpTokenIssuer {
    base_url: String,
    credentials: Mutex<StoredCredentials>,
    client: reqwest::Client,
}

impl HttpTokenIssuer {
    pub fn new(base_url: impl Into<String>, access_token: String, refresh_token: String) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: Mutex::new(StoredCredentials {
                access_token,
                refresh_token,
            }),
            client: reqwest::Client::new(),
        }
    }

    fn access_token(&self) -> String {
        self.credentials.lock().unwrap().access_token.clone()
    }

    fn refresh_token(&self) -> String {
        self.credentials.lock().unwrap().refresh_token.clone()
    }

    fn store(&self, access_token: String, refresh_token: String) {
        let mut creds = self.credentials.lock().unwrap();
        creds.access_token = access_token;
        creds.refresh_token = refresh_token;
    }

    async fn error_message(response: reqwest::Response, fallback: &str) -> String {
        let body = response.text().await.unwrap_or_default();
        serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.error)
            .unwrap_or_else(|_| fallback.to_string())
    }
}

#[async_trait]
impl TokenIssuer for HttpTokenIssuer {
    async fn issue(&self) -> Result<StreamToken, TokenError> {
        let response = self
            .client
            .post(format!("{}/api/soniox/token", self.base_url))
            .header("Authorization", format!("Bearer {}", self.access_token()))
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| TokenError::Network(e.to_string()))?;

        match response.status().as_u16() {
            200 => response
                .json::<StreamToken>()
                .await
                .map_err(|e| TokenError::Network(e.to_string())),
            401 => Err(TokenError::InvalidCredential),
            403 => Err(TokenError::AccessDenied(
                Self::error_message(response, "Access denied").await,
            )),
            _ => Err(TokenError::Network(
                Self::error_message(response, "Failed to get token").await,
            )),
        }
    }

    async fn refresh_credentials(&self) -> Result<(), TokenError> {
        let response = self
            .client
            .post(format!("{}/api/auth/refresh", self.base_url))
            .json(&serde_json::json!({ "refresh_token": self.refresh_token() }))
            .send()
            .await
            .map_err(|e| TokenError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TokenError::InvalidCredential);
        }

        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| TokenError::Network(e.to_string()))?;
        self.store(
            refreshed.session.access_token,
            refreshed.session.refresh_token,
        );
        info!("credentials refreshed");
        Ok(())
    }
}
