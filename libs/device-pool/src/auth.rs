//! Credential handling and identity resolution.
//!
//! The session resolves its organization once, at start, through an
//! [`AuthProvider`]. [`HttpAuthProvider`] talks to the identity service over
//! HTTP; tests and the simulator use the in-memory provider.

use std::fmt;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AuthError;
use crate::models::CurrentUser;

/// How a token is presented in the authorization header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Bearer,
    #[default]
    #[serde(alias = "api_key")]
    ApiKey,
}

impl TokenType {
    fn scheme(self) -> &'static str {
        match self {
            TokenType::Bearer => "bearer",
            TokenType::ApiKey => "apikey",
        }
    }
}

/// A token and the scheme it is sent with. `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    token: String,
    token_type: TokenType,
}

impl Credentials {
    pub fn new(token: impl Into<String>, token_type: TokenType) -> Self {
        Self {
            token: token.into(),
            token_type,
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self::new(token, TokenType::Bearer)
    }

    pub fn api_key(token: impl Into<String>) -> Self {
        Self::new(token, TokenType::ApiKey)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn token_type(&self) -> TokenType {
        self.token_type
    }

    pub fn is_blank(&self) -> bool {
        self.token.trim().is_empty()
    }

    /// Value for the `authorization` header, e.g. `apikey <token>`.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type.scheme(), self.token)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token_type", &self.token_type)
            .finish_non_exhaustive()
    }
}

/// Resolves a credential to the user (and organization) it belongs to.
#[async_trait]
pub trait AuthProvider: Send + Sync + fmt::Debug + 'static {
    async fn current_user(&self, credentials: &Credentials) -> Result<CurrentUser, AuthError>;
}

/// Parse an identity-service response body.
///
/// A body carrying a non-null `error` is a rejection; a body without a
/// decodable `result` (or whose user has no org) is malformed.
pub fn parse_current_user(body: &[u8]) -> Result<CurrentUser, AuthError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| AuthError::Malformed(format!("invalid JSON: {e}")))?;

    if let Some(err) = value.get("error").filter(|err| !err.is_null()) {
        return Err(AuthError::Rejected(err.to_string()));
    }

    let result = value
        .get("result")
        .ok_or_else(|| AuthError::Malformed("response has no result".into()))?;
    let user: CurrentUser = serde_json::from_value(result.clone())
        .map_err(|e| AuthError::Malformed(format!("invalid user record: {e}")))?;

    if user.org.trim().is_empty() {
        return Err(AuthError::Malformed(format!("user {} has no org", user.id)));
    }
    Ok(user)
}

/// Identity service client: `GET {authority}/users/current`.
///
/// For embedders that supply their own network `DeviceStub`; the simulated
/// plane answers identity lookups itself.
#[derive(Debug, Clone)]
pub struct HttpAuthProvider {
    http: reqwest::Client,
    authority_url: String,
}

impl HttpAuthProvider {
    pub fn new(authority_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            authority_url: authority_url.into(),
        }
    }

    fn current_user_url(&self) -> String {
        format!("{}/users/current", self.authority_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl AuthProvider for HttpAuthProvider {
    async fn current_user(&self, credentials: &Credentials) -> Result<CurrentUser, AuthError> {
        if credentials.is_blank() {
            return Err(AuthError::MissingCredential);
        }
        let url = self.current_user_url();
        debug!(%url, token_type = ?credentials.token_type(), "resolving current user");

        let body = self
            .http
            .get(&url)
            .header(AUTHORIZATION, credentials.authorization_header())
            .send()
            .await
            .map_err(|e| AuthError::Transport(format!("request to '{url}' failed: {e}")))?
            .bytes()
            .await
            .map_err(|e| AuthError::Transport(format!("reading response from '{url}': {e}")))?;

        if body.is_empty() {
            return Err(AuthError::Malformed("no response body found".into()));
        }
        parse_current_user(&body)
    }
}
