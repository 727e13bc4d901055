//! Request authentication.
//!
//! The REST surface and the WebSocket channel share one API-key scheme; an
//! empty configured key disables authentication entirely.

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credentials provided")]
    NotAuthenticated,

    #[error("invalid credentials")]
    InvalidCredentials,
}

/// Lowercased request headers plus the source address.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub headers: HashMap<String, String>,
    pub source_ip: IpAddr,
}

/// The authenticated principal.
#[derive(Debug, Clone)]
pub struct Identity {
    pub subject: String,
    pub method: &'static str,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            subject: "anonymous".to_string(),
            method: "none",
        }
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    fn method(&self) -> &'static str;

    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError>;
}

/// Open access; every request is anonymous.
pub struct NoneAuthenticator;

#[async_trait]
impl Authenticator for NoneAuthenticator {
    fn method(&self) -> &'static str {
        "none"
    }

    async fn authenticate(&self, _request: &AuthRequest) -> Result<Identity, AuthError> {
        Ok(Identity::anonymous())
    }
}

/// Single API key, accepted as `Authorization: Bearer <key>` or
/// `X-Api-Key: <key>`.
pub struct ApiKeyAuthenticator {
    key: String,
}

impl ApiKeyAuthenticator {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    fn extract<'a>(request: &'a AuthRequest) -> Option<&'a str> {
        if let Some(header) = request.headers.get("authorization") {
            if let Some(key) = header
                .strip_prefix("Bearer ")
                .or_else(|| header.strip_prefix("bearer "))
            {
                return Some(key);
            }
        }
        request.headers.get("x-api-key").map(String::as_str)
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    fn method(&self) -> &'static str {
        "api_key"
    }

    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError> {
        let provided = Self::extract(request).ok_or(AuthError::NotAuthenticated)?;
        if constant_time_eq(provided.as_bytes(), self.key.as_bytes()) {
            Ok(Identity {
                subject: "api".to_string(),
                method: "api_key",
            })
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }
}

/// Build the authenticator for the configured key.
pub fn create_authenticator(api_key: &str) -> Box<dyn Authenticator> {
    if api_key.is_empty() {
        Box::new(NoneAuthenticator)
    } else {
        Box::new(ApiKeyAuthenticator::new(api_key))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
