//! HTTP error envelope.
//!
//! Every error leaving the API carries a stable machine-readable code, a
//! request id, and (where useful) a one-line operator hint. Messages never
//! include paths outside the media root or secret values.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use sublarr_core::{PipelineError, ProviderError, StoreError, TranslateError};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
    pub request_id: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub troubleshooting: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub troubleshooting: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            troubleshooting: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.troubleshooting = Some(hint.into());
        self
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", what.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "CONFIG_INVALID", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            code: self.code.to_string(),
            message: self.message,
            request_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339(),
            troubleshooting: self.troubleshooting,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match &e {
            StoreError::NotFound(what) => Self::not_found(what.clone()),
            StoreError::Locked => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "STORE_LOCKED", e.to_string())
            }
            StoreError::Corrupted(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORE_CORRUPTED",
                e.to_string(),
            ),
            _ => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORE_FAILED",
                e.to_string(),
            ),
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(e: ProviderError) -> Self {
        let provider = e.provider().unwrap_or("provider").to_string();
        match &e {
            ProviderError::Auth { .. } => Self::new(
                StatusCode::BAD_GATEWAY,
                "PROVIDER_AUTH",
                format!("{provider}: authentication failed"),
            )
            .with_hint(format!("verify the {provider} API key in settings")),
            ProviderError::Timeout { .. } => Self::new(
                StatusCode::GATEWAY_TIMEOUT,
                "PROVIDER_TIMEOUT",
                e.to_string(),
            ),
            ProviderError::RateLimited { .. } => Self::new(
                StatusCode::BAD_GATEWAY,
                "PROVIDER_RATE_LIMIT",
                e.to_string(),
            ),
            ProviderError::NotConfigured(_) => Self::new(
                StatusCode::BAD_REQUEST,
                "PROVIDER_NOT_CONFIGURED",
                e.to_string(),
            ),
            _ => Self::new(StatusCode::BAD_GATEWAY, "PROVIDER_FAILED", e.to_string()),
        }
    }
}

impl From<TranslateError> for ApiError {
    fn from(e: TranslateError) -> Self {
        match &e {
            TranslateError::BackendAuthInvalid(backend) => Self::new(
                StatusCode::BAD_GATEWAY,
                "TRANS_AUTH_INVALID",
                e.to_string(),
            )
            .with_hint(format!("verify the {backend} credentials in settings")),
            TranslateError::BackendTimeout { .. } => Self::new(
                StatusCode::GATEWAY_TIMEOUT,
                "TRANS_TIMEOUT",
                e.to_string(),
            ),
            TranslateError::LineCountMismatch { .. } => Self::new(
                StatusCode::BAD_GATEWAY,
                "TRANS_LINE_COUNT_MISMATCH",
                e.to_string(),
            ),
            TranslateError::HallucinationDetected { .. } => Self::new(
                StatusCode::BAD_GATEWAY,
                "TRANS_HALLUCINATION",
                e.to_string(),
            ),
            TranslateError::NoBackend { .. } => Self::new(
                StatusCode::BAD_REQUEST,
                "TRANS_NO_BACKEND",
                e.to_string(),
            )
            .with_hint("configure at least one translation backend, e.g. ollama_url"),
            _ => Self::new(StatusCode::BAD_GATEWAY, "TRANS_FAILED", e.to_string()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        let status = match &e {
            PipelineError::Cancelled => StatusCode::CONFLICT,
            PipelineError::NoSourceAvailable { .. }
            | PipelineError::UpgradeGateRejected { .. } => StatusCode::OK,
            PipelineError::PathOutsideMedia(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            code: e.code(),
            message: e.to_string(),
            troubleshooting: None,
        }
    }
}
