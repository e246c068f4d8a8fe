//! HTTP error handling and response mapping.
//!
//! Every failure leaves the endpoint as a structured JSON body. OpenAI routes
//! use `{"error": {message, type, param, code}}`; the Anthropic route wraps
//! the same error in [`AnthropicError`] to get `{"type":"error","error":{type, message}}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::generation::GenerationError;
use crate::protocol::{anthropic, openai};

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("The model `{0}` does not exist or you do not have access to it.")]
    ModelNotFound(String),

    #[error("Server at capacity, try again later")]
    Overloaded,

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Error making request to upstream API: {0}")]
    UpstreamUnavailable(String),

    #[error("Error response from upstream API: {status}")]
    Upstream { status: StatusCode },

    #[error("internal error: {0}")]
    Internal(String),
}

impl EndpointError {
    pub fn status(&self) -> StatusCode {
        match self {
            EndpointError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            EndpointError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            EndpointError::ModelNotFound(_) => StatusCode::NOT_FOUND,
            EndpointError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            EndpointError::Generation(GenerationError::Failed(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            EndpointError::Generation(GenerationError::TimedOut(_)) => StatusCode::GATEWAY_TIMEOUT,
            EndpointError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            EndpointError::Upstream { status } => *status,
            EndpointError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// `error.type` in the OpenAI payload.
    pub fn openai_type(&self) -> &'static str {
        match self {
            EndpointError::InvalidRequest(_) | EndpointError::ModelNotFound(_) => {
                "invalid_request_error"
            }
            EndpointError::Unauthorized(_) => "authentication_error",
            EndpointError::Overloaded
            | EndpointError::Generation(_)
            | EndpointError::Internal(_) => "server_error",
            EndpointError::UpstreamUnavailable(_) | EndpointError::Upstream { .. } => {
                "upstream_error"
            }
        }
    }

    /// `error.code` in the OpenAI payload.
    pub fn openai_code(&self) -> Option<&'static str> {
        match self {
            EndpointError::ModelNotFound(_) => Some("model_not_found"),
            EndpointError::Unauthorized(_) => Some("invalid_api_key"),
            EndpointError::Generation(GenerationError::TimedOut(_)) => Some("timeout"),
            _ => None,
        }
    }

    /// `error.type` in the Anthropic payload.
    pub fn anthropic_type(&self) -> &'static str {
        match self {
            EndpointError::InvalidRequest(_) => "invalid_request_error",
            EndpointError::Unauthorized(_) => "authentication_error",
            EndpointError::ModelNotFound(_) => "not_found_error",
            EndpointError::Overloaded => "overloaded_error",
            EndpointError::Generation(GenerationError::TimedOut(_)) => "timeout_error",
            EndpointError::Generation(_)
            | EndpointError::UpstreamUnavailable(_)
            | EndpointError::Upstream { .. }
            | EndpointError::Internal(_) => "api_error",
        }
    }

    /// Short label for the error counter.
    pub fn label(&self) -> &'static str {
        match self {
            EndpointError::InvalidRequest(_) => "invalid_request",
            EndpointError::Unauthorized(_) => "unauthorized",
            EndpointError::ModelNotFound(_) => "model_not_found",
            EndpointError::Overloaded => "overloaded",
            EndpointError::Generation(GenerationError::Failed(_)) => "generation_failed",
            EndpointError::Generation(GenerationError::TimedOut(_)) => "timeout",
            EndpointError::UpstreamUnavailable(_) => "upstream_unavailable",
            EndpointError::Upstream { .. } => "upstream_status",
            EndpointError::Internal(_) => "internal",
        }
    }

    pub fn openai_body(&self) -> openai::ErrorBody {
        openai::ErrorBody {
            error: openai::ErrorDetail {
                message: self.to_string(),
                kind: self.openai_type().to_string(),
                param: None,
                code: self.openai_code().map(String::from),
            },
        }
    }

    pub fn anthropic_detail(&self) -> anthropic::ErrorDetail {
        anthropic::ErrorDetail {
            kind: self.anthropic_type().to_string(),
            message: self.to_string(),
        }
    }
}

impl IntoResponse for EndpointError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.openai_body())).into_response()
    }
}

/// [`EndpointError`] rendered in the Anthropic error shape.
#[derive(Debug)]
pub struct AnthropicError(pub EndpointError);

impl From<EndpointError> for AnthropicError {
    fn from(err: EndpointError) -> Self {
        AnthropicError(err)
    }
}

impl From<GenerationError> for AnthropicError {
    fn from(err: GenerationError) -> Self {
        AnthropicError(err.into())
    }
}

impl IntoResponse for AnthropicError {
    fn into_response(self) -> Response {
        let body = anthropic::ErrorBody {
            kind: "error".to_string(),
            error: self.0.anthropic_detail(),
        };
        (self.0.status(), Json(body)).into_response()
    }
}

/// Decode a JSON request body, reporting problems as a client error.
pub fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, EndpointError> {
    if body.is_empty() {
        return Err(EndpointError::InvalidRequest(
            "Request body is empty; expected a JSON object".to_string(),
        ));
    }
    serde_json::from_slice(body)
        .map_err(|e| EndpointError::InvalidRequest(format!("Invalid request body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            EndpointError::InvalidRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            EndpointError::ModelNotFound("m".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            EndpointError::from(GenerationError::Failed("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            EndpointError::from(GenerationError::TimedOut(Duration::from_secs(1))).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            EndpointError::Upstream {
                status: StatusCode::TOO_MANY_REQUESTS
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_openai_body() {
        let body = EndpointError::ModelNotFound("gpt-9".into()).openai_body();
        assert_eq!(body.error.kind, "invalid_request_error");
        assert_eq!(body.error.code.as_deref(), Some("model_not_found"));
        assert!(body.error.message.contains("gpt-9"));
    }

    #[test]
    fn test_parse_body_reports_missing_field() {
        let err = parse_body::<crate::protocol::openai::ChatCompletionRequest>(br#"{"model":"gpt-4"}"#)
            .unwrap_err();
        assert!(matches!(err, EndpointError::InvalidRequest(ref m) if m.contains("messages")));
        assert!(matches!(
            parse_body::<serde_json::Value>(b""),
            Err(EndpointError::InvalidRequest(_))
        ));
    }
}
