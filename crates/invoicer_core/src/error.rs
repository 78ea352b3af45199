//! Error taxonomy shared by every adapter
//!
//! Backend failures are surfaced unchanged in meaning: the adapters only
//! classify them, they never retry or recover.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AdapterError>;

/// Field-level validation failure reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl FieldError {
    pub fn new(
        field: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Diagnostic, Debug)]
pub enum AdapterError {
    #[error("Not found: {message}")]
    #[diagnostic(
        code(invoicer::not_found),
        help("The record does not exist or is not visible to the current session")
    )]
    NotFound { message: String },

    #[error("Validation failed: {message}")]
    #[diagnostic(
        code(invoicer::validation),
        help("Check the field errors for the rejected values")
    )]
    Validation {
        message: String,
        fields: Vec<FieldError>,
    },

    #[error("Forbidden: {message}")]
    #[diagnostic(
        code(invoicer::forbidden),
        help("The collection access rule rejected this action for the current identity")
    )]
    Forbidden { message: String },

    #[error("Unauthorized: {message}")]
    #[diagnostic(
        code(invoicer::unauthorized),
        help("The session is missing, expired or revoked; log in again")
    )]
    Unauthorized { message: String },

    #[error("Invalid email or password")]
    #[diagnostic(code(invoicer::authentication_failure))]
    AuthenticationFailure,

    #[error("Backend unreachable: {message}")]
    #[diagnostic(
        code(invoicer::transport),
        help("Check that the backend is running and the configured URL is correct")
    )]
    Transport {
        message: String,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Malformed backend response: {message}")]
    #[diagnostic(
        code(invoicer::malformed_response),
        help("The backend answered with a payload that does not match the record contract")
    )]
    MalformedResponse { message: String, payload: Value },

    #[error("Backend returned {status}: {message}")]
    #[diagnostic(code(invoicer::backend))]
    Backend { status: u16, message: String },

    #[error("Invalid request: {message}")]
    #[diagnostic(code(invoicer::invalid_request))]
    InvalidRequest { message: String },
}

impl AdapterError {
    /// HTTP-equivalent status classification, `None` for transport-class failures
    pub fn status(&self) -> Option<u16> {
        match self {
            AdapterError::NotFound { .. } => Some(404),
            AdapterError::Validation { .. } => Some(400),
            AdapterError::Forbidden { .. } => Some(403),
            AdapterError::Unauthorized { .. } => Some(401),
            AdapterError::AuthenticationFailure => Some(400),
            AdapterError::InvalidRequest { .. } => Some(400),
            AdapterError::Backend { status, .. } => Some(*status),
            AdapterError::Transport { .. } | AdapterError::MalformedResponse { .. } => None,
        }
    }

    /// Classify a backend error response body (`{status, message, data}`)
    pub fn from_status(status: u16, body: &Value) -> Self {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("request failed with status {status}"));

        match status {
            400 => AdapterError::Validation {
                fields: field_errors(body.get("data")),
                message,
            },
            401 => AdapterError::Unauthorized { message },
            403 => AdapterError::Forbidden { message },
            404 => AdapterError::NotFound { message },
            _ => AdapterError::Backend { status, message },
        }
    }

    pub fn transport(cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        AdapterError::Transport {
            message: cause.to_string(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn malformed(message: impl Into<String>, payload: Value) -> Self {
        AdapterError::MalformedResponse {
            message: message.into(),
            payload,
        }
    }

    pub fn validation(message: impl Into<String>, fields: Vec<FieldError>) -> Self {
        AdapterError::Validation {
            message: message.into(),
            fields,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        AdapterError::InvalidRequest {
            message: message.into(),
        }
    }
}

fn field_errors(data: Option<&Value>) -> Vec<FieldError> {
    let Some(map) = data.and_then(Value::as_object) else {
        return Vec::new();
    };
    map.iter()
        .map(|(field, detail)| {
            let text = |key: &str| {
                detail
                    .get(key)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            FieldError::new(field, text("code"), text("message"))
        })
        .collect()
}

/// Anything that carries an HTTP-equivalent status classification
pub trait HttpStatus {
    fn http_status(&self) -> Option<u16>;
}

impl HttpStatus for AdapterError {
    fn http_status(&self) -> Option<u16> {
        self.status()
    }
}

impl HttpStatus for u16 {
    fn http_status(&self) -> Option<u16> {
        Some(*self)
    }
}
