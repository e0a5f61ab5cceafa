//! Request-level errors.

use serde::Serialize;
use thiserror::Error;

use crate::error::{ClientError, ErrorCode};

/// A failed request: the method it belongs to and the underlying cause.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{method}: {error}")]
pub struct ProviderError {
    pub method: &'static str,
    #[source]
    pub error: ClientError,
}

impl ProviderError {
    pub fn new(method: &'static str, error: ClientError) -> Self {
        Self { method, error }
    }

    pub fn code(&self) -> ErrorCode {
        self.error.code()
    }

    /// JSON body for consumers that speak the provider protocol.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().as_i32(),
            message: self.error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
}
