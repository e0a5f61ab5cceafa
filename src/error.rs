//! Client error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connection::ConnectionError;
use crate::ledger::RuntimeError;
use crate::transport::TransportError;

/// Errors surfaced by client operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// Malformed request parameters. Never retried.
    #[error("{0}")]
    Validation(String),

    /// No candidate endpoint could be reached.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Keystore or account storage has no entry for the request.
    #[error("Signer not found: {0}")]
    SignerNotFound(String),

    /// Retry budget exhausted without on-chain confirmation.
    #[error("Message expired{}", exit_code_suffix(.exit_code))]
    MessageExpired { exit_code: Option<i32> },

    /// Local execution could not run.
    #[error("Local execution failed: {0}")]
    Execution(String),

    /// A ledger read failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Any other collaborator failure.
    #[error(transparent)]
    Runtime(RuntimeError),
}

fn exit_code_suffix(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!(". Possible exit code: {}", code),
        None => String::new(),
    }
}

impl From<RuntimeError> for ClientError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::InvalidAddress(_) | RuntimeError::Encode(_) => {
                ClientError::Validation(err.to_string())
            }
            RuntimeError::SignerNotFound(key) => ClientError::SignerNotFound(key),
            RuntimeError::Execution(reason) => ClientError::Execution(reason),
            other => ClientError::Runtime(other),
        }
    }
}

impl ClientError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ClientError::Validation(_) => ErrorCode::InvalidRequest,
            ClientError::Connection(_) => ErrorCode::ConnectionError,
            ClientError::SignerNotFound(_) => ErrorCode::SignerNotFound,
            ClientError::MessageExpired { .. } => ErrorCode::MessageExpired,
            ClientError::Execution(_) => ErrorCode::ExecutionError,
            ClientError::Transport(_) | ClientError::Runtime(_) => ErrorCode::Internal,
        }
    }
}

/// Machine-readable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    Internal,
    InvalidRequest,
    ConnectionError,
    SignerNotFound,
    MessageExpired,
    ExecutionError,
}

impl ErrorCode {
    /// Numeric form used in JSON responses.
    pub fn as_i32(self) -> i32 {
        match self {
            ErrorCode::Internal => 1,
            ErrorCode::InvalidRequest => 2,
            ErrorCode::ConnectionError => 3,
            ErrorCode::SignerNotFound => 4,
            ErrorCode::MessageExpired => 5,
            ErrorCode::ExecutionError => 6,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
