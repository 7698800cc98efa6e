//! Error taxonomy for the transaction-submission layer.
//!
//! Every error is `Clone`: callers that join an in-flight reconnect receive a
//! copy of the leader's outcome.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use super::config::ConfigError;
use super::types::ConnectionState;

/// Result alias used throughout the crate
pub type GatewayResult<T> = Result<T, GatewayError>;

// =============================================================================
// RPC STATUS
// =============================================================================

/// Status code reported by the RPC layer, following gRPC semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Unknown,
    Cancelled,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    PermissionDenied,
    FailedPrecondition,
    Aborted,
    Unimplemented,
    Internal,
    Unavailable,
    Unauthenticated,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Unknown => "UNKNOWN",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::PermissionDenied => "PERMISSION_DENIED",
            StatusCode::FailedPrecondition => "FAILED_PRECONDITION",
            StatusCode::Aborted => "ABORTED",
            StatusCode::Unimplemented => "UNIMPLEMENTED",
            StatusCode::Internal => "INTERNAL",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::Unauthenticated => "UNAUTHENTICATED",
        };
        f.write_str(name)
    }
}

/// Failure returned by a dial or by a remote call on a peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct RpcError {
    pub code: StatusCode,
    pub message: String,
    /// Per-peer messages, e.g. one entry per rejecting endorser
    pub details: Vec<String>,
}

impl RpcError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(StatusCode::DeadlineExceeded, message)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.details.push(detail.into());
        self
    }
}

// =============================================================================
// GATEWAY ERRORS
// =============================================================================

/// How the HTTP layer should present an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Peer or breaker unavailable, retry later
    ServiceUnavailable,
    /// The caller supplied bad identity or request data
    ClientError,
    /// Chaincode rejected the request
    BusinessRule,
    /// Submitted but commit status unknown
    AcceptedPending,
    Internal,
}

impl ErrorClass {
    pub fn http_status(self) -> u16 {
        match self {
            ErrorClass::ServiceUnavailable => 503,
            ErrorClass::ClientError => 400,
            ErrorClass::BusinessRule => 422,
            ErrorClass::AcceptedPending => 202,
            ErrorClass::Internal => 500,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("connection to {endpoint} exhausted after {attempts} attempts: {last_error}")]
    ConnectionExhausted {
        endpoint: String,
        attempts: u32,
        last_error: String,
    },

    #[error("not connected to peer (state: {state})")]
    NotConnected { state: ConnectionState },

    #[error("connection manager is closed")]
    Closed,

    #[error("failed to load credentials: {reason}")]
    CredentialLoadFailed { reason: String },

    #[error("invalid certificate: {reason}")]
    InvalidCertificate { reason: String },

    #[error("invalid identity for MSP '{msp_id}': {reason}")]
    InvalidIdentity { msp_id: String, reason: String },

    #[error("failed to dial {endpoint}: {source}")]
    DialFailed {
        endpoint: String,
        #[source]
        source: RpcError,
    },

    #[error("invalid transient data for key '{key}': {reason}")]
    InvalidTransientData { key: String, reason: String },

    #[error("endorsement of transaction {transaction_id} failed: {source}")]
    EndorsementFailed {
        transaction_id: String,
        #[source]
        source: RpcError,
    },

    #[error("submission of transaction {transaction_id} failed: {source}")]
    SubmissionFailed {
        transaction_id: String,
        #[source]
        source: RpcError,
    },

    #[error("circuit breaker '{name}' is open")]
    CircuitOpen {
        name: String,
        retry_after: Option<Duration>,
    },

    #[error("commit status of transaction {transaction_id} unknown after {timeout:?}: {reason}")]
    CommitStatusTimeout {
        transaction_id: String,
        timeout: Duration,
        reason: String,
    },

    #[error("evaluation of '{function}' failed: {source}")]
    EvaluationFailed {
        function: String,
        #[source]
        source: RpcError,
    },

    #[error("request cancelled: {reason}")]
    Cancelled { reason: &'static str },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl GatewayError {
    pub fn class(&self) -> ErrorClass {
        match self {
            GatewayError::CircuitOpen { .. }
            | GatewayError::ConnectionExhausted { .. }
            | GatewayError::NotConnected { .. }
            | GatewayError::DialFailed { .. }
            | GatewayError::SubmissionFailed { .. }
            | GatewayError::Closed => ErrorClass::ServiceUnavailable,
            GatewayError::InvalidIdentity { .. }
            | GatewayError::InvalidTransientData { .. }
            | GatewayError::InvalidCertificate { .. }
            | GatewayError::Cancelled { .. } => ErrorClass::ClientError,
            GatewayError::EndorsementFailed { .. } | GatewayError::EvaluationFailed { .. } => {
                ErrorClass::BusinessRule
            }
            GatewayError::CommitStatusTimeout { .. } => ErrorClass::AcceptedPending,
            GatewayError::CredentialLoadFailed { .. } | GatewayError::Config(_) => {
                ErrorClass::Internal
            }
        }
    }

    pub fn http_status(&self) -> u16 {
        self.class().http_status()
    }

    /// Whether re-running the whole invocation cannot duplicate a side effect
    /// that may already have been committed.
    ///
    /// `CommitStatusTimeout` is never retryable: poll by transaction ID instead.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::ConnectionExhausted { .. }
                | GatewayError::NotConnected { .. }
                | GatewayError::DialFailed { .. }
                | GatewayError::SubmissionFailed { .. }
                | GatewayError::CircuitOpen { .. }
        )
    }

    /// Underlying RPC failure, when the error wraps one.
    pub fn rpc_source(&self) -> Option<&RpcError> {
        match self {
            GatewayError::DialFailed { source, .. }
            | GatewayError::EndorsementFailed { source, .. }
            | GatewayError::SubmissionFailed { source, .. }
            | GatewayError::EvaluationFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}
