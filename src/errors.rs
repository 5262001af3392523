//! Uniform error taxonomy shared by the tool registry, the MCP server, the
//! MCP client, and the agent turn engine.
//!
//! Matches the envelope `{"error": {"code", "message", "details"?}}` used
//! on the wire: every [`AgentError`] variant carries an [`ErrorCode`] and
//! serializes to that shape via [`AgentError::to_envelope`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed error code taxonomy. Values serialize exactly as these
/// upper-case strings; they are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "CONFLICT")]
    Conflict,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "CANCELLED")]
    Cancelled,
    #[serde(rename = "INTERNAL")]
    Internal,
}

/// A structured error, convertible to the uniform `{code, message, details?}`
/// envelope used both over HTTP and inside `AgentRunPayload.error`.
#[derive(Debug, Clone)]
#[allow(clippy::enum_variant_names)]
pub enum AgentError {
    Validation(String),
    Conflict(String),
    NotFound(String),
    Unauthorized,
    Cancelled,
    /// Internal failure. `detail` is logged and placed in the envelope's
    /// `details.type`/`details.message`; callers facing an external
    /// boundary should prefer [`AgentError::public_message`] over
    /// `Display` when the error crosses a trust boundary.
    Internal(String),
}

impl AgentError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AgentError::Validation(_) => ErrorCode::ValidationError,
            AgentError::Conflict(_) => ErrorCode::Conflict,
            AgentError::NotFound(_) => ErrorCode::NotFound,
            AgentError::Unauthorized => ErrorCode::Unauthorized,
            AgentError::Cancelled => ErrorCode::Cancelled,
            AgentError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Message safe to show a caller outside the process boundary.
    /// Internal errors never echo their detail verbatim.
    pub fn public_message(&self) -> String {
        match self {
            AgentError::Validation(m) | AgentError::Conflict(m) | AgentError::NotFound(m) => {
                m.clone()
            }
            AgentError::Unauthorized => "unauthorized".to_string(),
            AgentError::Cancelled => "operation cancelled".to_string(),
            AgentError::Internal(_) => "internal error".to_string(),
        }
    }

    /// The client-facing envelope. `Internal`'s raw detail is never placed
    /// here — it must only reach logs, via [`AgentError::internal_detail`]
    /// at the call site that logs the failure.
    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorBody {
                code: self.code(),
                message: self.public_message(),
                details: None,
            },
        }
    }

    /// The raw detail behind an `Internal` error, for logging only. `None`
    /// for every other variant, whose `public_message()` is already safe
    /// to log as-is.
    pub fn internal_detail(&self) -> Option<&str> {
        match self {
            AgentError::Internal(detail) => Some(detail),
            _ => None,
        }
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code(), self.public_message())
    }
}

impl std::error::Error for AgentError {}

/// Wire shape of an error: `{"error": {"code", "message", "details"?}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
