use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error body shared by every surface of the chat service.
///
/// REST responses wrap it as `{"error": {...}}` (see [`ErrorEnvelope`]); the live
/// channel flattens it next to `"type": "error"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code, one of [`error_codes`]
    pub code: String,

    /// Human-readable explanation
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,

    /// Request tracking id (from `X-Request-ID` or the channel frame)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorBody {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            details: None,
            request_id: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// REST error response: `{"error": {"code", "message", "details"?, "request_id"?}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

impl ErrorEnvelope {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            error: ErrorBody::new(code, message),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.error = self.error.with_details(details);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.error = self.error.with_request_id(request_id);
        self
    }
}

impl From<ErrorBody> for ErrorEnvelope {
    fn from(error: ErrorBody) -> Self {
        Self { error }
    }
}

/// Error code taxonomy
pub mod error_codes {
    /// Bad input: size, missing field, garbage cursor
    pub const VALIDATION_ERROR: &str = "validation_error";
    /// Conversation or message absence
    pub const NOT_FOUND: &str = "not_found";
    /// Only reachable by clients that bypass idempotent replay
    pub const CONFLICT: &str = "conflict";
    pub const RATE_LIMITED: &str = "rate_limited";
    /// Missing or invalid identity
    pub const UNAUTHORIZED: &str = "unauthorized";
    /// Blocked conversation or denied by policy
    pub const FORBIDDEN: &str = "forbidden";
    pub const UNAVAILABLE: &str = "unavailable";
    pub const INTERNAL: &str = "internal";
}
