//! Error taxonomy shared by the engine and every provider adapter.
//!
//! Adapters map their wire failures into [`LlmError`] so callers match a
//! single type regardless of backend. The variants fall into five groups:
//!
//! | Group | Variants | Fate |
//! |-------|----------|------|
//! | Provider | [`Provider`](LlmError::Provider), [`Timeout`](LlmError::Timeout), [`ResponseFormat`](LlmError::ResponseFormat) | surfaced, caller may retry |
//! | Capability | [`Capability`](LlmError::Capability) | raised before any network call, never retried |
//! | Malformed tool call | [`MalformedToolCall`](LlmError::MalformedToolCall) | folded into a tool result, conversation continues |
//! | Schema mismatch | [`SchemaMismatch`](LlmError::SchemaMismatch) | fatal to the extraction call |
//! | Tool limit | [`ToolLimitExceeded`](LlmError::ToolLimitExceeded) | fatal to the chat call |
//!
//! ```rust
//! use parley::LlmError;
//!
//! fn should_retry(err: &LlmError) -> bool {
//!     match err {
//!         LlmError::Provider { retryable, .. } => *retryable,
//!         LlmError::Timeout { .. } => true,
//!         _ => false,
//!     }
//! }
//! ```

/// The unified error type returned by all engine and provider operations.
///
/// Marked `#[non_exhaustive]`; always include a wildcard arm.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LlmError {
    /// The backend answered with a failure status, or the transport failed.
    ///
    /// `status` is `None` when no response was received (DNS failure,
    /// connection reset).
    #[error("provider error (status={status:?}): {body}")]
    Provider {
        /// The HTTP status code, if one was received.
        status: Option<http::StatusCode>,
        /// The response body or transport error description.
        body: String,
        /// Whether the caller should retry this request.
        retryable: bool,
    },

    /// The request exceeded its configured deadline.
    #[error("request timed out after {elapsed_ms}ms")]
    Timeout {
        /// Milliseconds elapsed before the timeout fired.
        elapsed_ms: u64,
    },

    /// A provider response could not be decoded.
    #[error("response format error: {message}")]
    ResponseFormat {
        /// What went wrong during decoding.
        message: String,
        /// The raw payload, for diagnostics.
        raw: String,
    },

    /// The caller built an invalid request (bad TypeSpec, broken history).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request uses a feature the selected provider cannot express.
    #[error("{provider} cannot handle this request: {message}")]
    Capability {
        /// The provider that rejected the request shape.
        provider: String,
        /// What is unsupported.
        message: String,
    },

    /// Streamed tool-call arguments were not valid JSON.
    #[error("malformed arguments for tool call {id}: {message}")]
    MalformedToolCall {
        /// The tool call id the arguments belong to.
        id: String,
        /// The JSON parse error.
        message: String,
        /// The accumulated argument text.
        raw: String,
    },

    /// A JSON value does not satisfy the declared TypeSpec.
    #[error("schema mismatch at '{path}': {message}")]
    SchemaMismatch {
        /// JSON pointer to the offending node (`""` is the root).
        path: String,
        /// What was expected.
        message: String,
    },

    /// The model kept requesting tools past the configured bound.
    #[error("tool loop exceeded {limit} tool turns")]
    ToolLimitExceeded {
        /// The configured maximum number of tool turns.
        limit: u32,
    },
}

impl LlmError {
    /// Returns `true` if the error is transient and the request may succeed on retry.
    ///
    /// ```rust
    /// use parley::LlmError;
    ///
    /// assert!(LlmError::Timeout { elapsed_ms: 5000 }.is_retryable());
    /// assert!(!LlmError::ToolLimitExceeded { limit: 3 }.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { retryable, .. } => *retryable,
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Builds a [`SchemaMismatch`](Self::SchemaMismatch).
    pub(crate) fn mismatch(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        Self::ResponseFormat {
            message: err.to_string(),
            raw: String::new(),
        }
    }
}
