// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Unified error taxonomy with stable error codes for the PML execution core.
//!
//! Every [`PmlError`] carries an [`ErrorCode`] (a machine-readable, stable
//! string tag), a human-readable message, an optional cause chain, and
//! arbitrary key-value context. Use the builder returned by
//! [`PmlError::new`] to construct errors fluently.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Static analysis of user code: parsing, reference resolution.
    Static,
    /// Human/agent approval gates.
    Approval,
    /// RPC tool invocation failures.
    Tool,
    /// Sandbox worker failures.
    Worker,
    /// Argument resolution failures.
    Argument,
    /// Capability store operations.
    Store,
    /// DAG replanning.
    Replan,
    /// Speculation cache.
    Cache,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Static => "static",
            Self::Approval => "approval",
            Self::Tool => "tool",
            Self::Worker => "worker",
            Self::Argument => "argument",
            Self::Store => "store",
            Self::Replan => "replan",
            Self::Cache => "cache",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Static analysis --
    /// Malformed source code.
    ParseError,
    /// Tool/capability id not present in the catalog (strict mode).
    UnknownReference,
    /// Structural invariant of `StaticStructure` was violated.
    StaticValidationError,
    /// Non-fatal: a schema could not be pinned with confidence.
    SchemaInferenceWarning,

    // -- Approval gates --
    /// HIL approval was not granted within the timeout window.
    HilTimeout,
    /// The user explicitly rejected an approval request.
    UserAborted,
    /// The acting user lacks the permission required for the gated tool.
    HilMissingPermission,

    // -- RPC / tool layer --
    /// The target tool/server could not be reached.
    ToolUnreachable,
    /// A tool call exceeded its timeout.
    ToolTimeout,
    /// A tool call returned an application-level error.
    ToolError,

    // -- Worker / sandbox layer --
    /// The sandbox worker panicked.
    WorkerPanic,
    /// An operation was denied by the permission matrix.
    SandboxDenied,

    // -- Argument resolution --
    /// A `parameter` argument spec referenced a missing initial-context key.
    MissingParameter,
    /// A `reference` argument spec could not be resolved against the context.
    ArgumentUnresolvable,

    // -- Capability store --
    /// A rename collided with an existing `(org, project, displayName)`.
    NameCollision,
    /// An alias operation would have created a chain or cycle.
    AliasConflict,

    // -- DAG replanning --
    /// A replan request was rejected (cycle, or dependency on a dropped task).
    ReplanRejected,

    // -- Speculation cache --
    /// A cache hit's argument hash did not match; treated as a miss.
    CacheStale,

    // -- Internal --
    /// Last-resort catch-all; always carries a `diagnostic_id` context entry.
    InternalError,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ParseError | Self::UnknownReference | Self::StaticValidationError | Self::SchemaInferenceWarning => {
                ErrorCategory::Static
            }
            Self::HilTimeout | Self::UserAborted | Self::HilMissingPermission => ErrorCategory::Approval,
            Self::ToolUnreachable | Self::ToolTimeout | Self::ToolError => ErrorCategory::Tool,
            Self::WorkerPanic | Self::SandboxDenied => ErrorCategory::Worker,
            Self::MissingParameter | Self::ArgumentUnresolvable => ErrorCategory::Argument,
            Self::NameCollision | Self::AliasConflict => ErrorCategory::Store,
            Self::ReplanRejected => ErrorCategory::Replan,
            Self::CacheStale => ErrorCategory::Cache,
            Self::InternalError => ErrorCategory::Internal,
        }
    }

    /// `true` for errors that are reported but do not fail the workflow.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::SchemaInferenceWarning | Self::CacheStale)
    }

    /// `true` for RPC-layer faults the executor retries (default 3x,
    /// exponential backoff) before surfacing.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ToolUnreachable | Self::ToolTimeout)
    }

    /// `true` when a failed workflow's checkpoint remains resumable.
    ///
    /// Only `HilTimeout` and `ToolUnreachable` leave a resumable
    /// checkpoint; every other fatal error discards it.
    #[must_use]
    pub fn leaves_resumable_checkpoint(&self) -> bool {
        matches!(self, Self::HilTimeout | Self::ToolUnreachable)
    }

    /// Stable `&'static str` representation (e.g. `"BACKEND_TIMEOUT"`-style).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseError => "PARSE_ERROR",
            Self::UnknownReference => "UNKNOWN_REFERENCE",
            Self::StaticValidationError => "STATIC_VALIDATION_ERROR",
            Self::SchemaInferenceWarning => "SCHEMA_INFERENCE_WARNING",
            Self::HilTimeout => "HIL_TIMEOUT",
            Self::UserAborted => "USER_ABORTED",
            Self::HilMissingPermission => "HIL_MISSING_PERMISSION",
            Self::ToolUnreachable => "TOOL_UNREACHABLE",
            Self::ToolTimeout => "TOOL_TIMEOUT",
            Self::ToolError => "TOOL_ERROR",
            Self::WorkerPanic => "WORKER_PANIC",
            Self::SandboxDenied => "SANDBOX_DENIED",
            Self::MissingParameter => "MISSING_PARAMETER",
            Self::ArgumentUnresolvable => "ARGUMENT_UNRESOLVABLE",
            Self::NameCollision => "NAME_COLLISION",
            Self::AliasConflict => "ALIAS_CONFLICT",
            Self::ReplanRejected => "REPLAN_REJECTED",
            Self::CacheStale => "CACHE_STALE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PmlError
// ---------------------------------------------------------------------------

/// Unified PML error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// ```
/// use pml_error::{PmlError, ErrorCode};
///
/// let err = PmlError::new(ErrorCode::ToolTimeout, "timed out after 30 s")
///     .with_context("tool", "fs:read")
///     .with_context("timeout_ms", 30_000);
/// assert!(err.code.is_retryable());
/// ```
pub struct PmlError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description. Kept short and actionable.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl PmlError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Construct an [`ErrorCode::InternalError`] with a diagnostic id.
    pub fn internal(diagnostic_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message).with_context("diagnostic_id", diagnostic_id.into())
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Short, actionable, user-facing rendering: `"{message}"` optionally
    /// followed by a `hint` context entry, never the raw cause chain.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self.context.get("hint").and_then(|v| v.as_str()) {
            Some(hint) => format!("{}: {hint}", self.message),
            None => self.message.clone(),
        }
    }
}

impl fmt::Debug for PmlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("PmlError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for PmlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for PmlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Serialisable snapshot of a [`PmlError`] (without the opaque source),
/// suitable for `execution_trace.errorMessage` and the SSE `error` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PmlErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&PmlError> for PmlErrorDto {
    fn from(err: &PmlError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<PmlErrorDto> for PmlError {
    fn from(dto: PmlErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_CODES: &[ErrorCode] = &[
        ErrorCode::ParseError,
        ErrorCode::UnknownReference,
        ErrorCode::StaticValidationError,
        ErrorCode::SchemaInferenceWarning,
        ErrorCode::HilTimeout,
        ErrorCode::UserAborted,
        ErrorCode::HilMissingPermission,
        ErrorCode::ToolUnreachable,
        ErrorCode::ToolTimeout,
        ErrorCode::ToolError,
        ErrorCode::WorkerPanic,
        ErrorCode::SandboxDenied,
        ErrorCode::MissingParameter,
        ErrorCode::ArgumentUnresolvable,
        ErrorCode::NameCollision,
        ErrorCode::AliasConflict,
        ErrorCode::ReplanRejected,
        ErrorCode::CacheStale,
        ErrorCode::InternalError,
    ];

    #[test]
    fn basic_construction() {
        let err = PmlError::new(ErrorCode::InternalError, "boom");
        assert_eq!(err.code, ErrorCode::InternalError);
        assert_eq!(err.message, "boom");
        assert!(err.source.is_none());
        assert!(err.context.is_empty());
    }

    #[test]
    fn display_without_context() {
        let err = PmlError::new(ErrorCode::ToolUnreachable, "no such tool");
        assert_eq!(err.to_string(), "[TOOL_UNREACHABLE] no such tool");
    }

    #[test]
    fn display_with_context() {
        let err = PmlError::new(ErrorCode::ToolTimeout, "timed out").with_context("timeout_ms", 5000);
        let s = err.to_string();
        assert!(s.starts_with("[TOOL_TIMEOUT] timed out"));
        assert!(s.contains("timeout_ms"));
    }

    #[test]
    fn user_message_appends_hint() {
        let err = PmlError::new(ErrorCode::ToolError, "denied").with_context("hint", "set NOTION_API_KEY in .env");
        assert_eq!(err.user_message(), "denied: set NOTION_API_KEY in .env");
    }

    #[test]
    fn every_code_has_a_stable_category() {
        for code in ALL_CODES {
            let _ = code.category();
        }
    }

    #[test]
    fn retryable_codes_match_spec() {
        assert!(ErrorCode::ToolUnreachable.is_retryable());
        assert!(ErrorCode::ToolTimeout.is_retryable());
        assert!(!ErrorCode::ToolError.is_retryable());
        assert!(!ErrorCode::WorkerPanic.is_retryable());
    }

    #[test]
    fn resumable_checkpoint_codes_match_spec() {
        assert!(ErrorCode::HilTimeout.leaves_resumable_checkpoint());
        assert!(ErrorCode::ToolUnreachable.leaves_resumable_checkpoint());
        assert!(!ErrorCode::UserAborted.leaves_resumable_checkpoint());
        assert!(!ErrorCode::WorkerPanic.leaves_resumable_checkpoint());
    }

    #[test]
    fn non_fatal_codes_are_exactly_warning_and_stale() {
        for code in ALL_CODES {
            let expected_non_fatal = matches!(code, ErrorCode::SchemaInferenceWarning | ErrorCode::CacheStale);
            assert_eq!(!code.is_fatal(), expected_non_fatal, "{code:?}");
        }
    }

    #[test]
    fn dto_roundtrip_drops_source() {
        let err = PmlError::new(ErrorCode::ReplanRejected, "cycle detected").with_context("task", "t1");
        let dto: PmlErrorDto = (&err).into();
        let json = serde_json::to_string(&dto).unwrap();
        let back: PmlErrorDto = serde_json::from_str(&json).unwrap();
        assert_eq!(dto, back);
        let restored: PmlError = back.into();
        assert_eq!(restored.code, ErrorCode::ReplanRejected);
    }

    #[test]
    fn internal_helper_sets_diagnostic_id() {
        let err = PmlError::internal("diag-123", "unexpected state");
        assert_eq!(err.code, ErrorCode::InternalError);
        assert_eq!(err.context.get("diagnostic_id").unwrap(), "diag-123");
    }
}
