//! Error types for sbe_group.
//!
//! All errors that can occur while compiling or executing a group pipeline
//! are represented by [`SbeGroupError`]. Errors are propagated via
//! `Result<T, SbeGroupError>` throughout the codebase.
//!
//! # Error Classification
//!
//! - **User**: malformed `$group` specs, unsupported requirements from the
//!   parent stage. Surface to the caller unchanged.
//! - **Config**: a builder configuration that could not be loaded.
//! - **Runtime**: errors raised by compiled code while a pipeline runs
//!   (for example sorting by parallel arrays).
//! - **Internal**: broken contracts between compiler components. These
//!   carry a stable numeric assertion code and indicate a bug.
//!
//! Soft failures such as "this accumulator has no columnar form" are not
//! errors at all; they are modelled as `Option::None` by the callers.

use std::fmt;

/// Runtime error codes used by compiled `fail(...)` expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    BadValue,
    TypeMismatch,
    Overflow,
    InvalidLength,
}

impl ErrorCode {
    /// Numeric code as reported to clients.
    pub fn code(self) -> u32 {
        match self {
            ErrorCode::BadValue => 2,
            ErrorCode::TypeMismatch => 14,
            ErrorCode::Overflow => 15,
            ErrorCode::InvalidLength => 16,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            2 => Some(ErrorCode::BadValue),
            14 => Some(ErrorCode::TypeMismatch),
            15 => Some(ErrorCode::Overflow),
            16 => Some(ErrorCode::InvalidLength),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::BadValue => "BadValue",
            ErrorCode::TypeMismatch => "TypeMismatch",
            ErrorCode::Overflow => "Overflow",
            ErrorCode::InvalidLength => "InvalidLength",
        };
        write!(f, "{name}({})", self.code())
    }
}

/// Primary error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum SbeGroupError {
    // ── User errors ──────────────────────────────────────────────────────
    /// A `$group` specification or expression could not be parsed.
    #[error("query parse error: {0}")]
    QueryParseError(String),

    /// An invalid argument was provided to a builder or plan constructor.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The parent stage asked for something a group stage cannot produce.
    #[error("unsupported requirement ({code}): {message}")]
    UnsupportedRequirement { code: u32, message: String },

    // ── Config errors ────────────────────────────────────────────────────
    /// The builder configuration could not be read or decoded.
    #[error("configuration error: {0}")]
    ConfigError(String),

    // ── Runtime errors ───────────────────────────────────────────────────
    /// Raised while evaluating a compiled pipeline.
    #[error("execution error {code}: {message}")]
    ExecutionError { code: ErrorCode, message: String },

    // ── Internal errors ──────────────────────────────────────────────────
    /// A contract between compiler components was broken. Indicates a bug.
    #[error("internal assertion {code} failed: {message}")]
    InvariantViolation { code: u32, message: String },

    /// An unexpected internal error. Indicates a bug.
    #[error("internal error: {0}")]
    InternalError(String),
}

/// Classification of error kind for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbeGroupErrorKind {
    User,
    Config,
    Runtime,
    Internal,
}

impl fmt::Display for SbeGroupErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SbeGroupErrorKind::User => write!(f, "USER"),
            SbeGroupErrorKind::Config => write!(f, "CONFIG"),
            SbeGroupErrorKind::Runtime => write!(f, "RUNTIME"),
            SbeGroupErrorKind::Internal => write!(f, "INTERNAL"),
        }
    }
}

impl SbeGroupError {
    /// Classify the error.
    pub fn kind(&self) -> SbeGroupErrorKind {
        match self {
            SbeGroupError::QueryParseError(_)
            | SbeGroupError::InvalidArgument(_)
            | SbeGroupError::UnsupportedRequirement { .. } => SbeGroupErrorKind::User,

            SbeGroupError::ConfigError(_) => SbeGroupErrorKind::Config,

            SbeGroupError::ExecutionError { .. } => SbeGroupErrorKind::Runtime,

            SbeGroupError::InvariantViolation { .. } | SbeGroupError::InternalError(_) => {
                SbeGroupErrorKind::Internal
            }
        }
    }

    /// The numeric assertion or error code, when the variant carries one.
    pub fn code(&self) -> Option<u32> {
        match self {
            SbeGroupError::UnsupportedRequirement { code, .. }
            | SbeGroupError::InvariantViolation { code, .. } => Some(*code),
            SbeGroupError::ExecutionError { code, .. } => Some(code.code()),
            _ => None,
        }
    }

    pub fn execution(code: ErrorCode, message: impl Into<String>) -> Self {
        SbeGroupError::ExecutionError {
            code,
            message: message.into(),
        }
    }
}

/// Build an internal assertion error without checking a condition.
pub fn tasserted(code: u32, message: impl Into<String>) -> SbeGroupError {
    SbeGroupError::InvariantViolation {
        code,
        message: message.into(),
    }
}

/// Fail with an internal assertion error unless `cond` holds.
pub fn tassert(code: u32, message: impl Into<String>, cond: bool) -> Result<(), SbeGroupError> {
    if cond {
        Ok(())
    } else {
        Err(tasserted(code, message))
    }
}

/// Fail with a user-facing requirement error unless `cond` holds.
pub fn uassert(code: u32, message: impl Into<String>, cond: bool) -> Result<(), SbeGroupError> {
    if cond {
        Ok(())
    } else {
        Err(SbeGroupError::UnsupportedRequirement {
            code,
            message: message.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert_eq!(
            SbeGroupError::QueryParseError("x".into()).kind(),
            SbeGroupErrorKind::User
        );
        assert_eq!(
            SbeGroupError::ConfigError("x".into()).kind(),
            SbeGroupErrorKind::Config
        );
        assert_eq!(
            SbeGroupError::execution(ErrorCode::BadValue, "x").kind(),
            SbeGroupErrorKind::Runtime
        );
        assert_eq!(tasserted(1, "x").kind(), SbeGroupErrorKind::Internal);
        assert_eq!(
            SbeGroupError::InternalError("x".into()).kind(),
            SbeGroupErrorKind::Internal
        );
    }

    #[test]
    fn test_tassert_passes_and_fails() {
        assert!(tassert(7567301, "ok", true).is_ok());
        let err = tassert(7567301, "mismatch", false).unwrap_err();
        assert_eq!(err.code(), Some(7567301));
        assert!(err.to_string().contains("mismatch"));
    }

    #[test]
    fn test_uassert_is_user_error() {
        let err = uassert(6360401, "no record ids", false).unwrap_err();
        assert_eq!(err.kind(), SbeGroupErrorKind::User);
        assert_eq!(err.code(), Some(6360401));
    }

    #[test]
    fn test_execution_error_display() {
        let err = SbeGroupError::execution(ErrorCode::BadValue, "boom");
        assert_eq!(err.to_string(), "execution error BadValue(2): boom");
        assert_eq!(err.code(), Some(2));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(SbeGroupErrorKind::User.to_string(), "USER");
        assert_eq!(SbeGroupErrorKind::Internal.to_string(), "INTERNAL");
    }
}
