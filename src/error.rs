//! Error taxonomy shared by the worker, the host and the tool surface.
//!
//! Internals use `anyhow::Result`; anything that crosses the protocol boundary
//! is converted into a [`ToolError`] carrying a stable [`ErrorCode`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Stable error codes reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotInitialized,
    ValidationError,
    SecurityError,
    ExecutionError,
    FileNotFound,
    UnsupportedFileType,
    LspTimeout,
    LspUnavailable,
    AnalysisFailed,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotInitialized => "NOT_INITIALIZED",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::SecurityError => "SECURITY_ERROR",
            ErrorCode::ExecutionError => "EXECUTION_ERROR",
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::UnsupportedFileType => "UNSUPPORTED_FILE_TYPE",
            ErrorCode::LspTimeout => "LSP_TIMEOUT",
            ErrorCode::LspUnavailable => "LSP_UNAVAILABLE",
            ErrorCode::AnalysisFailed => "ANALYSIS_FAILED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request-scoped failure with a stable code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ToolError {
    pub code: ErrorCode,
    pub message: String,
}

impl ToolError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn security(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SecurityError, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExecutionError, message)
    }

    pub fn not_initialized() -> Self {
        Self::new(
            ErrorCode::NotInitialized,
            "worker has not been initialized; send init first",
        )
    }

    pub fn file_not_found(path: impl fmt::Display) -> Self {
        Self::new(ErrorCode::FileNotFound, format!("file not found: {path}"))
    }
}

impl From<ParseError> for ToolError {
    fn from(err: ParseError) -> Self {
        let code = match &err {
            ParseError::Unsupported(_) => ErrorCode::UnsupportedFileType,
            ParseError::Timeout(_) => ErrorCode::LspTimeout,
            ParseError::Unavailable(_) => ErrorCode::LspUnavailable,
            ParseError::Failed { .. } => ErrorCode::AnalysisFailed,
        };
        ToolError::new(code, err.to_string())
    }
}

impl From<ResolveError> for ToolError {
    fn from(err: ResolveError) -> Self {
        ToolError::validation(err.to_string())
    }
}

impl From<anyhow::Error> for ToolError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(parse) = err.downcast_ref::<ParseError>() {
            return parse.clone().into();
        }
        if let Some(tool) = err.downcast_ref::<ToolError>() {
            return tool.clone();
        }
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::NotFound {
                return ToolError::new(ErrorCode::FileNotFound, format!("{err:#}"));
            }
        }
        ToolError::new(ErrorCode::AnalysisFailed, format!("{err:#}"))
    }
}

/// Failures reported by the parsing service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("parser timed out on {0}")]
    Timeout(String),
    #[error("parser unavailable: {0}")]
    Unavailable(String),
    #[error("failed to parse {path}: {reason}")]
    Failed { path: String, reason: String },
}

/// Malformed resolver input. An import that simply does not exist on disk is
/// not an error; see [`crate::resolver::Resolution::Unresolved`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("malformed resolve request: {0}")]
    Malformed(String),
}

/// Host-side failures.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("worker is not running")]
    NotStarted,
    #[error("worker already started")]
    AlreadyStarted,
    #[error("worker warmup timed out after {0:?}")]
    WarmupTimeout(Duration),
    #[error("worker terminated: {0}")]
    WorkerTerminated(String),
    #[error("request {request_id} ({tool}) timed out after {timeout:?}")]
    RequestTimeout {
        request_id: u64,
        tool: String,
        timeout: Duration,
    },
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("transport error: {0}")]
    Transport(String),
}

impl HostError {
    /// Code surfaced to external clients for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            HostError::NotStarted => ErrorCode::NotInitialized,
            HostError::Tool(err) => err.code,
            _ => ErrorCode::ExecutionError,
        }
    }
}
