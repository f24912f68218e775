//! Error taxonomy returned to render-service callers, plus the
//! programmer-bug `LogicError` used by the state machines in
//! [`crate::process`], [`crate::provider`] and [`crate::render`].

use std::collections::HashMap;

use thiserror::Error;

/// Raised when a state-machine precondition is violated (starting a
/// running process, recycling a non-running supervisor, re-using a tab
/// renderer). Considered a programmer bug, never a render-time failure.
#[derive(Error, Debug, Clone)]
#[error("logic error: {0}")]
pub struct LogicError(pub String);

impl LogicError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// The error kind taxonomy of the render-request contract (spec §7).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("tab_creation_failed")]
    TabCreationFailed,
    #[error("initial_request_failed")]
    InitialRequestFailed,
    #[error("initial_request_status")]
    InitialRequestStatus,
    #[error("timeout")]
    Timeout,
    #[error("browser_unavailable")]
    BrowserUnavailable,
    #[error("unknown")]
    Unknown,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::TabCreationFailed => "tab_creation_failed",
            ErrorKind::InitialRequestFailed => "initial_request_failed",
            ErrorKind::InitialRequestStatus => "initial_request_status",
            ErrorKind::Timeout => "timeout",
            ErrorKind::BrowserUnavailable => "browser_unavailable",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// A failed render. `http_status`/`headers` are populated iff the
/// initial request reached at least `Response` (spec §3, §8).
#[derive(Debug, Clone)]
pub struct RenderError {
    pub kind: ErrorKind,
    pub message: String,
    pub http_status: Option<u16>,
    pub headers: Option<HashMap<String, String>>,
}

impl RenderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            http_status: None,
            headers: None,
        }
    }

    pub fn with_response(
        mut self,
        http_status: Option<u16>,
        headers: Option<HashMap<String, String>>,
    ) -> Self {
        self.http_status = http_status;
        self.headers = headers;
        self
    }
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for RenderError {}

impl From<anyhow::Error> for RenderError {
    fn from(err: anyhow::Error) -> Self {
        RenderError::new(ErrorKind::Unknown, err.to_string())
    }
}
