//! Error types for the CGI runtime.
//!
//! The taxonomy mirrors how failures are surfaced to the client:
//! protocol and session-authentication errors abort the request before
//! any body is written, while script and template errors are rendered
//! into the response as a diagnostic block. Persistence failures at
//! process exit are logged and never escalate.

use std::path::PathBuf;
use thiserror::Error;

/// Failures while opening, persisting or evicting sessions.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The stored record is bound to a different client address.
    /// Hard authentication failure: the caller must not fall back to a
    /// fresh session.
    #[error("session does not belong to the requesting address")]
    AddressMismatch,

    /// `remote_addr` is missing from the server metadata, so the
    /// session cannot be bound to a client.
    #[error("remote_addr missing from server metadata")]
    MissingRemoteAddr,

    #[error("session storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed session record: {0}")]
    Record(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unclosed tag at offset {0}")]
    UnclosedTag(usize),
}

/// Top-level error for a request lifecycle.
#[derive(Debug, Error)]
pub enum CgiError {
    /// Required server metadata was absent from the environment.
    #[error("missing environment variable: {0}")]
    MissingVar(&'static str),

    #[error("unparseable request target: {0}")]
    BadTarget(String),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A script extension was included but no handler is registered
    /// under its file stem.
    #[error("no handler registered for {0}")]
    HandlerNotFound(PathBuf),

    #[error("no script or template extension matches {0}")]
    UnknownExtension(PathBuf),

    /// A handler reported a domain failure of its own.
    #[error("script error: {0}")]
    Script(String),
}

impl CgiError {
    /// Whether the request can still complete with a diagnostic body.
    ///
    /// Protocol and session failures abort before any output; everything
    /// else is rendered into the response as a developer-facing block.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            CgiError::MissingVar(_) | CgiError::BadTarget(_) | CgiError::Session(_)
        )
    }
}
