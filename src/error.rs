//! Error handling for the fuzzing engine.
//!
//! All failures in this crate are mapped onto one of the [`ErrorKind`]
//! categories from the failure-semantics table. Most call sites construct
//! an error through the `Error::invalid_input` / `Error::not_found` / ...
//! constructors rather than building `Internal { .. }` by hand.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{kind}: {message}")]
    Internal {
        kind: ErrorKind,
        message: Cow<'static, str>,
        context: Option<ErrorContext>,
    },

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// The error taxonomy from the failure-semantics table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request body fails schema or semantic checks. Never retried.
    InvalidInput,
    /// Referenced run/job/result missing.
    NotFound,
    /// e.g. resume from a non-terminal state.
    ForbiddenTransition,
    /// Per-request failure on the wire; recorded on a `JobResult`, not surfaced.
    TransportError,
    /// Persistent-store access failure; aborts the current operation.
    StorageError,
    /// Synthetic error for a job found `RUNNING` at process restart.
    Interrupted,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvalidInput => "invalid input",
            Self::NotFound => "not found",
            Self::ForbiddenTransition => "forbidden transition",
            Self::TransportError => "transport error",
            Self::StorageError => "storage error",
            Self::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

impl ErrorKind {
    /// The HTTP status code a future JSON API layer should return for this
    /// error kind.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::InvalidInput => 400,
            Self::NotFound => 404,
            Self::ForbiddenTransition => 409,
            Self::TransportError | Self::StorageError | Self::Interrupted => 500,
        }
    }
}

/// Structured detail attached to an [`Error::Internal`].
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub details: Option<serde_json::Value>,
    pub suggestion: Option<Cow<'static, str>>,
}

impl ErrorContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<Cow<'static, str>>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Serializable `{kind, detail}` payload for the not-yet-built HTTP layer.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: String,
    pub detail: String,
    pub suggestion: Option<String>,
}

impl Error {
    fn internal(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal {
            kind,
            message: message.into(),
            context: None,
        }
    }

    #[must_use]
    pub fn invalid_input(message: impl Into<Cow<'static, str>>) -> Self {
        Self::internal(ErrorKind::InvalidInput, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<Cow<'static, str>>) -> Self {
        Self::internal(ErrorKind::NotFound, message)
    }

    #[must_use]
    pub fn forbidden_transition(message: impl Into<Cow<'static, str>>) -> Self {
        Self::internal(ErrorKind::ForbiddenTransition, message)
    }

    #[must_use]
    pub fn transport(message: impl Into<Cow<'static, str>>) -> Self {
        Self::internal(ErrorKind::TransportError, message)
    }

    #[must_use]
    pub fn storage(message: impl Into<Cow<'static, str>>) -> Self {
        Self::internal(ErrorKind::StorageError, message)
    }

    #[must_use]
    pub fn interrupted(message: impl Into<Cow<'static, str>>) -> Self {
        Self::internal(ErrorKind::Interrupted, message)
    }

    #[must_use]
    pub fn with_context(self, context: ErrorContext) -> Self {
        match self {
            Self::Internal { kind, message, .. } => Self::Internal {
                kind,
                message,
                context: Some(context),
            },
            other => other,
        }
    }

    /// The [`ErrorKind`] for this error, if it carries one.
    #[must_use]
    pub const fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Internal { kind, .. } => Some(*kind),
            Self::Network(_) => Some(ErrorKind::TransportError),
            _ => None,
        }
    }

    /// Convert to the `{kind, detail}` payload a caller-facing surface returns.
    #[must_use]
    pub fn to_payload(&self) -> ErrorPayload {
        let kind = self
            .kind()
            .map_or_else(|| "internal".to_string(), |k| k.to_string());
        let suggestion = match self {
            Self::Internal {
                context: Some(ctx), ..
            } => ctx.suggestion.as_ref().map(ToString::to_string),
            _ => None,
        };
        ErrorPayload {
            kind,
            detail: self.to_string(),
            suggestion,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
