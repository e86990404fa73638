//! Error types for the sync engine.
//!
//! Every command failure maps onto a fixed exit-code taxonomy so that the CLI
//! can report `{code, code_name, message}` and exit with the same code.

use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Why a credential could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    /// No credential has been imported.
    NotFound,
    /// The credential was invalidated by an earlier rejection.
    Stale,
    /// The remote feed rejected the credential on this run.
    Rejected,
}

/// Whether a network failure was worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorKind {
    /// Retry budget exhausted on a retryable failure.
    Transient,
    /// Non-retryable failure (non-auth 4xx, malformed response).
    Permanent,
}

/// Errors surfaced at the command boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing, stale or rejected credential.
    #[error("{message}")]
    Auth {
        kind: AuthErrorKind,
        message: String,
    },

    /// Feed or enrichment request failed.
    #[error("{message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
        page: Option<u32>,
    },

    /// One or more requested identifiers are not in the store.
    #[error("bookmark(s) not found: {}", ids.join(", "))]
    NotFound { ids: Vec<String> },

    /// Malformed filter or argument.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Local store failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored data could not be decoded.
    #[error("corrupt stored data: {0}")]
    Corrupt(String),

    /// Cookie import failure.
    #[error("cookie import failed: {0}")]
    Browser(String),

    /// Local I/O failure outside the store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding failure.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV export failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result alias for sync engine operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Exit code for unexpected failures.
    pub const GENERAL: u8 = 1;
    pub const AUTH: u8 = 2;
    pub const NETWORK: u8 = 3;
    pub const NOT_FOUND: u8 = 4;
    pub const INVALID_INPUT: u8 = 5;
    pub const DATABASE: u8 = 6;
    pub const BROWSER: u8 = 7;

    /// Shorthand for an auth error.
    pub fn auth(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        Self::Auth {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a network error without page context.
    pub fn network(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        Self::Network {
            kind,
            message: message.into(),
            page: None,
        }
    }

    /// Attach the feed page number to a network error.
    #[must_use]
    pub fn on_page(self, page: u32) -> Self {
        match self {
            Self::Network { kind, message, .. } => Self::Network {
                kind,
                message,
                page: Some(page),
            },
            other => other,
        }
    }

    /// Numeric exit code.
    pub fn code(&self) -> u8 {
        match self {
            Self::Auth { .. } => Self::AUTH,
            Self::Network { .. } => Self::NETWORK,
            Self::NotFound { .. } => Self::NOT_FOUND,
            Self::InvalidInput(_) => Self::INVALID_INPUT,
            Self::Database(_) | Self::Corrupt(_) => Self::DATABASE,
            Self::Browser(_) => Self::BROWSER,
            Self::Io(_) | Self::Json(_) | Self::Csv(_) => Self::GENERAL,
        }
    }

    /// Stable snake_case name of the error class.
    pub fn code_name(&self) -> &'static str {
        match self.code() {
            Self::AUTH => "auth_error",
            Self::NETWORK => "network_error",
            Self::NOT_FOUND => "not_found",
            Self::INVALID_INPUT => "invalid_input",
            Self::DATABASE => "database_error",
            Self::BROWSER => "browser_error",
            _ => "general_error",
        }
    }

    /// Structured context for the error envelope.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Auth { kind, .. } => Some(json!({ "kind": kind })),
            Self::Network { kind, page, .. } => Some(match page {
                Some(page) => json!({ "kind": kind, "page": page }),
                None => json!({ "kind": kind }),
            }),
            Self::NotFound { ids } => Some(json!({ "ids": ids })),
            _ => None,
        }
    }

    /// True when the remote rejected the credential during this run.
    pub fn is_auth_rejected(&self) -> bool {
        matches!(
            self,
            Self::Auth {
                kind: AuthErrorKind::Rejected,
                ..
            }
        )
    }
}
