use thiserror::Error;

use crate::translate::BackendId;

/// Failures surfaced by a single translation call.
///
/// `Clone` so that one settled result can be handed to every caller waiting
/// on a deduplicated request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("Translation aborted")]
    Aborted,

    #[error("{backend} translation request failed: HTTP {status}")]
    BackendRequest { backend: BackendId, status: u16 },

    #[error("{backend} translation returned an unexpected response format")]
    BackendResponseFormat { backend: BackendId },

    #[error("{backend} translation API error ({code}): {message}")]
    BackendApi {
        backend: BackendId,
        code: i64,
        message: String,
    },

    #[error("Microsoft token request failed: HTTP {status}")]
    TokenFetch { status: u16 },

    #[error("{backend} credentials missing: {detail}")]
    MissingCredentials { backend: BackendId, detail: String },

    #[error("{backend} network error: {message}")]
    Network { backend: BackendId, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TranslateError {
    /// Superseded or explicitly cancelled; callers treat this as a no-op.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    pub(crate) fn network(backend: BackendId, error: &reqwest::Error) -> Self {
        Self::Network {
            backend,
            message: error.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum FanyiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Translate(#[from] TranslateError),
}

pub type Result<T> = std::result::Result<T, FanyiError>;
