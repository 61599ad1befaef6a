//! Crate-level errors

use crate::config::ConfigError;
use crate::{eventstream, http};

/// Errors returned by the transcription client
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Http(#[from] http::Error),

    #[error("Event stream error: {0}")]
    EventStream(#[from] eventstream::Error),

    #[error("Invalid event payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A modeled exception sent by the service, e.g. `BadRequestException`
    #[error("{exception_type}: {message}")]
    Service {
        exception_type: String,
        message: String,
    },

    #[error("Unexpected HTTP status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),
}

impl Error {
    /// Whether the error came from the transport rather than the service
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Http(http::Error::Transport(_)) | Error::Http(http::Error::Io(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
