//! Error types for the repository server clients.

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unable to {action}. The server returned: {status}. {body}")]
    Status {
        action: String,
        status: StatusCode,
        body: String,
    },

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }
}

impl From<ClientError> for mergeit_core::Error {
    fn from(err: ClientError) -> Self {
        match err.status() {
            Some(StatusCode::NOT_FOUND) => mergeit_core::Error::NotFound(err.to_string()),
            Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                mergeit_core::Error::Unauthorized(err.to_string())
            }
            _ if matches!(&err, ClientError::Http(e) if e.is_timeout()) => {
                mergeit_core::Error::Timeout(err.to_string())
            }
            _ => mergeit_core::Error::Remote(err.to_string()),
        }
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
