use std::{ffi::NulError, str::Utf8Error};

use axum::{http::StatusCode, response::IntoResponse};
use hyper::http;
use iotap_core::ProbeError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Failure of a request handled by the API server.
#[derive(Debug, Error)]
pub enum EngineApiError {
    /// Rejected by the controller, the message goes back to the caller.
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("filter controller unavailable")]
    ServiceUnavailable,
}

/// What's wrong with the socket path given to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SocketProblem {
    #[error("no such socket, is iotapd running?")]
    NotFound,
    #[error("not a unix socket")]
    NotASocket,
    #[error("permission denied, try with sudo")]
    PermissionDenied,
    #[error("can't read file metadata")]
    Metadata,
}

#[derive(Debug, Error)]
pub enum EngineClientError {
    #[error("{path}: {problem}")]
    Socket { path: String, problem: SocketProblem },

    #[error("invalid socket path: {0}")]
    SocketPath(#[from] NulError),

    #[error("building the request: {0}")]
    Request(#[from] http::Error),

    #[error("sending the request: {0}")]
    Send(#[from] hyper_util::client::legacy::Error),

    #[error("reading the response: {0}")]
    Body(#[from] hyper::Error),

    #[error("response is not utf-8: {0}")]
    Utf8(#[from] Utf8Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// The daemon answered with a non success status.
    #[error("iotapd answered {status}: {message}")]
    UnexpectedResponse { status: u16, message: String },

    #[error("connecting to the event stream: {0}")]
    Connect(#[from] std::io::Error),

    #[error("event stream handshake: {0}")]
    Handshake(#[from] Box<tungstenite::Error>),
}

impl EngineClientError {
    pub(crate) fn socket(path: String, problem: SocketProblem) -> Self {
        Self::Socket { path, problem }
    }
}

/// Failure while reading the event stream.
#[derive(Debug, Error)]
pub enum WebsocketError {
    #[error("malformed event: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected non-text message")]
    UnsupportedMessageType,

    #[error("event stream closed: {0}")]
    Connection(#[from] tungstenite::Error),
}

impl EngineApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ServiceUnavailable => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for EngineApiError {
    fn into_response(self) -> axum::response::Response {
        let status_code = self.status_code();

        match self {
            Self::BadRequest(message) => (status_code, message).into_response(),
            Self::ServiceUnavailable => (status_code, self.to_string()).into_response(),
        }
    }
}

impl From<ProbeError> for EngineApiError {
    fn from(error: ProbeError) -> Self {
        match &error {
            ProbeError::InvalidPid(_) | ProbeError::Table { .. } => {
                Self::BadRequest(error.to_string())
            }
            ProbeError::Stopped => {
                log::error!("{error}");
                Self::ServiceUnavailable
            }
        }
    }
}
