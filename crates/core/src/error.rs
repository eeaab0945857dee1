use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gqlstream_types::ProtocolError;
use thiserror::Error;

use crate::engine::EngineError;

/// The connection can no longer carry frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Transport error: {0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(reason: impl std::fmt::Display) -> Self {
        Self(reason.to_string())
    }

    pub fn closed() -> Self {
        Self("connection closed".to_string())
    }
}

/// Errors raised while a session handles one inbound frame.
///
/// Protocol and engine failures are reported to the client on the frame's id
/// when there is one; transport failures end the session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors raised by the HTTP side: the query endpoint and the SSE endpoint.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Content type not supported: {0}")]
    UnsupportedContentType(String),

    #[error("Invalid query string: {0}")]
    QueryString(#[from] serde_urlencoded::de::Error),

    #[error("Invalid JSON in parameter '{name}': {source}")]
    Parameter {
        name: String,
        source: serde_json::Error,
    },

    #[error("Invalid JSON body: {0}")]
    Body(serde_json::Error),

    #[error("Invalid multipart body: {0}")]
    Multipart(#[from] multer::Error),

    #[error("Failed to build subscription location: {0}")]
    Location(#[from] serde_urlencoded::ser::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl RequestError {
    pub fn status(&self) -> StatusCode {
        match self {
            RequestError::UnsupportedContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            RequestError::QueryString(_)
            | RequestError::Parameter { .. }
            | RequestError::Body(_)
            | RequestError::Multipart(_)
            | RequestError::Protocol(_)
            | RequestError::Engine(EngineError::Parse(_)) => StatusCode::BAD_REQUEST,
            RequestError::Location(_) | RequestError::Engine(EngineError::Execution(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Errors starting or running the HTTP server.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(std::io::Error),
}
