use thiserror::Error;

/// An inbound frame, or part of one, that breaks the protocol contract.
///
/// Protocol violations are distinct from engine failures: they are detected
/// before anything reaches the engine.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Expected the message to be a string.")]
    NotText,

    #[error("Expected the message to be valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Expected the message to be an object.")]
    NotAnObject,

    #[error("Expected field 'type' to be a string")]
    InvalidType,

    #[error("Expected field 'id' to be a string?")]
    InvalidId,

    #[error("Expected field 'payload' to be an object?")]
    InvalidPayload,

    #[error("Received unknown message type '{0}'.")]
    UnknownType(String),

    #[error("required 'id' field must be a string for '{0}'.")]
    MissingId(&'static str),

    #[error("required 'payload' field must be an object.")]
    MissingPayload,

    #[error("required 'query' field must be a non-empty string in 'payload'.")]
    InvalidQuery,

    #[error("optional 'variables' field must be object? in 'payload'.")]
    InvalidVariables,

    #[error("optional 'operationName' field must be str? in 'payload'.")]
    InvalidOperationName,
}

impl ProtocolError {
    /// Whether the frame could not be read at all.
    ///
    /// Malformed frames are dropped; every other violation is reported to
    /// the client or ends the connection.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ProtocolError::NotText
                | ProtocolError::InvalidJson(_)
                | ProtocolError::NotAnObject
                | ProtocolError::InvalidType
                | ProtocolError::InvalidId
                | ProtocolError::InvalidPayload
        )
    }
}
