//! Frames of the `graphql-ws` duplex sub-protocol.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{error::ProtocolError, payload::ExecutionResult};

/// WebSocket sub-protocol advertised during the upgrade.
pub const WS_PROTOCOL: &str = "graphql-ws";

/// Close code used on `connection_init` failure and `connection_terminate`.
pub const WS_INTERNAL_ERROR: u16 = 1011;

/// Every frame type of the protocol, in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    // Client -> Server
    ConnectionInit,
    ConnectionTerminate,
    Start,
    Stop,
    // Server -> Client
    ConnectionAck,
    ConnectionError,
    Data,
    Error,
    Complete,
    // Either direction
    #[serde(rename = "ka")]
    KeepAlive,
}

impl FrameType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameType::ConnectionInit => "connection_init",
            FrameType::ConnectionTerminate => "connection_terminate",
            FrameType::Start => "start",
            FrameType::Stop => "stop",
            FrameType::ConnectionAck => "connection_ack",
            FrameType::ConnectionError => "connection_error",
            FrameType::Data => "data",
            FrameType::Error => "error",
            FrameType::Complete => "complete",
            FrameType::KeepAlive => "ka",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connection_init" => Ok(FrameType::ConnectionInit),
            "connection_terminate" => Ok(FrameType::ConnectionTerminate),
            "start" => Ok(FrameType::Start),
            "stop" => Ok(FrameType::Stop),
            "connection_ack" => Ok(FrameType::ConnectionAck),
            "connection_error" => Ok(FrameType::ConnectionError),
            "data" => Ok(FrameType::Data),
            "error" => Ok(FrameType::Error),
            "complete" => Ok(FrameType::Complete),
            "ka" => Ok(FrameType::KeepAlive),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

/// Protocol frame envelope.
///
/// `id` and `payload` are left out of the encoded form when absent, so the
/// same shape describes inbound and outbound frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub ty: FrameType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Frame {
    pub fn new(ty: FrameType, id: Option<String>, payload: Option<Value>) -> Self {
        Self { ty, id, payload }
    }

    pub fn connection_ack() -> Self {
        Self::new(FrameType::ConnectionAck, None, None)
    }

    pub fn connection_error(message: impl fmt::Display) -> Self {
        Self::new(
            FrameType::ConnectionError,
            None,
            Some(json!({ "message": message.to_string() })),
        )
    }

    pub fn keep_alive() -> Self {
        Self::new(FrameType::KeepAlive, None, None)
    }

    pub fn data(id: impl Into<String>, result: &ExecutionResult) -> Self {
        Self::new(FrameType::Data, Some(id.into()), Some(result.to_value()))
    }

    pub fn error(id: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::new(
            FrameType::Error,
            Some(id.into()),
            Some(json!({ "message": message.to_string() })),
        )
    }

    pub fn complete(id: impl Into<String>) -> Self {
        Self::new(FrameType::Complete, Some(id.into()), None)
    }

    /// Decode one text frame.
    ///
    /// Shape problems surface as malformed errors (see
    /// [`ProtocolError::is_malformed`]); a well-formed frame with a type
    /// outside the protocol surfaces as [`ProtocolError::UnknownType`].
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let message: Value = serde_json::from_str(text)?;
        let Value::Object(mut message) = message else {
            return Err(ProtocolError::NotAnObject);
        };

        let ty = match message.remove("type") {
            Some(Value::String(ty)) => ty,
            _ => return Err(ProtocolError::InvalidType),
        };

        let id = match message.remove("id") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(id),
            Some(_) => return Err(ProtocolError::InvalidId),
        };

        let payload = match message.remove("payload") {
            None | Some(Value::Null) => None,
            Some(payload @ Value::Object(_)) => Some(payload),
            Some(_) => return Err(ProtocolError::InvalidPayload),
        };

        Ok(Self::new(ty.parse()?, id, payload))
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
