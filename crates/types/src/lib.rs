//! Shared protocol types for gqlstream.
//!
//! This crate holds the wire vocabulary spoken by both transports:
//!
//! - [`Frame`] / [`FrameType`] - the JSON frames of the `graphql-ws` duplex protocol
//! - [`OperationRequest`] - a validated `{query, variables?, operationName?}` document
//! - [`ExecutionResult`] - the `{data?, errors?}` shape produced by an engine
//! - [`ProtocolError`] - everything that can be wrong with an inbound frame

pub mod error;
pub mod frame;
pub mod payload;

pub use error::ProtocolError;
pub use frame::{Frame, FrameType, WS_INTERNAL_ERROR, WS_PROTOCOL};
pub use payload::{ExecutionResult, OperationRequest, Variables};
