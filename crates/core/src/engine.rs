//! The query engine seam.
//!
//! Parsing, validation and execution of GraphQL documents live outside this
//! crate. Transports only need the four operations of [`Engine`].

use std::{future::Future, sync::Arc};

use futures::stream::BoxStream;
use gqlstream_types::{ExecutionResult, OperationRequest};
use thiserror::Error;

/// Results of a running subscription, in the order the engine produced them.
///
/// An `Err` item ends the subscription.
pub type ResultStream = BoxStream<'static, Result<ExecutionResult, EngineError>>;

/// Failures raised by an engine, as opposed to errors reported inside an
/// [`ExecutionResult`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Syntax Error: {0}")]
    Parse(String),

    #[error("{0}")]
    Execution(String),
}

/// What subscribing to a document produced.
pub enum Subscription {
    /// The engine answered at once, typically with validation errors
    Single(ExecutionResult),
    /// A live stream of results
    Stream(ResultStream),
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subscription::Single(result) => f.debug_tuple("Single").field(result).finish(),
            Subscription::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A GraphQL engine: parser, validator and executor bound to a schema.
///
/// One engine is shared by every connection. The context value is shared by
/// every call made for the connections of a controller and is only read.
pub trait Engine: Send + Sync + 'static {
    /// Per-request data handed to resolvers
    type Context: Send + Sync + 'static;
    /// A parsed query document
    type Document: Send + 'static;

    fn parse(&self, query: &str) -> Result<Self::Document, EngineError>;

    /// Whether any top-level operation of the document is a subscription.
    fn has_subscription(&self, document: &Self::Document) -> bool;

    /// Execute a query or mutation from its source text.
    fn execute(
        &self,
        request: &OperationRequest,
        context: &Self::Context,
    ) -> impl Future<Output = ExecutionResult> + Send;

    /// Subscribe to the subscription operation of a parsed document.
    fn subscribe(
        &self,
        document: Self::Document,
        request: &OperationRequest,
        context: Arc<Self::Context>,
    ) -> impl Future<Output = Result<Subscription, EngineError>> + Send;
}
