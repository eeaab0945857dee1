//! gqlstream core
//!
//! Delivers GraphQL subscription results to remote clients over two
//! transports:
//!
//! - **WebSocket** (`graphql-ws` sub-protocol): many subscriptions per
//!   connection, keyed by client ids, started and stopped with `start`/`stop`
//!   frames
//! - **Server-Sent Events**: one implicit subscription per request, with
//!   `ping` events while the subscription is idle
//!
//! The GraphQL parser and executor are not part of this crate. They are
//! plugged in through the [`Engine`] trait.
//!
//! # Example
//!
//! ```ignore
//! use gqlstream_core::{ControllerConfig, GraphQLController};
//!
//! let controller = GraphQLController::new(my_engine, my_context, ControllerConfig::default());
//! let app = controller.router();
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```
//!
//! # Endpoints
//!
//! ```text
//! GET|POST {prefix}/graphql            queries and mutations, 201 + location for subscriptions
//! GET      {prefix}/sse-subscription   subscription as text/event-stream
//! GET      {prefix}/subscriptions      WebSocket upgrade (graphql-ws)
//! ```

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod session;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{GraphQLController, start_server};
pub use config::ControllerConfig;
pub use engine::{Engine, EngineError, ResultStream, Subscription};
pub use error::{RequestError, ServerError, SessionError, TransportError};
pub use registry::{SubscriptionHandle, SubscriptionRegistry};
pub use session::{Inbound, Outbound, Session};
pub use stream::{CancellableOptions, cancellable};

pub use gqlstream_types as types;
