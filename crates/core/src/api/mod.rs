//! HTTP surface: the query endpoint, the SSE endpoint and the WebSocket
//! endpoint, mounted under a common prefix.

pub mod query;
pub mod sse;
pub mod ws;

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{config::ControllerConfig, engine::Engine, error::ServerError};

/// State shared by every handler of one controller.
pub struct ControllerState<E: Engine> {
    pub engine: Arc<E>,
    pub context: Arc<E::Context>,
    pub config: ControllerConfig,
    /// Parent of every connection token
    pub shutdown: CancellationToken,
}

/// Serves one engine over HTTP, SSE and WebSocket.
pub struct GraphQLController<E: Engine> {
    state: Arc<ControllerState<E>>,
}

impl<E: Engine> Clone for GraphQLController<E> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<E: Engine> GraphQLController<E> {
    pub fn new(engine: E, context: E::Context, config: ControllerConfig) -> Self {
        Self::from_shared(Arc::new(engine), Arc::new(context), config)
    }

    pub fn from_shared(engine: Arc<E>, context: Arc<E::Context>, config: ControllerConfig) -> Self {
        Self {
            state: Arc::new(ControllerState {
                engine,
                context,
                config,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.state.config
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Cancel every open WebSocket and SSE subscription.
    pub fn shutdown(&self) {
        info!("Shutting down GraphQL controller");
        self.state.shutdown.cancel();
    }

    /// Routes:
    ///
    /// - `GET|POST {prefix}/graphql`
    /// - `GET {prefix}/sse-subscription`
    /// - `GET {prefix}/subscriptions` (WebSocket upgrade)
    pub fn router(&self) -> Router<()> {
        let config = &self.state.config;

        Router::new()
            .route(
                &config.route("/graphql"),
                get(query::handler::<E>).post(query::handler::<E>),
            )
            .route(&config.route("/sse-subscription"), get(sse::handler::<E>))
            .route(&config.route("/subscriptions"), get(ws::handler::<E>))
            .layer(Extension(self.state.clone()))
    }
}

/// Serve `app` on `addr` until `shutdown` is cancelled.
pub async fn start_server(
    app: Router<()>,
    addr: &str,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    info!("Starting gqlstream server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(ServerError::Serve)?;

    info!("Server stopped");
    Ok(())
}
