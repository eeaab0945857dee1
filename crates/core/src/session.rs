//! `graphql-ws` session state machine.
//!
//! A [`Session`] owns one duplex connection. It reads inbound frames from a
//! stream, dispatches them, pumps each running subscription on its own task
//! and hands every outbound frame to a bounded queue drained by the
//! transport's writer.

use std::{sync::Arc, time::Duration};

use futures::{Stream, StreamExt, stream};
use gqlstream_types::{
    Frame, FrameType, OperationRequest, ProtocolError, WS_INTERNAL_ERROR,
};
use serde_json::Value;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    engine::{Engine, ResultStream, Subscription},
    error::{SessionError, TransportError},
    registry::SubscriptionRegistry,
    stream::{CancellableOptions, cancellable},
};

/// A message read from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Binary(Vec<u8>),
}

/// A message for the transport's writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(Frame),
    /// Close the connection, with a close code when there is one
    Close(Option<u16>),
}

enum Flow {
    Continue,
    Close(Option<u16>),
}

enum Next {
    Cancelled,
    Message(Option<Result<Inbound, TransportError>>),
}

/// One `graphql-ws` connection.
pub struct Session<E: Engine> {
    engine: Arc<E>,
    context: Arc<E::Context>,
    token: CancellationToken,
    registry: Arc<SubscriptionRegistry>,
    outbound: mpsc::Sender<Outbound>,
    keep_alive: Option<Duration>,
    keep_alive_task: Option<JoinHandle<()>>,
}

impl<E: Engine> Session<E> {
    /// `token` cancels the whole connection; every subscription runs under a
    /// child of it.
    pub fn new(
        engine: Arc<E>,
        context: Arc<E::Context>,
        token: CancellationToken,
        outbound: mpsc::Sender<Outbound>,
    ) -> Self {
        Self {
            engine,
            context,
            token,
            registry: Arc::new(SubscriptionRegistry::new()),
            outbound,
            keep_alive: None,
            keep_alive_task: None,
        }
    }

    /// Send a `ka` frame every `keep_alive` once the connection is acknowledged.
    pub fn with_keep_alive(mut self, keep_alive: Option<Duration>) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn registry(&self) -> Arc<SubscriptionRegistry> {
        self.registry.clone()
    }

    /// Read and dispatch frames until the client leaves, the connection is
    /// cancelled or a fatal error occurs, then tear the session down.
    ///
    /// The last message handed to the writer is always [`Outbound::Close`].
    pub async fn run<S>(mut self, inbound: S)
    where
        S: Stream<Item = Result<Inbound, TransportError>>,
    {
        tokio::pin!(inbound);

        let close_code = loop {
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => Next::Cancelled,
                message = inbound.next() => Next::Message(message),
            };

            let message = match next {
                Next::Cancelled => {
                    debug!("Session cancelled");
                    break None;
                }
                Next::Message(None) => {
                    debug!("Client closed the connection");
                    break None;
                }
                Next::Message(Some(Err(e))) => {
                    warn!(error = %e, "Failed to read from connection");
                    break None;
                }
                Next::Message(Some(Ok(message))) => message,
            };

            match self.handle_message(message).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close(code)) => break code,
                Err(e) => {
                    warn!(error = %e, "Closing session");
                    break None;
                }
            }
        };

        self.teardown(close_code).await;
    }

    async fn handle_message(&mut self, message: Inbound) -> Result<Flow, SessionError> {
        let text = match message {
            Inbound::Text(text) => text,
            Inbound::Binary(_) => {
                warn!(error = %ProtocolError::NotText, "Dropping malformed frame");
                return Ok(Flow::Continue);
            }
        };

        let frame = match Frame::decode(&text) {
            Ok(frame) => frame,
            Err(e) if e.is_malformed() => {
                warn!(error = %e, "Dropping malformed frame");
                return Ok(Flow::Continue);
            }
            Err(e) => {
                warn!(error = %e, "Protocol violation");
                return Ok(Flow::Close(None));
            }
        };

        self.dispatch(frame).await
    }

    async fn dispatch(&mut self, frame: Frame) -> Result<Flow, SessionError> {
        match frame.ty {
            FrameType::ConnectionInit => self.on_connection_init().await,
            FrameType::ConnectionTerminate => {
                debug!("Client terminated the connection");
                Ok(Flow::Close(Some(WS_INTERNAL_ERROR)))
            }
            FrameType::Start => {
                let Some(id) = frame.id else {
                    warn!(error = %ProtocolError::MissingId("start"), "Dropping frame");
                    return Ok(Flow::Continue);
                };
                self.on_start(id, frame.payload).await
            }
            FrameType::Stop => {
                let Some(id) = frame.id else {
                    warn!(error = %ProtocolError::MissingId("stop"), "Dropping frame");
                    return Ok(Flow::Continue);
                };
                self.registry.stop(&id);
                Ok(Flow::Continue)
            }
            FrameType::KeepAlive => Ok(Flow::Continue),
            other => {
                warn!(error = %ProtocolError::UnknownType(other.to_string()), "Protocol violation");
                Ok(Flow::Close(None))
            }
        }
    }

    async fn on_connection_init(&mut self) -> Result<Flow, SessionError> {
        if let Err(e) = self.send(Frame::connection_ack()).await {
            warn!(error = %e, "Failed to acknowledge connection");
            let _ = self.send(Frame::connection_error(&e)).await;
            return Ok(Flow::Close(Some(WS_INTERNAL_ERROR)));
        }

        debug!("Connection acknowledged");
        self.start_keep_alive();
        Ok(Flow::Continue)
    }

    async fn on_start(&mut self, id: String, payload: Option<Value>) -> Result<Flow, SessionError> {
        self.registry.release(&id).await;

        match self.start(&id, payload).await {
            Ok(()) => Ok(Flow::Continue),
            Err(SessionError::Transport(e)) => Err(e.into()),
            Err(e) => {
                debug!(id = %id, error = %e, "Operation failed");
                self.send(Frame::error(&id, &e)).await?;
                Ok(Flow::Continue)
            }
        }
    }

    async fn start(&self, id: &str, payload: Option<Value>) -> Result<(), SessionError> {
        let request = OperationRequest::from_value(payload.as_ref())?;
        let document = self.engine.parse(&request.query)?;

        if !self.engine.has_subscription(&document) {
            let result = self.engine.execute(&request, &self.context).await;
            self.send(Frame::data(id, &result)).await?;
            return Ok(());
        }

        match self
            .engine
            .subscribe(document, &request, self.context.clone())
            .await?
        {
            Subscription::Single(result) => self.send(Frame::data(id, &result)).await?,
            Subscription::Stream(results) => {
                info!(id, operation = ?request.operation_name, "Subscription started");
                self.spawn_pump(id, results).await;
            }
        }
        Ok(())
    }

    async fn spawn_pump(&self, id: &str, results: ResultStream) {
        let token = self.token.child_token();
        let pump_token = token.clone();
        let registry = self.registry.clone();
        let outbound = self.outbound.clone();
        let pump_id = id.to_string();

        let previous = self.registry.register(id, token, move |generation| {
            tokio::spawn(pump(
                pump_id, generation, results, pump_token, registry, outbound,
            ))
        });

        if let Some(previous) = previous {
            if let Err(e) = previous.dispose().await {
                warn!(id, error = %e, "Replaced subscription failed during disposal");
            }
        }
    }

    fn start_keep_alive(&mut self) {
        let Some(interval) = self.keep_alive else {
            return;
        };
        if let Some(task) = self.keep_alive_task.take() {
            task.abort();
        }

        let ticks = cancellable(
            stream::pending::<()>(),
            self.token.child_token(),
            CancellableOptions::default().with_interval(interval),
        );
        let outbound = self.outbound.clone();

        self.keep_alive_task = Some(tokio::spawn(async move {
            let mut ticks = Box::pin(ticks);
            while ticks.next().await.is_some() {
                if outbound
                    .send(Outbound::Frame(Frame::keep_alive()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }));
    }

    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.outbound
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| TransportError::closed())
    }

    async fn teardown(mut self, close_code: Option<u16>) {
        let disposed = self.registry.dispose_all().await;
        if let Some(task) = self.keep_alive_task.take() {
            task.abort();
        }
        self.token.cancel();

        debug!(disposed, close_code = ?close_code, "Session closed");
        let _ = self.outbound.send(Outbound::Close(close_code)).await;
    }
}

/// Forward the results of one subscription to the client.
///
/// The last frame for the id is `complete` when the stream ends or is
/// stopped, or `error` when the stream fails. An aborted pump sends nothing.
async fn pump(
    id: String,
    generation: u64,
    results: ResultStream,
    token: CancellationToken,
    registry: Arc<SubscriptionRegistry>,
    outbound: mpsc::Sender<Outbound>,
) {
    let mut results = Box::pin(cancellable(results, token, CancellableOptions::default()));

    let last = loop {
        let frame = match results.next().await {
            Some(Some(Ok(result))) => Frame::data(&id, &result),
            Some(Some(Err(e))) => {
                warn!(id = %id, error = %e, "Subscription failed");
                break Frame::error(&id, &e);
            }
            Some(None) => continue,
            None => {
                debug!(id = %id, "Subscription complete");
                break Frame::complete(&id);
            }
        };

        if outbound.send(Outbound::Frame(frame)).await.is_err() {
            debug!(id = %id, "Connection gone, dropping subscription");
            registry.unregister_generation(&id, generation);
            return;
        }
    };

    drop(results);
    let _ = outbound.send(Outbound::Frame(last)).await;
    registry.unregister_generation(&id, generation);
}
