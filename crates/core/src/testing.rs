//! In-memory engine for transport tests.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use futures::{StreamExt, stream};
use gqlstream_types::{ExecutionResult, OperationRequest};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::engine::{Engine, EngineError, Subscription};

#[derive(Debug)]
pub struct MockDocument {
    pub subscription: bool,
}

/// Queries are recognized by keyword:
///
/// - text without `{` fails to parse
/// - `subscription` documents containing `numbers` stream `{"n": 1..=3}`
/// - `failing` streams one result then an execution error
/// - `single` answers at once with an error result
/// - `broken` fails to subscribe
/// - anything else streams whatever is sent on the feed named by the
///   operation name, or nothing at all
#[derive(Default)]
pub struct MockEngine {
    feeds: Mutex<HashMap<String, UnboundedReceiverStream<ExecutionResult>>>,
    calls: AtomicUsize,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sender for the subscription whose operation name is `name`.
    pub fn feed(&self, name: &str) -> mpsc::UnboundedSender<ExecutionResult> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds
            .lock()
            .insert(name.to_string(), UnboundedReceiverStream::new(rx));
        tx
    }

    /// Number of `execute` and `subscribe` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn number(n: i64) -> ExecutionResult {
    ExecutionResult::from_data(json!({ "n": n }))
}

pub fn echo(query: &str) -> ExecutionResult {
    ExecutionResult::from_data(json!({ "echo": query }))
}

impl Engine for MockEngine {
    type Context = ();
    type Document = MockDocument;

    fn parse(&self, query: &str) -> Result<MockDocument, EngineError> {
        if !query.contains('{') {
            return Err(EngineError::Parse(format!("Unexpected <EOF> in {query:?}")));
        }
        Ok(MockDocument {
            subscription: query.trim_start().starts_with("subscription"),
        })
    }

    fn has_subscription(&self, document: &MockDocument) -> bool {
        document.subscription
    }

    async fn execute(&self, request: &OperationRequest, _context: &()) -> ExecutionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        echo(&request.query)
    }

    async fn subscribe(
        &self,
        _document: MockDocument,
        request: &OperationRequest,
        _context: Arc<()>,
    ) -> Result<Subscription, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let query = request.query.as_str();

        if query.contains("numbers") {
            let items = stream::iter((1..=3).map(|n| Ok(number(n))));
            return Ok(Subscription::Stream(items.boxed()));
        }
        if query.contains("failing") {
            let items = stream::iter([
                Ok(number(1)),
                Err(EngineError::Execution("boom".to_string())),
            ]);
            return Ok(Subscription::Stream(items.boxed()));
        }
        if query.contains("single") {
            return Ok(Subscription::Single(ExecutionResult::from_error(
                "Cannot query field \"single\"",
            )));
        }
        if query.contains("broken") {
            return Err(EngineError::Execution("subscribe failed".to_string()));
        }

        let feed = request
            .operation_name
            .as_deref()
            .and_then(|name| self.feeds.lock().remove(name));
        match feed {
            Some(feed) => Ok(Subscription::Stream(feed.map(Ok).boxed())),
            None => Ok(Subscription::Stream(stream::pending().boxed())),
        }
    }
}
