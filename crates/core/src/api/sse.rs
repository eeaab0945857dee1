//! Server-Sent Events transport: one subscription per request.

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    Extension,
    extract::RawQuery,
    http::header,
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
};
use chrono::Utc;
use futures::{Stream, StreamExt, future, stream};
use gqlstream_types::{ExecutionResult, OperationRequest};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ControllerState;
use crate::{
    engine::{Engine, ResultStream, Subscription},
    error::RequestError,
    stream::{CancellableOptions, cancellable},
};

/// `GET {prefix}/sse-subscription?query=..&variables=..&operationName=..`
///
/// Every parameter value is JSON-encoded.
pub async fn handler<E: Engine>(
    Extension(state): Extension<Arc<ControllerState<E>>>,
    RawQuery(query): RawQuery,
) -> Response {
    let results = match subscribe(&state, query.as_deref().unwrap_or_default()).await {
        Ok(results) => results,
        Err(e) => {
            warn!(error = %e, "Failed to start SSE subscription");
            return e.into_response();
        }
    };

    let events = sse_events(
        results,
        state.shutdown.child_token(),
        state.config.ping_interval,
    );
    (
        [(header::CONNECTION, "keep-alive")],
        Sse::new(events),
    )
        .into_response()
}

async fn subscribe<E: Engine>(
    state: &ControllerState<E>,
    query: &str,
) -> Result<ResultStream, RequestError> {
    let params = decode_json_params(query)?;
    let request = OperationRequest::from_value(Some(&Value::Object(params)))?;
    let document = state.engine.parse(&request.query)?;

    if !state.engine.has_subscription(&document) {
        let result = state.engine.execute(&request, &state.context).await;
        return Ok(single(result));
    }

    match state
        .engine
        .subscribe(document, &request, state.context.clone())
        .await?
    {
        Subscription::Single(result) => Ok(single(result)),
        Subscription::Stream(results) => Ok(results),
    }
}

fn single(result: ExecutionResult) -> ResultStream {
    stream::once(future::ready(Ok(result))).boxed()
}

/// Decode a query string whose values are JSON documents.
pub fn decode_json_params(query: &str) -> Result<Map<String, Value>, RequestError> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query)?;
    pairs
        .into_iter()
        .map(|(name, value)| match serde_json::from_str(&value) {
            Ok(value) => Ok((name, value)),
            Err(source) => Err(RequestError::Parameter { name, source }),
        })
        .collect()
}

/// Turn subscription results into SSE events.
///
/// Each result becomes a `message` event and every idle `ping_interval` a
/// `ping` event carrying the current time. Every event is followed by an
/// empty comment so intermediaries flush it. A failed result is sent as a
/// `message` with `errors` and ends the stream.
pub fn sse_events(
    results: ResultStream,
    token: CancellationToken,
    ping_interval: Option<Duration>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        debug!("SSE subscription started");
        let items = cancellable(
            results,
            token,
            CancellableOptions::default().with_optional_interval(ping_interval),
        );
        tokio::pin!(items);

        while let Some(item) = items.next().await {
            let (event, last) = match item {
                Some(Ok(result)) => (message(&result), false),
                Some(Err(e)) => {
                    warn!(error = %e, "SSE subscription failed");
                    (message(&ExecutionResult::from_error(&e)), true)
                }
                None => (Event::default().event("ping").data(ping_time()), false),
            };

            yield Ok(event);
            yield Ok(Event::default().comment(""));

            if last {
                break;
            }
        }
        debug!("SSE subscription stopped");
    }
}

fn message(result: &ExecutionResult) -> Event {
    Event::default()
        .event("message")
        .data(result.to_value().to_string())
}

const PING_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Current UTC time without a zone suffix, e.g. `2024-05-01 12:30:05.123456`.
fn ping_time() -> String {
    Utc::now().naive_utc().format(PING_TIME_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{api::GraphQLController, config::ControllerConfig, testing::MockEngine};

    fn controller(config: ControllerConfig) -> (GraphQLController<MockEngine>, Arc<MockEngine>) {
        let engine = MockEngine::new();
        let controller = GraphQLController::from_shared(engine.clone(), Arc::new(()), config);
        (controller, engine)
    }

    fn uri(params: &[(&str, Value)]) -> String {
        let encoded: Vec<(&str, String)> = params
            .iter()
            .map(|(name, value)| (*name, value.to_string()))
            .collect();
        format!(
            "/sse-subscription?{}",
            serde_urlencoded::to_string(encoded).unwrap()
        )
    }

    #[test]
    fn test_decode_json_params() {
        let params =
            decode_json_params("query=%22%7B%20a%20%7D%22&variables=%7B%22x%22%3A1%7D").unwrap();
        assert_eq!(params["query"], "{ a }");
        assert_eq!(params["variables"]["x"], 1);

        assert!(matches!(
            decode_json_params("query=%7B%20a%20%7D"),
            Err(RequestError::Parameter { .. })
        ));
    }

    #[tokio::test]
    async fn test_stream_of_results() {
        let (controller, _) = controller(ControllerConfig::default());
        let request = Request::get(uri(&[("query", "subscription { numbers }".into())]))
            .body(Body::empty())
            .unwrap();

        let response = controller.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(response.headers()[header::CONNECTION], "keep-alive");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(body.matches("event: message").count(), 3);
        assert!(body.contains(r#"data: {"data":{"n":1}}"#), "{body}");
        assert!(body.contains(r#"data: {"data":{"n":3}}"#), "{body}");
        assert!(!body.contains("event: ping"));
    }

    #[tokio::test]
    async fn test_failed_result_ends_stream() {
        let (controller, _) = controller(ControllerConfig::default());
        let request = Request::get(uri(&[("query", "subscription { failing }".into())]))
            .body(Body::empty())
            .unwrap();

        let response = controller.router().oneshot(request).await.unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();

        assert_eq!(body.matches("event: message").count(), 2);
        assert!(body.contains(r#"data: {"errors":[{"message":"boom"}]}"#), "{body}");
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected() {
        let (controller, engine) = controller(ControllerConfig::default());

        for uri in [
            "/sse-subscription",
            "/sse-subscription?query=not-json",
            "/sse-subscription?variables=%7B%7D",
        ] {
            let request = Request::get(uri).body(Body::empty()).unwrap();
            let response = controller.router().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        }
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_subscription_pings_until_shutdown() {
        let config = ControllerConfig::default().with_ping_interval(Some(Duration::from_secs(10)));
        let (controller, _) = controller(config);
        let request = Request::get(uri(&[("query", "subscription { idle }".into())]))
            .body(Body::empty())
            .unwrap();

        let response = controller.router().oneshot(request).await.unwrap();
        let mut chunks = response.into_body().into_data_stream();

        let started = tokio::time::Instant::now();
        let ping = chunks.next().await.unwrap().unwrap();
        let ping = String::from_utf8_lossy(&ping).into_owned();
        let data = ping
            .strip_prefix("event: ping\ndata: ")
            .expect("ping event")
            .trim_end();
        assert!(
            chrono::NaiveDateTime::parse_from_str(data, PING_TIME_FORMAT).is_ok(),
            "{data}"
        );
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        let flush = chunks.next().await.unwrap().unwrap();
        assert!(flush.starts_with(b":"));

        controller.shutdown();
        assert!(chunks.next().await.is_none());
    }
}
