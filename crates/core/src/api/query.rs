//! Query endpoint: `GET|POST {prefix}/graphql`.
//!
//! Queries and mutations are executed and answered with `{data, errors?}`.
//! Subscriptions are not run here; the response is `201 Created` with a
//! `location` pointing at the SSE endpoint for the same document.

use std::{convert::Infallible, sync::Arc};

use axum::{
    Extension, Json,
    body::Bytes,
    extract::RawQuery,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use futures::{future, stream};
use gqlstream_types::OperationRequest;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::ControllerState;
use crate::{engine::Engine, error::RequestError};

pub async fn handler<E: Engine>(
    Extension(state): Extension<Arc<ControllerState<E>>>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    match handle(&state, &method, &headers, &uri, query.as_deref(), body).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "GraphQL request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                "Internal server error",
            )
                .into_response()
        }
    }
}

async fn handle<E: Engine>(
    state: &ControllerState<E>,
    method: &Method,
    headers: &HeaderMap,
    uri: &Uri,
    query: Option<&str>,
    body: Bytes,
) -> Result<Response, RequestError> {
    let document = if *method == Method::GET {
        form_fields(query.unwrap_or_default().as_bytes())?
    } else {
        read_body(headers, body).await?
    };

    let request = OperationRequest::from_value(Some(&Value::Object(document.clone())))?;
    let parsed = state.engine.parse(&request.query)?;

    if state.engine.has_subscription(&parsed) {
        let location = subscription_location(state, headers, uri, &document)?;
        debug!(location = %location, "Redirecting subscription to SSE");
        return Ok((
            StatusCode::CREATED,
            [
                (header::LOCATION, location),
                (header::ACCESS_CONTROL_EXPOSE_HEADERS, "location".to_string()),
            ],
        )
            .into_response());
    }

    let result = state.engine.execute(&request, &state.context).await;
    Ok(Json(result.to_response_value()).into_response())
}

/// Read the operation from a POST body according to its content type.
async fn read_body(headers: &HeaderMap, body: Bytes) -> Result<Map<String, Value>, RequestError> {
    let raw_content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let content_type = raw_content_type
        .split(';')
        .next()
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default();

    match content_type.as_str() {
        "application/graphql" => {
            let mut document = Map::new();
            document.insert(
                "query".to_string(),
                Value::String(String::from_utf8_lossy(&body).into_owned()),
            );
            Ok(document)
        }
        "application/json" | "text/plain" => {
            match serde_json::from_slice(&body).map_err(RequestError::Body)? {
                Value::Object(document) => Ok(document),
                other => {
                    let mut document = Map::new();
                    document.insert("query".to_string(), other);
                    Ok(document)
                }
            }
        }
        "application/x-www-form-urlencoded" => form_fields(&body),
        "multipart/form-data" => multipart_fields(raw_content_type, body).await,
        _ => Err(RequestError::UnsupportedContentType(content_type)),
    }
}

/// Form or query string fields.
fn form_fields(input: &[u8]) -> Result<Map<String, Value>, RequestError> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(input)?;
    field_document(pairs)
}

/// Text parts of a `multipart/form-data` body, read like form fields.
async fn multipart_fields(
    content_type: &str,
    body: Bytes,
) -> Result<Map<String, Value>, RequestError> {
    let boundary = multer::parse_boundary(content_type)?;
    let chunks = stream::once(future::ready(Ok::<_, Infallible>(body)));
    let mut multipart = multer::Multipart::new(chunks, boundary);

    let mut pairs = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        pairs.push((name, field.text().await?));
    }
    field_document(pairs)
}

/// `variables` holds a JSON object; every other field is plain text. The
/// first occurrence of a repeated field wins.
fn field_document(pairs: Vec<(String, String)>) -> Result<Map<String, Value>, RequestError> {
    let mut document = Map::new();
    for (name, value) in pairs {
        if document.contains_key(&name) {
            continue;
        }
        let value = if name == "variables" {
            match serde_json::from_str(&value) {
                Ok(value) => value,
                Err(source) => return Err(RequestError::Parameter { name, source }),
            }
        } else {
            Value::String(value)
        };
        document.insert(name, value);
    }
    Ok(document)
}

fn subscription_location<E: Engine>(
    state: &ControllerState<E>,
    headers: &HeaderMap,
    uri: &Uri,
    document: &Map<String, Value>,
) -> Result<String, RequestError> {
    let scheme = uri.scheme_str().unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|authority| authority.to_string()))
        .unwrap_or_else(|| "localhost".to_string());

    let params: Vec<(&str, String)> = document
        .iter()
        .map(|(name, value)| (name.as_str(), value.to_string()))
        .collect();
    let query = serde_urlencoded::to_string(params)?;

    Ok(format!(
        "{}://{}{}?{}",
        scheme,
        host,
        state.config.route("/sse-subscription"),
        query
    ))
}

#[cfg(test)]
mod tests {
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::Request,
    };
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        api::{GraphQLController, sse::decode_json_params},
        config::ControllerConfig,
        testing::MockEngine,
    };

    fn router(config: ControllerConfig) -> (Router, Arc<MockEngine>) {
        let engine = MockEngine::new();
        let controller = GraphQLController::from_shared(engine.clone(), Arc::new(()), config);
        (controller.router(), engine)
    }

    async fn body_json(response: Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn post(uri: &str, content_type: &str, body: impl Into<Body>) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, content_type)
            .body(body.into())
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_query() {
        let (router, _) = router(ControllerConfig::default());
        let request = Request::get("/graphql?query=%7B%20hello%20%7D")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({ "data": { "echo": "{ hello }" } })
        );
    }

    #[tokio::test]
    async fn test_post_content_types() {
        let (router, engine) = router(ControllerConfig::default());
        let json_body = json!({ "query": "{ hello }", "variables": { "a": 1 } }).to_string();

        let requests = [
            post("/graphql", "application/json", json_body.clone()),
            post("/graphql", "text/plain; charset=utf-8", json_body),
            post("/graphql", "application/graphql", "{ hello }"),
            post(
                "/graphql",
                "application/x-www-form-urlencoded",
                "query=%7B+hello+%7D&variables=%7B%22a%22%3A1%7D",
            ),
        ];

        for request in requests {
            let response = router.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(
                body_json(response).await,
                json!({ "data": { "echo": "{ hello }" } })
            );
        }
        assert_eq!(engine.calls(), 4);
    }

    #[tokio::test]
    async fn test_post_multipart_form() {
        let (router, engine) = router(ControllerConfig::default());
        let body = [
            "--XyZ",
            "Content-Disposition: form-data; name=\"query\"",
            "",
            "{ hello }",
            "--XyZ",
            "Content-Disposition: form-data; name=\"variables\"",
            "",
            r#"{"a": 1}"#,
            "--XyZ",
            "Content-Disposition: form-data; name=\"query\"",
            "",
            "{ ignored }",
            "--XyZ--",
            "",
        ]
        .join("\r\n");

        let response = router
            .clone()
            .oneshot(post("/graphql", "multipart/form-data; boundary=XyZ", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({ "data": { "echo": "{ hello }" } })
        );
        assert_eq!(engine.calls(), 1);

        // Without a boundary the body cannot be read.
        let response = router
            .oneshot(post("/graphql", "multipart/form-data", "--XyZ--\r\n"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(engine.calls(), 1);
    }

    #[test]
    fn test_repeated_field_keeps_first() {
        let document = form_fields(b"query=%7Ba%7D&query=%7Bb%7D&operationName=A").unwrap();

        assert_eq!(document["query"], "{a}");
        assert_eq!(document["operationName"], "A");
    }

    #[tokio::test]
    async fn test_subscription_redirects_to_sse() {
        let (router, engine) = router(ControllerConfig::default().with_path_prefix("/api"));
        let body = json!({ "query": "subscription { numbers }", "variables": { "n": 3 } });
        let request = Request::post("/api/graphql")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::HOST, "example.com:8080")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_EXPOSE_HEADERS],
            "location"
        );
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        let (base, query) = location.split_once('?').unwrap();
        assert_eq!(base, "http://example.com:8080/api/sse-subscription");

        let params = decode_json_params(query).unwrap();
        assert_eq!(params["query"], "subscription { numbers }");
        assert_eq!(params["variables"], json!({ "n": 3 }));
        assert_eq!(engine.calls(), 0);

        // The location serves the subscription.
        let request = Request::get(format!("/api/sse-subscription?{query}"))
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let events = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(
            String::from_utf8_lossy(&events).matches("event: message").count(),
            3
        );
    }

    #[tokio::test]
    async fn test_failures_are_internal_server_errors() {
        let (router, engine) = router(ControllerConfig::default());

        let requests = [
            post("/graphql", "application/xml", "<query/>"),
            post("/graphql", "application/json", "{ not json"),
            post("/graphql", "application/json", r#"{"variables": {}}"#),
            post("/graphql", "application/graphql", "no braces"),
            Request::get("/graphql?query=%7Ba%7D&variables=oops")
                .body(Body::empty())
                .unwrap(),
        ];

        for request in requests {
            let response = router.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            assert_eq!(&body[..], b"Internal server error");
        }
        assert_eq!(engine.calls(), 0);
    }
}
