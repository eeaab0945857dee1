//! Demo engine served by `gqlstream run`.
//!
//! Understands a small GraphQL subset: operations with optional names and
//! variable definitions, and top-level fields with optional arguments.
//!
//! ```graphql
//! query { time hello uptime }
//! subscription { clock }
//! subscription Countdown($from: Int) { countdown }
//! ```

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use futures::StreamExt;
use gqlstream_core::{Engine, EngineError, Subscription};
use gqlstream_types::{ExecutionResult, OperationRequest};
use serde_json::{Map, Value, json};
use tokio::time::{Instant, sleep};

/// Interval between two subscription events.
pub const TICK: Duration = Duration::from_secs(1);

const DEFAULT_COUNTDOWN: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: OperationKind,
    pub name: Option<String>,
    /// Top-level field names, in order
    pub fields: Vec<String>,
}

/// A parsed document: one or more operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub operations: Vec<Operation>,
}

impl Document {
    /// The operation named `name`, or the only operation of the document.
    pub fn operation(&self, name: Option<&str>) -> Result<&Operation, EngineError> {
        match name {
            Some(name) => self
                .operations
                .iter()
                .find(|op| op.name.as_deref() == Some(name))
                .ok_or_else(|| EngineError::Execution(format!("Unknown operation named '{}'.", name))),
            None if self.operations.len() == 1 => Ok(&self.operations[0]),
            None => Err(EngineError::Execution(
                "Must provide operation name if query contains multiple operations.".to_string(),
            )),
        }
    }
}

pub struct DemoContext {
    started: Instant,
}

impl Default for DemoContext {
    fn default() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct DemoEngine;

impl Engine for DemoEngine {
    type Context = DemoContext;
    type Document = Document;

    fn parse(&self, query: &str) -> Result<Document, EngineError> {
        parse_document(query)
    }

    fn has_subscription(&self, document: &Document) -> bool {
        document
            .operations
            .iter()
            .any(|op| op.kind == OperationKind::Subscription)
    }

    async fn execute(&self, request: &OperationRequest, context: &DemoContext) -> ExecutionResult {
        let document = match parse_document(&request.query) {
            Ok(document) => document,
            Err(e) => return ExecutionResult::from_error(e),
        };
        let operation = match document.operation(request.operation_name.as_deref()) {
            Ok(operation) => operation,
            Err(e) => return ExecutionResult::from_error(e),
        };
        if operation.kind != OperationKind::Query {
            return ExecutionResult::from_error(format!(
                "Schema is not configured for {}s.",
                kind_name(operation.kind)
            ));
        }

        let mut data = Map::new();
        let mut result = ExecutionResult::default();
        for field in &operation.fields {
            let value = match field.as_str() {
                "time" => json!(Utc::now().to_rfc3339()),
                "hello" => json!("Hello, world!"),
                "uptime" => json!(context.started.elapsed().as_secs()),
                "__typename" => json!("Query"),
                other => {
                    result = result.with_error(unknown_field(other, "Query"));
                    continue;
                }
            };
            data.insert(field.clone(), value);
        }

        result.data = Some(Value::Object(data));
        result
    }

    async fn subscribe(
        &self,
        document: Document,
        request: &OperationRequest,
        _context: Arc<DemoContext>,
    ) -> Result<Subscription, EngineError> {
        let operation = document.operation(request.operation_name.as_deref())?;
        if operation.kind != OperationKind::Subscription {
            return Err(EngineError::Execution(format!(
                "Expected a subscription, found a {}.",
                kind_name(operation.kind)
            )));
        }

        let field = match operation.fields.as_slice() {
            [field] => field.as_str(),
            _ => {
                return Ok(Subscription::Single(ExecutionResult::from_error(
                    "Subscription must select only one top level field.",
                )));
            }
        };

        match field {
            "clock" => Ok(Subscription::Stream(clock().boxed())),
            "countdown" => {
                let from = match request.variables.as_ref().and_then(|vars| vars.get("from")) {
                    None | Some(Value::Null) => DEFAULT_COUNTDOWN,
                    Some(value) => value.as_i64().ok_or_else(|| {
                        EngineError::Execution(format!(
                            "Variable \"$from\" got invalid value {}; Int cannot represent it.",
                            value
                        ))
                    })?,
                };
                Ok(Subscription::Stream(countdown(from).boxed()))
            }
            other => Ok(Subscription::Single(ExecutionResult::from_error(
                unknown_field(other, "Subscription"),
            ))),
        }
    }
}

fn clock() -> impl futures::Stream<Item = Result<ExecutionResult, EngineError>> + Send + 'static {
    async_stream::stream! {
        loop {
            sleep(TICK).await;
            yield Ok(ExecutionResult::from_data(json!({ "clock": Utc::now().to_rfc3339() })));
        }
    }
}

fn countdown(from: i64) -> impl futures::Stream<Item = Result<ExecutionResult, EngineError>> + Send + 'static {
    async_stream::stream! {
        for n in (0..=from.max(0)).rev() {
            yield Ok(ExecutionResult::from_data(json!({ "countdown": n })));
            if n > 0 {
                sleep(TICK).await;
            }
        }
    }
}

fn kind_name(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Query => "query",
        OperationKind::Mutation => "mutation",
        OperationKind::Subscription => "subscription",
    }
}

fn unknown_field(field: &str, ty: &str) -> String {
    format!("Cannot query field \"{}\" on type \"{}\".", field, ty)
}

#[derive(Debug, Clone, PartialEq)]
enum Token<'a> {
    Name(&'a str),
    Variable,
    Punct(char),
    Literal,
}

fn tokenize(source: &str) -> Result<Vec<Token<'_>>, EngineError> {
    let mut tokens = Vec::new();
    let bytes = source.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            c if c.is_whitespace() || c == ',' => i += 1,
            '#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            '{' | '}' | '(' | ')' | ':' | '[' | ']' | '!' | '=' | '@' => {
                tokens.push(Token::Punct(c));
                i += 1;
            }
            '$' => {
                let start = i + 1;
                i = scan_name(bytes, start);
                if i == start {
                    return Err(EngineError::Parse("Expected Name after \"$\".".to_string()));
                }
                tokens.push(Token::Variable);
            }
            '"' => {
                i += 1;
                loop {
                    match bytes.get(i) {
                        None => return Err(EngineError::Parse("Unterminated string.".to_string())),
                        Some(b'\\') => i += 2,
                        Some(b'"') => {
                            i += 1;
                            break;
                        }
                        Some(_) => i += 1,
                    }
                }
                tokens.push(Token::Literal);
            }
            c if c == '-' || c.is_ascii_digit() => {
                i += 1;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.') {
                    i += 1;
                }
                tokens.push(Token::Literal);
            }
            c if c == '_' || c.is_ascii_alphabetic() => {
                let start = i;
                i = scan_name(bytes, start);
                tokens.push(Token::Name(&source[start..i]));
            }
            other => {
                return Err(EngineError::Parse(format!("Unexpected character \"{}\".", other)));
            }
        }
    }

    Ok(tokens)
}

fn scan_name(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && (bytes[i] == b'_' || bytes[i].is_ascii_alphanumeric()) {
        i += 1;
    }
    i
}

/// Parse the operations of a document, keeping only what the demo schema
/// needs: kind, name and top-level field names.
pub fn parse_document(source: &str) -> Result<Document, EngineError> {
    let tokens = tokenize(source)?;
    let mut operations = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        let kind = match tokens[i] {
            Token::Punct('{') => OperationKind::Query,
            Token::Name("query") => OperationKind::Query,
            Token::Name("mutation") => OperationKind::Mutation,
            Token::Name("subscription") => OperationKind::Subscription,
            ref other => {
                return Err(EngineError::Parse(format!("Unexpected {:?}.", other)));
            }
        };

        let mut name = None;
        if tokens[i] != Token::Punct('{') {
            i += 1;
            if let Some(Token::Name(op_name)) = tokens.get(i) {
                name = Some(op_name.to_string());
                i += 1;
            }
            if tokens.get(i) == Some(&Token::Punct('(')) {
                i = skip_group(&tokens, i, '(', ')')?;
            }
            while tokens.get(i) == Some(&Token::Punct('@')) {
                i += 2;
                if tokens.get(i) == Some(&Token::Punct('(')) {
                    i = skip_group(&tokens, i, '(', ')')?;
                }
            }
            if tokens.get(i) != Some(&Token::Punct('{')) {
                return Err(EngineError::Parse("Expected \"{\".".to_string()));
            }
        }

        let (fields, next) = selection_set(&tokens, i)?;
        operations.push(Operation { kind, name, fields });
        i = next;
    }

    if operations.is_empty() {
        return Err(EngineError::Parse("Unexpected <EOF>.".to_string()));
    }
    Ok(Document { operations })
}

/// Top-level field names of the selection set opening at `start`, and the
/// index after its closing brace.
fn selection_set(tokens: &[Token<'_>], start: usize) -> Result<(Vec<String>, usize), EngineError> {
    let mut fields = Vec::new();
    let mut i = start + 1;

    loop {
        match tokens.get(i) {
            None => return Err(EngineError::Parse("Expected \"}\", found <EOF>.".to_string())),
            Some(Token::Punct('}')) => break,
            Some(Token::Name(name)) => {
                let mut field = *name;
                i += 1;
                if tokens.get(i) == Some(&Token::Punct(':')) {
                    match tokens.get(i + 1) {
                        Some(Token::Name(aliased)) => field = *aliased,
                        _ => return Err(EngineError::Parse("Expected Name after alias.".to_string())),
                    }
                    i += 2;
                }
                fields.push(field.to_string());
                if tokens.get(i) == Some(&Token::Punct('(')) {
                    i = skip_group(tokens, i, '(', ')')?;
                }
                while tokens.get(i) == Some(&Token::Punct('@')) {
                    i += 2;
                    if tokens.get(i) == Some(&Token::Punct('(')) {
                        i = skip_group(tokens, i, '(', ')')?;
                    }
                }
                if tokens.get(i) == Some(&Token::Punct('{')) {
                    i = skip_group(tokens, i, '{', '}')?;
                }
            }
            Some(other) => {
                return Err(EngineError::Parse(format!("Expected Name, found {:?}.", other)));
            }
        }
    }

    if fields.is_empty() {
        return Err(EngineError::Parse("Expected Name, found \"}\".".to_string()));
    }
    Ok((fields, i + 1))
}

/// Index after the group opening at `start`.
fn skip_group(tokens: &[Token<'_>], start: usize, open: char, close: char) -> Result<usize, EngineError> {
    let mut depth = 0usize;
    for (offset, token) in tokens[start..].iter().enumerate() {
        match token {
            Token::Punct(c) if *c == open => depth += 1,
            Token::Punct(c) if *c == close => {
                depth -= 1;
                if depth == 0 {
                    return Ok(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    Err(EngineError::Parse(format!("Expected \"{}\", found <EOF>.", close)))
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[test]
    fn test_parse_operations() {
        let document = parse_document(
            r#"
            # comment
            query Greeting($name: String = "x") { hello(name: $name) time }
            subscription Ticks { clock { at } }
            "#,
        )
        .unwrap();

        assert_eq!(
            document.operations,
            vec![
                Operation {
                    kind: OperationKind::Query,
                    name: Some("Greeting".to_string()),
                    fields: vec!["hello".to_string(), "time".to_string()],
                },
                Operation {
                    kind: OperationKind::Subscription,
                    name: Some("Ticks".to_string()),
                    fields: vec!["clock".to_string()],
                },
            ]
        );
        assert!(DemoEngine.has_subscription(&document));
    }

    #[test]
    fn test_parse_shorthand_query() {
        let document = parse_document("{ hello }").unwrap();
        assert_eq!(document.operations[0].kind, OperationKind::Query);
        assert!(!DemoEngine.has_subscription(&document));
    }

    #[test]
    fn test_parse_errors() {
        for source in ["", "hello", "{ hello", "{ }", "query { a(b: 1 }", "{ a } }", "{ a ^ }"] {
            assert!(
                matches!(parse_document(source), Err(EngineError::Parse(_))),
                "{source:?}"
            );
        }
    }

    #[test]
    fn test_operation_selection() {
        let document = parse_document("query A { hello } query B { time }").unwrap();
        assert_eq!(document.operation(Some("B")).unwrap().fields, vec!["time"]);
        assert!(document.operation(None).is_err());
        assert!(document.operation(Some("C")).is_err());
    }

    #[tokio::test]
    async fn test_execute_query() {
        let result = DemoEngine
            .execute(&OperationRequest::new("{ hello nope }"), &DemoContext::default())
            .await;

        assert_eq!(result.data, Some(json!({ "hello": "Hello, world!" })));
        assert_eq!(
            result.errors,
            vec![json!({ "message": "Cannot query field \"nope\" on type \"Query\"." })]
        );
    }

    #[tokio::test]
    async fn test_execute_rejects_mutation() {
        let result = DemoEngine
            .execute(&OperationRequest::new("mutation { hello }"), &DemoContext::default())
            .await;
        assert!(!result.is_ok());
        assert!(result.data.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_subscription() {
        let request = OperationRequest::new("subscription ($from: Int) { countdown }")
            .with_variables(serde_json::from_value(json!({ "from": 2 })).unwrap());
        let document = DemoEngine.parse(&request.query).unwrap();

        let Subscription::Stream(results) = DemoEngine
            .subscribe(document, &request, Arc::new(DemoContext::default()))
            .await
            .unwrap()
        else {
            panic!("expected a stream");
        };

        let started = Instant::now();
        let values: Vec<_> = results.map(|result| result.unwrap().data.unwrap()).collect().await;
        assert_eq!(
            values,
            vec![
                json!({ "countdown": 2 }),
                json!({ "countdown": 1 }),
                json!({ "countdown": 0 }),
            ]
        );
        assert_eq!(started.elapsed(), TICK * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_subscription_ticks() {
        let request = OperationRequest::new("subscription { clock }");
        let document = DemoEngine.parse(&request.query).unwrap();

        let Subscription::Stream(mut results) = DemoEngine
            .subscribe(document, &request, Arc::new(DemoContext::default()))
            .await
            .unwrap()
        else {
            panic!("expected a stream");
        };

        let started = Instant::now();
        for n in 1..=2u32 {
            let result = results.next().await.unwrap().unwrap();
            assert!(result.data.unwrap()["clock"].is_string());
            assert_eq!(started.elapsed(), TICK * n);
        }
    }

    #[tokio::test]
    async fn test_unknown_subscription_field() {
        let request = OperationRequest::new("subscription { weather }");
        let document = DemoEngine.parse(&request.query).unwrap();

        let response = DemoEngine
            .subscribe(document, &request, Arc::new(DemoContext::default()))
            .await
            .unwrap();
        assert!(matches!(response, Subscription::Single(result) if !result.is_ok()));
    }

    #[tokio::test]
    async fn test_invalid_countdown_variable() {
        let request = OperationRequest::new("subscription { countdown }")
            .with_variables(serde_json::from_value(json!({ "from": "ten" })).unwrap());
        let document = DemoEngine.parse(&request.query).unwrap();

        let response = DemoEngine
            .subscribe(document, &request, Arc::new(DemoContext::default()))
            .await;
        assert!(matches!(response, Err(EngineError::Execution(_))));
    }
}
