use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::ProtocolError;

/// Variable values passed alongside a query.
pub type Variables = Map<String, Value>;

/// A validated operation document: the payload of a `start` frame, the body
/// of an HTTP query, or the parameters of an SSE subscription.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Variables>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
}

impl OperationRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: None,
            operation_name: None,
        }
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn with_operation_name(mut self, operation_name: impl Into<String>) -> Self {
        self.operation_name = Some(operation_name.into());
        self
    }

    /// Validate a loosely typed payload.
    ///
    /// `query` must be a non-empty string; `variables` an object or null;
    /// `operationName` a string or null.
    pub fn from_value(payload: Option<&Value>) -> Result<Self, ProtocolError> {
        let Some(Value::Object(payload)) = payload else {
            return Err(ProtocolError::MissingPayload);
        };

        let query = match payload.get("query") {
            Some(Value::String(query)) if !query.trim().is_empty() => query.clone(),
            _ => return Err(ProtocolError::InvalidQuery),
        };

        let variables = match payload.get("variables") {
            None | Some(Value::Null) => None,
            Some(Value::Object(variables)) => Some(variables.clone()),
            Some(_) => return Err(ProtocolError::InvalidVariables),
        };

        let operation_name = match payload.get("operationName") {
            None | Some(Value::Null) => None,
            Some(Value::String(name)) => Some(name.clone()),
            Some(_) => return Err(ProtocolError::InvalidOperationName),
        };

        Ok(Self {
            query,
            variables,
            operation_name,
        })
    }
}

/// Outcome of executing one operation, or one event of a subscription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Already formatted GraphQL errors (`{message, locations?, path?}`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Value>,
}

impl ExecutionResult {
    pub fn from_data(data: Value) -> Self {
        Self {
            data: (!data.is_null()).then_some(data),
            errors: Vec::new(),
        }
    }

    pub fn from_error(message: impl std::fmt::Display) -> Self {
        Self {
            data: None,
            errors: vec![json!({ "message": message.to_string() })],
        }
    }

    pub fn with_error(mut self, message: impl std::fmt::Display) -> Self {
        self.errors.push(json!({ "message": message.to_string() }));
        self
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// `{data?, errors?}` as carried by `data` frames and SSE messages.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(data) = self.data.as_ref().filter(|data| !data.is_null()) {
            map.insert("data".to_string(), data.clone());
        }
        if !self.errors.is_empty() {
            map.insert("errors".to_string(), Value::Array(self.errors.clone()));
        }
        Value::Object(map)
    }

    /// `{data, errors?}` as returned by the HTTP query endpoint, where `data`
    /// is always present.
    pub fn to_response_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(
            "data".to_string(),
            self.data.clone().unwrap_or(Value::Null),
        );
        if !self.errors.is_empty() {
            map.insert("errors".to_string(), Value::Array(self.errors.clone()));
        }
        Value::Object(map)
    }
}
