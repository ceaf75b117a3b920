use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{SyncError, SyncResult};

/// Document body: always a JSON object.
///
/// Built at the gateway boundary; shape validation beyond "is an object" is
/// the job of the caller's validation layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> SyncResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(SyncError::invalid_payload(format!(
                "expected a JSON object, got {}",
                kind_of(&other)
            ))),
        }
    }

    /// Serialize a feature struct into a payload
    pub fn from_serialize<T: Serialize>(value: &T) -> SyncResult<Self> {
        Self::from_value(serde_json::to_value(value)?)
    }

    /// Deserialize the payload into a feature struct
    pub fn to_typed<T: DeserializeOwned>(&self) -> SyncResult<T> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl TryFrom<Value> for Payload {
    type Error = SyncError;

    fn try_from(value: Value) -> SyncResult<Self> {
        Self::from_value(value)
    }
}

impl From<Payload> for Value {
    fn from(payload: Payload) -> Self {
        payload.into_value()
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
