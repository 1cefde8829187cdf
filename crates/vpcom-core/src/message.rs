//! Commands sent to the peer and events received from it

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameter mapping carried by commands and events
pub type Params = serde_json::Map<String, Value>;

/// Outbound command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    #[serde(default)]
    pub params: Params,
}

impl Command {
    /// Create a command with no parameters
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Params::new(),
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Inbound event, either a response or unsolicited
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    #[serde(default, alias = "params")]
    pub payload: Option<Params>,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Option<Params>) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Look up a payload field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.as_ref().and_then(|p| p.get(key))
    }

    /// Turn a response into the value handed back to the host
    ///
    /// `error` wins over `value`, which wins over `result`; anything else
    /// returns the whole payload.
    pub fn into_value(self) -> Result<Value> {
        let Some(mut payload) = self.payload else {
            return Ok(Value::Null);
        };

        if let Some(error) = payload.remove("error") {
            let message = match error {
                Value::String(s) => s,
                other => other.to_string(),
            };
            return Err(BridgeError::PeerError(message));
        }

        if let Some(value) = payload.remove("value") {
            return Ok(value);
        }
        if let Some(result) = payload.remove("result") {
            return Ok(result);
        }
        Ok(Value::Object(payload))
    }
}

impl From<Command> for Event {
    fn from(command: Command) -> Self {
        Event {
            name: command.name,
            payload: Some(command.params),
        }
    }
}

impl From<Event> for Command {
    fn from(event: Event) -> Self {
        Command {
            name: event.name,
            params: event.payload.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(payload: Value) -> Event {
        match payload {
            Value::Object(map) => Event::new("Switch_response", Some(map)),
            _ => panic!("payload must be an object"),
        }
    }

    #[test]
    fn test_value_extraction() {
        let e = event(json!({"number": 12, "value": 1}));
        assert_eq!(e.into_value().unwrap(), json!(1));
    }

    #[test]
    fn test_result_extraction() {
        let e = event(json!({"result": [[1, true], [2, false]]}));
        assert_eq!(e.into_value().unwrap(), json!([[1, true], [2, false]]));
    }

    #[test]
    fn test_error_payload() {
        let e = event(json!({"error": "Unknown switch 99", "value": 0}));
        assert_eq!(
            e.into_value(),
            Err(BridgeError::PeerError("Unknown switch 99".into()))
        );
    }

    #[test]
    fn test_whole_payload_and_null() {
        let e = event(json!({"lamps": []}));
        assert_eq!(e.into_value().unwrap(), json!({"lamps": []}));

        let e = Event::new("start_response", None);
        assert_eq!(e.into_value().unwrap(), Value::Null);
    }

    #[test]
    fn test_event_accepts_params_alias() {
        let e: Event = serde_json::from_str(r#"{"name":"Mech","params":{"number":3}}"#).unwrap();
        assert_eq!(e.get("number"), Some(&json!(3)));

        let e: Event = serde_json::from_str(r#"{"name":"reset"}"#).unwrap();
        assert!(e.payload.is_none());
    }
}
