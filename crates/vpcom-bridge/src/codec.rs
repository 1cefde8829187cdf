//! Frame codec for bridge <-> peer communication
//!
//! Two body encodings are supported:
//! - BCP, MPF's line protocol: `name?key=type:value&...`, URL-encoded,
//!   with nested values carried in a single `json=` pair
//! - JSON objects: `{"name": ..., "params": {...}}` outbound and
//!   `{"name": ..., "payload": {...}}` inbound
//!
//! Delimiting is done by the transport according to [`Framing`].

use crate::transport::{Framing, MAX_FRAME_LEN};
use serde_json::{Number, Value};
use tracing::trace;
use vpcom_core::{BridgeError, Command, Event, Params, Result, WireFormat};

/// Encodes commands and decodes events for one wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Codec {
    format: WireFormat,
}

impl Codec {
    pub fn new(format: WireFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// How frames of this format are delimited on the stream
    pub fn framing(&self) -> Framing {
        match self.format {
            WireFormat::Bcp => Framing::Newline,
            WireFormat::Json => Framing::LengthPrefixed,
        }
    }

    /// Encode a command into a frame body (without delimiter)
    pub fn encode(&self, command: &Command) -> Result<Vec<u8>> {
        if command.name.is_empty() {
            return Err(BridgeError::Serialization("empty command name".into()));
        }
        let body = match self.format {
            WireFormat::Bcp => encode_bcp(command)?,
            WireFormat::Json => serde_json::to_vec(command)?,
        };
        if body.len() > MAX_FRAME_LEN {
            return Err(BridgeError::Serialization(format!(
                "{} frame is {} bytes, limit is {}",
                command.name,
                body.len(),
                MAX_FRAME_LEN
            )));
        }
        trace!(format = %self.format, len = body.len(), "Encoded {}", command.name);
        Ok(body)
    }

    /// Encode a command into a complete, self-delimited frame
    pub fn encode_frame(&self, command: &Command) -> Result<Vec<u8>> {
        Ok(self.framing().wrap(&self.encode(command)?))
    }

    /// Decode a frame body into an event
    pub fn decode(&self, body: &[u8]) -> Result<Event> {
        let event = match self.format {
            WireFormat::Bcp => decode_bcp(body)?,
            WireFormat::Json => serde_json::from_slice::<Event>(body)
                .map_err(|e| BridgeError::MalformedFrame(e.to_string()))?,
        };
        if event.name.is_empty() {
            return Err(BridgeError::MalformedFrame("empty event name".into()));
        }
        Ok(event)
    }
}

fn encode_bcp(command: &Command) -> Result<Vec<u8>> {
    if command.name.contains(['?', '&', '\r', '\n']) {
        return Err(BridgeError::Serialization(format!(
            "invalid BCP command name: {:?}",
            command.name
        )));
    }

    let mut line = command.name.clone();
    if command.params.is_empty() {
        return Ok(line.into_bytes());
    }

    line.push('?');
    let nested = command
        .params
        .values()
        .any(|v| v.is_object() || v.is_array());

    if nested {
        let json = serde_json::to_string(&command.params)?;
        line.push_str("json=");
        line.push_str(&urlencoding::encode(&json));
    } else {
        let pairs: Vec<String> = command
            .params
            .iter()
            .map(|(key, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(key),
                    urlencoding::encode(&tag_scalar(value))
                )
            })
            .collect();
        line.push_str(&pairs.join("&"));
    }

    Ok(line.into_bytes())
}

/// MPF type tags for scalar values
fn tag_scalar(value: &Value) -> String {
    match value {
        Value::Null => "NoneType:".to_string(),
        Value::Bool(true) => "bool:True".to_string(),
        Value::Bool(false) => "bool:False".to_string(),
        Value::Number(n) if n.is_f64() => format!("float:{n}"),
        Value::Number(n) => format!("int:{n}"),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn decode_bcp(body: &[u8]) -> Result<Event> {
    let line = std::str::from_utf8(body)
        .map_err(|e| BridgeError::MalformedFrame(format!("invalid UTF-8: {}", e)))?
        .trim_end_matches(['\r', '\n']);

    let (name, query) = line.split_once('?').unwrap_or((line, ""));
    let mut payload = Params::new();

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, raw) = pair.split_once('=').unwrap_or((pair, ""));
        let key = percent_decode(key)?;
        let raw = percent_decode(raw)?;

        if key == "json" {
            match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => payload.extend(map),
                Ok(other) => {
                    return Err(BridgeError::MalformedFrame(format!(
                        "json payload is not an object: {}",
                        other
                    )));
                }
                Err(e) => return Err(BridgeError::MalformedFrame(e.to_string())),
            }
        } else {
            payload.insert(key, untag_scalar(raw)?);
        }
    }

    Ok(Event::new(name, Some(payload)))
}

fn percent_decode(s: &str) -> Result<String> {
    let spaced = s.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| BridgeError::MalformedFrame(format!("bad percent-encoding in {:?}: {}", s, e)))
}

fn untag_scalar(raw: String) -> Result<Value> {
    if let Some(n) = raw.strip_prefix("int:") {
        if let Ok(i) = n.parse::<i64>() {
            return Ok(Value::from(i));
        }
        return n
            .parse::<u64>()
            .map(Value::from)
            .map_err(|_| BridgeError::MalformedFrame(format!("bad int value: {}", raw)));
    }
    if let Some(f) = raw.strip_prefix("float:") {
        return f
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| BridgeError::MalformedFrame(format!("bad float value: {}", raw)));
    }
    if let Some(b) = raw.strip_prefix("bool:") {
        return match b.to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(BridgeError::MalformedFrame(format!("bad bool value: {}", raw))),
        };
    }
    if raw.starts_with("NoneType:") {
        return Ok(Value::Null);
    }
    Ok(Value::String(raw))
}
