use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Id prefix for envelopes synthesized from raw websocket frames.
pub const WS_SOURCE_TAG: &str = "ws";
/// Provenance marker stored under `metadata.source` for wrapped frames.
pub const WS_PROVENANCE: &str = "waha-ws";
/// Event type used when a wrapped frame carries no `event` field.
pub const GENERIC_EVENT_TYPE: &str = "ws";

/// Canonical unit flowing from the upstream bridge through the bus to every
/// stream consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    /// Milliseconds since the unix epoch.
    pub timestamp: i64,
    #[serde(
        rename = "event",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub event_type: Option<String>,
    #[serde(
        rename = "session",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<String>,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl EventEnvelope {
    pub fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref()
    }
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Normalize an arbitrary upstream value into an envelope. Never fails.
pub fn normalize(raw: Value) -> EventEnvelope {
    normalize_at(raw, WS_SOURCE_TAG, now_ms())
}

/// Same as [`normalize`] with an explicit id prefix and arrival time.
pub fn normalize_at(
    raw: Value,
    source_tag: &str,
    now_ms: i64,
) -> EventEnvelope {
    match raw {
        Value::Object(obj) => match accept_as_is(obj) {
            Ok(envelope) => envelope,
            Err(obj) => wrap_object(obj, source_tag, now_ms),
        },
        other => EventEnvelope {
            id: synth_id(source_tag, now_ms),
            timestamp: now_ms,
            event_type: Some(GENERIC_EVENT_TYPE.to_string()),
            session_id: None,
            payload: other,
            metadata: Some(provenance()),
        },
    }
}

/// Accepts objects that already carry the envelope shape. Hands the object
/// back untouched when the shape does not match.
fn accept_as_is(
    mut obj: Map<String, Value>,
) -> Result<EventEnvelope, Map<String, Value>> {
    let id = string_field(&obj, "id").filter(|s| !s.is_empty());
    let timestamp = obj.get("timestamp").and_then(as_millis);
    let (Some(id), Some(timestamp)) = (id, timestamp) else {
        return Err(obj);
    };
    if !obj.contains_key("payload") {
        return Err(obj);
    }
    Ok(EventEnvelope {
        id,
        timestamp,
        event_type: string_field(&obj, "event"),
        session_id: string_field(&obj, "session"),
        payload: obj.remove("payload").unwrap_or(Value::Null),
        metadata: match obj.remove("metadata") {
            Some(Value::Object(m)) => Some(m),
            _ => None,
        },
    })
}

fn wrap_object(
    mut obj: Map<String, Value>,
    source_tag: &str,
    now_ms: i64,
) -> EventEnvelope {
    let event_type = string_field(&obj, "event")
        .unwrap_or_else(|| GENERIC_EVENT_TYPE.to_string());
    let session_id = string_field(&obj, "session");
    // provider frames nest the message body under `payload`
    let payload = match obj.remove("payload") {
        Some(Value::Null) | None => Value::Object(obj),
        Some(inner) => inner,
    };
    EventEnvelope {
        id: synth_id(source_tag, now_ms),
        timestamp: now_ms,
        event_type: Some(event_type),
        session_id,
        payload,
        metadata: Some(provenance()),
    }
}

fn synth_id(source_tag: &str, now_ms: i64) -> String {
    format!("{}_{}_{:x}", source_tag, now_ms, rand::random::<u64>())
}

fn provenance() -> Map<String, Value> {
    let mut m = Map::new();
    m.insert("source".into(), Value::String(WS_PROVENANCE.into()));
    m
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn as_millis(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))
}
