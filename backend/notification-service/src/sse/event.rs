//! Event and relay envelope types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Notification event pushed to a client stream.
///
/// `event_type` becomes the SSE `event:` name; `data` is an opaque JSON
/// payload that is forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Event {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    /// A type is usable as an SSE `event:` name only when it is non-empty
    /// and fits on one line
    pub fn has_valid_type(&self) -> bool {
        is_valid_event_type(&self.event_type)
    }
}

pub fn is_valid_event_type(event_type: &str) -> bool {
    !event_type.is_empty() && !event_type.contains(['\r', '\n'])
}

/// Relay form of an [`Event`], carrying the target user and send time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub user_uuid: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default = "Utc::now")]
    pub sent_at: DateTime<Utc>,
}

impl Envelope {
    pub fn wrap(user_id: &str, event: Event) -> Self {
        Self {
            user_uuid: user_id.to_string(),
            event_type: event.event_type,
            data: event.data,
            sent_at: Utc::now(),
        }
    }

    /// An envelope is routable only with both a user and an event name
    pub fn is_routable(&self) -> bool {
        !self.user_uuid.is_empty() && is_valid_event_type(&self.event_type)
    }

    pub fn into_parts(self) -> (String, Event) {
        (
            self.user_uuid,
            Event {
                event_type: self.event_type,
                data: self.data,
            },
        )
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_uses_type_key() {
        let event = Event::new("notification.created", json!({"unread_count": 3}));
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(
            value,
            json!({"type": "notification.created", "data": {"unread_count": 3}})
        );
    }

    #[test]
    fn test_event_without_data_omits_field() {
        let event = Event::new("notification.updated", Value::Null);
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"type":"notification.updated"}"#
        );

        let parsed: Event = serde_json::from_str(r#"{"type":"notification.updated"}"#).unwrap();
        assert_eq!(parsed.data, Value::Null);
    }

    #[test]
    fn test_envelope_wire_format() {
        let envelope = Envelope::wrap("u1", Event::new("notification.created", json!({"id": 9})));
        let value: Value = serde_json::from_slice(&envelope.to_vec().unwrap()).unwrap();

        assert_eq!(value["user_uuid"], "u1");
        assert_eq!(value["type"], "notification.created");
        assert_eq!(value["data"], json!({"id": 9}));

        let sent_at = value["sent_at"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(sent_at).is_ok());
        assert!(sent_at.ends_with('Z'));
    }

    #[test]
    fn test_envelope_accepts_missing_sent_at() {
        let envelope =
            Envelope::from_slice(br#"{"user_uuid":"u1","type":"notification.created"}"#).unwrap();

        assert!(envelope.is_routable());
        let (user_id, event) = envelope.into_parts();
        assert_eq!(user_id, "u1");
        assert_eq!(event, Event::new("notification.created", Value::Null));
    }

    #[test]
    fn test_envelope_rejects_non_json() {
        assert!(Envelope::from_slice(b"not json").is_err());
        assert!(Envelope::from_slice(br#"{"type":"x"}"#).is_err());
    }

    #[test]
    fn test_envelope_routable() {
        let mut envelope = Envelope::wrap("u1", Event::new("t", Value::Null));
        assert!(envelope.is_routable());

        envelope.user_uuid.clear();
        assert!(!envelope.is_routable());
    }

    #[test]
    fn test_multiline_type_is_not_routable() {
        let envelope = Envelope::wrap(
            "u1",
            Event::new("x\ndata: {\"forged\":true}\n\nevent: admin", Value::Null),
        );
        assert!(!envelope.is_routable());

        let envelope = Envelope::wrap("u1", Event::new("notification.created\r", Value::Null));
        assert!(!envelope.is_routable());
    }

    #[test]
    fn test_event_type_validation() {
        assert!(is_valid_event_type("notification.created"));
        assert!(!is_valid_event_type(""));
        assert!(!is_valid_event_type("a\nb"));
        assert!(!is_valid_event_type("a\rb"));
        assert!(Event::new("notification.updated", Value::Null).has_valid_type());
    }
}
