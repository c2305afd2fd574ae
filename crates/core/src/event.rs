//! Normalized inbound event. Read-only to the mapping core; path lookups run
//! against its JSON form so mappings can address any field by wire name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Track,
    Identify,
    Page,
    Screen,
    Group,
    Alias,
}

impl EventType {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Identify => "identify",
            Self::Page => "page",
            Self::Screen => "screen",
            Self::Group => "group",
            Self::Alias => "alias",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub traits: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
    /// Any other top-level keys the source attached (integrations, receivedAt, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawEvent {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            event: None,
            name: None,
            user_id: None,
            anonymous_id: None,
            message_id: None,
            previous_id: None,
            timestamp: None,
            properties: Map::new(),
            traits: Map::new(),
            context: Map::new(),
            extra: Map::new(),
        }
    }

    pub fn track(event: impl Into<String>) -> Self {
        let mut e = Self::new(EventType::Track);
        e.event = Some(event.into());
        e
    }

    pub fn identify(user_id: impl Into<String>) -> Self {
        Self::new(EventType::Identify).with_user_id(user_id)
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_anonymous_id(mut self, anonymous_id: impl Into<String>) -> Self {
        self.anonymous_id = Some(anonymous_id.into());
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_trait(mut self, key: impl Into<String>, value: Value) -> Self {
        self.traits.insert(key.into(), value);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Wire-form JSON used as the root for mapping path lookups.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_track_event() {
        let event: RawEvent = serde_json::from_value(json!({
            "type": "track",
            "event": "Product Added",
            "userId": "user-1",
            "messageId": "m-1",
            "timestamp": "2024-03-01T10:00:00Z",
            "properties": { "product_id": "123", "price": 19.99 },
            "receivedAt": "2024-03-01T10:00:01Z"
        }))
        .unwrap();

        assert_eq!(event.event_type, EventType::Track);
        assert_eq!(event.user_id.as_deref(), Some("user-1"));
        assert_eq!(event.properties["price"], json!(19.99));
        assert_eq!(event.extra["receivedAt"], json!("2024-03-01T10:00:01Z"));
    }

    #[test]
    fn test_to_value_uses_wire_names() {
        let event = RawEvent::track("Signed Up")
            .with_user_id("u-1")
            .with_anonymous_id("a-1")
            .with_trait("email", json!("a@example.com"));
        let value = event.to_value();

        assert_eq!(value["type"], json!("track"));
        assert_eq!(value["userId"], json!("u-1"));
        assert_eq!(value["anonymousId"], json!("a-1"));
        assert_eq!(value["traits"]["email"], json!("a@example.com"));
        assert!(value.get("properties").is_none());
    }
}
