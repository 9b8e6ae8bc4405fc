//! The [`Event`] message type.
//!
//! An event is immutable once built: fields are private and only readable
//! through accessors, and the runtime shares events as `Arc<Event>`.
//!
//! # Serialized Form
//!
//! ```json
//! {
//!   "id": "1b4e28ba-2fa1-11d2-883f-0016d3cca427",
//!   "type": "tool.invoke",
//!   "data": { "tool": "search" },
//!   "metadata": {
//!     "correlationId": "6ba7b810-9dad-11d1-80b4-00c04fd430c8",
//!     "tenantId": "acme",
//!     "timestamp": 1735689600000,
//!     "priority": 50
//!   }
//! }
//! ```

use crate::EventError;
use kernbus_types::{CorrelationId, EventId, TenantId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Dispatch priority. Higher values drain first.
///
/// Equal priorities drain in arrival order.
///
/// # Example
///
/// ```
/// use kernbus_event::Priority;
///
/// assert!(Priority::HIGH > Priority::NORMAL);
/// assert_eq!(Priority::default(), Priority::NORMAL);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Background work, first to be shed under pressure.
    pub const LOW: Self = Self(10);
    /// Default priority.
    pub const NORMAL: Self = Self(50);
    /// Latency-sensitive work such as responses to waiting callers.
    pub const HIGH: Self = Self(90);
    /// Control traffic.
    pub const CRITICAL: Self = Self(u8::MAX);

    /// Returns the raw value.
    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Routing metadata carried by every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// Links a request to its response. `None` for plain notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Dispatch priority.
    #[serde(default)]
    pub priority: Priority,
}

/// Immutable typed message: the unit of communication on the bus.
///
/// # Example
///
/// ```
/// use kernbus_event::{Event, Priority};
/// use serde_json::json;
///
/// let event = Event::builder("tool.invoke", "acme")
///     .data(json!({"tool": "search"}))
///     .priority(Priority::HIGH)
///     .build()
///     .expect("non-empty type");
///
/// assert_eq!(event.event_type(), "tool.invoke");
/// assert_eq!(event.priority(), Priority::HIGH);
/// assert!(event.correlation_id().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: EventId,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
    metadata: EventMetadata,
}

impl Event {
    /// Builds a normal-priority event with no correlation id.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::EmptyType`] if `event_type` is empty.
    pub fn new(
        event_type: impl Into<String>,
        tenant: impl Into<TenantId>,
        data: Value,
    ) -> Result<Self, EventError> {
        Self::builder(event_type, tenant).data(data).build()
    }

    /// Starts building an event.
    #[must_use]
    pub fn builder(event_type: impl Into<String>, tenant: impl Into<TenantId>) -> EventBuilder {
        EventBuilder {
            id: None,
            event_type: event_type.into(),
            data: Value::Null,
            tenant: tenant.into(),
            correlation_id: None,
            priority: Priority::default(),
            timestamp: None,
        }
    }

    /// Unique event id.
    #[must_use]
    pub fn id(&self) -> EventId {
        self.id
    }

    /// Type discriminator used for routing and handler lookup.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Opaque payload.
    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Routing metadata.
    #[must_use]
    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    /// Correlation id, if this event is part of a request/response pair.
    #[must_use]
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.metadata.correlation_id
    }

    /// Owning tenant.
    #[must_use]
    pub fn tenant_id(&self) -> &TenantId {
        &self.metadata.tenant_id
    }

    /// Dispatch priority.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.metadata.priority
    }

    /// Creation timestamp in epoch milliseconds.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.metadata.timestamp
    }

    /// Serializes to the JSON wire shape.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Payload`] if the payload cannot be encoded.
    pub fn to_json(&self) -> Result<String, EventError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses the JSON wire shape.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Payload`] on malformed input and
    /// [`EventError::EmptyType`] if the type is empty.
    pub fn from_json(json: &str) -> Result<Self, EventError> {
        let event: Self = serde_json::from_str(json)?;
        if event.event_type.is_empty() {
            return Err(EventError::EmptyType);
        }
        Ok(event)
    }
}

/// Builder for [`Event`].
#[derive(Debug, Clone)]
#[must_use]
pub struct EventBuilder {
    id: Option<EventId>,
    event_type: String,
    data: Value,
    tenant: TenantId,
    correlation_id: Option<CorrelationId>,
    priority: Priority,
    timestamp: Option<i64>,
}

impl EventBuilder {
    /// Sets the payload.
    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Sets the dispatch priority.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Attaches a correlation id.
    pub fn correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Uses an explicit event id instead of a fresh one.
    ///
    /// Producers that retry a send reuse the id so the queue can drop the
    /// duplicate.
    pub fn id(mut self, id: EventId) -> Self {
        self.id = Some(id);
        self
    }

    /// Overrides the creation timestamp (epoch milliseconds).
    pub fn timestamp(mut self, millis: i64) -> Self {
        self.timestamp = Some(millis);
        self
    }

    /// Finishes the event.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::EmptyType`] if the type is empty.
    pub fn build(self) -> Result<Event, EventError> {
        if self.event_type.is_empty() {
            return Err(EventError::EmptyType);
        }
        Ok(Event {
            id: self.id.unwrap_or_default(),
            event_type: self.event_type,
            data: self.data,
            metadata: EventMetadata {
                correlation_id: self.correlation_id,
                tenant_id: self.tenant,
                timestamp: self
                    .timestamp
                    .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
                priority: self.priority,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_type_rejected() {
        let err = Event::new("", "acme", Value::Null).unwrap_err();
        assert_eq!(err, EventError::EmptyType);
    }

    #[test]
    fn builder_defaults() {
        let event = Event::new("agent.step", "acme", json!({"n": 1})).unwrap();
        assert_eq!(event.priority(), Priority::NORMAL);
        assert_eq!(event.tenant_id().as_str(), "acme");
        assert!(event.timestamp() > 0);
        assert_eq!(event.data()["n"], 1);
    }

    #[test]
    fn explicit_id_is_kept() {
        let id = EventId::new();
        let a = Event::builder("x", "t").id(id).build().unwrap();
        let b = Event::builder("x", "t").id(id).build().unwrap();
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn wire_shape_uses_camel_case_metadata() {
        let cid = CorrelationId::new();
        let event = Event::builder("tool.invoke", "acme")
            .correlation_id(cid)
            .timestamp(42)
            .build()
            .unwrap();

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "tool.invoke");
        assert_eq!(value["metadata"]["tenantId"], "acme");
        assert_eq!(value["metadata"]["timestamp"], 42);
        assert_eq!(value["metadata"]["priority"], 50);
        assert_eq!(
            value["metadata"]["correlationId"],
            json!(cid.uuid().to_string())
        );
    }

    #[test]
    fn uncorrelated_event_omits_correlation_field() {
        let event = Event::new("agent.step", "acme", Value::Null).unwrap();
        let value = serde_json::to_value(&event).unwrap();
        assert!(value["metadata"].get("correlationId").is_none());
    }

    #[test]
    fn json_parse_rejects_empty_type() {
        let json = r#"{"id":"1b4e28ba-2fa1-11d2-883f-0016d3cca427","type":"","data":null,
            "metadata":{"tenantId":"acme","timestamp":1,"priority":50}}"#;
        assert_eq!(Event::from_json(json).unwrap_err(), EventError::EmptyType);
    }

    #[test]
    fn json_parse_defaults_priority() {
        let json = r#"{"id":"1b4e28ba-2fa1-11d2-883f-0016d3cca427","type":"a",
            "metadata":{"tenantId":"acme","timestamp":1}}"#;
        let event = Event::from_json(json).unwrap();
        assert_eq!(event.priority(), Priority::NORMAL);
        assert!(event.data().is_null());
    }
}
