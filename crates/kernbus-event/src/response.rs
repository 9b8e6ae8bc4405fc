//! Correlated responses and the error marker.
//!
//! The bus is one-way: a response is just another [`Event`] carrying the
//! request's correlation id. A handler that fails on behalf of a waiting
//! caller puts an [`ErrorPayload`] under the [`ERROR_MARKER`] key of the
//! response data, which lets the RequestRouter tell "response received,
//! contains a business error" apart from "no response at all".

use crate::{Event, EventError, Priority};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Key in response data that marks the response as a business error.
pub const ERROR_MARKER: &str = "$error";

/// Business error carried back to a requester.
///
/// # Example
///
/// ```
/// use kernbus_event::ErrorPayload;
///
/// let err = ErrorPayload::new("TOOL_NOT_FOUND", "no tool named 'grep'");
/// assert_eq!(err.to_string(), "[TOOL_NOT_FOUND] no tool named 'grep'");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Machine-readable code chosen by the handler.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl ErrorPayload {
    /// Creates an error payload.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Event {
    /// Builds the response to this request event.
    ///
    /// The response inherits the tenant and correlation id and is sent at
    /// [`Priority::HIGH`] because a caller is blocked on it. `Err` results
    /// are wrapped under [`ERROR_MARKER`].
    ///
    /// # Errors
    ///
    /// Returns [`EventError::MissingCorrelation`] if this event has no
    /// correlation id, and [`EventError::EmptyType`] for an empty
    /// `response_type`.
    ///
    /// # Example
    ///
    /// ```
    /// use kernbus_event::{Event, ErrorPayload};
    /// use kernbus_types::CorrelationId;
    /// use serde_json::json;
    ///
    /// let request = Event::builder("tool.invoke", "acme")
    ///     .correlation_id(CorrelationId::new())
    ///     .build()
    ///     .unwrap();
    ///
    /// let ok = request.respond("tool.response", Ok(json!({"hits": 3}))).unwrap();
    /// assert_eq!(ok.correlation_id(), request.correlation_id());
    /// assert_eq!(ok.response_result(), Ok(json!({"hits": 3})));
    ///
    /// let failed = request
    ///     .respond("tool.response", Err(ErrorPayload::new("E", "boom")))
    ///     .unwrap();
    /// assert!(failed.error_payload().is_some());
    /// ```
    pub fn respond(
        &self,
        response_type: impl Into<String>,
        result: Result<Value, ErrorPayload>,
    ) -> Result<Event, EventError> {
        let correlation_id = self
            .correlation_id()
            .ok_or(EventError::MissingCorrelation(self.id()))?;

        let data = match result {
            Ok(value) => value,
            Err(payload) => {
                let mut map = Map::new();
                map.insert(ERROR_MARKER.to_string(), serde_json::to_value(payload)?);
                Value::Object(map)
            }
        };

        Event::builder(response_type, self.tenant_id().clone())
            .correlation_id(correlation_id)
            .priority(Priority::HIGH)
            .data(data)
            .build()
    }

    /// Returns the carried business error, if the data has the marker.
    #[must_use]
    pub fn error_payload(&self) -> Option<ErrorPayload> {
        self.data()
            .get(ERROR_MARKER)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Interprets this event as a response: `Err` when it carries the error
    /// marker, `Ok(data)` otherwise.
    pub fn response_result(&self) -> Result<Value, ErrorPayload> {
        match self.error_payload() {
            Some(err) => Err(err),
            None => Ok(self.data().clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernbus_types::CorrelationId;
    use serde_json::json;

    fn request() -> Event {
        Event::builder("tool.invoke", "acme")
            .correlation_id(CorrelationId::new())
            .build()
            .unwrap()
    }

    #[test]
    fn respond_requires_correlation() {
        let plain = Event::new("tool.invoke", "acme", Value::Null).unwrap();
        let err = plain.respond("tool.response", Ok(Value::Null)).unwrap_err();
        assert!(matches!(err, EventError::MissingCorrelation(id) if id == plain.id()));
    }

    #[test]
    fn response_inherits_tenant_and_is_high_priority() {
        let req = request();
        let resp = req.respond("tool.response", Ok(json!(1))).unwrap();
        assert_eq!(resp.tenant_id(), req.tenant_id());
        assert_eq!(resp.priority(), Priority::HIGH);
        assert_ne!(resp.id(), req.id());
    }

    #[test]
    fn error_marker_roundtrip() {
        let req = request();
        let resp = req
            .respond("tool.response", Err(ErrorPayload::new("TOOL_FAILED", "exit 2")))
            .unwrap();
        assert_eq!(resp.data()[ERROR_MARKER]["code"], "TOOL_FAILED");
        assert_eq!(
            resp.response_result(),
            Err(ErrorPayload::new("TOOL_FAILED", "exit 2"))
        );
    }

    #[test]
    fn malformed_marker_is_treated_as_data() {
        let req = request();
        let resp = req
            .respond("tool.response", Ok(json!({ERROR_MARKER: "not an object"})))
            .unwrap();
        assert!(resp.error_payload().is_none());
        assert!(resp.response_result().is_ok());
    }
}
