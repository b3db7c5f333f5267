//! The [`Event`] trait: the single seam between application data and the
//! transport's send/receive pipeline.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Error;

/// Anything that can travel over the transport.
///
/// Implementors supply a stable `event_type` used for outbound dispatch
/// metadata and inbound handler routing, and may reject themselves before
/// they're ever serialized via [`Event::validate`].
///
/// A blanket impl covers any `Serialize` type, so most callers only need to
/// name their payload type and `event_type`; [`GenericEvent`] is provided for
/// cases where wrapping an existing type isn't convenient.
pub trait Event: Serialize + Send + Sync + 'static {
    /// The wire-level discriminator used to route this event to handlers.
    ///
    /// Sent as the `"type"` field of the serialized envelope and read back
    /// out of inbound payloads to pick a handler.
    fn event_type(&self) -> &str;

    /// Application-level sanity check run before serialization.
    ///
    /// The default accepts everything; override to reject malformed events
    /// before they reach the wire.
    fn validate(&self) -> crate::Result<()> {
        Ok(())
    }

    /// Serializes this event to its wire form: a JSON object carrying the
    /// event's own fields plus a `"type"` field set to [`Event::event_type`].
    fn to_json(&self) -> crate::Result<Vec<u8>> {
        let mut value = serde_json::to_value(self)?;
        if let serde_json::Value::Object(ref mut map) = value {
            map.insert(
                "type".to_owned(),
                serde_json::Value::String(self.event_type().to_owned()),
            );
        } else {
            return Err(Error::validation(
                "event must serialize to a JSON object to carry a type field",
            ));
        }
        Ok(serde_json::to_vec(&value)?)
    }
}

/// An untyped event for callers that would rather hand the transport a
/// `serde_json::Value` directly than define a dedicated type.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct GenericEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(flatten)]
    payload: serde_json::Value,
}

impl GenericEvent {
    #[must_use]
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    #[must_use]
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Deserializes the payload into a concrete type.
    pub fn decode<T: DeserializeOwned>(&self) -> crate::Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

impl Event for GenericEvent {
    fn event_type(&self) -> &str {
        &self.event_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Ping {
        seq: u32,
    }

    impl Event for Ping {
        fn event_type(&self) -> &str {
            "ping"
        }
    }

    #[test]
    fn to_json_injects_type_field() {
        let bytes = Ping { seq: 7 }.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "ping");
        assert_eq!(value["seq"], 7);
    }

    #[test]
    fn generic_event_round_trips_payload() {
        let event = GenericEvent::new("order.filled", serde_json::json!({"id": 42}));
        let bytes = event.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "order.filled");
        assert_eq!(value["id"], 42);
    }
}
