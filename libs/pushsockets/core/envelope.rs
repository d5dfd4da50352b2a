use crate::traits::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Application-level message carried in the body of every broker frame
///
/// ```json
/// { "type": "RULE_DEPLOYED", "payload": { "ruleId": "r-42", "status": "OK" } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    pub fn decode(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize the payload into a concrete type
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            PushSocketError::Envelope(format!("payload of '{}' did not match: {e}", self.kind))
        })
    }
}

/// A message delivered to subscription handlers
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub destination: String,
    /// Subscription the broker addressed, if it named one of ours
    pub subscription: Option<SubscriptionId>,
    pub body: String,
    /// Decoded envelope, or `None` when the body is not one
    pub envelope: Option<Envelope>,
}

impl InboundMessage {
    pub fn new(destination: impl Into<String>, body: impl Into<String>) -> Self {
        let body = body.into();
        let envelope = Envelope::decode(&body).ok();
        Self {
            destination: destination.into(),
            subscription: None,
            body,
            envelope,
        }
    }

    pub fn with_subscription(mut self, id: SubscriptionId) -> Self {
        self.subscription = Some(id);
        self
    }

    pub fn kind(&self) -> Option<&str> {
        self.envelope.as_ref().map(|e| e.kind.as_str())
    }
}
