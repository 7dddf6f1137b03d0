//! Task queue abstraction
//!
//! The ingest path publishes [`TaskMessage`]s to the `tasks` exchange and the
//! worker consumes them from the `tasks` queue. Delivery is at-least-once
//! from the broker's side; consumers acknowledge each [`Delivery`] once.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryBroker;
#[cfg(feature = "redis")]
pub use self::redis::RedisBroker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use tokio::sync::mpsc;

/// Exchange and queue carrying worker tasks
pub const TASKS_EXCHANGE: &str = "tasks";

/// Message kind of a location record batch
pub const LOCATION_RECORD: &str = "location_record";

/// Message kind of a freshly generated identifier
pub const NEW_DID: &str = "new_did";

/// Header naming the submitter of a task
pub const DID_HEADER: &str = "did";

/// Error type for broker operations
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Acknowledgement failed: {0}")]
    Ack(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Broker is closed")]
    Closed,
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Serialization(err.to_string())
    }
}

/// A task exchanged between the server and the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMessage {
    /// Message kind, e.g. [`LOCATION_RECORD`]
    #[serde(rename = "type")]
    pub kind: String,

    /// Publication time (unix milliseconds)
    pub timestamp: i64,

    pub message_id: String,

    pub content_type: String,

    #[serde(with = "serde_bytes_base64")]
    pub body: Vec<u8>,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Must survive broker restarts
    #[serde(default)]
    pub persistent: bool,
}

impl TaskMessage {
    /// Create a message of `kind` carrying `body`
    pub fn new(kind: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            kind: kind.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            message_id: uuid::Uuid::new_v4().to_string(),
            content_type: "application/octet-stream".into(),
            body,
            headers: HashMap::new(),
            persistent: false,
        }
    }

    /// Create a message whose body is `value` encoded as JSON
    pub fn json<T: Serialize>(kind: impl Into<String>, value: &T) -> Result<Self, BrokerError> {
        let mut message = Self::new(kind, serde_json::to_vec(value)?);
        message.content_type = "application/json".into();
        Ok(message)
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Mark the message as persistent
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    /// Look up a header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Wire encoding
    pub fn to_bytes(&self) -> Result<Vec<u8>, BrokerError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from the wire encoding
    pub fn from_slice(bytes: &[u8]) -> Result<Self, BrokerError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Acknowledges a delivery on the broker it came from
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, message: &TaskMessage) -> Result<(), BrokerError>;
}

/// A message handed to a consumer
pub struct Delivery {
    pub message: TaskMessage,
    acker: Box<dyn Acknowledger>,
}

impl Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message_id", &self.message.message_id)
            .field("kind", &self.message.kind)
            .finish()
    }
}

impl Delivery {
    pub fn new(message: TaskMessage, acker: Box<dyn Acknowledger>) -> Self {
        Self { message, acker }
    }

    /// Acknowledge the delivery, consuming it
    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack(&self.message).await
    }
}

/// Stream of deliveries from a subscription
pub type Subscription = mpsc::UnboundedReceiver<Delivery>;

/// Publishing side of the broker
#[async_trait]
pub trait Publisher: Send + Sync + Debug {
    /// Publish to `exchange`; returns whether the broker accepted the message
    async fn publish(&self, exchange: &str, message: TaskMessage) -> Result<bool, BrokerError>;

    /// Take the channel of messages the broker could not route.
    ///
    /// Returns `None` once taken or when the backend never returns messages.
    fn take_returns(&self) -> Option<mpsc::UnboundedReceiver<TaskMessage>>;

    /// Check the broker is reachable
    async fn ping(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError>;
}

/// Consuming side of the broker
#[async_trait]
pub trait Consumer: Send + Sync + Debug {
    /// Start receiving deliveries from `queue`
    async fn subscribe(&self, queue: &str) -> Result<Subscription, BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

/// Serde helpers for base64 encoding message bodies
mod serde_bytes_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_format() {
        let message = TaskMessage::json(LOCATION_RECORD, &serde_json::json!({"records": []}))
            .unwrap()
            .with_header(DID_HEADER, "did:bryk:1")
            .persistent();

        let value: serde_json::Value = serde_json::from_slice(&message.to_bytes().unwrap()).unwrap();
        assert_eq!(value["type"], LOCATION_RECORD);
        assert_eq!(value["contentType"], "application/json");
        assert_eq!(value["headers"]["did"], "did:bryk:1");
        assert!(value["messageId"].is_string());
        assert!(value["body"].is_string());

        let decoded = TaskMessage::from_slice(&message.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.header(DID_HEADER), Some("did:bryk:1"));
    }

    #[test]
    fn test_message_ids_unique() {
        let a = TaskMessage::new(NEW_DID, vec![]);
        let b = TaskMessage::new(NEW_DID, vec![]);
        assert_ne!(a.message_id, b.message_id);
        assert!(!a.persistent);
    }
}
