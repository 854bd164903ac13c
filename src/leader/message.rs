// Leader messages - Wire format of the election bus
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Kind of election message (kebab-case on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    LeaderRequest,
    LeaderAnnounce,
    Heartbeat,
    SyncStart,
    SyncComplete,
    Ping,
    Pong,
}

/// Random per-instance identifier; the higher id wins a tie-break
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceId(u64);

impl InstanceId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<InstanceId> for String {
    fn from(id: InstanceId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for InstanceId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        u64::from_str_radix(&value, 16)
            .map(InstanceId)
            .map_err(|e| format!("invalid instance id {:?}: {}", value, e))
    }
}

/// One election bus message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub from: InstanceId,
    /// Unix time in milliseconds
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl LeaderMessage {
    pub fn new(kind: MessageKind, from: InstanceId, timestamp: u64) -> Self {
        Self {
            kind,
            from,
            timestamp,
            payload: None,
        }
    }

    /// Attach the sender's sync flag (announce / heartbeat)
    pub fn with_syncing(mut self, syncing: bool) -> Self {
        self.payload = Some(json!({ "syncing": syncing }));
        self
    }

    /// Sender reports a sync in progress
    pub fn syncing(&self) -> bool {
        self.payload
            .as_ref()
            .and_then(|p| p.get("syncing"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let msg = LeaderMessage::new(MessageKind::LeaderAnnounce, InstanceId::new(0xabc), 42)
            .with_syncing(true);
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "leader-announce");
        assert_eq!(value["from"], "0000000000000abc");
        assert_eq!(value["timestamp"], 42);
        assert_eq!(value["payload"]["syncing"], true);

        let back: LeaderMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
        assert!(back.syncing());
    }

    #[test]
    fn test_payload_is_optional() {
        let msg: LeaderMessage =
            serde_json::from_str(r#"{"type":"sync-complete","from":"ff","timestamp":1}"#).unwrap();
        assert_eq!(msg.kind, MessageKind::SyncComplete);
        assert!(msg.payload.is_none());
        assert!(!msg.syncing());

        assert!(serde_json::from_str::<LeaderMessage>(
            r#"{"type":"ping","from":"not-hex","timestamp":1}"#
        )
        .is_err());
    }

    #[test]
    fn test_instance_id_ordering() {
        assert!(InstanceId::new(2) > InstanceId::new(1));
        assert_eq!(InstanceId::new(255).to_string(), "00000000000000ff");
    }
}
