//! The sync payload exchanged between peers.

use crate::error::Result;
use crate::merge::{Nuance, SerializedMerge};
use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One write to one table, as uploaded by its author.
///
/// On the wire this is the `data` of a `stateUpload` event and the whole
/// payload of a `stateDownload` event:
///
/// ```json
/// { "senderId": "01J…", "table": "counter", "knowledge": {"n": 1}, "serializedMerge": "overlay" }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMessage {
    pub sender_id: NodeId,
    pub table: String,
    #[serde(default)]
    pub knowledge: Value,
    pub serialized_merge: SerializedMerge,
}

impl StateMessage {
    pub fn new(
        sender_id: NodeId,
        table: impl Into<String>,
        knowledge: Value,
        serialized_merge: SerializedMerge,
    ) -> Self {
        Self {
            sender_id,
            table: table.into(),
            knowledge,
            serialized_merge,
        }
    }

    /// Decode a raw payload.
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Whether this message was written by `node`.
    pub fn is_from(&self, node: &NodeId) -> bool {
        &self.sender_id == node
    }

    /// The merge to apply on receipt.
    pub fn nuance(&self) -> Nuance {
        Nuance::from(self.serialized_merge.clone())
    }
}

/// Whether a raw payload names a table at all. Payloads without one, or
/// with an empty, null, `false` or zero table, are dropped before decoding.
pub fn has_table(payload: &Value) -> bool {
    match payload.get("table") {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(name)) => !name.is_empty(),
        Some(Value::Number(n)) => n.as_f64() != Some(0.0),
        Some(_) => true,
    }
}
