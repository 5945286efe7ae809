//! Process-lifetime node identity.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifier stamped on every outbound sync message so a node can
/// recognise its own writes when the channel echoes them back.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh, globally unique id.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(NodeId::generate(), NodeId::generate());
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = NodeId::new("node-a");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"node-a\"");
    }
}
