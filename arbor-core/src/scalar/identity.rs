//! Principal Cells
//!
//! A principal is the identity a mutation or read is attributed to: an
//! agent (who) under an authority (which identity provider vouches for
//! them). The wire shape is `{"agent":…,"authority":…}`.

use serde::{Deserialize, Serialize};

use crate::json::{JsonNode, JsonWriter};
use crate::scalar::text::stable_hash32;
use crate::scalar::value::ScalarValue;

/// An authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub agent: String,
    pub authority: String,
}

impl Principal {
    pub fn new(agent: impl Into<String>, authority: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            authority: authority.into(),
        }
    }

    /// The anonymous principal used as a seed before anyone is attached.
    pub fn nobody() -> Self {
        Self::new("?", "?")
    }
}

impl ScalarValue for Principal {
    fn write(&self, w: &mut JsonWriter) {
        w.begin_object();
        w.key("agent");
        w.write_str(&self.agent);
        w.key("authority");
        w.write_str(&self.authority);
        w.end_object();
    }

    fn read(node: &JsonNode<'_>) -> Option<Self> {
        let agent = node.get("agent")?.as_str()?;
        let authority = node.get("authority")?.as_str()?;
        Some(Self::new(agent, authority))
    }

    fn index_value(&self) -> Option<i32> {
        let mut joined = String::with_capacity(self.agent.len() + self.authority.len() + 1);
        joined.push_str(&self.agent);
        joined.push('@');
        joined.push_str(&self.authority);
        Some(stable_hash32(&joined))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn wire_shape_is_agent_authority_object() {
        let p = Principal::new("alice", "corp");
        let mut w = JsonWriter::new();
        p.write(&mut w);
        assert_eq!(w.as_str(), "{\"agent\":\"alice\",\"authority\":\"corp\"}");
    }

    #[test]
    fn reads_back_from_object() {
        let raw: Value = serde_json::from_str("{\"agent\":\"alice\",\"authority\":\"corp\"}").unwrap();
        assert_eq!(
            Principal::read(&JsonNode::new(&raw)),
            Some(Principal::new("alice", "corp"))
        );
    }

    #[test]
    fn partial_object_reads_as_none() {
        let raw: Value = serde_json::from_str("{\"agent\":\"alice\"}").unwrap();
        assert_eq!(Principal::read(&JsonNode::new(&raw)), None);
    }

    #[test]
    fn bucket_distinguishes_authorities() {
        let a = Principal::new("alice", "corp").index_value();
        let b = Principal::new("alice", "other").index_value();
        assert_ne!(a, b);
    }
}
