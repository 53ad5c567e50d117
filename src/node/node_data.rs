use crate::key::Key;
use std::fmt::{Debug, Formatter, Result};

/// The contact information of a node: its address and its id.
#[derive(PartialEq, Eq, Hash, Clone, Serialize, Deserialize)]
pub struct NodeData {
    pub addr: String,
    pub id: Key,
}

impl Debug for NodeData {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{} - {:?}", self.addr, self.id)
    }
}

/// A chat message delivered to a node by a `MESSAGE` RPC.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct ChatMessage {
    pub sender: NodeData,
    pub text: String,
}
