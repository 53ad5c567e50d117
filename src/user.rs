use crate::error::{Error, Result};
use crate::key::Key;
use crate::node::node_data::ChatMessage;
use crate::node::Node;

/// A username bound to the node it registered with.
///
/// Dropping a `User` shuts its node down, so a user can never outlive its node.
pub struct User {
    name: String,
    node: Node,
}

impl User {
    /// Registers `name` on a new node bound to `addr`. The node joins the network through
    /// `bootstrap`, or starts a new network if `bootstrap` is empty, and then announces that
    /// `name` is reachable at its bound address.
    pub fn register(name: &str, addr: &str, bootstrap: &str) -> Result<Self> {
        let node = Node::new(addr)?;
        let user = User {
            name: name.to_string(),
            node,
        };
        user.node.join(bootstrap)?;
        user.announce_user(name, &user.address())?;
        info!("{} - Registered as {}", user.address(), name);
        Ok(user)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the address the user's node is bound to.
    pub fn address(&self) -> String {
        self.node.node_data().addr
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Announces that `name` is reachable at `addr`. A later announce of the same name replaces
    /// earlier ones.
    pub fn announce_user(&self, name: &str, addr: &str) -> Result<()> {
        self.node.insert(Key::hash(name), addr)
    }

    /// Resolves the address of `name`. Fails with `Error::NotFound` if no reachable node holds it.
    pub fn find_user(&self, name: &str) -> Result<String> {
        self.node.get(&Key::hash(name))
    }

    /// Resolves `name` and sends it `text`.
    pub fn send_message(&self, name: &str, text: &str) -> Result<()> {
        let addr = match self.find_user(name) {
            Ok(addr) => addr,
            Err(Error::NotFound(_)) => return Err(Error::UserNotFound(name.to_string())),
            Err(err) => return Err(err),
        };
        self.node.send_message(&addr, text)
    }

    /// Returns every message this user received so far.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.node.messages()
    }

    /// Removes and returns every message this user received so far.
    pub fn take_messages(&self) -> Vec<ChatMessage> {
        self.node.take_messages()
    }

    /// Shuts the user's node down.
    pub fn shutdown(self) -> Result<()> {
        self.node.shutdown()
    }
}

impl Drop for User {
    fn drop(&mut self) {
        if self.node.is_serving() && self.node.shutdown().is_err() {
            warn!("{} - Node of {} was already shut down", self.address(), self.name);
        }
    }
}
