extern crate bincode;
#[macro_use]
extern crate log;
extern crate rand;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate sha1;
extern crate thiserror;
extern crate time;

mod error;
mod key;
mod node;
mod protocol;
mod routing;
mod storage;
mod user;

pub use self::error::{Error, Result};
pub use self::key::Key;
pub use self::node::node_data::{ChatMessage, NodeData};
pub use self::node::{Node, NodeState};
pub use self::routing::{move_to_end, RoutingTable, UpdateOutcome};
pub use self::user::User;

/// The number of bytes in a key.
const KEY_LENGTH: usize = 8;

/// The maximum length of the message in bytes.
const MESSAGE_LENGTH: usize = 8196;

/// The number of k-buckets in the routing table.
const ROUTING_TABLE_SIZE: usize = KEY_LENGTH * 8;

/// The maximum number of entries in a k-bucket.
pub const REPLICATION_PARAM: usize = 20;

/// The maximum number of active RPCs during a round of `lookup_nodes`.
pub const CONCURRENCY_PARAM: usize = 3;

/// Request timeout time in milliseconds
const REQUEST_TIMEOUT: u64 = 1000;

/// Read timeout of the receiving socket in milliseconds. Bounds how long the serving loop takes to
/// notice a shutdown.
const SOCKET_POLL_INTERVAL: u64 = 100;

/// Bucket refresh interval in seconds
const BUCKET_REFRESH_INTERVAL: u64 = 3600;
