use crate::key::Key;
use crate::node::node_data::NodeData;
use crate::{BUCKET_REFRESH_INTERVAL, REPLICATION_PARAM, ROUTING_TABLE_SIZE};
use std::cmp;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

/// Removes the element at `index` and appends it to the end of `entries`, preserving the relative
/// order of every other element. Moving the last element is a no-op.
pub fn move_to_end<T>(entries: &mut [T], index: usize) {
    entries[index..].rotate_left(1);
}

/// The result of upserting a node into the routing table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The node was already known and is now the most recently seen node of its bucket.
    Touched,
    /// The node was appended to a bucket with free capacity.
    Inserted,
    /// The node is the owner of the routing table and was not inserted.
    Ignored,
    /// The bucket is full. The node was not inserted and `stalest` is the eviction candidate.
    BucketFull { stalest: NodeData },
}

/// A k-bucket in a node's routing table that has a maximum capacity of `REPLICATION_PARAM`.
///
/// The nodes in the k-bucket are sorted by the time of the most recent communication with those
/// which have been most recently communicated at the end of the list. Nodes are unique by address.
#[derive(Clone, Debug)]
struct RoutingBucket {
    nodes: Vec<NodeData>,
    last_update_time: OffsetDateTime,
}

impl RoutingBucket {
    /// Constructs a new, empty `RoutingBucket`.
    fn new() -> Self {
        RoutingBucket {
            nodes: Vec::with_capacity(REPLICATION_PARAM),
            last_update_time: OffsetDateTime::now_utc(),
        }
    }

    /// Upserts a node in the routing bucket. If a node with the same address already exists, it is
    /// replaced and moved to the end of the list. If the routing bucket is at capacity, the least
    /// recently seen node is returned as the eviction candidate and nothing changes.
    fn update_node(&mut self, node_data: NodeData) -> UpdateOutcome {
        if let Some(index) = self.nodes.iter().position(|data| data.addr == node_data.addr) {
            self.last_update_time = OffsetDateTime::now_utc();
            self.nodes[index] = node_data;
            move_to_end(&mut self.nodes, index);
            return UpdateOutcome::Touched;
        }

        if self.nodes.len() < REPLICATION_PARAM {
            self.last_update_time = OffsetDateTime::now_utc();
            self.nodes.push(node_data);
            UpdateOutcome::Inserted
        } else {
            UpdateOutcome::BucketFull {
                stalest: self.nodes[0].clone(),
            }
        }
    }

    /// Returns a slice of the nodes contained by the routing bucket.
    fn get_nodes(&self) -> &[NodeData] {
        self.nodes.as_slice()
    }

    /// Removes `node_data` from the routing bucket.
    fn remove_node(&mut self, node_data: &NodeData) -> Option<NodeData> {
        if let Some(index) = self.nodes.iter().position(|data| data.addr == node_data.addr) {
            Some(self.nodes.remove(index))
        } else {
            None
        }
    }

    /// Returns `true` if the routing bucket has not been recently updated.
    ///
    /// A bucket is stale if it has not been updated in `BUCKET_REFRESH_INTERVAL` seconds.
    fn is_stale(&self) -> bool {
        let time_diff = OffsetDateTime::now_utc() - self.last_update_time;
        time_diff > Duration::seconds(BUCKET_REFRESH_INTERVAL as i64)
    }

    /// Returns the number of nodes in the routing bucket.
    fn size(&self) -> usize {
        self.nodes.len()
    }
}

/// A node's routing table.
///
/// `RoutingTable` is a fixed array of `ROUTING_TABLE_SIZE` buckets. The bucket of a node is the
/// length of the common prefix of its id and the owner's id.
#[derive(Clone, Debug)]
pub struct RoutingTable {
    buckets: Vec<RoutingBucket>,
    node_data: Arc<NodeData>,
}

impl RoutingTable {
    /// Constructs a new, empty `RoutingTable` owned by `node_data`.
    pub fn new(node_data: Arc<NodeData>) -> Self {
        let buckets = (0..ROUTING_TABLE_SIZE).map(|_| RoutingBucket::new()).collect();
        RoutingTable { buckets, node_data }
    }

    /// Returns the index of the bucket that `key` belongs in. Equals `ROUTING_TABLE_SIZE` only for
    /// the owner's own id.
    pub fn bucket_for(&self, key: &Key) -> usize {
        self.node_data.id.prefix_len(key)
    }

    /// Same as `bucket_for`, but clamped to a valid bucket index.
    fn bucket_index(&self, key: &Key) -> usize {
        cmp::min(self.bucket_for(key), ROUTING_TABLE_SIZE - 1)
    }

    /// Upserts a node into the routing table.
    pub fn update_node(&mut self, node_data: NodeData) -> UpdateOutcome {
        if node_data.id == self.node_data.id {
            return UpdateOutcome::Ignored;
        }
        let index = self.bucket_index(&node_data.id);
        self.buckets[index].update_node(node_data)
    }

    /// Returns the closest `count` nodes to `key`, ordered by ascending distance with ties broken
    /// by the lower id.
    pub fn get_closest_nodes(&self, key: &Key, count: usize) -> Vec<NodeData> {
        let index = self.bucket_index(key);
        let mut ret = Vec::new();

        // the closest keys are guaranteed to be in bucket which the key would reside
        ret.extend_from_slice(self.buckets[index].get_nodes());

        if ret.len() < count {
            // every key in (index, ROUTING_TABLE_SIZE) shares exactly `index` bits with the target
            for bucket in &self.buckets[index + 1..] {
                ret.extend_from_slice(bucket.get_nodes());
            }
        }

        if ret.len() < count {
            // the distance between target key and keys in [0, index) is monotonicly decreasing
            for bucket in self.buckets[..index].iter().rev() {
                ret.extend_from_slice(bucket.get_nodes());
                if ret.len() >= count {
                    break;
                }
            }
        }

        ret.sort_by_key(|node| (node.id.xor(key), node.id));
        ret.truncate(count);
        ret
    }

    /// Removes `node_data` from the routing table.
    pub fn remove_node(&mut self, node_data: &NodeData) -> Option<NodeData> {
        let index = self.bucket_index(&node_data.id);
        self.buckets[index].remove_node(node_data)
    }

    /// Returns a list of all the stale routing buckets in the routing table.
    pub fn get_stale_indexes(&self) -> Vec<usize> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, bucket)| bucket.is_stale())
            .map(|(i, _)| i)
            .collect()
    }

    /// Returns the nodes in the bucket at `index`, least recently seen first.
    pub fn bucket(&self, index: usize) -> &[NodeData] {
        self.buckets[index].get_nodes()
    }

    /// Returns the number of nodes in the routing table.
    pub fn size(&self) -> usize {
        self.buckets.iter().map(RoutingBucket::size).sum()
    }
}
