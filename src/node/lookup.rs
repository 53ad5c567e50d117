use std::collections::HashSet;
use std::sync::mpsc::{channel, Sender};
use std::thread;

use crate::error::Result;
use crate::key::Key;
use crate::node::node_data::NodeData;
use crate::node::Node;
use crate::protocol::{RequestPayload, Response, ResponsePayload};
use crate::{CONCURRENCY_PARAM, REPLICATION_PARAM};

fn sort_by_distance(nodes: &mut [NodeData], key: &Key) {
    nodes.sort_by_key(|node_data| (node_data.id.xor(key), node_data.id));
}

/// The state of one iterative lookup. Nodes are identified by address.
struct Shortlist {
    key: Key,
    owner: Key,
    nodes: Vec<NodeData>,
    queried: HashSet<String>,
    failed: HashSet<String>,
    responded: Vec<NodeData>,
}

impl Shortlist {
    fn new(key: Key, owner: Key, mut nodes: Vec<NodeData>) -> Self {
        sort_by_distance(&mut nodes, &key);
        nodes.truncate(REPLICATION_PARAM);
        Shortlist {
            key,
            owner,
            nodes,
            queried: HashSet::new(),
            failed: HashSet::new(),
            responded: Vec::new(),
        }
    }

    /// Returns the distance of the closest node in the shortlist.
    fn closest_distance(&self) -> Key {
        self.nodes
            .first()
            .map_or(Key::MAX, |node_data| node_data.id.xor(&self.key))
    }

    /// Returns the nodes in the shortlist not yet queried, closest first.
    fn unqueried(&self) -> Vec<NodeData> {
        self.nodes
            .iter()
            .filter(|node_data| !self.queried.contains(&node_data.addr))
            .cloned()
            .collect()
    }

    /// Merges newly learned nodes into the shortlist, keeping only the `REPLICATION_PARAM`
    /// closest. The owner of the lookup and nodes that failed to respond are skipped.
    fn merge(&mut self, nodes: Vec<NodeData>) {
        for node_data in nodes {
            let is_known = node_data.id == self.owner
                || self.failed.contains(&node_data.addr)
                || self.nodes.iter().any(|known| known.addr == node_data.addr);
            if !is_known {
                self.nodes.push(node_data);
            }
        }
        sort_by_distance(&mut self.nodes, &self.key);
        self.nodes.truncate(REPLICATION_PARAM);
    }

    /// Excludes `node_data` from the rest of the lookup.
    fn fail(&mut self, node_data: &NodeData) {
        self.failed.insert(node_data.addr.clone());
        self.nodes.retain(|known| known.addr != node_data.addr);
    }
}

impl Node {
    /// Spawns a thread that sends either a `FIND_NODE` or a `FIND_VALUE` RPC.
    fn spawn_find_rpc(
        &self,
        dest: NodeData,
        key: Key,
        sender: Sender<(NodeData, Result<Response>)>,
        find_node: bool,
    ) {
        let node = self.clone();
        thread::spawn(move || {
            let payload = if find_node {
                RequestPayload::FindNode(key)
            } else {
                RequestPayload::FindValue(key)
            };
            let response = node.send_request(&dest.addr, payload);
            if sender.send((dest, response)).is_err() {
                debug!("Receiver closed channel before rpc returned.");
            }
        });
    }

    /// Queries every node of `round` concurrently and waits until each one responded or timed
    /// out. Returns the value if one of them holds it.
    fn query_round(
        &self,
        shortlist: &mut Shortlist,
        round: Vec<NodeData>,
        find_node: bool,
    ) -> Option<String> {
        let (tx, rx) = channel();
        for dest in round {
            shortlist.queried.insert(dest.addr.clone());
            self.spawn_find_rpc(dest, shortlist.key, tx.clone(), find_node);
        }
        drop(tx);

        for (dest, response) in rx.iter() {
            match response {
                Ok(Response {
                    payload: ResponsePayload::Value(value),
                    receiver,
                    ..
                }) => {
                    debug!(
                        "{} - Found {:?} at {:?}",
                        self.node_data.addr, shortlist.key, receiver,
                    );
                    return Some(value);
                },
                Ok(Response {
                    payload: ResponsePayload::Nodes(nodes),
                    receiver,
                    ..
                }) => {
                    shortlist.responded.push(receiver);
                    shortlist.merge(nodes);
                },
                Ok(Response { receiver, .. }) => {
                    warn!(
                        "{} - Unexpected response to a lookup from {:?}",
                        self.node_data.addr, receiver,
                    );
                },
                Err(err) => {
                    debug!(
                        "{} - Dropping {:?} from lookup: {}",
                        self.node_data.addr, dest, err,
                    );
                    shortlist.fail(&dest);
                },
            }
        }
        None
    }

    /// Iteratively looks up the closest nodes to `key`. The shortlist starts as the
    /// `REPLICATION_PARAM` closest nodes of the routing table. Each round sends either `FIND_NODE`
    /// or `FIND_VALUE` RPCs to the `CONCURRENCY_PARAM` closest nodes not yet queried and merges
    /// the returned nodes into the shortlist. Once a round fails to find a node closer than the
    /// closest so far, the remaining unqueried nodes of the shortlist are queried and the lookup
    /// ends. It also ends early if a node returns the value or if no unqueried nodes are left.
    ///
    /// Every node that responds is upserted into the routing table by `handle_response`. A node
    /// that times out is only excluded from this lookup.
    pub(super) fn lookup_nodes(&self, key: &Key, find_node: bool) -> ResponsePayload {
        let closest_nodes = self
            .routing_table()
            .get_closest_nodes(key, REPLICATION_PARAM);
        let mut shortlist = Shortlist::new(*key, self.node_data.id, closest_nodes);
        let mut closest_distance = shortlist.closest_distance();

        loop {
            let round: Vec<NodeData> = shortlist
                .unqueried()
                .into_iter()
                .take(CONCURRENCY_PARAM)
                .collect();
            if round.is_empty() {
                break;
            }
            if let Some(value) = self.query_round(&mut shortlist, round, find_node) {
                return ResponsePayload::Value(value);
            }

            let distance = shortlist.closest_distance();
            if distance >= closest_distance {
                debug!(
                    "{} - Lookup of {:?} converged at distance {:?}",
                    self.node_data.addr, key, closest_distance,
                );
                for round in shortlist.unqueried().chunks(CONCURRENCY_PARAM) {
                    if let Some(value) = self.query_round(&mut shortlist, round.to_vec(), find_node) {
                        return ResponsePayload::Value(value);
                    }
                }
                break;
            }
            closest_distance = distance;
        }

        let mut ret = shortlist.responded;
        sort_by_distance(&mut ret, key);
        ret.truncate(REPLICATION_PARAM);
        debug!("{} - Closest nodes to {:?} are {:?}", self.node_data.addr, key, ret);
        ResponsePayload::Nodes(ret)
    }
}

#[cfg(test)]
mod tests {
    use super::Shortlist;
    use crate::key::Key;
    use crate::node::node_data::NodeData;
    use crate::REPLICATION_PARAM;

    fn node(id: u64) -> NodeData {
        NodeData {
            addr: format!("127.0.0.1:{}", id),
            id: Key(id),
        }
    }

    #[test]
    fn test_merge_keeps_closest() {
        let mut shortlist = Shortlist::new(Key(0), Key(u64::MAX), vec![node(1000), node(3)]);
        assert_eq!(shortlist.closest_distance(), Key(3));

        shortlist.merge((1..=REPLICATION_PARAM as u64 + 5).map(node).collect());
        assert_eq!(shortlist.nodes.len(), REPLICATION_PARAM);
        assert_eq!(shortlist.closest_distance(), Key(1));
        assert!(shortlist.nodes.iter().all(|node_data| node_data.id != Key(1000)));

        let addrs: Vec<&String> = shortlist.nodes.iter().map(|node_data| &node_data.addr).collect();
        let mut unique = addrs.clone();
        unique.dedup();
        assert_eq!(addrs, unique);
    }

    #[test]
    fn test_merge_skips_owner_and_failed() {
        let mut shortlist = Shortlist::new(Key(0), Key(7), vec![node(4)]);
        shortlist.fail(&node(4));
        shortlist.merge(vec![node(4), node(7), node(9)]);

        let ids: Vec<Key> = shortlist.nodes.iter().map(|node_data| node_data.id).collect();
        assert_eq!(ids, vec![Key(9)]);
    }

    #[test]
    fn test_unqueried() {
        let mut shortlist = Shortlist::new(Key(0), Key(u64::MAX), vec![node(2), node(1), node(3)]);
        shortlist.queried.insert(node(1).addr);

        let ids: Vec<Key> = shortlist.unqueried().iter().map(|node_data| node_data.id).collect();
        assert_eq!(ids, vec![Key(2), Key(3)]);
    }
}
