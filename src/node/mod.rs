mod lookup;
pub mod node_data;

use std::collections::HashMap;
use std::mem;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::key::Key;
use crate::node::node_data::{ChatMessage, NodeData};
use crate::protocol::{Message, Protocol, Request, RequestPayload, Response, ResponsePayload};
use crate::routing::{RoutingTable, UpdateOutcome};
use crate::storage::Storage;
use crate::{BUCKET_REFRESH_INTERVAL, REPLICATION_PARAM, REQUEST_TIMEOUT};

/// The lifecycle of a node. A node only moves forward: `Starting -> Serving -> Stopped`.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    Starting,
    Serving,
    Stopped,
}

impl NodeState {
    fn from_u8(state: u8) -> Self {
        match state {
            0 => NodeState::Starting,
            1 => NodeState::Serving,
            _ => NodeState::Stopped,
        }
    }
}

/// A node in the Kademlia DHT.
///
/// Cloning a `Node` is cheap and every clone refers to the same node. The routing table, the
/// storage, the pending requests and the inbox each sit behind their own lock.
#[derive(Clone)]
pub struct Node {
    node_data: Arc<NodeData>,
    routing_table: Arc<Mutex<RoutingTable>>,
    storage: Arc<Mutex<Storage>>,
    pending_requests: Arc<Mutex<HashMap<Key, Sender<Response>>>>,
    inbox: Arc<Mutex<Vec<ChatMessage>>>,
    protocol: Arc<Protocol>,
    state: Arc<AtomicU8>,
    refresher_signal: Arc<Mutex<Option<Sender<()>>>>,
}

impl Node {
    /// Constructs a new `Node` bound to `addr` and starts serving requests. The id of the node is
    /// the hash of its bound address, so binding to port `0` picks a free port and the resulting
    /// address is reported by `node_data`.
    pub fn new(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        let addr = socket.local_addr()?.to_string();
        let node_data = Arc::new(NodeData {
            id: Key::hash(&addr),
            addr,
        });
        let routing_table = RoutingTable::new(Arc::clone(&node_data));
        let (message_tx, message_rx) = channel();
        let protocol = Protocol::new(socket, message_tx)?;
        let (refresher_tx, refresher_rx) = channel();

        let node = Node {
            node_data,
            routing_table: Arc::new(Mutex::new(routing_table)),
            storage: Arc::new(Mutex::new(Storage::new())),
            pending_requests: Arc::new(Mutex::new(HashMap::new())),
            inbox: Arc::new(Mutex::new(Vec::new())),
            protocol: Arc::new(protocol),
            state: Arc::new(AtomicU8::new(NodeState::Starting as u8)),
            refresher_signal: Arc::new(Mutex::new(Some(refresher_tx))),
        };

        node.state.store(NodeState::Serving as u8, Ordering::Release);
        node.start_message_handler(message_rx);
        node.start_bucket_refresher(refresher_rx);
        info!("{} - Serving as {:?}", node.node_data.addr, node.node_data.id);
        Ok(node)
    }

    fn routing_table(&self) -> MutexGuard<'_, RoutingTable> {
        self.routing_table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn storage(&self) -> MutexGuard<'_, Storage> {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending_requests(&self) -> MutexGuard<'_, HashMap<Key, Sender<Response>>> {
        self.pending_requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn inbox(&self) -> MutexGuard<'_, Vec<ChatMessage>> {
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_serving(&self) -> bool {
        self.state() == NodeState::Serving
    }

    fn ensure_serving(&self) -> Result<()> {
        if self.is_serving() {
            Ok(())
        } else {
            Err(Error::InvalidState)
        }
    }

    /// Starts a thread that handles incoming requests and responses. Each message is only handled
    /// if the node is still serving when it is dequeued.
    fn start_message_handler(&self, rx: Receiver<Message>) {
        let node = self.clone();
        thread::spawn(move || {
            for message in rx.iter() {
                if !node.is_serving() {
                    break;
                }
                match message {
                    Message::Request(request) => node.handle_request(&request),
                    Message::Response(response) => node.handle_response(response),
                }
            }
            info!("{} - Stopped message handler", node.node_data.addr);
        });
    }

    /// Starts a thread that refreshes stale routing buckets. The thread exits as soon as the
    /// sending half of `rx` is dropped.
    fn start_bucket_refresher(&self, rx: Receiver<()>) {
        let node = self.clone();
        thread::spawn(move || {
            let interval = Duration::from_secs(BUCKET_REFRESH_INTERVAL);
            while let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(interval) {
                let stale_indexes = node.routing_table().get_stale_indexes();
                for index in stale_indexes {
                    if !node.is_serving() {
                        break;
                    }
                    node.refresh_bucket(index);
                }
            }
            info!("{} - Stopped bucket refresher", node.node_data.addr);
        });
    }

    /// Looks up a random key that falls in the bucket at `index`.
    fn refresh_bucket(&self, index: usize) {
        let key = self.node_data.id.xor(&Key::rand_in_range(index));
        debug!("{} - Refreshing bucket {}", self.node_data.addr, index);
        self.lookup_nodes(&key, true);
    }

    /// Upserts the routing table. If the node's bucket is full, the least recently seen node of
    /// that bucket is pinged in the background. It is evicted in favour of `node_data` only if it
    /// does not respond.
    fn update_routing_table(&self, node_data: NodeData) {
        let outcome = self.routing_table().update_node(node_data.clone());
        match outcome {
            UpdateOutcome::Inserted => {
                debug!("{} - Inserted {:?}", self.node_data.addr, node_data);
            },
            UpdateOutcome::BucketFull { stalest } => {
                let node = self.clone();
                thread::spawn(move || node.evict_if_unresponsive(stalest, node_data));
            },
            UpdateOutcome::Touched | UpdateOutcome::Ignored => {},
        }
    }

    fn evict_if_unresponsive(&self, stalest: NodeData, node_data: NodeData) {
        match self.ping(&stalest.addr) {
            Ok(_) => debug!(
                "{} - Kept {:?}, dropped {:?}",
                self.node_data.addr, stalest, node_data,
            ),
            Err(Error::InvalidState) => {},
            Err(_) => {
                let mut routing_table = self.routing_table();
                routing_table.remove_node(&stalest);
                routing_table.update_node(node_data.clone());
                debug!(
                    "{} - Evicted {:?} for {:?}",
                    self.node_data.addr, stalest, node_data,
                );
            },
        }
    }

    /// Handles a request RPC.
    fn handle_request(&self, request: &Request) {
        debug!(
            "{} - Receiving request from {} {:?}",
            self.node_data.addr, request.sender.addr, request.payload,
        );
        self.update_routing_table(request.sender.clone());
        let payload = match request.payload {
            RequestPayload::Ping => ResponsePayload::Pong,
            RequestPayload::Store(key, ref value) => {
                self.storage().insert(key, value.clone());
                ResponsePayload::Pong
            },
            RequestPayload::FindNode(key) => ResponsePayload::Nodes(
                self.routing_table()
                    .get_closest_nodes(&key, REPLICATION_PARAM),
            ),
            RequestPayload::FindValue(key) => {
                let value = self.storage().get(&key).cloned();
                match value {
                    Some(value) => ResponsePayload::Value(value),
                    None => ResponsePayload::Nodes(
                        self.routing_table()
                            .get_closest_nodes(&key, REPLICATION_PARAM),
                    ),
                }
            },
            RequestPayload::Message(ref text) => {
                info!("{} - Message from {}: {}", self.node_data.addr, request.sender.addr, text);
                self.inbox().push(ChatMessage {
                    sender: request.sender.clone(),
                    text: text.clone(),
                });
                ResponsePayload::Pong
            },
        };

        let response = Message::Response(Response {
            request_id: request.id,
            receiver: (*self.node_data).clone(),
            payload,
        });
        if let Err(err) = self.protocol.send_message(&response, &request.sender.addr) {
            warn!(
                "{} - Could not respond to {}: {}",
                self.node_data.addr, request.sender.addr, err,
            );
        }
    }

    /// Handles a response RPC. If the id in the response does not match any outgoing request, then
    /// the response will be ignored.
    fn handle_response(&self, response: Response) {
        self.update_routing_table(response.receiver.clone());
        let request_id = response.request_id;
        let pending_requests = self.pending_requests();
        if let Some(sender) = pending_requests.get(&request_id) {
            debug!(
                "{} - Receiving response from {} {:?}",
                self.node_data.addr, response.receiver.addr, response.payload,
            );
            if sender.send(response).is_err() {
                warn!("{} - Requester stopped waiting for {:?}", self.node_data.addr, request_id);
            }
        } else {
            warn!(
                "{} - Original request not found; irrelevant response or expired request.",
                self.node_data.addr
            );
        }
    }

    /// Sends a request RPC to `addr` and waits at most `REQUEST_TIMEOUT` milliseconds for the
    /// response.
    fn send_request(&self, addr: &str, payload: RequestPayload) -> Result<Response> {
        self.ensure_serving()?;
        debug!("{} - Sending request to {} {:?}", self.node_data.addr, addr, payload);
        let (response_tx, response_rx) = channel();
        let mut pending_requests = self.pending_requests();
        let mut token = Key::rand();

        while pending_requests.contains_key(&token) {
            token = Key::rand();
        }
        pending_requests.insert(token, response_tx);
        drop(pending_requests);

        let message = Message::Request(Request {
            id: token,
            sender: (*self.node_data).clone(),
            payload,
        });
        if let Err(err) = self.protocol.send_message(&message, addr) {
            self.pending_requests().remove(&token);
            warn!("{} - Could not send request to {}: {}", self.node_data.addr, addr, err);
            return Err(match err {
                Error::Io(_) => Error::UnreachablePeer(addr.to_string()),
                err => err,
            });
        }

        let response = response_rx.recv_timeout(Duration::from_millis(REQUEST_TIMEOUT));
        self.pending_requests().remove(&token);
        match response {
            Ok(response) => Ok(response),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "{} - Request to {} timed out after waiting for {} milliseconds",
                    self.node_data.addr, addr, REQUEST_TIMEOUT
                );
                Err(Error::UnreachablePeer(addr.to_string()))
            },
            Err(RecvTimeoutError::Disconnected) => Err(Error::InvalidState),
        }
    }

    /// Sends a `PING` RPC to `addr` and returns the contact information of the responder.
    pub fn ping(&self, addr: &str) -> Result<NodeData> {
        Ok(self.send_request(addr, RequestPayload::Ping)?.receiver)
    }

    /// Joins the network that `bootstrap` belongs to. The node first pings the bootstrap node to
    /// learn its id, then looks up its own id to find its neighbours. Finally, it refreshes every
    /// bucket farther away than its closest neighbour. An empty `bootstrap` starts a new network.
    pub fn join(&self, bootstrap: &str) -> Result<()> {
        self.ensure_serving()?;
        if bootstrap.is_empty() || bootstrap == self.node_data.addr {
            return Ok(());
        }

        let bootstrap_data = self.ping(bootstrap)?;
        info!("{} - Joining via {:?}", self.node_data.addr, bootstrap_data);
        self.update_routing_table(bootstrap_data);

        let target_key = self.node_data.id;
        self.lookup_nodes(&target_key, true);

        let closest_index = self
            .routing_table()
            .get_closest_nodes(&target_key, 1)
            .first()
            .map_or(0, |node_data| target_key.prefix_len(&node_data.id));
        for index in 0..closest_index {
            self.refresh_bucket(index);
        }
        Ok(())
    }

    /// Returns the `REPLICATION_PARAM` closest nodes to `key` that responded during a `FIND_NODE`
    /// lookup.
    pub fn find_closest(&self, key: &Key) -> Result<Vec<NodeData>> {
        self.ensure_serving()?;
        match self.lookup_nodes(key, true) {
            ResponsePayload::Nodes(nodes) => Ok(nodes),
            _ => Ok(Vec::new()),
        }
    }

    /// Announces a key-value pair: stores it on the `REPLICATION_PARAM` closest nodes to `key`,
    /// including this node if it is one of them. Delivery is best-effort.
    pub fn insert(&self, key: Key, value: &str) -> Result<()> {
        let mut targets = self.find_closest(&key)?;
        targets.push((*self.node_data).clone());
        targets.sort_by_key(|node_data| (node_data.id.xor(&key), node_data.id));
        targets.truncate(REPLICATION_PARAM);

        let (tx, rx) = channel();
        for dest in targets {
            if dest.id == self.node_data.id {
                self.storage().insert(key, value.to_string());
                continue;
            }
            let node = self.clone();
            let tx = tx.clone();
            let value = value.to_string();
            thread::spawn(move || {
                let stored = node.send_request(&dest.addr, RequestPayload::Store(key, value));
                if tx.send(stored.is_ok()).is_err() {
                    warn!("Receiver closed channel before rpc returned.");
                }
            });
        }
        drop(tx);

        let stored = rx.iter().filter(|stored| *stored).count();
        info!("{} - Stored {:?} on {} peers", self.node_data.addr, key, stored);
        Ok(())
    }

    /// Gets the value associated with `key`, checking local storage before searching the network.
    pub fn get(&self, key: &Key) -> Result<String> {
        self.ensure_serving()?;
        let local_value = self.storage().get(key).cloned();
        if let Some(value) = local_value {
            return Ok(value);
        }

        match self.lookup_nodes(key, false) {
            ResponsePayload::Value(value) => Ok(value),
            _ => Err(Error::NotFound(*key)),
        }
    }

    /// Sends `text` to the node at `addr` with a `MESSAGE` RPC. Succeeds once the receiver has
    /// acknowledged the message.
    pub fn send_message(&self, addr: &str, text: &str) -> Result<()> {
        match self.send_request(addr, RequestPayload::Message(text.to_string())) {
            Ok(_) => Ok(()),
            Err(Error::InvalidState) => Err(Error::InvalidState),
            Err(err) => {
                warn!("{} - Could not deliver message to {}: {}", self.node_data.addr, addr, err);
                Err(Error::DeliveryFailed(addr.to_string()))
            },
        }
    }

    /// Returns every message received so far.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inbox().clone()
    }

    /// Removes and returns every message received so far.
    pub fn take_messages(&self) -> Vec<ChatMessage> {
        mem::take(&mut *self.inbox())
    }

    /// Returns the number of nodes in the routing table.
    pub fn known_nodes(&self) -> usize {
        self.routing_table().size()
    }

    /// Returns the number of key-value pairs this node holds.
    pub fn stored_values(&self) -> usize {
        self.storage().len()
    }

    /// Returns the `NodeData` associated with the node.
    pub fn node_data(&self) -> NodeData {
        (*self.node_data).clone()
    }

    /// Shuts the node down: stops the background threads and releases the bound address. Requests
    /// still waiting for a response fail with `Error::InvalidState`, as does every later call,
    /// including a second `shutdown`.
    pub fn shutdown(&self) -> Result<()> {
        let transition = self.state.compare_exchange(
            NodeState::Serving as u8,
            NodeState::Stopped as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if transition.is_err() {
            return Err(Error::InvalidState);
        }

        self.refresher_signal.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.protocol.close();
        self.pending_requests().clear();
        info!("{} - Shut down", self.node_data.addr);
        Ok(())
    }
}
