use bincode::Options;
use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::key::Key;
use crate::node::node_data::NodeData;
use crate::{MESSAGE_LENGTH, SOCKET_POLL_INTERVAL};

/// A request RPC. `id` is a random token echoed by the response.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Request {
    pub id: Key,
    pub sender: NodeData,
    pub payload: RequestPayload,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum RequestPayload {
    Ping,
    Store(Key, String),
    FindNode(Key),
    FindValue(Key),
    Message(String),
}

/// A response to the request with id `request_id`. `receiver` is the responding node.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Response {
    pub request_id: Key,
    pub receiver: NodeData,
    pub payload: ResponsePayload,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum ResponsePayload {
    Nodes(Vec<NodeData>),
    Value(String),
    Pong,
}

#[derive(Serialize, Deserialize, Debug)]
pub enum Message {
    Request(Request),
    Response(Response),
}

fn encoding() -> impl Options {
    bincode::options().with_limit(MESSAGE_LENGTH as u64)
}

/// The datagram transport of a node.
///
/// A receiving thread decodes every datagram and forwards it on the channel given to
/// `Protocol::new`. `close` stops that thread and releases the socket.
pub struct Protocol {
    socket: RwLock<Option<Arc<UdpSocket>>>,
    is_open: Arc<AtomicBool>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl Protocol {
    pub fn new(socket: UdpSocket, tx: Sender<Message>) -> Result<Protocol> {
        socket.set_read_timeout(Some(Duration::from_millis(SOCKET_POLL_INTERVAL)))?;
        let socket = Arc::new(socket);
        let is_open = Arc::new(AtomicBool::new(true));

        let receiver = {
            let socket = Arc::clone(&socket);
            let is_open = Arc::clone(&is_open);
            thread::spawn(move || {
                let mut buffer = [0u8; MESSAGE_LENGTH];
                while is_open.load(Ordering::Acquire) {
                    let len = match socket.recv_from(&mut buffer) {
                        Ok((len, _src_addr)) => len,
                        Err(ref err)
                            if err.kind() == ErrorKind::WouldBlock
                                || err.kind() == ErrorKind::TimedOut =>
                        {
                            continue
                        },
                        Err(err) => {
                            warn!("Protocol: Could not receive data: {}", err);
                            continue;
                        },
                    };

                    let message = match encoding().deserialize(&buffer[..len]) {
                        Ok(message) => message,
                        Err(err) => {
                            warn!("Protocol: Dropped malformed datagram: {}", err);
                            continue;
                        },
                    };

                    if tx.send(message).is_err() {
                        warn!("Protocol: Connection closed.");
                        break;
                    }
                }
            })
        };

        Ok(Protocol {
            socket: RwLock::new(Some(socket)),
            is_open,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    pub fn send_message(&self, message: &Message, addr: &str) -> Result<()> {
        let socket = match *self.socket.read().unwrap_or_else(PoisonError::into_inner) {
            Some(ref socket) => Arc::clone(socket),
            None => return Err(Error::InvalidState),
        };
        let buffer = encoding().serialize(message)?;
        socket.send_to(&buffer, addr)?;
        Ok(())
    }

    /// Stops the receiving thread and releases the socket. The socket is unbound once this
    /// returns, apart from sends that were already in progress.
    pub fn close(&self) {
        self.is_open.store(false, Ordering::Release);
        self.socket.write().unwrap_or_else(PoisonError::into_inner).take();

        let receiver = self.receiver.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(receiver) = receiver {
            if receiver.join().is_err() {
                warn!("Protocol: Receiving thread panicked.");
            }
        }
    }
}

impl Drop for Protocol {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::{Message, Protocol, Request, RequestPayload};
    use crate::error::Error;
    use crate::key::Key;
    use crate::node::node_data::NodeData;
    use crate::MESSAGE_LENGTH;
    use std::net::UdpSocket;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    fn bind() -> (Protocol, std::sync::mpsc::Receiver<Message>, String) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        let (tx, rx) = channel();
        (Protocol::new(socket, tx).unwrap(), rx, addr)
    }

    fn request(payload: RequestPayload) -> Message {
        Message::Request(Request {
            id: Key::rand(),
            sender: NodeData {
                addr: "127.0.0.1:1".to_string(),
                id: Key(1),
            },
            payload,
        })
    }

    #[test]
    fn test_send_and_receive() {
        let (sender, _, _) = bind();
        let (_receiver, rx, addr) = bind();

        let text = "Hi Frans! Wanna play squash? ✓".to_string();
        sender.send_message(&request(RequestPayload::Message(text.clone())), &addr).unwrap();

        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            Message::Request(Request {
                payload: RequestPayload::Message(received),
                ..
            }) => assert_eq!(received, text),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_oversized_message_is_rejected() {
        let (sender, _, addr) = bind();
        let text = "x".repeat(MESSAGE_LENGTH);
        match sender.send_message(&request(RequestPayload::Message(text)), &addr) {
            Err(Error::Encoding(_)) => {},
            other => panic!("expected encoding error, got {:?}", other),
        }
    }

    #[test]
    fn test_close_releases_socket() {
        let (protocol, _, addr) = bind();
        protocol.close();

        match protocol.send_message(&request(RequestPayload::Ping), &addr) {
            Err(Error::InvalidState) => {},
            other => panic!("expected invalid state, got {:?}", other),
        }
        assert!(UdpSocket::bind(&addr).is_ok());
    }
}
