use std::collections::HashMap;
use std::io;
use std::net::UdpSocket;
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::node::Node;
use crate::protocol::{Message, Protocol, Request, RequestPayload, Response, ResponsePayload};
use crate::router::Router;
use crate::storage::{Error, NodeClient, RecordId, RouterClient, ServiceAddr};
use crate::REQUEST_TIMEOUT;

/// A UDP client for node and router services.
///
/// One socket serves all destinations. Responses are routed back to the
/// issuing call through a map of pending request tokens, so a single client
/// supports concurrent requests from many threads.
#[derive(Clone)]
pub struct RpcClient {
    addr: ServiceAddr,
    protocol: Protocol,
    pending: Arc<Mutex<HashMap<u64, Sender<Response>>>>,
}

impl RpcClient {
    /// Binds a client socket on `bind_addr` (port 0 for an ephemeral port)
    /// and spawns its response dispatcher.
    pub fn new(bind_addr: &str) -> io::Result<RpcClient> {
        let socket = UdpSocket::bind(bind_addr)?;
        let addr = ServiceAddr::new(socket.local_addr()?.to_string());
        let (tx, rx) = channel();
        let protocol = Protocol::new(socket, tx);
        let pending: Arc<Mutex<HashMap<u64, Sender<Response>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let dispatcher_addr = addr.clone();
        let dispatcher_pending = Arc::clone(&pending);
        thread::spawn(move || {
            for message in rx.iter() {
                match message {
                    Message::Response(response) => {
                        let pending = dispatcher_pending.lock().unwrap();
                        if let Some(sender) = pending.get(&response.id) {
                            if sender.send(response).is_err() {
                                warn!("{:?} - Caller gone before response arrived.", dispatcher_addr);
                            }
                        } else {
                            warn!(
                                "{:?} - Irrelevant response or expired request.",
                                dispatcher_addr
                            );
                        }
                    },
                    Message::Request(_) => {
                        warn!("{:?} - Client received a request; ignoring.", dispatcher_addr)
                    },
                    Message::Kill => {
                        info!("{:?} - Killed client dispatcher", dispatcher_addr);
                        break;
                    },
                }
            }
        });

        Ok(RpcClient {
            addr,
            protocol,
            pending,
        })
    }

    fn send_request(&self, dest: &ServiceAddr, payload: RequestPayload) -> Result<ResponsePayload, Error> {
        let (response_tx, response_rx) = channel();
        let mut pending = self.pending.lock().unwrap();
        let mut token = rand::random::<u64>();
        while pending.contains_key(&token) {
            token = rand::random::<u64>();
        }
        pending.insert(token, response_tx);
        drop(pending);

        self.protocol.send_message(
            &Message::Request(Request {
                id: token,
                sender: self.addr.clone(),
                payload,
            }),
            dest,
        );

        let ret = match response_rx.recv_timeout(Duration::from_millis(REQUEST_TIMEOUT)) {
            Ok(response) => match response.payload {
                ResponsePayload::Error(err) => Err(err),
                payload => Ok(payload),
            },
            Err(_) => {
                warn!(
                    "{:?} - Request to {:?} timed out after waiting for {} milliseconds",
                    self.addr, dest, REQUEST_TIMEOUT
                );
                Err(Error::Timeout)
            },
        };
        self.pending.lock().unwrap().remove(&token);
        ret
    }

    /// Shuts down the client's dispatcher thread.
    pub fn kill(&self) {
        self.protocol.send_message(&Message::Kill, &self.addr);
    }
}

fn unexpected(payload: ResponsePayload) -> Error {
    Error::Transport(format!("unexpected response: {:?}", payload))
}

impl NodeClient for RpcClient {
    fn put(&self, node: &ServiceAddr, k: RecordId, d: &[u8]) -> Result<(), Error> {
        match self.send_request(node, RequestPayload::Put(k, d.to_vec()))? {
            ResponsePayload::Done => Ok(()),
            payload => Err(unexpected(payload)),
        }
    }

    fn del(&self, node: &ServiceAddr, k: RecordId) -> Result<(), Error> {
        match self.send_request(node, RequestPayload::Del(k))? {
            ResponsePayload::Done => Ok(()),
            payload => Err(unexpected(payload)),
        }
    }

    fn get(&self, node: &ServiceAddr, k: RecordId) -> Result<Vec<u8>, Error> {
        match self.send_request(node, RequestPayload::Get(k))? {
            ResponsePayload::Value(d) => Ok(d),
            payload => Err(unexpected(payload)),
        }
    }
}

impl RouterClient for RpcClient {
    fn heartbeat(&self, router: &ServiceAddr, node: &ServiceAddr) -> Result<(), Error> {
        match self.send_request(router, RequestPayload::Heartbeat(node.clone()))? {
            ResponsePayload::Done => Ok(()),
            payload => Err(unexpected(payload)),
        }
    }

    fn nodes_find(&self, router: &ServiceAddr, k: RecordId) -> Result<Vec<ServiceAddr>, Error> {
        match self.send_request(router, RequestPayload::NodesFind(k))? {
            ResponsePayload::Nodes(nodes) => Ok(nodes),
            payload => Err(unexpected(payload)),
        }
    }

    fn list(&self, router: &ServiceAddr) -> Result<Vec<ServiceAddr>, Error> {
        match self.send_request(router, RequestPayload::List)? {
            ResponsePayload::Nodes(nodes) => Ok(nodes),
            payload => Err(unexpected(payload)),
        }
    }
}

fn write_reply(result: Result<(), Error>) -> ResponsePayload {
    match result {
        Ok(()) => ResponsePayload::Done,
        Err(err) => ResponsePayload::Error(err),
    }
}

/// Serves a `Node`'s record operations over UDP.
pub struct NodeServer {
    addr: ServiceAddr,
    protocol: Protocol,
}

impl NodeServer {
    /// Binds the node's configured address and starts the request handler.
    pub fn new(node: Node) -> io::Result<NodeServer> {
        let socket = UdpSocket::bind(node.addr().as_str())?;
        let addr = ServiceAddr::new(socket.local_addr()?.to_string());
        let (tx, rx) = channel();
        let protocol = Protocol::new(socket, tx);

        let handler_addr = addr.clone();
        let handler_protocol = protocol.clone();
        thread::spawn(move || {
            for message in rx.iter() {
                match message {
                    Message::Request(request) => {
                        let payload = match request.payload {
                            RequestPayload::Put(k, d) => write_reply(node.put(k, d)),
                            RequestPayload::Del(k) => write_reply(node.del(k)),
                            RequestPayload::Get(k) => match node.get(k) {
                                Ok(d) => ResponsePayload::Value(d),
                                Err(err) => ResponsePayload::Error(err),
                            },
                            ref payload => {
                                warn!("{:?} - Unexpected request {:?}", handler_addr, payload);
                                ResponsePayload::Error(Error::Transport(
                                    "unexpected request".to_string(),
                                ))
                            },
                        };
                        handler_protocol.send_message(
                            &Message::Response(Response {
                                id: request.id,
                                payload,
                            }),
                            &request.sender,
                        );
                    },
                    Message::Response(_) => {
                        warn!("{:?} - Server received a response; ignoring.", handler_addr)
                    },
                    Message::Kill => {
                        info!("{:?} - Killed node server", handler_addr);
                        break;
                    },
                }
            }
        });

        Ok(NodeServer { addr, protocol })
    }

    /// Returns the bound address, relevant when the node was configured with
    /// port 0.
    pub fn addr(&self) -> &ServiceAddr {
        &self.addr
    }

    /// Stops the request handler.
    pub fn kill(&self) {
        self.protocol.send_message(&Message::Kill, &self.addr);
    }
}

/// Serves a `Router`'s membership and placement queries over UDP.
pub struct RouterServer {
    addr: ServiceAddr,
    protocol: Protocol,
}

impl RouterServer {
    /// Binds the router's configured address and starts the request handler.
    pub fn new(router: Router) -> io::Result<RouterServer> {
        let socket = UdpSocket::bind(router.addr().as_str())?;
        let addr = ServiceAddr::new(socket.local_addr()?.to_string());
        let (tx, rx) = channel();
        let protocol = Protocol::new(socket, tx);

        let handler_addr = addr.clone();
        let handler_protocol = protocol.clone();
        thread::spawn(move || {
            for message in rx.iter() {
                match message {
                    Message::Request(request) => {
                        let payload = match request.payload {
                            RequestPayload::Heartbeat(ref node) => write_reply(router.heartbeat(node)),
                            RequestPayload::NodesFind(k) => match router.nodes_find(k) {
                                Ok(nodes) => ResponsePayload::Nodes(nodes),
                                Err(err) => ResponsePayload::Error(err),
                            },
                            RequestPayload::List => ResponsePayload::Nodes(router.list()),
                            ref payload => {
                                warn!("{:?} - Unexpected request {:?}", handler_addr, payload);
                                ResponsePayload::Error(Error::Transport(
                                    "unexpected request".to_string(),
                                ))
                            },
                        };
                        handler_protocol.send_message(
                            &Message::Response(Response {
                                id: request.id,
                                payload,
                            }),
                            &request.sender,
                        );
                    },
                    Message::Response(_) => {
                        warn!("{:?} - Server received a response; ignoring.", handler_addr)
                    },
                    Message::Kill => {
                        info!("{:?} - Killed router server", handler_addr);
                        break;
                    },
                }
            }
        });

        Ok(RouterServer { addr, protocol })
    }

    /// Returns the bound address.
    pub fn addr(&self) -> &ServiceAddr {
        &self.addr
    }

    /// Stops the request handler.
    pub fn kill(&self) {
        self.protocol.send_message(&Message::Kill, &self.addr);
    }
}
