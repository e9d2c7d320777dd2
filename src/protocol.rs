use std::net::UdpSocket;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;

use crate::storage::{Error, RecordId, ServiceAddr};
use crate::MESSAGE_LENGTH;

/// A request addressed to a node or router service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub sender: ServiceAddr,
    pub payload: RequestPayload,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RequestPayload {
    Put(RecordId, Vec<u8>),
    Del(RecordId),
    Get(RecordId),
    Heartbeat(ServiceAddr),
    NodesFind(RecordId),
    List,
}

/// An answer to a request, matched back to its caller by `id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub payload: ResponsePayload,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ResponsePayload {
    Done,
    Value(Vec<u8>),
    Nodes(Vec<ServiceAddr>),
    Error(Error),
}

#[derive(Debug, Serialize, Deserialize)]
pub enum Message {
    Request(Request),
    Response(Response),
    Kill,
}

/// A UDP endpoint that decodes incoming datagrams into messages and feeds
/// them to a channel.
#[derive(Clone)]
pub struct Protocol {
    socket: Arc<UdpSocket>,
}

impl Protocol {
    /// Wraps `socket` and spawns a thread forwarding every received message
    /// to `tx`. The thread exits when the receiving end of `tx` is dropped.
    pub fn new(socket: UdpSocket, tx: Sender<Message>) -> Protocol {
        let protocol = Protocol {
            socket: Arc::new(socket),
        };
        let ret = protocol.clone();
        thread::spawn(move || {
            let mut buffer = [0u8; MESSAGE_LENGTH];
            loop {
                let len = match protocol.socket.recv_from(&mut buffer) {
                    Ok((len, _src_addr)) => len,
                    Err(err) => {
                        warn!("Protocol: Could not receive data: {}", err);
                        continue;
                    },
                };
                let message = match bincode::deserialize(&buffer[..len]) {
                    Ok(message) => message,
                    Err(err) => {
                        warn!("Protocol: Dropping malformed datagram: {}", err);
                        continue;
                    },
                };

                if tx.send(message).is_err() {
                    warn!("Protocol: Connection closed.");
                    break;
                }
            }
        });
        ret
    }

    /// Encodes and sends `message` to `addr`. Send failures are logged; the
    /// caller's timeout handling covers the loss.
    pub fn send_message(&self, message: &Message, addr: &ServiceAddr) {
        let buffer = match bincode::serialize(message, bincode::Bounded(MESSAGE_LENGTH as u64)) {
            Ok(buffer) => buffer,
            Err(err) => {
                warn!("Protocol: Could not encode message: {}", err);
                return;
            },
        };
        if self.socket.send_to(&buffer, addr.as_str()).is_err() {
            warn!("Protocol: Could not send data.");
        }
    }
}
