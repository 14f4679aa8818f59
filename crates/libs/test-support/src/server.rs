//! In-process `awstest` echo service.
//!
//! Serves every operation of [`crate::EchoTestRpcClient`] over the memory
//! transport, so integration tests exercise the whole client engine without
//! sockets.

use std::collections::{BTreeMap, HashMap};

use eventstream_rpc::message::{
    CONTENT_TYPE_APPLICATION_JSON, CONTENT_TYPE_HEADER, EVENTSTREAM_RPC_VERSION, OPERATION_HEADER,
    SERVICE_MODEL_TYPE_HEADER, VERSION_HEADER,
};
use eventstream_rpc::shape::decode_json;
use eventstream_rpc::transport::memory::{
    memory_transport, MemoryConnector, MemoryListener, MemoryPeer,
};
use eventstream_rpc::{Frame, Header, Message, MessageFlags, MessageType, Shape, TransportError};
use tokio::task::{JoinHandle, JoinSet};

use crate::client::EchoTestRpcClient;
use crate::model::{
    CauseServiceErrorRequest, Customer, EchoMessageRequest, EchoMessageResponse,
    EchoStreamingMessage, EchoStreamingResponse, GetAllCustomersResponse, GetAllProductsResponse,
    Product, ServiceError, CAUSE_SERVICE_ERROR, CAUSE_STREAM_SERVICE_TO_ERROR, ECHO_MESSAGE,
    ECHO_STREAM_MESSAGES, GET_ALL_CUSTOMERS, GET_ALL_PRODUCTS,
};

/// Only clients announcing a name with this prefix get a CONNACK.
pub const ACCEPTED_CLIENT_PREFIX: &str = "accepted.";
pub const SERVICE_ERROR_MESSAGE: &str = "Intentionally thrown ServiceError";
pub const SERVICE_ERROR_VALUE: &str = "Some value";
pub const STREAM_SERVICE_ERROR_MESSAGE: &str = "Intentionally caused ServiceError on stream";

pub struct EchoTestServer {
    connector: MemoryConnector,
    task: JoinHandle<()>,
}

impl EchoTestServer {
    /// Starts accepting on the current Tokio runtime.
    pub fn start() -> Self {
        let (connector, listener) = memory_transport();
        let task = tokio::spawn(accept_loop(listener));
        Self { connector, task }
    }

    pub fn connector(&self) -> MemoryConnector {
        self.connector.clone()
    }

    /// A fresh, unconnected client pointed at this server.
    pub fn client(&self) -> EchoTestRpcClient {
        EchoTestRpcClient::new(self.connector())
    }
}

impl Drop for EchoTestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(mut listener: MemoryListener) {
    let mut peers = JoinSet::new();
    while let Some(peer) = listener.accept().await {
        peers.spawn(serve_peer(peer));
    }
}

async fn serve_peer(mut peer: MemoryPeer) {
    let Some(connect) = peer.recv().await else {
        return;
    };
    if !accepts(&connect) {
        log::info!("echo_server: rejecting client");
        let _ = peer.send(connect_ack(MessageFlags::NONE));
        while peer.recv().await.is_some() {}
        return;
    }
    if peer.send(connect_ack(MessageFlags::CONNECTION_ACCEPTED)).is_err() {
        return;
    }

    let mut session = Session { peer, streams: HashMap::new() };
    while let Some(frame) = session.peer.recv().await {
        if let Err(err) = session.handle(frame) {
            log::warn!("echo_server: dropping client: {err}");
            break;
        }
    }
    log::debug!("echo_server: client left");
}

fn accepts(frame: &Frame) -> bool {
    let message = &frame.message;
    let version_ok = message.header(VERSION_HEADER).and_then(Header::value_as_str)
        == Some(EVENTSTREAM_RPC_VERSION);
    let name_ok = message
        .header("client-name")
        .and_then(Header::value_as_str)
        .is_some_and(|name| name.starts_with(ACCEPTED_CLIENT_PREFIX));
    frame.is_connection_level()
        && message.message_type == MessageType::Connect
        && version_ok
        && name_ok
}

fn connect_ack(flags: MessageFlags) -> Frame {
    Frame::connection(Message::new(MessageType::ConnectAck).with_flags(flags))
}

struct Session {
    peer: MemoryPeer,
    /// Open streams and the operation each one runs.
    streams: HashMap<i32, String>,
}

impl Session {
    fn handle(&mut self, frame: Frame) -> Result<(), TransportError> {
        if frame.is_connection_level() {
            return self.handle_connection_message(frame.message);
        }
        let Frame { stream_id, message } = frame;
        let terminates = message.terminates_stream();

        match self.streams.get(&stream_id).cloned() {
            Some(operation) => {
                let has_body = !message.payload().is_empty();
                if message.message_type == MessageType::ApplicationMessage && has_body {
                    self.on_stream_message(stream_id, &operation, &message)?;
                }
            }
            None => {
                let operation = message.header(OPERATION_HEADER).and_then(Header::value_as_str);
                let Some(operation) = operation.map(str::to_owned) else {
                    log::debug!("echo_server: ignoring message on unknown stream {stream_id}");
                    return Ok(());
                };
                if !terminates {
                    self.streams.insert(stream_id, operation.clone());
                }
                self.on_request(stream_id, &operation, &message)?;
            }
        }

        if terminates {
            self.streams.remove(&stream_id);
        }
        Ok(())
    }

    fn handle_connection_message(&self, message: Message) -> Result<(), TransportError> {
        match message.message_type {
            MessageType::Ping => {
                let pong = Message::new(MessageType::PingResponse)
                    .with_headers(message.headers)
                    .with_payload(message.payload);
                self.peer.send(Frame::connection(pong))
            }
            other => {
                log::debug!("echo_server: ignoring connection message {other}");
                Ok(())
            }
        }
    }

    fn on_request(
        &mut self,
        stream_id: i32,
        operation: &str,
        message: &Message,
    ) -> Result<(), TransportError> {
        log::debug!("echo_server: {operation} on stream {stream_id}");
        match operation {
            ECHO_MESSAGE => match decode_json::<EchoMessageRequest>(message.payload()) {
                Ok(request) => {
                    let response = EchoMessageResponse { message: request.message };
                    self.finish(stream_id, &response, MessageType::ApplicationMessage)
                }
                Err(err) => self.fail_stream(stream_id, err.to_string()),
            },
            GET_ALL_PRODUCTS => {
                let response = GetAllProductsResponse { products: Some(product_catalogue()) };
                self.finish(stream_id, &response, MessageType::ApplicationMessage)
            }
            GET_ALL_CUSTOMERS => {
                let response = GetAllCustomersResponse { customers: Some(customer_list()) };
                self.finish(stream_id, &response, MessageType::ApplicationMessage)
            }
            CAUSE_SERVICE_ERROR => match decode_json::<CauseServiceErrorRequest>(message.payload())
            {
                Ok(_) => {
                    let error = ServiceError {
                        message: Some(SERVICE_ERROR_MESSAGE.to_owned()),
                        value: Some(SERVICE_ERROR_VALUE.to_owned()),
                    };
                    self.finish(stream_id, &error, MessageType::ApplicationError)
                }
                Err(err) => self.fail_stream(stream_id, err.to_string()),
            },
            ECHO_STREAM_MESSAGES | CAUSE_STREAM_SERVICE_TO_ERROR => self.send(
                stream_id,
                &EchoStreamingResponse {},
                MessageType::ApplicationMessage,
                MessageFlags::NONE,
            ),
            unknown => self.fail_stream(stream_id, format!("unknown operation {unknown}")),
        }
    }

    fn on_stream_message(
        &mut self,
        stream_id: i32,
        operation: &str,
        message: &Message,
    ) -> Result<(), TransportError> {
        match operation {
            ECHO_STREAM_MESSAGES => match decode_json::<EchoStreamingMessage>(message.payload()) {
                Ok(event) => {
                    let flags = MessageFlags::NONE;
                    self.send(stream_id, &event, MessageType::ApplicationMessage, flags)
                }
                Err(err) => self.fail_stream(stream_id, err.to_string()),
            },
            CAUSE_STREAM_SERVICE_TO_ERROR => {
                self.fail_stream(stream_id, STREAM_SERVICE_ERROR_MESSAGE.to_owned())
            }
            other => {
                log::debug!("echo_server: {other} takes no stream messages");
                Ok(())
            }
        }
    }

    /// Sends a service error and terminates the stream.
    fn fail_stream(&mut self, stream_id: i32, message: String) -> Result<(), TransportError> {
        let error = ServiceError { message: Some(message), value: None };
        self.finish(stream_id, &error, MessageType::ApplicationError)
    }

    fn finish(
        &mut self,
        stream_id: i32,
        shape: &dyn Shape,
        message_type: MessageType,
    ) -> Result<(), TransportError> {
        self.streams.remove(&stream_id);
        self.send(stream_id, shape, message_type, MessageFlags::TERMINATE_STREAM)
    }

    fn send(
        &self,
        stream_id: i32,
        shape: &dyn Shape,
        message_type: MessageType,
        flags: MessageFlags,
    ) -> Result<(), TransportError> {
        let payload =
            shape.to_payload().map_err(|err| TransportError::protocol(err.to_string()))?;
        let headers = vec![
            Header::string(CONTENT_TYPE_HEADER, CONTENT_TYPE_APPLICATION_JSON),
            Header::string(SERVICE_MODEL_TYPE_HEADER, shape.model_name()),
        ];
        let message = Message::new(message_type)
            .with_headers(headers)
            .with_payload(Some(payload))
            .with_flags(flags);
        self.peer.send(Frame::new(stream_id, message))
    }
}

/// What `awstest#GetAllProducts` always returns.
pub fn product_catalogue() -> BTreeMap<String, Product> {
    [("apple", "Apple", 1.25_f32), ("orange", "Orange", 0.75), ("pineapple", "Pineapple", 3.5)]
        .into_iter()
        .map(|(key, name, price)| {
            (key.to_owned(), Product { name: Some(name.to_owned()), price: Some(price) })
        })
        .collect()
}

/// What `awstest#GetAllCustomers` always returns.
pub fn customer_list() -> Vec<Customer> {
    vec![
        customer(1, "Testy", "McTesterson"),
        customer(2, "Ada", "Lovelace"),
    ]
}

fn customer(id: i64, first_name: &str, last_name: &str) -> Customer {
    Customer {
        id: Some(id),
        first_name: Some(first_name.to_owned()),
        last_name: Some(last_name.to_owned()),
    }
}
