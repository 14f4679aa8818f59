//! Scripted server side for unit tests.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ConnectionConfig;
use crate::connection::{Connection, ConnectionLifecycleHandler};
use crate::continuation::ContinuationHandler;
use crate::error::RpcError;
use crate::header::{Header, MessageAmendment};
use crate::message::{Frame, Message, MessageFlags, MessageType};
use crate::transport::memory::{memory_transport, MemoryListener, MemoryPeer};

const WAIT: Duration = Duration::from_secs(5);

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future).await.expect("timed out")
}

pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

pub(crate) fn client_config() -> ConnectionConfig {
    ConnectionConfig::new("127.0.0.1", 8033).with_connect_amendment(MessageAmendment::with_headers(
        vec![Header::string("client-name", "accepted.testy_mc_testerson")],
    ))
}

pub(crate) fn connack(accepted: bool) -> Frame {
    let flags = if accepted { MessageFlags::CONNECTION_ACCEPTED } else { MessageFlags::NONE };
    Frame::connection(Message::new(MessageType::ConnectAck).with_flags(flags))
}

/// Accepts the next link and reads its CONNECT message.
pub(crate) async fn accept_connect(listener: &mut MemoryListener) -> (MemoryPeer, Message) {
    init_logging();
    let mut peer = within(listener.accept()).await.expect("peer");
    let frame = within(peer.recv()).await.expect("connect frame");
    assert!(frame.is_connection_level());
    assert_eq!(frame.message.message_type, MessageType::Connect);
    (peer, frame.message)
}

#[derive(Default)]
pub(crate) struct RecordingLifecycle {
    pub connects: AtomicUsize,
    pub disconnects: Mutex<Vec<Result<(), RpcError>>>,
    pub errors: Mutex<Vec<RpcError>>,
    pub pings: Mutex<Vec<(Vec<Header>, Option<Vec<u8>>)>>,
    pub keep_open_on_error: bool,
}

impl RecordingLifecycle {
    pub fn disconnects(&self) -> Vec<Result<(), RpcError>> {
        self.disconnects.lock().expect("disconnects").clone()
    }

    pub fn errors(&self) -> Vec<RpcError> {
        self.errors.lock().expect("errors").clone()
    }
}

impl ConnectionLifecycleHandler for RecordingLifecycle {
    fn on_connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disconnect(&self, status: Result<(), RpcError>) {
        self.disconnects.lock().expect("disconnects").push(status);
    }

    fn on_error(&self, error: RpcError) -> bool {
        self.errors.lock().expect("errors").push(error);
        !self.keep_open_on_error
    }

    fn on_ping(&self, headers: &[Header], payload: Option<&[u8]>) {
        self.pings.lock().expect("pings").push((headers.to_vec(), payload.map(<[u8]>::to_vec)));
    }
}

/// A connection that has completed its handshake, with the server side of its link.
pub(crate) struct Connected {
    pub connection: Connection,
    pub lifecycle: Arc<RecordingLifecycle>,
    pub peer: MemoryPeer,
    pub listener: MemoryListener,
}

pub(crate) async fn connected() -> Connected {
    connected_with(RecordingLifecycle::default()).await
}

pub(crate) async fn connected_with(lifecycle: RecordingLifecycle) -> Connected {
    let (connector, mut listener) = memory_transport();
    let connection = Connection::new(connector);
    let lifecycle = Arc::new(lifecycle);
    let connect = connection.connect(client_config(), lifecycle.clone(), None);
    let (peer, _) = accept_connect(&mut listener).await;
    peer.send(connack(true)).expect("connack");
    within(connect).await.expect("connected");
    Connected { connection, lifecycle, peer, listener }
}

#[derive(Default)]
pub(crate) struct RecordingContinuation {
    pub messages: Mutex<Vec<Message>>,
    pub closed: AtomicUsize,
    pub after_close: AtomicUsize,
}

impl RecordingContinuation {
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().expect("messages").clone()
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ContinuationHandler for RecordingContinuation {
    fn on_continuation_message(&self, message: &Message) {
        if self.closed() > 0 {
            self.after_close.fetch_add(1, Ordering::SeqCst);
        }
        self.messages.lock().expect("messages").push(message.clone());
    }

    fn on_continuation_closed(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
