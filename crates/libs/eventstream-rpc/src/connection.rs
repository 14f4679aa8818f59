use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ConnectionConfig;
use crate::continuation::{Continuation, ContinuationCore, ContinuationHandler};
use crate::error::{RpcError, RpcStatus, TransportError};
use crate::header::{Header, MessageAmendment};
use crate::lifecycle::{ConnectionMethod, ConnectionState, Lifecycle};
use crate::message::{
    Frame, Message, MessageFlags, MessageType, EVENTSTREAM_RPC_VERSION, VERSION_HEADER,
};
use crate::promise::{reject_flush, FlushCompletion, FlushFuture, OnMessageFlush, PromiseCell};
use crate::transport::{Connector, FrameSink, FrameSource, Link};

/// Callbacks for connection-level events.
///
/// Every method has a default: `on_error` asks for the connection to be
/// closed, the rest do nothing. Callbacks run on the connection's tasks and
/// must not block.
pub trait ConnectionLifecycleHandler: Send + Sync {
    fn on_connect(&self) {}

    /// Called once per successful connect, after every stream has been closed.
    fn on_disconnect(&self, _status: Result<(), RpcError>) {}

    /// Return `true` to close the connection.
    fn on_error(&self, _error: RpcError) -> bool {
        true
    }

    fn on_ping(&self, _headers: &[Header], _payload: Option<&[u8]>) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultLifecycleHandler;

impl ConnectionLifecycleHandler for DefaultLifecycleHandler {}

/// Produces the CONNECT amendment at connect time, overriding the one in the config.
pub type ConnectMessageAmender = Box<dyn FnOnce() -> MessageAmendment + Send + 'static>;

/// Resolves once the server has accepted or rejected the connection.
pub type ConnectFuture = FlushFuture;

/// A client connection to an event-stream RPC server.
///
/// Cheap to clone; every clone drives the same link. Continuations created
/// from it keep it alive. Dropping the last handle closes the connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
    _owner: Arc<Owner>,
}

/// Shared by every user-held handle; the link tasks only hold `ConnectionInner`.
struct Owner {
    inner: Arc<ConnectionInner>,
}

impl Drop for Owner {
    fn drop(&mut self) {
        log::debug!("connection: last handle dropped");
        self.inner.close_with(RpcError::new(RpcStatus::ConnectionClosed));
    }
}

struct ConnectionInner {
    connector: Arc<dyn Connector>,
    shared: Mutex<Shared>,
}

struct Shared {
    lifecycle: Lifecycle,
    handler: Arc<dyn ConnectionLifecycleHandler>,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    control: Option<mpsc::UnboundedSender<Control>>,
    continuations: HashMap<i32, Weak<ContinuationCore>>,
    next_stream_id: i32,
    connect_promise: Option<Arc<PromiseCell<Result<(), RpcError>>>>,
    on_connect_called: bool,
    close_reason: Option<RpcError>,
    shutdown: CancellationToken,
}

pub(crate) struct Outbound {
    frame: Frame,
    completion: FlushCompletion,
    terminated: Option<Arc<ContinuationCore>>,
}

impl Outbound {
    fn abandon(self, err: RpcError, inner: &ConnectionInner) {
        self.completion.complete(Err(err));
        if let Some(core) = self.terminated {
            inner.post_stream_closed(core, err);
        }
    }
}

/// Work for the reader task, which owns every stream callback.
enum Control {
    StreamClosed(Arc<ContinuationCore>, RpcError),
}

impl Connection {
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self::with_connector(Arc::new(connector))
    }

    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        let inner = Arc::new(ConnectionInner {
            connector,
            shared: Mutex::new(Shared {
                lifecycle: Lifecycle::default(),
                handler: Arc::new(DefaultLifecycleHandler),
                outbound: None,
                control: None,
                continuations: HashMap::new(),
                next_stream_id: 1,
                connect_promise: None,
                on_connect_called: false,
                close_reason: None,
                shutdown: CancellationToken::new(),
            }),
        });
        Self { _owner: Arc::new(Owner { inner: inner.clone() }), inner }
    }

    /// Starts connecting; the returned future settles when CONNACK arrives
    /// or the attempt fails. Must be called from within a Tokio runtime.
    pub fn connect(
        &self,
        config: ConnectionConfig,
        handler: Arc<dyn ConnectionLifecycleHandler>,
        amender: Option<ConnectMessageAmender>,
    ) -> ConnectFuture {
        self.connect_with_flush(config, handler, amender, None)
    }

    /// Like [`Connection::connect`], also reporting when the CONNECT message
    /// has been written. `on_connect_flush` runs once, with an error if the
    /// CONNECT never reached the transport.
    pub fn connect_with_flush(
        &self,
        config: ConnectionConfig,
        handler: Arc<dyn ConnectionLifecycleHandler>,
        amender: Option<ConnectMessageAmender>,
        on_connect_flush: Option<OnMessageFlush>,
    ) -> ConnectFuture {
        let promise = Arc::new(PromiseCell::new());
        let future = FlushFuture::from_promise(promise.get_future());

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::error!("connection: connect called outside a tokio runtime");
            let err = RpcError::new(RpcStatus::Uninitialized);
            let _ = reject_flush(on_connect_flush, err);
            promise.set_value(Err(err));
            return future;
        };

        let (epoch, token) = {
            let mut shared = self.inner.shared();
            let epoch = match shared.lifecycle.mark_connecting() {
                Ok(epoch) => epoch,
                Err(err) => {
                    drop(shared);
                    let _ = reject_flush(on_connect_flush, err);
                    promise.set_value(Err(err));
                    return future;
                }
            };
            if let Err(err) = config.validate() {
                shared.lifecycle.revert_connecting();
                drop(shared);
                log::warn!("connection: host name and port are required");
                let _ = reject_flush(on_connect_flush, err);
                promise.set_value(Err(err));
                return future;
            }
            shared.handler = handler;
            shared.connect_promise = Some(promise);
            shared.on_connect_called = false;
            shared.close_reason = None;
            shared.next_stream_id = 1;
            shared.shutdown = CancellationToken::new();
            (epoch, shared.shutdown.clone())
        };

        log::info!(
            "connection: connecting to {}:{}",
            config.host_name.as_deref().unwrap_or_default(),
            config.port.unwrap_or_default()
        );
        let setup = LinkSetup { epoch, config, amender, on_connect_flush, token };
        runtime.spawn(run_link(self.inner.clone(), setup));
        future
    }

    /// Closes the connection. Safe to call repeatedly and from any state.
    pub fn close(&self) {
        self.inner.close_with(RpcError::new(RpcStatus::ConnectionClosed));
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared().lifecycle.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn send_ping(
        &self,
        headers: Vec<Header>,
        payload: Option<Vec<u8>>,
        on_flush: Option<OnMessageFlush>,
    ) -> FlushFuture {
        let message = Message::new(MessageType::Ping).with_headers(headers).with_payload(payload);
        self.inner.send_connection_message(ConnectionMethod::SendPing, message, on_flush)
    }

    pub fn send_ping_response(
        &self,
        headers: Vec<Header>,
        payload: Option<Vec<u8>>,
        on_flush: Option<OnMessageFlush>,
    ) -> FlushFuture {
        let message =
            Message::new(MessageType::PingResponse).with_headers(headers).with_payload(payload);
        self.inner.send_connection_message(ConnectionMethod::SendPingResponse, message, on_flush)
    }

    /// A new, not yet activated continuation delivering to `handler`.
    pub fn new_stream(&self, handler: Weak<dyn ContinuationHandler>) -> Continuation {
        Continuation::new(self.clone(), handler)
    }

    /// Registers `core` under a fresh stream id and queues its first message.
    pub(crate) fn activate_stream(
        &self,
        core: &Arc<ContinuationCore>,
        message: Message,
        completion: FlushCompletion,
    ) -> Result<i32, RpcError> {
        let mut shared = self.inner.shared();
        let (stream_id, outbound) = match register_stream(&mut shared, core) {
            Ok(registered) => registered,
            Err(err) => {
                drop(shared);
                completion.complete(Err(err));
                return Err(err);
            }
        };
        let frame = Frame::new(stream_id, message);
        if let Err(mpsc::error::SendError(item)) =
            outbound.send(Outbound { frame, completion, terminated: None })
        {
            shared.continuations.remove(&stream_id);
            drop(shared);
            let err = RpcError::new(RpcStatus::ConnectionClosed);
            item.abandon(err, &self.inner);
            return Err(err);
        }
        log::debug!("connection: activated stream {stream_id}");
        Ok(stream_id)
    }

    pub(crate) fn send_stream_message(
        &self,
        frame: Frame,
        completion: FlushCompletion,
        terminated: Option<Arc<ContinuationCore>>,
    ) -> Result<(), RpcError> {
        let item = Outbound { frame, completion, terminated };
        let outbound = {
            let shared = self.inner.shared();
            shared
                .lifecycle
                .ensure_method_legal(ConnectionMethod::SendStreamMessage)
                .and_then(|()| shared.outbound.clone().ok_or(RpcStatus::ConnectionClosed.into()))
        };
        match outbound {
            Ok(outbound) => outbound.send(item).map_err(|mpsc::error::SendError(item)| {
                let err = RpcError::new(RpcStatus::ConnectionClosed);
                item.abandon(err, &self.inner);
                err
            }),
            Err(err) => {
                item.abandon(err, &self.inner);
                Err(err)
            }
        }
    }

    /// Unregisters `core`; a newer stream reusing the id after a reconnect stays.
    pub(crate) fn forget_stream(&self, stream_id: i32, core: &ContinuationCore) {
        let mut shared = self.inner.shared();
        let registered = shared
            .continuations
            .get(&stream_id)
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), core));
        if registered {
            shared.continuations.remove(&stream_id);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("state", &self.state()).finish_non_exhaustive()
    }
}

fn register_stream(
    shared: &mut Shared,
    core: &Arc<ContinuationCore>,
) -> Result<(i32, mpsc::UnboundedSender<Outbound>), RpcError> {
    shared.lifecycle.ensure_method_legal(ConnectionMethod::ActivateStream)?;
    let outbound = shared.outbound.clone().ok_or(RpcError::new(RpcStatus::ConnectionClosed))?;
    let stream_id = shared.next_stream_id;
    shared.next_stream_id = stream_id
        .checked_add(1)
        .ok_or_else(|| RpcError::from(TransportError::invalid_state("stream ids exhausted")))?;
    core.set_stream_id(stream_id);
    shared.continuations.insert(stream_id, Arc::downgrade(core));
    Ok((stream_id, outbound))
}

impl ConnectionInner {
    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().expect("connection mutex poisoned")
    }

    fn handler(&self) -> Arc<dyn ConnectionLifecycleHandler> {
        self.shared().handler.clone()
    }

    fn close_with(&self, reason: RpcError) {
        let (token, pending_connect) = {
            let mut shared = self.shared();
            let previous = shared.lifecycle.state();
            if !shared.lifecycle.mark_disconnecting() {
                return;
            }
            if shared.close_reason.is_none() {
                shared.close_reason = Some(reason);
            }
            shared.outbound = None;
            let pending_connect = if previous == ConnectionState::ConnectingToSocket {
                shared.connect_promise.take()
            } else {
                None
            };
            (shared.shutdown.clone(), pending_connect)
        };
        log::debug!("connection: closing ({reason})");
        token.cancel();
        if let Some(promise) = pending_connect {
            promise.set_value(Err(RpcError::new(RpcStatus::ConnectionClosed)));
        }
    }

    fn send_connection_message(
        &self,
        method: ConnectionMethod,
        message: Message,
        on_flush: Option<OnMessageFlush>,
    ) -> FlushFuture {
        let (completion, future) = FlushCompletion::new(on_flush);
        let item = Outbound { frame: Frame::connection(message), completion, terminated: None };
        let outbound = {
            let shared = self.shared();
            shared
                .lifecycle
                .ensure_method_legal(method)
                .and_then(|()| shared.outbound.clone().ok_or(RpcStatus::ConnectionClosed.into()))
        };
        match outbound {
            Ok(outbound) => {
                if let Err(mpsc::error::SendError(item)) = outbound.send(item) {
                    item.abandon(RpcError::new(RpcStatus::ConnectionClosed), self);
                }
            }
            Err(err) => item.abandon(err, self),
        }
        future
    }

    /// Hands a stream close to the reader task so it cannot overlap a delivery.
    /// With no reader running the stream is closed here.
    fn post_stream_closed(&self, core: Arc<ContinuationCore>, reason: RpcError) {
        let control = self.shared().control.clone();
        let undelivered = match control {
            Some(control) => control.send(Control::StreamClosed(core, reason)).err().map(|e| e.0),
            None => Some(Control::StreamClosed(core, reason)),
        };
        if let Some(Control::StreamClosed(core, reason)) = undelivered {
            core.notify_closed(reason);
        }
    }

    fn note_link_failure(&self, err: RpcError) {
        let mut shared = self.shared();
        if shared.close_reason.is_none() {
            shared.close_reason = Some(err);
        }
    }

    fn on_setup_failed(&self, epoch: u64, err: TransportError) {
        let (handler, promise, closing) = {
            let mut shared = self.shared();
            if shared.lifecycle.epoch() != epoch {
                return;
            }
            let closing = shared.lifecycle.state() == ConnectionState::Disconnecting;
            shared.lifecycle.mark_disconnected();
            (shared.handler.clone(), shared.connect_promise.take(), closing)
        };
        log::error!("connection: socket setup failed: {err}");
        let error = RpcError::from(&err);
        if let Some(promise) = promise {
            promise.set_value(Err(error));
        }
        if !closing {
            handler.on_error(error);
        }
    }

    fn on_setup_abandoned(&self, epoch: u64) {
        let mut shared = self.shared();
        if shared.lifecycle.epoch() == epoch {
            shared.lifecycle.mark_disconnected();
        }
    }

    fn dispatch(&self, frame: Frame) {
        if frame.is_connection_level() {
            self.handle_connection_message(frame.message);
            return;
        }
        let stream_id = frame.stream_id;
        let core = self.shared().continuations.get(&stream_id).and_then(Weak::upgrade);
        let Some(core) = core else {
            log::debug!(
                "connection: dropping {} for unknown stream {stream_id}",
                frame.message.message_type
            );
            return;
        };
        log::trace!("connection: {} on stream {stream_id}", frame.message.message_type);
        core.deliver(&frame.message);
        if frame.message.terminates_stream() {
            core.notify_closed(RpcError::new(RpcStatus::ContinuationClosed));
        }
    }

    fn handle_connection_message(&self, message: Message) {
        match message.message_type {
            MessageType::ConnectAck => self.handle_connect_ack(&message),
            MessageType::Ping => {
                self.handler().on_ping(&message.headers, message.payload.as_deref());
            }
            MessageType::PingResponse => log::trace!("connection: ping response"),
            MessageType::ProtocolError | MessageType::InternalError => {
                let detail = String::from_utf8_lossy(message.payload()).into_owned();
                log::error!("connection: server reported {}: {detail}", message.message_type);
                self.report_error(TransportError::protocol(detail).into());
            }
            other => {
                log::warn!("connection: unexpected {other} on the connection stream");
                self.report_error(RpcError::new(RpcStatus::UnknownProtocolMessage));
            }
        }
    }

    fn report_error(&self, error: RpcError) {
        if self.handler().on_error(error) {
            self.close_with(error);
        }
    }

    fn handle_connect_ack(&self, message: &Message) {
        let (handler, promise) = {
            let mut shared = self.shared();
            if shared.lifecycle.state() != ConnectionState::WaitingForConnectAck {
                log::warn!(
                    "connection: ignoring CONNACK while {}",
                    shared.lifecycle.state().as_str()
                );
                return;
            }
            if !message.flags.contains(MessageFlags::CONNECTION_ACCEPTED) {
                drop(shared);
                log::warn!("connection: server rejected the connect request");
                self.close_with(RpcError::new(RpcStatus::ConnectionAccessDenied));
                return;
            }
            if let Err(err) = shared.lifecycle.mark_connected() {
                log::warn!("connection: cannot complete connect: {err}");
                return;
            }
            shared.on_connect_called = true;
            (shared.handler.clone(), shared.connect_promise.take())
        };
        log::info!("connection: connected");
        if let Some(promise) = promise {
            promise.set_value(Ok(()));
        }
        handler.on_connect();
    }

    fn handle_shutdown(
        &self,
        epoch: u64,
        link_result: Result<(), RpcError>,
        control: &mut mpsc::UnboundedReceiver<Control>,
    ) {
        control.close();
        while let Ok(Control::StreamClosed(core, reason)) = control.try_recv() {
            core.notify_closed(reason);
        }

        let (handler, promise, was_connected, continuations, reason) = {
            let mut shared = self.shared();
            if shared.lifecycle.epoch() != epoch {
                return;
            }
            if let (Err(err), None) = (link_result, shared.close_reason) {
                shared.close_reason = Some(err);
            }
            let reason = shared.close_reason;
            shared.outbound = None;
            shared.control = None;
            shared.lifecycle.mark_disconnected();
            let was_connected = std::mem::replace(&mut shared.on_connect_called, false);
            let continuations: Vec<_> =
                shared.continuations.drain().filter_map(|(_, core)| core.upgrade()).collect();
            let promise = shared.connect_promise.take();
            (shared.handler.clone(), promise, was_connected, continuations, reason)
        };

        let closed_with = reason.unwrap_or(RpcError::new(RpcStatus::ConnectionClosed));
        log::info!(
            "connection: shut down ({closed_with}), closing {} stream(s)",
            continuations.len()
        );
        if let Some(promise) = promise {
            promise.set_value(Err(closed_with));
        }
        for core in continuations {
            core.notify_closed(closed_with);
        }
        if was_connected {
            let status = match reason {
                None => Ok(()),
                Some(err) if err.status() == RpcStatus::ConnectionClosed => Ok(()),
                Some(err) => Err(err),
            };
            handler.on_disconnect(status);
        }
    }
}

struct LinkSetup {
    epoch: u64,
    config: ConnectionConfig,
    amender: Option<ConnectMessageAmender>,
    on_connect_flush: Option<OnMessageFlush>,
    token: CancellationToken,
}

async fn run_link(inner: Arc<ConnectionInner>, setup: LinkSetup) {
    let LinkSetup { epoch, config, amender, on_connect_flush, token } = setup;
    let (completion, _flushed) = FlushCompletion::new(Some(Box::new(move |result| {
        if let Err(err) = result {
            log::warn!("connection: CONNECT was not written: {err}");
        }
        if let Some(on_connect_flush) = on_connect_flush {
            on_connect_flush(result);
        }
    })));

    let connected = tokio::select! {
        _ = token.cancelled() => None,
        result = inner.connector.connect(&config) => Some(result),
    };
    let Link { mut sink, source } = match connected {
        Some(Ok(link)) => link,
        Some(Err(err)) => {
            completion.complete(Err(RpcError::from(&err)));
            inner.on_setup_failed(epoch, err);
            return;
        }
        None => {
            log::debug!("connection: closed while connecting");
            completion.complete(Err(RpcError::new(RpcStatus::ConnectionClosed)));
            inner.on_setup_abandoned(epoch);
            return;
        }
    };

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (control_tx, mut control_rx) = mpsc::unbounded_channel();
    let abandoned = {
        let mut shared = inner.shared();
        let current = shared.lifecycle.epoch() == epoch;
        if !current || shared.lifecycle.mark_waiting_for_connect_ack().is_err() {
            if current {
                shared.lifecycle.mark_disconnected();
            }
            true
        } else {
            shared.outbound = Some(outbound_tx.clone());
            shared.control = Some(control_tx.clone());
            false
        }
    };
    if abandoned {
        log::debug!("connection: closed while the socket was coming up");
        completion.complete(Err(RpcError::new(RpcStatus::ConnectionClosed)));
        sink.close().await;
        return;
    }

    let amendment = match amender {
        Some(amend) => amend(),
        None => config.connect_amendment,
    };
    let (amended_headers, payload) = amendment.into_parts();
    let mut headers = vec![Header::string(VERSION_HEADER, EVENTSTREAM_RPC_VERSION)];
    headers.extend(amended_headers);
    let connect = Message::new(MessageType::Connect).with_headers(headers).with_payload(payload);
    let first = Outbound { frame: Frame::connection(connect), completion, terminated: None };
    let _ = outbound_tx.send(first);
    drop(outbound_tx);

    let writer =
        tokio::spawn(write_loop(inner.clone(), sink, outbound_rx, control_tx, token.clone()));
    let result = read_loop(&inner, source, &mut control_rx, &token).await;
    token.cancel();
    if let Err(err) = writer.await {
        log::error!("connection: writer task failed: {err}");
    }
    inner.handle_shutdown(epoch, result, &mut control_rx);
}

async fn read_loop(
    inner: &ConnectionInner,
    mut source: Box<dyn FrameSource>,
    control: &mut mpsc::UnboundedReceiver<Control>,
    token: &CancellationToken,
) -> Result<(), RpcError> {
    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            Some(Control::StreamClosed(core, reason)) = control.recv() => {
                core.notify_closed(reason);
            }
            next = source.next_frame() => match next {
                Ok(Some(frame)) => inner.dispatch(frame),
                Ok(None) => {
                    log::info!("connection: peer closed the link");
                    return Ok(());
                }
                Err(err) => {
                    log::error!("connection: read failed: {err}");
                    return Err(err.into());
                }
            },
        }
    }
}

async fn write_loop(
    inner: Arc<ConnectionInner>,
    mut sink: Box<dyn FrameSink>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    control: mpsc::UnboundedSender<Control>,
    token: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = token.cancelled() => break,
            item = outbound.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        let Outbound { frame, completion, terminated } = item;
        let stream_id = frame.stream_id;
        let result = sink.send_frame(frame).await.map_err(RpcError::from);
        if let Err(err) = &result {
            log::warn!("connection: write on stream {stream_id} failed: {err}");
        }
        completion.complete(result);
        if let Some(core) = terminated {
            let reason = result.err().unwrap_or(RpcError::new(RpcStatus::ContinuationClosed));
            if let Err(mpsc::error::SendError(Control::StreamClosed(core, reason))) =
                control.send(Control::StreamClosed(core, reason))
            {
                core.notify_closed(reason);
            }
        }
        if let Err(err) = result {
            inner.note_link_failure(err);
            token.cancel();
            break;
        }
    }

    sink.close().await;
    outbound.close();
    while let Ok(item) = outbound.try_recv() {
        item.abandon(RpcError::new(RpcStatus::ConnectionClosed), &inner);
    }
}
