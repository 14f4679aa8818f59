use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::connection::Connection;
use crate::error::{RpcError, RpcStatus, TransportError};
use crate::header::Header;
use crate::message::{Frame, Message, MessageFlags, MessageType, OPERATION_HEADER};
use crate::promise::{reject_flush, FlushCompletion, FlushFuture, OnMessageFlush};

/// Receives the messages of one stream.
///
/// Both callbacks run on the connection's reader task, in receive order,
/// unless no link is running when the stream closes. `on_continuation_closed`
/// runs exactly once and nothing is delivered after it.
pub trait ContinuationHandler: Send + Sync {
    fn on_continuation_message(&self, message: &Message);

    fn on_continuation_closed(&self);
}

/// One logical stream multiplexed over a [`Connection`].
///
/// Dropping an activated, still-open continuation terminates the stream.
pub struct Continuation {
    core: Arc<ContinuationCore>,
}

pub(crate) struct ContinuationCore {
    connection: Connection,
    handler: Weak<dyn ContinuationHandler>,
    stream_id: AtomicI32,
    activated: AtomicBool,
    closed: AtomicBool,
    closed_notified: AtomicBool,
    close_reason: Mutex<Option<RpcError>>,
    orphaned_close: Mutex<Option<OrphanedClose>>,
}

/// Runs in place of `on_continuation_closed` once the handler is gone.
pub(crate) type OrphanedClose = Box<dyn FnOnce() + Send + 'static>;

impl Continuation {
    pub(crate) fn new(connection: Connection, handler: Weak<dyn ContinuationHandler>) -> Self {
        Self {
            core: Arc::new(ContinuationCore {
                connection,
                handler,
                stream_id: AtomicI32::new(0),
                activated: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                closed_notified: AtomicBool::new(false),
                close_reason: Mutex::new(None),
                orphaned_close: Mutex::new(None),
            }),
        }
    }

    /// Opens the stream by sending its first message, tagged with `operation_name`.
    pub fn activate(
        &self,
        operation_name: &str,
        mut headers: Vec<Header>,
        payload: Option<Vec<u8>>,
        message_type: MessageType,
        flags: MessageFlags,
        on_flush: Option<OnMessageFlush>,
    ) -> FlushFuture {
        if self.is_closed() {
            return reject_flush(on_flush, RpcError::new(RpcStatus::ContinuationClosed));
        }
        if self.core.activated.swap(true, Ordering::SeqCst) {
            return reject_flush(
                on_flush,
                TransportError::invalid_state("continuation already activated").into(),
            );
        }

        headers.push(Header::string(OPERATION_HEADER, operation_name));
        let message = Message::new(message_type)
            .with_headers(headers)
            .with_payload(payload)
            .with_flags(flags);
        let (completion, future) = FlushCompletion::new(on_flush);
        if let Err(err) = self.core.connection.activate_stream(&self.core, message, completion) {
            log::debug!("continuation: activating {operation_name} failed: {err}");
            self.core.activated.store(false, Ordering::SeqCst);
        }
        future
    }

    /// Sends a message on an activated stream. `TERMINATE_STREAM` closes it.
    pub fn send_message(
        &self,
        headers: Vec<Header>,
        payload: Option<Vec<u8>>,
        message_type: MessageType,
        flags: MessageFlags,
        on_flush: Option<OnMessageFlush>,
    ) -> FlushFuture {
        if self.is_closed() {
            return reject_flush(on_flush, RpcError::new(RpcStatus::ContinuationClosed));
        }
        if !self.is_activated() {
            return reject_flush(on_flush, RpcError::new(RpcStatus::NullParameter));
        }
        let terminates = flags.contains(MessageFlags::TERMINATE_STREAM);
        if terminates && self.core.closed.swap(true, Ordering::SeqCst) {
            return reject_flush(on_flush, RpcError::new(RpcStatus::ContinuationClosed));
        }

        let message = Message::new(message_type)
            .with_headers(headers)
            .with_payload(payload)
            .with_flags(flags);
        let frame = Frame::new(self.core.stream_id.load(Ordering::SeqCst), message);
        let (completion, future) = FlushCompletion::new(on_flush);
        let terminated = terminates.then(|| self.core.clone());
        if let Err(err) = self.core.connection.send_stream_message(frame, completion, terminated) {
            log::debug!("continuation: send on stream {} failed: {err}", self.core.stream_id());
        }
        future
    }

    pub fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::SeqCst)
    }

    pub fn is_activated(&self) -> bool {
        self.core.activated.load(Ordering::SeqCst)
    }

    /// `None` until the continuation has been activated.
    pub fn stream_id(&self) -> Option<i32> {
        self.is_activated().then(|| self.core.stream_id()).filter(|id| *id != 0)
    }

    /// Why the continuation closed, once it has.
    pub fn close_reason(&self) -> Option<RpcError> {
        *self.core.close_reason.lock().expect("continuation mutex poisoned")
    }

    /// Set by an owner about to drop its handler; runs on the reader task
    /// if the stream closes after the handler is gone.
    pub(crate) fn set_orphaned_close(&self, on_closed: OrphanedClose) {
        *self.core.orphaned_close.lock().expect("continuation mutex poisoned") = Some(on_closed);
    }
}

impl Drop for Continuation {
    fn drop(&mut self) {
        if !self.is_activated() {
            return;
        }
        let stream_id = self.core.stream_id();
        if !self.core.closed.swap(true, Ordering::SeqCst) {
            let frame = Frame::new(
                stream_id,
                Message::new(MessageType::ApplicationMessage)
                    .with_flags(MessageFlags::TERMINATE_STREAM),
            );
            let (completion, _flushed) = FlushCompletion::new(None);
            let terminated = Some(self.core.clone());
            let _ = self.core.connection.send_stream_message(frame, completion, terminated);
        }
        self.core.connection.forget_stream(stream_id, &self.core);
    }
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Continuation")
            .field("stream_id", &self.stream_id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ContinuationCore {
    pub(crate) fn set_stream_id(&self, stream_id: i32) {
        self.stream_id.store(stream_id, Ordering::SeqCst);
    }

    fn stream_id(&self) -> i32 {
        self.stream_id.load(Ordering::SeqCst)
    }

    pub(crate) fn deliver(&self, message: &Message) {
        if self.closed.load(Ordering::SeqCst) || self.closed_notified.load(Ordering::SeqCst) {
            log::trace!(
                "continuation: dropping {} on closed stream {}",
                message.message_type,
                self.stream_id()
            );
            return;
        }
        if let Some(handler) = self.handler.upgrade() {
            handler.on_continuation_message(message);
        }
    }

    /// Marks the stream closed and tells the handler, once.
    pub(crate) fn notify_closed(&self, reason: RpcError) {
        if self.closed_notified.swap(true, Ordering::SeqCst) {
            return;
        }
        self.closed.store(true, Ordering::SeqCst);
        {
            let mut close_reason = self.close_reason.lock().expect("continuation mutex poisoned");
            if close_reason.is_none() {
                *close_reason = Some(reason);
            }
        }
        let stream_id = self.stream_id();
        if stream_id != 0 {
            self.connection.forget_stream(stream_id, self);
        }
        log::debug!("continuation: stream {stream_id} closed ({reason})");
        // Upgraded under the lock: a failed upgrade means the owner's fallback is set.
        let (handler, orphaned) = {
            let mut orphaned = self.orphaned_close.lock().expect("continuation mutex poisoned");
            match self.handler.upgrade() {
                Some(handler) => (Some(handler), None),
                None => (None, orphaned.take()),
            }
        };
        if let Some(handler) = handler {
            handler.on_continuation_closed();
        } else if let Some(on_closed) = orphaned {
            on_closed();
        }
    }
}
