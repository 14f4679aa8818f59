mod stream;
mod typed;

pub use stream::{
    dispatch_stream_error, StreamError, StreamErrorHandler, StreamHandlerAdapter,
    StreamResponseHandler, TypedStreamHandler,
};
pub use typed::{Operation, OperationResult};

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use crate::connection::Connection;
use crate::continuation::{Continuation, ContinuationHandler};
use crate::error::{RpcError, RpcStatus};
use crate::header::Header;
use crate::message::{
    Message, MessageFlags, MessageType, CONTENT_TYPE_APPLICATION_JSON, CONTENT_TYPE_HEADER,
    SERVICE_MODEL_TYPE_HEADER,
};
use crate::model::OperationModelContext;
use crate::promise::{reject_flush, FlushFuture, OnMessageFlush, PromiseCell, PromiseFuture};
use crate::shape::{GenericOperationError, OperationError, Shape};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultType {
    OperationResponse,
    OperationError,
    RpcError,
}

/// Outcome of an operation's initial response.
#[derive(Debug)]
pub enum TaggedResult {
    Response(Box<dyn Shape>),
    OperationError(Box<dyn OperationError>),
    RpcError(RpcError),
}

impl TaggedResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Response(_))
    }

    pub fn result_type(&self) -> ResultType {
        match self {
            Self::Response(_) => ResultType::OperationResponse,
            Self::OperationError(_) => ResultType::OperationError,
            Self::RpcError(_) => ResultType::RpcError,
        }
    }

    pub fn operation_response(&self) -> Option<&dyn Shape> {
        match self {
            Self::Response(shape) => Some(shape.as_ref()),
            _ => None,
        }
    }

    pub fn operation_error(&self) -> Option<&dyn OperationError> {
        match self {
            Self::OperationError(err) => Some(err.as_ref()),
            _ => None,
        }
    }

    pub fn rpc_error(&self) -> Option<RpcError> {
        match self {
            Self::RpcError(err) => Some(*err),
            _ => None,
        }
    }
}

/// Resolves to the operation's initial response.
#[must_use = "futures do nothing unless polled"]
pub struct ResultFuture {
    inner: PromiseFuture<TaggedResult>,
}

impl Future for ResultFuture {
    type Output = TaggedResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().inner).poll(cx).map(|result| {
            result.unwrap_or(TaggedResult::RpcError(RpcError::new(RpcStatus::Uninitialized)))
        })
    }
}

/// One service call bound to its own continuation.
///
/// The first message received is the initial response; for streaming
/// operations every later message goes to the stream handler. Operations are
/// single-use: activating twice fails.
pub struct ClientOperation {
    core: Arc<OperationCore>,
}

struct OperationCore {
    context: Arc<OperationModelContext>,
    stream_handler: Option<Arc<dyn StreamResponseHandler>>,
    continuation: Continuation,
    message_count: AtomicU32,
    initial_response: PromiseCell<TaggedResult>,
    stream_closed: AtomicBool,
}

enum Decoded {
    Response(Box<dyn Shape>),
    Error(Box<dyn OperationError>),
}

impl ClientOperation {
    pub fn new(
        connection: &Connection,
        context: Arc<OperationModelContext>,
        stream_handler: Option<Arc<dyn StreamResponseHandler>>,
    ) -> Self {
        let core = Arc::new_cyclic(|weak: &Weak<OperationCore>| {
            let handler: Weak<dyn ContinuationHandler> = weak.clone();
            OperationCore {
                context,
                stream_handler,
                continuation: connection.new_stream(handler),
                message_count: AtomicU32::new(0),
                initial_response: PromiseCell::new(),
                stream_closed: AtomicBool::new(false),
            }
        });
        Self { core }
    }

    /// Serialises `request` and opens the stream with it.
    pub fn activate(&self, request: &dyn Shape, on_flush: Option<OnMessageFlush>) -> FlushFuture {
        let (headers, payload) = match self.core.encode(request) {
            Ok(encoded) => encoded,
            Err(err) => return reject_flush(on_flush, err),
        };
        self.core.continuation.activate(
            self.core.context.operation_name(),
            headers,
            Some(payload),
            MessageType::ApplicationMessage,
            MessageFlags::NONE,
            on_flush,
        )
    }

    /// Sends a further client message on an activated streaming operation.
    pub fn send_stream_message(
        &self,
        message: &dyn Shape,
        on_flush: Option<OnMessageFlush>,
    ) -> FlushFuture {
        let (headers, payload) = match self.core.encode(message) {
            Ok(encoded) => encoded,
            Err(err) => return reject_flush(on_flush, err),
        };
        self.core.continuation.send_message(
            headers,
            Some(payload),
            MessageType::ApplicationMessage,
            MessageFlags::NONE,
            on_flush,
        )
    }

    /// The initial response. Only the first call observes it; later calls
    /// resolve to an `Uninitialized` RPC error.
    pub fn get_result(&self) -> ResultFuture {
        ResultFuture { inner: self.core.initial_response.get_future() }
    }

    /// Terminates the stream.
    pub fn close(&self, on_flush: Option<OnMessageFlush>) -> FlushFuture {
        self.core.continuation.send_message(
            Vec::new(),
            None,
            MessageType::ApplicationMessage,
            MessageFlags::TERMINATE_STREAM,
            on_flush,
        )
    }

    pub fn message_count(&self) -> u32 {
        self.core.message_count.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.core.continuation.is_closed()
    }

    pub fn context(&self) -> &OperationModelContext {
        &self.core.context
    }
}

impl Drop for ClientOperation {
    fn drop(&mut self) {
        // The stream handler outlives the operation until the stream has closed.
        let Some(handler) = self.core.stream_handler.clone() else {
            return;
        };
        if self.core.stream_closed.load(Ordering::SeqCst) {
            return;
        }
        let operation = self.core.operation_name().to_owned();
        self.core.continuation.set_orphaned_close(Box::new(move || {
            log::debug!("operation {operation}: stream closed after the operation was dropped");
            handler.on_stream_closed();
        }));
    }
}

impl std::fmt::Debug for ClientOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOperation")
            .field("operation", &self.core.context.operation_name())
            .field("continuation", &self.core.continuation)
            .field("message_count", &self.message_count())
            .finish()
    }
}

impl OperationCore {
    fn operation_name(&self) -> &str {
        self.context.operation_name()
    }

    fn encode(&self, shape: &dyn Shape) -> Result<(Vec<Header>, Vec<u8>), RpcError> {
        let payload = shape.to_payload().map_err(|err| {
            log::error!(
                "operation {}: cannot serialise {}: {err}",
                self.operation_name(),
                shape.model_name()
            );
            RpcError::new(RpcStatus::AllocationError)
        })?;
        let headers = vec![
            Header::string(CONTENT_TYPE_HEADER, CONTENT_TYPE_APPLICATION_JSON),
            Header::string(SERVICE_MODEL_TYPE_HEADER, shape.model_name()),
        ];
        Ok((headers, payload))
    }

    fn decode(&self, message: &Message, count: u32) -> Result<Decoded, RpcError> {
        let model_name = message.header(SERVICE_MODEL_TYPE_HEADER).and_then(Header::value_as_str);
        let Some(model_name) = model_name else {
            log::warn!(
                "operation {}: message without {SERVICE_MODEL_TYPE_HEADER}",
                self.operation_name()
            );
            return Err(RpcError::new(RpcStatus::UnmappedData));
        };
        let content_type = message.header(CONTENT_TYPE_HEADER).and_then(Header::value_as_str);
        if content_type != Some(CONTENT_TYPE_APPLICATION_JSON) {
            log::warn!(
                "operation {}: unsupported content type {content_type:?}",
                self.operation_name()
            );
            return Err(RpcError::new(RpcStatus::UnsupportedContentType));
        }

        match message.message_type {
            MessageType::ApplicationMessage => {
                self.decode_response(model_name, message.payload(), count).map(Decoded::Response)
            }
            MessageType::ApplicationError => {
                self.decode_error(model_name, message.payload()).map(Decoded::Error)
            }
            other => {
                log::warn!("operation {}: unexpected {other} on stream", self.operation_name());
                Err(RpcError::new(RpcStatus::UnknownProtocolMessage))
            }
        }
    }

    fn decode_response(
        &self,
        model_name: &str,
        payload: &[u8],
        count: u32,
    ) -> Result<Box<dyn Shape>, RpcError> {
        let expected = if count == 1 {
            Some(self.context.initial_response_model_name())
        } else {
            self.context.streaming_response_model_name()
        };
        if expected != Some(model_name) {
            log::warn!(
                "operation {}: expected {expected:?} but received {model_name}",
                self.operation_name()
            );
            return Err(RpcError::new(RpcStatus::UnmappedData));
        }

        let decoded = if count == 1 {
            self.context.allocate_initial_response_from_payload(payload)
        } else {
            match self.context.allocate_streaming_response_from_payload(payload) {
                Some(decoded) => decoded,
                None => return Err(RpcError::new(RpcStatus::UnmappedData)),
            }
        };
        decoded.map_err(|err| {
            log::error!("operation {}: {err}", self.operation_name());
            RpcError::new(RpcStatus::UnmappedData)
        })
    }

    fn decode_error(
        &self,
        model_name: &str,
        payload: &[u8],
    ) -> Result<Box<dyn OperationError>, RpcError> {
        let service_model = self.context.service_model();
        let error = match service_model.allocate_operation_error_from_payload(model_name, payload) {
            Some(Ok(error)) => error,
            Some(Err(err)) => {
                log::error!("operation {}: {err}", self.operation_name());
                return Err(RpcError::new(RpcStatus::UnmappedData));
            }
            None => {
                log::debug!(
                    "operation {}: no error model registered for {model_name}",
                    self.operation_name()
                );
                Box::new(GenericOperationError::from_payload(model_name, payload))
            }
        };
        if let Some(text) = error.message() {
            log::error!(
                "operation {}: server returned {model_name}: {text}",
                self.operation_name()
            );
        }
        Ok(error)
    }

    fn on_initial_message(&self, decoded: Result<Decoded, RpcError>, peer_terminated: bool) {
        match decoded {
            Ok(Decoded::Response(shape)) => {
                self.initial_response.set_value(TaggedResult::Response(shape));
            }
            Ok(Decoded::Error(error)) => {
                self.initial_response.set_value(TaggedResult::OperationError(error));
                if !peer_terminated {
                    self.close_stream();
                }
            }
            Err(err) => {
                self.initial_response.set_value(TaggedResult::RpcError(err));
            }
        }
    }

    fn on_stream_message(&self, decoded: Result<Decoded, RpcError>, peer_terminated: bool) {
        let Some(handler) = &self.stream_handler else {
            log::warn!(
                "operation {}: unexpected message after the initial response",
                self.operation_name()
            );
            if !peer_terminated {
                self.close_stream();
            }
            return;
        };
        let terminate = match decoded {
            Ok(Decoded::Response(event)) => {
                handler.on_stream_event(event);
                false
            }
            Ok(Decoded::Error(error)) => handler.on_stream_error(StreamError::Operation(error)),
            Err(err) => handler.on_stream_error(StreamError::Rpc(err)),
        };
        if terminate && !peer_terminated {
            self.close_stream();
        }
    }

    fn close_stream(&self) {
        let _ = self.continuation.send_message(
            Vec::new(),
            None,
            MessageType::ApplicationMessage,
            MessageFlags::TERMINATE_STREAM,
            None,
        );
    }
}

impl ContinuationHandler for OperationCore {
    fn on_continuation_message(&self, message: &Message) {
        // A bare terminate carries no model; the close notification settles the result.
        if message.terminates_stream()
            && message.header(SERVICE_MODEL_TYPE_HEADER).is_none()
            && message.payload().is_empty()
        {
            return;
        }
        let count = self.message_count.fetch_add(1, Ordering::SeqCst) + 1;
        let decoded = self.decode(message, count);
        if count == 1 {
            self.on_initial_message(decoded, message.terminates_stream());
        } else {
            self.on_stream_message(decoded, message.terminates_stream());
        }
    }

    fn on_continuation_closed(&self) {
        let reason = self
            .continuation
            .close_reason()
            .unwrap_or(RpcError::new(RpcStatus::ContinuationClosed));
        if self.initial_response.set_value(TaggedResult::RpcError(reason)) {
            log::debug!("operation {}: closed before a response ({reason})", self.operation_name());
        }
        if let Some(handler) = &self.stream_handler {
            if !self.stream_closed.swap(true, Ordering::SeqCst) {
                handler.on_stream_closed();
            }
        }
    }
}
