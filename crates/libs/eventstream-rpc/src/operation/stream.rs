use std::sync::Arc;

use crate::error::RpcError;
use crate::shape::{downcast_shape, OperationError, Shape};

/// An error received on a stream after its initial response.
#[derive(Debug)]
pub enum StreamError {
    /// The message could not be decoded or the transport failed.
    Rpc(RpcError),
    /// The server sent a modeled error.
    Operation(Box<dyn OperationError>),
}

/// Receives the events of a streaming operation.
pub trait StreamResponseHandler: Send + Sync {
    fn on_stream_event(&self, event: Box<dyn Shape>);

    /// Return `true` to close the stream.
    fn on_stream_error(&self, _error: StreamError) -> bool {
        true
    }

    fn on_stream_closed(&self) {}
}

/// Per-kind stream error callbacks, tried from most to least specific.
///
/// Each returns `true` to close the stream.
pub trait StreamErrorHandler: Send + Sync {
    /// Error model names this stream declares.
    fn declared_error_models(&self) -> &[&'static str] {
        &[]
    }

    fn on_rpc_error(&self, _error: RpcError) -> bool {
        true
    }

    /// A declared error; returning `false` also offers it to `on_operation_error`.
    fn on_declared_error(&self, _error: &dyn OperationError) -> bool {
        false
    }

    fn on_operation_error(&self, _error: &dyn OperationError) -> bool {
        true
    }
}

/// Routes `error` to the most specific callback of `handler`.
///
/// RPC errors go to `on_rpc_error`. A declared error goes to
/// `on_declared_error` and, only if that returns `false`, on to
/// `on_operation_error`. Anything else goes straight to `on_operation_error`.
pub fn dispatch_stream_error<H: StreamErrorHandler + ?Sized>(
    handler: &H,
    error: &StreamError,
) -> bool {
    match error {
        StreamError::Rpc(err) => handler.on_rpc_error(*err),
        StreamError::Operation(err) => {
            let model_name = err.model_name();
            let declared = handler.declared_error_models().iter().any(|name| *name == model_name);
            if declared && handler.on_declared_error(err.as_ref()) {
                return true;
            }
            handler.on_operation_error(err.as_ref())
        }
    }
}

/// A stream handler that receives events as their concrete type.
pub trait TypedStreamHandler: StreamErrorHandler {
    type Event: Shape;

    fn on_stream_event(&self, event: Self::Event);

    fn on_stream_closed(&self) {}
}

/// Adapts a [`TypedStreamHandler`] to the erased [`StreamResponseHandler`].
pub struct StreamHandlerAdapter<H> {
    handler: Arc<H>,
}

impl<H: TypedStreamHandler> StreamHandlerAdapter<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }

    pub fn into_dyn(self) -> Arc<dyn StreamResponseHandler>
    where
        H: 'static,
    {
        Arc::new(self)
    }
}

impl<H: TypedStreamHandler> StreamResponseHandler for StreamHandlerAdapter<H> {
    fn on_stream_event(&self, event: Box<dyn Shape>) {
        let model_name = event.model_name().to_owned();
        match downcast_shape::<H::Event>(event) {
            Some(event) => TypedStreamHandler::on_stream_event(self.handler.as_ref(), *event),
            None => log::warn!("stream: dropping event of unexpected model {model_name}"),
        }
    }

    fn on_stream_error(&self, error: StreamError) -> bool {
        dispatch_stream_error(self.handler.as_ref(), &error)
    }

    fn on_stream_closed(&self) {
        TypedStreamHandler::on_stream_closed(self.handler.as_ref());
    }
}
