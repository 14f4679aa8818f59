use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use super::{ClientOperation, ResultType, StreamResponseHandler, TaggedResult};
use crate::connection::Connection;
use crate::error::{RpcError, RpcStatus};
use crate::model::OperationModelContext;
use crate::promise::{FlushFuture, OnMessageFlush};
use crate::shape::{downcast_shape, OperationError, Shape};

/// Typed outcome of an [`Operation`].
#[derive(Debug)]
pub enum OperationResult<R> {
    Response(R),
    OperationError(Box<dyn OperationError>),
    RpcError(RpcError),
}

impl<R: Shape> OperationResult<R> {
    pub fn from_tagged(result: TaggedResult) -> Self {
        match result {
            TaggedResult::Response(shape) => {
                let model_name = shape.model_name().to_owned();
                match downcast_shape::<R>(shape) {
                    Some(response) => Self::Response(*response),
                    None => {
                        log::error!("operation: response {model_name} has an unexpected type");
                        Self::RpcError(RpcError::new(RpcStatus::UnmappedData))
                    }
                }
            }
            TaggedResult::OperationError(err) => Self::OperationError(err),
            TaggedResult::RpcError(err) => Self::RpcError(err),
        }
    }
}

impl<R> OperationResult<R> {
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

    pub fn response(&self) -> Option<&R> {
        match self {
            Self::Response(response) => Some(response),
            _ => None,
        }
    }

    pub fn into_response(self) -> Option<R> {
        match self {
            Self::Response(response) => Some(response),
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

/// A [`ClientOperation`] with a fixed request and response type.
pub struct Operation<Req, Resp> {
    inner: ClientOperation,
    _models: PhantomData<fn(&Req) -> Resp>,
}

impl<Req: Shape, Resp: Shape> Operation<Req, Resp> {
    pub fn new(
        connection: &Connection,
        context: Arc<OperationModelContext>,
        stream_handler: Option<Arc<dyn StreamResponseHandler>>,
    ) -> Self {
        Self {
            inner: ClientOperation::new(connection, context, stream_handler),
            _models: PhantomData,
        }
    }

    pub fn activate(&self, request: &Req, on_flush: Option<OnMessageFlush>) -> FlushFuture {
        self.inner.activate(request, on_flush)
    }

    pub fn send_stream_message(
        &self,
        message: &dyn Shape,
        on_flush: Option<OnMessageFlush>,
    ) -> FlushFuture {
        self.inner.send_stream_message(message, on_flush)
    }

    pub fn get_result(&self) -> impl Future<Output = OperationResult<Resp>> + Send + 'static {
        let result = self.inner.get_result();
        async move { OperationResult::from_tagged(result.await) }
    }

    pub fn close(&self, on_flush: Option<OnMessageFlush>) -> FlushFuture {
        self.inner.close(on_flush)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn inner(&self) -> &ClientOperation {
        &self.inner
    }
}

impl<Req, Resp> std::fmt::Debug for Operation<Req, Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.inner, f)
    }
}
