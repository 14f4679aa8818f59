//! Client engine for event-stream RPC.
//!
//! One [`Connection`] carries many concurrent operations. Each operation gets
//! its own [`Continuation`] (a logical stream), sends one request, receives an
//! initial response, and for streaming operations keeps receiving events until
//! either side terminates the stream.
//!
//! - [`Connection`]: CONNECT handshake, ping, demultiplexing, shutdown
//! - [`Continuation`]: per-stream send/receive
//! - [`ClientOperation`] / [`Operation`]: request/response correlation
//! - [`ServiceModel`] / [`OperationModelContext`]: model name registries
//! - [`transport`]: the seam to whatever moves frames

pub mod config;
mod connection;
mod continuation;
pub mod error;
pub mod header;
mod lifecycle;
pub mod message;
mod model;
mod operation;
pub mod promise;
pub mod shape;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::{ConnectionConfig, SocketDomain, SocketKind, SocketOptions, TlsOptions};
pub use connection::{
    ConnectFuture, ConnectMessageAmender, Connection, ConnectionLifecycleHandler,
    DefaultLifecycleHandler,
};
pub use continuation::{Continuation, ContinuationHandler};
pub use error::{RpcError, RpcStatus, ShapeError, TransportError};
pub use header::{find_header, Header, HeaderValue, MessageAmendment};
pub use lifecycle::ConnectionState;
pub use message::{Frame, Message, MessageFlags, MessageType};
pub use model::{OperationModelContext, ServiceModel};
pub use operation::{
    dispatch_stream_error, ClientOperation, Operation, OperationResult, ResultFuture, ResultType,
    StreamError, StreamErrorHandler, StreamHandlerAdapter, StreamResponseHandler, TaggedResult,
    TypedStreamHandler,
};
pub use promise::{FlushFuture, OnMessageFlush, PromiseCell, PromiseFuture};
pub use shape::{
    json_error_factory, json_shape_factory, ErrorFactory, GenericOperationError, JsonModel,
    OperationError, Shape, ShapeFactory,
};
