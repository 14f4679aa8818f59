use std::sync::Arc;

use eventstream_rpc::transport::Connector;
use eventstream_rpc::{
    ConnectFuture, Connection, ConnectionConfig, ConnectionLifecycleHandler, Header,
    MessageAmendment, Operation, ServiceModel, SocketDomain, SocketKind, SocketOptions,
    StreamHandlerAdapter, TypedStreamHandler,
};

use crate::model::{
    echo_test_service_model, CauseServiceErrorRequest, CauseServiceErrorResponse,
    EchoMessageRequest, EchoMessageResponse, EchoStreamingMessage, EchoStreamingRequest,
    EchoStreamingResponse, EchoTestRpcContexts, GetAllCustomersRequest, GetAllCustomersResponse,
    GetAllProductsRequest, GetAllProductsResponse,
};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8033;
pub const ACCEPTED_CLIENT_NAME: &str = "accepted.testy_mc_testerson";

pub type EchoMessageOperation = Operation<EchoMessageRequest, EchoMessageResponse>;
pub type GetAllProductsOperation = Operation<GetAllProductsRequest, GetAllProductsResponse>;
pub type GetAllCustomersOperation = Operation<GetAllCustomersRequest, GetAllCustomersResponse>;
pub type CauseServiceErrorOperation =
    Operation<CauseServiceErrorRequest, CauseServiceErrorResponse>;
pub type EchoStreamOperation = Operation<EchoStreamingRequest, EchoStreamingResponse>;

/// Loopback IPv4 stream socket, announcing an accepted client name.
pub fn default_connection_config() -> ConnectionConfig {
    let mut socket_options = SocketOptions::default();
    socket_options.domain = SocketDomain::Ipv4;
    socket_options.kind = SocketKind::Stream;
    ConnectionConfig::new(DEFAULT_HOST, DEFAULT_PORT)
        .with_socket_options(socket_options)
        .with_connect_amendment(MessageAmendment::with_headers(vec![Header::string(
            "client-name",
            ACCEPTED_CLIENT_NAME,
        )]))
}

/// Typed client for the echo service.
pub struct EchoTestRpcClient {
    connection: Connection,
    config: ConnectionConfig,
    contexts: EchoTestRpcContexts,
}

impl EchoTestRpcClient {
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self::with_config(connector, default_connection_config())
    }

    pub fn with_config(connector: impl Connector + 'static, config: ConnectionConfig) -> Self {
        let service_model: Arc<ServiceModel> = Arc::new(echo_test_service_model());
        Self {
            connection: Connection::new(connector),
            config,
            contexts: EchoTestRpcContexts::new(service_model),
        }
    }

    pub fn connect(&self, handler: Arc<dyn ConnectionLifecycleHandler>) -> ConnectFuture {
        self.connection.connect(self.config.clone(), handler, None)
    }

    pub fn close(&self) {
        self.connection.close();
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_open()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn new_echo_message(&self) -> EchoMessageOperation {
        Operation::new(&self.connection, self.contexts.echo_message.clone(), None)
    }

    pub fn new_get_all_products(&self) -> GetAllProductsOperation {
        Operation::new(&self.connection, self.contexts.get_all_products.clone(), None)
    }

    pub fn new_get_all_customers(&self) -> GetAllCustomersOperation {
        Operation::new(&self.connection, self.contexts.get_all_customers.clone(), None)
    }

    pub fn new_cause_service_error(&self) -> CauseServiceErrorOperation {
        Operation::new(&self.connection, self.contexts.cause_service_error.clone(), None)
    }

    pub fn new_echo_stream_messages<H>(&self, handler: Arc<H>) -> EchoStreamOperation
    where
        H: TypedStreamHandler<Event = EchoStreamingMessage> + 'static,
    {
        Operation::new(
            &self.connection,
            self.contexts.echo_stream_messages.clone(),
            Some(StreamHandlerAdapter::new(handler).into_dyn()),
        )
    }

    pub fn new_cause_stream_service_to_error<H>(&self, handler: Arc<H>) -> EchoStreamOperation
    where
        H: TypedStreamHandler<Event = EchoStreamingMessage> + 'static,
    {
        Operation::new(
            &self.connection,
            self.contexts.cause_stream_service_to_error.clone(),
            Some(StreamHandlerAdapter::new(handler).into_dyn()),
        )
    }
}
