use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use eventstream_rpc::{
    ConnectionLifecycleHandler, Header, OperationError, RpcError, StreamErrorHandler,
    TypedStreamHandler,
};

use crate::model::{EchoStreamingMessage, ServiceError};

/// Records every connection lifecycle callback.
#[derive(Debug, Default)]
pub struct LifecycleRecorder {
    connects: AtomicUsize,
    disconnects: Mutex<Vec<Result<(), RpcError>>>,
    errors: Mutex<Vec<RpcError>>,
    pings: Mutex<Vec<(Vec<Header>, Option<Vec<u8>>)>>,
}

impl LifecycleRecorder {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> Vec<Result<(), RpcError>> {
        self.disconnects.lock().expect("lifecycle recorder mutex poisoned").clone()
    }

    pub fn errors(&self) -> Vec<RpcError> {
        self.errors.lock().expect("lifecycle recorder mutex poisoned").clone()
    }

    pub fn pings(&self) -> Vec<(Vec<Header>, Option<Vec<u8>>)> {
        self.pings.lock().expect("lifecycle recorder mutex poisoned").clone()
    }
}

impl ConnectionLifecycleHandler for LifecycleRecorder {
    fn on_connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disconnect(&self, status: Result<(), RpcError>) {
        self.disconnects.lock().expect("lifecycle recorder mutex poisoned").push(status);
    }

    fn on_error(&self, error: RpcError) -> bool {
        self.errors.lock().expect("lifecycle recorder mutex poisoned").push(error);
        true
    }

    fn on_ping(&self, headers: &[Header], payload: Option<&[u8]>) {
        let ping = (headers.to_vec(), payload.map(<[u8]>::to_vec));
        self.pings.lock().expect("lifecycle recorder mutex poisoned").push(ping);
    }
}

/// Collects the events and errors of an echo stream.
#[derive(Debug, Default)]
pub struct StreamRecorder {
    events: Mutex<Vec<EchoStreamingMessage>>,
    service_errors: Mutex<Vec<ServiceError>>,
    other_errors: AtomicUsize,
    closed: AtomicUsize,
}

impl StreamRecorder {
    pub fn events(&self) -> Vec<EchoStreamingMessage> {
        self.events.lock().expect("stream recorder mutex poisoned").clone()
    }

    pub fn service_errors(&self) -> Vec<ServiceError> {
        self.service_errors.lock().expect("stream recorder mutex poisoned").clone()
    }

    pub fn other_errors(&self) -> usize {
        self.other_errors.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl StreamErrorHandler for StreamRecorder {
    fn declared_error_models(&self) -> &[&'static str] {
        &["awstest#ServiceError"]
    }

    fn on_rpc_error(&self, _error: RpcError) -> bool {
        self.other_errors.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn on_declared_error(&self, error: &dyn OperationError) -> bool {
        match error.downcast_ref::<ServiceError>() {
            Some(service_error) => {
                let mut errors =
                    self.service_errors.lock().expect("stream recorder mutex poisoned");
                errors.push(service_error.clone());
                true
            }
            None => false,
        }
    }

    fn on_operation_error(&self, _error: &dyn OperationError) -> bool {
        self.other_errors.fetch_add(1, Ordering::SeqCst);
        true
    }
}

impl TypedStreamHandler for StreamRecorder {
    type Event = EchoStreamingMessage;

    fn on_stream_event(&self, event: EchoStreamingMessage) {
        self.events.lock().expect("stream recorder mutex poisoned").push(event);
    }

    fn on_stream_closed(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
