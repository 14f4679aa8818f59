use crate::error::{RpcError, RpcStatus};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Invoked once a queued message has been handed to the transport, or failed to be.
pub type OnMessageFlush = Box<dyn FnOnce(Result<(), RpcError>) + Send + 'static>;

/// A value that can be fulfilled exactly once from any thread.
///
/// The first `set_value` wins; later values are discarded. The single
/// [`PromiseFuture`] observes the value, or `None` when the cell is dropped
/// without ever being fulfilled.
pub struct PromiseCell<T> {
    state: Mutex<PromiseState<T>>,
}

struct PromiseState<T> {
    fulfilled: bool,
    sender: Option<oneshot::Sender<T>>,
    receiver: Option<oneshot::Receiver<T>>,
}

impl<T> PromiseCell<T> {
    pub fn new() -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            state: Mutex::new(PromiseState {
                fulfilled: false,
                sender: Some(sender),
                receiver: Some(receiver),
            }),
        }
    }

    /// Returns `false` if the cell was already fulfilled.
    pub fn set_value(&self, value: T) -> bool {
        let mut state = self.state.lock().expect("promise mutex poisoned");
        if state.fulfilled {
            return false;
        }
        state.fulfilled = true;
        if let Some(sender) = state.sender.take() {
            // The future may already be gone; the cell still counts as fulfilled.
            let _ = sender.send(value);
        }
        true
    }

    pub fn is_fulfilled(&self) -> bool {
        self.state.lock().expect("promise mutex poisoned").fulfilled
    }

    /// Hands out the future. Only the first call observes the value.
    pub fn get_future(&self) -> PromiseFuture<T> {
        let receiver = self.state.lock().expect("promise mutex poisoned").receiver.take();
        PromiseFuture { receiver }
    }
}

impl<T> Default for PromiseCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for PromiseCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromiseCell").field("fulfilled", &self.is_fulfilled()).finish()
    }
}

#[must_use = "futures do nothing unless polled"]
pub struct PromiseFuture<T> {
    receiver: Option<oneshot::Receiver<T>>,
}

impl<T> Future for PromiseFuture<T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(receiver) = this.receiver.as_mut() else {
            return Poll::Ready(None);
        };
        match Pin::new(receiver).poll(cx) {
            Poll::Ready(result) => {
                this.receiver = None;
                Poll::Ready(result.ok())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Resolves when a message has been written, or with the reason it was not.
#[must_use = "futures do nothing unless polled"]
pub struct FlushFuture {
    inner: FlushInner,
}

enum FlushInner {
    Ready(Option<Result<(), RpcError>>),
    Pending(PromiseFuture<Result<(), RpcError>>),
}

impl FlushFuture {
    pub fn ready(result: Result<(), RpcError>) -> Self {
        Self { inner: FlushInner::Ready(Some(result)) }
    }

    pub(crate) fn from_promise(future: PromiseFuture<Result<(), RpcError>>) -> Self {
        Self { inner: FlushInner::Pending(future) }
    }
}

impl Future for FlushFuture {
    type Output = Result<(), RpcError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            FlushInner::Ready(result) => Poll::Ready(
                result.take().unwrap_or(Err(RpcError::new(RpcStatus::ConnectionClosed))),
            ),
            FlushInner::Pending(future) => Pin::new(future)
                .poll(cx)
                .map(|result| result.unwrap_or(Err(RpcError::new(RpcStatus::ConnectionClosed)))),
        }
    }
}

/// Completion side of a [`FlushFuture`]; dropping it reports `ConnectionClosed`.
pub(crate) struct FlushCompletion {
    promise: PromiseCell<Result<(), RpcError>>,
    callback: Option<OnMessageFlush>,
    done: bool,
}

impl FlushCompletion {
    pub(crate) fn new(callback: Option<OnMessageFlush>) -> (Self, FlushFuture) {
        let promise = PromiseCell::new();
        let future = FlushFuture::from_promise(promise.get_future());
        (Self { promise, callback, done: false }, future)
    }

    pub(crate) fn complete(mut self, result: Result<(), RpcError>) {
        self.finish(result);
    }

    fn finish(&mut self, result: Result<(), RpcError>) {
        if self.done {
            return;
        }
        self.done = true;
        if let Some(callback) = self.callback.take() {
            callback(result);
        }
        self.promise.set_value(result);
    }
}

impl Drop for FlushCompletion {
    fn drop(&mut self) {
        self.finish(Err(RpcError::new(RpcStatus::ConnectionClosed)));
    }
}

/// Runs the flush callback (if any) and returns an already-failed future.
pub(crate) fn reject_flush(callback: Option<OnMessageFlush>, err: RpcError) -> FlushFuture {
    if let Some(callback) = callback {
        callback(Err(err));
    }
    FlushFuture::ready(Err(err))
}
