//! Boundary between the RPC engine and whatever moves frames on the wire.
//!
//! The engine never encodes bytes itself. A [`Connector`] turns a
//! [`ConnectionConfig`] into a [`Link`]: a sink the writer task drains
//! outbound frames into and a source the reader task pulls inbound frames from.

pub mod memory;

use async_trait::async_trait;

use crate::config::ConnectionConfig;
use crate::error::TransportError;
use crate::message::Frame;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish the socket (and TLS, if configured).
    async fn connect(&self, config: &ConnectionConfig) -> Result<Link, TransportError>;
}

#[async_trait]
pub trait FrameSink: Send {
    /// Resolves once the frame has been handed to the wire.
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError>;

    async fn close(&mut self);
}

#[async_trait]
pub trait FrameSource: Send {
    /// `Ok(None)` means the peer shut the link down cleanly.
    async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError>;
}

pub struct Link {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

impl Link {
    pub fn new(sink: impl FrameSink + 'static, source: impl FrameSource + 'static) -> Self {
        Self { sink: Box::new(sink), source: Box::new(source) }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}
