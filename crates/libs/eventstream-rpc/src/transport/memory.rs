//! In-process transport: frames travel over tokio channels.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Connector, FrameSink, FrameSource, Link};
use crate::config::ConnectionConfig;
use crate::error::TransportError;
use crate::message::Frame;

type Inbound = Result<Frame, TransportError>;

/// Creates a connected connector/listener pair.
///
/// Each `connect` produces one [`MemoryPeer`] on the listener side. Once the
/// listener is dropped further connects are refused.
pub fn memory_transport() -> (MemoryConnector, MemoryListener) {
    let (acceptor, pending) = mpsc::unbounded_channel();
    (MemoryConnector { acceptor }, MemoryListener { pending })
}

#[derive(Clone, Debug)]
pub struct MemoryConnector {
    acceptor: mpsc::UnboundedSender<MemoryPeer>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Link, TransportError> {
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        let peer =
            MemoryPeer { config: config.clone(), incoming: server_rx, outgoing: Some(server_tx) };
        self.acceptor
            .send(peer)
            .map_err(|_| TransportError::refused("memory listener is gone"))?;
        log::trace!("memory_transport: connected to {:?}", config.host_name);
        Ok(Link::new(MemorySink { tx: Some(client_tx) }, MemorySource { rx: client_rx }))
    }
}

#[derive(Debug)]
pub struct MemoryListener {
    pending: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Next connecting client; `None` once every connector is dropped.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.pending.recv().await
    }
}

/// Server side of one in-memory link.
#[derive(Debug)]
pub struct MemoryPeer {
    config: ConnectionConfig,
    incoming: mpsc::UnboundedReceiver<Frame>,
    outgoing: Option<mpsc::UnboundedSender<Inbound>>,
}

impl MemoryPeer {
    /// The configuration the client connected with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Next frame written by the client; `None` after the client closes.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.incoming.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Frame> {
        self.incoming.try_recv().ok()
    }

    pub fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.push(Ok(frame))
    }

    /// Makes the client's next read fail with `err`.
    pub fn fail(&self, err: TransportError) -> Result<(), TransportError> {
        self.push(Err(err))
    }

    /// Ends the link from the server side; the client sees a clean shutdown.
    pub fn close(&mut self) {
        self.outgoing = None;
    }

    fn push(&self, item: Inbound) -> Result<(), TransportError> {
        let Some(outgoing) = &self.outgoing else {
            return Err(TransportError::ConnectionClosed);
        };
        outgoing.send(item).map_err(|_| TransportError::ConnectionClosed)
    }
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<Frame>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        let Some(tx) = &self.tx else {
            return Err(TransportError::ConnectionClosed);
        };
        tx.send(frame).map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.rx.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }
}
