//! Transport variants for reaching the local peer
//!
//! A connected transport turns raw socket traffic into logical messages and
//! back. The two variants are a closed tagged type selected at construction:
//!
//! - [`ipc`]: platform inter-process socket (named pipe / unix socket) with
//!   a binary opcode + length framing layer
//! - [`websocket`]: loopback WebSocket carrying one JSON document per text
//!   frame
//!
//! Connection lifecycle policy (timeouts, reconnects) lives in the session;
//! transports only surface close events with whatever detail the wire gave.

pub mod ipc;
pub mod websocket;

use crate::client::ClientConfig;
use crate::error::Result;
use crate::protocol::{IncomingMessage, OutgoingMessage};

/// Which transport a client uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// Named pipe on Windows, unix domain socket elsewhere
    #[default]
    LocalSocket,
    /// WebSocket on 127.0.0.1
    Loopback,
}

/// Close details surfaced to the session
#[derive(Debug, Clone, Default)]
pub struct CloseInfo {
    pub code: Option<u16>,
    pub reason: Option<String>,
}

/// An event produced by a connected transport
#[derive(Debug)]
pub enum TransportEvent {
    Message(IncomingMessage),
    Closed(CloseInfo),
}

/// A connected transport
pub(crate) enum Transport {
    LocalSocket(ipc::IpcTransport),
    Loopback(websocket::WsTransport),
}

impl Transport {
    /// Open the transport selected by the config
    ///
    /// `tries` selects the loopback port for reconnect attempts; the local
    /// socket probes its own id range internally.
    pub(crate) async fn connect(config: &ClientConfig, tries: u32) -> Result<Self> {
        match config.transport {
            TransportKind::LocalSocket => {
                Ok(Transport::LocalSocket(ipc::IpcTransport::connect(config).await?))
            }
            TransportKind::Loopback => Ok(Transport::Loopback(
                websocket::WsTransport::connect(config, tries).await?,
            )),
        }
    }

    pub(crate) fn kind(&self) -> TransportKind {
        match self {
            Transport::LocalSocket(_) => TransportKind::LocalSocket,
            Transport::Loopback(_) => TransportKind::Loopback,
        }
    }

    /// Next logical message or close event
    pub(crate) async fn recv(&mut self) -> Result<TransportEvent> {
        match self {
            Transport::LocalSocket(transport) => transport.recv().await,
            Transport::Loopback(transport) => transport.recv().await,
        }
    }

    pub(crate) async fn send(&mut self, message: &OutgoingMessage) -> Result<()> {
        match self {
            Transport::LocalSocket(transport) => transport.send(message).await,
            Transport::Loopback(transport) => transport.send(message).await,
        }
    }

    /// Graceful close, waiting for the peer's acknowledgement where the
    /// wire has one
    pub(crate) async fn close(&mut self) -> Result<()> {
        match self {
            Transport::LocalSocket(transport) => transport.close().await,
            Transport::Loopback(transport) => transport.close().await,
        }
    }
}
