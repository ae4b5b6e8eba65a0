//! The duplex connection contract and the adapter chain built on it.
//!
//! A connection is a bidirectional byte stream with an ordered outbound
//! queue and four lifecycle events: connected, data received, disconnected
//! and send-buffer flushed. Protocol layers are written purely against this
//! contract as [`Adapter`]s that transform bytes in one or both directions
//! while forwarding lifecycle events, and compose into linear chains
//! (application → websocket codec → chunked codec → raw socket).
//!
//! All mutable parsing state of a connection is owned by the single task
//! driving it; adapters never run concurrently with each other.

mod chain;
mod driver;

pub use chain::{Adapter, AdapterChain, ChainOutput, Link};
pub use driver::{ConnectionCtl, ConnectionDriver};

use bytes::Bytes;

/// Lifecycle state of a duplex connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Ordering class for outbound writes.
///
/// `High` writes (control frames such as pong or close) are queued ahead of
/// `Normal` writes that have not yet been handed to the transport. Bytes
/// already written are never reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPriority {
    Normal,
    High,
}

/// Why a connection terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectKind {
    /// Closed locally by the application or a protocol layer.
    Local,
    /// Closed by the peer (EOF or close frame).
    Remote,
    /// Transport failure or protocol violation.
    Error,
    /// Keepalive timeout declared the peer dead.
    Timeout,
}

/// A disconnect kind paired with a human-readable reason.
#[derive(Debug, Clone)]
pub struct DisconnectReason {
    pub kind: DisconnectKind,
    pub message: String,
}

impl DisconnectReason {
    pub fn new<S: ToString>(kind: DisconnectKind, message: S) -> Self {
        Self { kind, message: message.to_string() }
    }

    pub fn local<S: ToString>(message: S) -> Self {
        Self::new(DisconnectKind::Local, message)
    }

    pub fn remote<S: ToString>(message: S) -> Self {
        Self::new(DisconnectKind::Remote, message)
    }

    pub fn error<S: ToString>(message: S) -> Self {
        Self::new(DisconnectKind::Error, message)
    }

    pub fn timeout<S: ToString>(message: S) -> Self {
        Self::new(DisconnectKind::Timeout, message)
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// The application-facing event callbacks of a connection.
///
/// Invoked by the [`ConnectionDriver`] from the connection's own task.
/// Sends and disconnects requested from within a callback are buffered on
/// the [`ConnectionCtl`] and applied after the callback returns, so calling
/// them is always safe and never recurses into the chain.
pub trait ConnectionHandler: Send {
    fn on_connected(&mut self, _conn: &mut ConnectionCtl) {}

    fn on_data(&mut self, data: Bytes, conn: &mut ConnectionCtl);

    fn on_disconnected(&mut self, _reason: &DisconnectReason) {}

    /// The outbound queue drained down to the transport.
    fn on_flushed(&mut self, _conn: &mut ConnectionCtl) {}
}
