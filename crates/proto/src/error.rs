use std::io;
use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors raised by the connection layer and the frame codecs.
///
/// Transport failures and protocol violations are both fatal for the
/// connection they occur on; partial input is never an error and is
/// reported as "need more data" by the decoders instead.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("protocol violation: {reason}")]
    Protocol { reason: String },

    #[error("timed out: {reason}")]
    Timeout { reason: String },

    #[error("connection is {state:?}, cannot send")]
    NotConnected { state: ConnectionState },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ProtoError {
    pub fn protocol<S: ToString>(reason: S) -> Self {
        Self::Protocol { reason: reason.to_string() }
    }

    pub fn timeout<S: ToString>(reason: S) -> Self {
        Self::Timeout { reason: reason.to_string() }
    }

    pub fn not_connected(state: ConnectionState) -> Self {
        Self::NotConnected { state }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    /// Whether this error was raised by a peer violating the wire protocol,
    /// as opposed to a transport failure.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}
