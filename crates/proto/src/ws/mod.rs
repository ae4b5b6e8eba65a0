//! WebSocket framing, [RFC 6455].
//!
//! [`WsFrameCodec`] speaks the wire format (§5): header bits, extended
//! lengths, masking. [`WsAdapter`] layers message semantics on top:
//! fragmentation reassembly, ping/pong, close handshake and an optional
//! idle keepalive. The HTTP upgrade handshake itself lives with the HTTP
//! stack, not here.
//!
//! [RFC 6455]: https://tools.ietf.org/html/rfc6455

mod adapter;
mod codec;
mod frame;

pub use adapter::{MessageKind, WsAdapter, WsConfig};
pub use codec::{DEFAULT_MAX_PAYLOAD, WsFrameCodec};
pub use frame::{Frame, Opcode, apply_mask, close_code};
