//! A layered, composable duplex-connection framework and the frame codecs
//! built on it.
//!
//! The crate has three layers:
//!
//! - [`connection`]: the minimal bidirectional byte-stream contract — an
//!   ordered outbound queue, a connection-state enum, four lifecycle
//!   events — plus the [`connection::Adapter`] trait for protocol layers
//!   that transform bytes in one or both directions, and the
//!   [`connection::ConnectionDriver`] that binds a chain of adapters to a
//!   tokio byte stream from a single owning task.
//! - [`codec::chunked`]: HTTP chunked transfer coding (RFC 7230 §4.1) as
//!   an incremental encoder/decoder pair and as adapters.
//! - [`ws`]: the WebSocket frame codec (RFC 6455) with masking,
//!   fragmentation reassembly, control-frame handling and a ping/pong
//!   idle-keepalive adapter.
//!
//! All decoders are pull-incremental: arbitrary input fragmentation is the
//! normal case, and "not enough bytes yet" is reported as `Ok(None)`,
//! never as an error.
//!
//! # Example
//!
//! ```no_run
//! use strand_proto::connection::{AdapterChain, ConnectionCtl, ConnectionDriver, ConnectionHandler, SendPriority};
//! use strand_proto::ws::{WsAdapter, WsConfig};
//! use bytes::Bytes;
//!
//! struct EchoHandler;
//!
//! impl ConnectionHandler for EchoHandler {
//!     fn on_data(&mut self, data: Bytes, conn: &mut ConnectionCtl) {
//!         conn.send(data, SendPriority::Normal);
//!     }
//! }
//!
//! # async fn serve(stream: tokio::net::TcpStream) -> Result<(), strand_proto::ProtoError> {
//! let chain = AdapterChain::new().with(WsAdapter::new(WsConfig::server()));
//! let reason = ConnectionDriver::new(stream, chain, EchoHandler).run().await?;
//! println!("connection ended: {reason}");
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod connection;
pub mod ws;

mod error;
pub use error::ProtoError;
