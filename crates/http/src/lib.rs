//! An asynchronous HTTP/1.x toolkit: server loop, keep-alive client,
//! WebSocket handshake and server-sent events.
//!
//! Built on tokio and the [`strand_proto`] connection layer, this crate
//! covers the HTTP side of a duplex connection:
//!
//! - a per-connection server request loop ([`server::serve`]) with
//!   keep-alive, pipelined requests, `Expect: 100-continue`, gzip
//!   negotiation and protocol upgrades
//! - a shared [`client::HttpClient`] whose connection handling is a
//!   sans-io state machine ([`client::ClientState`]), configurable for
//!   keep-alive reuse and pipelining
//! - the WebSocket opening handshake ([`ws`]), compatible with the frame
//!   codec in `strand_proto::ws`
//! - server-sent events formatting over chunked transfer coding ([`sse`])
//!
//! Parsing is zero-copy where it matters: header names and values point
//! into the single frozen buffer the head arrived in.
//!
//! # Example
//!
//! ```no_run
//! use std::error::Error;
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use http::{Request, Response, StatusCode};
//! use tokio::net::TcpListener;
//! use tracing::{error, info, warn, Level};
//! use tracing_subscriber::FmtSubscriber;
//!
//! use strand_http::server::{make_handler, serve};
//!
//! #[tokio::main]
//! async fn main() {
//!     let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
//!     tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
//!
//!     info!(port = 8080, "start listening");
//!     let listener = match TcpListener::bind("127.0.0.1:8080").await {
//!         Ok(listener) => listener,
//!         Err(e) => {
//!             error!(cause = %e, "bind server error");
//!             return;
//!         }
//!     };
//!
//!     let handler = Arc::new(make_handler(hello_world));
//!     loop {
//!         let (stream, _remote_addr) = match listener.accept().await {
//!             Ok(stream_and_addr) => stream_and_addr,
//!             Err(e) => {
//!                 warn!(cause = %e, "failed to accept");
//!                 continue;
//!             }
//!         };
//!         let handler = handler.clone();
//!         tokio::spawn(async move {
//!             if let Err(e) = serve(stream, handler).await {
//!                 error!(cause = %e, "connection ended with error");
//!             }
//!         });
//!     }
//! }
//!
//! async fn hello_world(request: Request<Bytes>) -> Result<Response<Bytes>, Box<dyn Error + Send + Sync>> {
//!     info!(path = request.uri().path(), "incoming request");
//!     let response = Response::builder()
//!         .status(StatusCode::OK)
//!         .body(Bytes::from_static(b"Hello World!\r\n"))?;
//!     Ok(response)
//! }
//! ```
//!
//! # Limits
//!
//! - HTTP/1.0 and 1.1 only
//! - no TLS (terminate it in front, or swap the client's [`client::Connect`])
//! - at most 64 headers per message, 8KB per head
//! - chunked transfer coding is produced (SSE) but not consumed

pub mod client;
pub mod codec;
pub mod encoding;
pub mod protocol;
pub mod server;
pub mod sse;
pub mod ws;

mod utils;
pub(crate) use utils::ensure;
