//! Asynchronous HTTP/1.x client.
//!
//! [`HttpClient`] is a cheap handle over a spawned driver task that owns
//! the connection. Requests go in over a channel, outcomes come back on
//! per-request oneshot channels, so any number of callers can share one
//! client. Connection lifecycle (dialing, keep-alive reuse, reconnecting
//! after a drop) lives entirely inside the driver; the ordering rules live
//! in [`ClientState`].

mod state;

pub use state::{ClientConfig, ClientEvent, ClientState, RequestId};

use std::collections::HashMap;
use std::io;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::{Request, Response};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::protocol::{ClientError, ParseError};

/// Dials the transport the client runs over.
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    type IO: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn connect(&self) -> io::Result<Self::IO>;
}

/// Connects over plain TCP to a fixed address.
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Connect for TcpConnector {
    type IO = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        TcpStream::connect(&self.addr).await
    }
}

struct Submit {
    request: Request<Bytes>,
    reply: oneshot::Sender<Result<Response<Bytes>, ClientError>>,
}

/// Handle to a client driver task. Cloneable; dropping the last handle
/// lets the driver finish outstanding requests and exit.
#[derive(Clone)]
pub struct HttpClient {
    tx: mpsc::Sender<Submit>,
}

impl HttpClient {
    pub fn new<C: Connect>(connector: C, config: ClientConfig) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let driver = ClientDriver { connector, state: ClientState::new(config), rx, pending: HashMap::new() };
        tokio::spawn(driver.run());
        Self { tx }
    }

    /// Send one request and await its response.
    pub async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, ClientError> {
        let (reply, outcome) = oneshot::channel();
        self.tx.send(Submit { request, reply }).await.map_err(|_| ClientError::ClientGone)?;
        outcome.await.map_err(|_| ClientError::ClientGone)?
    }
}

struct ClientDriver<C: Connect> {
    connector: C,
    state: ClientState,
    rx: mpsc::Receiver<Submit>,
    pending: HashMap<RequestId, oneshot::Sender<Result<Response<Bytes>, ClientError>>>,
}

impl<C: Connect> ClientDriver<C> {
    async fn run(mut self) {
        let mut conn: Option<C::IO> = None;
        let mut read_buf = BytesMut::with_capacity(8 * 1024);
        let mut accepting = true;

        loop {
            if self.state.wants_reconnect() {
                match self.connector.connect().await {
                    Ok(io) => {
                        debug!("connected");
                        conn = Some(io);
                        read_buf.clear();
                        self.state.on_connected();
                    }
                    Err(e) => {
                        warn!(cause = %e, "connect failed");
                        let kind = e.kind();
                        let msg = e.to_string();
                        let events = self.state.fail_all(|| ClientError::connect(io::Error::new(kind, msg.clone())));
                        self.dispatch_all(events);
                        continue;
                    }
                }
            }

            // write out everything the ordering policy admits
            let mut drop_conn = false;
            if let Some(io) = conn.as_mut() {
                loop {
                    match self.state.poll_transmit() {
                        Ok(Some(bytes)) => {
                            if let Err(e) = io.write_all(&bytes).await {
                                warn!(cause = %e, "write failed, dropping connection");
                                let events = self.state.on_disconnect();
                                self.dispatch_all(events);
                                drop_conn = true;
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(cause = %e, "request serialization failed");
                            let msg = e.to_string();
                            let events = self.state.fail_all(|| ClientError::Send {
                                source: crate::protocol::SendError::invalid_body(msg.clone()),
                            });
                            self.dispatch_all(events);
                            drop_conn = true;
                            break;
                        }
                    }
                }
            }
            if drop_conn {
                conn = None;
                continue;
            }

            if !accepting && self.state.is_idle() {
                // outstanding work finished, no more callers
                return;
            }

            tokio::select! {
                submit = self.rx.recv(), if accepting => match submit {
                    Some(Submit { request, reply }) => {
                        let id = self.state.submit(request);
                        self.pending.insert(id, reply);
                    }
                    None => accepting = false,
                },
                result = read_more(&mut conn, &mut read_buf) => match result {
                    Ok(0) => {
                        debug!("server closed the connection");
                        read_buf.clear();
                        let events = self.state.on_disconnect();
                        self.dispatch_all(events);
                        conn = None;
                    }
                    Ok(_) => match self.state.on_data(&mut read_buf) {
                        Ok(events) => {
                            self.dispatch_all(events);
                            if self.state.wants_close() {
                                let events = self.state.on_disconnect();
                                self.dispatch_all(events);
                                conn = None;
                            }
                        }
                        Err(e) => {
                            // the framing is unrecoverable, nothing behind
                            // it can be trusted
                            warn!(cause = %e, "protocol violation, failing all requests");
                            let msg = e.to_string();
                            let events = self.state.fail_all(|| ClientError::Protocol { source: ParseError::invalid_body(msg.clone()) });
                            self.dispatch_all(events);
                            conn = None;
                        }
                    },
                    Err(e) => {
                        warn!(cause = %e, "read failed, dropping connection");
                        read_buf.clear();
                        let events = self.state.on_disconnect();
                        self.dispatch_all(events);
                        conn = None;
                    }
                },
            }
        }
    }

    fn dispatch_all(&mut self, events: Vec<ClientEvent>) {
        for event in events {
            let (id, outcome) = match event {
                ClientEvent::Response(id, response) => (id, Ok(response)),
                ClientEvent::Failed(id, error) => (id, Err(error)),
            };
            if let Some(reply) = self.pending.remove(&id) {
                // the caller may have given up waiting
                let _ = reply.send(outcome);
            }
        }
    }
}

async fn read_more<IO: AsyncRead + Unpin>(conn: &mut Option<IO>, buf: &mut BytesMut) -> io::Result<usize> {
    match conn {
        Some(io) => io.read_buf(buf).await,
        // without a connection there is nothing to read; park until the
        // select's other branch makes progress
        None => std::future::pending().await,
    }
}
