//! Sans-io core of the HTTP client.
//!
//! [`ClientState`] holds the request queue and the in-flight window and
//! decides, from configuration alone, when the next request may go on the
//! wire. It never touches a socket: the driver feeds it received bytes and
//! writes out whatever [`ClientState::poll_transmit`] produces, which keeps
//! the ordering rules testable without any IO.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use http::{HeaderValue, Request, Response, Version, header};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::codec::{RequestEncoder, ResponseDecoder};
use crate::protocol::{ClientError, Message, PayloadItem, ResponseHead};

/// Correlates a submitted request with its eventual outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    /// Reuse the connection for consecutive requests.
    pub keep_alive: bool,
    /// Send the next request before the previous response arrived.
    /// Responses still come back in request order.
    pub pipelining: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { keep_alive: true, pipelining: false }
    }
}

/// Outcome of one submitted request.
#[derive(Debug)]
pub enum ClientEvent {
    Response(RequestId, Response<Bytes>),
    Failed(RequestId, ClientError),
}

pub struct ClientState {
    config: ClientConfig,
    encoder: RequestEncoder,
    decoder: ResponseDecoder,
    queue: VecDeque<(RequestId, Request<Bytes>)>,
    /// Requests written to the wire, oldest first. HTTP/1.x has no
    /// multiplexing, so the front entry owns the response being decoded.
    inflight: VecDeque<RequestId>,
    /// Head of the response currently streaming in.
    current_head: Option<ResponseHead>,
    body: BytesMut,
    next_id: u64,
    /// Requests put on the wire, across all connections. Monotonic.
    sent: u64,
    /// Completions delivered, success or failure. Never exceeds `sent`.
    received: u64,
    requests_on_conn: u64,
    connected: bool,
    close_pending: bool,
}

impl ClientState {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            encoder: RequestEncoder,
            decoder: ResponseDecoder::new(),
            queue: VecDeque::new(),
            inflight: VecDeque::new(),
            current_head: None,
            body: BytesMut::new(),
            next_id: 0,
            sent: 0,
            received: 0,
            requests_on_conn: 0,
            connected: false,
            close_pending: false,
        }
    }

    /// Enqueue a request and hand back its correlation id.
    pub fn submit(&mut self, request: Request<Bytes>) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        self.queue.push_back((id, request));
        id
    }

    /// Nothing queued and every request put on the wire has completed.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.sent == self.received
    }

    /// Requests put on the wire so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Completions delivered so far (responses and failures both count).
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Whether a fresh connection should be dialed.
    pub fn wants_reconnect(&self) -> bool {
        !self.connected && !self.queue.is_empty()
    }

    /// Whether the driver should drop the connection once no response is
    /// in flight.
    pub fn wants_close(&self) -> bool {
        self.close_pending && self.inflight.is_empty()
    }

    /// Whether the ordering policy admits another request right now.
    pub fn can_send(&self) -> bool {
        if !self.connected || self.close_pending {
            return false;
        }
        match (self.config.keep_alive, self.config.pipelining) {
            // one request per connection, ever
            (false, _) => self.requests_on_conn == 0 && self.inflight.is_empty(),
            // wait for the previous response before sending the next
            (true, false) => self.inflight.is_empty(),
            (true, true) => true,
        }
    }

    pub fn on_connected(&mut self) {
        self.connected = true;
        self.close_pending = false;
        self.requests_on_conn = 0;
        self.decoder = ResponseDecoder::new();
        self.current_head = None;
        self.body.clear();
    }

    /// Serialize the next admissible request, if any.
    pub fn poll_transmit(&mut self) -> Result<Option<Bytes>, ClientError> {
        if !self.can_send() {
            return Ok(None);
        }
        let Some((id, mut request)) = self.queue.pop_front() else {
            return Ok(None);
        };

        if !self.config.keep_alive {
            request.headers_mut().insert(header::CONNECTION, HeaderValue::from_static("close"));
        }

        // registered before encoding so a serialization failure still
        // surfaces through fail_all
        self.inflight.push_back(id);
        self.sent += 1;
        self.requests_on_conn += 1;

        let mut dst = BytesMut::new();
        self.encoder.encode(request, &mut dst)?;
        trace!(id = ?id, len = dst.len(), "request serialized");
        Ok(Some(dst.freeze()))
    }

    /// Feed bytes read from the connection; returns the completed outcomes.
    ///
    /// A decode error is a protocol violation: the caller must treat the
    /// connection and every outstanding request as lost via [`fail_all`].
    ///
    /// [`fail_all`]: ClientState::fail_all
    pub fn on_data(&mut self, src: &mut BytesMut) -> Result<Vec<ClientEvent>, ClientError> {
        let mut events = Vec::new();
        while let Some(message) = self.decoder.decode(src)? {
            if let Some(event) = self.absorb(message)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// The connection is gone. An unbounded body that was streaming in is
    /// completed by the EOF; everything else in flight has failed. Queued
    /// requests stay queued for the next connection.
    pub fn on_disconnect(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();

        let mut leftover = BytesMut::new();
        loop {
            match self.decoder.decode_eof(&mut leftover) {
                Ok(Some(message)) => match self.absorb(message) {
                    Ok(Some(event)) => events.push(event),
                    Ok(None) => continue,
                    Err(_) => break,
                },
                Ok(None) => break,
                Err(_) => break,
            }
            if self.decoder.is_between_messages() {
                break;
            }
        }

        while let Some(id) = self.inflight.pop_front() {
            self.received += 1;
            events.push(ClientEvent::Failed(id, ClientError::Disconnected));
        }
        self.connected = false;
        self.current_head = None;
        self.body.clear();
        events
    }

    /// Fail every outstanding and queued request with copies of `error`.
    pub fn fail_all(&mut self, make_error: impl Fn() -> ClientError) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Some(id) = self.inflight.pop_front() {
            self.received += 1;
            events.push(ClientEvent::Failed(id, make_error()));
        }
        while let Some((id, _)) = self.queue.pop_front() {
            events.push(ClientEvent::Failed(id, make_error()));
        }
        self.connected = false;
        events
    }

    fn absorb(&mut self, message: Message<(ResponseHead, crate::protocol::PayloadSize)>) -> Result<Option<ClientEvent>, ClientError> {
        match message {
            Message::Header((head, _size)) => {
                self.current_head = Some(head);
                Ok(None)
            }
            Message::Payload(PayloadItem::Chunk(chunk)) => {
                self.body.extend_from_slice(&chunk);
                Ok(None)
            }
            Message::Payload(PayloadItem::Eof) => {
                let head = self
                    .current_head
                    .take()
                    .ok_or_else(|| ClientError::Protocol { source: crate::protocol::ParseError::invalid_body("body completed without a response head") })?;
                let id = self
                    .inflight
                    .pop_front()
                    .ok_or_else(|| ClientError::Protocol { source: crate::protocol::ParseError::invalid_body("response arrived with no request in flight") })?;

                if response_closes(&head) || !self.config.keep_alive {
                    self.close_pending = true;
                }
                self.received += 1;
                debug_assert!(self.received <= self.sent);

                let body = std::mem::take(&mut self.body).freeze();
                let response = head.into_inner().map(|()| body);
                trace!(id = ?id, status = %response.status(), "response completed");
                Ok(Some(ClientEvent::Response(id, response)))
            }
        }
    }
}

/// Whether the server signalled it will close the connection after this
/// response.
fn response_closes(head: &ResponseHead) -> bool {
    let connection = head.headers().get(header::CONNECTION).and_then(|v| v.to_str().ok());
    match head.version() {
        Version::HTTP_10 => !connection.is_some_and(|v| has_token(v, "keep-alive")),
        _ => connection.is_some_and(|v| has_token(v, "close")),
    }
}

fn has_token(value: &str, token: &str) -> bool {
    value.split(',').any(|t| t.trim().eq_ignore_ascii_case(token))
}
