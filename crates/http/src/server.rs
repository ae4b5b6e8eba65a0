//! HTTP/1.x server request loop.
//!
//! [`serve`] owns one connection and runs the request/response cycle until
//! the peer disconnects, keep-alive ends, or a handler switches protocols.
//! Requests are decoded head-first, bodies accumulated, and the handler
//! called with a complete in-memory request.

use std::error::Error;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use http::{HeaderValue, Request, Response, StatusCode, Version, header};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{debug, error, warn};

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::encoding;
use crate::protocol::{HttpError, Message, ParseError, PayloadItem, PayloadSize, RequestHeader, SendError};

/// An async request handler.
///
/// Handlers receive the complete request with its body assembled and
/// produce a complete response. An `Err` is answered for the handler with
/// `500 Internal Server Error`; the connection stays usable.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Box<dyn Error + Send + Sync>>;
}

/// Adapts an async function into a [`Handler`].
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<Bytes>, Box<dyn Error + Send + Sync>>> + Send,
{
    async fn call(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Box<dyn Error + Send + Sync>> {
        (self.f)(request).await
    }
}

pub fn make_handler<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<Bytes>, Box<dyn Error + Send + Sync>>> + Send,
{
    HandlerFn { f }
}

/// How a connection left the request loop.
pub enum Served<S> {
    /// The connection is done: the peer closed it or keep-alive ended.
    Closed,
    /// A handler answered `101 Switching Protocols`. The stream is handed
    /// back together with any bytes read past the request head, so the next
    /// protocol can pick up exactly where HTTP stopped.
    Upgraded {
        io: S,
        leftover: Bytes,
    },
}

/// Combined codec for one server connection: requests in, responses out.
pub struct ServerCodec {
    decoder: RequestDecoder,
    encoder: ResponseEncoder,
}

impl ServerCodec {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Default for ServerCodec {
    fn default() -> Self {
        Self { decoder: RequestDecoder::new(), encoder: ResponseEncoder }
    }
}

impl Decoder for ServerCodec {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode(src)
    }
}

impl Encoder<Response<Bytes>> for ServerCodec {
    type Error = SendError;

    fn encode(&mut self, response: Response<Bytes>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encoder.encode(response, dst)
    }
}

/// Run the request loop on `io` until the connection is done.
///
/// Malformed requests are answered with a best-effort `500` before the
/// error is returned; request framing cannot be trusted afterwards, so the
/// connection always closes.
pub async fn serve<S, H>(io: S, handler: Arc<H>) -> Result<Served<S>, HttpError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Handler + ?Sized,
{
    let mut framed = Framed::new(io, ServerCodec::new());

    loop {
        let (head, payload_size) = match framed.next().await {
            None => return Ok(Served::Closed),
            Some(Ok(Message::Header(head))) => head,
            Some(Ok(Message::Payload(_))) => {
                return Err(ParseError::invalid_body("payload item outside a message body").into());
            }
            Some(Err(e)) => {
                warn!(cause = %e, "failed to parse request head");
                let _ = framed.send(error_response()).await;
                return Err(e.into());
            }
        };
        debug!(method = %head.method(), path = head.uri().path(), "incoming request");

        if !payload_size.is_empty() && expects_continue(&head) {
            framed.send(interim_continue(head.version())).await?;
        }

        let mut body = BytesMut::new();
        loop {
            match framed.next().await {
                None => {
                    warn!("connection closed before the request body completed");
                    return Ok(Served::Closed);
                }
                Some(Ok(Message::Payload(PayloadItem::Chunk(chunk)))) => body.extend_from_slice(&chunk),
                Some(Ok(Message::Payload(PayloadItem::Eof))) => break,
                Some(Ok(Message::Header(_))) => {
                    return Err(ParseError::invalid_body("header arrived in the middle of a body").into());
                }
                Some(Err(e)) => {
                    warn!(cause = %e, "failed to read request body");
                    let _ = framed.send(error_response()).await;
                    return Err(e.into());
                }
            }
        }

        let version = head.version();
        let keep_alive = connection_keep_alive(&head);
        let request = head.body(body.freeze());
        let request_headers = request.headers().clone();

        let mut response = match handler.call(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(cause = %e, "handler failed");
                error_response()
            }
        };

        if response.status() == StatusCode::SWITCHING_PROTOCOLS {
            framed.send(response).await?;
            let parts = framed.into_parts();
            return Ok(Served::Upgraded { io: parts.io, leftover: parts.read_buf.freeze() });
        }

        encoding::compress_if_accepted(&request_headers, &mut response);

        *response.version_mut() = version;
        if !keep_alive {
            response.headers_mut().insert(header::CONNECTION, HeaderValue::from_static("close"));
        } else if version == Version::HTTP_10 {
            // 1.0 clients need the persistence confirmed explicitly
            response.headers_mut().insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        }

        framed.send(response).await?;

        if !keep_alive {
            return Ok(Served::Closed);
        }
    }
}

/// Keep-alive per RFC 7230 §6.3: 1.1 persists unless the request says
/// `close`, 1.0 closes unless the request says `keep-alive`.
fn connection_keep_alive(head: &RequestHeader) -> bool {
    let connection = head.headers().get(header::CONNECTION).and_then(|v| v.to_str().ok());
    match head.version() {
        Version::HTTP_10 => connection.is_some_and(|v| has_token(v, "keep-alive")),
        _ => !connection.is_some_and(|v| has_token(v, "close")),
    }
}

fn has_token(value: &str, token: &str) -> bool {
    value.split(',').any(|t| t.trim().eq_ignore_ascii_case(token))
}

fn expects_continue(head: &RequestHeader) -> bool {
    head.headers()
        .get(header::EXPECT)
        .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"100-continue"))
}

fn interim_continue(version: Version) -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = StatusCode::CONTINUE;
    *response.version_mut() = version;
    response
}

fn error_response() -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
    use tokio::task::JoinHandle;

    use super::*;

    async fn echo(request: Request<Bytes>) -> Result<Response<Bytes>, Box<dyn Error + Send + Sync>> {
        let body = request.into_body();
        Ok(Response::builder().status(StatusCode::OK).body(body).unwrap())
    }

    fn spawn_echo_server(io: DuplexStream) -> JoinHandle<Result<Served<DuplexStream>, HttpError>> {
        tokio::spawn(serve(io, Arc::new(make_handler(echo))))
    }

    async fn read_until(io: &mut DuplexStream, needle: &str) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = io.read(&mut chunk).await.unwrap();
            assert!(n > 0, "eof before finding {needle:?}");
            buf.extend_from_slice(&chunk[..n]);
            let text = std::str::from_utf8(&buf).unwrap();
            if text.contains(needle) {
                return text.to_string();
            }
        }
    }

    #[tokio::test]
    async fn echoes_two_keep_alive_requests() {
        let (mut client, server) = duplex(4096);
        let task = spawn_echo_server(server);

        let first = indoc! {"
            POST /echo HTTP/1.1\r
            Host: a\r
            Content-Length: 5\r
            \r
            Hello"};
        client.write_all(first.as_bytes()).await.unwrap();
        let response = read_until(&mut client, "Hello").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));

        client.write_all(b"POST /echo HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\n\r\nagain").await.unwrap();
        read_until(&mut client, "again").await;

        drop(client);
        assert!(matches!(task.await.unwrap().unwrap(), Served::Closed));
    }

    #[tokio::test]
    async fn pipelined_requests_are_answered_in_order() {
        let (mut client, server) = duplex(4096);
        let task = spawn_echo_server(server);

        let raw = "POST /a HTTP/1.1\r\nContent-Length: 3\r\n\r\none\
                   POST /b HTTP/1.1\r\nContent-Length: 3\r\n\r\ntwo";
        client.write_all(raw.as_bytes()).await.unwrap();

        let text = read_until(&mut client, "two").await;
        let one = text.find("one").unwrap();
        let two = text.find("two").unwrap();
        assert!(one < two);

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn expect_continue_gets_an_interim_response() {
        let (mut client, server) = duplex(4096);
        let task = spawn_echo_server(server);

        let head = indoc! {"
            POST /upload HTTP/1.1\r
            Host: a\r
            Expect: 100-continue\r
            Content-Length: 4\r
            \r
        "};
        client.write_all(head.as_bytes()).await.unwrap();
        let interim = read_until(&mut client, "\r\n\r\n").await;
        assert!(interim.starts_with("HTTP/1.1 100 Continue\r\n"));

        client.write_all(b"data").await.unwrap();
        let response = read_until(&mut client, "data").await;
        assert!(response.contains("200 OK"));

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn http10_closes_after_the_response() {
        let (mut client, server) = duplex(4096);
        let task = spawn_echo_server(server);

        client.write_all(b"GET / HTTP/1.0\r\nHost: a\r\n\r\n").await.unwrap();
        let mut all = String::new();
        client.read_to_string(&mut all).await.unwrap();
        assert!(all.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(all.contains("connection: close"));

        assert!(matches!(task.await.unwrap().unwrap(), Served::Closed));
    }

    #[tokio::test]
    async fn http10_keep_alive_is_echoed() {
        let (mut client, server) = duplex(4096);
        let task = spawn_echo_server(server);

        client.write_all(b"GET / HTTP/1.0\r\nHost: a\r\nConnection: keep-alive\r\n\r\n").await.unwrap();
        let response = read_until(&mut client, "\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(response.contains("connection: keep-alive"));

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn malformed_request_gets_500_and_close() {
        let (mut client, server) = duplex(4096);
        let task = spawn_echo_server(server);

        client.write_all(b"NOT AN HTTP REQUEST AT ALL\r\n\r\n").await.unwrap();
        let mut all = String::new();
        client.read_to_string(&mut all).await.unwrap();
        assert!(all.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));

        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn handler_error_is_answered_with_500() {
        async fn failing(_: Request<Bytes>) -> Result<Response<Bytes>, Box<dyn Error + Send + Sync>> {
            Err("boom".into())
        }
        let (mut client, server) = duplex(4096);
        let task = tokio::spawn(serve(server, Arc::new(make_handler(failing))));

        client.write_all(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n").await.unwrap();
        let response = read_until(&mut client, "\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 500"));

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn switching_protocols_hands_back_the_stream() {
        async fn upgrader(_: Request<Bytes>) -> Result<Response<Bytes>, Box<dyn Error + Send + Sync>> {
            Ok(Response::builder()
                .status(StatusCode::SWITCHING_PROTOCOLS)
                .header(header::UPGRADE, "websocket")
                .body(Bytes::new())
                .unwrap())
        }
        let (mut client, server) = duplex(4096);
        let task = tokio::spawn(serve(server, Arc::new(make_handler(upgrader))));

        // head and first post-upgrade bytes arrive in one write
        client
            .write_all(b"GET /chat HTTP/1.1\r\nHost: a\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\nHELLO")
            .await
            .unwrap();
        let response = read_until(&mut client, "\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));

        match task.await.unwrap().unwrap() {
            Served::Upgraded { mut io, leftover } => {
                assert_eq!(&leftover[..], b"HELLO");
                io.write_all(b"WORLD").await.unwrap();
                let mut buf = [0u8; 5];
                client.read_exact(&mut buf).await.unwrap();
                assert_eq!(&buf, b"WORLD");
            }
            Served::Closed => panic!("expected an upgrade"),
        }
    }
}
