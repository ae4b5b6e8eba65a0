//! WebSocket opening handshake, RFC 6455 §4.
//!
//! Only the HTTP side of the upgrade lives here: request validation, the
//! `Sec-WebSocket-Accept` derivation and the 101 response. Framing is the
//! business of the connection layer once the stream has been handed over.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, Version, header};
use sha1::{Digest, Sha1};

use crate::ensure;
use crate::protocol::ParseError;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Derive the `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// A fresh random `Sec-WebSocket-Key`.
pub fn generate_key() -> String {
    BASE64.encode(rand::random::<[u8; 16]>())
}

/// Server side: check that `request` is a well-formed upgrade and return
/// the accept value to answer with.
pub fn validate_upgrade<T>(request: &Request<T>) -> Result<String, ParseError> {
    ensure!(request.method() == Method::GET, ParseError::invalid_upgrade("handshake must be a GET request"));
    ensure!(request.version() >= Version::HTTP_11, ParseError::invalid_upgrade("handshake requires HTTP/1.1 or later"));

    let headers = request.headers();
    ensure!(
        header_has_token(headers, header::UPGRADE, "websocket"),
        ParseError::invalid_upgrade("upgrade header must name websocket")
    );
    ensure!(
        header_has_token(headers, header::CONNECTION, "upgrade"),
        ParseError::invalid_upgrade("connection header must contain the upgrade token")
    );
    ensure!(
        headers.get(header::SEC_WEBSOCKET_VERSION).is_some_and(|v| v.as_bytes() == b"13"),
        ParseError::invalid_upgrade("only sec-websocket-version 13 is supported")
    );

    let key = headers
        .get(header::SEC_WEBSOCKET_KEY)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ParseError::invalid_upgrade("missing sec-websocket-key header"))?;
    Ok(accept_key(key.trim()))
}

/// Server side: validate the upgrade and build the `101 Switching
/// Protocols` answer for it.
pub fn upgrade_response<T>(request: &Request<T>) -> Result<Response<Bytes>, ParseError> {
    let accept = validate_upgrade(request)?;
    let accept = HeaderValue::from_str(&accept).map_err(|_| ParseError::invalid_upgrade("accept key is not a valid header value"))?;

    let mut response = Response::new(Bytes::new());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(header::SEC_WEBSOCKET_ACCEPT, accept);
    Ok(response)
}

/// Client side: build the upgrade request for `path` on `host`, returning
/// the nonce to verify the answer with.
pub fn client_handshake_request(host: &str, path: &str) -> Result<(Request<Bytes>, String), ParseError> {
    let key = generate_key();
    let request = Request::builder()
        .method(Method::GET)
        .uri(path)
        .header(header::HOST, host)
        .header(header::UPGRADE, "websocket")
        .header(header::CONNECTION, "Upgrade")
        .header(header::SEC_WEBSOCKET_KEY, key.as_str())
        .header(header::SEC_WEBSOCKET_VERSION, "13")
        .body(Bytes::new())
        .map_err(|e| ParseError::invalid_upgrade(e.to_string()))?;
    Ok((request, key))
}

/// Client side: check the server's answer against the key that was sent.
///
/// A mismatched accept value means this is not the handshake we started;
/// the connection must not be used.
pub fn verify_accept<T>(response: &Response<T>, key: &str) -> Result<(), ParseError> {
    ensure!(
        response.status() == StatusCode::SWITCHING_PROTOCOLS,
        ParseError::invalid_upgrade(format!("expected 101 Switching Protocols, got {}", response.status()))
    );
    let accept = response
        .headers()
        .get(header::SEC_WEBSOCKET_ACCEPT)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ParseError::invalid_upgrade("missing sec-websocket-accept header"))?;
    ensure!(accept == accept_key(key), ParseError::invalid_upgrade("sec-websocket-accept does not match the key"));
    Ok(())
}

fn header_has_token(headers: &HeaderMap, name: HeaderName, token: &str) -> bool {
    headers.get_all(name).iter().any(|value| {
        let Ok(value) = value.to_str() else { return false };
        value.split(',').any(|t| t.trim().eq_ignore_ascii_case(token))
    })
}
