//! Serializes outbound requests for the client: request line, headers
//! with a computed Content-Length, CRLF, body bytes.

use std::io;
use std::io::{ErrorKind, Write};

use bytes::{BufMut, Bytes, BytesMut};
use http::{Method, Request, Version, header};
use tokio_util::codec::Encoder;
use tracing::error;

use crate::codec::response_encoder::FastWrite;
use crate::protocol::SendError;

const INIT_HEAD_SIZE: usize = 1024;

pub struct RequestEncoder;

impl Encoder<Request<Bytes>> for RequestEncoder {
    type Error = SendError;

    fn encode(&mut self, request: Request<Bytes>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut parts, body) = request.into_parts();

        dst.reserve(INIT_HEAD_SIZE + body.len());
        let version = match parts.version {
            Version::HTTP_10 => "HTTP/1.0",
            Version::HTTP_11 => "HTTP/1.1",
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(io::Error::from(ErrorKind::Unsupported).into());
            }
        };
        let target = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        write!(FastWrite(dst), "{} {} {}\r\n", parts.method, target, version)?;

        if !body.is_empty() || method_expects_length(&parts.method) {
            parts.headers.insert(header::CONTENT_LENGTH, (body.len() as u64).into());
        }

        for (name, value) in parts.headers.iter() {
            dst.put_slice(name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        dst.put_slice(&body);
        Ok(())
    }
}

/// Methods whose requests conventionally carry a length header even when
/// the body is empty, so servers do not have to guess.
fn method_expects_length(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(request: Request<Bytes>) -> String {
        let mut dst = BytesMut::new();
        RequestEncoder.encode(request, &mut dst).unwrap();
        String::from_utf8(dst.to_vec()).unwrap()
    }

    #[test]
    fn get_request_line_uses_path_and_query() {
        let request = Request::builder()
            .method(Method::GET)
            .uri("http://example.com/search?q=1")
            .header(header::HOST, "example.com")
            .body(Bytes::new())
            .unwrap();
        let wire = encode(request);
        assert!(wire.starts_with("GET /search?q=1 HTTP/1.1\r\n"));
        assert!(wire.contains("host: example.com\r\n"));
        assert!(!wire.contains("content-length"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[test]
    fn post_carries_content_length_and_body() {
        let request = Request::builder().method(Method::POST).uri("/echo").body(Bytes::from_static(b"Hello")).unwrap();
        let wire = encode(request);
        assert!(wire.contains("content-length: 5\r\n"));
        assert!(wire.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn empty_post_still_declares_zero_length() {
        let request = Request::builder().method(Method::POST).uri("/submit").body(Bytes::new()).unwrap();
        let wire = encode(request);
        assert!(wire.contains("content-length: 0\r\n"));
    }
}
