//! Serializes complete responses: status line, headers with a computed
//! Content-Length, CRLF, body bytes.

use std::io;
use std::io::{ErrorKind, Write};

use bytes::{BufMut, Bytes, BytesMut};
use http::{Response, Version, header};
use tokio_util::codec::Encoder;
use tracing::error;

use crate::protocol::SendError;

/// Initial reservation for one serialized head.
const INIT_HEAD_SIZE: usize = 4 * 1024;

pub struct ResponseEncoder;

impl Encoder<Response<Bytes>> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, response: Response<Bytes>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut parts, body) = response.into_parts();

        dst.reserve(INIT_HEAD_SIZE + body.len());
        let version = match parts.version {
            Version::HTTP_10 => "HTTP/1.0",
            Version::HTTP_11 => "HTTP/1.1",
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(io::Error::from(ErrorKind::Unsupported).into());
            }
        };
        write!(FastWrite(dst), "{} {} {}\r\n", version, parts.status.as_str(), parts.status.canonical_reason().unwrap_or(""))?;

        // statuses that forbid a body get no length header at all, and
        // chunked responses already declare their own framing
        let forbids_body = parts.status.is_informational()
            || parts.status == http::StatusCode::NO_CONTENT
            || parts.status == http::StatusCode::NOT_MODIFIED;
        if !forbids_body && !parts.headers.contains_key(header::TRANSFER_ENCODING) {
            parts.headers.insert(header::CONTENT_LENGTH, (body.len() as u64).into());
        }

        for (name, value) in parts.headers.iter() {
            dst.put_slice(name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");

        if !forbids_body {
            dst.put_slice(&body);
        }
        Ok(())
    }
}

/// Writes format-args straight into the reserved buffer, skipping the
/// io::Write bounds checks a generic writer would pay for.
pub(crate) struct FastWrite<'a>(pub(crate) &'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;

    fn encode(response: Response<Bytes>) -> BytesMut {
        let mut dst = BytesMut::new();
        ResponseEncoder.encode(response, &mut dst).unwrap();
        dst
    }

    #[test]
    fn content_length_is_computed_from_the_body() {
        let response = Response::builder().status(StatusCode::OK).body(Bytes::from_static(b"Hello")).unwrap();
        let wire = encode(response);
        let text = std::str::from_utf8(&wire).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn stale_content_length_is_overwritten() {
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, "999")
            .body(Bytes::from_static(b"ok"))
            .unwrap();
        let text = encode(response);
        let text = std::str::from_utf8(&text).unwrap();
        assert!(text.contains("content-length: 2\r\n"));
        assert!(!text.contains("999"));
    }

    #[test]
    fn switching_protocols_has_no_length_header() {
        let response = Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(header::UPGRADE, "websocket")
            .body(Bytes::new())
            .unwrap();
        let text = encode(response);
        let text = std::str::from_utf8(&text).unwrap();
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(!text.contains("content-length"));
    }
}
