//! Response compression negotiation.
//!
//! Bodies above [`MIN_COMPRESS_SIZE`] are gzip-compressed when the request
//! advertised `Accept-Encoding: gzip`. Responses that already carry a
//! Content-Encoding are left alone.

use std::io;
use std::io::Write;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use http::{HeaderMap, HeaderValue, Response, header};
use tracing::warn;

/// Bodies at or below this size are sent uncompressed; the gzip framing
/// overhead is not worth it.
pub const MIN_COMPRESS_SIZE: usize = 1024;

/// Whether the request accepts a gzip-coded response.
pub fn accepts_gzip(request_headers: &HeaderMap) -> bool {
    request_headers.get_all(header::ACCEPT_ENCODING).iter().any(|value| {
        let Ok(value) = value.to_str() else { return false };
        value
            .split(',')
            .filter_map(|token| token.split(';').next())
            .any(|coding| coding.trim().eq_ignore_ascii_case("gzip"))
    })
}

/// Compress the response body in place when negotiation allows it.
///
/// A failing compressor leaves the response untouched; the uncompressed
/// body is always a valid answer.
pub fn compress_if_accepted(request_headers: &HeaderMap, response: &mut Response<Bytes>) {
    if response.body().len() <= MIN_COMPRESS_SIZE
        || response.headers().contains_key(header::CONTENT_ENCODING)
        || !accepts_gzip(request_headers)
    {
        return;
    }

    match gzip(response.body()) {
        Ok(compressed) => {
            response.headers_mut().insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            *response.body_mut() = compressed;
        }
        Err(e) => warn!(cause = %e, "gzip compression failed, sending identity body"),
    }
}

fn gzip(data: &[u8]) -> io::Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::best());
    encoder.write_all(data)?;
    Ok(Bytes::from(encoder.finish()?))
}

#[cfg(test)]
mod tests {
    use flate2::read::GzDecoder;
    use http::StatusCode;

    use super::*;

    fn headers_accepting(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn accept_encoding_is_a_token_list() {
        assert!(accepts_gzip(&headers_accepting("gzip")));
        assert!(accepts_gzip(&headers_accepting("deflate, gzip;q=0.8, br")));
        assert!(accepts_gzip(&headers_accepting("GZIP")));
        assert!(!accepts_gzip(&headers_accepting("deflate, br")));
        assert!(!accepts_gzip(&HeaderMap::new()));
    }

    #[test]
    fn large_body_is_compressed_round_trip() {
        let body: String = "the quick brown fox jumps over the lazy dog. ".repeat(100);
        let mut response = Response::builder().status(StatusCode::OK).body(Bytes::from(body.clone())).unwrap();

        compress_if_accepted(&headers_accepting("gzip"), &mut response);

        assert_eq!(response.headers().get(header::CONTENT_ENCODING).unwrap(), "gzip");
        assert!(response.body().len() < body.len());

        let mut decoder = GzDecoder::new(&response.body()[..]);
        let mut inflated = String::new();
        std::io::Read::read_to_string(&mut decoder, &mut inflated).unwrap();
        assert_eq!(inflated, body);
    }

    #[test]
    fn small_body_is_left_alone() {
        let mut response = Response::builder().body(Bytes::from_static(b"short")).unwrap();
        compress_if_accepted(&headers_accepting("gzip"), &mut response);
        assert!(!response.headers().contains_key(header::CONTENT_ENCODING));
        assert_eq!(&response.body()[..], b"short");
    }

    #[test]
    fn client_without_gzip_gets_identity() {
        let body = Bytes::from("x".repeat(4096));
        let mut response = Response::builder().body(body.clone()).unwrap();
        compress_if_accepted(&HeaderMap::new(), &mut response);
        assert_eq!(response.body(), &body);
    }
}
