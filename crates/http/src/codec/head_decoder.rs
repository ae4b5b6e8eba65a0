//! Incremental head parsing for both HTTP directions.
//!
//! Both decoders are thin drivers over `httparse`: parse into an
//! uninitialized header array, record the byte ranges of each name and
//! value, then build the typed `http` structures zero-copy from the frozen
//! header block. Partial input returns `Ok(None)`; the accumulated bytes
//! are bounded by [`MAX_HEADER_BYTES`] either way.

use std::mem::MaybeUninit;

use bytes::BytesMut;
use http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::{trace, warn};

use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, RequestHeader, ResponseHead};

/// Maximum number of headers accepted per message.
pub const MAX_HEADER_NUM: usize = 64;

/// Maximum size of the head section in bytes.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Decoder for request heads (server side).
///
/// Yields the typed head plus how the body that follows is delimited.
pub struct RequestHeadDecoder;

impl Decoder for RequestHeadDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // shortest complete request line + empty header block
        if src.len() < 14 {
            return Ok(None);
        }

        let mut req = httparse::Request::new(&mut []);
        let mut headers: [MaybeUninit<httparse::Header>; MAX_HEADER_NUM] = [const { MaybeUninit::uninit() }; MAX_HEADER_NUM];

        let status = req.parse_with_uninit_headers(src, &mut headers).map_err(|e| match e {
            httparse::Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            e => ParseError::invalid_header(e.to_string()),
        })?;

        let head_len = match status {
            Status::Complete(head_len) => head_len,
            Status::Partial => {
                ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
                return Ok(None);
            }
        };
        trace!(head_len, "parsed request head");
        ensure!(head_len <= MAX_HEADER_BYTES, ParseError::too_large_header(head_len, MAX_HEADER_BYTES));

        let version = match req.version {
            Some(0) => http::Version::HTTP_10,
            Some(1) => http::Version::HTTP_11,
            v => return Err(ParseError::InvalidVersion(v)),
        };

        let mut builder = Request::builder()
            .method(req.method.ok_or(ParseError::InvalidMethod)?)
            .uri(req.path.ok_or(ParseError::InvalidUri)?)
            .version(version);
        let header_count = req.headers.len();
        let mut indices = [EMPTY_HEADER_INDEX; MAX_HEADER_NUM];
        HeaderIndex::record(src, req.headers, &mut indices);

        let head_bytes = src.split_to(head_len).freeze();
        let headers = builder.headers_mut().ok_or(ParseError::InvalidUri)?;
        fill_headers(headers, &head_bytes, &indices[..header_count]);

        let header = RequestHeader::from(builder.body(()).map_err(|e| ParseError::invalid_header(e.to_string()))?);
        let payload_size = request_payload_size(&header)?;
        Ok(Some((header, payload_size)))
    }
}

/// Decoder for response heads (client side).
pub struct ResponseHeadDecoder;

impl Decoder for ResponseHeadDecoder {
    type Item = (ResponseHead, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // shortest complete status line + empty header block
        if src.len() < 16 {
            return Ok(None);
        }

        // httparse only offers `parse_with_uninit_headers` on `Request`,
        // so the response side parses into an initialized header array.
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut resp = httparse::Response::new(&mut headers);

        let status = resp.parse(src).map_err(|e| match e {
            httparse::Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            e => ParseError::invalid_header(e.to_string()),
        })?;

        let head_len = match status {
            Status::Complete(head_len) => head_len,
            Status::Partial => {
                ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
                return Ok(None);
            }
        };
        trace!(head_len, "parsed response head");
        ensure!(head_len <= MAX_HEADER_BYTES, ParseError::too_large_header(head_len, MAX_HEADER_BYTES));

        let version = match resp.version {
            Some(0) => http::Version::HTTP_10,
            Some(1) => http::Version::HTTP_11,
            v => return Err(ParseError::InvalidVersion(v)),
        };
        let status_code = StatusCode::from_u16(resp.code.ok_or(ParseError::InvalidStatus)?).map_err(|_| ParseError::InvalidStatus)?;

        let mut builder = Response::builder().status(status_code).version(version);
        let header_count = resp.headers.len();
        let mut indices = [EMPTY_HEADER_INDEX; MAX_HEADER_NUM];
        HeaderIndex::record(src, resp.headers, &mut indices);

        let head_bytes = src.split_to(head_len).freeze();
        let headers = builder.headers_mut().ok_or(ParseError::InvalidStatus)?;
        fill_headers(headers, &head_bytes, &indices[..header_count]);

        let head = ResponseHead::from(builder.body(()).map_err(|e| ParseError::invalid_header(e.to_string()))?);
        let payload_size = response_payload_size(&head)?;
        Ok(Some((head, payload_size)))
    }
}

/// Byte ranges of one header's name and value inside the head block.
#[derive(Clone, Copy)]
struct HeaderIndex {
    name: (usize, usize),
    value: (usize, usize),
}

const EMPTY_HEADER_INDEX: HeaderIndex = HeaderIndex { name: (0, 0), value: (0, 0) };

impl HeaderIndex {
    fn record(bytes: &[u8], headers: &[httparse::Header<'_>], indices: &mut [HeaderIndex]) {
        let base = bytes.as_ptr() as usize;
        for (header, index) in headers.iter().zip(indices.iter_mut()) {
            let name_start = header.name.as_ptr() as usize - base;
            index.name = (name_start, name_start + header.name.len());
            let value_start = header.value.as_ptr() as usize - base;
            index.value = (value_start, value_start + header.value.len());
        }
    }
}

/// Materialize recorded header ranges into a `HeaderMap`, sharing the
/// frozen head block instead of copying values.
fn fill_headers(headers: &mut HeaderMap, head_bytes: &bytes::Bytes, indices: &[HeaderIndex]) {
    headers.reserve(indices.len());
    for index in indices {
        // httparse already verified the name is valid ASCII
        let Ok(name) = HeaderName::from_bytes(&head_bytes[index.name.0..index.name.1]) else { continue };
        // httparse already verified the value holds only visible ASCII
        let value = unsafe { HeaderValue::from_maybe_shared_unchecked(head_bytes.slice(index.value.0..index.value.1)) };
        headers.append(name, value);
    }
}

/// Body delimitation for a request, RFC 7230 §3.3: the framing headers
/// decide whether a body is present, not the method.
///
/// Chunked request bodies are not supported: a chunked Transfer-Encoding is
/// logged and the body treated as empty, leaving the chunk stream in the
/// buffer to fail loudly on the next head parse.
fn request_payload_size(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    let te = header.headers().get(http::header::TRANSFER_ENCODING);
    let cl = header.headers().get(http::header::CONTENT_LENGTH);

    match (te, cl) {
        (None, None) => Ok(PayloadSize::Empty),

        (Some(te_value), None) => {
            if is_chunked(te_value) {
                warn!("chunked request bodies are not supported; treating the body as empty");
            }
            Ok(PayloadSize::Empty)
        }

        (None, Some(cl_value)) => parse_content_length(cl_value),

        (Some(_), Some(_)) => {
            Err(ParseError::invalid_content_length("transfer-encoding and content-length both present in headers"))
        }
    }
}

/// Body delimitation for a response. Without a Content-Length the body
/// runs until the server closes the connection.
fn response_payload_size(head: &ResponseHead) -> Result<PayloadSize, ParseError> {
    if head.bodyless_status() {
        return Ok(PayloadSize::Empty);
    }

    let te = head.headers().get(http::header::TRANSFER_ENCODING);
    if te.is_some_and(is_chunked) {
        return Err(ParseError::invalid_body("chunked response bodies are not supported"));
    }

    match head.headers().get(http::header::CONTENT_LENGTH) {
        Some(cl_value) => parse_content_length(cl_value),
        None => Ok(PayloadSize::Unbounded),
    }
}

fn parse_content_length(value: &HeaderValue) -> Result<PayloadSize, ParseError> {
    let s = value.to_str().map_err(|_| ParseError::invalid_content_length("value is not visible ASCII"))?;
    let length = s.trim().parse::<u64>().map_err(|_| ParseError::invalid_content_length(format!("value {s} is not u64")))?;
    if length == 0 { Ok(PayloadSize::Empty) } else { Ok(PayloadSize::Length(length)) }
}

/// Chunked must be the final listed transfer coding to count, RFC 7230.
fn is_chunked(value: &HeaderValue) -> bool {
    value.as_bytes().rsplit(|b| *b == b',').next().is_some_and(|last| last.trim_ascii() == b"chunked")
}
