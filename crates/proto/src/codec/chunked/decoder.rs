use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::chunked::ChunkItem;
use crate::error::ProtoError;

/// Longest accepted size or trailer line, CRLF excluded. Guards the
/// accumulator against a peer that never sends a line terminator.
const MAX_LINE_LEN: usize = 4 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Expecting `<hex-size>[;extensions]\r\n`.
    SizeLine,
    /// Inside a chunk body, `remaining` bytes left.
    Body { remaining: u64 },
    /// Expecting the CRLF that closes a chunk body.
    BodyCrlf,
    /// After the zero-size chunk, consuming trailer lines until the blank one.
    Trailers,
    /// The stream ended; further input is discarded.
    Finished,
}

/// Incremental decoder for chunked transfer coding.
///
/// Body bytes are surfaced as soon as they arrive: a chunk whose payload
/// spans several reads yields several [`ChunkItem::Data`] items. Chunk
/// extensions and trailer fields are consumed and discarded. The first
/// malformed byte is fatal; the decoder does not resynchronize.
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: DecodeState,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: DecodeState::SizeLine }
    }

    /// Whether the terminal chunk and its trailers have been consumed.
    pub fn is_finished(&self) -> bool {
        self.state == DecodeState::Finished
    }
}

/// Split one CRLF-terminated line off the front of `src`, without the CRLF.
fn take_line(src: &mut BytesMut) -> Result<Option<BytesMut>, ProtoError> {
    match src.iter().position(|&b| b == b'\n') {
        Some(0) => Err(ProtoError::protocol("chunk line terminated by bare LF")),
        Some(pos) => {
            if src[pos - 1] != b'\r' {
                return Err(ProtoError::protocol("chunk line terminated by bare LF"));
            }
            let mut line = src.split_to(pos + 1);
            line.truncate(pos - 1);
            Ok(Some(line))
        }
        None if src.len() > MAX_LINE_LEN => Err(ProtoError::protocol("chunk line too long")),
        None => Ok(None),
    }
}

/// Parse the chunk size from a size line, ignoring any `;extension` suffix.
fn parse_size(line: &[u8]) -> Result<u64, ProtoError> {
    let digits = match line.iter().position(|&b| b == b';') {
        Some(pos) => &line[..pos],
        None => line,
    };
    let digits = std::str::from_utf8(digits)
        .map_err(|_| ProtoError::protocol("chunk size is not ASCII"))?
        .trim_ascii();
    if digits.is_empty() {
        return Err(ProtoError::protocol("empty chunk size"));
    }
    u64::from_str_radix(digits, 16).map_err(|e| ProtoError::protocol(format!("invalid chunk size {digits:?}: {e}")))
}

impl Decoder for ChunkedDecoder {
    type Item = ChunkItem;
    type Error = ProtoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ChunkItem>, Self::Error> {
        loop {
            match self.state {
                DecodeState::SizeLine => {
                    let Some(line) = take_line(src)? else { return Ok(None) };
                    let size = parse_size(&line)?;
                    trace!(size, "chunk size line");
                    self.state = if size == 0 { DecodeState::Trailers } else { DecodeState::Body { remaining: size } };
                }
                DecodeState::Body { remaining } => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let take = remaining.min(src.len() as u64) as usize;
                    let left = remaining - take as u64;
                    self.state = if left == 0 { DecodeState::BodyCrlf } else { DecodeState::Body { remaining: left } };
                    return Ok(Some(ChunkItem::Data(src.split_to(take).freeze())));
                }
                DecodeState::BodyCrlf => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    let crlf = src.split_to(2);
                    if &crlf[..] != b"\r\n" {
                        return Err(ProtoError::protocol("missing CRLF after chunk body"));
                    }
                    self.state = DecodeState::SizeLine;
                }
                DecodeState::Trailers => {
                    let Some(line) = take_line(src)? else { return Ok(None) };
                    if line.is_empty() {
                        self.state = DecodeState::Finished;
                        return Ok(Some(ChunkItem::End));
                    }
                    trace!(len = line.len(), "discarding trailer field");
                }
                DecodeState::Finished => {
                    src.clear();
                    return Ok(None);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Decode the whole input, returning the concatenated body and whether
    /// the stream finished.
    fn decode_all(input: &[u8]) -> (Bytes, bool) {
        let mut decoder = ChunkedDecoder::new();
        let mut src = BytesMut::from(input);
        let mut body = BytesMut::new();
        let mut finished = false;
        while let Some(item) = decoder.decode(&mut src).unwrap() {
            match item {
                ChunkItem::Data(data) => body.extend_from_slice(&data),
                ChunkItem::End => finished = true,
            }
        }
        (body.freeze(), finished)
    }

    #[test]
    fn decodes_two_chunks_and_terminator() {
        let (body, finished) = decode_all(b"5\r\nHello\r\n7\r\n, world\r\n0\r\n\r\n");
        assert_eq!(&body[..], b"Hello, world");
        assert!(finished);
    }

    #[test]
    fn one_byte_at_a_time() {
        let input: &[u8] = b"5\r\nHello\r\n0\r\n\r\n";
        let mut decoder = ChunkedDecoder::new();
        let mut src = BytesMut::new();
        let mut body = BytesMut::new();
        let mut finished = false;
        for &b in input {
            src.extend_from_slice(&[b]);
            while let Some(item) = decoder.decode(&mut src).unwrap() {
                match item {
                    ChunkItem::Data(data) => body.extend_from_slice(&data),
                    ChunkItem::End => finished = true,
                }
            }
        }
        assert_eq!(&body[..], b"Hello");
        assert!(finished);
    }

    #[test]
    fn partial_chunk_body_surfaces_immediately() {
        let mut decoder = ChunkedDecoder::new();
        let mut src = BytesMut::from(&b"A\r\nhell"[..]);
        let item = decoder.decode(&mut src).unwrap().unwrap();
        assert_eq!(item, ChunkItem::Data(Bytes::from_static(b"hell")));
        assert_eq!(decoder.decode(&mut src).unwrap(), None);
    }

    #[test]
    fn chunk_extensions_are_discarded() {
        let (body, finished) = decode_all(b"5;name=value\r\nHello\r\n0\r\n\r\n");
        assert_eq!(&body[..], b"Hello");
        assert!(finished);
    }

    #[test]
    fn trailers_are_discarded() {
        let (body, finished) = decode_all(b"5\r\nHello\r\n0\r\nExpires: never\r\nX-Foo: bar\r\n\r\n");
        assert_eq!(&body[..], b"Hello");
        assert!(finished);
    }

    #[test]
    fn lowercase_and_uppercase_hex_sizes() {
        let (body, finished) = decode_all(b"a\r\n0123456789\r\nA\r\nabcdefghij\r\n0\r\n\r\n");
        assert_eq!(&body[..], b"0123456789abcdefghij");
        assert!(finished);
    }

    #[test]
    fn invalid_size_is_fatal() {
        let mut decoder = ChunkedDecoder::new();
        let mut src = BytesMut::from(&b"xyz\r\n"[..]);
        let err = decoder.decode(&mut src).unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn missing_crlf_after_body_is_fatal() {
        let mut decoder = ChunkedDecoder::new();
        let mut src = BytesMut::from(&b"2\r\nhiXX"[..]);
        assert_eq!(decoder.decode(&mut src).unwrap(), Some(ChunkItem::Data(Bytes::from_static(b"hi"))));
        let err = decoder.decode(&mut src).unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn bare_lf_is_fatal() {
        let mut decoder = ChunkedDecoder::new();
        let mut src = BytesMut::from(&b"5\nHello"[..]);
        let err = decoder.decode(&mut src).unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn input_after_terminal_chunk_is_ignored() {
        let mut decoder = ChunkedDecoder::new();
        let mut src = BytesMut::from(&b"0\r\n\r\ngarbage"[..]);
        assert_eq!(decoder.decode(&mut src).unwrap(), Some(ChunkItem::End));
        assert_eq!(decoder.decode(&mut src).unwrap(), None);
        assert!(src.is_empty());
    }

    #[test]
    fn unterminated_size_line_overflows() {
        let mut decoder = ChunkedDecoder::new();
        let mut src = BytesMut::from(vec![b'1'; MAX_LINE_LEN + 1].as_slice());
        let err = decoder.decode(&mut src).unwrap_err();
        assert!(err.is_protocol());
    }
}
