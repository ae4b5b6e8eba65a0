use bytes::{BufMut, BytesMut};
use tokio_util::codec::Encoder;

use crate::codec::chunked::ChunkItem;
use crate::error::ProtoError;

const CRLF: &[u8] = b"\r\n";
const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Encodes a payload stream into chunked transfer coding.
///
/// Every [`ChunkItem::Data`] becomes exactly one chunk; empty data encodes
/// nothing, because a zero-size chunk would terminate the stream early.
/// [`ChunkItem::End`] emits the terminal `0\r\n\r\n` once, after which the
/// encoder silently ignores further items.
#[derive(Debug, Default)]
pub struct ChunkedEncoder {
    finished: bool,
}

impl ChunkedEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the terminal chunk has been written.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Encoder<ChunkItem> for ChunkedEncoder {
    type Error = ProtoError;

    fn encode(&mut self, item: ChunkItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.finished {
            return Ok(());
        }
        match item {
            ChunkItem::Data(data) => {
                if data.is_empty() {
                    return Ok(());
                }
                // hex size line, payload, CRLF
                let size_line = format!("{:X}", data.len());
                dst.reserve(size_line.len() + CRLF.len() * 2 + data.len());
                dst.put_slice(size_line.as_bytes());
                dst.put_slice(CRLF);
                dst.put_slice(&data);
                dst.put_slice(CRLF);
            }
            ChunkItem::End => {
                self.finished = true;
                dst.put_slice(LAST_CHUNK);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn encode_all(items: Vec<ChunkItem>) -> BytesMut {
        let mut encoder = ChunkedEncoder::new();
        let mut dst = BytesMut::new();
        for item in items {
            encoder.encode(item, &mut dst).unwrap();
        }
        dst
    }

    #[test]
    fn encodes_single_chunk() {
        let dst = encode_all(vec![ChunkItem::Data(Bytes::from_static(b"Hello"))]);
        assert_eq!(&dst[..], b"5\r\nHello\r\n");
    }

    #[test]
    fn size_line_is_uppercase_hex() {
        let data = Bytes::from(vec![b'x'; 26]);
        let dst = encode_all(vec![ChunkItem::Data(data)]);
        assert!(dst.starts_with(b"1A\r\n"));
    }

    #[test]
    fn empty_data_encodes_nothing() {
        let dst = encode_all(vec![ChunkItem::Data(Bytes::new())]);
        assert!(dst.is_empty());
    }

    #[test]
    fn end_emits_terminal_chunk_once() {
        let dst = encode_all(vec![
            ChunkItem::Data(Bytes::from_static(b"hi")),
            ChunkItem::End,
            ChunkItem::End,
            ChunkItem::Data(Bytes::from_static(b"late")),
        ]);
        assert_eq!(&dst[..], b"2\r\nhi\r\n0\r\n\r\n");
    }
}
