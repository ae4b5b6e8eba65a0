//! HTTP chunked transfer coding, [RFC 7230 §4.1].
//!
//! Wire format: `<hex-size>[;ext...]\r\n<size bytes>\r\n` repeated,
//! terminated by `0\r\n[trailer\r\n]*\r\n`. Chunk extensions and trailers
//! are parsed and discarded.
//!
//! [RFC 7230 §4.1]: https://tools.ietf.org/html/rfc7230#section-4.1

mod adapter;
mod decoder;
mod encoder;

pub use adapter::{ChunkedDecodeAdapter, ChunkedEncodeAdapter};
pub use decoder::ChunkedDecoder;
pub use encoder::ChunkedEncoder;

use bytes::Bytes;

/// One item of a chunked stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkItem {
    /// Payload bytes. A single chunk may surface as several `Data` items
    /// when its body arrives fragmented.
    Data(Bytes),
    /// The terminal chunk (and any trailers) has been consumed; the
    /// message is complete.
    End,
}

impl ChunkItem {
    #[inline]
    pub fn is_data(&self) -> bool {
        matches!(self, ChunkItem::Data(_))
    }

    #[inline]
    pub fn is_end(&self) -> bool {
        matches!(self, ChunkItem::End)
    }

    pub fn into_data(self) -> Option<Bytes> {
        match self {
            ChunkItem::Data(bytes) => Some(bytes),
            ChunkItem::End => None,
        }
    }
}
