//! Body decoders for the two delimitation modes the message layer supports:
//! an exact Content-Length, or (client side only) read-until-close.

use std::cmp;

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::protocol::{ParseError, PayloadItem, PayloadSize};

/// Streams exactly `remaining` body bytes, then yields `Eof`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthDecoder {
    remaining: u64,
}

impl LengthDecoder {
    pub fn new(length: u64) -> Self {
        Self { remaining: length }
    }
}

impl Decoder for LengthDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.remaining == 0 {
            return Ok(Some(PayloadItem::Eof));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let len = cmp::min(self.remaining, src.len() as u64) as usize;
        let bytes = src.split_to(len).freeze();
        self.remaining -= bytes.len() as u64;
        Ok(Some(PayloadItem::Chunk(bytes)))
    }
}

/// Delegates to the decoder matching the message's [`PayloadSize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadDecoder {
    Length(LengthDecoder),
    /// No length information: everything until EOF is body.
    Unbounded,
    NoBody,
}

impl From<PayloadSize> for PayloadDecoder {
    fn from(size: PayloadSize) -> Self {
        match size {
            PayloadSize::Length(n) => Self::Length(LengthDecoder::new(n)),
            PayloadSize::Unbounded => Self::Unbounded,
            PayloadSize::Empty => Self::NoBody,
        }
    }
}

impl Decoder for PayloadDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self {
            Self::Length(length_decoder) => length_decoder.decode(src),
            Self::Unbounded => {
                if src.is_empty() {
                    return Ok(None);
                }
                Ok(Some(PayloadItem::Chunk(src.split().freeze())))
            }
            Self::NoBody => Ok(Some(PayloadItem::Eof)),
        }
    }

    /// EOF terminates an unbounded body; a short length-delimited body is
    /// a truncation error.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self {
            Self::Length(length_decoder) => {
                if let Some(item) = length_decoder.decode(src)? {
                    return Ok(Some(item));
                }
                Err(ParseError::invalid_body("connection closed before the full content-length body arrived"))
            }
            Self::Unbounded => {
                if src.is_empty() {
                    return Ok(Some(PayloadItem::Eof));
                }
                Ok(Some(PayloadItem::Chunk(src.split().freeze())))
            }
            Self::NoBody => Ok(Some(PayloadItem::Eof)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_decoder_stops_at_the_boundary() {
        let mut buf = BytesMut::from(&b"101234567890abcdef"[..]);
        let mut decoder = LengthDecoder::new(10);

        let item = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(item.into_bytes().unwrap().len(), 10);
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(PayloadItem::Eof));
        assert_eq!(&buf[..], b"90abcdef");
    }

    #[test]
    fn unbounded_decoder_needs_eof() {
        let mut decoder = PayloadDecoder::Unbounded;
        let mut buf = BytesMut::from(&b"some data"[..]);

        let item = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&item.into_bytes().unwrap()[..], b"some data");
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        assert_eq!(decoder.decode_eof(&mut buf).unwrap(), Some(PayloadItem::Eof));
    }

    #[test]
    fn truncated_length_body_is_an_error() {
        let mut decoder = PayloadDecoder::from(PayloadSize::Length(10));
        let mut buf = BytesMut::from(&b"short"[..]);

        assert!(decoder.decode(&mut buf).unwrap().unwrap().into_bytes().is_some());
        assert!(decoder.decode_eof(&mut buf).is_err());
    }
}
