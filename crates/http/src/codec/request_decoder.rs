//! Two-phase decoder for inbound requests: head first, then the body
//! stream. The `payload_decoder` field doubles as the phase marker —
//! `None` while parsing a head, `Some` while streaming its body.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body::PayloadDecoder;
use crate::codec::head_decoder::RequestHeadDecoder;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};

pub struct RequestDecoder {
    head_decoder: RequestHeadDecoder,
    payload_decoder: Option<PayloadDecoder>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self { head_decoder: RequestHeadDecoder, payload_decoder: None }
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ PayloadItem::Eof) => {
                    // body done, next decode parses the next head
                    self.payload_decoder.take();
                    Some(Message::Payload(item))
                }
                None => None,
            };
            return Ok(message);
        }

        let message = match self.head_decoder.decode(src)? {
            Some((header, payload_size)) => {
                self.payload_decoder = Some(payload_size.into());
                Some(Message::Header((header, payload_size)))
            }
            None => None,
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn drain(decoder: &mut RequestDecoder, buf: &mut BytesMut) -> Vec<Message<(RequestHeader, PayloadSize)>> {
        let mut out = Vec::new();
        while let Some(message) = decoder.decode(buf).unwrap() {
            out.push(message);
        }
        out
    }

    #[test]
    fn head_then_body_then_eof() {
        let raw = indoc! {"
            POST /echo HTTP/1.1\r
            Host: a\r
            Content-Length: 5\r
            \r
            Hello"};
        let mut decoder = RequestDecoder::new();
        let mut buf = BytesMut::from(raw);

        let messages = drain(&mut decoder, &mut buf);
        assert_eq!(messages.len(), 3);
        assert!(messages[0].is_header());
        let payloads: Vec<_> = messages.into_iter().filter_map(Message::into_payload_item).collect();
        assert_eq!(payloads, [PayloadItem::Chunk("Hello".into()), PayloadItem::Eof]);
    }

    #[test]
    fn pipelined_requests_decode_back_to_back() {
        let raw = "GET /a HTTP/1.1\r\nHost: h\r\n\r\nGET /b HTTP/1.1\r\nHost: h\r\n\r\n";
        let mut decoder = RequestDecoder::new();
        let mut buf = BytesMut::from(raw);

        let messages = drain(&mut decoder, &mut buf);
        // two heads, each followed by an immediate Eof
        let heads: Vec<_> = messages
            .iter()
            .filter_map(|m| match m {
                Message::Header((h, _)) => Some(h.uri().path().to_string()),
                Message::Payload(_) => None,
            })
            .collect();
        assert_eq!(heads, ["/a", "/b"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn body_split_over_reads() {
        let mut decoder = RequestDecoder::new();
        let mut buf = BytesMut::from("POST / HTTP/1.1\r\nContent-Length: 6\r\n\r\nfoo");

        let messages = drain(&mut decoder, &mut buf);
        assert_eq!(messages.len(), 2);

        buf.extend_from_slice(b"bar");
        let messages = drain(&mut decoder, &mut buf);
        let payloads: Vec<_> = messages.into_iter().filter_map(Message::into_payload_item).collect();
        assert_eq!(payloads, [PayloadItem::Chunk("bar".into()), PayloadItem::Eof]);
    }

    #[test]
    fn delete_body_does_not_poison_the_next_request() {
        let raw = "DELETE /items/7 HTTP/1.1\r\nContent-Length: 4\r\n\r\ngoneGET /next HTTP/1.1\r\nHost: h\r\n\r\n";
        let mut decoder = RequestDecoder::new();
        let mut buf = BytesMut::from(raw);

        let messages = drain(&mut decoder, &mut buf);
        let heads: Vec<_> = messages
            .iter()
            .filter_map(|m| match m {
                Message::Header((h, _)) => Some(h.uri().path().to_string()),
                Message::Payload(_) => None,
            })
            .collect();
        assert_eq!(heads, ["/items/7", "/next"]);

        let payloads: Vec<_> = messages.into_iter().filter_map(Message::into_payload_item).collect();
        assert_eq!(payloads, [PayloadItem::Chunk("gone".into()), PayloadItem::Eof, PayloadItem::Eof]);
        assert!(buf.is_empty());
    }
}
