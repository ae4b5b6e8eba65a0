//! Server-sent events formatting (the `text/event-stream` media type).
//!
//! [`SseEncoder`] writes each event as one chunk of a chunked-coded
//! response body, so events reach the client as soon as they are flushed
//! instead of waiting for the stream to end.

use bytes::{BufMut, Bytes, BytesMut};
use strand_proto::ProtoError;
use strand_proto::codec::chunked::{ChunkItem, ChunkedEncoder};
use tokio_util::codec::Encoder;

/// The media type an event-stream response must declare.
pub fn media_type() -> mime::Mime {
    mime::TEXT_EVENT_STREAM
}

/// One server-sent event.
///
/// Every field is optional on the wire; an event with no fields at all
/// still encodes as a comment-free blank record, which clients ignore.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Event {
    /// Event type, dispatched by name on the client.
    pub name: Option<String>,
    /// Last-event-id for resumption.
    pub id: Option<String>,
    /// Payload. Embedded newlines become multiple `data:` lines.
    pub data: String,
}

impl Event {
    pub fn new(data: impl Into<String>) -> Self {
        Self { name: None, id: None, data: data.into() }
    }

    pub fn named(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self { name: Some(name.into()), id: None, data: data.into() }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Serialize to the event-stream text format: `event` line, `id` line,
    /// `data` lines, blank separator line.
    pub fn to_wire(&self) -> Bytes {
        let mut buf = BytesMut::new();
        if let Some(name) = &self.name {
            buf.put_slice(b"event: ");
            buf.put_slice(name.as_bytes());
            buf.put_slice(b"\n");
        }
        if let Some(id) = &self.id {
            buf.put_slice(b"id: ");
            buf.put_slice(id.as_bytes());
            buf.put_slice(b"\n");
        }
        for line in self.data.split('\n') {
            buf.put_slice(b"data: ");
            buf.put_slice(line.as_bytes());
            buf.put_slice(b"\n");
        }
        buf.put_slice(b"\n");
        buf.freeze()
    }
}

/// Encodes events as chunks of a chunked transfer-coded response body.
#[derive(Debug, Default)]
pub struct SseEncoder {
    chunked: ChunkedEncoder,
}

impl SseEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Terminate the stream with the final zero-length chunk.
    pub fn finish(&mut self, dst: &mut BytesMut) -> Result<(), ProtoError> {
        self.chunked.encode(ChunkItem::End, dst)
    }

    pub fn is_finished(&self) -> bool {
        self.chunked.is_finished()
    }
}

impl Encoder<Event> for SseEncoder {
    type Error = ProtoError;

    fn encode(&mut self, event: Event, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.chunked.encode(ChunkItem::Data(event.to_wire()), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_event_field_order() {
        let event = Event::named("update", "hello").with_id("42");
        assert_eq!(&event.to_wire()[..], b"event: update\nid: 42\ndata: hello\n\n");
    }

    #[test]
    fn bare_data_event() {
        assert_eq!(&Event::new("ping").to_wire()[..], b"data: ping\n\n");
    }

    #[test]
    fn multiline_data_becomes_multiple_data_lines() {
        let event = Event::new("line one\nline two");
        assert_eq!(&event.to_wire()[..], b"data: line one\ndata: line two\n\n");
    }

    #[test]
    fn events_are_framed_as_chunks() {
        let mut encoder = SseEncoder::new();
        let mut dst = BytesMut::new();

        encoder.encode(Event::new("hi"), &mut dst).unwrap();
        encoder.finish(&mut dst).unwrap();

        // "data: hi\n\n" is 10 bytes → size line "A"
        assert_eq!(&dst[..], b"A\r\ndata: hi\n\n\r\n0\r\n\r\n");
        assert!(encoder.is_finished());
    }
}
