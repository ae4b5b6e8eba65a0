use bytes::Bytes;

/// One item of a decoded HTTP message stream: first the header, then zero
/// or more payload items ending with [`PayloadItem::Eof`].
#[derive(Debug, PartialEq, Eq)]
pub enum Message<T> {
    Header(T),
    Payload(PayloadItem),
}

/// A piece of an HTTP message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem {
    Chunk(Bytes),
    /// The body is complete.
    Eof,
}

/// How the body of a message is delimited.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    /// Exactly this many bytes follow the header (Content-Length).
    Length(u64),
    /// No length information; the body runs until the peer closes the
    /// connection. Only valid for responses read by a client.
    Unbounded,
    /// No body.
    Empty,
}

impl PayloadSize {
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, PayloadSize::Empty)
    }

    #[inline]
    pub fn is_unbounded(&self) -> bool {
        matches!(self, PayloadSize::Unbounded)
    }
}

impl<T> Message<T> {
    #[inline]
    pub fn is_header(&self) -> bool {
        matches!(self, Message::Header(_))
    }

    pub fn into_payload_item(self) -> Option<PayloadItem> {
        match self {
            Message::Header(_) => None,
            Message::Payload(item) => Some(item),
        }
    }
}

impl PayloadItem {
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof)
    }

    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }
}
