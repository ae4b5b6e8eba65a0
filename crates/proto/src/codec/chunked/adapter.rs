use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::codec::chunked::{ChunkItem, ChunkedDecoder, ChunkedEncoder};
use crate::connection::{Adapter, ConnectionState, Link, SendPriority};
use crate::error::ProtoError;

/// Adapter form of [`ChunkedEncoder`]: every application write goes to the
/// transport as one chunk, and the terminal chunk is emitted automatically
/// when the connection disconnects while still writable.
#[derive(Debug, Default)]
pub struct ChunkedEncodeAdapter {
    encoder: ChunkedEncoder,
}

impl ChunkedEncodeAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Adapter for ChunkedEncodeAdapter {
    fn write(&mut self, data: Bytes, priority: SendPriority, link: &mut Link<'_>) -> Result<(), ProtoError> {
        let mut dst = BytesMut::with_capacity(data.len() + 20);
        self.encoder.encode(ChunkItem::Data(data), &mut dst)?;
        if !dst.is_empty() {
            link.write(dst.freeze(), priority);
        }
        Ok(())
    }

    fn before_disconnect(&mut self, link: &mut Link<'_>) {
        if link.state() != ConnectionState::Connected {
            return;
        }
        let mut dst = BytesMut::with_capacity(5);
        if self.encoder.encode(ChunkItem::End, &mut dst).is_ok() && !dst.is_empty() {
            link.write(dst.freeze(), SendPriority::Normal);
        }
    }
}

/// Adapter form of [`ChunkedDecoder`]: delivers de-chunked payload bytes
/// upward and invokes an optional completion hook when the terminal chunk
/// arrives.
pub struct ChunkedDecodeAdapter {
    decoder: ChunkedDecoder,
    buf: BytesMut,
    on_complete: Option<Box<dyn FnMut(&mut Link<'_>) + Send>>,
}

impl std::fmt::Debug for ChunkedDecodeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedDecodeAdapter").field("decoder", &self.decoder).finish()
    }
}

impl Default for ChunkedDecodeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecodeAdapter {
    pub fn new() -> Self {
        Self { decoder: ChunkedDecoder::new(), buf: BytesMut::new(), on_complete: None }
    }

    /// Invoke `hook` once the terminal chunk (and trailers) have been
    /// consumed.
    pub fn with_completion(mut self, hook: impl FnMut(&mut Link<'_>) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(hook));
        self
    }
}

impl Adapter for ChunkedDecodeAdapter {
    fn read(&mut self, data: Bytes, link: &mut Link<'_>) -> Result<(), ProtoError> {
        self.buf.extend_from_slice(&data);
        while let Some(item) = self.decoder.decode(&mut self.buf)? {
            match item {
                ChunkItem::Data(payload) => link.deliver(payload),
                ChunkItem::End => {
                    debug!("chunked stream complete");
                    if let Some(hook) = self.on_complete.as_mut() {
                        hook(link);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{AdapterChain, DisconnectReason};

    #[test]
    fn writes_become_chunks_and_disconnect_terminates() {
        let mut chain = AdapterChain::new().with(ChunkedEncodeAdapter::new());
        chain.handle_connect().unwrap();

        let out = chain.write(Bytes::from_static(b"Hello"), SendPriority::Normal).unwrap();
        assert_eq!(&out.transport[0].0[..], b"5\r\nHello\r\n");

        let out = chain.disconnect(&DisconnectReason::local("done"));
        assert_eq!(&out.transport[0].0[..], b"0\r\n\r\n");
    }

    #[test]
    fn reads_are_dechunked_and_completion_fires() {
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let seen = fired.clone();
        let adapter = ChunkedDecodeAdapter::new()
            .with_completion(move |_link| seen.store(true, std::sync::atomic::Ordering::Relaxed));
        let mut chain = AdapterChain::new().with(adapter);
        chain.handle_connect().unwrap();

        let out = chain.read(Bytes::from_static(b"5\r\nHello\r\n0\r\n\r\n")).unwrap();
        assert_eq!(&out.delivered[0][..], b"Hello");
        assert!(fired.load(std::sync::atomic::Ordering::Relaxed));
    }

    #[test]
    fn split_reads_reassemble() {
        let mut chain = AdapterChain::new().with(ChunkedDecodeAdapter::new());
        chain.handle_connect().unwrap();

        let out = chain.read(Bytes::from_static(b"5\r\nHe")).unwrap();
        assert_eq!(&out.delivered[0][..], b"He");
        let out = chain.read(Bytes::from_static(b"llo\r\n")).unwrap();
        assert_eq!(&out.delivered[0][..], b"llo");
    }
}
