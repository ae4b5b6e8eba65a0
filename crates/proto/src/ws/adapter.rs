use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

use crate::connection::{Adapter, ConnectionState, DisconnectReason, Link, SendPriority};
use crate::error::ProtoError;
use crate::ws::codec::{DEFAULT_MAX_PAYLOAD, WsFrameCodec};
use crate::ws::frame::{Frame, Opcode, close_code};

/// Kind of data frame used for outbound application messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
}

impl MessageKind {
    fn opcode(self) -> Opcode {
        match self {
            MessageKind::Text => Opcode::Text,
            MessageKind::Binary => Opcode::Binary,
        }
    }
}

/// Configuration for a [`WsAdapter`].
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Inbound frames must be masked (true on the server side).
    pub require_mask: bool,
    /// Mask outbound frames (true on the client side).
    pub mask_outbound: bool,
    /// Data frame kind for outbound application messages.
    pub outbound: MessageKind,
    /// Ping the peer after this long without inbound traffic; a second
    /// period without a pong declares the peer dead.
    pub keepalive: Option<Duration>,
    /// Cap on a reassembled message across all its fragments.
    pub max_message_size: usize,
}

impl WsConfig {
    pub fn server() -> Self {
        Self {
            require_mask: true,
            mask_outbound: false,
            outbound: MessageKind::Binary,
            keepalive: None,
            max_message_size: DEFAULT_MAX_PAYLOAD,
        }
    }

    pub fn client() -> Self {
        Self { require_mask: false, mask_outbound: true, ..Self::server() }
    }

    pub fn text(mut self) -> Self {
        self.outbound = MessageKind::Text;
        self
    }

    pub fn keepalive(mut self, period: Duration) -> Self {
        self.keepalive = Some(period);
        self
    }

    pub fn max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }
}

/// WebSocket framing as a connection adapter.
///
/// Writes become data frames (a batched write becomes one fragmented
/// message); reads reassemble fragmented messages and deliver complete
/// payloads. Control frames never reach the application: pings are answered
/// with a high-priority pong, pongs feed the keepalive, and a peer close is
/// echoed once and then tears the connection down.
pub struct WsAdapter {
    codec: WsFrameCodec,
    config: WsConfig,
    buf: BytesMut,
    /// In-progress fragmented message, if any.
    fragments: Option<(Opcode, BytesMut)>,
    /// A keepalive ping is in flight, not yet answered.
    ping_sent: bool,
    /// We already sent (or echoed) a close frame.
    close_sent: bool,
}

impl std::fmt::Debug for WsAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsAdapter")
            .field("config", &self.config)
            .field("ping_sent", &self.ping_sent)
            .field("close_sent", &self.close_sent)
            .finish()
    }
}

impl WsAdapter {
    pub fn new(config: WsConfig) -> Self {
        let codec = WsFrameCodec::new(config.require_mask, config.mask_outbound).max_payload(config.max_message_size);
        Self { codec, config, buf: BytesMut::new(), fragments: None, ping_sent: false, close_sent: false }
    }

    fn encode_to_link(&mut self, frame: Frame, priority: SendPriority, link: &mut Link<'_>) -> Result<(), ProtoError> {
        let mut dst = BytesMut::new();
        self.codec.encode(frame, &mut dst)?;
        link.write(dst.freeze(), priority);
        Ok(())
    }

    fn send_close(&mut self, code: u16, reason: &str, priority: SendPriority, link: &mut Link<'_>) {
        if self.close_sent {
            return;
        }
        self.close_sent = true;
        // best effort: an oversized reason must not abort the teardown
        let frame = Frame::close(Some(code), reason);
        let frame = if frame.payload.len() > 125 { Frame::close(Some(code), "") } else { frame };
        let mut dst = BytesMut::new();
        if self.codec.encode(frame, &mut dst).is_ok() {
            link.write(dst.freeze(), priority);
        }
    }

    /// Fold a data frame into the current message; returns the complete
    /// payload once the final fragment lands.
    fn reassemble(&mut self, frame: Frame) -> Result<Option<Bytes>, ProtoError> {
        match (frame.opcode, self.fragments.as_mut()) {
            (Opcode::Continuation, None) => Err(ProtoError::protocol("continuation frame without a message in progress")),
            (Opcode::Continuation, Some((_, assembled))) => {
                if assembled.len() + frame.payload.len() > self.config.max_message_size {
                    return Err(ProtoError::protocol("fragmented message exceeds size limit"));
                }
                assembled.extend_from_slice(&frame.payload);
                if frame.fin {
                    let message = std::mem::take(assembled).freeze();
                    self.fragments = None;
                    Ok(Some(message))
                } else {
                    Ok(None)
                }
            }
            (_, Some(_)) => Err(ProtoError::protocol("new data frame interleaved with a fragmented message")),
            (opcode, None) => {
                if frame.fin {
                    return Ok(Some(frame.payload));
                }
                trace!(?opcode, "fragmented message started");
                self.fragments = Some((opcode, BytesMut::from(frame.payload.as_ref())));
                Ok(None)
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame, link: &mut Link<'_>) -> Result<(), ProtoError> {
        match frame.opcode {
            Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                if let Some(message) = self.reassemble(frame)? {
                    link.deliver(message);
                }
            }
            Opcode::Ping => {
                trace!(len = frame.payload.len(), "ping; answering with pong");
                self.encode_to_link(Frame::pong(frame.payload), SendPriority::High, link)?;
            }
            Opcode::Pong => {
                self.ping_sent = false;
                link.restart_idle_timer();
            }
            Opcode::Close => match frame.close_reason() {
                Ok((code, reason)) => {
                    let detail = match code {
                        Some(code) => format!("peer sent close frame (code {code}, reason {reason:?})"),
                        None => "peer sent close frame".to_string(),
                    };
                    debug!("{detail}");
                    // RFC 6455 §5.5.1: the close we send back echoes the
                    // peer's status code and reason
                    self.send_close(code.unwrap_or(close_code::NORMAL), reason, SendPriority::High, link);
                    link.close(DisconnectReason::remote(detail));
                }
                Err(e) => {
                    warn!(error = %e, "malformed close frame payload");
                    self.send_close(close_code::PROTOCOL_ERROR, "", SendPriority::High, link);
                    link.close(DisconnectReason::remote("peer sent malformed close frame"));
                }
            },
        }
        Ok(())
    }
}

impl Adapter for WsAdapter {
    fn write(&mut self, data: Bytes, priority: SendPriority, link: &mut Link<'_>) -> Result<(), ProtoError> {
        let opcode = self.config.outbound.opcode();
        self.encode_to_link(Frame { fin: true, opcode, payload: data }, priority, link)
    }

    /// One logical message: the first part opens it, continuations follow,
    /// only the last carries FIN.
    fn write_batch(&mut self, parts: Vec<Bytes>, priority: SendPriority, link: &mut Link<'_>) -> Result<(), ProtoError> {
        let last = parts.len().saturating_sub(1);
        for (i, part) in parts.into_iter().enumerate() {
            let opcode = if i == 0 { self.config.outbound.opcode() } else { Opcode::Continuation };
            self.encode_to_link(Frame { fin: i == last, opcode, payload: part }, priority, link)?;
        }
        Ok(())
    }

    fn read(&mut self, data: Bytes, link: &mut Link<'_>) -> Result<(), ProtoError> {
        self.buf.extend_from_slice(&data);
        while let Some(frame) = self.codec.decode(&mut self.buf)? {
            self.handle_frame(frame, link)?;
        }
        Ok(())
    }

    fn idle_interval(&self) -> Option<Duration> {
        self.config.keepalive
    }

    fn on_idle(&mut self, link: &mut Link<'_>) -> Result<(), ProtoError> {
        if self.ping_sent {
            debug!("keepalive ping unanswered for a full period");
            link.close(DisconnectReason::timeout("peer did not answer keepalive ping"));
            return Ok(());
        }
        self.ping_sent = true;
        self.encode_to_link(Frame::ping(Bytes::new()), SendPriority::High, link)
    }

    fn before_disconnect(&mut self, link: &mut Link<'_>) {
        if link.state() == ConnectionState::Connected {
            self.send_close(close_code::NORMAL, "", SendPriority::Normal, link);
        }
    }
}
