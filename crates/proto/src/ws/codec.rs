use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::error::ProtoError;
use crate::ws::frame::{Frame, Opcode, apply_mask};

/// Default cap on a single frame's payload, 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Header fields carried between decode stages.
#[derive(Debug, Clone, Copy)]
struct PartialHeader {
    fin: bool,
    opcode: Opcode,
    masked: bool,
    payload_len: u64,
}

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    /// Waiting for the two fixed header bytes.
    Header,
    /// Waiting for a 2- or 8-byte extended length.
    ExtendedLength { header: PartialHeader, len_bytes: usize },
    /// Waiting for the 4-byte mask key.
    MaskKey { header: PartialHeader },
    /// Waiting for the full payload.
    Payload { header: PartialHeader, mask_key: Option<[u8; 4]> },
}

/// WebSocket frame codec, RFC 6455 §5.
///
/// Masking policy is explicit rather than derived from a role so the two
/// directions can be configured independently: a server codec requires
/// masked input and sends unmasked, a client codec the reverse. Decoded
/// payloads are always unmasked; whole frames are buffered until complete.
#[derive(Debug)]
pub struct WsFrameCodec {
    require_mask: bool,
    mask_outbound: bool,
    max_payload: usize,
    state: DecodeState,
}

impl WsFrameCodec {
    pub fn new(require_mask: bool, mask_outbound: bool) -> Self {
        Self { require_mask, mask_outbound, max_payload: DEFAULT_MAX_PAYLOAD, state: DecodeState::Header }
    }

    /// Server side: inbound frames must be masked, outbound are not.
    pub fn server() -> Self {
        Self::new(true, false)
    }

    /// Client side: inbound frames arrive unmasked, outbound are masked.
    pub fn client() -> Self {
        Self::new(false, true)
    }

    pub fn max_payload(mut self, max: usize) -> Self {
        self.max_payload = max;
        self
    }

    /// Encode `payload` as a fragmented data message: a first frame of
    /// `opcode` followed by continuation frames, all but the last with
    /// FIN clear. A zero `fragment_size` is rejected.
    pub fn encode_fragmented(&mut self, opcode: Opcode, payload: Bytes, fragment_size: usize, dst: &mut BytesMut) -> Result<(), ProtoError> {
        if opcode.is_control() {
            return Err(ProtoError::protocol("control frames cannot be fragmented"));
        }
        if fragment_size == 0 {
            return Err(ProtoError::protocol("fragment size must be nonzero"));
        }
        let mut offset = 0;
        let mut first = true;
        loop {
            let end = (offset + fragment_size).min(payload.len());
            let fin = end == payload.len();
            let frame = Frame {
                fin,
                opcode: if first { opcode } else { Opcode::Continuation },
                payload: payload.slice(offset..end),
            };
            self.encode(frame, dst)?;
            if fin {
                return Ok(());
            }
            offset = end;
            first = false;
        }
    }
}

impl Encoder<Frame> for WsFrameCodec {
    type Error = ProtoError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload_len = frame.payload.len();
        if frame.opcode.is_control() {
            if !frame.fin {
                return Err(ProtoError::protocol("fragmented control frame"));
            }
            if payload_len > 125 {
                return Err(ProtoError::protocol(format!("control frame payload of {payload_len} bytes exceeds 125")));
            }
        }

        let mut first = frame.opcode as u8;
        if frame.fin {
            first |= 0x80;
        }
        let mask_bit: u8 = if self.mask_outbound { 0x80 } else { 0 };

        dst.reserve(14 + payload_len);
        dst.put_u8(first);
        if payload_len <= 125 {
            dst.put_u8(mask_bit | payload_len as u8);
        } else if payload_len <= u16::MAX as usize {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(payload_len as u16);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(payload_len as u64);
        }

        if self.mask_outbound {
            let key: [u8; 4] = rand::random();
            dst.put_slice(&key);
            let mut masked = BytesMut::from(frame.payload.as_ref());
            apply_mask(&mut masked, key);
            dst.put_slice(&masked);
        } else {
            dst.put_slice(&frame.payload);
        }
        Ok(())
    }
}

impl Decoder for WsFrameCodec {
    type Item = Frame;
    type Error = ProtoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        loop {
            match self.state {
                DecodeState::Header => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    let first = src[0];
                    let second = src[1];

                    if first & 0x70 != 0 {
                        return Err(ProtoError::protocol("reserved frame bits set without a negotiated extension"));
                    }
                    let fin = first & 0x80 != 0;
                    let opcode = Opcode::from_u8(first & 0x0F)?;
                    let masked = second & 0x80 != 0;
                    let len7 = second & 0x7F;

                    if opcode.is_control() {
                        if !fin {
                            return Err(ProtoError::protocol("fragmented control frame"));
                        }
                        if len7 > 125 {
                            return Err(ProtoError::protocol("control frame payload exceeds 125 bytes"));
                        }
                    }
                    if self.require_mask && !masked {
                        return Err(ProtoError::protocol("unmasked frame from peer that must mask"));
                    }

                    let _ = src.split_to(2);
                    let header = PartialHeader { fin, opcode, masked, payload_len: u64::from(len7) };
                    self.state = match len7 {
                        126 => DecodeState::ExtendedLength { header, len_bytes: 2 },
                        127 => DecodeState::ExtendedLength { header, len_bytes: 8 },
                        _ => {
                            self.check_len(header.payload_len)?;
                            next_after_length(header)
                        }
                    };
                }
                DecodeState::ExtendedLength { mut header, len_bytes } => {
                    if src.len() < len_bytes {
                        return Ok(None);
                    }
                    let raw = src.split_to(len_bytes);
                    header.payload_len = if len_bytes == 2 {
                        u64::from(u16::from_be_bytes([raw[0], raw[1]]))
                    } else {
                        u64::from_be_bytes([raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7]])
                    };
                    self.check_len(header.payload_len)?;
                    self.state = next_after_length(header);
                }
                DecodeState::MaskKey { header } => {
                    if src.len() < 4 {
                        return Ok(None);
                    }
                    let raw = src.split_to(4);
                    let mask_key = [raw[0], raw[1], raw[2], raw[3]];
                    self.state = DecodeState::Payload { header, mask_key: Some(mask_key) };
                }
                DecodeState::Payload { header, mask_key } => {
                    let len = header.payload_len as usize;
                    if src.len() < len {
                        return Ok(None);
                    }
                    let mut payload = src.split_to(len);
                    if let Some(key) = mask_key {
                        apply_mask(&mut payload, key);
                    }
                    trace!(opcode = ?header.opcode, fin = header.fin, len, "decoded frame");
                    self.state = DecodeState::Header;
                    return Ok(Some(Frame { fin: header.fin, opcode: header.opcode, payload: payload.freeze() }));
                }
            }
        }
    }
}

impl WsFrameCodec {
    fn check_len(&self, len: u64) -> Result<(), ProtoError> {
        if len > self.max_payload as u64 {
            return Err(ProtoError::protocol(format!("frame payload of {len} bytes exceeds limit of {}", self.max_payload)));
        }
        Ok(())
    }
}

fn next_after_length(header: PartialHeader) -> DecodeState {
    if header.masked { DecodeState::MaskKey { header } } else { DecodeState::Payload { header, mask_key: None } }
}
