use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtoError;

/// Close status codes defined by RFC 6455 §7.4.1.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const UNSUPPORTED_DATA: u16 = 1003;
    pub const INVALID_PAYLOAD: u16 = 1007;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const MESSAGE_TOO_BIG: u16 = 1009;
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// Frame opcode, the low nibble of the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    pub fn from_u8(value: u8) -> Result<Self, ProtoError> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(ProtoError::protocol(format!("reserved websocket opcode 0x{value:X}"))),
        }
    }
}

/// One decoded WebSocket frame. Payload is always unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Bytes,
}

impl Frame {
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self { fin: true, opcode: Opcode::Text, payload: payload.into() }
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self { fin: true, opcode: Opcode::Binary, payload: payload.into() }
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self { fin: true, opcode: Opcode::Ping, payload: payload.into() }
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self { fin: true, opcode: Opcode::Pong, payload: payload.into() }
    }

    /// A close frame carrying `code` and a UTF-8 reason. An empty reason
    /// with no code yields an empty payload.
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let payload = match code {
            Some(code) => {
                let mut buf = BytesMut::with_capacity(2 + reason.len());
                buf.put_u16(code);
                buf.put_slice(reason.as_bytes());
                buf.freeze()
            }
            None => Bytes::new(),
        };
        Self { fin: true, opcode: Opcode::Close, payload }
    }

    /// Split a close frame's payload into status code and reason.
    ///
    /// An empty payload is valid and means "no status". A one-byte payload
    /// or a non-UTF-8 reason is a protocol violation.
    pub fn close_reason(&self) -> Result<(Option<u16>, &str), ProtoError> {
        match self.payload.len() {
            0 => Ok((None, "")),
            1 => Err(ProtoError::protocol("close frame with one-byte payload")),
            _ => {
                let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
                let reason = std::str::from_utf8(&self.payload[2..])
                    .map_err(|_| ProtoError::protocol("close reason is not UTF-8"))?;
                Ok((Some(code), reason))
            }
        }
    }
}

/// XOR the mask key over `payload` in place. Masking is an involution:
/// applying the same key twice restores the original bytes.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_is_an_involution() {
        let key = [0x37, 0xFA, 0x21, 0x3D];
        for len in 0..300 {
            let original: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
            let mut masked = original.clone();
            apply_mask(&mut masked, key);
            if len > 0 {
                assert_ne!(masked, original);
            }
            apply_mask(&mut masked, key);
            assert_eq!(masked, original);
        }
    }

    #[test]
    fn reserved_opcodes_rejected() {
        for op in [0x3, 0x4, 0x5, 0x6, 0x7, 0xB, 0xC, 0xD, 0xE, 0xF] {
            assert!(Opcode::from_u8(op).is_err());
        }
    }

    #[test]
    fn close_payload_layout() {
        let frame = Frame::close(Some(close_code::NORMAL), "goodbye");
        assert_eq!(&frame.payload[..2], &1000u16.to_be_bytes());
        assert_eq!(&frame.payload[2..], b"goodbye");
        let (code, reason) = frame.close_reason().unwrap();
        assert_eq!(code, Some(1000));
        assert_eq!(reason, "goodbye");
    }

    #[test]
    fn close_without_code_is_empty() {
        let frame = Frame::close(None, "ignored without a code");
        assert!(frame.payload.is_empty());
        assert_eq!(frame.close_reason().unwrap(), (None, ""));
    }

    #[test]
    fn one_byte_close_payload_rejected() {
        let frame = Frame { fin: true, opcode: Opcode::Close, payload: Bytes::from_static(&[0x03]) };
        assert!(frame.close_reason().is_err());
    }
}
