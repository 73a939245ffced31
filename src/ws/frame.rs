//! RFC 6455 frame codec (`spec.md` §4.6).

use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// The maximum frame payload this engine accepts from a server
/// (`spec.md` §7 `WSFrameTooLarge`); chosen generously above any
/// reasonable control-frame or message-frame size.
pub const MAX_FRAME_PAYLOAD: u64 = 64 * 1024 * 1024;

/// A WebSocket frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_byte(b: u8) -> Option<Opcode> {
        match b {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    /// Control frames (`spec.md` §4.6): never fragmented, payload ≤ 125 bytes.
    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// One decoded WebSocket frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// XORs `payload` in place with the 4-byte `key`, repeating it — used for
/// both masking (client→server) and unmasking (server→client) since XOR
/// is its own inverse (`spec.md` §4.6, GLOSSARY "Masking").
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Writes one frame to `w`. The client always masks (`spec.md` §4.6).
pub async fn write_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    fin: bool,
    opcode: Opcode,
    payload: &[u8],
) -> Result<()> {
    if opcode.is_control() && payload.len() > 125 {
        return Err(Error::ws_protocol("control frame payload exceeds 125 bytes"));
    }

    let mut header = Vec::with_capacity(14 + payload.len());
    let first_byte = (if fin { 0x80 } else { 0x00 }) | opcode.as_byte();
    header.push(first_byte);

    let len = payload.len();
    if len < 126 {
        header.push(0x80 | len as u8);
    } else if len <= u16::MAX as usize {
        header.push(0x80 | 126);
        header.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        header.push(0x80 | 127);
        header.extend_from_slice(&(len as u64).to_be_bytes());
    }

    let mut key = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut key);
    header.extend_from_slice(&key);

    let mut masked = payload.to_vec();
    apply_mask(&mut masked, key);

    w.write_all(&header).await.map_err(Error::request)?;
    w.write_all(&masked).await.map_err(Error::request)?;
    w.flush().await.map_err(Error::request)
}

/// Reads one frame from `r`. Server→client frames must be unmasked;
/// a masked server frame is a protocol error (`spec.md` §4.6).
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Frame> {
    let mut first_two = [0u8; 2];
    r.read_exact(&mut first_two).await.map_err(Error::request)?;

    let fin = first_two[0] & 0x80 != 0;
    let rsv = first_two[0] & 0x70;
    if rsv != 0 {
        return Err(Error::ws_protocol("reserved bits set without an extension"));
    }
    let opcode = Opcode::from_byte(first_two[0] & 0x0F)
        .ok_or_else(|| Error::ws_protocol("unknown opcode"))?;

    let masked = first_two[1] & 0x80 != 0;
    if masked {
        return Err(Error::ws_protocol("server frame must not be masked"));
    }
    let len7 = first_two[1] & 0x7F;

    let len: u64 = match len7 {
        126 => {
            let mut buf = [0u8; 2];
            r.read_exact(&mut buf).await.map_err(Error::request)?;
            u16::from_be_bytes(buf) as u64
        }
        127 => {
            let mut buf = [0u8; 8];
            r.read_exact(&mut buf).await.map_err(Error::request)?;
            u64::from_be_bytes(buf)
        }
        n => n as u64,
    };

    if len > MAX_FRAME_PAYLOAD {
        return Err(Error::ws_frame_too_large());
    }
    if opcode.is_control() && len > 125 {
        return Err(Error::ws_protocol("control frame payload exceeds 125 bytes"));
    }

    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload).await.map_err(Error::request)?;

    Ok(Frame { fin, opcode, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn masking_is_its_own_inverse() {
        let key = [0x11, 0x22, 0x33, 0x44];
        let original = b"hello websocket".to_vec();
        let mut data = original.clone();
        apply_mask(&mut data, key);
        assert_ne!(data, original);
        apply_mask(&mut data, key);
        assert_eq!(data, original);
    }

    #[tokio::test]
    async fn write_then_read_round_trips_payload() {
        let mut wire = Vec::new();
        write_frame(&mut wire, true, Opcode::Text, b"hello").await.unwrap();

        // Client frames are masked; strip the mask bit to emulate what a
        // server would see reading a client frame (used here purely to
        // exercise the decode path's length/opcode parsing, not the
        // mask-rejection rule, which `read_frame` applies to servers).
        wire[1] &= 0x7F;
        let key_start = 2;
        let key: [u8; 4] = wire[key_start..key_start + 4].try_into().unwrap();
        let mut payload = wire[key_start + 4..].to_vec();
        apply_mask(&mut payload, key);
        let mut rebuilt = vec![wire[0], wire[1]];
        rebuilt.extend(payload);

        let frame = read_frame(&mut Cursor::new(rebuilt)).await.unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(frame.payload, b"hello");
    }

    #[tokio::test]
    async fn masked_server_frame_is_rejected() {
        let mut wire = Vec::new();
        write_frame(&mut wire, true, Opcode::Text, b"x").await.unwrap();
        let err = read_frame(&mut Cursor::new(wire)).await.unwrap_err();
        assert!(err.is_websocket());
    }

    #[tokio::test]
    async fn oversized_control_frame_rejected_on_write() {
        let payload = vec![0u8; 200];
        let mut wire = Vec::new();
        let err = write_frame(&mut wire, true, Opcode::Ping, &payload).await.unwrap_err();
        assert!(err.is_websocket());
    }
}
