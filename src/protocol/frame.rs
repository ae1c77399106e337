// src/protocol/frame.rs

use crate::error::PubError;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Fixed bytes written once at connection start identifying the protocol version.
pub const MAGIC_V2: &[u8; 4] = b"  V2";

/// Reserved payload of a response-typed frame carrying a broker liveness check.
pub const HEARTBEAT: &[u8] = b"_heartbeat_";

/// Upper bound on a single response frame. Anything larger is treated as a
/// protocol violation rather than an allocation request.
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Kind discriminator of one response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
  Response,
  Error,
  Message,
  Unknown(i32),
}

impl FrameType {
  pub fn from_i32(v: i32) -> FrameType {
    match v {
      0 => FrameType::Response,
      1 => FrameType::Error,
      2 => FrameType::Message,
      other => FrameType::Unknown(other),
    }
  }

  pub fn as_i32(self) -> i32 {
    match self {
      FrameType::Response => 0,
      FrameType::Error => 1,
      FrameType::Message => 2,
      FrameType::Unknown(other) => other,
    }
  }
}

/// Reads one length-prefixed response frame: `u32 size` big-endian, then
/// `size` bytes. Returns the raw frame payload (frame type still packed).
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Bytes, PubError> {
  let mut size_buf = [0u8; 4];
  reader.read_exact(&mut size_buf).await?;
  let size = u32::from_be_bytes(size_buf) as usize;
  if size > MAX_FRAME_SIZE {
    return Err(PubError::Protocol(format!("frame size {} exceeds limit", size)));
  }
  let mut payload = BytesMut::zeroed(size);
  reader.read_exact(&mut payload).await?;
  Ok(payload.freeze())
}

/// Unpacks a raw frame into its type discriminator and data payload.
pub fn unpack_response(frame: &Bytes) -> Result<(FrameType, Bytes), PubError> {
  if frame.len() < 4 {
    return Err(PubError::Protocol("length of response too small".to_string()));
  }
  let mut header = &frame[..4];
  let frame_type = FrameType::from_i32(header.get_i32());
  Ok((frame_type, frame.slice(4..)))
}

/// True when `(frame_type, data)` is the broker's heartbeat.
pub fn is_heartbeat(frame_type: FrameType, data: &Bytes) -> bool {
  frame_type == FrameType::Response && data.as_ref() == HEARTBEAT
}

#[cfg(test)]
mod tests {
  use super::*;
  use bytes::BufMut;

  fn packed(frame_type: i32, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i32(frame_type);
    buf.put_slice(data);
    buf.freeze()
  }

  #[test]
  fn unpack_splits_type_and_data() {
    let (ft, data) = unpack_response(&packed(0, b"OK")).unwrap();
    assert_eq!(ft, FrameType::Response);
    assert_eq!(data.as_ref(), b"OK");
  }

  #[test]
  fn unpack_rejects_short_frame() {
    let err = unpack_response(&Bytes::from_static(b"\x00\x00")).unwrap_err();
    assert!(matches!(err, PubError::Protocol(_)));
  }

  #[test]
  fn unknown_frame_type_round_trips() {
    let (ft, _) = unpack_response(&packed(7, b"")).unwrap();
    assert_eq!(ft, FrameType::Unknown(7));
    assert_eq!(ft.as_i32(), 7);
  }

  #[test]
  fn heartbeat_marker_detection() {
    assert!(is_heartbeat(FrameType::Response, &Bytes::from_static(HEARTBEAT)));
    assert!(!is_heartbeat(FrameType::Error, &Bytes::from_static(HEARTBEAT)));
    assert!(!is_heartbeat(FrameType::Response, &Bytes::from_static(b"OK")));
  }

  #[tokio::test]
  async fn read_frame_consumes_exactly_one_frame() {
    let mut wire = BytesMut::new();
    wire.put_u32(6);
    wire.put_i32(0);
    wire.put_slice(b"OK");
    wire.put_u32(4); // start of a second frame, must be left unread
    let mut cursor = std::io::Cursor::new(wire.freeze().to_vec());
    let frame = read_frame(&mut cursor).await.unwrap();
    assert_eq!(frame.len(), 6);
    assert_eq!(cursor.position(), 10);
  }
}
